//! Inicialização do `tracing` para o binário.
//!
//! Os logs vão para stderr; stdout fica livre para a saída dos comandos.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Nível usado quando `RUST_LOG` não está definido.
fn default_directive(verbose: bool) -> &'static str {
    if verbose { "agentik=debug,info" } else { "info" }
}

/// Instala o subscriber global. Chamadas repetidas são ignoradas.
pub fn init(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("global tracing subscriber already installed");
    }
}
