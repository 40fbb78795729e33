//! Configuração do agentik carregada a partir de `agentik.toml`.
//!
//! A struct [`AgentikConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `REDIS_URL` tem precedência sobre o arquivo.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Nome do arquivo procurado no diretório atual.
pub const CONFIG_FILE: &str = "agentik.toml";

/// Configuração de nível superior carregada de `agentik.toml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentikConfig {
    /// URL do servidor Redis usado como fila e armazenamento de status.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Máximo de tentativas por estágio antes de marcar o job como falho.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Atraso base em milissegundos para backoff linear.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Timeout do pop bloqueante antes de verificar o shutdown.
    #[serde(default = "default_pop_timeout_ms")]
    pub pop_timeout_ms: u64,

    /// Pausa após uma falha transitória do armazenamento.
    #[serde(default = "default_store_retry_delay_ms")]
    pub store_retry_delay_ms: u64,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,

    /// Agentes sem atividade há mais que isso são marcados como unhealthy.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Falhas consecutivas que abrem o circuit breaker de um worker.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,

    #[serde(default = "default_breaker_pause_secs")]
    pub breaker_pause_secs: u64,

    /// Tempo de espera pelos loops no shutdown antes de abortá-los.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

// Valor padrão para a URL do Redis: instância local.
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

// Valor padrão para tentativas máximas: 3.
fn default_max_retries() -> u32 {
    3
}

// Valor padrão para o atraso base: 1000ms.
fn default_base_delay_ms() -> u64 {
    1000
}

fn default_pop_timeout_ms() -> u64 {
    1000
}

fn default_store_retry_delay_ms() -> u64 {
    1000
}

fn default_heartbeat_interval_secs() -> u64 {
    5
}

fn default_health_interval_secs() -> u64 {
    30
}

// Cinco minutos.
fn default_stale_after_secs() -> u64 {
    300
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_pause_secs() -> u64 {
    30
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for AgentikConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            pop_timeout_ms: default_pop_timeout_ms(),
            store_retry_delay_ms: default_store_retry_delay_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            health_interval_secs: default_health_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
            breaker_threshold: default_breaker_threshold(),
            breaker_pause_secs: default_breaker_pause_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl AgentikConfig {
    /// Carrega a configuração de `path`, ou de `agentik.toml` no diretório atual.
    ///
    /// Um caminho explícito que não existe é erro; o arquivo padrão ausente
    /// resulta nos valores padrão.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Path::new(CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        if let Some(url) = std::env::var("REDIS_URL").ok().filter(|u| !u.is_empty()) {
            config.redis_url = url;
        }

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// Aplica os overrides da linha de comando, que vencem arquivo e ambiente.
    pub fn with_overrides(mut self, redis_url: Option<String>, max_retries: Option<u32>) -> Self {
        if let Some(url) = redis_url {
            self.redis_url = url;
        }
        if let Some(retries) = max_retries {
            self.max_retries = retries;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = AgentikConfig::default();
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.heartbeat_interval_secs, 5);
        assert_eq!(config.health_interval_secs, 30);
        assert_eq!(config.stale_after_secs, 300);
        assert_eq!((config.breaker_threshold, config.breaker_pause_secs), (5, 30));
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            redis_url = "redis://queue.internal:6380"
            max_retries = 5
        "#;
        let config: AgentikConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.redis_url, "redis://queue.internal:6380");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.shutdown_grace_secs, 10);
    }

    #[test]
    fn load_reads_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "breaker_threshold = 2\nbase_delay_ms = 250").unwrap();

        let config = AgentikConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.breaker_threshold, 2);
        assert_eq!(config.base_delay_ms, 250);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn load_rejects_missing_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AgentikConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn load_rejects_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_retries = \"many\"").unwrap();
        assert!(AgentikConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn cli_overrides_win() {
        let config = AgentikConfig::default().with_overrides(Some("redis://other:1".into()), Some(7));
        assert_eq!(config.redis_url, "redis://other:1");
        assert_eq!(config.max_retries, 7);

        let untouched = AgentikConfig::default().with_overrides(None, None);
        assert_eq!(untouched, AgentikConfig::default());
    }
}
