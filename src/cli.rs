//! Interface de linha de comando do agentik baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] e flags globais
//! (--verbose, --json-logs, --config, --redis-url, --max-retries).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// agentik: orquestrador de agentes baseado em filas para processos de sourcing B2B.
#[derive(Debug, Parser)]
#[command(name = "agentik", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Emite logs em JSON.
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,

    /// Caminho do arquivo de configuração (padrão: ./agentik.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// URL do Redis; vence o arquivo e a variável REDIS_URL.
    #[arg(long, global = true)]
    pub redis_url: Option<String>,

    /// Número máximo de tentativas por estágio.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inicia o orquestrador com os seis estágios até receber Ctrl-C.
    Run,

    /// Submete um job.
    Submit {
        /// Tipo do job (nome ou alias de workflow).
        job_type: String,

        /// Payload do job como objeto JSON.
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Usuário dono do job.
        #[arg(long, default_value = "cli")]
        user: String,

        /// Acompanha o job até um status terminal.
        #[arg(long, default_value_t = false)]
        follow: bool,
    },

    /// Executa o pipeline completo em memória com uma RFQ de exemplo.
    Demo,

    /// Mostra o registro de status de um job.
    Status { job_id: String },

    /// Cancela um job.
    Cancel { job_id: String },

    /// Lista os jobs mais recentes de um usuário.
    Jobs {
        user_id: String,

        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long)]
        job_type: Option<String>,
    },

    /// Mostra as tentativas mais recentes de um agente, lidas do armazenamento.
    Audit {
        agent: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Mostra a profundidade de cada fila.
    Queues,

    /// Mostra o último heartbeat publicado.
    Heartbeat,

    /// Lista os workflows conhecidos e seus estágios.
    Workflows,

    /// Mostra o estado do armazenamento e a profundidade das filas em JSON.
    System,

    /// Apaga a fila de entrada e todas as filas de estágio.
    ClearQueues,
}
