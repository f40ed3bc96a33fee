//! Interface de linha de comando do simulador baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, config)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// jobsim: simulador de processamento assíncrono de jobs.
#[derive(Debug, Parser)]
#[command(name = "jobsim", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./jobsim.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa uma sessão simulada: submete jobs, despacha e acompanha até o fim.
    Run {
        /// Número de jobs free a submeter.
        #[arg(long, default_value_t = 6)]
        free: usize,

        /// Número de jobs premium a submeter.
        #[arg(long, default_value_t = 2)]
        premium: usize,

        /// Identidade usada pelo rate limiter.
        #[arg(long, default_value = "demo-user")]
        identity: String,

        /// Semente para a injeção de falhas (aleatória se omitida).
        #[arg(long)]
        seed: Option<u64>,

        /// Período do dispatcher em milissegundos.
        #[arg(long, default_value_t = 250)]
        tick_ms: u64,

        /// Sobrescreve a duração base de processamento (ms).
        #[arg(long)]
        duration_ms: Option<u64>,

        /// Sobrescreve a taxa de erro das consultas.
        #[arg(long)]
        error_rate: Option<f64>,

        /// Chance por tick de o worker reportar uma falha.
        #[arg(long, default_value_t = 0.02)]
        worker_failure_rate: f64,

        /// Não cancela o primeiro job free.
        #[arg(long, default_value_t = false)]
        no_cancel: bool,

        /// Imprime o relatório completo em JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Mostra a configuração efetiva.
    Config,
}
