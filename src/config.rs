//! Configuração do simulador carregada a partir de `jobsim.toml`.
//!
//! A struct [`ServiceConfig`] contém todos os parâmetros ajustáveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `JOBSIM_ADMIN_TOKEN` tem precedência sobre o arquivo.
//!
//! Em tempo de execução a configuração vive num [`ConfigHandle`]: cada
//! operação lê um snapshot versionado e imutável, e `update` troca o snapshot
//! inteiro de forma atômica.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::rate_limit::RateLimitPolicy;
use crate::state_machine::Tier;

/// Arquivo de configuração procurado no diretório atual.
pub const DEFAULT_CONFIG_FILE: &str = "jobsim.toml";

/// Variável de ambiente que sobrescreve `admin_token`.
pub const ADMIN_TOKEN_ENV: &str = "JOBSIM_ADMIN_TOKEN";

/// Premium jobs run this many times faster than free ones.
pub const PREMIUM_SPEEDUP: u64 = 3;

/// Configuração de nível superior carregada de `jobsim.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Duração do processamento de um job free, em milissegundos.
    #[serde(default = "default_processing_duration_base_ms")]
    pub processing_duration_base_ms: u64,

    /// Probabilidade de uma falha transitória simulada, em `[0, 1]`.
    #[serde(default = "default_error_rate")]
    pub error_rate: f64,

    /// Máximo de submissões free por identidade.
    #[serde(default = "default_rate_limit_ceiling")]
    pub rate_limit_ceiling: u32,

    /// Máximo de retentativas antes de marcar um job como falho permanente.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Janela do rate limiter em segundos. Ausente = contador vitalício.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_window_secs: Option<u64>,

    /// Credencial administrativa exigida para cancelar jobs.
    #[serde(default = "default_admin_token")]
    pub admin_token: String,

    /// Intervalo base entre consultas do poller, em milissegundos.
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,

    /// Falhas transitórias toleradas pelo poller antes de desistir.
    #[serde(default = "default_poll_max_retries")]
    pub poll_max_retries: u32,
}

// Valor padrão da duração base: 15 segundos.
fn default_processing_duration_base_ms() -> u64 {
    15_000
}

// Valor padrão da taxa de erro: 20%.
fn default_error_rate() -> f64 {
    0.2
}

// Valor padrão do teto do rate limiter: 5.
fn default_rate_limit_ceiling() -> u32 {
    5
}

// Valor padrão para retentativas máximas: 3.
fn default_max_retries() -> u32 {
    3
}

fn default_admin_token() -> String {
    "admin".to_string()
}

fn default_polling_interval_ms() -> u64 {
    5_000
}

fn default_poll_max_retries() -> u32 {
    3
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            processing_duration_base_ms: default_processing_duration_base_ms(),
            error_rate: default_error_rate(),
            rate_limit_ceiling: default_rate_limit_ceiling(),
            max_retries: default_max_retries(),
            rate_limit_window_secs: None,
            admin_token: default_admin_token(),
            polling_interval_ms: default_polling_interval_ms(),
            poll_max_retries: default_poll_max_retries(),
        }
    }
}

impl ServiceConfig {
    /// Carrega a configuração de `path`, ou de `jobsim.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let config = Self::load_file(path)?;
        let config = config.with_admin_token_override(std::env::var(ADMIN_TOKEN_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str::<ServiceConfig>(&contents)?)
    }

    // Variável de ambiente tem precedência sobre o arquivo para o token administrativo.
    fn with_admin_token_override(mut self, token: Option<String>) -> Self {
        if let Some(token) = token
            && !token.is_empty()
        {
            self.admin_token = token;
        }
        self
    }

    /// Processing time for a job of `tier`. Premium is strictly shorter than
    /// free for any non-zero base.
    pub fn processing_duration_ms(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Free => self.processing_duration_base_ms,
            Tier::Premium => self.processing_duration_base_ms / PREMIUM_SPEEDUP,
        }
    }

    pub fn rate_limit_policy(&self) -> Result<RateLimitPolicy, ServiceError> {
        RateLimitPolicy::from_window_secs(self.rate_limit_window_secs)
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.processing_duration_base_ms == 0 {
            return Err(ServiceError::InvalidConfig(
                "processing_duration_base_ms must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.error_rate) {
            return Err(ServiceError::InvalidConfig(format!(
                "error_rate must be within [0, 1], got {}",
                self.error_rate
            )));
        }
        if self.rate_limit_window_secs == Some(0) {
            return Err(ServiceError::InvalidConfig(
                "rate_limit_window_secs must be greater than zero".into(),
            ));
        }
        self.rate_limit_policy()?;
        Ok(())
    }
}

/// Partial update accepted by `set_config`. Absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    #[serde(default)]
    pub processing_duration_base_ms: Option<u64>,
    #[serde(default)]
    pub error_rate: Option<f64>,
    #[serde(default)]
    pub rate_limit_ceiling: Option<u32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl ConfigUpdate {
    fn apply_to(&self, config: &mut ServiceConfig) {
        if let Some(base) = self.processing_duration_base_ms {
            config.processing_duration_base_ms = base;
        }
        if let Some(rate) = self.error_rate {
            config.error_rate = rate;
        }
        if let Some(ceiling) = self.rate_limit_ceiling {
            config.rate_limit_ceiling = ceiling;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
    }
}

/// An immutable configuration snapshot tagged with its version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionedConfig {
    pub version: u64,
    #[serde(flatten)]
    pub config: ServiceConfig,
}

/// Live, tunable configuration shared by every operation.
pub struct ConfigHandle {
    current: RwLock<Arc<VersionedConfig>>,
}

impl ConfigHandle {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(VersionedConfig { version: 1, config })),
        }
    }

    pub fn snapshot(&self) -> Arc<VersionedConfig> {
        Arc::clone(&self.current.read())
    }

    /// Apply `update` atomically. An invalid result leaves the current
    /// snapshot untouched.
    pub fn update(&self, update: &ConfigUpdate) -> Result<Arc<VersionedConfig>, ServiceError> {
        let mut current = self.current.write();
        let mut config = current.config.clone();
        update.apply_to(&mut config);
        config.validate()?;

        let next = Arc::new(VersionedConfig {
            version: current.version + 1,
            config,
        });
        *current = Arc::clone(&next);
        Ok(next)
    }
}
