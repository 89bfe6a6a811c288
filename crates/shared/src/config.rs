use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config_env::{
    optional_trimmed_env, parse_positive_u64_env, parse_u32_env, path_env, require_env,
};
use crate::context_store::ContextExpiryPolicy;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_SCORER_PROGRAM: &str = "python3";
const DEFAULT_SCORER_DEFAULT_SCRIPT: &str = "predict.py";
const DEFAULT_SCORER_REGIONAL_SCRIPT: &str = "predict_marathi.py";

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub migrations_dir: PathBuf,
    pub context_ttl_minutes: u64,
    pub context_sweep_interval_minutes: u64,
    pub context_expiry_policy: ContextExpiryPolicy,
    pub heuristic_evaluator_url: Option<String>,
    pub heuristic_evaluator_timeout_ms: u64,
    pub risk_scorer: RiskScorerConfig,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub processing_interval_minutes: u64,
    pub database_url: String,
    pub database_max_connections: u32,
    pub risk_scorer: RiskScorerConfig,
}

/// Where the external classification scripts live and how long one
/// invocation may take.
#[derive(Debug, Clone)]
pub struct RiskScorerConfig {
    pub program: String,
    pub default_script: PathBuf,
    pub regional_script: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingVar(String),
    #[error("invalid integer in env var {0}")]
    ParseInt(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let context_expiry_policy = match optional_trimmed_env("CONTEXT_EXPIRY_POLICY") {
            Some(raw) => ContextExpiryPolicy::parse(&raw).ok_or_else(|| {
                ConfigError::InvalidConfiguration(format!(
                    "CONTEXT_EXPIRY_POLICY must be 'absolute' or 'sliding', got '{raw}'"
                ))
            })?,
            None => ContextExpiryPolicy::AbsoluteAge,
        };

        let heuristic_evaluator_url = optional_trimmed_env("HEURISTIC_EVALUATOR_URL");
        if let Some(url) = heuristic_evaluator_url.as_deref()
            && !url.starts_with("http://")
            && !url.starts_with("https://")
        {
            return Err(ConfigError::InvalidConfiguration(
                "HEURISTIC_EVALUATOR_URL must start with http:// or https://".to_string(),
            ));
        }

        Ok(Self {
            bind_addr: optional_trimmed_env("API_BIND_ADDR")
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            database_url: require_env("DATABASE_URL")?,
            database_max_connections: parse_u32_env("DATABASE_MAX_CONNECTIONS", 10)?,
            migrations_dir: optional_trimmed_env("MIGRATIONS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../db/migrations")
                }),
            context_ttl_minutes: parse_positive_u64_env("CONTEXT_TTL_MINUTES", 30)?,
            context_sweep_interval_minutes: parse_positive_u64_env(
                "CONTEXT_SWEEP_INTERVAL_MINUTES",
                10,
            )?,
            context_expiry_policy,
            heuristic_evaluator_url,
            heuristic_evaluator_timeout_ms: parse_positive_u64_env(
                "HEURISTIC_EVALUATOR_TIMEOUT_MS",
                10_000,
            )?,
            risk_scorer: RiskScorerConfig::from_env()?,
        })
    }

    pub fn context_ttl(&self) -> Duration {
        Duration::from_secs(self.context_ttl_minutes.saturating_mul(60))
    }

    pub fn context_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.context_sweep_interval_minutes.saturating_mul(60))
    }

    pub fn heuristic_evaluator_timeout(&self) -> Duration {
        Duration::from_millis(self.heuristic_evaluator_timeout_ms)
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            processing_interval_minutes: parse_positive_u64_env(
                "PROCESSING_INTERVAL_MINUTES",
                15,
            )?,
            database_url: require_env("DATABASE_URL")?,
            database_max_connections: parse_u32_env("DATABASE_MAX_CONNECTIONS", 5)?,
            risk_scorer: RiskScorerConfig::from_env()?,
        })
    }

    pub fn processing_interval(&self) -> Duration {
        Duration::from_secs(self.processing_interval_minutes.saturating_mul(60))
    }
}

impl RiskScorerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            program: optional_trimmed_env("RISK_SCORER_PROGRAM")
                .unwrap_or_else(|| DEFAULT_SCORER_PROGRAM.to_string()),
            default_script: path_env("RISK_SCORER_DEFAULT_SCRIPT", DEFAULT_SCORER_DEFAULT_SCRIPT),
            regional_script: path_env(
                "RISK_SCORER_REGIONAL_SCRIPT",
                DEFAULT_SCORER_REGIONAL_SCRIPT,
            ),
            working_dir: optional_trimmed_env("RISK_SCORER_WORKING_DIR").map(PathBuf::from),
            timeout_seconds: parse_positive_u64_env("RISK_SCORER_TIMEOUT_SECONDS", 120)?,
        })
    }
}
