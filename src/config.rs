use crate::error::CustodyError;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub ledger: LedgerConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub contract_ref: String,
    pub signing_credential: String,
    pub submit_timeout_secs: u64,
}

impl LedgerConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// 0 disables the background purge entirely.
    pub retention_days: i64,
    pub sweep_interval_secs: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, CustodyError> {
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://custody.db?mode=rwc".to_string());

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = parse_env("SERVER_PORT", 3000u16)?;

        let ledger = LedgerConfig {
            enabled: parse_env("LEDGER_ENABLED", true)?,
            endpoint: env::var("LEDGER_ENDPOINT")
                .unwrap_or_else(|_| "http://127.0.0.1:7545".to_string()),
            contract_ref: env::var("LEDGER_CONTRACT").unwrap_or_default(),
            signing_credential: env::var("LEDGER_SIGNING_CREDENTIAL").unwrap_or_default(),
            submit_timeout_secs: parse_env("LEDGER_SUBMIT_TIMEOUT_SECS", 30u64)?,
        };

        let retention = RetentionConfig {
            retention_days: parse_env("AUDIT_RETENTION_DAYS", 0i64)?,
            sweep_interval_secs: parse_env("AUDIT_SWEEP_INTERVAL_SECS", 86400u64)?,
        };

        Ok(AppConfig {
            database_url,
            server_host,
            server_port,
            ledger,
            retention,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, CustodyError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|e| {
            CustodyError::ConfigurationError(format!("Invalid {}={:?}: {}", key, raw, e))
        }),
        Err(_) => Ok(default),
    }
}
