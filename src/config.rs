use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::mission::admission::AreaDefaults;
use crate::notify::DEFAULT_CHANNEL;
use crate::remote::StatusTable;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: String,
    pub server_address: String,
    pub gateway_api_key: String,
    pub amr_base_url: String,
    pub amr_api_key: Option<String>,
    pub amr_timeout: Duration,
    pub reconcile_interval: Duration,
    pub schedule_tick: Duration,
    pub admission_interval: Duration,
    pub stale_grace: Duration,
    pub schedule_claim_lease: Duration,
    pub area_defaults: AreaDefaults,
    pub status_table: StatusTable,
    pub notify_channel: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let status_table = match env::var("AMR_STATUS_TABLE") {
            Ok(raw) if !raw.trim().is_empty() => {
                StatusTable::from_json(&raw).map_err(|_| ConfigError::Invalid {
                    key: "AMR_STATUS_TABLE",
                    value: raw,
                })?
            }
            _ => StatusTable::default(),
        };

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10)?,
            redis_url: required("REDIS_URL")?,
            server_address: env::var("SERVER_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:3003".to_string()),
            gateway_api_key: required("GATEWAY_API_KEY")?,
            amr_base_url: required("AMR_BASE_URL")?,
            amr_api_key: env::var("AMR_API_KEY").ok().filter(|k| !k.is_empty()),
            amr_timeout: Duration::from_secs(parsed("AMR_TIMEOUT_SECS", 10)?),
            reconcile_interval: Duration::from_secs(parsed("RECONCILE_INTERVAL_SECS", 5)?),
            schedule_tick: Duration::from_secs(parsed("SCHEDULE_TICK_SECS", 30)?),
            admission_interval: Duration::from_secs(parsed("ADMISSION_INTERVAL_SECS", 10)?),
            stale_grace: Duration::from_secs(parsed("STALE_GRACE_SECS", 300)?),
            schedule_claim_lease: Duration::from_secs(parsed("SCHEDULE_CLAIM_LEASE_SECS", 120)?),
            area_defaults: AreaDefaults {
                max_concurrent_robots: parsed("DEFAULT_MAX_CONCURRENT_ROBOTS", 1)?,
                default_priority: parsed("DEFAULT_PRIORITY", 5)?,
                max_opportunistic_chain: parsed("DEFAULT_OPPORTUNISTIC_CHAIN", 0)?,
            },
            status_table,
            notify_channel: env::var("NOTIFY_CHANNEL")
                .unwrap_or_else(|_| DEFAULT_CHANNEL.to_string()),
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        Err(_) => Ok(default),
    }
}
