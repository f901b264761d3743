use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::calendar::Calendar;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name}={value:?} is not a valid value")]
    Invalid { name: &'static str, value: String },
    #[error("WASHBOOK_TLS_CERT and WASHBOOK_TLS_KEY must be set together")]
    PartialTls,
}

/// Server settings, read from `WASHBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub retention_days: u32,
    pub calendar: Calendar,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "washbook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            retention_days: 90,
            calendar: Calendar::utc(),
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let calendar = match parsed::<i32>(&lookup, "WASHBOOK_UTC_OFFSET_MINUTES")? {
            None => defaults.calendar,
            Some(minutes) => {
                Calendar::from_offset_minutes(minutes).ok_or_else(|| ConfigError::Invalid {
                    name: "WASHBOOK_UTC_OFFSET_MINUTES",
                    value: minutes.to_string(),
                })?
            }
        };

        let tls_cert = lookup("WASHBOOK_TLS_CERT");
        let tls_key = lookup("WASHBOOK_TLS_KEY");
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::PartialTls);
        }

        Ok(Self {
            port: parsed(&lookup, "WASHBOOK_PORT")?.unwrap_or(defaults.port),
            bind: lookup("WASHBOOK_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("WASHBOOK_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            password: lookup("WASHBOOK_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&lookup, "WASHBOOK_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "WASHBOOK_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            retention_days: parsed(&lookup, "WASHBOOK_RETENTION_DAYS")?
                .unwrap_or(defaults.retention_days),
            calendar,
            tls_cert,
            tls_key,
            metrics_port: parsed(&lookup, "WASHBOOK_METRICS_PORT")?,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
