use std::env;
use std::fmt;
use std::path::PathBuf;

/// Server settings, read from `AGENDA_*` environment variables (and `.env`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "agenda".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let tls_cert = lookup("AGENDA_TLS_CERT");
        let tls_key = lookup("AGENDA_TLS_KEY");
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::IncompleteTls);
        }

        Ok(Self {
            bind: lookup("AGENDA_BIND").unwrap_or(defaults.bind),
            port: parse_or(&lookup, "AGENDA_PORT", defaults.port)?,
            data_dir: lookup("AGENDA_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: lookup("AGENDA_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_or(&lookup, "AGENDA_MAX_CONNECTIONS", defaults.max_connections)?,
            compact_threshold: parse_or(&lookup, "AGENDA_COMPACT_THRESHOLD", defaults.compact_threshold)?,
            metrics_port: lookup("AGENDA_METRICS_PORT")
                .map(|v| v.parse().map_err(|_| ConfigError::Invalid { key: "AGENDA_METRICS_PORT", value: v }))
                .transpose()?,
            tls_cert,
            tls_key,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { key: &'static str, value: String },
    IncompleteTls,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { key, value } => write!(f, "{key}: invalid value '{value}'"),
            ConfigError::IncompleteTls => {
                write!(f, "both AGENDA_TLS_CERT and AGENDA_TLS_KEY must be set, or neither")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
