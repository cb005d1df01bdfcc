use std::{env, fmt, net::SocketAddr, time::Duration};

use url::Url;

use super::{parse_flag, server_bind_address};

pub const DEFAULT_ACTIVATION_URL: &str =
    "https://api.findofficers.com/hiring_test/get_activation_code";
pub const DEFAULT_EMPLOYEES_URL: &str =
    "https://api.findofficers.com/hiring_test/get_all_employee";
pub const DEFAULT_LAYOUT_DELAY_MS: u64 = 500;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// The two directory endpoints a sync talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEndpoints {
    pub activation_url: Url,
    pub employees_url: Url,
}

/// Knobs controlling how overlapping and repeated syncs behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncOptions {
    /// Reject a sync trigger while another sync is still running.
    pub single_flight: bool,
    /// Clear previously placed markers before placing a new batch.
    pub replace_markers: bool,
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub directory: DirectoryEndpoints,
    pub layout_delay: Duration,
    pub sync: SyncOptions,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let directory = DirectoryEndpoints {
            activation_url: url_var("DIRECTORY_ACTIVATION_URL", DEFAULT_ACTIVATION_URL)?,
            employees_url: url_var("DIRECTORY_EMPLOYEES_URL", DEFAULT_EMPLOYEES_URL)?,
        };

        let layout_delay = match env::var("MAP_LAYOUT_DELAY_MS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidNumber {
                    var: "MAP_LAYOUT_DELAY_MS",
                    value: raw,
                })?,
            Err(_) => Duration::from_millis(DEFAULT_LAYOUT_DELAY_MS),
        };

        let sync = SyncOptions {
            single_flight: flag_var("SYNC_SINGLE_FLIGHT")?,
            replace_markers: flag_var("SYNC_REPLACE_MARKERS")?,
        };

        Ok(Self {
            bind_addr,
            environment,
            directory,
            layout_delay,
            sync,
        })
    }
}

fn url_var(var: &'static str, default: &str) -> Result<Url, ConfigError> {
    let raw = env::var(var).unwrap_or_else(|_| default.to_string());
    Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl { var, source })
}

fn flag_var(var: &'static str) -> Result<bool, ConfigError> {
    match env::var(var) {
        Ok(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidFlag { var, value: raw }),
        Err(_) => Ok(false),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    InvalidUrl {
        var: &'static str,
        source: url::ParseError,
    },
    InvalidNumber {
        var: &'static str,
        value: String,
    },
    InvalidFlag {
        var: &'static str,
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::InvalidUrl { var, source } => write!(f, "invalid {var} value: {source}"),
            Self::InvalidNumber { var, value } => {
                write!(f, "{var} must be a non-negative integer (got {value})")
            }
            Self::InvalidFlag { var, value } => {
                write!(f, "{var} must be a boolean flag (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
