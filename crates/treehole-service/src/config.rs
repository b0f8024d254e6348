use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

const DEFAULT_DB_PATH: &str = "./treehole.sqlite3";
const DEFAULT_ADMIN_TOKEN: &str = "treehole-admin";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 2500;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("ADMIN_TOKEN must not be empty")]
    EmptyAdminToken,
}

/// Process configuration, read once from the environment at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub db_path: PathBuf,
    pub admin_token: String,
    pub bind: SocketAddr,
    pub operation_timeout: Duration,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("db_path", &self.db_path)
            .field("admin_token", &"<redacted>")
            .field("bind", &self.bind)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let db_path = PathBuf::from(load_or(&lookup, "TREEHOLE_DB_PATH", DEFAULT_DB_PATH));

        let admin_token = match lookup("ADMIN_TOKEN") {
            Some(token) if token.is_empty() => return Err(ConfigError::EmptyAdminToken),
            Some(token) => token,
            None => {
                warn!(
                    "ADMIN_TOKEN not set, using the built-in default; \
                     set it before exposing the service"
                );
                DEFAULT_ADMIN_TOKEN.to_string()
            }
        };

        let host: IpAddr = parse_or(&lookup, "HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?;
        let port: u16 = parse_or(&lookup, "PORT", DEFAULT_PORT)?;
        let timeout_ms: u64 =
            parse_or(&lookup, "TREEHOLE_OPERATION_TIMEOUT_MS", DEFAULT_OPERATION_TIMEOUT_MS)?;
        if timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "TREEHOLE_OPERATION_TIMEOUT_MS",
                value: timeout_ms.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            db_path,
            admin_token,
            bind: SocketAddr::new(host, port),
            operation_timeout: Duration::from_millis(timeout_ms),
        })
    }
}

fn load_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    })
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: err.to_string(),
        }),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(key, value)| ((*key).to_string(), (*value).to_string())).collect();
        ServiceConfig::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = match config_from(&[]) {
            Ok(config) => config,
            Err(err) => panic!("expected default config: {err}"),
        };
        assert_eq!(config.db_path, PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(config.admin_token, DEFAULT_ADMIN_TOKEN);
        assert_eq!(config.bind, SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000));
        assert_eq!(config.operation_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = match config_from(&[
            ("TREEHOLE_DB_PATH", "/var/lib/treehole/db.sqlite3"),
            ("ADMIN_TOKEN", "s3cret"),
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("TREEHOLE_OPERATION_TIMEOUT_MS", "500"),
        ]) {
            Ok(config) => config,
            Err(err) => panic!("expected explicit config: {err}"),
        };
        assert_eq!(config.db_path, PathBuf::from("/var/lib/treehole/db.sqlite3"));
        assert_eq!(config.admin_token, "s3cret");
        assert_eq!(config.bind.to_string(), "127.0.0.1:8080");
        assert_eq!(config.operation_timeout, Duration::from_millis(500));
    }

    #[test]
    fn empty_admin_token_is_refused() {
        assert_eq!(config_from(&[("ADMIN_TOKEN", "")]), Err(ConfigError::EmptyAdminToken));
    }

    #[test]
    fn unparseable_port_is_refused() {
        let result = config_from(&[("PORT", "eighty")]);
        assert!(matches!(result, Err(ConfigError::Invalid { key: "PORT", .. })));
    }

    #[test]
    fn zero_timeout_is_refused() {
        let result = config_from(&[("TREEHOLE_OPERATION_TIMEOUT_MS", "0")]);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { key: "TREEHOLE_OPERATION_TIMEOUT_MS", .. })
        ));
    }

    #[test]
    fn debug_output_redacts_admin_token() {
        let config = match config_from(&[("ADMIN_TOKEN", "do-not-print")]) {
            Ok(config) => config,
            Err(err) => panic!("expected config: {err}"),
        };
        assert!(!format!("{config:?}").contains("do-not-print"));
    }
}
