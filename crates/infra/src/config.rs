//! Server configuration read from the environment.
//!
//! | variable | meaning | default |
//! |---|---|---|
//! | `KILN_LISTEN_ADDR` | socket address to bind | `0.0.0.0:8700` |
//! | `KILN_STATE_DIR` | directory for job records | unset: in-memory |
//! | `KILN_ARTIFACTS_DIR` | directory for uploaded artifacts | unset: discard |
//! | `KILN_ALLOWED_ACCOUNTS` | comma-separated account allow-list | empty: no access control |
//! | `KILN_JWT_SECRET` | HS256 secret for bearer tokens | unset: bearer disabled |
//! | `KILN_STORE` | `postgres` selects the database store (`DATABASE_URL`) | local |

use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8700";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}: {message}")]
    Invalid { var: &'static str, message: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Filesystem(PathBuf),
    #[cfg(feature = "postgres")]
    Postgres(String),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub store: StoreBackend,
    pub artifacts_dir: Option<PathBuf>,
    pub allowed_accounts: Vec<String>,
    pub jwt_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8700)),
            store: StoreBackend::Memory,
            artifacts_dir: None,
            allowed_accounts: Vec::new(),
            jwt_secret: None,
        }
    }
}

impl ServerConfig {
    /// Read from the process environment. Callers load `.env` first.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let listen_addr = get("KILN_LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                var: "KILN_LISTEN_ADDR",
                message: e.to_string(),
            })?;

        let store = match get("KILN_STORE").as_deref() {
            None | Some("local") => match get("KILN_STATE_DIR") {
                Some(dir) => StoreBackend::Filesystem(PathBuf::from(dir)),
                None => StoreBackend::Memory,
            },
            #[cfg(feature = "postgres")]
            Some("postgres") => {
                StoreBackend::Postgres(get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?)
            }
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "KILN_STORE",
                    message: format!("unsupported store '{other}'"),
                });
            }
        };

        let allowed_accounts = get("KILN_ALLOWED_ACCOUNTS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            listen_addr,
            store,
            artifacts_dir: get("KILN_ARTIFACTS_DIR").map(PathBuf::from),
            allowed_accounts,
            jwt_secret: get("KILN_JWT_SECRET"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.listen_addr.to_string(), DEFAULT_LISTEN_ADDR);
        assert_eq!(cfg.store, StoreBackend::Memory);
        assert!(cfg.artifacts_dir.is_none());
        assert!(cfg.allowed_accounts.is_empty());
        assert!(cfg.jwt_secret.is_none());
    }

    #[test]
    fn reads_everything() {
        let cfg = config(&[
            ("KILN_LISTEN_ADDR", "127.0.0.1:9000"),
            ("KILN_STATE_DIR", "/var/lib/kiln/jobs"),
            ("KILN_ARTIFACTS_DIR", "/var/lib/kiln/artifacts"),
            ("KILN_ALLOWED_ACCOUNTS", " 000000, 123456 ,,"),
            ("KILN_JWT_SECRET", "s3cret"),
        ])
        .unwrap();
        assert_eq!(cfg.listen_addr.port(), 9000);
        assert_eq!(cfg.store, StoreBackend::Filesystem("/var/lib/kiln/jobs".into()));
        assert_eq!(cfg.artifacts_dir, Some("/var/lib/kiln/artifacts".into()));
        assert_eq!(cfg.allowed_accounts, vec!["000000", "123456"]);
        assert_eq!(cfg.jwt_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let cfg = config(&[("KILN_STATE_DIR", "  "), ("KILN_JWT_SECRET", "")]).unwrap();
        assert_eq!(cfg.store, StoreBackend::Memory);
        assert!(cfg.jwt_secret.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            config(&[("KILN_LISTEN_ADDR", "not-an-addr")]),
            Err(ConfigError::Invalid { var: "KILN_LISTEN_ADDR", .. })
        ));
        assert!(matches!(
            config(&[("KILN_STORE", "redis")]),
            Err(ConfigError::Invalid { var: "KILN_STORE", .. })
        ));
    }
}
