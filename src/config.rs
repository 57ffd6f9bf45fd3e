use base64::{engine::general_purpose, Engine as _};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Clone)]
pub struct Config {
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub bind_addr: String,
    pub session_key: Vec<u8>,
    pub webhook_secret: Vec<u8>,
    pub openai_api_key: Option<String>,
    pub scoring_model: String,
    pub request_timeout: Duration,
    pub ingest_max_attempts: i32,
    pub storage_retry_attempts: u32,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("store", &self.store)
            .field("bind_addr", &self.bind_addr)
            .field("scoring_enabled", &self.openai_api_key.is_some())
            .field("scoring_model", &self.scoring_model)
            .field("request_timeout", &self.request_timeout)
            .field("ingest_max_attempts", &self.ingest_max_attempts)
            .field("storage_retry_attempts", &self.storage_retry_attempts)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. All missing required keys are
    /// reported in one error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let store = match get("STORE").as_deref() {
            None | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "STORE",
                    reason: format!("unknown backend {other}"),
                })
            }
        };

        let database_url = get("DATABASE_URL");
        let session_key = get("SESSION_KEY");
        let webhook_secret = get("WEBHOOK_SECRET");

        let mut missing = Vec::new();
        if store == StoreBackend::Postgres && database_url.is_none() {
            missing.push("DATABASE_URL");
        }
        if session_key.is_none() {
            missing.push("SESSION_KEY");
        }
        if webhook_secret.is_none() {
            missing.push("WEBHOOK_SECRET");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing.join(", ")));
        }

        let session_key = general_purpose::STANDARD
            .decode(session_key.unwrap_or_default())
            .map_err(|e| ConfigError::Invalid {
                key: "SESSION_KEY",
                reason: format!("must be base64: {e}"),
            })?;
        if session_key.len() < 32 {
            return Err(ConfigError::Invalid {
                key: "SESSION_KEY",
                reason: "must decode to at least 32 bytes".to_string(),
            });
        }

        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| {
            let port = get("PORT").unwrap_or_else(|| "3000".to_string());
            format!("0.0.0.0:{}", port)
        });

        Ok(Self {
            store,
            database_url,
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 10)?,
            bind_addr,
            session_key,
            webhook_secret: webhook_secret.unwrap_or_default().into_bytes(),
            openai_api_key: get("OPENAI_API_KEY"),
            scoring_model: get("SCORING_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            request_timeout: Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECS", 30)?),
            ingest_max_attempts: parse_or(&get, "INGEST_MAX_ATTEMPTS", 8)?,
            storage_retry_attempts: parse_or(&get, "STORAGE_RETRY_ATTEMPTS", 3)?,
        })
    }

    pub fn scoring_enabled(&self) -> bool {
        self.openai_api_key.is_some()
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        store: StoreBackend::Memory,
        database_url: None,
        db_max_connections: 1,
        bind_addr: "127.0.0.1:0".to_string(),
        session_key: vec![7u8; 32],
        webhook_secret: b"webhook-secret".to_vec(),
        openai_api_key: None,
        scoring_model: "gpt-4o-mini".to_string(),
        request_timeout: Duration::from_secs(30),
        ingest_max_attempts: 3,
        storage_retry_attempts: 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn key_b64() -> String {
        general_purpose::STANDARD.encode([1u8; 32])
    }

    #[test]
    fn test_reports_all_missing_keys() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing("DATABASE_URL, SESSION_KEY, WEBHOOK_SECRET".to_string())
        );
    }

    #[test]
    fn test_memory_store_needs_no_database() {
        let key = key_b64();
        let config = Config::from_lookup(lookup(&[
            ("STORE", "memory"),
            ("SESSION_KEY", &key),
            ("WEBHOOK_SECRET", "s3cret"),
        ]))
        .unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(!config.scoring_enabled());
    }

    #[test]
    fn test_defaults_and_overrides() {
        let key = key_b64();
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/interviews"),
            ("SESSION_KEY", &key),
            ("WEBHOOK_SECRET", "s3cret"),
            ("PORT", "8080"),
            ("OPENAI_API_KEY", "sk-test"),
            ("INGEST_MAX_ATTEMPTS", "4"),
        ]))
        .unwrap();
        assert_eq!(config.store, StoreBackend::Postgres);
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.ingest_max_attempts, 4);
        assert!(config.scoring_enabled());
    }

    #[test]
    fn test_rejects_short_session_key() {
        let short = general_purpose::STANDARD.encode([1u8; 8]);
        let err = Config::from_lookup(lookup(&[
            ("STORE", "memory"),
            ("SESSION_KEY", &short),
            ("WEBHOOK_SECRET", "s3cret"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "SESSION_KEY", .. }));
    }

    #[test]
    fn test_rejects_bad_number() {
        let key = key_b64();
        let err = Config::from_lookup(lookup(&[
            ("STORE", "memory"),
            ("SESSION_KEY", &key),
            ("WEBHOOK_SECRET", "s3cret"),
            ("REQUEST_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "REQUEST_TIMEOUT_SECS",
                ..
            }
        ));
    }
}
