//! Store selection from the environment.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `USE_PERSISTENT_STORES` | `false` | `true` selects Postgres, anything else in-memory |
//! | `DATABASE_URL` | none | required when persistent |
//! | `DATABASE_MAX_CONNECTIONS` | `5` | pool size |

use std::sync::Arc;

use anyhow::Context;
use thiserror::Error;
use tracing::info;

use crate::store::{InMemoryStore, PostgresStore, Store};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")]
    MissingDatabaseUrl,

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    InMemory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: Backend,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::InMemory,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup (the process environment in
    /// [`StoreConfig::from_env`]).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let use_persistent = lookup("USE_PERSISTENT_STORES")
            .and_then(|v| v.trim().parse::<bool>().ok())
            .unwrap_or(false);
        if !use_persistent {
            return Ok(Self::default());
        }

        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingDatabaseUrl)?;

        let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            None => DEFAULT_MAX_CONNECTIONS,
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: "DATABASE_MAX_CONNECTIONS",
                    value: raw,
                })?,
        };

        Ok(Self {
            backend: Backend::Postgres {
                database_url,
                max_connections,
            },
        })
    }
}

/// Open the configured store.
pub fn build_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn Store>> {
    match &config.backend {
        Backend::InMemory => {
            info!("using in-memory store");
            Ok(Arc::new(InMemoryStore::new()))
        }
        Backend::Postgres {
            database_url,
            max_connections,
        } => {
            let store = PostgresStore::connect(database_url, *max_connections)
                .context("failed to connect postgres store")?;
            info!(max_connections, "using postgres store");
            Ok(Arc::new(store))
        }
    }
}
