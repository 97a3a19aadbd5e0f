//! Runtime settings and persisted endpoint identity.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use datex_compiler::{ExportedKeys, DEFAULT_TTL};
use datex_types::{Endpoint, IdEndpoint};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RuntimeResult;

/// Default wait for a RESPONSE, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Behaviour of one runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Used when a scope sets no `timeout` of its own.
    pub default_timeout_ms: u64,
    pub ttl: u8,
    pub priority: u8,
    /// Sign outgoing REQUEST, RESPONSE and DATA blocks.
    pub sign: bool,
    /// Encrypt outgoing REQUEST, RESPONSE and DATA blocks.
    pub encrypt: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            ttl: DEFAULT_TTL,
            priority: 0,
            sign: false,
            encrypt: false,
        }
    }
}

impl RuntimeConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// What survives a restart: who we are and our keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub endpoint: Endpoint,
    pub id_endpoint: IdEndpoint,
    pub keys: Option<ExportedKeys>,
}

/// Opaque persistence for [`EndpointConfig`].
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> RuntimeResult<Option<EndpointConfig>>;
    fn save(&self, config: &EndpointConfig) -> RuntimeResult<()>;
}

/// Endpoint config in a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&self) -> RuntimeResult<Option<EndpointConfig>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)?;
        let config = serde_json::from_str(&text)?;
        debug!(path = %self.path.display(), "loaded endpoint config");
        Ok(Some(config))
    }

    fn save(&self, config: &EndpointConfig) -> RuntimeResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(config)?)?;
        debug!(path = %self.path.display(), "saved endpoint config");
        Ok(())
    }
}

/// In-process store, for tests and ephemeral endpoints.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    slot: Mutex<Option<EndpointConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> RuntimeResult<Option<EndpointConfig>> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, config: &EndpointConfig) -> RuntimeResult<()> {
        *self.slot.lock() = Some(config.clone());
        Ok(())
    }
}
