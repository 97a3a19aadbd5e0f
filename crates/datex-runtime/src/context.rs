//! Identity and addressing state of one local endpoint.

use datex_compiler::{KeySet, KeyStore};
use datex_types::{Endpoint, EndpointRegistry, IdEndpoint};
use parking_lot::RwLock;
use tracing::info;

use crate::config::{ConfigStore, EndpointConfig, RuntimeConfig};
use crate::error::{RuntimeError, RuntimeResult};

/// Everything a [`crate::Runtime`] knows about itself: who it is, its
/// keys, the endpoints it can resolve, and its settings.
#[derive(Debug)]
pub struct RuntimeContext {
    endpoint: Endpoint,
    id: IdEndpoint,
    keys: KeyStore,
    registry: RwLock<EndpointRegistry>,
    config: RuntimeConfig,
}

impl RuntimeContext {
    /// A fresh endpoint with a generated id and no keys.
    pub fn new(endpoint: Endpoint, config: RuntimeConfig) -> RuntimeResult<Self> {
        let id = endpoint.id_endpoint().unwrap_or_else(IdEndpoint::generate);
        Self::with_id(endpoint, id, config)
    }

    /// `endpoint` bound to a known id.
    pub fn with_id(endpoint: Endpoint, id: IdEndpoint, config: RuntimeConfig) -> RuntimeResult<Self> {
        let mut registry = EndpointRegistry::new();
        if endpoint.alias().is_some() {
            registry.bind(&endpoint, id)?;
        }
        let mut endpoint = endpoint.main();
        endpoint.set_id_endpoint(id)?;
        registry.add_known(endpoint.clone());
        Ok(Self {
            endpoint,
            id,
            keys: KeyStore::new(),
            registry: RwLock::new(registry),
            config,
        })
    }

    /// Restore the endpoint saved in `store`, or create it (with fresh
    /// keys) and save it.
    pub fn load_or_create(
        store: &dyn ConfigStore,
        endpoint: Endpoint,
        config: RuntimeConfig,
    ) -> RuntimeResult<Self> {
        if let Some(saved) = store.load()? {
            if saved.endpoint.main() != endpoint.main() {
                return Err(RuntimeError::Config(format!(
                    "stored identity is {}, not {endpoint}",
                    saved.endpoint
                )));
            }
            let context = Self::with_id(saved.endpoint, saved.id_endpoint, config)?;
            if let Some(keys) = &saved.keys {
                context.keys.import_own(keys)?;
            }
            info!(endpoint = %context.endpoint, id = %context.id, "restored endpoint");
            return Ok(context);
        }
        let context = Self::new(endpoint, config)?;
        context.keys.set_own_keys(KeySet::generate());
        context.save(store)?;
        info!(endpoint = %context.endpoint, id = %context.id, "created endpoint");
        Ok(context)
    }

    pub fn save(&self, store: &dyn ConfigStore) -> RuntimeResult<()> {
        store.save(&EndpointConfig {
            endpoint: self.endpoint.clone(),
            id_endpoint: self.id,
            keys: self.keys.export_own(),
        })
    }

    /// The local endpoint, carrying its id.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn id(&self) -> IdEndpoint {
        self.id
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub fn registry(&self) -> &RwLock<EndpointRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Whether `endpoint` names this runtime (any instance).
    pub fn is_local(&self, endpoint: &Endpoint) -> bool {
        match endpoint.id_endpoint() {
            Some(id) => id == self.id,
            None => self.registry.read().lookup(endpoint) == Some(self.id),
        }
    }
}
