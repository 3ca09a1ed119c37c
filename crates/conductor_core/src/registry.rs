//! Backend registry.
//!
//! Maps a service type (e.g. `OpenStack`, `Zabbix`) to the provider that
//! builds adapters for it. The registry is populated once through
//! [`BackendRegistryBuilder`] during startup and is read-only afterwards.

use crate::backend::{BackendError, BackendResult, ServiceBackend};
use crate::entity::SyncEntity;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds backend adapters for entities of one service type.
pub trait BackendProvider: Send + Sync {
    /// Returns an adapter for `entity` (a settings entry or a link).
    fn backend_for(&self, entity: &SyncEntity) -> BackendResult<Arc<dyn ServiceBackend>>;
}

impl<F> BackendProvider for F
where
    F: Fn(&SyncEntity) -> BackendResult<Arc<dyn ServiceBackend>> + Send + Sync,
{
    fn backend_for(&self, entity: &SyncEntity) -> BackendResult<Arc<dyn ServiceBackend>> {
        self(entity)
    }
}

/// Read-only mapping from service type to backend provider.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    providers: Arc<HashMap<String, Arc<dyn BackendProvider>>>,
}

impl BackendRegistry {
    /// Starts building a registry.
    pub fn builder() -> BackendRegistryBuilder {
        BackendRegistryBuilder::default()
    }

    /// Returns the adapter for `entity`, looked up by its service type.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedServiceType` if nothing is registered for the
    /// entity's service type, or whatever the provider reports.
    pub fn backend_for(&self, entity: &SyncEntity) -> BackendResult<Arc<dyn ServiceBackend>> {
        self.providers
            .get(&entity.service_type)
            .ok_or_else(|| BackendError::UnsupportedServiceType(entity.service_type.clone()))?
            .backend_for(entity)
    }

    /// Returns true if a provider is registered for `service_type`.
    pub fn supports(&self, service_type: &str) -> bool {
        self.providers.contains_key(service_type)
    }

    /// Registered service types, sorted.
    pub fn service_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("service_types", &self.service_types())
            .finish()
    }
}

/// Builder for [`BackendRegistry`].
#[derive(Default)]
pub struct BackendRegistryBuilder {
    providers: HashMap<String, Arc<dyn BackendProvider>>,
}

impl BackendRegistryBuilder {
    /// Registers `provider` for `service_type`, replacing any earlier entry.
    #[must_use]
    pub fn register(
        mut self,
        service_type: impl Into<String>,
        provider: impl BackendProvider + 'static,
    ) -> Self {
        self.providers.insert(service_type.into(), Arc::new(provider));
        self
    }

    /// Registers one shared adapter for every entity of `service_type`.
    #[must_use]
    pub fn register_shared(
        self,
        service_type: impl Into<String>,
        backend: Arc<dyn ServiceBackend>,
    ) -> Self {
        self.register(
            service_type,
            move |_: &SyncEntity| -> BackendResult<Arc<dyn ServiceBackend>> {
                Ok(Arc::clone(&backend))
            },
        )
    }

    /// Freezes the registry.
    pub fn build(self) -> BackendRegistry {
        BackendRegistry {
            providers: Arc::new(self.providers),
        }
    }
}
