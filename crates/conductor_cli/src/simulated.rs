//! Simulated backend adapters.
//!
//! The runner has no real provider clients; each service type gets an
//! adapter whose behaviour comes from the fixture and which logs every call.

use conductor_core::{
    BackendError, BackendRegistry, BackendResult, ServiceBackend, SshPublicKey, SyncEntity, User,
};
use serde::Deserialize;
use std::sync::Arc;

fn default_true() -> bool {
    true
}

/// Behaviour of the simulated adapter for one service type.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSpec {
    /// Service type the entry applies to.
    pub service_type: String,
    /// What `ping` answers.
    #[serde(default = "default_true")]
    pub alive: bool,
    /// When set, `sync` fails with this message (`"timeout"` maps to a timeout).
    #[serde(default)]
    pub sync_error: Option<String>,
    /// When false, credential operations report `NotImplemented`.
    #[serde(default = "default_true")]
    pub credentials: bool,
}

impl BackendSpec {
    /// A healthy backend for `service_type`.
    pub fn healthy(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            alive: true,
            sync_error: None,
            credentials: true,
        }
    }
}

/// An adapter bound to one entity.
#[derive(Debug)]
pub struct SimulatedBackend {
    spec: BackendSpec,
    target: String,
}

impl SimulatedBackend {
    fn credential_call(&self, operation: &str, subject: &str, link: &SyncEntity) -> BackendResult<()> {
        if !self.spec.credentials {
            return Err(BackendError::NotImplemented);
        }
        tracing::info!(
            service_type = %self.spec.service_type,
            link = %link.token(),
            subject,
            "{operation}"
        );
        Ok(())
    }
}

impl ServiceBackend for SimulatedBackend {
    fn ping(&self) -> BackendResult<bool> {
        tracing::debug!(target_entity = %self.target, alive = self.spec.alive, "ping");
        Ok(self.spec.alive)
    }

    fn sync(&self) -> BackendResult<()> {
        match self.spec.sync_error.as_deref() {
            None => {
                tracing::info!(target_entity = %self.target, "sync");
                Ok(())
            }
            Some("timeout") => Err(BackendError::Timeout),
            Some(message) => Err(BackendError::request(message)),
        }
    }

    fn create_session(&self, link: &SyncEntity) -> BackendResult<()> {
        if self.spec.alive {
            tracing::debug!(link = %link.token(), "session created");
            Ok(())
        } else {
            Err(BackendError::request("backend unreachable"))
        }
    }

    fn add_user(&self, user: &User, link: &SyncEntity) -> BackendResult<()> {
        self.credential_call("add_user", &user.username, link)
    }

    fn remove_user(&self, user: &User, link: &SyncEntity) -> BackendResult<()> {
        self.credential_call("remove_user", &user.username, link)
    }

    fn add_ssh_key(&self, key: &SshPublicKey, link: &SyncEntity) -> BackendResult<()> {
        self.credential_call("add_ssh_key", &key.name, link)
    }

    fn remove_ssh_key(&self, key: &SshPublicKey, link: &SyncEntity) -> BackendResult<()> {
        self.credential_call("remove_ssh_key", &key.name, link)
    }
}

/// Builds a registry covering `service_types`, using the matching entry of
/// `specs` or a healthy adapter when there is none.
pub fn registry(service_types: &[String], specs: &[BackendSpec]) -> BackendRegistry {
    let mut builder = BackendRegistry::builder();
    for service_type in service_types {
        let spec = specs
            .iter()
            .find(|spec| &spec.service_type == service_type)
            .cloned()
            .unwrap_or_else(|| BackendSpec::healthy(service_type.clone()));
        builder = builder.register(
            service_type.clone(),
            move |entity: &SyncEntity| -> BackendResult<Arc<dyn ServiceBackend>> {
                Ok(Arc::new(SimulatedBackend {
                    spec: spec.clone(),
                    target: entity.token(),
                }))
            },
        );
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlisted_types_are_healthy() {
        let registry = registry(
            &["OpenStack".to_string(), "Zabbix".to_string()],
            &[BackendSpec {
                sync_error: Some("timeout".into()),
                ..BackendSpec::healthy("OpenStack")
            }],
        );

        let openstack = registry
            .backend_for(&SyncEntity::settings("cloud", "OpenStack"))
            .unwrap();
        assert_eq!(openstack.sync(), Err(BackendError::Timeout));

        let zabbix = registry
            .backend_for(&SyncEntity::settings("monitor", "Zabbix"))
            .unwrap();
        assert_eq!(zabbix.sync(), Ok(()));
        assert_eq!(zabbix.ping(), Ok(true));
    }

    #[test]
    fn credential_calls_can_be_disabled() {
        let backend = SimulatedBackend {
            spec: BackendSpec {
                credentials: false,
                ..BackendSpec::healthy("OpenStack")
            },
            target: "service_settings:x".into(),
        };
        let settings = SyncEntity::settings("cloud", "OpenStack");
        let user = User {
            id: conductor_core::EntityId::new(),
            username: "alice".into(),
            full_name: String::new(),
        };
        assert!(backend
            .add_user(&user, &settings)
            .unwrap_err()
            .is_not_implemented());
    }

    #[test]
    fn request_errors_carry_message() {
        let backend = SimulatedBackend {
            spec: BackendSpec {
                sync_error: Some("invalid credentials".into()),
                ..BackendSpec::healthy("OpenStack")
            },
            target: "service_settings:x".into(),
        };
        assert_eq!(backend.sync().unwrap_err().to_string(), "invalid credentials");
    }
}
