//! Synchronizable entities and their references.

mod id;
mod record;
mod reference;

pub use id::{EntityId, ProjectId};
pub(crate) use record::now_millis;
pub use record::SyncEntity;
pub use reference::{EntityKind, EntityRef};
