//! Inspect command implementation.

use conductor_core::{EntityKind, FileStateStore, StateStore, SyncEntity, SyncState};
use serde::Serialize;
use std::path::Path;

/// Entity counts per state.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct StateCounts {
    /// State name.
    pub state: &'static str,
    /// Service settings in the state.
    pub settings: usize,
    /// Project links in the state.
    pub links: usize,
}

/// Inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Counts per state, in lifecycle order.
    pub states: Vec<StateCounts>,
    /// Entity records (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<SyncEntity>>,
}

/// Returns every entity held by `store`, settings first.
pub fn all_entities(store: &dyn StateStore) -> conductor_core::CoreResult<Vec<SyncEntity>> {
    let mut entities = Vec::new();
    for kind in [EntityKind::ServiceSettings, EntityKind::ServiceProjectLink] {
        for state in SyncState::ALL {
            entities.extend(store.find_by_state(kind, state)?);
        }
    }
    Ok(entities)
}

/// Counts `entities` per state.
pub fn count_states(entities: &[SyncEntity]) -> Vec<StateCounts> {
    SyncState::ALL
        .iter()
        .map(|&state| {
            let mut counts = StateCounts {
                state: state.as_str(),
                ..StateCounts::default()
            };
            for entity in entities.iter().filter(|e| e.state == state) {
                match entity.kind {
                    EntityKind::ServiceSettings => counts.settings += 1,
                    EntityKind::ServiceProjectLink => counts.links += 1,
                }
            }
            counts
        })
        .collect()
}

/// Prints entities as text, one per line.
pub fn print_entities(entities: &[SyncEntity]) {
    for entity in entities {
        if entity.has_error() {
            println!(
                "  {:<20} {:<24} {}  ({})",
                entity.state.as_str(),
                entity.name,
                entity.token(),
                entity.error_message
            );
        } else {
            println!(
                "  {:<20} {:<24} {}",
                entity.state.as_str(),
                entity.name,
                entity.token()
            );
        }
    }
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    show_entities: bool,
    state: Option<SyncState>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No state store found at {:?}", path).into());
    }
    let store = FileStateStore::open(path)?;
    let mut entities = all_entities(&store)?;
    if let Some(state) = state {
        entities.retain(|entity| entity.state == state);
    }

    let result = InspectResult {
        path: path.display().to_string(),
        states: count_states(&entities),
        entities: show_entities.then(|| entities.clone()),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => {
            println!("State store: {}", result.path);
            println!("  {:<20} {:>9} {:>9}", "STATE", "SETTINGS", "LINKS");
            for counts in &result.states {
                println!(
                    "  {:<20} {:>9} {:>9}",
                    counts.state, counts.settings, counts.links
                );
            }
            if show_entities {
                println!();
                print_entities(&entities);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::MemoryStateStore;

    #[test]
    fn counts_by_kind_and_state() {
        let settings = SyncEntity::settings("cloud", "OpenStack").with_state(SyncState::InSync);
        let link = SyncEntity::link("alpha", &settings, conductor_core::EntityId::new())
            .with_state(SyncState::Erred);
        let store = MemoryStateStore::with_entities([settings, link]).unwrap();

        let entities = all_entities(&store).unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].kind, EntityKind::ServiceSettings);

        let counts = count_states(&entities);
        let in_sync = counts.iter().find(|c| c.state == "IN_SYNC").unwrap();
        assert_eq!((in_sync.settings, in_sync.links), (1, 0));
        let erred = counts.iter().find(|c| c.state == "ERRED").unwrap();
        assert_eq!((erred.settings, erred.links), (0, 1));
    }

    #[test]
    fn missing_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&dir.path().join("absent"), false, None, "text").unwrap_err();
        assert!(err.to_string().contains("No state store"));
    }
}
