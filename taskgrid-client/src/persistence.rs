//! Persistence for lightweight client state between runs.

use serde::{Deserialize, Serialize};
use std::path::Path;
use taskgrid_core::ProjectId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Project to reopen on the next start.
    pub last_project_id: Option<ProjectId>,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub fn load(path: &Path) -> Result<Option<PersistedState>, PersistenceError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    let state = serde_json::from_str::<PersistedState>(&contents)?;
    Ok(Some(state))
}

pub fn save(path: &Path, state: &PersistedState) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(state)?;
    std::fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskgrid_core::EntityIdType;

    #[test]
    fn test_missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("state.json")).unwrap().is_none());
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let state = PersistedState {
            last_project_id: Some(ProjectId::now_v7()),
        };
        save(&path, &state).unwrap();
        assert_eq!(load(&path).unwrap(), Some(state));
    }

    #[test]
    fn test_corrupt_file_is_serde_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load(&path), Err(PersistenceError::Serde(_))));
    }
}
