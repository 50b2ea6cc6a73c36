//! Diagnostic artifact storage
//!
//! One snapshot file per worker per round, named deterministically, in a
//! fixed directory that is wiped at campaign start.

use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

/// Fixed output directory for per-session snapshots
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Clear leftovers from previous campaigns and recreate the directory
    pub fn prepare(&self) -> io::Result<()> {
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)?;
        }
        std::fs::create_dir_all(&self.dir)?;
        info!("Artifact directory ready: {}", self.dir.display());
        Ok(())
    }

    /// Deterministic snapshot path for one worker in one round
    pub fn path_for(&self, worker_id: usize, round: usize) -> PathBuf {
        self.dir.join(format!("worker{:02}-round{:02}.png", worker_id, round))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn scratch_store() -> ArtifactStore {
        ArtifactStore::new(std::env::temp_dir().join(format!("viewfarm-test-{}", Uuid::new_v4())))
    }

    #[test]
    fn path_is_deterministic() {
        let store = scratch_store();
        assert_eq!(store.path_for(3, 7), store.path_for(3, 7));
        assert_ne!(store.path_for(3, 7), store.path_for(3, 8));
        assert!(store
            .path_for(3, 7)
            .to_string_lossy()
            .ends_with("worker03-round07.png"));
    }

    #[test]
    fn prepare_clears_previous_campaign() {
        let store = scratch_store();
        store.prepare().unwrap();
        let stale = store.path_for(0, 0);
        std::fs::write(&stale, b"old").unwrap();

        store.prepare().unwrap();
        assert!(store.dir().exists());
        assert!(!stale.exists());

        let _ = std::fs::remove_dir_all(store.dir());
    }
}
