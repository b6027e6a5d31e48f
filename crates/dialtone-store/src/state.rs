use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::snapshot::Snapshot;

/// Storage for the snapshots carried between runs of a plan.
#[async_trait]
pub trait StateStore: Send + Sync {
  /// Load the latest snapshot of a plan, if any.
  async fn load(&self, plan: &str) -> Result<Option<Snapshot>, StoreError>;

  /// Replace the snapshot of `snapshot.plan`.
  async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

  /// Forget a plan entirely. Removing an unknown plan is not an error.
  async fn remove(&self, plan: &str) -> Result<(), StoreError>;
}

/// In-process state, lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
  snapshots: RwLock<HashMap<String, Snapshot>>,
}

impl MemoryStateStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl StateStore for MemoryStateStore {
  async fn load(&self, plan: &str) -> Result<Option<Snapshot>, StoreError> {
    Ok(self.snapshots.read().await.get(plan).cloned())
  }

  async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
    self
      .snapshots
      .write()
      .await
      .insert(snapshot.plan.clone(), snapshot.clone());
    Ok(())
  }

  async fn remove(&self, plan: &str) -> Result<(), StoreError> {
    self.snapshots.write().await.remove(plan);
    Ok(())
  }
}

/// One pretty-printed JSON file per plan under a state directory.
///
/// ```text
/// <dir>/
///   contact-center.json
///   web-app.json
/// ```
#[derive(Debug, Clone)]
pub struct FsStateStore {
  dir: PathBuf,
}

impl FsStateStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// File holding a plan's snapshot. Characters outside `[A-Za-z0-9_.-]` in
  /// the plan name are replaced with `_`.
  pub fn path_for(&self, plan: &str) -> PathBuf {
    let file: String = plan
      .chars()
      .map(|c| {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
          c
        } else {
          '_'
        }
      })
      .collect();
    self.dir.join(format!("{}.json", file))
  }
}

#[async_trait]
impl StateStore for FsStateStore {
  async fn load(&self, plan: &str) -> Result<Option<Snapshot>, StoreError> {
    let path = self.path_for(plan);
    let content = match tokio::fs::read_to_string(&path).await {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        debug!(plan = %plan, path = %path.display(), "no saved state");
        return Ok(None);
      }
      Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&content)?))
  }

  async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
    tokio::fs::create_dir_all(&self.dir).await?;

    let path = self.path_for(&snapshot.plan);
    let tmp = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(snapshot)?;

    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, &path).await?;

    info!(
      plan = %snapshot.plan,
      path = %path.display(),
      operations = snapshot.responses.len(),
      "state saved"
    );
    Ok(())
  }

  async fn remove(&self, plan: &str) -> Result<(), StoreError> {
    let path = self.path_for(plan);
    match tokio::fs::remove_file(&path).await {
      Ok(()) => {
        info!(plan = %plan, path = %path.display(), "state removed");
        Ok(())
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }
}
