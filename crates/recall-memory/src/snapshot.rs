use crate::vector::{DistanceMetric, Document, IndexSnapshot};
use async_trait::async_trait;
use recall_core::{Message, RecallError, RecallResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Serialized form of one session: its vector index plus message history.
///
/// ```json
/// {"dimensions": 3, "distanceMetric": "cosine",
///  "documents": [{"id": "..", "content": "..", "vector": [..], "metadata": {..}}],
///  "messages": [{"role": "user", "content": ".."}]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub dimensions: usize,
    pub distance_metric: DistanceMetric,
    pub documents: Vec<Document>,
    pub messages: Vec<Message>,
}

impl SessionSnapshot {
    pub fn new(index: IndexSnapshot, messages: Vec<Message>) -> Self {
        Self {
            dimensions: index.dimensions,
            distance_metric: index.distance_metric,
            documents: index.documents,
            messages,
        }
    }

    /// Split into the vector index part and the message history.
    pub fn into_parts(self) -> (IndexSnapshot, Vec<Message>) {
        let index = IndexSnapshot {
            dimensions: self.dimensions,
            distance_metric: self.distance_metric,
            documents: self.documents,
        };
        (index, self.messages)
    }

    pub fn to_json(&self) -> RecallResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a persisted payload. Any decoding failure is a
    /// [`RecallError::Corruption`].
    pub fn from_json(raw: &str) -> RecallResult<Self> {
        serde_json::from_str(raw).map_err(|e| RecallError::Corruption(e.to_string()))
    }
}

/// Key/value persistence adapter for session snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the payload stored under `key`, if any.
    async fn load(&self, key: &str) -> RecallResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous payload.
    async fn save(&self, key: &str, value: &str) -> RecallResult<()>;

    /// Delete the payload under `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> RecallResult<()>;
}

/// Snapshot store kept in process memory. Useful for tests and for hosts that
/// only need snapshots to outlive cache eviction.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    blobs: RwLock<HashMap<String, String>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(&self, key: &str) -> RecallResult<Option<String>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> RecallResult<()> {
        self.blobs
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> RecallResult<()> {
        self.blobs.write().await.remove(key);
        Ok(())
    }
}

/// File-based snapshot store: one JSON file per key in a directory.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub async fn new(dir: PathBuf) -> RecallResult<Self> {
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            RecallError::Persistence(format!("Failed to create {}: {e}", dir.display()))
        })?;
        Ok(Self { dir })
    }

    fn snapshot_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self, key: &str) -> RecallResult<Option<String>> {
        let path = self.snapshot_path(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RecallError::Persistence(format!(
                "Failed to read snapshot {}: {e}",
                path.display()
            ))),
        }
    }

    async fn save(&self, key: &str, value: &str) -> RecallResult<()> {
        let path = self.snapshot_path(key);
        // Write-then-rename so a crash never leaves a half-written snapshot.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value.as_bytes())
            .await
            .map_err(|e| RecallError::Persistence(format!("Failed to write snapshot: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| RecallError::Persistence(format!("Failed to write snapshot: {e}")))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> RecallResult<()> {
        match tokio::fs::remove_file(self.snapshot_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RecallError::Persistence(format!(
                "Failed to delete snapshot: {e}"
            ))),
        }
    }
}

/// Turn an arbitrary key into a file name; bytes outside `[A-Za-z0-9_-]` are
/// written as `%XX` so distinct keys never share a file.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
