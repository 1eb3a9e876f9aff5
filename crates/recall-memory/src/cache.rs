use crate::bm25::{Bm25Index, DEFAULT_FIELD};
use crate::config::{MemoryConfig, SearchMode};
use crate::fusion::{self, FusedResult, FusionStrategy};
use crate::snapshot::{SessionSnapshot, SnapshotStore};
use crate::vector::{DistanceMetric, Document, VectorIndex};
use recall_core::{Message, RecallError, RecallResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Idle time after which a session is dropped from the cache.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// Prefix of every storage key written to a [`SnapshotStore`].
const STORAGE_PREFIX: &str = "retrieval-memory";

/// Compound session identifier: an owner scope plus a session id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub scope: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(scope: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            session_id: session_id.into(),
        }
    }

    /// Key under which this session's snapshot is persisted.
    ///
    /// `%` and `:` inside either part are escaped, so distinct keys never
    /// share a snapshot.
    pub fn storage_key(&self) -> String {
        format!(
            "{STORAGE_PREFIX}:{}:{}",
            escape_key_part(&self.scope),
            escape_key_part(&self.session_id)
        )
    }
}

fn escape_key_part(part: &str) -> String {
    part.replace('%', "%25").replace(':', "%3A")
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.session_id)
    }
}

/// Parameters of a single search over one session.
#[derive(Debug, Clone, Copy)]
pub struct SessionQuery<'a> {
    pub mode: SearchMode,
    /// Embedded query; required by vector and hybrid modes.
    pub vector: Option<&'a [f32]>,
    /// Raw query text; required by keyword and hybrid modes.
    pub text: Option<&'a str>,
    pub top_k: usize,
    /// Minimum score of a returned hit, in the native scale of `mode`.
    pub min_score: f32,
    pub fusion: FusionStrategy,
}

/// Everything the cache keeps for one session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    vector_index: VectorIndex,
    keyword_index: Bm25Index,
    messages: Vec<Message>,
    last_access: Instant,
}

impl SessionEntry {
    fn new(dimensions: usize, metric: DistanceMetric, keyword_fields: &[String]) -> Self {
        Self {
            vector_index: VectorIndex::new(dimensions, metric),
            keyword_index: Bm25Index::with_fields(keyword_fields.iter().cloned()),
            messages: Vec::new(),
            last_access: Instant::now(),
        }
    }

    pub fn vector_index(&self) -> &VectorIndex {
        &self.vector_index
    }

    pub fn keyword_index(&self) -> &Bm25Index {
        &self.keyword_index
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    /// Index a document in both the vector and keyword index.
    ///
    /// The vector index validates first, so a rejected document touches neither.
    pub fn insert_document(&mut self, doc: Document) -> RecallResult<()> {
        let id = doc.id.clone();
        self.vector_index.add(doc)?;
        if let Some(doc) = self.vector_index.get(&id) {
            index_keywords(&mut self.keyword_index, doc);
        }
        Ok(())
    }

    /// Remove a document from both indexes. Returns whether it was present.
    pub fn remove_document(&mut self, id: &str) -> bool {
        let in_keywords = self.keyword_index.remove_document(id);
        self.vector_index.remove(id) || in_keywords
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Export the session for persistence.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::new(self.vector_index.export(), self.messages.clone())
    }

    /// Run `query` against this session's indexes.
    ///
    /// Every hit carries the metadata of its stored document. The score of a
    /// hit is the similarity (vector), the raw BM25 score (keyword) or the
    /// fused score (hybrid); `min_score` is compared against that number.
    pub fn search(&self, query: &SessionQuery<'_>) -> RecallResult<Vec<FusedResult>> {
        let mut hits: Vec<FusedResult> = match query.mode {
            SearchMode::Vector => {
                let vector = require(query.vector, "vector search needs a query vector")?;
                self.vector_index
                    .search(vector, query.top_k, query.min_score)?
                    .into_iter()
                    .map(|r| FusedResult {
                        id: r.document.id,
                        score: r.similarity,
                        vector_similarity: Some(r.similarity),
                        keyword_score: None,
                        metadata: HashMap::new(),
                    })
                    .collect()
            }
            SearchMode::Keyword => {
                let text = require(query.text, "keyword search needs query text")?;
                self.keyword_index
                    .search(text, query.top_k)
                    .into_iter()
                    .filter(|(_, score)| *score >= query.min_score)
                    .map(|(id, score)| FusedResult {
                        id,
                        score,
                        vector_similarity: None,
                        keyword_score: Some(score),
                        metadata: HashMap::new(),
                    })
                    .collect()
            }
            SearchMode::Hybrid => {
                let vector = require(query.vector, "hybrid search needs a query vector")?;
                let text = require(query.text, "hybrid search needs query text")?;
                let fetch = fusion::overfetch(query.top_k);

                let vector_hits: Vec<(String, f32)> = self
                    .vector_index
                    .search(vector, fetch, 0.0)?
                    .into_iter()
                    .map(|r| (r.document.id, r.similarity))
                    .collect();
                let keyword_hits = self.keyword_index.search(text, fetch);

                let mut fused = fusion::merge(&vector_hits, &keyword_hits, query.top_k, query.fusion);
                fused.retain(|r| r.score >= query.min_score);
                fused
            }
        };

        for hit in &mut hits {
            if let Some(doc) = self.vector_index.get(&hit.id) {
                hit.metadata = doc.metadata.clone();
            }
        }
        debug!(mode = ?query.mode, hits = hits.len(), "Session search completed");
        Ok(hits)
    }
}

fn require<T>(value: Option<T>, message: &str) -> RecallResult<T> {
    value.ok_or_else(|| RecallError::Validation(message.to_string()))
}

/// Feed the configured text fields of `doc` into the keyword index. The
/// `content` field is the document text; any other field is read from a
/// string-valued metadata entry of the same name.
fn index_keywords(keyword_index: &mut Bm25Index, doc: &Document) {
    let names = keyword_index.fields().to_vec();
    let fields: Vec<(&str, &str)> = names
        .iter()
        .filter_map(|field| {
            if field == DEFAULT_FIELD {
                Some((field.as_str(), doc.content.as_str()))
            } else {
                doc.metadata
                    .get(field)
                    .and_then(serde_json::Value::as_str)
                    .map(|text| (field.as_str(), text))
            }
        })
        .collect();
    keyword_index.add_document(&doc.id, &fields);
}

/// Registry of per-session indexes with lazy idle eviction and optional
/// snapshot persistence.
///
/// The cache owns its entries outright; hosts share one cache between facades
/// by wrapping it in `Arc<tokio::sync::Mutex<_>>`. Expired sessions are only
/// dropped when the cache is accessed, never from a background task.
pub struct SessionCache {
    entries: HashMap<SessionKey, SessionEntry>,
    ttl: Duration,
    dimensions: usize,
    metric: DistanceMetric,
    keyword_fields: Vec<String>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl SessionCache {
    /// Create an in-memory cache for indexes of the given shape.
    pub fn new(dimensions: usize, metric: DistanceMetric) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: DEFAULT_SESSION_TTL,
            dimensions,
            metric,
            keyword_fields: vec![DEFAULT_FIELD.to_string()],
            store: None,
        }
    }

    /// Create a cache from a memory configuration. `store` is only attached
    /// when the configuration enables persistence.
    pub fn from_config(config: &MemoryConfig, store: Option<Arc<dyn SnapshotStore>>) -> Self {
        let cache = Self::new(config.dimensions, config.distance_metric)
            .with_ttl(config.session_ttl())
            .with_keyword_fields(config.keyword_fields.clone());
        match store {
            Some(store) if config.persist => cache.with_store(store),
            _ => cache,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_keyword_fields(mut self, fields: Vec<String>) -> Self {
        self.keyword_fields = fields;
        self
    }

    /// Enable persistence through `store`.
    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn keyword_fields(&self) -> &[String] {
        &self.keyword_fields
    }

    /// Check that this cache builds indexes of the shape `config` describes.
    ///
    /// Dimensions, metric and keyword fields must match, and a config that
    /// asks for persistence needs a cache with a store. The TTL is a property
    /// of the shared cache and is not compared.
    pub fn check_compatible(&self, config: &MemoryConfig) -> RecallResult<()> {
        if self.dimensions != config.dimensions || self.metric != config.distance_metric {
            return Err(RecallError::Validation(format!(
                "cache holds {}-d {} indexes, memory is configured for {}-d {}",
                self.dimensions, self.metric, config.dimensions, config.distance_metric
            )));
        }
        if self.keyword_fields != config.keyword_fields {
            return Err(RecallError::Validation(format!(
                "cache indexes keyword fields {:?}, memory is configured for {:?}",
                self.keyword_fields, config.keyword_fields
            )));
        }
        if config.persist && self.store.is_none() {
            return Err(RecallError::Validation(
                "persistence is enabled but the cache has no snapshot store".into(),
            ));
        }
        Ok(())
    }

    pub fn persistence_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Number of live (not yet evicted) sessions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` is currently cached. Does not trigger eviction.
    pub fn contains(&self, key: &SessionKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Fetch the entry for `key`, restoring or creating it if needed.
    ///
    /// Expired sessions are evicted first. A missing session is restored from
    /// the snapshot store when persistence is enabled; an unreadable or
    /// incompatible snapshot is discarded and a fresh session created instead.
    pub async fn get(&mut self, key: &SessionKey) -> RecallResult<&mut SessionEntry> {
        self.evict_expired();

        if !self.entries.contains_key(key) {
            let entry = match self.restore(key).await? {
                Some(entry) => entry,
                None => {
                    info!(session = %key, "Created session");
                    SessionEntry::new(self.dimensions, self.metric, &self.keyword_fields)
                }
            };
            self.entries.insert(key.clone(), entry);
        }

        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| SessionEntry::new(self.dimensions, self.metric, &self.keyword_fields));
        entry.last_access = Instant::now();
        Ok(entry)
    }

    /// Evict `key` immediately and delete its persisted snapshot.
    /// Returns whether the session was cached.
    pub async fn remove(&mut self, key: &SessionKey) -> RecallResult<bool> {
        let was_cached = self.entries.remove(key).is_some();
        if let Some(store) = &self.store {
            store.delete(&key.storage_key()).await?;
        }
        info!(session = %key, was_cached, "Removed session");
        Ok(was_cached)
    }

    /// Write the current state of `key` to the snapshot store.
    ///
    /// No-op when persistence is disabled or the session is not cached.
    pub async fn persist(&self, key: &SessionKey) -> RecallResult<()> {
        let (Some(store), Some(entry)) = (&self.store, self.entries.get(key)) else {
            return Ok(());
        };
        let payload = entry.snapshot().to_json()?;
        store.save(&key.storage_key(), &payload).await?;
        debug!(session = %key, bytes = payload.len(), "Persisted session snapshot");
        Ok(())
    }

    /// Drop every session idle for longer than the TTL. Returns how many were
    /// evicted. Persisted snapshots are kept.
    pub fn evict_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<SessionKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_access) > self.ttl)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.entries.remove(key);
        }
        if !expired.is_empty() {
            info!(evicted = expired.len(), remaining = self.entries.len(), "Evicted idle sessions");
        }
        expired.len()
    }

    async fn restore(&self, key: &SessionKey) -> RecallResult<Option<SessionEntry>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let Some(raw) = store.load(&key.storage_key()).await? else {
            return Ok(None);
        };

        match self.entry_from_snapshot(&raw) {
            Ok(entry) => {
                info!(
                    session = %key,
                    documents = entry.vector_index.len(),
                    messages = entry.messages.len(),
                    "Restored session from snapshot"
                );
                Ok(Some(entry))
            }
            Err(e) => {
                warn!(session = %key, error = %e, "Discarding unreadable session snapshot");
                Ok(None)
            }
        }
    }

    fn entry_from_snapshot(&self, raw: &str) -> RecallResult<SessionEntry> {
        let snapshot = SessionSnapshot::from_json(raw)?;
        if snapshot.dimensions != self.dimensions || snapshot.distance_metric != self.metric {
            return Err(RecallError::Corruption(format!(
                "snapshot is {}-d {}, cache expects {}-d {}",
                snapshot.dimensions, snapshot.distance_metric, self.dimensions, self.metric
            )));
        }

        let (index, messages) = snapshot.into_parts();
        let vector_index =
            VectorIndex::from_snapshot(index).map_err(|e| RecallError::Corruption(e.to_string()))?;

        let mut keyword_index = Bm25Index::with_fields(self.keyword_fields.iter().cloned());
        for doc in vector_index.documents() {
            index_keywords(&mut keyword_index, doc);
        }

        Ok(SessionEntry {
            vector_index,
            keyword_index,
            messages,
            last_access: Instant::now(),
        })
    }
}

impl fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCache")
            .field("sessions", &self.entries.len())
            .field("ttl", &self.ttl)
            .field("dimensions", &self.dimensions)
            .field("metric", &self.metric)
            .field("persistence", &self.store.is_some())
            .finish()
    }
}
