use crate::cache::{SessionCache, SessionKey, SessionQuery};
use crate::config::MemoryConfig;
use crate::embedding::Embedder;
use crate::vector::Document;
use chrono::Utc;
use recall_core::{Message, RecallError, RecallResult, Role};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Header line of the synthetic context message.
const CONTEXT_HEADER: &str = "Relevant context from earlier in this conversation:";

/// One retrieved piece of earlier conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelevantHit {
    pub id: String,
    pub content: String,
    /// Author of the indexed message; `None` for reference documents.
    pub role: Option<Role>,
    /// Score in the native scale of the search mode.
    pub similarity: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_similarity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_score: Option<f32>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Result of [`RetrievalMemory::get_context`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalContext {
    /// Full message history of the session, oldest first.
    pub messages: Vec<Message>,
    /// Ranked hits for the query, best first.
    pub relevant_history: Vec<RelevantHit>,
}

/// Size of a session's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub message_count: usize,
    pub document_count: usize,
    pub dimensions: usize,
}

/// Session-scoped retrieval memory handed to an agent.
///
/// Each instance is bound to one [`SessionKey`] and talks to a shared
/// [`SessionCache`]. Embedding happens before the cache lock is taken, and the
/// index update, history append and snapshot write for one message happen
/// under a single lock acquisition.
pub struct RetrievalMemory {
    cache: Arc<Mutex<SessionCache>>,
    key: SessionKey,
    embedder: Embedder,
    config: MemoryConfig,
}

impl RetrievalMemory {
    /// Bind a memory to `key` in a shared cache.
    ///
    /// Fails with [`RecallError::Validation`] if the configuration is invalid,
    /// if the embedder reports a dimension different from the configured one,
    /// or if the cache builds indexes of a different shape than `config`
    /// describes (see [`SessionCache::check_compatible`]).
    pub async fn new(
        cache: Arc<Mutex<SessionCache>>,
        key: SessionKey,
        embedder: Embedder,
        config: MemoryConfig,
    ) -> RecallResult<Self> {
        check_embedder(&embedder, &config)?;
        cache.lock().await.check_compatible(&config)?;
        Ok(Self {
            cache,
            key,
            embedder,
            config,
        })
    }

    /// Memory with its own private, non-persistent cache.
    pub fn isolated(key: SessionKey, embedder: Embedder, config: MemoryConfig) -> RecallResult<Self> {
        let config = config.with_persistence(false);
        check_embedder(&embedder, &config)?;
        let cache = SessionCache::from_config(&config, None);
        Ok(Self {
            cache: Arc::new(Mutex::new(cache)),
            key,
            embedder,
            config,
        })
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Record a message and index it for retrieval.
    ///
    /// System messages and blank content are ignored (`Ok(None)`). Otherwise
    /// returns the id of the indexed document.
    pub async fn add_message(&self, message: Message) -> RecallResult<Option<String>> {
        if message.role == Role::System || message.is_blank() {
            debug!(session = %self.key, role = %message.role, "Skipping message for retrieval");
            return Ok(None);
        }

        let vector = self.embedder.embed(&message.content).await?;

        let mut doc = Document::new(Uuid::new_v4().to_string(), message.content.clone(), vector)
            .with_metadata("role", serde_json::json!(message.role.as_str()))
            .with_metadata("timestamp", serde_json::json!(Utc::now().to_rfc3339()));
        if let Some(call_id) = &message.tool_call_id {
            doc = doc.with_metadata("toolCallId", serde_json::json!(call_id));
        }
        let id = doc.id.clone();

        let mut cache = self.cache.lock().await;
        let entry = cache.get(&self.key).await?;
        entry.insert_document(doc)?;
        entry.push_message(message);
        cache.persist(&self.key).await?;

        debug!(session = %self.key, document = %id, "Indexed message");
        Ok(Some(id))
    }

    /// Index reference text that is not part of the message history.
    ///
    /// Blank content is ignored (`Ok(None)`).
    pub async fn add_document(
        &self,
        content: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> RecallResult<Option<String>> {
        if content.trim().is_empty() {
            return Ok(None);
        }

        let vector = self.embedder.embed(content).await?;
        let mut doc = Document::new(Uuid::new_v4().to_string(), content, vector);
        doc.metadata = metadata;
        doc.metadata
            .entry("timestamp".to_string())
            .or_insert_with(|| serde_json::json!(Utc::now().to_rfc3339()));
        let id = doc.id.clone();

        let mut cache = self.cache.lock().await;
        cache.get(&self.key).await?.insert_document(doc)?;
        cache.persist(&self.key).await?;

        debug!(session = %self.key, document = %id, "Indexed document");
        Ok(Some(id))
    }

    /// Retrieve the session history plus the hits most relevant to `query`.
    ///
    /// `top_k` defaults to the configured value. An empty session returns no
    /// hits without embedding the query. In vector and hybrid mode a blank
    /// query is rejected; in keyword mode it simply matches nothing.
    pub async fn get_context(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> RecallResult<RetrievalContext> {
        let top_k = top_k.unwrap_or(self.config.top_k);
        let mode = self.config.search_mode;

        {
            let mut cache = self.cache.lock().await;
            let entry = cache.get(&self.key).await?;
            if entry.vector_index().is_empty() {
                return Ok(RetrievalContext {
                    messages: entry.messages().to_vec(),
                    relevant_history: Vec::new(),
                });
            }
        }

        let vector = if mode.needs_embedding() {
            if query.trim().is_empty() {
                return Err(RecallError::Validation(format!(
                    "{mode:?} search needs a non-empty query"
                )));
            }
            Some(self.embedder.embed(query).await?)
        } else {
            None
        };

        let mut cache = self.cache.lock().await;
        let entry = cache.get(&self.key).await?;
        let hits = entry.search(&SessionQuery {
            mode,
            vector: vector.as_deref(),
            text: Some(query),
            top_k,
            min_score: self.config.min_similarity,
            fusion: self.config.fusion,
        })?;

        let relevant_history: Vec<RelevantHit> = hits
            .into_iter()
            .filter_map(|hit| {
                let doc = entry.vector_index().get(&hit.id)?;
                let role = doc
                    .metadata
                    .get("role")
                    .and_then(serde_json::Value::as_str)
                    .and_then(|r| r.parse().ok());
                Some(RelevantHit {
                    content: doc.content.clone(),
                    role,
                    similarity: hit.score,
                    vector_similarity: hit.vector_similarity,
                    keyword_score: hit.keyword_score,
                    metadata: hit.metadata,
                    id: hit.id,
                })
            })
            .collect();

        info!(
            session = %self.key,
            mode = ?mode,
            hits = relevant_history.len(),
            "Retrieved relevant history"
        );
        Ok(RetrievalContext {
            messages: entry.messages().to_vec(),
            relevant_history,
        })
    }

    /// Format the hits for `query` as a single system message.
    ///
    /// Returns an empty vector when nothing relevant was found.
    pub async fn build_context_messages(&self, query: &str) -> RecallResult<Vec<Message>> {
        let context = self.get_context(query, None).await?;
        Ok(format_context(&context.relevant_history)
            .map(Message::system)
            .into_iter()
            .collect())
    }

    pub async fn get_stats(&self) -> RecallResult<MemoryStats> {
        let mut cache = self.cache.lock().await;
        let entry = cache.get(&self.key).await?;
        Ok(MemoryStats {
            message_count: entry.messages().len(),
            document_count: entry.vector_index().len(),
            dimensions: entry.vector_index().dimensions(),
        })
    }

    /// Drop this session from the cache and delete its snapshot.
    pub async fn clear(&self) -> RecallResult<()> {
        self.cache.lock().await.remove(&self.key).await?;
        Ok(())
    }
}

fn check_embedder(embedder: &Embedder, config: &MemoryConfig) -> RecallResult<()> {
    config.validate()?;
    match embedder.dimension() {
        Some(dim) if dim != config.dimensions => Err(RecallError::Validation(format!(
            "embedder produces {dim}-d vectors, memory is configured for {}",
            config.dimensions
        ))),
        _ => Ok(()),
    }
}

/// Render hits as the body of a context message, `None` when there are none.
pub fn format_context(hits: &[RelevantHit]) -> Option<String> {
    if hits.is_empty() {
        return None;
    }
    let mut out = String::from(CONTEXT_HEADER);
    for (i, hit) in hits.iter().enumerate() {
        let role = hit.role.map_or("document", |r| r.as_str());
        let _ = write!(
            out,
            "\n[{}] ({role}, {:.1}% match): {}",
            i + 1,
            hit.similarity * 100.0,
            hit.content
        );
    }
    Some(out)
}
