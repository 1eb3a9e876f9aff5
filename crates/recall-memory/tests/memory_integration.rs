#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the recall-memory crate.
//!
//! Covers vector and keyword search, rank fusion, index export/import, the
//! session cache lifecycle, and the retrieval facade end to end including
//! snapshot persistence on disk.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Mutex;

use recall_core::{Message, RecallError, RecallResult, Role};
use recall_memory::fusion;
use recall_memory::{
    Bm25Index, DistanceMetric, Document, Embedder, EmbeddingProvider, FileSnapshotStore,
    FusionStrategy, InMemorySnapshotStore, LocalEmbedding, MemoryConfig, RetrievalMemory,
    SearchMode, SessionCache, SessionKey, SnapshotStore, VectorIndex,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Maps text onto one of three axes by topic word, so tests control which
/// documents are semantically close.
struct TopicEmbedding;

#[async_trait]
impl EmbeddingProvider for TopicEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> RecallResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                if t.contains("deploy") {
                    vec![1.0, 0.0, 0.0]
                } else if t.contains("database") {
                    vec![0.0, 1.0, 0.0]
                } else {
                    vec![0.0, 0.0, 1.0]
                }
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        3
    }
}

fn topic_memory(config: MemoryConfig) -> RetrievalMemory {
    RetrievalMemory::isolated(
        SessionKey::new("agent", "s1"),
        Embedder::new(Arc::new(TopicEmbedding)),
        config,
    )
    .unwrap()
}

fn hits(pairs: &[(&str, f32)]) -> Vec<(String, f32)> {
    pairs.iter().map(|(id, s)| (id.to_string(), *s)).collect()
}

// ---------------------------------------------------------------------------
// 1. Vector index
// ---------------------------------------------------------------------------

#[test]
fn vector_search_finds_exact_match() {
    let mut index = VectorIndex::new(3, DistanceMetric::Cosine);
    index.add(Document::new("A", "a", vec![1.0, 0.0, 0.0])).unwrap();
    index.add(Document::new("B", "b", vec![0.0, 1.0, 0.0])).unwrap();

    let results = index.search(&[1.0, 0.0, 0.0], 1, 0.0).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document.id, "A");
    assert!((results[0].similarity - 1.0).abs() < 1e-5);
}

#[test]
fn vector_export_import_preserves_results() {
    let mut index = VectorIndex::new(2, DistanceMetric::Euclidean);
    index
        .add(Document::new("a", "first", vec![0.1, 0.9]).with_metadata("n", 1.into()))
        .unwrap();
    index.add(Document::new("b", "second", vec![0.8, 0.2])).unwrap();
    index.add(Document::new("c", "third", vec![-0.5, 0.5])).unwrap();

    let json = serde_json::to_string(&index.export()).unwrap();
    let restored = VectorIndex::from_snapshot(serde_json::from_str(&json).unwrap()).unwrap();

    let query = [0.3, 0.7];
    let ranked = |index: &VectorIndex| -> Vec<(String, f32)> {
        index
            .search(&query, 3, 0.0)
            .unwrap()
            .into_iter()
            .map(|r| (r.document.id, r.similarity))
            .collect()
    };
    assert_eq!(ranked(&index), ranked(&restored));
    assert_eq!(restored.export(), index.export());
    assert_eq!(restored.len(), 3);
    assert_eq!(restored.dimensions(), 2);
    assert_eq!(restored.metric(), DistanceMetric::Euclidean);
    assert_eq!(restored.get("a").unwrap().metadata["n"], 1);
}

#[test]
fn vector_import_rejects_wrong_dimensions() {
    let mut index = VectorIndex::new(2, DistanceMetric::Cosine);
    index.add(Document::new("keep", "x", vec![1.0, 0.0])).unwrap();

    let mut bad = index.export();
    bad.documents.push(Document::new("bad", "y", vec![1.0, 0.0, 0.0]));
    assert!(matches!(index.import(bad), Err(RecallError::Validation(_))));
    assert!(index.get("keep").is_some());
}

// ---------------------------------------------------------------------------
// 2. Keyword index
// ---------------------------------------------------------------------------

#[test]
fn keyword_search_prefers_matching_document() {
    let mut index = Bm25Index::new();
    index.add_text("cats", "cats are great");
    index.add_text("dogs", "dogs are great");

    let results = index.search("cats", 1);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "cats");
    assert!(results[0].1 > 0.0);
}

#[test]
fn keyword_remove_updates_statistics() {
    let mut index = Bm25Index::new();
    index.add_text("a", "rust borrow checker");
    index.add_text("b", "python garbage collector");
    assert!(index.remove_document("a"));
    assert!(!index.remove_document("a"));

    assert_eq!(index.document_count(), 1);
    assert!(index.search("rust", 5).is_empty());
    assert_eq!(index.average_document_length(), 3.0);
}

// ---------------------------------------------------------------------------
// 3. Rank fusion
// ---------------------------------------------------------------------------

#[test]
fn rrf_promotes_each_lists_leader() {
    let vector = hits(&[("X", 0.9), ("Z", 0.4)]);
    let keyword = hits(&[("Y", 7.5), ("W", 1.2)]);

    let fused = fusion::merge(&vector, &keyword, 2, FusionStrategy::default());
    let mut ids: Vec<&str> = fused.iter().map(|r| r.id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["X", "Y"]);
    assert_eq!(fused[0].vector_similarity.or(fused[1].vector_similarity), Some(0.9));
}

#[test]
fn rrf_rewards_agreement() {
    let vector = hits(&[("both", 0.8), ("v", 0.7)]);
    let keyword = hits(&[("k", 4.0), ("both", 3.0)]);

    let fused = fusion::merge(&vector, &keyword, 3, FusionStrategy::default());
    assert_eq!(fused[0].id, "both");
    assert_eq!(fused[0].keyword_score, Some(3.0));
}

#[test]
fn weighted_alpha_extremes_match_single_rankings() {
    let vector = hits(&[("a", 0.9), ("b", 0.5), ("c", 0.1)]);
    let keyword = hits(&[("c", 9.0), ("b", 4.0), ("d", 1.0)]);

    let pure_vector = fusion::merge(&vector, &keyword, 10, FusionStrategy::Weighted { alpha: 1.0 });
    let ids: Vec<&str> = pure_vector.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);

    let pure_keyword =
        fusion::merge(&vector, &keyword, 10, FusionStrategy::Weighted { alpha: 0.0 });
    let ids: Vec<&str> = pure_keyword.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "b", "d"]);
}

// ---------------------------------------------------------------------------
// 4. Session cache lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn idle_session_evicted_but_clear_is_immediate() {
    let mut cache =
        SessionCache::new(3, DistanceMetric::Cosine).with_ttl(Duration::from_millis(20));
    let idle = SessionKey::new("agent", "idle");
    let fresh = SessionKey::new("agent", "fresh");

    cache.get(&idle).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    cache.get(&fresh).await.unwrap();
    assert!(!cache.contains(&idle));

    // Fresh session, removed regardless of age.
    assert!(cache.remove(&fresh).await.unwrap());
    assert!(cache.is_empty());
}

#[tokio::test]
async fn shared_cache_serves_many_facades() {
    let config = MemoryConfig::new(3).with_search_mode(SearchMode::Vector);
    let cache = Arc::new(Mutex::new(SessionCache::from_config(&config, None)));
    let embedder = Embedder::new(Arc::new(TopicEmbedding));

    let first = RetrievalMemory::new(
        cache.clone(),
        SessionKey::new("agent", "one"),
        embedder.clone(),
        config.clone(),
    )
    .await
    .unwrap();
    let second = RetrievalMemory::new(
        cache.clone(),
        SessionKey::new("agent", "two"),
        embedder,
        config,
    )
    .await
    .unwrap();

    first.add_message(Message::user("deploy to staging")).await.unwrap();
    assert_eq!(first.get_stats().await.unwrap().message_count, 1);
    assert_eq!(second.get_stats().await.unwrap().message_count, 0);
    assert_eq!(cache.lock().await.len(), 2);
}

#[tokio::test]
async fn mismatched_shared_cache_is_rejected_up_front() {
    let cache = Arc::new(Mutex::new(SessionCache::new(3, DistanceMetric::Cosine)));
    let result = RetrievalMemory::new(
        cache.clone(),
        SessionKey::new("agent", "wide"),
        Embedder::new(Arc::new(LocalEmbedding::new(8))),
        MemoryConfig::new(8),
    )
    .await;
    assert!(matches!(result, Err(RecallError::Validation(_))));

    let euclidean = MemoryConfig::new(3).with_distance_metric(DistanceMetric::Euclidean);
    let result = RetrievalMemory::new(
        cache,
        SessionKey::new("agent", "metric"),
        Embedder::new(Arc::new(TopicEmbedding)),
        euclidean,
    )
    .await;
    assert!(matches!(result, Err(RecallError::Validation(_))));
}

#[tokio::test]
async fn concurrent_adds_are_not_lost() {
    let memory = Arc::new(topic_memory(MemoryConfig::new(3)));
    let mut handles = Vec::new();
    for i in 0..16 {
        let memory = memory.clone();
        handles.push(tokio::spawn(async move {
            memory
                .add_message(Message::user(format!("message number {i}")))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = memory.get_stats().await.unwrap();
    assert_eq!(stats.message_count, 16);
    assert_eq!(stats.document_count, 16);
}

// ---------------------------------------------------------------------------
// 5. Retrieval facade
// ---------------------------------------------------------------------------

#[tokio::test]
async fn vector_mode_retrieves_semantic_neighbour() {
    let memory = topic_memory(MemoryConfig::new(3).with_search_mode(SearchMode::Vector));
    memory
        .add_message(Message::user("how do I deploy the service?"))
        .await
        .unwrap();
    memory
        .add_message(Message::assistant("the database lives on port 5432"))
        .await
        .unwrap();

    let ctx = memory.get_context("database credentials", Some(1)).await.unwrap();
    assert_eq!(ctx.messages.len(), 2);
    assert_eq!(ctx.relevant_history.len(), 1);
    assert_eq!(ctx.relevant_history[0].content, "the database lives on port 5432");
    assert_eq!(ctx.relevant_history[0].role, Some(Role::Assistant));
}

#[tokio::test]
async fn keyword_mode_matches_exact_terms() {
    let memory = topic_memory(MemoryConfig::new(3).with_search_mode(SearchMode::Keyword));
    memory.add_message(Message::user("error code E1234 on boot")).await.unwrap();
    memory.add_message(Message::user("all systems nominal")).await.unwrap();

    let ctx = memory.get_context("E1234", None).await.unwrap();
    assert_eq!(ctx.relevant_history.len(), 1);
    assert!(ctx.relevant_history[0].content.contains("E1234"));
    assert!(ctx.relevant_history[0].keyword_score.is_some());
    assert!(ctx.relevant_history[0].vector_similarity.is_none());
}

#[tokio::test]
async fn hybrid_mode_surfaces_both_signals() {
    let memory = topic_memory(MemoryConfig::new(3).with_top_k(2));
    // Semantically on-topic, no shared keyword with the query.
    memory.add_message(Message::user("deploy pipeline is green")).await.unwrap();
    // Shares the rare keyword, different topic.
    memory.add_message(Message::user("ticket zx81 was closed")).await.unwrap();
    // Neither.
    memory.add_message(Message::user("database backups are nightly")).await.unwrap();

    let ctx = memory.get_context("deploy zx81", None).await.unwrap();
    let contents: Vec<&str> = ctx
        .relevant_history
        .iter()
        .map(|h| h.content.as_str())
        .collect();
    assert_eq!(contents.len(), 2);
    assert!(contents.contains(&"deploy pipeline is green"));
    assert!(contents.contains(&"ticket zx81 was closed"));
}

#[tokio::test]
async fn add_document_is_searchable_but_not_history() {
    let memory = topic_memory(MemoryConfig::new(3).with_search_mode(SearchMode::Keyword));
    let mut metadata = HashMap::new();
    metadata.insert("source".to_string(), serde_json::json!("runbook.md"));
    let id = memory
        .add_document("restart the ingest worker with sudo", metadata)
        .await
        .unwrap()
        .unwrap();

    let ctx = memory.get_context("ingest worker", None).await.unwrap();
    assert!(ctx.messages.is_empty());
    assert_eq!(ctx.relevant_history[0].id, id);
    assert_eq!(ctx.relevant_history[0].role, None);
    assert_eq!(ctx.relevant_history[0].metadata["source"], "runbook.md");
}

#[tokio::test]
async fn build_context_messages_formats_hits() {
    let memory = topic_memory(MemoryConfig::new(3).with_search_mode(SearchMode::Vector));
    memory
        .add_message(Message::assistant("deploy finished at noon"))
        .await
        .unwrap();

    let messages = memory.build_context_messages("when did deploy end").await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(
        messages[0].content,
        "Relevant context from earlier in this conversation:\n\
         [1] (assistant, 100.0% match): deploy finished at noon"
    );
}

#[tokio::test]
async fn min_similarity_filters_vector_hits() {
    let memory = topic_memory(
        MemoryConfig::new(3)
            .with_search_mode(SearchMode::Vector)
            .with_min_similarity(0.9),
    );
    memory.add_message(Message::user("database is slow")).await.unwrap();

    let ctx = memory.get_context("deploy status", None).await.unwrap();
    assert!(ctx.relevant_history.is_empty());
    assert!(memory.build_context_messages("deploy status").await.unwrap().is_empty());
}

#[tokio::test]
async fn clear_drops_session_state() {
    let memory = topic_memory(MemoryConfig::new(3));
    memory.add_message(Message::user("deploy now")).await.unwrap();
    memory.clear().await.unwrap();

    let stats = memory.get_stats().await.unwrap();
    assert_eq!(stats.message_count, 0);
    assert_eq!(stats.document_count, 0);
}

#[tokio::test]
async fn local_embedding_drives_hybrid_search() {
    let config = MemoryConfig::new(128);
    let memory = RetrievalMemory::isolated(
        SessionKey::new("agent", "local"),
        Embedder::new(Arc::new(LocalEmbedding::new(128))),
        config,
    )
    .unwrap();
    memory
        .add_message(Message::user("the kubernetes cluster ran out of memory"))
        .await
        .unwrap();
    memory
        .add_message(Message::user("lunch is at one"))
        .await
        .unwrap();

    let ctx = memory.get_context("kubernetes memory", Some(1)).await.unwrap();
    assert_eq!(
        ctx.relevant_history[0].content,
        "the kubernetes cluster ran out of memory"
    );
}

// ---------------------------------------------------------------------------
// 6. Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn file_snapshots_survive_a_new_cache() {
    let tmp = TempDir::new().unwrap();
    let config = MemoryConfig::new(3).with_persistence(true);
    let key = SessionKey::new("agent", "persisted");

    {
        let store: Arc<dyn SnapshotStore> =
            Arc::new(FileSnapshotStore::new(tmp.path().to_path_buf()).await.unwrap());
        let cache = Arc::new(Mutex::new(SessionCache::from_config(&config, Some(store))));
        let memory = RetrievalMemory::new(
            cache,
            key.clone(),
            Embedder::new(Arc::new(TopicEmbedding)),
            config.clone(),
        )
        .await
        .unwrap();
        memory.add_message(Message::user("deploy the canary")).await.unwrap();
        memory.add_message(Message::system("ignored")).await.unwrap();
    }

    let store: Arc<dyn SnapshotStore> =
        Arc::new(FileSnapshotStore::new(tmp.path().to_path_buf()).await.unwrap());
    let cache = Arc::new(Mutex::new(SessionCache::from_config(&config, Some(store))));
    let memory = RetrievalMemory::new(
        cache,
        key,
        Embedder::new(Arc::new(TopicEmbedding)),
        config,
    )
    .await
    .unwrap();

    let ctx = memory.get_context("canary", None).await.unwrap();
    assert_eq!(ctx.messages.len(), 1);
    assert_eq!(ctx.relevant_history[0].content, "deploy the canary");
}

#[tokio::test]
async fn corrupt_snapshot_starts_fresh_session() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let key = SessionKey::new("agent", "broken");
    store.save(&key.storage_key(), "][").await.unwrap();

    let config = MemoryConfig::new(3).with_persistence(true);
    let cache = Arc::new(Mutex::new(SessionCache::from_config(
        &config,
        Some(store.clone() as Arc<dyn SnapshotStore>),
    )));
    let memory = RetrievalMemory::new(
        cache,
        key.clone(),
        Embedder::new(Arc::new(TopicEmbedding)),
        config,
    )
    .await
    .unwrap();

    assert_eq!(memory.get_stats().await.unwrap().message_count, 0);
    memory.add_message(Message::user("deploy again")).await.unwrap();

    // The next write replaces the corrupt payload.
    let raw = store.load(&key.storage_key()).await.unwrap().unwrap();
    assert!(raw.contains("deploy again"));
}

#[tokio::test]
async fn persistence_disabled_writes_nothing() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let config = MemoryConfig::new(3);
    let cache = Arc::new(Mutex::new(SessionCache::from_config(
        &config,
        Some(store.clone() as Arc<dyn SnapshotStore>),
    )));
    let memory = RetrievalMemory::new(
        cache,
        SessionKey::new("agent", "volatile"),
        Embedder::new(Arc::new(TopicEmbedding)),
        config,
    )
    .await
    .unwrap();

    memory.add_message(Message::user("deploy")).await.unwrap();
    assert!(store.is_empty().await);
}
