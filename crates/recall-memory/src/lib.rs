//! Session-scoped hybrid retrieval memory for conversational agents.
//!
//! Each conversation gets its own dense vector index and BM25 keyword index.
//! Queries run against either index or both, with the two rankings merged by
//! reciprocal rank or weighted score fusion. Sessions live in a TTL cache and
//! can be snapshotted to a pluggable store.
//!
//! # Main types
//!
//! - [`RetrievalMemory`] — Per-session facade: add messages, fetch context.
//! - [`SessionCache`] — Registry of live sessions with idle eviction.
//! - [`VectorIndex`] — Brute-force similarity index over fixed-size vectors.
//! - [`Bm25Index`] — BM25 inverted index for keyword retrieval.
//! - [`FusionStrategy`] — How vector and keyword rankings are merged.
//! - [`SnapshotStore`] — Persistence adapter for session snapshots.

/// BM25 inverted index for keyword-based retrieval.
pub mod bm25;
/// Session registry with TTL eviction and snapshot restore.
pub mod cache;
/// Memory configuration.
pub mod config;
/// Embedding provider trait and local implementation.
pub mod embedding;
/// Rank fusion of vector and keyword results.
pub mod fusion;
/// The per-session retrieval facade.
pub mod retrieval;
/// Session snapshots and their persistence adapters.
pub mod snapshot;
/// Dense vector index.
pub mod vector;

pub use bm25::Bm25Index;
pub use cache::{SessionCache, SessionEntry, SessionKey, SessionQuery};
pub use config::{MemoryConfig, SearchMode};
pub use embedding::{Embedder, EmbeddingProvider, LocalEmbedding};
pub use fusion::{FusedResult, FusionStrategy};
pub use retrieval::{MemoryStats, RelevantHit, RetrievalContext, RetrievalMemory};
pub use snapshot::{FileSnapshotStore, InMemorySnapshotStore, SessionSnapshot, SnapshotStore};
pub use vector::{DistanceMetric, Document, IndexSnapshot, SearchResult, VectorIndex};
