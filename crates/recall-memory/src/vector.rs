use recall_core::{RecallError, RecallResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Distance function used to compare vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cos(q, d)`; similarity in `[-1, 1]`.
    #[default]
    Cosine,
    /// L2 distance; similarity `1 / (1 + distance)`.
    Euclidean,
    /// Negated dot product; similarity is the raw dot product.
    Dot,
}

impl DistanceMetric {
    /// Lowercase name used in configuration and snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Dot => "dot",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = RecallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclidean" => Ok(Self::Euclidean),
            "dot" => Ok(Self::Dot),
            other => Err(RecallError::Validation(format!(
                "Unknown distance metric: {other}"
            ))),
        }
    }
}

/// A single document stored in a [`VectorIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            vector,
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata value. Chainable builder method.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Document plus its cached norm (cosine metric only).
#[derive(Debug, Clone)]
struct StoredDocument {
    doc: Document,
    norm: Option<f32>,
}

/// Result of a nearest-neighbour query.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document: Document,
    pub distance: f32,
    pub similarity: f32,
}

/// Full contents of a [`VectorIndex`], as exported for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSnapshot {
    pub dimensions: usize,
    pub distance_metric: DistanceMetric,
    pub documents: Vec<Document>,
}

/// Exhaustive-scan vector index for one session.
///
/// Documents are kept in insertion order; every query is compared against all
/// of them, which is fine for the size of a single conversation.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimensions: usize,
    metric: DistanceMetric,
    documents: Vec<StoredDocument>,
    positions: HashMap<String, usize>,
}

impl VectorIndex {
    /// Create an empty index for vectors of `dimensions` components.
    pub fn new(dimensions: usize, metric: DistanceMetric) -> Self {
        Self {
            dimensions,
            metric,
            documents: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.positions.get(id).map(|&pos| &self.documents[pos].doc)
    }

    /// Iterate over stored documents in insertion order.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter().map(|stored| &stored.doc)
    }

    /// Insert a document, replacing any existing document with the same id.
    ///
    /// Fails without modifying the index if the vector length differs from
    /// the index dimensions.
    pub fn add(&mut self, doc: Document) -> RecallResult<()> {
        self.check_dimensions(&doc.vector, "document")?;

        let norm = match self.metric {
            DistanceMetric::Cosine => Some(l2_norm(&doc.vector)),
            _ => None,
        };
        let stored = StoredDocument { doc, norm };

        let existing = self.positions.get(&stored.doc.id).copied();
        match existing {
            Some(pos) => self.documents[pos] = stored,
            None => {
                self.positions
                    .insert(stored.doc.id.clone(), self.documents.len());
                self.documents.push(stored);
            }
        }
        Ok(())
    }

    /// Remove a document by id. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(pos) = self.positions.remove(id) else {
            return false;
        };
        self.documents.remove(pos);
        // Shift positions of everything after the removed slot.
        for stored in &self.documents[pos..] {
            if let Some(p) = self.positions.get_mut(&stored.doc.id) {
                *p -= 1;
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.documents.clear();
        self.positions.clear();
    }

    /// Return up to `top_k` documents closest to `query`.
    ///
    /// Documents whose similarity is below `min_similarity` are skipped. Results
    /// are ordered by ascending distance, i.e. descending similarity. Pass `0.0`
    /// for the default threshold.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> RecallResult<Vec<SearchResult>> {
        self.check_dimensions(query, "query")?;
        if top_k == 0 || self.documents.is_empty() {
            return Ok(Vec::new());
        }

        let query_norm = match self.metric {
            DistanceMetric::Cosine => Some(l2_norm(query)),
            _ => None,
        };

        let mut scored: Vec<(usize, f32, f32)> = self
            .documents
            .iter()
            .enumerate()
            .filter_map(|(pos, stored)| {
                let distance = self.distance(query, query_norm, stored);
                let similarity = self.similarity(distance);
                (similarity >= min_similarity).then_some((pos, distance, similarity))
            })
            .collect();

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(pos, distance, similarity)| SearchResult {
                document: self.documents[pos].doc.clone(),
                distance,
                similarity,
            })
            .collect())
    }

    /// Export the full index contents.
    pub fn export(&self) -> IndexSnapshot {
        IndexSnapshot {
            dimensions: self.dimensions,
            distance_metric: self.metric,
            documents: self.documents().cloned().collect(),
        }
    }

    /// Replace this index with the contents of `snapshot`.
    ///
    /// Adopts the snapshot's dimensions and metric. Every document is validated
    /// before anything is replaced, so a bad snapshot leaves the index as it was.
    /// Keyword structures are not touched; callers rebuild them separately.
    pub fn import(&mut self, snapshot: IndexSnapshot) -> RecallResult<()> {
        let mut rebuilt = VectorIndex::new(snapshot.dimensions, snapshot.distance_metric);
        for doc in snapshot.documents {
            rebuilt.add(doc)?;
        }
        *self = rebuilt;
        Ok(())
    }

    /// Build a fresh index from a snapshot.
    pub fn from_snapshot(snapshot: IndexSnapshot) -> RecallResult<Self> {
        let mut index = VectorIndex::new(snapshot.dimensions, snapshot.distance_metric);
        index.import(snapshot)?;
        Ok(index)
    }

    fn check_dimensions(&self, vector: &[f32], what: &str) -> RecallResult<()> {
        if vector.len() != self.dimensions {
            return Err(RecallError::Validation(format!(
                "{what} vector has {} dimensions, index expects {}",
                vector.len(),
                self.dimensions
            )));
        }
        Ok(())
    }

    fn distance(&self, query: &[f32], query_norm: Option<f32>, stored: &StoredDocument) -> f32 {
        let doc = &stored.doc.vector;
        match self.metric {
            DistanceMetric::Cosine => {
                let qn = query_norm.unwrap_or_else(|| l2_norm(query));
                let dn = stored.norm.unwrap_or_else(|| l2_norm(doc));
                if qn == 0.0 || dn == 0.0 {
                    return 1.0;
                }
                let cos = (dot(query, doc) / (qn * dn)).clamp(-1.0, 1.0);
                1.0 - cos
            }
            DistanceMetric::Euclidean => query
                .iter()
                .zip(doc.iter())
                .map(|(q, d)| (q - d) * (q - d))
                .sum::<f32>()
                .sqrt(),
            DistanceMetric::Dot => -dot(query, doc),
        }
    }

    fn similarity(&self, distance: f32) -> f32 {
        match self.metric {
            DistanceMetric::Cosine => 1.0 - distance,
            DistanceMetric::Euclidean => 1.0 / (1.0 + distance),
            DistanceMetric::Dot => -distance,
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
