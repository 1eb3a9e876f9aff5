use std::collections::{HashMap, HashSet};

/// BM25 parameters.
const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Field indexed when no explicit field list is configured.
pub const DEFAULT_FIELD: &str = "content";

/// Tokenize text into lowercase alphanumeric runs.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Per-document statistics kept for removal and length normalization.
#[derive(Debug, Clone)]
struct DocStats {
    length: f32,
    terms: Vec<String>,
}

/// A BM25 inverted index for keyword-based document retrieval.
///
/// Only the configured text fields of a document are indexed; their tokens are
/// pooled into a single bag per document. Corpus statistics (document count,
/// average length, document frequency) are read at query time, so mutations
/// never leave a stale IDF behind.
#[derive(Debug, Clone)]
pub struct Bm25Index {
    fields: Vec<String>,
    /// term -> (doc_id -> term_frequency)
    inverted_index: HashMap<String, HashMap<String, f32>>,
    /// doc_id -> length and distinct terms
    docs: HashMap<String, DocStats>,
    /// Sum of all document lengths.
    total_length: f32,
}

impl Bm25Index {
    /// Create an empty index over the default `content` field.
    pub fn new() -> Self {
        Self::with_fields([DEFAULT_FIELD])
    }

    /// Create an empty index over the given text fields.
    pub fn with_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            inverted_index: HashMap::new(),
            docs: HashMap::new(),
            total_length: 0.0,
        }
    }

    /// The text fields this index reads from documents.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Add a document given as `(field, text)` pairs.
    ///
    /// Fields not configured on this index are ignored. Re-adding an existing
    /// id replaces the previous version.
    pub fn add_document(&mut self, id: &str, fields: &[(&str, &str)]) {
        self.remove_document(id);

        let mut term_freq: HashMap<String, f32> = HashMap::new();
        let mut length = 0usize;
        for (name, text) in fields {
            if !self.fields.iter().any(|f| f == name) {
                continue;
            }
            for token in tokenize(text) {
                length += 1;
                *term_freq.entry(token).or_insert(0.0) += 1.0;
            }
        }

        let terms: Vec<String> = term_freq.keys().cloned().collect();
        for (term, freq) in term_freq {
            self.inverted_index
                .entry(term)
                .or_default()
                .insert(id.to_string(), freq);
        }

        let length = length as f32;
        self.total_length += length;
        self.docs.insert(id.to_string(), DocStats { length, terms });
    }

    /// Add a document whose only text is the default `content` field.
    pub fn add_text(&mut self, id: &str, text: &str) {
        self.add_document(id, &[(DEFAULT_FIELD, text)]);
    }

    /// Remove a document from the index. Returns whether it was present.
    pub fn remove_document(&mut self, id: &str) -> bool {
        let Some(stats) = self.docs.remove(id) else {
            return false;
        };

        for term in &stats.terms {
            if let Some(postings) = self.inverted_index.get_mut(term) {
                postings.remove(id);
                if postings.is_empty() {
                    self.inverted_index.remove(term);
                }
            }
        }

        self.total_length = (self.total_length - stats.length).max(0.0);
        if self.docs.is_empty() {
            self.total_length = 0.0;
        }
        true
    }

    pub fn clear(&mut self) {
        self.inverted_index.clear();
        self.docs.clear();
        self.total_length = 0.0;
    }

    /// Search the index for documents matching the query, returning up to
    /// `top_k` results sorted by descending BM25 score.
    ///
    /// Uses the standard BM25 scoring formula:
    /// ```text
    /// score = sum over query terms of:
    ///   IDF(t) * (tf * (k1 + 1)) / (tf + k1 * (1 - b + b * dl / avgdl))
    /// ```
    /// where:
    /// - `IDF(t) = ln((N - df + 0.5) / (df + 0.5) + 1.0)`
    /// - `tf` = term frequency of term t in the document
    /// - `dl` = document length
    /// - `avgdl` = average document length
    /// - `N` = total number of documents
    /// - `df` = number of documents containing term t
    ///
    /// Repeated query terms count once. Equal scores are ordered by id.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f32)> {
        if self.docs.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let query_terms: Vec<String> = tokenize(query)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();
        if query_terms.is_empty() {
            return Vec::new();
        }

        let n = self.docs.len() as f32;
        let avgdl = match self.total_length / n {
            avg if avg > 0.0 => avg,
            _ => 1.0,
        };

        let mut scores: HashMap<&str, f32> = HashMap::new();
        for term in &query_terms {
            let Some(postings) = self.inverted_index.get(term) else {
                continue;
            };
            let df = postings.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for (doc_id, &tf) in postings {
                let dl = self.docs.get(doc_id).map_or(0.0, |d| d.length);
                let numerator = tf * (K1 + 1.0);
                let denominator = tf + K1 * (1.0 - B + B * dl / avgdl);
                *scores.entry(doc_id.as_str()).or_insert(0.0) += idf * numerator / denominator;
            }
        }

        let mut results: Vec<(String, f32)> = scores
            .into_iter()
            .map(|(id, score)| (id.to_string(), score))
            .collect();
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results.truncate(top_k);

        results
    }

    /// Return the number of documents currently in the index.
    pub fn document_count(&self) -> usize {
        self.docs.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.docs.contains_key(id)
    }

    /// Average document length across the corpus, 0 when empty.
    pub fn average_document_length(&self) -> f32 {
        if self.docs.is_empty() {
            0.0
        } else {
            self.total_length / self.docs.len() as f32
        }
    }
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new()
    }
}
