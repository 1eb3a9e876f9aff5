use crate::bm25::DEFAULT_FIELD;
use crate::fusion::FusionStrategy;
use crate::vector::DistanceMetric;
use recall_core::{RecallError, RecallResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which sub-index answers a retrieval query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Dense similarity only.
    Vector,
    /// BM25 only.
    Keyword,
    /// Both, merged with the configured [`FusionStrategy`].
    #[default]
    Hybrid,
}

impl SearchMode {
    /// Whether this mode needs an embedded query vector.
    pub fn needs_embedding(&self) -> bool {
        matches!(self, SearchMode::Vector | SearchMode::Hybrid)
    }
}

/// Configuration for a retrieval memory.
///
/// ```toml
/// dimensions = 384
/// distance_metric = "cosine"
/// search_mode = "hybrid"
/// top_k = 5
/// persist = true
///
/// [fusion]
/// method = "weighted"
/// alpha = 0.7
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub dimensions: usize,
    #[serde(default)]
    pub distance_metric: DistanceMetric,
    #[serde(default)]
    pub search_mode: SearchMode,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minimum score a hit needs. Cosine/euclidean similarity in vector mode,
    /// raw BM25 score in keyword mode, fused score in hybrid mode.
    #[serde(default)]
    pub min_similarity: f32,
    #[serde(default)]
    pub fusion: FusionStrategy,
    #[serde(default)]
    pub persist: bool,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_keyword_fields")]
    pub keyword_fields: Vec<String>,
}

fn default_top_k() -> usize {
    5
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_keyword_fields() -> Vec<String> {
    vec![DEFAULT_FIELD.to_string()]
}

impl MemoryConfig {
    /// Configuration with defaults for everything but the vector dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            distance_metric: DistanceMetric::default(),
            search_mode: SearchMode::default(),
            top_k: default_top_k(),
            min_similarity: 0.0,
            fusion: FusionStrategy::default(),
            persist: false,
            session_ttl_secs: default_session_ttl_secs(),
            keyword_fields: default_keyword_fields(),
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> RecallResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| RecallError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn validate(&self) -> RecallResult<()> {
        if self.dimensions == 0 {
            return Err(RecallError::Config("dimensions must be > 0".into()));
        }
        if self.top_k == 0 {
            return Err(RecallError::Config("top_k must be > 0".into()));
        }
        if self.session_ttl_secs == 0 {
            return Err(RecallError::Config("session_ttl_secs must be > 0".into()));
        }
        if self.keyword_fields.is_empty() {
            return Err(RecallError::Config(
                "keyword_fields must name at least one field".into(),
            ));
        }
        if let FusionStrategy::Weighted { alpha } = self.fusion {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(RecallError::Config(format!(
                    "fusion alpha must be within [0, 1], got {alpha}"
                )));
            }
        }
        Ok(())
    }

    pub fn with_search_mode(mut self, mode: SearchMode) -> Self {
        self.search_mode = mode;
        self
    }

    pub fn with_distance_metric(mut self, metric: DistanceMetric) -> Self {
        self.distance_metric = metric;
        self
    }

    pub fn with_fusion(mut self, fusion: FusionStrategy) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_persistence(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }
}
