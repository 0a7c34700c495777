use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

pub type Metadata = BTreeMap<String, String>;

pub const DEFAULT_TOP_K: usize = 5;

pub const CONTEXT_DELIMITER: &str = "\n\n---\n\n";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub source_id: String,
    pub raw_text: String,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(source_id: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            raw_text: raw_text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub source_id: String,
    pub offset: usize,
    pub metadata: Metadata,
}

impl Chunk {
    /// True when the chunk's `source_id` or its `source` metadata is in `allowed`.
    /// An empty set admits everything.
    pub fn matches_sources(&self, allowed: &BTreeSet<String>) -> bool {
        allowed.is_empty()
            || allowed.contains(&self.source_id)
            || self
                .metadata
                .get("source")
                .is_some_and(|source| allowed.contains(source))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Chunk,
}

impl VectorRecord {
    pub fn from_chunk(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self {
            id: chunk.chunk_id.clone(),
            vector,
            payload: chunk,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity in `[-1, 1]`, higher is better.
    #[default]
    Cosine,
    /// Euclidean distance, `>= 0`, lower is better.
    Euclidean,
}

impl Metric {
    pub fn higher_is_better(self) -> bool {
        matches!(self, Metric::Cosine)
    }

    pub fn score(self, left: &[f32], right: &[f32]) -> f32 {
        match self {
            Metric::Cosine => cosine_similarity(left, right),
            Metric::Euclidean => euclidean_distance(left, right),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Cosine => f.write_str("cosine"),
            Metric::Euclidean => f.write_str("euclidean"),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            other => Err(format!("unknown metric: {other}")),
        }
    }
}

fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let norm_left = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let norm_right = right.iter().map(|value| value * value).sum::<f32>().sqrt();

    if norm_left == 0.0 || norm_right == 0.0 {
        return 0.0;
    }

    (dot / (norm_left * norm_right)).clamp(-1.0, 1.0)
}

fn euclidean_distance(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f32>()
        .sqrt()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: VectorRecord,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Window of characters before the ideal cut searched for a natural
    /// boundary. `None` uses a tenth of `chunk_size`.
    pub boundary_lookahead: Option<usize>,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            boundary_lookahead: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub k: usize,
    #[serde(rename = "sourceFilter", alias = "documentIds", default)]
    pub source_filter: BTreeSet<String>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, k: usize) -> Self {
        Self {
            query: query.into(),
            k,
            source_filter: BTreeSet::new(),
        }
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueryResponse {
    Context(String),
    Error(String),
}

impl QueryResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, QueryResponse::Error(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedDocument {
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestionReport {
    pub loaded: usize,
    pub chunked: usize,
    pub embedded: usize,
    pub stored: usize,
    pub skipped: Vec<SkippedDocument>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_response_serializes_as_single_field_object() -> Result<(), serde_json::Error> {
        let ok = serde_json::to_string(&QueryResponse::Context("abc".to_string()))?;
        assert_eq!(ok, r#"{"context":"abc"}"#);

        let failed = serde_json::to_string(&QueryResponse::Error("boom".to_string()))?;
        assert_eq!(failed, r#"{"error":"boom"}"#);
        Ok(())
    }

    #[test]
    fn query_request_accepts_document_ids_alias_and_default_k() -> Result<(), serde_json::Error> {
        let request: QueryRequest =
            serde_json::from_str(r#"{"query":"pumps","documentIds":["a.txt"]}"#)?;
        assert_eq!(request.k, DEFAULT_TOP_K);
        assert!(request.source_filter.contains("a.txt"));
        Ok(())
    }

    #[test]
    fn metric_direction_and_scores() {
        assert!(Metric::Cosine.higher_is_better());
        assert!(!Metric::Euclidean.higher_is_better());

        let same = Metric::Cosine.score(&[1.0, 0.0], &[2.0, 0.0]);
        assert!((same - 1.0).abs() < 1e-6);
        let opposite = Metric::Cosine.score(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((opposite + 1.0).abs() < 1e-6);

        let distance = Metric::Euclidean.score(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((distance - 5.0).abs() < 1e-6);
    }

    #[test]
    fn metric_parses_from_cli_strings() {
        assert_eq!("Cosine".parse::<Metric>(), Ok(Metric::Cosine));
        assert_eq!("l2".parse::<Metric>(), Ok(Metric::Euclidean));
        assert!("dot".parse::<Metric>().is_err());
    }

    #[test]
    fn chunk_source_filter_matches_id_or_source_metadata() {
        let chunk = Chunk {
            chunk_id: "c".to_string(),
            text: "t".to_string(),
            source_id: "manual.pdf#page=2".to_string(),
            offset: 0,
            metadata: Metadata::from([("source".to_string(), "manual.pdf".to_string())]),
        };

        assert!(chunk.matches_sources(&BTreeSet::new()));
        assert!(chunk.matches_sources(&BTreeSet::from(["manual.pdf".to_string()])));
        assert!(chunk.matches_sources(&BTreeSet::from(["manual.pdf#page=2".to_string()])));
        assert!(!chunk.matches_sources(&BTreeSet::from(["other.pdf".to_string()])));
    }
}
