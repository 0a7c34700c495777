use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("docx read error: {0}")]
    Docx(String),

    #[error("csv read error: {0}")]
    Csv(#[from] csv::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),
}

impl From<zip::result::ZipError> for LoadError {
    fn from(error: zip::result::ZipError) -> Self {
        LoadError::Docx(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("embedding timed out after {0:?}")]
    Timeout(Duration),

    #[error("embedding count {actual} doesn't match input count {expected}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding dimension {actual} != {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index has no records")]
    EmptyIndex,

    #[error("index file is corrupt: {0}")]
    Corrupt(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index persistence timed out after {0:?}")]
    Timeout(Duration),

    #[error("index writer lock at {path} not acquired within {waited:?}")]
    LockTimeout { path: String, waited: Duration },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no documents loaded from {attempted} source(s)")]
    NoDocumentsLoaded { attempted: usize },

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Request(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_errors_propagate_into_pipeline_errors() {
        let error: SearchError = IndexError::EmptyIndex.into();
        assert!(matches!(error, SearchError::Index(IndexError::EmptyIndex)));
        assert_eq!(error.to_string(), "index error: index has no records");

        let error: IngestError = IndexError::DimensionMismatch {
            expected: 4,
            actual: 3,
        }
        .into();
        assert!(error.to_string().contains("index has 4, got 3"));
    }

    #[test]
    fn embedding_timeout_reports_duration() {
        let error = EmbeddingError::Timeout(Duration::from_secs(2));
        assert_eq!(error.to_string(), "embedding timed out after 2s");
    }
}
