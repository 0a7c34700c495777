use crate::error::{EmbeddingError, IndexError, SearchError};
use crate::index::IndexSettings;
use crate::models::{QueryRequest, QueryResponse, SearchHit, CONTEXT_DELIMITER};
use crate::traits::Embedder;
use std::time::Duration;
use tracing::{debug, warn};

pub struct QueryPipeline<E> {
    embedder: E,
    index: IndexSettings,
    embedding_timeout: Duration,
    delimiter: String,
}

impl<E> QueryPipeline<E>
where
    E: Embedder,
{
    pub fn new(
        embedder: E,
        index: IndexSettings,
        embedding_timeout: Duration,
    ) -> Result<Self, SearchError> {
        if embedder.dimensions() != index.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: index.dimension,
                actual: embedder.dimensions(),
            }
            .into());
        }

        Ok(Self {
            embedder,
            index,
            embedding_timeout,
            delimiter: CONTEXT_DELIMITER.to_string(),
        })
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Ranked hits for the request, best first. The source filter is applied
    /// before truncating to `k`.
    pub async fn retrieve(&self, request: &QueryRequest) -> Result<Vec<SearchHit>, SearchError> {
        if request.query.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }
        if request.k == 0 {
            return Err(SearchError::Request("k must be greater than 0".to_string()));
        }

        let index = self.index.open()?;
        if index.is_empty() {
            return Err(IndexError::EmptyIndex.into());
        }

        let texts = vec![request.query.clone()];
        let query_vector = tokio::time::timeout(self.embedding_timeout, self.embedder.embed(&texts))
            .await
            .map_err(|_| EmbeddingError::Timeout(self.embedding_timeout))??
            .into_iter()
            .next()
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                actual: 0,
            })?;

        let hits = index.search_filtered(&query_vector, request.k, &request.source_filter)?;
        debug!(
            k = request.k,
            hits = hits.len(),
            metric = %index.metric(),
            "query resolved"
        );
        Ok(hits)
    }

    pub async fn query(&self, request: &QueryRequest) -> Result<String, SearchError> {
        let hits = self.retrieve(request).await?;
        Ok(assemble_context(&hits, &self.delimiter))
    }

    /// Never fails: errors are carried in [`QueryResponse::Error`].
    pub async fn respond(&self, request: &QueryRequest) -> QueryResponse {
        match self.query(request).await {
            Ok(context) => QueryResponse::Context(context),
            Err(error) => {
                warn!(reason = %error, "query failed");
                QueryResponse::Error(error.to_string())
            }
        }
    }
}

pub fn assemble_context(hits: &[SearchHit], delimiter: &str) -> String {
    hits.iter()
        .map(|hit| hit.record.payload.text.as_str())
        .collect::<Vec<_>>()
        .join(delimiter)
}
