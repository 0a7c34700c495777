pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod ingest;
pub mod loader;
pub mod models;
pub mod query;
pub mod traits;

pub use chunking::{
    chunk_document, make_chunk_id, normalize_text, split, ChunkingConfig, TextWindow, Windows,
};
pub use embeddings::{
    CharacterNgramEmbedder, EmbeddingProvider, HttpEmbedder, HttpEmbedderConfig,
    DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL,
};
pub use error::{EmbeddingError, IndexError, IngestError, LoadError, SearchError};
pub use index::{IndexSettings, VectorIndex, WriterLock, INDEX_FORMAT_VERSION};
pub use ingest::{IngestStage, IngestionConfig, IngestionPipeline, PipelineTimeouts};
pub use loader::{discover_documents, expand_inputs, DocumentFormat, FormatLoader};
pub use models::{
    Chunk, Document, IngestionOptions, IngestionReport, Metadata, Metric, QueryRequest,
    QueryResponse, SearchHit, SkippedDocument, VectorRecord, CONTEXT_DELIMITER, DEFAULT_TOP_K,
};
pub use query::{assemble_context, QueryPipeline};
pub use traits::{DocumentLoader, Embedder};
