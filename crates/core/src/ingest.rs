use crate::chunking::{chunk_document, ChunkingConfig};
use crate::error::{EmbeddingError, IndexError, IngestError};
use crate::index::{IndexSettings, VectorIndex};
use crate::loader::expand_inputs;
use crate::models::{
    Chunk, Document, IngestionOptions, IngestionReport, SkippedDocument, VectorRecord,
};
use crate::traits::{DocumentLoader, Embedder};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Loaded,
    Chunked,
    Embedded,
    Stored,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStage::Loaded => "LOADED",
            IngestStage::Chunked => "CHUNKED",
            IngestStage::Embedded => "EMBEDDED",
            IngestStage::Stored => "STORED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTimeouts {
    pub embedding: Duration,
    pub persistence: Duration,
    pub lock: Duration,
}

impl Default for PipelineTimeouts {
    fn default() -> Self {
        Self {
            embedding: Duration::from_secs(60),
            persistence: Duration::from_secs(30),
            lock: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub options: IngestionOptions,
    pub index: IndexSettings,
    pub timeouts: PipelineTimeouts,
}

pub struct IngestionPipeline<L, E> {
    loader: L,
    embedder: E,
    chunking: ChunkingConfig,
    index: IndexSettings,
    timeouts: PipelineTimeouts,
}

impl<L, E> IngestionPipeline<L, E>
where
    L: DocumentLoader,
    E: Embedder,
{
    pub fn new(loader: L, embedder: E, config: IngestionConfig) -> Result<Self, IngestError> {
        let chunking = ChunkingConfig::try_from(&config.options)?;
        if embedder.dimensions() != config.index.dimension {
            return Err(IngestError::InvalidArgument(format!(
                "embedder dimension {} does not match index dimension {}",
                embedder.dimensions(),
                config.index.dimension
            )));
        }

        Ok(Self {
            loader,
            embedder,
            chunking,
            index: config.index,
            timeouts: config.timeouts,
        })
    }

    /// Loads every path, skipping (and reporting) the ones that fail.
    pub fn load_documents(&self, paths: &[PathBuf]) -> (Vec<Document>, Vec<SkippedDocument>) {
        let mut documents = Vec::new();
        let mut skipped = Vec::new();

        for path in paths {
            match self.loader.load(path) {
                Ok(loaded) => {
                    debug!(path = %path.display(), units = loaded.len(), "document loaded");
                    documents.extend(loaded);
                }
                Err(error) => {
                    warn!(path = %path.display(), reason = %error, "skipped document");
                    skipped.push(SkippedDocument {
                        source: path.to_string_lossy().to_string(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        (documents, skipped)
    }

    pub fn chunk_documents(&self, documents: &[Document]) -> Result<Vec<Chunk>, IngestError> {
        let mut chunks = Vec::new();
        for document in documents {
            chunks.extend(chunk_document(document, self.chunking)?);
        }
        Ok(chunks)
    }

    /// Embeds all chunk texts in one provider call.
    pub async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = tokio::time::timeout(self.timeouts.embedding, self.embedder.embed(&texts))
            .await
            .map_err(|_| EmbeddingError::Timeout(self.timeouts.embedding))??;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        Ok(vectors)
    }

    /// Merges `records` into the persisted index as one batch under the
    /// writer lock. Returns the number of records written.
    pub async fn store(&self, records: Vec<VectorRecord>) -> Result<usize, IndexError> {
        let mut incoming = VectorIndex::new(self.index.dimension, self.index.metric);
        incoming.upsert(records)?;
        let stored = incoming.len();

        let settings = self.index.clone();
        let lock_wait = self.timeouts.lock;
        let write = tokio::task::spawn_blocking(move || {
            settings.update(lock_wait, |index| index.merge(&incoming))
        });

        tokio::time::timeout(self.timeouts.persistence, write)
            .await
            .map_err(|_| IndexError::Timeout(self.timeouts.persistence))?
            .map_err(|error| IndexError::Io(std::io::Error::other(error.to_string())))??;

        Ok(stored)
    }

    pub async fn run(&self, paths: &[PathBuf]) -> Result<IngestionReport, IngestError> {
        let inputs = expand_inputs(paths);
        if inputs.is_empty() {
            return Err(IngestError::InvalidArgument(
                "no input documents given".to_string(),
            ));
        }

        let (documents, skipped) = self.load_documents(&inputs);
        info!(
            stage = %IngestStage::Loaded,
            documents = documents.len(),
            skipped = skipped.len(),
            "ingestion stage"
        );
        if documents.is_empty() {
            return Err(IngestError::NoDocumentsLoaded {
                attempted: inputs.len(),
            });
        }

        let mut report = IngestionReport {
            loaded: documents.len(),
            skipped,
            ..IngestionReport::default()
        };

        let chunks = self.chunk_documents(&documents)?;
        report.chunked = chunks.len();
        info!(stage = %IngestStage::Chunked, chunks = chunks.len(), "ingestion stage");
        if chunks.is_empty() {
            warn!("documents produced no chunks, index left unchanged");
            return Ok(report);
        }

        let vectors = self.embed_chunks(&chunks).await?;
        report.embedded = vectors.len();
        info!(stage = %IngestStage::Embedded, vectors = vectors.len(), "ingestion stage");

        let records = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord::from_chunk(chunk, vector))
            .collect();
        report.stored = self.store(records).await?;
        info!(
            stage = %IngestStage::Stored,
            records = report.stored,
            index = %self.index.path.display(),
            "ingestion stage"
        );

        Ok(report)
    }
}
