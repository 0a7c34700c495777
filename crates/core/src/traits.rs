use crate::error::{EmbeddingError, LoadError};
use crate::models::Document;
use async_trait::async_trait;
use std::path::Path;

/// Maps texts to vectors of a fixed dimension, preserving input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

pub trait DocumentLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Vec<Document>, LoadError>;
}
