use crate::error::EmbeddingError;
use crate::traits::Embedder;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

pub const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";

/// Offline embedder hashing character trigrams into buckets.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Client for a remote model server speaking the `/embeddings` JSON shape
/// (`{model, input}` in, `{data: [{index, embedding}]}` out).
pub struct HttpEmbedder {
    url: Url,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
    timeout: Duration,
    client: Client,
}

impl HttpEmbedder {
    pub fn new(config: HttpEmbedderConfig) -> Result<Self, EmbeddingError> {
        let base = if config.endpoint.ends_with('/') {
            config.endpoint
        } else {
            format!("{}/", config.endpoint)
        };
        let url = Url::parse(&base)?.join("embeddings")?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            url,
            model: config.model,
            api_key: config.api_key,
            dimensions: config.dimensions,
            timeout: config.timeout,
            client,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(self.url.clone()).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                EmbeddingError::Timeout(self.timeout)
            } else {
                EmbeddingError::Http(error)
            }
        })?;

        if !response.status().is_success() {
            return Err(EmbeddingError::Request(format!(
                "embedding request to {} returned {}",
                self.url,
                response.status()
            )));
        }

        let payload: EmbeddingResponse = response.json().await?;
        order_embeddings(payload, texts.len(), self.dimensions)
    }
}

/// The embedder selected from configuration.
pub enum EmbeddingProvider {
    Ngram(CharacterNgramEmbedder),
    Http(HttpEmbedder),
}

impl EmbeddingProvider {
    pub fn describe(&self) -> String {
        match self {
            EmbeddingProvider::Ngram(embedder) => {
                format!("character-ngram ({} dims)", embedder.dimensions())
            }
            EmbeddingProvider::Http(embedder) => {
                format!("{} at {} ({} dims)", embedder.model, embedder.url, embedder.dimensions)
            }
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingProvider {
    fn dimensions(&self) -> usize {
        match self {
            EmbeddingProvider::Ngram(embedder) => Embedder::dimensions(embedder),
            EmbeddingProvider::Http(embedder) => embedder.dimensions(),
        }
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match self {
            EmbeddingProvider::Ngram(embedder) => embedder.embed(texts).await,
            EmbeddingProvider::Http(embedder) => embedder.embed(texts).await,
        }
    }
}

/// Places each item at its `index` (or its position when the server omits
/// it). Every slot in `0..expected` must be filled exactly once.
fn order_embeddings(
    payload: EmbeddingResponse,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if payload.data.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            actual: payload.data.len(),
        });
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for (position, item) in payload.data.into_iter().enumerate() {
        let index = item.index.unwrap_or(position);
        if item.embedding.len() != dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimensions,
                actual: item.embedding.len(),
            });
        }

        let slot = slots.get_mut(index).ok_or_else(|| {
            EmbeddingError::Request(format!(
                "embedding index {index} out of range for {expected} inputs"
            ))
        })?;
        if slot.is_some() {
            return Err(EmbeddingError::Request(format!(
                "duplicate embedding index {index}"
            )));
        }
        *slot = Some(item.embedding);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| EmbeddingError::Request(format!("missing embedding index {index}")))
        })
        .collect()
}
