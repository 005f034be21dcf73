use thiserror::Error;

use crate::types::Embedding;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("malformed probe payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("extraction backend failed: {0}")]
    Backend(String),
}

/// External collaborator seam: turns raw image bytes into face
/// embeddings. An empty result means "no face detected", which callers
/// must keep distinct from "no match".
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(&self, image: &[u8]) -> Result<Vec<Embedding>, ExtractorError>;
}

/// Extractor for callers whose upstream pipeline already produced
/// vectors: the payload is a JSON array of float arrays, one per
/// detected face. Used by the CLI and tests.
pub struct JsonEmbeddingExtractor;

impl EmbeddingExtractor for JsonEmbeddingExtractor {
    fn extract(&self, image: &[u8]) -> Result<Vec<Embedding>, ExtractorError> {
        let vectors: Vec<Vec<f32>> = serde_json::from_slice(image)?;
        Ok(vectors.into_iter().map(Embedding::new).collect())
    }
}
