//! rollcall-core — Identity matching over face embeddings.
//!
//! Embeddings come from an external extraction library; this crate only
//! compares them. Brute-force nearest-neighbor is deliberate: galleries
//! are classroom-sized (hundreds of entries), and the [`Matcher`] trait
//! leaves room for an approximate index later.

pub mod extractor;
pub mod matcher;
pub mod types;

pub use extractor::{EmbeddingExtractor, ExtractorError, JsonEmbeddingExtractor};
pub use matcher::{MatchOutcome, Matcher, NearestMatcher};
pub use types::{Embedding, GalleryEntry};
