//! Retrieval layer: embedding providers, the per-course vector index backed
//! by sqlite-vec, PDF paragraph extraction, and the retrieval service that
//! ties them together for the generation pipeline.

pub mod embedding;
pub mod index;
pub mod pdf;
pub mod retrieval;

pub use embedding::{EmbeddingProvider, EmbeddingResult, HashEmbeddingProvider, HttpEmbeddingProvider};
pub use index::{Passage, VectorIndex};
pub use pdf::{extract_structured_content, split_paragraphs, ExtractedContent, Paragraph};
pub use retrieval::{DocumentSource, RetrievalService};
