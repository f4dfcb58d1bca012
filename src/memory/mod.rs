//! Cross-stage memory.
//!
//! - [`StructuredStore`]: authoritative key/value store of stage outputs
//! - [`SemanticMemory`]: best-effort similarity recall over stage notes

pub mod semantic;
pub mod store;

pub use semantic::{
    cosine_similarity, Embedder, HashEmbedder, Note, SemanticMemory, DEFAULT_MAX_NOTES, NOTES_FILE,
};
pub use store::{StoreError, StructuredStore, STORE_FILE};
