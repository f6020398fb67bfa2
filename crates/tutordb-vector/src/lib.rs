//! LanceDB persistence for the curriculum index.
//!
//! [`LanceIndexStore`] implements the core `IndexStore` seam over four Lance
//! tables; [`CachedEmbedder`] keeps document embeddings in a fifth so
//! unchanged text is never re-embedded.

pub mod cache;
pub mod schema;
pub mod store;
pub mod table;

pub use cache::{CachedEmbedder, EmbeddingCache};
pub use store::{LanceIndexStore, DEFAULT_COMPACTION_GRACE};
