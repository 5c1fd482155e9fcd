//! Vector index subsystem for conversation records.
//!
//! # Architecture
//!
//! - `embeddings`: pluggable text to unit-vector transform
//! - `index`: `VectorStore` seam and the `IndexClient` wrapper
//! - `memory` / `qdrant`: local and remote vector stores
//! - `storage`: binary file I/O for vectors.bin persistence
//! - `preprocess`: embedding input and content hash
//! - `sync`: keeps points in line with record feedback and edits
//! - `queue`: per-id ordered, retrying dispatch of sync events
//! - `search`: similarity search with payload filters
//! - `seeder`: bulk rebuild and repair

pub mod embeddings;
pub mod index;
pub mod memory;
pub mod preprocess;
pub mod qdrant;
pub mod queue;
pub mod search;
pub mod seeder;
pub mod storage;
pub mod sync;

pub use embeddings::{build_embedder, Embedder};
pub use index::{IndexClient, IndexError, VectorStore};
pub use memory::MemoryStore;
pub use qdrant::QdrantStore;
pub use queue::{SyncEvent, SyncQueue};
pub use search::{ConversationSummary, SearchError, SearchFilters, SimilaritySearch};
pub use seeder::{BulkSeeder, SeedMode, SeedOptions};
pub use sync::{IndexSynchronizer, SyncError, SyncOutcome};

/// File name of the local vector collection
pub const VECTORS_FILE: &str = "vectors.bin";
