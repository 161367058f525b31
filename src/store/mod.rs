//! Fragment storage and nearest-neighbour retrieval.

pub mod index;
mod types;
mod vector_store;

pub use index::{FlatL2Index, IndexError, Neighbor};
pub use types::{Fragment, ScoredFragment, StoreCounts, StoreError};
pub use vector_store::{PreparedBatch, VectorStore};
