//! Progressive data loading
//!
//! Structure first, enrichment later: a minimal skeleton of `(id, parent, order)`
//! records is fetched (or read from the local cache), laid out once, and then
//! only the nodes currently on screen are enriched with rich fields.

pub mod change_feed;
pub mod enrichment;
pub mod loader;
pub mod sources;

pub use change_feed::{ChangeEvent, ChangeFeedBuffer};
pub use enrichment::{EnrichmentBatch, EnrichmentSink};
pub use loader::{
    CompletionOutcome, EnrichmentRequest, LoadOutcome, LoadPhase, LoaderConfig, LoaderStats,
    ProgressiveLoader, StructureOrigin, TickReport,
};
pub use sources::{CachedStructure, EnrichmentSource, LocalCache, StructureSource, STRUCTURE_CACHE_KEY};

use crate::hierarchy::HierarchyError;

/// Errors raised by loading collaborators and the loader itself
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Network unreachable: {0}")]
    Network(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Remote returned no records")]
    EmptyResult,

    #[error("Local cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Hierarchy error: {0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("Enrichment flush failed: {0}")]
    Flush(String),
}

impl LoadError {
    /// Errors worth retrying by the caller
    pub fn is_transient(&self) -> bool {
        matches!(self, LoadError::Network(_) | LoadError::Server { .. })
    }
}

/// Result type for loading operations
pub type LoadResult<T> = Result<T, LoadError>;
