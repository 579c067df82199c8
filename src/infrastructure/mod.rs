//! Infrastructure layer implementations
//!
//! In-memory implementations of the loading collaborators. They back the demo,
//! the report binary and the tests, and can be scripted to fail.

mod in_memory_cache;
mod static_sources;

pub use in_memory_cache::InMemoryLocalCache;
pub use static_sources::{FailureMode, StaticEnrichmentSource, StaticStructureSource};
