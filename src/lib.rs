//! Viewport-culled, level-of-detail view engine for large hierarchies
//!
//! The engine answers "what is on screen and how much of it should be drawn"
//! for hierarchies of tens of thousands of nodes. Structure is loaded first and
//! laid out once; rich data streams in later for visible nodes only and never
//! moves anything.

pub mod config;
pub mod engine;
pub mod hierarchy;
pub mod infrastructure;
pub mod layout;
pub mod loading;
pub mod performance;
pub mod scheduling;
pub mod value_objects;

// Re-export configuration
pub use config::{ConfigError, ConfigResult, EngineConfig};

// Re-export the frame pipeline
pub use engine::{FrameOutput, HeroSummary, ViewEngine, VisibleNode};

// Re-export the node set
pub use hierarchy::{
    Connection, EnrichmentRecord, HierarchyError, HierarchyResult, HierarchySnapshot,
    HierarchyVersion, MergeReport, Node, NodeIndex, NodeStore, RichData, SharedHierarchy,
    StructuralHash, StructureRecord, TreeIndices,
};

// Re-export layout
pub use layout::{FixedLayout, LayeredTreeLayout, LayoutConfig, LayoutEngine, LayoutMemo};

// Re-export loading
pub use loading::{
    ChangeEvent, EnrichmentSource, LoadError, LoadPhase, LoadResult, LocalCache,
    ProgressiveLoader, StructureSource,
};

// Re-export per-frame types
pub use performance::{
    ConnectionStyle, DetailTier, FrameStats, PathBatch, PathCommand, PathSegment, SpatialIndex,
    Viewport,
};

// Re-export scheduling
pub use scheduling::{Clock, ManualClock, SystemClock};

// Re-export value objects
pub use value_objects::{NodeId, NodeSize, Position2D, WorldRect};
