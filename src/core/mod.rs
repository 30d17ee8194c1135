//! Core maturity processing modules

pub mod align;
pub mod catalog;
pub mod classify;
pub mod mosaic;
pub mod percentile;
pub mod pipeline;

// Re-export main types
pub use align::{FrameTransform, GridAligner, IdentityTransform, Reducer, SourceStack};
pub use catalog::{CatalogIssue, StratumCatalog, StratumDefinition, StratumListing};
pub use classify::{
    ClassifiedLayer, ClassifierInputs, CompositeScoreLayer, EmptyReason, StratumClassification,
    StratumClassifier, StratumOutcome,
};
pub use mosaic::{MosaicAccumulator, MosaicCombiner, MosaicOutput, MosaicStats};
pub use percentile::PercentileBreakpoints;
pub use pipeline::{EmptyStratum, MaturityPipeline, MaturityRun, RunDiagnostics, StratumCoverage};
