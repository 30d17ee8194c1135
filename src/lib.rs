//! forest-maturity: stratified percentile classification of forest structure
//!
//! Cover, height and biomass rasters are aligned onto one reference grid,
//! split into (ecoregion, forest type group) strata, ranked into quartile
//! bands within each stratum and summed into a composite maturity score.
//! Per-stratum scores are merged into a single raster by taking the most
//! frequent value per cell.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use crate::config::{AlignmentParams, MaturityConfig, RowWindow};
pub use crate::core::{
    CompositeScoreLayer, GridAligner, MaturityPipeline, MaturityRun, MosaicCombiner,
    PercentileBreakpoints, RunDiagnostics, StratumCatalog, StratumClassifier, StratumDefinition,
};
pub use crate::io::{AlignedMetrics, MemorySink, MetricProvider, RasterSink, RegionLayer, StratumProvider, StratumTable};
pub use crate::types::{
    BoundingBox, CoordinateSystem, GeoTransform, GridSpec, MaturityError, MaturityResult, Metric, OutputRaster,
    Raster, Window,
};
