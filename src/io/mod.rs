//! Collaborator seams: layer providers, the stratum lookup table and sinks

pub mod providers;
pub mod table;

pub use providers::{
    AlignedMetrics, MemorySink, MetricProvider, NamedRegion, RasterSink, RegionLayer,
    RegionSource, StratumProvider,
};
pub use table::{StratumRow, StratumTable};
