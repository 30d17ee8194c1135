use crate::core::catalog::{StratumDefinition, StratumListing};
use crate::core::pipeline::RunDiagnostics;
use crate::types::{GridSpec, MaturityError, MaturityResult, Metric, OutputRaster, Raster};
use geo::MultiPolygon;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Source of metric rasters already aligned to one reference grid
pub trait MetricProvider {
    fn reference_grid(&self) -> &GridSpec;

    fn metric(&self, metric: Metric) -> Option<&Raster<f32>>;

    /// Categorical forest type group raster
    fn forest_type(&self) -> Option<&Raster<i32>>;
}

/// Ordered stratum definitions
pub trait StratumProvider {
    /// Strata sorted by enumeration index, with any rows that were skipped
    fn strata(&self) -> MaturityResult<StratumListing>;
}

/// Named region polygons, e.g. level III ecoregions
pub trait RegionSource {
    /// All geometries whose name matches exactly
    fn find_regions(&self, name: &str) -> Vec<Arc<MultiPolygon<f64>>>;
}

/// Destination for the finished output raster
pub trait RasterSink {
    fn write(&mut self, output: &OutputRaster, diagnostics: &RunDiagnostics) -> MaturityResult<()>;
}

/// In-memory aligned layer stack
#[derive(Debug, Clone)]
pub struct AlignedMetrics {
    grid: GridSpec,
    metrics: BTreeMap<Metric, Raster<f32>>,
    forest_type: Option<Raster<i32>>,
}

impl AlignedMetrics {
    pub fn new(grid: GridSpec) -> Self {
        Self {
            grid,
            metrics: BTreeMap::new(),
            forest_type: None,
        }
    }

    pub fn with_metric(mut self, metric: Metric, raster: Raster<f32>) -> Self {
        self.metrics.insert(metric, raster);
        self
    }

    pub fn with_forest_type(mut self, raster: Raster<i32>) -> Self {
        self.forest_type = Some(raster);
        self
    }

    pub fn insert_metric(&mut self, metric: Metric, raster: Raster<f32>) {
        self.metrics.insert(metric, raster);
    }

    pub fn set_forest_type(&mut self, raster: Raster<i32>) {
        self.forest_type = Some(raster);
    }
}

impl MetricProvider for AlignedMetrics {
    fn reference_grid(&self) -> &GridSpec {
        &self.grid
    }

    fn metric(&self, metric: Metric) -> Option<&Raster<f32>> {
        self.metrics.get(&metric)
    }

    fn forest_type(&self) -> Option<&Raster<i32>> {
        self.forest_type.as_ref()
    }
}

/// Named region geometry
#[derive(Debug, Clone)]
pub struct NamedRegion {
    pub name: String,
    pub geometry: Arc<MultiPolygon<f64>>,
}

/// In-memory region layer
#[derive(Debug, Clone, Default)]
pub struct RegionLayer {
    regions: Vec<NamedRegion>,
}

impl RegionLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<G: Into<MultiPolygon<f64>>>(&mut self, name: &str, geometry: G) {
        self.regions.push(NamedRegion {
            name: name.to_string(),
            geometry: Arc::new(geometry.into()),
        });
    }

    pub fn with_region<G: Into<MultiPolygon<f64>>>(mut self, name: &str, geometry: G) -> Self {
        self.add(name, geometry);
        self
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl RegionSource for RegionLayer {
    fn find_regions(&self, name: &str) -> Vec<Arc<MultiPolygon<f64>>> {
        self.regions
            .iter()
            .filter(|region| region.name == name)
            .map(|region| Arc::clone(&region.geometry))
            .collect()
    }
}

impl StratumProvider for Vec<StratumDefinition> {
    fn strata(&self) -> MaturityResult<StratumListing> {
        let mut strata = self.clone();
        strata.sort_by_key(|s| s.index);
        if strata.windows(2).any(|w| w[0].index == w[1].index) {
            return Err(MaturityError::InvalidFormat(
                "stratum enumeration indices must be unique".to_string(),
            ));
        }
        Ok(StratumListing {
            strata,
            issues: Vec::new(),
        })
    }
}

/// Sink that keeps the last written output in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub output: Option<OutputRaster>,
    pub diagnostics: Option<RunDiagnostics>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RasterSink for MemorySink {
    fn write(&mut self, output: &OutputRaster, diagnostics: &RunDiagnostics) -> MaturityResult<()> {
        log::debug!(
            "Memory sink received {}x{} output with {} covered cells",
            output.grid.rows,
            output.grid.cols,
            output.covered_cells()
        );
        self.output = Some(output.clone());
        self.diagnostics = Some(diagnostics.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Polygon};

    fn square(x0: f64, y0: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
        ]
    }

    #[test]
    fn test_region_lookup_is_exact() {
        let layer = RegionLayer::new()
            .with_region("Cascades", square(0.0, 0.0, 1.0))
            .with_region("North Cascades", square(1.0, 0.0, 1.0))
            .with_region("Cascades", square(2.0, 0.0, 1.0));

        assert_eq!(layer.find_regions("Cascades").len(), 2);
        assert_eq!(layer.find_regions("North Cascades").len(), 1);
        assert!(layer.find_regions("cascades").is_empty());
    }
}
