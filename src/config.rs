//! Run configuration

use crate::types::{MaturityError, MaturityResult, Metric};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Grid alignment parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentParams {
    /// Upper bound on source pixels aggregated into one reference pixel
    pub max_pixels_per_cell: usize,
}

impl Default for AlignmentParams {
    fn default() -> Self {
        Self {
            max_pixels_per_cell: 65_535,
        }
    }
}

/// Positional slice `[start, end)` over the id-sorted stratum table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowWindow {
    pub start: usize,
    /// Exclusive end position; `None` runs to the end of the table
    pub end: Option<usize>,
}

impl RowWindow {
    pub fn new(start: usize, end: Option<usize>) -> Self {
        Self { start, end }
    }

    /// Range of positions selected from a table of `len` rows
    pub fn bounds(&self, len: usize) -> std::ops::Range<usize> {
        let end = self.end.unwrap_or(len).min(len);
        let start = self.start.min(end);
        start..end
    }
}

/// Complete configuration of a maturity run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaturityConfig {
    /// Percentiles bounding the ordinal bands; must start at 0 and end at 100
    pub percentiles: Vec<f64>,
    /// Metrics summed into the composite score
    pub metrics: Vec<Metric>,
    /// Output value for cells without a contributing stratum
    pub output_nodata: u8,
    /// Classify strata on the rayon pool
    pub parallel: bool,
    /// Subset of the stratum table to process
    pub row_window: RowWindow,
    pub alignment: AlignmentParams,
}

impl Default for MaturityConfig {
    fn default() -> Self {
        Self {
            percentiles: vec![0.0, 25.0, 50.0, 75.0, 100.0],
            metrics: Metric::ALL.to_vec(),
            output_nodata: 0,
            parallel: true,
            row_window: RowWindow::default(),
            alignment: AlignmentParams::default(),
        }
    }
}

impl MaturityConfig {
    pub fn from_json_str(json: &str) -> MaturityResult<Self> {
        let config: MaturityConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> MaturityResult<Self> {
        log::info!("Reading configuration from: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Number of ordinal bands per metric
    pub fn band_count(&self) -> usize {
        self.percentiles.len().saturating_sub(1)
    }

    /// Lowest and highest possible composite score
    pub fn score_range(&self) -> (u8, u8) {
        let metrics = self.metrics.len();
        let low = metrics.min(u8::MAX as usize) as u8;
        let high = (metrics * self.band_count()).min(u8::MAX as usize) as u8;
        (low, high)
    }

    pub fn validate(&self) -> MaturityResult<()> {
        if self.percentiles.len() < 2 {
            return Err(MaturityError::Config(
                "at least two percentiles are required".to_string(),
            ));
        }
        if self.percentiles.first() != Some(&0.0) || self.percentiles.last() != Some(&100.0) {
            return Err(MaturityError::Config(format!(
                "percentiles must run from 0 to 100, got {:?}",
                self.percentiles
            )));
        }
        if self.percentiles.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(MaturityError::Config(format!(
                "percentiles must be strictly increasing, got {:?}",
                self.percentiles
            )));
        }

        if self.metrics.is_empty() {
            return Err(MaturityError::Config("no metrics configured".to_string()));
        }
        let mut seen = self.metrics.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != self.metrics.len() {
            return Err(MaturityError::Config(format!(
                "duplicate metrics in {:?}",
                self.metrics
            )));
        }

        let max_score = self.metrics.len() * self.band_count();
        if max_score > u8::MAX as usize {
            return Err(MaturityError::Config(format!(
                "maximum composite score {} does not fit in a byte",
                max_score
            )));
        }
        let (low, high) = self.score_range();
        if (low..=high).contains(&self.output_nodata) {
            return Err(MaturityError::Config(format!(
                "nodata value {} collides with score range {}..={}",
                self.output_nodata, low, high
            )));
        }

        if let Some(end) = self.row_window.end {
            if end < self.row_window.start {
                return Err(MaturityError::Config(format!(
                    "row window end {} precedes start {}",
                    end, self.row_window.start
                )));
            }
        }

        if self.alignment.max_pixels_per_cell == 0 {
            return Err(MaturityError::Config(
                "max_pixels_per_cell must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
