use crate::config::RowWindow;
use crate::io::{RegionSource, StratumProvider, StratumTable};
use crate::types::MaturityResult;
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One (region, forest type group) stratum
#[derive(Debug, Clone)]
pub struct StratumDefinition {
    /// Enumeration order; lower indices win mosaic ties
    pub index: usize,
    /// Stable identifier of the originating table row
    pub row_id: u64,
    pub region_name: String,
    /// Region polygon in the reference frame
    pub region: Arc<MultiPolygon<f64>>,
    /// Forest type group code selected from the categorical raster
    pub class_value: i32,
}

impl StratumDefinition {
    pub fn label(&self) -> String {
        format!("#{} {} / {}", self.row_id, self.region_name, self.class_value)
    }
}

/// Table row that could not become a stratum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum CatalogIssue {
    #[error("row {row_id}: region '{region}' matches no polygon")]
    UnresolvedRegion { row_id: u64, region: String },

    #[error("row {row_id}: region '{region}' matches {matches} polygons")]
    AmbiguousRegion {
        row_id: u64,
        region: String,
        matches: usize,
    },
}

/// Strata in enumeration order plus the rows that were skipped
#[derive(Debug, Clone, Default)]
pub struct StratumListing {
    pub strata: Vec<StratumDefinition>,
    pub issues: Vec<CatalogIssue>,
}

/// Resolves lookup table rows against a region layer
pub struct StratumCatalog<R: RegionSource> {
    table: StratumTable,
    regions: R,
    window: RowWindow,
}

impl<R: RegionSource> StratumCatalog<R> {
    pub fn new(table: StratumTable, regions: R) -> Self {
        Self {
            table,
            regions,
            window: RowWindow::default(),
        }
    }

    /// Restrict enumeration to a positional slice of the sorted table
    pub fn with_window(mut self, window: RowWindow) -> Self {
        self.window = window;
        self
    }

    pub fn table(&self) -> &StratumTable {
        &self.table
    }

    /// Enumerate strata by ascending row id.
    ///
    /// Indices are positions in the full sorted table, so a windowed run
    /// assigns the same index to a row as a complete run would.
    pub fn enumerate_strata(&self) -> StratumListing {
        let range = self.window.bounds(self.table.len());
        log::info!(
            "Enumerating strata from table rows {}..{} of {}",
            range.start,
            range.end,
            self.table.len()
        );

        let mut listing = StratumListing::default();
        for (index, row) in self.table.rows().iter().enumerate().skip(range.start).take(range.len()) {
            let mut matches = self.regions.find_regions(&row.region);
            match matches.len() {
                1 => {
                    let region = matches.remove(0);
                    listing.strata.push(StratumDefinition {
                        index,
                        row_id: row.id,
                        region_name: row.region.clone(),
                        region,
                        class_value: row.class_value,
                    });
                }
                0 => {
                    let issue = CatalogIssue::UnresolvedRegion {
                        row_id: row.id,
                        region: row.region.clone(),
                    };
                    log::warn!("Skipping stratum: {}", issue);
                    listing.issues.push(issue);
                }
                n => {
                    let issue = CatalogIssue::AmbiguousRegion {
                        row_id: row.id,
                        region: row.region.clone(),
                        matches: n,
                    };
                    log::warn!("Skipping stratum: {}", issue);
                    listing.issues.push(issue);
                }
            }
        }

        log::info!(
            "Resolved {} strata, skipped {} rows",
            listing.strata.len(),
            listing.issues.len()
        );
        listing
    }
}

impl<R: RegionSource> StratumProvider for StratumCatalog<R> {
    fn strata(&self) -> MaturityResult<StratumListing> {
        Ok(self.enumerate_strata())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{RegionLayer, StratumRow};
    use geo::polygon;

    fn table() -> StratumTable {
        StratumTable::new(vec![
            StratumRow { id: 30, region: "Cascades".to_string(), class_value: 260 },
            StratumRow { id: 10, region: "Cascades".to_string(), class_value: 200 },
            StratumRow { id: 20, region: "Klamath Mountains".to_string(), class_value: 200 },
            StratumRow { id: 40, region: "Atlantis".to_string(), class_value: 100 },
            StratumRow { id: 50, region: "Coast Range".to_string(), class_value: 300 },
        ])
        .unwrap()
    }

    fn regions() -> RegionLayer {
        let unit = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
        RegionLayer::new()
            .with_region("Cascades", unit.clone())
            .with_region("Klamath Mountains", unit.clone())
            .with_region("Coast Range", unit.clone())
            .with_region("Coast Range", unit)
    }

    #[test]
    fn test_enumeration_order_and_issues() {
        let listing = StratumCatalog::new(table(), regions()).enumerate_strata();

        let ids: Vec<u64> = listing.strata.iter().map(|s| s.row_id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
        let indices: Vec<usize> = listing.strata.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);

        assert_eq!(
            listing.issues,
            vec![
                CatalogIssue::UnresolvedRegion { row_id: 40, region: "Atlantis".to_string() },
                CatalogIssue::AmbiguousRegion {
                    row_id: 50,
                    region: "Coast Range".to_string(),
                    matches: 2
                },
            ]
        );
    }

    #[test]
    fn test_window_keeps_global_indices() {
        let listing = StratumCatalog::new(table(), regions())
            .with_window(RowWindow::new(1, Some(3)))
            .enumerate_strata();

        let pairs: Vec<(usize, u64)> = listing.strata.iter().map(|s| (s.index, s.row_id)).collect();
        assert_eq!(pairs, vec![(1, 20), (2, 30)]);
        assert!(listing.issues.is_empty());
    }
}
