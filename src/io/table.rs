use crate::types::{MaturityError, MaturityResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

/// One row of the ecoregion by forest-type-group lookup table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratumRow {
    /// Stable row identifier; enumeration order is ascending id
    #[serde(alias = "ogc_fid")]
    pub id: u64,
    /// Region name, matched exactly against the region layer
    #[serde(alias = "ecoregion_", alias = "ecoregion")]
    pub region: String,
    /// Forest type group code in the categorical raster
    #[serde(alias = "dn")]
    pub class_value: i32,
}

/// Lookup table of strata, kept sorted by row id
#[derive(Debug, Clone, Default)]
pub struct StratumTable {
    rows: Vec<StratumRow>,
}

impl StratumTable {
    /// Build a table, rejecting duplicate row ids
    pub fn new(mut rows: Vec<StratumRow>) -> MaturityResult<Self> {
        let mut ids = HashSet::with_capacity(rows.len());
        for row in &rows {
            if !ids.insert(row.id) {
                return Err(MaturityError::InvalidFormat(format!(
                    "duplicate stratum row id {}",
                    row.id
                )));
            }
        }
        rows.sort_by_key(|row| row.id);
        Ok(Self { rows })
    }

    /// Parse a JSON array of rows
    pub fn from_json_str(json: &str) -> MaturityResult<Self> {
        let rows: Vec<StratumRow> = serde_json::from_str(json)?;
        Self::new(rows)
    }

    pub fn from_json_reader<R: Read>(reader: R) -> MaturityResult<Self> {
        let rows: Vec<StratumRow> = serde_json::from_reader(reader)?;
        Self::new(rows)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> MaturityResult<Self> {
        log::info!("Reading stratum table from: {}", path.as_ref().display());
        let file = std::fs::File::open(path.as_ref())?;
        let table = Self::from_json_reader(std::io::BufReader::new(file))?;
        log::debug!("Stratum table has {} rows", table.len());
        Ok(table)
    }

    /// Rows in ascending id order
    pub fn rows(&self) -> &[StratumRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
