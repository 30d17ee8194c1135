use crate::core::classify::CompositeScoreLayer;
use crate::types::{GridSpec, MaturityError, MaturityResult, OutputRaster};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Tally of one score value at one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Vote {
    value: u8,
    count: u32,
    /// Lowest enumeration index among the strata that voted for `value`
    lowest_index: usize,
}

/// Mergeable per-cell vote counts over the output grid
///
/// Votes are only resolved in `finalize`, so the result depends on the set
/// of contributed layers and not on the order they were added or merged.
#[derive(Debug, Clone)]
pub struct MosaicAccumulator {
    grid: GridSpec,
    /// Tallies keyed by row-major cell index; untouched cells hold nothing
    votes: HashMap<usize, Vec<Vote>>,
    contributors: BTreeSet<usize>,
}

/// Summary of a finalized mosaic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MosaicStats {
    /// Strata that contributed at least one cell
    pub contributors: usize,
    pub covered_cells: usize,
    /// Cells that received values from more than one stratum
    pub conflict_cells: usize,
    /// Cells where several values shared the highest count
    pub tie_break_cells: usize,
}

/// Finalized mosaic and its statistics
#[derive(Debug, Clone)]
pub struct MosaicOutput {
    pub raster: OutputRaster,
    pub stats: MosaicStats,
}

impl MosaicAccumulator {
    pub fn new(grid: GridSpec) -> Self {
        Self {
            grid,
            votes: HashMap::new(),
            contributors: BTreeSet::new(),
        }
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn contributors(&self) -> usize {
        self.contributors.len()
    }

    /// Cells that have received at least one vote
    pub fn tallied_cells(&self) -> usize {
        self.votes.len()
    }

    /// Fold one stratum's composite layer in.
    ///
    /// Returns `false` if a layer from the same stratum was already folded.
    pub fn add(&mut self, layer: &CompositeScoreLayer) -> MaturityResult<bool> {
        if self.contributors.contains(&layer.stratum_index) {
            log::warn!(
                "Stratum {} (row {}) already contributed to the mosaic; ignoring repeat",
                layer.stratum_index,
                layer.row_id
            );
            return Ok(false);
        }

        let scores = &layer.scores;
        if !self.grid.is_aligned_with(&scores.grid) {
            return Err(MaturityError::Alignment(format!(
                "composite layer of stratum {} is not aligned with the mosaic grid",
                layer.stratum_index
            )));
        }
        let (row_off, col_off) = self.grid.pixel_offset_of(&scores.grid).ok_or_else(|| {
            MaturityError::Alignment(format!(
                "composite layer of stratum {} has no whole-pixel offset",
                layer.stratum_index
            ))
        })?;

        let cols = self.grid.cols as isize;
        let rows = self.grid.rows as isize;
        for ((r, c), &valid) in scores.valid.indexed_iter() {
            if !valid {
                continue;
            }
            let (row, col) = (row_off + r as isize, col_off + c as isize);
            if row < 0 || col < 0 || row >= rows || col >= cols {
                continue;
            }
            let cell = self.votes.entry((row * cols + col) as usize).or_default();
            cast_vote(cell, scores.data[[r, c]], 1, layer.stratum_index);
        }

        self.contributors.insert(layer.stratum_index);
        Ok(true)
    }

    /// Combine two partial mosaics built from disjoint sets of strata
    pub fn merge(mut self, other: MosaicAccumulator) -> MaturityResult<Self> {
        if !self.grid.same_grid(&other.grid) {
            return Err(MaturityError::Alignment(
                "partial mosaics cover different grids".to_string(),
            ));
        }
        if let Some(index) = self.contributors.intersection(&other.contributors).next() {
            return Err(MaturityError::Processing(format!(
                "stratum {} was folded into both partial mosaics",
                index
            )));
        }

        for (index, theirs) in other.votes {
            let mine = self.votes.entry(index).or_default();
            for vote in theirs {
                cast_vote(mine, vote.value, vote.count, vote.lowest_index);
            }
        }
        self.contributors.extend(other.contributors);
        Ok(self)
    }

    /// Resolve every cell to its modal value.
    ///
    /// Ties go to the value whose contributing strata include the lowest
    /// enumeration index.
    pub fn finalize(self, nodata: u8, score_range: (u8, u8)) -> MosaicOutput {
        let mut raster = OutputRaster::empty(self.grid, nodata, score_range);
        let mut stats = MosaicStats {
            contributors: self.contributors.len(),
            ..MosaicStats::default()
        };

        let cols = raster.grid.cols;
        for (&i, cell) in &self.votes {
            let Some(winner) = cell
                .iter()
                .max_by(|a, b| a.count.cmp(&b.count).then(b.lowest_index.cmp(&a.lowest_index)))
            else {
                continue;
            };

            stats.covered_cells += 1;
            if cell.iter().map(|v| v.count).sum::<u32>() > 1 {
                stats.conflict_cells += 1;
            }
            if cell.iter().filter(|v| v.count == winner.count).count() > 1 {
                stats.tie_break_cells += 1;
            }
            raster.data[[i / cols, i % cols]] = winner.value;
        }

        log::info!(
            "Mosaic finalized: {} strata, {} covered cells, {} conflicts, {} tie-breaks",
            stats.contributors,
            stats.covered_cells,
            stats.conflict_cells,
            stats.tie_break_cells
        );

        MosaicOutput { raster, stats }
    }
}

fn cast_vote(cell: &mut Vec<Vote>, value: u8, count: u32, index: usize) {
    match cell.iter_mut().find(|v| v.value == value) {
        Some(vote) => {
            vote.count += count;
            vote.lowest_index = vote.lowest_index.min(index);
        }
        None => cell.push(Vote {
            value,
            count,
            lowest_index: index,
        }),
    }
}

/// Merges per-stratum composite layers into the output raster
#[derive(Debug, Clone)]
pub struct MosaicCombiner {
    grid: GridSpec,
    nodata: u8,
    score_range: (u8, u8),
}

impl MosaicCombiner {
    pub fn new(grid: GridSpec, nodata: u8, score_range: (u8, u8)) -> Self {
        Self {
            grid,
            nodata,
            score_range,
        }
    }

    pub fn accumulator(&self) -> MosaicAccumulator {
        MosaicAccumulator::new(self.grid.clone())
    }

    /// Modal combination of all layers
    pub fn combine<'a, I>(&self, layers: I) -> MaturityResult<MosaicOutput>
    where
        I: IntoIterator<Item = &'a CompositeScoreLayer>,
    {
        let mut acc = self.accumulator();
        for layer in layers {
            acc.add(layer)?;
        }
        Ok(self.finish(acc))
    }

    pub fn finish(&self, acc: MosaicAccumulator) -> MosaicOutput {
        acc.finalize(self.nodata, self.score_range)
    }
}
