//! Strict percentile breakpoints and ordinal band assignment
//!
//! Percentiles use the nearest-rank definition over the sorted population:
//! the p-th percentile is the value at rank `ceil(p / 100 * n)`, so the 0th
//! percentile is the population minimum and the 100th is the maximum.
//!
//! Bands are half-open intervals `[b(k-1), b(k))` numbered from 1, except the
//! top band which is closed so the maximum is included. A value equal to a
//! breakpoint belongs to the band that breakpoint opens, which still holds
//! when several breakpoints coincide.

use serde::{Deserialize, Serialize};

/// Breakpoint values of one metric within one stratum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileBreakpoints {
    percentiles: Vec<f64>,
    values: Vec<f32>,
}

impl PercentileBreakpoints {
    /// Breakpoints of a population; `None` if it holds no finite value.
    ///
    /// `percentiles` must be increasing and start at 0 and end at 100.
    pub fn compute(population: &[f32], percentiles: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f32> = population.iter().copied().filter(|v| !v.is_nan()).collect();
        if sorted.is_empty() || percentiles.len() < 2 {
            return None;
        }
        sorted.sort_unstable_by(f32::total_cmp);

        let values = percentiles
            .iter()
            .map(|&p| sorted[nearest_rank(p, sorted.len()) - 1])
            .collect();

        Some(Self {
            percentiles: percentiles.to_vec(),
            values,
        })
    }

    /// Breakpoints from known values, e.g. to reproduce a reference run
    pub fn from_values(percentiles: Vec<f64>, values: Vec<f32>) -> Option<Self> {
        if values.len() != percentiles.len()
            || values.len() < 2
            || values.windows(2).any(|w| !(w[0] <= w[1]))
        {
            return None;
        }
        Some(Self { percentiles, values })
    }

    pub fn percentiles(&self) -> &[f64] {
        &self.percentiles
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn min(&self) -> f32 {
        self.values[0]
    }

    pub fn max(&self) -> f32 {
        self.values[self.values.len() - 1]
    }

    pub fn band_count(&self) -> usize {
        self.values.len() - 1
    }

    /// Population is a single repeated value
    pub fn is_degenerate(&self) -> bool {
        self.min() == self.max()
    }

    /// Ordinal band (1-based) of a value, `None` outside `[min, max]`
    pub fn band(&self, value: f32) -> Option<u8> {
        if value.is_nan() || value < self.min() || value > self.max() {
            return None;
        }
        let interior = &self.values[1..self.values.len() - 1];
        let opened = interior.partition_point(|&bp| bp <= value);
        Some((opened + 1) as u8)
    }
}

/// 1-based nearest rank of percentile `p` in a population of `n`
fn nearest_rank(p: f64, n: usize) -> usize {
    // p * n is exact for integral percentiles, so an integral rank stays integral
    let rank = (p * n as f64 / 100.0).ceil() as usize;
    rank.clamp(1, n)
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUARTILES: [f64; 5] = [0.0, 25.0, 50.0, 75.0, 100.0];

    #[test]
    fn test_nearest_rank_quartiles() {
        let population: Vec<f32> = (1..=8).map(|v| v as f32).collect();
        let bp = PercentileBreakpoints::compute(&population, &QUARTILES).unwrap();
        assert_eq!(bp.values(), &[1.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_order_of_population_does_not_matter() {
        let a = [5.0f32, 1.0, 9.0, 3.0, 7.0];
        let b = [9.0f32, 7.0, 5.0, 3.0, 1.0];
        assert_eq!(
            PercentileBreakpoints::compute(&a, &QUARTILES),
            PercentileBreakpoints::compute(&b, &QUARTILES)
        );
    }

    #[test]
    fn test_empty_population() {
        assert!(PercentileBreakpoints::compute(&[], &QUARTILES).is_none());
        assert!(PercentileBreakpoints::compute(&[f32::NAN], &QUARTILES).is_none());
    }

    #[test]
    fn test_band_edges_are_half_open() {
        let bp = PercentileBreakpoints::from_values(QUARTILES.to_vec(), vec![0.0, 10.0, 20.0, 30.0, 40.0]).unwrap();
        assert_eq!(bp.band(0.0), Some(1));
        assert_eq!(bp.band(9.99), Some(1));
        assert_eq!(bp.band(10.0), Some(2));
        assert_eq!(bp.band(20.0), Some(3));
        assert_eq!(bp.band(30.0), Some(4));
        assert_eq!(bp.band(40.0), Some(4));
        assert_eq!(bp.band(-0.1), None);
        assert_eq!(bp.band(40.1), None);
        assert_eq!(bp.band(f32::NAN), None);
    }

    #[test]
    fn test_coinciding_breakpoints_skip_empty_band() {
        // p25 == p50: band 2 is empty and the shared value opens band 3
        let bp = PercentileBreakpoints::from_values(QUARTILES.to_vec(), vec![0.0, 5.0, 5.0, 8.0, 10.0]).unwrap();
        assert_eq!(bp.band(4.0), Some(1));
        assert_eq!(bp.band(5.0), Some(3));
        assert_eq!(bp.band(7.0), Some(3));
    }

    #[test]
    fn test_collapsed_lowest_band() {
        // p0 == p25: the minimum opens band 2
        let population = [1.0f32, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let bp = PercentileBreakpoints::compute(&population, &QUARTILES).unwrap();
        assert_eq!(bp.values(), &[1.0, 1.0, 3.0, 5.0, 7.0]);
        assert_eq!(bp.band(bp.min()), Some(2));
        assert_eq!(bp.band(bp.max()), Some(4));
    }

    #[test]
    fn test_degenerate_population_lands_in_top_band() {
        let bp = PercentileBreakpoints::compute(&[3.5; 6], &QUARTILES).unwrap();
        assert!(bp.is_degenerate());
        assert_eq!(bp.band(3.5), Some(4));
    }

    #[test]
    fn test_every_population_value_gets_a_band() {
        let population: Vec<f32> = (0..97).map(|i| ((i * 37) % 23) as f32 * 0.5).collect();
        let bp = PercentileBreakpoints::compute(&population, &QUARTILES).unwrap();
        for &v in &population {
            let band = bp.band(v).unwrap();
            assert!((1..=4).contains(&band));
        }
        assert_eq!(bp.band(bp.max()), Some(4));
    }

    #[test]
    fn test_integral_ranks_are_exact() {
        let population: Vec<f32> = (1..=100).map(|v| v as f32).collect();
        let bp = PercentileBreakpoints::compute(&population, &[0.0, 7.0, 100.0]).unwrap();
        assert_eq!(bp.values(), &[1.0f32, 7.0, 100.0]);

        for n in 1..200usize {
            for p in 0..=100usize {
                let expected = ((p * n + 99) / 100).clamp(1, n);
                assert_eq!(nearest_rank(p as f64, n), expected, "p={} n={}", p, n);
            }
        }
    }
}
