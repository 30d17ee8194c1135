use crate::config::MaturityConfig;
use crate::core::catalog::StratumDefinition;
use crate::core::percentile::PercentileBreakpoints;
use crate::io::MetricProvider;
use crate::types::{BoundingBox, GridSpec, MaturityError, MaturityResult, Metric, Raster, Window};
use geo::{BoundingRect, Intersects, Point};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Ordinal bands of one metric within one stratum
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedLayer {
    pub metric: Metric,
    pub breakpoints: PercentileBreakpoints,
    /// Bands 1..=n on the stratum window; invalid outside the stratum
    pub bands: Raster<u8>,
}

/// Per-stratum sum of the metric bands
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeScoreLayer {
    /// Enumeration index of the producing stratum
    pub stratum_index: usize,
    pub row_id: u64,
    /// Scores on the stratum window; valid only where every metric was banded
    pub scores: Raster<u8>,
}

impl CompositeScoreLayer {
    pub fn valid_cells(&self) -> usize {
        self.scores.valid_count()
    }
}

/// Why a stratum contributed nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmptyReason {
    /// Region polygon does not overlap the reference grid
    OutsideGrid,
    /// No cell carries the class inside the region
    NoPixels,
    /// Stratum cells exist but one metric has no valid data over them
    MissingMetricData(Metric),
    /// Every metric has data, but no cell has all of them
    NoCompleteCells,
}

impl std::fmt::Display for EmptyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmptyReason::OutsideGrid => write!(f, "region does not overlap the reference grid"),
            EmptyReason::NoPixels => write!(f, "mask selects zero pixels"),
            EmptyReason::MissingMetricData(metric) => write!(f, "no valid {} pixels in mask", metric),
            EmptyReason::NoCompleteCells => write!(f, "no cell is valid in every metric"),
        }
    }
}

/// Result of classifying one stratum
#[derive(Debug, Clone, PartialEq)]
pub enum StratumOutcome {
    Composite(CompositeScoreLayer),
    Empty(EmptyReason),
}

impl StratumOutcome {
    pub fn composite(&self) -> Option<&CompositeScoreLayer> {
        match self {
            StratumOutcome::Composite(layer) => Some(layer),
            StratumOutcome::Empty(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, StratumOutcome::Empty(_))
    }
}

/// Mask and bands of one stratum, before summing
#[derive(Debug, Clone, PartialEq)]
pub struct StratumClassification {
    pub window: Window,
    pub mask_pixels: usize,
    pub layers: Vec<ClassifiedLayer>,
}

/// Validated references to the aligned layers
pub struct ClassifierInputs<'a> {
    pub grid: &'a GridSpec,
    pub forest_type: &'a Raster<i32>,
    pub metrics: Vec<(Metric, &'a Raster<f32>)>,
}

/// Percentile classification of one stratum at a time
#[derive(Debug, Clone)]
pub struct StratumClassifier {
    percentiles: Vec<f64>,
    metrics: Vec<Metric>,
}

impl Default for StratumClassifier {
    fn default() -> Self {
        let config = MaturityConfig::default();
        Self {
            percentiles: config.percentiles,
            metrics: config.metrics,
        }
    }
}

impl StratumClassifier {
    /// Classifier for a configuration, rejected unless it validates
    pub fn from_config(config: &MaturityConfig) -> MaturityResult<Self> {
        config.validate()?;
        Ok(Self {
            percentiles: config.percentiles.clone(),
            metrics: config.metrics.clone(),
        })
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Check that every configured layer is present and on the reference grid
    pub fn check_inputs<'a, P>(&self, provider: &'a P) -> MaturityResult<ClassifierInputs<'a>>
    where
        P: MetricProvider + ?Sized,
    {
        let grid = provider.reference_grid();
        let forest_type = provider
            .forest_type()
            .ok_or_else(|| MaturityError::MissingLayer("forest type".to_string()))?;
        if !forest_type.grid.same_grid(grid) {
            return Err(MaturityError::Alignment(
                "forest type raster is not on the reference grid".to_string(),
            ));
        }

        let mut metrics = Vec::with_capacity(self.metrics.len());
        for &metric in &self.metrics {
            let raster = provider
                .metric(metric)
                .ok_or_else(|| MaturityError::MissingLayer(metric.to_string()))?;
            if !raster.grid.same_grid(grid) {
                return Err(MaturityError::Alignment(format!(
                    "{} raster is not on the reference grid",
                    metric
                )));
            }
            metrics.push((metric, raster));
        }

        Ok(ClassifierInputs {
            grid,
            forest_type,
            metrics,
        })
    }

    /// Classify one stratum into its composite score layer, or EMPTY
    pub fn classify<P>(&self, stratum: &StratumDefinition, provider: &P) -> MaturityResult<StratumOutcome>
    where
        P: MetricProvider + ?Sized,
    {
        let inputs = self.check_inputs(provider)?;
        Ok(self.classify_checked(stratum, &inputs))
    }

    /// Classify against inputs already validated by `check_inputs`
    pub fn classify_checked(&self, stratum: &StratumDefinition, inputs: &ClassifierInputs<'_>) -> StratumOutcome {
        match self.classify_layers(stratum, inputs) {
            Ok(classification) => self.compose(stratum, inputs.grid, classification),
            Err(reason) => StratumOutcome::Empty(reason),
        }
    }

    /// Mask the stratum and band every metric
    pub fn classify_layers(
        &self,
        stratum: &StratumDefinition,
        inputs: &ClassifierInputs<'_>,
    ) -> Result<StratumClassification, EmptyReason> {
        let window = stratum
            .region
            .bounding_rect()
            .map(|rect| BoundingBox {
                min_x: rect.min().x,
                max_x: rect.max().x,
                min_y: rect.min().y,
                max_y: rect.max().y,
            })
            .and_then(|bbox| inputs.grid.window_for_bounds(&bbox))
            .ok_or(EmptyReason::OutsideGrid)?;

        let mask = self.stratum_mask(stratum, inputs, &window);
        let mask_pixels = mask.iter().filter(|&&m| m).count();
        log::debug!(
            "Stratum {}: window {:?}, {} masked pixels",
            stratum.label(),
            window,
            mask_pixels
        );
        if mask_pixels == 0 {
            return Err(EmptyReason::NoPixels);
        }

        let subgrid = inputs.grid.subgrid(&window);
        let mut layers = Vec::with_capacity(inputs.metrics.len());
        for &(metric, raster) in &inputs.metrics {
            let values = raster.window(&window);
            let layer = self
                .classify_metric(metric, &values, &mask, &subgrid)
                .ok_or(EmptyReason::MissingMetricData(metric))?;
            log::debug!(
                "Stratum {}: {} breakpoints {:?}",
                stratum.label(),
                metric,
                layer.breakpoints.values()
            );
            layers.push(layer);
        }

        Ok(StratumClassification {
            window,
            mask_pixels,
            layers,
        })
    }

    /// Class match AND pixel centre inside the region polygon
    fn stratum_mask(&self, stratum: &StratumDefinition, inputs: &ClassifierInputs<'_>, window: &Window) -> Array2<bool> {
        let transform = &inputs.grid.transform;
        let classes = inputs.forest_type;

        Array2::from_shape_fn((window.rows, window.cols), |(r, c)| {
            let (row, col) = (window.row_off + r, window.col_off + c);
            if classes.get(row, col) != Some(stratum.class_value) {
                return false;
            }
            let (x, y) = transform.pixel_center(row, col);
            stratum.region.intersects(&Point::new(x, y))
        })
    }

    fn classify_metric(
        &self,
        metric: Metric,
        values: &Raster<f32>,
        mask: &Array2<bool>,
        grid: &GridSpec,
    ) -> Option<ClassifiedLayer> {
        let population: Vec<f32> = Zip::from(&values.data)
            .and(&values.valid)
            .and(mask)
            .fold(Vec::new(), |mut acc, &v, &valid, &inside| {
                if valid && inside {
                    acc.push(v);
                }
                acc
            });

        let breakpoints = PercentileBreakpoints::compute(&population, &self.percentiles)?;

        let mut data = Array2::<u8>::zeros(mask.dim());
        let mut valid = Array2::from_elem(mask.dim(), false);
        Zip::from(&mut data)
            .and(&mut valid)
            .and(&values.data)
            .and(&values.valid)
            .and(mask)
            .for_each(|band, ok, &v, &has_value, &inside| {
                if has_value && inside {
                    if let Some(b) = breakpoints.band(v) {
                        *band = b;
                        *ok = true;
                    }
                }
            });

        Some(ClassifiedLayer {
            metric,
            breakpoints,
            bands: Raster {
                grid: grid.clone(),
                data,
                valid,
            },
        })
    }

    /// Sum the bands; a cell survives only if every metric banded it
    fn compose(&self, stratum: &StratumDefinition, grid: &GridSpec, classification: StratumClassification) -> StratumOutcome {
        let window = classification.window;
        let shape = (window.rows, window.cols);
        let mut scores = Array2::<u8>::zeros(shape);
        let mut valid = Array2::from_elem(shape, true);

        for layer in &classification.layers {
            Zip::from(&mut scores)
                .and(&mut valid)
                .and(&layer.bands.data)
                .and(&layer.bands.valid)
                .for_each(|score, ok, &band, &banded| {
                    if banded {
                        *score += band;
                    } else {
                        *ok = false;
                    }
                });
        }
        Zip::from(&mut scores).and(&valid).for_each(|score, &ok| {
            if !ok {
                *score = 0;
            }
        });

        let scores = Raster {
            grid: grid.subgrid(&window),
            data: scores,
            valid,
        };
        if scores.valid_count() == 0 {
            return StratumOutcome::Empty(EmptyReason::NoCompleteCells);
        }

        StratumOutcome::Composite(CompositeScoreLayer {
            stratum_index: stratum.index,
            row_id: stratum.row_id,
            scores,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::AlignedMetrics;
    use crate::types::{CoordinateSystem, GeoTransform};
    use geo::{polygon, MultiPolygon};
    use ndarray::Array;
    use std::sync::Arc;

    fn grid(rows: usize, cols: usize) -> GridSpec {
        GridSpec::new(
            GeoTransform::north_up(0.0, rows as f64, 1.0),
            CoordinateSystem::Projected { epsg: 5070 },
            rows,
            cols,
        )
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)].into()
    }

    fn stratum(index: usize, region: MultiPolygon<f64>, class_value: i32) -> StratumDefinition {
        StratumDefinition {
            index,
            row_id: index as u64 + 1,
            region_name: format!("region-{}", index),
            region: Arc::new(region),
            class_value,
        }
    }

    fn metrics(g: &GridSpec, cover: Vec<f32>, height: Vec<f32>, biomass: Vec<f32>, classes: Vec<i32>) -> AlignedMetrics {
        let shape = (g.rows, g.cols);
        let raster = |v: Vec<f32>| {
            Raster::with_nodata(g.clone(), Array::from_shape_vec(shape, v).unwrap(), -1.0).unwrap()
        };
        AlignedMetrics::new(g.clone())
            .with_metric(Metric::Cover, raster(cover))
            .with_metric(Metric::Height, raster(height))
            .with_metric(Metric::Biomass, raster(biomass))
            .with_forest_type(Raster::from_data(g.clone(), Array::from_shape_vec(shape, classes).unwrap()).unwrap())
    }

    #[test]
    fn test_quartile_scores() {
        let g = grid(1, 8);
        let v: Vec<f32> = (1..=8).map(|x| x as f32).collect();
        let inputs = metrics(&g, v.clone(), v.clone(), v, vec![5; 8]);
        let classifier = StratumClassifier::default();

        let outcome = classifier.classify(&stratum(0, rect(0.0, 0.0, 8.0, 1.0), 5), &inputs).unwrap();
        let layer = outcome.composite().unwrap();
        // breakpoints 1, 2, 4, 6, 8 -> bands 1,2,2,3,3,4,4,4
        let expected = [3u8, 6, 6, 9, 9, 12, 12, 12];
        for (col, &score) in expected.iter().enumerate() {
            assert_eq!(layer.scores.get(0, col), Some(score));
        }
    }

    #[test]
    fn test_mask_requires_class_and_region() {
        let g = grid(2, 2);
        let inputs = metrics(&g, vec![1.0; 4], vec![1.0; 4], vec![1.0; 4], vec![5, 5, 7, 5]);
        let classifier = StratumClassifier::default();

        // Left column only
        let s = stratum(0, rect(0.0, 0.0, 1.0, 2.0), 5);
        let inputs = classifier.check_inputs(&inputs).unwrap();
        let classification = classifier.classify_layers(&s, &inputs).unwrap();
        assert_eq!(classification.mask_pixels, 1);
        let bands = &classification.layers[0].bands;
        assert_eq!(bands.valid_count(), 1);
        assert_eq!(bands.get(0, 0), Some(4));
    }

    #[test]
    fn test_degenerate_population_scores_twelve() {
        let g = grid(2, 3);
        let inputs = metrics(&g, vec![40.0; 6], vec![12.0; 6], vec![80.0; 6], vec![9; 6]);
        let outcome = StratumClassifier::default()
            .classify(&stratum(0, rect(0.0, 0.0, 3.0, 2.0), 9), &inputs)
            .unwrap();
        let layer = outcome.composite().unwrap();
        assert_eq!(layer.valid_cells(), 6);
        assert!(layer.scores.data.iter().all(|&s| s == 12));
    }

    #[test]
    fn test_missing_metric_cell_drops_composite_cell() {
        let g = grid(1, 4);
        let inputs = metrics(
            &g,
            vec![1.0, 2.0, 3.0, 4.0],
            vec![1.0, -1.0, 3.0, 4.0],
            vec![1.0, 2.0, 3.0, 4.0],
            vec![1; 4],
        );
        let outcome = StratumClassifier::default()
            .classify(&stratum(0, rect(0.0, 0.0, 4.0, 1.0), 1), &inputs)
            .unwrap();
        let layer = outcome.composite().unwrap();
        assert_eq!(layer.valid_cells(), 3);
        assert_eq!(layer.scores.get(0, 1), None);
    }

    #[test]
    fn test_empty_strata() {
        let g = grid(2, 2);
        let inputs = metrics(&g, vec![1.0; 4], vec![-1.0; 4], vec![1.0; 4], vec![5; 4]);
        let classifier = StratumClassifier::default();

        let no_class = classifier.classify(&stratum(0, rect(0.0, 0.0, 2.0, 2.0), 6), &inputs).unwrap();
        assert_eq!(no_class, StratumOutcome::Empty(EmptyReason::NoPixels));

        let far_away = classifier.classify(&stratum(1, rect(50.0, 50.0, 60.0, 60.0), 5), &inputs).unwrap();
        assert_eq!(far_away, StratumOutcome::Empty(EmptyReason::OutsideGrid));

        let no_height = classifier.classify(&stratum(2, rect(0.0, 0.0, 2.0, 2.0), 5), &inputs).unwrap();
        assert_eq!(no_height, StratumOutcome::Empty(EmptyReason::MissingMetricData(Metric::Height)));
    }

    #[test]
    fn test_classification_is_idempotent() {
        let g = grid(3, 3);
        let cover: Vec<f32> = (0..9).map(|i| (i * 7 % 5) as f32).collect();
        let height: Vec<f32> = (0..9).map(|i| i as f32 * 1.5).collect();
        let biomass: Vec<f32> = (0..9).map(|i| (9 - i) as f32).collect();
        let inputs = metrics(&g, cover, height, biomass, vec![2; 9]);
        let classifier = StratumClassifier::default();
        let s = stratum(0, rect(0.0, 0.0, 3.0, 3.0), 2);

        let checked = classifier.check_inputs(&inputs).unwrap();
        assert_eq!(
            classifier.classify_layers(&s, &checked),
            classifier.classify_layers(&s, &checked)
        );
        let first = classifier.classify_checked(&s, &checked);
        let second = classifier.classify_checked(&s, &checked);
        assert_eq!(first, second);

        let layer = first.composite().unwrap();
        for (&score, &ok) in layer.scores.data.iter().zip(layer.scores.valid.iter()) {
            if ok {
                assert!((3..=12).contains(&score));
            }
        }
    }

    #[test]
    fn test_missing_layer_and_misalignment_are_fatal() {
        let g = grid(2, 2);
        let classifier = StratumClassifier::default();
        let s = stratum(0, rect(0.0, 0.0, 2.0, 2.0), 1);

        let no_biomass = AlignedMetrics::new(g.clone())
            .with_metric(Metric::Cover, Raster::filled(g.clone(), 1.0))
            .with_metric(Metric::Height, Raster::filled(g.clone(), 1.0))
            .with_forest_type(Raster::filled(g.clone(), 1));
        assert!(matches!(classifier.classify(&s, &no_biomass), Err(MaturityError::MissingLayer(_))));

        let shifted = GridSpec::new(GeoTransform::north_up(1.0, 2.0, 1.0), g.crs.clone(), 2, 2);
        let misaligned = no_biomass.with_metric(Metric::Biomass, Raster::filled(shifted, 1.0));
        assert!(matches!(classifier.classify(&s, &misaligned), Err(MaturityError::Alignment(_))));
    }

    #[test]
    fn test_from_config_rejects_invalid_configuration() {
        let no_metrics = MaturityConfig {
            metrics: Vec::new(),
            ..MaturityConfig::default()
        };
        assert!(matches!(StratumClassifier::from_config(&no_metrics), Err(MaturityError::Config(_))));

        // 256 bands per metric cannot be summed into a byte
        let too_many_bands = MaturityConfig {
            percentiles: (0..=256).map(|i| i as f64 * 100.0 / 256.0).collect(),
            ..MaturityConfig::default()
        };
        assert!(matches!(StratumClassifier::from_config(&too_many_bands), Err(MaturityError::Config(_))));

        assert!(StratumClassifier::from_config(&MaturityConfig::default()).is_ok());
    }
}
