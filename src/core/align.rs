use crate::config::AlignmentParams;
use crate::io::AlignedMetrics;
use crate::types::{GridSpec, MaturityError, MaturityResult, Metric, Raster};
use ndarray::{Array2, Zip};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Area-aggregating reducer applied when a source is finer than the reference grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reducer {
    /// Arithmetic mean, for continuous layers
    Mean,
    /// Most frequent value, for class-valued layers. Ties go to the smaller class.
    Mode,
}

/// Coordinate mapping between a source frame and the reference frame
///
/// Projection math lives outside this crate; callers plug it in here.
pub trait FrameTransform: Send + Sync {
    /// Source frame coordinate to reference frame coordinate
    fn to_reference(&self, x: f64, y: f64) -> Option<(f64, f64)>;

    /// Reference frame coordinate to source frame coordinate
    fn to_source(&self, x: f64, y: f64) -> Option<(f64, f64)>;
}

/// Transform for sources already in the reference frame
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl FrameTransform for IdentityTransform {
    fn to_reference(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        Some((x, y))
    }

    fn to_source(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        Some((x, y))
    }
}

/// How a source reaches the reference grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    /// Source is finer: aggregate source cells into each reference cell
    Aggregate,
    /// Source is coarser or equal: nearest-neighbour lookup per reference cell
    Resample,
}

/// Unaligned layers sharing the reference frame
#[derive(Debug, Clone)]
pub struct SourceStack<'a> {
    pub metrics: Vec<(Metric, &'a Raster<f32>)>,
    pub forest_type: &'a Raster<i32>,
}

/// Resamples heterogeneous rasters onto one reference grid
pub struct GridAligner {
    reference: GridSpec,
    params: AlignmentParams,
}

impl GridAligner {
    pub fn new(reference: GridSpec, params: AlignmentParams) -> MaturityResult<Self> {
        if reference.transform.is_rotated() {
            return Err(MaturityError::Alignment(
                "rotated reference grids are not supported".to_string(),
            ));
        }
        if reference.rows == 0 || reference.cols == 0 {
            return Err(MaturityError::Alignment(format!(
                "reference grid {}x{} has no cells",
                reference.rows, reference.cols
            )));
        }
        Ok(Self { reference, params })
    }

    /// Aligner whose reference grid is taken from an existing raster
    pub fn from_reference<T>(reference: &Raster<T>, params: AlignmentParams) -> MaturityResult<Self> {
        Self::new(reference.grid.clone(), params)
    }

    pub fn reference(&self) -> &GridSpec {
        &self.reference
    }

    /// Align a continuous layer in the reference frame (mean aggregation)
    pub fn align_continuous<T>(&self, source: &Raster<T>) -> MaturityResult<Raster<f32>>
    where
        T: ToPrimitive + Copy + Send + Sync,
    {
        self.require_same_frame(&source.grid)?;
        self.align_continuous_with(source, &IdentityTransform)
    }

    /// Align a continuous layer through an explicit frame transform
    pub fn align_continuous_with<T>(
        &self,
        source: &Raster<T>,
        transform: &dyn FrameTransform,
    ) -> MaturityResult<Raster<f32>>
    where
        T: ToPrimitive + Copy + Send + Sync,
    {
        let aligned = match self.plan(&source.grid, transform)? {
            Plan::Aggregate => self.aggregate_mean(source, transform),
            Plan::Resample => self.resample(source, transform, 0.0f32, |v: T| v.to_f32()),
        };
        self.report(&aligned, "continuous");
        Ok(aligned)
    }

    /// Align a class-valued layer in the reference frame (mode aggregation)
    pub fn align_categorical<T>(&self, source: &Raster<T>) -> MaturityResult<Raster<i32>>
    where
        T: ToPrimitive + Copy + Send + Sync,
    {
        self.require_same_frame(&source.grid)?;
        self.align_categorical_with(source, &IdentityTransform)
    }

    /// Align a class-valued layer through an explicit frame transform
    pub fn align_categorical_with<T>(
        &self,
        source: &Raster<T>,
        transform: &dyn FrameTransform,
    ) -> MaturityResult<Raster<i32>>
    where
        T: ToPrimitive + Copy + Send + Sync,
    {
        let aligned = match self.plan(&source.grid, transform)? {
            Plan::Aggregate => self.aggregate_mode(source, transform),
            Plan::Resample => self.resample(source, transform, 0i32, |v: T| v.to_i32()),
        };
        self.report(&aligned, "categorical");
        Ok(aligned)
    }

    /// Align a raster with an explicitly chosen reducer
    pub fn align_with_reducer(&self, source: &Raster<f32>, reducer: Reducer) -> MaturityResult<Raster<f32>> {
        match reducer {
            Reducer::Mean => self.align_continuous(source),
            Reducer::Mode => {
                let classes = self.align_categorical(source)?;
                Ok(Raster {
                    grid: classes.grid,
                    data: classes.data.mapv(|v| v as f32),
                    valid: classes.valid,
                })
            }
        }
    }

    /// Align every metric with the mean reducer and the forest type layer with the mode reducer
    pub fn align_stack(&self, stack: &SourceStack<'_>) -> MaturityResult<AlignedMetrics> {
        log::info!(
            "Aligning {} metric layers and forest type layer to {}x{} reference grid",
            stack.metrics.len(),
            self.reference.rows,
            self.reference.cols
        );

        let mut aligned = AlignedMetrics::new(self.reference.clone());
        for (metric, source) in &stack.metrics {
            log::debug!("Aligning metric {}", metric);
            aligned.insert_metric(*metric, self.align_continuous(source)?);
        }
        aligned.set_forest_type(self.align_categorical(stack.forest_type)?);
        Ok(aligned)
    }

    fn require_same_frame(&self, source: &GridSpec) -> MaturityResult<()> {
        if source.crs != self.reference.crs {
            return Err(MaturityError::Alignment(format!(
                "source frame {} differs from reference frame {}; supply a FrameTransform",
                source.crs, self.reference.crs
            )));
        }
        Ok(())
    }

    fn plan(&self, source: &GridSpec, transform: &dyn FrameTransform) -> MaturityResult<Plan> {
        if source.transform.is_rotated() {
            return Err(MaturityError::Alignment(
                "rotated source grids are not supported".to_string(),
            ));
        }
        if source.rows == 0 || source.cols == 0 {
            return Ok(Plan::Resample);
        }

        let (sx, sy) = source_pixel_size(source, transform).ok_or_else(|| {
            MaturityError::Alignment("source grid cannot be mapped into the reference frame".to_string())
        })?;
        let (rx, ry) = self.reference.resolution();
        let ratio_x = rx / sx;
        let ratio_y = ry / sy;

        // Every reference cell must hold a source centre on both axes
        const EPS: f64 = 1e-9;
        if ratio_x < 1.0 - EPS || ratio_y < 1.0 - EPS || ratio_x * ratio_y <= 1.0 + EPS {
            return Ok(Plan::Resample);
        }

        let block = (ratio_x.ceil() * ratio_y.ceil()) as usize;
        if block > self.params.max_pixels_per_cell {
            return Err(MaturityError::Alignment(format!(
                "aggregating {} source pixels per reference pixel exceeds the limit of {}",
                block, self.params.max_pixels_per_cell
            )));
        }
        log::debug!(
            "Source resolution {:.3}x{:.3} is finer than reference {:.3}x{:.3}; aggregating ~{} pixels per cell",
            sx, sy, rx, ry, block
        );
        Ok(Plan::Aggregate)
    }

    /// Reference cell holding the centre of a source pixel
    fn target_cell(
        &self,
        source: &GridSpec,
        row: usize,
        col: usize,
        transform: &dyn FrameTransform,
    ) -> Option<(usize, usize)> {
        let (x, y) = source.transform.pixel_center(row, col);
        let (rx, ry) = transform.to_reference(x, y)?;
        let (fr, fc) = self.reference.transform.to_pixel(rx, ry);
        if fr < 0.0 || fc < 0.0 {
            return None;
        }
        let (r, c) = (fr.floor() as usize, fc.floor() as usize);
        (r < self.reference.rows && c < self.reference.cols).then_some((r, c))
    }

    fn aggregate_mean<T>(&self, source: &Raster<T>, transform: &dyn FrameTransform) -> Raster<f32>
    where
        T: ToPrimitive + Copy,
    {
        let shape = (self.reference.rows, self.reference.cols);
        let mut sum = Array2::<f64>::zeros(shape);
        let mut count = Array2::<u32>::zeros(shape);

        for ((row, col), &valid) in source.valid.indexed_iter() {
            if !valid {
                continue;
            }
            let Some(value) = source.data[[row, col]].to_f64() else {
                continue;
            };
            if let Some(cell) = self.target_cell(&source.grid, row, col, transform) {
                sum[cell] += value;
                count[cell] += 1;
            }
        }

        let data = Zip::from(&sum)
            .and(&count)
            .map_collect(|&s, &n| if n > 0 { (s / n as f64) as f32 } else { 0.0 });
        let valid = count.mapv(|n| n > 0);

        Raster {
            grid: self.reference.clone(),
            data,
            valid,
        }
    }

    fn aggregate_mode<T>(&self, source: &Raster<T>, transform: &dyn FrameTransform) -> Raster<i32>
    where
        T: ToPrimitive + Copy,
    {
        let cols = self.reference.cols;
        // Only cells that receive a source pixel hold a tally
        let mut votes: HashMap<usize, Vec<(i32, u32)>> = HashMap::new();

        for ((row, col), &valid) in source.valid.indexed_iter() {
            if !valid {
                continue;
            }
            let Some(class) = source.data[[row, col]].to_i32() else {
                continue;
            };
            if let Some((r, c)) = self.target_cell(&source.grid, row, col, transform) {
                let cell = votes.entry(r * cols + c).or_default();
                match cell.iter_mut().find(|(value, _)| *value == class) {
                    Some((_, n)) => *n += 1,
                    None => cell.push((class, 1)),
                }
            }
        }

        let shape = (self.reference.rows, cols);
        let mut data = Array2::<i32>::zeros(shape);
        let mut valid = Array2::from_elem(shape, false);
        for (index, cell) in &votes {
            let winner = cell
                .iter()
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
                .map(|&(class, _)| class);
            if let Some(class) = winner {
                let pos = [index / cols, index % cols];
                data[pos] = class;
                valid[pos] = true;
            }
        }

        Raster {
            grid: self.reference.clone(),
            data,
            valid,
        }
    }

    fn resample<T, U, F>(
        &self,
        source: &Raster<T>,
        transform: &dyn FrameTransform,
        fill: U,
        convert: F,
    ) -> Raster<U>
    where
        T: Copy + Send + Sync,
        U: Copy + Send + Sync,
        F: Fn(T) -> Option<U> + Sync,
    {
        let shape = (self.reference.rows, self.reference.cols);
        let mut data = Array2::from_elem(shape, fill);
        let mut valid = Array2::from_elem(shape, false);

        let sample = |row: usize, col: usize| -> Option<U> {
            let (x, y) = self.reference.transform.pixel_center(row, col);
            let (sx, sy) = transform.to_source(x, y)?;
            let (fr, fc) = source.grid.transform.to_pixel(sx, sy);
            if fr < 0.0 || fc < 0.0 {
                return None;
            }
            source.get(fr.floor() as usize, fc.floor() as usize).and_then(&convert)
        };

        #[cfg(feature = "parallel")]
        Zip::indexed(&mut data)
            .and(&mut valid)
            .par_for_each(|(row, col), d, v| {
                if let Some(value) = sample(row, col) {
                    *d = value;
                    *v = true;
                }
            });

        #[cfg(not(feature = "parallel"))]
        Zip::indexed(&mut data)
            .and(&mut valid)
            .for_each(|(row, col), d, v| {
                if let Some(value) = sample(row, col) {
                    *d = value;
                    *v = true;
                }
            });

        Raster {
            grid: self.reference.clone(),
            data,
            valid,
        }
    }

    fn report<T: Copy>(&self, aligned: &Raster<T>, kind: &str) {
        let valid = aligned.valid_count();
        if valid == 0 {
            log::warn!("Aligned {} layer has no valid cells; it does not intersect the reference grid", kind);
        } else {
            log::info!(
                "Aligned {} layer: {}/{} valid cells",
                kind,
                valid,
                self.reference.cell_count()
            );
        }
    }
}

/// Source pixel size measured in reference frame units, near the grid centre
fn source_pixel_size(source: &GridSpec, transform: &dyn FrameTransform) -> Option<(f64, f64)> {
    let t = &source.transform;
    let (x, y) = t.pixel_center(source.rows / 2, source.cols / 2);
    let origin = transform.to_reference(x, y)?;
    let step_x = transform.to_reference(x + t.pixel_width, y)?;
    let step_y = transform.to_reference(x, y + t.pixel_height)?;

    let dist = |a: (f64, f64), b: (f64, f64)| ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt();
    let sx = dist(origin, step_x);
    let sy = dist(origin, step_y);
    (sx > 0.0 && sy > 0.0).then_some((sx, sy))
}
