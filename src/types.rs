use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

/// Tolerance used when comparing grid origins and pixel sizes
const GRID_EPSILON: f64 = 1e-9;

/// Reference frame of a grid or geometry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Geographic coordinates (longitude, latitude)
    Geographic,
    /// Projected coordinates (e.g., Albers equal area)
    Projected { epsg: u32 },
}

impl std::fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinateSystem::Geographic => write!(f, "geographic"),
            CoordinateSystem::Projected { epsg } => write!(f, "EPSG:{}", epsg),
        }
    }
}

/// Axis-aligned extent in frame units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }
}

/// Affine transform from pixel space to frame coordinates
///
/// Follows the GDAL layout: `x = top_left_x + col * pixel_width`,
/// `y = top_left_y + row * pixel_height`. North-up grids have a negative
/// `pixel_height`. Rotated grids are not supported by the aligner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_size,
        }
    }

    /// Frame coordinates of the centre of a pixel
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let x = self.top_left_x + (col as f64 + 0.5) * self.pixel_width;
        let y = self.top_left_y + (row as f64 + 0.5) * self.pixel_height;
        (x, y)
    }

    /// Fractional (row, col) pixel position of a frame coordinate
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let col = (x - self.top_left_x) / self.pixel_width;
        let row = (y - self.top_left_y) / self.pixel_height;
        (row, col)
    }

    pub fn is_rotated(&self) -> bool {
        self.rotation_x != 0.0 || self.rotation_y != 0.0
    }
}

/// Pixel window within a grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub row_off: usize,
    pub col_off: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Window {
    pub fn full(rows: usize, cols: usize) -> Self {
        Self { row_off: 0, col_off: 0, rows, cols }
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    pub fn row_end(&self) -> usize {
        self.row_off + self.rows
    }

    pub fn col_end(&self) -> usize {
        self.col_off + self.cols
    }

    /// Overlap of two windows, `None` if they do not share a pixel
    pub fn intersect(&self, other: &Window) -> Option<Window> {
        let row_off = self.row_off.max(other.row_off);
        let col_off = self.col_off.max(other.col_off);
        let row_end = self.row_end().min(other.row_end());
        let col_end = self.col_end().min(other.col_end());

        if row_end <= row_off || col_end <= col_off {
            return None;
        }

        Some(Window {
            row_off,
            col_off,
            rows: row_end - row_off,
            cols: col_end - col_off,
        })
    }
}

/// Grid description: transform, frame and shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub transform: GeoTransform,
    pub crs: CoordinateSystem,
    pub rows: usize,
    pub cols: usize,
}

impl GridSpec {
    pub fn new(transform: GeoTransform, crs: CoordinateSystem, rows: usize, cols: usize) -> Self {
        Self { transform, crs, rows, cols }
    }

    /// Absolute pixel size (x, y) in frame units
    pub fn resolution(&self) -> (f64, f64) {
        (self.transform.pixel_width.abs(), self.transform.pixel_height.abs())
    }

    pub fn cell_count(&self) -> usize {
        self.rows * self.cols
    }

    pub fn bounds(&self) -> BoundingBox {
        let t = &self.transform;
        let x0 = t.top_left_x;
        let x1 = t.top_left_x + self.cols as f64 * t.pixel_width;
        let y0 = t.top_left_y;
        let y1 = t.top_left_y + self.rows as f64 * t.pixel_height;
        BoundingBox {
            min_x: x0.min(x1),
            max_x: x0.max(x1),
            min_y: y0.min(y1),
            max_y: y0.max(y1),
        }
    }

    /// Same frame, same pixel size and pixel boundaries that coincide.
    /// Shapes and origins may differ by whole pixels.
    pub fn is_aligned_with(&self, other: &GridSpec) -> bool {
        if self.crs != other.crs || self.transform.is_rotated() || other.transform.is_rotated() {
            return false;
        }
        let (a, b) = (&self.transform, &other.transform);
        if (a.pixel_width - b.pixel_width).abs() > GRID_EPSILON
            || (a.pixel_height - b.pixel_height).abs() > GRID_EPSILON
        {
            return false;
        }
        self.pixel_offset_of(other).is_some()
    }

    /// Aligned and covering exactly the same cells
    pub fn same_grid(&self, other: &GridSpec) -> bool {
        self.is_aligned_with(other)
            && self.rows == other.rows
            && self.cols == other.cols
            && self.pixel_offset_of(other) == Some((0, 0))
    }

    /// Whole-pixel offset (rows, cols) of `other`'s origin within this grid
    pub fn pixel_offset_of(&self, other: &GridSpec) -> Option<(isize, isize)> {
        let (row, col) = self
            .transform
            .to_pixel(other.transform.top_left_x, other.transform.top_left_y);
        let (row_r, col_r) = (row.round(), col.round());
        if (row - row_r).abs() > 1e-6 || (col - col_r).abs() > 1e-6 {
            return None;
        }
        Some((row_r as isize, col_r as isize))
    }

    /// Window of this grid covered by an aligned `other` grid, clipped to this grid
    pub fn window_of(&self, other: &GridSpec) -> Option<Window> {
        if !self.is_aligned_with(other) {
            return None;
        }
        let (row_off, col_off) = self.pixel_offset_of(other)?;
        let row_start = row_off.max(0);
        let col_start = col_off.max(0);
        let row_end = (row_off + other.rows as isize).min(self.rows as isize);
        let col_end = (col_off + other.cols as isize).min(self.cols as isize);
        if row_end <= row_start || col_end <= col_start {
            return None;
        }
        Some(Window {
            row_off: row_start as usize,
            col_off: col_start as usize,
            rows: (row_end - row_start) as usize,
            cols: (col_end - col_start) as usize,
        })
    }

    /// Sub-grid covering a window of this grid
    pub fn subgrid(&self, window: &Window) -> GridSpec {
        let t = &self.transform;
        GridSpec {
            transform: GeoTransform {
                top_left_x: t.top_left_x + window.col_off as f64 * t.pixel_width,
                top_left_y: t.top_left_y + window.row_off as f64 * t.pixel_height,
                ..*t
            },
            crs: self.crs.clone(),
            rows: window.rows,
            cols: window.cols,
        }
    }

    /// Pixel window enclosing a frame-space extent, clipped to the grid
    pub fn window_for_bounds(&self, bbox: &BoundingBox) -> Option<Window> {
        if !self.bounds().intersects(bbox) {
            return None;
        }
        let (r0, c0) = self.transform.to_pixel(bbox.min_x, bbox.max_y);
        let (r1, c1) = self.transform.to_pixel(bbox.max_x, bbox.min_y);
        let row_start = r0.min(r1).floor().max(0.0) as usize;
        let col_start = c0.min(c1).floor().max(0.0) as usize;
        let row_end = (r0.max(r1).ceil().max(0.0) as usize).min(self.rows);
        let col_end = (c0.max(c1).ceil().max(0.0) as usize).min(self.cols);
        if row_end <= row_start || col_end <= col_start {
            return None;
        }
        Some(Window {
            row_off: row_start,
            col_off: col_start,
            rows: row_end - row_start,
            cols: col_end - col_start,
        })
    }
}

/// 2D grid of samples with a per-cell validity mask
///
/// Cells whose mask entry is `false` carry no value: they are skipped by
/// every statistic and never produce output.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster<T> {
    pub grid: GridSpec,
    pub data: Array2<T>,
    pub valid: Array2<bool>,
}

impl<T: Copy> Raster<T> {
    pub fn new(grid: GridSpec, data: Array2<T>, valid: Array2<bool>) -> MaturityResult<Self> {
        if data.dim() != (grid.rows, grid.cols) || valid.dim() != data.dim() {
            return Err(MaturityError::InvalidFormat(format!(
                "raster data {:?} and mask {:?} do not match grid {}x{}",
                data.dim(),
                valid.dim(),
                grid.rows,
                grid.cols
            )));
        }
        Ok(Self { grid, data, valid })
    }

    /// Raster where every cell is valid
    pub fn from_data(grid: GridSpec, data: Array2<T>) -> MaturityResult<Self> {
        let valid = Array2::from_elem(data.dim(), true);
        Self::new(grid, data, valid)
    }

    /// Raster whose invalid cells are those equal to `nodata` (or NaN)
    pub fn with_nodata(grid: GridSpec, data: Array2<T>, nodata: T) -> MaturityResult<Self>
    where
        T: PartialEq,
    {
        #[allow(clippy::eq_op)]
        let valid = data.mapv(|v| v == v && v != nodata);
        Self::new(grid, data, valid)
    }

    pub fn filled(grid: GridSpec, value: T) -> Self {
        let shape = (grid.rows, grid.cols);
        Self {
            grid,
            data: Array2::from_elem(shape, value),
            valid: Array2::from_elem(shape, true),
        }
    }

    /// Raster with no valid cells
    pub fn invalid(grid: GridSpec, fill: T) -> Self {
        let shape = (grid.rows, grid.cols);
        Self {
            grid,
            data: Array2::from_elem(shape, fill),
            valid: Array2::from_elem(shape, false),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        match self.valid.get((row, col)) {
            Some(true) => Some(self.data[[row, col]]),
            _ => None,
        }
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Copy of the cells inside a window, on the matching sub-grid
    pub fn window(&self, window: &Window) -> Raster<T> {
        let rows = window.row_off..window.row_end();
        let cols = window.col_off..window.col_end();
        Raster {
            grid: self.grid.subgrid(window),
            data: self.data.slice(s![rows.clone(), cols.clone()]).to_owned(),
            valid: self.valid.slice(s![rows, cols]).to_owned(),
        }
    }

    pub fn is_aligned_with<U>(&self, other: &Raster<U>) -> bool {
        self.grid.is_aligned_with(&other.grid)
    }
}

/// Forest-condition metric combined into the maturity score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Canopy cover (percent)
    Cover,
    /// Canopy height (metres)
    Height,
    /// Above-ground live woody biomass density
    Biomass,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Cover, Metric::Height, Metric::Biomass];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Cover => "cover",
            Metric::Height => "height",
            Metric::Biomass => "biomass",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Final maturity raster: one composite score per cell or `nodata`
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRaster {
    pub grid: GridSpec,
    pub data: Array2<u8>,
    pub nodata: u8,
    /// Lowest and highest composite score the run can produce
    pub score_range: (u8, u8),
}

impl OutputRaster {
    pub fn empty(grid: GridSpec, nodata: u8, score_range: (u8, u8)) -> Self {
        let shape = (grid.rows, grid.cols);
        Self {
            grid,
            data: Array2::from_elem(shape, nodata),
            nodata,
            score_range,
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Option<u8> {
        self.data.get((row, col)).copied().filter(|&v| v != self.nodata)
    }

    pub fn covered_cells(&self) -> usize {
        self.data.iter().filter(|&&v| v != self.nodata).count()
    }

    pub fn score_range(&self) -> (u8, u8) {
        self.score_range
    }

    /// Restrict the output to a window, e.g. an export region
    pub fn clip_to(&self, window: &Window) -> MaturityResult<OutputRaster> {
        let full = Window::full(self.grid.rows, self.grid.cols);
        if full.intersect(window) != Some(*window) {
            return Err(MaturityError::Processing(format!(
                "clip window {:?} exceeds output grid {}x{}",
                window, self.grid.rows, self.grid.cols
            )));
        }
        Ok(OutputRaster {
            grid: self.grid.subgrid(window),
            data: self
                .data
                .slice(s![window.row_off..window.row_end(), window.col_off..window.col_end()])
                .to_owned(),
            nodata: self.nodata,
            score_range: self.score_range,
        })
    }
}

/// Error types for maturity processing
#[derive(Debug, thiserror::Error)]
pub enum MaturityError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Alignment error: {0}")]
    Alignment(String),

    #[error("Missing layer: {0}")]
    MissingLayer(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for maturity operations
pub type MaturityResult<T> = Result<T, MaturityError>;
