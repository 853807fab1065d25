pub mod errors;

pub use errors::{DecompositionError, ErrorCategory, KmapResult};

use serde::{Deserialize, Serialize};

/// How slice fits are scheduled. Results are always gathered in slice order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Serial,
    Parallel,
}

/// One labelled axis of a sliced dataset: `num` points spaced evenly over
/// `range` (both ends included).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub label: String,
    pub units: String,
    pub range: [f64; 2],
    pub num: usize,
}

impl Axis {
    pub fn new(
        label: impl Into<String>,
        units: impl Into<String>,
        range: [f64; 2],
        num: usize,
    ) -> Self {
        Self {
            label: label.into(),
            units: units.into(),
            range,
            num,
        }
    }

    pub fn coordinates(&self) -> Vec<f64> {
        linspace(self.range[0], self.range[1], self.num)
    }

    pub fn value_at(&self, index: usize) -> Option<f64> {
        if index >= self.num {
            return None;
        }
        if self.num == 1 {
            return Some(self.range[0]);
        }
        let step = (self.range[1] - self.range[0]) / (self.num - 1) as f64;
        Some(self.range[0] + step * index as f64)
    }

    /// `label(units)`, the form used for plot axis titles.
    pub fn display_label(&self) -> String {
        format!("{}({})", self.label, self.units)
    }
}

pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num)
                .map(|index| {
                    if index == num - 1 {
                        stop
                    } else {
                        start + step * index as f64
                    }
                })
                .collect()
        }
    }
}

/// Half-open range `[start, stop)` sampled every `step`.
pub fn arange(start: f64, stop: f64, step: f64) -> Vec<f64> {
    if step.is_nan() || step <= 0.0 || stop.is_nan() || stop <= start {
        return Vec::new();
    }
    let count = ((stop - start) / step - 1.0e-9).ceil().max(0.0) as usize;
    (0..count).map(|index| start + step * index as f64).collect()
}

/// Rectangular sampling lattice. Both coordinate sequences are finite and
/// strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GridRecord", into = "GridRecord")]
pub struct Grid {
    x: Vec<f64>,
    y: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GridRecord {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl TryFrom<GridRecord> for Grid {
    type Error = DecompositionError;

    fn try_from(record: GridRecord) -> Result<Self, Self::Error> {
        Grid::new(record.x, record.y)
    }
}

impl From<Grid> for GridRecord {
    fn from(grid: Grid) -> Self {
        Self {
            x: grid.x,
            y: grid.y,
        }
    }
}

impl Grid {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> KmapResult<Self> {
        validate_axis("x", &x)?;
        validate_axis("y", &y)?;
        Ok(Self { x, y })
    }

    pub fn from_axes(x_axis: &Axis, y_axis: &Axis) -> KmapResult<Self> {
        Self::new(x_axis.coordinates(), y_axis.coordinates())
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    /// `(rows, columns)`, i.e. `(len(y), len(x))`.
    pub fn shape(&self) -> (usize, usize) {
        (self.y.len(), self.x.len())
    }

    pub fn len(&self) -> usize {
        self.x.len() * self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn x_extent(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    pub fn y_extent(&self) -> (f64, f64) {
        (self.y[0], self.y[self.y.len() - 1])
    }

    /// Grids are compatible only when their coordinate sequences are identical.
    pub fn is_compatible(&self, other: &Grid) -> bool {
        self.x == other.x && self.y == other.y
    }

    pub fn overlaps(&self, other: &Grid) -> bool {
        let (x0, x1) = self.x_extent();
        let (y0, y1) = self.y_extent();
        let (ox0, ox1) = other.x_extent();
        let (oy0, oy1) = other.y_extent();
        x0 <= ox1 && ox0 <= x1 && y0 <= oy1 && oy0 <= y1
    }

    /// Coordinates `(x, y)` of the flattened row-major index.
    pub fn point(&self, flat_index: usize) -> (f64, f64) {
        let columns = self.x.len();
        (self.x[flat_index % columns], self.y[flat_index / columns])
    }
}

fn validate_axis(name: &str, values: &[f64]) -> KmapResult<()> {
    if values.is_empty() {
        return Err(DecompositionError::invalid_grid(format!(
            "{name} axis must not be empty"
        )));
    }
    for (index, value) in values.iter().copied().enumerate() {
        if !value.is_finite() {
            return Err(DecompositionError::invalid_grid(format!(
                "{name} axis entry {index} must be finite, got {value}"
            )));
        }
        if index > 0 && value <= values[index - 1] {
            return Err(DecompositionError::invalid_grid(format!(
                "{name} axis must be strictly increasing, index {index} has {value} after {}",
                values[index - 1]
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MapMetadata {
    #[serde(default)]
    pub x_label: String,
    #[serde(default)]
    pub x_units: String,
    #[serde(default)]
    pub y_label: String,
    #[serde(default)]
    pub y_units: String,
}

impl MapMetadata {
    pub fn from_axes(x_axis: &Axis, y_axis: &Axis) -> Self {
        Self {
            x_label: x_axis.label.clone(),
            x_units: x_axis.units.clone(),
            y_label: y_axis.label.clone(),
            y_units: y_axis.units.clone(),
        }
    }
}

/// Real-valued 2D map over a [`Grid`], stored row-major with `len(y)` rows
/// of `len(x)` values. NaN marks a point without data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScalarMapRecord", into = "ScalarMapRecord")]
pub struct ScalarMap {
    grid: Grid,
    values: Vec<f64>,
    metadata: MapMetadata,
}

/// JSON form of a map; NaN is written as `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScalarMapRecord {
    x: Vec<f64>,
    y: Vec<f64>,
    values: Vec<Vec<Option<f64>>>,
    #[serde(default)]
    metadata: MapMetadata,
}

impl TryFrom<ScalarMapRecord> for ScalarMap {
    type Error = DecompositionError;

    fn try_from(record: ScalarMapRecord) -> Result<Self, Self::Error> {
        let grid = Grid::new(record.x, record.y)?;
        let (rows, columns) = grid.shape();
        if record.values.len() != rows {
            return Err(DecompositionError::ShapeMismatch {
                context: "map rows".to_string(),
                expected: rows,
                actual: record.values.len(),
            });
        }

        let mut values = Vec::with_capacity(grid.len());
        for row in record.values {
            if row.len() != columns {
                return Err(DecompositionError::ShapeMismatch {
                    context: "map columns".to_string(),
                    expected: columns,
                    actual: row.len(),
                });
            }
            values.extend(row.into_iter().map(|value| value.unwrap_or(f64::NAN)));
        }

        Ok(ScalarMap::new(grid, values)?.with_metadata(record.metadata))
    }
}

impl From<ScalarMap> for ScalarMapRecord {
    fn from(map: ScalarMap) -> Self {
        let columns = map.grid.x.len();
        let values = map
            .values
            .chunks(columns)
            .map(|row| {
                row.iter()
                    .map(|value| value.is_finite().then_some(*value))
                    .collect()
            })
            .collect();
        Self {
            x: map.grid.x,
            y: map.grid.y,
            values,
            metadata: map.metadata,
        }
    }
}

impl ScalarMap {
    pub fn new(grid: Grid, values: Vec<f64>) -> KmapResult<Self> {
        if values.len() != grid.len() {
            return Err(DecompositionError::ShapeMismatch {
                context: "map".to_string(),
                expected: grid.len(),
                actual: values.len(),
            });
        }
        Ok(Self {
            grid,
            values,
            metadata: MapMetadata::default(),
        })
    }

    pub fn filled(grid: Grid, value: f64) -> Self {
        let values = vec![value; grid.len()];
        Self {
            grid,
            values,
            metadata: MapMetadata::default(),
        }
    }

    /// Evaluates `f(x, y)` at every grid point.
    pub fn from_fn(grid: Grid, f: impl Fn(f64, f64) -> f64) -> Self {
        let values = (0..grid.len())
            .map(|index| {
                let (x, y) = grid.point(index);
                f(x, y)
            })
            .collect();
        Self {
            grid,
            values,
            metadata: MapMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: MapMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn metadata(&self) -> &MapMetadata {
        &self.metadata
    }

    pub fn shape(&self) -> (usize, usize) {
        self.grid.shape()
    }

    pub fn get(&self, row: usize, column: usize) -> Option<f64> {
        let (rows, columns) = self.shape();
        (row < rows && column < columns).then(|| self.values[row * columns + column])
    }

    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|value| value.is_finite()).count()
    }

    pub fn is_all_invalid(&self) -> bool {
        self.valid_count() == 0
    }
}
