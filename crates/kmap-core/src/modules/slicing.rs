//! Three-dimensional measured stacks and 2D slice extraction.

use crate::domain::{Axis, DecompositionError, Grid, KmapResult, MapMetadata, ScalarMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const AXIS_COUNT: usize = 3;

/// A measured dataset `data[i0][i1][i2]` with one [`Axis`] per dimension,
/// stored flat in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SlicedStackRecord", into = "SlicedStackRecord")]
pub struct SlicedStack {
    name: String,
    axes: [Axis; AXIS_COUNT],
    data: Vec<f64>,
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SlicedStackRecord {
    name: String,
    axes: Vec<Axis>,
    data: Vec<Vec<Vec<Option<f64>>>>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl TryFrom<SlicedStackRecord> for SlicedStack {
    type Error = DecompositionError;

    fn try_from(record: SlicedStackRecord) -> Result<Self, Self::Error> {
        let axes: [Axis; AXIS_COUNT] =
            record
                .axes
                .try_into()
                .map_err(|axes: Vec<Axis>| DecompositionError::ShapeMismatch {
                    context: "stack axes".to_string(),
                    expected: AXIS_COUNT,
                    actual: axes.len(),
                })?;

        let mut data = Vec::with_capacity(axes.iter().map(|axis| axis.num).product());
        for plane in record.data {
            for row in plane {
                data.extend(row.into_iter().map(|value| value.unwrap_or(f64::NAN)));
            }
        }

        let stack = SlicedStack::new(record.name, axes, data)?;
        Ok(stack.with_metadata(record.metadata))
    }
}

impl From<SlicedStack> for SlicedStackRecord {
    fn from(stack: SlicedStack) -> Self {
        let [n0, n1, n2] = stack.shape();
        let mut data = Vec::with_capacity(n0);
        for i0 in 0..n0 {
            let mut plane = Vec::with_capacity(n1);
            for i1 in 0..n1 {
                let start = (i0 * n1 + i1) * n2;
                plane.push(
                    stack.data[start..start + n2]
                        .iter()
                        .map(|value| value.is_finite().then_some(*value))
                        .collect(),
                );
            }
            data.push(plane);
        }
        Self {
            name: stack.name,
            axes: stack.axes.to_vec(),
            data,
            metadata: stack.metadata,
        }
    }
}

/// One 2D map cut out of a stack together with the value of the axis it was
/// cut along.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceView {
    pub index: usize,
    pub map: ScalarMap,
    pub axis_value: f64,
    pub axis_label: String,
    pub axis_units: String,
}

impl SlicedStack {
    pub fn new(name: impl Into<String>, axes: [Axis; AXIS_COUNT], data: Vec<f64>) -> KmapResult<Self> {
        for (index, axis) in axes.iter().enumerate() {
            if axis.num == 0 {
                return Err(DecompositionError::invalid_grid(format!(
                    "stack axis {index} ('{}') has no points",
                    axis.label
                )));
            }
        }
        for (index, axis) in axes.iter().enumerate() {
            if !(axis.range[0].is_finite() && axis.range[1].is_finite()) {
                return Err(DecompositionError::invalid_grid(format!(
                    "stack axis {index} ('{}') has a non-finite range {:?}",
                    axis.label, axis.range
                )));
            }
        }
        // Only the slicing axis may run backwards; the map plane needs
        // increasing coordinates.
        let non_increasing: Vec<usize> = (0..AXIS_COUNT)
            .filter(|&index| axes[index].num > 1 && axes[index].range[0] >= axes[index].range[1])
            .collect();
        if non_increasing.len() > 1 {
            return Err(DecompositionError::invalid_grid(format!(
                "stack axes {non_increasing:?} are not increasing; at most the slicing axis may be"
            )));
        }

        let expected = axes.iter().map(|axis| axis.num).product();
        if data.len() != expected {
            return Err(DecompositionError::ShapeMismatch {
                context: "stack".to_string(),
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            name: name.into(),
            axes,
            data,
            metadata: BTreeMap::new(),
        })
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn axes(&self) -> &[Axis; AXIS_COUNT] {
        &self.axes
    }

    pub fn axis(&self, axis: usize) -> KmapResult<&Axis> {
        self.axes.get(axis).ok_or_else(|| {
            DecompositionError::invalid_configuration(format!(
                "slice axis must be 0, 1 or 2, got {axis}"
            ))
        })
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn shape(&self) -> [usize; AXIS_COUNT] {
        [self.axes[0].num, self.axes[1].num, self.axes[2].num]
    }

    pub fn slice_count(&self, axis: usize) -> KmapResult<usize> {
        Ok(self.axis(axis)?.num)
    }

    pub fn axis_values(&self, axis: usize) -> KmapResult<Vec<f64>> {
        Ok(self.axis(axis)?.coordinates())
    }

    fn flat_index(&self, indices: [usize; AXIS_COUNT]) -> usize {
        let [_, n1, n2] = self.shape();
        (indices[0] * n1 + indices[1]) * n2 + indices[2]
    }

    /// The two axes left over after slicing along `axis`, as (rows, columns).
    fn remaining_axes(axis: usize) -> (usize, usize) {
        match axis {
            0 => (1, 2),
            1 => (0, 2),
            _ => (0, 1),
        }
    }

    /// Cuts the 2D map at `index` along `axis`. Rows of the result follow the
    /// earlier remaining axis and columns the later one.
    pub fn extract(&self, index: usize, axis: usize) -> KmapResult<SliceView> {
        let slice_axis = self.axis(axis)?;
        if index >= slice_axis.num {
            return Err(DecompositionError::IndexOutOfRange {
                index,
                len: slice_axis.num,
            });
        }

        let (row_axis, column_axis) = Self::remaining_axes(axis);
        let rows = self.axes[row_axis].num;
        let columns = self.axes[column_axis].num;
        let mut values = Vec::with_capacity(rows * columns);
        for row in 0..rows {
            for column in 0..columns {
                let mut indices = [0; AXIS_COUNT];
                indices[axis] = index;
                indices[row_axis] = row;
                indices[column_axis] = column;
                values.push(self.data[self.flat_index(indices)]);
            }
        }

        let map = self.plane_map(row_axis, column_axis, values)?;
        Ok(SliceView {
            index,
            map,
            axis_value: slice_axis.value_at(index).unwrap_or(f64::NAN),
            axis_label: slice_axis.label.clone(),
            axis_units: slice_axis.units.clone(),
        })
    }

    /// Sum of every slice along `axis`, ignoring NaN. A point is NaN only when
    /// it is NaN in all slices.
    pub fn combined(&self, axis: usize) -> KmapResult<SliceView> {
        let slice_axis = self.axis(axis)?;
        let (row_axis, column_axis) = Self::remaining_axes(axis);
        let rows = self.axes[row_axis].num;
        let columns = self.axes[column_axis].num;

        let mut sums = vec![0.0; rows * columns];
        let mut seen = vec![false; rows * columns];
        for slice in 0..slice_axis.num {
            for row in 0..rows {
                for column in 0..columns {
                    let mut indices = [0; AXIS_COUNT];
                    indices[axis] = slice;
                    indices[row_axis] = row;
                    indices[column_axis] = column;
                    let value = self.data[self.flat_index(indices)];
                    if value.is_finite() {
                        sums[row * columns + column] += value;
                        seen[row * columns + column] = true;
                    }
                }
            }
        }
        let values = sums
            .into_iter()
            .zip(seen)
            .map(|(sum, seen)| if seen { sum } else { f64::NAN })
            .collect();

        let map = self.plane_map(row_axis, column_axis, values)?;
        Ok(SliceView {
            index: 0,
            map,
            axis_value: 0.5 * (slice_axis.range[0] + slice_axis.range[1]),
            axis_label: slice_axis.label.clone(),
            axis_units: slice_axis.units.clone(),
        })
    }

    /// Reorders the axes so that new axis `k` is old axis `order[k]`.
    pub fn transpose(&self, order: [usize; AXIS_COUNT]) -> KmapResult<SlicedStack> {
        let mut sorted = order;
        sorted.sort_unstable();
        if sorted != [0, 1, 2] {
            return Err(DecompositionError::invalid_configuration(format!(
                "transpose order must be a permutation of [0, 1, 2], got {order:?}"
            )));
        }

        let axes = order.map(|old| self.axes[old].clone());
        let [n0, n1, n2] = axes.each_ref().map(|axis| axis.num);
        let mut data = Vec::with_capacity(self.data.len());
        for j0 in 0..n0 {
            for j1 in 0..n1 {
                for j2 in 0..n2 {
                    let mut old = [0; AXIS_COUNT];
                    old[order[0]] = j0;
                    old[order[1]] = j1;
                    old[order[2]] = j2;
                    data.push(self.data[self.flat_index(old)]);
                }
            }
        }

        Ok(SlicedStack {
            name: self.name.clone(),
            axes,
            data,
            metadata: self.metadata.clone(),
        })
    }

    /// Grid of the maps obtained by slicing along `axis`.
    pub fn plane_grid(&self, axis: usize) -> KmapResult<Grid> {
        self.axis(axis)?;
        let (row_axis, column_axis) = Self::remaining_axes(axis);
        Grid::from_axes(&self.axes[column_axis], &self.axes[row_axis])
    }

    fn plane_map(&self, row_axis: usize, column_axis: usize, values: Vec<f64>) -> KmapResult<ScalarMap> {
        let x_axis = &self.axes[column_axis];
        let y_axis = &self.axes[row_axis];
        let grid = Grid::from_axes(x_axis, y_axis)?;
        Ok(ScalarMap::new(grid, values)?.with_metadata(MapMetadata::from_axes(x_axis, y_axis)))
    }
}
