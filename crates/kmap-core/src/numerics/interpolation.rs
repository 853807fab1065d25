//! Resampling of 2D maps onto a shared momentum grid.
//!
//! Target points outside the extent of the source grid are NaN; nothing is
//! extrapolated. A source corner contributes only when its interpolation
//! weight is non-zero, so sampling exactly on source nodes reproduces the
//! source values bit for bit even next to NaN cells.

use crate::domain::{Grid, ScalarMap};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMethod {
    #[default]
    Linear,
    Nearest,
}

impl InterpolationMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Nearest => "nearest",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Bracket {
    lower: usize,
    upper: usize,
    fraction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GridResampler {
    method: InterpolationMethod,
}

impl GridResampler {
    pub const fn new(method: InterpolationMethod) -> Self {
        Self { method }
    }

    pub const fn method(&self) -> InterpolationMethod {
        self.method
    }

    /// Returns a new map on `target`. The source map is left untouched.
    pub fn resample(&self, map: &ScalarMap, target: &Grid) -> ScalarMap {
        if map.grid().is_compatible(target) {
            return map.clone();
        }

        let source = map.grid();
        let x_brackets: Vec<Option<Bracket>> =
            target.x().iter().map(|&x| locate(source.x(), x)).collect();
        let y_brackets: Vec<Option<Bracket>> =
            target.y().iter().map(|&y| locate(source.y(), y)).collect();

        let source_columns = source.x().len();
        let values = map.values();
        let mut output = Vec::with_capacity(target.len());

        for y_bracket in &y_brackets {
            for x_bracket in &x_brackets {
                let value = match (y_bracket, x_bracket) {
                    (Some(yb), Some(xb)) => match self.method {
                        InterpolationMethod::Linear => {
                            bilinear(values, source_columns, yb, xb)
                        }
                        InterpolationMethod::Nearest => {
                            let row = nearest_index(yb);
                            let column = nearest_index(xb);
                            values[row * source_columns + column]
                        }
                    },
                    _ => f64::NAN,
                };
                output.push(value);
            }
        }

        ScalarMap::new(target.clone(), output)
            .map(|resampled| resampled.with_metadata(map.metadata().clone()))
            .unwrap_or_else(|_| ScalarMap::filled(target.clone(), f64::NAN))
    }
}

fn locate(axis: &[f64], query: f64) -> Option<Bracket> {
    let last = axis.len() - 1;
    if !query.is_finite() || query < axis[0] || query > axis[last] {
        return None;
    }

    // IEEE ordering throughout, so -0.0 and 0.0 land on the same node.
    let upper = axis.partition_point(|value| *value < query).min(last);
    if axis[upper] == query || upper == 0 {
        return Some(Bracket {
            lower: upper,
            upper,
            fraction: 0.0,
        });
    }
    let lower = upper - 1;
    let fraction = (query - axis[lower]) / (axis[upper] - axis[lower]);
    Some(Bracket {
        lower,
        upper,
        fraction,
    })
}

fn nearest_index(bracket: &Bracket) -> usize {
    if bracket.fraction <= 0.5 {
        bracket.lower
    } else {
        bracket.upper
    }
}

fn bilinear(values: &[f64], columns: usize, row: &Bracket, column: &Bracket) -> f64 {
    let corners = [
        (row.lower, column.lower, (1.0 - row.fraction) * (1.0 - column.fraction)),
        (row.lower, column.upper, (1.0 - row.fraction) * column.fraction),
        (row.upper, column.lower, row.fraction * (1.0 - column.fraction)),
        (row.upper, column.upper, row.fraction * column.fraction),
    ];

    let mut sum = 0.0;
    for (r, c, weight) in corners {
        if weight == 0.0 {
            continue;
        }
        let value = values[r * columns + c];
        if !value.is_finite() {
            return f64::NAN;
        }
        sum += weight * value;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::{GridResampler, InterpolationMethod};
    use crate::domain::{Grid, ScalarMap};

    fn plane_map() -> ScalarMap {
        let grid = Grid::new(vec![0.0, 1.0, 2.0, 4.0], vec![-1.0, 0.0, 1.0]).expect("grid");
        ScalarMap::from_fn(grid, |x, y| 2.0 * x - 3.0 * y + 0.5)
    }

    #[test]
    fn bilinear_reproduces_planes_on_irregular_source_grids() {
        let source = plane_map();
        let target = Grid::new(vec![0.25, 1.5, 3.0], vec![-0.5, 0.75]).expect("grid");

        let resampled = GridResampler::default().resample(&source, &target);

        for index in 0..target.len() {
            let (x, y) = target.point(index);
            let expected = 2.0 * x - 3.0 * y + 0.5;
            let actual = resampled.values()[index];
            assert!(
                (actual - expected).abs() < 1.0e-12,
                "point ({x}, {y}) expected={expected} actual={actual}"
            );
        }
    }

    #[test]
    fn points_outside_the_source_extent_are_nan() {
        let source = plane_map();
        let target = Grid::new(vec![-0.5, 0.0, 4.0, 4.5], vec![0.0]).expect("grid");

        let resampled = GridResampler::default().resample(&source, &target);
        let values = resampled.values();

        assert!(values[0].is_nan());
        assert_eq!(values[1], 0.5);
        assert_eq!(values[2], 8.5);
        assert!(values[3].is_nan());
    }

    #[test]
    fn signed_zero_coordinates_hit_the_zero_node() {
        let source = ScalarMap::from_fn(
            Grid::new(vec![0.0, 1.0], vec![0.0, 1.0]).expect("grid"),
            |x, y| 1.0 + x + 2.0 * y,
        );
        let target = Grid::new(vec![-0.0, 0.5], vec![0.0, 0.5]).expect("grid");
        for method in [InterpolationMethod::Linear, InterpolationMethod::Nearest] {
            let resampled = GridResampler::new(method).resample(&source, &target);
            assert_eq!(resampled.values()[0], 1.0, "{method:?}");
        }

        let source = ScalarMap::from_fn(
            Grid::new(vec![-1.0, -0.0], vec![0.0, 1.0]).expect("grid"),
            |x, _| 3.0 + x,
        );
        let target = Grid::new(vec![-0.5, 0.0], vec![0.0, 1.0]).expect("grid");
        let resampled = GridResampler::default().resample(&source, &target);
        assert_eq!(resampled.values(), &[2.5, 3.0, 2.5, 3.0]);
    }

    #[test]
    fn nan_corners_only_poison_points_that_use_them() {
        let grid = Grid::new(vec![0.0, 1.0, 2.0], vec![0.0, 1.0]).expect("grid");
        let mut source = ScalarMap::filled(grid, 1.0);
        source.values_mut()[2] = f64::NAN;

        let target = Grid::new(vec![0.0, 0.5, 1.0, 1.5], vec![0.0, 1.0]).expect("grid");
        let resampled = GridResampler::default().resample(&source, &target);
        let values = resampled.values();

        assert_eq!(values[0], 1.0);
        assert_eq!(values[1], 1.0);
        assert_eq!(values[2], 1.0, "exact node next to NaN keeps its value");
        assert!(values[3].is_nan());
    }

    #[test]
    fn nearest_method_picks_the_closest_node() {
        let grid = Grid::new(vec![0.0, 1.0], vec![0.0]).expect("grid");
        let source = ScalarMap::new(grid, vec![3.0, 7.0]).expect("map");
        let target = Grid::new(vec![0.2, 0.8], vec![0.0]).expect("grid");

        let resampled = GridResampler::new(InterpolationMethod::Nearest).resample(&source, &target);
        assert_eq!(resampled.values(), &[3.0, 7.0]);
    }
}
