//! Residual of one slice against the reference set:
//!
//! `r(w, b) = Σᵢ wᵢ·Refᵢ + b(kx, ky) − Target`
//!
//! evaluated only on valid points: the target and every reference finite and
//! the point inside the fit region.

use super::parameters::ParameterTemplate;
use super::reference::ReferenceSet;
use crate::domain::{DecompositionError, KmapResult, ScalarMap};
use crate::modules::background::{BackgroundBasis, EvaluationPoint};
use crate::modules::region::FitRegion;
use crate::numerics::linalg::DenseMatrix;
use crate::numerics::{stable_sum_of_squares, Bound, ResidualProblem};

const EXPRESSION_DIFFERENCE_STEP: f64 = 1.0e-7;

#[derive(Debug)]
pub struct DecompositionModel<'a> {
    references: &'a ReferenceSet,
    background: &'a BackgroundBasis,
    target: Vec<f64>,
    valid: Vec<usize>,
    points: Vec<EvaluationPoint>,
    base: Vec<f64>,
    varying: Vec<usize>,
    bounds: Vec<Bound>,
}

impl<'a> DecompositionModel<'a> {
    /// `target` must already live on the reference grid. Fails with
    /// [`DecompositionError::InvalidData`] when no point survives masking.
    pub fn new(
        references: &'a ReferenceSet,
        background: &'a BackgroundBasis,
        template: &ParameterTemplate,
        target: &ScalarMap,
        region: &FitRegion,
        axis_value: f64,
    ) -> KmapResult<Self> {
        if !target.grid().is_compatible(references.grid()) {
            return Err(DecompositionError::GridMismatch {
                reference: "target".to_string(),
                reason: "slice was not resampled onto the reference grid".to_string(),
            });
        }
        let expected = references.len() + background.parameter_count();
        if template.len() != expected {
            return Err(DecompositionError::ShapeMismatch {
                context: "parameter template".to_string(),
                expected,
                actual: template.len(),
            });
        }

        let grid = references.grid();
        let values = target.values();
        let mut valid = Vec::new();
        let mut points = Vec::new();
        for index in 0..grid.len() {
            let (x, y) = grid.point(index);
            let usable = values[index].is_finite()
                && references
                    .iter()
                    .all(|reference| reference.map.values()[index].is_finite())
                && region.contains(x, y);
            if usable {
                valid.push(index);
                points.push(EvaluationPoint {
                    kx: x,
                    ky: y,
                    axis: axis_value,
                });
            }
        }
        if valid.is_empty() {
            return Err(DecompositionError::invalid_data(format!(
                "no valid point out of {} after masking",
                grid.len()
            )));
        }

        Ok(Self {
            references,
            background,
            target: values.to_vec(),
            valid,
            points,
            base: template.start_values(),
            varying: template.varying_indices(),
            bounds: template.iter().map(|parameter| parameter.bound()).collect(),
        })
    }

    pub fn n_points(&self) -> usize {
        self.valid.len()
    }

    pub fn n_varys(&self) -> usize {
        self.varying.len()
    }

    /// Template indices of the parameters the optimizer sees, in order.
    pub fn varying(&self) -> &[usize] {
        &self.varying
    }

    pub fn initial_free(&self) -> Vec<f64> {
        self.varying.iter().map(|&index| self.base[index]).collect()
    }

    pub fn free_bounds(&self) -> Vec<Bound> {
        self.varying.iter().map(|&index| self.bounds[index]).collect()
    }

    /// All parameter values with the fixed ones taken from the template.
    pub fn full_parameters(&self, free: &[f64]) -> Vec<f64> {
        let mut full = self.base.clone();
        for (&index, value) in self.varying.iter().zip(free) {
            full[index] = *value;
        }
        full
    }

    fn residual_at(&self, slot: usize, full: &[f64]) -> f64 {
        let index = self.valid[slot];
        let weights = &full[..self.references.len()];
        let mut model = 0.0;
        for (reference, weight) in self.references.iter().zip(weights) {
            model += weight * reference.map.values()[index];
        }
        let background = self
            .background
            .evaluate(&self.points[slot], &full[self.references.len()..]);
        model + background - self.target[index]
    }

    fn fill_residuals(&self, full: &[f64], out: &mut [f64]) {
        for (slot, value) in out.iter_mut().enumerate() {
            *value = self.residual_at(slot, full);
        }
    }

    /// Sum of squared residuals over the valid points.
    pub fn chisqr(&self, free: &[f64]) -> f64 {
        let full = self.full_parameters(free);
        let mut residuals = vec![0.0; self.valid.len()];
        self.fill_residuals(&full, &mut residuals);
        stable_sum_of_squares(&residuals)
    }

    pub fn residual_norm(&self, free: &[f64]) -> f64 {
        self.chisqr(free).sqrt()
    }

    /// Residual on the full grid, NaN where the point was masked.
    pub fn residual_map(&self, free: &[f64]) -> KmapResult<ScalarMap> {
        let full = self.full_parameters(free);
        let mut values = vec![f64::NAN; self.target.len()];
        for slot in 0..self.valid.len() {
            values[self.valid[slot]] = self.residual_at(slot, &full);
        }
        ScalarMap::new(self.references.grid().clone(), values)
    }
}

impl ResidualProblem for DecompositionModel<'_> {
    fn parameter_count(&self) -> usize {
        self.varying.len()
    }

    fn residual_count(&self) -> usize {
        self.valid.len()
    }

    fn residuals(&self, params: &[f64], out: &mut [f64]) {
        let full = self.full_parameters(params);
        self.fill_residuals(&full, out);
    }

    fn jacobian(&self, params: &[f64]) -> DenseMatrix {
        let weight_count = self.references.len();
        let full = self.full_parameters(params);
        let mut jacobian = DenseMatrix::zeros(self.valid.len(), self.varying.len());

        let mut base_residuals: Option<Vec<f64>> = None;
        let mut shifted = vec![0.0; self.valid.len()];

        for (column, &parameter) in self.varying.iter().enumerate() {
            if parameter < weight_count {
                let values = self.references.get(parameter).map(|reference| reference.map.values());
                if let Some(values) = values {
                    for (row, &index) in self.valid.iter().enumerate() {
                        jacobian[(row, column)] = values[index];
                    }
                }
                continue;
            }

            let background_index = parameter - weight_count;
            if self.background.derivative(&self.points[0], background_index).is_some() {
                for (row, point) in self.points.iter().enumerate() {
                    jacobian[(row, column)] = self
                        .background
                        .derivative(point, background_index)
                        .unwrap_or(0.0);
                }
                continue;
            }

            let base = base_residuals.get_or_insert_with(|| {
                let mut values = vec![0.0; self.valid.len()];
                self.fill_residuals(&full, &mut values);
                values
            });
            let step = EXPRESSION_DIFFERENCE_STEP * full[parameter].abs().max(1.0);
            let mut probe = full.clone();
            probe[parameter] += step;
            self.fill_residuals(&probe, &mut shifted);
            for row in 0..self.valid.len() {
                jacobian[(row, column)] = (shifted[row] - base[row]) / step;
            }
        }

        jacobian
    }

    fn is_linear(&self) -> bool {
        let weight_count = self.references.len();
        self.background.is_linear()
            || self
                .varying
                .iter()
                .all(|&parameter| parameter < weight_count)
    }
}

#[cfg(test)]
mod tests {
    use super::DecompositionModel;
    use crate::domain::{DecompositionError, Grid, ScalarMap};
    use crate::modules::background::{BackgroundBasis, BackgroundModel, BackgroundRefit, ExpressionParameter};
    use crate::modules::decomposition::{ParameterTemplate, ReferenceSet};
    use crate::modules::region::FitRegion;
    use crate::numerics::{forward_difference_jacobian, GridResampler, ResidualProblem};

    fn grid() -> Grid {
        Grid::new(vec![0.0, 1.0, 2.0], vec![0.0, 1.0]).expect("grid")
    }

    fn references(maps: Vec<(&str, Vec<f64>)>) -> ReferenceSet {
        let maps = maps
            .into_iter()
            .map(|(name, values)| {
                (
                    name.to_string(),
                    ScalarMap::new(grid(), values).expect("map"),
                )
            })
            .collect();
        ReferenceSet::from_maps(grid(), maps, &GridResampler::default()).expect("references")
    }

    #[test]
    fn residual_is_weighted_sum_plus_background_minus_target() {
        let set = references(vec![
            ("A", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            ("B", vec![0.5; 6]),
        ]);
        let background = BackgroundBasis::Constant;
        let template = ParameterTemplate::for_decomposition(&set.names(), &background).expect("template");
        let target = ScalarMap::filled(grid(), 2.0);

        let model =
            DecompositionModel::new(&set, &background, &template, &target, &FitRegion::all(), 0.0)
                .expect("model");
        let mut out = vec![0.0; model.residual_count()];
        model.residuals(&[2.0, 4.0, 0.25], &mut out);

        let expected: Vec<f64> = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
            .iter()
            .map(|value| 2.0 * value + 4.0 * 0.5 + 0.25 - 2.0)
            .collect();
        assert_eq!(out, expected);
        assert!(model.is_linear());
    }

    #[test]
    fn nan_cells_are_masked_regardless_of_target_value() {
        let mut a = vec![1.0; 6];
        a[4] = f64::NAN;
        let set = references(vec![("A", a)]);
        let background = BackgroundBasis::Constant;
        let template = ParameterTemplate::for_decomposition(&set.names(), &background).expect("template");

        let mut norms = Vec::new();
        for injected in [0.0, 1.0e6, -3.5] {
            let mut target = ScalarMap::filled(grid(), 3.0);
            target.values_mut()[4] = injected;
            let model = DecompositionModel::new(
                &set,
                &background,
                &template,
                &target,
                &FitRegion::all(),
                0.0,
            )
            .expect("model");
            assert_eq!(model.n_points(), 5);
            norms.push(model.residual_norm(&[1.5, 0.5]));
        }
        assert!(norms.iter().all(|norm| *norm == norms[0]));
    }

    #[test]
    fn region_and_target_nan_reduce_the_valid_points() {
        let set = references(vec![("A", vec![1.0; 6])]);
        let background = BackgroundBasis::None;
        let template = ParameterTemplate::for_decomposition(&set.names(), &background).expect("template");
        let mut target = ScalarMap::filled(grid(), 1.0);
        target.values_mut()[0] = f64::NAN;

        let model = DecompositionModel::new(
            &set,
            &background,
            &template,
            &target,
            &FitRegion::roi([0.0, 0.0], 1.0),
            0.0,
        )
        .expect("model");
        // (0,0) is NaN; (1,0) and (0,1) remain inside the unit disk.
        assert_eq!(model.n_points(), 2);

        let residual = model.residual_map(&[1.0]).expect("residual map");
        assert!(residual.values()[0].is_nan());
        assert_eq!(residual.values()[1], 0.0);
        assert!(residual.values()[5].is_nan());
    }

    #[test]
    fn all_invalid_slice_is_invalid_data() {
        let set = references(vec![("A", vec![1.0; 6])]);
        let background = BackgroundBasis::Constant;
        let template = ParameterTemplate::for_decomposition(&set.names(), &background).expect("template");
        let target = ScalarMap::filled(grid(), f64::NAN);

        let error = DecompositionModel::new(&set, &background, &template, &target, &FitRegion::all(), 0.0)
            .expect_err("no data");
        assert!(matches!(error, DecompositionError::InvalidData { .. }));
    }

    #[test]
    fn fixed_parameters_are_hidden_from_the_optimizer() {
        let set = references(vec![("A", vec![1.0; 6]), ("B", vec![2.0; 6])]);
        let background = BackgroundBasis::Constant;
        let mut template = ParameterTemplate::for_decomposition(&set.names(), &background).expect("template");
        template
            .apply_override(
                "background",
                &crate::modules::decomposition::ParameterOverride {
                    value: Some(0.5),
                    vary: Some(false),
                    ..Default::default()
                },
            )
            .expect("override");
        let target = ScalarMap::filled(grid(), 0.0);

        let model = DecompositionModel::new(&set, &background, &template, &target, &FitRegion::all(), 0.0)
            .expect("model");
        assert_eq!(model.parameter_count(), 2);
        assert_eq!(model.full_parameters(&[3.0, 4.0]), vec![3.0, 4.0, 0.5]);
        assert_eq!(model.initial_free(), vec![1.0, 1.0]);
    }

    #[test]
    fn expression_jacobian_matches_finite_differences() {
        let set = references(vec![("A", vec![1.0, 0.0, 2.0, 1.0, 3.0, 0.5])]);
        let background = BackgroundModel::Expression {
            equation: "c0 * exp(-kx * rate) + ky".to_string(),
            parameters: vec![
                ExpressionParameter {
                    name: "c0".to_string(),
                    value: 1.0,
                    min: None,
                    max: None,
                },
                ExpressionParameter {
                    name: "rate".to_string(),
                    value: 0.5,
                    min: Some(0.0),
                    max: None,
                },
            ],
            refit: BackgroundRefit::PerSlice,
        }
        .compile()
        .expect("compile");
        let template = ParameterTemplate::for_decomposition(&set.names(), &background).expect("template");
        let target = ScalarMap::filled(grid(), 1.0);

        let model = DecompositionModel::new(&set, &background, &template, &target, &FitRegion::all(), 0.0)
            .expect("model");
        assert!(!model.is_linear());

        let params = [0.7, 1.3, 0.4];
        let analytic = model.jacobian(&params);
        let numeric = forward_difference_jacobian(&model, &params);
        for row in 0..model.residual_count() {
            for column in 0..model.parameter_count() {
                let delta = (analytic[(row, column)] - numeric[(row, column)]).abs();
                assert!(delta < 1.0e-5, "row {row} column {column}: delta={delta}");
            }
        }
    }
}
