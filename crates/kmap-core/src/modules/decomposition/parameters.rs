//! Named fit parameters.
//!
//! A [`ParameterTemplate`] is built once per run and never changed while
//! slices are fitted; every slice fit reads its starting point from the
//! template (or from a seeded copy of it).

use crate::domain::{DecompositionError, KmapResult};
use crate::modules::background::BackgroundBasis;
use crate::numerics::Bound;
use serde::{Deserialize, Serialize};

pub const DEFAULT_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub vary: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            vary: true,
        }
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn non_negative(self) -> Self {
        self.with_bounds(0.0, f64::INFINITY)
    }

    pub fn with_vary(mut self, vary: bool) -> Self {
        self.vary = vary;
        self
    }

    pub fn bound(&self) -> Bound {
        Bound::new(self.min, self.max)
    }

    /// Value projected into `[min, max]`.
    pub fn start_value(&self) -> f64 {
        self.bound().clamp(self.value)
    }

    pub fn validate(&self) -> KmapResult<()> {
        if self.name.trim().is_empty() {
            return Err(DecompositionError::invalid_configuration(
                "parameter names must not be empty",
            ));
        }
        if !self.value.is_finite() {
            return Err(DecompositionError::invalid_configuration(format!(
                "parameter '{}' needs a finite initial value, got {}",
                self.name, self.value
            )));
        }
        if self.min.is_nan() || self.max.is_nan() || self.min > self.max {
            return Err(DecompositionError::invalid_configuration(format!(
                "parameter '{}' has invalid bounds [{}, {}]",
                self.name, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Partial update of a template parameter read from configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterOverride {
    #[serde(alias = "initial")]
    pub value: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub vary: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterTemplate {
    parameters: Vec<Parameter>,
}

impl ParameterTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    /// One non-negative weight per reference followed by the background
    /// parameters, in that order.
    pub fn for_decomposition(
        reference_names: &[String],
        background: &BackgroundBasis,
    ) -> KmapResult<Self> {
        let mut template = Self::new();
        for name in reference_names {
            template.push(Parameter::new(name.clone(), DEFAULT_WEIGHT).non_negative())?;
        }
        for parameter in background.parameters() {
            template.push(parameter)?;
        }
        Ok(template)
    }

    pub fn push(&mut self, parameter: Parameter) -> KmapResult<()> {
        parameter.validate()?;
        if self.position(&parameter.name).is_some() {
            return Err(DecompositionError::invalid_configuration(format!(
                "duplicate parameter name '{}'",
                parameter.name
            )));
        }
        self.parameters.push(parameter);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter()
    }

    pub fn as_slice(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.parameters
            .iter()
            .position(|parameter| parameter.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.position(name).map(|index| &self.parameters[index])
    }

    pub fn names(&self) -> Vec<String> {
        self.parameters
            .iter()
            .map(|parameter| parameter.name.clone())
            .collect()
    }

    pub fn apply_override(&mut self, name: &str, update: &ParameterOverride) -> KmapResult<()> {
        let index = self.position(name).ok_or_else(|| {
            DecompositionError::invalid_configuration(format!(
                "override targets unknown parameter '{name}'"
            ))
        })?;

        let mut parameter = self.parameters[index].clone();
        if let Some(value) = update.value {
            parameter.value = value;
        }
        if let Some(min) = update.min {
            parameter.min = min;
        }
        if let Some(max) = update.max {
            parameter.max = max;
        }
        if let Some(vary) = update.vary {
            parameter.vary = vary;
        }
        parameter.validate()?;

        self.parameters[index] = parameter;
        Ok(())
    }

    pub fn varying_indices(&self) -> Vec<usize> {
        self.parameters
            .iter()
            .enumerate()
            .filter_map(|(index, parameter)| parameter.vary.then_some(index))
            .collect()
    }

    pub fn n_varys(&self) -> usize {
        self.parameters.iter().filter(|parameter| parameter.vary).count()
    }

    /// Starting values of all parameters, projected into their bounds.
    pub fn start_values(&self) -> Vec<f64> {
        self.parameters.iter().map(Parameter::start_value).collect()
    }

    /// Copy whose varying parameters start from `values` instead. Non-finite
    /// entries keep the template value.
    pub fn seeded(&self, values: &[f64]) -> Self {
        let parameters = self
            .parameters
            .iter()
            .zip(values.iter().copied().chain(std::iter::repeat(f64::NAN)))
            .map(|(parameter, value)| {
                let mut seeded = parameter.clone();
                if parameter.vary && value.is_finite() {
                    seeded.value = parameter.bound().clamp(value);
                }
                seeded
            })
            .collect();
        Self { parameters }
    }
}

#[cfg(test)]
mod tests {
    use super::{Parameter, ParameterOverride, ParameterTemplate};
    use crate::modules::background::BackgroundBasis;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn decomposition_template_lists_weights_then_background() {
        let template = ParameterTemplate::for_decomposition(
            &names(&["PTCDA_C", "PTCDA_D"]),
            &BackgroundBasis::Constant,
        )
        .expect("template");

        assert_eq!(template.names(), names(&["PTCDA_C", "PTCDA_D", "background"]));
        let weight = template.get("PTCDA_C").expect("weight");
        assert_eq!(weight.value, 1.0);
        assert_eq!(weight.min, 0.0);
        assert_eq!(weight.max, f64::INFINITY);
        assert_eq!(template.n_varys(), 3);
    }

    #[test]
    fn duplicate_and_clashing_names_are_rejected() {
        assert!(
            ParameterTemplate::for_decomposition(&names(&["a", "a"]), &BackgroundBasis::None)
                .is_err()
        );
        assert!(
            ParameterTemplate::for_decomposition(
                &names(&["background"]),
                &BackgroundBasis::Constant
            )
            .is_err()
        );
    }

    #[test]
    fn overrides_fix_parameters_and_validate_bounds() {
        let mut template =
            ParameterTemplate::for_decomposition(&names(&["A"]), &BackgroundBasis::Constant)
                .expect("template");

        template
            .apply_override(
                "background",
                &ParameterOverride {
                    value: Some(0.0),
                    vary: Some(false),
                    ..ParameterOverride::default()
                },
            )
            .expect("override");
        assert_eq!(template.varying_indices(), vec![0]);
        assert_eq!(template.get("background").map(|p| p.value), Some(0.0));

        let error = template.apply_override(
            "A",
            &ParameterOverride {
                min: Some(2.0),
                max: Some(1.0),
                ..ParameterOverride::default()
            },
        );
        assert!(error.is_err());
        assert_eq!(template.get("A").map(|p| p.min), Some(0.0));
        assert!(template.apply_override("missing", &ParameterOverride::default()).is_err());
    }

    #[test]
    fn seeded_copy_clamps_and_keeps_fixed_values() {
        let mut template = ParameterTemplate::new();
        template
            .push(Parameter::new("w", 1.0).non_negative())
            .expect("push");
        template
            .push(Parameter::new("fixed", 3.0).with_vary(false))
            .expect("push");

        let seeded = template.seeded(&[-2.0, 10.0]);
        assert_eq!(seeded.start_values(), vec![0.0, 3.0]);
        assert_eq!(template.start_values(), vec![1.0, 3.0]);

        let partial = template.seeded(&[f64::NAN]);
        assert_eq!(partial.start_values(), vec![1.0, 3.0]);
    }
}
