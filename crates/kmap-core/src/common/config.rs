//! Run configuration for a decomposition.
//!
//! The configuration is a JSON document deserialized straight into
//! [`FitConfig`]. Every field except `references` has a default, so the
//! smallest valid file names the orbitals and nothing else.

use crate::domain::{arange, DecompositionError, ExecutionMode, Grid, KmapResult};
use crate::modules::background::{BackgroundBasis, BackgroundModel};
use crate::modules::decomposition::{
    FitSettings, ParameterOverride, ParameterTemplate, SlicePolicy,
};
use crate::modules::region::FitRegion;
use crate::modules::serialization::read_json_artifact;
use crate::modules::slicing::AXIS_COUNT;
use crate::modules::traits::GeometryParameters;
use crate::numerics::InterpolationMethod;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const DEFAULT_K_MIN: f64 = -3.0;
pub const DEFAULT_K_MAX: f64 = 3.0;
pub const DEFAULT_K_STEP: f64 = 0.05;

/// One target-grid axis, either listed point by point or as a half-open
/// range `[min, max)` sampled every `step`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisSpec {
    Values(Vec<f64>),
    Range { min: f64, max: f64, step: f64 },
}

impl AxisSpec {
    pub fn coordinates(&self) -> Vec<f64> {
        match self {
            Self::Values(values) => values.clone(),
            Self::Range { min, max, step } => arange(*min, *max, *step),
        }
    }
}

impl Default for AxisSpec {
    fn default() -> Self {
        Self::Range {
            min: DEFAULT_K_MIN,
            max: DEFAULT_K_MAX,
            step: DEFAULT_K_STEP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSpec {
    pub x: AxisSpec,
    pub y: AxisSpec,
}

impl GridSpec {
    pub fn build(&self) -> KmapResult<Grid> {
        Grid::new(self.x.coordinates(), self.y.coordinates())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    #[serde(default)]
    pub target_grid: GridSpec,
    pub references: Vec<String>,
    #[serde(default)]
    pub geometry: GeometryParameters,
    #[serde(default)]
    pub background: BackgroundModel,
    #[serde(default)]
    pub optimizer: FitSettings,
    #[serde(default)]
    pub region: FitRegion,
    #[serde(default)]
    pub slice_policy: SlicePolicy,
    #[serde(default)]
    pub slice_axis: usize,
    #[serde(default)]
    pub interpolation: InterpolationMethod,
    #[serde(default)]
    pub execution: ExecutionMode,
    #[serde(default)]
    pub warm_start: bool,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterOverride>,
}

impl FitConfig {
    /// Configuration with every default and the given reference names.
    pub fn new(references: Vec<String>) -> Self {
        Self {
            target_grid: GridSpec::default(),
            references,
            geometry: GeometryParameters::default(),
            background: BackgroundModel::default(),
            optimizer: FitSettings::default(),
            region: FitRegion::default(),
            slice_policy: SlicePolicy::default(),
            slice_axis: 0,
            interpolation: InterpolationMethod::default(),
            execution: ExecutionMode::default(),
            warm_start: false,
            parameters: BTreeMap::new(),
        }
    }

    pub fn from_json_str(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }

    /// Checks everything that can be checked before any map is loaded.
    pub fn validate(&self) -> KmapResult<()> {
        if self.references.is_empty() {
            return Err(DecompositionError::invalid_configuration(
                "at least one reference orbital is required",
            ));
        }
        let mut seen = BTreeSet::new();
        for name in &self.references {
            if name.trim().is_empty() {
                return Err(DecompositionError::invalid_configuration(
                    "reference names must not be empty",
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(DecompositionError::invalid_configuration(format!(
                    "duplicate reference name '{name}'"
                )));
            }
        }

        let options = &self.optimizer.options;
        if !(options.tolerance.is_finite() && options.tolerance > 0.0) {
            return Err(DecompositionError::invalid_configuration(format!(
                "optimizer tolerance must be positive, got {}",
                options.tolerance
            )));
        }
        if options.max_iterations == 0 {
            return Err(DecompositionError::invalid_configuration(
                "optimizer max_iterations must be at least 1",
            ));
        }

        if self.slice_axis >= AXIS_COUNT {
            return Err(DecompositionError::invalid_configuration(format!(
                "slice_axis must be 0, 1 or 2, got {}",
                self.slice_axis
            )));
        }
        if self.warm_start && self.execution == ExecutionMode::Parallel {
            return Err(DecompositionError::invalid_configuration(
                "warm_start requires serial execution",
            ));
        }

        self.region.validate()?;
        self.target_grid.build()?;
        let basis = self.background.compile()?;
        self.parameter_template(&basis)?;
        Ok(())
    }

    pub fn target_grid(&self) -> KmapResult<Grid> {
        self.target_grid.build()
    }

    /// Weights for every reference, the background parameters, then the
    /// configured overrides applied on top.
    pub fn parameter_template(&self, background: &BackgroundBasis) -> KmapResult<ParameterTemplate> {
        let mut template = ParameterTemplate::for_decomposition(&self.references, background)?;
        for (name, update) in &self.parameters {
            template.apply_override(name, update)?;
        }
        Ok(template)
    }
}

/// Reads and validates a configuration file.
pub fn load_fit_config(path: impl AsRef<Path>) -> KmapResult<FitConfig> {
    let config: FitConfig = read_json_artifact(path.as_ref())?;
    config.validate()?;
    Ok(config)
}
