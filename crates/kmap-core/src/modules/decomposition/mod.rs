//! Per-slice linear decomposition of measured maps into reference maps.
//!
//! Data flow: [`SlicedStack::extract`](crate::modules::slicing::SlicedStack::extract)
//! → [`GridResampler`](crate::numerics::GridResampler) → [`DecompositionModel`]
//! → bounded optimizer → [`SliceResult`] → [`Trajectory`].

mod fitter;
mod model;
mod parameters;
mod reference;
mod trajectory;

pub use fitter::{FailureReason, FitSettings, FittedParameter, SliceFitter, SliceResult, SliceStatus};
pub use model::DecompositionModel;
pub use parameters::{Parameter, ParameterOverride, ParameterTemplate, DEFAULT_WEIGHT};
pub use reference::{ReferenceMap, ReferenceSet};
pub use trajectory::{SlicePolicy, Trajectory, TrajectoryAssembler};
