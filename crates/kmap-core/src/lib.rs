//! Decomposition of ARPES momentum maps into weighted sums of simulated
//! orbital maps, one fit per slice of a measured stack.

pub mod common;
pub mod domain;
pub mod modules;
pub mod numerics;

pub use common::config::{load_fit_config, FitConfig};
pub use domain::{DecompositionError, ExecutionMode, Grid, KmapResult, ScalarMap};
pub use modules::decomposition::{SliceResult, SliceStatus, Trajectory};
pub use modules::run_decomposition;
