use kmap_core::domain::{Axis, DecompositionError, Grid, ScalarMap};
use kmap_core::modules::background::BackgroundBasis;
use kmap_core::modules::decomposition::{
    FailureReason, FitSettings, ParameterOverride, ParameterTemplate, ReferenceSet, SliceFitter,
    SliceStatus, TrajectoryAssembler,
};
use kmap_core::modules::region::FitRegion;
use kmap_core::modules::slicing::{SliceView, SlicedStack};
use kmap_core::numerics::{GridResampler, InterpolationMethod, OptimizerMethod, OptimizerOptions};
use kmap_core::ExecutionMode;

const X: [f64; 5] = [-1.0, -0.5, 0.0, 0.5, 1.0];
const Y: [f64; 3] = [-1.0, 0.0, 1.0];

fn grid() -> Grid {
    Grid::new(X.to_vec(), Y.to_vec()).expect("grid should be valid")
}

fn view(index: usize, map: ScalarMap) -> SliceView {
    SliceView {
        index,
        map,
        axis_value: index as f64,
        axis_label: "E_b".to_string(),
        axis_units: "eV".to_string(),
    }
}

fn assert_close(label: &str, actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "{label}: expected={expected} actual={actual} tolerance={tolerance}"
    );
}

fn settings(method: OptimizerMethod) -> FitSettings {
    FitSettings {
        method,
        options: OptimizerOptions::default(),
    }
}

#[test]
fn constant_maps_with_fixed_background_recover_exact_weights() {
    let references = ReferenceSet::from_maps(
        grid(),
        vec![
            ("A".to_string(), ScalarMap::filled(grid(), 1.0)),
            ("B".to_string(), ScalarMap::filled(grid(), 0.0)),
        ],
        &GridResampler::default(),
    )
    .expect("reference set should build");
    let background = BackgroundBasis::Constant;
    let mut template = ParameterTemplate::for_decomposition(&references.names(), &background)
        .expect("template should build");
    template
        .apply_override(
            "background",
            &ParameterOverride {
                value: Some(0.0),
                vary: Some(false),
                ..ParameterOverride::default()
            },
        )
        .expect("background override should apply");
    let region = FitRegion::all();

    for method in [OptimizerMethod::ActiveSet, OptimizerMethod::LevenbergMarquardt] {
        let fitter = SliceFitter::new(
            &references,
            &background,
            &region,
            InterpolationMethod::Linear,
            settings(method),
        );
        let result = fitter.fit(&view(0, ScalarMap::filled(grid(), 2.0)), &template);

        assert!(result.status.is_success(), "{method}: {}", result.status);
        assert_close(&format!("{method} weight A"), result.value("A").unwrap_or(f64::NAN), 2.0, 1.0e-6);
        assert_close(&format!("{method} residual"), result.residual_norm, 0.0, 1.0e-6);
        assert_eq!(result.value("background"), Some(0.0));
        assert_close(&format!("{method} weight B"), result.value("B").unwrap_or(f64::NAN), 0.0, 1.0e-6);
        assert!(result.status.is_degenerate(), "{method}: {}", result.status);
    }
}

fn shape(x: f64, y: f64) -> f64 {
    1.0 + x + y * y
}

/// One slice per `(total weight, background)` pair, built from `shape` alone.
fn shape_stack(slices: &[(f64, f64)]) -> SlicedStack {
    let mut data = Vec::new();
    for &(total, background) in slices {
        for flat in 0..grid().len() {
            let (x, y) = grid().point(flat);
            data.push(total * shape(x, y) + background);
        }
    }
    let axes = [
        Axis::new("E_b", "eV", [-1.0, 0.0], slices.len()),
        Axis::new("ky", "1/Å", [-1.0, 1.0], Y.len()),
        Axis::new("kx", "1/Å", [-1.0, 1.0], X.len()),
    ];
    SlicedStack::new("identical", axes, data).expect("stack should build")
}

#[test]
fn identical_references_are_flagged_degenerate_by_both_methods() {
    let references = ReferenceSet::from_maps(
        grid(),
        vec![
            ("A".to_string(), ScalarMap::from_fn(grid(), shape)),
            ("B".to_string(), ScalarMap::from_fn(grid(), shape)),
        ],
        &GridResampler::default(),
    )
    .expect("reference set should build");
    let background = BackgroundBasis::Constant;
    let template = ParameterTemplate::for_decomposition(&references.names(), &background)
        .expect("template should build");
    let region = FitRegion::all();
    let slices = [(3.0, 0.5), (1.2, 0.25)];
    let stack = shape_stack(&slices);

    for method in [OptimizerMethod::ActiveSet, OptimizerMethod::LevenbergMarquardt] {
        let fitter = SliceFitter::new(
            &references,
            &background,
            &region,
            InterpolationMethod::Linear,
            settings(method),
        );
        let trajectory = TrajectoryAssembler::new(fitter)
            .run(&stack, 0, &template)
            .expect("trajectory should assemble");

        assert_eq!(trajectory.degenerate_indices(), vec![0, 1], "{method}");
        assert!(trajectory.failed_indices().is_empty(), "{method}");
        for (slice, (total, offset)) in trajectory.slices().iter().zip(slices) {
            assert!(slice.status.is_success(), "{method}: {}", slice.status);
            assert!(
                matches!(&slice.status, SliceStatus::Degenerate { columns } if columns == &["B".to_string()]),
                "{method}: {}",
                slice.status
            );
            assert!(slice.parameters.iter().all(|parameter| parameter.value >= 0.0));
            let sum = slice.value("A").unwrap_or(f64::NAN) + slice.value("B").unwrap_or(f64::NAN);
            assert_close(&format!("{method} slice {} A + B", slice.index), sum, total, 1.0e-6);
            assert_close(
                &format!("{method} slice {} background", slice.index),
                slice.value("background").unwrap_or(f64::NAN),
                offset,
                1.0e-6,
            );
            assert_close(&format!("{method} slice {} residual", slice.index), slice.residual_norm, 0.0, 1.0e-6);
        }
    }
}

#[test]
fn nearly_collinear_references_still_resolve_their_weights() {
    let first = ScalarMap::from_fn(grid(), shape);
    let second = ScalarMap::from_fn(grid(), |x, y| shape(x, y) + 0.05 * x * y);
    let references = ReferenceSet::from_maps(
        grid(),
        vec![("A".to_string(), first.clone()), ("B".to_string(), second.clone())],
        &GridResampler::default(),
    )
    .expect("reference set should build");
    let background = BackgroundBasis::Constant;
    let template = ParameterTemplate::for_decomposition(&references.names(), &background)
        .expect("template should build");
    let region = FitRegion::all();
    let target = ScalarMap::from_fn(grid(), |x, y| {
        2.0 * shape(x, y) + (shape(x, y) + 0.05 * x * y) + 0.5
    });

    for method in [OptimizerMethod::ActiveSet, OptimizerMethod::LevenbergMarquardt] {
        let fitter = SliceFitter::new(
            &references,
            &background,
            &region,
            InterpolationMethod::Linear,
            settings(method),
        );
        let result = fitter.fit(&view(0, target.clone()), &template);

        assert_eq!(result.status, SliceStatus::Converged, "{method}");
        for (name, expected) in [("A", 2.0), ("B", 1.0), ("background", 0.5)] {
            assert_close(
                &format!("{method} {name}"),
                result.value(name).unwrap_or(f64::NAN),
                expected,
                1.0e-5,
            );
        }
        assert_close(&format!("{method} residual"), result.residual_norm, 0.0, 1.0e-6);
    }
}

#[test]
fn exact_reference_match_gives_unit_weight_and_zero_elsewhere() {
    let first = ScalarMap::from_fn(grid(), |x, y| (-(x * x + y * y)).exp());
    let second = ScalarMap::from_fn(grid(), |x, _| 1.0 + x);
    let third = ScalarMap::from_fn(grid(), |_, y| 2.0 + y * y);
    let references = ReferenceSet::from_maps(
        grid(),
        vec![
            ("first".to_string(), first),
            ("second".to_string(), second.clone()),
            ("third".to_string(), third),
        ],
        &GridResampler::default(),
    )
    .expect("reference set should build");
    let background = BackgroundBasis::None;
    let template = ParameterTemplate::for_decomposition(&references.names(), &background)
        .expect("template should build");
    let region = FitRegion::all();
    let fitter = SliceFitter::new(
        &references,
        &background,
        &region,
        InterpolationMethod::Linear,
        FitSettings::default(),
    );

    let result = fitter.fit(&view(0, second), &template);
    assert_eq!(result.status, SliceStatus::Converged);
    for (name, expected) in [("first", 0.0), ("second", 1.0), ("third", 0.0)] {
        assert_close(name, result.value(name).unwrap_or(f64::NAN), expected, 1.0e-6);
    }
}

#[test]
fn fitted_weights_never_leave_their_bounds() {
    let up = ScalarMap::from_fn(grid(), |x, y| 1.0 + x + 0.1 * y);
    let down = ScalarMap::from_fn(grid(), |x, y| 1.0 - x + 0.2 * y * y);
    let references = ReferenceSet::from_maps(
        grid(),
        vec![("up".to_string(), up), ("down".to_string(), down)],
        &GridResampler::default(),
    )
    .expect("reference set should build");
    let background = BackgroundBasis::Constant;
    let template = ParameterTemplate::for_decomposition(&references.names(), &background)
        .expect("template should build");
    let region = FitRegion::all();

    // Targets an unconstrained solver would fit with negative weights.
    let targets = [
        ScalarMap::from_fn(grid(), |x, _| -3.0 * x),
        ScalarMap::from_fn(grid(), |x, y| 2.0 * x - y),
        ScalarMap::filled(grid(), -1.0),
    ];
    for method in [OptimizerMethod::ActiveSet, OptimizerMethod::LevenbergMarquardt] {
        let fitter = SliceFitter::new(
            &references,
            &background,
            &region,
            InterpolationMethod::Linear,
            settings(method),
        );
        for (index, target) in targets.iter().enumerate() {
            let result = fitter.fit(&view(index, target.clone()), &template);
            for parameter in &result.parameters {
                assert!(
                    parameter.value >= 0.0,
                    "{method} target {index}: {} = {}",
                    parameter.name,
                    parameter.value
                );
            }
        }
    }
}

/// Slice 0 is fully determined, slice 1 only sees the half of the grid where
/// both references coincide, slice 2 holds no data.
fn three_slice_stack() -> (ReferenceSet, SlicedStack) {
    let broad = ScalarMap::from_fn(grid(), |x, y| 1.0 + y * y + if x < 0.0 { 1.0 } else { 0.0 });
    let narrow = ScalarMap::from_fn(grid(), |_, y| 1.0 + y * y);
    let references = ReferenceSet::from_maps(
        grid(),
        vec![("A".to_string(), broad.clone()), ("B".to_string(), narrow.clone())],
        &GridResampler::default(),
    )
    .expect("reference set should build");

    let plane = grid().len();
    let mut data = Vec::with_capacity(3 * plane);
    for flat in 0..plane {
        data.push(2.0 * broad.values()[flat] + narrow.values()[flat] + 0.5);
    }
    for flat in 0..plane {
        let (x, _) = grid().point(flat);
        data.push(if x < 0.0 {
            f64::NAN
        } else {
            1.5 * narrow.values()[flat] + 0.5
        });
    }
    data.extend(std::iter::repeat_n(f64::NAN, plane));

    let axes = [
        Axis::new("E_b", "eV", [-2.0, 0.0], 3),
        Axis::new("ky", "1/Å", [-1.0, 1.0], Y.len()),
        Axis::new("kx", "1/Å", [-1.0, 1.0], X.len()),
    ];
    let stack = SlicedStack::new("three-slice", axes, data).expect("stack should build");
    (references, stack)
}

#[test]
fn three_slice_stack_reports_success_degenerate_and_failed_entries() {
    let (references, stack) = three_slice_stack();
    let background = BackgroundBasis::Constant;
    let template = ParameterTemplate::for_decomposition(&references.names(), &background)
        .expect("template should build");
    let region = FitRegion::all();

    for execution in [ExecutionMode::Serial, ExecutionMode::Parallel] {
        let fitter = SliceFitter::new(
            &references,
            &background,
            &region,
            InterpolationMethod::Linear,
            FitSettings::default(),
        );
        let trajectory = TrajectoryAssembler::new(fitter)
            .with_execution(execution)
            .run(&stack, 0, &template)
            .expect("trajectory should assemble");

        assert_eq!(trajectory.len(), stack.slice_count(0).expect("slice count"));
        assert_eq!(trajectory.axis_values(), vec![-2.0, -1.0, 0.0]);

        let first = trajectory.get(0).expect("slice 0");
        assert_eq!(first.status, SliceStatus::Converged, "{execution:?}");
        assert_close("slice 0 A", first.value("A").unwrap_or(f64::NAN), 2.0, 1.0e-6);
        assert_close("slice 0 B", first.value("B").unwrap_or(f64::NAN), 1.0, 1.0e-6);
        assert_close("slice 0 background", first.value("background").unwrap_or(f64::NAN), 0.5, 1.0e-6);

        let second = trajectory.get(1).expect("slice 1");
        assert!(second.status.is_success(), "{execution:?}: {}", second.status);
        assert!(second.status.is_degenerate(), "{execution:?}: {}", second.status);
        let total = second.value("A").unwrap_or(f64::NAN) + second.value("B").unwrap_or(f64::NAN);
        assert_close("slice 1 A + B", total, 1.5, 1.0e-6);
        assert_close("slice 1 residual", second.residual_norm, 0.0, 1.0e-6);
        assert!(second.parameters.iter().all(|parameter| parameter.value >= 0.0));

        let third = trajectory.get(2).expect("slice 2");
        assert!(matches!(
            third.status,
            SliceStatus::Failed {
                reason: FailureReason::NoValidData,
                ..
            }
        ));
        assert!(third.values().iter().all(|value| value.is_nan()));
        assert!(matches!(third.error(), Some(DecompositionError::InvalidData { .. })));

        assert_eq!(trajectory.failed_indices(), vec![2]);
        assert_eq!(trajectory.degenerate_indices(), vec![1]);
    }
}

#[test]
fn out_of_range_slice_is_a_caller_error() {
    let (references, stack) = three_slice_stack();
    let background = BackgroundBasis::None;
    let template = ParameterTemplate::for_decomposition(&references.names(), &background)
        .expect("template should build");
    let region = FitRegion::all();
    let fitter = SliceFitter::new(
        &references,
        &background,
        &region,
        InterpolationMethod::Linear,
        FitSettings::default(),
    );

    let result = TrajectoryAssembler::new(fitter).run_single(&stack, 0, 7, &template);
    assert!(matches!(
        result,
        Err(DecompositionError::IndexOutOfRange { index: 7, len: 3 })
    ));
}

#[test]
fn reference_set_outside_the_target_grid_aborts_setup() {
    let far = Grid::new(vec![5.0, 6.0], vec![5.0, 6.0]).expect("grid should be valid");
    let result = ReferenceSet::from_maps(
        grid(),
        vec![
            ("near".to_string(), ScalarMap::filled(grid(), 1.0)),
            ("far".to_string(), ScalarMap::filled(far, 1.0)),
        ],
        &GridResampler::default(),
    );
    assert!(matches!(
        result,
        Err(DecompositionError::GridMismatch { reference, .. }) if reference == "far"
    ));
}
