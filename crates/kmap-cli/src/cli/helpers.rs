use super::CliError;
use anyhow::Context;
use kmap_core::Trajectory;
use kmap_core::modules::slicing::SlicedStack;
use std::io::Write;

pub(super) fn write_stdout(text: &str) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.flush())
        .context("failed to write report to stdout")?;
    Ok(())
}

pub(super) fn render_trajectory_summary(trajectory: &Trajectory) -> String {
    let failed = trajectory.failed_indices();
    let degenerate = trajectory.degenerate_indices();
    let mut summary = format!(
        "Fitted {} slice(s) along {} with parameters [{}]\n",
        trajectory.len(),
        trajectory.axis_label(),
        trajectory.parameter_names().join(", ")
    );
    summary.push_str(&format!(
        "Failed: {} {:?}\nDegenerate: {} {:?}\n",
        failed.len(),
        failed,
        degenerate.len(),
        degenerate
    ));
    summary
}

pub(super) fn render_stack_report(stack: &SlicedStack) -> String {
    let mut report = format!("Stack: {}\n", stack.name());
    let shape = stack.shape();
    report.push_str(&format!("Shape: {} x {} x {}\n", shape[0], shape[1], shape[2]));
    for (index, axis) in stack.axes().iter().enumerate() {
        report.push_str(&format!(
            "Axis {index}: {} [{}, {}] num={}\n",
            axis.display_label(),
            axis.range[0],
            axis.range[1],
            axis.num
        ));
    }
    for (key, value) in stack.metadata() {
        report.push_str(&format!("  {key} = {value}\n"));
    }
    report
}
