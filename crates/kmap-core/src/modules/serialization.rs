use crate::domain::{DecompositionError, KmapResult};
use crate::modules::decomposition::Trajectory;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;

const AXIS_COLUMN_WIDTH: usize = 14;
const VALUE_COLUMN_WIDTH: usize = 18;
const VALUE_PRECISION: usize = 8;

pub fn format_fixed_f64(value: f64, width: usize, precision: usize) -> String {
    format!(
        "{value:>width$.precision$}",
        width = width,
        precision = precision
    )
}

pub fn normalize_text_artifact(content: &str) -> String {
    let mut normalized = content.replace("\r\n", "\n").replace('\r', "\n");
    if !normalized.is_empty() && !normalized.ends_with('\n') {
        normalized.push('\n');
    }
    normalized
}

/// Writes a normalized text artifact, creating missing parent directories.
pub fn write_text_artifact(path: &Path, content: &str) -> KmapResult<()> {
    let write_error = |source| DecompositionError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_error)?;
    }
    fs::write(path, normalize_text_artifact(content)).map_err(write_error)
}

pub fn read_json_artifact<T: DeserializeOwned>(path: &Path) -> KmapResult<T> {
    let source = fs::read_to_string(path).map_err(|source| DecompositionError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&source).map_err(|source| DecompositionError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Pretty-printed JSON. Non-finite floats are written as `null`.
pub fn write_json_artifact<T: Serialize + ?Sized>(path: &Path, value: &T) -> KmapResult<()> {
    let content = serde_json::to_string_pretty(value).map_err(|source| DecompositionError::Write {
        path: path.to_path_buf(),
        source: io::Error::other(source),
    })?;
    write_text_artifact(path, &content)
}

pub fn write_trajectory_json(path: &Path, trajectory: &Trajectory) -> KmapResult<()> {
    write_json_artifact(path, trajectory)
}

/// Fixed-width table: one row per slice with the axis value, every
/// parameter in template order and the slice status.
pub fn render_trajectory_table(trajectory: &Trajectory) -> String {
    let axis_header = if trajectory.axis_units().is_empty() {
        trajectory.axis_label().to_string()
    } else {
        format!("{} [{}]", trajectory.axis_label(), trajectory.axis_units())
    };

    let mut content = format!("#{:>width$}", axis_header, width = AXIS_COLUMN_WIDTH - 1);
    for name in trajectory.parameter_names() {
        content.push_str(&format!(" {name:>width$}", width = VALUE_COLUMN_WIDTH - 1));
    }
    content.push_str("  status\n");

    for slice in trajectory.slices() {
        content.push_str(&format_fixed_f64(slice.axis_value, AXIS_COLUMN_WIDTH, 6));
        for parameter in &slice.parameters {
            content.push_str(&format_fixed_f64(
                parameter.value,
                VALUE_COLUMN_WIDTH,
                VALUE_PRECISION,
            ));
        }
        content.push_str("  ");
        content.push_str(slice.status.label());
        content.push('\n');
    }
    content
}

pub fn write_trajectory_table(path: &Path, trajectory: &Trajectory) -> KmapResult<()> {
    write_text_artifact(path, &render_trajectory_table(trajectory))
}
