//! File-backed providers for reference maps and measured stacks.

use crate::domain::{DecompositionError, KmapResult, ScalarMap};
use crate::modules::serialization::{read_json_artifact, write_json_artifact};
use crate::modules::slicing::SlicedStack;
use crate::modules::traits::{GeometryParameters, OrbitalMapProvider, SlicedDataSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Precomputed reference maps keyed by orbital id.
///
/// When `geometry` is present the maps were computed for that geometry only
/// and requests for any other geometry are refused.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MapBundle {
    #[serde(default)]
    pub geometry: Option<GeometryParameters>,
    pub maps: BTreeMap<String, ScalarMap>,
}

impl MapBundle {
    pub fn new(geometry: Option<GeometryParameters>) -> Self {
        Self {
            geometry,
            maps: BTreeMap::new(),
        }
    }

    pub fn with_map(mut self, orbital_id: impl Into<String>, map: ScalarMap) -> Self {
        self.maps.insert(orbital_id.into(), map);
        self
    }

    pub fn load(path: impl AsRef<Path>) -> KmapResult<Self> {
        read_json_artifact(path.as_ref())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> KmapResult<()> {
        write_json_artifact(path.as_ref(), self)
    }

    pub fn orbital_ids(&self) -> Vec<&str> {
        self.maps.keys().map(String::as_str).collect()
    }
}

impl OrbitalMapProvider for MapBundle {
    fn compute_map(&self, orbital_id: &str, geometry: &GeometryParameters) -> KmapResult<ScalarMap> {
        if let Some(bundled) = &self.geometry {
            if bundled != geometry {
                return Err(DecompositionError::Provider {
                    message: format!(
                        "bundle was computed for a different geometry than requested for '{orbital_id}'"
                    ),
                });
            }
        }
        self.maps
            .get(orbital_id)
            .cloned()
            .ok_or_else(|| DecompositionError::Provider {
                message: format!(
                    "unknown orbital '{orbital_id}', bundle has [{}]",
                    self.orbital_ids().join(", ")
                ),
            })
    }
}

/// A [`SlicedStack`] stored as JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonStackSource {
    path: PathBuf,
}

impl JsonStackSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SlicedDataSource for JsonStackSource {
    fn load(&self) -> KmapResult<SlicedStack> {
        read_json_artifact(&self.path)
    }
}

impl SlicedDataSource for SlicedStack {
    fn load(&self) -> KmapResult<SlicedStack> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::{JsonStackSource, MapBundle};
    use crate::domain::{Axis, DecompositionError, Grid, ScalarMap};
    use crate::modules::serialization::write_json_artifact;
    use crate::modules::slicing::SlicedStack;
    use crate::modules::traits::{GeometryParameters, OrbitalMapProvider, SlicedDataSource};
    use tempfile::TempDir;

    fn map(value: f64) -> ScalarMap {
        let grid = Grid::new(vec![-1.0, 0.0, 1.0], vec![-1.0, 1.0]).expect("grid");
        ScalarMap::from_fn(grid, move |x, y| value + x * y)
    }

    #[test]
    fn bundle_serves_maps_from_disk() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("references.json");
        let mut with_hole = map(2.0);
        with_hole.values_mut()[1] = f64::NAN;
        MapBundle::new(None)
            .with_map("PTCDA_C", map(1.0))
            .with_map("PTCDA_D", with_hole)
            .save(&path)
            .expect("save");

        let bundle = MapBundle::load(&path).expect("load");
        assert_eq!(bundle.orbital_ids(), vec!["PTCDA_C", "PTCDA_D"]);
        let loaded = bundle
            .compute_map("PTCDA_D", &GeometryParameters::default())
            .expect("map");
        assert!(loaded.values()[1].is_nan());
        assert_eq!(loaded.values()[0], 3.0);
    }

    #[test]
    fn unknown_orbital_and_foreign_geometry_are_provider_errors() {
        let bundle = MapBundle::new(Some(GeometryParameters::default())).with_map("a", map(1.0));

        assert!(matches!(
            bundle.compute_map("b", &GeometryParameters::default()),
            Err(DecompositionError::Provider { .. })
        ));

        let other = GeometryParameters {
            e_kin: 35.0,
            ..GeometryParameters::default()
        };
        assert!(matches!(
            bundle.compute_map("a", &other),
            Err(DecompositionError::Provider { .. })
        ));
    }

    #[test]
    fn json_stack_source_round_trips_nan_cells() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("stack.json");
        let axes = [
            Axis::new("E_b", "eV", [-1.0, 0.0], 2),
            Axis::new("k_y", "1/Å", [-1.0, 1.0], 2),
            Axis::new("k_x", "1/Å", [-1.0, 1.0], 2),
        ];
        let mut data: Vec<f64> = (0..8).map(f64::from).collect();
        data[5] = f64::NAN;
        let stack = SlicedStack::new("measured", axes, data).expect("stack");
        write_json_artifact(&path, &stack).expect("write");

        let loaded = JsonStackSource::new(&path).load().expect("load");
        assert_eq!(loaded.name(), "measured");
        assert_eq!(loaded.shape(), [2, 2, 2]);
        assert!(loaded.data()[5].is_nan());
        assert_eq!(loaded.data()[7], 7.0);

        let missing = JsonStackSource::new(temp.path().join("missing.json"));
        assert!(matches!(missing.load(), Err(DecompositionError::Read { .. })));
    }
}
