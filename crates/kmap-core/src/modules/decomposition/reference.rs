use crate::domain::{DecompositionError, Grid, KmapResult, ScalarMap};
use crate::modules::traits::{GeometryParameters, OrbitalMapProvider};
use crate::numerics::GridResampler;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceMap {
    pub name: String,
    pub map: ScalarMap,
}

/// Named reference maps, all resampled onto one shared grid. Order is the
/// order of the fitted weights.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSet {
    grid: Grid,
    references: Vec<ReferenceMap>,
}

impl ReferenceSet {
    /// Resamples every map onto `grid` once.
    ///
    /// A reference whose extent misses the grid, or that has no valid point
    /// left after resampling, is a [`DecompositionError::GridMismatch`].
    pub fn from_maps(
        grid: Grid,
        maps: Vec<(String, ScalarMap)>,
        resampler: &GridResampler,
    ) -> KmapResult<Self> {
        if maps.is_empty() {
            return Err(DecompositionError::invalid_configuration(
                "at least one reference map is required",
            ));
        }

        let mut seen = BTreeSet::new();
        let mut references = Vec::with_capacity(maps.len());
        for (name, map) in maps {
            if name.trim().is_empty() {
                return Err(DecompositionError::invalid_configuration(
                    "reference names must not be empty",
                ));
            }
            if !seen.insert(name.clone()) {
                return Err(DecompositionError::invalid_configuration(format!(
                    "duplicate reference name '{name}'"
                )));
            }
            if !map.grid().overlaps(&grid) {
                return Err(DecompositionError::GridMismatch {
                    reference: name,
                    reason: format!(
                        "native extent x={:?} y={:?} lies outside target x={:?} y={:?}",
                        map.grid().x_extent(),
                        map.grid().y_extent(),
                        grid.x_extent(),
                        grid.y_extent()
                    ),
                });
            }

            let resampled = resampler.resample(&map, &grid);
            if resampled.is_all_invalid() {
                return Err(DecompositionError::GridMismatch {
                    reference: name,
                    reason: "no valid value after resampling".to_string(),
                });
            }
            references.push(ReferenceMap {
                name,
                map: resampled,
            });
        }

        Ok(Self { grid, references })
    }

    /// Asks `provider` for each orbital in `names` and resamples the maps.
    pub fn build<P>(
        provider: &P,
        names: &[String],
        geometry: &GeometryParameters,
        grid: Grid,
        resampler: &GridResampler,
    ) -> KmapResult<Self>
    where
        P: OrbitalMapProvider + ?Sized,
    {
        let maps = names
            .iter()
            .map(|name| Ok((name.clone(), provider.compute_map(name, geometry)?)))
            .collect::<KmapResult<Vec<_>>>()?;
        Self::from_maps(grid, maps, resampler)
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.references
            .iter()
            .map(|reference| reference.name.clone())
            .collect()
    }

    pub fn get(&self, index: usize) -> Option<&ReferenceMap> {
        self.references.get(index)
    }

    pub fn by_name(&self, name: &str) -> Option<&ScalarMap> {
        self.references
            .iter()
            .find(|reference| reference.name == name)
            .map(|reference| &reference.map)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceMap> {
        self.references.iter()
    }
}
