use crate::domain::{DecompositionError, Grid, KmapResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RegionShape {
    #[default]
    All,
    /// Disk of `radius` around `center`.
    Roi { center: [f64; 2], radius: f64 },
    /// Ring between `inner` and `outer` around `center`.
    Annulus {
        center: [f64; 2],
        inner: f64,
        outer: f64,
    },
}

/// Part of the momentum plane that enters the fit. Points outside the region
/// are masked the same way as NaN points.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FitRegion {
    #[serde(flatten)]
    pub shape: RegionShape,
    #[serde(default)]
    pub inverted: bool,
}

impl FitRegion {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn roi(center: [f64; 2], radius: f64) -> Self {
        Self {
            shape: RegionShape::Roi { center, radius },
            inverted: false,
        }
    }

    pub fn annulus(center: [f64; 2], inner: f64, outer: f64) -> Self {
        Self {
            shape: RegionShape::Annulus {
                center,
                inner,
                outer,
            },
            inverted: false,
        }
    }

    pub fn inverted(mut self) -> Self {
        self.inverted = !self.inverted;
        self
    }

    pub fn validate(&self) -> KmapResult<()> {
        match self.shape {
            RegionShape::All => Ok(()),
            RegionShape::Roi { center, radius } => {
                let positive = radius.is_finite() && radius > 0.0;
                if !center.iter().all(|value| value.is_finite()) || !positive {
                    return Err(DecompositionError::invalid_configuration(format!(
                        "roi needs a finite center and positive radius, got center={center:?} radius={radius}"
                    )));
                }
                Ok(())
            }
            RegionShape::Annulus {
                center,
                inner,
                outer,
            } => {
                let ordered =
                    inner.is_finite() && outer.is_finite() && 0.0 <= inner && inner < outer;
                if !center.iter().all(|value| value.is_finite()) || !ordered {
                    return Err(DecompositionError::invalid_configuration(format!(
                        "annulus needs a finite center and 0 <= inner < outer, got center={center:?} inner={inner} outer={outer}"
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        let inside = match self.shape {
            RegionShape::All => true,
            RegionShape::Roi { center, radius } => distance(center, x, y) <= radius,
            RegionShape::Annulus {
                center,
                inner,
                outer,
            } => {
                let distance = distance(center, x, y);
                distance >= inner && distance <= outer
            }
        };
        inside != self.inverted
    }

    /// Row-major mask over `grid`, `true` where the point is fitted.
    pub fn mask(&self, grid: &Grid) -> Vec<bool> {
        (0..grid.len())
            .map(|index| {
                let (x, y) = grid.point(index);
                self.contains(x, y)
            })
            .collect()
    }
}

fn distance(center: [f64; 2], x: f64, y: f64) -> f64 {
    (x - center[0]).hypot(y - center[1])
}
