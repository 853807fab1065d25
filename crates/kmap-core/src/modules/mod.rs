pub mod background;
pub mod decomposition;
pub mod pipeline;
pub mod providers;
pub mod region;
pub mod serialization;
pub mod slicing;
pub mod synthetic;
pub mod traits;

pub use pipeline::run_decomposition;
pub use providers::{JsonStackSource, MapBundle};
pub use traits::{GeometryParameters, OrbitalMapProvider, SlicedDataSource};
