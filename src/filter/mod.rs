//! Pure image and mesh filters: iso-surfacing, decimation, labelmap to model
//! conversion and labelmap dilation.

mod dilate;
mod isosurface;
mod labelmap_to_model;
mod mesh;

pub use dilate::{dilate_labelmap, NeighborMode, ParseNeighborModeError};
pub use isosurface::{extract_isosurface, pad};
pub(crate) use labelmap_to_model::to_ras;
pub use labelmap_to_model::{labelmap_to_model, LabelmapToModelFilter, LabelmapToModelOptions};
pub use mesh::{decimate, triangle_normal, PolyData};
