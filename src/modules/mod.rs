//! Module manager and the sibling modules the DICOM RT importer depends on.

pub mod isodose;
pub mod planar_image;
mod registry;
pub mod volumes;

pub use isodose::{IsodoseError, IsodoseLevel, IsodoseLogic, IsodoseModule};
pub use planar_image::{PlanarImageError, PlanarImageLogic, PlanarImageModule, PlanePlacement};
pub use registry::{ModuleManager, ModuleRegistrationError};
pub use volumes::{VolumesLogic, VolumesModule};
