//! Radiotherapy modules for a medical imaging host.
//!
//! - [`dicomrt`] imports DICOM RT dose, structure set, plan and image objects.
//! - [`plastimatch`] runs multi-stage image registration on scene volumes.
//! - [`filter`] holds the labelmap to model conversion and related filters.
//!
//! Modules are registered with a [`modules::ModuleManager`] and share one
//! [`scene::Scene`].

pub mod config;
pub mod dicomrt;
pub mod filter;
pub mod geometry;
pub mod modules;
pub mod plastimatch;
pub mod scene;
