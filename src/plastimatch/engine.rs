use super::image::PlmImage;
use super::parms::{RegistrationParms, StageParms, XformKind};
use super::pointset::Pointset;
use super::xform::Xform;
use crate::geometry::{Point3, Vector3};
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Stage {stage}: `{xform}` registration is not supported by the {engine} engine")]
	Unsupported {
		stage: usize,
		xform: XformKind,
		engine: &'static str,
	},

	#[error("Stage {stage}: {reason}")]
	InvalidStage { stage: usize, reason: String },

	#[error("Stage {stage}: `{xform}` registration needs fixed and moving landmarks")]
	MissingLandmarks { stage: usize, xform: XformKind },

	#[error("Cannot register an empty image")]
	EmptyImage,
}

/// Inputs handed to an engine. Images are already rectified and the moving
/// image is pre-warped by any initial transform.
#[derive(Debug, Clone)]
pub struct RegistrationData {
	pub fixed: PlmImage,
	pub moving: PlmImage,
	pub fixed_landmarks: Option<Pointset>,
	pub moving_landmarks: Option<Pointset>,
}

/// Numerical registration backend.
pub trait RegistrationEngine: Send + Sync {
	fn name(&self) -> &'static str;

	/// Runs every stage of `parms` in order and returns the transform mapping
	/// fixed space into moving space.
	fn register(
		&self,
		data: &RegistrationData,
		parms: &RegistrationParms,
	) -> Result<Xform, EngineError>;
}

/// Built-in engine for the initialisation stages: centre alignment, centre of
/// gravity alignment and landmark based translation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeEngine;

impl NativeEngine {
	fn check_stage(stage: usize, parms: &StageParms) -> Result<(), EngineError> {
		let min = parms.float("min_its");
		let max = parms.float("max_its");
		if let (Some(min), Some(max)) = (min, max) {
			if min > max {
				return Err(EngineError::InvalidStage {
					stage,
					reason: format!("min_its ({min}) exceeds max_its ({max})"),
				});
			}
		}
		Ok(())
	}
}

impl RegistrationEngine for NativeEngine {
	fn name(&self) -> &'static str {
		"native"
	}

	#[instrument(skip_all, fields(stages = parms.stages().len()))]
	fn register(
		&self,
		data: &RegistrationData,
		parms: &RegistrationParms,
	) -> Result<Xform, EngineError> {
		if data.fixed.data.is_empty() || data.moving.data.is_empty() {
			return Err(EngineError::EmptyImage);
		}

		let mut offset: Option<Vector3> = None;
		for (index, stage) in parms.stages().iter().enumerate() {
			let number = index + 1;
			Self::check_stage(number, stage)?;
			let xform = stage.xform();
			let stage_offset = match xform {
				XformKind::AlignCenter => data.moving.header.center() - data.fixed.header.center(),
				XformKind::AlignCenterOfGravity => {
					center_of_gravity(&data.moving) - center_of_gravity(&data.fixed)
				}
				XformKind::Translation => {
					let (Some(fixed), Some(moving)) = (
						data.fixed_landmarks.as_ref().and_then(Pointset::centroid),
						data.moving_landmarks.as_ref().and_then(Pointset::centroid),
					) else {
						return Err(EngineError::MissingLandmarks {
							stage: number,
							xform,
						});
					};
					moving - fixed
				}
				_ => {
					return Err(EngineError::Unsupported {
						stage: number,
						xform,
						engine: self.name(),
					})
				}
			};
			debug!(stage = number, %xform, ?stage_offset, "Stage finished");
			offset = Some(stage_offset);
		}

		let xform = offset.map_or(Xform::Identity, Xform::Translation);
		info!(xform = xform.kind(), "Registration finished");
		Ok(xform)
	}
}

/// Intensity weighted centroid, shifted so the weights are non-negative.
/// Falls back to the grid centre for a constant image.
fn center_of_gravity(image: &PlmImage) -> Point3 {
	let min = image.data.iter().copied().fold(f32::INFINITY, f32::min);
	let mut weighted = Vector3::zeros();
	let mut total = 0.0;
	image.header.for_each_voxel(|index, point| {
		let weight = f64::from(image.data[index] - min);
		weighted += point.coords * weight;
		total += weight;
	});
	if total > 0.0 {
		Point3::from(weighted / total)
	} else {
		image.header.center()
	}
}
