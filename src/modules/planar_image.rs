use crate::filter::PolyData;
use crate::geometry::{Point3, Vector3};
use crate::scene::{ModelNode, NodeId, Scene, SceneError};
use image::{GrayImage, Luma};
use slicer_rt_module_api::prelude::*;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

pub const MODULE_NAME: &str = "PlanarImage";

/// A rectangle in RAS: centre, unit axes along the image columns and rows,
/// and physical extent along each.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanePlacement {
	pub center: Point3,
	pub column_axis: Vector3,
	pub row_axis: Vector3,
	pub width: f64,
	pub height: f64,
}

#[derive(Debug, Error)]
pub enum PlanarImageError {
	#[error(transparent)]
	Scene(#[from] SceneError),

	#[error("Volume {0} has no image data")]
	MissingImageData(NodeId),
}

/// Displays the first slice of a volume as a textured plane model.
#[derive(Debug, Default)]
pub struct PlanarImageLogic;

impl PlanarImageLogic {
	/// Windows the first slice to its full scalar range as an 8-bit texture.
	pub fn texture_from_volume(
		scene: &Scene,
		volume: &NodeId,
	) -> Result<GrayImage, PlanarImageError> {
		let image = scene
			.volume(volume)?
			.image
			.as_ref()
			.ok_or_else(|| PlanarImageError::MissingImageData(volume.clone()))?;
		let [nx, ny, _] = image.dims();
		let (lo, hi) = image.scalar_range().unwrap_or((0.0, 0.0));
		let window = if hi > lo { hi - lo } else { 1.0 };

		Ok(GrayImage::from_fn(nx as u32, ny as u32, |x, y| {
			let value = (image.get(x as usize, y as usize, 0) - lo) / window;
			Luma([(value * 255.0).round().clamp(0.0, 255.0) as u8])
		}))
	}

	/// Two triangles spanning the placement, with texture coordinates that map
	/// the first image column/row to the `-column_axis`/`-row_axis` corner.
	pub fn plane(placement: &PlanePlacement) -> PolyData {
		let half_u = placement.column_axis * (placement.width / 2.0);
		let half_v = placement.row_axis * (placement.height / 2.0);
		let corner = |su: f64, sv: f64| placement.center + half_u * su + half_v * sv;
		PolyData {
			points: vec![
				corner(-1.0, -1.0),
				corner(1.0, -1.0),
				corner(1.0, 1.0),
				corner(-1.0, 1.0),
			],
			triangles: vec![[0, 1, 2], [0, 2, 3]],
			texture_coords: Some(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
		}
	}

	#[instrument(skip(self, scene))]
	pub fn create_textured_plane(
		&self,
		scene: &mut Scene,
		volume: &NodeId,
		placement: &PlanePlacement,
		name: &str,
	) -> Result<NodeId, PlanarImageError> {
		let texture = Self::texture_from_volume(scene, volume)?;
		let mut model = ModelNode::new(name, Self::plane(placement));
		debug!(width = texture.width(), height = texture.height(), "Built texture");
		model.texture = Some(texture);
		Ok(scene.add_node(model))
	}
}

pub struct PlanarImageModule {
	logic: Arc<PlanarImageLogic>,
}

impl Default for PlanarImageModule {
	fn default() -> Self {
		Self {
			logic: Arc::new(PlanarImageLogic),
		}
	}
}

impl Module for PlanarImageModule {
	fn name(&self) -> &str {
		MODULE_NAME
	}

	fn info(&self) -> ModuleInfo {
		ModuleInfo::new("Planar Image")
			.with_categories(["Radiotherapy"])
			.with_dependencies(["Volumes"])
			.with_help_text("Shows a 2D image volume as a textured plane in 3D.")
	}

	fn logic(&self) -> Arc<dyn Any + Send + Sync> {
		self.logic.clone()
	}
}
