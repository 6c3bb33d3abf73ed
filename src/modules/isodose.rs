use crate::filter::{extract_isosurface, pad, to_ras};
use crate::scene::{ModelNode, NodeId, Scene, SceneError};
use serde::Deserialize;
use slicer_rt_module_api::prelude::*;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

pub const MODULE_NAME: &str = "Isodose";

/// One isodose surface: a dose value in the units of the dose volume and the
/// display colour of its model.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct IsodoseLevel {
	pub value: f64,
	pub color: [f64; 3],
}

#[derive(Debug, Error)]
pub enum IsodoseError {
	#[error(transparent)]
	Scene(#[from] SceneError),

	#[error("Dose volume {0} has no image data")]
	MissingImageData(NodeId),
}

/// Generates isodose surface models from dose volumes.
#[derive(Debug, Clone, Default)]
pub struct IsodoseLogic {
	levels: Vec<IsodoseLevel>,
}

impl IsodoseLogic {
	pub fn new(mut levels: Vec<IsodoseLevel>) -> Self {
		levels.sort_by(|a, b| a.value.total_cmp(&b.value));
		Self { levels }
	}

	pub fn levels(&self) -> &[IsodoseLevel] {
		&self.levels
	}

	/// Adds one model per level that the dose actually reaches. Levels above
	/// the maximum dose produce no model.
	#[instrument(skip(self, scene))]
	pub fn create_isodose_models(
		&self,
		scene: &mut Scene,
		dose: &NodeId,
	) -> Result<Vec<NodeId>, IsodoseError> {
		let volume = scene.volume(dose)?;
		let image = volume
			.image
			.as_ref()
			.ok_or_else(|| IsodoseError::MissingImageData(dose.clone()))?;
		let Some((min, _)) = image.scalar_range() else {
			return Ok(Vec::new());
		};

		let lowest = self
			.levels
			.first()
			.map_or(min, |level| min.min(level.value as f32));
		let padded = pad(image, lowest - 1.0);
		let geometry = volume.geometry;
		let dose_name = volume.name.clone();

		let mut models = Vec::new();
		for level in &self.levels {
			let mut mesh = extract_isosurface(&padded, level.value as f32);
			if mesh.is_empty() {
				debug!(level = level.value, "Dose does not reach level");
				continue;
			}
			to_ras(&mut mesh, &geometry, 1.0);
			let name = format!("{dose_name} isodose {}", level.value);
			models.push(scene.add_node(ModelNode::new(name, mesh).with_color(level.color)));
		}

		info!(models = models.len(), "Created isodose models");
		Ok(models)
	}
}

pub struct IsodoseModule {
	logic: Arc<IsodoseLogic>,
}

impl IsodoseModule {
	pub fn new(levels: Vec<IsodoseLevel>) -> Self {
		Self {
			logic: Arc::new(IsodoseLogic::new(levels)),
		}
	}
}

impl Module for IsodoseModule {
	fn name(&self) -> &str {
		MODULE_NAME
	}

	fn info(&self) -> ModuleInfo {
		ModuleInfo::new("Isodose")
			.with_categories(["Radiotherapy"])
			.with_dependencies(["Volumes"])
			.with_help_text("Creates isodose surface models from dose volumes.")
	}

	fn logic(&self) -> Arc<dyn Any + Send + Sync> {
		self.logic.clone()
	}
}
