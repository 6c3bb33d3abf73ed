use crate::scene::{NodeId, Scene, VolumeNode};
use slicer_rt_module_api::prelude::*;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

pub const MODULE_NAME: &str = "Volumes";

/// Adds volumes to the scene under unique names.
#[derive(Debug, Default)]
pub struct VolumesLogic;

impl VolumesLogic {
	/// Returns `base` if no node carries that name yet, otherwise `base_1`,
	/// `base_2`, ...
	pub fn unique_name(scene: &Scene, base: &str) -> String {
		if scene.find_by_name(base).is_none() {
			return base.to_owned();
		}
		(1..)
			.map(|n| format!("{base}_{n}"))
			.find(|name| scene.find_by_name(name).is_none())
			.unwrap_or_else(|| base.to_owned())
	}

	pub fn add_volume(&self, scene: &mut Scene, mut volume: VolumeNode) -> NodeId {
		volume.name = Self::unique_name(scene, &volume.name);
		let labelmap = volume.labelmap;
		let dims = volume.image.as_ref().map(|image| image.dims());
		let id = scene.add_node(volume);
		debug!(node = %id, labelmap, ?dims, "Added volume");
		id
	}
}

pub struct VolumesModule {
	logic: Arc<VolumesLogic>,
}

impl Default for VolumesModule {
	fn default() -> Self {
		Self {
			logic: Arc::new(VolumesLogic),
		}
	}
}

impl Module for VolumesModule {
	fn name(&self) -> &str {
		MODULE_NAME
	}

	fn info(&self) -> ModuleInfo {
		ModuleInfo::new("Volumes")
			.with_categories(["Core"])
			.with_help_text("Adds scalar volumes and labelmaps to the scene.")
	}

	fn logic(&self) -> Arc<dyn Any + Send + Sync> {
		self.logic.clone()
	}
}
