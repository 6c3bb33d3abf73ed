//! Plastimatch registration module.
//!
//! [`PlastimatchLogic::run_registration`] validates every handle of a
//! [`RegistrationConfig`] against the scene, converts the volumes into the
//! engine's LPS frame, runs the configured stages and writes the warped image
//! (and warped landmarks) back into the scene.

mod config;
mod engine;
mod image;
mod parms;
mod pointset;
mod warp;
mod xform;

pub use config::{
	ConfigError, LandmarkInputs, LandmarkSource, RegistrationConfig, RegistrationConfigBuilder,
	DEFAULT_WARP_VALUE,
};
pub use engine::{EngineError, NativeEngine, RegistrationData, RegistrationEngine};
pub use image::{ImageHeader, PlmImage};
pub use parms::{ParameterError, RegistrationParms, Section, StageParms, XformKind};
pub use pointset::{LabeledPoint, Pointset, PointsetError};
pub use warp::{warp_image, warp_pointset};
pub use xform::{pack_matrix, unpack_matrix, AffineTransform, VectorField, Xform};

use crate::geometry::{self, Point3};
use crate::scene::{ImageDataError, NodeId, PointListNode, Scene, SceneError};
use slicer_rt_module_api::prelude::*;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

pub const MODULE_NAME: &str = "Plastimatch";

#[derive(Debug, Error)]
pub enum RegistrationError {
	#[error(transparent)]
	Scene(#[from] SceneError),

	#[error("Volume {0} has no image data")]
	MissingImageData(NodeId),

	#[error("Landmark count mismatch: {fixed} fixed, {moving} moving")]
	LandmarkCountMismatch { fixed: usize, moving: usize },

	#[error(transparent)]
	Pointset(#[from] PointsetError),

	#[error(transparent)]
	Engine(#[from] EngineError),

	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Output(#[from] ImageDataError),
}

/// Products of one registration run.
#[derive(Debug, Clone)]
pub struct RegistrationOutputs {
	pub transform: Xform,
	pub vector_field: VectorField,
	pub warped_image: PlmImage,
	/// Warped moving landmarks in RAS.
	pub warped_landmarks: Option<Vec<Point3>>,
	pub warped_landmarks_node: Option<NodeId>,
}

struct Landmarks {
	fixed: Pointset,
	moving: Pointset,
}

pub struct PlastimatchLogic {
	engine: Box<dyn RegistrationEngine>,
}

impl Default for PlastimatchLogic {
	fn default() -> Self {
		Self::new(Box::new(NativeEngine))
	}
}

impl PlastimatchLogic {
	pub fn new(engine: Box<dyn RegistrationEngine>) -> Self {
		Self { engine }
	}

	pub fn engine_name(&self) -> &'static str {
		self.engine.name()
	}

	fn volume_image(scene: &Scene, id: &NodeId) -> Result<PlmImage, RegistrationError> {
		PlmImage::from_volume(scene.volume(id)?)
			.ok_or_else(|| RegistrationError::MissingImageData(id.clone()))
	}

	fn resolve_landmarks(
		scene: &Scene,
		config: &RegistrationConfig,
	) -> Result<Option<Landmarks>, RegistrationError> {
		let landmarks = match config.landmarks.effective() {
			None => return Ok(None),
			Some(LandmarkSource::PointLists { fixed, moving }) => Landmarks {
				fixed: Pointset::from_point_list(scene.point_list(fixed)?),
				moving: Pointset::from_point_list(scene.point_list(moving)?),
			},
			Some(LandmarkSource::Files { fixed, moving }) => Landmarks {
				fixed: Pointset::load(fixed)?,
				moving: Pointset::load(moving)?,
			},
		};
		if landmarks.fixed.len() != landmarks.moving.len() {
			return Err(RegistrationError::LandmarkCountMismatch {
				fixed: landmarks.fixed.len(),
				moving: landmarks.moving.len(),
			});
		}
		Ok(Some(landmarks))
	}

	/// Runs one registration.
	///
	/// All handles are resolved before any work starts, and the scene is only
	/// written once the engine has succeeded.
	#[instrument(skip_all, fields(fixed = %config.fixed, moving = %config.moving))]
	pub fn run_registration(
		&self,
		scene: &mut Scene,
		config: &RegistrationConfig,
	) -> Result<RegistrationOutputs, RegistrationError> {
		let mut fixed = Self::volume_image(scene, &config.fixed)?;
		let mut moving = Self::volume_image(scene, &config.moving)?;
		scene.volume(&config.output_volume)?;
		if let Some(id) = &config.warped_landmarks {
			scene.point_list(id)?;
		}
		let initial_matrix = config
			.initial_transform
			.as_ref()
			.map(|id| scene.linear_transform(id).map(|node| node.matrix_to_parent))
			.transpose()?;
		let landmarks = Self::resolve_landmarks(scene, config)?;
		let fixed_geometry = scene.volume(&config.fixed)?.geometry;

		fixed.rectify();
		moving.rectify();

		if let Some(matrix) = initial_matrix {
			let affine = AffineTransform::from_parameters(&pack_matrix(&matrix));
			let (prewarped, _) = warp_image(
				&Xform::Affine(affine),
				&fixed.header,
				&moving,
				config.default_value,
			);
			info!("Applied initial transform to moving image");
			moving = prewarped;
		}

		let (fixed_landmarks, moving_landmarks) = match landmarks {
			Some(Landmarks { fixed, moving }) => (Some(fixed), Some(moving)),
			None => (None, None),
		};
		let data = RegistrationData {
			fixed,
			moving,
			fixed_landmarks,
			moving_landmarks,
		};
		info!(
			engine = self.engine.name(),
			stages = config.parms.stages().len(),
			"Running registration"
		);
		let transform = self.engine.register(&data, &config.parms)?;
		let (warped_image, vector_field) = warp_image(
			&transform,
			&data.fixed.header,
			&data.moving,
			config.default_value,
		);

		let image_data = warped_image.to_image_data()?;
		let output = scene.volume_mut(&config.output_volume)?;
		output.geometry = fixed_geometry;
		output.image = Some(image_data);

		let mut outputs = RegistrationOutputs {
			transform,
			vector_field,
			warped_image,
			warped_landmarks: None,
			warped_landmarks_node: None,
		};
		if let Some(moving_landmarks) = &data.moving_landmarks {
			let warped = warp_pointset(moving_landmarks, &outputs.vector_field);
			let mut node = PointListNode::new("WarpedLandmarks");
			for point in warped.iter() {
				node.add_point(point.label.clone(), geometry::flip_xy(point.position));
			}
			outputs.warped_landmarks = Some(node.positions().collect());

			let id = match &config.warped_landmarks {
				Some(id) => {
					let target = scene.point_list_mut(id)?;
					target.points = node.points;
					id.clone()
				}
				None => scene.add_node(node),
			};
			info!(node = %id, points = warped.len(), "Stored warped landmarks");
			outputs.warped_landmarks_node = Some(id);
		}

		Ok(outputs)
	}
}

pub struct PlastimatchModule {
	logic: Arc<PlastimatchLogic>,
}

impl PlastimatchModule {
	pub fn new(logic: PlastimatchLogic) -> Self {
		Self {
			logic: Arc::new(logic),
		}
	}
}

impl Default for PlastimatchModule {
	fn default() -> Self {
		Self::new(PlastimatchLogic::default())
	}
}

impl Module for PlastimatchModule {
	fn name(&self) -> &str {
		MODULE_NAME
	}

	fn info(&self) -> ModuleInfo {
		ModuleInfo::new("Plastimatch registration")
			.with_categories(["Registration"])
			.with_contributors(["Greg Sharp (MGH)"])
			.with_help_text(
				"Multi-stage image registration. Warps the moving volume into the fixed \
				 geometry and carries landmarks along.",
			)
			.with_acknowledgement_text("Registration methods from the Plastimatch toolkit.")
	}

	fn setup(&mut self, _modules: &dyn ModuleLookup) -> SetupReport {
		if self.logic.engine_name() == "native" {
			warn!("Using the native engine, deformable stages are unavailable");
		}
		SetupReport::default()
	}

	fn logic(&self) -> Arc<dyn Any + Send + Sync> {
		self.logic.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::geometry::{Matrix4, Vector3};
	use crate::scene::{ImageData, LinearTransformNode, VolumeGeometry, VolumeNode};

	fn volume(name: &str, origin: Point3) -> VolumeNode {
		let mut image = ImageData::filled([6, 5, 4], 0.0);
		for k in 0..4 {
			for j in 0..5 {
				for i in 0..6 {
					image.set(i, j, k, (i + 10 * j + 100 * k) as f32);
				}
			}
		}
		VolumeNode::new(name)
			.with_geometry(VolumeGeometry {
				origin,
				spacing: Vector3::new(2.0, 2.0, 3.0),
				..VolumeGeometry::default()
			})
			.with_image(image)
	}

	struct Fixture {
		scene: Scene,
		fixed: NodeId,
		moving: NodeId,
		output: NodeId,
	}

	fn fixture() -> Fixture {
		let mut scene = Scene::new();
		let fixed = scene.add_node(volume("A", Point3::origin()));
		let moving = scene.add_node(volume("B", Point3::origin()));
		let output = scene.add_node(VolumeNode::new("warped"));
		Fixture {
			scene,
			fixed,
			moving,
			output,
		}
	}

	fn builder(fixture: &Fixture) -> RegistrationConfigBuilder {
		let mut builder = RegistrationConfig::builder();
		builder
			.fixed(fixture.fixed.clone())
			.moving(fixture.moving.clone())
			.output_volume(fixture.output.clone());
		builder
	}

	#[test]
	fn zero_stages_resamples_moving_into_fixed_geometry() {
		let mut fixture = fixture();
		let config = builder(&fixture).build().unwrap();
		let outputs = PlastimatchLogic::default()
			.run_registration(&mut fixture.scene, &config)
			.unwrap();

		assert_eq!(outputs.transform, Xform::Identity);
		let output = fixture.scene.volume(&fixture.output).unwrap();
		let fixed = fixture.scene.volume(&fixture.fixed).unwrap();
		let moving = fixture.scene.volume(&fixture.moving).unwrap();
		assert_eq!(output.geometry, fixed.geometry);
		assert_eq!(output.image, moving.image);
	}

	#[test]
	fn warped_orientation_equals_fixed() {
		let mut fixture = fixture();
		let fixed = fixture.scene.add_node(volume("C", Point3::new(5.0, -3.0, 1.0)));
		let mut builder = builder(&fixture);
		builder.fixed(fixed.clone()).add_stage().set_par("xform", "align_center").unwrap();
		let config = builder.build().unwrap();

		PlastimatchLogic::default()
			.run_registration(&mut fixture.scene, &config)
			.unwrap();

		let output = fixture.scene.volume(&fixture.output).unwrap();
		assert_eq!(output.geometry, fixture.scene.volume(&fixed).unwrap().geometry);
	}

	#[test]
	fn landmarks_survive_identity_registration() {
		let mut fixture = fixture();
		let points = [Point3::new(2.0, 3.0, 4.0), Point3::new(6.5, 1.0, 3.0)];
		let fixed_points = fixture.scene.add_node(PointListNode::from_positions("F", points));
		let moving_points = fixture.scene.add_node(PointListNode::from_positions("M", points));
		let mut builder = builder(&fixture);
		builder.landmarks_from_points(fixed_points, moving_points);
		let config = builder.build().unwrap();

		let outputs = PlastimatchLogic::default()
			.run_registration(&mut fixture.scene, &config)
			.unwrap();

		assert_eq!(outputs.warped_landmarks, Some(points.to_vec()));
		let node = outputs.warped_landmarks_node.unwrap();
		assert_eq!(fixture.scene.point_list(&node).unwrap().len(), 2);
	}

	#[test]
	fn warped_landmarks_replace_previous_run() {
		let mut fixture = fixture();
		let points = [Point3::new(1.0, 1.0, 1.0)];
		let fixed_points = fixture.scene.add_node(PointListNode::from_positions("F", points));
		let moving_points = fixture.scene.add_node(PointListNode::from_positions("M", points));
		let target = fixture.scene.add_node(PointListNode::new("out"));
		let mut builder = builder(&fixture);
		builder
			.landmarks_from_points(fixed_points, moving_points)
			.warped_landmarks(target.clone());
		let config = builder.build().unwrap();

		let logic = PlastimatchLogic::default();
		logic.run_registration(&mut fixture.scene, &config).unwrap();
		logic.run_registration(&mut fixture.scene, &config).unwrap();
		assert_eq!(fixture.scene.point_list(&target).unwrap().len(), 1);
	}

	#[test]
	fn unresolved_handles_fail_before_touching_scene() {
		let mut fixture = fixture();
		let mut builder = builder(&fixture);
		builder.moving("VolumeNode99");
		let config = builder.build().unwrap();
		let result = PlastimatchLogic::default().run_registration(&mut fixture.scene, &config);
		assert!(matches!(
			result,
			Err(RegistrationError::Scene(SceneError::NotFound { .. }))
		));
		assert!(fixture.scene.volume(&fixture.output).unwrap().image.is_none());

		let mut builder = self::builder(&fixture);
		builder.initial_transform(fixture.fixed.clone());
		let config = builder.build().unwrap();
		let result = PlastimatchLogic::default().run_registration(&mut fixture.scene, &config);
		assert!(matches!(
			result,
			Err(RegistrationError::Scene(SceneError::WrongKind { .. }))
		));
	}

	#[test]
	fn landmark_count_mismatch_is_rejected() {
		let mut fixture = fixture();
		let fixed_points = fixture.scene.add_node(PointListNode::from_positions(
			"F",
			[Point3::origin(), Point3::new(1.0, 1.0, 1.0)],
		));
		let moving_points = fixture
			.scene
			.add_node(PointListNode::from_positions("M", [Point3::origin()]));
		let mut builder = builder(&fixture);
		builder.landmarks_from_points(fixed_points, moving_points);
		let config = builder.build().unwrap();

		let result = PlastimatchLogic::default().run_registration(&mut fixture.scene, &config);
		assert!(matches!(
			result,
			Err(RegistrationError::LandmarkCountMismatch {
				fixed: 2,
				moving: 1
			})
		));
	}

	#[test]
	fn missing_image_data_is_reported() {
		let mut fixture = fixture();
		let mut builder = builder(&fixture);
		builder.moving(fixture.output.clone());
		let config = builder.build().unwrap();
		let result = PlastimatchLogic::default().run_registration(&mut fixture.scene, &config);
		assert!(matches!(result, Err(RegistrationError::MissingImageData(_))));
	}

	#[test]
	fn identity_initial_transform_keeps_image() {
		let mut fixture = fixture();
		let transform = fixture
			.scene
			.add_node(LinearTransformNode::new("init", Matrix4::identity()));
		let mut builder = builder(&fixture);
		builder.initial_transform(transform);
		let config = builder.build().unwrap();

		PlastimatchLogic::default()
			.run_registration(&mut fixture.scene, &config)
			.unwrap();
		let output = fixture.scene.volume(&fixture.output).unwrap();
		let moving = fixture.scene.volume(&fixture.moving).unwrap();
		assert_eq!(output.image, moving.image);
	}

	/// Ten voxels along RAS x whose values are their RAS x coordinate.
	fn ras_x_row(name: &str, origin_x: f64) -> VolumeNode {
		let values = (0..10_u8).map(|i| (origin_x + f64::from(i)) as f32).collect();
		VolumeNode::new(name)
			.with_geometry(VolumeGeometry {
				origin: Point3::new(origin_x, 0.0, 0.0),
				..VolumeGeometry::default()
			})
			.with_image(ImageData::new([10, 1, 1], values).unwrap())
	}

	fn run_rows(moving_x: f64, initial: Option<Matrix4>) -> Vec<f32> {
		let mut scene = Scene::new();
		let fixed = scene.add_node(ras_x_row("fixed", 0.0));
		let moving = scene.add_node(ras_x_row("moving", moving_x));
		let output = scene.add_node(VolumeNode::new("warped"));
		let mut builder = RegistrationConfig::builder();
		builder.fixed(fixed).moving(moving).output_volume(output.clone());
		if let Some(matrix) = initial {
			let transform = scene.add_node(LinearTransformNode::new("init", matrix));
			builder.initial_transform(transform);
		}
		let config = builder.build().unwrap();

		PlastimatchLogic::default()
			.run_registration(&mut scene, &config)
			.unwrap();
		scene.volume(&output).unwrap().image.as_ref().unwrap().scalars().to_vec()
	}

	#[test]
	fn offset_origins_resample_without_mirroring() {
		assert_eq!(
			run_rows(3.0, None),
			[-1200.0, -1200.0, -1200.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]
		);
	}

	#[test]
	fn translation_initial_transform_prewarps_moving() {
		// +2 mm along LPS x samples the moving image 2 mm towards RAS -x
		let mut matrix = Matrix4::identity();
		matrix[(0, 3)] = 2.0;
		assert_eq!(
			run_rows(0.0, Some(matrix)),
			[-1200.0, -1200.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]
		);
	}
}
