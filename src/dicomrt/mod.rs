//! DICOM RT import module.
//!
//! Classifies and loads RT Dose, RT Structure Set, RT Plan and RT Image
//! objects into the scene. Dose volumes and RT images go through the Volumes
//! logic, isodose surfaces through the Isodose logic and RT image planes
//! through the PlanarImage logic; those are injected during setup.

pub mod reader;

pub use reader::RtObjectKind;

use crate::geometry::{self, Vector3};
use crate::modules::{
	isodose, planar_image, volumes, IsodoseError, IsodoseLogic, PlanarImageError,
	PlanarImageLogic, PlanePlacement, VolumesLogic,
};
use crate::scene::{
	ContourNode, ImageData, ImageDataError, NodeId, PointListNode, Scene, SceneError,
	VolumeGeometry, VolumeNode,
};
use dicom::core::value::ConvertValueError;
use dicom::dictionary_std::tags;
use dicom::object::{open_file, AccessError, DefaultDicomObject, InMemDicomObject, ReadError};
use dicom_pixeldata::PixelDecoder;
use reader::DoseGrid;
use serde::{Deserialize, Serialize};
use slicer_rt_module_api::prelude::*;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

pub const MODULE_NAME: &str = "DicomRtImport";

/// Node attribute marking a dose volume.
pub const DOSE_VOLUME_ATTRIBUTE: &str = "DicomRtImport.DoseVolume";
pub const DOSE_UNIT_NAME_ATTRIBUTE: &str = "DicomRtImport.DoseUnitName";
pub const DOSE_UNIT_VALUE_ATTRIBUTE: &str = "DicomRtImport.DoseUnitValue";

/// Confidence reported for objects this module can load.
const RT_CONFIDENCE: f32 = 0.9;

#[derive(Debug, Error)]
pub enum RtImportError {
	#[error("Failed to read DICOM file: {0}")]
	Read(#[from] ReadError),

	#[error(transparent)]
	Access(#[from] AccessError),

	#[error(transparent)]
	Convert(#[from] ConvertValueError),

	#[error(transparent)]
	PixelData(#[from] dicom_pixeldata::Error),

	#[error("Missing attribute {0}")]
	MissingAttribute(&'static str),

	#[error("Invalid attribute {name}: {reason}")]
	InvalidAttribute { name: &'static str, reason: String },

	#[error("Not a DICOM RT object (SOP class {sop_class})")]
	NotRt { sop_class: String },

	#[error("{0} logic is not available")]
	MissingLogic(&'static str),

	#[error(transparent)]
	Scene(#[from] SceneError),

	#[error(transparent)]
	Image(#[from] ImageDataError),

	#[error(transparent)]
	Isodose(#[from] IsodoseError),

	#[error(transparent)]
	PlanarImage(#[from] PlanarImageError),
}

/// Result of examining a file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Loadable {
	pub path: PathBuf,
	pub kind: RtObjectKind,
	pub name: String,
	pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct ImportOptions {
	/// Generate isodose models for loaded dose volumes.
	#[serde(default)]
	pub create_isodose: bool,
}

/// Nodes created by one load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportSummary {
	pub kind: RtObjectKind,
	pub nodes: Vec<NodeId>,
}

#[derive(Debug, Default, Clone)]
pub struct DicomRtImportLogic {
	volumes: Option<Arc<VolumesLogic>>,
	isodose: Option<Arc<IsodoseLogic>>,
	planar_image: Option<Arc<PlanarImageLogic>>,
}

fn display_name(object: &InMemDicomObject, kind: RtObjectKind) -> Result<String, RtImportError> {
	Ok(reader::string(object, tags::SERIES_DESCRIPTION)?
		.unwrap_or_else(|| kind.default_name().to_owned()))
}

impl DicomRtImportLogic {
	pub fn new(
		volumes: Option<Arc<VolumesLogic>>,
		isodose: Option<Arc<IsodoseLogic>>,
		planar_image: Option<Arc<PlanarImageLogic>>,
	) -> Self {
		Self {
			volumes,
			isodose,
			planar_image,
		}
	}

	fn volumes(&self) -> Result<&VolumesLogic, RtImportError> {
		self.volumes
			.as_deref()
			.ok_or(RtImportError::MissingLogic(volumes::MODULE_NAME))
	}

	fn planar_image(&self) -> Result<&PlanarImageLogic, RtImportError> {
		self.planar_image
			.as_deref()
			.ok_or(RtImportError::MissingLogic(planar_image::MODULE_NAME))
	}

	/// Checks whether a file is a loadable RT object.
	#[instrument(skip(self))]
	pub fn examine(&self, path: &Path) -> Result<Loadable, RtImportError> {
		let object = open_file(path)?;
		let kind = RtObjectKind::of(&object)?;
		let loadable = Loadable {
			path: path.to_owned(),
			kind,
			name: display_name(&object, kind)?,
			confidence: RT_CONFIDENCE,
		};
		debug!(%kind, name = %loadable.name, "Examined file");
		Ok(loadable)
	}

	/// Loads an RT object into the scene.
	#[instrument(skip(self, scene))]
	pub fn load(
		&self,
		scene: &mut Scene,
		path: &Path,
		options: &ImportOptions,
	) -> Result<ImportSummary, RtImportError> {
		let object = open_file(path)?;
		let kind = RtObjectKind::of(&object)?;
		let nodes = match kind {
			RtObjectKind::RtDose => self.load_dose(scene, &object, options)?,
			RtObjectKind::RtStructureSet => self.add_structure_set(scene, &object)?,
			RtObjectKind::RtPlan => self.add_plan(scene, &object)?,
			RtObjectKind::RtImage => self.load_rt_image(scene, &object)?,
		};
		info!(%kind, nodes = nodes.len(), "Loaded RT object");
		Ok(ImportSummary { kind, nodes })
	}

	fn load_dose(
		&self,
		scene: &mut Scene,
		object: &DefaultDicomObject,
		options: &ImportOptions,
	) -> Result<Vec<NodeId>, RtImportError> {
		self.volumes()?;
		let grid = reader::dose_grid(object)?;
		let scalars = object.decode_pixel_data()?.to_vec::<f32>()?;
		let name = display_name(object, RtObjectKind::RtDose)?;
		self.add_dose(scene, &name, grid, scalars, options)
	}

	/// Adds a dose volume from decoded (unscaled) pixel values.
	pub fn add_dose(
		&self,
		scene: &mut Scene,
		name: &str,
		grid: DoseGrid,
		mut scalars: Vec<f32>,
		options: &ImportOptions,
	) -> Result<Vec<NodeId>, RtImportError> {
		let volumes = self.volumes()?;
		for value in &mut scalars {
			*value = (f64::from(*value) * grid.scaling) as f32;
		}
		let image = ImageData::new(grid.dims, scalars)?;

		let mut volume = VolumeNode::new(name)
			.with_geometry(grid.geometry)
			.with_image(image);
		volume.set_attribute(DOSE_VOLUME_ATTRIBUTE, "1");
		volume.set_attribute(
			DOSE_UNIT_NAME_ATTRIBUTE,
			grid.units.as_deref().unwrap_or("GY"),
		);
		volume.set_attribute(DOSE_UNIT_VALUE_ATTRIBUTE, grid.scaling.to_string());
		if let Some(dose_type) = &grid.dose_type {
			volume.set_attribute("DicomRtImport.DoseType", dose_type.as_str());
		}
		let dose = volumes.add_volume(scene, volume);

		let mut nodes = vec![dose.clone()];
		if options.create_isodose {
			match &self.isodose {
				Some(isodose) => nodes.extend(isodose.create_isodose_models(scene, &dose)?),
				None => warn!("Isodose logic is not available, skipping isodose models"),
			}
		}
		Ok(nodes)
	}

	/// Adds one contour node per ROI that has contours.
	pub fn add_structure_set(
		&self,
		scene: &mut Scene,
		object: &InMemDicomObject,
	) -> Result<Vec<NodeId>, RtImportError> {
		let structure_set = reader::structure_set(object)?;
		let mut nodes = Vec::with_capacity(structure_set.rois.len());
		for roi in structure_set.rois {
			if roi.contours.is_empty() {
				debug!(roi = %roi.name, "Skipping ROI without contours");
				continue;
			}
			let contours = roi
				.contours
				.into_iter()
				.map(|contour| contour.into_iter().map(geometry::flip_xy).collect())
				.collect();
			nodes.push(scene.add_node(ContourNode {
				name: roi.name,
				color: roi.color,
				contours,
			}));
		}
		Ok(nodes)
	}

	/// Adds a point list with the isocenter of every beam.
	pub fn add_plan(
		&self,
		scene: &mut Scene,
		object: &InMemDicomObject,
	) -> Result<Vec<NodeId>, RtImportError> {
		let plan = reader::plan(object)?;
		let label = match plan.label {
			Some(label) => label,
			None => display_name(object, RtObjectKind::RtPlan)?,
		};
		let mut isocenters = PointListNode::new(format!("{label} beams"));
		for beam in &plan.beams {
			isocenters.add_point(beam.name.clone(), geometry::flip_xy(beam.isocenter));
		}
		Ok(vec![scene.add_node(isocenters)])
	}

	fn load_rt_image(
		&self,
		scene: &mut Scene,
		object: &DefaultDicomObject,
	) -> Result<Vec<NodeId>, RtImportError> {
		self.volumes()?;
		self.planar_image()?;
		let scalars = object.decode_pixel_data()?.to_vec::<f32>()?;
		self.add_rt_image(scene, object, scalars)
	}

	/// Adds an RT image as a single-slice volume plus a textured plane placed
	/// at the imager position of its beam.
	pub fn add_rt_image(
		&self,
		scene: &mut Scene,
		object: &InMemDicomObject,
		scalars: Vec<f32>,
	) -> Result<Vec<NodeId>, RtImportError> {
		let volumes = self.volumes()?;
		let planar_image = self.planar_image()?;
		let rt_image = reader::rt_image_geometry(object)?;
		let [row_spacing, column_spacing] = rt_image.pixel_spacing;

		let name = match &rt_image.label {
			Some(label) => label.clone(),
			None => display_name(object, RtObjectKind::RtImage)?,
		};
		let image = ImageData::new([rt_image.columns, rt_image.rows, 1], scalars)?;
		let volume = VolumeNode::new(name.as_str())
			.with_geometry(VolumeGeometry {
				spacing: Vector3::new(column_spacing, row_spacing, 1.0),
				..VolumeGeometry::default()
			})
			.with_image(image);
		let volume = volumes.add_volume(scene, volume);

		let placement = PlanePlacement {
			center: geometry::flip_xy(rt_image.image_center()),
			column_axis: geometry::flip_xy_vector(rt_image.column_axis()),
			// first row at the top
			row_axis: -Vector3::z(),
			width: rt_image.columns as f64 * column_spacing,
			height: rt_image.rows as f64 * row_spacing,
		};
		let plane = planar_image.create_textured_plane(
			scene,
			&volume,
			&placement,
			&format!("{name} plane"),
		)?;
		Ok(vec![volume, plane])
	}
}

pub struct DicomRtImportModule {
	logic: Arc<DicomRtImportLogic>,
}

impl Default for DicomRtImportModule {
	fn default() -> Self {
		Self {
			logic: Arc::new(DicomRtImportLogic::default()),
		}
	}
}

impl Module for DicomRtImportModule {
	fn name(&self) -> &str {
		MODULE_NAME
	}

	fn info(&self) -> ModuleInfo {
		ModuleInfo::new("DICOM RT Import")
			.with_categories(["Radiotherapy"])
			.with_dependencies([
				volumes::MODULE_NAME,
				isodose::MODULE_NAME,
				planar_image::MODULE_NAME,
			])
			.with_contributors([
				"Csaba Pinter (Queen's)",
				"Andras Lasso (Queen's)",
				"Kevin Wang (UHN, Toronto)",
			])
			.with_help_text(
				"Imports DICOM RT dose, structure set, plan and image objects into the scene.",
			)
			.with_acknowledgement_text(
				"This work is part of SparKit project, funded by Cancer Care Ontario (CCO)'s \
				 ACRU program and Ontario Consortium for Adaptive Interventions in Radiation \
				 Oncology (OCAIRO).",
			)
	}

	/// Injects the sibling logics. Each missing one is reported once and the
	/// features depending on it stay unavailable.
	fn setup(&mut self, modules: &dyn ModuleLookup) -> SetupReport {
		let mut report = SetupReport::default();
		let volumes = lookup_logic::<VolumesLogic>(modules, volumes::MODULE_NAME)
			.map_err(|issue| report.report(issue))
			.ok();
		let isodose = lookup_logic::<IsodoseLogic>(modules, isodose::MODULE_NAME)
			.map_err(|issue| report.report(issue))
			.ok();
		let planar_image = lookup_logic::<PlanarImageLogic>(modules, planar_image::MODULE_NAME)
			.map_err(|issue| report.report(issue))
			.ok();

		self.logic = Arc::new(DicomRtImportLogic::new(volumes, isodose, planar_image));
		report
	}

	fn logic(&self) -> Arc<dyn Any + Send + Sync> {
		self.logic.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::reader::test_objects::*;
	use super::reader::*;
	use super::*;
	use crate::geometry::Point3;
	use crate::modules::{
		IsodoseLevel, IsodoseModule, ModuleManager, PlanarImageModule, VolumesModule,
	};
	use dicom::core::VR;

	fn manager(with_isodose: bool) -> ModuleManager {
		let mut manager = ModuleManager::new();
		manager.register(Box::new(VolumesModule::default())).unwrap();
		if with_isodose {
			manager
				.register(Box::new(IsodoseModule::new(vec![IsodoseLevel {
					value: 1.0,
					color: [0.0, 1.0, 0.0],
				}])))
				.unwrap();
		}
		manager.register(Box::new(PlanarImageModule::default())).unwrap();
		manager.register(Box::new(DicomRtImportModule::default())).unwrap();
		manager
	}

	fn import_logic(manager: &ModuleManager) -> Arc<DicomRtImportLogic> {
		manager.logic::<DicomRtImportLogic>(MODULE_NAME).unwrap()
	}

	#[test]
	fn setup_reports_each_missing_dependency_once() {
		let mut alone = ModuleManager::new();
		alone.register(Box::new(DicomRtImportModule::default())).unwrap();
		let reports = alone.setup_all();
		let (_, report) = &reports[0];
		assert_eq!(report.issues.len(), 3);
		assert!(report.issues.contains(&SetupIssue::ModuleNotFound {
			name: "PlanarImage".to_owned()
		}));

		let mut partial = manager(false);
		let reports = partial.setup_all();
		let (_, report) = reports.iter().find(|(name, _)| name == MODULE_NAME).unwrap();
		assert_eq!(
			report.issues,
			vec![SetupIssue::ModuleNotFound {
				name: "Isodose".to_owned()
			}]
		);

		let mut full = manager(true);
		assert!(full.setup_all().iter().all(|(_, report)| report.is_clean()));
	}

	#[test]
	fn structure_set_becomes_contour_nodes() {
		let mut manager = manager(true);
		manager.setup_all();
		let logic = import_logic(&manager);

		let rtstruct = object([
			sequence(
				STRUCTURE_SET_ROI_SEQUENCE,
				vec![
					object([integer(ROI_NUMBER, 1), text(ROI_NAME, VR::LO, "Body")]),
					object([integer(ROI_NUMBER, 2), text(ROI_NAME, VR::LO, "Empty")]),
				],
			),
			sequence(
				ROI_CONTOUR_SEQUENCE,
				vec![object([
					integer(REFERENCED_ROI_NUMBER, 1),
					sequence(
						CONTOUR_SEQUENCE,
						vec![object([numbers(
							CONTOUR_DATA,
							&[10.0, 20.0, 0.0, 30.0, 20.0, 0.0, 30.0, 40.0, 0.0],
						)])],
					),
				])],
			),
		]);
		let mut scene = Scene::new();
		let nodes = logic.add_structure_set(&mut scene, &rtstruct).unwrap();

		assert_eq!(nodes.len(), 1);
		let body = scene.contour(&nodes[0]).unwrap();
		assert_eq!(body.name, "Body");
		assert_eq!(body.contours[0][0], Point3::new(-10.0, -20.0, 0.0));
		assert_eq!(body.point_count(), 3);
	}

	#[test]
	fn plan_becomes_isocenter_point_list() {
		let logic = DicomRtImportLogic::default();
		let rtplan = object([
			text(RT_PLAN_LABEL, VR::SH, "Lung"),
			sequence(
				BEAM_SEQUENCE,
				vec![object([
					text(BEAM_NAME, VR::LO, "LAO"),
					sequence(
						CONTROL_POINT_SEQUENCE,
						vec![object([numbers(ISOCENTER_POSITION, &[5.0, -7.0, 9.0])])],
					),
				])],
			),
		]);
		let mut scene = Scene::new();
		let nodes = logic.add_plan(&mut scene, &rtplan).unwrap();

		let beams = scene.point_list(&nodes[0]).unwrap();
		assert_eq!(beams.name, "Lung beams");
		assert_eq!(beams.points[0].label, "LAO");
		assert_eq!(beams.points[0].position, Point3::new(-5.0, 7.0, 9.0));
	}

	fn grid() -> DoseGrid {
		DoseGrid {
			dims: [3, 3, 3],
			geometry: VolumeGeometry::default(),
			scaling: 0.5,
			units: Some("GY".to_owned()),
			dose_type: None,
		}
	}

	#[test]
	fn dose_is_scaled_and_marked() {
		let mut manager = manager(true);
		manager.setup_all();
		let logic = import_logic(&manager);

		let mut scalars = vec![0.0; 27];
		scalars[13] = 4.0;
		let mut scene = Scene::new();
		let nodes = logic
			.add_dose(
				&mut scene,
				"Dose",
				grid(),
				scalars,
				&ImportOptions {
					create_isodose: true,
				},
			)
			.unwrap();

		// dose volume plus the 1 Gy isodose model
		assert_eq!(nodes.len(), 2);
		let dose = scene.volume(&nodes[0]).unwrap();
		assert_eq!(dose.attribute(DOSE_VOLUME_ATTRIBUTE), Some("1"));
		assert_eq!(dose.attribute(DOSE_UNIT_NAME_ATTRIBUTE), Some("GY"));
		assert_eq!(dose.image.as_ref().unwrap().get(1, 1, 1), 2.0);
		assert!(scene.model(&nodes[1]).is_ok());
	}

	#[test]
	fn dose_without_volumes_logic_degrades() {
		let logic = DicomRtImportLogic::default();
		let result = logic.add_dose(
			&mut Scene::new(),
			"Dose",
			grid(),
			vec![0.0; 27],
			&ImportOptions::default(),
		);
		assert!(matches!(
			result,
			Err(RtImportError::MissingLogic("Volumes"))
		));
	}

	#[test]
	fn rt_image_adds_volume_and_plane() {
		let mut manager = manager(false);
		manager.setup_all();
		let logic = import_logic(&manager);

		let rtimage = object([
			unsigned(tags::ROWS, 2),
			unsigned(tags::COLUMNS, 3),
			numbers(IMAGE_PLANE_PIXEL_SPACING, &[2.0, 1.0]),
			numbers(RADIATION_MACHINE_SAD, &[1000.0]),
			numbers(RT_IMAGE_SID, &[1500.0]),
			numbers(GANTRY_ANGLE, &[0.0]),
			text(RT_IMAGE_LABEL, VR::SH, "DRR"),
		]);
		let mut scene = Scene::new();
		let nodes = logic
			.add_rt_image(&mut scene, &rtimage, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])
			.unwrap();

		assert_eq!(nodes.len(), 2);
		let volume = scene.volume(&nodes[0]).unwrap();
		assert_eq!(volume.image.as_ref().unwrap().dims(), [3, 2, 1]);
		let plane = scene.model(&nodes[1]).unwrap();
		assert_eq!(plane.name, "DRR plane");
		// gantry 0: imager 500 mm beyond the isocenter, posterior (LPS +y)
		let (lo, hi) = plane.polydata.bounds().unwrap();
		assert!((lo[1] + 500.0).abs() < 1e-9 && (hi[1] + 500.0).abs() < 1e-9);
		assert!((hi[0] - lo[0] - 3.0).abs() < 1e-9);
		assert!((hi[2] - lo[2] - 4.0).abs() < 1e-9);
	}
}
