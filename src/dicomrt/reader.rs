//! Attribute extraction from DICOM RT datasets.
//!
//! Everything here works on an in-memory dataset and returns LPS positions
//! unless stated otherwise. Pixel decoding happens in the caller.

use super::RtImportError;
use crate::geometry::{self, Direction3, Point3, Vector3};
use crate::scene::VolumeGeometry;
use dicom::core::Tag;
use dicom::dictionary_std::{tags, uids};
use dicom::object::InMemDicomObject;
use std::fmt::{Display, Formatter};

// RT Dose
pub const DOSE_UNITS: Tag = Tag(0x3004, 0x0002);
pub const DOSE_TYPE: Tag = Tag(0x3004, 0x0004);
pub const GRID_FRAME_OFFSET_VECTOR: Tag = Tag(0x3004, 0x000C);
pub const DOSE_GRID_SCALING: Tag = Tag(0x3004, 0x000E);
// RT Structure Set
pub const STRUCTURE_SET_LABEL: Tag = Tag(0x3006, 0x0002);
pub const STRUCTURE_SET_ROI_SEQUENCE: Tag = Tag(0x3006, 0x0020);
pub const ROI_NUMBER: Tag = Tag(0x3006, 0x0022);
pub const ROI_NAME: Tag = Tag(0x3006, 0x0026);
pub const ROI_DISPLAY_COLOR: Tag = Tag(0x3006, 0x002A);
pub const ROI_CONTOUR_SEQUENCE: Tag = Tag(0x3006, 0x0039);
pub const CONTOUR_SEQUENCE: Tag = Tag(0x3006, 0x0040);
pub const CONTOUR_DATA: Tag = Tag(0x3006, 0x0050);
pub const REFERENCED_ROI_NUMBER: Tag = Tag(0x3006, 0x0084);
// RT Plan
pub const RT_PLAN_LABEL: Tag = Tag(0x300A, 0x0002);
pub const BEAM_SEQUENCE: Tag = Tag(0x300A, 0x00B0);
pub const BEAM_NUMBER: Tag = Tag(0x300A, 0x00C0);
pub const BEAM_NAME: Tag = Tag(0x300A, 0x00C2);
pub const CONTROL_POINT_SEQUENCE: Tag = Tag(0x300A, 0x0111);
pub const GANTRY_ANGLE: Tag = Tag(0x300A, 0x011E);
pub const ISOCENTER_POSITION: Tag = Tag(0x300A, 0x012C);
pub const ION_BEAM_SEQUENCE: Tag = Tag(0x300A, 0x03A2);
pub const ION_CONTROL_POINT_SEQUENCE: Tag = Tag(0x300A, 0x03A8);
// RT Image
pub const RT_IMAGE_LABEL: Tag = Tag(0x3002, 0x0002);
pub const IMAGE_PLANE_PIXEL_SPACING: Tag = Tag(0x3002, 0x0011);
pub const RADIATION_MACHINE_SAD: Tag = Tag(0x3002, 0x0022);
pub const RT_IMAGE_SID: Tag = Tag(0x3002, 0x0026);

/// Kinds of DICOM RT objects this importer understands.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub enum RtObjectKind {
	RtDose,
	RtStructureSet,
	RtPlan,
	RtImage,
}

impl RtObjectKind {
	pub fn from_sop_class(uid: &str) -> Option<Self> {
		match uid.trim_end_matches('\0').trim() {
			uids::RT_DOSE_STORAGE => Some(Self::RtDose),
			uids::RT_STRUCTURE_SET_STORAGE => Some(Self::RtStructureSet),
			uids::RT_PLAN_STORAGE | uids::RT_ION_PLAN_STORAGE => Some(Self::RtPlan),
			uids::RT_IMAGE_STORAGE => Some(Self::RtImage),
			_ => None,
		}
	}

	/// Classifies a dataset by its SOP Class UID.
	pub fn of(object: &InMemDicomObject) -> Result<Self, RtImportError> {
		let sop_class = string(object, tags::SOP_CLASS_UID)?
			.ok_or(RtImportError::MissingAttribute("SOPClassUID"))?;
		Self::from_sop_class(&sop_class).ok_or(RtImportError::NotRt { sop_class })
	}

	pub const fn default_name(self) -> &'static str {
		match self {
			Self::RtDose => "RTDOSE",
			Self::RtStructureSet => "RTSTRUCT",
			Self::RtPlan => "RTPLAN",
			Self::RtImage => "RTIMAGE",
		}
	}
}

impl Display for RtObjectKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.default_name())
	}
}

/// Trimmed string value, `None` when absent or empty.
pub fn string(object: &InMemDicomObject, tag: Tag) -> Result<Option<String>, RtImportError> {
	let Some(element) = object.element_opt(tag)? else {
		return Ok(None);
	};
	let value = element.to_str()?;
	let value = value.trim_end_matches('\0').trim();
	Ok((!value.is_empty()).then(|| value.to_owned()))
}

fn floats(object: &InMemDicomObject, tag: Tag) -> Result<Option<Vec<f64>>, RtImportError> {
	match object.element_opt(tag)? {
		Some(element) => Ok(Some(element.to_multi_float64()?)),
		None => Ok(None),
	}
}

fn required_floats(
	object: &InMemDicomObject,
	tag: Tag,
	name: &'static str,
	count: usize,
) -> Result<Vec<f64>, RtImportError> {
	let values = floats(object, tag)?.ok_or(RtImportError::MissingAttribute(name))?;
	if values.len() < count {
		return Err(RtImportError::InvalidAttribute {
			name,
			reason: format!("expected {count} values, found {}", values.len()),
		});
	}
	Ok(values)
}

fn float(object: &InMemDicomObject, tag: Tag) -> Result<Option<f64>, RtImportError> {
	Ok(floats(object, tag)?.and_then(|values| values.first().copied()))
}

fn point3(
	object: &InMemDicomObject,
	tag: Tag,
	name: &'static str,
) -> Result<Point3, RtImportError> {
	let v = required_floats(object, tag, name, 3)?;
	Ok(Point3::new(v[0], v[1], v[2]))
}

fn items(object: &InMemDicomObject, tag: Tag) -> Result<&[InMemDicomObject], RtImportError> {
	Ok(object
		.element_opt(tag)?
		.and_then(|element| element.items())
		.unwrap_or(&[]))
}

fn int(object: &InMemDicomObject, tag: Tag) -> Result<Option<i64>, RtImportError> {
	match object.element_opt(tag)? {
		Some(element) => Ok(Some(element.to_int::<i64>()?)),
		None => Ok(None),
	}
}

fn dimension(
	object: &InMemDicomObject,
	tag: Tag,
	name: &'static str,
) -> Result<usize, RtImportError> {
	let value = int(object, tag)?.ok_or(RtImportError::MissingAttribute(name))?;
	usize::try_from(value).map_err(|_| RtImportError::InvalidAttribute {
		name,
		reason: format!("{value} is not a valid size"),
	})
}

/// Voxel grid of an RT Dose, already converted to RAS.
#[derive(Debug, Clone, PartialEq)]
pub struct DoseGrid {
	pub dims: [usize; 3],
	pub geometry: VolumeGeometry,
	pub scaling: f64,
	pub units: Option<String>,
	pub dose_type: Option<String>,
}

pub fn dose_grid(object: &InMemDicomObject) -> Result<DoseGrid, RtImportError> {
	let columns = dimension(object, tags::COLUMNS, "Columns")?;
	let rows = dimension(object, tags::ROWS, "Rows")?;
	let frames = int(object, tags::NUMBER_OF_FRAMES)?.map_or(1, |n| n.max(1) as usize);

	let position = point3(object, tags::IMAGE_POSITION_PATIENT, "ImagePositionPatient")?;
	let orientation = required_floats(
		object,
		tags::IMAGE_ORIENTATION_PATIENT,
		"ImageOrientationPatient",
		6,
	)?;
	let pixel_spacing = required_floats(object, tags::PIXEL_SPACING, "PixelSpacing", 2)?;

	let row_direction = Vector3::new(orientation[0], orientation[1], orientation[2]);
	let column_direction = Vector3::new(orientation[3], orientation[4], orientation[5]);
	let mut normal = row_direction.cross(&column_direction);

	let offsets = floats(object, GRID_FRAME_OFFSET_VECTOR)?.unwrap_or_default();
	let mut slice_spacing = match offsets.as_slice() {
		[first, second, ..] => second - first,
		_ => 1.0,
	};
	if frames > 1 && offsets.len() < frames {
		return Err(RtImportError::InvalidAttribute {
			name: "GridFrameOffsetVector",
			reason: format!("{} offsets for {frames} frames", offsets.len()),
		});
	}
	if slice_spacing < 0.0 {
		normal = -normal;
		slice_spacing = -slice_spacing;
	}
	if slice_spacing == 0.0 {
		slice_spacing = 1.0;
	}

	let lps_directions = Direction3::from_columns(&[row_direction, column_direction, normal]);

	Ok(DoseGrid {
		dims: [columns, rows, frames],
		geometry: VolumeGeometry {
			origin: geometry::flip_xy(position),
			spacing: Vector3::new(pixel_spacing[1], pixel_spacing[0], slice_spacing),
			directions: geometry::flip_xy_rows(&lps_directions),
		},
		scaling: float(object, DOSE_GRID_SCALING)?.unwrap_or(1.0),
		units: string(object, DOSE_UNITS)?,
		dose_type: string(object, DOSE_TYPE)?,
	})
}

/// One ROI of a structure set with its planar contours in LPS.
#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
	pub number: i64,
	pub name: String,
	/// Display colour in `[0, 1]`.
	pub color: [f64; 3],
	pub contours: Vec<Vec<Point3>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructureSet {
	pub label: Option<String>,
	pub rois: Vec<Roi>,
}

pub fn structure_set(object: &InMemDicomObject) -> Result<StructureSet, RtImportError> {
	let mut rois = Vec::new();
	for item in items(object, STRUCTURE_SET_ROI_SEQUENCE)? {
		let number = int(item, ROI_NUMBER)?.ok_or(RtImportError::MissingAttribute("ROINumber"))?;
		rois.push(Roi {
			number,
			name: string(item, ROI_NAME)?.unwrap_or_else(|| format!("ROI {number}")),
			color: [1.0, 0.0, 0.0],
			contours: Vec::new(),
		});
	}

	for item in items(object, ROI_CONTOUR_SEQUENCE)? {
		let Some(number) = int(item, REFERENCED_ROI_NUMBER)? else {
			continue;
		};
		let Some(roi) = rois.iter_mut().find(|roi| roi.number == number) else {
			continue;
		};
		if let Some(color) = floats(item, ROI_DISPLAY_COLOR)? {
			if let [r, g, b, ..] = color.as_slice() {
				roi.color = [r / 255.0, g / 255.0, b / 255.0];
			}
		}
		for contour in items(item, CONTOUR_SEQUENCE)? {
			let data = floats(contour, CONTOUR_DATA)?.unwrap_or_default();
			if data.len() % 3 != 0 {
				return Err(RtImportError::InvalidAttribute {
					name: "ContourData",
					reason: format!("{} values do not form points", data.len()),
				});
			}
			let points: Vec<Point3> = data
				.chunks_exact(3)
				.map(|p| Point3::new(p[0], p[1], p[2]))
				.collect();
			if !points.is_empty() {
				roi.contours.push(points);
			}
		}
	}

	Ok(StructureSet {
		label: string(object, STRUCTURE_SET_LABEL)?,
		rois,
	})
}

#[derive(Debug, Clone, PartialEq)]
pub struct Beam {
	pub number: Option<i64>,
	pub name: String,
	pub isocenter: Point3,
	pub gantry_angle: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
	pub label: Option<String>,
	pub beams: Vec<Beam>,
}

pub fn plan(object: &InMemDicomObject) -> Result<Plan, RtImportError> {
	let (beam_items, control_points) = match items(object, BEAM_SEQUENCE)? {
		[] => (items(object, ION_BEAM_SEQUENCE)?, ION_CONTROL_POINT_SEQUENCE),
		beams => (beams, CONTROL_POINT_SEQUENCE),
	};

	let mut beams = Vec::with_capacity(beam_items.len());
	for item in beam_items {
		let number = int(item, BEAM_NUMBER)?;
		let name = string(item, BEAM_NAME)?.unwrap_or_else(|| match number {
			Some(number) => format!("Beam {number}"),
			None => "Beam".to_owned(),
		});
		// isocenter and gantry angle are given by the first control point
		let first = items(item, control_points)?
			.first()
			.ok_or(RtImportError::MissingAttribute("ControlPointSequence"))?;
		beams.push(Beam {
			number,
			name,
			isocenter: point3(first, ISOCENTER_POSITION, "IsocenterPosition")?,
			gantry_angle: float(first, GANTRY_ANGLE)?,
		});
	}

	Ok(Plan {
		label: string(object, RT_PLAN_LABEL)?,
		beams,
	})
}

/// Placement of an RT Image (portal image or DRR) relative to its beam.
#[derive(Debug, Clone, PartialEq)]
pub struct RtImageGeometry {
	pub label: Option<String>,
	pub rows: usize,
	pub columns: usize,
	/// Spacing between rows and between columns at the image plane.
	pub pixel_spacing: [f64; 2],
	pub gantry_angle: f64,
	pub sad: f64,
	pub sid: f64,
	pub isocenter: Point3,
}

pub fn rt_image_geometry(object: &InMemDicomObject) -> Result<RtImageGeometry, RtImportError> {
	let spacing = required_floats(
		object,
		IMAGE_PLANE_PIXEL_SPACING,
		"ImagePlanePixelSpacing",
		2,
	)?;
	let isocenter = match floats(object, ISOCENTER_POSITION)? {
		Some(v) if v.len() >= 3 => Point3::new(v[0], v[1], v[2]),
		_ => Point3::origin(),
	};
	Ok(RtImageGeometry {
		label: string(object, RT_IMAGE_LABEL)?,
		rows: dimension(object, tags::ROWS, "Rows")?,
		columns: dimension(object, tags::COLUMNS, "Columns")?,
		pixel_spacing: [spacing[0], spacing[1]],
		gantry_angle: float(object, GANTRY_ANGLE)?.unwrap_or(0.0),
		sad: float(object, RADIATION_MACHINE_SAD)?
			.ok_or(RtImportError::MissingAttribute("RadiationMachineSAD"))?,
		sid: float(object, RT_IMAGE_SID)?.ok_or(RtImportError::MissingAttribute("RTImageSID"))?,
		isocenter,
	})
}

impl RtImageGeometry {
	/// Beam source position in LPS. The source rotates in the axial plane
	/// around the isocenter.
	pub fn source(&self) -> Point3 {
		self.isocenter - self.beam_direction() * self.sad
	}

	/// Unit vector from the source through the isocenter, in LPS.
	pub fn beam_direction(&self) -> Vector3 {
		let (sin, cos) = self.gantry_angle.to_radians().sin_cos();
		Vector3::new(-sin, cos, 0.0)
	}

	/// Centre of the imager in LPS.
	pub fn image_center(&self) -> Point3 {
		self.isocenter + self.beam_direction() * (self.sid - self.sad)
	}

	/// Direction along image columns (increasing column index) in LPS.
	pub fn column_axis(&self) -> Vector3 {
		let (sin, cos) = self.gantry_angle.to_radians().sin_cos();
		Vector3::new(cos, sin, 0.0)
	}
}
