use crate::filter::PolyData;
use crate::geometry::{Direction3, Matrix4, Point3, Vector3};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Scalar buffer of a volume, x varying fastest, then y, then z.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
	dims: [usize; 3],
	scalars: Vec<f32>,
}

#[derive(Debug, Error)]
#[error("expected {expected} scalars for dimensions {dims:?}, got {actual}")]
pub struct ImageDataError {
	pub dims: [usize; 3],
	pub expected: usize,
	pub actual: usize,
}

impl ImageData {
	pub fn new(dims: [usize; 3], scalars: Vec<f32>) -> Result<Self, ImageDataError> {
		let expected = dims.iter().product();
		if scalars.len() != expected {
			return Err(ImageDataError {
				dims,
				expected,
				actual: scalars.len(),
			});
		}
		Ok(Self { dims, scalars })
	}

	pub fn filled(dims: [usize; 3], value: f32) -> Self {
		Self {
			dims,
			scalars: vec![value; dims.iter().product()],
		}
	}

	pub const fn dims(&self) -> [usize; 3] {
		self.dims
	}

	pub fn scalars(&self) -> &[f32] {
		&self.scalars
	}

	pub fn scalars_mut(&mut self) -> &mut [f32] {
		&mut self.scalars
	}

	pub fn len(&self) -> usize {
		self.scalars.len()
	}

	pub fn is_empty(&self) -> bool {
		self.scalars.is_empty()
	}

	pub const fn index(&self, i: usize, j: usize, k: usize) -> usize {
		(k * self.dims[1] + j) * self.dims[0] + i
	}

	pub fn get(&self, i: usize, j: usize, k: usize) -> f32 {
		self.scalars[self.index(i, j, k)]
	}

	pub fn set(&mut self, i: usize, j: usize, k: usize, value: f32) {
		let index = self.index(i, j, k);
		self.scalars[index] = value;
	}

	/// Minimum and maximum scalar, `None` when empty.
	pub fn scalar_range(&self) -> Option<(f32, f32)> {
		self.scalars.iter().fold(None, |range, &v| match range {
			None => Some((v, v)),
			Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
		})
	}
}

/// Placement of the voxel grid in RAS space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeGeometry {
	pub origin: Point3,
	pub spacing: Vector3,
	/// IJK axis directions as columns.
	pub directions: Direction3,
}

impl Default for VolumeGeometry {
	fn default() -> Self {
		Self {
			origin: Point3::origin(),
			spacing: Vector3::repeat(1.0),
			directions: Direction3::identity(),
		}
	}
}

impl VolumeGeometry {
	/// RAS position of a continuous voxel coordinate.
	pub fn ijk_to_ras(&self, ijk: Vector3) -> Point3 {
		self.origin + self.directions * ijk.component_mul(&self.spacing)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeNode {
	pub name: String,
	pub geometry: VolumeGeometry,
	pub image: Option<ImageData>,
	pub labelmap: bool,
	pub attributes: BTreeMap<String, String>,
}

impl VolumeNode {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			geometry: VolumeGeometry::default(),
			image: None,
			labelmap: false,
			attributes: BTreeMap::new(),
		}
	}

	#[must_use]
	pub fn with_geometry(mut self, geometry: VolumeGeometry) -> Self {
		self.geometry = geometry;
		self
	}

	#[must_use]
	pub fn with_image(mut self, image: ImageData) -> Self {
		self.image = Some(image);
		self
	}

	#[must_use]
	pub fn as_labelmap(mut self) -> Self {
		self.labelmap = true;
		self
	}

	pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
		self.attributes.insert(key.into(), value.into());
	}

	pub fn attribute(&self, key: &str) -> Option<&str> {
		self.attributes.get(key).map(String::as_str)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearTransformNode {
	pub name: String,
	pub matrix_to_parent: Matrix4,
}

impl LinearTransformNode {
	pub fn new(name: impl Into<String>, matrix_to_parent: Matrix4) -> Self {
		Self {
			name: name.into(),
			matrix_to_parent,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlPoint {
	pub label: String,
	pub position: Point3,
}

/// Ordered labelled points in RAS.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointListNode {
	pub name: String,
	pub points: Vec<ControlPoint>,
}

impl PointListNode {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			points: Vec::new(),
		}
	}

	pub fn from_positions<I>(name: impl Into<String>, positions: I) -> Self
	where
		I: IntoIterator<Item = Point3>,
	{
		let mut node = Self::new(name);
		for position in positions {
			node.add_point("", position);
		}
		node
	}

	pub fn add_point(&mut self, label: impl Into<String>, position: Point3) {
		self.points.push(ControlPoint {
			label: label.into(),
			position,
		});
	}

	pub fn positions(&self) -> impl Iterator<Item = Point3> + '_ {
		self.points.iter().map(|point| point.position)
	}

	pub fn len(&self) -> usize {
		self.points.len()
	}

	pub fn is_empty(&self) -> bool {
		self.points.is_empty()
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelNode {
	pub name: String,
	pub polydata: PolyData,
	pub color: [f64; 3],
	pub texture: Option<image::GrayImage>,
}

impl ModelNode {
	pub fn new(name: impl Into<String>, polydata: PolyData) -> Self {
		Self {
			name: name.into(),
			polydata,
			color: [1.0, 1.0, 1.0],
			texture: None,
		}
	}

	#[must_use]
	pub fn with_color(mut self, color: [f64; 3]) -> Self {
		self.color = color;
		self
	}
}

/// Planar closed contours of one structure, in RAS.
#[derive(Debug, Clone, PartialEq)]
pub struct ContourNode {
	pub name: String,
	pub color: [f64; 3],
	pub contours: Vec<Vec<Point3>>,
}

impl ContourNode {
	pub fn point_count(&self) -> usize {
		self.contours.iter().map(Vec::len).sum()
	}
}
