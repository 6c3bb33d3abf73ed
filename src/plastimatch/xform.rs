//! Transforms produced and consumed by registration.

use super::image::{trilinear, ImageHeader};
use crate::geometry::{Direction3, Matrix4, Point3, Vector3};

/// Affine map `p -> matrix * p + translation` in LPS, centre at the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
	pub matrix: Direction3,
	pub translation: Vector3,
}

impl Default for AffineTransform {
	fn default() -> Self {
		Self {
			matrix: Direction3::identity(),
			translation: Vector3::zeros(),
		}
	}
}

impl AffineTransform {
	/// Builds the transform from twelve parameters: the matrix in row-major
	/// order followed by the translation.
	pub fn from_parameters(p: &[f64; 12]) -> Self {
		Self {
			matrix: Direction3::new(p[0], p[1], p[2], p[3], p[4], p[5], p[6], p[7], p[8]),
			translation: Vector3::new(p[9], p[10], p[11]),
		}
	}

	pub fn parameters(&self) -> [f64; 12] {
		let mut p = [0.0; 12];
		for r in 0..3 {
			for c in 0..3 {
				p[3 * r + c] = self.matrix[(r, c)];
			}
			p[9 + r] = self.translation[r];
		}
		p
	}

	pub fn transform_point(&self, p: Point3) -> Point3 {
		self.matrix * p + self.translation
	}
}

/// Packs a 4×4 matrix into twelve affine parameters: the 3×3 block column by
/// column, then the translation column.
pub fn pack_matrix(m: &Matrix4) -> [f64; 12] {
	let mut p = [0.0; 12];
	for i in 0..3 {
		for j in 0..3 {
			p[3 * i + j] = m[(j, i)];
		}
		p[9 + i] = m[(i, 3)];
	}
	p
}

/// Inverse of [`pack_matrix`]; the bottom row is `[0, 0, 0, 1]`.
pub fn unpack_matrix(p: &[f64; 12]) -> Matrix4 {
	let mut m = Matrix4::identity();
	for i in 0..3 {
		for j in 0..3 {
			m[(j, i)] = p[3 * i + j];
		}
		m[(i, 3)] = p[9 + i];
	}
	m
}

/// Displacement per voxel of a grid: a point `x` maps to `x + u(x)`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorField {
	pub header: ImageHeader,
	pub vectors: Vec<Vector3>,
}

impl VectorField {
	pub fn zeros(header: ImageHeader) -> Self {
		Self {
			header,
			vectors: vec![Vector3::zeros(); header.voxel_count()],
		}
	}

	fn get(&self, i: usize, j: usize, k: usize) -> Vector3 {
		let [nx, ny, _] = self.header.dims;
		self.vectors[(k * ny + j) * nx + i]
	}

	/// Interpolated displacement at a physical point; zero outside the grid.
	pub fn displacement(&self, point: Point3) -> Vector3 {
		let Some([(i0, i1, fx), (j0, j1, fy), (k0, k1, fz)]) = self
			.header
			.point_to_index(point)
			.and_then(|ijk| trilinear(self.header.dims, ijk))
		else {
			return Vector3::zeros();
		};

		let lerp = |a: Vector3, b: Vector3, t: f64| a * (1.0 - t) + b * t;
		let c00 = lerp(self.get(i0, j0, k0), self.get(i1, j0, k0), fx);
		let c10 = lerp(self.get(i0, j1, k0), self.get(i1, j1, k0), fx);
		let c01 = lerp(self.get(i0, j0, k1), self.get(i1, j0, k1), fx);
		let c11 = lerp(self.get(i0, j1, k1), self.get(i1, j1, k1), fx);
		lerp(lerp(c00, c10, fy), lerp(c01, c11, fy), fz)
	}

	/// Largest displacement magnitude.
	pub fn max_magnitude(&self) -> f64 {
		self.vectors.iter().map(Vector3::norm).fold(0.0, f64::max)
	}
}

/// Result of a registration: maps fixed space points into moving space.
#[derive(Debug, Clone, PartialEq)]
pub enum Xform {
	Identity,
	Translation(Vector3),
	Affine(AffineTransform),
	VectorField(VectorField),
}

impl Xform {
	pub fn transform_point(&self, p: Point3) -> Point3 {
		match self {
			Self::Identity => p,
			Self::Translation(offset) => p + *offset,
			Self::Affine(affine) => affine.transform_point(p),
			Self::VectorField(field) => p + field.displacement(p),
		}
	}

	pub const fn kind(&self) -> &'static str {
		match self {
			Self::Identity => "identity",
			Self::Translation(_) => "translation",
			Self::Affine(_) => "affine",
			Self::VectorField(_) => "vector_field",
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pack_then_unpack_restores_matrix() {
		let m = Matrix4::new(
			0.0, -1.0, 0.0, 12.5, //
			1.0, 0.0, 0.0, -3.0, //
			0.0, 0.0, 2.0, 7.25, //
			0.0, 0.0, 0.0, 1.0,
		);
		assert_eq!(unpack_matrix(&pack_matrix(&m)), m);
	}

	#[test]
	fn packing_layout_is_column_major_block_then_translation() {
		let m = Matrix4::new(
			1.0, 2.0, 3.0, 10.0, //
			4.0, 5.0, 6.0, 11.0, //
			7.0, 8.0, 9.0, 12.0, //
			0.0, 0.0, 0.0, 1.0,
		);
		assert_eq!(
			pack_matrix(&m),
			[1.0, 4.0, 7.0, 2.0, 5.0, 8.0, 3.0, 6.0, 9.0, 10.0, 11.0, 12.0]
		);
	}

	#[test]
	fn affine_parameters_round_trip() {
		let p = [1.0, 0.5, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 3.0, 2.0, 1.0];
		let affine = AffineTransform::from_parameters(&p);
		assert_eq!(affine.parameters(), p);
		assert_eq!(
			affine.transform_point(Point3::new(0.0, 2.0, 0.0)),
			Point3::new(4.0, 4.0, 1.0)
		);
	}

	#[test]
	fn field_interpolates_and_vanishes_outside() {
		let header = ImageHeader::new([2, 1, 1]);
		let mut field = VectorField::zeros(header);
		field.vectors[1] = Vector3::new(2.0, 0.0, 0.0);

		assert_eq!(field.displacement(Point3::new(0.5, 0.0, 0.0)), Vector3::x());
		assert_eq!(field.displacement(Point3::new(5.0, 0.0, 0.0)), Vector3::zeros());
		assert_eq!(field.max_magnitude(), 2.0);
		assert_eq!(
			Xform::VectorField(field).transform_point(Point3::new(1.0, 0.0, 0.0)),
			Point3::new(3.0, 0.0, 0.0)
		);
	}
}
