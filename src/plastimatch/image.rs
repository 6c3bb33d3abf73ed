//! Floating point images in the registration engine's LPS frame.

use crate::geometry::{self, Direction3, Point3, Vector3};
use crate::scene::{ImageData, ImageDataError, VolumeNode};

/// Grid geometry in LPS: voxel `ijk` lies at `origin + direction * (ijk * spacing)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageHeader {
	pub dims: [usize; 3],
	pub origin: Point3,
	pub spacing: Vector3,
	/// Axis directions as columns.
	pub direction: Direction3,
	/// First two axes whose voxel order was reversed by rectification.
	pub reversed: [bool; 2],
}

impl ImageHeader {
	pub fn new(dims: [usize; 3]) -> Self {
		Self {
			dims,
			origin: Point3::origin(),
			spacing: Vector3::repeat(1.0),
			direction: Direction3::identity(),
			reversed: [false; 2],
		}
	}

	pub const fn voxel_count(&self) -> usize {
		self.dims[0] * self.dims[1] * self.dims[2]
	}

	pub fn index_to_point(&self, ijk: Vector3) -> Point3 {
		self.origin + self.direction * ijk.component_mul(&self.spacing)
	}

	/// Continuous index of a point, `None` for a degenerate grid.
	pub fn point_to_index(&self, point: Point3) -> Option<Vector3> {
		let index_to_offset = self.direction * Direction3::from_diagonal(&self.spacing);
		Some(index_to_offset.try_inverse()? * (point - self.origin))
	}

	/// Physical position of the grid centre.
	pub fn center(&self) -> Point3 {
		self.index_to_point(Vector3::from(self.dims.map(|n| (n.max(1) - 1) as f64 / 2.0)))
	}

	/// Relabels the first two axes so their direction cosines point along +x
	/// and +y. A negative axis gets its origin moved to the opposite corner
	/// and its cosine negated; the caller must reverse the voxel order along
	/// every axis returned as `true`.
	fn rectify(&mut self) -> [bool; 2] {
		let mut flipped = [false; 2];
		for axis in 0..2 {
			if self.direction[(axis, axis)] >= 0.0 {
				continue;
			}
			let column = self.direction.column(axis).into_owned();
			let extent = (self.dims[axis].max(1) - 1) as f64 * self.spacing[axis];
			self.origin += column * extent;
			self.direction.set_column(axis, &-column);
			self.reversed[axis] = !self.reversed[axis];
			flipped[axis] = true;
		}
		flipped
	}

	/// Calls `f` with the linear index and physical position of every voxel,
	/// x varying fastest.
	pub fn for_each_voxel(&self, mut f: impl FnMut(usize, Point3)) {
		let [nx, ny, nz] = self.dims;
		let mut index = 0;
		for k in 0..nz {
			for j in 0..ny {
				for i in 0..nx {
					f(index, self.index_to_point(Vector3::new(i as f64, j as f64, k as f64)));
					index += 1;
				}
			}
		}
	}
}

/// Copy of an x-fastest buffer with the voxel order of the first two axes
/// reversed where flagged.
fn reverse_axes(data: &[f32], dims: [usize; 3], reversed: [bool; 2]) -> Vec<f32> {
	if reversed == [false; 2] {
		return data.to_vec();
	}
	let [nx, ny, nz] = dims;
	let mut out = Vec::with_capacity(data.len());
	for k in 0..nz {
		for j in 0..ny {
			let src_j = if reversed[1] { ny - 1 - j } else { j };
			for i in 0..nx {
				let src_i = if reversed[0] { nx - 1 - i } else { i };
				out.push(data[(k * ny + src_j) * nx + src_i]);
			}
		}
	}
	out
}

/// Trilinear interpolation weights for a continuous index, `None` outside
/// the grid.
pub(crate) fn trilinear(dims: [usize; 3], ijk: Vector3) -> Option<[(usize, usize, f64); 3]> {
	const EPS: f64 = 1e-6;
	let mut axes = [(0, 0, 0.0); 3];
	for axis in 0..3 {
		let n = dims[axis];
		let c = ijk[axis];
		if n == 0 || c < -EPS || c > (n - 1) as f64 + EPS {
			return None;
		}
		if n == 1 {
			axes[axis] = (0, 0, 0.0);
			continue;
		}
		let c = c.clamp(0.0, (n - 1) as f64);
		let lo = (c.floor() as usize).min(n - 2);
		axes[axis] = (lo, lo + 1, c - lo as f64);
	}
	Some(axes)
}

/// Registration image: header plus scalars, x fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct PlmImage {
	pub header: ImageHeader,
	pub data: Vec<f32>,
}

impl PlmImage {
	/// Converts a volume node to an LPS float image. `None` when the node
	/// carries no image data.
	pub fn from_volume(volume: &VolumeNode) -> Option<Self> {
		let image = volume.image.as_ref()?;
		let geometry = &volume.geometry;
		Some(Self {
			header: ImageHeader {
				dims: image.dims(),
				origin: geometry::flip_xy(geometry.origin),
				spacing: geometry.spacing,
				direction: geometry::flip_xy_rows(&geometry.directions),
				reversed: [false; 2],
			},
			data: image.scalars().to_vec(),
		})
	}

	pub fn filled(header: ImageHeader, value: f32) -> Self {
		Self {
			header,
			data: vec![value; header.voxel_count()],
		}
	}

	/// Rectifies the header and reorders the buffer to match, so every voxel
	/// keeps its physical position.
	pub fn rectify(&mut self) {
		let flipped = self.header.rectify();
		self.data = reverse_axes(&self.data, self.header.dims, flipped);
	}

	pub fn get(&self, i: usize, j: usize, k: usize) -> f32 {
		let [nx, ny, _] = self.header.dims;
		self.data[(k * ny + j) * nx + i]
	}

	/// Trilinearly interpolated value at a physical point, `None` outside the
	/// image.
	pub fn sample(&self, point: Point3) -> Option<f32> {
		let ijk = self.header.point_to_index(point)?;
		let [(i0, i1, fx), (j0, j1, fy), (k0, k1, fz)] = trilinear(self.header.dims, ijk)?;

		let lerp = |a: f32, b: f32, t: f64| f64::from(a).mul_add(1.0 - t, f64::from(b) * t);
		let c00 = lerp(self.get(i0, j0, k0), self.get(i1, j0, k0), fx);
		let c10 = lerp(self.get(i0, j1, k0), self.get(i1, j1, k0), fx);
		let c01 = lerp(self.get(i0, j0, k1), self.get(i1, j0, k1), fx);
		let c11 = lerp(self.get(i0, j1, k1), self.get(i1, j1, k1), fx);
		let c0 = c00.mul_add(1.0 - fy, c10 * fy);
		let c1 = c01.mul_add(1.0 - fy, c11 * fy);
		Some(c0.mul_add(1.0 - fz, c1 * fz) as f32)
	}

	/// Copies the buffer into scene image data, restoring the voxel order the
	/// scene node had before rectification.
	pub fn to_image_data(&self) -> Result<ImageData, ImageDataError> {
		let data = reverse_axes(&self.data, self.header.dims, self.header.reversed);
		ImageData::new(self.header.dims, data)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::scene::VolumeGeometry;

	fn ramp() -> PlmImage {
		let header = ImageHeader::new([4, 3, 2]);
		let mut image = PlmImage::filled(header, 0.0);
		header.for_each_voxel(|index, p| image.data[index] = p.x as f32);
		image
	}

	#[test]
	fn volume_conversion_flips_to_lps() {
		let volume = VolumeNode::new("ct")
			.with_geometry(VolumeGeometry {
				origin: Point3::new(10.0, -20.0, 5.0),
				spacing: Vector3::new(1.0, 2.0, 3.0),
				..VolumeGeometry::default()
			})
			.with_image(ImageData::filled([2, 2, 2], 1.0));
		let image = PlmImage::from_volume(&volume).unwrap();

		assert_eq!(image.header.origin, Point3::new(-10.0, 20.0, 5.0));
		assert_eq!(image.header.direction[(0, 0)], -1.0);
		assert_eq!(image.header.direction[(1, 1)], -1.0);
		assert_eq!(image.header.direction[(2, 2)], 1.0);
		assert!(PlmImage::from_volume(&VolumeNode::new("empty")).is_none());
	}

	#[test]
	fn rectify_moves_origin_along_first_two_axes() {
		let mut header = ImageHeader {
			origin: Point3::new(10.0, 10.0, 10.0),
			spacing: Vector3::new(2.0, 0.5, 1.0),
			direction: Direction3::from_diagonal(&Vector3::new(-1.0, -1.0, 1.0)),
			..ImageHeader::new([5, 3, 7])
		};
		assert_eq!(header.rectify(), [true, true]);

		assert_eq!(header.origin, Point3::new(2.0, 9.0, 10.0));
		assert_eq!(header.direction, Direction3::identity());
		assert_eq!(header.rectify(), [false, false]);
	}

	#[test]
	fn rectify_keeps_every_voxel_in_place() {
		let header = ImageHeader {
			origin: Point3::new(10.0, 10.0, 0.0),
			spacing: Vector3::new(2.0, 0.5, 1.0),
			direction: geometry::ras_to_lps(),
			..ImageHeader::new([5, 3, 2])
		};
		let value_at = |p: Point3| (p.x + 10.0 * p.y + 100.0 * p.z) as f32;
		let mut image = PlmImage::filled(header, 0.0);
		header.for_each_voxel(|index, p| image.data[index] = value_at(p));
		let original = image.clone();

		image.rectify();
		assert_ne!(image.data, original.data);
		image.header.for_each_voxel(|index, p| assert_eq!(image.data[index], value_at(p)));
		let between = Point3::new(7.0, 9.5, 1.0);
		assert_eq!(image.sample(between), Some(value_at(between)));
		assert_eq!(image.to_image_data().unwrap().scalars(), original.data.as_slice());
	}

	#[test]
	fn sampling_interpolates_inside_and_rejects_outside() {
		let image = ramp();
		assert_eq!(image.sample(Point3::new(1.5, 1.0, 0.5)), Some(1.5));
		assert_eq!(image.sample(Point3::new(3.0, 2.0, 1.0)), Some(3.0));
		assert_eq!(image.sample(Point3::new(3.5, 0.0, 0.0)), None);
		assert_eq!(image.sample(Point3::new(0.0, -0.5, 0.0)), None);
	}

	#[test]
	fn center_is_middle_of_grid() {
		let header = ImageHeader {
			origin: Point3::new(1.0, 2.0, 3.0),
			spacing: Vector3::repeat(2.0),
			..ImageHeader::new([5, 5, 1])
		};
		assert_eq!(header.center(), Point3::new(5.0, 6.0, 3.0));
	}
}
