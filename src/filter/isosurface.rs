//! Iso-surface extraction on a regular grid (marching tetrahedra).
//!
//! Each cell is split into six tetrahedra around its main diagonal. All cells
//! use the same split, so neighbouring cells agree on their shared faces and
//! the surface is watertight wherever the field is enclosed by values below
//! the iso value. Vertices are shared per grid edge.

use super::mesh::{triangle_normal, PolyData};
use crate::geometry::{Point3, Vector3};
use crate::scene::ImageData;
use std::collections::HashMap;

const CORNERS: [[usize; 3]; 8] = [
	[0, 0, 0],
	[1, 0, 0],
	[1, 1, 0],
	[0, 1, 0],
	[0, 0, 1],
	[1, 0, 1],
	[1, 1, 1],
	[0, 1, 1],
];

const TETRAHEDRA: [[usize; 4]; 6] = [
	[0, 5, 1, 6],
	[0, 1, 2, 6],
	[0, 2, 3, 6],
	[0, 3, 7, 6],
	[0, 7, 4, 6],
	[0, 4, 5, 6],
];

struct Extractor<'a> {
	field: &'a ImageData,
	iso: f32,
	edge_vertices: HashMap<(usize, usize), usize>,
	mesh: PolyData,
}

#[derive(Clone, Copy)]
struct Corner {
	index: usize,
	position: Point3,
	value: f32,
}

impl Extractor<'_> {
	fn vertex_on_edge(&mut self, p: Corner, q: Corner) -> usize {
		let key = (p.index.min(q.index), p.index.max(q.index));
		if let Some(&vertex) = self.edge_vertices.get(&key) {
			return vertex;
		}
		let t = f64::from((self.iso - p.value) / (q.value - p.value)).clamp(0.0, 1.0);
		let position = p.position + (q.position - p.position) * t;
		let vertex = self.mesh.points.len();
		self.mesh.points.push(position);
		self.edge_vertices.insert(key, vertex);
		vertex
	}

	/// Emits a triangle facing from `inside` towards `outside`.
	fn emit(&mut self, mut triangle: [usize; 3], inside: &[Corner], outside: &[Corner]) {
		let [a, b, c] = triangle.map(|v| self.mesh.points[v]);
		let normal = triangle_normal(a, b, c);
		if normal.norm() < 1e-12 {
			return;
		}
		let centroid = |corners: &[Corner]| {
			let sum = corners
				.iter()
				.fold(Vector3::zeros(), |acc, corner| acc + corner.position.coords);
			Point3::from(sum / corners.len() as f64)
		};
		let outward = centroid(outside) - centroid(inside);
		if normal.dot(&outward) < 0.0 {
			triangle.swap(1, 2);
		}
		self.mesh.triangles.push(triangle);
	}

	fn tetrahedron(&mut self, corners: [Corner; 4]) {
		let (inside, outside): (Vec<Corner>, Vec<Corner>) =
			corners.iter().partition(|corner| corner.value >= self.iso);

		match inside.len() {
			1 | 3 => {
				let (lone, others) = if inside.len() == 1 {
					(inside[0], &outside)
				} else {
					(outside[0], &inside)
				};
				let triangle = [
					self.vertex_on_edge(lone, others[0]),
					self.vertex_on_edge(lone, others[1]),
					self.vertex_on_edge(lone, others[2]),
				];
				self.emit(triangle, &inside, &outside);
			}
			2 => {
				let (a, b) = (inside[0], inside[1]);
				let (c, d) = (outside[0], outside[1]);
				let ac = self.vertex_on_edge(a, c);
				let ad = self.vertex_on_edge(a, d);
				let bd = self.vertex_on_edge(b, d);
				let bc = self.vertex_on_edge(b, c);
				self.emit([ac, ad, bd], &inside, &outside);
				self.emit([ac, bd, bc], &inside, &outside);
			}
			_ => {}
		}
	}
}

/// Extracts the surface where `field` crosses `iso`, in voxel (IJK)
/// coordinates. Voxels with values `>= iso` are inside.
pub fn extract_isosurface(field: &ImageData, iso: f32) -> PolyData {
	let [nx, ny, nz] = field.dims();
	let mut extractor = Extractor {
		field,
		iso,
		edge_vertices: HashMap::new(),
		mesh: PolyData::default(),
	};
	if nx < 2 || ny < 2 || nz < 2 {
		return extractor.mesh;
	}

	for k in 0..nz - 1 {
		for j in 0..ny - 1 {
			for i in 0..nx - 1 {
				let cell = CORNERS.map(|[di, dj, dk]| {
					let (ci, cj, ck) = (i + di, j + dj, k + dk);
					Corner {
						index: extractor.field.index(ci, cj, ck),
						position: Point3::new(ci as f64, cj as f64, ck as f64),
						value: extractor.field.get(ci, cj, ck),
					}
				});
				let all_inside = cell.iter().all(|c| c.value >= iso);
				let all_outside = cell.iter().all(|c| c.value < iso);
				if all_inside || all_outside {
					continue;
				}
				for tetrahedron in TETRAHEDRA {
					extractor.tetrahedron(tetrahedron.map(|corner| cell[corner]));
				}
			}
		}
	}
	extractor.mesh
}

/// Surrounds the field with one voxel of `value` on every side.
pub fn pad(field: &ImageData, value: f32) -> ImageData {
	let [nx, ny, nz] = field.dims();
	let mut padded = ImageData::filled([nx + 2, ny + 2, nz + 2], value);
	for k in 0..nz {
		for j in 0..ny {
			for i in 0..nx {
				padded.set(i + 1, j + 1, k + 1, field.get(i, j, k));
			}
		}
	}
	padded
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn single_voxel_gives_closed_surface() {
		let mut field = ImageData::filled([3, 3, 3], 0.0);
		field.set(1, 1, 1, 1.0);
		let mesh = extract_isosurface(&field, 0.5);

		assert!(!mesh.is_empty());
		assert_eq!(mesh.boundary_edge_count(), 0);
		let (lo, hi) = mesh.bounds().unwrap();
		for axis in 0..3 {
			assert!((lo[axis] - 0.5).abs() < 1e-9);
			assert!((hi[axis] - 1.5).abs() < 1e-9);
		}
	}

	#[test]
	fn triangles_face_outwards() {
		let mut field = ImageData::filled([3, 3, 3], 0.0);
		field.set(1, 1, 1, 1.0);
		let mesh = extract_isosurface(&field, 0.5);

		let center = Point3::new(1.0, 1.0, 1.0);
		for &[a, b, c] in &mesh.triangles {
			let (pa, pb, pc) = (mesh.points[a], mesh.points[b], mesh.points[c]);
			let centroid = Point3::from((pa.coords + pb.coords + pc.coords) / 3.0);
			let normal = triangle_normal(pa, pb, pc);
			assert!(normal.dot(&(centroid - center)) > 0.0);
		}
	}

	#[test]
	fn uniform_field_has_no_surface() {
		assert!(extract_isosurface(&ImageData::filled([4, 4, 4], 1.0), 0.5).is_empty());
		assert!(extract_isosurface(&ImageData::filled([4, 4, 4], 0.0), 0.5).is_empty());
	}

	#[test]
	fn pad_surrounds_field() {
		let field = ImageData::filled([1, 1, 1], 2.0);
		let padded = pad(&field, 0.0);
		assert_eq!(padded.dims(), [3, 3, 3]);
		assert_eq!(padded.get(1, 1, 1), 2.0);
		assert_eq!(padded.get(0, 1, 1), 0.0);
	}
}
