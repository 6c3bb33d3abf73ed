use super::isosurface::{extract_isosurface, pad};
use super::mesh::{decimate, PolyData};
use crate::geometry::Vector3;
use crate::scene::{ImageData, VolumeGeometry, VolumeNode};
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelmapToModelOptions {
	/// Label value to extract. `None` extracts every non-zero voxel.
	pub label: Option<f32>,
	/// Fraction of triangles to remove after extraction, in `[0, 1)`.
	pub decimate_target_reduction: f64,
}

impl Default for LabelmapToModelOptions {
	fn default() -> Self {
		Self {
			label: None,
			decimate_target_reduction: 0.0,
		}
	}
}

/// Converts a labelmap into a closed surface in RAS coordinates.
///
/// The labelmap is binarised, padded with one voxel of background, surfaced
/// at 0.5 and optionally decimated. Volumes without image data yield an empty
/// mesh.
#[instrument(skip_all, fields(volume = %labelmap.name))]
pub fn labelmap_to_model(labelmap: &VolumeNode, options: &LabelmapToModelOptions) -> PolyData {
	let Some(image) = &labelmap.image else {
		return PolyData::default();
	};

	let binary = binarize(image, options.label);
	let mesh = extract_isosurface(&pad(&binary, 0.0), 0.5);
	let mut mesh = decimate(&mesh, options.decimate_target_reduction);
	to_ras(&mut mesh, &labelmap.geometry, 1.0);

	debug!(
		points = mesh.points.len(),
		triangles = mesh.triangles.len(),
		"Converted labelmap to model"
	);
	mesh
}

fn binarize(image: &ImageData, label: Option<f32>) -> ImageData {
	let mut binary = image.clone();
	for value in binary.scalars_mut() {
		let inside = label.map_or(*value != 0.0, |label| *value == label);
		*value = if inside { 1.0 } else { 0.0 };
	}
	binary
}

/// Maps mesh points from (padded) voxel coordinates to RAS.
pub(crate) fn to_ras(mesh: &mut PolyData, geometry: &VolumeGeometry, padding: f64) {
	mesh.map_points(|p| geometry.ijk_to_ras(p.coords - Vector3::repeat(padding)));
}

/// Slot-style wrapper around [`labelmap_to_model`]: set the input and the
/// reduction, call [`LabelmapToModelFilter::update`], read the output.
#[derive(Debug, Clone, Default)]
pub struct LabelmapToModelFilter {
	input_labelmap: Option<VolumeNode>,
	output_model: PolyData,
	options: LabelmapToModelOptions,
}

impl LabelmapToModelFilter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_input_labelmap(&mut self, labelmap: VolumeNode) {
		self.input_labelmap = Some(labelmap);
	}

	pub fn set_decimate_target_reduction(&mut self, reduction: f64) {
		self.options.decimate_target_reduction = reduction;
	}

	pub const fn decimate_target_reduction(&self) -> f64 {
		self.options.decimate_target_reduction
	}

	pub fn set_label(&mut self, label: Option<f32>) {
		self.options.label = label;
	}

	pub fn update(&mut self) {
		self.output_model = self
			.input_labelmap
			.as_ref()
			.map(|labelmap| labelmap_to_model(labelmap, &self.options))
			.unwrap_or_default();
	}

	pub const fn output(&self) -> &PolyData {
		&self.output_model
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::geometry::Point3;

	fn box_labelmap() -> VolumeNode {
		let mut image = ImageData::filled([8, 8, 8], 0.0);
		for k in 2..6 {
			for j in 2..6 {
				for i in 2..6 {
					image.set(i, j, k, 3.0);
				}
			}
		}
		image.set(0, 0, 0, 7.0);
		VolumeNode::new("box")
			.as_labelmap()
			.with_geometry(VolumeGeometry {
				origin: Point3::new(10.0, 20.0, 30.0),
				spacing: Vector3::repeat(2.0),
				..VolumeGeometry::default()
			})
			.with_image(image)
	}

	#[test]
	fn box_becomes_closed_mesh_in_ras() {
		let options = LabelmapToModelOptions {
			label: Some(3.0),
			..LabelmapToModelOptions::default()
		};
		let mesh = labelmap_to_model(&box_labelmap(), &options);

		assert!(!mesh.is_empty());
		assert_eq!(mesh.boundary_edge_count(), 0);
		let (lo, hi) = mesh.bounds().unwrap();
		// voxels 2..=5 surfaced half a voxel outside, 2 mm spacing
		assert!((lo[0] - 13.0).abs() < 1e-9);
		assert!((hi[0] - 21.0).abs() < 1e-9);
		assert!((lo[2] - 33.0).abs() < 1e-9);
	}

	#[test]
	fn all_labels_include_stray_voxel() {
		let mesh = labelmap_to_model(&box_labelmap(), &LabelmapToModelOptions::default());
		let (lo, _) = mesh.bounds().unwrap();
		// voxel (0,0,0) surfaced half a voxel into the padding
		assert!((lo[0] - 9.0).abs() < 1e-9);
	}

	#[test]
	fn decimation_reduces_triangles() {
		let full = labelmap_to_model(
			&box_labelmap(),
			&LabelmapToModelOptions {
				label: Some(3.0),
				decimate_target_reduction: 0.0,
			},
		);
		let reduced = labelmap_to_model(
			&box_labelmap(),
			&LabelmapToModelOptions {
				label: Some(3.0),
				decimate_target_reduction: 0.5,
			},
		);
		assert!(reduced.triangles.len() < full.triangles.len());
	}

	#[test]
	fn empty_labelmap_gives_empty_model() {
		let mut filter = LabelmapToModelFilter::new();
		assert_eq!(filter.decimate_target_reduction(), 0.0);
		filter.update();
		assert!(filter.output().is_empty());

		let empty = VolumeNode::new("empty").with_image(ImageData::filled([4, 4, 4], 0.0));
		filter.set_input_labelmap(empty);
		filter.update();
		assert!(filter.output().is_empty());
	}
}
