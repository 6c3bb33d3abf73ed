use super::image::{ImageHeader, PlmImage};
use super::pointset::{LabeledPoint, Pointset};
use super::xform::{VectorField, Xform};
use tracing::{debug, instrument};

const POINT_ITERATIONS: usize = 50;
const POINT_TOLERANCE: f64 = 1e-6;

/// Resamples `moving` onto the `fixed` grid through `xform`.
///
/// Returns the warped image and the displacement field sampled on the same
/// grid. Points mapping outside the moving image get `default_value`.
#[instrument(skip_all, fields(xform = xform.kind()))]
pub fn warp_image(
	xform: &Xform,
	fixed: &ImageHeader,
	moving: &PlmImage,
	default_value: f32,
) -> (PlmImage, VectorField) {
	let mut warped = PlmImage::filled(*fixed, default_value);
	let mut field = VectorField::zeros(*fixed);

	fixed.for_each_voxel(|index, point| {
		let mapped = xform.transform_point(point);
		field.vectors[index] = mapped - point;
		if let Some(value) = moving.sample(mapped) {
			warped.data[index] = value;
		}
	});

	debug!(max_displacement = field.max_magnitude(), "Warped image");
	(warped, field)
}

/// Maps moving space points back into fixed space.
///
/// The field maps fixed to moving, so each point `q` is solved for the `p`
/// with `p + u(p) = q` by fixed-point iteration.
pub fn warp_pointset(points: &Pointset, field: &VectorField) -> Pointset {
	let points = points
		.iter()
		.map(|point| {
			let target = point.position;
			let mut p = target;
			for _ in 0..POINT_ITERATIONS {
				let next = target - field.displacement(p);
				let step = nalgebra::distance(&next, &p);
				p = next;
				if step < POINT_TOLERANCE {
					break;
				}
			}
			LabeledPoint {
				label: point.label.clone(),
				position: p,
			}
		})
		.collect();
	Pointset::new(points)
}
