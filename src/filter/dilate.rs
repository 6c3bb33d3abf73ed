//! Segment editor dilate effect.

use crate::geometry::Vector3;
use crate::scene::{ImageData, VolumeNode};
use std::str::FromStr;
use thiserror::Error;
use tracing::instrument;

/// In-slice neighbourhood used to grow the label.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NeighborMode {
	Four,
	Eight,
}

#[derive(Debug, Error)]
#[error("`{0}` is not a valid neighbor mode, expected 4 or 8")]
pub struct ParseNeighborModeError(String);

impl FromStr for NeighborMode {
	type Err = ParseNeighborModeError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim() {
			"4" => Ok(Self::Four),
			"8" => Ok(Self::Eight),
			_ => Err(ParseNeighborModeError(s.to_owned())),
		}
	}
}

impl NeighborMode {
	fn offsets(self) -> &'static [(isize, isize)] {
		match self {
			Self::Four => &[(-1, 0), (1, 0), (0, -1), (0, 1)],
			Self::Eight => &[
				(-1, -1),
				(0, -1),
				(1, -1),
				(-1, 0),
				(1, 0),
				(-1, 1),
				(0, 1),
				(1, 1),
			],
		}
	}
}

/// Grows `label` by `iterations` voxels within each slice.
///
/// The extent is padded by `iterations` voxels on every side first, so the
/// grown label is never clipped. The origin moves accordingly; voxels keep
/// their physical position.
#[instrument(skip(labelmap), fields(volume = %labelmap.name))]
pub fn dilate_labelmap(
	labelmap: &VolumeNode,
	label: f32,
	mode: NeighborMode,
	iterations: usize,
) -> VolumeNode {
	let mut dilated = labelmap.clone();
	let Some(image) = &labelmap.image else {
		return dilated;
	};

	let pad = iterations as f64;
	dilated.geometry.origin = labelmap.geometry.ijk_to_ras(Vector3::repeat(-pad));
	let mut current = pad_by(image, iterations);

	for _ in 0..iterations {
		let snapshot = current.clone();
		let [nx, ny, nz] = snapshot.dims();
		for k in 0..nz {
			for j in 0..ny {
				for i in 0..nx {
					if snapshot.get(i, j, k) == label {
						continue;
					}
					let touches_label = mode.offsets().iter().any(|&(di, dj)| {
						let (Some(ni), Some(nj)) =
							(i.checked_add_signed(di), j.checked_add_signed(dj))
						else {
							return false;
						};
						ni < nx && nj < ny && snapshot.get(ni, nj, k) == label
					});
					if touches_label {
						current.set(i, j, k, label);
					}
				}
			}
		}
	}

	dilated.image = Some(current);
	dilated
}

fn pad_by(image: &ImageData, amount: usize) -> ImageData {
	let [nx, ny, nz] = image.dims();
	let mut padded = ImageData::filled([nx + 2 * amount, ny + 2 * amount, nz + 2 * amount], 0.0);
	for k in 0..nz {
		for j in 0..ny {
			for i in 0..nx {
				padded.set(i + amount, j + amount, k + amount, image.get(i, j, k));
			}
		}
	}
	padded
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::geometry::Point3;
	use crate::scene::VolumeGeometry;

	fn single_voxel() -> VolumeNode {
		let mut image = ImageData::filled([3, 3, 1], 0.0);
		image.set(1, 1, 0, 1.0);
		VolumeNode::new("seed")
			.as_labelmap()
			.with_geometry(VolumeGeometry {
				origin: Point3::new(5.0, 5.0, 5.0),
				..VolumeGeometry::default()
			})
			.with_image(image)
	}

	fn count(volume: &VolumeNode, label: f32) -> usize {
		volume
			.image
			.as_ref()
			.unwrap()
			.scalars()
			.iter()
			.filter(|&&v| v == label)
			.count()
	}

	#[test]
	fn four_neighbors_grow_a_cross() {
		let dilated = dilate_labelmap(&single_voxel(), 1.0, NeighborMode::Four, 1);
		assert_eq!(count(&dilated, 1.0), 5);
		assert_eq!(dilated.image.as_ref().unwrap().dims(), [5, 5, 3]);
		assert_eq!(dilated.geometry.origin, Point3::new(4.0, 4.0, 4.0));
	}

	#[test]
	fn eight_neighbors_grow_a_square() {
		let dilated = dilate_labelmap(&single_voxel(), 1.0, NeighborMode::Eight, 1);
		assert_eq!(count(&dilated, 1.0), 9);

		let twice = dilate_labelmap(&single_voxel(), 1.0, NeighborMode::Eight, 2);
		assert_eq!(count(&twice, 1.0), 25);
	}

	#[test]
	fn neighbor_mode_parsing() {
		assert_eq!("4".parse::<NeighborMode>().unwrap(), NeighborMode::Four);
		assert_eq!("8".parse::<NeighborMode>().unwrap(), NeighborMode::Eight);
		assert!("6".parse::<NeighborMode>().is_err());
	}
}
