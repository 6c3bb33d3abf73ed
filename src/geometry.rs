//! Geometry types shared by the scene and the registration glue.
//!
//! Positions are [`Point3`], offsets and axes are [`Vector3`]. Direction
//! matrices store the image axes as columns, so column `c` is the physical
//! direction of voxel axis `c`.

pub type Point3 = nalgebra::Point3<f64>;
pub type Vector3 = nalgebra::Vector3<f64>;
pub type Direction3 = nalgebra::Matrix3<f64>;
pub type Matrix4 = nalgebra::Matrix4<f64>;

/// Diagonal matrix converting between RAS and LPS. It is its own inverse.
pub fn ras_to_lps() -> Direction3 {
	Direction3::from_diagonal(&Vector3::new(-1.0, -1.0, 1.0))
}

/// Converts a position between RAS and LPS.
pub fn flip_xy(p: Point3) -> Point3 {
	Point3::new(-p.x, -p.y, p.z)
}

/// Converts a direction or offset between RAS and LPS.
pub fn flip_xy_vector(v: Vector3) -> Vector3 {
	Vector3::new(-v.x, -v.y, v.z)
}

/// Converts a direction matrix between RAS and LPS.
pub fn flip_xy_rows(m: &Direction3) -> Direction3 {
	ras_to_lps() * m
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flip_is_involution() {
		let p = Point3::new(1.5, -2.0, 3.0);
		assert_eq!(flip_xy(flip_xy(p)), p);
		assert_eq!(flip_xy_vector(Vector3::x()), Vector3::new(-1.0, 0.0, 0.0));
	}

	#[test]
	fn flipped_directions_keep_axis_columns() {
		let oblique = Direction3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
		let flipped = flip_xy_rows(&oblique);
		for axis in 0..3 {
			let column = oblique.column(axis).into_owned();
			assert_eq!(flipped.column(axis).into_owned(), flip_xy_vector(column));
		}
		assert_eq!(flip_xy_rows(&flipped), oblique);
	}
}
