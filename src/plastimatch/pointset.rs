//! Landmark sets in LPS, loaded from point-list nodes or landmark files.

use crate::geometry::{self, Point3};
use crate::scene::PointListNode;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PointsetError {
	#[error("Failed to read landmarks from {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Invalid landmark in {path} at line {line}: {message}")]
	Parse {
		path: PathBuf,
		line: usize,
		message: String,
	},
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledPoint {
	pub label: String,
	pub position: Point3,
}

/// Ordered labelled points in LPS.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pointset {
	points: Vec<LabeledPoint>,
}

impl Pointset {
	pub const fn new(points: Vec<LabeledPoint>) -> Self {
		Self { points }
	}

	/// Converts the RAS control points of a point list to LPS.
	pub fn from_point_list(node: &PointListNode) -> Self {
		Self::new(
			node.points
				.iter()
				.map(|point| LabeledPoint {
					label: point.label.clone(),
					position: geometry::flip_xy(point.position),
				})
				.collect(),
		)
	}

	/// Loads a landmark file. Files ending in `.fcsv` are Slicer fiducial
	/// lists in RAS; anything else is read as plain LPS coordinates.
	pub fn load(path: &Path) -> Result<Self, PointsetError> {
		let text = std::fs::read_to_string(path).map_err(|source| PointsetError::Io {
			path: path.to_owned(),
			source,
		})?;
		let is_fcsv = path
			.extension()
			.is_some_and(|ext| ext.eq_ignore_ascii_case("fcsv"));
		let parsed = if is_fcsv {
			parse_fcsv(&text)
		} else {
			parse_plain(&text)
		};
		let pointset = parsed.map_err(|(line, message)| PointsetError::Parse {
			path: path.to_owned(),
			line,
			message,
		})?;
		debug!(path = %path.display(), points = pointset.len(), "Loaded landmarks");
		Ok(pointset)
	}

	pub fn iter(&self) -> std::slice::Iter<'_, LabeledPoint> {
		self.points.iter()
	}

	pub fn len(&self) -> usize {
		self.points.len()
	}

	pub fn is_empty(&self) -> bool {
		self.points.is_empty()
	}

	/// Mean position, `None` for an empty set.
	pub fn centroid(&self) -> Option<Point3> {
		if self.points.is_empty() {
			return None;
		}
		let sum = self
			.points
			.iter()
			.fold(Point3::origin(), |acc, point| acc + point.position.coords);
		Some(sum / self.points.len() as f64)
	}
}

type ParseResult = Result<Pointset, (usize, String)>;

fn parse_number(field: &str, line: usize) -> Result<f64, (usize, String)> {
	field
		.trim()
		.parse()
		.map_err(|_| (line, format!("`{}` is not a number", field.trim())))
}

/// Column positions of a fiducial list. Older files put the label first;
/// newer ones declare their layout in a `# columns =` comment.
struct FcsvColumns {
	label: usize,
	xyz: [usize; 3],
}

impl FcsvColumns {
	const LEGACY: Self = Self {
		label: 0,
		xyz: [1, 2, 3],
	};

	fn from_header(header: &str) -> Option<Self> {
		let names: Vec<&str> = header.split(',').map(str::trim).collect();
		let position = |name: &str| names.iter().position(|n| *n == name);
		Some(Self {
			label: position("label")?,
			xyz: [position("x")?, position("y")?, position("z")?],
		})
	}
}

fn parse_fcsv(text: &str) -> ParseResult {
	let mut columns = FcsvColumns::LEGACY;
	let mut points = Vec::new();
	for (index, line) in text.lines().enumerate() {
		let number = index + 1;
		let line = line.trim();
		if let Some(comment) = line.strip_prefix('#') {
			if let Some(header) = comment.trim().strip_prefix("columns =") {
				columns = FcsvColumns::from_header(header)
					.ok_or_else(|| (number, "columns header lacks label or x/y/z".to_owned()))?;
			}
			continue;
		}
		if line.is_empty() {
			continue;
		}

		let fields: Vec<&str> = line.split(',').collect();
		let field = |column: usize| {
			fields
				.get(column)
				.copied()
				.ok_or_else(|| (number, format!("missing column {column}")))
		};
		let ras = Point3::new(
			parse_number(field(columns.xyz[0])?, number)?,
			parse_number(field(columns.xyz[1])?, number)?,
			parse_number(field(columns.xyz[2])?, number)?,
		);
		points.push(LabeledPoint {
			label: field(columns.label)?.trim().to_owned(),
			position: geometry::flip_xy(ras),
		});
	}
	Ok(Pointset::new(points))
}

fn parse_plain(text: &str) -> ParseResult {
	let mut points = Vec::new();
	for (index, line) in text.lines().enumerate() {
		let number = index + 1;
		let line = line.trim();
		if line.is_empty() || line.starts_with('#') {
			continue;
		}
		let fields: Vec<&str> = line
			.split(|c: char| c == ',' || c.is_whitespace())
			.filter(|f| !f.is_empty())
			.collect();
		let [x, y, z] = fields.as_slice() else {
			return Err((number, format!("expected 3 coordinates, found {}", fields.len())));
		};
		points.push(LabeledPoint {
			label: String::new(),
			position: Point3::new(
				parse_number(x, number)?,
				parse_number(y, number)?,
				parse_number(z, number)?,
			),
		});
	}
	Ok(Pointset::new(points))
}
