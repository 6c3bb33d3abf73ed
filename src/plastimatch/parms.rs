//! Registration parameters: a global section plus an ordered list of stages.
//!
//! Keys follow the Plastimatch command file vocabulary. Values are validated
//! when they are set, so an accepted parameter set is always well formed.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Section {
	Global,
	Stage,
}

impl Display for Section {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Global => write!(f, "GLOBAL"),
			Self::Stage => write!(f, "STAGE"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
	#[error("Unknown key `{key}` in [{section}] section")]
	UnknownKey { key: String, section: Section },

	#[error("Invalid value `{value}` for `{key}`: expected {expected}")]
	InvalidValue {
		key: String,
		value: String,
		expected: &'static str,
	},

	#[error("No stage to apply `{key}` to")]
	NoStage { key: String },
}

/// Transform model estimated by a stage.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum XformKind {
	AlignCenter,
	AlignCenterOfGravity,
	Translation,
	#[default]
	Rigid,
	Similarity,
	Affine,
	Bspline,
	VectorField,
}

impl XformKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::AlignCenter => "align_center",
			Self::AlignCenterOfGravity => "align_center_of_gravity",
			Self::Translation => "translation",
			Self::Rigid => "rigid",
			Self::Similarity => "similarity",
			Self::Affine => "affine",
			Self::Bspline => "bspline",
			Self::VectorField => "vf",
		}
	}
}

impl Display for XformKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for XformKind {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"align_center" => Ok(Self::AlignCenter),
			"align_center_of_gravity" => Ok(Self::AlignCenterOfGravity),
			"translation" => Ok(Self::Translation),
			"rigid" | "versor" => Ok(Self::Rigid),
			"similarity" => Ok(Self::Similarity),
			"affine" => Ok(Self::Affine),
			"bspline" => Ok(Self::Bspline),
			"vf" | "demons" => Ok(Self::VectorField),
			_ => Err(()),
		}
	}
}

#[derive(Debug, Clone, Copy)]
enum ValueKind {
	Integer,
	Float,
	/// One value for all axes or one per axis.
	Floats,
	Choice(&'static [&'static str]),
	Xform,
}

/// Inputs and outputs are bound as scene nodes, so the only global key is
/// the value for samples outside the moving image.
const GLOBAL_KEYS: &[(&str, ValueKind)] = &[("default_value", ValueKind::Float)];

const STAGE_KEYS: &[(&str, ValueKind)] = &[
	("xform", ValueKind::Xform),
	(
		"optim",
		ValueKind::Choice(&[
			"amoeba",
			"demons",
			"lbfgs",
			"lbfgsb",
			"liblbfgs",
			"nocedal",
			"oneplusone",
			"rsg",
			"steepest",
			"versor",
		]),
	),
	("impl", ValueKind::Choice(&["itk", "plastimatch"])),
	(
		"metric",
		ValueKind::Choice(&["mse", "mi", "mattes", "nmi", "gm"]),
	),
	("threading", ValueKind::Choice(&["single", "openmp", "cuda"])),
	("max_its", ValueKind::Integer),
	("min_its", ValueKind::Integer),
	("convergence_tol", ValueKind::Float),
	("grad_tol", ValueKind::Float),
	("max_step", ValueKind::Float),
	("min_step", ValueKind::Float),
	("res", ValueKind::Floats),
	("grid_spac", ValueKind::Floats),
	("regularization_lambda", ValueKind::Float),
	("landmark_stiffness", ValueKind::Float),
	("background_val", ValueKind::Float),
];

fn validate(key: &str, value: &str, section: Section) -> Result<String, ParameterError> {
	let table = match section {
		Section::Global => GLOBAL_KEYS,
		Section::Stage => STAGE_KEYS,
	};
	let (_, kind) = table
		.iter()
		.find(|(name, _)| *name == key)
		.ok_or_else(|| ParameterError::UnknownKey {
			key: key.to_owned(),
			section,
		})?;

	let value = value.trim();
	let invalid = |expected| ParameterError::InvalidValue {
		key: key.to_owned(),
		value: value.to_owned(),
		expected,
	};
	let ok = match kind {
		ValueKind::Integer => value.parse::<i64>().is_ok(),
		ValueKind::Float => value.parse::<f64>().is_ok(),
		ValueKind::Floats => {
			let parts: Vec<&str> = value.split_whitespace().collect();
			(parts.len() == 1 || parts.len() == 3) && parts.iter().all(|p| p.parse::<f64>().is_ok())
		}
		ValueKind::Choice(choices) => choices.contains(&value),
		ValueKind::Xform => value.parse::<XformKind>().is_ok(),
	};
	if ok {
		Ok(value.to_owned())
	} else {
		Err(invalid(match kind {
			ValueKind::Integer => "an integer",
			ValueKind::Float => "a number",
			ValueKind::Floats => "one or three numbers",
			ValueKind::Choice(_) => "one of the supported options",
			ValueKind::Xform => "a transform type",
		}))
	}
}

/// Parameters of one registration stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageParms {
	xform: XformKind,
	values: BTreeMap<String, String>,
}

impl StageParms {
	pub const fn xform(&self) -> XformKind {
		self.xform
	}

	pub fn value(&self, key: &str) -> Option<&str> {
		self.values.get(key).map(String::as_str)
	}

	pub fn float(&self, key: &str) -> Option<f64> {
		self.value(key).and_then(|v| v.parse().ok())
	}

	/// A one-or-three valued parameter expanded to three values.
	pub fn floats3(&self, key: &str) -> Option<[f64; 3]> {
		let values: Vec<f64> = self
			.value(key)?
			.split_whitespace()
			.filter_map(|v| v.parse().ok())
			.collect();
		match values.as_slice() {
			[v] => Some([*v; 3]),
			[x, y, z] => Some([*x, *y, *z]),
			_ => None,
		}
	}

	fn set(&mut self, key: &str, value: &str) -> Result<(), ParameterError> {
		let value = validate(key, value, Section::Stage)?;
		if key == "xform" {
			if let Ok(xform) = value.parse() {
				self.xform = xform;
			}
		}
		self.values.insert(key.to_owned(), value);
		Ok(())
	}
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrationParms {
	global: BTreeMap<String, String>,
	stages: Vec<StageParms>,
}

impl RegistrationParms {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends an empty stage and returns it.
	pub fn append_stage(&mut self) -> &mut StageParms {
		self.stages.push(StageParms::default());
		let last = self.stages.len() - 1;
		&mut self.stages[last]
	}

	pub fn stages(&self) -> &[StageParms] {
		&self.stages
	}

	pub fn global(&self, key: &str) -> Option<&str> {
		self.global.get(key).map(String::as_str)
	}

	/// Sets a key in the given section. Stage keys go to the last stage.
	pub fn set_key_val(
		&mut self,
		key: &str,
		value: &str,
		section: Section,
	) -> Result<(), ParameterError> {
		match section {
			Section::Global => {
				let value = validate(key, value, Section::Global)?;
				self.global.insert(key.to_owned(), value);
				Ok(())
			}
			Section::Stage => self
				.stages
				.last_mut()
				.ok_or_else(|| ParameterError::NoStage {
					key: key.to_owned(),
				})?
				.set(key, value),
		}
	}

	/// Sets a key on the most recently appended stage, or in the global
	/// section while no stage exists.
	pub fn set_par(&mut self, key: &str, value: &str) -> Result<(), ParameterError> {
		let section = if self.stages.is_empty() {
			Section::Global
		} else {
			Section::Stage
		};
		self.set_key_val(key, value, section)
	}
}
