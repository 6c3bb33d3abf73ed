//! Immutable registration configuration and its builder.

use super::parms::{ParameterError, RegistrationParms};
use crate::scene::NodeId;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Fill value for warped voxels that map outside the moving image.
pub const DEFAULT_WARP_VALUE: f32 = -1200.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
	#[error("No {0} volume bound")]
	MissingVolume(&'static str),

	#[error("Only the {bound} {source_kind} landmarks are bound")]
	IncompleteLandmarks {
		bound: &'static str,
		source_kind: &'static str,
	},

	#[error(transparent)]
	Parameter(#[from] ParameterError),
}

/// Where landmarks for a run come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkSource<'a> {
	PointLists { fixed: &'a NodeId, moving: &'a NodeId },
	Files { fixed: &'a Path, moving: &'a Path },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LandmarkInputs {
	point_lists: Option<(NodeId, NodeId)>,
	files: Option<(PathBuf, PathBuf)>,
}

impl LandmarkInputs {
	/// The landmark source used by a run. Point lists take precedence over
	/// files when both are bound.
	pub fn effective(&self) -> Option<LandmarkSource<'_>> {
		if let Some((fixed, moving)) = &self.point_lists {
			return Some(LandmarkSource::PointLists { fixed, moving });
		}
		self.files
			.as_ref()
			.map(|(fixed, moving)| LandmarkSource::Files { fixed, moving })
	}
}

/// Everything one registration run needs, fixed at build time.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationConfig {
	pub fixed: NodeId,
	pub moving: NodeId,
	pub output_volume: NodeId,
	pub parms: RegistrationParms,
	pub landmarks: LandmarkInputs,
	pub initial_transform: Option<NodeId>,
	pub warped_landmarks: Option<NodeId>,
	pub default_value: f32,
}

impl RegistrationConfig {
	pub fn builder() -> RegistrationConfigBuilder {
		RegistrationConfigBuilder::default()
	}
}

#[derive(Debug, Clone, Default)]
pub struct RegistrationConfigBuilder {
	parms: RegistrationParms,
	fixed: Option<NodeId>,
	moving: Option<NodeId>,
	output_volume: Option<NodeId>,
	fixed_landmarks: Option<NodeId>,
	moving_landmarks: Option<NodeId>,
	fixed_landmarks_file: Option<PathBuf>,
	moving_landmarks_file: Option<PathBuf>,
	initial_transform: Option<NodeId>,
	warped_landmarks: Option<NodeId>,
	default_value: Option<f32>,
}

impl RegistrationConfigBuilder {
	/// Appends a registration stage. Later [`Self::set_par`] calls apply to it.
	pub fn add_stage(&mut self) -> &mut Self {
		self.parms.append_stage();
		self
	}

	pub fn set_par(&mut self, key: &str, value: &str) -> Result<&mut Self, ParameterError> {
		self.parms.set_par(key, value)?;
		Ok(self)
	}

	pub fn fixed(&mut self, id: impl Into<NodeId>) -> &mut Self {
		self.fixed = Some(id.into());
		self
	}

	pub fn moving(&mut self, id: impl Into<NodeId>) -> &mut Self {
		self.moving = Some(id.into());
		self
	}

	pub fn output_volume(&mut self, id: impl Into<NodeId>) -> &mut Self {
		self.output_volume = Some(id.into());
		self
	}

	pub fn fixed_landmarks(&mut self, id: impl Into<NodeId>) -> &mut Self {
		self.fixed_landmarks = Some(id.into());
		self
	}

	pub fn moving_landmarks(&mut self, id: impl Into<NodeId>) -> &mut Self {
		self.moving_landmarks = Some(id.into());
		self
	}

	pub fn landmarks_from_points(
		&mut self,
		fixed: impl Into<NodeId>,
		moving: impl Into<NodeId>,
	) -> &mut Self {
		self.fixed_landmarks(fixed).moving_landmarks(moving)
	}

	pub fn fixed_landmarks_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
		self.fixed_landmarks_file = Some(path.into());
		self
	}

	pub fn moving_landmarks_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
		self.moving_landmarks_file = Some(path.into());
		self
	}

	pub fn landmarks_from_files(
		&mut self,
		fixed: impl Into<PathBuf>,
		moving: impl Into<PathBuf>,
	) -> &mut Self {
		self.fixed_landmarks_file(fixed).moving_landmarks_file(moving)
	}

	pub fn initial_transform(&mut self, id: impl Into<NodeId>) -> &mut Self {
		self.initial_transform = Some(id.into());
		self
	}

	/// Point list that receives the warped landmarks. Without one a new
	/// `WarpedLandmarks` node is created.
	pub fn warped_landmarks(&mut self, id: impl Into<NodeId>) -> &mut Self {
		self.warped_landmarks = Some(id.into());
		self
	}

	pub fn default_value(&mut self, value: f32) -> &mut Self {
		self.default_value = Some(value);
		self
	}

	fn pair<T: Clone>(
		fixed: Option<&T>,
		moving: Option<&T>,
		source_kind: &'static str,
	) -> Result<Option<(T, T)>, ConfigError> {
		match (fixed, moving) {
			(Some(fixed), Some(moving)) => Ok(Some((fixed.clone(), moving.clone()))),
			(None, None) => Ok(None),
			(Some(_), None) => Err(ConfigError::IncompleteLandmarks {
				bound: "fixed",
				source_kind,
			}),
			(None, Some(_)) => Err(ConfigError::IncompleteLandmarks {
				bound: "moving",
				source_kind,
			}),
		}
	}

	pub fn build(&self) -> Result<RegistrationConfig, ConfigError> {
		let fixed = self.fixed.clone().ok_or(ConfigError::MissingVolume("fixed"))?;
		let moving = self.moving.clone().ok_or(ConfigError::MissingVolume("moving"))?;
		let output_volume = self
			.output_volume
			.clone()
			.ok_or(ConfigError::MissingVolume("output"))?;

		let landmarks = LandmarkInputs {
			point_lists: Self::pair(
				self.fixed_landmarks.as_ref(),
				self.moving_landmarks.as_ref(),
				"point list",
			)?,
			files: Self::pair(
				self.fixed_landmarks_file.as_ref(),
				self.moving_landmarks_file.as_ref(),
				"file",
			)?,
		};
		if landmarks.point_lists.is_some() && landmarks.files.is_some() {
			warn!("Landmarks bound as point lists and as files, using the point lists");
		}

		let default_value = match (self.default_value, self.parms.global("default_value")) {
			(Some(value), _) => value,
			(None, Some(value)) => value
				.parse()
				.map_err(|_| ParameterError::InvalidValue {
					key: "default_value".to_owned(),
					value: value.to_owned(),
					expected: "a number",
				})?,
			(None, None) => DEFAULT_WARP_VALUE,
		};

		Ok(RegistrationConfig {
			fixed,
			moving,
			output_volume,
			parms: self.parms.clone(),
			landmarks,
			initial_transform: self.initial_transform.clone(),
			warped_landmarks: self.warped_landmarks.clone(),
			default_value,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn base() -> RegistrationConfigBuilder {
		let mut builder = RegistrationConfig::builder();
		builder.fixed("VolumeNode1").moving("VolumeNode2").output_volume("VolumeNode3");
		builder
	}

	#[test]
	fn requires_bound_volumes() {
		let mut builder = RegistrationConfig::builder();
		assert_eq!(builder.build(), Err(ConfigError::MissingVolume("fixed")));
		builder.fixed("a").moving("b");
		assert_eq!(builder.build(), Err(ConfigError::MissingVolume("output")));
	}

	#[test]
	fn stages_and_parameters_are_captured() {
		let mut builder = base();
		builder
			.add_stage()
			.set_par("xform", "align_center")
			.unwrap()
			.add_stage()
			.set_par("xform", "bspline")
			.unwrap()
			.set_par("max_its", "20")
			.unwrap();
		let config = builder.build().unwrap();

		assert_eq!(config.parms.stages().len(), 2);
		assert_eq!(config.parms.stages()[1].value("max_its"), Some("20"));
		assert_eq!(config.default_value, DEFAULT_WARP_VALUE);
	}

	#[test]
	fn point_lists_take_precedence_over_files() {
		let mut builder = base();
		builder
			.landmarks_from_files("fixed.fcsv", "moving.fcsv")
			.landmarks_from_points("PointListNode1", "PointListNode2");
		let config = builder.build().unwrap();

		let fixed = NodeId::from("PointListNode1");
		let moving = NodeId::from("PointListNode2");
		assert_eq!(
			config.landmarks.effective(),
			Some(LandmarkSource::PointLists {
				fixed: &fixed,
				moving: &moving
			})
		);
	}

	#[test]
	fn half_bound_landmarks_are_rejected() {
		let mut builder = base();
		builder.moving_landmarks_file("moving.txt");
		assert_eq!(
			builder.build(),
			Err(ConfigError::IncompleteLandmarks {
				bound: "moving",
				source_kind: "file"
			})
		);
	}

	#[test]
	fn global_default_value_is_used() {
		let mut builder = base();
		builder.set_par("default_value", "-1000").unwrap();
		assert_eq!(builder.build().unwrap().default_value, -1000.0);

		builder.default_value(0.0);
		assert_eq!(builder.build().unwrap().default_value, 0.0);
	}
}
