use crate::dicomrt::ImportOptions;
use crate::modules::IsodoseLevel;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
	pub telemetry: TelemetryConfig,
	pub import: ImportConfig,
	pub isodose: IsodoseConfig,
	/// Registration to run after import, if any.
	pub registration: Option<RegistrationSettings>,
	#[serde(default)]
	pub output: OutputConfig,
}

impl AppConfig {
	pub fn new() -> Result<Self, config::ConfigError> {
		use config::Config;
		let s = Config::builder()
			.add_source(config::File::from_str(
				include_str!("defaults.toml"),
				config::FileFormat::Toml,
			))
			.add_source(config::File::with_name("config.toml").required(false))
			.add_source(
				config::Environment::with_prefix("SLICER_RT")
					.prefix_separator("__")
					.separator("__"),
			)
			.build()?;

		s.try_deserialize()
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
	/// Default log level. `RUST_LOG` still takes precedence.
	#[serde(deserialize_with = "deserialize_level")]
	pub level: tracing::Level,
	/// Sentry DSN. Sentry stays disabled when unset.
	pub sentry: Option<String>,
}

fn deserialize_level<'de, D>(deserializer: D) -> Result<tracing::Level, D::Error>
where
	D: Deserializer<'de>,
{
	let value = String::deserialize(deserializer)?;
	value.parse().map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
	/// DICOM RT files to load, in order.
	#[serde(default)]
	pub paths: Vec<PathBuf>,
	#[serde(default)]
	pub create_isodose: bool,
}

impl ImportConfig {
	pub const fn options(&self) -> ImportOptions {
		ImportOptions {
			create_isodose: self.create_isodose,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct IsodoseConfig {
	pub levels: Vec<IsodoseLevel>,
}

/// A registration defined by scene node names.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationSettings {
	pub fixed: String,
	pub moving: String,
	pub output: String,
	pub fixed_landmarks: Option<String>,
	pub moving_landmarks: Option<String>,
	pub fixed_landmarks_file: Option<PathBuf>,
	pub moving_landmarks_file: Option<PathBuf>,
	pub initial_transform: Option<String>,
	pub warped_landmarks: Option<String>,
	pub default_value: Option<f32>,
	/// Global Plastimatch parameters.
	#[serde(default)]
	pub global: BTreeMap<String, String>,
	/// One parameter table per stage, applied in order.
	#[serde(default)]
	pub stages: Vec<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
	/// Where to write the JSON scene summary. Printed to stdout when unset.
	pub summary: Option<PathBuf>,
}
