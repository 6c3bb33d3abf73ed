use anyhow::Context;
use serde::Serialize;
use slicer_rt::config::{AppConfig, RegistrationSettings};
use slicer_rt::dicomrt::{
	self, DicomRtImportLogic, DicomRtImportModule, ImportSummary, RtImportError,
};
use slicer_rt::modules::{IsodoseModule, ModuleManager, PlanarImageModule, VolumesModule};
use slicer_rt::plastimatch::{self, PlastimatchLogic, PlastimatchModule, RegistrationConfig};
use slicer_rt::scene::{NodeId, NodeSummary, PointListNode, Scene, VolumeNode};
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_logger(level: tracing::Level) {
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::fmt::layer()
				.compact()
				.with_ansi(true)
				.with_file(false)
				.with_line_number(false)
				.with_target(false),
		)
		.with(
			EnvFilter::builder()
				.with_default_directive(LevelFilter::from_level(level).into())
				.from_env_lossy(),
		)
		.with(sentry::integrations::tracing::layer())
		.init();
}

fn init_sentry(config: &AppConfig) -> sentry::ClientInitGuard {
	let guard = sentry::init((
		// An empty string will disable Sentry
		config.telemetry.sentry.as_deref().unwrap_or_default(),
		sentry::ClientOptions {
			release: sentry::release_name!(),
			traces_sample_rate: 1.0,
			..Default::default()
		},
	));

	if let Some(dsn) = &config.telemetry.sentry {
		info!(dsn, "Enabled Sentry for tracing and error tracking");
	};

	guard
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	let config = AppConfig::new()?;
	init_logger(config.telemetry.level);
	let _sentry = init_sentry(&config);

	if let Err(error) = run(&config) {
		error!("Failed to run due to error: {error:#}");
		return Err(error.into());
	}
	Ok(())
}

#[derive(Debug, Serialize)]
struct Report {
	imported: Vec<ImportSummary>,
	registration: Option<RegistrationReport>,
	nodes: Vec<NodeSummary>,
}

#[derive(Debug, Serialize)]
struct RegistrationReport {
	engine: &'static str,
	transform: &'static str,
	output: NodeId,
	max_displacement: f64,
	warped_landmarks: Option<NodeId>,
}

fn module_manager(config: &AppConfig) -> anyhow::Result<ModuleManager> {
	let mut manager = ModuleManager::new();
	manager.register(Box::new(VolumesModule::default()))?;
	manager.register(Box::new(IsodoseModule::new(config.isodose.levels.clone())))?;
	manager.register(Box::new(PlanarImageModule::default()))?;
	manager.register(Box::new(DicomRtImportModule::default()))?;
	manager.register(Box::new(PlastimatchModule::default()))?;

	for (module, report) in manager.setup_all() {
		if !report.is_clean() {
			warn!(%module, issues = report.issues.len(), "Module set up with issues");
		}
	}
	Ok(manager)
}

fn import(
	logic: &DicomRtImportLogic,
	scene: &mut Scene,
	config: &AppConfig,
) -> anyhow::Result<Vec<ImportSummary>> {
	let options = config.import.options();
	let mut imported = Vec::with_capacity(config.import.paths.len());
	for path in &config.import.paths {
		let loadable = match logic.examine(path) {
			Ok(loadable) => loadable,
			Err(RtImportError::NotRt { sop_class }) => {
				warn!(path = %path.display(), %sop_class, "Skipping non-RT file");
				continue;
			}
			Err(error) => {
				return Err(error).with_context(|| format!("Failed to examine {}", path.display()))
			}
		};
		info!(path = %path.display(), kind = %loadable.kind, name = %loadable.name, "Loading");
		let summary = logic
			.load(scene, path, &options)
			.with_context(|| format!("Failed to load {}", path.display()))?;
		imported.push(summary);
	}
	Ok(imported)
}

fn node_named(scene: &Scene, name: &str) -> anyhow::Result<NodeId> {
	scene
		.find_by_name(name)
		.cloned()
		.with_context(|| format!("No node named {name}"))
}

/// Resolves node names into a registration config. The output volume and
/// the warped landmark list are created when they do not exist yet.
fn registration_config(
	scene: &mut Scene,
	settings: &RegistrationSettings,
) -> anyhow::Result<RegistrationConfig> {
	let output = match scene.find_by_name(&settings.output) {
		Some(id) => id.clone(),
		None => scene.add_node(VolumeNode::new(settings.output.as_str())),
	};
	let warped_landmarks = settings.warped_landmarks.as_deref().map(|name| {
		match scene.find_by_name(name) {
			Some(id) => id.clone(),
			None => scene.add_node(PointListNode::new(name)),
		}
	});

	let mut builder = RegistrationConfig::builder();
	builder
		.fixed(node_named(scene, &settings.fixed)?)
		.moving(node_named(scene, &settings.moving)?)
		.output_volume(output);
	if let Some(name) = &settings.fixed_landmarks {
		builder.fixed_landmarks(node_named(scene, name)?);
	}
	if let Some(name) = &settings.moving_landmarks {
		builder.moving_landmarks(node_named(scene, name)?);
	}
	if let Some(path) = &settings.fixed_landmarks_file {
		builder.fixed_landmarks_file(path.clone());
	}
	if let Some(path) = &settings.moving_landmarks_file {
		builder.moving_landmarks_file(path.clone());
	}
	if let Some(name) = &settings.initial_transform {
		builder.initial_transform(node_named(scene, name)?);
	}
	if let Some(id) = warped_landmarks {
		builder.warped_landmarks(id);
	}
	if let Some(value) = settings.default_value {
		builder.default_value(value);
	}

	for (key, value) in &settings.global {
		builder.set_par(key, value)?;
	}
	for stage in &settings.stages {
		builder.add_stage();
		for (key, value) in stage {
			builder.set_par(key, value)?;
		}
	}
	Ok(builder.build()?)
}

fn register(
	logic: &PlastimatchLogic,
	scene: &mut Scene,
	settings: &RegistrationSettings,
) -> anyhow::Result<RegistrationReport> {
	let config = registration_config(scene, settings)?;
	let outputs = logic
		.run_registration(scene, &config)
		.context("Registration failed")?;
	Ok(RegistrationReport {
		engine: logic.engine_name(),
		transform: outputs.transform.kind(),
		output: config.output_volume,
		max_displacement: outputs.vector_field.max_magnitude(),
		warped_landmarks: outputs.warped_landmarks_node,
	})
}

fn run(config: &AppConfig) -> anyhow::Result<()> {
	let manager = module_manager(config)?;
	let mut scene = Scene::new();

	let importer = manager.logic::<DicomRtImportLogic>(dicomrt::MODULE_NAME)?;
	let imported = import(&importer, &mut scene, config)?;

	let registration = match &config.registration {
		Some(settings) => {
			let logic = manager.logic::<PlastimatchLogic>(plastimatch::MODULE_NAME)?;
			Some(register(&logic, &mut scene, settings)?)
		}
		None => None,
	};

	let report = Report {
		imported,
		registration,
		nodes: scene.summary(),
	};
	let json = serde_json::to_string_pretty(&report)?;
	match &config.output.summary {
		Some(path) => {
			std::fs::write(path, json)
				.with_context(|| format!("Failed to write {}", path.display()))?;
			info!(path = %path.display(), "Wrote scene summary");
		}
		None => println!("{json}"),
	}
	Ok(())
}
