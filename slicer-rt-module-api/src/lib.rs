//! slicer-rt module API
//!
//! This crate defines the contract between the host module manager and the
//! modules it loads. A module describes itself through [`ModuleInfo`], exposes
//! one logic object and may look up sibling modules during [`Module::setup`].
//!
//! # Example
//!
//! ```
//! use slicer_rt_module_api::prelude::*;
//! use std::any::Any;
//! use std::sync::Arc;
//!
//! struct GreeterLogic;
//!
//! struct GreeterModule {
//!     logic: Arc<GreeterLogic>,
//! }
//!
//! impl Module for GreeterModule {
//!     fn name(&self) -> &str {
//!         "Greeter"
//!     }
//!
//!     fn info(&self) -> ModuleInfo {
//!         ModuleInfo::new("Greeter").with_categories(["Examples"])
//!     }
//!
//!     fn logic(&self) -> Arc<dyn Any + Send + Sync> {
//!         self.logic.clone()
//!     }
//! }
//! ```

#![allow(clippy::module_name_repetitions)]

use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

/// Prelude module for convenient imports.
pub mod prelude {
	pub use crate::{lookup_logic, Module, ModuleInfo, ModuleLookup, SetupIssue, SetupReport};
}

/// A loadable module.
///
/// Modules are registered by name in the host module manager. The manager
/// calls [`Module::setup`] once after all modules are registered.
pub trait Module: Send + Sync {
	/// Unique module name used for lookups (e.g. `Volumes`).
	fn name(&self) -> &str;

	/// Descriptive metadata shown by the host.
	fn info(&self) -> ModuleInfo;

	/// Wire up dependencies on sibling modules.
	///
	/// Missing dependencies are reported, never fatal.
	fn setup(&mut self, _modules: &dyn ModuleLookup) -> SetupReport {
		SetupReport::default()
	}

	/// The module logic, downcast by consumers to its concrete type.
	fn logic(&self) -> Arc<dyn Any + Send + Sync>;
}

/// Lookup of registered modules by name.
pub trait ModuleLookup {
	fn module(&self, name: &str) -> Option<&dyn Module>;
}

/// Module metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
	pub title: String,
	pub categories: Vec<String>,
	pub dependencies: Vec<String>,
	pub contributors: Vec<String>,
	pub help_text: String,
	pub acknowledgement_text: String,
}

impl ModuleInfo {
	pub fn new(title: impl Into<String>) -> Self {
		Self {
			title: title.into(),
			..Self::default()
		}
	}

	#[must_use]
	pub fn with_categories<I, S>(mut self, categories: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.categories = categories.into_iter().map(Into::into).collect();
		self
	}

	#[must_use]
	pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.dependencies = dependencies.into_iter().map(Into::into).collect();
		self
	}

	#[must_use]
	pub fn with_contributors<I, S>(mut self, contributors: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.contributors = contributors.into_iter().map(Into::into).collect();
		self
	}

	#[must_use]
	pub fn with_help_text(mut self, help_text: impl Into<String>) -> Self {
		self.help_text = help_text.into();
		self
	}

	#[must_use]
	pub fn with_acknowledgement_text(mut self, text: impl Into<String>) -> Self {
		self.acknowledgement_text = text.into();
		self
	}
}

/// A non-fatal problem found while setting up a module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupIssue {
	#[error("{name} module is not found")]
	ModuleNotFound { name: String },

	#[error("{name} module does not provide the expected logic")]
	UnexpectedLogic { name: String },
}

/// Outcome of [`Module::setup`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupReport {
	pub issues: Vec<SetupIssue>,
}

impl SetupReport {
	pub fn is_clean(&self) -> bool {
		self.issues.is_empty()
	}

	/// Logs the issue and records it.
	pub fn report(&mut self, issue: SetupIssue) {
		error!("{issue}");
		self.issues.push(issue);
	}
}

/// Looks up a sibling module by name and downcasts its logic.
pub fn lookup_logic<T>(modules: &dyn ModuleLookup, name: &str) -> Result<Arc<T>, SetupIssue>
where
	T: Any + Send + Sync,
{
	let module = modules
		.module(name)
		.ok_or_else(|| SetupIssue::ModuleNotFound {
			name: name.to_owned(),
		})?;

	module
		.logic()
		.downcast::<T>()
		.map_err(|_| SetupIssue::UnexpectedLogic {
			name: name.to_owned(),
		})
}
