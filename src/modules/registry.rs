//! Module registry: registration by name, setup and logic lookup.

use slicer_rt_module_api::prelude::*;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Registered modules in registration order.
pub struct ModuleManager {
	modules: Vec<Box<dyn Module>>,
}

/// Lookup over every module except the one being set up.
struct Siblings<'a> {
	before: &'a [Box<dyn Module>],
	after: &'a [Box<dyn Module>],
}

impl ModuleLookup for Siblings<'_> {
	fn module(&self, name: &str) -> Option<&dyn Module> {
		self.before
			.iter()
			.chain(self.after)
			.find(|module| module.name() == name)
			.map(AsRef::as_ref)
	}
}

impl ModuleManager {
	pub fn new() -> Self {
		Self {
			modules: Vec::new(),
		}
	}

	/// Register a module. Names must be unique.
	pub fn register(&mut self, module: Box<dyn Module>) -> Result<(), ModuleRegistrationError> {
		let name = module.name().to_owned();
		if self.module(&name).is_some() {
			return Err(ModuleRegistrationError::Duplicate { name });
		}
		let info = module.info();
		info!(module = %name, title = %info.title, "Registered module");
		self.modules.push(module);
		Ok(())
	}

	/// Set up every module once, in registration order. Each module sees all
	/// other registered modules.
	pub fn setup_all(&mut self) -> Vec<(String, SetupReport)> {
		let mut reports = Vec::with_capacity(self.modules.len());
		for index in 0..self.modules.len() {
			let (before, rest) = self.modules.split_at_mut(index);
			let Some((current, after)) = rest.split_first_mut() else {
				break;
			};
			let siblings = Siblings {
				before: &*before,
				after: &*after,
			};
			let report = current.setup(&siblings);
			info!(
				module = %current.name(),
				issues = report.issues.len(),
				"Module set up"
			);
			reports.push((current.name().to_owned(), report));
		}
		reports
	}

	/// The logic of a registered module, downcast to `T`.
	pub fn logic<T>(&self, name: &str) -> Result<Arc<T>, SetupIssue>
	where
		T: std::any::Any + Send + Sync,
	{
		lookup_logic(self, name)
	}

	pub fn list_modules(&self) -> impl Iterator<Item = &dyn Module> {
		self.modules.iter().map(AsRef::as_ref)
	}
}

impl ModuleLookup for ModuleManager {
	fn module(&self, name: &str) -> Option<&dyn Module> {
		self.list_modules().find(|module| module.name() == name)
	}
}

impl Default for ModuleManager {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Debug, Error)]
pub enum ModuleRegistrationError {
	#[error("Module {name} is already registered")]
	Duplicate { name: String },
}
