//! Hooking the engine into a class loading host.

use std::sync::Arc;
use anyhow::{Context, Result};
use log::info;
use classfile::ClassHierarchy;
use crate::config::WeaveConfig;
use crate::engine::{ClassTransformer, Engine};
use crate::registry::PatchRegistry;
use crate::WeaveError;

/// Something that loads classes, and lets a transformer see them first.
pub trait ClassLoadingHost {
	fn install_transformer(&mut self, transformer: Arc<dyn ClassTransformer>);

	/// The hierarchy of the loaded classes, if the host knows it.
	fn class_hierarchy(&self) -> Option<Arc<dyn ClassHierarchy>> {
		None
	}
}

/// Sets up an engine for `host`.
///
/// Registers the patches of the files named in `config`, then the ones from `register`. After
/// that the registry is frozen and the engine is installed in the host.
pub fn initialize(
	host: &mut dyn ClassLoadingHost,
	config: &WeaveConfig,
	register: impl FnOnce(&mut PatchRegistry) -> Result<(), WeaveError>,
) -> Result<Arc<Engine>> {
	let mut registry = PatchRegistry::new();
	registry.register_all(config.load_patches()?)
		.context("failed to register patches from files")?;
	register(&mut registry)
		.context("failed to register patches")?;
	let registry = registry.freeze()?;

	let mut engine = Engine::with_config(registry, config);
	if let Some(hierarchy) = host.class_hierarchy() {
		engine = engine.with_hierarchy(hierarchy);
	}
	let engine = Arc::new(engine);

	info!("patching {} class(es) with {} patch(es)", engine.registry().classes().count(), engine.registry().len());
	host.install_transformer(engine.clone());
	Ok(engine)
}
