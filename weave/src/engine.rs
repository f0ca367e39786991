//! Turns the bytes of a class into the bytes of the patched class.

use std::sync::Arc;
use log::{debug, error, warn};
use classfile::{ClassFileError, ClassHierarchy, ClassModel, DefaultHierarchy};
use crate::cache::{CacheKey, OutcomeCache};
use crate::config::WeaveConfig;
use crate::patch::PatchDescriptor;
use crate::pipeline;
use crate::registry::{Fingerprint, FrozenRegistry};
use crate::report::ClassReport;
use crate::WeaveError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
	/// There are no patches for the class. It wasn't parsed at all.
	PassThrough,
	Patched {
		bytes: Vec<u8>,
		report: ClassReport,
	},
	/// There are patches for the class, but the original bytes must be used. The report says why.
	FellBack {
		report: ClassReport,
	},
}

impl Outcome {
	/// The bytes to hand to the class loader.
	pub fn bytes<'a>(&'a self, original: &'a [u8]) -> &'a [u8] {
		match self {
			Outcome::Patched { bytes, .. } => bytes,
			Outcome::PassThrough | Outcome::FellBack { .. } => original,
		}
	}

	pub fn report(&self) -> Option<&ClassReport> {
		match self {
			Outcome::PassThrough => None,
			Outcome::Patched { report, .. } | Outcome::FellBack { report } => Some(report),
		}
	}

	pub fn is_patched(&self) -> bool {
		matches!(self, Outcome::Patched { .. })
	}
}

/// What the host calls for every class it loads.
pub trait ClassTransformer: Send + Sync {
	/// Returns the bytes to define the class from, or `None` to use `bytes` unchanged.
	fn transform_class(&self, class_name: &str, bytes: &[u8]) -> Option<Vec<u8>>;
}

/// Applies the patches of a [`FrozenRegistry`] to classes as they are loaded.
pub struct Engine {
	registry: Arc<FrozenRegistry>,
	hierarchy: Arc<dyn ClassHierarchy>,
	verify: bool,
	fallback_on_error: bool,
	cache: Option<OutcomeCache>,
}

impl Engine {
	/// Creates an engine with the default configuration and the [`DefaultHierarchy`].
	pub fn new(registry: Arc<FrozenRegistry>) -> Engine {
		Engine::with_config(registry, &WeaveConfig::default())
	}

	pub fn with_config(registry: Arc<FrozenRegistry>, config: &WeaveConfig) -> Engine {
		Engine {
			registry,
			hierarchy: Arc::new(DefaultHierarchy),
			verify: config.verify,
			fallback_on_error: config.fallback_on_error,
			cache: config.cache.then(OutcomeCache::new),
		}
	}

	/// Uses `hierarchy` to merge types when computing stack map frames.
	pub fn with_hierarchy(mut self, hierarchy: Arc<dyn ClassHierarchy>) -> Engine {
		self.hierarchy = hierarchy;
		self
	}

	pub fn registry(&self) -> &FrozenRegistry {
		&self.registry
	}

	pub fn cache(&self) -> Option<&OutcomeCache> {
		self.cache.as_ref()
	}

	/// Applies the patches registered for `class_name` to `bytes`.
	///
	/// Problems caused by patches never make this fail, they lead to [`Outcome::FellBack`].
	/// Only if the class can't be read and falling back on errors is disabled an error is returned.
	pub fn transform(&self, class_name: &str, bytes: &[u8]) -> Result<Outcome, ClassFileError> {
		let patches = self.registry.lookup(class_name);
		if patches.is_empty() {
			return Ok(Outcome::PassThrough);
		}
		let fingerprint = self.registry.fingerprint(class_name);

		match (&self.cache, fingerprint) {
			(Some(cache), Some(fingerprint)) => {
				let key = CacheKey::new(class_name, fingerprint, bytes);
				cache.get_or_compute(key, || self.instrument(class_name, bytes, patches, Some(fingerprint)))
			},
			_ => self.instrument(class_name, bytes, patches, fingerprint),
		}
	}

	fn instrument(
		&self,
		class_name: &str,
		bytes: &[u8],
		patches: &[PatchDescriptor],
		fingerprint: Option<Fingerprint>,
	) -> Result<Outcome, ClassFileError> {
		debug!("transforming {class_name} with {} patch(es)", patches.len());
		let mut report = ClassReport::new(class_name, fingerprint);

		let mut class = match classfile::parse(bytes) {
			Ok(class) => class,
			Err(e) if self.fallback_on_error => {
				error!("cannot read class {class_name}: {e}");
				report.failed(e.into());
				return Ok(Outcome::FellBack { report });
			},
			Err(e) => return Err(e),
		};
		if class.name().is_some_and(|name| name != class_name.as_bytes()) {
			warn!("class loaded as {class_name} is called {}", class.name_display());
		}

		pipeline::apply(&mut class, patches, &mut report);
		if report.applied_count() == 0 {
			debug!("no patch could be applied to {class_name}");
			return Ok(Outcome::FellBack { report });
		}

		match self.finish(&mut class) {
			Ok(bytes) => Ok(Outcome::Patched { bytes, report }),
			Err(e) => {
				report.failed(e);
				Ok(Outcome::FellBack { report })
			},
		}
	}

	/// Recomputes changed methods, verifies and serializes.
	fn finish(&self, class: &mut ClassModel) -> Result<Vec<u8>, WeaveError> {
		class.recompute_dirty(self.hierarchy.as_ref())?;
		if self.verify {
			classfile::verify(class, self.hierarchy.as_ref())?;
		}
		Ok(classfile::serialize(class)?)
	}
}

impl ClassTransformer for Engine {
	fn transform_class(&self, class_name: &str, bytes: &[u8]) -> Option<Vec<u8>> {
		match self.transform(class_name, bytes) {
			Ok(Outcome::Patched { bytes, .. }) => Some(bytes),
			Ok(Outcome::PassThrough | Outcome::FellBack { .. }) => None,
			Err(e) => {
				error!("cannot read class {class_name}: {e}");
				None
			},
		}
	}
}
