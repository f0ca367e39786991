//! The patches to apply, by class.
//!
//! Patches are registered into a [`PatchRegistry`] during initialization. Before the first class
//! is transformed, the registry is frozen into a [`FrozenRegistry`], which is immutable and shared
//! between all threads loading classes.

use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use indexmap::IndexMap;
use log::{debug, trace};
use sha2::{Digest, Sha256};
use crate::error::invalid;
use crate::patch::PatchDescriptor;
use crate::WeaveError;

/// The SHA-256 of the patches of one class, in the order they are applied.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
	pub fn of(patches: &[PatchDescriptor]) -> Result<Fingerprint, WeaveError> {
		let json = serde_json::to_vec(patches)
			.map_err(|e| invalid!("cannot serialize patches: {e}"))?;
		Ok(Fingerprint(Sha256::digest(&json).into()))
	}
}

impl Display for Fingerprint {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		for byte in self.0 {
			write!(f, "{byte:02x}")?;
		}
		Ok(())
	}
}

impl Debug for Fingerprint {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "Fingerprint({self})")
	}
}

/// Collects patches during initialization.
///
/// Registering is not idempotent: a patch registered twice is also applied twice.
#[derive(Debug, Default)]
pub struct PatchRegistry {
	classes: IndexMap<String, Vec<PatchDescriptor>>,
	count: usize,
}

impl PatchRegistry {
	pub fn new() -> PatchRegistry {
		PatchRegistry::default()
	}

	/// Adds a patch after checking it with [`PatchDescriptor::validate`].
	pub fn register(&mut self, patch: PatchDescriptor) -> Result<(), WeaveError> {
		patch.validate()?;
		trace!("registering patch {} for {}", patch.id, patch.class);
		self.classes.entry(patch.class.clone()).or_default().push(patch);
		self.count += 1;
		Ok(())
	}

	pub fn register_all(&mut self, patches: impl IntoIterator<Item=PatchDescriptor>) -> Result<(), WeaveError> {
		patches.into_iter().try_for_each(|patch| self.register(patch))
	}

	/// The number of registered patches.
	pub fn len(&self) -> usize {
		self.count
	}

	pub fn is_empty(&self) -> bool {
		self.count == 0
	}

	/// Ends registration. The patches of each class are sorted by priority, keeping the order of
	/// registration for equal priorities.
	pub fn freeze(self) -> Result<Arc<FrozenRegistry>, WeaveError> {
		let mut classes = HashMap::with_capacity(self.classes.len());
		for (class, mut patches) in self.classes {
			patches.sort_by_key(|patch| patch.priority);
			let fingerprint = Fingerprint::of(&patches)?;
			debug!("{} patch(es) for {class}, fingerprint {fingerprint}", patches.len());
			classes.insert(class, ClassPatches { patches, fingerprint });
		}
		Ok(Arc::new(FrozenRegistry { classes, count: self.count }))
	}
}

#[derive(Debug)]
struct ClassPatches {
	patches: Vec<PatchDescriptor>,
	fingerprint: Fingerprint,
}

/// The registered patches, in the order they are applied.
#[derive(Debug, Default)]
pub struct FrozenRegistry {
	classes: HashMap<String, ClassPatches>,
	count: usize,
}

impl FrozenRegistry {
	/// The patches of a class, ordered by priority and then by registration. Empty for classes
	/// without patches.
	pub fn lookup(&self, class: &str) -> &[PatchDescriptor] {
		self.classes.get(class).map(|entry| entry.patches.as_slice()).unwrap_or_default()
	}

	pub fn fingerprint(&self, class: &str) -> Option<Fingerprint> {
		self.classes.get(class).map(|entry| entry.fingerprint)
	}

	/// Names of all classes with patches, in no particular order.
	pub fn classes(&self) -> impl Iterator<Item=&str> {
		self.classes.keys().map(String::as_str)
	}

	/// The number of patches.
	pub fn len(&self) -> usize {
		self.count
	}

	pub fn is_empty(&self) -> bool {
		self.count == 0
	}
}
