//! Remembers the outcome of transforming a class.

use std::sync::Arc;
use dashmap::DashMap;
use log::trace;
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use classfile::ClassFileError;
use crate::engine::Outcome;
use crate::registry::Fingerprint;

/// Identifies one transformation: the same input bytes with the same patches give the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
	pub class: String,
	pub fingerprint: Fingerprint,
	/// SHA-256 of the input bytes.
	pub input: [u8; 32],
}

impl CacheKey {
	pub fn new(class: &str, fingerprint: Fingerprint, bytes: &[u8]) -> CacheKey {
		CacheKey {
			class: class.to_owned(),
			fingerprint,
			input: Sha256::digest(bytes).into(),
		}
	}
}

/// A map from [`CacheKey`] to [`Outcome`], safe to use from many threads.
///
/// Concurrent requests for the same key compute the outcome only once, the others wait for it.
/// Failed computations are not remembered.
#[derive(Debug, Default)]
pub struct OutcomeCache {
	entries: DashMap<CacheKey, Arc<OnceCell<Outcome>>>,
}

impl OutcomeCache {
	pub fn new() -> OutcomeCache {
		OutcomeCache::default()
	}

	pub fn get_or_compute(
		&self,
		key: CacheKey,
		compute: impl FnOnce() -> Result<Outcome, ClassFileError>,
	) -> Result<Outcome, ClassFileError> {
		// the shard must not stay locked while computing
		let cell = self.entries.entry(key).or_default().clone();
		if let Some(outcome) = cell.get() {
			trace!("cache hit");
			return Ok(outcome.clone());
		}
		cell.get_or_try_init(compute).cloned()
	}

	/// The number of keys with an outcome.
	pub fn len(&self) -> usize {
		self.entries.iter().filter(|entry| entry.value().get().is_some()).count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn clear(&self) {
		self.entries.clear();
	}
}

#[cfg(test)]
mod testing {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;
	use std::thread;
	use pretty_assertions::assert_eq;
	use classfile::ClassFileError;
	use crate::cache::{CacheKey, OutcomeCache};
	use crate::engine::Outcome;
	use crate::registry::Fingerprint;

	fn key(bytes: &[u8]) -> CacheKey {
		CacheKey::new("Player", Fingerprint([7; 32]), bytes)
	}

	#[test]
	fn computes_once() {
		let cache = Arc::new(OutcomeCache::new());
		let calls = Arc::new(AtomicUsize::new(0));

		let threads: Vec<_> = (0..8)
			.map(|_| {
				let cache = cache.clone();
				let calls = calls.clone();
				thread::spawn(move || cache.get_or_compute(key(b"class"), || {
					calls.fetch_add(1, Ordering::SeqCst);
					Ok(Outcome::PassThrough)
				}))
			})
			.collect();
		for thread in threads {
			assert_eq!(thread.join().unwrap(), Ok(Outcome::PassThrough));
		}

		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert_eq!(cache.len(), 1);
	}

	#[test]
	fn different_input_different_entry() {
		let cache = OutcomeCache::new();
		let _ = cache.get_or_compute(key(b"one"), || Ok(Outcome::PassThrough));
		let _ = cache.get_or_compute(key(b"two"), || Ok(Outcome::PassThrough));
		assert_eq!(cache.len(), 2);
		cache.clear();
		assert!(cache.is_empty());
	}

	#[test]
	fn errors_are_not_kept() {
		let cache = OutcomeCache::new();
		let error = ClassFileError::MalformedFormat("bad magic".to_owned());
		assert_eq!(cache.get_or_compute(key(b"x"), || Err(error.clone())), Err(error));
		assert!(cache.is_empty());
		assert_eq!(cache.get_or_compute(key(b"x"), || Ok(Outcome::PassThrough)), Ok(Outcome::PassThrough));
	}
}
