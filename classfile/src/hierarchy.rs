//! What the frame computation knows about classes other than the one being changed.
//!
//! Two reference types meeting where control flow joins need a common super class for the frame
//! written there. Answers are `None` if the classes are unknown, in which case the code can't be
//! given frames and the change must be abandoned.

use std::collections::{HashMap, HashSet};
use crate::model::ClassModel;

pub(crate) const OBJECT: &[u8] = b"java/lang/Object";

/// Answers questions about the class hierarchy. Arguments are internal class names, never array
/// descriptors.
pub trait ClassHierarchy: Send + Sync {
	/// The most specific class both `a` and `b` are assignable to, or `None` if that isn't known.
	fn common_super_class(&self, a: &[u8], b: &[u8]) -> Option<Vec<u8>>;

	/// Whether a value of class `from` may be used as a `to`, or `None` if that isn't known.
	fn is_assignable(&self, from: &[u8], to: &[u8]) -> Option<bool> {
		if from == to || to == OBJECT {
			Some(true)
		} else {
			None
		}
	}
}

/// Knows no class at all. Only identical classes and `java/lang/Object` can be merged.
#[derive(Debug, Copy, Clone, Default)]
pub struct DefaultHierarchy;

impl ClassHierarchy for DefaultHierarchy {
	fn common_super_class(&self, a: &[u8], b: &[u8]) -> Option<Vec<u8>> {
		if a == b {
			Some(a.to_vec())
		} else if a == OBJECT || b == OBJECT {
			Some(OBJECT.to_vec())
		} else {
			None
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ClassInfo {
	super_class: Option<Vec<u8>>,
	interface: bool,
}

/// A hierarchy built from a known set of classes, for example all classes of a jar.
///
/// Interfaces merge to `java/lang/Object`, like the JVM's verifier treats them.
#[derive(Debug, Clone, Default)]
pub struct ClassPathHierarchy {
	classes: HashMap<Vec<u8>, ClassInfo>,
}

impl ClassPathHierarchy {
	pub fn new() -> ClassPathHierarchy {
		ClassPathHierarchy::default()
	}

	/// Adds a class. `super_class` is `None` only for `java/lang/Object`.
	pub fn add(&mut self, name: impl Into<Vec<u8>>, super_class: Option<&[u8]>, interface: bool) {
		self.classes.insert(name.into(), ClassInfo {
			super_class: super_class.map(<[u8]>::to_vec),
			interface,
		});
	}

	/// Adds a parsed class. Classes without a readable name are ignored.
	pub fn add_class(&mut self, class: &ClassModel) {
		if let Some(name) = class.name() {
			self.add(name, class.super_name(), class.is_interface());
		}
	}

	pub fn len(&self) -> usize {
		self.classes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.classes.is_empty()
	}

	fn is_interface(&self, name: &[u8]) -> bool {
		self.classes.get(name).is_some_and(|info| info.interface)
	}

	/// The class itself followed by all its super classes, ending with `java/lang/Object`.
	/// `None` if a class on the way is unknown.
	fn supers(&self, name: &[u8]) -> Option<Vec<Vec<u8>>> {
		let mut chain = Vec::new();
		let mut seen = HashSet::new();
		let mut current = name.to_vec();
		loop {
			if current == OBJECT {
				chain.push(current);
				return Some(chain);
			}
			if !seen.insert(current.clone()) {
				// circular hierarchy
				return None;
			}
			let next = match &self.classes.get(&current)?.super_class {
				Some(next) => next.clone(),
				None => OBJECT.to_vec(),
			};
			chain.push(current);
			current = next;
		}
	}
}

impl ClassHierarchy for ClassPathHierarchy {
	fn common_super_class(&self, a: &[u8], b: &[u8]) -> Option<Vec<u8>> {
		if a == b {
			return Some(a.to_vec());
		}
		if a == OBJECT || b == OBJECT || self.is_interface(a) || self.is_interface(b) {
			return Some(OBJECT.to_vec());
		}
		let supers_of_a = self.supers(a)?;
		self.supers(b)?.into_iter()
			.find(|class| supers_of_a.contains(class))
	}

	fn is_assignable(&self, from: &[u8], to: &[u8]) -> Option<bool> {
		if from == to || to == OBJECT || self.is_interface(to) {
			return Some(true);
		}
		if !self.classes.contains_key(to) {
			return None;
		}
		self.supers(from).map(|supers| supers.iter().any(|class| class == to))
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use crate::hierarchy::{ClassHierarchy, ClassPathHierarchy, DefaultHierarchy};

	fn collections() -> ClassPathHierarchy {
		let mut hierarchy = ClassPathHierarchy::new();
		hierarchy.add("java/util/AbstractCollection", Some(b"java/lang/Object"), false);
		hierarchy.add("java/util/AbstractList", Some(b"java/util/AbstractCollection"), false);
		hierarchy.add("java/util/AbstractSequentialList", Some(b"java/util/AbstractList"), false);
		hierarchy.add("java/util/ArrayList", Some(b"java/util/AbstractList"), false);
		hierarchy.add("java/util/LinkedList", Some(b"java/util/AbstractSequentialList"), false);
		hierarchy.add("java/util/List", Some(b"java/lang/Object"), true);
		hierarchy
	}

	#[test]
	fn common_super_class() {
		let h = collections();
		assert_eq!(h.len(), 6);
		assert_eq!(h.common_super_class(b"java/util/ArrayList", b"java/util/LinkedList"), Some(b"java/util/AbstractList".to_vec()));
		assert_eq!(h.common_super_class(b"java/util/LinkedList", b"java/util/AbstractSequentialList"), Some(b"java/util/AbstractSequentialList".to_vec()));
		assert_eq!(h.common_super_class(b"java/util/ArrayList", b"java/util/List"), Some(b"java/lang/Object".to_vec()));
		assert_eq!(h.common_super_class(b"java/util/ArrayList", b"java/util/HashMap"), None);
	}

	#[test]
	fn assignable() {
		let h = collections();
		assert_eq!(h.is_assignable(b"java/util/LinkedList", b"java/util/AbstractList"), Some(true));
		assert_eq!(h.is_assignable(b"java/util/AbstractList", b"java/util/ArrayList"), Some(false));
		assert_eq!(h.is_assignable(b"java/util/ArrayList", b"java/util/List"), Some(true));
		assert_eq!(h.is_assignable(b"java/util/ArrayList", b"java/util/HashMap"), None);
		assert_eq!(h.is_assignable(b"java/util/HashMap", b"java/util/AbstractList"), None);
	}

	#[test]
	fn circular_classes_are_unknown() {
		let mut h = ClassPathHierarchy::new();
		h.add("A", Some(b"B"), false);
		h.add("B", Some(b"A"), false);
		assert_eq!(h.common_super_class(b"A", b"C"), None);
	}

	#[test]
	fn default_hierarchy() {
		assert_eq!(DefaultHierarchy.common_super_class(b"Player", b"Player"), Some(b"Player".to_vec()));
		assert_eq!(DefaultHierarchy.common_super_class(b"Player", b"java/lang/Object"), Some(b"java/lang/Object".to_vec()));
		assert_eq!(DefaultHierarchy.common_super_class(b"java/util/ArrayList", b"java/util/LinkedList"), None);
		assert_eq!(DefaultHierarchy.is_assignable(b"Player", b"java/lang/Object"), Some(true));
		assert_eq!(DefaultHierarchy.is_assignable(b"java/util/ArrayList", b"java/util/AbstractList"), None);
	}
}
