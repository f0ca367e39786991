use classfile::{ClassFileError, VerifyError};
use thiserror::Error;

/// Errors of applying patches to a class.
///
/// Everything except [`WeaveError::Class`] is caused by the patches, not by the class being
/// patched. The engine records these in the report of the class and never lets them prevent
/// loading the unpatched class.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WeaveError {
	/// A member with the same name and descriptor exists, and the edit doesn't allow overwriting it.
	#[error("class {class} already has a member `{member}`")]
	DuplicateMember {
		class: String,
		member: String,
	},
	/// The method, anchor or call site an edit refers to doesn't exist.
	#[error("target not found: {0}")]
	TargetNotFound(String),
	/// Two edits touch the same method in ways that can't both be honored.
	#[error("structural conflict: {0}")]
	StructuralConflict(String),
	/// A patch that can never apply, like a code template with a syntax error.
	#[error("invalid patch: {0}")]
	InvalidPatch(String),
	#[error("verification failed: {0}")]
	VerificationFailed(#[from] VerifyError),
	#[error(transparent)]
	Class(#[from] ClassFileError),
}

/// Builds a [`WeaveError::InvalidPatch`] from a format string.
macro_rules! invalid {
	($($arg:tt)*) => {
		$crate::WeaveError::InvalidPatch(format!($($arg)*))
	};
}
pub(crate) use invalid;
