use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Builds a [`ClassFileError::MalformedFormat`] from a format string.
macro_rules! malformed {
	($($arg:tt)*) => {
		$crate::ClassFileError::MalformedFormat(format!($($arg)*))
	};
}
pub(crate) use malformed;

/// Errors of reading, encoding and writing class files.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassFileError {
	/// The input is not a well-formed class file: bad magic, an unknown pool tag, inconsistent
	/// pool references, a branch into the middle of an instruction, trailing bytes.
	#[error("malformed class file: {0}")]
	MalformedFormat(String),
	/// The input ended before a structure was complete.
	#[error("truncated input: needed {needed} bytes at offset {offset}, but only {available} remain")]
	TruncatedInput {
		offset: usize,
		needed: usize,
		available: usize,
	},
	/// A class file version or feature this crate can't handle.
	#[error("unsupported: {0}")]
	Unsupported(String),
	/// Adding another constant would exceed the 65535 slot limit of the constant pool.
	#[error("constant pool overflow: {0}")]
	PoolOverflow(String),
	/// A model could not be turned into bytes, for example because a method got longer than 65535 bytes.
	#[error("cannot encode: {0}")]
	Encoding(String),
	/// A string is not valid modified UTF-8.
	#[error("invalid modified utf-8: {0}")]
	InvalidString(String),
}

/// A structural problem of a class model, found by [`crate::verify`] or while recomputing
/// stack sizes and frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct VerifyError {
	/// `name descriptor` of the offending method, if the problem is inside a method.
	pub method: Option<String>,
	/// Index into the instruction list of that method.
	pub instruction: Option<usize>,
	pub reason: String,
}

impl VerifyError {
	pub fn new(reason: impl Into<String>) -> VerifyError {
		VerifyError { method: None, instruction: None, reason: reason.into() }
	}

	pub fn at(instruction: usize, reason: impl Into<String>) -> VerifyError {
		VerifyError { method: None, instruction: Some(instruction), reason: reason.into() }
	}

	pub fn in_method(mut self, method: impl Into<String>) -> VerifyError {
		if self.method.is_none() {
			self.method = Some(method.into());
		}
		self
	}
}

impl Display for VerifyError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match (&self.method, self.instruction) {
			(Some(method), Some(instruction)) => write!(f, "in method `{method}` at instruction {instruction}: {}", self.reason),
			(Some(method), None) => write!(f, "in method `{method}`: {}", self.reason),
			(None, Some(instruction)) => write!(f, "at instruction {instruction}: {}", self.reason),
			(None, None) => f.write_str(&self.reason),
		}
	}
}

impl From<ClassFileError> for VerifyError {
	fn from(value: ClassFileError) -> Self {
		VerifyError::new(value.to_string())
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use crate::{ClassFileError, VerifyError};

	#[test]
	fn display() {
		let e = VerifyError::at(3, "stack underflow").in_method("sayHello ()V");
		assert_eq!(e.to_string(), "in method `sayHello ()V` at instruction 3: stack underflow");

		let e = VerifyError::new("duplicate method").in_method("a ()V").in_method("b ()V");
		assert_eq!(e.to_string(), "in method `a ()V`: duplicate method");

		let e = ClassFileError::TruncatedInput { offset: 8, needed: 2, available: 0 };
		assert_eq!(e.to_string(), "truncated input: needed 2 bytes at offset 8, but only 0 remain");
	}
}
