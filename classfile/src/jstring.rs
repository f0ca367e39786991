//! Conversions between rust strings and the modified UTF-8 of `CONSTANT_Utf8` entries.
//!
//! Modified UTF-8 stores `\0` in two bytes and supplementary characters as two encoded surrogates
//! of three bytes each. See <https://docs.oracle.com/javase/specs/jvms/se22/html/jvms-4.html#jvms-4.4.7>.
//!
//! The constant pool keeps the raw bytes, so strings are only decoded for lookups and messages.

use java_string::{JavaStr, JavaString};
use crate::ClassFileError;

/// Encodes a rust string as modified UTF-8.
pub fn encode(string: &str) -> Vec<u8> {
	JavaStr::from_str(string).to_modified_utf8().into_owned()
}

pub fn decode(bytes: &[u8]) -> Result<JavaString, ClassFileError> {
	JavaString::from_modified_utf8(bytes.to_vec())
		.map_err(|e| ClassFileError::InvalidString(format!("{e:?}")))
}

/// Decodes for display, replacing anything that isn't representable.
pub fn display(bytes: &[u8]) -> String {
	decode(bytes).ok()
		.and_then(|string| string.as_str().ok().map(str::to_owned))
		.unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod testing {
	use anyhow::Result;
	use pretty_assertions::assert_eq;
	use crate::jstring::{decode, display, encode};

	#[test]
	fn ascii_is_unchanged() -> Result<()> {
		assert_eq!(encode("java/lang/Object"), b"java/lang/Object");
		assert_eq!(decode(b"(Ljava/lang/String;)V")?.as_str().ok(), Some("(Ljava/lang/String;)V"));
		Ok(())
	}

	#[test]
	fn nul_takes_two_bytes() {
		assert_eq!(encode("a\0b"), vec![b'a', 0b1100_0000, 0b1000_0000, b'b']);
		assert_eq!(display(&[b'a', 0b1100_0000, 0b1000_0000, b'b']), "a\0b");
	}

	#[test]
	fn supplementary_as_surrogate_pair() {
		let raw = vec![0b1110_1101, 0b1010_0000, 0b1000_0000, 0b1110_1101, 0b1011_0000, 0b1000_0000];
		assert_eq!(encode("\u{010000}"), raw);
		assert_eq!(display(&raw), "\u{010000}");
	}

	#[test]
	fn truncated_sequence_is_rejected() {
		assert!(decode(&[b'a', 0b1110_0001, 0b1000_1000]).is_err());
	}
}
