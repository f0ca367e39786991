use anyhow::Result;
use pretty_assertions::assert_eq;
use classfile::{parse, serialize, ClassFileError};

mod support;

#[test]
fn unmodified_class_is_identical() -> Result<()> {
	let bytes = support::player();
	let class = parse(&bytes)?;

	assert_eq!(class.name_display(), "Player");
	assert_eq!(class.methods.len(), 3);
	assert_eq!(class.fields.len(), 1);
	assert!(!class.is_dirty());

	assert_eq!(serialize(&class)?, bytes);
	Ok(())
}

#[test]
fn bad_magic() {
	let mut bytes = support::player();
	bytes[0] = 0xCB;
	assert!(matches!(parse(&bytes), Err(ClassFileError::MalformedFormat(_))));
}

#[test]
fn unsupported_version() {
	let mut bytes = support::player();
	bytes[7] = 99;
	assert!(matches!(parse(&bytes), Err(ClassFileError::MalformedFormat(_))));
}

#[test]
fn every_truncation_fails() {
	let bytes = support::player();
	for len in 0..bytes.len() {
		let result = parse(&bytes[..len]);
		assert!(
			matches!(result, Err(ClassFileError::TruncatedInput { .. } | ClassFileError::MalformedFormat(_))),
			"parsing the first {len} bytes gave {result:?}"
		);
	}
}

#[test]
fn trailing_bytes() {
	let mut bytes = support::player();
	bytes.push(0);
	assert!(matches!(parse(&bytes), Err(ClassFileError::MalformedFormat(_))));
}
