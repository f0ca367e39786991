//! Parsing of field and method descriptors, directly on modified UTF-8 bytes.

/// A field type as seen by the operand stack: the small integral types all become [`JavaType::Int`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JavaType<'a> {
	Int,
	Float,
	Long,
	Double,
	/// The internal name of a class (`java/lang/String`), or the full descriptor of an array type (`[I`).
	Reference(&'a [u8]),
}

impl JavaType<'_> {
	/// Number of local variable slots, or operand stack words.
	pub fn size(&self) -> u16 {
		match self {
			JavaType::Long | JavaType::Double => 2,
			_ => 1,
		}
	}
}

/// Reads one field type from the start of `desc`, returning it and the number of bytes consumed.
fn read_type(desc: &[u8]) -> Option<(JavaType<'_>, usize)> {
	match *desc.first()? {
		b'B' | b'C' | b'I' | b'S' | b'Z' => Some((JavaType::Int, 1)),
		b'F' => Some((JavaType::Float, 1)),
		b'J' => Some((JavaType::Long, 1)),
		b'D' => Some((JavaType::Double, 1)),
		b'L' => {
			let end = desc.iter().position(|&b| b == b';')?;
			if end == 1 {
				return None;
			}
			Some((JavaType::Reference(&desc[1..end]), end + 1))
		},
		b'[' => {
			let dimensions = desc.iter().take_while(|&&b| b == b'[').count();
			if dimensions > 255 {
				return None;
			}
			let (_, len) = read_type(&desc[dimensions..])?;
			Some((JavaType::Reference(&desc[..dimensions + len]), dimensions + len))
		},
		_ => None,
	}
}

/// Parses a complete field descriptor.
pub fn field_type(desc: &[u8]) -> Option<JavaType<'_>> {
	match read_type(desc)? {
		(t, len) if len == desc.len() => Some(t),
		_ => None,
	}
}

/// A parsed method descriptor. A `return_type` of `None` means `void`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodType<'a> {
	pub arguments: Vec<JavaType<'a>>,
	pub return_type: Option<JavaType<'a>>,
}

impl MethodType<'_> {
	/// Slots taken by the arguments, not counting `this`.
	pub fn arguments_size(&self) -> u16 {
		self.arguments.iter().map(JavaType::size).sum()
	}
}

pub fn method_type(desc: &[u8]) -> Option<MethodType<'_>> {
	if desc.first() != Some(&b'(') {
		return None;
	}
	let mut rest = &desc[1..];
	let mut arguments = Vec::new();
	while rest.first() != Some(&b')') {
		let (t, len) = read_type(rest)?;
		arguments.push(t);
		rest = &rest[len..];
	}
	let rest = &rest[1..];

	let return_type = if rest == b"V" {
		None
	} else {
		Some(field_type(rest)?)
	};

	Some(MethodType { arguments, return_type })
}

/// The descriptor of the element type of an array type, given as its descriptor.
pub fn array_element(array: &[u8]) -> Option<&[u8]> {
	match array {
		[b'[', rest @ ..] if !rest.is_empty() => Some(rest),
		_ => None,
	}
}

/// Turns a class name or array descriptor as found in a `CONSTANT_Class` into a field descriptor.
pub fn class_to_descriptor(class: &[u8]) -> Vec<u8> {
	if class.first() == Some(&b'[') {
		class.to_vec()
	} else {
		let mut vec = Vec::with_capacity(class.len() + 2);
		vec.push(b'L');
		vec.extend_from_slice(class);
		vec.push(b';');
		vec
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use crate::descriptor::{array_element, class_to_descriptor, field_type, method_type, JavaType};

	#[test]
	fn fields() {
		assert_eq!(field_type(b"Z"), Some(JavaType::Int));
		assert_eq!(field_type(b"J"), Some(JavaType::Long));
		assert_eq!(field_type(b"Ljava/lang/String;"), Some(JavaType::Reference(b"java/lang/String")));
		assert_eq!(field_type(b"[[Ljava/lang/String;"), Some(JavaType::Reference(b"[[Ljava/lang/String;")));
		assert_eq!(field_type(b"[I"), Some(JavaType::Reference(b"[I")));
		assert_eq!(field_type(b"II"), None);
		assert_eq!(field_type(b"L;"), None);
		assert_eq!(field_type(b"Ljava/lang/String"), None);
		assert_eq!(field_type(b"V"), None);
		assert_eq!(field_type(b""), None);
	}

	#[test]
	fn methods() {
		let t = method_type(b"(IJLjava/lang/Object;[D)V").unwrap();
		assert_eq!(t.arguments, vec![
			JavaType::Int,
			JavaType::Long,
			JavaType::Reference(b"java/lang/Object"),
			JavaType::Reference(b"[D"),
		]);
		assert_eq!(t.return_type, None);
		assert_eq!(t.arguments_size(), 5);

		let t = method_type(b"()Ljava/lang/String;").unwrap();
		assert_eq!(t.arguments, vec![]);
		assert_eq!(t.return_type, Some(JavaType::Reference(b"java/lang/String")));

		assert_eq!(method_type(b"(I"), None);
		assert_eq!(method_type(b"I)V"), None);
		assert_eq!(method_type(b"()"), None);
		assert_eq!(method_type(b"()VV"), None);
	}

	#[test]
	fn arrays() {
		assert_eq!(array_element(b"[[I"), Some(&b"[I"[..]));
		assert_eq!(array_element(b"[Ljava/lang/Object;"), Some(&b"Ljava/lang/Object;"[..]));
		assert_eq!(array_element(b"java/lang/Object"), None);
		assert_eq!(class_to_descriptor(b"java/lang/Object"), b"Ljava/lang/Object;".to_vec());
		assert_eq!(class_to_descriptor(b"[I"), b"[I".to_vec());
	}
}
