//! The constant pool.
//!
//! Entries are kept exactly as read, `CONSTANT_Utf8` as raw modified UTF-8 bytes, so that a pool
//! that is written back without additions is byte identical. New entries are deduplicated against
//! everything already present and are only ever appended, so existing indices stay valid.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use crate::bytes::{ByteReader, ClassRead, ClassWrite};
use crate::constants::pool;
use crate::error::malformed;
use crate::{jstring, ClassFileError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoolEntry {
	Utf8 { bytes: Vec<u8> },
	Integer { bytes: i32 },
	Float { bytes: u32 },
	Long { bytes: i64 },
	Double { bytes: u64 },
	Class { name_index: u16 },
	String { string_index: u16 },
	FieldRef { class_index: u16, name_and_type_index: u16 },
	MethodRef { class_index: u16, name_and_type_index: u16 },
	InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
	NameAndType { name_index: u16, descriptor_index: u16 },
	MethodHandle { reference_kind: u8, reference_index: u16 },
	MethodType { descriptor_index: u16 },
	Dynamic { bootstrap_method_attribute_index: u16, name_and_type_index: u16 },
	InvokeDynamic { bootstrap_method_attribute_index: u16, name_and_type_index: u16 },
	Module { name_index: u16 },
	Package { name_index: u16 },
}

impl PoolEntry {
	pub fn tag(&self) -> u8 {
		match self {
			PoolEntry::Utf8 { .. } => pool::UTF8,
			PoolEntry::Integer { .. } => pool::INTEGER,
			PoolEntry::Float { .. } => pool::FLOAT,
			PoolEntry::Long { .. } => pool::LONG,
			PoolEntry::Double { .. } => pool::DOUBLE,
			PoolEntry::Class { .. } => pool::CLASS,
			PoolEntry::String { .. } => pool::STRING,
			PoolEntry::FieldRef { .. } => pool::FIELD_REF,
			PoolEntry::MethodRef { .. } => pool::METHOD_REF,
			PoolEntry::InterfaceMethodRef { .. } => pool::INTERFACE_METHOD_REF,
			PoolEntry::NameAndType { .. } => pool::NAME_AND_TYPE,
			PoolEntry::MethodHandle { .. } => pool::METHOD_HANDLE,
			PoolEntry::MethodType { .. } => pool::METHOD_TYPE,
			PoolEntry::Dynamic { .. } => pool::DYNAMIC,
			PoolEntry::InvokeDynamic { .. } => pool::INVOKE_DYNAMIC,
			PoolEntry::Module { .. } => pool::MODULE,
			PoolEntry::Package { .. } => pool::PACKAGE,
		}
	}

	/// The name used by `javap` for this kind of entry.
	pub fn kind_name(&self) -> &'static str {
		match self {
			PoolEntry::Utf8 { .. } => "Utf8",
			PoolEntry::Integer { .. } => "Integer",
			PoolEntry::Float { .. } => "Float",
			PoolEntry::Long { .. } => "Long",
			PoolEntry::Double { .. } => "Double",
			PoolEntry::Class { .. } => "Class",
			PoolEntry::String { .. } => "String",
			PoolEntry::FieldRef { .. } => "Fieldref",
			PoolEntry::MethodRef { .. } => "Methodref",
			PoolEntry::InterfaceMethodRef { .. } => "InterfaceMethodref",
			PoolEntry::NameAndType { .. } => "NameAndType",
			PoolEntry::MethodHandle { .. } => "MethodHandle",
			PoolEntry::MethodType { .. } => "MethodType",
			PoolEntry::Dynamic { .. } => "Dynamic",
			PoolEntry::InvokeDynamic { .. } => "InvokeDynamic",
			PoolEntry::Module { .. } => "Module",
			PoolEntry::Package { .. } => "Package",
		}
	}

	/// Long and double take up two pool slots.
	pub fn is_wide(&self) -> bool {
		matches!(self, PoolEntry::Long { .. } | PoolEntry::Double { .. })
	}
}

/// The kind of a resolved member reference.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MemberKind {
	Field,
	Method,
	InterfaceMethod,
}

/// A field or method reference with all pool indirections followed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemberRef<'a> {
	pub kind: MemberKind,
	pub owner: &'a [u8],
	pub name: &'a [u8],
	pub descriptor: &'a [u8],
}

impl MemberRef<'_> {
	/// Compares against names given as rust strings.
	pub fn is(&self, owner: &str, name: &str, descriptor: &str) -> bool {
		self.owner == owner.as_bytes() && self.name == name.as_bytes() && self.descriptor == descriptor.as_bytes()
	}
}

impl std::fmt::Display for MemberRef<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}.{}:{}", jstring::display(self.owner), jstring::display(self.name), jstring::display(self.descriptor))
	}
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
	/// `entries[i]` holds the entry at index `i + 1`. The unusable slot after a long or double is `None`.
	entries: Vec<Option<PoolEntry>>,
	/// Maps each entry to its first index, for deduplication.
	map: HashMap<PoolEntry, u16>,
}

impl ConstantPool {
	pub fn new() -> ConstantPool {
		ConstantPool::default()
	}

	/// The value of `constant_pool_count`: one more than the largest index.
	pub fn count(&self) -> u16 {
		// `put` keeps this below u16::MAX
		(self.entries.len() + 1) as u16
	}

	pub fn get(&self, index: u16) -> Option<&PoolEntry> {
		let i = (index as usize).checked_sub(1)?;
		self.entries.get(i)?.as_ref()
	}

	/// All usable entries with their indices.
	pub fn iter(&self) -> impl Iterator<Item=(u16, &PoolEntry)> {
		self.entries.iter()
			.enumerate()
			.filter_map(|(i, entry)| entry.as_ref().map(|entry| ((i + 1) as u16, entry)))
	}

	pub(crate) fn read(reader: &mut ByteReader) -> Result<ConstantPool, ClassFileError> {
		let count = reader.read_u16()?;
		if count == 0 {
			return Err(malformed!("constant pool count must be at least 1"));
		}

		let mut pool = ConstantPool {
			entries: Vec::with_capacity(count as usize),
			map: HashMap::new(),
		};

		let mut index = 1u16;
		while index < count {
			let entry = read_entry(reader, index)?;

			let wide = entry.is_wide();
			if wide && index + 1 >= count {
				return Err(malformed!("{} at index {index} takes two slots, but the pool ends after it", entry.kind_name()));
			}

			pool.map.entry(entry.clone()).or_insert(index);
			pool.entries.push(Some(entry));
			if wide {
				pool.entries.push(None);
				index += 2;
			} else {
				index += 1;
			}
		}

		pool.validate()?;

		Ok(pool)
	}

	pub(crate) fn write(&self, writer: &mut impl ClassWrite) -> Result<(), ClassFileError> {
		writer.write_u16(self.count());

		for entry in self.entries.iter().flatten() {
			writer.write_u8(entry.tag());
			match *entry {
				PoolEntry::Utf8 { ref bytes } => {
					writer.write_usize_as_u16(bytes.len())?;
					writer.write_u8_slice(bytes);
				},
				PoolEntry::Integer { bytes } => writer.write_i32(bytes),
				PoolEntry::Float { bytes } => writer.write_u32(bytes),
				PoolEntry::Long { bytes } => writer.write_i64(bytes),
				PoolEntry::Double { bytes } => writer.write_u64(bytes),
				PoolEntry::Class { name_index } => writer.write_u16(name_index),
				PoolEntry::String { string_index } => writer.write_u16(string_index),
				PoolEntry::FieldRef { class_index, name_and_type_index } |
				PoolEntry::MethodRef { class_index, name_and_type_index } |
				PoolEntry::InterfaceMethodRef { class_index, name_and_type_index } => {
					writer.write_u16(class_index);
					writer.write_u16(name_and_type_index);
				},
				PoolEntry::NameAndType { name_index, descriptor_index } => {
					writer.write_u16(name_index);
					writer.write_u16(descriptor_index);
				},
				PoolEntry::MethodHandle { reference_kind, reference_index } => {
					writer.write_u8(reference_kind);
					writer.write_u16(reference_index);
				},
				PoolEntry::MethodType { descriptor_index } => writer.write_u16(descriptor_index),
				PoolEntry::Dynamic { bootstrap_method_attribute_index, name_and_type_index } |
				PoolEntry::InvokeDynamic { bootstrap_method_attribute_index, name_and_type_index } => {
					writer.write_u16(bootstrap_method_attribute_index);
					writer.write_u16(name_and_type_index);
				},
				PoolEntry::Module { name_index } |
				PoolEntry::Package { name_index } => writer.write_u16(name_index),
			}
		}

		Ok(())
	}

	/// Checks that every reference between pool entries points at an entry of the right kind.
	fn validate(&self) -> Result<(), ClassFileError> {
		for (index, entry) in self.iter() {
			let check = |target: u16, expected: &[u8], what: &str| -> Result<(), ClassFileError> {
				match self.get(target) {
					Some(e) if expected.contains(&e.tag()) => Ok(()),
					Some(e) => Err(malformed!("{} at index {index} has {what} {target} pointing to a {}", entry.kind_name(), e.kind_name())),
					None => Err(malformed!("{} at index {index} has {what} {target} pointing to no entry", entry.kind_name())),
				}
			};

			match *entry {
				PoolEntry::Utf8 { .. } | PoolEntry::Integer { .. } | PoolEntry::Float { .. } |
				PoolEntry::Long { .. } | PoolEntry::Double { .. } => {},
				PoolEntry::Class { name_index } => check(name_index, &[pool::UTF8], "name index")?,
				PoolEntry::String { string_index } => check(string_index, &[pool::UTF8], "string index")?,
				PoolEntry::FieldRef { class_index, name_and_type_index } |
				PoolEntry::MethodRef { class_index, name_and_type_index } |
				PoolEntry::InterfaceMethodRef { class_index, name_and_type_index } => {
					check(class_index, &[pool::CLASS], "class index")?;
					check(name_and_type_index, &[pool::NAME_AND_TYPE], "name and type index")?;
				},
				PoolEntry::NameAndType { name_index, descriptor_index } => {
					check(name_index, &[pool::UTF8], "name index")?;
					check(descriptor_index, &[pool::UTF8], "descriptor index")?;
				},
				PoolEntry::MethodHandle { reference_kind, reference_index } => {
					let expected: &[u8] = match reference_kind {
						1..=4 => &[pool::FIELD_REF],
						5 | 8 => &[pool::METHOD_REF],
						6 | 7 => &[pool::METHOD_REF, pool::INTERFACE_METHOD_REF],
						9 => &[pool::INTERFACE_METHOD_REF],
						kind => return Err(malformed!("MethodHandle at index {index} has invalid reference kind {kind}")),
					};
					check(reference_index, expected, "reference index")?;
				},
				PoolEntry::MethodType { descriptor_index } => check(descriptor_index, &[pool::UTF8], "descriptor index")?,
				PoolEntry::Dynamic { name_and_type_index, .. } |
				PoolEntry::InvokeDynamic { name_and_type_index, .. } => {
					check(name_and_type_index, &[pool::NAME_AND_TYPE], "name and type index")?;
				},
				PoolEntry::Module { name_index } |
				PoolEntry::Package { name_index } => check(name_index, &[pool::UTF8], "name index")?,
			}
		}
		Ok(())
	}

	/// Returns the index of an equal entry, or appends the entry.
	pub fn add_constant(&mut self, entry: PoolEntry) -> Result<u16, ClassFileError> {
		let next = self.entries.len() + 1;
		match self.map.entry(entry) {
			Entry::Occupied(entry) => Ok(*entry.get()),
			Entry::Vacant(entry) => {
				let width = if entry.key().is_wide() { 2 } else { 1 };
				if next + width > u16::MAX as usize {
					return Err(ClassFileError::PoolOverflow(format!(
						"adding {} at index {next} exceeds the limit of {} pool slots", entry.key().kind_name(), u16::MAX - 1
					)));
				}
				let index = next as u16;

				self.entries.push(Some(entry.key().clone()));
				if width == 2 {
					self.entries.push(None);
				}
				entry.insert(index);

				Ok(index)
			},
		}
	}

	pub fn put_utf8_bytes(&mut self, bytes: &[u8]) -> Result<u16, ClassFileError> {
		self.add_constant(PoolEntry::Utf8 { bytes: bytes.to_vec() })
	}

	pub fn put_utf8(&mut self, string: &str) -> Result<u16, ClassFileError> {
		self.add_constant(PoolEntry::Utf8 { bytes: jstring::encode(string) })
	}

	pub fn put_class_bytes(&mut self, name: &[u8]) -> Result<u16, ClassFileError> {
		let name_index = self.put_utf8_bytes(name)?;
		self.add_constant(PoolEntry::Class { name_index })
	}

	pub fn put_class(&mut self, name: &str) -> Result<u16, ClassFileError> {
		let name_index = self.put_utf8(name)?;
		self.add_constant(PoolEntry::Class { name_index })
	}

	pub fn put_string(&mut self, value: &str) -> Result<u16, ClassFileError> {
		let string_index = self.put_utf8(value)?;
		self.add_constant(PoolEntry::String { string_index })
	}

	pub fn put_integer(&mut self, value: i32) -> Result<u16, ClassFileError> {
		self.add_constant(PoolEntry::Integer { bytes: value })
	}

	pub fn put_float(&mut self, value: f32) -> Result<u16, ClassFileError> {
		self.add_constant(PoolEntry::Float { bytes: value.to_bits() })
	}

	pub fn put_long(&mut self, value: i64) -> Result<u16, ClassFileError> {
		self.add_constant(PoolEntry::Long { bytes: value })
	}

	pub fn put_double(&mut self, value: f64) -> Result<u16, ClassFileError> {
		self.add_constant(PoolEntry::Double { bytes: value.to_bits() })
	}

	pub fn put_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, ClassFileError> {
		let name_index = self.put_utf8(name)?;
		let descriptor_index = self.put_utf8(descriptor)?;
		self.add_constant(PoolEntry::NameAndType { name_index, descriptor_index })
	}

	pub fn put_field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16, ClassFileError> {
		let class_index = self.put_class(owner)?;
		let name_and_type_index = self.put_name_and_type(name, descriptor)?;
		self.add_constant(PoolEntry::FieldRef { class_index, name_and_type_index })
	}

	/// `interface` selects an `InterfaceMethodref` instead of a `Methodref`.
	pub fn put_method_ref(&mut self, owner: &str, name: &str, descriptor: &str, interface: bool) -> Result<u16, ClassFileError> {
		let class_index = self.put_class(owner)?;
		let name_and_type_index = self.put_name_and_type(name, descriptor)?;
		if interface {
			self.add_constant(PoolEntry::InterfaceMethodRef { class_index, name_and_type_index })
		} else {
			self.add_constant(PoolEntry::MethodRef { class_index, name_and_type_index })
		}
	}

	pub fn utf8(&self, index: u16) -> Option<&[u8]> {
		match self.get(index)? {
			PoolEntry::Utf8 { bytes } => Some(bytes),
			_ => None,
		}
	}

	/// Decodes a `CONSTANT_Utf8` for display; missing entries show up as `<#index>`.
	pub fn utf8_display(&self, index: u16) -> String {
		self.utf8(index)
			.map(jstring::display)
			.unwrap_or_else(|| format!("<#{index}>"))
	}

	/// Whether the entry at `index` is a `CONSTANT_Utf8` equal to `string`.
	pub fn utf8_is(&self, index: u16, string: &str) -> bool {
		self.utf8(index).is_some_and(|bytes| bytes == string.as_bytes() || bytes == jstring::encode(string).as_slice())
	}

	pub fn class_name(&self, index: u16) -> Option<&[u8]> {
		match *self.get(index)? {
			PoolEntry::Class { name_index } => self.utf8(name_index),
			_ => None,
		}
	}

	pub fn name_and_type(&self, index: u16) -> Option<(&[u8], &[u8])> {
		match *self.get(index)? {
			PoolEntry::NameAndType { name_index, descriptor_index } => Some((self.utf8(name_index)?, self.utf8(descriptor_index)?)),
			_ => None,
		}
	}

	pub fn member_ref(&self, index: u16) -> Option<MemberRef<'_>> {
		let (kind, class_index, name_and_type_index) = match *self.get(index)? {
			PoolEntry::FieldRef { class_index, name_and_type_index } => (MemberKind::Field, class_index, name_and_type_index),
			PoolEntry::MethodRef { class_index, name_and_type_index } => (MemberKind::Method, class_index, name_and_type_index),
			PoolEntry::InterfaceMethodRef { class_index, name_and_type_index } => (MemberKind::InterfaceMethod, class_index, name_and_type_index),
			_ => return None,
		};
		let owner = self.class_name(class_index)?;
		let (name, descriptor) = self.name_and_type(name_and_type_index)?;
		Some(MemberRef { kind, owner, name, descriptor })
	}

	/// The name and descriptor of an `InvokeDynamic` or `Dynamic` entry.
	pub fn dynamic_name_and_type(&self, index: u16) -> Option<(&[u8], &[u8])> {
		match *self.get(index)? {
			PoolEntry::Dynamic { name_and_type_index, .. } |
			PoolEntry::InvokeDynamic { name_and_type_index, .. } => self.name_and_type(name_and_type_index),
			_ => None,
		}
	}
}

fn read_entry(reader: &mut ByteReader, index: u16) -> Result<PoolEntry, ClassFileError> {
	let tag = reader.read_u8()?;
	Ok(match tag {
		pool::UTF8 => {
			let length = reader.read_u16_as_usize()?;
			PoolEntry::Utf8 { bytes: reader.read_slice(length)?.to_vec() }
		},
		pool::INTEGER => PoolEntry::Integer { bytes: reader.read_i32()? },
		pool::FLOAT => PoolEntry::Float { bytes: reader.read_u32()? },
		pool::LONG => PoolEntry::Long { bytes: reader.read_i64()? },
		pool::DOUBLE => PoolEntry::Double { bytes: reader.read_u64()? },
		pool::CLASS => PoolEntry::Class { name_index: reader.read_u16()? },
		pool::STRING => PoolEntry::String { string_index: reader.read_u16()? },
		pool::FIELD_REF => PoolEntry::FieldRef {
			class_index: reader.read_u16()?,
			name_and_type_index: reader.read_u16()?,
		},
		pool::METHOD_REF => PoolEntry::MethodRef {
			class_index: reader.read_u16()?,
			name_and_type_index: reader.read_u16()?,
		},
		pool::INTERFACE_METHOD_REF => PoolEntry::InterfaceMethodRef {
			class_index: reader.read_u16()?,
			name_and_type_index: reader.read_u16()?,
		},
		pool::NAME_AND_TYPE => PoolEntry::NameAndType {
			name_index: reader.read_u16()?,
			descriptor_index: reader.read_u16()?,
		},
		pool::METHOD_HANDLE => PoolEntry::MethodHandle {
			reference_kind: reader.read_u8()?,
			reference_index: reader.read_u16()?,
		},
		pool::METHOD_TYPE => PoolEntry::MethodType { descriptor_index: reader.read_u16()? },
		pool::DYNAMIC => PoolEntry::Dynamic {
			bootstrap_method_attribute_index: reader.read_u16()?,
			name_and_type_index: reader.read_u16()?,
		},
		pool::INVOKE_DYNAMIC => PoolEntry::InvokeDynamic {
			bootstrap_method_attribute_index: reader.read_u16()?,
			name_and_type_index: reader.read_u16()?,
		},
		pool::MODULE => PoolEntry::Module { name_index: reader.read_u16()? },
		pool::PACKAGE => PoolEntry::Package { name_index: reader.read_u16()? },
		tag => return Err(malformed!("unknown constant pool tag {tag} at index {index}")),
	})
}

#[cfg(test)]
mod testing {
	use anyhow::Result;
	use pretty_assertions::assert_eq;
	use crate::bytes::ByteReader;
	use crate::pool::{ConstantPool, MemberKind, PoolEntry};
	use crate::ClassFileError;

	#[test]
	fn add_constant_deduplicates() -> Result<()> {
		let mut pool = ConstantPool::new();
		let a = pool.put_method_ref("java/io/PrintStream", "println", "(Ljava/lang/String;)V", false)?;
		let count = pool.count();
		let b = pool.put_method_ref("java/io/PrintStream", "println", "(Ljava/lang/String;)V", false)?;
		assert_eq!(a, b);
		assert_eq!(pool.count(), count);

		let interface = pool.put_method_ref("java/io/PrintStream", "println", "(Ljava/lang/String;)V", true)?;
		assert_ne!(a, interface);

		let member = pool.member_ref(interface).unwrap();
		assert_eq!(member.kind, MemberKind::InterfaceMethod);
		assert!(member.is("java/io/PrintStream", "println", "(Ljava/lang/String;)V"));
		assert_eq!(member.to_string(), "java/io/PrintStream.println:(Ljava/lang/String;)V");
		Ok(())
	}

	#[test]
	fn wide_entries_take_two_slots() -> Result<()> {
		let mut pool = ConstantPool::new();
		assert_eq!(pool.put_long(7)?, 1);
		assert_eq!(pool.put_integer(7)?, 3);
		assert_eq!(pool.get(2), None);
		assert_eq!(pool.count(), 4);
		assert_eq!(pool.iter().map(|(i, _)| i).collect::<Vec<_>>(), vec![1, 3]);
		Ok(())
	}

	#[test]
	fn read_keeps_first_duplicate() -> Result<()> {
		// two identical utf8 entries, as some obfuscators emit
		let data = [
			0x00, 0x03,
			0x01, 0x00, 0x01, b'a',
			0x01, 0x00, 0x01, b'a',
		];
		let mut pool = ConstantPool::read(&mut ByteReader::new(&data))?;
		assert_eq!(pool.count(), 3);
		assert_eq!(pool.put_utf8("a")?, 1);

		let mut written = Vec::new();
		pool.write(&mut written)?;
		assert_eq!(written, data);
		Ok(())
	}

	#[test]
	fn bad_reference_is_malformed() {
		// a class entry pointing to an integer
		let data = [
			0x00, 0x03,
			0x07, 0x00, 0x02,
			0x03, 0x00, 0x00, 0x00, 0x2a,
		];
		let result = ConstantPool::read(&mut ByteReader::new(&data));
		assert!(matches!(result, Err(ClassFileError::MalformedFormat(_))), "{result:?}");
	}

	#[test]
	fn unknown_tag_is_malformed() {
		let data = [0x00, 0x02, 0x02, 0x00];
		let result = ConstantPool::read(&mut ByteReader::new(&data));
		assert!(matches!(result, Err(ClassFileError::MalformedFormat(_))), "{result:?}");
	}

	#[test]
	fn overflow() -> Result<()> {
		let mut pool = ConstantPool::new();
		for i in 0..(u16::MAX as i32 - 1) {
			pool.put_integer(i)?;
		}
		assert_eq!(pool.count(), u16::MAX);
		assert!(matches!(pool.put_integer(-1), Err(ClassFileError::PoolOverflow(_))));
		// existing entries are still found
		assert_eq!(pool.put_integer(0)?, 1);
		assert_eq!(pool.get(1), Some(&PoolEntry::Integer { bytes: 0 }));
		Ok(())
	}
}
