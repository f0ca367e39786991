use log::trace;
use crate::bytes::{ByteReader, ClassRead};
use crate::code::read_code;
use crate::constants::{attribute, MAGIC, MAX_MAJOR_VERSION, MIN_MAJOR_VERSION};
use crate::error::malformed;
use crate::model::{ClassModel, Field, Method, MethodAttribute, RawAttribute};
use crate::pool::{ConstantPool, PoolEntry};
use crate::ClassFileError;

/// Parses a class file.
///
/// Method code is decoded into instructions. All other attributes are kept as raw bytes.
pub fn parse(bytes: &[u8]) -> Result<ClassModel, ClassFileError> {
	let mut reader = ByteReader::new(bytes);

	let magic = reader.read_u32()?;
	if magic != MAGIC {
		return Err(malformed!("wrong magic {magic:#010x}, expected {MAGIC:#010x}"));
	}
	let minor_version = reader.read_u16()?;
	let major_version = reader.read_u16()?;
	if !(MIN_MAJOR_VERSION..=MAX_MAJOR_VERSION).contains(&major_version) {
		return Err(malformed!("unsupported class file version {major_version}.{minor_version}"));
	}

	let pool = ConstantPool::read(&mut reader)?;

	let access = reader.read_u16()?;
	let this_class = read_class_index(&mut reader, &pool, "this class")?;
	let super_class = reader.read_u16()?;
	if super_class != 0 && pool.class_name(super_class).is_none() {
		return Err(malformed!("super class index {super_class} is not a class"));
	}
	let interfaces = reader.read_vec(
		|r| r.read_u16_as_usize(),
		|r| read_class_index(r, &pool, "interface"),
	)?;

	let fields = reader.read_vec(
		|r| r.read_u16_as_usize(),
		|r| Ok(Field {
			access: r.read_u16()?,
			name_index: read_utf8_index(r, &pool, "field name")?,
			descriptor_index: read_utf8_index(r, &pool, "field descriptor")?,
			attributes: read_attributes(r, &pool)?,
		}),
	)?;

	let methods = reader.read_vec(
		|r| r.read_u16_as_usize(),
		|r| read_method(r, &pool),
	)?;

	let attributes = read_attributes(&mut reader, &pool)?;

	if !reader.is_empty() {
		return Err(malformed!("{} extra bytes after the end of the class file", reader.remaining()));
	}

	let class = ClassModel {
		minor_version,
		major_version,
		pool,
		access,
		this_class,
		super_class,
		interfaces,
		fields,
		methods,
		attributes,
	};
	trace!("parsed {} with {} fields and {} methods", class.name_display(), class.fields.len(), class.methods.len());
	Ok(class)
}

fn read_class_index(reader: &mut ByteReader, pool: &ConstantPool, what: &str) -> Result<u16, ClassFileError> {
	let index = reader.read_u16()?;
	match pool.get(index) {
		Some(PoolEntry::Class { .. }) => Ok(index),
		_ => Err(malformed!("{what} index {index} is not a class")),
	}
}

fn read_utf8_index(reader: &mut ByteReader, pool: &ConstantPool, what: &str) -> Result<u16, ClassFileError> {
	let index = reader.read_u16()?;
	match pool.get(index) {
		Some(PoolEntry::Utf8 { .. }) => Ok(index),
		_ => Err(malformed!("{what} index {index} is not a Utf8 entry")),
	}
}

fn read_attribute<'a>(reader: &mut ByteReader<'a>, pool: &ConstantPool) -> Result<(u16, ByteReader<'a>), ClassFileError> {
	let name_index = read_utf8_index(reader, pool, "attribute name")?;
	let length = reader.read_u32_as_usize()?;
	Ok((name_index, reader.sub_reader(length)?))
}

fn read_attributes(reader: &mut ByteReader, pool: &ConstantPool) -> Result<Vec<RawAttribute>, ClassFileError> {
	reader.read_vec(
		|r| r.read_u16_as_usize(),
		|r| {
			let (name_index, info) = read_attribute(r, pool)?;
			Ok(RawAttribute { name_index, info: info.rest().to_vec() })
		},
	)
}

fn read_method(reader: &mut ByteReader, pool: &ConstantPool) -> Result<Method, ClassFileError> {
	let access = reader.read_u16()?;
	let name_index = read_utf8_index(reader, pool, "method name")?;
	let descriptor_index = read_utf8_index(reader, pool, "method descriptor")?;

	let mut has_code = false;
	let attributes = reader.read_vec(
		|r| r.read_u16_as_usize(),
		|r| {
			let (attribute_name, mut info) = read_attribute(r, pool)?;
			if pool.utf8_is(attribute_name, attribute::CODE) {
				if has_code {
					return Err(malformed!("method {} has more than one Code attribute", pool.utf8_display(name_index)));
				}
				has_code = true;
				Ok(MethodAttribute::Code(read_code(&mut info, attribute_name, pool)?))
			} else {
				Ok(MethodAttribute::Other(RawAttribute { name_index: attribute_name, info: info.rest().to_vec() }))
			}
		},
	)?;

	Ok(Method { access, name_index, descriptor_index, attributes })
}
