use crate::bytes::ClassWrite;
use crate::constants::MAGIC;
use crate::model::{ClassModel, MethodAttribute, RawAttribute};
use crate::ClassFileError;

/// Writes a class file.
///
/// Unmodified code is written exactly as it was read. Modified code must have been encoded again
/// by [`ClassModel::recompute_dirty`] first, which happens as part of [`crate::verify`]ing a class.
/// A verified class is always written successfully.
pub fn serialize(class: &ClassModel) -> Result<Vec<u8>, ClassFileError> {
	let mut w = Vec::new();

	w.write_u32(MAGIC);
	w.write_u16(class.minor_version);
	w.write_u16(class.major_version);

	class.pool.write(&mut w)?;

	w.write_u16(class.access);
	w.write_u16(class.this_class);
	w.write_u16(class.super_class);
	w.write_slice(&class.interfaces, |w, &interface| {
		w.write_u16(interface);
		Ok(())
	})?;

	w.write_slice(&class.fields, |w, field| {
		w.write_u16(field.access);
		w.write_u16(field.name_index);
		w.write_u16(field.descriptor_index);
		write_attributes(w, &field.attributes)
	})?;

	w.write_slice(&class.methods, |w, method| {
		w.write_u16(method.access);
		w.write_u16(method.name_index);
		w.write_u16(method.descriptor_index);
		w.write_slice(&method.attributes, |w, attribute| match attribute {
			MethodAttribute::Code(code) => {
				let encoded = code.encoded()
					.ok_or_else(|| ClassFileError::Encoding(format!(
						"code of method {} was modified, but not encoded again", method.signature(&class.pool)
					)))?;
				write_attribute(w, code.name_index, encoded)
			},
			MethodAttribute::Other(raw) => write_attribute(w, raw.name_index, &raw.info),
		})
	})?;

	write_attributes(&mut w, &class.attributes)?;

	Ok(w)
}

fn write_attribute(w: &mut Vec<u8>, name_index: u16, info: &[u8]) -> Result<(), ClassFileError> {
	w.write_u16(name_index);
	w.write_usize_as_u32(info.len())?;
	w.write_u8_slice(info);
	Ok(())
}

fn write_attributes(w: &mut Vec<u8>, attributes: &[RawAttribute]) -> Result<(), ClassFileError> {
	w.write_slice(attributes, |w, attribute| write_attribute(w, attribute.name_index, &attribute.info))
}
