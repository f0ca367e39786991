use std::io::Write;
use anyhow::Result;
use classfile::jstring;
use classfile::model::{ClassModel, MethodAttribute};
use classfile::pool::{ConstantPool, PoolEntry};

fn describe(entry: &PoolEntry) -> String {
	match entry {
		PoolEntry::Utf8 { bytes } => format!("Utf8 {:?}", jstring::display(bytes)),
		PoolEntry::Integer { bytes } => format!("Integer {bytes}"),
		PoolEntry::Float { bytes } => format!("Float {}", f32::from_bits(*bytes)),
		PoolEntry::Long { bytes } => format!("Long {bytes}"),
		PoolEntry::Double { bytes } => format!("Double {}", f64::from_bits(*bytes)),
		entry => format!("{entry:?}"),
	}
}

fn class_name(pool: &ConstantPool, index: u16) -> String {
	pool.class_name(index).map_or_else(|| format!("#{index}"), jstring::display)
}

/// Prints the constant pool, the members and the disassembled code of a class.
pub(crate) fn dump(class: &ClassModel, out: &mut impl Write) -> Result<()> {
	let pool = &class.pool;

	writeln!(out, "class {} (version {}.{}, access {:#06x})",
		class.name_display(), class.major_version, class.minor_version, class.access)?;
	if class.super_class != 0 {
		writeln!(out, "  extends {}", class_name(pool, class.super_class))?;
	}
	for &interface in &class.interfaces {
		writeln!(out, "  implements {}", class_name(pool, interface))?;
	}

	writeln!(out, "constant pool:")?;
	for (index, entry) in pool.iter() {
		writeln!(out, "  #{index} = {}", describe(entry))?;
	}

	writeln!(out, "fields:")?;
	for field in &class.fields {
		writeln!(out, "  {:#06x} {} {}", field.access, pool.utf8_display(field.name_index), pool.utf8_display(field.descriptor_index))?;
	}

	writeln!(out, "methods:")?;
	for method in &class.methods {
		writeln!(out, "  {:#06x} {}", method.access, method.signature(pool))?;
		for attribute in &method.attributes {
			match attribute {
				MethodAttribute::Code(code) => {
					writeln!(out, "    max_stack {}, max_locals {}", code.max_stack, code.max_locals)?;
					for (index, insn) in code.instructions().iter().enumerate() {
						writeln!(out, "    {index:4}: {}", insn.instruction.display(pool))?;
					}
					for handler in code.exception_table() {
						let catch = if handler.catch_type == 0 {
							"any".to_owned()
						} else {
							class_name(pool, handler.catch_type)
						};
						writeln!(out, "    catch {catch} from {} to {:?} at {}", handler.start, handler.end, handler.handler)?;
					}
				},
				MethodAttribute::Other(raw) => {
					writeln!(out, "    attribute {} ({} bytes)", pool.utf8_display(raw.name_index), raw.info.len())?;
				},
			}
		}
	}
	Ok(())
}
