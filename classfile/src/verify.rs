//! Checks a class model before it's written.

use std::collections::HashSet;
use crate::code::{Code, Instruction};
use crate::constants::opcode;
use crate::descriptor;
use crate::frames;
use crate::hierarchy::ClassHierarchy;
use crate::model::{ClassModel, Method};
use crate::pool::{ConstantPool, PoolEntry};
use crate::VerifyError;

/// Verifies a class model.
///
/// The checks, in order:
/// 1. all references into the constant pool point at entries of the right kind,
/// 2. for modified code: the stack never underflows or grows past `max_stack`, locals stay below
///    `max_locals`, and every jump goes to an instruction of the method,
/// 3. no two fields and no two methods share name and descriptor.
///
/// Modified code must have been recomputed with [`ClassModel::recompute_dirty`] first.
pub fn verify(class: &ClassModel, hierarchy: &dyn ClassHierarchy) -> Result<(), VerifyError> {
	let pool = &class.pool;

	check_class_references(class)?;
	for field in &class.fields {
		let descriptor = pool.utf8(field.descriptor_index)
			.ok_or_else(|| VerifyError::new(format!("field descriptor index {} is not a Utf8 entry", field.descriptor_index)))?;
		if pool.utf8(field.name_index).is_none() || descriptor::field_type(descriptor).is_none() {
			return Err(VerifyError::new(format!("field `{} {}` has an invalid name or descriptor",
				pool.utf8_display(field.name_index), pool.utf8_display(field.descriptor_index))));
		}
	}
	for method in &class.methods {
		check_method_references(method, pool)
			.map_err(|e| e.in_method(method.signature(pool)))?;
	}

	let this_class = class.name()
		.ok_or_else(|| VerifyError::new("this class is not a class entry"))?;
	for method in &class.methods {
		let Some(code) = method.code() else {
			continue;
		};
		if !code.is_modified() {
			continue;
		}
		let signature = method.signature(pool);
		let context = frames::MethodContext {
			this_class: this_class.to_vec(),
			name: pool.utf8(method.name_index).unwrap_or_default().to_vec(),
			descriptor: pool.utf8(method.descriptor_index).unwrap_or_default().to_vec(),
			is_static: method.is_static(),
		};
		let analysis = frames::analyze(code, &context, pool, hierarchy)
			.map_err(|e| e.in_method(&signature))?;
		if analysis.max_stack > code.max_stack {
			return Err(VerifyError::new(format!("needs a stack of {} words, but max_stack is {}", analysis.max_stack, code.max_stack))
				.in_method(signature));
		}
		if analysis.max_locals > code.max_locals {
			return Err(VerifyError::new(format!("needs {} local slots, but max_locals is {}", analysis.max_locals, code.max_locals))
				.in_method(signature));
		}
	}

	check_duplicates(class)
}

fn check_class_references(class: &ClassModel) -> Result<(), VerifyError> {
	let pool = &class.pool;
	let is_class = |index: u16| matches!(pool.get(index), Some(PoolEntry::Class { .. }));

	if !is_class(class.this_class) {
		return Err(VerifyError::new(format!("this class index {} is not a class", class.this_class)));
	}
	if class.super_class != 0 && !is_class(class.super_class) {
		return Err(VerifyError::new(format!("super class index {} is not a class", class.super_class)));
	}
	if let Some(interface) = class.interfaces.iter().find(|&&index| !is_class(index)) {
		return Err(VerifyError::new(format!("interface index {interface} is not a class")));
	}
	Ok(())
}

fn check_method_references(method: &Method, pool: &ConstantPool) -> Result<(), VerifyError> {
	let descriptor = pool.utf8(method.descriptor_index)
		.ok_or_else(|| VerifyError::new(format!("method descriptor index {} is not a Utf8 entry", method.descriptor_index)))?;
	if pool.utf8(method.name_index).is_none() || descriptor::method_type(descriptor).is_none() {
		return Err(VerifyError::new("invalid method name or descriptor"));
	}

	if let Some(code) = method.code() {
		check_code_references(code, pool)?;
	}
	Ok(())
}

fn check_code_references(code: &Code, pool: &ConstantPool) -> Result<(), VerifyError> {
	for (i, insn) in code.instructions().iter().enumerate() {
		let Some(index) = insn.instruction.pool_index() else {
			continue;
		};
		let entry = pool.get(index)
			.ok_or_else(|| VerifyError::at(i, format!("reference to missing constant #{index}")))?;

		let fits = match insn.instruction {
			Instruction::Ldc(_) => matches!(entry,
				PoolEntry::Integer { .. } | PoolEntry::Float { .. } | PoolEntry::Long { .. } | PoolEntry::Double { .. } |
				PoolEntry::String { .. } | PoolEntry::Class { .. } | PoolEntry::MethodHandle { .. } |
				PoolEntry::MethodType { .. } | PoolEntry::Dynamic { .. }
			),
			Instruction::Field { .. } => matches!(entry, PoolEntry::FieldRef { .. }),
			Instruction::Invoke { opcode: opcode::INVOKEVIRTUAL, .. } => matches!(entry, PoolEntry::MethodRef { .. }),
			Instruction::Invoke { .. } => matches!(entry, PoolEntry::MethodRef { .. } | PoolEntry::InterfaceMethodRef { .. }),
			Instruction::InvokeInterface { .. } => matches!(entry, PoolEntry::InterfaceMethodRef { .. }),
			Instruction::InvokeDynamic { .. } => matches!(entry, PoolEntry::InvokeDynamic { .. }),
			Instruction::Type { .. } | Instruction::MultiANewArray { .. } => matches!(entry, PoolEntry::Class { .. }),
			_ => true,
		};
		if !fits {
			let name = opcode::name(insn.instruction.opcode()).unwrap_or("<invalid>");
			return Err(VerifyError::at(i, format!("{name} can't refer to {} #{index}", entry.kind_name())));
		}
	}

	for handler in code.exception_table() {
		if handler.catch_type != 0 && !matches!(pool.get(handler.catch_type), Some(PoolEntry::Class { .. })) {
			return Err(VerifyError::new(format!("catch type #{} is not a class", handler.catch_type)));
		}
	}
	Ok(())
}

fn check_duplicates(class: &ClassModel) -> Result<(), VerifyError> {
	let pool = &class.pool;

	let mut fields = HashSet::new();
	for field in &class.fields {
		if !fields.insert((pool.utf8(field.name_index), pool.utf8(field.descriptor_index))) {
			return Err(VerifyError::new(format!("duplicate field `{} {}`",
				pool.utf8_display(field.name_index), pool.utf8_display(field.descriptor_index))));
		}
	}

	let mut methods = HashSet::new();
	for method in &class.methods {
		if !methods.insert((pool.utf8(method.name_index), pool.utf8(method.descriptor_index))) {
			return Err(VerifyError::new("duplicate method").in_method(method.signature(pool)));
		}
	}
	Ok(())
}
