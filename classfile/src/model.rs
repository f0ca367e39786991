//! The mutable in-memory form of a class file.

use log::trace;
use crate::code::{encode, Code, CodeAttribute};
use crate::constants::{access, attribute, FRAMES_MAJOR_VERSION};
use crate::frames::{self, MethodContext};
use crate::hierarchy::ClassHierarchy;
use crate::pool::ConstantPool;
use crate::{jstring, ClassFileError, VerifyError};

/// An attribute kept as its undecoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
	pub name_index: u16,
	pub info: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
	pub access: u16,
	pub name_index: u16,
	pub descriptor_index: u16,
	pub attributes: Vec<RawAttribute>,
}

impl Field {
	pub fn is(&self, pool: &ConstantPool, name: &str, descriptor: &str) -> bool {
		pool.utf8_is(self.name_index, name) && pool.utf8_is(self.descriptor_index, descriptor)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum MethodAttribute {
	Code(Code),
	Other(RawAttribute),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Method {
	pub access: u16,
	pub name_index: u16,
	pub descriptor_index: u16,
	/// All attributes in their original order.
	pub attributes: Vec<MethodAttribute>,
}

impl Method {
	pub fn is_static(&self) -> bool {
		self.access & access::ACC_STATIC != 0
	}

	pub fn is(&self, pool: &ConstantPool, name: &str, descriptor: &str) -> bool {
		pool.utf8_is(self.name_index, name) && pool.utf8_is(self.descriptor_index, descriptor)
	}

	/// `name descriptor`, as used in error messages and reports.
	pub fn signature(&self, pool: &ConstantPool) -> String {
		format!("{} {}", pool.utf8_display(self.name_index), pool.utf8_display(self.descriptor_index))
	}

	pub fn code(&self) -> Option<&Code> {
		self.attributes.iter().find_map(|attribute| match attribute {
			MethodAttribute::Code(code) => Some(code),
			MethodAttribute::Other(_) => None,
		})
	}

	pub fn code_mut(&mut self) -> Option<&mut Code> {
		self.attributes.iter_mut().find_map(|attribute| match attribute {
			MethodAttribute::Code(code) => Some(code),
			MethodAttribute::Other(_) => None,
		})
	}

	/// Replaces the code of the method, or adds it where there was none.
	pub fn set_code(&mut self, code: Code) {
		match self.code_mut() {
			Some(old) => *old = code,
			None => self.attributes.push(MethodAttribute::Code(code)),
		}
	}

	fn context(&self, this_class: &[u8], pool: &ConstantPool) -> Result<MethodContext, VerifyError> {
		let name = pool.utf8(self.name_index)
			.ok_or_else(|| VerifyError::new(format!("method name index {} is not a Utf8 entry", self.name_index)))?;
		let descriptor = pool.utf8(self.descriptor_index)
			.ok_or_else(|| VerifyError::new(format!("method descriptor index {} is not a Utf8 entry", self.descriptor_index)))?;
		Ok(MethodContext {
			this_class: this_class.to_vec(),
			name: name.to_vec(),
			descriptor: descriptor.to_vec(),
			is_static: self.is_static(),
		})
	}

	/// Recomputes `max_stack`, `max_locals` and the frames of modified code, and encodes it again.
	///
	/// Does nothing if the code is unmodified or already encoded.
	pub fn recompute(
		&mut self,
		this_class: &[u8],
		pool: &mut ConstantPool,
		major_version: u16,
		hierarchy: &dyn ClassHierarchy,
	) -> Result<(), VerifyError> {
		let signature = self.signature(pool);
		let context = self.context(this_class, pool).map_err(|e| e.in_method(&signature))?;
		let Some(code) = self.code_mut() else {
			return Ok(());
		};
		if code.encoded().is_some() {
			return Ok(());
		}
		trace!("recomputing {signature}");

		recompute_code(code, &context, pool, major_version, hierarchy)
			.map_err(|e| e.in_method(signature))
	}
}

fn recompute_code(
	code: &mut Code,
	context: &MethodContext,
	pool: &mut ConstantPool,
	major_version: u16,
	hierarchy: &dyn ClassHierarchy,
) -> Result<(), VerifyError> {
	let mut analysis = frames::analyze(code, context, pool, hierarchy)?;
	if analysis.has_dead_code() {
		frames::replace_dead_code(code, &mut analysis);
	}
	code.max_stack = analysis.max_stack;
	code.max_locals = analysis.max_locals;

	let encoded = encode::encode_instructions(code.instructions(), pool)?;

	let stack_map = if major_version >= FRAMES_MAJOR_VERSION {
		let initial = context.initial_frame().map_err(VerifyError::new)?;
		match frames::write_stack_map_table(code, &analysis, &initial, &encoded, pool)? {
			Some(body) => {
				let name_index = code.attributes.iter()
					.find_map(|attribute| match attribute {
						CodeAttribute::StackMapTable { name_index, .. } => Some(*name_index),
						_ => None,
					});
				let name_index = match name_index {
					Some(name_index) => name_index,
					None => pool.put_utf8(attribute::STACK_MAP_TABLE)?,
				};
				Some((name_index, body))
			},
			None => None,
		}
	} else {
		None
	};

	let body = encode::write_code_attribute(code, &encoded, stack_map)?;
	code.set_encoded(body);
	Ok(())
}

/// A class file. Everything is kept as pool indices, so that unmodified parts are written back
/// exactly as they were read.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassModel {
	pub minor_version: u16,
	pub major_version: u16,
	pub pool: ConstantPool,
	pub access: u16,
	pub this_class: u16,
	/// `0` for `java/lang/Object`.
	pub super_class: u16,
	pub interfaces: Vec<u16>,
	pub fields: Vec<Field>,
	pub methods: Vec<Method>,
	pub attributes: Vec<RawAttribute>,
}

impl ClassModel {
	/// The internal name of this class.
	pub fn name(&self) -> Option<&[u8]> {
		self.pool.class_name(self.this_class)
	}

	pub fn name_display(&self) -> String {
		self.name().map(jstring::display).unwrap_or_else(|| format!("<#{}>", self.this_class))
	}

	pub fn super_name(&self) -> Option<&[u8]> {
		self.pool.class_name(self.super_class)
	}

	pub fn is_interface(&self) -> bool {
		self.access & access::ACC_INTERFACE != 0
	}

	pub fn method_index(&self, name: &str, descriptor: &str) -> Option<usize> {
		self.methods.iter().position(|method| method.is(&self.pool, name, descriptor))
	}

	pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&Method> {
		self.method_index(name, descriptor).map(|i| &self.methods[i])
	}

	pub fn find_method_mut(&mut self, name: &str, descriptor: &str) -> Option<&mut Method> {
		self.method_index(name, descriptor).map(|i| &mut self.methods[i])
	}

	pub fn field_index(&self, name: &str, descriptor: &str) -> Option<usize> {
		self.fields.iter().position(|field| field.is(&self.pool, name, descriptor))
	}

	/// Creates empty code for a method of this class.
	pub fn new_code(&mut self) -> Result<Code, ClassFileError> {
		Ok(Code::new(self.pool.put_utf8(attribute::CODE)?))
	}

	/// Appends a method, returning its index. Doesn't check for an existing method with the same signature.
	pub fn add_method(&mut self, access: u16, name: &str, descriptor: &str, code: Option<Code>) -> Result<usize, ClassFileError> {
		let name_index = self.pool.put_utf8(name)?;
		let descriptor_index = self.pool.put_utf8(descriptor)?;
		let attributes = code.into_iter().map(MethodAttribute::Code).collect();
		self.methods.push(Method { access, name_index, descriptor_index, attributes });
		Ok(self.methods.len() - 1)
	}

	/// Appends a field, returning its index. Doesn't check for an existing field with the same signature.
	pub fn add_field(&mut self, access: u16, name: &str, descriptor: &str) -> Result<usize, ClassFileError> {
		let name_index = self.pool.put_utf8(name)?;
		let descriptor_index = self.pool.put_utf8(descriptor)?;
		self.fields.push(Field { access, name_index, descriptor_index, attributes: Vec::new() });
		Ok(self.fields.len() - 1)
	}

	/// Whether any method has code that needs to be encoded again.
	pub fn is_dirty(&self) -> bool {
		self.methods.iter()
			.filter_map(Method::code)
			.any(|code| code.encoded().is_none())
	}

	/// Runs [`Method::recompute`] on every method with modified code. Returns how many were recomputed.
	pub fn recompute_dirty(&mut self, hierarchy: &dyn ClassHierarchy) -> Result<usize, VerifyError> {
		let this_class = self.name()
			.ok_or_else(|| VerifyError::new(format!("this class index {} is not a class", self.this_class)))?
			.to_vec();

		let mut count = 0;
		for method in &mut self.methods {
			if method.code().is_some_and(|code| code.encoded().is_none()) {
				method.recompute(&this_class, &mut self.pool, self.major_version, hierarchy)?;
				count += 1;
			}
		}
		Ok(count)
	}
}

#[cfg(test)]
mod testing {
	use anyhow::Result;
	use pretty_assertions::assert_eq;
	use crate::code::Instruction;
	use crate::constants::{access, opcode};
	use crate::hierarchy::DefaultHierarchy;
	use crate::model::ClassModel;
	use crate::pool::ConstantPool;

	fn empty_class() -> Result<ClassModel> {
		let mut pool = ConstantPool::new();
		let this_class = pool.put_class("Player")?;
		let super_class = pool.put_class("java/lang/Object")?;
		Ok(ClassModel {
			minor_version: 0,
			major_version: 52,
			pool,
			access: access::ACC_PUBLIC,
			this_class,
			super_class,
			interfaces: Vec::new(),
			fields: Vec::new(),
			methods: Vec::new(),
			attributes: Vec::new(),
		})
	}

	#[test]
	fn add_and_recompute() -> Result<()> {
		let mut class = empty_class()?;
		let mut code = class.new_code()?;
		let insns = code.with_new_ids([
			Instruction::Plain(opcode::ICONST_2),
			Instruction::Plain(opcode::ICONST_3),
			Instruction::Plain(opcode::IADD),
			Instruction::Plain(opcode::IRETURN),
		]);
		code.replace_instructions(insns, Vec::new());
		let index = class.add_method(access::ACC_PUBLIC | access::ACC_STATIC, "five", "()I", Some(code))?;
		class.add_field(access::ACC_PRIVATE, "health", "I")?;

		assert!(class.is_dirty());
		assert_eq!(class.recompute_dirty(&DefaultHierarchy)?, 1);
		assert!(!class.is_dirty());

		let method = &class.methods[index];
		assert_eq!(method.signature(&class.pool), "five ()I");
		let code = method.code().unwrap();
		assert_eq!((code.max_stack, code.max_locals), (2, 0));
		// max_stack, max_locals, code_length, code, no handlers, no attributes
		assert_eq!(code.encoded(), Some(&[
			0, 2, 0, 0, 0, 0, 0, 4,
			opcode::ICONST_2, opcode::ICONST_3, opcode::IADD, opcode::IRETURN,
			0, 0, 0, 0,
		][..]));

		assert_eq!(class.field_index("health", "I"), Some(0));
		assert!(class.find_method("five", "()I").is_some());
		assert!(class.find_method("five", "()J").is_none());
		Ok(())
	}

	#[test]
	fn recompute_reports_method() -> Result<()> {
		let mut class = empty_class()?;
		let mut code = class.new_code()?;
		let insns = code.with_new_ids([Instruction::Plain(opcode::IRETURN)]);
		code.replace_instructions(insns, Vec::new());
		class.add_method(access::ACC_STATIC, "broken", "()I", Some(code))?;

		let error = class.recompute_dirty(&DefaultHierarchy).unwrap_err();
		assert_eq!(error.method.as_deref(), Some("broken ()I"));
		assert_eq!(error.instruction, Some(0));
		Ok(())
	}
}
