//! Data flow analysis of method code.
//!
//! The analysis computes the types of all locals and stack slots before each instruction. From
//! these come `max_stack`, `max_locals` and the `StackMapTable`. It also finds code that can't
//! be reached, which is replaced with `nop`s and an `athrow`, since the JVM still wants valid
//! frames for it.
//!
//! Long and double values take two slots, both in the locals and on the stack: the type itself,
//! followed by a [`VerificationType::Top`].
//!
//! Where the code as read declared a frame, that frame is used for the instruction, as long as
//! the types flowing there fit into it. Other frames come from merging the incoming types, which
//! needs a [`ClassHierarchy`] for distinct classes. If it can't answer, the analysis fails.

use std::collections::{BTreeSet, HashMap};
use log::trace;
use crate::bytes::ClassWrite;
use crate::code::encode::EncodedCode;
use crate::code::{Code, ExceptionHandler, FrameKind, Insn, InsnId, Instruction, Position};
use crate::constants::{atype, opcode};
use crate::descriptor::{self, JavaType};
use crate::hierarchy::{ClassHierarchy, OBJECT};
use crate::pool::{ConstantPool, PoolEntry};
use crate::{jstring, ClassFileError, VerifyError};

const THROWABLE: &[u8] = b"java/lang/Throwable";
const CLONEABLE: &[u8] = b"java/lang/Cloneable";
const SERIALIZABLE: &[u8] = b"java/io/Serializable";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerificationType {
	Top,
	Integer,
	Float,
	Long,
	Double,
	Null,
	UninitializedThis,
	/// A class name, or the descriptor of an array type.
	Object(Vec<u8>),
	/// The result of the `new` instruction with that id, before the constructor ran.
	Uninitialized(InsnId),
}

impl VerificationType {
	fn is_reference(&self) -> bool {
		matches!(self, VerificationType::Null | VerificationType::UninitializedThis | VerificationType::Object(_) | VerificationType::Uninitialized(_))
	}

	fn is_wide(&self) -> bool {
		matches!(self, VerificationType::Long | VerificationType::Double)
	}
}

impl From<JavaType<'_>> for VerificationType {
	fn from(value: JavaType<'_>) -> Self {
		match value {
			JavaType::Int => VerificationType::Integer,
			JavaType::Float => VerificationType::Float,
			JavaType::Long => VerificationType::Long,
			JavaType::Double => VerificationType::Double,
			JavaType::Reference(name) => VerificationType::Object(name.to_vec()),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
	pub locals: Vec<VerificationType>,
	pub stack: Vec<VerificationType>,
}

impl Frame {
	/// The frame at the start of an exception handler catching `class`.
	fn catching(locals: Vec<VerificationType>, class: Vec<u8>) -> Frame {
		Frame { locals, stack: vec![VerificationType::Object(class)] }
	}

	fn push(&mut self, t: VerificationType) {
		let wide = t.is_wide();
		self.stack.push(t);
		if wide {
			self.stack.push(VerificationType::Top);
		}
	}

	fn push_type(&mut self, t: JavaType<'_>) {
		self.push(t.into());
	}

	fn pop(&mut self) -> Result<VerificationType, String> {
		self.stack.pop().ok_or_else(|| "stack underflow".to_owned())
	}

	fn pop_n(&mut self, n: usize) -> Result<(), String> {
		if self.stack.len() < n {
			return Err(format!("stack underflow: popping {n} words from a stack of {}", self.stack.len()));
		}
		self.stack.truncate(self.stack.len() - n);
		Ok(())
	}

	fn pop_type(&mut self, t: JavaType<'_>) -> Result<(), String> {
		self.pop_n(t.size() as usize)
	}

	fn load(&self, index: u16, expected: fn(&VerificationType) -> bool, what: &str) -> Result<VerificationType, String> {
		match self.locals.get(index as usize) {
			Some(t) if expected(t) => Ok(t.clone()),
			Some(t) => Err(format!("local {index} holds {t:?}, not {what}")),
			None => Err(format!("local {index} was never written")),
		}
	}

	fn store(&mut self, index: u16, t: VerificationType) {
		let index = index as usize;
		let size = if t.is_wide() { 2 } else { 1 };
		if self.locals.len() < index + size {
			self.locals.resize(index + size, VerificationType::Top);
		}
		// overwriting the second half of a long or double invalidates it
		if index > 0 && self.locals[index - 1].is_wide() {
			self.locals[index - 1] = VerificationType::Top;
		}
		self.locals[index] = t;
		if size == 2 {
			self.locals[index + 1] = VerificationType::Top;
		}
	}

	/// After a constructor call, every copy of the uninitialized value becomes initialized.
	fn initialize(&mut self, uninitialized: &VerificationType, class: &[u8]) {
		for t in self.locals.iter_mut().chain(self.stack.iter_mut()) {
			if t == uninitialized {
				*t = VerificationType::Object(class.to_vec());
			}
		}
	}
}

/// What the analysis needs to know about the method the code belongs to.
#[derive(Debug, Clone)]
pub struct MethodContext {
	pub this_class: Vec<u8>,
	pub name: Vec<u8>,
	pub descriptor: Vec<u8>,
	pub is_static: bool,
}

impl MethodContext {
	pub fn initial_frame(&self) -> Result<Frame, String> {
		let method_type = descriptor::method_type(&self.descriptor)
			.ok_or_else(|| format!("invalid method descriptor {}", jstring::display(&self.descriptor)))?;

		let mut frame = Frame { locals: Vec::new(), stack: Vec::new() };
		if !self.is_static {
			let this = if self.name == b"<init>" && self.this_class != OBJECT {
				VerificationType::UninitializedThis
			} else {
				VerificationType::Object(self.this_class.clone())
			};
			frame.locals.push(this);
		}
		for argument in method_type.arguments {
			let t: VerificationType = argument.into();
			let wide = t.is_wide();
			frame.locals.push(t);
			if wide {
				frame.locals.push(VerificationType::Top);
			}
		}
		Ok(frame)
	}
}

#[derive(Debug, Clone)]
pub struct Analysis {
	/// The frame before each instruction, `None` for unreachable instructions.
	pub frames: Vec<Option<Frame>>,
	pub max_stack: u16,
	pub max_locals: u16,
}

impl Analysis {
	pub fn has_dead_code(&self) -> bool {
		self.frames.iter().any(Option::is_none)
	}
}

/// Exception handler ranges as indices into the instruction list.
struct HandlerRange {
	start: usize,
	end: usize,
	handler: usize,
	class: Vec<u8>,
}

struct Analyzer<'a> {
	pool: &'a ConstantPool,
	context: &'a MethodContext,
	hierarchy: &'a dyn ClassHierarchy,
	insns: &'a [Insn],
	positions: HashMap<InsnId, usize>,
	/// Frames declared in the `StackMapTable`, by instruction index.
	declared: HashMap<usize, Frame>,
}

impl Analyzer<'_> {
	fn position(&self, id: InsnId) -> Result<usize, String> {
		self.positions.get(&id).copied()
			.ok_or_else(|| format!("jump to {id}, which is not an instruction of this method"))
	}

	fn handler_ranges(&self, exception_table: &[ExceptionHandler]) -> Result<Vec<HandlerRange>, VerifyError> {
		exception_table.iter()
			.map(|handler| {
				let start = self.position(handler.start).map_err(VerifyError::new)?;
				let end = match handler.end {
					Position::At(id) => self.position(id).map_err(VerifyError::new)?,
					Position::End => self.insns.len(),
				};
				let handler_index = self.position(handler.handler).map_err(VerifyError::new)?;
				let class = match handler.catch_type {
					0 => THROWABLE.to_vec(),
					index => self.pool.class_name(index)
						.ok_or_else(|| VerifyError::at(handler_index, format!("catch type {index} is not a class")))?
						.to_vec(),
				};
				Ok(HandlerRange { start, end, handler: handler_index, class })
			})
			.collect()
	}

	/// The most specific type both class names or array descriptors are assignable to.
	fn common_reference(&self, a: &[u8], b: &[u8]) -> Option<Vec<u8>> {
		if a == b {
			return Some(a.to_vec());
		}
		if a == OBJECT || b == OBJECT {
			return Some(OBJECT.to_vec());
		}
		match (descriptor::array_element(a), descriptor::array_element(b)) {
			(Some(x), Some(y)) => match (element_class(x), element_class(y)) {
				(Some(x), Some(y)) => {
					let mut array = vec![b'['];
					array.extend(descriptor::class_to_descriptor(&self.common_reference(x, y)?));
					Some(array)
				},
				// arrays of different primitives
				_ => Some(OBJECT.to_vec()),
			},
			(Some(_), None) | (None, Some(_)) => Some(OBJECT.to_vec()),
			(None, None) => self.hierarchy.common_super_class(a, b),
		}
	}

	fn assignable_reference(&self, from: &[u8], to: &[u8]) -> Option<bool> {
		if from == to || to == OBJECT {
			return Some(true);
		}
		match (descriptor::array_element(from), descriptor::array_element(to)) {
			(Some(from_element), Some(to_element)) => match (element_class(from_element), element_class(to_element)) {
				(Some(x), Some(y)) => self.assignable_reference(x, y),
				_ => Some(false),
			},
			(Some(_), None) => Some(to == CLONEABLE || to == SERIALIZABLE),
			(None, Some(_)) => Some(false),
			(None, None) => self.hierarchy.is_assignable(from, to),
		}
	}

	/// Whether a `from` may be stored where the type `to` is declared. Classes the hierarchy
	/// doesn't know are trusted to fit.
	fn is_assignable(&self, from: &VerificationType, to: &VerificationType) -> bool {
		match (from, to) {
			(_, VerificationType::Top) => true,
			(a, b) if a == b => true,
			(VerificationType::Null, VerificationType::Object(_)) => true,
			(VerificationType::Object(a), VerificationType::Object(b)) => self.assignable_reference(a, b) != Some(false),
			_ => false,
		}
	}

	fn merge_type(&self, a: &VerificationType, b: &VerificationType) -> Result<VerificationType, String> {
		match (a, b) {
			(a, b) if a == b => Ok(a.clone()),
			(VerificationType::Null, VerificationType::Object(x)) |
			(VerificationType::Object(x), VerificationType::Null) => Ok(VerificationType::Object(x.clone())),
			(VerificationType::Object(x), VerificationType::Object(y)) => self.common_reference(x, y)
				.map(VerificationType::Object)
				.ok_or_else(|| format!("can't find a common super class of {} and {}", jstring::display(x), jstring::display(y))),
			(a, b) => Err(format!("incompatible types {a:?} and {b:?}")),
		}
	}

	/// Replaces the incoming frame with the declared one, after checking that it fits. Locals the
	/// declared frame doesn't mention are kept.
	fn seed(&self, declared: &Frame, incoming: Frame) -> Result<Frame, String> {
		if declared.stack.len() != incoming.stack.len() {
			return Err(format!("stack height {} doesn't match the declared frame's {}", incoming.stack.len(), declared.stack.len()));
		}
		for (slot, (t, d)) in incoming.stack.iter().zip(&declared.stack).enumerate() {
			if !self.is_assignable(t, d) {
				return Err(format!("stack slot {slot} holds {t:?}, but the declared frame has {d:?}"));
			}
		}
		for (slot, d) in declared.locals.iter().enumerate() {
			let t = incoming.locals.get(slot).unwrap_or(&VerificationType::Top);
			if !self.is_assignable(t, d) {
				return Err(format!("local {slot} holds {t:?}, but the declared frame has {d:?}"));
			}
		}

		let mut locals = declared.locals.clone();
		if let Some(rest) = incoming.locals.get(locals.len()..) {
			locals.extend_from_slice(rest);
		}
		trim_locals(&mut locals);
		Ok(Frame { locals, stack: declared.stack.clone() })
	}

	fn merge(&self, old: &Frame, new: &Frame) -> Result<Frame, String> {
		if old.stack.len() != new.stack.len() {
			return Err(format!("inconsistent stack heights {} and {}", old.stack.len(), new.stack.len()));
		}
		let stack = old.stack.iter().zip(&new.stack)
			.map(|(a, b)| self.merge_type(a, b).map_err(|reason| format!("{reason} on the stack")))
			.collect::<Result<_, _>>()?;

		let mut locals: Vec<_> = old.locals.iter().zip(&new.locals)
			.map(|(a, b)| self.merge_type(a, b).unwrap_or(VerificationType::Top))
			.collect();
		// a long whose second half got lost isn't usable anymore
		for i in 0..locals.len() {
			if locals[i].is_wide() && locals.get(i + 1) != Some(&VerificationType::Top) {
				locals[i] = VerificationType::Top;
			}
		}
		trim_locals(&mut locals);

		Ok(Frame { locals, stack })
	}

	fn field_type(&self, index: u16) -> Result<JavaType<'_>, String> {
		let member = self.pool.member_ref(index)
			.ok_or_else(|| format!("#{index} is not a field reference"))?;
		descriptor::field_type(member.descriptor)
			.ok_or_else(|| format!("invalid field descriptor in {member}"))
	}

	fn class(&self, index: u16) -> Result<&[u8], String> {
		self.pool.class_name(index)
			.ok_or_else(|| format!("#{index} is not a class"))
	}

	fn ldc_type(&self, index: u16) -> Result<VerificationType, String> {
		Ok(match self.pool.get(index) {
			Some(PoolEntry::Integer { .. }) => VerificationType::Integer,
			Some(PoolEntry::Float { .. }) => VerificationType::Float,
			Some(PoolEntry::Long { .. }) => VerificationType::Long,
			Some(PoolEntry::Double { .. }) => VerificationType::Double,
			Some(PoolEntry::String { .. }) => VerificationType::Object(b"java/lang/String".to_vec()),
			Some(PoolEntry::Class { .. }) => VerificationType::Object(b"java/lang/Class".to_vec()),
			Some(PoolEntry::MethodType { .. }) => VerificationType::Object(b"java/lang/invoke/MethodType".to_vec()),
			Some(PoolEntry::MethodHandle { .. }) => VerificationType::Object(b"java/lang/invoke/MethodHandle".to_vec()),
			Some(PoolEntry::Dynamic { .. }) => {
				let (_, desc) = self.pool.dynamic_name_and_type(index)
					.ok_or_else(|| format!("dynamic constant #{index} is invalid"))?;
				descriptor::field_type(desc)
					.ok_or_else(|| format!("invalid descriptor {} of dynamic constant #{index}", jstring::display(desc)))?
					.into()
			},
			Some(entry) => return Err(format!("{} #{index} can't be loaded with ldc", entry.kind_name())),
			None => return Err(format!("ldc of missing constant #{index}")),
		})
	}

	fn invoke(&self, frame: &mut Frame, op: u8, index: u16) -> Result<(), String> {
		let member = self.pool.member_ref(index)
			.ok_or_else(|| format!("#{index} is not a method reference"))?;
		let method_type = descriptor::method_type(member.descriptor)
			.ok_or_else(|| format!("invalid method descriptor in {member}"))?;

		for argument in method_type.arguments.iter().rev() {
			frame.pop_type(*argument)?;
		}
		if op != opcode::INVOKESTATIC {
			let receiver = frame.pop()?;
			if !receiver.is_reference() {
				return Err(format!("receiver of {member} is {receiver:?}"));
			}
			if member.name == b"<init>" {
				let class = match receiver {
					VerificationType::UninitializedThis => self.context.this_class.clone(),
					VerificationType::Uninitialized(id) => {
						let new = self.position(id)?;
						match self.insns[new].instruction {
							Instruction::Type { opcode: opcode::NEW, index } => self.class(index)?.to_vec(),
							_ => return Err(format!("uninitialized value from {id}, which is no `new`")),
						}
					},
					t => return Err(format!("constructor call on already initialized {t:?}")),
				};
				frame.initialize(&receiver, &class);
			}
		}
		if let Some(return_type) = method_type.return_type {
			frame.push_type(return_type);
		}
		Ok(())
	}

	/// Computes the frame after executing the instruction at `index`.
	fn execute(&self, at: usize, before: &Frame) -> Result<Frame, String> {
		use VerificationType as V;
		const I: JavaType<'static> = JavaType::Int;
		const J: JavaType<'static> = JavaType::Long;
		const F: JavaType<'static> = JavaType::Float;
		const D: JavaType<'static> = JavaType::Double;

		let mut frame = before.clone();
		let f = &mut frame;

		fn op(f: &mut Frame, pops: &[JavaType<'_>], push: Option<JavaType<'_>>) -> Result<(), String> {
			for t in pops {
				f.pop_type(*t)?;
			}
			if let Some(t) = push {
				f.push_type(t);
			}
			Ok(())
		}

		match self.insns[at].instruction {
			Instruction::Plain(o) => match o {
				opcode::NOP => {},
				opcode::ACONST_NULL => f.push(V::Null),
				opcode::ICONST_M1..=opcode::ICONST_5 => f.push(V::Integer),
				opcode::LCONST_0 | opcode::LCONST_1 => f.push(V::Long),
				opcode::FCONST_0..=opcode::FCONST_2 => f.push(V::Float),
				opcode::DCONST_0 | opcode::DCONST_1 => f.push(V::Double),
				opcode::IALOAD | opcode::BALOAD | opcode::CALOAD | opcode::SALOAD => op(f, &[I, I], Some(I))?,
				opcode::LALOAD => op(f, &[I, I], Some(J))?,
				opcode::FALOAD => op(f, &[I, I], Some(F))?,
				opcode::DALOAD => op(f, &[I, I], Some(D))?,
				opcode::AALOAD => {
					f.pop_n(1)?;
					let array = f.pop()?;
					let element = match array {
						V::Null => V::Null,
						V::Object(ref array) => descriptor::array_element(array)
							.and_then(descriptor::field_type)
							.filter(|t| matches!(t, JavaType::Reference(_)))
							.ok_or_else(|| format!("aaload on {}", jstring::display(array)))?
							.into(),
						t => return Err(format!("aaload on {t:?}")),
					};
					f.push(element);
				},
				opcode::IASTORE | opcode::FASTORE | opcode::AASTORE |
				opcode::BASTORE | opcode::CASTORE | opcode::SASTORE => f.pop_n(3)?,
				opcode::LASTORE | opcode::DASTORE => f.pop_n(4)?,
				opcode::POP => f.pop_n(1)?,
				opcode::POP2 => f.pop_n(2)?,
				opcode::DUP => {
					let v1 = f.pop()?;
					f.stack.extend([v1.clone(), v1]);
				},
				opcode::DUP_X1 => {
					let v1 = f.pop()?;
					let v2 = f.pop()?;
					f.stack.extend([v1.clone(), v2, v1]);
				},
				opcode::DUP_X2 => {
					let v1 = f.pop()?;
					let v2 = f.pop()?;
					let v3 = f.pop()?;
					f.stack.extend([v1.clone(), v3, v2, v1]);
				},
				opcode::DUP2 => {
					let v1 = f.pop()?;
					let v2 = f.pop()?;
					f.stack.extend([v2.clone(), v1.clone(), v2, v1]);
				},
				opcode::DUP2_X1 => {
					let v1 = f.pop()?;
					let v2 = f.pop()?;
					let v3 = f.pop()?;
					f.stack.extend([v2.clone(), v1.clone(), v3, v2, v1]);
				},
				opcode::DUP2_X2 => {
					let v1 = f.pop()?;
					let v2 = f.pop()?;
					let v3 = f.pop()?;
					let v4 = f.pop()?;
					f.stack.extend([v2.clone(), v1.clone(), v4, v3, v2, v1]);
				},
				opcode::SWAP => {
					let v1 = f.pop()?;
					let v2 = f.pop()?;
					f.stack.extend([v1, v2]);
				},
				opcode::IADD..=opcode::DREM => {
					let t = [I, J, F, D][((o - opcode::IADD) % 4) as usize];
					op(f, &[t, t], Some(t))?;
				},
				opcode::INEG..=opcode::DNEG => {
					let t = [I, J, F, D][(o - opcode::INEG) as usize];
					op(f, &[t], Some(t))?;
				},
				opcode::ISHL | opcode::ISHR | opcode::IUSHR => op(f, &[I, I], Some(I))?,
				opcode::LSHL | opcode::LSHR | opcode::LUSHR => op(f, &[I, J], Some(J))?,
				opcode::IAND | opcode::IOR | opcode::IXOR => op(f, &[I, I], Some(I))?,
				opcode::LAND | opcode::LOR | opcode::LXOR => op(f, &[J, J], Some(J))?,
				opcode::I2L => op(f, &[I], Some(J))?,
				opcode::I2F => op(f, &[I], Some(F))?,
				opcode::I2D => op(f, &[I], Some(D))?,
				opcode::L2I => op(f, &[J], Some(I))?,
				opcode::L2F => op(f, &[J], Some(F))?,
				opcode::L2D => op(f, &[J], Some(D))?,
				opcode::F2I => op(f, &[F], Some(I))?,
				opcode::F2L => op(f, &[F], Some(J))?,
				opcode::F2D => op(f, &[F], Some(D))?,
				opcode::D2I => op(f, &[D], Some(I))?,
				opcode::D2L => op(f, &[D], Some(J))?,
				opcode::D2F => op(f, &[D], Some(F))?,
				opcode::I2B | opcode::I2C | opcode::I2S => op(f, &[I], Some(I))?,
				opcode::LCMP => op(f, &[J, J], Some(I))?,
				opcode::FCMPL | opcode::FCMPG => op(f, &[F, F], Some(I))?,
				opcode::DCMPL | opcode::DCMPG => op(f, &[D, D], Some(I))?,
				opcode::IRETURN | opcode::FRETURN | opcode::ARETURN | opcode::ATHROW => f.pop_n(1)?,
				opcode::LRETURN | opcode::DRETURN => f.pop_n(2)?,
				opcode::RETURN => {
					if self.context.name == b"<init>" && f.locals.contains(&V::UninitializedThis) {
						return Err("constructor returns without calling a super constructor".to_owned());
					}
				},
				opcode::ARRAYLENGTH => op(f, &[JavaType::Reference(b"")], Some(I))?,
				opcode::MONITORENTER | opcode::MONITOREXIT => f.pop_n(1)?,
				o => return Err(format!("unknown opcode {o:#x}")),
			},
			Instruction::BiPush(_) | Instruction::SiPush(_) => f.push(V::Integer),
			Instruction::Ldc(index) => f.push(self.ldc_type(index)?),
			Instruction::Local { opcode: opcode::RET, .. } => {
				return Err("jsr and ret are not supported in modified code".to_owned());
			},
			Instruction::Local { opcode: o, index } => match o {
				opcode::ILOAD => f.push(f.load(index, |t| *t == V::Integer, "an int")?),
				opcode::LLOAD => f.push(f.load(index, |t| *t == V::Long, "a long")?),
				opcode::FLOAD => f.push(f.load(index, |t| *t == V::Float, "a float")?),
				opcode::DLOAD => f.push(f.load(index, |t| *t == V::Double, "a double")?),
				opcode::ALOAD => f.push(f.load(index, V::is_reference, "a reference")?),
				opcode::ISTORE | opcode::LSTORE | opcode::FSTORE | opcode::DSTORE => {
					let t = [V::Integer, V::Long, V::Float, V::Double][(o - opcode::ISTORE) as usize].clone();
					f.pop_n(if t.is_wide() { 2 } else { 1 })?;
					f.store(index, t);
				},
				opcode::ASTORE => {
					let t = f.pop()?;
					if !t.is_reference() {
						return Err(format!("astore of {t:?}"));
					}
					f.store(index, t);
				},
				o => return Err(format!("opcode {o:#x} is no local variable access")),
			},
			Instruction::IInc { index, .. } => {
				f.load(index, |t| *t == V::Integer, "an int")?;
			},
			Instruction::Jump { opcode: opcode::JSR, .. } => {
				return Err("jsr and ret are not supported in modified code".to_owned());
			},
			Instruction::Jump { opcode: o, .. } => match o {
				opcode::GOTO => {},
				opcode::IFEQ..=opcode::IFLE | opcode::IFNULL | opcode::IFNONNULL => f.pop_n(1)?,
				opcode::IF_ICMPEQ..=opcode::IF_ACMPNE => f.pop_n(2)?,
				o => return Err(format!("opcode {o:#x} is no jump")),
			},
			Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } => f.pop_type(I)?,
			Instruction::Field { opcode: o, index } => {
				let t = self.field_type(index)?;
				match o {
					opcode::GETSTATIC => f.push_type(t),
					opcode::PUTSTATIC => f.pop_type(t)?,
					opcode::GETFIELD => {
						f.pop_n(1)?;
						f.push_type(t);
					},
					_ => {
						f.pop_type(t)?;
						f.pop_n(1)?;
					},
				}
			},
			Instruction::Invoke { opcode: o, index } => self.invoke(f, o, index)?,
			Instruction::InvokeInterface { index, .. } => self.invoke(f, opcode::INVOKEINTERFACE, index)?,
			Instruction::InvokeDynamic { index } => {
				let (_, desc) = self.pool.dynamic_name_and_type(index)
					.ok_or_else(|| format!("#{index} is not an invokedynamic constant"))?;
				let method_type = descriptor::method_type(desc)
					.ok_or_else(|| format!("invalid descriptor {} of invokedynamic", jstring::display(desc)))?;
				for argument in method_type.arguments.iter().rev() {
					f.pop_type(*argument)?;
				}
				if let Some(t) = method_type.return_type {
					f.push_type(t);
				}
			},
			Instruction::Type { opcode: o, index } => {
				let class = self.class(index)?;
				match o {
					opcode::NEW => f.push(V::Uninitialized(self.insns[at].id)),
					opcode::ANEWARRAY => {
						f.pop_type(I)?;
						let mut array = vec![b'['];
						array.extend(descriptor::class_to_descriptor(class));
						f.push(V::Object(array));
					},
					opcode::CHECKCAST => {
						f.pop_n(1)?;
						f.push(V::Object(class.to_vec()));
					},
					_ => op(f, &[JavaType::Reference(b"")], Some(I))?,
				}
			},
			Instruction::NewArray { atype } => {
				f.pop_type(I)?;
				let array = atype::array_descriptor(atype)
					.ok_or_else(|| format!("invalid array type {atype}"))?;
				f.push(V::Object(array.as_bytes().to_vec()));
			},
			Instruction::MultiANewArray { index, dimensions } => {
				let class = self.class(index)?;
				if dimensions == 0 || class.iter().take_while(|&&b| b == b'[').count() < dimensions as usize {
					return Err(format!("multianewarray of {} with {dimensions} dimensions", jstring::display(class)));
				}
				f.pop_n(dimensions as usize)?;
				f.push(V::Object(class.to_vec()));
			},
		}

		Ok(frame)
	}
}

struct Worklist {
	frames: Vec<Option<Frame>>,
	queued: Vec<bool>,
	list: Vec<usize>,
}

impl Worklist {
	/// Merges the frame flowing from instruction `at` into the frame of `to`, and queues `to` if that changed it.
	fn merge(&mut self, analyzer: &Analyzer, at: usize, to: usize, frame: Frame) -> Result<(), VerifyError> {
		let frame = match analyzer.declared.get(&to) {
			Some(declared) => analyzer.seed(declared, frame)
				.map_err(|reason| VerifyError::at(at, format!("where control flows to instruction {to}: {reason}")))?,
			None => frame,
		};
		let merged = match &self.frames[to] {
			None => frame,
			Some(old) => {
				let merged = analyzer.merge(old, &frame)
					.map_err(|reason| VerifyError::at(at, format!("where control flows to instruction {to}: {reason}")))?;
				if &merged == old {
					return Ok(());
				}
				merged
			},
		};
		self.frames[to] = Some(merged);
		if !self.queued[to] {
			self.queued[to] = true;
			self.list.push(to);
		}
		Ok(())
	}
}

/// The class name or array descriptor of an array element, `None` for primitives.
fn element_class(element: &[u8]) -> Option<&[u8]> {
	match element {
		[b'[', ..] => Some(element),
		[b'L', name @ .., b';'] => Some(name),
		_ => None,
	}
}

/// Long and double take a second slot in the analysis.
fn expand(types: &[VerificationType]) -> Vec<VerificationType> {
	let mut vec = Vec::with_capacity(types.len());
	for t in types {
		vec.push(t.clone());
		if t.is_wide() {
			vec.push(VerificationType::Top);
		}
	}
	vec
}

/// Turns the declared frames, each relative to the one before, into full frames. Frames of
/// instructions no longer present are left out.
fn declared_frames(code: &Code, initial: &Frame, positions: &HashMap<InsnId, usize>) -> Result<HashMap<usize, Frame>, VerifyError> {
	let mut initial_locals = initial.locals.clone();
	trim_locals(&mut initial_locals);
	let mut locals: Vec<VerificationType> = collapse(&initial_locals).into_iter().cloned().collect();

	let mut frames = HashMap::new();
	for declared in code.declared_frames() {
		let stack = match &declared.kind {
			FrameKind::Same => Vec::new(),
			FrameKind::SameLocals1(t) => vec![t.clone()],
			&FrameKind::Chop(n) => {
				let n = n as usize;
				if n > locals.len() {
					return Err(VerifyError::new(format!("declared frame at {} removes {n} of {} locals", declared.at, locals.len())));
				}
				locals.truncate(locals.len() - n);
				Vec::new()
			},
			FrameKind::Append(types) => {
				locals.extend(types.iter().cloned());
				Vec::new()
			},
			FrameKind::Full { locals: full, stack } => {
				locals = full.clone();
				stack.clone()
			},
		};
		if let Some(&i) = positions.get(&declared.at) {
			frames.insert(i, Frame { locals: expand(&locals), stack: expand(&stack) });
		}
	}
	Ok(frames)
}

/// Removes trailing unusable locals, but never the second half of a long or double.
fn trim_locals(locals: &mut Vec<VerificationType>) {
	while locals.last() == Some(&VerificationType::Top) {
		let len = locals.len();
		if len >= 2 && locals[len - 2].is_wide() {
			break;
		}
		locals.pop();
	}
}

/// The number of local slots the instructions access, at least the size of the arguments.
fn max_locals(insns: &[Insn], initial: &Frame) -> usize {
	insns.iter()
		.map(|insn| match insn.instruction {
			Instruction::Local { opcode: opcode::LLOAD | opcode::DLOAD | opcode::LSTORE | opcode::DSTORE, index } => index as usize + 2,
			Instruction::Local { index, .. } |
			Instruction::IInc { index, .. } => index as usize + 1,
			_ => 0,
		})
		.fold(initial.locals.len(), usize::max)
}

/// Runs the data flow analysis.
///
/// Fails if the stack underflows, a jump leaves the method, a local is read with the wrong type,
/// paths meet with different stack heights, or with classes the hierarchy can't merge.
pub fn analyze(
	code: &Code,
	context: &MethodContext,
	pool: &ConstantPool,
	hierarchy: &dyn ClassHierarchy,
) -> Result<Analysis, VerifyError> {
	let insns = code.instructions();
	if insns.is_empty() {
		return Err(VerifyError::new("method has no instructions"));
	}

	let initial = context.initial_frame().map_err(VerifyError::new)?;
	let positions: HashMap<InsnId, usize> = insns.iter().enumerate().map(|(i, insn)| (insn.id, i)).collect();
	let declared = declared_frames(code, &initial, &positions)?;
	let max_locals = declared.values()
		.map(|frame| frame.locals.len())
		.fold(max_locals(insns, &initial), usize::max);
	let analyzer = Analyzer { pool, context, hierarchy, insns, positions, declared };
	let handlers = analyzer.handler_ranges(code.exception_table())?;

	let mut work = Worklist {
		frames: vec![None; insns.len()],
		queued: vec![false; insns.len()],
		list: Vec::new(),
	};
	work.merge(&analyzer, 0, 0, initial)?;
	let mut max_stack = 0;

	while let Some(i) = work.list.pop() {
		work.queued[i] = false;
		let Some(before) = work.frames[i].clone() else {
			continue;
		};
		let after = analyzer.execute(i, &before)
			.map_err(|reason| VerifyError::at(i, reason))?;
		max_stack = max_stack.max(before.stack.len()).max(after.stack.len());

		for handler in handlers.iter().filter(|h| h.start <= i && i < h.end) {
			max_stack = max_stack.max(1);
			work.merge(&analyzer, i, handler.handler, Frame::catching(before.locals.clone(), handler.class.clone()))?;
			work.merge(&analyzer, i, handler.handler, Frame::catching(after.locals.clone(), handler.class.clone()))?;
		}

		let instruction = &insns[i].instruction;
		for target in instruction.targets() {
			let to = analyzer.position(target).map_err(|reason| VerifyError::at(i, reason))?;
			work.merge(&analyzer, i, to, after.clone())?;
		}
		if instruction.falls_through() {
			if i + 1 == insns.len() {
				return Err(VerifyError::at(i, "execution falls off the end of the code"));
			}
			work.merge(&analyzer, i, i + 1, after)?;
		}
	}
	let frames = work.frames;

	let max_stack = u16::try_from(max_stack)
		.map_err(|_| VerifyError::new(format!("stack grows to {max_stack} words")))?;
	let max_locals = u16::try_from(max_locals)
		.map_err(|_| VerifyError::new(format!("{max_locals} local variable slots")))?;

	Ok(Analysis { frames, max_stack, max_locals })
}

/// Replaces unreachable instructions with `nop`s ending in `athrow`, and cuts them out of
/// exception handler ranges. The instructions keep their ids.
pub(crate) fn replace_dead_code(code: &mut Code, analysis: &mut Analysis) {
	let dead = |i: usize| analysis.frames[i].is_none();
	let len = analysis.frames.len();

	let mut i = 0;
	while i < len {
		if !dead(i) {
			i += 1;
			continue;
		}
		let start = i;
		while i < len && dead(i) {
			i += 1;
		}
		trace!("replacing unreachable instructions {start}..{i}");

		let insns = code.instructions_mut();
		for insn in &mut insns[start..i - 1] {
			insn.instruction = Instruction::Plain(opcode::NOP);
		}
		insns[i - 1].instruction = Instruction::Plain(opcode::ATHROW);
	}

	let ids: Vec<InsnId> = code.instructions().iter().map(|insn| insn.id).collect();
	let position = |id: InsnId| ids.iter().position(|&x| x == id);

	let mut exception_table = Vec::with_capacity(code.exception_table().len());
	for handler in code.exception_table() {
		let (Some(start), Some(end)) = (position(handler.start), match handler.end {
			Position::At(id) => position(id),
			Position::End => Some(len),
		}) else {
			continue;
		};

		// split the range into its live parts
		let mut i = start;
		while i < end {
			if dead(i) {
				i += 1;
				continue;
			}
			let live_start = i;
			while i < end && !dead(i) {
				i += 1;
			}
			exception_table.push(ExceptionHandler {
				start: ids[live_start],
				end: ids.get(i).map_or(Position::End, |&id| Position::At(id)),
				handler: handler.handler,
				catch_type: handler.catch_type,
			});
		}
	}
	*code.exception_table_mut() = exception_table;

	for frame in &mut analysis.frames {
		if frame.is_none() {
			*frame = Some(Frame::catching(Vec::new(), THROWABLE.to_vec()));
		}
	}
	analysis.max_stack = analysis.max_stack.max(1);
}

/// Indices of the instructions that need an explicit frame: jump targets, exception handlers, and
/// instructions following an unconditional jump or a widened conditional jump.
fn frame_positions(code: &Code, widened_successors: &[InsnId]) -> BTreeSet<usize> {
	let insns = code.instructions();
	let positions: HashMap<InsnId, usize> = insns.iter().enumerate().map(|(i, insn)| (insn.id, i)).collect();

	let mut set = BTreeSet::new();
	for (i, insn) in insns.iter().enumerate() {
		set.extend(insn.instruction.targets().iter().filter_map(|id| positions.get(id)));
		if !insn.instruction.falls_through() && i + 1 < insns.len() {
			set.insert(i + 1);
		}
	}
	set.extend(code.exception_table().iter().filter_map(|handler| positions.get(&handler.handler)));
	set.extend(widened_successors.iter().filter_map(|id| positions.get(id)));
	set
}

/// The types as written in a frame: a long or double covers the following slot.
fn collapse(types: &[VerificationType]) -> Vec<&VerificationType> {
	let mut vec = Vec::with_capacity(types.len());
	let mut i = 0;
	while i < types.len() {
		vec.push(&types[i]);
		i += if types[i].is_wide() { 2 } else { 1 };
	}
	vec
}

fn write_type(w: &mut Vec<u8>, t: &VerificationType, encoded: &EncodedCode, pool: &mut ConstantPool) -> Result<(), ClassFileError> {
	match t {
		VerificationType::Top => w.write_u8(0),
		VerificationType::Integer => w.write_u8(1),
		VerificationType::Float => w.write_u8(2),
		VerificationType::Double => w.write_u8(3),
		VerificationType::Long => w.write_u8(4),
		VerificationType::Null => w.write_u8(5),
		VerificationType::UninitializedThis => w.write_u8(6),
		VerificationType::Object(class) => {
			w.write_u8(7);
			w.write_u16(pool.put_class_bytes(class)?);
		},
		VerificationType::Uninitialized(id) => {
			w.write_u8(8);
			w.write_u16(encoded.labels.try_get(*id)?);
		},
	}
	Ok(())
}

/// Builds the body of the `StackMapTable` attribute, or `None` if no frames are needed.
pub(crate) fn write_stack_map_table(
	code: &Code,
	analysis: &Analysis,
	initial: &Frame,
	encoded: &EncodedCode,
	pool: &mut ConstantPool,
) -> Result<Option<Vec<u8>>, ClassFileError> {
	let positions = frame_positions(code, &encoded.widened_successors);
	if positions.is_empty() {
		return Ok(None);
	}

	let mut initial_locals = initial.locals.clone();
	trim_locals(&mut initial_locals);
	let mut previous_locals: Vec<VerificationType> = collapse(&initial_locals).into_iter().cloned().collect();
	let mut previous_offset: Option<u16> = None;

	let mut w = Vec::new();
	w.write_usize_as_u16(positions.len())?;
	for i in positions {
		let insn = &code.instructions()[i];
		let frame = analysis.frames[i].as_ref()
			.ok_or_else(|| ClassFileError::Encoding(format!("no frame for instruction {i}")))?;
		let offset = encoded.labels.try_get(insn.id)?;
		let delta = match previous_offset {
			None => offset,
			Some(previous) => offset - previous - 1,
		};
		previous_offset = Some(offset);

		let mut locals = frame.locals.clone();
		trim_locals(&mut locals);
		let locals: Vec<VerificationType> = collapse(&locals).into_iter().cloned().collect();
		let stack = collapse(&frame.stack);

		let same_locals = locals == previous_locals;
		if same_locals && stack.is_empty() {
			if delta < 64 {
				w.write_u8(delta as u8);
			} else {
				w.write_u8(251);
				w.write_u16(delta);
			}
		} else if same_locals && stack.len() == 1 {
			if delta < 64 {
				w.write_u8(64 + delta as u8);
			} else {
				w.write_u8(247);
				w.write_u16(delta);
			}
			write_type(&mut w, stack[0], encoded, pool)?;
		} else if stack.is_empty() && locals.len() < previous_locals.len() && previous_locals.len() - locals.len() <= 3
			&& previous_locals.starts_with(&locals) {
			w.write_u8(251 - (previous_locals.len() - locals.len()) as u8);
			w.write_u16(delta);
		} else if stack.is_empty() && locals.len() > previous_locals.len() && locals.len() - previous_locals.len() <= 3
			&& locals.starts_with(&previous_locals) {
			w.write_u8(251 + (locals.len() - previous_locals.len()) as u8);
			w.write_u16(delta);
			for t in &locals[previous_locals.len()..] {
				write_type(&mut w, t, encoded, pool)?;
			}
		} else {
			w.write_u8(255);
			w.write_u16(delta);
			w.write_usize_as_u16(locals.len())?;
			for t in &locals {
				write_type(&mut w, t, encoded, pool)?;
			}
			w.write_usize_as_u16(stack.len())?;
			for t in stack {
				write_type(&mut w, t, encoded, pool)?;
			}
		}

		previous_locals = locals;
	}

	Ok(Some(w))
}
