//! The contents of a `Code` attribute as a list of logical instructions.
//!
//! Instructions are identified by an [`InsnId`] instead of their bytecode offset. Branch targets,
//! exception ranges, line numbers and local variable ranges all refer to these ids, so inserting
//! or removing instructions never invalidates them. Offsets only exist again once the code is
//! encoded.

use std::fmt::{Display, Formatter};
use crate::constants::{atype, opcode};
use crate::frames::VerificationType;
use crate::model::RawAttribute;
use crate::pool::{ConstantPool, PoolEntry};
use crate::jstring;

mod decode;
pub(crate) mod encode;
mod labels;

pub(crate) use decode::read_code;

/// The identity of an instruction inside one [`Code`].
///
/// Ids are never reused within a method, and are not ordered by position.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsnId(pub u32);

impl Display for InsnId {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "L{}", self.0)
	}
}

/// Either an instruction, or the end of the code array. Used for exclusive range ends.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Position {
	At(InsnId),
	End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insn {
	pub id: InsnId,
	pub instruction: Instruction,
}

impl Insn {
	pub fn new(id: InsnId, instruction: Instruction) -> Insn {
		Insn { id, instruction }
	}
}

/// A single instruction, with pool references kept as indices into the class's pool.
///
/// Several encodings share one variant: the `_0` to `_3` forms of loads and stores, `wide`,
/// `goto_w` and `jsr_w` and the three `ldc` forms are chosen when encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
	/// An instruction without operands, given as its opcode.
	Plain(u8),
	BiPush(i8),
	SiPush(i16),
	/// `ldc`, `ldc_w` or `ldc2_w`.
	Ldc(u16),
	/// `iload` to `aload`, `istore` to `astore`, and `ret`. The opcode is always the one taking an index operand.
	Local { opcode: u8, index: u16 },
	IInc { index: u16, delta: i16 },
	/// A conditional jump, `goto` or `jsr`.
	Jump { opcode: u8, target: InsnId },
	TableSwitch { default: InsnId, low: i32, high: i32, targets: Vec<InsnId> },
	LookupSwitch { default: InsnId, pairs: Vec<(i32, InsnId)> },
	/// `getstatic`, `putstatic`, `getfield` or `putfield`.
	Field { opcode: u8, index: u16 },
	/// `invokevirtual`, `invokespecial` or `invokestatic`.
	Invoke { opcode: u8, index: u16 },
	InvokeInterface { index: u16, count: u8 },
	InvokeDynamic { index: u16 },
	/// `new`, `anewarray`, `checkcast` or `instanceof`.
	Type { opcode: u8, index: u16 },
	NewArray { atype: u8 },
	MultiANewArray { index: u16, dimensions: u8 },
}

impl Instruction {
	/// The opcode used for printing. Loads and stores report their indexed form.
	pub fn opcode(&self) -> u8 {
		match *self {
			Instruction::Plain(opcode) => opcode,
			Instruction::BiPush(_) => opcode::BIPUSH,
			Instruction::SiPush(_) => opcode::SIPUSH,
			Instruction::Ldc(_) => opcode::LDC,
			Instruction::Local { opcode, .. } => opcode,
			Instruction::IInc { .. } => opcode::IINC,
			Instruction::Jump { opcode, .. } => opcode,
			Instruction::TableSwitch { .. } => opcode::TABLESWITCH,
			Instruction::LookupSwitch { .. } => opcode::LOOKUPSWITCH,
			Instruction::Field { opcode, .. } => opcode,
			Instruction::Invoke { opcode, .. } => opcode,
			Instruction::InvokeInterface { .. } => opcode::INVOKEINTERFACE,
			Instruction::InvokeDynamic { .. } => opcode::INVOKEDYNAMIC,
			Instruction::Type { opcode, .. } => opcode,
			Instruction::NewArray { .. } => opcode::NEWARRAY,
			Instruction::MultiANewArray { .. } => opcode::MULTIANEWARRAY,
		}
	}

	/// Whether execution can continue with the next instruction.
	pub fn falls_through(&self) -> bool {
		!opcode::is_unconditional(self.opcode())
	}

	pub fn is_return(&self) -> bool {
		matches!(*self, Instruction::Plain(opcode) if opcode::is_return(opcode))
	}

	/// All instructions this one may jump to, without the fall through successor.
	pub fn targets(&self) -> Vec<InsnId> {
		match self {
			&Instruction::Jump { target, .. } => vec![target],
			Instruction::TableSwitch { default, targets, .. } => {
				std::iter::once(*default).chain(targets.iter().copied()).collect()
			},
			Instruction::LookupSwitch { default, pairs } => {
				std::iter::once(*default).chain(pairs.iter().map(|&(_, target)| target)).collect()
			},
			_ => Vec::new(),
		}
	}

	pub fn for_each_target_mut(&mut self, mut f: impl FnMut(&mut InsnId)) {
		match self {
			Instruction::Jump { target, .. } => f(target),
			Instruction::TableSwitch { default, targets, .. } => {
				f(default);
				targets.iter_mut().for_each(f);
			},
			Instruction::LookupSwitch { default, pairs } => {
				f(default);
				for (_, target) in pairs {
					f(target);
				}
			},
			_ => {},
		}
	}

	/// The constant pool index this instruction refers to, if any.
	pub fn pool_index(&self) -> Option<u16> {
		match *self {
			Instruction::Ldc(index) |
			Instruction::Field { index, .. } |
			Instruction::Invoke { index, .. } |
			Instruction::InvokeInterface { index, .. } |
			Instruction::InvokeDynamic { index } |
			Instruction::Type { index, .. } |
			Instruction::MultiANewArray { index, .. } => Some(index),
			_ => None,
		}
	}

	/// Renders the instruction like `javap -c` does, resolving pool references.
	pub fn display(&self, pool: &ConstantPool) -> String {
		let name = opcode::name(self.opcode()).unwrap_or("<invalid>");
		let member = |index: u16| pool.member_ref(index)
			.map(|m| m.to_string())
			.unwrap_or_else(|| format!("<#{index}>"));
		let class = |index: u16| pool.class_name(index)
			.map(jstring::display)
			.unwrap_or_else(|| format!("<#{index}>"));

		match self {
			Instruction::Plain(_) => name.to_owned(),
			Instruction::BiPush(value) => format!("{name} {value}"),
			Instruction::SiPush(value) => format!("{name} {value}"),
			&Instruction::Ldc(index) => {
				let value = match pool.get(index) {
					Some(PoolEntry::String { string_index }) => format!("{:?}", pool.utf8_display(*string_index)),
					Some(PoolEntry::Integer { bytes }) => bytes.to_string(),
					Some(PoolEntry::Long { bytes }) => format!("{bytes}L"),
					Some(PoolEntry::Float { bytes }) => format!("{}f", f32::from_bits(*bytes)),
					Some(PoolEntry::Double { bytes }) => format!("{}d", f64::from_bits(*bytes)),
					Some(PoolEntry::Class { .. }) => format!("class {}", class(index)),
					Some(entry) => format!("{} #{index}", entry.kind_name()),
					None => format!("<#{index}>"),
				};
				format!("{name} {value}")
			},
			Instruction::Local { index, .. } => format!("{name} {index}"),
			Instruction::IInc { index, delta } => format!("{name} {index} {delta}"),
			Instruction::Jump { target, .. } => format!("{name} {target}"),
			Instruction::TableSwitch { default, low, high, targets } => {
				let cases: Vec<String> = (*low..=*high).zip(targets).map(|(key, target)| format!("{key}: {target}")).collect();
				format!("{name} {{ {}, default: {default} }}", cases.join(", "))
			},
			Instruction::LookupSwitch { default, pairs } => {
				let cases: Vec<String> = pairs.iter().map(|(key, target)| format!("{key}: {target}")).collect();
				format!("{name} {{ {}, default: {default} }}", cases.join(", "))
			},
			&Instruction::Field { index, .. } |
			&Instruction::Invoke { index, .. } |
			&Instruction::InvokeInterface { index, .. } => format!("{name} {}", member(index)),
			&Instruction::InvokeDynamic { index } => {
				let nat = pool.dynamic_name_and_type(index)
					.map(|(n, d)| format!("{}:{}", jstring::display(n), jstring::display(d)))
					.unwrap_or_else(|| format!("<#{index}>"));
				format!("{name} {nat}")
			},
			&Instruction::Type { index, .. } => format!("{name} {}", class(index)),
			&Instruction::NewArray { atype } => format!("{name} {}", atype::name(atype).unwrap_or("<invalid>")),
			&Instruction::MultiANewArray { index, dimensions } => format!("{name} {} {dimensions}", class(index)),
		}
	}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
	pub start: InsnId,
	pub end: Position,
	pub handler: InsnId,
	/// Pool index of the caught class, or `0` for `finally` handlers.
	pub catch_type: u16,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LineNumber {
	pub start: InsnId,
	pub line: u16,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LocalVariable {
	pub start: InsnId,
	pub end: Position,
	pub name_index: u16,
	/// The descriptor, or the signature inside a `LocalVariableTypeTable`.
	pub descriptor_index: u16,
	pub index: u16,
}

/// One entry of a `StackMapTable`, attached to the instruction it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredFrame {
	pub at: InsnId,
	pub kind: FrameKind,
}

/// The frame types of the class file format. Each describes its frame relative to the one before.
/// A long or double is a single entry here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
	Same,
	SameLocals1(VerificationType),
	/// The locals of the previous frame without the last `n`.
	Chop(u8),
	Append(Vec<VerificationType>),
	Full {
		locals: Vec<VerificationType>,
		stack: Vec<VerificationType>,
	},
}

/// Attributes nested in a `Code` attribute, in their original order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeAttribute {
	LineNumberTable { name_index: u16, entries: Vec<LineNumber> },
	LocalVariableTable { name_index: u16, entries: Vec<LocalVariable> },
	LocalVariableTypeTable { name_index: u16, entries: Vec<LocalVariable> },
	/// The frames as read. New frames are computed whenever the code is encoded again, with these
	/// as the types at their instructions.
	StackMapTable { name_index: u16, frames: Vec<DeclaredFrame> },
	/// Anything else. These may contain offsets, so they are dropped once the code is modified.
	Other(RawAttribute),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Code {
	/// Pool index of the `Code` attribute name.
	pub name_index: u16,
	pub max_stack: u16,
	pub max_locals: u16,
	instructions: Vec<Insn>,
	exception_table: Vec<ExceptionHandler>,
	pub attributes: Vec<CodeAttribute>,

	next_id: u32,
	/// Ids below this were assigned when the code was read.
	original_count: u32,
	/// Bytecode offsets of the instructions as read, indexed by id.
	original_offsets: Vec<u16>,
	/// The attribute body as it will be written. Present while unmodified, or after re-encoding.
	encoded: Option<Vec<u8>>,
	modified: bool,
}

impl Code {
	/// Creates empty code for a new method. Stack sizes are computed when the class is recomputed.
	pub fn new(name_index: u16) -> Code {
		Code {
			name_index,
			max_stack: 0,
			max_locals: 0,
			instructions: Vec::new(),
			exception_table: Vec::new(),
			attributes: Vec::new(),
			next_id: 0,
			original_count: 0,
			original_offsets: Vec::new(),
			encoded: None,
			modified: true,
		}
	}

	#[allow(clippy::too_many_arguments)]
	pub(crate) fn from_parts(
		name_index: u16,
		max_stack: u16,
		max_locals: u16,
		instructions: Vec<Insn>,
		exception_table: Vec<ExceptionHandler>,
		attributes: Vec<CodeAttribute>,
		original_offsets: Vec<u16>,
		encoded: Vec<u8>,
	) -> Code {
		let count = instructions.len() as u32;
		Code {
			name_index,
			max_stack,
			max_locals,
			instructions,
			exception_table,
			attributes,
			next_id: count,
			original_count: count,
			original_offsets,
			encoded: Some(encoded),
			modified: false,
		}
	}

	pub fn instructions(&self) -> &[Insn] {
		&self.instructions
	}

	/// Mutable access to the instructions. Marks the code as modified.
	pub fn instructions_mut(&mut self) -> &mut Vec<Insn> {
		self.mark_modified();
		&mut self.instructions
	}

	pub fn exception_table(&self) -> &[ExceptionHandler] {
		&self.exception_table
	}

	/// Mutable access to the exception table. Marks the code as modified.
	pub fn exception_table_mut(&mut self) -> &mut Vec<ExceptionHandler> {
		self.mark_modified();
		&mut self.exception_table
	}

	/// Whether anything was changed since reading. Stays `true` after re-encoding.
	pub fn is_modified(&self) -> bool {
		self.modified
	}

	/// The encoded attribute body, if it is up to date.
	pub fn encoded(&self) -> Option<&[u8]> {
		self.encoded.as_deref()
	}

	pub(crate) fn set_encoded(&mut self, encoded: Vec<u8>) {
		self.encoded = Some(encoded);
	}

	pub fn mark_modified(&mut self) {
		self.modified = true;
		self.encoded = None;
	}

	/// Hands out an id not used by any instruction yet.
	pub fn new_id(&mut self) -> InsnId {
		let id = InsnId(self.next_id);
		self.next_id += 1;
		id
	}

	/// Wraps instructions with fresh ids.
	pub fn with_new_ids(&mut self, instructions: impl IntoIterator<Item=Instruction>) -> Vec<Insn> {
		instructions.into_iter()
			.map(|instruction| Insn::new(self.new_id(), instruction))
			.collect()
	}

	/// Whether the instruction was present when the code was read.
	pub fn is_original(&self, id: InsnId) -> bool {
		id.0 < self.original_count
	}

	/// Treats all current instructions as present from the start, so that they can be found by
	/// [`Code::original_at_index`] and [`Code::original_at_offset`]. Used for code of newly added methods.
	pub fn treat_as_original(&mut self) {
		self.original_count = self.next_id;
	}

	/// The original instruction at an index into the code as read.
	pub fn original_at_index(&self, index: usize) -> Option<InsnId> {
		u32::try_from(index).ok()
			.filter(|&i| i < self.original_count)
			.map(InsnId)
	}

	/// The original instruction starting at a bytecode offset of the code as read.
	pub fn original_at_offset(&self, offset: u16) -> Option<InsnId> {
		self.original_offsets.binary_search(&offset).ok()
			.map(|index| InsnId(index as u32))
	}

	pub fn position(&self, id: InsnId) -> Option<usize> {
		self.instructions.iter().position(|insn| insn.id == id)
	}

	pub fn get(&self, id: InsnId) -> Option<&Insn> {
		self.instructions.iter().find(|insn| insn.id == id)
	}

	/// Inserts instructions before `anchor`. With `retarget`, everything that refers to the start of
	/// `anchor` refers to the first inserted instruction instead: jumps and switches, the start and
	/// end of exception ranges, line numbers, local variable ranges and the declared frame. The
	/// inserted code then runs on every path reaching `anchor`, and belongs to the same line and
	/// exception ranges. Exception handlers starting at `anchor` keep pointing at it.
	///
	/// Returns `false` if `anchor` doesn't exist.
	pub fn insert_before(&mut self, anchor: InsnId, insns: Vec<Insn>, retarget: bool) -> bool {
		let Some(position) = self.position(anchor) else {
			return false;
		};
		if let (true, Some(first)) = (retarget, insns.first().map(|insn| insn.id)) {
			self.retarget(anchor, first);
		}
		self.mark_modified();
		self.instructions.splice(position..position, insns);
		true
	}

	fn retarget(&mut self, from: InsnId, to: InsnId) {
		let replace = |id: &mut InsnId| {
			if *id == from {
				*id = to;
			}
		};
		let replace_position = |position: &mut Position| {
			if *position == Position::At(from) {
				*position = Position::At(to);
			}
		};

		for insn in &mut self.instructions {
			insn.instruction.for_each_target_mut(replace);
		}
		for handler in &mut self.exception_table {
			replace(&mut handler.start);
			replace_position(&mut handler.end);
		}
		for attribute in &mut self.attributes {
			match attribute {
				CodeAttribute::LineNumberTable { entries, .. } => {
					for entry in entries {
						replace(&mut entry.start);
					}
				},
				CodeAttribute::LocalVariableTable { entries, .. } |
				CodeAttribute::LocalVariableTypeTable { entries, .. } => {
					for entry in entries {
						replace(&mut entry.start);
						replace_position(&mut entry.end);
					}
				},
				CodeAttribute::StackMapTable { frames, .. } => {
					for frame in frames {
						replace(&mut frame.at);
					}
				},
				CodeAttribute::Other(_) => {},
			}
		}
	}

	/// The frames of the `StackMapTable` as read, in order.
	pub fn declared_frames(&self) -> &[DeclaredFrame] {
		self.attributes.iter()
			.find_map(|attribute| match attribute {
				CodeAttribute::StackMapTable { frames, .. } => Some(frames.as_slice()),
				_ => None,
			})
			.unwrap_or_default()
	}

	/// Inserts instructions right after `anchor`. Returns `false` if `anchor` doesn't exist.
	pub fn insert_after(&mut self, anchor: InsnId, insns: Vec<Insn>) -> bool {
		let Some(position) = self.position(anchor) else {
			return false;
		};
		self.mark_modified();
		self.instructions.splice(position + 1..position + 1, insns);
		true
	}

	/// Replaces all instructions. The exception table, line numbers, local variables and declared
	/// frames describe the old instructions, so they are removed as well.
	pub fn replace_instructions(&mut self, insns: Vec<Insn>, exception_table: Vec<ExceptionHandler>) {
		self.mark_modified();
		self.instructions = insns;
		self.exception_table = exception_table;
		self.attributes.retain_mut(|attribute| match attribute {
			CodeAttribute::StackMapTable { frames, .. } => {
				frames.clear();
				true
			},
			_ => false,
		});
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use crate::code::{Code, CodeAttribute, DeclaredFrame, ExceptionHandler, FrameKind, Insn, InsnId, Instruction, LineNumber, Position};
	use crate::constants::opcode;
	use crate::frames::VerificationType;

	fn code_with(instructions: Vec<Instruction>) -> Code {
		let mut code = Code::new(1);
		let insns = code.with_new_ids(instructions);
		code.replace_instructions(insns, Vec::new());
		code.treat_as_original();
		code
	}

	fn ids(code: &Code) -> Vec<u32> {
		code.instructions().iter().map(|insn| insn.id.0).collect()
	}

	#[test]
	fn insert_before_retargets() {
		// 0: iload 0, 1: ifeq L3, 2: iinc 0 1, 3: return
		let mut code = code_with(vec![
			Instruction::Local { opcode: opcode::ILOAD, index: 0 },
			Instruction::Jump { opcode: opcode::IFEQ, target: InsnId(3) },
			Instruction::IInc { index: 0, delta: 1 },
			Instruction::Plain(opcode::RETURN),
		]);

		let hook = code.with_new_ids([Instruction::Plain(opcode::NOP)]);
		assert!(code.insert_before(InsnId(3), hook, true));
		assert_eq!(ids(&code), vec![0, 1, 2, 4, 3]);
		assert_eq!(code.instructions()[1].instruction, Instruction::Jump { opcode: opcode::IFEQ, target: InsnId(4) });

		let entry = code.with_new_ids([Instruction::Plain(opcode::NOP)]);
		assert!(code.insert_before(InsnId(0), entry, false));
		assert_eq!(ids(&code), vec![5, 0, 1, 2, 4, 3]);

		assert!(code.is_original(InsnId(3)));
		assert!(!code.is_original(InsnId(4)));
		assert!(code.is_modified());
		assert_eq!(code.encoded(), None);
	}

	#[test]
	fn insert_before_moves_ranges_and_lines() {
		// 0: aload 0, 1: invokevirtual, 2: return, 3: astore 1, 4: return
		let mut code = code_with(vec![
			Instruction::Local { opcode: opcode::ALOAD, index: 0 },
			Instruction::Invoke { opcode: opcode::INVOKEVIRTUAL, index: 7 },
			Instruction::Plain(opcode::RETURN),
			Instruction::Local { opcode: opcode::ASTORE, index: 1 },
			Instruction::Plain(opcode::RETURN),
		]);
		code.exception_table_mut().push(ExceptionHandler {
			start: InsnId(1),
			end: Position::At(InsnId(2)),
			handler: InsnId(3),
			catch_type: 0,
		});
		code.attributes = vec![
			CodeAttribute::LineNumberTable { name_index: 2, entries: vec![
				LineNumber { start: InsnId(0), line: 10 },
				LineNumber { start: InsnId(2), line: 11 },
				LineNumber { start: InsnId(3), line: 12 },
			] },
			CodeAttribute::StackMapTable { name_index: 3, frames: vec![
				DeclaredFrame { at: InsnId(3), kind: FrameKind::SameLocals1(VerificationType::Object(b"java/lang/Throwable".to_vec())) },
			] },
		];

		let before_call = code.with_new_ids([Instruction::Plain(opcode::NOP)]);
		assert!(code.insert_before(InsnId(1), before_call, true));
		let before_return = code.with_new_ids([Instruction::Plain(opcode::NOP)]);
		assert!(code.insert_before(InsnId(2), before_return, true));
		let before_handler = code.with_new_ids([Instruction::Plain(opcode::NOP)]);
		assert!(code.insert_before(InsnId(3), before_handler, true));
		assert_eq!(ids(&code), vec![0, 5, 1, 6, 2, 7, 3, 4]);

		// the code before the call is covered, the code before the end of the range isn't
		assert_eq!(code.exception_table(), &[ExceptionHandler {
			start: InsnId(5),
			end: Position::At(InsnId(6)),
			handler: InsnId(3),
			catch_type: 0,
		}]);
		let CodeAttribute::LineNumberTable { entries, .. } = &code.attributes[0] else {
			panic!("{:?}", code.attributes[0]);
		};
		assert_eq!(entries.iter().map(|entry| entry.start.0).collect::<Vec<_>>(), vec![0, 6, 7]);
		assert_eq!(code.declared_frames().iter().map(|frame| frame.at).collect::<Vec<_>>(), vec![InsnId(7)]);

		let entry = code.with_new_ids([Instruction::Plain(opcode::NOP)]);
		assert!(code.insert_before(InsnId(0), entry, false));
		let CodeAttribute::LineNumberTable { entries, .. } = &code.attributes[0] else {
			panic!("{:?}", code.attributes[0]);
		};
		assert_eq!(entries[0].start, InsnId(0));

		code.replace_instructions(Vec::new(), Vec::new());
		assert_eq!(code.attributes.len(), 1);
		assert!(code.declared_frames().is_empty());
	}

	#[test]
	fn insert_after_and_missing_anchor() {
		let mut code = code_with(vec![
			Instruction::Plain(opcode::ICONST_0),
			Instruction::Plain(opcode::IRETURN),
		]);
		let after = code.with_new_ids([Instruction::Plain(opcode::NOP)]);
		assert!(code.insert_after(InsnId(0), after));
		assert_eq!(ids(&code), vec![0, 2, 1]);

		assert!(!code.insert_after(InsnId(17), vec![Insn::new(InsnId(18), Instruction::Plain(opcode::NOP))]));
		assert_eq!(code.original_at_index(1), Some(InsnId(1)));
		assert_eq!(code.original_at_index(2), None);
	}

	#[test]
	fn targets() {
		let mut switch = Instruction::LookupSwitch { default: InsnId(1), pairs: vec![(3, InsnId(2)), (7, InsnId(1))] };
		assert_eq!(switch.targets(), vec![InsnId(1), InsnId(2), InsnId(1)]);
		switch.for_each_target_mut(|target| target.0 += 10);
		assert_eq!(switch.targets(), vec![InsnId(11), InsnId(12), InsnId(11)]);
		assert!(!switch.falls_through());
		assert!(Instruction::Jump { opcode: opcode::IFNULL, target: InsnId(0) }.falls_through());
		assert!(Instruction::Plain(opcode::ARETURN).is_return());
	}
}
