use std::collections::HashSet;
use log::debug;
use crate::bytes::{put_i16_at, put_i32_at, ClassWrite};
use crate::code::labels::WriteLabels;
use crate::code::{Code, CodeAttribute, Insn, InsnId, Instruction, LocalVariable};
use crate::constants::opcode;
use crate::pool::{ConstantPool, PoolEntry};
use crate::ClassFileError;

/// Bytecode produced from a list of instructions, with the offset of every instruction.
pub(crate) struct EncodedCode {
	pub(crate) bytecode: Vec<u8>,
	pub(crate) labels: WriteLabels,
	/// Instructions directly after a conditional jump that was widened into a jump over a `goto_w`.
	/// These become branch targets, and need a frame.
	pub(crate) widened_successors: Vec<InsnId>,
}

fn compute_signed_offset(opcode_pos: u16, target: u16) -> i32 {
	(target as i32) - (opcode_pos as i32)
}

/// Stores the information necessary for later inserting a branch offset as an [`i16`] or [`i32`].
struct UnwrittenLabel {
	/// The position of the opcode the offset is relative to.
	opcode_pos: u16,
	/// The index of the instruction being written, in the instruction list.
	instruction_index: usize,
	target: InsnId,
	/// The position to put the resolved offset at.
	label_write_pos: usize,
	/// If true, use an [`i32`], if false use an [`i16`].
	wide: bool,
}

/// The state of one encoding attempt.
struct Attempt<'w> {
	w: Vec<u8>,
	/// Offsets of the instructions written so far. Backward jumps are resolved with these directly.
	labels: WriteLabels,
	wide: &'w HashSet<usize>,
	unwritten: Vec<UnwrittenLabel>,
	/// Indices of conditional jumps written as a jump over a `goto_w`.
	widened: Vec<usize>,
}

impl Attempt<'_> {
	fn if_helper(&mut self, opcode_pos: u16, instruction_index: usize, target: InsnId, op: u8, opposite: u8) {
		// +1 for the opcode, +2 for the branch, +1 for the GOTO_W opcode, +4 for that branch
		const OVER_GOTO_W: i16 = 1 + 2 + 1 + 4;

		if let Some(target) = self.labels.get(target) {
			let branch = compute_signed_offset(opcode_pos, target);

			if let Ok(branch) = i16::try_from(branch) {
				self.w.write_u8(op);
				self.w.write_i16(branch);
			} else {
				// +1 for the opcode, +2 for the branch
				let branch = compute_signed_offset(opcode_pos + 1 + 2, target);

				self.w.write_u8(opposite);
				self.w.write_i16(OVER_GOTO_W);
				self.w.write_u8(opcode::GOTO_W);
				self.w.write_i32(branch);
				self.widened.push(instruction_index);
			}
		} else if self.wide.contains(&instruction_index) {
			self.unwritten.push(UnwrittenLabel {
				// relative to the goto_w: +1 for the opposite opcode, +2 for its branch
				opcode_pos: opcode_pos + 1 + 2,
				instruction_index,
				target,
				// +1 for the opposite opcode, +2 for that branch, +1 for the GOTO_W opcode
				label_write_pos: opcode_pos as usize + 1 + 2 + 1,
				wide: true,
			});

			self.w.write_u8(opposite);
			self.w.write_i16(OVER_GOTO_W);
			self.w.write_u8(opcode::GOTO_W);
			self.w.write_i32(i32::MAX);
			self.widened.push(instruction_index);
		} else {
			self.unwritten.push(UnwrittenLabel {
				opcode_pos,
				instruction_index,
				target,
				label_write_pos: opcode_pos as usize + 1,
				wide: false,
			});

			self.w.write_u8(op);
			self.w.write_i16(i16::MAX);
		}
	}

	fn goto_helper(&mut self, opcode_pos: u16, instruction_index: usize, target: InsnId, op: u8, wide_op: u8) {
		if let Some(target) = self.labels.get(target) {
			let branch = compute_signed_offset(opcode_pos, target);

			if let Ok(branch) = i16::try_from(branch) {
				self.w.write_u8(op);
				self.w.write_i16(branch);
			} else {
				self.w.write_u8(wide_op);
				self.w.write_i32(branch);
			}
		} else {
			let wide = self.wide.contains(&instruction_index);
			self.unwritten.push(UnwrittenLabel {
				opcode_pos,
				instruction_index,
				target,
				label_write_pos: opcode_pos as usize + 1,
				wide,
			});

			if wide {
				self.w.write_u8(wide_op);
				self.w.write_i32(i32::MAX);
			} else {
				self.w.write_u8(op);
				self.w.write_i16(i16::MAX);
			}
		}
	}

	fn switch_helper(&mut self, opcode_pos: u16, instruction_index: usize, target: InsnId) {
		let branch = if let Some(target) = self.labels.get(target) {
			compute_signed_offset(opcode_pos, target)
		} else {
			self.unwritten.push(UnwrittenLabel {
				opcode_pos,
				instruction_index,
				target,
				label_write_pos: self.w.len(),
				wide: true,
			});
			i32::MAX
		};
		self.w.write_i32(branch);
	}

	fn align_to_4_byte_boundary(&mut self) {
		while self.w.len() % 4 != 0 {
			self.w.write_u8(0);
		}
	}

	fn write_local(&mut self, op: u8, index: u16) {
		let (base, short_base) = match op {
			opcode::ILOAD..=opcode::ALOAD => (opcode::ILOAD, Some(opcode::ILOAD_0)),
			opcode::ISTORE..=opcode::ASTORE => (opcode::ISTORE, Some(opcode::ISTORE_0)),
			_ => (op, None),
		};
		match (short_base, u8::try_from(index)) {
			(Some(short_base), Ok(index @ 0..=3)) => self.w.write_u8(((op - base) << 2 | index) + short_base),
			(_, Ok(index)) => {
				self.w.write_u8(op);
				self.w.write_u8(index);
			},
			(_, Err(_)) => {
				self.w.write_u8(opcode::WIDE);
				self.w.write_u8(op);
				self.w.write_u16(index);
			},
		}
	}

	fn write_instruction(&mut self, pool: &ConstantPool, opcode_pos: u16, instruction_index: usize, instruction: &Instruction) -> Result<(), ClassFileError> {
		match *instruction {
			Instruction::Plain(op) => self.w.write_u8(op),
			Instruction::BiPush(value) => {
				self.w.write_u8(opcode::BIPUSH);
				self.w.write_i8(value);
			},
			Instruction::SiPush(value) => {
				self.w.write_u8(opcode::SIPUSH);
				self.w.write_i16(value);
			},
			Instruction::Ldc(index) => {
				if is_two_slot_constant(pool, index) {
					self.w.write_u8(opcode::LDC2_W);
					self.w.write_u16(index);
				} else if let Ok(index) = u8::try_from(index) {
					self.w.write_u8(opcode::LDC);
					self.w.write_u8(index);
				} else {
					self.w.write_u8(opcode::LDC_W);
					self.w.write_u16(index);
				}
			},
			Instruction::Local { opcode, index } => self.write_local(opcode, index),
			Instruction::IInc { index, delta } => {
				if let (Ok(index), Ok(delta)) = (u8::try_from(index), i8::try_from(delta)) {
					self.w.write_u8(opcode::IINC);
					self.w.write_u8(index);
					self.w.write_i8(delta);
				} else {
					self.w.write_u8(opcode::WIDE);
					self.w.write_u8(opcode::IINC);
					self.w.write_u16(index);
					self.w.write_i16(delta);
				}
			},
			Instruction::Jump { opcode: opcode::GOTO, target } => {
				self.goto_helper(opcode_pos, instruction_index, target, opcode::GOTO, opcode::GOTO_W);
			},
			Instruction::Jump { opcode: opcode::JSR, target } => {
				self.goto_helper(opcode_pos, instruction_index, target, opcode::JSR, opcode::JSR_W);
			},
			Instruction::Jump { opcode: op, target } => {
				let opposite = opcode::invert_condition(op)
					.ok_or_else(|| ClassFileError::Encoding(format!("opcode {op:#x} is not a jump")))?;
				self.if_helper(opcode_pos, instruction_index, target, op, opposite);
			},
			Instruction::TableSwitch { default, low, high, ref targets } => {
				self.w.write_u8(opcode::TABLESWITCH);
				self.align_to_4_byte_boundary();

				if low > high {
					return Err(ClassFileError::Encoding(format!("tableswitch `low` {low} must be lower or equal to `high` {high}")));
				}
				let n = (high as i64 - low as i64 + 1) as usize;
				if targets.len() != n {
					return Err(ClassFileError::Encoding(format!(
						"tableswitch bounds span {n} cases, but there are {} targets", targets.len()
					)));
				}

				self.switch_helper(opcode_pos, instruction_index, default);
				self.w.write_i32(low);
				self.w.write_i32(high);
				for &target in targets {
					self.switch_helper(opcode_pos, instruction_index, target);
				}
			},
			Instruction::LookupSwitch { default, ref pairs } => {
				self.w.write_u8(opcode::LOOKUPSWITCH);
				self.align_to_4_byte_boundary();

				if !pairs.windows(2).all(|x| x[0].0 < x[1].0) {
					return Err(ClassFileError::Encoding("lookupswitch keys must be sorted and unique".to_owned()));
				}

				self.switch_helper(opcode_pos, instruction_index, default);
				let n = i32::try_from(pairs.len())
					.map_err(|_| ClassFileError::Encoding(format!("lookupswitch with {} pairs", pairs.len())))?;
				self.w.write_i32(n);
				for &(key, target) in pairs {
					self.w.write_i32(key);
					self.switch_helper(opcode_pos, instruction_index, target);
				}
			},
			Instruction::Field { opcode, index } |
			Instruction::Invoke { opcode, index } |
			Instruction::Type { opcode, index } => {
				self.w.write_u8(opcode);
				self.w.write_u16(index);
			},
			Instruction::InvokeInterface { index, count } => {
				self.w.write_u8(opcode::INVOKEINTERFACE);
				self.w.write_u16(index);
				self.w.write_u8(count);
				self.w.write_u8(0); // zero
			},
			Instruction::InvokeDynamic { index } => {
				self.w.write_u8(opcode::INVOKEDYNAMIC);
				self.w.write_u16(index);
				self.w.write_u16(0); // zero
			},
			Instruction::NewArray { atype } => {
				self.w.write_u8(opcode::NEWARRAY);
				self.w.write_u8(atype);
			},
			Instruction::MultiANewArray { index, dimensions } => {
				self.w.write_u8(opcode::MULTIANEWARRAY);
				self.w.write_u16(index);
				self.w.write_u8(dimensions);
			},
		}
		Ok(())
	}
}

/// Whether `ldc2_w` must be used to load the constant at `index`.
pub(crate) fn is_two_slot_constant(pool: &ConstantPool, index: u16) -> bool {
	match pool.get(index) {
		Some(PoolEntry::Long { .. } | PoolEntry::Double { .. }) => true,
		Some(PoolEntry::Dynamic { .. }) => pool.dynamic_name_and_type(index)
			.is_some_and(|(_, descriptor)| descriptor == b"J" || descriptor == b"D"),
		_ => false,
	}
}

/// Encodes instructions into bytecode.
///
/// # Branch offset algorithm
///
/// Instructions like `goto` or `ifeq` store branch offsets as an [`i16`], but a method may be up to
/// [`u16::MAX`] bytes long. `goto` and `jsr` have `_w` variants taking an [`i32`]. Conditional jumps
/// don't, so one whose offset doesn't fit is replaced by the jump with the inverted condition over
/// a `goto_w`:
/// ```txt,ignore
/// L2: if_x Lx          L2: if_not_x L3
/// L3: ...          =>      goto_w Lx
///                      L3: ...
/// ```
/// The replacement is longer, which moves all later instructions, and may push other jumps out
/// of range as well.
///
/// So we just try writing the bytecode. Backward targets are known and get the right form
/// directly. Forward targets get a placeholder, normal or wide depending on whether an earlier
/// attempt already found that instruction's jump too long. Once everything is written the
/// placeholders are filled in. If one doesn't fit, its instruction is marked wide and we start over.
/// Since instructions only ever become wide, this terminates.
pub(crate) fn encode_instructions(insns: &[Insn], pool: &ConstantPool) -> Result<EncodedCode, ClassFileError> {
	// All instruction indices that need to use the "wide" format.
	// These are indices into `insns`, as they are constant over multiple attempts.
	let mut wide: HashSet<usize> = HashSet::new();

	// Each run here is one attempt.
	'a: loop {
		let mut attempt = Attempt {
			w: Vec::new(),
			labels: WriteLabels::new(),
			wide: &wide,
			unwritten: Vec::new(),
			widened: Vec::new(),
		};

		for (instruction_index, insn) in insns.iter().enumerate() {
			let opcode_pos = u16::try_from(attempt.w.len())
				.map_err(|_| ClassFileError::Encoding(format!("code size exceeded u16::MAX: {}", attempt.w.len())))?;
			// added before writing, so that jumps to the instruction itself are backward jumps
			attempt.labels.add(insn.id, opcode_pos);

			attempt.write_instruction(pool, opcode_pos, instruction_index, &insn.instruction)?;
		}

		let code_length = attempt.w.len();
		if code_length == 0 || code_length > u16::MAX as usize {
			return Err(ClassFileError::Encoding(format!(
				"`code_length` must be greater than zero and less than 65536, got {code_length}"
			)));
		}

		let Attempt { mut w, mut labels, unwritten, widened, .. } = attempt;
		labels.set_end(code_length as u16);

		for unwritten in unwritten {
			let target = labels.try_get(unwritten.target)?;
			let branch = compute_signed_offset(unwritten.opcode_pos, target);

			if unwritten.wide {
				put_i32_at(&mut w, unwritten.label_write_pos, branch);
			} else if let Ok(branch) = i16::try_from(branch) {
				put_i16_at(&mut w, unwritten.label_write_pos, branch);
			} else {
				// The branch doesn't fit into the space reserved for it,
				// try again, with writing this jump in the wide form.
				wide.insert(unwritten.instruction_index);
				continue 'a;
			}
		}

		let widened_successors = widened.into_iter()
			.filter_map(|index| insns.get(index + 1))
			.map(|insn| insn.id)
			.collect();

		return Ok(EncodedCode { bytecode: w, labels, widened_successors });
	}
}

fn write_attribute(w: &mut Vec<u8>, name_index: u16, body: &[u8]) -> Result<(), ClassFileError> {
	w.write_u16(name_index);
	w.write_usize_as_u32(body.len())?;
	w.write_u8_slice(body);
	Ok(())
}

fn write_local_variables(labels: &WriteLabels, entries: &[LocalVariable]) -> Result<Vec<u8>, ClassFileError> {
	let mut resolved = Vec::with_capacity(entries.len());
	for entry in entries {
		let (Some(start), Ok(end)) = (labels.get(entry.start), labels.try_get_exclusive(entry.end)) else {
			debug!("dropping local variable {} in slot {}, its range no longer exists", entry.name_index, entry.index);
			continue;
		};
		if end < start {
			debug!("dropping local variable {} in slot {}, its range got reordered", entry.name_index, entry.index);
			continue;
		}
		resolved.push((start, end - start, entry));
	}

	let mut w = Vec::new();
	w.write_slice(&resolved, |w, &(start, length, entry)| {
		w.write_u16(start);
		w.write_u16(length);
		w.write_u16(entry.name_index);
		w.write_u16(entry.descriptor_index);
		w.write_u16(entry.index);
		Ok(())
	})?;
	Ok(w)
}

/// Assembles the body of a `Code` attribute around freshly encoded instructions.
///
/// Line numbers and local variables are resolved against the new offsets, entries whose
/// instructions are gone are dropped. `stack_map` is the name index and body of the new
/// `StackMapTable`, which takes the place of the old one. Other nested attributes can't be
/// updated and are dropped.
pub(crate) fn write_code_attribute(code: &Code, encoded: &EncodedCode, stack_map: Option<(u16, Vec<u8>)>) -> Result<Vec<u8>, ClassFileError> {
	let labels = &encoded.labels;

	let mut w = Vec::new();
	w.write_u16(code.max_stack);
	w.write_u16(code.max_locals);
	w.write_usize_as_u32(encoded.bytecode.len())?;
	w.write_u8_slice(&encoded.bytecode);

	let mut handlers = Vec::with_capacity(code.exception_table().len());
	for handler in code.exception_table() {
		let start = labels.try_get(handler.start)?;
		let end = labels.try_get_exclusive(handler.end)?;
		let handler_pc = labels.try_get(handler.handler)?;
		if start >= end {
			debug!("dropping empty exception handler range {start}..{end}");
			continue;
		}
		handlers.push((start, end, handler_pc, handler.catch_type));
	}
	w.write_slice(&handlers, |w, &(start, end, handler, catch_type)| {
		w.write_u16(start);
		w.write_u16(end);
		w.write_u16(handler);
		w.write_u16(catch_type);
		Ok(())
	})?;

	let mut stack_map = stack_map;
	let mut attributes: Vec<(u16, Vec<u8>)> = Vec::new();
	for attribute in &code.attributes {
		match attribute {
			CodeAttribute::LineNumberTable { name_index, entries } => {
				let entries: Vec<_> = entries.iter()
					.filter_map(|entry| labels.get(entry.start).map(|start| (start, entry.line)))
					.collect();
				let mut body = Vec::new();
				body.write_slice(&entries, |w, &(start, line)| {
					w.write_u16(start);
					w.write_u16(line);
					Ok(())
				})?;
				attributes.push((*name_index, body));
			},
			CodeAttribute::LocalVariableTable { name_index, entries } |
			CodeAttribute::LocalVariableTypeTable { name_index, entries } => {
				attributes.push((*name_index, write_local_variables(labels, entries)?));
			},
			CodeAttribute::StackMapTable { .. } => {
				if let Some(stack_map) = stack_map.take() {
					attributes.push(stack_map);
				}
			},
			CodeAttribute::Other(raw) => {
				debug!("dropping nested attribute {} of modified code", raw.name_index);
			},
		}
	}
	if let Some(stack_map) = stack_map {
		attributes.push(stack_map);
	}

	w.write_usize_as_u16(attributes.len())?;
	for (name_index, body) in &attributes {
		write_attribute(&mut w, *name_index, body)?;
	}

	Ok(w)
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use crate::code::encode::encode_instructions;
	use crate::code::{Insn, InsnId, Instruction};
	use crate::constants::opcode;
	use crate::pool::ConstantPool;

	fn insns(instructions: Vec<Instruction>) -> Vec<Insn> {
		instructions.into_iter()
			.enumerate()
			.map(|(i, instruction)| Insn::new(InsnId(i as u32), instruction))
			.collect()
	}

	#[test]
	fn short_forms() {
		let pool = ConstantPool::new();
		let encoded = encode_instructions(&insns(vec![
			Instruction::Local { opcode: opcode::ALOAD, index: 0 },
			Instruction::Local { opcode: opcode::ISTORE, index: 3 },
			Instruction::Local { opcode: opcode::DLOAD, index: 4 },
			Instruction::Local { opcode: opcode::LSTORE, index: 300 },
			Instruction::IInc { index: 1, delta: -1 },
			Instruction::IInc { index: 1, delta: 1000 },
			Instruction::Plain(opcode::RETURN),
		]), &pool).unwrap();

		assert_eq!(encoded.bytecode, vec![
			opcode::ALOAD_0,
			opcode::ISTORE_3,
			opcode::DLOAD, 4,
			opcode::WIDE, opcode::LSTORE, 0x01, 0x2c,
			opcode::IINC, 1, 0xff,
			opcode::WIDE, opcode::IINC, 0x00, 0x01, 0x03, 0xe8,
			opcode::RETURN,
		]);
		assert_eq!(encoded.labels.get(InsnId(6)), Some(17));
		assert!(encoded.widened_successors.is_empty());
	}

	#[test]
	fn ldc_forms() {
		let mut pool = ConstantPool::new();
		let int = pool.put_integer(70000).unwrap();
		let long = pool.put_long(1).unwrap();
		let encoded = encode_instructions(&insns(vec![
			Instruction::Ldc(int),
			Instruction::Ldc(long),
			Instruction::Ldc(300),
		]), &pool).unwrap();

		assert_eq!(encoded.bytecode, vec![
			opcode::LDC, int as u8,
			opcode::LDC2_W, 0x00, long as u8,
			opcode::LDC_W, 0x01, 0x2c,
		]);
	}

	#[test]
	fn switch_padding() {
		let pool = ConstantPool::new();
		let encoded = encode_instructions(&insns(vec![
			Instruction::Plain(opcode::ICONST_0),
			Instruction::TableSwitch { default: InsnId(2), low: 0, high: 0, targets: vec![InsnId(3)] },
			Instruction::Plain(opcode::RETURN),
			Instruction::Plain(opcode::RETURN),
		]), &pool).unwrap();

		// tableswitch at 1, padding to 4, then default, low, high and one target
		assert_eq!(encoded.bytecode, vec![
			opcode::ICONST_0,
			opcode::TABLESWITCH, 0, 0,
			0, 0, 0, 19,
			0, 0, 0, 0,
			0, 0, 0, 0,
			0, 0, 0, 20,
			opcode::RETURN,
			opcode::RETURN,
		]);
	}

	#[test]
	fn backward_and_forward_jumps() {
		let pool = ConstantPool::new();
		let encoded = encode_instructions(&insns(vec![
			Instruction::Local { opcode: opcode::ILOAD, index: 0 },
			Instruction::Jump { opcode: opcode::IFEQ, target: InsnId(3) },
			Instruction::Jump { opcode: opcode::GOTO, target: InsnId(0) },
			Instruction::Plain(opcode::RETURN),
		]), &pool).unwrap();

		assert_eq!(encoded.bytecode, vec![
			opcode::ILOAD_0,
			opcode::IFEQ, 0x00, 0x06,
			opcode::GOTO, 0xff, 0xfc,
			opcode::RETURN,
		]);
	}

	#[test]
	fn far_conditional_jump_gets_widened() {
		let pool = ConstantPool::new();
		// ifeq over 40000 nops to the return
		let mut instructions = vec![
			Instruction::Local { opcode: opcode::ILOAD, index: 0 },
			Instruction::Jump { opcode: opcode::IFEQ, target: InsnId(40002) },
		];
		instructions.extend(std::iter::repeat(Instruction::Plain(opcode::NOP)).take(40000));
		instructions.push(Instruction::Plain(opcode::RETURN));
		let encoded = encode_instructions(&insns(instructions), &pool).unwrap();

		// ifne over the goto_w, then goto_w to the return
		assert_eq!(encoded.bytecode[..9], [
			opcode::ILOAD_0,
			opcode::IFNE, 0x00, 0x08,
			opcode::GOTO_W, 0x00, 0x00, 0x9c, 0x45,
		]);
		assert_eq!(encoded.labels.get(InsnId(2)), Some(9));
		assert_eq!(encoded.labels.get(InsnId(40002)), Some(40009));
		assert_eq!(encoded.widened_successors, vec![InsnId(2)]);
	}

	#[test]
	fn unknown_target() {
		let pool = ConstantPool::new();
		let result = encode_instructions(&insns(vec![
			Instruction::Jump { opcode: opcode::GOTO, target: InsnId(7) },
		]), &pool);
		assert!(result.is_err());
	}
}
