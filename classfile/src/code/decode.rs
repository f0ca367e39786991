use log::debug;
use crate::bytes::{ByteReader, ClassRead};
use crate::code::labels::ReadLabels;
use crate::code::{Code, CodeAttribute, DeclaredFrame, ExceptionHandler, FrameKind, Insn, InsnId, Instruction, LineNumber, LocalVariable};
use crate::constants::{attribute, opcode};
use crate::error::malformed;
use crate::frames::VerificationType;
use crate::model::RawAttribute;
use crate::pool::ConstantPool;
use crate::ClassFileError;

/// Reads the body of a `Code` attribute.
///
/// Branch targets are resolved to instruction ids, which fails if any branch points into the
/// middle of an instruction.
pub(crate) fn read_code(reader: &mut ByteReader, name_index: u16, pool: &ConstantPool) -> Result<Code, ClassFileError> {
	let encoded = reader.rest().to_vec();

	let max_stack = reader.read_u16()?;
	let max_locals = reader.read_u16()?;

	let code_length = reader.read_u32()?;
	if code_length == 0 || code_length > u16::MAX as u32 {
		return Err(malformed!("`code_length` must be greater than zero and less than 65536, got {code_length:?}"));
	}
	let code_length = code_length as u16;

	let mut bytecode = reader.sub_reader(code_length as usize)?;
	let mut offsets = Vec::new();
	let mut instructions = Vec::new();
	while !bytecode.is_empty() {
		let opcode_pos = bytecode.position() as u16;
		let instruction = read_instruction(&mut bytecode, opcode_pos)
			.map_err(|e| match e {
				ClassFileError::MalformedFormat(message) => malformed!("{message} (at bytecode offset {opcode_pos})"),
				e => e,
			})?;
		offsets.push(opcode_pos);
		instructions.push(instruction);
	}

	let labels = ReadLabels::new(code_length, offsets);

	let mut insns = Vec::with_capacity(instructions.len());
	for (i, mut instruction) in instructions.into_iter().enumerate() {
		let mut error = None;
		instruction.for_each_target_mut(|target| match labels.try_get(target.0) {
			Ok(id) => *target = id,
			Err(e) => error = Some(e),
		});
		if let Some(e) = error {
			return Err(e);
		}
		insns.push(Insn::new(InsnId(i as u32), instruction));
	}

	let exception_table = reader.read_vec(
		|r| r.read_u16_as_usize(),
		|r| {
			let start = labels.try_get(r.read_u16()? as u32)?;
			let end = labels.try_get_exclusive(r.read_u16()? as u32)?;
			let handler = labels.try_get(r.read_u16()? as u32)?;
			let catch_type = r.read_u16()?;
			Ok(ExceptionHandler { start, end, handler, catch_type })
		}
	)?;

	let attributes = reader.read_vec(
		|r| r.read_u16_as_usize(),
		|r| {
			let name_index = r.read_u16()?;
			let length = r.read_u32_as_usize()?;
			let mut info = r.sub_reader(length)?;
			let raw = info.rest();

			let name = pool.utf8(name_index)
				.ok_or_else(|| malformed!("attribute name index {name_index} doesn't point to a Utf8 entry"))?;

			let parsed = match name {
				name if name == attribute::LINE_NUMBER_TABLE.as_bytes() => {
					read_line_numbers(&mut info, &labels)
						.map(|entries| CodeAttribute::LineNumberTable { name_index, entries })
				},
				name if name == attribute::LOCAL_VARIABLE_TABLE.as_bytes() => {
					read_local_variables(&mut info, &labels)
						.map(|entries| CodeAttribute::LocalVariableTable { name_index, entries })
				},
				name if name == attribute::LOCAL_VARIABLE_TYPE_TABLE.as_bytes() => {
					read_local_variables(&mut info, &labels)
						.map(|entries| CodeAttribute::LocalVariableTypeTable { name_index, entries })
				},
				name if name == attribute::STACK_MAP_TABLE.as_bytes() => {
					let frames = read_stack_map_table(&mut info, &labels, pool).unwrap_or_else(|e| {
						debug!("ignoring the frames of an unreadable StackMapTable: {e}");
						Vec::new()
					});
					Ok(CodeAttribute::StackMapTable { name_index, frames })
				},
				_ => Ok(CodeAttribute::Other(RawAttribute { name_index, info: raw.to_vec() })),
			};

			Ok(match parsed {
				Ok(attribute) => attribute,
				Err(e) => {
					// debug info we can't map to instructions is kept as is, and dropped once the code changes
					debug!("keeping unreadable {} attribute as raw bytes: {e}", pool.utf8_display(name_index));
					CodeAttribute::Other(RawAttribute { name_index, info: raw.to_vec() })
				},
			})
		}
	)?;

	if !reader.is_empty() {
		return Err(malformed!("{} extra bytes at the end of the Code attribute", reader.remaining()));
	}

	Ok(Code::from_parts(name_index, max_stack, max_locals, insns, exception_table, attributes, labels.into_offsets(), encoded))
}

fn read_line_numbers(reader: &mut ByteReader, labels: &ReadLabels) -> Result<Vec<LineNumber>, ClassFileError> {
	let entries = reader.read_vec(
		|r| r.read_u16_as_usize(),
		|r| {
			let start = labels.try_get(r.read_u16()? as u32)?;
			let line = r.read_u16()?;
			Ok(LineNumber { start, line })
		}
	)?;
	if !reader.is_empty() {
		return Err(malformed!("extra bytes after LineNumberTable"));
	}
	Ok(entries)
}

fn read_local_variables(reader: &mut ByteReader, labels: &ReadLabels) -> Result<Vec<LocalVariable>, ClassFileError> {
	let entries = reader.read_vec(
		|r| r.read_u16_as_usize(),
		|r| {
			let start_pc = r.read_u16()?;
			let length = r.read_u16()?;
			let start = labels.try_get(start_pc as u32)?;
			let end = labels.try_get_exclusive(start_pc as u32 + length as u32)?;
			Ok(LocalVariable {
				start,
				end,
				name_index: r.read_u16()?,
				descriptor_index: r.read_u16()?,
				index: r.read_u16()?,
			})
		}
	)?;
	if !reader.is_empty() {
		return Err(malformed!("extra bytes after local variable table"));
	}
	Ok(entries)
}

fn read_stack_map_table(reader: &mut ByteReader, labels: &ReadLabels, pool: &ConstantPool) -> Result<Vec<DeclaredFrame>, ClassFileError> {
	let mut offset: Option<u32> = None;
	let frames = reader.read_vec(
		|r| r.read_u16_as_usize(),
		|r| {
			let frame_type = r.read_u8()?;
			let (delta, kind) = match frame_type {
				0..=63 => (frame_type as u16, FrameKind::Same),
				64..=127 => (frame_type as u16 - 64, FrameKind::SameLocals1(read_verification_type(r, labels, pool)?)),
				247 => {
					let delta = r.read_u16()?;
					(delta, FrameKind::SameLocals1(read_verification_type(r, labels, pool)?))
				},
				248..=250 => (r.read_u16()?, FrameKind::Chop(251 - frame_type)),
				251 => (r.read_u16()?, FrameKind::Same),
				252..=254 => {
					let delta = r.read_u16()?;
					let locals = (0..frame_type - 251)
						.map(|_| read_verification_type(r, labels, pool))
						.collect::<Result<_, _>>()?;
					(delta, FrameKind::Append(locals))
				},
				255 => {
					let delta = r.read_u16()?;
					let locals = r.read_vec(|r| r.read_u16_as_usize(), |r| read_verification_type(r, labels, pool))?;
					let stack = r.read_vec(|r| r.read_u16_as_usize(), |r| read_verification_type(r, labels, pool))?;
					(delta, FrameKind::Full { locals, stack })
				},
				_ => return Err(malformed!("reserved stack map frame type {frame_type}")),
			};
			let pc = match offset {
				None => delta as u32,
				Some(previous) => previous + delta as u32 + 1,
			};
			offset = Some(pc);
			Ok(DeclaredFrame { at: labels.try_get(pc)?, kind })
		}
	)?;
	if !reader.is_empty() {
		return Err(malformed!("extra bytes after StackMapTable"));
	}
	Ok(frames)
}

fn read_verification_type(r: &mut ByteReader, labels: &ReadLabels, pool: &ConstantPool) -> Result<VerificationType, ClassFileError> {
	let tag = r.read_u8()?;
	Ok(match tag {
		0 => VerificationType::Top,
		1 => VerificationType::Integer,
		2 => VerificationType::Float,
		3 => VerificationType::Double,
		4 => VerificationType::Long,
		5 => VerificationType::Null,
		6 => VerificationType::UninitializedThis,
		7 => {
			let index = r.read_u16()?;
			let class = pool.class_name(index)
				.ok_or_else(|| malformed!("verification type refers to {index}, which is not a class"))?;
			VerificationType::Object(class.to_vec())
		},
		8 => VerificationType::Uninitialized(labels.try_get(r.read_u16()? as u32)?),
		tag => return Err(malformed!("unknown verification type tag {tag}")),
	})
}

/// Computes a branch target. The result is stored as an [`InsnId`] holding the raw offset, until
/// all instruction starts are known.
fn branch_target(opcode_pos: u16, branch: i32) -> Result<InsnId, ClassFileError> {
	(opcode_pos as u32).checked_add_signed(branch)
		.filter(|&target| target <= u16::MAX as u32)
		.map(InsnId)
		.ok_or_else(|| malformed!("branch offset {branch} from {opcode_pos} leaves the code"))
}

fn align_to_4_byte_boundary(reader: &mut ByteReader) -> Result<(), ClassFileError> {
	let padding = (4 - reader.position() % 4) % 4;
	reader.read_slice(padding)?;
	Ok(())
}

fn read_instruction(r: &mut ByteReader, opcode_pos: u16) -> Result<Instruction, ClassFileError> {
	let op = r.read_u8()?;
	Ok(match op {
		op if opcode::is_plain(op) => Instruction::Plain(op),
		opcode::BIPUSH => Instruction::BiPush(r.read_i8()?),
		opcode::SIPUSH => Instruction::SiPush(r.read_i16()?),
		opcode::LDC => Instruction::Ldc(r.read_u8()? as u16),
		opcode::LDC_W | opcode::LDC2_W => Instruction::Ldc(r.read_u16()?),
		opcode::ILOAD..=opcode::ALOAD |
		opcode::ISTORE..=opcode::ASTORE |
		opcode::RET => Instruction::Local { opcode: op, index: r.read_u8()? as u16 },
		opcode::ILOAD_0..=opcode::ALOAD_3 => {
			let n = op - opcode::ILOAD_0;
			Instruction::Local { opcode: opcode::ILOAD + (n >> 2), index: (n & 3) as u16 }
		},
		opcode::ISTORE_0..=opcode::ASTORE_3 => {
			let n = op - opcode::ISTORE_0;
			Instruction::Local { opcode: opcode::ISTORE + (n >> 2), index: (n & 3) as u16 }
		},
		opcode::IINC => Instruction::IInc {
			index: r.read_u8()? as u16,
			delta: r.read_i8()? as i16,
		},
		opcode::IFEQ..=opcode::JSR | opcode::IFNULL | opcode::IFNONNULL => {
			let target = branch_target(opcode_pos, r.read_i16()? as i32)?;
			Instruction::Jump { opcode: op, target }
		},
		opcode::GOTO_W => Instruction::Jump { opcode: opcode::GOTO, target: branch_target(opcode_pos, r.read_i32()?)? },
		opcode::JSR_W => Instruction::Jump { opcode: opcode::JSR, target: branch_target(opcode_pos, r.read_i32()?)? },
		opcode::TABLESWITCH => {
			align_to_4_byte_boundary(r)?;
			let default = branch_target(opcode_pos, r.read_i32()?)?;
			let low = r.read_i32()?;
			let high = r.read_i32()?;
			if low > high {
				return Err(malformed!("tableswitch with low {low} greater than high {high}"));
			}
			let n = (high as i64 - low as i64 + 1) as usize;
			let targets = r.read_vec(
				|_| Ok(n),
				|r| branch_target(opcode_pos, r.read_i32()?),
			)?;
			Instruction::TableSwitch { default, low, high, targets }
		},
		opcode::LOOKUPSWITCH => {
			align_to_4_byte_boundary(r)?;
			let default = branch_target(opcode_pos, r.read_i32()?)?;
			let pairs = r.read_vec(
				|r| usize::try_from(r.read_i32()?).map_err(|_| malformed!("lookupswitch with negative npairs")),
				|r| Ok((r.read_i32()?, branch_target(opcode_pos, r.read_i32()?)?)),
			)?;
			Instruction::LookupSwitch { default, pairs }
		},
		opcode::GETSTATIC..=opcode::PUTFIELD => Instruction::Field { opcode: op, index: r.read_u16()? },
		opcode::INVOKEVIRTUAL..=opcode::INVOKESTATIC => Instruction::Invoke { opcode: op, index: r.read_u16()? },
		opcode::INVOKEINTERFACE => {
			let index = r.read_u16()?;
			let count = r.read_u8()?;
			r.read_u8()?; // zero
			Instruction::InvokeInterface { index, count }
		},
		opcode::INVOKEDYNAMIC => {
			let index = r.read_u16()?;
			r.read_u16()?; // zero
			Instruction::InvokeDynamic { index }
		},
		opcode::NEW | opcode::ANEWARRAY | opcode::CHECKCAST | opcode::INSTANCEOF => {
			Instruction::Type { opcode: op, index: r.read_u16()? }
		},
		opcode::NEWARRAY => Instruction::NewArray { atype: r.read_u8()? },
		opcode::WIDE => {
			let op = r.read_u8()?;
			match op {
				opcode::ILOAD..=opcode::ALOAD |
				opcode::ISTORE..=opcode::ASTORE |
				opcode::RET => Instruction::Local { opcode: op, index: r.read_u16()? },
				opcode::IINC => Instruction::IInc {
					index: r.read_u16()?,
					delta: r.read_i16()?,
				},
				op => return Err(malformed!("opcode {op:#x} can't be used with `wide`")),
			}
		},
		opcode::MULTIANEWARRAY => Instruction::MultiANewArray {
			index: r.read_u16()?,
			dimensions: r.read_u8()?,
		},
		op => return Err(malformed!("unknown opcode {op:#x}")),
	})
}
