use std::collections::HashMap;
use crate::code::{InsnId, Position};
use crate::error::malformed;
use crate::ClassFileError;

/// Resolves bytecode offsets of code being read to the instructions starting there.
pub(crate) struct ReadLabels {
	code_length: u16,
	/// Start offset of each instruction, in order. Instruction `i` gets `InsnId(i)`.
	offsets: Vec<u16>,
}

impl ReadLabels {
	pub(crate) fn new(code_length: u16, offsets: Vec<u16>) -> ReadLabels {
		ReadLabels { code_length, offsets }
	}

	pub(crate) fn into_offsets(self) -> Vec<u16> {
		self.offsets
	}

	pub(crate) fn get(&self, pc: u16) -> Option<InsnId> {
		self.offsets.binary_search(&pc).ok().map(|i| InsnId(i as u32))
	}

	pub(crate) fn try_get(&self, pc: u32) -> Result<InsnId, ClassFileError> {
		u16::try_from(pc).ok()
			.and_then(|pc| self.get(pc))
			.ok_or_else(|| malformed!("bytecode offset {pc} is not the start of an instruction"))
	}

	/// Like [`ReadLabels::try_get`], but allows the offset just past the last instruction.
	pub(crate) fn try_get_exclusive(&self, pc: u32) -> Result<Position, ClassFileError> {
		if pc == self.code_length as u32 {
			Ok(Position::End)
		} else {
			self.try_get(pc).map(Position::At)
		}
	}
}

/// Bytecode offsets assigned to instructions during one encoding attempt.
pub(crate) struct WriteLabels {
	offsets: HashMap<InsnId, u16>,
	end: u16,
}

impl WriteLabels {
	pub(crate) fn new() -> WriteLabels {
		WriteLabels { offsets: HashMap::new(), end: 0 }
	}

	pub(crate) fn add(&mut self, id: InsnId, opcode_pos: u16) {
		self.offsets.insert(id, opcode_pos);
	}

	pub(crate) fn set_end(&mut self, end: u16) {
		self.end = end;
	}

	pub(crate) fn get(&self, id: InsnId) -> Option<u16> {
		self.offsets.get(&id).copied()
	}

	pub(crate) fn try_get(&self, id: InsnId) -> Result<u16, ClassFileError> {
		self.get(id).ok_or_else(|| ClassFileError::Encoding(format!("no instruction with id {id}")))
	}

	pub(crate) fn try_get_exclusive(&self, position: Position) -> Result<u16, ClassFileError> {
		match position {
			Position::At(id) => self.try_get(id),
			Position::End => Ok(self.end),
		}
	}
}
