//! Applies the patches of one class to its model.
//!
//! Patches are applied one after another, in the order the registry returns them. A patch either
//! applies completely, or the class is left as it was before the patch and the patch is reported
//! as skipped.
//!
//! Conflicts between patches touching the same method are resolved by order, which is priority:
//! - the first `ReplaceBody` of a method wins, later ones are dropped,
//! - inserts and redirections after a `ReplaceBody` of the method are dropped,
//! - a `ReplaceBody` after inserts or redirections discards them.
//!
//! All of these are recorded as conflicts in the report.

use std::collections::HashMap;
use log::debug;
use classfile::code::{Code, InsnId, Instruction};
use classfile::constants::access;
use classfile::descriptor;
use classfile::model::{ClassModel, MethodAttribute};
use classfile::pool::{ConstantPool, MemberKind};
use crate::asm::Template;
use crate::error::invalid;
use crate::patch::{Anchor, Edit, InvokeKind, MethodRef, MethodSig, Modifier, PatchDescriptor};
use crate::report::ClassReport;
use crate::WeaveError;

/// Applies `patches` in order, recording the result of each edit in `report`.
///
/// The code of changed methods still has to be recomputed with [`ClassModel::recompute_dirty`].
pub fn apply(class: &mut ClassModel, patches: &[PatchDescriptor], report: &mut ClassReport) {
	debug!("applying {} patch(es) to {}", patches.len(), class.name_display());
	let mut pipeline = Pipeline { class, methods: HashMap::new() };
	for patch in patches {
		pipeline.apply_patch(patch, report);
	}
}

/// What earlier patches did to a method.
#[derive(Debug, Clone, Default)]
struct MethodState {
	/// The patch that replaced the code.
	replaced_by: Option<String>,
	/// Patches that inserted code or redirected calls.
	edited_by: Vec<String>,
	/// The last instruction inserted at the method entry.
	entry_end: Option<InsnId>,
	/// The last instruction inserted after a call, by call.
	after_call: HashMap<InsnId, InsnId>,
}

enum Note {
	Applied(String),
	Conflict(WeaveError),
}

struct Pipeline<'a> {
	class: &'a mut ClassModel,
	/// By index into the methods of the class.
	methods: HashMap<usize, MethodState>,
}

impl Pipeline<'_> {
	fn apply_patch(&mut self, patch: &PatchDescriptor, report: &mut ClassReport) {
		let class = self.class.clone();
		let methods = self.methods.clone();

		match self.apply_edits(patch) {
			Ok(notes) => {
				for note in notes {
					match note {
						Note::Applied(detail) => report.applied(&patch.id, detail),
						Note::Conflict(error) => report.conflict(&patch.id, error),
					}
				}
			},
			Err(e) => {
				*self.class = class;
				self.methods = methods;
				report.skipped(&patch.id, e);
			},
		}
	}

	fn apply_edits(&mut self, patch: &PatchDescriptor) -> Result<Vec<Note>, WeaveError> {
		let mut notes = Vec::with_capacity(patch.edits.len());
		for edit in &patch.edits {
			let note = match edit {
				Edit::AddMethod { access, name, descriptor, code, overwrite } => {
					self.add_method(patch, edit, access, name, descriptor, code.as_ref(), *overwrite)?
				},
				Edit::AddField { access, name, descriptor, overwrite } => {
					self.add_field(edit, access, name, descriptor, *overwrite)?
				},
				Edit::ReplaceBody { code } => self.replace_body(patch, edit, code)?,
				Edit::InsertAt { anchor, code } => self.insert_at(patch, edit, anchor, code)?,
				Edit::RedirectCall { original, replacement, kind, required } => {
					self.redirect_call(patch, edit, original, replacement, *kind, *required)?
				},
			};
			notes.push(note);
		}
		Ok(notes)
	}

	/// The index of the target method of the patch.
	fn target<'p>(&self, patch: &'p PatchDescriptor) -> Result<(usize, &'p MethodSig), WeaveError> {
		let sig = patch.method.as_ref()
			.ok_or_else(|| invalid!("patch {} has no target method", patch.id))?;
		let index = self.class.method_index(&sig.name, &sig.descriptor)
			.ok_or_else(|| WeaveError::TargetNotFound(format!("method {sig} in class {}", self.class.name_display())))?;
		Ok((index, sig))
	}

	fn duplicate(&self, name: &str, descriptor: &str) -> WeaveError {
		WeaveError::DuplicateMember {
			class: self.class.name_display(),
			member: format!("{name} {descriptor}"),
		}
	}

	#[allow(clippy::too_many_arguments)]
	fn add_method(
		&mut self,
		patch: &PatchDescriptor,
		edit: &Edit,
		modifiers: &[Modifier],
		name: &str,
		descriptor: &str,
		template: Option<&Template>,
		overwrite: bool,
	) -> Result<Note, WeaveError> {
		let existing = self.class.method_index(name, descriptor);
		if existing.is_some() && !overwrite {
			return Err(self.duplicate(name, descriptor));
		}

		let code = match template {
			Some(template) => {
				let mut code = self.class.new_code()?;
				let insns = template.materialize(&mut code, &mut self.class.pool)?;
				code.replace_instructions(insns, Vec::new());
				// so that later patches can anchor on it
				code.treat_as_original();
				Some(code)
			},
			None => None,
		};
		let flags = Modifier::access_flags(modifiers);

		let Some(index) = existing else {
			self.class.add_method(flags, name, descriptor, code)?;
			return Ok(Note::Applied(edit.to_string()));
		};

		let method = &mut self.class.methods[index];
		method.access = flags;
		method.attributes.retain(|attribute| !matches!(attribute, MethodAttribute::Code(_)));
		if let Some(code) = code {
			method.set_code(code);
		}

		let previous = self.methods.insert(index, MethodState {
			replaced_by: Some(patch.id.clone()),
			..MethodState::default()
		});
		let changed_by: Vec<String> = previous.into_iter()
			.flat_map(|state| state.replaced_by.into_iter().chain(state.edited_by))
			.collect();
		Ok(if changed_by.is_empty() {
			Note::Applied(format!("{edit}, overwriting the existing method"))
		} else {
			Note::Conflict(WeaveError::StructuralConflict(format!("{edit} overwrites the method changed by {}", changed_by.join(", "))))
		})
	}

	fn add_field(&mut self, edit: &Edit, modifiers: &[Modifier], name: &str, descriptor: &str, overwrite: bool) -> Result<Note, WeaveError> {
		let flags = Modifier::access_flags(modifiers);
		match self.class.field_index(name, descriptor) {
			Some(index) if overwrite => {
				self.class.fields[index].access = flags;
				Ok(Note::Applied(format!("{edit}, overwriting the existing field")))
			},
			Some(_) => Err(self.duplicate(name, descriptor)),
			None => {
				self.class.add_field(flags, name, descriptor)?;
				Ok(Note::Applied(edit.to_string()))
			},
		}
	}

	fn replace_body(&mut self, patch: &PatchDescriptor, edit: &Edit, template: &Template) -> Result<Note, WeaveError> {
		let (index, sig) = self.target(patch)?;

		let state = self.methods.entry(index).or_default();
		if let Some(winner) = &state.replaced_by {
			return Ok(Note::Conflict(WeaveError::StructuralConflict(format!("{edit} of {sig} dropped, the body was already replaced by {winner}"))));
		}
		let discarded = std::mem::take(&mut state.edited_by);
		*state = MethodState {
			replaced_by: Some(patch.id.clone()),
			..MethodState::default()
		};

		if self.class.methods[index].code().is_none() {
			let code = self.class.new_code()?;
			let method = &mut self.class.methods[index];
			method.access &= !(access::ACC_ABSTRACT | access::ACC_NATIVE);
			method.set_code(code);
		}
		let ClassModel { pool, methods, .. } = &mut *self.class;
		let code = methods[index].code_mut()
			.ok_or_else(|| WeaveError::TargetNotFound(format!("code of method {sig}")))?;
		let insns = template.materialize(code, pool)?;
		code.replace_instructions(insns, Vec::new());

		Ok(if discarded.is_empty() {
			Note::Applied(format!("{edit} of {sig}"))
		} else {
			Note::Conflict(WeaveError::StructuralConflict(format!("{edit} of {sig} discards the edits of {}", discarded.join(", "))))
		})
	}

	fn insert_at(&mut self, patch: &PatchDescriptor, edit: &Edit, anchor: &Anchor, template: &Template) -> Result<Note, WeaveError> {
		let (index, sig) = self.target(patch)?;

		let state = self.methods.entry(index).or_default();
		if let Some(winner) = &state.replaced_by {
			return Ok(Note::Conflict(WeaveError::StructuralConflict(format!("{edit} in {sig} dropped, the body was replaced by {winner}"))));
		}

		let ClassModel { pool, methods, .. } = &mut *self.class;
		let code = methods[index].code_mut()
			.ok_or_else(|| WeaveError::TargetNotFound(format!("{anchor} in method {sig}, which has no code")))?;
		let sites = anchor_sites(code, pool, anchor);
		if sites.is_empty() {
			return Err(WeaveError::TargetNotFound(format!("{anchor} in method {sig}")));
		}

		for &site in &sites {
			let insns = template.materialize(code, pool)?;
			let last = insns.last().map(|insn| insn.id);
			match anchor {
				Anchor::MethodEntry => {
					match state.entry_end {
						Some(end) => code.insert_after(end, insns),
						None => code.insert_before(site, insns, false),
					};
					state.entry_end = last;
				},
				Anchor::AfterInvoke(_) => {
					let after = state.after_call.get(&site).copied().unwrap_or(site);
					code.insert_after(after, insns);
					if let Some(last) = last {
						state.after_call.insert(site, last);
					}
				},
				Anchor::BeforeReturn | Anchor::BeforeInvoke(_) | Anchor::Offset(_) | Anchor::Index(_) => {
					code.insert_before(site, insns, true);
				},
			}
		}
		state.edited_by.push(patch.id.clone());

		Ok(Note::Applied(format!("{edit} of {sig}, {} site(s)", sites.len())))
	}

	#[allow(clippy::too_many_arguments)]
	fn redirect_call(
		&mut self,
		patch: &PatchDescriptor,
		edit: &Edit,
		original: &MethodRef,
		replacement: &MethodRef,
		kind: Option<InvokeKind>,
		required: bool,
	) -> Result<Note, WeaveError> {
		let (targets, place) = match &patch.method {
			Some(_) => {
				let (index, sig) = self.target(patch)?;
				if let Some(winner) = self.methods.get(&index).and_then(|state| state.replaced_by.as_ref()) {
					return Ok(Note::Conflict(WeaveError::StructuralConflict(format!("{edit} in {sig} dropped, the body was replaced by {winner}"))));
				}
				(vec![index], format!("method {sig}"))
			},
			None => {
				let targets = (0..self.class.methods.len())
					.filter(|index| self.methods.get(index).map_or(true, |state| state.replaced_by.is_none()))
					.collect();
				(targets, format!("class {}", self.class.name_display()))
			},
		};

		let mut count = 0;
		for index in targets {
			let ClassModel { pool, methods, .. } = &mut *self.class;
			let Some(code) = methods[index].code_mut() else {
				continue;
			};
			let sites: Vec<usize> = code.instructions().iter().enumerate()
				.filter(|(_, insn)| code.is_original(insn.id))
				.filter(|(_, insn)| calls(pool, &insn.instruction, &original.owner, &original.name, &original.descriptor))
				.map(|(position, _)| position)
				.collect();
			if sites.is_empty() {
				continue;
			}

			for &position in &sites {
				let old = &code.instructions()[position].instruction;
				let old_kind = InvokeKind::from_opcode(old.opcode())
					.ok_or_else(|| invalid!("{edit}: not a call at {position}"))?;
				let new_kind = kind.unwrap_or(old_kind);
				if stack_effect(&original.descriptor, old_kind) != stack_effect(&replacement.descriptor, new_kind) {
					return Err(invalid!(
						"{edit}: calling {replacement} with {new_kind:?} doesn't take and return the same values as the call it replaces"
					));
				}
				let interface = match kind {
					Some(kind) => kind == InvokeKind::Interface,
					None => old.pool_index()
						.and_then(|index| pool.member_ref(index))
						.is_some_and(|member| member.kind == MemberKind::InterfaceMethod),
				};
				let index = pool.put_method_ref(&replacement.owner, &replacement.name, &replacement.descriptor, interface)?;
				let instruction = invoke(new_kind, index, &replacement.descriptor)?;
				code.instructions_mut()[position].instruction = instruction;
			}
			count += sites.len();
			self.methods.entry(index).or_default().edited_by.push(patch.id.clone());
		}

		match (count, required) {
			(0, true) => Err(WeaveError::TargetNotFound(format!("no call of {original} in {place}"))),
			(0, false) => Ok(Note::Applied(format!("{edit}, no calls in {place}"))),
			(count, _) => Ok(Note::Applied(format!("{edit} in {place}, {count} site(s)"))),
		}
	}
}

/// The instructions an anchor refers to, in code order.
fn anchor_sites(code: &Code, pool: &ConstantPool, anchor: &Anchor) -> Vec<InsnId> {
	let present = |id: InsnId| code.get(id).is_some();
	let original = code.instructions().iter().filter(|insn| code.is_original(insn.id));
	match anchor {
		Anchor::MethodEntry => code.instructions().first().map(|insn| insn.id).into_iter().collect(),
		Anchor::BeforeReturn => original.filter(|insn| insn.instruction.is_return()).map(|insn| insn.id).collect(),
		Anchor::BeforeInvoke(call) | Anchor::AfterInvoke(call) => {
			let mut matching = original
				.filter(|insn| calls(pool, &insn.instruction, &call.owner, &call.name, &call.descriptor))
				.map(|insn| insn.id);
			match call.ordinal {
				Some(n) => matching.nth(n).into_iter().collect(),
				None => matching.collect(),
			}
		},
		&Anchor::Offset(offset) => code.original_at_offset(offset).filter(|&id| present(id)).into_iter().collect(),
		&Anchor::Index(index) => code.original_at_index(index).filter(|&id| present(id)).into_iter().collect(),
	}
}

fn calls(pool: &ConstantPool, instruction: &Instruction, owner: &str, name: &str, descriptor: &str) -> bool {
	match *instruction {
		Instruction::Invoke { index, .. } | Instruction::InvokeInterface { index, .. } => {
			pool.member_ref(index).is_some_and(|member| member.is(owner, name, descriptor))
		},
		_ => false,
	}
}

/// Slots taken from and pushed onto the stack by a call.
fn stack_effect(descriptor: &str, kind: InvokeKind) -> Option<(u16, u16)> {
	let method = descriptor::method_type(descriptor.as_bytes())?;
	let taken = method.arguments_size() + u16::from(kind.has_receiver());
	let pushed = method.return_type.map_or(0, |t| t.size());
	Some((taken, pushed))
}

fn invoke(kind: InvokeKind, index: u16, descriptor: &str) -> Result<Instruction, WeaveError> {
	Ok(match kind {
		InvokeKind::Interface => {
			let method = descriptor::method_type(descriptor.as_bytes())
				.ok_or_else(|| invalid!("invalid method descriptor `{descriptor}`"))?;
			let count = u8::try_from(method.arguments_size() + 1)
				.map_err(|_| invalid!("too many arguments for invokeinterface: `{descriptor}`"))?;
			Instruction::InvokeInterface { index, count }
		},
		kind => Instruction::Invoke { opcode: kind.opcode(), index },
	})
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use crate::patch::InvokeKind;
	use crate::pipeline::stack_effect;

	#[test]
	fn stack_effects() {
		assert_eq!(stack_effect("(JI)D", InvokeKind::Virtual), Some((4, 2)));
		assert_eq!(stack_effect("(Ljava/io/PrintStream;Ljava/lang/String;)V", InvokeKind::Static), Some((2, 0)));
		assert_eq!(stack_effect("(Ljava/lang/String;)V", InvokeKind::Virtual), Some((2, 0)));
		assert_eq!(stack_effect("nonsense", InvokeKind::Static), None);
	}
}
