//! Declarative descriptions of changes to a class.

use std::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};
use classfile::constants::{access, opcode};
use classfile::descriptor;
use crate::asm::Template;
use crate::error::invalid;
use crate::WeaveError;

/// A method of the patched class, by name and descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodSig {
	pub name: String,
	pub descriptor: String,
}

impl MethodSig {
	pub fn new(name: &str, descriptor: &str) -> MethodSig {
		MethodSig { name: name.to_owned(), descriptor: descriptor.to_owned() }
	}
}

impl Display for MethodSig {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} {}", self.name, self.descriptor)
	}
}

/// A method of any class, as referenced by call sites.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
	pub owner: String,
	pub name: String,
	pub descriptor: String,
}

impl MethodRef {
	pub fn new(owner: &str, name: &str, descriptor: &str) -> MethodRef {
		MethodRef { owner: owner.to_owned(), name: name.to_owned(), descriptor: descriptor.to_owned() }
	}
}

impl Display for MethodRef {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}.{}:{}", self.owner, self.name, self.descriptor)
	}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
	Public,
	Private,
	Protected,
	Static,
	Final,
	Synchronized,
	Volatile,
	Transient,
	Native,
	Abstract,
	Synthetic,
}

impl Modifier {
	pub fn flag(self) -> u16 {
		match self {
			Modifier::Public => access::ACC_PUBLIC,
			Modifier::Private => access::ACC_PRIVATE,
			Modifier::Protected => access::ACC_PROTECTED,
			Modifier::Static => access::ACC_STATIC,
			Modifier::Final => access::ACC_FINAL,
			Modifier::Synchronized => access::ACC_SYNCHRONIZED,
			Modifier::Volatile => access::ACC_VOLATILE,
			Modifier::Transient => access::ACC_TRANSIENT,
			Modifier::Native => access::ACC_NATIVE,
			Modifier::Abstract => access::ACC_ABSTRACT,
			Modifier::Synthetic => access::ACC_SYNTHETIC,
		}
	}

	pub fn access_flags(modifiers: &[Modifier]) -> u16 {
		modifiers.iter().fold(0, |flags, modifier| flags | modifier.flag())
	}
}

/// The kind of invoke instruction a redirected call uses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeKind {
	Virtual,
	Special,
	Static,
	Interface,
}

impl InvokeKind {
	pub fn opcode(self) -> u8 {
		match self {
			InvokeKind::Virtual => opcode::INVOKEVIRTUAL,
			InvokeKind::Special => opcode::INVOKESPECIAL,
			InvokeKind::Static => opcode::INVOKESTATIC,
			InvokeKind::Interface => opcode::INVOKEINTERFACE,
		}
	}

	pub fn from_opcode(opcode: u8) -> Option<InvokeKind> {
		match opcode {
			opcode::INVOKEVIRTUAL => Some(InvokeKind::Virtual),
			opcode::INVOKESPECIAL => Some(InvokeKind::Special),
			opcode::INVOKESTATIC => Some(InvokeKind::Static),
			opcode::INVOKEINTERFACE => Some(InvokeKind::Interface),
			_ => None,
		}
	}

	/// Whether the call takes a receiver before its arguments.
	pub fn has_receiver(self) -> bool {
		self != InvokeKind::Static
	}
}

/// Matches call sites that were present when the class was read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallMatch {
	pub owner: String,
	pub name: String,
	pub descriptor: String,
	/// Only the n-th matching call of the method, counting from `0`. All of them if absent.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ordinal: Option<usize>,
}

impl CallMatch {
	pub fn new(owner: &str, name: &str, descriptor: &str) -> CallMatch {
		CallMatch { owner: owner.to_owned(), name: name.to_owned(), descriptor: descriptor.to_owned(), ordinal: None }
	}

	pub fn nth(mut self, ordinal: usize) -> CallMatch {
		self.ordinal = Some(ordinal);
		self
	}
}

impl Display for CallMatch {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}.{}:{}", self.owner, self.name, self.descriptor)?;
		if let Some(ordinal) = self.ordinal {
			write!(f, "#{ordinal}")?;
		}
		Ok(())
	}
}

/// Where inserted code goes. Anchors only ever match instructions that were there when the class
/// was read, never ones inserted by other patches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
	/// Before the first instruction. Jumps back to the first instruction skip the inserted code.
	MethodEntry,
	/// Before every return instruction, including on paths jumping to it.
	BeforeReturn,
	BeforeInvoke(CallMatch),
	AfterInvoke(CallMatch),
	/// Before the instruction at this bytecode offset.
	Offset(u16),
	/// Before the instruction at this index.
	Index(usize),
}

impl Display for Anchor {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Anchor::MethodEntry => f.write_str("method entry"),
			Anchor::BeforeReturn => f.write_str("before return"),
			Anchor::BeforeInvoke(call) => write!(f, "before call of {call}"),
			Anchor::AfterInvoke(call) => write!(f, "after call of {call}"),
			Anchor::Offset(offset) => write!(f, "offset {offset}"),
			Anchor::Index(index) => write!(f, "instruction {index}"),
		}
	}
}

fn is_true(value: &bool) -> bool {
	*value
}

fn yes() -> bool {
	true
}

/// One change to a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edit {
	/// Adds a method. Without code, the method must be `abstract` or `native`.
	AddMethod {
		#[serde(default)]
		access: Vec<Modifier>,
		name: String,
		descriptor: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		code: Option<Template>,
		#[serde(default, skip_serializing_if = "std::ops::Not::not")]
		overwrite: bool,
	},
	AddField {
		#[serde(default)]
		access: Vec<Modifier>,
		name: String,
		descriptor: String,
		#[serde(default, skip_serializing_if = "std::ops::Not::not")]
		overwrite: bool,
	},
	/// Discards the code of the target method and uses this instead.
	ReplaceBody {
		code: Template,
	},
	InsertAt {
		anchor: Anchor,
		code: Template,
	},
	/// Changes calls of `original` to call `replacement`. Without a target method in the patch,
	/// this applies to all methods of the class.
	RedirectCall {
		original: MethodRef,
		replacement: MethodRef,
		/// The invoke instruction to use for `replacement`, the one of the call site if absent.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		kind: Option<InvokeKind>,
		#[serde(default = "yes", skip_serializing_if = "is_true")]
		required: bool,
	},
}

impl Edit {
	pub fn add_method(access: &[Modifier], name: &str, descriptor: &str, code: &str) -> Result<Edit, WeaveError> {
		Ok(Edit::AddMethod {
			access: access.to_vec(),
			name: name.to_owned(),
			descriptor: descriptor.to_owned(),
			code: Some(Template::parse(code)?),
			overwrite: false,
		})
	}

	pub fn add_field(access: &[Modifier], name: &str, descriptor: &str) -> Edit {
		Edit::AddField {
			access: access.to_vec(),
			name: name.to_owned(),
			descriptor: descriptor.to_owned(),
			overwrite: false,
		}
	}

	pub fn replace_body(code: &str) -> Result<Edit, WeaveError> {
		Ok(Edit::ReplaceBody { code: Template::parse(code)? })
	}

	pub fn insert_at(anchor: Anchor, code: &str) -> Result<Edit, WeaveError> {
		Ok(Edit::InsertAt { anchor, code: Template::parse(code)? })
	}

	pub fn redirect_call(original: MethodRef, replacement: MethodRef) -> Edit {
		Edit::RedirectCall { original, replacement, kind: None, required: true }
	}

	/// Sets `overwrite` on member additions, and `required` to `false` on call redirections.
	/// Other edits are returned unchanged.
	pub fn lenient(mut self) -> Edit {
		match &mut self {
			Edit::AddMethod { overwrite, .. } | Edit::AddField { overwrite, .. } => *overwrite = true,
			Edit::RedirectCall { required, .. } => *required = false,
			Edit::ReplaceBody { .. } | Edit::InsertAt { .. } => {},
		}
		self
	}

	/// Whether the edit changes the code of the target method.
	pub fn needs_method(&self) -> bool {
		matches!(self, Edit::ReplaceBody { .. } | Edit::InsertAt { .. })
	}

	/// Checks what can be checked without the class.
	fn validate(&self) -> Result<(), WeaveError> {
		match self {
			Edit::AddMethod { access, name, descriptor, code, .. } => {
				if descriptor::method_type(descriptor.as_bytes()).is_none() {
					return Err(invalid!("`{descriptor}` of method {name} is not a method descriptor"));
				}
				let flags = Modifier::access_flags(access);
				let bodyless = flags & (access::ACC_ABSTRACT | access::ACC_NATIVE) != 0;
				if code.is_some() == bodyless {
					return Err(invalid!("method {name} {descriptor} must have code unless it's abstract or native, and not both"));
				}
			},
			Edit::AddField { name, descriptor, .. } => {
				if descriptor::field_type(descriptor.as_bytes()).is_none() {
					return Err(invalid!("`{descriptor}` of field {name} is not a field descriptor"));
				}
			},
			Edit::ReplaceBody { code } | Edit::InsertAt { code, .. } => {
				if code.is_empty() {
					return Err(invalid!("{} has no code", self));
				}
			},
			Edit::RedirectCall { original, replacement, .. } => {
				for method in [original, replacement] {
					if descriptor::method_type(method.descriptor.as_bytes()).is_none() {
						return Err(invalid!("`{}` of {method} is not a method descriptor", method.descriptor));
					}
				}
			},
		}
		Ok(())
	}
}

impl Display for Edit {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Edit::AddMethod { name, descriptor, .. } => write!(f, "add method {name} {descriptor}"),
			Edit::AddField { name, descriptor, .. } => write!(f, "add field {name} {descriptor}"),
			Edit::ReplaceBody { .. } => f.write_str("replace body"),
			Edit::InsertAt { anchor, .. } => write!(f, "insert at {anchor}"),
			Edit::RedirectCall { original, replacement, .. } => write!(f, "redirect {original} to {replacement}"),
		}
	}
}

/// A set of edits to one class, applied together or not at all.
///
/// ```
/// use weave::patch::{Anchor, Edit, Modifier, PatchDescriptor};
///
/// let patch = PatchDescriptor::new("greeting", "Player")
///     .method("update", "(I)V")
///     .edit(Edit::add_method(&[Modifier::Public, Modifier::Static], "sayHello", "()V", "return")?)
///     .edit(Edit::insert_at(Anchor::MethodEntry, "invokestatic Player.sayHello:()V")?);
/// # Ok::<(), weave::WeaveError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchDescriptor {
	/// Names the patch in reports.
	pub id: String,
	/// Internal name of the target class, like `a/b/Player`.
	pub class: String,
	/// The method that code edits apply to.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub method: Option<MethodSig>,
	/// Smaller values are applied first and win conflicts.
	#[serde(default)]
	pub priority: i32,
	pub edits: Vec<Edit>,
}

impl PatchDescriptor {
	pub fn new(id: &str, class: &str) -> PatchDescriptor {
		PatchDescriptor {
			id: id.to_owned(),
			class: class.to_owned(),
			method: None,
			priority: 0,
			edits: Vec::new(),
		}
	}

	pub fn method(mut self, name: &str, descriptor: &str) -> PatchDescriptor {
		self.method = Some(MethodSig::new(name, descriptor));
		self
	}

	pub fn priority(mut self, priority: i32) -> PatchDescriptor {
		self.priority = priority;
		self
	}

	pub fn edit(mut self, edit: Edit) -> PatchDescriptor {
		self.edits.push(edit);
		self
	}

	/// Checks the patch for mistakes that don't depend on the class it's applied to.
	pub fn validate(&self) -> Result<(), WeaveError> {
		if self.class.is_empty() || self.class.contains('.') {
			return Err(invalid!("patch {}: `{}` is not an internal class name", self.id, self.class));
		}
		if let Some(method) = &self.method {
			if descriptor::method_type(method.descriptor.as_bytes()).is_none() {
				return Err(invalid!("patch {}: `{}` is not a method descriptor", self.id, method.descriptor));
			}
		}
		if self.edits.is_empty() {
			return Err(invalid!("patch {} has no edits", self.id));
		}
		for edit in &self.edits {
			if edit.needs_method() && self.method.is_none() {
				return Err(invalid!("patch {}: {edit} needs a target method", self.id));
			}
			edit.validate()
				.map_err(|e| match e {
					WeaveError::InvalidPatch(message) => invalid!("patch {}: {message}", self.id),
					e => e,
				})?;
		}
		Ok(())
	}
}

/// The contents of a patch file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchFile {
	pub patches: Vec<PatchDescriptor>,
}

impl PatchFile {
	pub fn from_json(json: &str) -> Result<PatchFile, WeaveError> {
		let file: PatchFile = serde_json::from_str(json)
			.map_err(|e| invalid!("cannot read patch file: {e}"))?;
		for patch in &file.patches {
			patch.validate()?;
		}
		Ok(file)
	}

	pub fn to_json(&self) -> Result<String, WeaveError> {
		serde_json::to_string_pretty(self)
			.map_err(|e| invalid!("cannot write patch file: {e}"))
	}
}

#[cfg(test)]
mod testing {
	use anyhow::Result;
	use pretty_assertions::assert_eq;
	use crate::patch::{Anchor, CallMatch, Edit, InvokeKind, MethodRef, MethodSig, Modifier, PatchDescriptor, PatchFile};
	use crate::WeaveError;

	const FILE: &str = r#"{
		"patches": [
			{
				"id": "greeting",
				"class": "Player",
				"method": { "name": "update", "descriptor": "(I)V" },
				"priority": -1,
				"edits": [
					{ "add_field": { "access": ["private", "static"], "name": "greetings", "descriptor": "I" } },
					{ "insert_at": { "anchor": "method_entry", "code": ["invokestatic Player.sayHello:()V"] } },
					{ "insert_at": { "anchor": { "after_invoke": { "owner": "A", "name": "b", "descriptor": "()V", "ordinal": 1 } }, "code": ["nop"] } }
				]
			},
			{
				"id": "logging",
				"class": "Player",
				"edits": [
					{ "redirect_call": {
						"original": { "owner": "java/io/PrintStream", "name": "println", "descriptor": "(Ljava/lang/String;)V" },
						"replacement": { "owner": "Log", "name": "println", "descriptor": "(Ljava/io/PrintStream;Ljava/lang/String;)V" },
						"kind": "static",
						"required": false
					} }
				]
			}
		]
	}"#;

	#[test]
	fn read_patch_file() -> Result<()> {
		let file = PatchFile::from_json(FILE)?;
		assert_eq!(file.patches.len(), 2);

		let greeting = &file.patches[0];
		assert_eq!(greeting.method, Some(MethodSig::new("update", "(I)V")));
		assert_eq!(greeting.priority, -1);
		assert_eq!(greeting.edits[0], Edit::add_field(&[Modifier::Private, Modifier::Static], "greetings", "I"));
		assert_eq!(greeting.edits[1], Edit::insert_at(Anchor::MethodEntry, "invokestatic Player.sayHello:()V")?);
		assert_eq!(greeting.edits[2], Edit::insert_at(Anchor::AfterInvoke(CallMatch::new("A", "b", "()V").nth(1)), "nop")?);

		let logging = &file.patches[1];
		assert_eq!(logging.priority, 0);
		assert_eq!(logging.edits, [Edit::RedirectCall {
			original: MethodRef::new("java/io/PrintStream", "println", "(Ljava/lang/String;)V"),
			replacement: MethodRef::new("Log", "println", "(Ljava/io/PrintStream;Ljava/lang/String;)V"),
			kind: Some(InvokeKind::Static),
			required: false,
		}]);
		Ok(())
	}

	#[test]
	fn write_and_read_again() -> Result<()> {
		let file = PatchFile::from_json(FILE)?;
		let json = file.to_json()?;
		assert_eq!(PatchFile::from_json(&json)?, file);
		Ok(())
	}

	#[test]
	fn validation() -> Result<()> {
		let message = |patch: PatchDescriptor| match patch.validate() {
			Err(WeaveError::InvalidPatch(message)) => message,
			other => panic!("expected an invalid patch, got {other:?}"),
		};

		let patch = PatchDescriptor::new("a", "Player").edit(Edit::replace_body("return")?);
		assert_eq!(message(patch), "patch a: replace body needs a target method");

		let patch = PatchDescriptor::new("b", "com.example.Player").edit(Edit::add_field(&[], "x", "I"));
		assert_eq!(message(patch), "patch b: `com.example.Player` is not an internal class name");

		let patch = PatchDescriptor::new("c", "Player").edit(Edit::add_field(&[], "x", "Q"));
		assert_eq!(message(patch), "patch c: `Q` of field x is not a field descriptor");

		let patch = PatchDescriptor::new("d", "Player").edit(Edit::AddMethod {
			access: vec![Modifier::Public],
			name: "run".to_owned(),
			descriptor: "()V".to_owned(),
			code: None,
			overwrite: false,
		});
		assert_eq!(message(patch), "patch d: method run ()V must have code unless it's abstract or native, and not both");

		assert_eq!(message(PatchDescriptor::new("e", "Player")), "patch e has no edits");

		let bad_json = r#"{ "patches": [ { "id": "x", "class": "P", "edits": [ { "replace_body": { "code": ["bogus"] } } ] } ] }"#;
		assert!(matches!(PatchFile::from_json(bad_json), Err(WeaveError::InvalidPatch(_))));
		Ok(())
	}

	#[test]
	fn lenient() {
		let edit = Edit::redirect_call(MethodRef::new("A", "b", "()V"), MethodRef::new("C", "d", "()V")).lenient();
		assert!(matches!(edit, Edit::RedirectCall { required: false, .. }));
		assert_eq!(Modifier::access_flags(&[Modifier::Public, Modifier::Static]), 0x0009);
	}
}
