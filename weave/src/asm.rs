//! Code templates: instructions with symbolic operands, written one per line.
//!
//! ```text
//! // comments take a whole line
//! iload 1
//! ifeq skip
//! getstatic java/lang/System.out:Ljava/io/PrintStream;
//! ldc "hit"
//! invokevirtual java/io/PrintStream.println:(Ljava/lang/String;)V
//! skip:
//! return
//! ```
//!
//! Mnemonics are the ones of the JVM specification. Members are written as `owner.name:descriptor`,
//! the way [`classfile::code::Instruction::display`] prints them, so disassembled code can be used
//! as a template again. `ldc` takes `123`, `123L`, `1.5f`, `1.5d`, a quoted string or
//! `class some/Name`. A `static` call of an interface method is written as
//! `invokestatic interface Owner.name:()V`.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use log::debug;
use serde::{Deserialize, Serialize};
use classfile::code::{self, Code, InsnId, Instruction};
use classfile::constants::{atype, opcode};
use classfile::descriptor;
use classfile::pool::ConstantPool;
use crate::error::invalid;
use crate::WeaveError;

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
	Int(i32),
	Float(f32),
	Long(i64),
	Double(f64),
	String(String),
	Class(String),
}

impl Display for Constant {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Constant::Int(value) => write!(f, "{value}"),
			Constant::Float(value) => write!(f, "{value}f"),
			Constant::Long(value) => write!(f, "{value}L"),
			Constant::Double(value) => write!(f, "{value}d"),
			Constant::String(value) => write!(f, "{value:?}"),
			Constant::Class(name) => write!(f, "class {name}"),
		}
	}
}

impl FromStr for Constant {
	type Err = String;

	fn from_str(text: &str) -> Result<Constant, String> {
		if let Some(quoted) = text.strip_prefix('"') {
			return unescape(quoted).map(Constant::String);
		}
		if let Some(class) = text.strip_prefix("class ") {
			return Ok(Constant::Class(class.trim().to_owned()));
		}

		let bad = |e: &dyn Display| format!("invalid constant `{text}`: {e}");
		if let Some(value) = text.strip_suffix('L') {
			value.parse().map(Constant::Long).map_err(|e| bad(&e))
		} else if let Some(value) = text.strip_suffix('f') {
			value.parse().map(Constant::Float).map_err(|e| bad(&e))
		} else if let Some(value) = text.strip_suffix('d') {
			value.parse().map(Constant::Double).map_err(|e| bad(&e))
		} else {
			text.parse().map(Constant::Int).map_err(|e| bad(&e))
		}
	}
}

/// Reads a string literal as printed by `{:?}`, starting after the opening quote.
fn unescape(text: &str) -> Result<String, String> {
	let mut string = String::new();
	let mut chars = text.chars();
	loop {
		match chars.next() {
			None => return Err(format!("unterminated string `\"{text}`")),
			Some('"') => break,
			Some('\\') => {
				let c = match chars.next() {
					Some('n') => '\n',
					Some('r') => '\r',
					Some('t') => '\t',
					Some('0') => '\0',
					Some(c @ ('\\' | '"' | '\'')) => c,
					Some('u') => {
						if chars.next() != Some('{') {
							return Err("expected `{` after `\\u`".to_owned());
						}
						let hex: String = chars.by_ref().take_while(|&c| c != '}').collect();
						u32::from_str_radix(&hex, 16).ok()
							.and_then(char::from_u32)
							.ok_or_else(|| format!("invalid unicode escape `\\u{{{hex}}}`"))?
					},
					other => return Err(format!("unknown escape {other:?}")),
				};
				string.push(c);
			},
			Some(c) => string.push(c),
		}
	}
	if !chars.as_str().trim().is_empty() {
		return Err(format!("unexpected `{}` after string", chars.as_str().trim()));
	}
	Ok(string)
}

/// One line of a template.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
	/// Names the position of the following instruction.
	Label(String),
	Plain(u8),
	BiPush(i8),
	SiPush(i16),
	Ldc(Constant),
	Local { opcode: u8, index: u16 },
	IInc { index: u16, delta: i16 },
	Jump { opcode: u8, label: String },
	Field { opcode: u8, owner: String, name: String, descriptor: String },
	Invoke { opcode: u8, owner: String, name: String, descriptor: String, interface: bool },
	Type { opcode: u8, class: String },
	NewArray(u8),
	MultiANewArray { class: String, dimensions: u8 },
}

impl Insn {
	pub fn invoke_static(owner: &str, name: &str, descriptor: &str) -> Insn {
		Insn::Invoke {
			opcode: opcode::INVOKESTATIC,
			owner: owner.to_owned(),
			name: name.to_owned(),
			descriptor: descriptor.to_owned(),
			interface: false,
		}
	}
}

impl Display for Insn {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let name = |op: u8| opcode::name(op).unwrap_or("<invalid>");
		match self {
			Insn::Label(label) => write!(f, "{label}:"),
			&Insn::Plain(op) => f.write_str(name(op)),
			Insn::BiPush(value) => write!(f, "bipush {value}"),
			Insn::SiPush(value) => write!(f, "sipush {value}"),
			Insn::Ldc(constant) => write!(f, "ldc {constant}"),
			&Insn::Local { opcode, index } => write!(f, "{} {index}", name(opcode)),
			Insn::IInc { index, delta } => write!(f, "iinc {index} {delta}"),
			Insn::Jump { opcode, label } => write!(f, "{} {label}", name(*opcode)),
			Insn::Field { opcode, owner, name: field, descriptor } => {
				write!(f, "{} {owner}.{field}:{descriptor}", name(*opcode))
			},
			Insn::Invoke { opcode, owner, name: method, descriptor, interface } => {
				let itf = if *interface && *opcode != opcode::INVOKEINTERFACE { "interface " } else { "" };
				write!(f, "{} {itf}{owner}.{method}:{descriptor}", name(*opcode))
			},
			Insn::Type { opcode, class } => write!(f, "{} {class}", name(*opcode)),
			&Insn::NewArray(t) => write!(f, "newarray {}", atype::name(t).unwrap_or("<invalid>")),
			Insn::MultiANewArray { class, dimensions } => write!(f, "multianewarray {class} {dimensions}"),
		}
	}
}

fn is_label(text: &str) -> bool {
	!text.is_empty() && text.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Splits `owner.name:descriptor`.
fn parse_member(text: &str) -> Result<(String, String, String), String> {
	let (owner_and_name, descriptor) = text.split_once(':')
		.ok_or_else(|| format!("expected `owner.name:descriptor`, got `{text}`"))?;
	let (owner, name) = owner_and_name.rsplit_once('.')
		.ok_or_else(|| format!("expected `owner.name:descriptor`, got `{text}`"))?;
	if owner.is_empty() || name.is_empty() || descriptor.is_empty() {
		return Err(format!("expected `owner.name:descriptor`, got `{text}`"));
	}
	Ok((owner.to_owned(), name.to_owned(), descriptor.to_owned()))
}

fn parse_number<T: FromStr>(text: &str) -> Result<T, String> where T::Err: Display {
	text.parse().map_err(|e| format!("invalid number `{text}`: {e}"))
}

impl FromStr for Insn {
	type Err = String;

	fn from_str(line: &str) -> Result<Insn, String> {
		if let Some(label) = line.strip_suffix(':').filter(|label| is_label(label)) {
			return Ok(Insn::Label(label.to_owned()));
		}

		let (mnemonic, rest) = line.split_once(char::is_whitespace)
			.map_or((line, ""), |(mnemonic, rest)| (mnemonic, rest.trim()));
		let op = opcode::by_name(mnemonic)
			.ok_or_else(|| format!("unknown instruction `{mnemonic}`"))?;
		let operands: Vec<&str> = rest.split_whitespace().collect();
		let expect = |n: usize| if operands.len() == n {
			Ok(())
		} else {
			Err(format!("`{mnemonic}` takes {n} operand(s), got {}", operands.len()))
		};

		Ok(match op {
			_ if opcode::is_plain(op) => {
				expect(0)?;
				Insn::Plain(op)
			},
			opcode::BIPUSH => {
				expect(1)?;
				Insn::BiPush(parse_number(operands[0])?)
			},
			opcode::SIPUSH => {
				expect(1)?;
				Insn::SiPush(parse_number(operands[0])?)
			},
			opcode::LDC | opcode::LDC_W | opcode::LDC2_W => {
				if rest.is_empty() {
					return Err(format!("`{mnemonic}` needs a constant"));
				}
				Insn::Ldc(rest.parse()?)
			},
			opcode::ILOAD..=opcode::ALOAD | opcode::ISTORE..=opcode::ASTORE => {
				expect(1)?;
				Insn::Local { opcode: op, index: parse_number(operands[0])? }
			},
			opcode::ILOAD_0..=opcode::ALOAD_3 => {
				expect(0)?;
				let n = op - opcode::ILOAD_0;
				Insn::Local { opcode: opcode::ILOAD + n / 4, index: (n % 4) as u16 }
			},
			opcode::ISTORE_0..=opcode::ASTORE_3 => {
				expect(0)?;
				let n = op - opcode::ISTORE_0;
				Insn::Local { opcode: opcode::ISTORE + n / 4, index: (n % 4) as u16 }
			},
			opcode::IINC => {
				expect(2)?;
				Insn::IInc { index: parse_number(operands[0])?, delta: parse_number(operands[1])? }
			},
			opcode::IFEQ..=opcode::IF_ACMPNE | opcode::GOTO | opcode::IFNULL | opcode::IFNONNULL | opcode::GOTO_W => {
				expect(1)?;
				if !is_label(operands[0]) {
					return Err(format!("invalid label `{}`", operands[0]));
				}
				let opcode = if op == opcode::GOTO_W { opcode::GOTO } else { op };
				Insn::Jump { opcode, label: operands[0].to_owned() }
			},
			opcode::GETSTATIC..=opcode::PUTFIELD => {
				expect(1)?;
				let (owner, name, descriptor) = parse_member(operands[0])?;
				Insn::Field { opcode: op, owner, name, descriptor }
			},
			opcode::INVOKEVIRTUAL..=opcode::INVOKEINTERFACE => {
				let (interface, member) = match operands.as_slice() {
					["interface", member] => (true, member),
					[member] => (op == opcode::INVOKEINTERFACE, member),
					_ => return Err(format!("`{mnemonic}` takes a method, got `{rest}`")),
				};
				let (owner, name, descriptor) = parse_member(member)?;
				Insn::Invoke { opcode: op, owner, name, descriptor, interface }
			},
			opcode::NEW | opcode::ANEWARRAY | opcode::CHECKCAST | opcode::INSTANCEOF => {
				expect(1)?;
				Insn::Type { opcode: op, class: operands[0].to_owned() }
			},
			opcode::NEWARRAY => {
				expect(1)?;
				let t = atype::by_name(operands[0])
					.ok_or_else(|| format!("unknown array type `{}`", operands[0]))?;
				Insn::NewArray(t)
			},
			opcode::MULTIANEWARRAY => {
				expect(2)?;
				Insn::MultiANewArray { class: operands[0].to_owned(), dimensions: parse_number(operands[1])? }
			},
			_ => return Err(format!("`{mnemonic}` can't be used in code templates")),
		})
	}
}

/// A list of template instructions.
///
/// Serialized as one string per line, so patch files can carry templates as JSON string arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Template {
	insns: Vec<Insn>,
}

impl Template {
	pub fn new(insns: Vec<Insn>) -> Template {
		Template { insns }
	}

	/// Parses a template with one instruction or label per line.
	pub fn parse(text: &str) -> Result<Template, WeaveError> {
		let mut insns = Vec::new();
		let mut labels = HashMap::new();
		for (number, line) in text.lines().enumerate() {
			let line = line.trim();
			if line.is_empty() || line.starts_with("//") {
				continue;
			}
			let insn: Insn = line.parse()
				.map_err(|e| invalid!("line {}: {e}", number + 1))?;
			if let Insn::Label(label) = &insn {
				if let Some(first) = labels.insert(label.clone(), number + 1) {
					return Err(invalid!("line {}: label `{label}` is already defined on line {first}", number + 1));
				}
			}
			insns.push(insn);
		}
		Ok(Template { insns })
	}

	pub fn insns(&self) -> &[Insn] {
		&self.insns
	}

	pub fn is_empty(&self) -> bool {
		self.insns.is_empty()
	}

	/// Turns the template into instructions for `code`, adding the constants it uses to `pool`.
	///
	/// Every call hands out fresh ids, so one template can be inserted at several places. A jump to
	/// a label the template doesn't define gets a target that exists nowhere in the code, which the
	/// verifier then rejects.
	pub fn materialize(&self, code: &mut Code, pool: &mut ConstantPool) -> Result<Vec<code::Insn>, WeaveError> {
		let mut labels: HashMap<&str, InsnId> = HashMap::new();
		let mut pending = Vec::new();
		let mut ids = Vec::with_capacity(self.insns.len());
		for insn in &self.insns {
			if let Insn::Label(label) = insn {
				pending.push(label.as_str());
			} else {
				let id = code.new_id();
				for label in pending.drain(..) {
					labels.insert(label, id);
				}
				ids.push(id);
			}
		}
		if let Some(label) = pending.first() {
			return Err(invalid!("label `{label}` isn't followed by an instruction"));
		}

		let instructions = self.insns.iter().filter(|insn| !matches!(insn, Insn::Label(_)));
		let mut result = Vec::with_capacity(ids.len());
		for (insn, id) in instructions.zip(ids) {
			let instruction = match insn {
				Insn::Label(_) => continue,
				&Insn::Plain(op) => Instruction::Plain(op),
				&Insn::BiPush(value) => Instruction::BiPush(value),
				&Insn::SiPush(value) => Instruction::SiPush(value),
				Insn::Ldc(constant) => Instruction::Ldc(match constant {
					&Constant::Int(value) => pool.put_integer(value)?,
					&Constant::Float(value) => pool.put_float(value)?,
					&Constant::Long(value) => pool.put_long(value)?,
					&Constant::Double(value) => pool.put_double(value)?,
					Constant::String(value) => pool.put_string(value)?,
					Constant::Class(name) => pool.put_class(name)?,
				}),
				&Insn::Local { opcode, index } => Instruction::Local { opcode, index },
				&Insn::IInc { index, delta } => Instruction::IInc { index, delta },
				Insn::Jump { opcode, label } => {
					let target = *labels.entry(label.as_str()).or_insert_with(|| {
						debug!("jump to undefined label `{label}`");
						code.new_id()
					});
					Instruction::Jump { opcode: *opcode, target }
				},
				Insn::Field { opcode, owner, name, descriptor } => {
					Instruction::Field { opcode: *opcode, index: pool.put_field_ref(owner, name, descriptor)? }
				},
				Insn::Invoke { opcode, owner, name, descriptor, interface } => {
					let index = pool.put_method_ref(owner, name, descriptor, *interface)?;
					if *opcode == opcode::INVOKEINTERFACE {
						let method = descriptor::method_type(descriptor.as_bytes())
							.ok_or_else(|| invalid!("invalid method descriptor `{descriptor}`"))?;
						let count = u8::try_from(method.arguments_size() + 1)
							.map_err(|_| invalid!("too many arguments for invokeinterface: `{descriptor}`"))?;
						Instruction::InvokeInterface { index, count }
					} else {
						Instruction::Invoke { opcode: *opcode, index }
					}
				},
				Insn::Type { opcode, class } => Instruction::Type { opcode: *opcode, index: pool.put_class(class)? },
				&Insn::NewArray(atype) => Instruction::NewArray { atype },
				Insn::MultiANewArray { class, dimensions } => {
					Instruction::MultiANewArray { index: pool.put_class(class)?, dimensions: *dimensions }
				},
			};
			result.push(code::Insn::new(id, instruction));
		}
		Ok(result)
	}
}

impl FromStr for Template {
	type Err = WeaveError;

	fn from_str(text: &str) -> Result<Template, WeaveError> {
		Template::parse(text)
	}
}

impl TryFrom<Vec<String>> for Template {
	type Error = WeaveError;

	fn try_from(lines: Vec<String>) -> Result<Template, WeaveError> {
		Template::parse(&lines.join("\n"))
	}
}

impl From<Template> for Vec<String> {
	fn from(template: Template) -> Vec<String> {
		template.insns.iter().map(ToString::to_string).collect()
	}
}

#[cfg(test)]
mod testing {
	use anyhow::Result;
	use pretty_assertions::assert_eq;
	use classfile::code::{Code, InsnId, Instruction};
	use classfile::constants::opcode;
	use classfile::pool::ConstantPool;
	use crate::asm::{Constant, Insn, Template};
	use crate::WeaveError;

	#[test]
	fn text_form_is_kept() -> Result<()> {
		let text = [
			"start:",
			"aload 0",
			"ifnull start",
			"iinc 2 -1",
			"ldc \"say \\\"hi\\\"\\n\"",
			"ldc 5L",
			"ldc 1.5f",
			"ldc class java/lang/String",
			"getfield Player.health:I",
			"invokeinterface java/util/List.size:()I",
			"invokestatic interface Hooks.run:()V",
			"newarray int",
			"multianewarray [[I 2",
			"return",
		];
		let template = Template::parse(&text.join("\n"))?;
		let lines: Vec<String> = template.into();
		assert_eq!(lines, text);
		Ok(())
	}

	#[test]
	fn short_forms_and_aliases() -> Result<()> {
		let template = Template::parse("
			// loads
			aload_0
			istore_3
			ldc2_w 7L
			goto_w end
			end:
			return
		")?;
		assert_eq!(template.insns(), [
			Insn::Local { opcode: opcode::ALOAD, index: 0 },
			Insn::Local { opcode: opcode::ISTORE, index: 3 },
			Insn::Ldc(Constant::Long(7)),
			Insn::Jump { opcode: opcode::GOTO, label: "end".to_owned() },
			Insn::Label("end".to_owned()),
			Insn::Plain(opcode::RETURN),
		]);
		Ok(())
	}

	#[test]
	fn syntax_errors() {
		let error = |text: &str| match Template::parse(text) {
			Err(WeaveError::InvalidPatch(message)) => message,
			other => panic!("expected an error for {text:?}, got {other:?}"),
		};
		assert_eq!(error("frobnicate"), "line 1: unknown instruction `frobnicate`");
		assert_eq!(error("return\niload"), "line 2: `iload` takes 1 operand(s), got 0");
		assert_eq!(error("a:\na:"), "line 2: label `a` is already defined on line 1");
		assert_eq!(error("jsr a"), "line 1: `jsr` can't be used in code templates");
		assert_eq!(error("getstatic Player"), "line 1: expected `owner.name:descriptor`, got `Player`");
		assert_eq!(error("ldc \"open"), "line 1: unterminated string `\"open`");
	}

	#[test]
	fn materialize_labels_and_constants() -> Result<()> {
		let mut pool = ConstantPool::new();
		let mut code = Code::new(1);
		code.new_id();

		let template = Template::parse("
			top:
			ldc \"hi\"
			ldc \"hi\"
			goto top
			goto missing
			invokeinterface java/util/Map.put:(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;
		")?;
		let insns = template.materialize(&mut code, &mut pool)?;

		let string = pool.put_string("hi")?;
		let ids: Vec<InsnId> = insns.iter().map(|insn| insn.id).collect();
		assert_eq!(ids, [InsnId(1), InsnId(2), InsnId(3), InsnId(4), InsnId(5)]);
		assert_eq!(insns[0].instruction, Instruction::Ldc(string));
		assert_eq!(insns[1].instruction, Instruction::Ldc(string));
		assert_eq!(insns[2].instruction, Instruction::Jump { opcode: opcode::GOTO, target: InsnId(1) });
		// an id no instruction has
		assert_eq!(insns[3].instruction, Instruction::Jump { opcode: opcode::GOTO, target: InsnId(6) });
		assert!(matches!(insns[4].instruction, Instruction::InvokeInterface { count: 3, .. }));

		// fresh ids on every use
		let again = template.materialize(&mut code, &mut pool)?;
		assert_eq!(again[0].id, InsnId(7));
		Ok(())
	}

	#[test]
	fn trailing_label() -> Result<()> {
		let template = Template::parse("return\nend:")?;
		let result = template.materialize(&mut Code::new(1), &mut ConstantPool::new());
		assert!(matches!(result, Err(WeaveError::InvalidPatch(_))));
		Ok(())
	}
}
