//! A small class to patch, and just enough of an interpreter to run it.

#![allow(dead_code)]

use std::collections::HashMap;
use anyhow::{bail, Context, Result};
use classfile::code::{InsnId, Instruction};
use classfile::constants::{access, opcode};
use classfile::pool::PoolEntry;
use classfile::descriptor::method_type;
use classfile::{ClassModel, ClassPathHierarchy, DefaultHierarchy};
use weave::asm::Template;

fn method(class: &mut ClassModel, flags: u16, name: &str, descriptor: &str, template: &str) -> Result<()> {
	let mut code = class.new_code()?;
	let insns = Template::parse(template)?.materialize(&mut code, &mut class.pool)?;
	code.replace_instructions(insns, Vec::new());
	class.add_method(flags, name, descriptor, Some(code))?;
	Ok(())
}

/// The class `Player`, as a compiler for version 52 would write it:
///
/// ```java
/// public class Player {
///     public static int steps;
///
///     public static void update(int n) {
///         while (n > 0) { step(); n--; }
///     }
///     public static void step() { steps++; }
///     public void tick() { System.out.println("tick"); }
///     public static int value(int n) {
///         if (n < 0) return 0;
///         return n;
///     }
/// }
/// ```
pub fn player() -> Result<Vec<u8>> {
	let mut pool = classfile::pool::ConstantPool::new();
	let this_class = pool.put_class("Player")?;
	let super_class = pool.put_class("java/lang/Object")?;
	let mut class = ClassModel {
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
	};
	let public_static = access::ACC_PUBLIC | access::ACC_STATIC;

	class.add_field(public_static, "steps", "I")?;
	method(&mut class, access::ACC_PUBLIC, "<init>", "()V", "
		aload_0
		invokespecial java/lang/Object.<init>:()V
		return
	")?;
	method(&mut class, public_static, "update", "(I)V", "
		top:
		iload_0
		ifle end
		invokestatic Player.step:()V
		iinc 0 -1
		goto top
		end:
		return
	")?;
	method(&mut class, public_static, "step", "()V", "
		getstatic Player.steps:I
		iconst_1
		iadd
		putstatic Player.steps:I
		return
	")?;
	method(&mut class, access::ACC_PUBLIC, "tick", "()V", "
		getstatic java/lang/System.out:Ljava/io/PrintStream;
		ldc \"tick\"
		invokevirtual java/io/PrintStream.println:(Ljava/lang/String;)V
		return
	")?;
	method(&mut class, public_static, "value", "(I)I", "
		iload_0
		ifge positive
		iconst_0
		ireturn
		positive:
		iload_0
		ireturn
	")?;

	class.recompute_dirty(&DefaultHierarchy)?;
	classfile::verify(&class, &DefaultHierarchy)?;
	Ok(classfile::serialize(&class)?)
}

/// `ArrayList` and `LinkedList`, both extending `AbstractList`.
pub fn collections() -> ClassPathHierarchy {
	let mut hierarchy = ClassPathHierarchy::new();
	hierarchy.add("java/util/AbstractList", Some(b"java/lang/Object"), false);
	hierarchy.add("java/util/ArrayList", Some(b"java/util/AbstractList"), false);
	hierarchy.add("java/util/LinkedList", Some(b"java/util/AbstractList"), false);
	hierarchy
}

/// Picks one of two lists, which meet as `AbstractList`.
pub const SIZE: &str = "
	iload_0
	ifle linked
	new java/util/ArrayList
	dup
	invokespecial java/util/ArrayList.<init>:()V
	goto join
	linked:
	new java/util/LinkedList
	dup
	invokespecial java/util/LinkedList.<init>:()V
	join:
	astore_1
	aload_1
	invokevirtual java/util/AbstractList.size:()I
	ireturn
";

/// The class `Lists`, written by a compiler that knows the collection classes:
///
/// ```java
/// public class Lists {
///     public static int size(int n) {
///         AbstractList<?> list = n > 0 ? new ArrayList<>() : new LinkedList<>();
///         return list.size();
///     }
/// }
/// ```
pub fn lists() -> Result<Vec<u8>> {
	let mut pool = classfile::pool::ConstantPool::new();
	let this_class = pool.put_class("Lists")?;
	let super_class = pool.put_class("java/lang/Object")?;
	let mut class = ClassModel {
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
	};
	method(&mut class, access::ACC_PUBLIC | access::ACC_STATIC, "size", "(I)I", SIZE)?;

	let hierarchy = collections();
	class.recompute_dirty(&hierarchy)?;
	classfile::verify(&class, &hierarchy)?;
	Ok(classfile::serialize(&class)?)
}

/// The instructions of a method, printed like `javap -c` does.
pub fn mnemonics(bytes: &[u8], name: &str, descriptor: &str) -> Result<Vec<String>> {
	let class = classfile::parse(bytes)?;
	let code = class.find_method(name, descriptor)
		.and_then(|method| method.code())
		.with_context(|| format!("no code for {name} {descriptor}"))?;
	Ok(code.instructions().iter()
		.map(|insn| insn.instruction.display(&class.pool))
		.collect())
}

/// Runs static methods of one class that only deal with `int`s.
pub struct Machine {
	class: ClassModel,
	statics: HashMap<String, i32>,
}

fn pop(stack: &mut Vec<i32>) -> Result<i32> {
	stack.pop().context("stack underflow")
}

fn compare(condition: u8, a: i32, b: i32) -> bool {
	match condition {
		0 => a == b,
		1 => a != b,
		2 => a < b,
		3 => a >= b,
		4 => a > b,
		_ => a <= b,
	}
}

impl Machine {
	pub fn load(bytes: &[u8]) -> Result<Machine> {
		Ok(Machine { class: classfile::parse(bytes)?, statics: HashMap::new() })
	}

	/// The value of a static `int` field of the class.
	pub fn get(&self, field: &str) -> i32 {
		self.statics.get(field).copied().unwrap_or(0)
	}

	pub fn call(&mut self, name: &str, descriptor: &str, args: &[i32]) -> Result<Option<i32>> {
		let code = self.class.find_method(name, descriptor)
			.and_then(|method| method.code())
			.with_context(|| format!("no code for {name} {descriptor}"))?
			.clone();
		let this = self.class.name().context("class without name")?.to_vec();
		let positions: HashMap<InsnId, usize> = code.instructions().iter()
			.enumerate()
			.map(|(position, insn)| (insn.id, position))
			.collect();

		let mut locals = vec![0; usize::from(code.max_locals).max(args.len())];
		locals[..args.len()].copy_from_slice(args);
		let mut stack = Vec::new();
		let mut pc = 0;

		for _ in 0..100_000 {
			let insn = &code.instructions().get(pc).context("ran past the end of the code")?.instruction;
			pc += 1;
			match *insn {
				Instruction::Plain(op @ opcode::ICONST_M1..=opcode::ICONST_5) => {
					stack.push(i32::from(op) - i32::from(opcode::ICONST_0));
				},
				Instruction::Plain(opcode::IADD) => {
					let b = pop(&mut stack)?;
					let a = pop(&mut stack)?;
					stack.push(a.wrapping_add(b));
				},
				Instruction::Plain(opcode::ISUB) => {
					let b = pop(&mut stack)?;
					let a = pop(&mut stack)?;
					stack.push(a.wrapping_sub(b));
				},
				Instruction::Plain(opcode::POP) => {
					pop(&mut stack)?;
				},
				Instruction::Plain(opcode::DUP) => {
					let a = pop(&mut stack)?;
					stack.extend([a, a]);
				},
				Instruction::Plain(opcode::RETURN) => return Ok(None),
				Instruction::Plain(opcode::IRETURN) => return Ok(Some(pop(&mut stack)?)),
				Instruction::BiPush(value) => stack.push(value.into()),
				Instruction::SiPush(value) => stack.push(value.into()),
				Instruction::Ldc(index) => match self.class.pool.get(index) {
					Some(&PoolEntry::Integer { bytes }) => stack.push(bytes),
					entry => bail!("can't load {entry:?}"),
				},
				Instruction::Local { opcode: opcode::ILOAD, index } => {
					stack.push(*locals.get(usize::from(index)).context("no such local")?);
				},
				Instruction::Local { opcode: opcode::ISTORE, index } => {
					let value = pop(&mut stack)?;
					*locals.get_mut(usize::from(index)).context("no such local")? = value;
				},
				Instruction::IInc { index, delta } => {
					let local = locals.get_mut(usize::from(index)).context("no such local")?;
					*local = local.wrapping_add(delta.into());
				},
				Instruction::Jump { opcode: op, target } => {
					let jump = match op {
						opcode::GOTO => true,
						opcode::IFEQ..=opcode::IFLE => compare(op - opcode::IFEQ, pop(&mut stack)?, 0),
						opcode::IF_ICMPEQ..=opcode::IF_ICMPLE => {
							let b = pop(&mut stack)?;
							let a = pop(&mut stack)?;
							compare(op - opcode::IF_ICMPEQ, a, b)
						},
						_ => bail!("unsupported jump {}", insn.display(&self.class.pool)),
					};
					if jump {
						pc = *positions.get(&target).context("jump to nowhere")?;
					}
				},
				Instruction::Field { opcode: op, index } => {
					let member = self.class.pool.member_ref(index).context("not a field")?;
					if member.owner != this.as_slice() || member.descriptor != b"I" {
						bail!("unsupported field {member}");
					}
					let name = String::from_utf8_lossy(member.name).into_owned();
					match op {
						opcode::GETSTATIC => stack.push(self.get(&name)),
						opcode::PUTSTATIC => {
							let value = pop(&mut stack)?;
							self.statics.insert(name, value);
						},
						_ => bail!("unsupported field access {}", insn.display(&self.class.pool)),
					}
				},
				Instruction::Invoke { opcode: opcode::INVOKESTATIC, index } => {
					let member = self.class.pool.member_ref(index).context("not a method")?;
					if member.owner != this.as_slice() {
						bail!("can't call {member}");
					}
					let count = method_type(member.descriptor)
						.context("invalid descriptor")?
						.arguments_size();
					let name = String::from_utf8_lossy(member.name).into_owned();
					let descriptor = String::from_utf8_lossy(member.descriptor).into_owned();
					let start = stack.len().checked_sub(usize::from(count)).context("stack underflow")?;
					let args = stack.split_off(start);
					if let Some(value) = self.call(&name, &descriptor, &args)? {
						stack.push(value);
					}
				},
				_ => bail!("unsupported instruction {}", insn.display(&self.class.pool)),
			}
		}
		bail!("{name} {descriptor} runs too long")
	}
}
