//! Hand assembled class files, including encodings the writer never produces itself.

#![allow(dead_code)]

use classfile::constants::opcode;

/// A constant pool built entry by entry, without any deduplication.
pub struct Pool {
	bytes: Vec<u8>,
	next: u16,
}

impl Pool {
	pub fn new() -> Pool {
		Pool { bytes: Vec::new(), next: 1 }
	}

	fn entry(&mut self, tag: u8, body: &[u8], slots: u16) -> u16 {
		let index = self.next;
		self.bytes.push(tag);
		self.bytes.extend_from_slice(body);
		self.next += slots;
		index
	}

	pub fn utf8(&mut self, string: &str) -> u16 {
		let mut body = (string.len() as u16).to_be_bytes().to_vec();
		body.extend_from_slice(string.as_bytes());
		self.entry(1, &body, 1)
	}

	pub fn class(&mut self, name: &str) -> u16 {
		let name = self.utf8(name);
		self.entry(7, &name.to_be_bytes(), 1)
	}

	pub fn string(&mut self, value: &str) -> u16 {
		let value = self.utf8(value);
		self.entry(8, &value.to_be_bytes(), 1)
	}

	pub fn long(&mut self, value: i64) -> u16 {
		self.entry(5, &value.to_be_bytes(), 2)
	}

	fn member(&mut self, tag: u8, owner: &str, name: &str, descriptor: &str) -> u16 {
		let class = self.class(owner);
		let name = self.utf8(name);
		let descriptor = self.utf8(descriptor);
		let name_and_type = self.entry(12, &[name.to_be_bytes(), descriptor.to_be_bytes()].concat(), 1);
		self.entry(tag, &[class.to_be_bytes(), name_and_type.to_be_bytes()].concat(), 1)
	}

	pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
		self.member(9, owner, name, descriptor)
	}

	pub fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
		self.member(10, owner, name, descriptor)
	}
}

pub fn attribute(name_index: u16, body: &[u8]) -> Vec<u8> {
	let mut vec = name_index.to_be_bytes().to_vec();
	vec.extend_from_slice(&(body.len() as u32).to_be_bytes());
	vec.extend_from_slice(body);
	vec
}

fn list(items: &[Vec<u8>]) -> Vec<u8> {
	let mut vec = (items.len() as u16).to_be_bytes().to_vec();
	for item in items {
		vec.extend_from_slice(item);
	}
	vec
}

pub fn member(access: u16, name_index: u16, descriptor_index: u16, attributes: &[Vec<u8>]) -> Vec<u8> {
	let mut vec = Vec::new();
	vec.extend_from_slice(&access.to_be_bytes());
	vec.extend_from_slice(&name_index.to_be_bytes());
	vec.extend_from_slice(&descriptor_index.to_be_bytes());
	vec.extend(list(attributes));
	vec
}

pub fn code(max_stack: u16, max_locals: u16, bytecode: &[u8], exceptions: &[[u16; 4]], attributes: &[Vec<u8>]) -> Vec<u8> {
	let mut vec = Vec::new();
	vec.extend_from_slice(&max_stack.to_be_bytes());
	vec.extend_from_slice(&max_locals.to_be_bytes());
	vec.extend_from_slice(&(bytecode.len() as u32).to_be_bytes());
	vec.extend_from_slice(bytecode);
	vec.extend_from_slice(&(exceptions.len() as u16).to_be_bytes());
	for entry in exceptions {
		for value in entry {
			vec.extend_from_slice(&value.to_be_bytes());
		}
	}
	vec.extend(list(attributes));
	vec
}

pub fn class_file(pool: Pool, access: u16, this_class: u16, super_class: u16, fields: &[Vec<u8>], methods: &[Vec<u8>], attributes: &[Vec<u8>]) -> Vec<u8> {
	let mut vec = vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 52];
	vec.extend_from_slice(&pool.next.to_be_bytes());
	vec.extend_from_slice(&pool.bytes);
	vec.extend_from_slice(&access.to_be_bytes());
	vec.extend_from_slice(&this_class.to_be_bytes());
	vec.extend_from_slice(&super_class.to_be_bytes());
	vec.extend_from_slice(&[0, 0]); // interfaces
	vec.extend(list(fields));
	vec.extend(list(methods));
	vec.extend(list(attributes));
	vec
}

/// A class `Player` with a constructor, `tick(I)V` printing `"hello"` if the argument isn't zero,
/// and `big()J`.
///
/// It uses encodings a compiler wouldn't produce: `iload 1` instead of `iload_1`, `ldc_w` for a
/// small index, a duplicated `Code` name and an unknown attribute inside the code.
pub fn player() -> Vec<u8> {
	let mut pool = Pool::new();
	let this_class = pool.class("Player");
	let super_class = pool.class("java/lang/Object");
	let code_name = pool.utf8("Code");
	let code_name_again = pool.utf8("Code");
	let line_numbers = pool.utf8("LineNumberTable");
	let stack_map = pool.utf8("StackMapTable");
	let custom = pool.utf8("Custom");
	let source_file = pool.utf8("SourceFile");
	let source = pool.utf8("Player.java");
	let init = pool.method_ref("java/lang/Object", "<init>", "()V");
	let out = pool.field_ref("java/lang/System", "out", "Ljava/io/PrintStream;");
	let println = pool.method_ref("java/io/PrintStream", "println", "(Ljava/lang/String;)V");
	let hello = pool.string("hello");
	let long = pool.long(1234);
	let health = pool.utf8("health");
	let int = pool.utf8("I");
	let init_name = pool.utf8("<init>");
	let void = pool.utf8("()V");
	let tick = pool.utf8("tick");
	let tick_descriptor = pool.utf8("(I)V");
	let big = pool.utf8("big");
	let big_descriptor = pool.utf8("()J");

	let [init_hi, init_lo] = init.to_be_bytes();
	let constructor = code(1, 1, &[
		opcode::ALOAD_0,
		opcode::INVOKESPECIAL, init_hi, init_lo,
		opcode::RETURN,
	], &[], &[
		attribute(line_numbers, &[0, 1, 0, 0, 0, 3]),
	]);

	let [out_hi, out_lo] = out.to_be_bytes();
	let [hello_hi, hello_lo] = hello.to_be_bytes();
	let [println_hi, println_lo] = println.to_be_bytes();
	let tick_code = code(2, 2, &[
		opcode::ILOAD, 1,                             // 0
		opcode::IFEQ, 0, 12,                          // 2 -> 14
		opcode::GETSTATIC, out_hi, out_lo,            // 5
		opcode::LDC_W, hello_hi, hello_lo,            // 8
		opcode::INVOKEVIRTUAL, println_hi, println_lo, // 11
		opcode::RETURN,                               // 14
	], &[], &[
		attribute(stack_map, &[0, 1, 14]),
		attribute(custom, &[1, 2, 3]),
	]);

	let [long_hi, long_lo] = long.to_be_bytes();
	let big_code = code(2, 0, &[
		opcode::LDC2_W, long_hi, long_lo,
		opcode::LRETURN,
	], &[], &[]);

	class_file(pool, 0x0021, this_class, super_class, &[
		member(0x0002, health, int, &[]),
	], &[
		member(0x0001, init_name, void, &[attribute(code_name, &constructor)]),
		member(0x0001, tick, tick_descriptor, &[attribute(code_name_again, &tick_code)]),
		member(0x0009, big, big_descriptor, &[attribute(code_name, &big_code)]),
	], &[
		attribute(source_file, &source.to_be_bytes()),
	])
}
