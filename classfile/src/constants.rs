//! Numeric constants of the class file format.

pub const MAGIC: u32 = 0xCAFE_BABE;

/// Oldest supported major version (Java 1.0.2).
pub const MIN_MAJOR_VERSION: u16 = 45;
/// Newest supported major version (Java 24).
pub const MAX_MAJOR_VERSION: u16 = 68;
/// First major version that carries `StackMapTable` frames.
pub const FRAMES_MAJOR_VERSION: u16 = 50;

pub mod pool {
	pub const UTF8: u8 = 1;
	pub const INTEGER: u8 = 3;
	pub const FLOAT: u8 = 4;
	pub const LONG: u8 = 5;
	pub const DOUBLE: u8 = 6;
	pub const CLASS: u8 = 7;
	pub const STRING: u8 = 8;
	pub const FIELD_REF: u8 = 9;
	pub const METHOD_REF: u8 = 10;
	pub const INTERFACE_METHOD_REF: u8 = 11;
	pub const NAME_AND_TYPE: u8 = 12;
	pub const METHOD_HANDLE: u8 = 15;
	pub const METHOD_TYPE: u8 = 16;
	pub const DYNAMIC: u8 = 17;
	pub const INVOKE_DYNAMIC: u8 = 18;
	pub const MODULE: u8 = 19;
	pub const PACKAGE: u8 = 20;
}

pub mod attribute {
	pub const CODE: &str = "Code";
	pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
	pub const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
	pub const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
	pub const STACK_MAP_TABLE: &str = "StackMapTable";
	pub const CONSTANT_VALUE: &str = "ConstantValue";
}

pub mod access {
	pub const ACC_PUBLIC: u16 = 0x0001;
	pub const ACC_PRIVATE: u16 = 0x0002;
	pub const ACC_PROTECTED: u16 = 0x0004;
	pub const ACC_STATIC: u16 = 0x0008;
	pub const ACC_FINAL: u16 = 0x0010;
	pub const ACC_SYNCHRONIZED: u16 = 0x0020;
	pub const ACC_VOLATILE: u16 = 0x0040;
	pub const ACC_BRIDGE: u16 = 0x0040;
	pub const ACC_TRANSIENT: u16 = 0x0080;
	pub const ACC_VARARGS: u16 = 0x0080;
	pub const ACC_NATIVE: u16 = 0x0100;
	pub const ACC_INTERFACE: u16 = 0x0200;
	pub const ACC_ABSTRACT: u16 = 0x0400;
	pub const ACC_STRICT: u16 = 0x0800;
	pub const ACC_SYNTHETIC: u16 = 0x1000;
	pub const ACC_ENUM: u16 = 0x4000;
}

/// The `atype` operand of `newarray`.
pub mod atype {
	pub const T_BOOLEAN: u8 = 4;
	pub const T_CHAR: u8 = 5;
	pub const T_FLOAT: u8 = 6;
	pub const T_DOUBLE: u8 = 7;
	pub const T_BYTE: u8 = 8;
	pub const T_SHORT: u8 = 9;
	pub const T_INT: u8 = 10;
	pub const T_LONG: u8 = 11;

	const NAMES: [(u8, &str, &str); 8] = [
		(T_BOOLEAN, "boolean", "[Z"),
		(T_CHAR, "char", "[C"),
		(T_FLOAT, "float", "[F"),
		(T_DOUBLE, "double", "[D"),
		(T_BYTE, "byte", "[B"),
		(T_SHORT, "short", "[S"),
		(T_INT, "int", "[I"),
		(T_LONG, "long", "[J"),
	];

	pub fn name(atype: u8) -> Option<&'static str> {
		NAMES.iter().find(|(t, _, _)| *t == atype).map(|(_, name, _)| *name)
	}

	pub fn by_name(name: &str) -> Option<u8> {
		NAMES.iter().find(|(_, n, _)| *n == name).map(|(t, _, _)| *t)
	}

	/// The array descriptor created by `newarray` with this `atype`.
	pub fn array_descriptor(atype: u8) -> Option<&'static str> {
		NAMES.iter().find(|(t, _, _)| *t == atype).map(|(_, _, descriptor)| *descriptor)
	}
}

pub mod opcode {
	pub const NOP: u8 = 0x00;
	pub const ACONST_NULL: u8 = 0x01;
	pub const ICONST_M1: u8 = 0x02;
	pub const ICONST_0: u8 = 0x03;
	pub const ICONST_1: u8 = 0x04;
	pub const ICONST_2: u8 = 0x05;
	pub const ICONST_3: u8 = 0x06;
	pub const ICONST_4: u8 = 0x07;
	pub const ICONST_5: u8 = 0x08;
	pub const LCONST_0: u8 = 0x09;
	pub const LCONST_1: u8 = 0x0a;
	pub const FCONST_0: u8 = 0x0b;
	pub const FCONST_1: u8 = 0x0c;
	pub const FCONST_2: u8 = 0x0d;
	pub const DCONST_0: u8 = 0x0e;
	pub const DCONST_1: u8 = 0x0f;
	pub const BIPUSH: u8 = 0x10;
	pub const SIPUSH: u8 = 0x11;
	pub const LDC: u8 = 0x12;
	pub const LDC_W: u8 = 0x13;
	pub const LDC2_W: u8 = 0x14;
	pub const ILOAD: u8 = 0x15;
	pub const LLOAD: u8 = 0x16;
	pub const FLOAD: u8 = 0x17;
	pub const DLOAD: u8 = 0x18;
	pub const ALOAD: u8 = 0x19;
	pub const ILOAD_0: u8 = 0x1a;
	pub const ILOAD_1: u8 = 0x1b;
	pub const ILOAD_2: u8 = 0x1c;
	pub const ILOAD_3: u8 = 0x1d;
	pub const LLOAD_0: u8 = 0x1e;
	pub const LLOAD_1: u8 = 0x1f;
	pub const LLOAD_2: u8 = 0x20;
	pub const LLOAD_3: u8 = 0x21;
	pub const FLOAD_0: u8 = 0x22;
	pub const FLOAD_1: u8 = 0x23;
	pub const FLOAD_2: u8 = 0x24;
	pub const FLOAD_3: u8 = 0x25;
	pub const DLOAD_0: u8 = 0x26;
	pub const DLOAD_1: u8 = 0x27;
	pub const DLOAD_2: u8 = 0x28;
	pub const DLOAD_3: u8 = 0x29;
	pub const ALOAD_0: u8 = 0x2a;
	pub const ALOAD_1: u8 = 0x2b;
	pub const ALOAD_2: u8 = 0x2c;
	pub const ALOAD_3: u8 = 0x2d;
	pub const IALOAD: u8 = 0x2e;
	pub const LALOAD: u8 = 0x2f;
	pub const FALOAD: u8 = 0x30;
	pub const DALOAD: u8 = 0x31;
	pub const AALOAD: u8 = 0x32;
	pub const BALOAD: u8 = 0x33;
	pub const CALOAD: u8 = 0x34;
	pub const SALOAD: u8 = 0x35;
	pub const ISTORE: u8 = 0x36;
	pub const LSTORE: u8 = 0x37;
	pub const FSTORE: u8 = 0x38;
	pub const DSTORE: u8 = 0x39;
	pub const ASTORE: u8 = 0x3a;
	pub const ISTORE_0: u8 = 0x3b;
	pub const ISTORE_1: u8 = 0x3c;
	pub const ISTORE_2: u8 = 0x3d;
	pub const ISTORE_3: u8 = 0x3e;
	pub const LSTORE_0: u8 = 0x3f;
	pub const LSTORE_1: u8 = 0x40;
	pub const LSTORE_2: u8 = 0x41;
	pub const LSTORE_3: u8 = 0x42;
	pub const FSTORE_0: u8 = 0x43;
	pub const FSTORE_1: u8 = 0x44;
	pub const FSTORE_2: u8 = 0x45;
	pub const FSTORE_3: u8 = 0x46;
	pub const DSTORE_0: u8 = 0x47;
	pub const DSTORE_1: u8 = 0x48;
	pub const DSTORE_2: u8 = 0x49;
	pub const DSTORE_3: u8 = 0x4a;
	pub const ASTORE_0: u8 = 0x4b;
	pub const ASTORE_1: u8 = 0x4c;
	pub const ASTORE_2: u8 = 0x4d;
	pub const ASTORE_3: u8 = 0x4e;
	pub const IASTORE: u8 = 0x4f;
	pub const LASTORE: u8 = 0x50;
	pub const FASTORE: u8 = 0x51;
	pub const DASTORE: u8 = 0x52;
	pub const AASTORE: u8 = 0x53;
	pub const BASTORE: u8 = 0x54;
	pub const CASTORE: u8 = 0x55;
	pub const SASTORE: u8 = 0x56;
	pub const POP: u8 = 0x57;
	pub const POP2: u8 = 0x58;
	pub const DUP: u8 = 0x59;
	pub const DUP_X1: u8 = 0x5a;
	pub const DUP_X2: u8 = 0x5b;
	pub const DUP2: u8 = 0x5c;
	pub const DUP2_X1: u8 = 0x5d;
	pub const DUP2_X2: u8 = 0x5e;
	pub const SWAP: u8 = 0x5f;
	pub const IADD: u8 = 0x60;
	pub const LADD: u8 = 0x61;
	pub const FADD: u8 = 0x62;
	pub const DADD: u8 = 0x63;
	pub const ISUB: u8 = 0x64;
	pub const LSUB: u8 = 0x65;
	pub const FSUB: u8 = 0x66;
	pub const DSUB: u8 = 0x67;
	pub const IMUL: u8 = 0x68;
	pub const LMUL: u8 = 0x69;
	pub const FMUL: u8 = 0x6a;
	pub const DMUL: u8 = 0x6b;
	pub const IDIV: u8 = 0x6c;
	pub const LDIV: u8 = 0x6d;
	pub const FDIV: u8 = 0x6e;
	pub const DDIV: u8 = 0x6f;
	pub const IREM: u8 = 0x70;
	pub const LREM: u8 = 0x71;
	pub const FREM: u8 = 0x72;
	pub const DREM: u8 = 0x73;
	pub const INEG: u8 = 0x74;
	pub const LNEG: u8 = 0x75;
	pub const FNEG: u8 = 0x76;
	pub const DNEG: u8 = 0x77;
	pub const ISHL: u8 = 0x78;
	pub const LSHL: u8 = 0x79;
	pub const ISHR: u8 = 0x7a;
	pub const LSHR: u8 = 0x7b;
	pub const IUSHR: u8 = 0x7c;
	pub const LUSHR: u8 = 0x7d;
	pub const IAND: u8 = 0x7e;
	pub const LAND: u8 = 0x7f;
	pub const IOR: u8 = 0x80;
	pub const LOR: u8 = 0x81;
	pub const IXOR: u8 = 0x82;
	pub const LXOR: u8 = 0x83;
	pub const IINC: u8 = 0x84;
	pub const I2L: u8 = 0x85;
	pub const I2F: u8 = 0x86;
	pub const I2D: u8 = 0x87;
	pub const L2I: u8 = 0x88;
	pub const L2F: u8 = 0x89;
	pub const L2D: u8 = 0x8a;
	pub const F2I: u8 = 0x8b;
	pub const F2L: u8 = 0x8c;
	pub const F2D: u8 = 0x8d;
	pub const D2I: u8 = 0x8e;
	pub const D2L: u8 = 0x8f;
	pub const D2F: u8 = 0x90;
	pub const I2B: u8 = 0x91;
	pub const I2C: u8 = 0x92;
	pub const I2S: u8 = 0x93;
	pub const LCMP: u8 = 0x94;
	pub const FCMPL: u8 = 0x95;
	pub const FCMPG: u8 = 0x96;
	pub const DCMPL: u8 = 0x97;
	pub const DCMPG: u8 = 0x98;
	pub const IFEQ: u8 = 0x99;
	pub const IFNE: u8 = 0x9a;
	pub const IFLT: u8 = 0x9b;
	pub const IFGE: u8 = 0x9c;
	pub const IFGT: u8 = 0x9d;
	pub const IFLE: u8 = 0x9e;
	pub const IF_ICMPEQ: u8 = 0x9f;
	pub const IF_ICMPNE: u8 = 0xa0;
	pub const IF_ICMPLT: u8 = 0xa1;
	pub const IF_ICMPGE: u8 = 0xa2;
	pub const IF_ICMPGT: u8 = 0xa3;
	pub const IF_ICMPLE: u8 = 0xa4;
	pub const IF_ACMPEQ: u8 = 0xa5;
	pub const IF_ACMPNE: u8 = 0xa6;
	pub const GOTO: u8 = 0xa7;
	pub const JSR: u8 = 0xa8;
	pub const RET: u8 = 0xa9;
	pub const TABLESWITCH: u8 = 0xaa;
	pub const LOOKUPSWITCH: u8 = 0xab;
	pub const IRETURN: u8 = 0xac;
	pub const LRETURN: u8 = 0xad;
	pub const FRETURN: u8 = 0xae;
	pub const DRETURN: u8 = 0xaf;
	pub const ARETURN: u8 = 0xb0;
	pub const RETURN: u8 = 0xb1;
	pub const GETSTATIC: u8 = 0xb2;
	pub const PUTSTATIC: u8 = 0xb3;
	pub const GETFIELD: u8 = 0xb4;
	pub const PUTFIELD: u8 = 0xb5;
	pub const INVOKEVIRTUAL: u8 = 0xb6;
	pub const INVOKESPECIAL: u8 = 0xb7;
	pub const INVOKESTATIC: u8 = 0xb8;
	pub const INVOKEINTERFACE: u8 = 0xb9;
	pub const INVOKEDYNAMIC: u8 = 0xba;
	pub const NEW: u8 = 0xbb;
	pub const NEWARRAY: u8 = 0xbc;
	pub const ANEWARRAY: u8 = 0xbd;
	pub const ARRAYLENGTH: u8 = 0xbe;
	pub const ATHROW: u8 = 0xbf;
	pub const CHECKCAST: u8 = 0xc0;
	pub const INSTANCEOF: u8 = 0xc1;
	pub const MONITORENTER: u8 = 0xc2;
	pub const MONITOREXIT: u8 = 0xc3;
	pub const WIDE: u8 = 0xc4;
	pub const MULTIANEWARRAY: u8 = 0xc5;
	pub const IFNULL: u8 = 0xc6;
	pub const IFNONNULL: u8 = 0xc7;
	pub const GOTO_W: u8 = 0xc8;
	pub const JSR_W: u8 = 0xc9;

	const NAMES: [&str; 0xca] = [
		"nop", "aconst_null", "iconst_m1", "iconst_0", "iconst_1", "iconst_2", "iconst_3", "iconst_4",
		"iconst_5", "lconst_0", "lconst_1", "fconst_0", "fconst_1", "fconst_2", "dconst_0", "dconst_1",
		"bipush", "sipush", "ldc", "ldc_w", "ldc2_w", "iload", "lload", "fload",
		"dload", "aload", "iload_0", "iload_1", "iload_2", "iload_3", "lload_0", "lload_1",
		"lload_2", "lload_3", "fload_0", "fload_1", "fload_2", "fload_3", "dload_0", "dload_1",
		"dload_2", "dload_3", "aload_0", "aload_1", "aload_2", "aload_3", "iaload", "laload",
		"faload", "daload", "aaload", "baload", "caload", "saload", "istore", "lstore",
		"fstore", "dstore", "astore", "istore_0", "istore_1", "istore_2", "istore_3", "lstore_0",
		"lstore_1", "lstore_2", "lstore_3", "fstore_0", "fstore_1", "fstore_2", "fstore_3", "dstore_0",
		"dstore_1", "dstore_2", "dstore_3", "astore_0", "astore_1", "astore_2", "astore_3", "iastore",
		"lastore", "fastore", "dastore", "aastore", "bastore", "castore", "sastore", "pop",
		"pop2", "dup", "dup_x1", "dup_x2", "dup2", "dup2_x1", "dup2_x2", "swap",
		"iadd", "ladd", "fadd", "dadd", "isub", "lsub", "fsub", "dsub",
		"imul", "lmul", "fmul", "dmul", "idiv", "ldiv", "fdiv", "ddiv",
		"irem", "lrem", "frem", "drem", "ineg", "lneg", "fneg", "dneg",
		"ishl", "lshl", "ishr", "lshr", "iushr", "lushr", "iand", "land",
		"ior", "lor", "ixor", "lxor", "iinc", "i2l", "i2f", "i2d",
		"l2i", "l2f", "l2d", "f2i", "f2l", "f2d", "d2i", "d2l",
		"d2f", "i2b", "i2c", "i2s", "lcmp", "fcmpl", "fcmpg", "dcmpl",
		"dcmpg", "ifeq", "ifne", "iflt", "ifge", "ifgt", "ifle", "if_icmpeq",
		"if_icmpne", "if_icmplt", "if_icmpge", "if_icmpgt", "if_icmple", "if_acmpeq", "if_acmpne", "goto",
		"jsr", "ret", "tableswitch", "lookupswitch", "ireturn", "lreturn", "freturn", "dreturn",
		"areturn", "return", "getstatic", "putstatic", "getfield", "putfield", "invokevirtual", "invokespecial",
		"invokestatic", "invokeinterface", "invokedynamic", "new", "newarray", "anewarray", "arraylength", "athrow",
		"checkcast", "instanceof", "monitorenter", "monitorexit", "wide", "multianewarray", "ifnull", "ifnonnull",
		"goto_w", "jsr_w",
	];

	/// The mnemonic of an opcode, as printed by `javap`.
	pub fn name(opcode: u8) -> Option<&'static str> {
		NAMES.get(opcode as usize).copied()
	}

	pub fn by_name(name: &str) -> Option<u8> {
		NAMES.iter()
			.position(|n| *n == name)
			.and_then(|i| u8::try_from(i).ok())
	}

	/// Opcodes that take no operand bytes.
	pub fn is_plain(opcode: u8) -> bool {
		matches!(opcode,
			NOP..=DCONST_1 |
			IALOAD..=SALOAD |
			IASTORE..=LXOR |
			I2L..=DCMPG |
			IRETURN..=RETURN |
			ARRAYLENGTH..=ATHROW |
			MONITORENTER..=MONITOREXIT
		)
	}

	/// Whether control never falls through to the following instruction.
	pub fn is_unconditional(opcode: u8) -> bool {
		matches!(opcode,
			GOTO | GOTO_W | RET | TABLESWITCH | LOOKUPSWITCH | IRETURN..=RETURN | ATHROW
		)
	}

	pub fn is_return(opcode: u8) -> bool {
		matches!(opcode, IRETURN..=RETURN)
	}

	/// The conditional jump with the opposite condition, used for widening branches.
	pub fn invert_condition(opcode: u8) -> Option<u8> {
		Some(match opcode {
			IFEQ => IFNE,
			IFNE => IFEQ,
			IFLT => IFGE,
			IFGE => IFLT,
			IFGT => IFLE,
			IFLE => IFGT,
			IF_ICMPEQ => IF_ICMPNE,
			IF_ICMPNE => IF_ICMPEQ,
			IF_ICMPLT => IF_ICMPGE,
			IF_ICMPGE => IF_ICMPLT,
			IF_ICMPGT => IF_ICMPLE,
			IF_ICMPLE => IF_ICMPGT,
			IF_ACMPEQ => IF_ACMPNE,
			IF_ACMPNE => IF_ACMPEQ,
			IFNULL => IFNONNULL,
			IFNONNULL => IFNULL,
			_ => return None,
		})
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use super::{atype, opcode};

	#[test]
	fn opcode_names_line_up() {
		assert_eq!(opcode::name(opcode::NOP), Some("nop"));
		assert_eq!(opcode::name(opcode::ALOAD_3), Some("aload_3"));
		assert_eq!(opcode::name(opcode::IINC), Some("iinc"));
		assert_eq!(opcode::name(opcode::INVOKEDYNAMIC), Some("invokedynamic"));
		assert_eq!(opcode::name(opcode::MULTIANEWARRAY), Some("multianewarray"));
		assert_eq!(opcode::name(opcode::JSR_W), Some("jsr_w"));
		assert_eq!(opcode::name(0xca), None);
		assert_eq!(opcode::by_name("if_acmpne"), Some(opcode::IF_ACMPNE));
		assert_eq!(opcode::by_name("frobnicate"), None);
	}

	#[test]
	fn plain_opcodes() {
		assert!(opcode::is_plain(opcode::IADD));
		assert!(opcode::is_plain(opcode::RETURN));
		assert!(opcode::is_plain(opcode::MONITOREXIT));
		assert!(!opcode::is_plain(opcode::BIPUSH));
		assert!(!opcode::is_plain(opcode::IINC));
		assert!(!opcode::is_plain(opcode::ILOAD_0));
		assert!(!opcode::is_plain(opcode::NEW));
	}

	#[test]
	fn atypes() {
		assert_eq!(atype::name(atype::T_INT), Some("int"));
		assert_eq!(atype::by_name("boolean"), Some(atype::T_BOOLEAN));
		assert_eq!(atype::array_descriptor(atype::T_LONG), Some("[J"));
		assert_eq!(atype::name(3), None);
	}
}
