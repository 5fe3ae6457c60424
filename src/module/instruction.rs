//! Method body instructions

use std::fmt;

use super::Backing;

/// CIL opcode value as stored in the image
///
/// Two-byte opcodes keep their `0xFE` prefix in the high byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpCode(pub u16);

impl OpCode {
    pub const NOP: OpCode = OpCode(0x00);
    pub const LDARG_0: OpCode = OpCode(0x02);
    pub const LDNULL: OpCode = OpCode(0x14);
    pub const LDC_I4: OpCode = OpCode(0x20);
    pub const LDC_I8: OpCode = OpCode(0x21);
    pub const POP: OpCode = OpCode(0x26);
    pub const CALL: OpCode = OpCode(0x28);
    pub const RET: OpCode = OpCode(0x2A);
    pub const BRFALSE_S: OpCode = OpCode(0x2C);
    pub const BR: OpCode = OpCode(0x38);
    pub const CALLVIRT: OpCode = OpCode(0x6F);
    pub const LDSTR: OpCode = OpCode(0x72);
    pub const NEWOBJ: OpCode = OpCode(0x73);
    pub const LDFLD: OpCode = OpCode(0x7B);
    pub const LDSFLD: OpCode = OpCode(0x7E);
    pub const STSFLD: OpCode = OpCode(0x80);
    pub const ENDFINALLY: OpCode = OpCode(0xDC);
    pub const LEAVE_S: OpCode = OpCode(0xDE);

    /// Mnemonic for known opcodes
    #[must_use]
    pub fn mnemonic(self) -> Option<&'static str> {
        let name = match self {
            Self::NOP => "nop",
            Self::LDARG_0 => "ldarg.0",
            Self::LDNULL => "ldnull",
            Self::LDC_I4 => "ldc.i4",
            Self::LDC_I8 => "ldc.i8",
            Self::POP => "pop",
            Self::CALL => "call",
            Self::RET => "ret",
            Self::BRFALSE_S => "brfalse.s",
            Self::BR => "br",
            Self::CALLVIRT => "callvirt",
            Self::LDSTR => "ldstr",
            Self::NEWOBJ => "newobj",
            Self::LDFLD => "ldfld",
            Self::LDSFLD => "ldsfld",
            Self::STSFLD => "stsfld",
            Self::ENDFINALLY => "endfinally",
            Self::LEAVE_S => "leave.s",
            _ => return None,
        };
        Some(name)
    }

    /// Opcode bytes as they appear in a method body
    #[must_use]
    pub fn encode(self) -> Vec<u8> {
        let [high, low] = self.0.to_be_bytes();
        if high == 0xFE { vec![high, low] } else { vec![low] }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mnemonic() {
            Some(name) => f.write_str(name),
            None => write!(f, "op_{:04X}", self.0),
        }
    }
}

/// Where an external member lives, kept so the reference can be recreated
/// in another module
#[derive(Debug, Clone)]
pub(crate) struct Import {
    /// Name of the assembly the declaring type resolves against
    pub scope: String,
    /// Member signature blob
    pub signature: Vec<u8>,
}

/// Reference to a member of some type, by name
///
/// Two references are equal when the declaring type and member name are.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// Full name of the declaring type (`Namespace.Type`)
    pub declaring_type: String,
    pub name: String,
    pub(crate) import: Backing<Import>,
}

impl MemberRef {
    pub fn new(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            name: name.into(),
            import: Backing::none(),
        }
    }

    pub(crate) fn imported(
        declaring_type: impl Into<String>,
        name: impl Into<String>,
        import: Import,
    ) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            name: name.into(),
            import: Backing::new(import),
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring_type, self.name)
    }
}

/// Instruction operand
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    None,
    Int32(i32),
    Int64(i64),
    /// Raw bits of a `float32`/`float64` immediate
    Float(u64),
    String(String),
    Method(MemberRef),
    Field(MemberRef),
    Type(String),
    /// Metadata token the model does not resolve (type specs, signatures)
    Token(u32),
    /// IL offset of the branch target
    Branch(u32),
    /// IL offsets of the switch targets
    Switch(Vec<u32>),
}

/// Byte range an instruction occupied in the body it was decoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub offset: u32,
    pub size: u32,
}

/// A single instruction; two instructions are equal when opcode and operand are
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub opcode: OpCode,
    pub operand: Operand,
    pub(crate) span: Backing<Span>,
}

impl Instruction {
    pub fn new(opcode: OpCode, operand: Operand) -> Self {
        Self {
            opcode,
            operand,
            span: Backing::none(),
        }
    }

    pub(crate) fn decoded(opcode: OpCode, operand: Operand, span: Span) -> Self {
        Self {
            opcode,
            operand,
            span: Backing::new(span),
        }
    }

    /// `call` to the given method
    pub fn call(target: MemberRef) -> Self {
        Self::new(OpCode::CALL, Operand::Method(target))
    }

    pub fn ret() -> Self {
        Self::new(OpCode::RET, Operand::None)
    }

    pub fn ldstr(value: impl Into<String>) -> Self {
        Self::new(OpCode::LDSTR, Operand::String(value.into()))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operand {
            Operand::None => write!(f, "{}", self.opcode),
            Operand::Int32(v) => write!(f, "{} {v}", self.opcode),
            Operand::Int64(v) => write!(f, "{} {v}", self.opcode),
            Operand::Float(bits) => write!(f, "{} 0x{bits:X}", self.opcode),
            Operand::String(s) => write!(f, "{} {s:?}", self.opcode),
            Operand::Method(m) | Operand::Field(m) => write!(f, "{} {m}", self.opcode),
            Operand::Type(t) => write!(f, "{} {t}", self.opcode),
            Operand::Token(token) => write!(f, "{} 0x{token:08X}", self.opcode),
            Operand::Branch(target) => write!(f, "{} IL_{target:04X}", self.opcode),
            Operand::Switch(targets) => {
                let labels: Vec<String> = targets.iter().map(|t| format!("IL_{t:04X}")).collect();
                write!(f, "{} ({})", self.opcode, labels.join(", "))
            }
        }
    }
}
