//! Instruction and operand model for decoded CIL.

use crate::metadata::{module::SymbolRef, signatures::MethodSig};

/// The operand shape an opcode declares, driving how its operand bytes are
/// read from the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand bytes
    None,
    /// 8-bit signed immediate
    Int8,
    /// 32-bit signed immediate
    Int32,
    /// 64-bit signed immediate
    Int64,
    /// 32-bit float immediate
    Float32,
    /// 64-bit float immediate
    Float64,
    /// 8-bit local variable index (short form)
    LocalShort,
    /// 16-bit local variable index
    Local,
    /// 8-bit argument index (short form)
    ArgumentShort,
    /// 16-bit argument index
    Argument,
    /// 8-bit signed branch displacement (short form)
    BranchShort,
    /// 32-bit signed branch displacement
    Branch,
    /// 32-bit case count followed by that many 32-bit displacements
    Switch,
    /// 32-bit field token
    Field,
    /// 32-bit method token
    Method,
    /// 32-bit standalone signature token
    Signature,
    /// 32-bit user string token
    String,
    /// 32-bit type token
    Type,
    /// 32-bit token of any loadable kind (`ldtoken`)
    Token,
}

/// One entry of the fixed CIL opcode tables.
///
/// Two-byte opcodes carry the `0xFE` prefix in the high byte of `value`.
#[derive(Debug, PartialEq, Eq)]
pub struct OpCode {
    /// Canonical mnemonic
    pub mnemonic: &'static str,
    /// Encoded opcode value (`0xFExx` for prefixed opcodes)
    pub value: u16,
    /// Declared operand shape
    pub operand: OperandKind,
}

impl OpCode {
    /// Encoded length of the opcode itself (1 or 2 bytes).
    #[must_use]
    pub fn len(&self) -> usize {
        if self.value > 0xFF {
            2
        } else {
            1
        }
    }

    /// Always `false`; every opcode occupies at least one byte.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// A fixed-width immediate operand value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// 8-bit signed
    Int8(i8),
    /// 32-bit signed
    Int32(i32),
    /// 64-bit signed
    Int64(i64),
    /// 32-bit float
    Float32(f32),
    /// 64-bit float
    Float64(f64),
}

/// A branch destination.
///
/// Pass 1 of the decoder records the absolute byte offset of the target;
/// pass 2 rewrites every target into the index of the instruction that
/// starts at that offset. Decoded bodies only ever expose
/// [`Target::Index`]; a leftover offset means decode failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Absolute byte offset within the body (pre-resolution)
    Offset(u32),
    /// Index into the body's instruction list (post-resolution)
    Index(usize),
}

/// A decoded instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Fixed-width immediate
    Immediate(Immediate),
    /// Local variable index
    Local(u16),
    /// Argument index
    Argument(u16),
    /// Single branch destination
    Branch(Target),
    /// Jump table destinations
    Switch(Vec<Target>),
    /// Resolved user string (`ldstr`)
    String(String),
    /// Resolved destination symbol (field/method/type token operands)
    Symbol(SymbolRef),
    /// Decoded standalone signature (`calli`)
    Signature(MethodSig),
}

/// A single decoded CIL instruction.
///
/// Immutable once the owning body is built. `offset` is the byte offset of
/// the opcode within the original stream and is what branch targets and
/// exception region boundaries were resolved against.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Byte offset of this instruction within the body
    pub offset: u32,
    /// The opcode table entry
    pub opcode: &'static OpCode,
    /// Decoded operand
    pub operand: Operand,
}

impl Instruction {
    /// Encoded size in bytes (opcode plus operand).
    #[must_use]
    pub fn size(&self) -> usize {
        self.opcode.len() + self.operand_size()
    }

    fn operand_size(&self) -> usize {
        match self.opcode.operand {
            OperandKind::None => 0,
            OperandKind::Int8
            | OperandKind::LocalShort
            | OperandKind::ArgumentShort
            | OperandKind::BranchShort => 1,
            OperandKind::Local | OperandKind::Argument => 2,
            OperandKind::Int32
            | OperandKind::Float32
            | OperandKind::Branch
            | OperandKind::Field
            | OperandKind::Method
            | OperandKind::Signature
            | OperandKind::String
            | OperandKind::Type
            | OperandKind::Token => 4,
            OperandKind::Int64 | OperandKind::Float64 => 8,
            OperandKind::Switch => match &self.operand {
                Operand::Switch(targets) => 4 + targets.len() * 4,
                _ => 4,
            },
        }
    }

    /// The loaded constant if this is any `ldc.i4*` encoding.
    ///
    /// Covers the inline-constant forms (`ldc.i4.0` .. `ldc.i4.8`,
    /// `ldc.i4.m1`), the short form and the long form.
    #[must_use]
    pub fn ldc_i4_value(&self) -> Option<i32> {
        match self.opcode.value {
            // ldc.i4.m1 .. ldc.i4.8 (0x15 .. 0x1E)
            value @ 0x15..=0x1E => Some(i32::from(value as i16) - 0x16),
            // ldc.i4.s
            0x1F => match self.operand {
                Operand::Immediate(Immediate::Int8(v)) => Some(i32::from(v)),
                _ => None,
            },
            // ldc.i4
            0x20 => match self.operand {
                Operand::Immediate(Immediate::Int32(v)) => Some(v),
                _ => None,
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disassembler::opcodes;

    #[test]
    fn sizes() {
        let ret = Instruction {
            offset: 0,
            opcode: &opcodes::RET,
            operand: Operand::None,
        };
        assert_eq!(ret.size(), 1);

        let ldc = Instruction {
            offset: 0,
            opcode: &opcodes::LDC_I4,
            operand: Operand::Immediate(Immediate::Int32(7)),
        };
        assert_eq!(ldc.size(), 5);

        let ceq = Instruction {
            offset: 0,
            opcode: &opcodes::CEQ,
            operand: Operand::None,
        };
        assert_eq!(ceq.size(), 2);

        let switch = Instruction {
            offset: 0,
            opcode: &opcodes::SWITCH,
            operand: Operand::Switch(vec![Target::Index(0), Target::Index(1)]),
        };
        assert_eq!(switch.size(), 1 + 4 + 8);
    }

    #[test]
    fn ldc_i4_values() {
        let minus_one = Instruction {
            offset: 0,
            opcode: &opcodes::LDC_I4_M1,
            operand: Operand::None,
        };
        assert_eq!(minus_one.ldc_i4_value(), Some(-1));

        let five = Instruction {
            offset: 0,
            opcode: &opcodes::LDC_I4_5,
            operand: Operand::None,
        };
        assert_eq!(five.ldc_i4_value(), Some(5));

        let short = Instruction {
            offset: 0,
            opcode: &opcodes::LDC_I4_S,
            operand: Operand::Immediate(Immediate::Int8(-100)),
        };
        assert_eq!(short.ldc_i4_value(), Some(-100));

        let long = Instruction {
            offset: 0,
            opcode: &opcodes::LDC_I4,
            operand: Operand::Immediate(Immediate::Int32(1337)),
        };
        assert_eq!(long.ldc_i4_value(), Some(1337));

        let not_a_constant = Instruction {
            offset: 0,
            opcode: &opcodes::NOP,
            operand: Operand::None,
        };
        assert_eq!(not_a_constant.ldc_i4_value(), None);
    }
}
