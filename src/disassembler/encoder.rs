//! Re-encoding of decoded instruction streams.
//!
//! Round-trips the fixed-width operand encodings byte for byte: decoding a
//! stream and encoding it again reproduces the input exactly as long as no
//! operand needed token remapping. Symbol operands encode their
//! destination-module token, which by construction differs from the raw
//! stream token they were decoded from; string and signature operands
//! cannot be re-encoded without a heap to intern into and are rejected.

use crate::{
    disassembler::instruction::{Immediate, Instruction, Operand, OperandKind, Target},
    file::io::write_le,
    Result,
};

/// Encode a decoded instruction stream back into bytes.
///
/// # Errors
/// Returns an error if a branch displacement does not fit its declared
/// width, if a branch target was never resolved to an index, or if the
/// stream contains string or signature operands.
pub fn encode_stream(instructions: &[Instruction]) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    for instruction in instructions {
        if instruction.opcode.value > 0xFF {
            write_le::<u8>(&mut out, (instruction.opcode.value >> 8) as u8);
        }
        write_le::<u8>(&mut out, instruction.opcode.value as u8);

        let next_offset = instruction.offset + instruction.size() as u32;
        match &instruction.operand {
            Operand::None => {}
            Operand::Immediate(immediate) => match immediate {
                Immediate::Int8(value) => write_le(&mut out, *value),
                Immediate::Int32(value) => write_le(&mut out, *value),
                Immediate::Int64(value) => write_le(&mut out, *value),
                Immediate::Float32(value) => write_le(&mut out, *value),
                Immediate::Float64(value) => write_le(&mut out, *value),
            },
            Operand::Local(index) | Operand::Argument(index) => {
                match instruction.opcode.operand {
                    OperandKind::LocalShort | OperandKind::ArgumentShort => {
                        write_le::<u8>(&mut out, *index as u8);
                    }
                    _ => write_le::<u16>(&mut out, *index),
                }
            }
            Operand::Branch(target) => {
                let delta = displacement(instructions, *target, next_offset)?;
                if instruction.opcode.operand == OperandKind::BranchShort {
                    let delta = i8::try_from(delta).map_err(|_| {
                        malformed_error!("Branch displacement {} exceeds short form", delta)
                    })?;
                    write_le(&mut out, delta);
                } else {
                    write_le(&mut out, delta);
                }
            }
            Operand::Switch(targets) => {
                write_le::<u32>(&mut out, targets.len() as u32);
                for target in targets {
                    write_le(&mut out, displacement(instructions, *target, next_offset)?);
                }
            }
            Operand::Symbol(symbol) => {
                write_le::<u32>(&mut out, symbol.token().value());
            }
            Operand::String(_) | Operand::Signature(_) => {
                return Err(crate::Error::NotSupported);
            }
        }
    }

    Ok(out)
}

fn displacement(instructions: &[Instruction], target: Target, next_offset: u32) -> Result<i32> {
    let Target::Index(index) = target else {
        return Err(malformed_error!("Unresolved branch target"));
    };
    let Some(destination) = instructions.get(index) else {
        return Err(malformed_error!("Branch target index {} out of range", index));
    };
    Ok(destination.offset.wrapping_sub(next_offset) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disassembler::decoder::{decode_stream, TokenResolver};
    use crate::devirt::resolver::CilSymbol;

    struct NoTokens;

    impl TokenResolver for NoTokens {
        fn resolve_token(&self, _raw: u32) -> Result<Option<CilSymbol>> {
            Ok(None)
        }
    }

    #[test]
    fn fixed_width_round_trip() {
        // nop; ldc.i4.s -3; ldc.i4 7; br.s -> ret; ldloc.s 0; ldarg.s 0; ret
        let code = [
            0x00, //
            0x1F, 0xFD, //
            0x20, 0x07, 0x00, 0x00, 0x00, //
            0x2B, 0x04, //
            0x11, 0x00, //
            0x0E, 0x00, //
            0x2A,
        ];
        let instructions = decode_stream(&code, &NoTokens, 1, 1).unwrap();
        assert_eq!(encode_stream(&instructions).unwrap(), code);
    }

    #[test]
    fn switch_round_trip() {
        let code = [
            0x45, 0x02, 0x00, 0x00, 0x00, //
            0x00, 0x00, 0x00, 0x00, //
            0x01, 0x00, 0x00, 0x00, //
            0x2A, 0x2A,
        ];
        let instructions = decode_stream(&code, &NoTokens, 0, 0).unwrap();
        assert_eq!(encode_stream(&instructions).unwrap(), code);
    }

    #[test]
    fn backward_branch_round_trip() {
        // nop; br -5
        let code = [0x00, 0x38, 0xFA, 0xFF, 0xFF, 0xFF];
        let instructions = decode_stream(&code, &NoTokens, 0, 0).unwrap();
        assert_eq!(encode_stream(&instructions).unwrap(), code);
    }

    #[test]
    fn prefixed_round_trip() {
        // ldc.i4.0; ldc.i4.1; ceq; ret
        let code = [0x16, 0x17, 0xFE, 0x01, 0x2A];
        let instructions = decode_stream(&code, &NoTokens, 0, 0).unwrap();
        assert_eq!(encode_stream(&instructions).unwrap(), code);
    }
}
