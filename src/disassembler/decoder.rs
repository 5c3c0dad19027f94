//! Two-pass decoding of dynamic method instruction streams.
//!
//! Pass 1 walks the byte cursor over `[0, code.len())`, reading each opcode
//! from the fixed tables and its operand per the declared shape; branch and
//! switch targets are kept as raw byte offsets because forward branches
//! reference instructions not yet decoded. Pass 2 rewrites every offset
//! into an instruction index. Reaching the end of the stream mid-operand,
//! an undefined opcode, or a branch to an offset where no instruction
//! starts all fail the decode.
//!
//! Token operands dispatch through a [`TokenResolver`]; method, field and
//! type operands are structural and must resolve, string operands degrade
//! to the empty string.

use log::debug;

use crate::{
    devirt::resolver::{CilSymbol, SymbolResolver},
    disassembler::{
        exceptions::{self, OffsetIndex},
        instruction::{Immediate, Instruction, OpCode, Operand, OperandKind, Target},
        opcodes,
    },
    file::parser::Parser,
    metadata::{
        method::{Local, MethodBody},
        module::{Module, SymbolRef},
        signatures::parse_local_sig,
        token::Token,
    },
    runtime::{DynamicBody, ExceptionData, RuntimeBridge},
    Result,
};

/// Prefix byte introducing the two-byte opcode page.
const PREFIX: u8 = 0xFE;

/// Token operand dispatch used by the instruction decoder.
///
/// [`SymbolResolver`] is the production implementation; the seam exists so
/// pure stream decoding is testable without a runtime bridge.
pub trait TokenResolver {
    /// Resolve a raw 32-bit token operand.
    ///
    /// # Errors
    /// Propagates resolution failures that must abort the decode.
    fn resolve_token(&self, raw: u32) -> Result<Option<CilSymbol>>;
}

impl TokenResolver for SymbolResolver<'_> {
    fn resolve_token(&self, raw: u32) -> Result<Option<CilSymbol>> {
        self.resolve(raw)
    }
}

/// Decode a raw instruction stream into resolved instructions.
///
/// `locals_count` and `arg_count` bound the index operands; both passes
/// run here, so every returned branch target is already a
/// [`Target::Index`].
///
/// # Errors
/// Returns an error on truncation, undefined opcodes, out-of-range index
/// operands, unresolvable structural tokens or dangling branch targets.
pub fn decode_stream(
    code: &[u8],
    resolver: &dyn TokenResolver,
    locals_count: usize,
    arg_count: usize,
) -> Result<Vec<Instruction>> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::new();

    while parser.has_more_data() {
        let offset = parser.pos() as u32;
        let opcode = read_opcode(&mut parser)?;
        let operand = read_operand(&mut parser, opcode, resolver, locals_count, arg_count)?;
        instructions.push(Instruction {
            offset,
            opcode,
            operand,
        });
    }

    resolve_targets(&mut instructions)?;
    Ok(instructions)
}

fn read_opcode(parser: &mut Parser<'_>) -> Result<&'static OpCode> {
    let first = parser.read_le::<u8>()?;
    let value = if first == PREFIX {
        0xFE00 | u16::from(parser.read_le::<u8>()?)
    } else {
        u16::from(first)
    };
    opcodes::lookup(value).ok_or_else(|| malformed_error!("Undefined opcode 0x{:04X}", value))
}

fn read_operand(
    parser: &mut Parser<'_>,
    opcode: &'static OpCode,
    resolver: &dyn TokenResolver,
    locals_count: usize,
    arg_count: usize,
) -> Result<Operand> {
    match opcode.operand {
        OperandKind::None => Ok(Operand::None),
        OperandKind::Int8 => Ok(Operand::Immediate(Immediate::Int8(parser.read_le::<i8>()?))),
        OperandKind::Int32 => Ok(Operand::Immediate(Immediate::Int32(
            parser.read_le::<i32>()?,
        ))),
        OperandKind::Int64 => Ok(Operand::Immediate(Immediate::Int64(
            parser.read_le::<i64>()?,
        ))),
        OperandKind::Float32 => Ok(Operand::Immediate(Immediate::Float32(
            parser.read_le::<f32>()?,
        ))),
        OperandKind::Float64 => Ok(Operand::Immediate(Immediate::Float64(
            parser.read_le::<f64>()?,
        ))),
        OperandKind::LocalShort => {
            let index = u16::from(parser.read_le::<u8>()?);
            check_index(index, locals_count, "local")?;
            Ok(Operand::Local(index))
        }
        OperandKind::Local => {
            let index = parser.read_le::<u16>()?;
            check_index(index, locals_count, "local")?;
            Ok(Operand::Local(index))
        }
        OperandKind::ArgumentShort => {
            let index = u16::from(parser.read_le::<u8>()?);
            check_index(index, arg_count, "argument")?;
            Ok(Operand::Argument(index))
        }
        OperandKind::Argument => {
            let index = parser.read_le::<u16>()?;
            check_index(index, arg_count, "argument")?;
            Ok(Operand::Argument(index))
        }
        OperandKind::BranchShort => {
            let delta = parser.read_le::<i8>()?;
            let base = parser.pos() as u32;
            Ok(Operand::Branch(Target::Offset(
                base.wrapping_add_signed(i32::from(delta)),
            )))
        }
        OperandKind::Branch => {
            let delta = parser.read_le::<i32>()?;
            let base = parser.pos() as u32;
            Ok(Operand::Branch(Target::Offset(
                base.wrapping_add_signed(delta),
            )))
        }
        OperandKind::Switch => {
            let count = parser.read_le::<u32>()?;
            let mut deltas = Vec::new();
            for _ in 0..count {
                deltas.push(parser.read_le::<i32>()?);
            }
            // every case is relative to the end of the whole jump table
            let base = parser.pos() as u32;
            Ok(Operand::Switch(
                deltas
                    .into_iter()
                    .map(|delta| Target::Offset(base.wrapping_add_signed(delta)))
                    .collect(),
            ))
        }
        OperandKind::Field => {
            let raw = parser.read_le::<u32>()?;
            match resolver.resolve_token(raw)? {
                Some(CilSymbol::Symbol(symbol @ SymbolRef::Field(_))) => {
                    Ok(Operand::Symbol(symbol))
                }
                _ => Err(crate::Error::UnresolvedToken(Token::new(raw))),
            }
        }
        OperandKind::Method => {
            let raw = parser.read_le::<u32>()?;
            match resolver.resolve_token(raw)? {
                Some(CilSymbol::Symbol(symbol @ SymbolRef::Method(_))) => {
                    Ok(Operand::Symbol(symbol))
                }
                _ => Err(crate::Error::UnresolvedToken(Token::new(raw))),
            }
        }
        OperandKind::Type => {
            let raw = parser.read_le::<u32>()?;
            match resolver.resolve_token(raw)? {
                Some(CilSymbol::Symbol(symbol @ SymbolRef::Type(_))) => Ok(Operand::Symbol(symbol)),
                _ => Err(crate::Error::UnresolvedToken(Token::new(raw))),
            }
        }
        OperandKind::Token => {
            let raw = parser.read_le::<u32>()?;
            match resolver.resolve_token(raw)? {
                Some(CilSymbol::Symbol(symbol)) => Ok(Operand::Symbol(symbol)),
                _ => Err(crate::Error::UnresolvedToken(Token::new(raw))),
            }
        }
        OperandKind::Signature => {
            let raw = parser.read_le::<u32>()?;
            match resolver.resolve_token(raw)? {
                Some(CilSymbol::Signature(sig)) => Ok(Operand::Signature(sig)),
                _ => Err(crate::Error::UnresolvedToken(Token::new(raw))),
            }
        }
        OperandKind::String => {
            let raw = parser.read_le::<u32>()?;
            match resolver.resolve_token(raw)? {
                Some(CilSymbol::String(value)) => Ok(Operand::String(value)),
                // unresolved user strings degrade, they never fail a body
                _ => Ok(Operand::String(String::new())),
            }
        }
    }
}

fn check_index(index: u16, declared: usize, what: &str) -> Result<()> {
    if usize::from(index) >= declared {
        return Err(malformed_error!(
            "{} index {} out of range ({} declared)",
            what,
            index,
            declared
        ));
    }
    Ok(())
}

/// Pass 2: rewrite every raw branch offset into an instruction index.
fn resolve_targets(instructions: &mut [Instruction]) -> Result<()> {
    let offsets: Vec<u32> = instructions
        .iter()
        .map(|instruction| instruction.offset)
        .collect();
    let index = OffsetIndex::new(&offsets);

    for instruction in instructions.iter_mut() {
        match &mut instruction.operand {
            Operand::Branch(target) => *target = Target::Index(index.exact(raw_offset(target))?),
            Operand::Switch(targets) => {
                for target in targets {
                    *target = Target::Index(index.exact(raw_offset(target))?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn raw_offset(target: &Target) -> u32 {
    match target {
        Target::Offset(offset) => *offset,
        Target::Index(_) => unreachable!("target resolved twice"),
    }
}

/// Decodes complete dynamic bodies against a destination module.
///
/// One instance serves a whole run; each [`BodyDecoder::decode`] call
/// builds a per-candidate [`SymbolResolver`] over that body's token list.
pub struct BodyDecoder<'a> {
    module: &'a Module,
    bridge: &'a dyn RuntimeBridge,
}

impl<'a> BodyDecoder<'a> {
    /// Create a decoder importing into `module` through `bridge`.
    #[must_use]
    pub fn new(module: &'a Module, bridge: &'a dyn RuntimeBridge) -> Self {
        BodyDecoder { module, bridge }
    }

    /// Decode one dynamic body into a structured method body.
    ///
    /// Locals come first so index operands validate against the declared
    /// count, then the instruction stream, then the exception regions over
    /// the completed offset map. Declared max stack is clamped to the
    /// representable range; decoded bodies always zero-initialize locals.
    ///
    /// # Errors
    /// Returns an error on any malformed signature, stream or exception
    /// header, and on unresolvable structural tokens.
    pub fn decode(&self, body: &DynamicBody) -> Result<MethodBody> {
        let resolver = SymbolResolver::new(self.module, self.bridge, &body.tokens);

        let locals: Vec<Local> = match &body.locals_sig {
            Some(blob) if !blob.is_empty() => parse_local_sig(blob, &resolver)?
                .into_iter()
                .map(|ty| Local { ty })
                .collect(),
            _ => Vec::new(),
        };

        let instructions = decode_stream(
            &body.code,
            &resolver,
            locals.len(),
            usize::from(body.arg_count),
        )?;

        let offsets: Vec<u32> = instructions
            .iter()
            .map(|instruction| instruction.offset)
            .collect();
        let index = OffsetIndex::new(&offsets);
        let exception_handlers = match &body.exceptions {
            ExceptionData::None => Vec::new(),
            ExceptionData::Header(header) => exceptions::decode_header(header, &index, &resolver)?,
            ExceptionData::Regions(regions) => {
                exceptions::decode_regions(regions, &index, &resolver)?
            }
        };

        debug!(
            "decoded body: {} instructions, {} locals, {} exception regions",
            instructions.len(),
            locals.len(),
            exception_handlers.len()
        );

        Ok(MethodBody {
            instructions,
            locals,
            exception_handlers,
            max_stack: body.max_stack.min(u32::from(u16::MAX)) as u16,
            init_locals: true,
        })
    }
}
