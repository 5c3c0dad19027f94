//! Structured method bodies and exception handler regions.
//!
//! A [`MethodBody`] is the fully decoded form of a method: an ordered
//! instruction sequence, local declarations, and exception handler regions
//! expressed over instruction indices. Bodies are built once by the decoder
//! and replace a target method's body wholesale; no partial merging happens
//! anywhere in this crate.

use bitflags::bitflags;

use crate::{
    disassembler::Instruction,
    metadata::{signatures::TypeSig, token::Token},
};

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause; `catch_type` names the caught type.
        const EXCEPTION = 0x0000;
        /// An exception filter clause; `filter_start` points at the filter code.
        const FILTER = 0x0001;
        /// A finally clause, executed on both normal and exceptional exit.
        const FINALLY = 0x0002;
        /// A fault clause, executed only when an exception is thrown.
        const FAULT = 0x0004;
    }
}

/// Exception handler defining a try/handler region pair within a method.
///
/// All boundaries are indices into the owning body's instruction list.
/// Region *starts* always land exactly on an instruction; region *ends* are
/// exclusive and may equal `instructions.len()`, the end-of-body sentinel.
///
/// Exactly one of `catch_type` / `filter_start` / neither is populated,
/// driven by `flags`: a catch clause carries `catch_type`, a filter clause
/// carries `filter_start`, finally and fault clauses carry neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Flags describing the type of exception handler (catch, filter, finally, fault).
    pub flags: ExceptionHandlerFlags,
    /// Index of the first instruction of the try block.
    pub try_start: usize,
    /// Exclusive end index of the try block.
    pub try_end: usize,
    /// Index of the first instruction of the handler block.
    pub handler_start: usize,
    /// Exclusive end index of the handler block.
    pub handler_end: usize,
    /// Destination token of the caught exception type (catch clauses only).
    pub catch_type: Option<Token>,
    /// Index of the first filter instruction (filter clauses only).
    pub filter_start: Option<usize>,
}

impl ExceptionHandler {
    /// Whether this is a typed catch clause.
    #[must_use]
    pub fn is_catch(&self) -> bool {
        self.flags == ExceptionHandlerFlags::EXCEPTION
    }

    /// Whether this is a filter clause.
    #[must_use]
    pub fn is_filter(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FILTER)
    }

    /// Whether this is a finally clause.
    #[must_use]
    pub fn is_finally(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FINALLY)
    }
}

/// A declared local variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Local {
    /// Semantic type of the local.
    pub ty: TypeSig,
}

/// The fully decoded body of one method.
///
/// Immutable once built; ownership transfers to the target method on splice.
#[derive(Debug, Default)]
pub struct MethodBody {
    /// Decoded instructions in stream order.
    pub instructions: Vec<Instruction>,
    /// Declared local variables, in signature order.
    pub locals: Vec<Local>,
    /// Exception handler regions over `instructions`.
    pub exception_handlers: Vec<ExceptionHandler>,
    /// Declared maximum operand stack depth.
    pub max_stack: u16,
    /// Whether locals are zero-initialized on entry.
    pub init_locals: bool,
}

impl MethodBody {
    /// Byte length of the encoded instruction stream.
    #[must_use]
    pub fn code_size(&self) -> usize {
        self.instructions
            .iter()
            .map(|instruction| instruction.size())
            .sum()
    }
}
