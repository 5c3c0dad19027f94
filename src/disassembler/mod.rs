//! CIL instruction decoding for virtualization-supplied method bodies.
//!
//! This module turns the raw materials handed over by the dynamic-body
//! extraction collaborator (code bytes, locals signature, exception header,
//! opaque token list) into a structured [`crate::metadata::method::MethodBody`]:
//!
//! - [`BodyDecoder`] - cursor-driven instruction stream decode with deferred
//!   branch-target resolution and token dispatch through a [`TokenResolver`]
//! - [`exceptions`] - the two legacy binary exception-region shapes plus the
//!   pending-region descriptor path
//! - [`encode_stream`] - byte-exact re-encoding of fixed-width instruction
//!   streams
//!
//! # Example
//! ```rust
//! use unvirt::disassembler::opcodes;
//!
//! let op = opcodes::lookup(0x2A).unwrap(); // ret
//! assert_eq!(op.mnemonic, "ret");
//! ```

mod decoder;
mod encoder;
pub mod exceptions;
mod instruction;
pub mod opcodes;

pub use decoder::{decode_stream, BodyDecoder, TokenResolver};
pub use encoder::encode_stream;
pub use instruction::{Immediate, Instruction, OpCode, Operand, OperandKind, Target};
