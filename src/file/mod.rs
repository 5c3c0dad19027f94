//! Low-level binary reading primitives.
//!
//! Everything this crate decodes (instruction streams, exception region
//! headers, signature blobs) arrives as plain byte buffers handed over by the
//! external extraction collaborator, so this module only carries the
//! cursor-based [`Parser`] and the typed-read plumbing it is built on.

pub(crate) mod io;
pub mod parser;

pub use parser::Parser;
