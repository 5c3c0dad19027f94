//! Devirtualization pipeline.
//!
//! Three stages, each usable on its own:
//!
//! - [`callsite`] - detect virtualization dispatch call sites and extract
//!   their dispatch keys
//! - [`resolver`] - resolve opaque stream tokens into destination-module
//!   symbols
//! - [`engine`] - the orchestrator tying detection, resolver invocation,
//!   body decoding and splicing together

pub mod callsite;
pub mod engine;
pub mod resolver;

pub use callsite::{CallSiteShape, Candidate, DispatchShapeV1};
pub use engine::{CandidateFailure, DevirtEngine, RunReport};
pub use resolver::{CilSymbol, SymbolResolver};
