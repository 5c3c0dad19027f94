//! Recovery of virtualized .NET method bodies.
//!
//! Code protected by Babel-style virtualization replaces selected method
//! bodies with a call into an embedded VM; the real bodies only ever exist
//! as dynamic methods materialized at runtime. This crate drives the VM
//! against itself: it detects the dispatch call sites left in the visible
//! code, invokes the VM's own resolver to materialize each hidden body,
//! decodes the resulting instruction stream and exception regions back
//! into ordinary CIL, and splices the recovered bodies into the
//! destination module.
//!
//! The crate does not host a runtime. Live introspection arrives through
//! the [`runtime::RuntimeBridge`] and [`runtime::DynamicBodySource`]
//! traits; everything else (token resolution, stream decoding, exception
//! region reconstruction, re-encoding) is pure.
//!
//! # Quick start
//!
//! ```no_run
//! use unvirt::{devirt::DevirtEngine, metadata::module::Module};
//! # fn demo(bridge: &dyn unvirt::runtime::RuntimeBridge,
//! #         source: &dyn unvirt::runtime::DynamicBodySource)
//! #     -> unvirt::Result<()> {
//! let module = Module::new("target.exe");
//! // ... populate type and method definitions from the target program ...
//!
//! let report = DevirtEngine::new(&module, bridge, source).run()?;
//! println!(
//!     "{} bodies restored, {} failures",
//!     report.devirtualized.len(),
//!     report.failed.len()
//! );
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

#[macro_use]
mod error;

pub mod devirt;
pub mod disassembler;
pub mod file;
pub mod metadata;
pub mod runtime;

pub use devirt::DevirtEngine;
pub use error::Error;
pub use file::Parser;
pub use metadata::module::Module;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;
