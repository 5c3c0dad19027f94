//! Destination-side metadata model.
//!
//! This module carries everything the devirtualizer needs to know about the
//! program being rewritten: metadata tokens, a minimal type-signature model,
//! structured method bodies, and the [`module::Module`] symbol space that
//! imported references are appended to.

pub mod method;
pub mod module;
pub mod signatures;
pub mod token;
