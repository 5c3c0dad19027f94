use thiserror::Error;

use crate::metadata::token::Token;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, covering every failure this library can return.
///
/// The orchestrator distinguishes two severities built on top of these
/// variants: run-fatal conditions ([`Error::ResolverNotFound`],
/// [`Error::NoVirtualizedMethods`]) abort the whole run, while everything
/// surfaced inside a single candidate's pipeline only fails that candidate
/// and is aggregated into the run report.
///
/// # Error Categories
///
/// ## Wire format / decode errors
/// - [`Error::Malformed`] - Corrupted or invalid binary structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond buffer boundaries
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::NotSupported`] - Encoding or signature feature not supported
/// - [`Error::RecursionLimit`] - Nested structure exceeded the decode depth bound
///
/// ## Symbol resolution errors
/// - [`Error::UnresolvedToken`] - A structurally required token did not resolve
/// - [`Error::NestedDynamicBody`] - A dynamic body references another dynamic body
/// - [`Error::TokenNotFound`] - Destination symbol lookup failed
///
/// ## Runtime bridge errors
/// - [`Error::Runtime`] - The external runtime collaborator failed
/// - [`Error::InvalidArgument`] - Handle/context mismatch during handle binding
///
/// ## Run-level errors
/// - [`Error::ResolverNotFound`] - No VM resolver method and no override given
/// - [`Error::NoVirtualizedMethods`] - The scan produced zero candidates
#[derive(Error, Debug)]
pub enum Error {
    /// The data is damaged and could not be parsed.
    ///
    /// Indicates that a binary structure (instruction stream, exception
    /// region header, signature blob) does not conform to its wire format.
    /// The error includes the source location where the malformation was
    /// detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing data.
    ///
    /// This error occurs when trying to read data beyond the end of a
    /// buffer. It's a safety check to prevent overruns during decoding.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// The encoding or feature is not supported.
    ///
    /// Raised for signature element types and call-site shapes this
    /// library does not model.
    #[error("This encoding or feature is not supported")]
    NotSupported,

    /// A nested structure exceeded the decode depth bound.
    ///
    /// Signature element types nest (arrays of pointers to ...); decoding
    /// is depth-bounded so a hostile blob fails with an error instead of
    /// exhausting the stack.
    #[error("Recursion depth limit exceeded")]
    RecursionLimit,

    /// A structurally required token did not resolve to a usable symbol.
    ///
    /// Method, field and type operands must resolve; failure here aborts
    /// the decode of the current candidate body. The associated [`Token`]
    /// is the raw token value that failed to resolve.
    #[error("Failed to resolve structurally required token - {0}")]
    UnresolvedToken(Token),

    /// A dynamic body directly references another dynamic body.
    ///
    /// A vararg method wrapper in the opaque token list unwrapped to a
    /// second virtualized body. Restoring such chains is unsupported and
    /// fails the current candidate.
    #[error("Dynamic body references another dynamic body")]
    NestedDynamicBody,

    /// Failed to find a symbol in the destination module.
    ///
    /// The associated [`Token`] identifies which symbol was not found.
    #[error("Failed to find symbol in module - {0}")]
    TokenNotFound(Token),

    /// The external runtime collaborator reported a failure.
    ///
    /// Wraps errors from the [`crate::runtime::RuntimeBridge`] and
    /// [`crate::runtime::DynamicBodySource`] implementations: resolver
    /// invocation faults, missing reflection fields, handle lookups.
    #[error("{0}")]
    Runtime(String),

    /// A runtime handle could not be bound against the given type context.
    ///
    /// The orchestrator retries exactly once against the declaring type
    /// itself when the base-type context produces this error.
    #[error("Invalid handle/context combination - {0}")]
    InvalidArgument(String),

    /// No VM resolver method was found and no manual override was given.
    ///
    /// This aborts the whole run; the caller may re-run with an explicit
    /// resolver token supplied through the engine options.
    #[error("Could not locate the VM resolver method")]
    ResolverNotFound,

    /// The candidate scan over all module methods produced no matches.
    #[error("Could not find any virtualized method")]
    NoVirtualizedMethods,

    /// Failed to lock target.
    #[error("Failed to lock target")]
    LockError,
}
