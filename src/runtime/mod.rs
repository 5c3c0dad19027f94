//! Contracts for the external runtime collaborators.
//!
//! Devirtualization depends on the target program's own runtime: the VM
//! resolver method must actually run to decrypt a hidden body, and the
//! resulting opaque objects are inspected through reflection-style field
//! access. This crate never performs that introspection itself; it consumes
//! two traits:
//!
//! - [`RuntimeBridge`] - live handle resolution, VM resolver invocation and
//!   object field inspection
//! - [`DynamicBodySource`] - extraction of the raw materials of a dynamic
//!   method body ([`DynamicBody`])
//!
//! Handles are opaque newtypes over a provider-assigned id. Ids must be
//! globally unique across handle kinds and stable for the lifetime of a
//! run; the importer uses them as identity for idempotent symbol imports.

use crate::{metadata::token::Token, Result};

/// Opaque handle to a live runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeHandle(pub u64);

/// Opaque handle to a live runtime field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldHandle(pub u64);

/// Opaque handle to a live runtime method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodHandle(pub u64);

/// Opaque handle to a live runtime object instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub u64);

/// Opaque handle to a dynamic method body awaiting extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DynamicBodyHandle(pub u64);

/// One entry of a dynamic body's opaque token list.
///
/// The wrapper variants mirror the shapes the virtualization runtime stores
/// in its token scope: plain handles, generic-context wrappers carrying the
/// instantiating type, vararg wrappers that may conceal either a real
/// method or another dynamic body, raw signature blobs and user strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEntry {
    /// A runtime type handle
    Type(TypeHandle),
    /// A runtime field handle
    Field(FieldHandle),
    /// A runtime method handle
    Method(MethodHandle),
    /// A field handle bound to a generic instantiation context
    GenericField {
        /// The wrapped field handle
        field: FieldHandle,
        /// The instantiating type
        context: TypeHandle,
    },
    /// A method handle bound to a generic instantiation context
    GenericMethod {
        /// The wrapped method handle
        method: MethodHandle,
        /// The instantiating type
        context: TypeHandle,
    },
    /// A vararg call-site wrapper
    VarArgMethod {
        /// The wrapped real method, if any
        method: Option<MethodHandle>,
        /// A wrapped dynamic body, present when the callee is itself
        /// virtualized
        dynamic: Option<DynamicBodyHandle>,
    },
    /// A raw standalone signature blob
    Signature(Vec<u8>),
    /// A user string
    String(String),
}

/// Namespace and simple name of a runtime type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDesc {
    /// Namespace, empty for the global namespace
    pub namespace: String,
    /// Simple type name
    pub name: String,
}

/// Declaring type and name of a runtime field or method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDesc {
    /// Handle of the declaring type
    pub declaring_type: TypeHandle,
    /// Member name
    pub name: String,
}

/// Declared type classification of an object's field, as far as the
/// orchestrator's extraction steps need to distinguish it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Declared as the root object type
    Object,
    /// Declared as a delegate type
    Delegate,
    /// Declared as the dynamic-method runtime type
    DynamicMethod,
    /// Anything else
    Other,
}

/// One declared field of an inspected runtime object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectField {
    /// Field name
    pub name: String,
    /// Declared type classification
    pub kind: FieldKind,
}

/// A value read out of a runtime object's field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeValue {
    /// A null reference
    Null,
    /// An object instance
    Object(ObjectHandle),
    /// A dynamic method body
    DynamicBody(DynamicBodyHandle),
}

/// Exception region data attached to a [`DynamicBody`].
///
/// The two raw header shapes arrive as an opaque byte blob and are decoded
/// by [`crate::disassembler::exceptions`]; the descriptor form carries the
/// regions the emitting runtime had already materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExceptionData {
    /// No exception regions
    None,
    /// A raw binary header (compact or fat shape)
    Header(Vec<u8>),
    /// Precomputed region descriptors
    Regions(Vec<PendingRegions>),
}

/// One pending clause of a [`PendingRegions`] descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingClause {
    /// Raw handler kind (catch/filter/finally/fault encoding)
    pub kind: u32,
    /// Byte offset of the first handler instruction
    pub handler_start: u32,
    /// Byte offset one past the last handler instruction
    pub handler_end: u32,
    /// Caught exception type, for catch clauses
    pub catch_type: Option<TypeHandle>,
}

/// A precomputed exception region descriptor.
///
/// Carries one shared try range plus the clauses that were pending when
/// the body was captured; finally clauses use `end_finally` as their try
/// end instead of the shared one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRegions {
    /// Byte offset of the first protected instruction
    pub try_start: u32,
    /// Byte offset one past the protected range
    pub try_end: u32,
    /// Byte offset ending the protected range of finally clauses
    pub end_finally: Option<u32>,
    /// The pending clauses, in declaration order
    pub clauses: Vec<PendingClause>,
}

/// The raw materials of one dynamic method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicBody {
    /// The encoded instruction stream
    pub code: Vec<u8>,
    /// Declared maximum operand stack depth (clamped to `u16` on decode)
    pub max_stack: u32,
    /// Number of declared arguments, used to validate argument operands
    pub arg_count: u16,
    /// Local variable signature blob, absent or empty meaning no locals
    pub locals_sig: Option<Vec<u8>>,
    /// Exception region data
    pub exceptions: ExceptionData,
    /// The opaque token list, indexed by the low 24 bits of stream tokens
    pub tokens: Vec<RuntimeEntry>,
}

/// Live access to the target program's runtime.
///
/// Implementations wrap whatever introspection mechanism the hosting
/// environment offers. Failures are reported as [`crate::Error::Runtime`],
/// except for [`RuntimeBridge::bind_method`] which must report a rejected
/// handle/context combination as [`crate::Error::InvalidArgument`] so the
/// orchestrator can apply its declared-type fallback.
pub trait RuntimeBridge {
    /// Describe a runtime type.
    ///
    /// # Errors
    /// Returns an error if the handle is unknown to the runtime.
    fn type_desc(&self, handle: TypeHandle) -> Result<TypeDesc>;

    /// Describe a runtime field, optionally within a generic context.
    ///
    /// # Errors
    /// Returns an error if the handle is unknown or the context does not
    /// apply to it.
    fn field_desc(&self, handle: FieldHandle, context: Option<TypeHandle>) -> Result<MemberDesc>;

    /// Describe a runtime method, optionally within a generic context.
    ///
    /// # Errors
    /// Returns an error if the handle is unknown or the context does not
    /// apply to it.
    fn method_desc(&self, handle: MethodHandle, context: Option<TypeHandle>) -> Result<MemberDesc>;

    /// Resolve a destination method token to its live runtime handle.
    ///
    /// # Errors
    /// Returns an error if the token does not denote a runtime method.
    fn resolve_method(&self, token: Token) -> Result<MethodHandle>;

    /// The declaring type of a runtime method.
    ///
    /// # Errors
    /// Returns an error if the handle is unknown to the runtime.
    fn declaring_type(&self, method: MethodHandle) -> Result<TypeHandle>;

    /// The base type of a runtime type, `None` at the root.
    ///
    /// # Errors
    /// Returns an error if the handle is unknown to the runtime.
    fn base_type(&self, ty: TypeHandle) -> Result<Option<TypeHandle>>;

    /// Re-bind a method handle against an explicit declaring-type context.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the runtime rejects the
    /// handle/context combination; any other failure as
    /// [`crate::Error::Runtime`].
    fn bind_method(&self, method: MethodHandle, context: TypeHandle) -> Result<MethodHandle>;

    /// Invoke the VM resolver method with a dispatch key.
    ///
    /// The implementation owns resolver instantiation; repeated calls reuse
    /// whatever state the target runtime keeps between invocations.
    ///
    /// # Errors
    /// Returns an error if instantiation or invocation faults, or if the
    /// resolver returns null.
    fn invoke_resolver(
        &self,
        resolver: Token,
        key: i32,
        method: Option<MethodHandle>,
    ) -> Result<ObjectHandle>;

    /// List the declared fields of a runtime object, in declaration order.
    ///
    /// # Errors
    /// Returns an error if the handle is unknown to the runtime.
    fn fields(&self, object: ObjectHandle) -> Result<Vec<ObjectField>>;

    /// Read a field of a runtime object by name.
    ///
    /// # Errors
    /// Returns an error if no such field exists on the object's type.
    fn read_field(&self, object: ObjectHandle, name: &str) -> Result<RuntimeValue>;
}

/// Extraction of dynamic method body materials.
pub trait DynamicBodySource {
    /// Extract the raw materials behind a dynamic body handle.
    ///
    /// # Errors
    /// Returns an error if the handle is unknown or the body's conventional
    /// fields cannot be located.
    fn body(&self, handle: DynamicBodyHandle) -> Result<DynamicBody>;
}
