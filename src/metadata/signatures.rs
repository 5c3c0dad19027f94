//! Minimal type-signature model and blob decoding per ECMA-335 II.23.2.
//!
//! Dynamic bodies carry two signature blobs this crate must understand: the
//! local variable signature (`LOCAL_SIG`) and standalone method signatures
//! referenced by `calli` sites. Both use the compressed encodings of
//! ECMA-335; embedded `TypeDefOrRef` coded tokens do not reference the
//! destination module but the per-body opaque token list, so decoding is
//! parameterized over a [`SignatureTypeResolver`].

use std::fmt;

use crate::{file::parser::Parser, metadata::token::Token, Result};

/// `ELEMENT_TYPE_*` constants from ECMA-335 II.23.1.16 (the subset decoded here).
mod element {
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0A;
    pub const U8: u8 = 0x0B;
    pub const R4: u8 = 0x0C;
    pub const R8: u8 = 0x0D;
    pub const STRING: u8 = 0x0E;
    pub const PTR: u8 = 0x0F;
    pub const BYREF: u8 = 0x10;
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
    pub const VAR: u8 = 0x13;
    pub const TYPEDBYREF: u8 = 0x16;
    pub const I: u8 = 0x18;
    pub const U: u8 = 0x19;
    pub const OBJECT: u8 = 0x1C;
    pub const SZARRAY: u8 = 0x1D;
    pub const MVAR: u8 = 0x1E;
    pub const CMOD_REQD: u8 = 0x1F;
    pub const CMOD_OPT: u8 = 0x20;
    pub const SENTINEL: u8 = 0x41;
    pub const PINNED: u8 = 0x45;
}

/// Calling convention bits from ECMA-335 II.23.2.3.
mod calling_convention {
    pub const MASK: u8 = 0x0F;
    pub const LOCAL_SIG: u8 = 0x07;
    pub const HAS_THIS: u8 = 0x20;
}

/// Nesting bound for recursive element types. Legitimate signatures stay in
/// single digits; anything deeper is a hostile or corrupted blob.
const MAX_TYPE_DEPTH: usize = 64;

/// A decoded element type.
///
/// This is the semantic type attached to locals, parameters and return
/// values. It deliberately models only what virtualized Babel bodies emit;
/// generic instantiations, multi-dimensional arrays and function pointers
/// fail decode with [`crate::Error::NotSupported`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSig {
    /// `System.Void`
    Void,
    /// `System.Boolean`
    Boolean,
    /// `System.Char`
    Char,
    /// `System.SByte`
    I1,
    /// `System.Byte`
    U1,
    /// `System.Int16`
    I2,
    /// `System.UInt16`
    U2,
    /// `System.Int32`
    I4,
    /// `System.UInt32`
    U4,
    /// `System.Int64`
    I8,
    /// `System.UInt64`
    U8,
    /// `System.Single`
    R4,
    /// `System.Double`
    R8,
    /// `System.IntPtr`
    I,
    /// `System.UIntPtr`
    U,
    /// `System.String`
    String,
    /// `System.Object`
    Object,
    /// `System.TypedReference`
    TypedRef,
    /// Single-dimensional, zero-based array of the inner type
    SzArray(Box<TypeSig>),
    /// Managed reference to the inner type
    ByRef(Box<TypeSig>),
    /// Unmanaged pointer to the inner type
    Ptr(Box<TypeSig>),
    /// Reference type resolved into the destination module
    Class(Token),
    /// Value type resolved into the destination module
    ValueType(Token),
    /// Generic type parameter (`!n`)
    Var(u32),
    /// Generic method parameter (`!!n`)
    MVar(u32),
    /// Pinned local
    Pinned(Box<TypeSig>),
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Void => write!(f, "System.Void"),
            TypeSig::Boolean => write!(f, "System.Boolean"),
            TypeSig::Char => write!(f, "System.Char"),
            TypeSig::I1 => write!(f, "System.SByte"),
            TypeSig::U1 => write!(f, "System.Byte"),
            TypeSig::I2 => write!(f, "System.Int16"),
            TypeSig::U2 => write!(f, "System.UInt16"),
            TypeSig::I4 => write!(f, "System.Int32"),
            TypeSig::U4 => write!(f, "System.UInt32"),
            TypeSig::I8 => write!(f, "System.Int64"),
            TypeSig::U8 => write!(f, "System.UInt64"),
            TypeSig::R4 => write!(f, "System.Single"),
            TypeSig::R8 => write!(f, "System.Double"),
            TypeSig::I => write!(f, "System.IntPtr"),
            TypeSig::U => write!(f, "System.UIntPtr"),
            TypeSig::String => write!(f, "System.String"),
            TypeSig::Object => write!(f, "System.Object"),
            TypeSig::TypedRef => write!(f, "System.TypedReference"),
            TypeSig::SzArray(inner) => write!(f, "{inner}[]"),
            TypeSig::ByRef(inner) => write!(f, "{inner}&"),
            TypeSig::Ptr(inner) => write!(f, "{inner}*"),
            TypeSig::Class(token) | TypeSig::ValueType(token) => write!(f, "{token}"),
            TypeSig::Var(n) => write!(f, "!{n}"),
            TypeSig::MVar(n) => write!(f, "!!{n}"),
            TypeSig::Pinned(inner) => write!(f, "{inner} pinned"),
        }
    }
}

/// A decoded standalone method signature (`calli` operand).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSig {
    /// Raw calling convention byte
    pub calling_convention: u8,
    /// Whether the signature carries an implicit `this`
    pub has_this: bool,
    /// Return type
    pub return_type: TypeSig,
    /// Declared parameter types, in order
    pub params: Vec<TypeSig>,
}

/// Resolves `TypeDefOrRef` coded tokens embedded in signature blobs.
///
/// Inside a dynamic body's signatures the row index of the coded token
/// indexes the opaque token list, not the destination tables; the symbol
/// resolver implements this trait to import the referenced type and hand
/// back its destination token.
pub trait SignatureTypeResolver {
    /// Resolve a decoded (uncompressed) `TypeDefOrRef` coded token.
    ///
    /// Returns `Ok(None)` if the referenced entry does not denote a type.
    ///
    /// # Errors
    /// Returns an error if the import into the destination module fails.
    fn resolve_type_def_or_ref(&self, coded_token: u32) -> Result<Option<Token>>;
}

/// Decode a local variable signature blob into its element types.
///
/// An absent or empty blob means "no locals" and is the caller's case to
/// handle; this function requires the `LOCAL_SIG` calling convention byte.
///
/// # Errors
/// Returns an error if the blob is truncated, does not start with
/// `LOCAL_SIG`, or contains an unsupported element type.
pub fn parse_local_sig(data: &[u8], resolver: &dyn SignatureTypeResolver) -> Result<Vec<TypeSig>> {
    let mut parser = Parser::new(data);

    let convention = parser.read_le::<u8>()?;
    if convention & calling_convention::MASK != calling_convention::LOCAL_SIG {
        return Err(malformed_error!(
            "Expected LOCAL_SIG calling convention, got 0x{:02X}",
            convention
        ));
    }

    let count = parser.read_compressed_uint()?;
    let mut locals = Vec::with_capacity(count as usize);
    for _ in 0..count {
        locals.push(parse_type(&mut parser, resolver)?);
    }

    Ok(locals)
}

/// Decode a standalone method signature blob.
///
/// # Errors
/// Returns an error if the blob is truncated or contains an unsupported
/// element type.
pub fn parse_method_sig(data: &[u8], resolver: &dyn SignatureTypeResolver) -> Result<MethodSig> {
    if data.is_empty() {
        return Err(crate::Error::Empty);
    }

    let mut parser = Parser::new(data);

    let convention = parser.read_le::<u8>()?;
    let param_count = parser.read_compressed_uint()?;
    let return_type = parse_type(&mut parser, resolver)?;

    let mut params = Vec::with_capacity(param_count as usize);
    for _ in 0..param_count {
        // Vararg signatures separate fixed from variable parameters with a
        // sentinel byte that is not itself a parameter.
        if parser.has_more_data() && parser.peek_byte()? == element::SENTINEL {
            parser.read_le::<u8>()?;
        }
        params.push(parse_type(&mut parser, resolver)?);
    }

    Ok(MethodSig {
        calling_convention: convention,
        has_this: convention & calling_convention::HAS_THIS != 0,
        return_type,
        params,
    })
}

/// Decode a single element type at the parser's position.
///
/// # Errors
/// Returns an error on truncation, unresolvable type tokens, element types
/// outside the supported subset, or nesting deeper than the decode bound.
pub fn parse_type(parser: &mut Parser, resolver: &dyn SignatureTypeResolver) -> Result<TypeSig> {
    parse_type_at_depth(parser, resolver, 0)
}

fn parse_type_at_depth(
    parser: &mut Parser,
    resolver: &dyn SignatureTypeResolver,
    depth: usize,
) -> Result<TypeSig> {
    if depth >= MAX_TYPE_DEPTH {
        return Err(crate::Error::RecursionLimit);
    }

    let elem = parser.read_le::<u8>()?;
    match elem {
        element::VOID => Ok(TypeSig::Void),
        element::BOOLEAN => Ok(TypeSig::Boolean),
        element::CHAR => Ok(TypeSig::Char),
        element::I1 => Ok(TypeSig::I1),
        element::U1 => Ok(TypeSig::U1),
        element::I2 => Ok(TypeSig::I2),
        element::U2 => Ok(TypeSig::U2),
        element::I4 => Ok(TypeSig::I4),
        element::U4 => Ok(TypeSig::U4),
        element::I8 => Ok(TypeSig::I8),
        element::U8 => Ok(TypeSig::U8),
        element::R4 => Ok(TypeSig::R4),
        element::R8 => Ok(TypeSig::R8),
        element::I => Ok(TypeSig::I),
        element::U => Ok(TypeSig::U),
        element::STRING => Ok(TypeSig::String),
        element::OBJECT => Ok(TypeSig::Object),
        element::TYPEDBYREF => Ok(TypeSig::TypedRef),
        element::SZARRAY => Ok(TypeSig::SzArray(Box::new(parse_type_at_depth(
            parser,
            resolver,
            depth + 1,
        )?))),
        element::BYREF => Ok(TypeSig::ByRef(Box::new(parse_type_at_depth(
            parser,
            resolver,
            depth + 1,
        )?))),
        element::PTR => Ok(TypeSig::Ptr(Box::new(parse_type_at_depth(
            parser,
            resolver,
            depth + 1,
        )?))),
        element::PINNED => Ok(TypeSig::Pinned(Box::new(parse_type_at_depth(
            parser,
            resolver,
            depth + 1,
        )?))),
        element::VAR => Ok(TypeSig::Var(parser.read_compressed_uint()?)),
        element::MVAR => Ok(TypeSig::MVar(parser.read_compressed_uint()?)),
        element::CLASS | element::VALUETYPE => {
            let coded = parser.read_compressed_uint()?;
            let Some(token) = resolver.resolve_type_def_or_ref(coded)? else {
                return Err(malformed_error!(
                    "Unresolvable type token in signature - coded 0x{:X}",
                    coded
                ));
            };
            if elem == element::CLASS {
                Ok(TypeSig::Class(token))
            } else {
                Ok(TypeSig::ValueType(token))
            }
        }
        element::CMOD_REQD | element::CMOD_OPT => {
            // Custom modifier: skip the modifier type and decode the
            // modified type itself.
            let _ = parser.read_compressed_uint()?;
            parse_type_at_depth(parser, resolver, depth + 1)
        }
        _ => Err(crate::Error::NotSupported),
    }
}
