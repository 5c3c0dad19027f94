//! Destination symbol space for recovered method bodies.
//!
//! A [`Module`] models the target program: its type and method definitions
//! plus the reference tables that grow as the symbol resolver imports
//! runtime handles. Definition tables are built up-front by the caller (the
//! program loader is an external collaborator); after that the only core
//! mutations are appends to the imported-reference tables and wholesale
//! body replacement on a [`MethodDef`].
//!
//! Reference tables are `boxcar::Vec` so imports can append through `&self`;
//! import identity is kept by a `dashmap` cache keyed on the runtime handle
//! id, making every import idempotent.

use std::sync::RwLock;

use bitflags::bitflags;
use dashmap::DashMap;

use crate::{
    metadata::{
        method::MethodBody,
        signatures::MethodSig,
        token::{table, Token},
    },
    Result,
};

bitflags! {
    /// Method definition attributes from ECMA-335 II.23.1.10 (the subset
    /// the scanners dispatch on).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodAttributes: u16 {
        /// Mask for the member access bits.
        const MEMBER_ACCESS_MASK = 0x0007;
        /// Accessible only within the declaring type.
        const PRIVATE = 0x0001;
        /// Accessible to everyone.
        const PUBLIC = 0x0006;
        /// Defined on the type, not per instance.
        const STATIC = 0x0010;
    }
}

/// A resolved destination symbol carried by a token operand.
///
/// The variant records which table family the destination token belongs to,
/// which is what re-encoding and later rewriting need to know; the token
/// itself is always a destination-module token, never a raw value from the
/// virtualized stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolRef {
    /// A type definition or imported type reference
    Type(Token),
    /// A field reference
    Field(Token),
    /// A method definition or imported method reference
    Method(Token),
}

impl SymbolRef {
    /// The destination token, regardless of symbol kind.
    #[must_use]
    pub fn token(&self) -> Token {
        match self {
            SymbolRef::Type(token) | SymbolRef::Field(token) | SymbolRef::Method(token) => *token,
        }
    }
}

/// A type definition in the destination module.
#[derive(Debug)]
pub struct TypeDef {
    /// This type's token (`TypeDef` table).
    pub token: Token,
    /// Namespace, empty for the global namespace.
    pub namespace: String,
    /// Simple type name.
    pub name: String,
    /// Token of the base type, `None` for interfaces and `<Module>`.
    pub base: Option<Token>,
}

impl TypeDef {
    /// The namespace-qualified name (`Namespace.Name`).
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

/// A method definition in the destination module.
///
/// The body lives behind an `RwLock` so the orchestrator can splice a
/// recovered body through a shared module reference.
#[derive(Debug)]
pub struct MethodDef {
    /// This method's token (`MethodDef` table).
    pub token: Token,
    /// Simple method name.
    pub name: String,
    /// Token of the declaring type.
    pub declaring_type: Token,
    /// Access and contract attributes.
    pub attributes: MethodAttributes,
    /// Declared signature.
    pub signature: MethodSig,
    /// Current body, `None` for abstract/extern methods.
    pub body: RwLock<Option<MethodBody>>,
}

impl MethodDef {
    /// Whether the method is static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.attributes.contains(MethodAttributes::STATIC)
    }

    /// Whether the member access is `private`.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.attributes & MethodAttributes::MEMBER_ACCESS_MASK == MethodAttributes::PRIVATE
    }

    /// Whether the member access is `public`.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.attributes & MethodAttributes::MEMBER_ACCESS_MASK == MethodAttributes::PUBLIC
    }

    /// Replace this method's body wholesale.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the body lock is poisoned.
    pub fn set_body(&self, body: MethodBody) -> Result<()> {
        let mut slot = self.body.write().map_err(|_| crate::Error::LockError)?;
        *slot = Some(body);
        Ok(())
    }
}

/// An imported type reference row.
#[derive(Debug)]
struct TypeRefRow {
    namespace: String,
    name: String,
}

/// An imported member reference row.
#[derive(Debug)]
struct MemberRefRow {
    parent: Token,
    name: String,
}

/// The destination module: definitions plus growing import tables.
#[derive(Debug, Default)]
pub struct Module {
    /// Module name (diagnostics only).
    pub name: String,
    types: boxcar::Vec<TypeDef>,
    methods: boxcar::Vec<MethodDef>,
    type_refs: boxcar::Vec<TypeRefRow>,
    member_refs: boxcar::Vec<MemberRefRow>,
    import_cache: DashMap<u64, Token>,
}

impl Module {
    /// Create an empty module.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Module {
            name: name.to_string(),
            ..Module::default()
        }
    }

    /// Add a type definition, minting its token.
    pub fn add_type(&self, namespace: &str, name: &str, base: Option<Token>) -> Token {
        let row = self.types.count() as u32 + 1;
        let token = Token::from_parts(table::TYPE_DEF, row);
        self.types.push(TypeDef {
            token,
            namespace: namespace.to_string(),
            name: name.to_string(),
            base,
        });
        token
    }

    /// Add a method definition, minting its token.
    pub fn add_method(
        &self,
        declaring_type: Token,
        name: &str,
        attributes: MethodAttributes,
        signature: MethodSig,
    ) -> Token {
        let row = self.methods.count() as u32 + 1;
        let token = Token::from_parts(table::METHOD_DEF, row);
        self.methods.push(MethodDef {
            token,
            name: name.to_string(),
            declaring_type,
            attributes,
            signature,
            body: RwLock::new(None),
        });
        token
    }

    /// Look up a type definition by token.
    #[must_use]
    pub fn type_def(&self, token: Token) -> Option<&TypeDef> {
        if token.table() != table::TYPE_DEF || token.row() == 0 {
            return None;
        }
        self.types.get(token.row() as usize - 1)
    }

    /// Look up a method definition by token.
    #[must_use]
    pub fn method(&self, token: Token) -> Option<&MethodDef> {
        if token.table() != table::METHOD_DEF || token.row() == 0 {
            return None;
        }
        self.methods.get(token.row() as usize - 1)
    }

    /// Iterate all method definitions in table order.
    pub fn methods(&self) -> impl Iterator<Item = &MethodDef> {
        self.methods.iter().map(|(_, method)| method)
    }

    /// The namespace-qualified name of a type definition or imported type
    /// reference.
    #[must_use]
    pub fn type_full_name(&self, token: Token) -> Option<String> {
        match token.table() {
            table::TYPE_DEF => self.type_def(token).map(TypeDef::full_name),
            table::TYPE_REF => {
                if token.row() == 0 {
                    return None;
                }
                let row = self.type_refs.get(token.row() as usize - 1)?;
                Some(if row.namespace.is_empty() {
                    row.name.clone()
                } else {
                    format!("{}.{}", row.namespace, row.name)
                })
            }
            _ => None,
        }
    }

    /// The `Parent::Name` form of an imported member reference.
    #[must_use]
    pub fn member_full_name(&self, token: Token) -> Option<String> {
        if token.table() != table::MEMBER_REF || token.row() == 0 {
            return None;
        }
        let row = self.member_refs.get(token.row() as usize - 1)?;
        let parent = self.type_full_name(row.parent)?;
        Some(format!("{}::{}", parent, row.name))
    }

    /// Import a type reference for the given runtime handle.
    ///
    /// Idempotent: the same handle id always yields the same token.
    pub fn import_type_ref(&self, handle_id: u64, namespace: &str, name: &str) -> Token {
        if let Some(existing) = self.import_cache.get(&handle_id) {
            return *existing;
        }
        let index = self.type_refs.push(TypeRefRow {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        let token = Token::from_parts(table::TYPE_REF, index as u32 + 1);
        self.import_cache.insert(handle_id, token);
        token
    }

    /// Import a member reference for the given runtime handle.
    ///
    /// Idempotent: the same handle id always yields the same token.
    pub fn import_member_ref(&self, handle_id: u64, parent: Token, name: &str) -> Token {
        if let Some(existing) = self.import_cache.get(&handle_id) {
            return *existing;
        }
        let index = self.member_refs.push(MemberRefRow {
            parent,
            name: name.to_string(),
        });
        let token = Token::from_parts(table::MEMBER_REF, index as u32 + 1);
        self.import_cache.insert(handle_id, token);
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::signatures::TypeSig;

    fn void_sig() -> MethodSig {
        MethodSig {
            calling_convention: 0,
            has_this: false,
            return_type: TypeSig::Void,
            params: Vec::new(),
        }
    }

    #[test]
    fn minting_and_lookup() {
        let module = Module::new("target.exe");
        let object = module.import_type_ref(1, "System", "Object");
        let ty = module.add_type("App", "Worker", Some(object));
        let method = module.add_method(ty, "Run", MethodAttributes::PUBLIC, void_sig());

        assert_eq!(ty.table(), table::TYPE_DEF);
        assert_eq!(method.table(), table::METHOD_DEF);
        assert_eq!(module.type_def(ty).unwrap().full_name(), "App.Worker");
        assert_eq!(module.method(method).unwrap().name, "Run");
        assert_eq!(module.type_full_name(object).unwrap(), "System.Object");
    }

    #[test]
    fn import_is_idempotent() {
        let module = Module::new("target.exe");
        let first = module.import_type_ref(42, "System", "String");
        let second = module.import_type_ref(42, "System", "String");
        assert_eq!(first, second);

        let other = module.import_type_ref(43, "System", "Int32");
        assert_ne!(first, other);
    }

    #[test]
    fn member_ref_full_name() {
        let module = Module::new("target.exe");
        let lock = module.import_type_ref(7, "System.Threading", "ReaderWriterLock");
        let acquire = module.import_member_ref(8, lock, "AcquireReaderLock");

        assert_eq!(
            module.member_full_name(acquire).unwrap(),
            "System.Threading.ReaderWriterLock::AcquireReaderLock"
        );
    }

    #[test]
    fn null_rows_resolve_to_nothing() {
        let module = Module::new("target.exe");
        module.import_type_ref(1, "System", "Object");

        assert!(module.type_full_name(Token::new(0x0100_0000)).is_none());
        assert!(module.type_full_name(Token::new(0x0200_0000)).is_none());
        assert!(module.member_full_name(Token::new(0x0A00_0000)).is_none());
    }

    #[test]
    fn access_queries() {
        let module = Module::new("target.exe");
        let ty = module.add_type("", "Host", None);
        let token = module.add_method(
            ty,
            "Dispatch",
            MethodAttributes::PUBLIC | MethodAttributes::STATIC,
            void_sig(),
        );

        let method = module.method(token).unwrap();
        assert!(method.is_public());
        assert!(method.is_static());
        assert!(!method.is_private());
    }

    #[test]
    fn body_replacement() {
        let module = Module::new("target.exe");
        let ty = module.add_type("", "Host", None);
        let token = module.add_method(ty, "Hidden", MethodAttributes::PRIVATE, void_sig());

        let method = module.method(token).unwrap();
        assert!(method.body.read().unwrap().is_none());

        method.set_body(MethodBody::default()).unwrap();
        assert!(method.body.read().unwrap().is_some());
    }
}
