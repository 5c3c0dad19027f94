//! Symbol resolution over a dynamic body's opaque token list.
//!
//! Token operands inside a virtualization-supplied instruction stream do
//! not reference the destination module's tables: the high byte still
//! carries a table discriminator, but the low 24 bits index the per-body
//! opaque token list. The [`SymbolResolver`] dispatches on the
//! discriminator, unwraps the runtime entry found there and imports the
//! referenced symbol into the destination [`Module`], handing back a
//! destination token.
//!
//! Imports are identity-stable: the same runtime handle always maps to the
//! same destination token (the module's import cache is keyed on handle
//! ids), so resolving a token twice is free and deterministic.

use log::trace;

use crate::{
    metadata::{
        module::{Module, SymbolRef},
        signatures::{self, MethodSig, SignatureTypeResolver},
        token::{table, Token},
    },
    runtime::{FieldHandle, MethodHandle, RuntimeBridge, RuntimeEntry, TypeHandle},
    Result,
};

/// A successfully resolved token operand.
#[derive(Debug, Clone, PartialEq)]
pub enum CilSymbol {
    /// A type, field or method imported into the destination module
    Symbol(SymbolRef),
    /// A decoded standalone method signature
    Signature(MethodSig),
    /// A user string
    String(String),
}

/// Resolves raw stream tokens against one candidate's opaque token list.
///
/// Borrowed per candidate; the destination module and bridge outlive it,
/// the token list belongs to the [`crate::runtime::DynamicBody`] being
/// decoded.
pub struct SymbolResolver<'a> {
    module: &'a Module,
    bridge: &'a dyn RuntimeBridge,
    tokens: &'a [RuntimeEntry],
}

impl<'a> SymbolResolver<'a> {
    /// Create a resolver over one candidate's token list.
    #[must_use]
    pub fn new(
        module: &'a Module,
        bridge: &'a dyn RuntimeBridge,
        tokens: &'a [RuntimeEntry],
    ) -> Self {
        SymbolResolver {
            module,
            bridge,
            tokens,
        }
    }

    /// Resolve a raw 32-bit stream token.
    ///
    /// Returns `Ok(None)` when the token does not resolve to a symbol: an
    /// unknown discriminator, an out-of-range row index, or an entry of an
    /// unexpected shape. Whether that is tolerable is the operand site's
    /// decision; string operands degrade to `""`, structural operands fail
    /// the candidate.
    ///
    /// # Errors
    /// Returns [`crate::Error::NestedDynamicBody`] when a vararg wrapper
    /// conceals another dynamic body, and propagates bridge and signature
    /// decode failures.
    pub fn resolve(&self, raw: u32) -> Result<Option<CilSymbol>> {
        let rid = raw & 0x00FF_FFFF;
        match (raw >> 24) as u8 {
            table::TYPE_DEF => match self.entry(rid) {
                Some(RuntimeEntry::Type(handle)) => {
                    let token = self.import_type(*handle)?;
                    Ok(Some(CilSymbol::Symbol(SymbolRef::Type(token))))
                }
                _ => Ok(None),
            },
            table::FIELD => match self.entry(rid) {
                Some(RuntimeEntry::Field(handle)) => {
                    let token = self.import_field(*handle, None)?;
                    Ok(Some(CilSymbol::Symbol(SymbolRef::Field(token))))
                }
                Some(RuntimeEntry::GenericField { field, context }) => {
                    let token = self.import_field(*field, Some(*context))?;
                    Ok(Some(CilSymbol::Symbol(SymbolRef::Field(token))))
                }
                _ => Ok(None),
            },
            table::METHOD_DEF | table::MEMBER_REF => match self.entry(rid) {
                Some(RuntimeEntry::Method(handle)) => {
                    let token = self.import_method(*handle, None)?;
                    Ok(Some(CilSymbol::Symbol(SymbolRef::Method(token))))
                }
                Some(RuntimeEntry::GenericMethod { method, context }) => {
                    let token = self.import_method(*method, Some(*context))?;
                    Ok(Some(CilSymbol::Symbol(SymbolRef::Method(token))))
                }
                Some(RuntimeEntry::VarArgMethod { method, dynamic }) => {
                    if dynamic.is_some() {
                        return Err(crate::Error::NestedDynamicBody);
                    }
                    match method {
                        Some(handle) => {
                            let token = self.import_method(*handle, None)?;
                            Ok(Some(CilSymbol::Symbol(SymbolRef::Method(token))))
                        }
                        None => Ok(None),
                    }
                }
                _ => Ok(None),
            },
            table::STANDALONE_SIG => match self.entry(rid) {
                Some(RuntimeEntry::Signature(blob)) => {
                    let sig = signatures::parse_method_sig(blob, self)?;
                    Ok(Some(CilSymbol::Signature(sig)))
                }
                _ => Ok(None),
            },
            table::USER_STRING => match self.entry(rid) {
                Some(RuntimeEntry::String(value)) => Ok(Some(CilSymbol::String(value.clone()))),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }

    /// Import a runtime type handle as a destination type reference.
    ///
    /// # Errors
    /// Propagates bridge failures describing the handle.
    pub fn import_type(&self, handle: TypeHandle) -> Result<Token> {
        let desc = self.bridge.type_desc(handle)?;
        let token = self
            .module
            .import_type_ref(handle.0, &desc.namespace, &desc.name);
        trace!("imported type {}.{} as {}", desc.namespace, desc.name, token);
        Ok(token)
    }

    fn import_field(&self, handle: FieldHandle, context: Option<TypeHandle>) -> Result<Token> {
        let desc = self.bridge.field_desc(handle, context)?;
        let parent = self.import_type(desc.declaring_type)?;
        Ok(self.module.import_member_ref(handle.0, parent, &desc.name))
    }

    fn import_method(&self, handle: MethodHandle, context: Option<TypeHandle>) -> Result<Token> {
        let desc = self.bridge.method_desc(handle, context)?;
        let parent = self.import_type(desc.declaring_type)?;
        Ok(self.module.import_member_ref(handle.0, parent, &desc.name))
    }

    fn entry(&self, rid: u32) -> Option<&RuntimeEntry> {
        self.tokens.get(rid as usize)
    }
}

impl SignatureTypeResolver for SymbolResolver<'_> {
    /// Coded `TypeDefOrRef` tokens inside signature blobs carry a 2-bit
    /// table tag; all three tagged tables index the opaque token list here.
    fn resolve_type_def_or_ref(&self, coded_token: u32) -> Result<Option<Token>> {
        const TAGGED_TABLES: [u8; 3] = [table::TYPE_DEF, table::TYPE_REF, table::TYPE_SPEC];
        if (coded_token & 0x3) as usize >= TAGGED_TABLES.len() {
            return Ok(None);
        }
        let rid = coded_token >> 2;
        match self.entry(rid) {
            Some(RuntimeEntry::Type(handle)) => Ok(Some(self.import_type(*handle)?)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{testing::NullBridge, DynamicBodyHandle};

    #[test]
    fn resolve_type_entry() {
        let module = Module::new("target.exe");
        let tokens = vec![RuntimeEntry::Type(TypeHandle(5))];
        let resolver = SymbolResolver::new(&module, &NullBridge, &tokens);

        let symbol = resolver.resolve(0x0200_0000).unwrap().unwrap();
        let CilSymbol::Symbol(SymbolRef::Type(token)) = symbol else {
            panic!("expected a type symbol");
        };
        assert_eq!(module.type_full_name(token).unwrap(), "System.T5");
    }

    #[test]
    fn resolve_is_identity_stable() {
        let module = Module::new("target.exe");
        let tokens = vec![RuntimeEntry::Method(MethodHandle(9))];
        let resolver = SymbolResolver::new(&module, &NullBridge, &tokens);

        let first = resolver.resolve(0x0600_0000).unwrap().unwrap();
        let second = resolver.resolve(0x0A00_0000).unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn resolve_out_of_range_is_none() {
        let module = Module::new("target.exe");
        let tokens = vec![RuntimeEntry::Type(TypeHandle(5))];
        let resolver = SymbolResolver::new(&module, &NullBridge, &tokens);

        assert!(resolver.resolve(0x0200_0007).unwrap().is_none());
        // wrong entry shape for the discriminator
        assert!(resolver.resolve(0x0400_0000).unwrap().is_none());
        // unknown discriminator
        assert!(resolver.resolve(0x4200_0000).unwrap().is_none());
    }

    #[test]
    fn vararg_wrapping_dynamic_body_is_fatal() {
        let module = Module::new("target.exe");
        let tokens = vec![RuntimeEntry::VarArgMethod {
            method: None,
            dynamic: Some(DynamicBodyHandle(1)),
        }];
        let resolver = SymbolResolver::new(&module, &NullBridge, &tokens);

        assert!(matches!(
            resolver.resolve(0x0600_0000),
            Err(crate::Error::NestedDynamicBody)
        ));
    }

    #[test]
    fn vararg_wrapping_real_method_imports() {
        let module = Module::new("target.exe");
        let tokens = vec![RuntimeEntry::VarArgMethod {
            method: Some(MethodHandle(3)),
            dynamic: None,
        }];
        let resolver = SymbolResolver::new(&module, &NullBridge, &tokens);

        let symbol = resolver.resolve(0x0A00_0000).unwrap().unwrap();
        let CilSymbol::Symbol(SymbolRef::Method(token)) = symbol else {
            panic!("expected a method symbol");
        };
        assert_eq!(
            module.member_full_name(token).unwrap(),
            "System.T100::method3"
        );
    }

    #[test]
    fn resolve_signature_entry() {
        let module = Module::new("target.exe");
        // default convention, 1 param, (int32) -> void
        let tokens = vec![RuntimeEntry::Signature(vec![0x00, 0x01, 0x01, 0x08])];
        let resolver = SymbolResolver::new(&module, &NullBridge, &tokens);

        let symbol = resolver.resolve(0x1100_0000).unwrap().unwrap();
        let CilSymbol::Signature(sig) = symbol else {
            panic!("expected a signature");
        };
        assert_eq!(sig.params.len(), 1);
    }

    #[test]
    fn resolve_string_entry() {
        let module = Module::new("target.exe");
        let tokens = vec![RuntimeEntry::String("hello".to_string())];
        let resolver = SymbolResolver::new(&module, &NullBridge, &tokens);

        let symbol = resolver.resolve(0x7000_0000).unwrap().unwrap();
        assert_eq!(symbol, CilSymbol::String("hello".to_string()));
    }

    #[test]
    fn signature_embedded_type_resolves_through_token_list() {
        let module = Module::new("target.exe");
        let tokens = vec![RuntimeEntry::Type(TypeHandle(8))];
        let resolver = SymbolResolver::new(&module, &NullBridge, &tokens);

        // tag 0 (TypeDef), row 0 -> opaque entry 0
        let token = resolver.resolve_type_def_or_ref(0).unwrap().unwrap();
        assert_eq!(module.type_full_name(token).unwrap(), "System.T8");

        // tag 3 is not a TypeDefOrRef table
        assert!(resolver.resolve_type_def_or_ref(0x3).unwrap().is_none());
    }
}
