//! Detection of virtualization dispatch call sites.
//!
//! A virtualized method's visible body is reduced to a call into the VM's
//! dispatch helper, with the dispatch key and optional reflection arguments
//! set up by a short, fixed instruction prelude. The exact prelude offsets
//! are a signature of one obfuscator version's code generator, so they live
//! behind the [`CallSiteShape`] trait; a stream that doesn't match the
//! shape exactly is "not a candidate", never a guessed key.

use log::debug;

use crate::{
    disassembler::{opcodes, Instruction, OpCode, Operand},
    metadata::{
        module::{MethodDef, Module, SymbolRef},
        signatures::TypeSig,
        token::{table, Token},
    },
};

/// One detected virtualization call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Token of the method whose body is the call site.
    pub method: Token,
    /// The embedded dispatch key.
    pub key: i32,
    /// Whether the site passes the caller's method handle to the VM.
    pub has_method_base: bool,
    /// Whether that handle must be bound against the declaring type's base
    /// type rather than the declaring type itself.
    pub has_base_method_base: bool,
}

/// A versioned call-site prelude shape.
///
/// Implementations encapsulate one obfuscator version's fixed instruction
/// offsets. At most one candidate is produced per method; the first match
/// wins.
pub trait CallSiteShape {
    /// Scan one method for a dispatch call site.
    fn find(&self, module: &Module, method: &MethodDef) -> Option<Candidate>;
}

/// The dispatch prelude emitted by Babel's code generator.
///
/// The dispatch helper is a static public method of the same module with
/// shape `(int32, System.Reflection.MethodBase, object, object[]) ->
/// object` (a parameterless simplification also occurs). Relative to the
/// dispatch `call` at index `i`:
///
/// - `ldnull` at `i-3`: no method handle is passed, the key loads at `i-4`
/// - `call GetMethodFromHandle` at `i-3`: a handle is passed, the key
///   loads at `i-9`; `ldarg.0; call Object::GetType` at `i-6`/`i-5` on a
///   subclass marks the base-type handle variant
///
/// Keys `0` and `1` are reserved by the VM and never real dispatch keys.
pub struct DispatchShapeV1;

impl CallSiteShape for DispatchShapeV1 {
    fn find(&self, module: &Module, method: &MethodDef) -> Option<Candidate> {
        let guard = method.body.read().ok()?;
        let body = guard.as_ref()?;
        let instructions = &body.instructions;
        if instructions.len() < 7 {
            return None;
        }

        for (i, instruction) in instructions.iter().enumerate() {
            if !is(instruction, &opcodes::CALL) || !is_dispatch_target(module, instruction) {
                continue;
            }
            if i < 4 {
                continue;
            }

            let mut key_index = i - 4;
            let mut has_method_base = false;
            let mut has_base_method_base = false;

            if is(&instructions[i - 3], &opcodes::LDNULL) {
                // no handle argument, key right before the prelude
            } else if is(&instructions[i - 3], &opcodes::CALL)
                && calls_into(module, &instructions[i - 3], "MethodBase::GetMethodFromHandle")
            {
                if i < 9 {
                    continue;
                }
                key_index = i - 9;
                has_method_base = true;
                if !declares_root_base(module, method)
                    && is(&instructions[i - 6], &opcodes::LDARG_0)
                    && is(&instructions[i - 5], &opcodes::CALL)
                    && calls_into(module, &instructions[i - 5], "System.Object::GetType")
                {
                    has_base_method_base = true;
                }
            } else {
                continue;
            }

            let key = instructions[key_index].ldc_i4_value()?;
            if key == 0 || key == 1 {
                // reserved sentinel keys, silently excluded
                return None;
            }

            debug!(
                "call site in {} ({}): key {}, method base {}, base-type handle {}",
                method.name, method.token, key, has_method_base, has_base_method_base
            );
            return Some(Candidate {
                method: method.token,
                key,
                has_method_base,
                has_base_method_base,
            });
        }

        None
    }
}

fn is(instruction: &Instruction, opcode: &'static OpCode) -> bool {
    instruction.opcode.value == opcode.value
}

/// Whether a `call` instruction targets a plausible dispatch helper: a
/// static public method defined in this module, returning object, with
/// the 4-parameter dispatch shape or no parameters at all.
fn is_dispatch_target(module: &Module, instruction: &Instruction) -> bool {
    let Operand::Symbol(SymbolRef::Method(token)) = &instruction.operand else {
        return false;
    };
    let Some(callee) = module.method(*token) else {
        return false;
    };
    if !callee.is_static()
        || !callee.is_public()
        || callee.signature.return_type != TypeSig::Object
    {
        return false;
    }
    match callee.signature.params.as_slice() {
        [] => true,
        [first, second, third, fourth] => {
            *first == TypeSig::I4
                && is_named_class(module, second, "System.Reflection.MethodBase")
                && *third == TypeSig::Object
                && *fourth == TypeSig::SzArray(Box::new(TypeSig::Object))
        }
        _ => false,
    }
}

fn is_named_class(module: &Module, sig: &TypeSig, full_name: &str) -> bool {
    match sig {
        TypeSig::Class(token) => {
            module.type_full_name(*token).as_deref() == Some(full_name)
        }
        _ => false,
    }
}

/// Whether a `call` instruction targets a member whose qualified name ends
/// with `suffix`.
fn calls_into(module: &Module, instruction: &Instruction, suffix: &str) -> bool {
    let Operand::Symbol(SymbolRef::Method(token)) = &instruction.operand else {
        return false;
    };
    let name = match token.table() {
        table::MEMBER_REF => module.member_full_name(*token),
        table::METHOD_DEF => module.method(*token).and_then(|callee| {
            let parent = module.type_full_name(callee.declaring_type)?;
            Some(format!("{}::{}", parent, callee.name))
        }),
        _ => None,
    };
    name.is_some_and(|name| name.ends_with(suffix))
}

/// Whether the method's declaring type derives directly from the root
/// object type (or has no base at all).
fn declares_root_base(module: &Module, method: &MethodDef) -> bool {
    let Some(declaring) = module.type_def(method.declaring_type) else {
        return true;
    };
    let Some(base) = declaring.base else {
        return true;
    };
    module
        .type_full_name(base)
        .is_none_or(|name| name.contains("System.Object"))
}
