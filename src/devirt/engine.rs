//! The devirtualization run: locate the VM resolver, collect call-site
//! candidates and restore each hidden body in isolation.
//!
//! A run fails as a whole only when its preconditions fail (no resolver,
//! no candidates); once candidates exist, each one is processed
//! independently and its failure is recorded in the [`RunReport`] rather
//! than aborting the remaining work. A half-devirtualized program with a
//! precise failure list beats an all-or-nothing abort.

use log::{debug, info, warn};

use crate::{
    devirt::callsite::{CallSiteShape, Candidate, DispatchShapeV1},
    disassembler::{opcodes, BodyDecoder, Instruction, Operand},
    metadata::{
        module::{Module, SymbolRef},
        signatures::TypeSig,
        token::Token,
    },
    runtime::{
        DynamicBodyHandle, DynamicBodySource, FieldKind, MethodHandle, ObjectHandle,
        RuntimeBridge, RuntimeValue,
    },
    Error, Result,
};

/// Conventional name of the dynamic-method field inside the resolver's
/// method holder, used when field-kind classification finds nothing.
const DYNAMIC_METHOD_FIELD: &str = "\u{E006}";

/// One candidate that could not be devirtualized.
#[derive(Debug)]
pub struct CandidateFailure {
    /// The failed call site.
    pub candidate: Candidate,
    /// What went wrong.
    pub error: Error,
}

/// Outcome of a devirtualization run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Call sites whose methods now carry their recovered bodies.
    pub devirtualized: Vec<Candidate>,
    /// Call sites that failed, with their individual errors.
    pub failed: Vec<CandidateFailure>,
}

/// Drives a devirtualization run over one destination module.
pub struct DevirtEngine<'a> {
    module: &'a Module,
    bridge: &'a dyn RuntimeBridge,
    source: &'a dyn DynamicBodySource,
    shape: Box<dyn CallSiteShape>,
    resolver_override: Option<Token>,
}

impl<'a> DevirtEngine<'a> {
    /// Create an engine with the default call-site shape.
    #[must_use]
    pub fn new(
        module: &'a Module,
        bridge: &'a dyn RuntimeBridge,
        source: &'a dyn DynamicBodySource,
    ) -> Self {
        DevirtEngine {
            module,
            bridge,
            source,
            shape: Box::new(DispatchShapeV1),
            resolver_override: None,
        }
    }

    /// Replace the call-site shape, for obfuscator versions with a
    /// different dispatch prelude.
    #[must_use]
    pub fn with_shape(mut self, shape: Box<dyn CallSiteShape>) -> Self {
        self.shape = shape;
        self
    }

    /// Pin the VM resolver instead of scanning for it.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Token) -> Self {
        self.resolver_override = Some(resolver);
        self
    }

    /// Run devirtualization over the whole module.
    ///
    /// # Errors
    /// Returns [`Error::ResolverNotFound`] when no VM resolver is pinned or
    /// detected, and [`Error::NoVirtualizedMethods`] when no method matches
    /// the call-site shape. Per-candidate failures do not abort the run.
    pub fn run(&self) -> Result<RunReport> {
        let resolver = match self.resolver_override {
            Some(token) => token,
            None => self.find_resolver().ok_or(Error::ResolverNotFound)?,
        };
        info!("VM resolver is {}", resolver);

        let candidates: Vec<Candidate> = self
            .module
            .methods()
            .filter_map(|method| self.shape.find(self.module, method))
            .collect();
        if candidates.is_empty() {
            return Err(Error::NoVirtualizedMethods);
        }
        info!("{} virtualized call sites detected", candidates.len());

        let mut report = RunReport::default();
        for candidate in candidates {
            match self.devirtualize(resolver, &candidate) {
                Ok(()) => {
                    debug!(
                        "restored body of {} (key {})",
                        candidate.method, candidate.key
                    );
                    report.devirtualized.push(candidate);
                }
                Err(error) => {
                    warn!(
                        "failed to devirtualize {} (key {}): {}",
                        candidate.method, candidate.key, error
                    );
                    report.failed.push(CandidateFailure { candidate, error });
                }
            }
        }

        info!(
            "run complete: {} restored, {} failed",
            report.devirtualized.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Scan for the VM resolver method.
    ///
    /// The resolver is a private instance method taking the dispatch key as
    /// its first declared `int32` parameter, with at least one exception
    /// region and a guarded read of the VM's method cache behind a
    /// `ReaderWriterLock`. The lock acquisition is the distinctive part;
    /// the cheaper attribute checks run first.
    fn find_resolver(&self) -> Option<Token> {
        for method in self.module.methods() {
            if !method.is_private() || method.is_static() {
                continue;
            }
            let signature = &method.signature;
            if !signature.has_this || signature.params.first() != Some(&TypeSig::I4) {
                continue;
            }
            let Ok(guard) = method.body.read() else {
                continue;
            };
            let Some(body) = guard.as_ref() else {
                continue;
            };
            if body.exception_handlers.is_empty() {
                continue;
            }
            if body
                .instructions
                .iter()
                .any(|instruction| self.acquires_reader_lock(instruction))
            {
                debug!("resolver heuristic matched {} ({})", method.name, method.token);
                return Some(method.token);
            }
        }
        None
    }

    fn acquires_reader_lock(&self, instruction: &Instruction) -> bool {
        if instruction.opcode.value != opcodes::CALLVIRT.value {
            return false;
        }
        let Operand::Symbol(SymbolRef::Method(token)) = &instruction.operand else {
            return false;
        };
        self.module
            .member_full_name(*token)
            .is_some_and(|name| {
                name.contains("System.Threading.ReaderWriterLock::AcquireReaderLock")
            })
    }

    /// Restore one candidate's body.
    fn devirtualize(&self, resolver: Token, candidate: &Candidate) -> Result<()> {
        let handle = self.method_argument(candidate)?;
        let state = self.bridge.invoke_resolver(resolver, candidate.key, handle)?;
        let holder = self.method_holder(state)?;
        let dynamic = self.source.body(self.dynamic_body(holder)?)?;

        let body = BodyDecoder::new(self.module, self.bridge).decode(&dynamic)?;
        debug!(
            "candidate {}: {} instructions, {} code bytes",
            candidate.method,
            body.instructions.len(),
            body.code_size()
        );
        let method = self
            .module
            .method(candidate.method)
            .ok_or(Error::TokenNotFound(candidate.method))?;
        method.set_body(body)
    }

    /// The method-handle argument for the resolver invocation, bound the
    /// way the original call site would have bound it.
    fn method_argument(&self, candidate: &Candidate) -> Result<Option<MethodHandle>> {
        if !candidate.has_method_base {
            return Ok(None);
        }
        let raw = self.bridge.resolve_method(candidate.method)?;
        let declaring = self.bridge.declaring_type(raw)?;

        if candidate.has_base_method_base {
            if let Some(base) = self.bridge.base_type(declaring)? {
                match self.bridge.bind_method(raw, base) {
                    Ok(bound) => return Ok(Some(bound)),
                    // the handle is not visible through the base type,
                    // fall back to the declaring type
                    Err(Error::InvalidArgument(_)) => {}
                    Err(error) => return Err(error),
                }
            }
        }
        Ok(Some(self.bridge.bind_method(raw, declaring)?))
    }

    /// Dig the method holder object out of the resolver's state object:
    /// either a plain object field, or a delegate field whose target keeps
    /// it in `_methodBase`.
    fn method_holder(&self, state: ObjectHandle) -> Result<ObjectHandle> {
        let fields = self.bridge.fields(state)?;

        if let Some(field) = fields.iter().find(|field| field.kind == FieldKind::Object) {
            if let RuntimeValue::Object(holder) = self.bridge.read_field(state, &field.name)? {
                return Ok(holder);
            }
        }

        if let Some(field) = fields.iter().find(|field| field.kind == FieldKind::Delegate) {
            if let RuntimeValue::Object(delegate) = self.bridge.read_field(state, &field.name)? {
                if let RuntimeValue::Object(holder) =
                    self.bridge.read_field(delegate, "_methodBase")?
                {
                    return Ok(holder);
                }
            }
        }

        Err(Error::Runtime(
            "resolver state carries no method object".to_string(),
        ))
    }

    /// The dynamic body behind the method holder, found by field kind or,
    /// failing that, by the emitter's conventional field name.
    fn dynamic_body(&self, holder: ObjectHandle) -> Result<DynamicBodyHandle> {
        let fields = self.bridge.fields(holder)?;
        let name = fields
            .iter()
            .find(|field| field.kind == FieldKind::DynamicMethod)
            .map_or(DYNAMIC_METHOD_FIELD, |field| field.name.as_str());

        match self.bridge.read_field(holder, name)? {
            RuntimeValue::DynamicBody(handle) => Ok(handle),
            _ => Err(Error::Runtime(format!(
                "field {name:?} of the method holder is not a dynamic body"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        disassembler::Instruction,
        metadata::{
            method::{ExceptionHandler, ExceptionHandlerFlags, MethodBody},
            module::MethodAttributes,
            signatures::MethodSig,
        },
        runtime::{testing::NullBridge, DynamicBody},
    };

    struct NoBodies;

    impl DynamicBodySource for NoBodies {
        fn body(&self, _handle: DynamicBodyHandle) -> Result<DynamicBody> {
            Err(Error::Empty)
        }
    }

    fn resolver_sig() -> MethodSig {
        MethodSig {
            calling_convention: 0,
            has_this: true,
            return_type: TypeSig::Object,
            params: vec![TypeSig::I4, TypeSig::Object],
        }
    }

    fn resolver_body(module: &Module) -> MethodBody {
        let lock = module.import_type_ref(500, "System.Threading", "ReaderWriterLock");
        let acquire = module.import_member_ref(501, lock, "AcquireReaderLock");
        let instructions = vec![
            Instruction {
                offset: 0,
                opcode: &opcodes::CALLVIRT,
                operand: Operand::Symbol(SymbolRef::Method(acquire)),
            },
            Instruction {
                offset: 5,
                opcode: &opcodes::RET,
                operand: Operand::None,
            },
        ];
        MethodBody {
            instructions,
            exception_handlers: vec![ExceptionHandler {
                flags: ExceptionHandlerFlags::FINALLY,
                try_start: 0,
                try_end: 1,
                handler_start: 1,
                handler_end: 2,
                catch_type: None,
                filter_start: None,
            }],
            ..MethodBody::default()
        }
    }

    fn add_resolver(module: &Module) -> Token {
        let vm_type = module.add_type("Babel", "Vm", None);
        let token = module.add_method(vm_type, "Fetch", MethodAttributes::PRIVATE, resolver_sig());
        module
            .method(token)
            .unwrap()
            .set_body(resolver_body(module))
            .unwrap();
        token
    }

    #[test]
    fn resolver_heuristic_matches() {
        let module = Module::new("target.exe");
        let resolver = add_resolver(&module);

        let engine = DevirtEngine::new(&module, &NullBridge, &NoBodies);
        assert_eq!(engine.find_resolver(), Some(resolver));
    }

    #[test]
    fn resolver_heuristic_rejects_wrong_shapes() {
        let module = Module::new("target.exe");
        let vm_type = module.add_type("Babel", "Vm", None);

        // static, otherwise identical
        let wrong = module.add_method(
            vm_type,
            "Fetch",
            MethodAttributes::PRIVATE | MethodAttributes::STATIC,
            resolver_sig(),
        );
        module
            .method(wrong)
            .unwrap()
            .set_body(resolver_body(&module))
            .unwrap();

        // right attributes but no exception regions
        let no_regions = module.add_method(
            vm_type,
            "Fetch2",
            MethodAttributes::PRIVATE,
            resolver_sig(),
        );
        let mut body = resolver_body(&module);
        body.exception_handlers.clear();
        module.method(no_regions).unwrap().set_body(body).unwrap();

        let engine = DevirtEngine::new(&module, &NullBridge, &NoBodies);
        assert_eq!(engine.find_resolver(), None);
    }

    #[test]
    fn run_without_resolver_fails() {
        let module = Module::new("target.exe");
        let engine = DevirtEngine::new(&module, &NullBridge, &NoBodies);

        assert!(matches!(engine.run(), Err(Error::ResolverNotFound)));
    }

    #[test]
    fn run_without_candidates_fails() {
        let module = Module::new("target.exe");
        add_resolver(&module);

        let engine = DevirtEngine::new(&module, &NullBridge, &NoBodies);
        assert!(matches!(engine.run(), Err(Error::NoVirtualizedMethods)));
    }

    #[test]
    fn pinned_resolver_skips_detection() {
        let module = Module::new("target.exe");
        let pinned = Token::from_parts(crate::metadata::token::table::METHOD_DEF, 42);

        let engine = DevirtEngine::new(&module, &NullBridge, &NoBodies).with_resolver(pinned);
        // detection would fail, the pinned token carries the run to the
        // candidate scan instead
        assert!(matches!(engine.run(), Err(Error::NoVirtualizedMethods)));
    }
}
