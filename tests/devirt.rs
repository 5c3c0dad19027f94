//! End-to-end devirtualization runs against an in-memory runtime.
//!
//! The fakes model one target program: a dispatch helper, a VM resolver
//! guarded by a reader lock, and three virtualized methods whose hidden
//! bodies the bridge serves up on demand. One of the hidden bodies is
//! deliberately truncated to exercise per-candidate isolation.

use unvirt::{
    devirt::DevirtEngine,
    disassembler::{opcodes, Instruction, OpCode, Operand, Target},
    metadata::{
        method::{ExceptionHandler, ExceptionHandlerFlags, MethodBody},
        module::{MethodAttributes, Module, SymbolRef},
        signatures::{MethodSig, TypeSig},
        token::Token,
    },
    runtime::{
        DynamicBody, DynamicBodyHandle, DynamicBodySource, ExceptionData, FieldHandle, FieldKind,
        MemberDesc, MethodHandle, ObjectField, ObjectHandle, RuntimeBridge, RuntimeEntry,
        RuntimeValue, TypeDesc, TypeHandle,
    },
    Error, Result,
};

const ALPHA_KEY: i32 = 1337;
const BETA_KEY: i32 = 2001;
const DELTA_KEY: i32 = 3000;

/// Bridge over a fixed object graph:
///
/// - key 1337 -> state 10 -> holder 11 (object field) -> body 1
/// - key 2001 -> state 20 -> delegate 25 -> holder 21 (fallback name) -> body 2
/// - key 3000 -> state 30 -> holder 31 -> body 3 (truncated stream)
///
/// The key-2001 site passes a method handle; binding against the base
/// type is rejected so the declared-type retry must kick in.
struct VmBridge {
    resolver: Token,
    beta: Token,
}

impl RuntimeBridge for VmBridge {
    fn type_desc(&self, handle: TypeHandle) -> Result<TypeDesc> {
        Ok(TypeDesc {
            namespace: "System".to_string(),
            name: format!("T{}", handle.0),
        })
    }

    fn field_desc(&self, handle: FieldHandle, _context: Option<TypeHandle>) -> Result<MemberDesc> {
        Ok(MemberDesc {
            declaring_type: TypeHandle(100),
            name: format!("field{}", handle.0),
        })
    }

    fn method_desc(
        &self,
        handle: MethodHandle,
        _context: Option<TypeHandle>,
    ) -> Result<MemberDesc> {
        Ok(MemberDesc {
            declaring_type: TypeHandle(100),
            name: format!("method{}", handle.0),
        })
    }

    fn resolve_method(&self, token: Token) -> Result<MethodHandle> {
        if token == self.beta {
            Ok(MethodHandle(200))
        } else {
            Err(Error::Runtime(format!("unknown method token {token}")))
        }
    }

    fn declaring_type(&self, method: MethodHandle) -> Result<TypeHandle> {
        assert_eq!(method, MethodHandle(200));
        Ok(TypeHandle(300))
    }

    fn base_type(&self, ty: TypeHandle) -> Result<Option<TypeHandle>> {
        assert_eq!(ty, TypeHandle(300));
        Ok(Some(TypeHandle(301)))
    }

    fn bind_method(&self, method: MethodHandle, context: TypeHandle) -> Result<MethodHandle> {
        assert_eq!(method, MethodHandle(200));
        if context == TypeHandle(301) {
            Err(Error::InvalidArgument(
                "handle not visible through base type".to_string(),
            ))
        } else {
            Ok(MethodHandle(201))
        }
    }

    fn invoke_resolver(
        &self,
        resolver: Token,
        key: i32,
        method: Option<MethodHandle>,
    ) -> Result<ObjectHandle> {
        assert_eq!(resolver, self.resolver);
        match key {
            ALPHA_KEY => {
                assert_eq!(method, None);
                Ok(ObjectHandle(10))
            }
            BETA_KEY => {
                assert_eq!(method, Some(MethodHandle(201)));
                Ok(ObjectHandle(20))
            }
            DELTA_KEY => Ok(ObjectHandle(30)),
            _ => Err(Error::Runtime(format!("unexpected dispatch key {key}"))),
        }
    }

    fn fields(&self, object: ObjectHandle) -> Result<Vec<ObjectField>> {
        let fields = match object.0 {
            10 | 30 => vec![ObjectField {
                name: "m_method".to_string(),
                kind: FieldKind::Object,
            }],
            20 => vec![
                ObjectField {
                    name: "m_sync".to_string(),
                    kind: FieldKind::Other,
                },
                ObjectField {
                    name: "m_del".to_string(),
                    kind: FieldKind::Delegate,
                },
            ],
            11 | 31 => vec![ObjectField {
                name: "m_dyn".to_string(),
                kind: FieldKind::DynamicMethod,
            }],
            // no classified field, forcing the conventional-name fallback
            21 => Vec::new(),
            _ => Vec::new(),
        };
        Ok(fields)
    }

    fn read_field(&self, object: ObjectHandle, name: &str) -> Result<RuntimeValue> {
        match (object.0, name) {
            (10, "m_method") => Ok(RuntimeValue::Object(ObjectHandle(11))),
            (30, "m_method") => Ok(RuntimeValue::Object(ObjectHandle(31))),
            (20, "m_del") => Ok(RuntimeValue::Object(ObjectHandle(25))),
            (25, "_methodBase") => Ok(RuntimeValue::Object(ObjectHandle(21))),
            (11, "m_dyn") => Ok(RuntimeValue::DynamicBody(DynamicBodyHandle(1))),
            (21, "\u{E006}") => Ok(RuntimeValue::DynamicBody(DynamicBodyHandle(2))),
            (31, "m_dyn") => Ok(RuntimeValue::DynamicBody(DynamicBodyHandle(3))),
            _ => Err(Error::Runtime(format!(
                "object {} has no field {name:?}",
                object.0
            ))),
        }
    }
}

struct Bodies;

impl DynamicBodySource for Bodies {
    fn body(&self, handle: DynamicBodyHandle) -> Result<DynamicBody> {
        match handle.0 {
            // nop; nop; ldstr "hi"; pop; ret - with a compact finally
            // region protecting the second nop, handled by the pop
            1 => Ok(DynamicBody {
                code: vec![0x00, 0x00, 0x72, 0x00, 0x00, 0x00, 0x70, 0x26, 0x2A],
                max_stack: 1,
                arg_count: 0,
                locals_sig: None,
                exceptions: ExceptionData::Header(vec![
                    0x00, 0x0E, 0x00, 0x00, // compact, one region
                    0x02, 0x00, // finally
                    0x01, 0x00, 0x01, // try [1, 2)
                    0x07, 0x00, 0x01, // handler [7, 8)
                    0x00, 0x00, 0x00, 0x00,
                ]),
                tokens: vec![RuntimeEntry::String("hi".to_string())],
            }),
            // br.s +0; ret
            2 => Ok(DynamicBody {
                code: vec![0x2B, 0x00, 0x2A],
                max_stack: 0,
                arg_count: 0,
                locals_sig: None,
                exceptions: ExceptionData::None,
                tokens: Vec::new(),
            }),
            // br with a truncated displacement
            3 => Ok(DynamicBody {
                code: vec![0x38, 0x01],
                max_stack: 0,
                arg_count: 0,
                locals_sig: None,
                exceptions: ExceptionData::None,
                tokens: Vec::new(),
            }),
            _ => Err(Error::Empty),
        }
    }
}

fn make_body(parts: Vec<(&'static OpCode, Operand)>) -> MethodBody {
    let mut offset = 0u32;
    let instructions = parts
        .into_iter()
        .map(|(opcode, operand)| {
            let instruction = Instruction {
                offset,
                opcode,
                operand,
            };
            offset += instruction.size() as u32;
            instruction
        })
        .collect();
    MethodBody {
        instructions,
        ..MethodBody::default()
    }
}

fn key_load(key: i32) -> (&'static OpCode, Operand) {
    (
        &opcodes::LDC_I4,
        Operand::Immediate(unvirt::disassembler::Immediate::Int32(key)),
    )
}

fn call(token: Token) -> (&'static OpCode, Operand) {
    (&opcodes::CALL, Operand::Symbol(SymbolRef::Method(token)))
}

fn void_sig() -> MethodSig {
    MethodSig {
        calling_convention: 0,
        has_this: true,
        return_type: TypeSig::Void,
        params: Vec::new(),
    }
}

struct TargetProgram {
    module: Module,
    alpha: Token,
    beta: Token,
    gamma: Token,
    delta: Token,
}

/// Build the visible side of the target program.
fn build_target() -> TargetProgram {
    let module = Module::new("target.exe");

    // dispatch helper
    let method_base = module.import_type_ref(1000, "System.Reflection", "MethodBase");
    let vm_type = module.add_type("Babel", "Dispatch", None);
    let dispatch = module.add_method(
        vm_type,
        "Invoke",
        MethodAttributes::PUBLIC | MethodAttributes::STATIC,
        MethodSig {
            calling_convention: 0,
            has_this: false,
            return_type: TypeSig::Object,
            params: vec![
                TypeSig::I4,
                TypeSig::Class(method_base),
                TypeSig::Object,
                TypeSig::SzArray(Box::new(TypeSig::Object)),
            ],
        },
    );

    // VM resolver
    let lock = module.import_type_ref(1001, "System.Threading", "ReaderWriterLock");
    let acquire = module.import_member_ref(1002, lock, "AcquireReaderLock");
    let resolver = module.add_method(
        vm_type,
        "Fetch",
        MethodAttributes::PRIVATE,
        MethodSig {
            calling_convention: 0,
            has_this: true,
            return_type: TypeSig::Object,
            params: vec![TypeSig::I4, TypeSig::Object],
        },
    );
    let mut resolver_body = make_body(vec![
        (&opcodes::CALLVIRT, Operand::Symbol(SymbolRef::Method(acquire))),
        (&opcodes::RET, Operand::None),
    ]);
    resolver_body.exception_handlers.push(ExceptionHandler {
        flags: ExceptionHandlerFlags::FINALLY,
        try_start: 0,
        try_end: 1,
        handler_start: 1,
        handler_end: 2,
        catch_type: None,
        filter_start: None,
    });
    module
        .method(resolver)
        .unwrap()
        .set_body(resolver_body)
        .unwrap();

    // virtualized methods
    let object = module.import_type_ref(1003, "System", "Object");
    let get_type = module.import_member_ref(1004, object, "GetType");
    let from_handle = module.import_member_ref(1005, method_base, "GetMethodFromHandle");

    let worker_base = module.add_type("App", "WorkerBase", Some(object));
    let worker = module.add_type("App", "Worker", Some(worker_base));

    let alpha = module.add_method(worker, "Alpha", MethodAttributes::PUBLIC, void_sig());
    module
        .method(alpha)
        .unwrap()
        .set_body(make_body(vec![
            (&opcodes::NOP, Operand::None),
            (&opcodes::NOP, Operand::None),
            key_load(ALPHA_KEY),
            (&opcodes::LDNULL, Operand::None),
            (&opcodes::NOP, Operand::None),
            (&opcodes::NOP, Operand::None),
            call(dispatch),
        ]))
        .unwrap();

    let beta = module.add_method(worker, "Beta", MethodAttributes::PUBLIC, void_sig());
    module
        .method(beta)
        .unwrap()
        .set_body(make_body(vec![
            (&opcodes::NOP, Operand::None),
            (&opcodes::NOP, Operand::None),
            key_load(BETA_KEY),
            (&opcodes::NOP, Operand::None),
            (&opcodes::NOP, Operand::None),
            (&opcodes::LDARG_0, Operand::None),
            call(get_type),
            (&opcodes::NOP, Operand::None),
            call(from_handle),
            (&opcodes::NOP, Operand::None),
            (&opcodes::NOP, Operand::None),
            call(dispatch),
        ]))
        .unwrap();

    // reserved key, must never become a candidate
    let gamma = module.add_method(worker, "Gamma", MethodAttributes::PUBLIC, void_sig());
    module
        .method(gamma)
        .unwrap()
        .set_body(make_body(vec![
            (&opcodes::NOP, Operand::None),
            (&opcodes::NOP, Operand::None),
            key_load(1),
            (&opcodes::LDNULL, Operand::None),
            (&opcodes::NOP, Operand::None),
            (&opcodes::NOP, Operand::None),
            call(dispatch),
        ]))
        .unwrap();

    let delta = module.add_method(worker, "Delta", MethodAttributes::PUBLIC, void_sig());
    module
        .method(delta)
        .unwrap()
        .set_body(make_body(vec![
            (&opcodes::NOP, Operand::None),
            (&opcodes::NOP, Operand::None),
            key_load(DELTA_KEY),
            (&opcodes::LDNULL, Operand::None),
            (&opcodes::NOP, Operand::None),
            (&opcodes::NOP, Operand::None),
            call(dispatch),
        ]))
        .unwrap();

    TargetProgram {
        module,
        alpha,
        beta,
        gamma,
        delta,
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn full_run_restores_bodies_and_isolates_failures() {
    init_logging();
    let target = build_target();
    let resolver = target
        .module
        .methods()
        .find(|method| method.name == "Fetch")
        .unwrap()
        .token;
    let bridge = VmBridge {
        resolver,
        beta: target.beta,
    };

    let report = DevirtEngine::new(&target.module, &bridge, &Bodies)
        .run()
        .unwrap();

    assert_eq!(report.devirtualized.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].candidate.method, target.delta);
    assert!(matches!(report.failed[0].error, Error::OutOfBounds));

    // Alpha: spliced body with the decoded string and finally region
    let alpha = target.module.method(target.alpha).unwrap();
    let guard = alpha.body.read().unwrap();
    let body = guard.as_ref().unwrap();
    assert_eq!(body.instructions.len(), 5);
    assert_eq!(
        body.instructions[2].operand,
        Operand::String("hi".to_string())
    );
    assert_eq!(body.max_stack, 1);
    let region = &body.exception_handlers[0];
    assert!(region.is_finally());
    assert_eq!(region.try_start, 1);
    assert_eq!(region.try_end, 2);
    assert_eq!(region.handler_start, 3);
    assert_eq!(region.handler_end, 4);

    // Beta: branch resolved to an instruction index
    let beta = target.module.method(target.beta).unwrap();
    let guard = beta.body.read().unwrap();
    let body = guard.as_ref().unwrap();
    assert_eq!(body.instructions.len(), 2);
    assert_eq!(
        body.instructions[0].operand,
        Operand::Branch(Target::Index(1))
    );

    // Gamma: reserved key, untouched dispatch stub
    let gamma = target.module.method(target.gamma).unwrap();
    let guard = gamma.body.read().unwrap();
    assert_eq!(guard.as_ref().unwrap().instructions.len(), 7);
}

#[test]
fn pinned_resolver_produces_the_same_outcome() {
    init_logging();
    let target = build_target();
    let resolver = target
        .module
        .methods()
        .find(|method| method.name == "Fetch")
        .unwrap()
        .token;
    let bridge = VmBridge {
        resolver,
        beta: target.beta,
    };

    let report = DevirtEngine::new(&target.module, &bridge, &Bodies)
        .with_resolver(resolver)
        .run()
        .unwrap();
    assert_eq!(report.devirtualized.len(), 2);
    assert_eq!(report.failed.len(), 1);
}
