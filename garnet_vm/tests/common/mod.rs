//! Shared test harness: an isolate wired to a template compiler, plus
//! helpers for declaring classes, methods, call-site code and frames.

// Not every suite uses every helper.
#![allow(dead_code)]

use garnet_core::flags::Flags;
use garnet_core::value::{RawWord, Value};
use garnet_runtime::heap::HeapObject;
use garnet_runtime::object::class::{Class, ClassId};
use garnet_runtime::object::code::{Address, CodeId, InstanceCallSite, InstrSlot, PcDescriptorKind};
use garnet_runtime::object::function::{Function, FunctionId, FunctionKind};
use garnet_vm::compiler::{
    ensure_compiled, CodeTemplate, CompileKind, Compiler, IcSite, TemplateCompiler,
};
use garnet_vm::entry::{NativeArg, RuntimeArgs};
use garnet_vm::isolate::Isolate;
use garnet_vm::stack::{ENTRY_FRAME_MARKER, STUB_FRAME_MARKER};
use garnet_vm::stub::{NativeThunk, MEGAMORPHIC_LOOKUP_STUB, STATIC_CALL_STUB};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Fixed frame-pointer addresses used by [`TestVm::push_call_frames`].
pub const ENTRY_FP: Address = 60000;
pub const CALLER_FP: Address = 59990;
pub const EXIT_FP: Address = 59980;

/// Template compiler shared between the harness and the isolate, so tests
/// can keep declaring templates after installation.
#[derive(Clone)]
pub struct SharedTemplates(Rc<RefCell<TemplateCompiler>>);

impl Compiler for SharedTemplates {
    fn compile(
        &mut self,
        isolate: &mut Isolate,
        function: FunctionId,
        kind: CompileKind,
    ) -> Result<CodeId, garnet_core::error::CompileError> {
        self.0.borrow_mut().compile(isolate, function, kind)
    }
}

/// An isolate plus declaration helpers.
pub struct TestVm {
    pub isolate: Isolate,
    templates: SharedTemplates,
}

impl TestVm {
    pub fn new() -> Self {
        Self::with_flags(Flags::default())
    }

    pub fn with_flags(flags: Flags) -> Self {
        let mut isolate = Isolate::new(flags);
        let templates = SharedTemplates(Rc::new(RefCell::new(TemplateCompiler::new())));
        isolate.set_compiler(Box::new(templates.clone()));
        Self { isolate, templates }
    }

    pub fn declare(&self, function: FunctionId, kind: CompileKind, template: CodeTemplate) {
        self.templates.0.borrow_mut().declare(function, kind, template);
    }

    // =========================================================================
    // Declarations
    // =========================================================================

    pub fn define_class(&mut self, name: &str, super_class: Option<ClassId>) -> ClassId {
        let super_class = super_class.or(Some(self.isolate.object_store.object_class));
        let name = self.isolate.symbols.intern(name);
        self.isolate.classes.register(Class::new(name, super_class))
    }

    /// A dynamic method with only fixed parameters (receiver included in
    /// `num_fixed`), compiled from a one-slot template around `thunk`.
    pub fn define_method(
        &mut self,
        class: ClassId,
        name: &str,
        num_fixed: usize,
        thunk: NativeThunk,
    ) -> FunctionId {
        let symbol = self.isolate.symbols.intern(name);
        let function = Function::dynamic(symbol, class, num_fixed);
        let id = self.isolate.functions.register(function);
        self.isolate.classes.add_function(class, id);
        self.declare(id, CompileKind::Unoptimized, simple_template(thunk));
        id
    }

    /// Like [`TestVm::define_method`] but with declared parameter names
    /// (receiver first).
    pub fn define_method_with_parameters(
        &mut self,
        class: ClassId,
        name: &str,
        parameter_names: &[&str],
        thunk: NativeThunk,
    ) -> FunctionId {
        let id = self.define_method(class, name, parameter_names.len(), thunk);
        let names = parameter_names
            .iter()
            .map(|n| self.isolate.symbols.intern(n))
            .collect();
        self.isolate.functions.get_mut(id).parameter_names = names;
        id
    }

    /// A getter `get:name`, compiled from a one-slot template.
    pub fn define_getter(&mut self, class: ClassId, name: &str, thunk: NativeThunk) -> FunctionId {
        let base = self.isolate.symbols.intern(name);
        let getter_name = self.isolate.symbols.getter_name(&base);
        let mut function = Function::dynamic(getter_name, class, 1);
        function.kind = FunctionKind::Getter;
        let id = self.isolate.functions.register(function);
        self.isolate.classes.add_function(class, id);
        self.declare(id, CompileKind::Unoptimized, simple_template(thunk));
        id
    }

    /// A static caller whose code has an instance-call site at offset 1.
    /// Returns `(caller function, caller code, call-site pc)`.
    pub fn define_instance_call_site(
        &mut self,
        method_name: &str,
        argument_count: usize,
        num_args_tested: usize,
    ) -> (FunctionId, CodeId, Address) {
        let caller_symbol = self.isolate.symbols.intern("caller");
        let caller = self.isolate.functions.register(Function::static_function(
            caller_symbol,
            self.isolate.object_store.object_class,
            0,
        ));
        let name = self.isolate.symbols.intern(method_name);
        let template = CodeTemplate {
            instructions: vec![
                InstrSlot::Nop,
                InstrSlot::InstanceCall(InstanceCallSite {
                    name,
                    argument_count,
                    named_argument_count: 0,
                    target: MEGAMORPHIC_LOOKUP_STUB,
                    ic_data: None,
                }),
                InstrSlot::Nop,
            ],
            pc_descriptors: vec![(1, 11, PcDescriptorKind::IcCall)],
            static_calls: Vec::new(),
            ic_sites: vec![IcSite {
                offset: 1,
                num_args_tested,
            }],
            deopt_table: Vec::new(),
            deopt_infos: Vec::new(),
            object_table: Vec::new(),
            native: null_thunk(),
        };
        self.declare(caller, CompileKind::Unoptimized, template);
        let code = ensure_compiled(&mut self.isolate, caller).unwrap();
        let pc = self.isolate.codes.get(code).entry_point + 1;
        (caller, code, pc)
    }

    /// A static caller whose code has a static-call site at offset 1
    /// pointing at the static-call stub. Returns
    /// `(caller function, caller code, call-site pc)`.
    pub fn define_static_call_site(&mut self, callee: FunctionId) -> (FunctionId, CodeId, Address) {
        let caller_symbol = self.isolate.symbols.intern("static_caller");
        let caller = self.isolate.functions.register(Function::static_function(
            caller_symbol,
            self.isolate.object_store.object_class,
            0,
        ));
        let template = CodeTemplate {
            instructions: vec![
                InstrSlot::Nop,
                InstrSlot::StaticCall {
                    target: STATIC_CALL_STUB,
                },
                InstrSlot::Nop,
            ],
            pc_descriptors: vec![(1, 22, PcDescriptorKind::FuncCall)],
            static_calls: vec![(1, callee)],
            ic_sites: Vec::new(),
            deopt_table: Vec::new(),
            deopt_infos: Vec::new(),
            object_table: Vec::new(),
            native: null_thunk(),
        };
        self.declare(caller, CompileKind::Unoptimized, template);
        let code = ensure_compiled(&mut self.isolate, caller).unwrap();
        let pc = self.isolate.codes.get(code).entry_point + 1;
        (caller, code, pc)
    }

    // =========================================================================
    // Values and frames
    // =========================================================================

    pub fn instance_of(&mut self, class: ClassId) -> Value {
        let r = self.isolate.heap.allocate(HeapObject::Instance {
            cid: class,
            type_arguments: None,
            fields: Vec::new(),
        });
        Value::from_ref(r)
    }

    pub fn double_value(&mut self, value: f64) -> Value {
        let r = self.isolate.heap.new_double(value);
        Value::from_ref(r)
    }

    pub fn arguments_array(&mut self, values: &[Value]) -> Value {
        let r = self.isolate.new_arguments_array(values);
        Value::from_ref(r)
    }

    /// Push entry, caller and exit frames so the caller's pc is the given
    /// call site. Returns the call-site pc.
    pub fn push_call_frames(&mut self, code: CodeId, pc_offset: usize) -> Address {
        let entry_point = self.isolate.codes.get(code).entry_point;
        let pc = entry_point + pc_offset;
        self.isolate
            .stack
            .write_frame_header(ENTRY_FP, 0, 0, ENTRY_FRAME_MARKER);
        self.isolate
            .stack
            .write_frame_header(CALLER_FP, ENTRY_FP, 0, entry_point as RawWord);
        self.isolate
            .stack
            .write_frame_header(EXIT_FP, CALLER_FP, pc, STUB_FRAME_MARKER);
        self.isolate.top_exit_frame_info = EXIT_FP;
        pc
    }
}

/// A one-slot template around a native thunk.
pub fn simple_template(thunk: NativeThunk) -> CodeTemplate {
    CodeTemplate {
        instructions: vec![InstrSlot::Nop],
        pc_descriptors: Vec::new(),
        static_calls: Vec::new(),
        ic_sites: Vec::new(),
        deopt_table: Vec::new(),
        deopt_infos: Vec::new(),
        object_table: Vec::new(),
        native: thunk,
    }
}

/// A thunk returning null.
pub fn null_thunk() -> NativeThunk {
    Arc::new(|_, _| Ok(Value::null()))
}

/// A thunk returning a fixed Smi.
pub fn smi_thunk(value: i64) -> NativeThunk {
    Arc::new(move |_, _| Ok(Value::smi(value)))
}

/// Run a runtime entry with the given arguments.
pub fn run_entry(
    isolate: &mut Isolate,
    entry: fn(&mut Isolate, &mut RuntimeArgs) -> garnet_core::error::VmResult<()>,
    args: Vec<NativeArg>,
) -> garnet_core::error::VmResult<RuntimeArgs> {
    let mut arguments = RuntimeArgs::new(args);
    entry(isolate, &mut arguments)?;
    Ok(arguments)
}
