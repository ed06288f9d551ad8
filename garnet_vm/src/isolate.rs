//! The isolate: one cooperative execution thread and everything it owns.
//!
//! Runtime entries take `&mut Isolate`; within one isolate all IC updates,
//! code patches and deopt installs observe program order. Nothing is shared
//! between isolates.

use crate::compiler::Compiler;
use crate::deopt::context::{DeferredDouble, DeferredInt64};
use crate::stack::{
    Frame, ManagedFrameIterator, StackMemory, NUM_CPU_REGISTERS, NUM_FPU_REGISTERS,
};
use crate::stub::StubCode;
use garnet_core::error::{GarnetError, NoSuchMethodInfo};
use garnet_core::flags::Flags;
use garnet_core::intern::SymbolTable;
use garnet_core::value::{ObjectRef, RawWord, Value};
use garnet_runtime::heap::{Heap, HeapObject};
use garnet_runtime::object::class::{ClassId, ClassTable};
use garnet_runtime::object::code::{Address, CodeTable};
use garnet_runtime::object::function::{Function, FunctionFlags, FunctionId, FunctionTable};
use garnet_runtime::object::icdata::{ICData, IcDataId};
use garnet_runtime::object::subtype_cache::{SubtypeCacheId, SubtypeTestCache};
use garnet_runtime::object_store::ObjectStore;
use garnet_runtime::type_args::TypeArgumentsTable;

/// Default stack capacity in words.
const STACK_CAPACITY: usize = 64 * 1024;

/// Default stack limit: a frame pointer below this address overflows.
const DEFAULT_STACK_LIMIT: Address = 64;

bitflags::bitflags! {
    /// Pending interrupt bits, polled at the stack-overflow check.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InterruptBits: u32 {
        /// The store buffer overflowed; a minor collection is wanted.
        const STORE_BUFFER = 1 << 0;
        /// Out-of-band messages are pending.
        const MESSAGE = 1 << 1;
        /// The embedder requested an API interrupt.
        const API = 1 << 2;
    }
}

/// Field index of the method name in an invocation mirror.
pub const MIRROR_NAME_INDEX: usize = 0;
/// Field index of the arguments array in an invocation mirror.
pub const MIRROR_ARGUMENTS_INDEX: usize = 1;

// =============================================================================
// External collaborator handles
// =============================================================================

/// Minimal debugger handle.
#[derive(Debug, Default)]
pub struct Debugger {
    active: bool,
    breakpoints_reached: u32,
    isolate_interrupted_events: u32,
}

impl Debugger {
    /// Whether the debugger is attached. Optimized code is off-limits then.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Attach or detach the debugger.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// A breakpoint stub was reached.
    pub fn signal_breakpoint_reached(&mut self) {
        self.breakpoints_reached += 1;
    }

    /// Number of breakpoint signals delivered.
    #[must_use]
    pub fn breakpoints_reached(&self) -> u32 {
        self.breakpoints_reached
    }

    /// An isolate-interrupted event was delivered.
    pub fn signal_isolate_interrupted(&mut self) {
        self.isolate_interrupted_events += 1;
    }

    /// Number of isolate-interrupted events delivered.
    #[must_use]
    pub fn isolate_interrupted_events(&self) -> u32 {
        self.isolate_interrupted_events
    }
}

/// Minimal out-of-band message handler handle.
#[derive(Debug, Default)]
pub struct MessageHandler {
    pending_oob: u32,
    handled_oob: u32,
}

impl MessageHandler {
    /// Post an out-of-band message.
    pub fn post_oob_message(&mut self) {
        self.pending_oob += 1;
    }

    /// Drain all pending out-of-band messages.
    pub fn handle_oob_messages(&mut self) {
        self.handled_oob += self.pending_oob;
        self.pending_oob = 0;
    }

    /// Messages still pending.
    #[must_use]
    pub fn pending_oob_messages(&self) -> u32 {
        self.pending_oob
    }

    /// Messages drained so far.
    #[must_use]
    pub fn handled_oob_messages(&self) -> u32 {
        self.handled_oob
    }
}

/// Embedder callback invoked on an API interrupt. Returning `false` asks
/// the isolate to unwind.
pub type InterruptCallback = Box<dyn FnMut() -> bool + Send>;

// =============================================================================
// Isolate
// =============================================================================

/// Process-scoped thread of execution and owner of all runtime state.
pub struct Isolate {
    /// Runtime flags.
    pub flags: Flags,
    /// Symbol table.
    pub symbols: SymbolTable,
    /// Managed heap.
    pub heap: Heap,
    /// Class table.
    pub classes: ClassTable,
    /// Function table.
    pub functions: FunctionTable,
    /// Code table / flat code address space.
    pub codes: CodeTable,
    /// Type-arguments table.
    pub type_args: TypeArgumentsTable,
    /// Well-known classes and preallocated objects.
    pub object_store: ObjectStore,
    /// Stack memory holding managed frames.
    pub stack: StackMemory,
    /// Frame pointer of the innermost exit frame; 0 when no managed code is
    /// on the stack.
    pub top_exit_frame_info: Address,
    /// The current top context, captured by closure allocation.
    pub top_context: ObjectRef,
    /// Overflow boundary currently armed in compiled code.
    pub stack_limit: Address,
    /// The real overflow boundary; `stack_limit` may be raised above it to
    /// force the poll.
    pub saved_stack_limit: Address,
    /// Debugger handle.
    pub debugger: Debugger,
    /// Message handler handle.
    pub message_handler: MessageHandler,
    /// Embedder API-interrupt callback.
    pub interrupt_callback: Option<InterruptCallback>,
    /// Stub table: thunks standing in for generated code.
    pub stub_code: StubCode,
    /// The compiler interface. Taken and restored around compilations.
    pub(crate) compiler: Option<Box<dyn Compiler>>,

    interrupts: InterruptBits,
    ic_data: Vec<ICData>,
    subtype_caches: Vec<SubtypeTestCache>,

    // Deopt scratch buffers. Owned here because the stack is being rewritten
    // under the deopt leaf entries.
    pub(crate) deopt_cpu_registers_copy: Option<Box<[RawWord; NUM_CPU_REGISTERS]>>,
    pub(crate) deopt_fpu_registers_copy: Option<Box<[f64; NUM_FPU_REGISTERS]>>,
    pub(crate) deopt_frame_copy: Option<Vec<RawWord>>,
    pub(crate) deferred_doubles: Vec<DeferredDouble>,
    pub(crate) deferred_int64s: Vec<DeferredInt64>,
}

impl Isolate {
    /// Create an isolate with the given flags and a default compiler
    /// installed by the caller via [`Isolate::set_compiler`].
    #[must_use]
    pub fn new(flags: Flags) -> Self {
        let symbols = SymbolTable::new();
        let mut heap = Heap::new();
        let mut classes = ClassTable::new();
        let object_store = ObjectStore::bootstrap(&mut heap, &mut classes, &symbols);
        let top_context = object_store.empty_context;
        let mut isolate = Self {
            flags,
            symbols,
            heap,
            classes,
            functions: FunctionTable::new(),
            codes: CodeTable::new(),
            type_args: TypeArgumentsTable::new(),
            object_store,
            stack: StackMemory::new(STACK_CAPACITY),
            top_exit_frame_info: 0,
            top_context,
            stack_limit: DEFAULT_STACK_LIMIT,
            saved_stack_limit: DEFAULT_STACK_LIMIT,
            debugger: Debugger::default(),
            message_handler: MessageHandler::default(),
            interrupt_callback: None,
            stub_code: StubCode::new(),
            compiler: None,
            interrupts: InterruptBits::empty(),
            ic_data: Vec::new(),
            subtype_caches: Vec::new(),
            deopt_cpu_registers_copy: None,
            deopt_fpu_registers_copy: None,
            deopt_frame_copy: None,
            deferred_doubles: Vec::new(),
            deferred_int64s: Vec::new(),
        };
        isolate.bootstrap_core_functions();
        isolate
    }

    /// Install the compiler interface.
    pub fn set_compiler(&mut self, compiler: Box<dyn Compiler>) {
        self.compiler = Some(compiler);
    }

    /// Give the root Object class its default `noSuchMethod`, whose body
    /// reflects the invocation mirror back as a NoSuchMethod error.
    fn bootstrap_core_functions(&mut self) {
        let name = self.object_store.symbols.no_such_method.clone();
        let object_class = self.object_store.object_class;
        let mut function = Function::dynamic(name, object_class, 2);
        function.flags.remove(FunctionFlags::OPTIMIZABLE);
        let function_id = self.functions.register(function);
        self.classes.add_function(object_class, function_id);

        let code = garnet_runtime::object::code::Code::new(
            function_id,
            vec![garnet_runtime::object::code::InstrSlot::Nop],
        );
        let code_id = self.codes.register(code);
        {
            let function = self.functions.get_mut(function_id);
            function.current_code = Some(code_id);
            function.unoptimized_code = Some(code_id);
        }
        self.stub_code.install_thunk(
            code_id,
            std::sync::Arc::new(|isolate: &mut Isolate, args: &crate::stub::CallArguments| {
                let receiver = args.values[0];
                let mirror = args.values[1]
                    .as_ref()
                    .expect("noSuchMethod needs an invocation mirror");
                Err(isolate.no_such_method_from_mirror(receiver, mirror))
            }),
        );
    }

    /// Build the NoSuchMethod error payload from an invocation mirror,
    /// attaching the parameter names of a same-named method of different
    /// arity when one exists.
    pub(crate) fn no_such_method_from_mirror(
        &self,
        receiver: Value,
        mirror: ObjectRef,
    ) -> GarnetError {
        let (name_value, arguments_value) = match self.heap.get(mirror) {
            HeapObject::Instance { fields, .. } => {
                (fields[MIRROR_NAME_INDEX], fields[MIRROR_ARGUMENTS_INDEX])
            }
            other => panic!("invocation mirror expected, found {other:?}"),
        };
        let method_name = self.string_value(name_value);
        let positional_arguments = match arguments_value.as_ref() {
            Some(r) => match self.heap.get(r) {
                HeapObject::Array { elements, .. } => elements.clone(),
                other => panic!("mirror arguments must be an array, found {other:?}"),
            },
            None => Vec::new(),
        };
        let similar_parameter_names = self.similar_parameter_names(receiver, &method_name);
        GarnetError::NoSuchMethod(NoSuchMethodInfo {
            receiver,
            method_name,
            positional_arguments,
            named_arguments: Vec::new(),
            similar_parameter_names,
        })
    }

    /// Parameter names (receiver skipped) of a dynamic function with the
    /// given name anywhere on the receiver's class chain.
    pub(crate) fn similar_parameter_names(
        &self,
        receiver: Value,
        method_name: &str,
    ) -> Option<Vec<String>> {
        let mut current = Some(self.class_of_value(receiver));
        while let Some(cid) = current {
            let class = self.classes.get(cid);
            for &fid in &class.functions {
                let function = self.functions.get(fid);
                if function.is_dynamic() && function.name.as_str() == method_name {
                    let names = function
                        .parameter_names
                        .iter()
                        .skip(1) // receiver
                        .map(|s| s.as_str().to_string())
                        .collect();
                    return Some(names);
                }
            }
            current = class.super_class;
        }
        None
    }

    // =========================================================================
    // Interrupts
    // =========================================================================

    /// Schedule interrupt bits; delivered at the next poll.
    pub fn schedule_interrupts(&mut self, bits: InterruptBits) {
        self.interrupts |= bits;
    }

    /// Fetch and clear all pending interrupt bits.
    pub fn get_and_clear_interrupts(&mut self) -> InterruptBits {
        std::mem::replace(&mut self.interrupts, InterruptBits::empty())
    }

    // =========================================================================
    // Table access
    // =========================================================================

    /// Register an IC data record.
    pub fn register_ic_data(&mut self, ic: ICData) -> IcDataId {
        let id = IcDataId::from_raw(self.ic_data.len() as u32);
        self.ic_data.push(ic);
        id
    }

    /// Get an IC data record.
    #[inline]
    #[must_use]
    pub fn ic_data(&self, id: IcDataId) -> &ICData {
        &self.ic_data[id.raw() as usize]
    }

    /// Get an IC data record mutably.
    #[inline]
    pub fn ic_data_mut(&mut self, id: IcDataId) -> &mut ICData {
        &mut self.ic_data[id.raw() as usize]
    }

    /// Register an empty subtype-test cache.
    pub fn register_subtype_cache(&mut self) -> SubtypeCacheId {
        let id = SubtypeCacheId::from_raw(self.subtype_caches.len() as u32);
        self.subtype_caches.push(SubtypeTestCache::new());
        id
    }

    /// Get a subtype-test cache.
    #[inline]
    #[must_use]
    pub fn subtype_cache(&self, id: SubtypeCacheId) -> &SubtypeTestCache {
        &self.subtype_caches[id.raw() as usize]
    }

    /// Get a subtype-test cache mutably.
    #[inline]
    pub fn subtype_cache_mut(&mut self, id: SubtypeCacheId) -> &mut SubtypeTestCache {
        &mut self.subtype_caches[id.raw() as usize]
    }

    // =========================================================================
    // Conveniences
    // =========================================================================

    /// Class id of a value.
    #[inline]
    #[must_use]
    pub fn class_of_value(&self, value: Value) -> ClassId {
        self.object_store.class_id_of_value(&self.heap, value)
    }

    /// `Owner.name` of a function.
    #[must_use]
    pub fn qualified_function_name(&self, function: FunctionId) -> String {
        self.functions.get(function).qualified_name(&self.classes)
    }

    /// Content of a managed string value.
    #[must_use]
    pub fn string_value(&self, value: Value) -> String {
        match value.as_ref().map(|r| self.heap.get(r)) {
            Some(HeapObject::Str { value }) => value.to_string(),
            other => panic!("string expected, found {other:?}"),
        }
    }

    /// User-visible type name of a value's runtime type.
    #[must_use]
    pub fn type_name_of_value(&self, value: Value) -> String {
        self.classes.get(self.class_of_value(value)).name.as_str().to_string()
    }

    /// Allocate a positional-arguments array on the heap.
    pub fn new_arguments_array(&mut self, values: &[Value]) -> ObjectRef {
        self.heap.allocate(HeapObject::Array {
            type_arguments: None,
            elements: values.to_vec(),
        })
    }

    /// Allocate an invocation mirror for a failed call.
    pub fn new_invocation_mirror(&mut self, name: &str, arguments: ObjectRef) -> ObjectRef {
        let name_object = self.heap.new_string(name);
        self.heap.allocate(HeapObject::Instance {
            cid: self.object_store.invocation_mirror_class,
            type_arguments: None,
            fields: vec![Value::from_ref(name_object), Value::from_ref(arguments)],
        })
    }

    // =========================================================================
    // Deopt scratch state
    // =========================================================================

    /// Whether the copy phase's scratch buffers are live.
    #[must_use]
    pub fn has_deopt_scratch_buffers(&self) -> bool {
        self.deopt_frame_copy.is_some()
            || self.deopt_cpu_registers_copy.is_some()
            || self.deopt_fpu_registers_copy.is_some()
    }

    /// Deferred boxed-double allocations awaiting materialization.
    #[must_use]
    pub fn deferred_doubles(&self) -> &[DeferredDouble] {
        &self.deferred_doubles
    }

    /// Deferred boxed-int64 allocations awaiting materialization.
    #[must_use]
    pub fn deferred_int64s(&self) -> &[DeferredInt64] {
        &self.deferred_int64s
    }

    // =========================================================================
    // Frames
    // =========================================================================

    /// The innermost managed frame, skipping stub and exit frames.
    ///
    /// A runtime entry that cannot find its managed caller has violated a
    /// fatal invariant.
    #[must_use]
    pub fn top_managed_frame(&self) -> Frame {
        assert!(
            self.top_exit_frame_info != 0,
            "runtime entry without an exit frame"
        );
        ManagedFrameIterator::from_fp(&self.stack, self.top_exit_frame_info)
            .next_frame()
            .expect("no managed caller frame below the runtime entry")
    }

    /// Iterator over managed frames from the current exit frame.
    #[must_use]
    pub fn managed_frames(&self) -> ManagedFrameIterator<'_> {
        ManagedFrameIterator::from_fp(&self.stack, self.top_exit_frame_info)
    }

    /// Token position of the managed caller's current pc, or -1.
    #[must_use]
    pub fn caller_location(&self) -> i64 {
        let frame = self.top_managed_frame();
        let code = frame
            .lookup_code(&self.codes)
            .expect("managed frame without code");
        self.codes.get(code).token_pos_at(frame.pc)
    }
}

// =============================================================================
// Tests
// =============================================================================
