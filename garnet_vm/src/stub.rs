//! Stub code: fixed stub entry points and the native thunks standing in
//! for generated code.
//!
//! Real stub bodies are an external collaborator; what the runtime entries
//! need from them is (a) well-known entry-point addresses that call sites
//! can be patched to and (b) a way to invoke a code object's entry point
//! with an arguments descriptor and an argument vector.

use crate::isolate::Isolate;
use garnet_core::error::VmResult;
use garnet_core::value::Value;
use garnet_runtime::arguments::ArgumentsDescriptor;
use garnet_runtime::object::code::{Address, CodeId, CODE_BASE};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Entry point of the patchable static-call stub: the target of freshly
/// compiled static call sites before their first invocation.
pub const STATIC_CALL_STUB: Address = 0x10;

/// Entry point of the lazy-deoptimization stub, spliced into optimized
/// frames' return sites by `DeoptimizeAll`.
pub const LAZY_DEOPT_STUB: Address = 0x20;

/// Entry point of the megamorphic-lookup stub.
pub const MEGAMORPHIC_LOOKUP_STUB: Address = 0x30;

/// Entry point of the breakpoint stub the debugger patches in.
pub const BREAKPOINT_STUB: Address = 0x40;

/// Whether an address belongs to the reserved stub range.
#[inline]
#[must_use]
pub fn is_stub_address(address: Address) -> bool {
    address < CODE_BASE
}

// =============================================================================
// Invocation
// =============================================================================

/// Arguments of one managed invocation.
#[derive(Debug, Clone)]
pub struct CallArguments {
    /// Shape of the arguments.
    pub descriptor: ArgumentsDescriptor,
    /// The argument values, receiver first for dynamic calls.
    pub values: Vec<Value>,
}

impl CallArguments {
    /// Positional-only arguments.
    #[must_use]
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            descriptor: ArgumentsDescriptor::positional(values.len()),
            values,
        }
    }
}

/// A native thunk standing in for one code object's generated body.
pub type NativeThunk = Arc<dyn Fn(&mut Isolate, &CallArguments) -> VmResult<Value> + Send + Sync>;

/// The stub table: code-id-keyed native thunks.
#[derive(Default)]
pub struct StubCode {
    thunks: FxHashMap<CodeId, NativeThunk>,
}

impl StubCode {
    /// Create an empty stub table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a thunk to a code object.
    pub fn install_thunk(&mut self, code: CodeId, thunk: NativeThunk) {
        self.thunks.insert(code, thunk);
    }

    /// The thunk of a code object, if installed.
    #[must_use]
    pub fn thunk(&self, code: CodeId) -> Option<&NativeThunk> {
        self.thunks.get(&code)
    }
}

impl std::fmt::Debug for StubCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubCode")
            .field("thunks", &self.thunks.len())
            .finish()
    }
}

/// Invoke a code object's entry through its thunk.
///
/// The exit-frame info is saved and restored around the call so nested
/// native/managed transitions unwind correctly. With `deoptimize_alot` set,
/// every return to managed code deoptimizes all live optimized frames
/// first.
pub fn invoke_code(isolate: &mut Isolate, code: CodeId, args: &CallArguments) -> VmResult<Value> {
    let thunk = isolate
        .stub_code
        .thunk(code)
        .unwrap_or_else(|| panic!("no native thunk installed for {code:?}"))
        .clone();
    let saved_exit = isolate.top_exit_frame_info;
    let result = thunk(isolate, args);
    isolate.top_exit_frame_info = saved_exit;
    if isolate.flags.deoptimize_alot {
        crate::deopt::deoptimize_all(isolate);
    }
    result
}

/// Invoke a resolved function dynamically with the receiver prepended,
/// compiling it first if needed.
pub fn invoke_dynamic(
    isolate: &mut Isolate,
    function: garnet_runtime::object::function::FunctionId,
    receiver: Value,
    arguments: &[Value],
) -> VmResult<Value> {
    let code = crate::compiler::ensure_compiled(isolate, function)?;
    let mut values = Vec::with_capacity(arguments.len() + 1);
    values.push(receiver);
    values.extend_from_slice(arguments);
    invoke_code(isolate, code, &CallArguments::positional(values))
}

// =============================================================================
// Tests
// =============================================================================
