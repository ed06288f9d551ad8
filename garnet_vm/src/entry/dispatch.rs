//! Call-dispatch runtime entries.
//!
//! The instance-call miss handlers resolve a callee against the receiver's
//! class hierarchy, compile it if necessary and grow the call site's IC.
//! When resolution fails, the megamorphic stub falls through the
//! implicit-closure paths and finally `noSuchMethod`.

use crate::compiler::ensure_compiled;
use crate::entry::{enter, NativeArg, RuntimeArgs, RuntimeEntry};
use crate::exceptions::Exceptions;
use crate::isolate::Isolate;
use crate::patcher::CodePatcher;
use crate::resolver;
use crate::stub::{self, CallArguments};
use garnet_core::error::{GarnetError, VmResult};
use garnet_core::value::Value;
use garnet_runtime::heap::HeapObject;
use garnet_runtime::object::code::CodeId;
use garnet_runtime::object::function::{Function, FunctionId, FunctionKind};
use garnet_runtime::object::icdata::CidVector;
use smallvec::SmallVec;

/// Resolve and compile the target of the instance call at the caller's
/// call site. Only the number of named arguments is checked, not the
/// names. Returns null on resolution failure; the megamorphic stub then
/// handles closures and `noSuchMethod`.
fn resolve_compile_instance_call_target(
    isolate: &mut Isolate,
    receiver: Value,
) -> VmResult<Option<CodeId>> {
    let frame = isolate.top_managed_frame();
    let (name, num_arguments, num_named_arguments, _target) =
        CodePatcher::get_instance_call_at(&isolate.codes, frame.pc);
    let Some(function) =
        resolver::resolve_dynamic(isolate, receiver, &name, num_arguments, num_named_arguments)
    else {
        return Ok(None);
    };
    let code = ensure_compiled(isolate, function)?;
    Ok(Some(code))
}

/// A managed invocation result that is an error gets rethrown.
fn check_result_error(result: VmResult<Value>) -> VmResult<Value> {
    result.map_err(Exceptions::propagate_error)
}

// =============================================================================
// Inline-cache miss handling
// =============================================================================

/// Shared miss path: resolve the callee for the tested argument values and
/// record a check in the call site's IC data.
fn inline_cache_miss_handler(
    isolate: &mut Isolate,
    args: &[Value],
) -> VmResult<Option<FunctionId>> {
    let receiver = args[0];
    let Some(target_code) = resolve_compile_instance_call_target(isolate, receiver)? else {
        // Let the megamorphic stub handle the special cases: noSuchMethod,
        // closure calls.
        if isolate.flags.trace_ic {
            eprintln!(
                "InlineCacheMissHandler null code for receiver of class {:?}",
                isolate.class_of_value(receiver)
            );
        }
        return Ok(None);
    };
    let target_function = isolate.codes.get(target_code).function;
    let frame = isolate.top_managed_frame();
    let ic_id = CodePatcher::get_instance_call_ic_data_at(&isolate.codes, frame.pc);

    if isolate.flags.inline_cache {
        let class_ids: CidVector = args.iter().map(|a| isolate.class_of_value(*a)).collect();
        let ic = isolate.ic_data_mut(ic_id);
        assert_eq!(ic.num_args_tested, args.len());
        if args.len() == 1 {
            ic.add_receiver_check(class_ids[0], target_function);
        } else {
            ic.add_check(class_ids, target_function);
        }
    }

    if isolate.flags.trace_ic_miss_in_optimized {
        if let Some(caller) = isolate.codes.lookup_code(frame.pc) {
            if isolate.codes.get(caller).is_optimized {
                eprintln!(
                    "IC miss in optimized code; call {} -> {}",
                    isolate.qualified_function_name(isolate.codes.get(caller).function),
                    isolate.qualified_function_name(target_function),
                );
            }
        }
    }
    if isolate.flags.trace_ic {
        eprintln!(
            "InlineCacheMissHandler {} call at {:#x} adding class {:?} -> {}",
            args.len(),
            frame.pc,
            isolate.class_of_value(receiver),
            isolate.qualified_function_name(target_function),
        );
    }
    Ok(Some(target_function))
}

fn set_function_return(arguments: &mut RuntimeArgs, function: Option<FunctionId>) {
    match function {
        Some(f) => arguments.set_return(NativeArg::Function(f)),
        None => arguments.set_return_value(Value::null()),
    }
}

/// Handle an inline-cache miss testing the receiver only.
/// Arg0: receiver object.
/// Return value: the resolved target function, or null.
pub const INLINE_CACHE_MISS_HANDLER_ONE_ARG_ENTRY: RuntimeEntry =
    RuntimeEntry::new("InlineCacheMissHandlerOneArg", 1);

/// See [`INLINE_CACHE_MISS_HANDLER_ONE_ARG_ENTRY`].
pub fn inline_cache_miss_handler_one_arg(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &INLINE_CACHE_MISS_HANDLER_ONE_ARG_ENTRY, arguments);
    let receiver = arguments.arg_at(0).as_value();
    let result = inline_cache_miss_handler(isolate, &[receiver])?;
    set_function_return(arguments, result);
    Ok(())
}

/// Handle an inline-cache miss testing the receiver and one argument.
/// Arg0: receiver object.
/// Arg1: argument after the receiver.
/// Return value: the resolved target function, or null.
pub const INLINE_CACHE_MISS_HANDLER_TWO_ARGS_ENTRY: RuntimeEntry =
    RuntimeEntry::new("InlineCacheMissHandlerTwoArgs", 2);

/// See [`INLINE_CACHE_MISS_HANDLER_TWO_ARGS_ENTRY`].
pub fn inline_cache_miss_handler_two_args(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &INLINE_CACHE_MISS_HANDLER_TWO_ARGS_ENTRY, arguments);
    let receiver = arguments.arg_at(0).as_value();
    let other = arguments.arg_at(1).as_value();
    let result = inline_cache_miss_handler(isolate, &[receiver, other])?;
    set_function_return(arguments, result);
    Ok(())
}

/// Handle an inline-cache miss testing the receiver and two arguments.
/// Arg0: receiver object.
/// Arg1: first argument after the receiver.
/// Arg2: second argument after the receiver.
/// Return value: the resolved target function, or null.
pub const INLINE_CACHE_MISS_HANDLER_THREE_ARGS_ENTRY: RuntimeEntry =
    RuntimeEntry::new("InlineCacheMissHandlerThreeArgs", 3);

/// See [`INLINE_CACHE_MISS_HANDLER_THREE_ARGS_ENTRY`].
pub fn inline_cache_miss_handler_three_args(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &INLINE_CACHE_MISS_HANDLER_THREE_ARGS_ENTRY, arguments);
    let receiver = arguments.arg_at(0).as_value();
    let arg1 = arguments.arg_at(1).as_value();
    let arg2 = arguments.arg_at(2).as_value();
    let result = inline_cache_miss_handler(isolate, &[receiver, arg1, arg2])?;
    set_function_return(arguments, result);
    Ok(())
}

/// Update IC data for two arguments. Used by the equality operation when
/// control flow bypasses the regular inline cache (null arguments).
/// Arg0: receiver object.
/// Arg1: argument after the receiver.
/// Arg2: the target's name.
/// Arg3: the IC data.
pub const UPDATE_IC_DATA_TWO_ARGS_ENTRY: RuntimeEntry =
    RuntimeEntry::new("UpdateICDataTwoArgs", 4);

/// See [`UPDATE_IC_DATA_TWO_ARGS_ENTRY`].
pub fn update_ic_data_two_args(isolate: &mut Isolate, arguments: &mut RuntimeArgs) -> VmResult<()> {
    enter(isolate, &UPDATE_IC_DATA_TWO_ARGS_ENTRY, arguments);
    let receiver = arguments.arg_at(0).as_value();
    let arg1 = arguments.arg_at(1).as_value();
    let target_name = arguments.arg_at(2).as_symbol();
    let ic_id = arguments.arg_at(3).as_ic_data();
    let target = resolver::resolve_dynamic(isolate, receiver, &target_name, 2, 0)
        .expect("equality target must resolve");
    let class_ids: CidVector = SmallVec::from_slice(&[
        isolate.class_of_value(receiver),
        isolate.class_of_value(arg1),
    ]);
    let ic = isolate.ic_data_mut(ic_id);
    assert_eq!(ic.num_args_tested, 2);
    ic.add_check(class_ids, target);
    Ok(())
}

/// Resolve an instance function and compile it if necessary.
/// Arg0: receiver object.
/// Return value: the target code, or null when the method cannot be
/// resolved or compiled.
/// Called by the megamorphic stub when the instance call needs no patch.
pub const RESOLVE_COMPILE_INSTANCE_FUNCTION_ENTRY: RuntimeEntry =
    RuntimeEntry::new("ResolveCompileInstanceFunction", 1);

/// See [`RESOLVE_COMPILE_INSTANCE_FUNCTION_ENTRY`].
pub fn resolve_compile_instance_function(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &RESOLVE_COMPILE_INSTANCE_FUNCTION_ENTRY, arguments);
    let receiver = arguments.arg_at(0).as_value();
    match resolve_compile_instance_call_target(isolate, receiver)? {
        Some(code) => arguments.set_return(NativeArg::Code(code)),
        None => arguments.set_return_value(Value::null()),
    }
    Ok(())
}

// =============================================================================
// Implicit closures
// =============================================================================

/// The cached implicit-closure function of `function`, created on first
/// use.
fn implicit_closure_function(isolate: &mut Isolate, function: FunctionId) -> FunctionId {
    if let Some(existing) = isolate.functions.get(function).implicit_closure_function {
        return existing;
    }
    let original = isolate.functions.get(function);
    let mut closure_function =
        Function::dynamic(original.name.clone(), original.owner, original.num_fixed_parameters);
    closure_function.kind = FunctionKind::ImplicitClosure;
    closure_function.num_optional_parameters = original.num_optional_parameters;
    closure_function.named_parameters = original.named_parameters.clone();
    closure_function.parameter_names = original.parameter_names.clone();
    closure_function.parent_function = Some(function);
    let id = isolate.functions.register(closure_function);
    isolate.functions.get_mut(function).implicit_closure_function = Some(id);
    id
}

/// Resolve an implicit closure by checking whether an instance function of
/// the mangled getter's base name exists, and closing over the receiver if
/// so.
/// Arg0: receiver object.
/// Arg1: IC data of the failed call site.
/// Return value: a closure object, or null (no such instance function).
/// Called by the megamorphic stub just before the `noSuchMethod` call.
pub const RESOLVE_IMPLICIT_CLOSURE_FUNCTION_ENTRY: RuntimeEntry =
    RuntimeEntry::new("ResolveImplicitClosureFunction", 2);

/// See [`RESOLVE_IMPLICIT_CLOSURE_FUNCTION_ENTRY`].
pub fn resolve_implicit_closure_function(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &RESOLVE_IMPLICIT_CLOSURE_FUNCTION_ENTRY, arguments);
    let receiver = arguments.arg_at(0).as_value();
    let ic_id = arguments.arg_at(1).as_ic_data();
    let original_name = isolate.ic_data(ic_id).target_name.clone();
    if !original_name.is_getter_name() {
        // Not a getter access, so this cannot be an implicit closure of an
        // instance function.
        arguments.set_return_value(Value::null());
        return Ok(());
    }
    let base_name = isolate.symbols.name_from_getter(&original_name);
    let receiver_class = isolate.class_of_value(receiver);
    let Some(function) = resolver::lookup_dynamic_function(isolate, receiver_class, &base_name)
    else {
        // No function of that name, so this is not a method-as-field
        // access either.
        arguments.set_return_value(Value::null());
        return Ok(());
    };
    let closure_function = implicit_closure_function(isolate, function);
    let context = isolate.heap.new_context(1);
    isolate.heap.set_context_at(context, 0, receiver);
    let type_arguments = if isolate.classes.get(receiver_class).has_type_arguments() {
        receiver
            .as_ref()
            .and_then(|r| isolate.heap.type_arguments_of(r))
    } else {
        None
    };
    let closure = isolate.heap.allocate(HeapObject::Closure {
        function: closure_function,
        context,
        type_arguments,
    });
    arguments.set_return_value(Value::from_ref(closure));
    Ok(())
}

/// Resolve an implicit closure by invoking the getter of the failed name
/// and checking whether it yields a closure.
/// Arg0: receiver object.
/// Arg1: IC data of the failed call site.
/// Return value: a closure object, or null (no getter found). Throws
/// NoSuchMethod when the getter yields a non-closure.
/// Called by the megamorphic stub just before the `noSuchMethod` call.
pub const RESOLVE_IMPLICIT_CLOSURE_THROUGH_GETTER_ENTRY: RuntimeEntry =
    RuntimeEntry::new("ResolveImplicitClosureThroughGetter", 2);

/// See [`RESOLVE_IMPLICIT_CLOSURE_THROUGH_GETTER_ENTRY`].
pub fn resolve_implicit_closure_through_getter(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &RESOLVE_IMPLICIT_CLOSURE_THROUGH_GETTER_ENTRY, arguments);
    let receiver = arguments.arg_at(0).as_value();
    let ic_id = arguments.arg_at(1).as_ic_data();
    let original_name = isolate.ic_data(ic_id).target_name.clone();
    let getter_name = isolate.symbols.getter_name(&original_name);
    let Some(getter) = resolver::resolve_dynamic(isolate, receiver, &getter_name, 1, 0) else {
        // No getter, so this cannot be an implicit closure.
        arguments.set_return_value(Value::null());
        return Ok(());
    };
    let result = match stub::invoke_dynamic(isolate, getter, receiver, &[]) {
        Ok(value) => value,
        // A getter that throws is treated as "no such method".
        Err(GarnetError::Unwind { .. }) => {
            arguments.set_return_value(Value::null());
            return Ok(());
        }
        Err(other) => return Err(Exceptions::propagate_error(other)),
    };
    let is_closure = result
        .as_ref()
        .is_some_and(|r| matches!(isolate.heap.get(r), HeapObject::Closure { .. }))
        || isolate
            .classes
            .get(isolate.class_of_value(result))
            .signature_function
            .is_some();
    if is_closure {
        arguments.set_return_value(result);
        return Ok(());
    }
    // The getter result is not a closure. Throw NoSuchMethod for `call`
    // right away, reporting the parameter names of a differently shaped
    // `call` method if one exists.
    let call = isolate.object_store.symbols.call.clone();
    Err(Exceptions::create_no_such_method(
        isolate,
        result,
        call.as_str(),
        Vec::new(),
    ))
}

/// Invoke an implicit closure function.
/// Arg0: closure object.
/// Arg1: arguments descriptor of the original instance invocation.
/// Arg2: arguments array of the original instance invocation.
/// Return value: result of the invocation.
pub const INVOKE_IMPLICIT_CLOSURE_FUNCTION_ENTRY: RuntimeEntry =
    RuntimeEntry::new("InvokeImplicitClosureFunction", 3);

/// See [`INVOKE_IMPLICIT_CLOSURE_FUNCTION_ENTRY`].
pub fn invoke_implicit_closure_function(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &INVOKE_IMPLICIT_CLOSURE_FUNCTION_ENTRY, arguments);
    let closure = arguments.arg_at(0).as_value();
    let descriptor = arguments.arg_at(1).as_descriptor();
    let call_arguments = arguments.arg_at(2).as_value();

    let closure_ref = closure.as_ref().expect("closure expected");
    let function = match isolate.heap.get(closure_ref) {
        HeapObject::Closure { function, .. } => *function,
        other => panic!("closure expected, found {other:?}"),
    };
    let code = ensure_compiled(isolate, function)?;

    // The closure is passed as the hidden first argument; it may be needed
    // to construct a NoSuchMethodError when the argument count mismatches.
    let elements = match call_arguments.as_ref().map(|r| isolate.heap.get(r)) {
        Some(HeapObject::Array { elements, .. }) => elements.clone(),
        other => panic!("arguments array expected, found {other:?}"),
    };
    let mut values = Vec::with_capacity(elements.len() + 1);
    values.push(closure);
    values.extend_from_slice(&elements);

    let result = stub::invoke_code(
        isolate,
        code,
        &CallArguments {
            descriptor,
            values,
        },
    );
    let result = check_result_error(result)?;
    arguments.set_return_value(result);
    Ok(())
}

/// Invoke the receiver's `noSuchMethod` with an invocation mirror of the
/// failed call.
/// Arg0: receiver.
/// Arg1: IC data of the failed call site.
/// Arg2: original arguments descriptor.
/// Arg3: original arguments array.
/// Return value: result of the `noSuchMethod` invocation.
pub const INVOKE_NO_SUCH_METHOD_FUNCTION_ENTRY: RuntimeEntry =
    RuntimeEntry::new("InvokeNoSuchMethodFunction", 4);

/// See [`INVOKE_NO_SUCH_METHOD_FUNCTION_ENTRY`].
pub fn invoke_no_such_method_function(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &INVOKE_NO_SUCH_METHOD_FUNCTION_ENTRY, arguments);
    let receiver = arguments.arg_at(0).as_value();
    let ic_id = arguments.arg_at(1).as_ic_data();
    let _descriptor = arguments.arg_at(2).as_descriptor();
    let original_arguments = arguments
        .arg_at(3)
        .as_value()
        .as_ref()
        .expect("arguments array expected");

    // Reify the failed call. Named arguments ride in the positional array
    // for now, matching the mirror allocation in the core library.
    let method_name = isolate.ic_data(ic_id).target_name.clone();
    let mirror = isolate.new_invocation_mirror(method_name.as_str(), original_arguments);

    let no_such_method = isolate.object_store.symbols.no_such_method.clone();
    let function = resolver::resolve_dynamic(isolate, receiver, &no_such_method, 2, 0)
        .expect("noSuchMethod must resolve on the Object class");
    let result = stub::invoke_dynamic(isolate, function, receiver, &[Value::from_ref(mirror)]);
    let result = check_result_error(result)?;
    arguments.set_return_value(result);
    Ok(())
}

/// A non-closure object was invoked as a closure; report the failed `call`.
/// Arg0: the non-closure object.
/// Arg1: the arguments array.
/// Return value: none; always throws NoSuchMethod.
pub const REPORT_OBJECT_NOT_CLOSURE_ENTRY: RuntimeEntry =
    RuntimeEntry::new("ReportObjectNotClosure", 2);

/// See [`REPORT_OBJECT_NOT_CLOSURE_ENTRY`].
pub fn report_object_not_closure(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &REPORT_OBJECT_NOT_CLOSURE_ENTRY, arguments);
    let instance = arguments.arg_at(0).as_value();
    let call_arguments = arguments.arg_at(1).as_value();
    let positional = match call_arguments.as_ref().map(|r| isolate.heap.get(r)) {
        Some(HeapObject::Array { elements, .. }) => elements.clone(),
        _ => Vec::new(),
    };
    let call = isolate.object_store.symbols.call.clone();
    Err(Exceptions::create_no_such_method(
        isolate,
        instance,
        call.as_str(),
        positional,
    ))
}

/// A closure object was invoked with incompatible arguments.
/// Return value: none; always throws NoSuchMethod with a placeholder
/// payload (null receiver, empty arguments).
pub const CLOSURE_ARGUMENT_MISMATCH_ENTRY: RuntimeEntry =
    RuntimeEntry::new("ClosureArgumentMismatch", 0);

/// See [`CLOSURE_ARGUMENT_MISMATCH_ENTRY`].
pub fn closure_argument_mismatch(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &CLOSURE_ARGUMENT_MISMATCH_ENTRY, arguments);
    let call = isolate.object_store.symbols.call.clone();
    Err(Exceptions::create_no_such_method(
        isolate,
        Value::null(),
        call.as_str(),
        Vec::new(),
    ))
}

/// Test whether a formal parameter was defined by a passed-in argument.
/// Arg0: formal parameter index.
/// Arg1: formal parameter name.
/// Arg2: arguments descriptor.
/// Return value: true or false.
pub const ARGUMENT_DEFINITION_TEST_ENTRY: RuntimeEntry =
    RuntimeEntry::new("ArgumentDefinitionTest", 3);

/// See [`ARGUMENT_DEFINITION_TEST_ENTRY`].
pub fn argument_definition_test(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &ARGUMENT_DEFINITION_TEST_ENTRY, arguments);
    let parameter_index = arguments.arg_at(0).as_smi();
    let parameter_name = arguments.arg_at(1).as_symbol();
    let descriptor = arguments.arg_at(2).as_descriptor();
    let is_defined = descriptor.defines_parameter(parameter_index as usize, &parameter_name);
    arguments.set_return_value(isolate.object_store.bool_value(is_defined));
    Ok(())
}

// =============================================================================
// Tracing entries
// =============================================================================

/// Log entry into a function.
/// Arg0: the function.
pub const TRACE_FUNCTION_ENTRY_ENTRY: RuntimeEntry = RuntimeEntry::new("TraceFunctionEntry", 1);

/// See [`TRACE_FUNCTION_ENTRY_ENTRY`].
pub fn trace_function_entry(isolate: &mut Isolate, arguments: &mut RuntimeArgs) -> VmResult<()> {
    enter(isolate, &TRACE_FUNCTION_ENTRY_ENTRY, arguments);
    let function = arguments.arg_at(0).as_function();
    eprintln!("> Entering '{}'", isolate.qualified_function_name(function));
    Ok(())
}

/// Log exit from a function.
/// Arg0: the function.
pub const TRACE_FUNCTION_EXIT_ENTRY: RuntimeEntry = RuntimeEntry::new("TraceFunctionExit", 1);

/// See [`TRACE_FUNCTION_EXIT_ENTRY`].
pub fn trace_function_exit(isolate: &mut Isolate, arguments: &mut RuntimeArgs) -> VmResult<()> {
    enter(isolate, &TRACE_FUNCTION_EXIT_ENTRY, arguments);
    let function = arguments.arg_at(0).as_function();
    eprintln!("< Exiting '{}'", isolate.qualified_function_name(function));
    Ok(())
}

/// Log one IC-dispatched call.
/// Arg0: the call site's IC data.
/// Arg1: the calling function.
pub const TRACE_IC_CALL_ENTRY: RuntimeEntry = RuntimeEntry::new("TraceICCall", 2);

/// See [`TRACE_IC_CALL_ENTRY`].
pub fn trace_ic_call(isolate: &mut Isolate, arguments: &mut RuntimeArgs) -> VmResult<()> {
    enter(isolate, &TRACE_IC_CALL_ENTRY, arguments);
    let ic_id = arguments.arg_at(0).as_ic_data();
    let function = arguments.arg_at(1).as_function();
    let frame = isolate.top_managed_frame();
    let ic = isolate.ic_data(ic_id);
    eprintln!(
        "IC call @{:#x}: {:?} cnt:{} nchecks:{} {}{}",
        frame.pc,
        ic_id,
        isolate.functions.get(function).usage_counter,
        ic.number_of_checks(),
        if ic.is_closure_call { "closure " } else { "" },
        isolate.qualified_function_name(function),
    );
    Ok(())
}
