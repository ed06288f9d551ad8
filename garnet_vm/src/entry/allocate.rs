//! Allocation runtime entries.
//!
//! Object, array, closure and context allocation, plus standalone
//! type-argument instantiation. Every entry installs its result before
//! doing type-argument work, so a GC triggered mid-entry sees the
//! allocation rooted.

use crate::entry::{enter, NativeArg, RuntimeArgs, RuntimeEntry};
use crate::exceptions::Exceptions;
use crate::isolate::Isolate;
use garnet_core::error::VmResult;
use garnet_core::value::Value;
use garnet_runtime::heap::HeapObject;
use garnet_runtime::object::function::FunctionKind;
use garnet_runtime::type_args::TypeArgsId;

/// Allocation of a fixed-length array of a given element type.
/// Arg0: array length.
/// Arg1: array type arguments, i.e. a vector of one type, the element type.
/// Return value: newly allocated array of length arg0.
pub const ALLOCATE_ARRAY_ENTRY: RuntimeEntry = RuntimeEntry::new("AllocateArray", 2);

/// See [`ALLOCATE_ARRAY_ENTRY`].
pub fn allocate_array(isolate: &mut Isolate, arguments: &mut RuntimeArgs) -> VmResult<()> {
    enter(isolate, &ALLOCATE_ARRAY_ENTRY, arguments);
    let length = arguments.arg_at(0).as_smi();
    if length < 0 {
        let message = isolate
            .heap
            .new_string(&format!("RangeError: invalid array length {length}"));
        return Err(Exceptions::throw(Value::from_ref(message)));
    }
    let element_type = arguments.arg_at(1).as_type_args();
    // An array is raw or takes exactly one instantiated type argument.
    if let Some(ta) = element_type {
        assert_eq!(isolate.type_args.len_of(ta), 1);
        assert!(isolate.type_args.is_instantiated(ta));
    }
    let array = isolate.heap.allocate(HeapObject::Array {
        type_arguments: element_type,
        elements: vec![Value::null(); length as usize],
    });
    arguments.set_return_value(Value::from_ref(array));
    Ok(())
}

/// Shared tail of the object-allocation entries: resolve the instance's
/// type arguments from the instantiator per the instantiation rules.
///
/// Returns `(resolved, bounds_instantiator)`.
fn resolve_instance_type_arguments(
    isolate: &mut Isolate,
    type_arguments: Option<TypeArgsId>,
    instantiator: Option<Option<TypeArgsId>>,
) -> (Option<TypeArgsId>, Option<TypeArgsId>) {
    match instantiator {
        // No instantiator: the type arguments are already usable as-is.
        None => {
            if let Some(ta) = type_arguments {
                debug_assert!(isolate.type_args.is_instantiated(ta));
            }
            (type_arguments, None)
        }
        Some(instantiator_args) => {
            let ta = type_arguments.expect("uninstantiated type arguments expected");
            debug_assert!(!isolate.type_args.is_instantiated(ta));
            if let Some(inst) = instantiator_args {
                debug_assert!(isolate.type_args.is_instantiated(inst));
            }
            let resolved = isolate.type_args.instantiate(ta, instantiator_args);
            if let Some(r) = resolved {
                debug_assert!(isolate.type_args.is_instantiated(r));
            }
            (resolved, instantiator_args)
        }
    }
}

/// Allocate a new object.
/// Arg0: class of the object that needs to be allocated.
/// Arg1: type arguments of the object, or null.
/// Arg2: type arguments of the instantiator, or the no-instantiator
/// sentinel.
/// Return value: newly allocated object.
pub const ALLOCATE_OBJECT_ENTRY: RuntimeEntry = RuntimeEntry::new("AllocateObject", 3);

/// See [`ALLOCATE_OBJECT_ENTRY`].
pub fn allocate_object(isolate: &mut Isolate, arguments: &mut RuntimeArgs) -> VmResult<()> {
    enter(isolate, &ALLOCATE_OBJECT_ENTRY, arguments);
    let cls = arguments.arg_at(0).as_class();
    let instance = isolate.heap.allocate(HeapObject::Instance {
        cid: cls,
        type_arguments: None,
        fields: Vec::new(),
    });
    arguments.set_return_value(Value::from_ref(instance));
    if !isolate.classes.get(cls).has_type_arguments() {
        // No type arguments for a non-parameterized class.
        assert!(arguments.arg_at(1).as_type_args().is_none());
        return Ok(());
    }
    let type_arguments = arguments.arg_at(1).as_type_args();
    if let Some(ta) = type_arguments {
        assert_eq!(
            isolate.type_args.len_of(ta),
            isolate.classes.get(cls).num_type_parameters
        );
    }
    let instantiator = arguments.arg_at(2).as_instantiator();
    let (resolved, _) = resolve_instance_type_arguments(isolate, type_arguments, instantiator);
    isolate.heap.set_type_arguments(instance, resolved);
    Ok(())
}

/// Allocate a new object of a generic type and check that the instantiated
/// type arguments are within the declared bounds, or throw a dynamic type
/// error.
/// Arg0: class of the object that needs to be allocated.
/// Arg1: type arguments of the object, or null.
/// Arg2: type arguments of the instantiator, or the no-instantiator
/// sentinel.
/// Return value: newly allocated object.
pub const ALLOCATE_OBJECT_WITH_BOUNDS_CHECK_ENTRY: RuntimeEntry =
    RuntimeEntry::new("AllocateObjectWithBoundsCheck", 3);

/// See [`ALLOCATE_OBJECT_WITH_BOUNDS_CHECK_ENTRY`].
pub fn allocate_object_with_bounds_check(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    assert!(isolate.flags.enable_type_checks);
    enter(isolate, &ALLOCATE_OBJECT_WITH_BOUNDS_CHECK_ENTRY, arguments);
    let cls = arguments.arg_at(0).as_class();
    let instance = isolate.heap.allocate(HeapObject::Instance {
        cid: cls,
        type_arguments: None,
        fields: Vec::new(),
    });
    arguments.set_return_value(Value::from_ref(instance));
    assert!(isolate.classes.get(cls).has_type_arguments());
    let type_arguments = arguments.arg_at(1).as_type_args();
    if let Some(ta) = type_arguments {
        assert_eq!(
            isolate.type_args.len_of(ta),
            isolate.classes.get(cls).num_type_parameters
        );
    }
    let instantiator = arguments.arg_at(2).as_instantiator();
    let (resolved, bounds_instantiator) =
        resolve_instance_type_arguments(isolate, type_arguments, instantiator);
    if let Some(resolved) = resolved {
        debug_assert!(isolate.type_args.is_instantiated(resolved));
        let check = {
            // The bounds check walks classes while reducing vectors in the
            // type-arguments table.
            let Isolate {
                ref mut type_args,
                ref classes,
                ..
            } = *isolate;
            type_args.within_bounds_of(resolved, classes.get(cls), bounds_instantiator, classes)
        };
        if let Err(malformed_message) = check {
            let location = isolate.caller_location();
            let empty = isolate.object_store.symbols.empty.clone();
            return Err(Exceptions::create_type_error(
                location,
                empty.as_str(),
                empty.as_str(),
                empty.as_str(),
                Some(malformed_message),
            ));
        }
    }
    isolate.heap.set_type_arguments(instance, resolved);
    Ok(())
}

/// Instantiate type arguments.
/// Arg0: uninstantiated type arguments.
/// Arg1: instantiator type arguments, or null.
/// Return value: instantiated type arguments.
pub const INSTANTIATE_TYPE_ARGUMENTS_ENTRY: RuntimeEntry =
    RuntimeEntry::new("InstantiateTypeArguments", 2);

/// See [`INSTANTIATE_TYPE_ARGUMENTS_ENTRY`].
pub fn instantiate_type_arguments(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &INSTANTIATE_TYPE_ARGUMENTS_ENTRY, arguments);
    let type_arguments = arguments
        .arg_at(0)
        .as_type_args()
        .expect("uninstantiated type arguments expected");
    let instantiator = arguments.arg_at(1).as_type_args();
    assert!(!isolate.type_args.is_instantiated(type_arguments));
    if let Some(inst) = instantiator {
        assert!(isolate.type_args.is_instantiated(inst));
    }
    let result = isolate.type_args.instantiate(type_arguments, instantiator);
    if let Some(r) = result {
        assert!(isolate.type_args.is_instantiated(r));
    }
    arguments.set_return(NativeArg::TypeArgs(result));
    Ok(())
}

/// Allocate a new closure.
/// Arg0: local closure function.
/// Arg1: type arguments of the closure, or null.
/// Return value: newly allocated closure capturing the current context.
pub const ALLOCATE_CLOSURE_ENTRY: RuntimeEntry = RuntimeEntry::new("AllocateClosure", 2);

/// See [`ALLOCATE_CLOSURE_ENTRY`].
pub fn allocate_closure(isolate: &mut Isolate, arguments: &mut RuntimeArgs) -> VmResult<()> {
    enter(isolate, &ALLOCATE_CLOSURE_ENTRY, arguments);
    let function = arguments.arg_at(0).as_function();
    assert_eq!(isolate.functions.get(function).kind, FunctionKind::Closure);
    let type_arguments = arguments.arg_at(1).as_type_args();
    if let Some(ta) = type_arguments {
        assert!(isolate.type_args.is_instantiated(ta));
    }
    // The current context was saved in the isolate when entering the
    // runtime.
    let context = isolate.top_context;
    let closure = isolate.heap.allocate(HeapObject::Closure {
        function,
        context,
        type_arguments,
    });
    arguments.set_return_value(Value::from_ref(closure));
    Ok(())
}

/// Allocate a new implicit static closure.
/// Arg0: local function.
/// Return value: newly allocated closure capturing the empty context.
pub const ALLOCATE_IMPLICIT_STATIC_CLOSURE_ENTRY: RuntimeEntry =
    RuntimeEntry::new("AllocateImplicitStaticClosure", 1);

/// See [`ALLOCATE_IMPLICIT_STATIC_CLOSURE_ENTRY`].
pub fn allocate_implicit_static_closure(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &ALLOCATE_IMPLICIT_STATIC_CLOSURE_ENTRY, arguments);
    let function = arguments.arg_at(0).as_function();
    {
        let f = isolate.functions.get(function);
        assert_eq!(f.kind, FunctionKind::ImplicitClosure);
        assert!(f.is_static());
    }
    let context = isolate.object_store.empty_context;
    let closure = isolate.heap.allocate(HeapObject::Closure {
        function,
        context,
        type_arguments: None,
    });
    arguments.set_return_value(Value::from_ref(closure));
    Ok(())
}

/// Allocate a new implicit instance closure.
/// Arg0: local function.
/// Arg1: receiver object.
/// Arg2: type arguments of the closure, or null.
/// Return value: newly allocated closure over a one-slot context holding
/// the receiver.
pub const ALLOCATE_IMPLICIT_INSTANCE_CLOSURE_ENTRY: RuntimeEntry =
    RuntimeEntry::new("AllocateImplicitInstanceClosure", 3);

/// See [`ALLOCATE_IMPLICIT_INSTANCE_CLOSURE_ENTRY`].
pub fn allocate_implicit_instance_closure(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &ALLOCATE_IMPLICIT_INSTANCE_CLOSURE_ENTRY, arguments);
    let function = arguments.arg_at(0).as_function();
    assert_eq!(
        isolate.functions.get(function).kind,
        FunctionKind::ImplicitClosure
    );
    let receiver = arguments.arg_at(1).as_value();
    let type_arguments = arguments.arg_at(2).as_type_args();
    if let Some(ta) = type_arguments {
        assert!(isolate.type_args.is_instantiated(ta));
    }
    let context = isolate.heap.new_context(1);
    isolate.heap.set_context_at(context, 0, receiver);
    let closure = isolate.heap.allocate(HeapObject::Closure {
        function,
        context,
        type_arguments,
    });
    arguments.set_return_value(Value::from_ref(closure));
    Ok(())
}

/// Allocate a new context large enough to hold the given number of
/// variables.
/// Arg0: number of variables.
/// Return value: newly allocated context.
pub const ALLOCATE_CONTEXT_ENTRY: RuntimeEntry = RuntimeEntry::new("AllocateContext", 1);

/// See [`ALLOCATE_CONTEXT_ENTRY`].
pub fn allocate_context(isolate: &mut Isolate, arguments: &mut RuntimeArgs) -> VmResult<()> {
    enter(isolate, &ALLOCATE_CONTEXT_ENTRY, arguments);
    let num_variables = arguments.arg_at(0).as_smi();
    assert!(num_variables >= 0);
    let context = isolate.heap.new_context(num_variables as usize);
    arguments.set_return_value(Value::from_ref(context));
    Ok(())
}

/// Make a copy of the given context, including the values of the captured
/// variables.
/// Arg0: the context to be cloned.
/// Return value: newly allocated context.
pub const CLONE_CONTEXT_ENTRY: RuntimeEntry = RuntimeEntry::new("CloneContext", 1);

/// See [`CLONE_CONTEXT_ENTRY`].
pub fn clone_context(isolate: &mut Isolate, arguments: &mut RuntimeArgs) -> VmResult<()> {
    enter(isolate, &CLONE_CONTEXT_ENTRY, arguments);
    let context = arguments
        .arg_at(0)
        .as_value()
        .as_ref()
        .expect("context expected");
    let clone = isolate.heap.clone_context(context);
    arguments.set_return_value(Value::from_ref(clone));
    Ok(())
}
