//! Type-check runtime entries.
//!
//! Instance-of tests, assignability checks, condition-must-be-bool and
//! malformed-type reporting, plus maintenance of the per-site subtype-test
//! caches.

use crate::entry::{enter, RuntimeArgs, RuntimeEntry};
use crate::exceptions::Exceptions;
use crate::isolate::Isolate;
use garnet_core::error::VmResult;
use garnet_core::value::{ObjectRef, Value};
use garnet_runtime::object::subtype_cache::SubtypeCacheId;
use garnet_runtime::type_args::{Type, TypeArgsId};

/// Trace one type check under `trace_type_checks`.
fn print_type_check(isolate: &Isolate, message: &str, value: Value, ty: &Type, result: bool) {
    let frame = isolate.top_managed_frame();
    let value_type_name = isolate.type_name_of_value(value);
    let type_name = ty.user_visible_name(&isolate.classes);
    eprintln!(
        "{message}: '{value_type_name}' {} '{type_name}' (pc: {:#x})",
        if result { "is" } else { "is !" },
        frame.pc,
    );
}

/// Reduce an instance's lazy type-argument wrapper and canonicalize the
/// slot in place. Returns whether the slot changed.
fn optimize_type_arguments(isolate: &mut Isolate, instance: ObjectRef) -> bool {
    let Some(ta) = isolate.heap.type_arguments_of(instance) else {
        return false;
    };
    if isolate.type_args.is_canonical(ta) {
        return false;
    }
    let canonical = isolate.type_args.canonicalize(ta);
    isolate.heap.set_type_arguments(instance, Some(canonical));
    canonical != ta
}

/// The full instance-of test the caches front.
///
/// `Err` carries a malformed-type diagnostic.
fn value_is_instance_of(
    isolate: &mut Isolate,
    value: Value,
    ty: &Type,
    instantiator_type_arguments: Option<TypeArgsId>,
) -> Result<bool, String> {
    let tested = isolate
        .type_args
        .instantiate_type_from(ty, instantiator_type_arguments);
    if let Type::Malformed(message) = &tested {
        return Err(message.to_string());
    }
    let class = isolate.class_of_value(value);
    let value_arguments = value
        .as_ref()
        .and_then(|r| isolate.heap.type_arguments_of(r));
    let value_type = Type::Interface {
        class,
        arguments: value_arguments,
    };
    let Isolate {
        ref mut type_args,
        ref classes,
        ..
    } = *isolate;
    Ok(type_args.is_subtype(&value_type, &tested, classes))
}

/// Record a finished test in the call site's subtype-test cache.
///
/// Skipped entirely when the site has no cache. Entries are admitted only
/// below the per-site cap, only with canonical (never lazy) instantiator
/// type arguments, and only for a new 3-key identity. A duplicate identity
/// can show up after canonicalization; it is tolerated silently.
fn update_type_test_cache(
    isolate: &mut Isolate,
    instance: Value,
    ty: &Type,
    instantiator: Value,
    incoming_instantiator_type_arguments: Option<TypeArgsId>,
    result: bool,
    cache: Option<SubtypeCacheId>,
) {
    let Some(cache) = cache else {
        return;
    };
    let mut instantiator_type_arguments = incoming_instantiator_type_arguments;
    let mut instance_type_arguments = None;

    let instance_class = isolate.class_of_value(instance);
    if let Some(instance_ref) = instance.as_ref() {
        if isolate.classes.get(instance_class).has_type_arguments() {
            optimize_type_arguments(isolate, instance_ref);
            instance_type_arguments = isolate.heap.type_arguments_of(instance_ref);
        }
    }
    if !instantiator.is_null() {
        if let Some(instantiator_ref) = instantiator.as_ref() {
            optimize_type_arguments(isolate, instantiator_ref);
            instantiator_type_arguments = isolate.heap.type_arguments_of(instantiator_ref);
        }
    }

    if isolate.subtype_cache(cache).number_of_checks() >= isolate.flags.max_subtype_cache_entries {
        return;
    }
    if isolate
        .subtype_cache(cache)
        .lookup(
            instance_class,
            instance_type_arguments,
            instantiator_type_arguments,
        )
        .is_some()
    {
        // Can occur when canonicalization merged previously distinct keys.
        if isolate.flags.trace_type_checks {
            print_type_check(isolate, "Duplicate cache entry", instance, ty, result);
        }
        return;
    }
    if let Some(inst) = instantiator_type_arguments {
        if isolate.type_args.is_lazy(inst) {
            return;
        }
    }
    isolate.subtype_cache_mut(cache).add_check(
        instance_class,
        instance_type_arguments,
        instantiator_type_arguments,
        result,
    );
    if isolate.flags.trace_type_checks {
        eprintln!(
            "  Updated test cache {cache:?} with ({instance_class:?}, {instance_type_arguments:?}, {instantiator_type_arguments:?}, {result})"
        );
    }
}

// =============================================================================
// Entries
// =============================================================================

/// Check that the given instance is an instance of the given type.
/// The tested instance may not be null; the null test is inlined.
/// Arg0: instance being checked.
/// Arg1: type.
/// Arg2: instantiator (or null).
/// Arg3: type arguments of the instantiator of the type.
/// Arg4: subtype-test cache (or null).
/// Return value: true or false; may throw a type error for a malformed
/// type.
pub const INSTANCEOF_ENTRY: RuntimeEntry = RuntimeEntry::new("Instanceof", 5);

/// See [`INSTANCEOF_ENTRY`].
pub fn instanceof(isolate: &mut Isolate, arguments: &mut RuntimeArgs) -> VmResult<()> {
    enter(isolate, &INSTANCEOF_ENTRY, arguments);
    let instance = arguments.arg_at(0).as_value();
    let ty = arguments.arg_at(1).as_type();
    let instantiator = arguments.arg_at(2).as_value();
    let instantiator_type_arguments = arguments.arg_at(3).as_type_args();
    let cache = arguments.arg_at(4).as_subtype_cache();

    let outcome = value_is_instance_of(isolate, instance, &ty, instantiator_type_arguments);
    let result = match outcome {
        Ok(result) => result,
        Err(malformed_message) => {
            // Throw a dynamic type error only for a failing test.
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
    };
    if isolate.flags.trace_type_checks {
        print_type_check(isolate, "InstanceOf", instance, &ty, result);
    }
    update_type_test_cache(
        isolate,
        instance,
        &ty,
        instantiator,
        instantiator_type_arguments,
        result,
        cache,
    );
    arguments.set_return_value(isolate.object_store.bool_value(result));
    Ok(())
}

/// Check that the type of the given instance is a subtype of the given
/// type and can therefore be assigned.
/// Arg0: instance being assigned.
/// Arg1: type being assigned to.
/// Arg2: instantiator (or null).
/// Arg3: type arguments of the instantiator of the type being assigned to.
/// Arg4: name of the variable being assigned to.
/// Arg5: subtype-test cache (or null).
/// Return value: the instance if a subtype; throws a TypeError otherwise.
pub const TYPE_CHECK_ENTRY: RuntimeEntry = RuntimeEntry::new("TypeCheck", 6);

/// See [`TYPE_CHECK_ENTRY`].
pub fn type_check(isolate: &mut Isolate, arguments: &mut RuntimeArgs) -> VmResult<()> {
    enter(isolate, &TYPE_CHECK_ENTRY, arguments);
    let src_instance = arguments.arg_at(0).as_value();
    let dst_type = arguments.arg_at(1).as_type();
    let dst_instantiator = arguments.arg_at(2).as_value();
    let instantiator_type_arguments = arguments.arg_at(3).as_type_args();
    let dst_name = arguments.arg_at(4).as_symbol();
    let cache = arguments.arg_at(5).as_subtype_cache();

    assert!(!matches!(dst_type, Type::Dynamic)); // No need to check assignment.
    assert!(!matches!(dst_type, Type::Malformed(_))); // Checked in the compiler.
    assert!(!src_instance.is_null()); // Checked in inlined code.

    let outcome =
        value_is_instance_of(isolate, src_instance, &dst_type, instantiator_type_arguments);
    let (is_instance_of, malformed_message) = match outcome {
        Ok(result) => (result, None),
        Err(message) => (false, Some(message)),
    };
    if isolate.flags.trace_type_checks {
        print_type_check(isolate, "TypeCheck", src_instance, &dst_type, is_instance_of);
    }
    if !is_instance_of {
        let location = isolate.caller_location();
        let src_type_name = isolate.type_name_of_value(src_instance);
        let instantiated_dst = isolate
            .type_args
            .instantiate_type_from(&dst_type, instantiator_type_arguments);
        let dst_type_name = instantiated_dst.user_visible_name(&isolate.classes);
        return Err(Exceptions::create_type_error(
            location,
            src_type_name,
            dst_type_name,
            dst_name.as_str(),
            malformed_message,
        ));
    }
    update_type_test_cache(
        isolate,
        src_instance,
        &dst_type,
        dst_instantiator,
        instantiator_type_arguments,
        true,
        cache,
    );
    arguments.set_return_value(src_instance);
    Ok(())
}

/// Report that the type of the given object is not bool in a conditional
/// context.
/// Arg0: the bad object.
/// Return value: none; always throws a TypeError.
pub const CONDITION_TYPE_ERROR_ENTRY: RuntimeEntry = RuntimeEntry::new("ConditionTypeError", 1);

/// See [`CONDITION_TYPE_ERROR_ENTRY`].
pub fn condition_type_error(isolate: &mut Isolate, arguments: &mut RuntimeArgs) -> VmResult<()> {
    enter(isolate, &CONDITION_TYPE_ERROR_ENTRY, arguments);
    let src_instance = arguments.arg_at(0).as_value();
    assert!(src_instance.is_null() || !isolate.object_store.is_bool(&isolate.heap, src_instance));
    let location = isolate.caller_location();
    let src_type_name = isolate.type_name_of_value(src_instance);
    let bool_type_name = isolate
        .classes
        .get(isolate.object_store.bool_class)
        .name
        .as_str()
        .to_string();
    let expression = isolate.object_store.symbols.boolean_expression.clone();
    Err(Exceptions::create_type_error(
        location,
        src_type_name,
        bool_type_name,
        expression.as_str(),
        None,
    ))
}

/// Report that the type of a type check is malformed.
/// Arg0: the src value.
/// Arg1: the name of the instance being assigned to.
/// Arg2: the malformed-type error message (a string).
/// Return value: none; always throws a TypeError.
pub const MALFORMED_TYPE_ERROR_ENTRY: RuntimeEntry = RuntimeEntry::new("MalformedTypeError", 3);

/// See [`MALFORMED_TYPE_ERROR_ENTRY`].
pub fn malformed_type_error(isolate: &mut Isolate, arguments: &mut RuntimeArgs) -> VmResult<()> {
    enter(isolate, &MALFORMED_TYPE_ERROR_ENTRY, arguments);
    let src_value = arguments.arg_at(0).as_value();
    let dst_name = arguments.arg_at(1).as_symbol();
    let malformed_message = isolate.string_value(arguments.arg_at(2).as_value());
    let location = isolate.caller_location();
    let src_type_name = isolate.type_name_of_value(src_value);
    let malformed = isolate.object_store.symbols.malformed.clone();
    Err(Exceptions::create_type_error(
        location,
        src_type_name,
        malformed.as_str(),
        dst_name.as_str(),
        Some(malformed_message),
    ))
}
