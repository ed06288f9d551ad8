//! Instance-call dispatch: IC warm-up, megamorphic fallbacks, implicit
//! closures and noSuchMethod.

mod common;

use common::{null_thunk, run_entry, smi_thunk, TestVm};
use garnet_core::error::GarnetError;
use garnet_core::value::Value;
use garnet_runtime::arguments::ArgumentsDescriptor;
use garnet_runtime::heap::HeapObject;
use garnet_runtime::object::function::FunctionKind;
use garnet_runtime::object::icdata::ICData;
use garnet_vm::entry::{dispatch, NativeArg};
use garnet_vm::patcher::CodePatcher;

#[test]
fn test_monomorphic_ic_warm_up() {
    let mut vm = TestVm::new();
    let object = vm.isolate.object_store.object_class;
    // f(receiver): defined on Object so any receiver resolves.
    let f = vm.define_method(object, "f", 1, smi_thunk(1));
    let (_caller, code, pc) = vm.define_instance_call_site("f", 1, 1);
    vm.push_call_frames(code, 1);

    // First call misses and records (Smi -> f).
    let result = run_entry(
        &mut vm.isolate,
        dispatch::inline_cache_miss_handler_one_arg,
        vec![NativeArg::Value(Value::smi(1))],
    )
    .unwrap();
    assert_eq!(result.returned_function(), Some(f));

    let ic_id = CodePatcher::get_instance_call_ic_data_at(&vm.isolate.codes, pc);
    let smi_class = vm.isolate.object_store.smi_class;
    {
        let ic = vm.isolate.ic_data(ic_id);
        assert_eq!(ic.number_of_checks(), 1);
        assert_eq!(ic.get_check(0).class_ids.as_slice(), &[smi_class]);
        assert_eq!(ic.get_check(0).target, f);
        // The second call with a Smi receiver hits inline: the IC resolves
        // it without the miss handler.
        assert_eq!(ic.lookup(&[smi_class]), Some(f));
    }

    // Third call with a Double receiver adds a second check.
    let double_receiver = vm.double_value(1.5);
    let result = run_entry(
        &mut vm.isolate,
        dispatch::inline_cache_miss_handler_one_arg,
        vec![NativeArg::Value(double_receiver)],
    )
    .unwrap();
    assert_eq!(result.returned_function(), Some(f));
    let double_class = vm.isolate.object_store.double_class;
    let ic = vm.isolate.ic_data(ic_id);
    assert_eq!(ic.number_of_checks(), 2);
    assert_eq!(ic.get_check(0).class_ids.as_slice(), &[smi_class]);
    assert_eq!(ic.get_check(1).class_ids.as_slice(), &[double_class]);
    assert_eq!(ic.get_check(1).target, f);
}

#[test]
fn test_two_arg_ic_miss_records_vector() {
    let mut vm = TestVm::new();
    let object = vm.isolate.object_store.object_class;
    let eq = vm.define_method(object, "==", 2, smi_thunk(0));
    let (_caller, code, pc) = vm.define_instance_call_site("==", 2, 2);
    vm.push_call_frames(code, 1);

    let double_arg = vm.double_value(2.0);
    let result = run_entry(
        &mut vm.isolate,
        dispatch::inline_cache_miss_handler_two_args,
        vec![
            NativeArg::Value(Value::smi(3)),
            NativeArg::Value(double_arg),
        ],
    )
    .unwrap();
    assert_eq!(result.returned_function(), Some(eq));

    let ic_id = CodePatcher::get_instance_call_ic_data_at(&vm.isolate.codes, pc);
    let ic = vm.isolate.ic_data(ic_id);
    assert_eq!(ic.num_args_tested, 2);
    assert_eq!(
        ic.get_check(0).class_ids.as_slice(),
        &[
            vm.isolate.object_store.smi_class,
            vm.isolate.object_store.double_class
        ]
    );
}

#[test]
fn test_unresolved_miss_returns_null_and_leaves_ic_alone() {
    let mut vm = TestVm::new();
    let (_caller, code, pc) = vm.define_instance_call_site("bogus", 1, 1);
    vm.push_call_frames(code, 1);

    let result = run_entry(
        &mut vm.isolate,
        dispatch::inline_cache_miss_handler_one_arg,
        vec![NativeArg::Value(Value::smi(1))],
    )
    .unwrap();
    assert_eq!(result.returned_function(), None);
    let ic_id = CodePatcher::get_instance_call_ic_data_at(&vm.isolate.codes, pc);
    assert_eq!(vm.isolate.ic_data(ic_id).number_of_checks(), 0);
}

#[test]
fn test_resolve_compile_instance_function_returns_code() {
    let mut vm = TestVm::new();
    let object = vm.isolate.object_store.object_class;
    let f = vm.define_method(object, "f", 1, smi_thunk(1));
    let (_caller, code, _pc) = vm.define_instance_call_site("f", 1, 1);
    vm.push_call_frames(code, 1);

    let result = run_entry(
        &mut vm.isolate,
        dispatch::resolve_compile_instance_function,
        vec![NativeArg::Value(Value::smi(4))],
    )
    .unwrap();
    let target_code = result.returned_code().unwrap();
    assert_eq!(vm.isolate.codes.get(target_code).function, f);
    assert_eq!(vm.isolate.functions.get(f).current_code, Some(target_code));
}

#[test]
fn test_no_such_method_reports_similar_arity_hint() {
    let mut vm = TestVm::new();
    let c = vm.define_class("C", None);
    // bogus(this, a, b, c): arity 4 with the receiver.
    vm.define_method_with_parameters(c, "bogus", &["this", "a", "b", "c"], null_thunk());
    let receiver = vm.instance_of(c);

    // o.bogus(1, 2) resolves nowhere (wrong arity), so the megamorphic stub
    // ends at the noSuchMethod invocation.
    let bogus = vm.isolate.symbols.intern("bogus");
    assert!(garnet_vm::resolver::resolve_dynamic(&vm.isolate, receiver, &bogus, 3, 0).is_none());

    let ic = vm.isolate.register_ic_data(ICData::new(bogus, 1));
    let args = vm.arguments_array(&[receiver, Value::smi(1), Value::smi(2)]);
    let err = run_entry(
        &mut vm.isolate,
        dispatch::invoke_no_such_method_function,
        vec![
            NativeArg::Value(receiver),
            NativeArg::IcData(ic),
            NativeArg::Descriptor(ArgumentsDescriptor::positional(3)),
            NativeArg::Value(args),
        ],
    )
    .unwrap_err();

    match err {
        GarnetError::NoSuchMethod(info) => {
            assert_eq!(info.method_name, "bogus");
            assert_eq!(info.positional_arguments.len(), 3);
            assert_eq!(
                info.similar_parameter_names,
                Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
            );
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_overridden_no_such_method_gets_invoked() {
    let mut vm = TestVm::new();
    let c = vm.define_class("C", None);
    // C.noSuchMethod(this, mirror) returns 42 instead of throwing.
    vm.define_method(c, "noSuchMethod", 2, smi_thunk(42));
    let receiver = vm.instance_of(c);
    let name = vm.isolate.symbols.intern("missing");
    let ic = vm.isolate.register_ic_data(ICData::new(name, 1));
    let args = vm.arguments_array(&[receiver]);

    let result = run_entry(
        &mut vm.isolate,
        dispatch::invoke_no_such_method_function,
        vec![
            NativeArg::Value(receiver),
            NativeArg::IcData(ic),
            NativeArg::Descriptor(ArgumentsDescriptor::positional(1)),
            NativeArg::Value(args),
        ],
    )
    .unwrap();
    assert_eq!(result.returned_value().as_smi(), Some(42));
}

// =============================================================================
// Implicit closures
// =============================================================================

#[test]
fn test_resolve_implicit_closure_function_closes_over_receiver() {
    let mut vm = TestVm::new();
    let c = vm.define_class("C", None);
    let m = vm.define_method(c, "m", 1, smi_thunk(7));
    let receiver = vm.instance_of(c);

    // The failed site was a getter access: `o.m` mangled to `get:m`.
    let base = vm.isolate.symbols.intern("m");
    let getter_name = vm.isolate.symbols.getter_name(&base);
    let ic = vm.isolate.register_ic_data(ICData::new(getter_name, 1));

    let result = run_entry(
        &mut vm.isolate,
        dispatch::resolve_implicit_closure_function,
        vec![NativeArg::Value(receiver), NativeArg::IcData(ic)],
    )
    .unwrap();
    let closure = result.returned_value().as_ref().unwrap();
    match vm.isolate.heap.get(closure) {
        HeapObject::Closure {
            function, context, ..
        } => {
            let implicit = vm.isolate.functions.get(*function);
            assert_eq!(implicit.kind, FunctionKind::ImplicitClosure);
            assert_eq!(implicit.parent_function, Some(m));
            assert_eq!(vm.isolate.heap.context_at(*context, 0), receiver);
        }
        other => panic!("unexpected {other:?}"),
    }

    // The implicit closure function is cached on the original.
    assert!(vm
        .isolate
        .functions
        .get(m)
        .implicit_closure_function
        .is_some());
}

#[test]
fn test_resolve_implicit_closure_function_rejects_non_getter() {
    let mut vm = TestVm::new();
    let c = vm.define_class("C", None);
    vm.define_method(c, "m", 1, smi_thunk(7));
    let receiver = vm.instance_of(c);
    let plain = vm.isolate.symbols.intern("m");
    let ic = vm.isolate.register_ic_data(ICData::new(plain, 1));

    let result = run_entry(
        &mut vm.isolate,
        dispatch::resolve_implicit_closure_function,
        vec![NativeArg::Value(receiver), NativeArg::IcData(ic)],
    )
    .unwrap();
    assert!(result.returned_value().is_null());
}

#[test]
fn test_resolve_through_getter_returns_closure_result() {
    let mut vm = TestVm::new();
    let c = vm.define_class("C", None);
    // Some closure function for the getter to hand back.
    let closure_body = vm.define_method(c, "body", 1, smi_thunk(9));
    vm.isolate.functions.get_mut(closure_body).kind = FunctionKind::Closure;
    let empty_context = vm.isolate.object_store.empty_context;
    let getter_thunk: garnet_vm::stub::NativeThunk =
        std::sync::Arc::new(move |isolate, _args| {
            let closure = isolate.heap.allocate(HeapObject::Closure {
                function: closure_body,
                context: empty_context,
                type_arguments: None,
            });
            Ok(Value::from_ref(closure))
        });
    vm.define_getter(c, "g", getter_thunk);
    let receiver = vm.instance_of(c);
    let g = vm.isolate.symbols.intern("g");
    let ic = vm.isolate.register_ic_data(ICData::new(g, 1));

    let result = run_entry(
        &mut vm.isolate,
        dispatch::resolve_implicit_closure_through_getter,
        vec![NativeArg::Value(receiver), NativeArg::IcData(ic)],
    )
    .unwrap();
    let closure = result.returned_value().as_ref().unwrap();
    assert!(matches!(
        vm.isolate.heap.get(closure),
        HeapObject::Closure { .. }
    ));
}

#[test]
fn test_resolve_through_getter_swallows_getter_throw() {
    let mut vm = TestVm::new();
    let c = vm.define_class("C", None);
    let throwing: garnet_vm::stub::NativeThunk = std::sync::Arc::new(|_, _| {
        Err(garnet_vm::Exceptions::throw(Value::smi(13)))
    });
    vm.define_getter(c, "g", throwing);
    let receiver = vm.instance_of(c);
    let g = vm.isolate.symbols.intern("g");
    let ic = vm.isolate.register_ic_data(ICData::new(g, 1));

    // A throwing getter is treated as "no such method": null, no error.
    let result = run_entry(
        &mut vm.isolate,
        dispatch::resolve_implicit_closure_through_getter,
        vec![NativeArg::Value(receiver), NativeArg::IcData(ic)],
    )
    .unwrap();
    assert!(result.returned_value().is_null());
}

#[test]
fn test_resolve_through_getter_non_closure_throws_no_such_method() {
    let mut vm = TestVm::new();
    let c = vm.define_class("C", None);
    vm.define_getter(c, "g", smi_thunk(5));
    let receiver = vm.instance_of(c);
    let g = vm.isolate.symbols.intern("g");
    let ic = vm.isolate.register_ic_data(ICData::new(g, 1));

    let err = run_entry(
        &mut vm.isolate,
        dispatch::resolve_implicit_closure_through_getter,
        vec![NativeArg::Value(receiver), NativeArg::IcData(ic)],
    )
    .unwrap_err();
    match err {
        GarnetError::NoSuchMethod(info) => assert_eq!(info.method_name, "call"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_invoke_implicit_closure_function_passes_closure_first() {
    let mut vm = TestVm::new();
    let c = vm.define_class("C", None);
    // The body sees the closure itself as its hidden first argument.
    let body: garnet_vm::stub::NativeThunk = std::sync::Arc::new(|isolate, args| {
        let closure = args.values[0];
        assert!(matches!(
            isolate.heap.get(closure.as_ref().unwrap()),
            HeapObject::Closure { .. }
        ));
        Ok(args.values[1])
    });
    let function = vm.define_method(c, "body", 2, body);
    vm.isolate.functions.get_mut(function).kind = FunctionKind::Closure;
    let empty_context = vm.isolate.object_store.empty_context;
    let closure = vm.isolate.heap.allocate(HeapObject::Closure {
        function,
        context: empty_context,
        type_arguments: None,
    });
    let args = vm.arguments_array(&[Value::smi(31)]);

    let result = run_entry(
        &mut vm.isolate,
        dispatch::invoke_implicit_closure_function,
        vec![
            NativeArg::Value(Value::from_ref(closure)),
            NativeArg::Descriptor(ArgumentsDescriptor::positional(2)),
            NativeArg::Value(args),
        ],
    )
    .unwrap();
    assert_eq!(result.returned_value().as_smi(), Some(31));
}

// =============================================================================
// Remaining dispatch entries
// =============================================================================

#[test]
fn test_update_ic_data_two_args() {
    let mut vm = TestVm::new();
    let object = vm.isolate.object_store.object_class;
    let eq = vm.define_method(object, "==", 2, smi_thunk(0));
    let name = vm.isolate.symbols.intern("==");
    let ic = vm.isolate.register_ic_data(ICData::new(name.clone(), 2));

    run_entry(
        &mut vm.isolate,
        dispatch::update_ic_data_two_args,
        vec![
            NativeArg::Value(Value::smi(1)),
            NativeArg::Value(Value::null()),
            NativeArg::Symbol(name),
            NativeArg::IcData(ic),
        ],
    )
    .unwrap();

    let record = vm.isolate.ic_data(ic);
    assert_eq!(record.number_of_checks(), 1);
    assert_eq!(record.get_check(0).target, eq);
    assert_eq!(
        record.get_check(0).class_ids.as_slice(),
        &[
            vm.isolate.object_store.smi_class,
            vm.isolate.object_store.null_class
        ]
    );
}

#[test]
fn test_argument_definition_test_scans_descriptor() {
    let mut vm = TestVm::new();
    let x = vm.isolate.symbols.intern("x");
    let y = vm.isolate.symbols.intern("y");
    let descriptor = ArgumentsDescriptor::with_named(1, vec![x.clone()]);

    // Defined positionally.
    let result = run_entry(
        &mut vm.isolate,
        dispatch::argument_definition_test,
        vec![
            NativeArg::Value(Value::smi(0)),
            NativeArg::Symbol(y.clone()),
            NativeArg::Descriptor(descriptor.clone()),
        ],
    )
    .unwrap();
    assert_eq!(result.returned_value(), vm.isolate.object_store.bool_value(true));

    // Defined by name.
    let result = run_entry(
        &mut vm.isolate,
        dispatch::argument_definition_test,
        vec![
            NativeArg::Value(Value::smi(5)),
            NativeArg::Symbol(x),
            NativeArg::Descriptor(descriptor.clone()),
        ],
    )
    .unwrap();
    assert_eq!(result.returned_value(), vm.isolate.object_store.bool_value(true));

    // Not defined at all.
    let result = run_entry(
        &mut vm.isolate,
        dispatch::argument_definition_test,
        vec![
            NativeArg::Value(Value::smi(5)),
            NativeArg::Symbol(y),
            NativeArg::Descriptor(descriptor),
        ],
    )
    .unwrap();
    assert_eq!(
        result.returned_value(),
        vm.isolate.object_store.bool_value(false)
    );
}

#[test]
fn test_report_object_not_closure() {
    let mut vm = TestVm::new();
    let args = vm.arguments_array(&[Value::smi(1)]);
    let err = run_entry(
        &mut vm.isolate,
        dispatch::report_object_not_closure,
        vec![NativeArg::Value(Value::smi(99)), NativeArg::Value(args)],
    )
    .unwrap_err();
    match err {
        GarnetError::NoSuchMethod(info) => {
            assert_eq!(info.method_name, "call");
            assert_eq!(info.positional_arguments, vec![Value::smi(1)]);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_closure_argument_mismatch_placeholder_payload() {
    let mut vm = TestVm::new();
    let err = run_entry(&mut vm.isolate, dispatch::closure_argument_mismatch, vec![])
        .unwrap_err();
    match err {
        GarnetError::NoSuchMethod(info) => {
            assert_eq!(info.method_name, "call");
            assert!(info.receiver.is_null());
            assert!(info.positional_arguments.is_empty());
        }
        other => panic!("unexpected {other:?}"),
    }
}
