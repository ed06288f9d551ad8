//! The stack-overflow entry: overflow precedence and interrupt dispatch.

mod common;

use common::{run_entry, TestVm};
use garnet_core::error::GarnetError;
use garnet_core::value::Value;
use garnet_vm::entry::interrupts;
use garnet_vm::isolate::InterruptBits;

#[test]
fn test_genuine_overflow_throws_preallocated_exception() {
    let mut vm = TestVm::new();
    // Stack position below the limit: a genuine overflow.
    vm.isolate.top_exit_frame_info = 10;
    vm.isolate.saved_stack_limit = 1000;

    let err = run_entry(&mut vm.isolate, interrupts::stack_overflow, vec![]).unwrap_err();
    match err {
        GarnetError::Unwind { exception, .. } => {
            assert_eq!(
                exception,
                Value::from_ref(vm.isolate.object_store.stack_overflow_exception)
            );
        }
        other => panic!("unexpected {other:?}"),
    }
    // No allocation happened for the throw.
    // (The preallocated instance came from bootstrap.)
}

#[test]
fn test_overflow_takes_priority_over_pending_message() {
    let mut vm = TestVm::new();
    vm.isolate.top_exit_frame_info = 10;
    vm.isolate.saved_stack_limit = 1000;
    vm.isolate.message_handler.post_oob_message();
    vm.isolate.schedule_interrupts(InterruptBits::MESSAGE);

    let err = run_entry(&mut vm.isolate, interrupts::stack_overflow, vec![]).unwrap_err();
    assert!(err.is_unwind());
    // Messages were not drained and the interrupt is still pending.
    assert_eq!(vm.isolate.message_handler.pending_oob_messages(), 1);
    assert_eq!(vm.isolate.message_handler.handled_oob_messages(), 0);
    assert!(vm
        .isolate
        .get_and_clear_interrupts()
        .contains(InterruptBits::MESSAGE));
}

#[test]
fn test_store_buffer_interrupt_requests_minor_collection() {
    let mut vm = TestVm::new();
    vm.isolate.top_exit_frame_info = 5000;
    vm.isolate.schedule_interrupts(InterruptBits::STORE_BUFFER);

    run_entry(&mut vm.isolate, interrupts::stack_overflow, vec![]).unwrap();
    assert_eq!(vm.isolate.heap.new_space_collections(), 1);
    assert!(vm.isolate.get_and_clear_interrupts().is_empty());
}

#[test]
fn test_message_interrupt_drains_oob_messages() {
    let mut vm = TestVm::new();
    vm.isolate.top_exit_frame_info = 5000;
    vm.isolate.message_handler.post_oob_message();
    vm.isolate.message_handler.post_oob_message();
    vm.isolate.schedule_interrupts(InterruptBits::MESSAGE);

    run_entry(&mut vm.isolate, interrupts::stack_overflow, vec![]).unwrap();
    assert_eq!(vm.isolate.message_handler.pending_oob_messages(), 0);
    assert_eq!(vm.isolate.message_handler.handled_oob_messages(), 2);
}

#[test]
fn test_api_interrupt_invokes_callback_and_signals_debugger() {
    let mut vm = TestVm::new();
    vm.isolate.top_exit_frame_info = 5000;
    vm.isolate.interrupt_callback = Some(Box::new(|| true));
    vm.isolate.schedule_interrupts(InterruptBits::API);

    run_entry(&mut vm.isolate, interrupts::stack_overflow, vec![]).unwrap();
    assert_eq!(vm.isolate.debugger.isolate_interrupted_events(), 1);
    // The callback asked to keep running.
    assert!(vm.isolate.interrupt_callback.is_some());
}

#[test]
#[should_panic(expected = "not implemented")]
fn test_api_interrupt_declined_is_unimplemented() {
    let mut vm = TestVm::new();
    vm.isolate.top_exit_frame_info = 5000;
    vm.isolate.interrupt_callback = Some(Box::new(|| false));
    vm.isolate.schedule_interrupts(InterruptBits::API);
    let _ = run_entry(&mut vm.isolate, interrupts::stack_overflow, vec![]);
}

#[test]
fn test_all_interrupts_dispatch_in_priority_order() {
    let mut vm = TestVm::new();
    vm.isolate.top_exit_frame_info = 5000;
    vm.isolate.message_handler.post_oob_message();
    vm.isolate.interrupt_callback = Some(Box::new(|| true));
    vm.isolate.schedule_interrupts(
        InterruptBits::STORE_BUFFER | InterruptBits::MESSAGE | InterruptBits::API,
    );

    run_entry(&mut vm.isolate, interrupts::stack_overflow, vec![]).unwrap();
    assert_eq!(vm.isolate.heap.new_space_collections(), 1);
    assert_eq!(vm.isolate.message_handler.pending_oob_messages(), 0);
    assert_eq!(vm.isolate.debugger.isolate_interrupted_events(), 1);
}
