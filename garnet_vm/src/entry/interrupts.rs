//! The stack-overflow entry: overflow detection and the interrupt poll
//! point.
//!
//! Compiled code polls by comparing its stack position against the armed
//! `stack_limit`; raising the limit above the real one forces the poll into
//! this entry, which then dispatches pending interrupts. A genuine
//! overflow takes priority over any interrupt and throws the preallocated
//! exception without allocating.

use crate::entry::{enter, RuntimeArgs, RuntimeEntry};
use crate::exceptions::Exceptions;
use crate::isolate::{InterruptBits, Isolate};
use garnet_core::error::VmResult;
use garnet_core::value::Value;
use garnet_runtime::heap::GcKind;

/// Overflow check and interrupt poll.
/// Return value: none; throws the preallocated stack-overflow exception on
/// a genuine overflow.
pub const STACK_OVERFLOW_ENTRY: RuntimeEntry = RuntimeEntry::new("StackOverflow", 0);

/// See [`STACK_OVERFLOW_ENTRY`].
pub fn stack_overflow(isolate: &mut Isolate, arguments: &mut RuntimeArgs) -> VmResult<()> {
    enter(isolate, &STACK_OVERFLOW_ENTRY, arguments);
    let stack_position = isolate.top_exit_frame_info;

    // If an interrupt arrives together with a stack overflow, the overflow
    // wins: the preallocated exception is thrown without touching the heap.
    if stack_position < isolate.saved_stack_limit {
        let exception = Value::from_ref(isolate.object_store.stack_overflow_exception);
        return Err(Exceptions::throw(exception));
    }

    let interrupt_bits = isolate.get_and_clear_interrupts();
    if interrupt_bits.contains(InterruptBits::STORE_BUFFER) {
        isolate.heap.collect(GcKind::New);
    }
    if interrupt_bits.contains(InterruptBits::MESSAGE) {
        isolate.message_handler.handle_oob_messages();
    }
    if interrupt_bits.contains(InterruptBits::API) {
        isolate.debugger.signal_isolate_interrupted();
        if let Some(mut callback) = isolate.interrupt_callback.take() {
            let keep_running = callback();
            isolate.interrupt_callback = Some(callback);
            if !keep_running {
                unimplemented!("stack unwind on declined API interrupt");
            }
        }
    }
    Ok(())
}
