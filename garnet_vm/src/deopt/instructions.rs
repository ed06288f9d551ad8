//! Execution of deopt-info instructions.
//!
//! Each instruction produces the value of one target slot of the
//! unoptimized frame from the register copies, the optimized-frame copy or
//! the optimized code's constants pool. Instructions that need a boxed
//! double or int64 write a placeholder and enqueue a deferred box; the
//! fill phase must not allocate on the managed heap.

use crate::deopt::context::{DeferredDouble, DeferredInt64, DeoptContext};
use crate::isolate::Isolate;
use garnet_core::value::{RawWord, Value};
use garnet_runtime::object::code::{Address, DeoptInstr};

/// Execute one translation instruction, writing target slot `to_index`.
pub fn execute(
    isolate: &mut Isolate,
    context: &mut DeoptContext,
    instruction: &DeoptInstr,
    to_index: usize,
) {
    let to_address = context.to_address(to_index);
    let word: RawWord = match *instruction {
        DeoptInstr::Constant { object_table_index } => isolate
            .codes
            .get(context.code)
            .constant_at(object_table_index)
            .as_value()
            .raw(),
        DeoptInstr::Register { reg } => context.cpu_registers[reg],
        DeoptInstr::FpuRegister { reg } => {
            isolate.deferred_doubles.push(DeferredDouble {
                slot: to_address,
                value: context.fpu_registers[reg],
            });
            Value::smi(0).raw()
        }
        DeoptInstr::Int64Register { reg } => {
            let payload = context.cpu_registers[reg];
            if Value::is_smi_value(payload) {
                Value::smi(payload).raw()
            } else {
                isolate.deferred_int64s.push(DeferredInt64 {
                    slot: to_address,
                    value: payload,
                });
                Value::smi(0).raw()
            }
        }
        DeoptInstr::StackSlot { slot } => context.frame_copy[slot],
        DeoptInstr::DoubleStackSlot { slot } => {
            isolate.deferred_doubles.push(DeferredDouble {
                slot: to_address,
                value: f64::from_bits(context.frame_copy[slot] as u64),
            });
            Value::smi(0).raw()
        }
        DeoptInstr::Int64StackSlot { slot } => {
            let payload = context.frame_copy[slot];
            if Value::is_smi_value(payload) {
                Value::smi(payload).raw()
            } else {
                isolate.deferred_int64s.push(DeferredInt64 {
                    slot: to_address,
                    value: payload,
                });
                Value::smi(0).raw()
            }
        }
        DeoptInstr::PcMarker { object_table_index } => {
            let code = isolate
                .codes
                .get(context.code)
                .constant_at(object_table_index)
                .as_code();
            isolate.codes.get(code).entry_point as RawWord
        }
        DeoptInstr::CallerFp => {
            let fp = context.from_fp();
            context.set_caller_fp(fp as Address);
            fp
        }
        DeoptInstr::CallerPc => context.from_pc(),
        DeoptInstr::RetAddress {
            object_table_index,
            pc_offset,
        } => {
            let unoptimized = isolate
                .codes
                .get(context.code)
                .constant_at(object_table_index)
                .as_code();
            // The frame is committed to re-entering unoptimized code.
            let function = isolate.codes.get(unoptimized).function;
            isolate.functions.get_mut(function).deoptimization_counter += 1;
            (isolate.codes.get(unoptimized).entry_point + pc_offset) as RawWord
        }
    };
    isolate.stack.write(to_address, word);
    if isolate.flags.trace_deoptimization_verbose {
        eprintln!("*{to_index}. [{to_address:#x}] {word:#014x} [{instruction:?}]");
    }
}

// =============================================================================
// Tests
// =============================================================================
