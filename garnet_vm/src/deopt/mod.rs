//! The deoptimizer.
//!
//! Transfers an executing optimized frame back to an equivalent
//! unoptimized frame when a speculative assumption fails. The transfer
//! runs as three entries back to back:
//!
//! 1. **Copy** (leaf, no heap allocation): snapshot the saved registers and
//!    the optimized frame into isolate-owned scratch buffers and report the
//!    unoptimized frame's size so the stub can grow the stack.
//! 2. **Fill** (leaf, no heap allocation): execute the frame's deopt-info
//!    instruction list in reverse target order, writing each slot of the
//!    unoptimized frame; boxing is deferred.
//! 3. **Materialize** (full): allocate the deferred boxes and patch their
//!    slots. The only step where collection may run.
//!
//! `deoptimize_all` handles eager invalidation: every optimized frame on
//! the stack gets the lazy-deopt stub spliced into its return site and its
//! code is marked dead.

pub mod context;
pub mod instructions;

use crate::entry::{enter, RuntimeArgs, RuntimeEntry};
use crate::isolate::Isolate;
use crate::patcher::CodePatcher;
use crate::stack::{ManagedFrameIterator, NUM_CPU_REGISTERS, NUM_FPU_REGISTERS};
use crate::stub::LAZY_DEOPT_STUB;
use context::DeoptContext;
use garnet_core::error::VmResult;
use garnet_core::value::{RawWord, Value, WORD_SIZE};
use garnet_runtime::object::class::ClassId;
use garnet_runtime::object::code::{Address, CodeId, DeoptInfo, DeoptReason};

/// Copy-frame leaf entry declaration.
pub const DEOPTIMIZE_COPY_FRAME_ENTRY: RuntimeEntry =
    RuntimeEntry::leaf("DeoptimizeCopyFrame", 1);

/// Fill-frame leaf entry declaration.
pub const DEOPTIMIZE_FILL_FRAME_ENTRY: RuntimeEntry =
    RuntimeEntry::leaf("DeoptimizeFillFrame", 1);

/// Materialization entry declaration.
pub const DEOPTIMIZE_MATERIALIZE_DOUBLES_ENTRY: RuntimeEntry =
    RuntimeEntry::new("DeoptimizeMaterializeDoubles", 0);

// =============================================================================
// Eager invalidation
// =============================================================================

/// Deoptimize one optimized frame lazily: splice the lazy-deopt stub into
/// its return site and abandon its code.
fn deoptimize_at(isolate: &mut Isolate, optimized_code: CodeId, pc: Address) {
    assert!(
        isolate.codes.get(optimized_code).deopt_info_at(pc).is_some(),
        "no deopt info at {pc:#x}"
    );
    let function = isolate.codes.get(optimized_code).function;
    // The switch to unoptimized code may have already occurred.
    if isolate.functions.get(function).current_code == Some(optimized_code) {
        let unoptimized = isolate
            .functions
            .get(function)
            .unoptimized_code
            .expect("optimized function without unoptimized fallback");
        isolate.functions.get_mut(function).current_code = Some(unoptimized);
    }
    // Lazy deoptimization is rare; splicing the same site twice is fine.
    CodePatcher::insert_call_at(&mut isolate.codes, pc, LAZY_DEOPT_STUB);
    // Dead code: the collector may release its embedded objects.
    isolate.codes.get_mut(optimized_code).is_alive = false;
}

/// Walk the stack and lazily deoptimize every optimized frame.
pub fn deoptimize_all(isolate: &mut Isolate) {
    let mut targets = Vec::new();
    {
        let mut frames =
            ManagedFrameIterator::from_fp(&isolate.stack, isolate.top_exit_frame_info);
        while let Some(frame) = frames.next_frame() {
            if let Some(code) = frame.lookup_code(&isolate.codes) {
                if isolate.codes.get(code).is_optimized {
                    targets.push((code, frame.pc));
                }
            }
        }
    }
    for (code, pc) in targets {
        deoptimize_at(isolate, code, pc);
    }
}

/// Walk the stack and lazily deoptimize optimized frames whose function's
/// owning class is in `classes`.
pub fn deoptimize_if_owner(isolate: &mut Isolate, classes: &[ClassId]) {
    let mut targets = Vec::new();
    {
        let mut frames =
            ManagedFrameIterator::from_fp(&isolate.stack, isolate.top_exit_frame_info);
        while let Some(frame) = frames.next_frame() {
            if let Some(code) = frame.lookup_code(&isolate.codes) {
                if isolate.codes.get(code).is_optimized {
                    let owner = isolate
                        .functions
                        .get(isolate.codes.get(code).function)
                        .owner;
                    if classes.contains(&owner) {
                        targets.push((code, frame.pc));
                    }
                }
            }
        }
    }
    for (code, pc) in targets {
        deoptimize_at(isolate, code, pc);
    }
}

// =============================================================================
// Phase 1: copy
// =============================================================================

/// Number of words the stub pushes below the optimized frame to save all
/// registers: FPU block first, CPU block above it.
pub const SAVED_REGISTERS_SIZE: usize = NUM_CPU_REGISTERS + NUM_FPU_REGISTERS;

/// Snapshot the saved registers into the isolate's scratch buffers.
fn copy_saved_registers(isolate: &mut Isolate, saved_registers_address: Address) {
    let mut fpu = Box::new([0.0f64; NUM_FPU_REGISTERS]);
    for (i, slot) in fpu.iter_mut().enumerate() {
        *slot = f64::from_bits(isolate.stack.read(saved_registers_address + i) as u64);
    }
    isolate.deopt_fpu_registers_copy = Some(fpu);

    let mut cpu = Box::new([0 as RawWord; NUM_CPU_REGISTERS]);
    for (i, slot) in cpu.iter_mut().enumerate() {
        *slot = isolate
            .stack
            .read(saved_registers_address + NUM_FPU_REGISTERS + i);
    }
    isolate.deopt_cpu_registers_copy = Some(cpu);
}

/// How many incoming arguments the frame copy carries: none when the
/// function has optional parameters (those are materialized inside the
/// frame at entry).
fn copied_argument_count(isolate: &Isolate, code: CodeId) -> usize {
    let function = isolate.functions.get(isolate.codes.get(code).function);
    if function.has_optional_parameters() {
        0
    } else {
        function.num_fixed_parameters
    }
}

/// Phase 1 of the deoptimization transfer (leaf; no heap allocation).
///
/// `saved_registers_address` points at the register block the deopt stub
/// pushed. Copies the registers and the caller's optimized frame into the
/// isolate's scratch buffers and returns the byte size of the unoptimized
/// frame, which the stub uses to grow the stack.
pub fn deoptimize_copy_frame(isolate: &mut Isolate, saved_registers_address: Address) -> usize {
    // All registers were saved just below the stub frame.
    let last_fp = saved_registers_address + SAVED_REGISTERS_SIZE;
    copy_saved_registers(isolate, saved_registers_address);

    let frame = ManagedFrameIterator::from_fp(&isolate.stack, last_fp)
        .next_frame()
        .expect("no optimized frame to deoptimize");
    let optimized_code = frame
        .lookup_code(&isolate.codes)
        .expect("deoptimizing frame without code");
    assert!(isolate.codes.get(optimized_code).is_optimized);

    let (translation_length, reason) = {
        let (info, reason) = isolate
            .codes
            .get(optimized_code)
            .deopt_info_at(frame.pc)
            .expect("no deopt info for the deoptimizing pc");
        (info.translation_length(), reason)
    };

    // Copy the optimized frame: the return address below sp, everything up
    // to fp, the caller linkage, and the incoming fixed arguments.
    let num_args = copied_argument_count(isolate, optimized_code);
    let copy_size = 1 + (frame.fp - frame.sp) + 2 + num_args;
    let start = frame.sp - 1;
    let mut frame_copy = Vec::with_capacity(copy_size);
    for i in 0..copy_size {
        frame_copy.push(isolate.stack.read(start + i));
    }
    isolate.deopt_frame_copy = Some(frame_copy);

    if isolate.flags.trace_deoptimization {
        let function = isolate.codes.get(optimized_code).function;
        eprintln!(
            "Deoptimizing (reason {} '{reason}') at pc {:#x} '{}' (count {})",
            reason as u8,
            frame.pc,
            isolate.qualified_function_name(function),
            isolate.functions.get(function).deoptimization_counter,
        );
    }

    // The unoptimized frame size excludes the caller linkage and the
    // incoming arguments.
    (translation_length - num_args - 2) * WORD_SIZE
}

// =============================================================================
// Phase 2: fill
// =============================================================================

/// Phase 2 of the deoptimization transfer (leaf; no heap allocation).
///
/// Re-locates the optimized frame from `last_fp`, executes its deopt-info
/// instruction list in reverse target order into the stack, releases the
/// scratch buffers and returns the reconstructed caller frame pointer.
pub fn deoptimize_fill_frame(isolate: &mut Isolate, last_fp: Address) -> Address {
    let frame = ManagedFrameIterator::from_fp(&isolate.stack, last_fp)
        .next_frame()
        .expect("no optimized frame to fill");
    let optimized_code = frame
        .lookup_code(&isolate.codes)
        .expect("deoptimizing frame without code");
    let function = isolate.codes.get(optimized_code).function;
    assert!(isolate.codes.get(optimized_code).is_optimized);
    assert!(isolate.functions.get(function).unoptimized_code.is_some());

    let (instructions, reason) = {
        let (info, reason): (&DeoptInfo, DeoptReason) = isolate
            .codes
            .get(optimized_code)
            .deopt_info_at(frame.pc)
            .expect("no deopt info for the deoptimizing pc");
        (info.instructions.clone(), reason)
    };
    let translation_length = instructions.len();
    let num_args = copied_argument_count(isolate, optimized_code);

    let cpu_registers = isolate
        .deopt_cpu_registers_copy
        .take()
        .expect("copy phase did not run");
    let fpu_registers = isolate
        .deopt_fpu_registers_copy
        .take()
        .expect("copy phase did not run");
    let frame_copy = isolate
        .deopt_frame_copy
        .take()
        .expect("copy phase did not run");

    // The target frame ends at the caller linkage; its lowest slot may lie
    // below the optimized frame's sp when the unoptimized frame is larger.
    let start = frame.fp + 2 + num_args - translation_length;
    let mut context = DeoptContext::new(
        optimized_code,
        start,
        translation_length,
        num_args,
        reason,
        cpu_registers,
        fpu_registers,
        frame_copy,
    );

    for to_index in (0..translation_length).rev() {
        instructions::execute(isolate, &mut context, &instructions[to_index], to_index);
    }

    context.caller_fp()
}

// =============================================================================
// Phase 3: materialize
// =============================================================================

/// Phase 3 of the deoptimization transfer; the only step where collection
/// may run. Drains the deferred-box queues, allocating each box on the
/// heap and writing its reference into the recorded slot.
pub fn deoptimize_materialize_doubles(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &DEOPTIMIZE_MATERIALIZE_DOUBLES_ENTRY, arguments);
    let deferred_doubles = std::mem::take(&mut isolate.deferred_doubles);
    for deferred in deferred_doubles {
        let boxed = isolate.heap.new_double(deferred.value);
        isolate
            .stack
            .write(deferred.slot, Value::from_ref(boxed).raw());
        if isolate.flags.trace_deoptimization_verbose {
            eprintln!(
                "materializing double at {:#x}: {}",
                deferred.slot, deferred.value
            );
        }
    }
    let deferred_int64s = std::mem::take(&mut isolate.deferred_int64s);
    for deferred in deferred_int64s {
        assert!(!Value::is_smi_value(deferred.value));
        let boxed = isolate.heap.new_int64(deferred.value);
        isolate
            .stack
            .write(deferred.slot, Value::from_ref(boxed).raw());
        if isolate.flags.trace_deoptimization_verbose {
            eprintln!(
                "materializing int64 at {:#x}: {}",
                deferred.slot, deferred.value
            );
        }
    }
    Ok(())
}
