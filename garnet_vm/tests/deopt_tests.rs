//! Deoptimization: the three-phase frame transfer and eager invalidation.

mod common;

use common::{simple_template, smi_thunk, TestVm};
use garnet_core::value::{RawWord, Value, WORD_SIZE};
use garnet_runtime::heap::HeapObject;
use garnet_runtime::object::code::{
    Address, CodeConstant, CodeId, DeoptInfo, DeoptInstr, DeoptReason, DeoptTableEntry, InstrSlot,
};
use garnet_runtime::object::function::{Function, FunctionId};
use garnet_vm::compiler::{compile_function, ensure_compiled, CodeTemplate, CompileKind};
use garnet_vm::deopt;
use garnet_vm::entry::RuntimeArgs;
use garnet_vm::stack::{ENTRY_FRAME_MARKER, STUB_FRAME_MARKER};
use garnet_vm::stub::LAZY_DEOPT_STUB;

/// Frame-pointer layout used by the fixtures (addresses in stack words).
const OPT_FP: Address = 50000;
const OPT_SP: Address = 49998;
const STUB_FP: Address = 49996;
const CALLER_FP_VALUE: Address = 50010;
const CALLER_PC_VALUE: Address = 0x777;

struct DeoptFixture {
    vm: TestVm,
    function: FunctionId,
    opt_code: CodeId,
    unopt_code: CodeId,
    deopt_pc: Address,
    saved_registers: Address,
}

/// Build a function `h(a, b)` with unoptimized code and optimized code
/// carrying the given frame translation at pc offset 3, then lay out an
/// optimized frame mid-deopt:
///
/// ```text
///   50003  first argument (Smi 9)
///   50002  last argument (Smi 8)
///   50001  caller return address
///   50000  caller frame pointer         <- OPT_FP
///   49999  pc marker (optimized entry)
///   49998  one local slot               <- OPT_SP
///   49997  return address into optimized code (the deopting pc)
///   49996  stub frame                   <- STUB_FP
///   ...    saved FPU + CPU registers
/// ```
fn fixture(translation: Vec<DeoptInstr>, local: RawWord) -> DeoptFixture {
    let mut vm = TestVm::new();
    let object = vm.isolate.object_store.object_class;
    let name = vm.isolate.symbols.intern("h");
    let function = vm
        .isolate
        .functions
        .register(Function::static_function(name, object, 2));
    // Unoptimized code with room for a resume pc.
    vm.declare(function, CompileKind::Unoptimized, {
        let mut t = simple_template(smi_thunk(0));
        t.instructions = vec![InstrSlot::Nop; 8];
        t
    });
    let unopt_code = ensure_compiled(&mut vm.isolate, function).unwrap();

    let optimized = CodeTemplate {
        instructions: vec![InstrSlot::Nop; 6],
        pc_descriptors: Vec::new(),
        static_calls: Vec::new(),
        ic_sites: Vec::new(),
        deopt_table: vec![DeoptTableEntry {
            pc_offset: 3,
            deopt_info: 0,
            reason: DeoptReason::TypeGuard,
        }],
        deopt_infos: vec![DeoptInfo {
            instructions: translation,
        }],
        object_table: vec![CodeConstant::Code(unopt_code)],
        native: smi_thunk(0),
    };
    vm.declare(function, CompileKind::Optimized, optimized);
    let opt_code = compile_function(&mut vm.isolate, function, CompileKind::Optimized).unwrap();
    let opt_entry = vm.isolate.codes.get(opt_code).entry_point;
    let deopt_pc = opt_entry + 3;

    // The optimized frame with one local and two incoming Smi arguments.
    vm.isolate
        .stack
        .write_frame_header(OPT_FP, CALLER_FP_VALUE, CALLER_PC_VALUE, opt_entry as RawWord);
    vm.isolate.stack.write(OPT_SP, local);
    vm.isolate.stack.write(OPT_FP + 2, Value::smi(8).raw());
    vm.isolate.stack.write(OPT_FP + 3, Value::smi(9).raw());

    // The deopt stub's frame, whose return address is the deopting pc.
    vm.isolate
        .stack
        .write_frame_header(STUB_FP, OPT_FP, deopt_pc, STUB_FRAME_MARKER);

    // The register block the stub saved below its frame.
    let saved_registers = STUB_FP - deopt::SAVED_REGISTERS_SIZE;

    DeoptFixture {
        vm,
        function,
        opt_code,
        unopt_code,
        deopt_pc,
        saved_registers,
    }
}

/// The translation of the plain round-trip: length 6, two fixed arguments.
fn plain_translation() -> Vec<DeoptInstr> {
    vec![
        DeoptInstr::RetAddress {
            object_table_index: 0,
            pc_offset: 4,
        },
        DeoptInstr::PcMarker {
            object_table_index: 0,
        },
        DeoptInstr::CallerFp,
        DeoptInstr::CallerPc,
        DeoptInstr::StackSlot { slot: 5 },
        DeoptInstr::StackSlot { slot: 6 },
    ]
}

#[test]
fn test_deopt_round_trip_reconstructs_the_unoptimized_frame() {
    let mut fx = fixture(plain_translation(), Value::smi(5).raw());

    // Phase 1: translation length 6 with 2 fixed arguments leaves
    // (6 - 2 - 2) words of unoptimized frame.
    let size = deopt::deoptimize_copy_frame(&mut fx.vm.isolate, fx.saved_registers);
    assert_eq!(size, 2 * WORD_SIZE);
    assert!(fx.vm.isolate.has_deopt_scratch_buffers());

    // Phase 2 writes all six slots and returns the caller fp.
    let caller_fp = deopt::deoptimize_fill_frame(&mut fx.vm.isolate, STUB_FP);
    assert_eq!(caller_fp, CALLER_FP_VALUE);

    let unopt_entry = fx.vm.isolate.codes.get(fx.unopt_code).entry_point;
    let stack = &fx.vm.isolate.stack;
    // Continuation address in unoptimized code.
    assert_eq!(stack.read(OPT_FP - 2), (unopt_entry + 4) as RawWord);
    // Pc marker now identifies the unoptimized code.
    assert_eq!(stack.read(OPT_FP - 1), unopt_entry as RawWord);
    // Caller linkage survives bitwise.
    assert_eq!(stack.read(OPT_FP), CALLER_FP_VALUE as RawWord);
    assert_eq!(stack.read(OPT_FP + 1), CALLER_PC_VALUE as RawWord);
    // Incoming arguments survive bitwise.
    assert_eq!(stack.read(OPT_FP + 2), Value::smi(8).raw());
    assert_eq!(stack.read(OPT_FP + 3), Value::smi(9).raw());

    // The scratch buffers were released.
    assert!(!fx.vm.isolate.has_deopt_scratch_buffers());

    // The frame committed to unoptimized execution.
    assert_eq!(
        fx.vm.isolate.functions.get(fx.function).deoptimization_counter,
        1
    );

    // Phase 3 has nothing to materialize here.
    let mut arguments = RuntimeArgs::new([]);
    deopt::deoptimize_materialize_doubles(&mut fx.vm.isolate, &mut arguments).unwrap();
}

#[test]
fn test_deopt_with_unboxed_double_defers_and_materializes() {
    // Translation length 7: one local slot holding an unboxed double.
    let translation = vec![
        DeoptInstr::RetAddress {
            object_table_index: 0,
            pc_offset: 4,
        },
        DeoptInstr::DoubleStackSlot { slot: 1 },
        DeoptInstr::PcMarker {
            object_table_index: 0,
        },
        DeoptInstr::CallerFp,
        DeoptInstr::CallerPc,
        DeoptInstr::StackSlot { slot: 5 },
        DeoptInstr::StackSlot { slot: 6 },
    ];
    let mut fx = fixture(translation, f64::to_bits(2.5) as RawWord);

    let size = deopt::deoptimize_copy_frame(&mut fx.vm.isolate, fx.saved_registers);
    assert_eq!(size, 3 * WORD_SIZE);

    let caller_fp = deopt::deoptimize_fill_frame(&mut fx.vm.isolate, STUB_FP);
    assert_eq!(caller_fp, CALLER_FP_VALUE);

    // The double slot holds a placeholder until materialization, and a
    // deferred box is queued for it.
    let double_slot = OPT_FP - 2;
    assert_eq!(fx.vm.isolate.stack.read(double_slot), Value::smi(0).raw());
    assert_eq!(fx.vm.isolate.deferred_doubles().len(), 1);

    // Phase 3 allocates the box and patches the slot.
    let mut arguments = RuntimeArgs::new([]);
    deopt::deoptimize_materialize_doubles(&mut fx.vm.isolate, &mut arguments).unwrap();
    assert!(fx.vm.isolate.deferred_doubles().is_empty());
    let boxed = Value::from_raw(fx.vm.isolate.stack.read(double_slot));
    match fx.vm.isolate.heap.get(boxed.as_ref().unwrap()) {
        HeapObject::Double { value } => assert_eq!(*value, 2.5),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_deoptimize_all_splices_lazy_deopt_and_abandons_code() {
    let mut fx = fixture(plain_translation(), Value::smi(5).raw());

    // Frame chain for the walker: entry frame above the optimized frame,
    // exit frame below it.
    fx.vm
        .isolate
        .stack
        .write_frame_header(CALLER_FP_VALUE, 0, 0, ENTRY_FRAME_MARKER);
    fx.vm.isolate.top_exit_frame_info = STUB_FP;

    assert_eq!(
        fx.vm.isolate.functions.get(fx.function).current_code,
        Some(fx.opt_code)
    );
    deopt::deoptimize_all(&mut fx.vm.isolate);

    // The function fell back to its unoptimized code.
    assert_eq!(
        fx.vm.isolate.functions.get(fx.function).current_code,
        Some(fx.unopt_code)
    );
    // The optimized code is dead and its return site now calls the
    // lazy-deopt stub.
    assert!(!fx.vm.isolate.codes.get(fx.opt_code).is_alive);
    match fx.vm.isolate.codes.get(fx.opt_code).instr_at(fx.deopt_pc) {
        InstrSlot::StaticCall { target } => assert_eq!(*target, LAZY_DEOPT_STUB),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_deoptimize_if_owner_filters_by_class() {
    let mut fx = fixture(plain_translation(), Value::smi(5).raw());
    fx.vm
        .isolate
        .stack
        .write_frame_header(CALLER_FP_VALUE, 0, 0, ENTRY_FRAME_MARKER);
    fx.vm.isolate.top_exit_frame_info = STUB_FP;

    // A class that does not own the frame's function: nothing happens.
    let unrelated = fx.vm.define_class("Unrelated", None);
    deopt::deoptimize_if_owner(&mut fx.vm.isolate, &[unrelated]);
    assert_eq!(
        fx.vm.isolate.functions.get(fx.function).current_code,
        Some(fx.opt_code)
    );

    // The owning class: the frame deoptimizes.
    let owner = fx.vm.isolate.functions.get(fx.function).owner;
    deopt::deoptimize_if_owner(&mut fx.vm.isolate, &[owner]);
    assert_eq!(
        fx.vm.isolate.functions.get(fx.function).current_code,
        Some(fx.unopt_code)
    );
    assert!(!fx.vm.isolate.codes.get(fx.opt_code).is_alive);
}
