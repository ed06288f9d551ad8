//! Tiered-compilation runtime entries.
//!
//! Patching static call sites to freshly compiled entries, re-pointing
//! callers at replaced code, hotness-triggered optimization and the
//! breakpoint handlers.

use crate::compiler::{compile_function, ensure_compiled, CompileKind};
use crate::entry::{enter, NativeArg, RuntimeArgs, RuntimeEntry};
use crate::isolate::Isolate;
use crate::patcher::CodePatcher;
use crate::stack::{FrameIterator, FrameKind};
use garnet_core::error::VmResult;
use garnet_core::flags::LOW_INVOCATION_COUNT;

/// Log a failed optimization attempt with its caller.
fn print_failure(isolate: &Isolate, message: &str) {
    let frame = isolate.top_managed_frame();
    let code = frame.lookup_code(&isolate.codes).expect("caller code");
    eprintln!(
        "Failed: '{}' {} @ {:#x}",
        message,
        isolate.qualified_function_name(isolate.codes.get(code).function),
        frame.pc,
    );
}

/// Patch a static call site with the target's entry point, compiling the
/// target if necessary.
/// Return value: the target code.
pub const PATCH_STATIC_CALL_ENTRY: RuntimeEntry = RuntimeEntry::new("PatchStaticCall", 0);

/// See [`PATCH_STATIC_CALL_ENTRY`].
pub fn patch_static_call(isolate: &mut Isolate, arguments: &mut RuntimeArgs) -> VmResult<()> {
    enter(isolate, &PATCH_STATIC_CALL_ENTRY, arguments);
    let frame = isolate.top_managed_frame();
    let caller_code = frame
        .lookup_code(&isolate.codes)
        .expect("caller frame without code");
    let target_function = isolate
        .codes
        .get(caller_code)
        .static_call_target_function_at(frame.pc);
    let target_code = ensure_compiled(isolate, target_function)?;
    let target_entry = isolate.codes.get(target_code).entry_point;
    // Never re-patch to the target the site already has.
    assert_ne!(
        target_entry,
        CodePatcher::get_static_call_target_at(&isolate.codes, frame.pc)
    );
    CodePatcher::patch_static_call_at(&mut isolate.codes, frame.pc, target_entry);
    isolate
        .codes
        .get_mut(caller_code)
        .set_static_call_code_at(frame.pc, target_code);
    if isolate.flags.trace_patching {
        eprintln!(
            "PatchStaticCall: patching from {:#x} to '{}' {:#x}",
            frame.pc,
            isolate.qualified_function_name(target_function),
            target_entry,
        );
    }
    arguments.set_return(NativeArg::Code(target_code));
    Ok(())
}

/// The caller's static call site points at code that has been replaced;
/// re-patch it to the function's current entry point.
/// Return value: the current target code.
pub const FIX_CALLERS_TARGET_ENTRY: RuntimeEntry = RuntimeEntry::new("FixCallersTarget", 0);

/// See [`FIX_CALLERS_TARGET_ENTRY`].
pub fn fix_callers_target(isolate: &mut Isolate, arguments: &mut RuntimeArgs) -> VmResult<()> {
    enter(isolate, &FIX_CALLERS_TARGET_ENTRY, arguments);
    let frame = {
        let mut walker = FrameIterator::from_fp(&isolate.stack, isolate.top_exit_frame_info);
        loop {
            let frame = walker.next_frame().expect("no caller frame");
            match frame.kind(&isolate.stack) {
                FrameKind::Stub => continue,
                // A function's current code is always unpatched, so an
                // entry frame never calls into patched code.
                FrameKind::Entry => unreachable!("entry frame calls unpatched code"),
                FrameKind::Managed => break frame,
            }
        }
    };
    let caller_code = frame
        .lookup_code(&isolate.codes)
        .expect("caller frame without code");
    let target_function = isolate
        .codes
        .get(caller_code)
        .static_call_target_function_at(frame.pc);
    let target_code = isolate
        .functions
        .get(target_function)
        .current_code
        .expect("target has no current code");
    let target_entry = isolate.codes.get(target_code).entry_point;
    CodePatcher::patch_static_call_at(&mut isolate.codes, frame.pc, target_entry);
    isolate
        .codes
        .get_mut(caller_code)
        .set_static_call_code_at(frame.pc, target_code);
    if isolate.flags.trace_patching {
        eprintln!(
            "FixCallersTarget: patching from {:#x} to '{}' {:#x}",
            frame.pc,
            isolate.qualified_function_name(target_function),
            target_entry,
        );
    }
    arguments.set_return(NativeArg::Code(target_code));
    Ok(())
}

/// A function crossed its usage threshold; optimize it unless a guard
/// forbids it. The requesting function may already be optimized
/// (reoptimization).
/// Arg0: the function to optimize.
pub const OPTIMIZE_INVOKED_FUNCTION_ENTRY: RuntimeEntry =
    RuntimeEntry::new("OptimizeInvokedFunction", 1);

/// See [`OPTIMIZE_INVOKED_FUNCTION_ENTRY`].
pub fn optimize_invoked_function(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &OPTIMIZE_INVOKED_FUNCTION_ENTRY, arguments);
    let function = arguments.arg_at(0).as_function();

    if isolate.debugger.is_active() {
        // Breakpoints cannot be set in optimized code.
        isolate.functions.get_mut(function).usage_counter = 0;
        return Ok(());
    }
    if isolate.functions.get(function).deoptimization_counter
        >= isolate.flags.deoptimization_counter_threshold
    {
        if isolate.flags.trace_failed_optimization_attempts {
            print_failure(isolate, "Too Many Deoptimizations");
        }
        isolate.functions.get_mut(function).usage_counter = LOW_INVOCATION_COUNT;
        return Ok(());
    }
    if let Some(filter) = isolate.flags.optimization_filter.clone() {
        if !isolate.qualified_function_name(function).contains(&filter) {
            isolate.functions.get_mut(function).usage_counter = LOW_INVOCATION_COUNT;
            return Ok(());
        }
    }
    if !isolate.functions.get(function).is_optimizable() {
        if isolate.flags.trace_failed_optimization_attempts {
            print_failure(isolate, "Not Optimizable");
        }
        isolate.functions.get_mut(function).usage_counter = LOW_INVOCATION_COUNT;
        return Ok(());
    }

    compile_function(isolate, function, CompileKind::Optimized)?;
    assert!(isolate.functions.get(function).current_code.is_some());
    // Arm the counter so reoptimization triggers only after another full
    // reoptimization window.
    let threshold = isolate.flags.reoptimization_counter_threshold;
    let f = isolate.functions.get_mut(function);
    f.usage_counter -= threshold;
    Ok(())
}

// =============================================================================
// Breakpoint handlers
// =============================================================================

/// The debug stub reached a breakpoint at a static call; make sure the
/// callee is compiled so the stub can jump straight to it.
/// Return value: the callee's current code.
pub const BREAKPOINT_STATIC_HANDLER_ENTRY: RuntimeEntry =
    RuntimeEntry::new("BreakpointStaticHandler", 0);

/// See [`BREAKPOINT_STATIC_HANDLER_ENTRY`].
pub fn breakpoint_static_handler(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &BREAKPOINT_STATIC_HANDLER_ENTRY, arguments);
    isolate.debugger.signal_breakpoint_reached();
    let frame = isolate.top_managed_frame();
    let code = frame
        .lookup_code(&isolate.codes)
        .expect("caller frame without code");
    let function = isolate
        .codes
        .get(code)
        .static_call_target_function_at(frame.pc);
    let target_code = ensure_compiled(isolate, function)?;
    arguments.set_return(NativeArg::Code(target_code));
    Ok(())
}

/// The debug stub reached a breakpoint at a return site.
pub const BREAKPOINT_RETURN_HANDLER_ENTRY: RuntimeEntry =
    RuntimeEntry::new("BreakpointReturnHandler", 0);

/// See [`BREAKPOINT_RETURN_HANDLER_ENTRY`].
pub fn breakpoint_return_handler(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &BREAKPOINT_RETURN_HANDLER_ENTRY, arguments);
    isolate.debugger.signal_breakpoint_reached();
    Ok(())
}

/// The debug stub reached a breakpoint at a dynamic call.
pub const BREAKPOINT_DYNAMIC_HANDLER_ENTRY: RuntimeEntry =
    RuntimeEntry::new("BreakpointDynamicHandler", 0);

/// See [`BREAKPOINT_DYNAMIC_HANDLER_ENTRY`].
pub fn breakpoint_dynamic_handler(
    isolate: &mut Isolate,
    arguments: &mut RuntimeArgs,
) -> VmResult<()> {
    enter(isolate, &BREAKPOINT_DYNAMIC_HANDLER_ENTRY, arguments);
    isolate.debugger.signal_breakpoint_reached();
    Ok(())
}
