//! The code patcher.
//!
//! Reads and writes call-site metadata in the modeled instruction stream.
//! Within an isolate, patching is the only mutator of live instruction
//! slots and runs on the isolate's single thread, so a patch is atomic with
//! respect to the code executing it. Re-patching a static call to the
//! target it already has is a bug and asserts.

use garnet_core::intern::Symbol;
use garnet_runtime::object::code::{Address, CodeTable, InstrSlot};
use garnet_runtime::object::icdata::IcDataId;

/// Static call-site and instance call-site access at a given pc.
pub struct CodePatcher;

impl CodePatcher {
    /// Current target of the static call at `pc`.
    #[must_use]
    pub fn get_static_call_target_at(codes: &CodeTable, pc: Address) -> Address {
        let code = codes.lookup_code(pc).expect("pc outside any code");
        match codes.get(code).instr_at(pc) {
            InstrSlot::StaticCall { target } => *target,
            other => panic!("no static call at {pc:#x}: {other:?}"),
        }
    }

    /// Redirect the static call at `pc` to `new_target`.
    pub fn patch_static_call_at(codes: &mut CodeTable, pc: Address, new_target: Address) {
        let code = codes.lookup_code(pc).expect("pc outside any code");
        match codes.get_mut(code).instr_at_mut(pc) {
            InstrSlot::StaticCall { target } => {
                assert!(
                    *target != new_target,
                    "re-patching static call at {pc:#x} to its current target {new_target:#x}"
                );
                *target = new_target;
            }
            other => panic!("no static call at {pc:#x}: {other:?}"),
        }
    }

    /// Operands of the instance call at `pc`:
    /// `(name, argument count, named argument count, current target)`.
    #[must_use]
    pub fn get_instance_call_at(
        codes: &CodeTable,
        pc: Address,
    ) -> (Symbol, usize, usize, Address) {
        let code = codes.lookup_code(pc).expect("pc outside any code");
        match codes.get(code).instr_at(pc) {
            InstrSlot::InstanceCall(call) => (
                call.name.clone(),
                call.argument_count,
                call.named_argument_count,
                call.target,
            ),
            other => panic!("no instance call at {pc:#x}: {other:?}"),
        }
    }

    /// IC data of the instance call at `pc`.
    #[must_use]
    pub fn get_instance_call_ic_data_at(codes: &CodeTable, pc: Address) -> IcDataId {
        let code = codes.lookup_code(pc).expect("pc outside any code");
        match codes.get(code).instr_at(pc) {
            InstrSlot::InstanceCall(call) => {
                call.ic_data.expect("instance call without IC data")
            }
            other => panic!("no instance call at {pc:#x}: {other:?}"),
        }
    }

    /// Swap the IC data of the instance call at `pc`.
    pub fn set_instance_call_ic_data_at(codes: &mut CodeTable, pc: Address, ic_data: IcDataId) {
        let code = codes.lookup_code(pc).expect("pc outside any code");
        match codes.get_mut(code).instr_at_mut(pc) {
            InstrSlot::InstanceCall(call) => call.ic_data = Some(ic_data),
            other => panic!("no instance call at {pc:#x}: {other:?}"),
        }
    }

    /// Splice a call into a previously non-call slot. Used for lazy
    /// deoptimization; re-splicing the same target is permitted there, so no
    /// no-op assert here.
    pub fn insert_call_at(codes: &mut CodeTable, pc: Address, target: Address) {
        let code = codes.lookup_code(pc).expect("pc outside any code");
        let slot = codes.get_mut(code).instr_at_mut(pc);
        match slot {
            InstrSlot::Nop | InstrSlot::StaticCall { .. } => {
                *slot = InstrSlot::StaticCall { target };
            }
            other => panic!("cannot splice a call over {other:?} at {pc:#x}"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use garnet_core::intern::SymbolTable;
    use garnet_runtime::object::code::{Code, InstanceCallSite};
    use garnet_runtime::object::function::FunctionId;

    fn code_with_calls() -> (CodeTable, Address) {
        let symbols = SymbolTable::new();
        let mut codes = CodeTable::new();
        let instructions = vec![
            InstrSlot::Nop,
            InstrSlot::StaticCall { target: 0x10 },
            InstrSlot::InstanceCall(InstanceCallSite {
                name: symbols.intern("f"),
                argument_count: 2,
                named_argument_count: 0,
                target: 0x30,
                ic_data: Some(IcDataId::from_raw(0)),
            }),
        ];
        let id = codes.register(Code::new(FunctionId::from_raw(0), instructions));
        let entry = codes.get(id).entry_point;
        (codes, entry)
    }

    #[test]
    fn test_static_call_read_and_patch() {
        let (mut codes, entry) = code_with_calls();
        let pc = entry + 1;
        assert_eq!(CodePatcher::get_static_call_target_at(&codes, pc), 0x10);
        CodePatcher::patch_static_call_at(&mut codes, pc, 0x2000);
        assert_eq!(CodePatcher::get_static_call_target_at(&codes, pc), 0x2000);
    }

    #[test]
    #[should_panic(expected = "re-patching static call")]
    fn test_noop_repatch_asserts() {
        let (mut codes, entry) = code_with_calls();
        CodePatcher::patch_static_call_at(&mut codes, entry + 1, 0x10);
    }

    #[test]
    fn test_instance_call_read() {
        let (codes, entry) = code_with_calls();
        let (name, args, named, target) = CodePatcher::get_instance_call_at(&codes, entry + 2);
        assert_eq!(name.as_str(), "f");
        assert_eq!(args, 2);
        assert_eq!(named, 0);
        assert_eq!(target, 0x30);
        assert_eq!(
            CodePatcher::get_instance_call_ic_data_at(&codes, entry + 2),
            IcDataId::from_raw(0)
        );
    }

    #[test]
    fn test_set_instance_call_ic_data() {
        let (mut codes, entry) = code_with_calls();
        CodePatcher::set_instance_call_ic_data_at(&mut codes, entry + 2, IcDataId::from_raw(9));
        assert_eq!(
            CodePatcher::get_instance_call_ic_data_at(&codes, entry + 2),
            IcDataId::from_raw(9)
        );
    }

    #[test]
    fn test_insert_call_over_nop_and_repeat() {
        let (mut codes, entry) = code_with_calls();
        CodePatcher::insert_call_at(&mut codes, entry, 0x20);
        assert_eq!(CodePatcher::get_static_call_target_at(&codes, entry), 0x20);
        // Lazy deopt may splice the same target twice.
        CodePatcher::insert_call_at(&mut codes, entry, 0x20);
        assert_eq!(CodePatcher::get_static_call_target_at(&codes, entry), 0x20);
    }
}
