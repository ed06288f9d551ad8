//! Per-call-site inline-cache records.
//!
//! An `ICData` is the receiver-class-to-target mapping of one instance-call
//! site: an ordered sequence of checks, each a class-id vector paired with a
//! resolved target. Lookup is a linear scan while the site stays small; past
//! [`IC_LINEAR_SCAN_CAP`] a hash index is maintained on the side. Insertion
//! order is preserved either way so dispatch profiles stay stable.

use crate::object::class::ClassId;
use crate::object::function::FunctionId;
use garnet_core::intern::Symbol;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Check count past which a hash index is kept alongside the check array.
pub const IC_LINEAR_SCAN_CAP: usize = 8;

/// Class-id vector of one check: one id per tested argument.
pub type CidVector = SmallVec<[ClassId; 2]>;

/// Handle to an `ICData` record in the isolate's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IcDataId(u32);

impl IcDataId {
    /// Create from a raw index.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw index.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// One resolved check.
#[derive(Debug, Clone)]
pub struct ICCheck {
    /// Class ids of the tested arguments, receiver first.
    pub class_ids: CidVector,
    /// The target resolved for this vector.
    pub target: FunctionId,
}

// =============================================================================
// ICData
// =============================================================================

/// Per-instance-call-site record.
#[derive(Debug)]
pub struct ICData {
    /// Name the call site invokes.
    pub target_name: Symbol,
    /// How many leading arguments the site tests (1, 2 or 3).
    pub num_args_tested: usize,
    /// Set when the site dispatches closure calls.
    pub is_closure_call: bool,
    checks: Vec<ICCheck>,
    /// Hash index over `checks`, built once the array outgrows the linear
    /// scan cap.
    index: Option<FxHashMap<CidVector, usize>>,
}

impl ICData {
    /// Create an empty record for a call site testing `num_args_tested`
    /// arguments.
    #[must_use]
    pub fn new(target_name: Symbol, num_args_tested: usize) -> Self {
        assert!((1..=3).contains(&num_args_tested));
        Self {
            target_name,
            num_args_tested,
            is_closure_call: false,
            checks: Vec::new(),
            index: None,
        }
    }

    /// Number of checks recorded.
    #[inline]
    #[must_use]
    pub fn number_of_checks(&self) -> usize {
        self.checks.len()
    }

    /// The `i`-th check, in insertion order.
    #[inline]
    #[must_use]
    pub fn get_check(&self, i: usize) -> &ICCheck {
        &self.checks[i]
    }

    /// Iterate checks in insertion order.
    pub fn checks(&self) -> impl Iterator<Item = &ICCheck> {
        self.checks.iter()
    }

    /// Position of a class-id vector, if present.
    fn find(&self, class_ids: &[ClassId]) -> Option<usize> {
        if let Some(index) = &self.index {
            return index.get(class_ids).copied();
        }
        self.checks
            .iter()
            .position(|check| check.class_ids.as_slice() == class_ids)
    }

    /// Whether a check for this class-id vector exists.
    #[inline]
    #[must_use]
    pub fn has_check(&self, class_ids: &[ClassId]) -> bool {
        self.find(class_ids).is_some()
    }

    /// The target recorded for a class-id vector, if any.
    #[must_use]
    pub fn lookup(&self, class_ids: &[ClassId]) -> Option<FunctionId> {
        self.find(class_ids).map(|i| self.checks[i].target)
    }

    /// Append a single-receiver check.
    pub fn add_receiver_check(&mut self, receiver_class: ClassId, target: FunctionId) {
        assert_eq!(self.num_args_tested, 1);
        self.add_check(SmallVec::from_slice(&[receiver_class]), target);
    }

    /// Append a check. The vector length must match `num_args_tested` and
    /// the vector must not already be present.
    pub fn add_check(&mut self, class_ids: CidVector, target: FunctionId) {
        assert_eq!(class_ids.len(), self.num_args_tested);
        assert!(
            self.find(&class_ids).is_none(),
            "duplicate IC check for {class_ids:?}"
        );
        let position = self.checks.len();
        if let Some(index) = &mut self.index {
            index.insert(class_ids.clone(), position);
        } else if position + 1 > IC_LINEAR_SCAN_CAP {
            let mut index: FxHashMap<CidVector, usize> = FxHashMap::default();
            for (i, check) in self.checks.iter().enumerate() {
                index.insert(check.class_ids.clone(), i);
            }
            index.insert(class_ids.clone(), position);
            self.index = Some(index);
        }
        self.checks.push(ICCheck { class_ids, target });
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use garnet_core::intern::SymbolTable;

    fn cid(raw: u32) -> ClassId {
        ClassId::from_raw(raw)
    }

    fn target(raw: u32) -> FunctionId {
        FunctionId::from_raw(raw)
    }

    fn new_ic(num_args: usize) -> ICData {
        let symbols = SymbolTable::new();
        ICData::new(symbols.intern("f"), num_args)
    }

    #[test]
    fn test_receiver_check_lookup() {
        let mut ic = new_ic(1);
        ic.add_receiver_check(cid(3), target(7));
        assert_eq!(ic.number_of_checks(), 1);
        assert_eq!(ic.lookup(&[cid(3)]), Some(target(7)));
        assert_eq!(ic.lookup(&[cid(4)]), None);
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut ic = new_ic(1);
        for raw in [9u32, 3, 7, 5] {
            ic.add_receiver_check(cid(raw), target(raw));
        }
        let order: Vec<u32> = ic.checks().map(|c| c.class_ids[0].raw()).collect();
        assert_eq!(order, vec![9, 3, 7, 5]);
    }

    #[test]
    #[should_panic(expected = "duplicate IC check")]
    fn test_duplicate_vector_asserts() {
        let mut ic = new_ic(1);
        ic.add_receiver_check(cid(3), target(7));
        ic.add_receiver_check(cid(3), target(8));
    }

    #[test]
    fn test_two_arg_vectors_distinct() {
        let mut ic = new_ic(2);
        ic.add_check(SmallVec::from_slice(&[cid(1), cid(2)]), target(1));
        ic.add_check(SmallVec::from_slice(&[cid(2), cid(1)]), target(2));
        assert_eq!(ic.lookup(&[cid(1), cid(2)]), Some(target(1)));
        assert_eq!(ic.lookup(&[cid(2), cid(1)]), Some(target(2)));
    }

    #[test]
    fn test_hash_index_transition_keeps_order_and_lookup() {
        let mut ic = new_ic(1);
        let total = IC_LINEAR_SCAN_CAP + 4;
        for raw in 0..total as u32 {
            ic.add_receiver_check(cid(raw), target(raw * 10));
        }
        assert_eq!(ic.number_of_checks(), total);
        // All entries remain reachable and ordered after the index kicks in.
        for raw in 0..total as u32 {
            assert_eq!(ic.lookup(&[cid(raw)]), Some(target(raw * 10)));
            assert_eq!(ic.get_check(raw as usize).class_ids[0], cid(raw));
        }
    }

    #[test]
    fn test_pairwise_distinct_invariant() {
        let mut ic = new_ic(1);
        for raw in 0..20u32 {
            ic.add_receiver_check(cid(raw), target(raw));
        }
        for i in 0..ic.number_of_checks() {
            for j in (i + 1)..ic.number_of_checks() {
                assert_ne!(ic.get_check(i).class_ids, ic.get_check(j).class_ids);
            }
        }
    }
}
