//! Dynamic call resolution.
//!
//! Walks the receiver's class hierarchy for a dynamic function matching a
//! name, treating a null receiver as an instance of the root Object class.

use crate::isolate::Isolate;
use garnet_core::intern::Symbol;
use garnet_core::value::Value;
use garnet_runtime::object::class::ClassId;
use garnet_runtime::object::function::FunctionId;

/// Find a dynamic function by exact name anywhere on `class`'s chain,
/// ignoring arity.
#[must_use]
pub fn lookup_dynamic_function(
    isolate: &Isolate,
    class: ClassId,
    name: &Symbol,
) -> Option<FunctionId> {
    let mut current = Some(class);
    while let Some(cid) = current {
        let class = isolate.classes.get(cid);
        for &fid in &class.functions {
            let function = isolate.functions.get(fid);
            if function.is_dynamic() && function.name == *name {
                return Some(fid);
            }
        }
        current = class.super_class;
    }
    None
}

/// Resolve a dynamic call against a receiver.
///
/// `num_arguments` includes the receiver. The first name match decides:
/// if its argument counts are incompatible, resolution fails rather than
/// continuing up the chain. Only the count of named arguments is checked,
/// not their names.
#[must_use]
pub fn resolve_dynamic(
    isolate: &Isolate,
    receiver: Value,
    name: &Symbol,
    num_arguments: usize,
    num_named_arguments: usize,
) -> Option<FunctionId> {
    let class = if receiver.is_null() {
        isolate.object_store.object_class
    } else {
        isolate.class_of_value(receiver)
    };
    let function = lookup_dynamic_function(isolate, class, name)?;
    isolate
        .functions
        .get(function)
        .are_valid_argument_counts(num_arguments, num_named_arguments)
        .then_some(function)
}

// =============================================================================
// Tests
// =============================================================================
