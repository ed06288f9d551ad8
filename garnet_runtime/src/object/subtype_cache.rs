//! Per-type-test-site caches.
//!
//! A subtype-test cache accelerates `is`/assignability checks: each entry
//! records the 3-key identity of a previously evaluated test (instance class
//! id, instance type arguments, instantiator type arguments) and its result.
//! After canonicalization the keys compare by id equality, so the compiled
//! inline probe is a handful of word compares that falls through to the
//! runtime only on miss.
//!
//! Admission policy (capacity cap, canonical-only instantiators, duplicate
//! tolerance) lives with the type-check entries; this record only stores
//! what was admitted.

use crate::object::class::ClassId;
use crate::type_args::TypeArgsId;

/// Handle to a subtype-test cache in the isolate's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubtypeCacheId(u32);

impl SubtypeCacheId {
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

/// One cached test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubtypeTestEntry {
    /// Class id of the tested instance.
    pub instance_class: ClassId,
    /// Type arguments of the tested instance (canonical), if any.
    pub instance_type_arguments: Option<TypeArgsId>,
    /// Type arguments of the instantiator (canonical), if any.
    pub instantiator_type_arguments: Option<TypeArgsId>,
    /// Result of the full test.
    pub result: bool,
}

// =============================================================================
// SubtypeTestCache
// =============================================================================

/// Per-test-site cache of subtype-test outcomes.
#[derive(Debug, Default)]
pub struct SubtypeTestCache {
    entries: Vec<SubtypeTestEntry>,
}

impl SubtypeTestCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Number of cached tests.
    #[inline]
    #[must_use]
    pub fn number_of_checks(&self) -> usize {
        self.entries.len()
    }

    /// The `i`-th cached test.
    #[inline]
    #[must_use]
    pub fn get_check(&self, i: usize) -> &SubtypeTestEntry {
        &self.entries[i]
    }

    /// Iterate cached tests.
    pub fn checks(&self) -> impl Iterator<Item = &SubtypeTestEntry> {
        self.entries.iter()
    }

    /// Look up a 3-key identity, returning the cached result on a hit.
    #[must_use]
    pub fn lookup(
        &self,
        instance_class: ClassId,
        instance_type_arguments: Option<TypeArgsId>,
        instantiator_type_arguments: Option<TypeArgsId>,
    ) -> Option<bool> {
        self.entries
            .iter()
            .find(|entry| {
                entry.instance_class == instance_class
                    && entry.instance_type_arguments == instance_type_arguments
                    && entry.instantiator_type_arguments == instantiator_type_arguments
            })
            .map(|entry| entry.result)
    }

    /// Append an entry. The caller has already applied the admission policy;
    /// the 3-key identity must be new.
    pub fn add_check(
        &mut self,
        instance_class: ClassId,
        instance_type_arguments: Option<TypeArgsId>,
        instantiator_type_arguments: Option<TypeArgsId>,
        result: bool,
    ) {
        debug_assert!(
            self.lookup(
                instance_class,
                instance_type_arguments,
                instantiator_type_arguments
            )
            .is_none(),
            "duplicate subtype-test cache entry"
        );
        self.entries.push(SubtypeTestEntry {
            instance_class,
            instance_type_arguments,
            instantiator_type_arguments,
            result,
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
