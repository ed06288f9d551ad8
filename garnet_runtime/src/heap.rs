//! Managed heap arena.
//!
//! Objects live in a flat object table addressed by [`ObjectRef`]. The first
//! allocation must be the null instance so that `ObjectRef::NULL` (slot 0)
//! is the null value; [`crate::object_store::ObjectStore::bootstrap`]
//! maintains this.
//!
//! Collection policy is an external collaborator: `collect` only records
//! that a collection of the given kind was requested.

use crate::object::class::ClassId;
use crate::object::function::FunctionId;
use crate::type_args::TypeArgsId;
use garnet_core::value::{ObjectRef, Value};
use std::sync::Arc;

/// Which space a collection request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcKind {
    /// Minor collection (new space). Requested on store-buffer overflow.
    New,
    /// Major collection (old space).
    Old,
}

// =============================================================================
// Heap objects
// =============================================================================

/// A managed heap object.
#[derive(Debug, Clone)]
pub enum HeapObject {
    /// A plain instance of a class.
    Instance {
        /// Class id of the instance.
        cid: ClassId,
        /// Type-arguments slot; only the canonical form after allocation
        /// entries have run.
        type_arguments: Option<TypeArgsId>,
        /// Field values.
        fields: Vec<Value>,
    },
    /// A fixed-length array.
    Array {
        /// Element type arguments (a vector of one type), may be absent.
        type_arguments: Option<TypeArgsId>,
        /// The elements.
        elements: Vec<Value>,
    },
    /// A boxed 64-bit float.
    Double {
        /// The payload.
        value: f64,
    },
    /// A boxed 64-bit integer outside the Smi range.
    Int64 {
        /// The payload.
        value: i64,
    },
    /// A boolean instance. Only the two preallocated ones exist.
    Bool {
        /// The payload.
        value: bool,
    },
    /// An immutable string.
    Str {
        /// The payload.
        value: Arc<str>,
    },
    /// A function value: a function bound to a captured context.
    Closure {
        /// The closure function.
        function: FunctionId,
        /// Captured environment chain.
        context: ObjectRef,
        /// Instantiated type arguments of the closure.
        type_arguments: Option<TypeArgsId>,
    },
    /// A closure environment: fixed slots plus a parent link.
    Context {
        /// Enclosing context, if any. Parent links form a DAG by
        /// construction.
        parent: Option<ObjectRef>,
        /// Captured variable slots.
        slots: Vec<Value>,
    },
}

// =============================================================================
// Heap
// =============================================================================

/// The per-isolate heap.
#[derive(Debug)]
pub struct Heap {
    objects: Vec<HeapObject>,
    new_space_collections: u32,
    old_space_collections: u32,
}

impl Heap {
    /// Create an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: Vec::with_capacity(64),
            new_space_collections: 0,
            old_space_collections: 0,
        }
    }

    /// Allocate an object, returning its handle.
    #[inline]
    pub fn allocate(&mut self, object: HeapObject) -> ObjectRef {
        let index = self.objects.len() as u32;
        self.objects.push(object);
        ObjectRef::from_index(index)
    }

    /// Get an object.
    #[inline]
    #[must_use]
    pub fn get(&self, r: ObjectRef) -> &HeapObject {
        &self.objects[r.index()]
    }

    /// Get an object mutably.
    #[inline]
    pub fn get_mut(&mut self, r: ObjectRef) -> &mut HeapObject {
        &mut self.objects[r.index()]
    }

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the heap is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Request a collection. Policy is external; this records the request.
    pub fn collect(&mut self, kind: GcKind) {
        match kind {
            GcKind::New => self.new_space_collections += 1,
            GcKind::Old => self.old_space_collections += 1,
        }
    }

    /// Number of minor collections requested.
    #[must_use]
    pub fn new_space_collections(&self) -> u32 {
        self.new_space_collections
    }

    /// Number of major collections requested.
    #[must_use]
    pub fn old_space_collections(&self) -> u32 {
        self.old_space_collections
    }

    // =========================================================================
    // Contexts
    // =========================================================================

    /// Allocate a context large enough for `num_variables` captured slots.
    pub fn new_context(&mut self, num_variables: usize) -> ObjectRef {
        self.allocate(HeapObject::Context {
            parent: None,
            slots: vec![Value::null(); num_variables],
        })
    }

    /// Copy a context, including slot values, preserving the parent link.
    pub fn clone_context(&mut self, src: ObjectRef) -> ObjectRef {
        let (parent, slots) = match self.get(src) {
            HeapObject::Context { parent, slots } => (*parent, slots.clone()),
            other => panic!("clone_context on non-context {other:?}"),
        };
        self.allocate(HeapObject::Context { parent, slots })
    }

    /// Read a context slot.
    #[must_use]
    pub fn context_at(&self, ctx: ObjectRef, index: usize) -> Value {
        match self.get(ctx) {
            HeapObject::Context { slots, .. } => slots[index],
            other => panic!("context_at on non-context {other:?}"),
        }
    }

    /// Write a context slot.
    pub fn set_context_at(&mut self, ctx: ObjectRef, index: usize, value: Value) {
        match self.get_mut(ctx) {
            HeapObject::Context { slots, .. } => slots[index] = value,
            other => panic!("set_context_at on non-context {other:?}"),
        }
    }

    /// Set a context's parent link.
    pub fn set_context_parent(&mut self, ctx: ObjectRef, parent: Option<ObjectRef>) {
        match self.get_mut(ctx) {
            HeapObject::Context { parent: p, .. } => *p = parent,
            other => panic!("set_context_parent on non-context {other:?}"),
        }
    }

    // =========================================================================
    // Type-arguments slots
    // =========================================================================

    /// Type arguments attached to an instance, array or closure.
    #[must_use]
    pub fn type_arguments_of(&self, r: ObjectRef) -> Option<TypeArgsId> {
        match self.get(r) {
            HeapObject::Instance { type_arguments, .. }
            | HeapObject::Array { type_arguments, .. }
            | HeapObject::Closure { type_arguments, .. } => *type_arguments,
            _ => None,
        }
    }

    /// Attach type arguments to an instance, array or closure.
    pub fn set_type_arguments(&mut self, r: ObjectRef, ta: Option<TypeArgsId>) {
        match self.get_mut(r) {
            HeapObject::Instance { type_arguments, .. }
            | HeapObject::Array { type_arguments, .. }
            | HeapObject::Closure { type_arguments, .. } => *type_arguments = ta,
            other => panic!("set_type_arguments on {other:?}"),
        }
    }

    /// Allocate a string object.
    pub fn new_string(&mut self, s: &str) -> ObjectRef {
        self.allocate(HeapObject::Str { value: Arc::from(s) })
    }

    /// Allocate a boxed double.
    pub fn new_double(&mut self, value: f64) -> ObjectRef {
        self.allocate(HeapObject::Double { value })
    }

    /// Allocate a boxed 64-bit integer.
    pub fn new_int64(&mut self, value: i64) -> ObjectRef {
        self.allocate(HeapObject::Int64 { value })
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
