//! Object model for the Garnet runtime.
//!
//! This crate defines the data the runtime entries operate on, without any
//! execution machinery:
//!
//! - **Classes and functions** (`object::class`, `object::function`): the
//!   callable identity graph, usage counters and code-ownership slots.
//! - **Code objects** (`object::code`): compiled artifacts with an
//!   instruction-slot stream, PC descriptors, static-call-target table,
//!   deoptimization table and constants pool, registered in a flat code
//!   address space.
//! - **Call-site caches** (`object::icdata`, `object::subtype_cache`): the
//!   per-site records accelerating dispatch and type tests.
//! - **Type arguments** (`type_args`): instantiation, canonicalization and
//!   bounds checking of type-argument vectors.
//! - **Heap and object store** (`heap`, `object_store`): the arena of managed
//!   objects and the preallocated well-known ones.
//!
//! The VM crate composes these tables into an isolate and implements the
//! runtime entries over them.

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::new_without_default)]

pub mod arguments;
pub mod heap;
pub mod object;
pub mod object_store;
pub mod type_args;

pub use arguments::ArgumentsDescriptor;
pub use heap::{GcKind, Heap, HeapObject};
pub use object::class::{Class, ClassId, ClassTable};
pub use object::code::{
    Address, Code, CodeConstant, CodeId, CodeTable, DeoptInfo, DeoptInstr, DeoptReason,
    DeoptTableEntry, InstanceCallSite, InstrSlot, PcDescriptor, PcDescriptorKind, StaticCallEntry,
};
pub use object::function::{Function, FunctionFlags, FunctionId, FunctionKind, FunctionTable};
pub use object::icdata::{ICCheck, ICData, IcDataId};
pub use object::subtype_cache::{SubtypeCacheId, SubtypeTestCache, SubtypeTestEntry};
pub use object_store::ObjectStore;
pub use type_args::{Type, TypeArguments, TypeArgsId, TypeArgumentsTable};
