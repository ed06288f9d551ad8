//! Runtime entries for the Garnet VM.
//!
//! This crate is the boundary between generated code and the managed
//! runtime: the services compiled code calls when the compiler could not
//! (or chose not to) handle a situation inline.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      compiled code (modeled)                  │
//! │     call sites ──▶ stubs ──▶ runtime entries (this crate)     │
//! ├───────────────────────────────────────────────────────────────┤
//! │  entry::dispatch   instance-call resolution, IC growth,       │
//! │                    implicit closures, noSuchMethod            │
//! │  entry::tiered     static-call patching, optimize-on-hot      │
//! │  entry::allocate   object/array/closure/context allocation    │
//! │  entry::type_check instance-of, assignability, subtype caches │
//! │  entry::interrupts stack-overflow check + interrupt poll      │
//! │  deopt             optimized→unoptimized frame transfer       │
//! ├───────────────────────────────────────────────────────────────┤
//! │  isolate · stack walker · patcher · resolver · compiler · stub│
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Machine level: code objects occupy disjoint ranges of a flat address
//! space and managed frames live in a word-addressed stack memory, so the
//! entries' pc lookups, patches and frame arithmetic work on addresses and
//! raw words throughout.

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::new_without_default)]

pub mod compiler;
pub mod deopt;
pub mod entry;
pub mod exceptions;
pub mod isolate;
pub mod patcher;
pub mod resolver;
pub mod stack;
pub mod stub;

pub use compiler::{CompileKind, Compiler, TemplateCompiler};
pub use exceptions::Exceptions;
pub use isolate::{Debugger, InterruptBits, Isolate, MessageHandler};
pub use patcher::CodePatcher;
pub use stack::{Frame, FrameIterator, FrameKind, ManagedFrameIterator, StackMemory};
