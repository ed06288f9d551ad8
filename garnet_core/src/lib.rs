//! Core primitives for the Garnet runtime.
//!
//! This crate holds the pieces every other Garnet crate depends on:
//!
//! - **Tagged value words** (`value`): the 64-bit word format shared between
//!   managed frames, register copies and the object model.
//! - **Symbols** (`intern`): interned strings with O(1) identity comparison,
//!   used for method names, parameter names and type names.
//! - **Errors** (`error`): the runtime error sum type that crosses the
//!   generated-code boundary as a value, not as host unwinding.
//! - **Flags** (`flags`): the runtime flag surface controlling inline caches,
//!   tracing and tier-up thresholds.

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::new_without_default)]

pub mod error;
pub mod flags;
pub mod intern;
pub mod value;

pub use error::{GarnetError, VmResult};
pub use flags::Flags;
pub use intern::{Symbol, SymbolTable};
pub use value::{ObjectRef, RawWord, Value, WORD_SIZE};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
