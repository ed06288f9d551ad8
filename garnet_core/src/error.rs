//! Runtime error values.
//!
//! Failures that cross the generated-code boundary are carried as values of
//! [`GarnetError`] rather than host-language unwinding: runtime entries
//! return `Result` and the stub layer transfers control to the nearest
//! managed handler. Invariant violations are not errors; they assert.

use crate::value::Value;
use std::fmt;

/// Result alias used by runtime entries.
pub type VmResult<T> = Result<T, GarnetError>;

// =============================================================================
// Error payloads
// =============================================================================

/// Payload of a dynamic type error.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeErrorInfo {
    /// Token position of the failing check in the caller, or -1 if unknown.
    pub token_pos: i64,
    /// User-visible name of the value's actual type.
    pub src_type_name: String,
    /// User-visible name of the expected type.
    pub dst_type_name: String,
    /// Name of the variable or expression being checked (may be empty).
    pub dst_name: String,
    /// Malformed-type diagnostic, if the declaration itself was malformed.
    pub malformed_message: Option<String>,
}

/// Payload of a NoSuchMethod failure.
#[derive(Debug, Clone, PartialEq)]
pub struct NoSuchMethodInfo {
    /// Receiver of the failed call.
    pub receiver: Value,
    /// Name the call site asked for.
    pub method_name: String,
    /// Positional arguments of the failed call.
    pub positional_arguments: Vec<Value>,
    /// Named arguments of the failed call.
    pub named_arguments: Vec<(String, Value)>,
    /// Parameter names of a same-named method with different arity, if one
    /// was found while resolving. Diagnostic only.
    pub similar_parameter_names: Option<Vec<String>>,
}

/// Payload of a compilation failure. Propagated unchanged; effectively fatal
/// to the current invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    /// Qualified name of the function that failed to compile.
    pub function_name: String,
    /// Backend diagnostic.
    pub message: String,
}

// =============================================================================
// GarnetError
// =============================================================================

/// The runtime error sum type.
#[derive(Debug, Clone, PartialEq)]
pub enum GarnetError {
    /// A language-level exception in flight, with its stack trace (null until
    /// a rethrow attaches one).
    Unwind {
        /// The thrown exception instance.
        exception: Value,
        /// The captured stack trace instance, or null.
        stacktrace: Value,
    },
    /// A synthesized dynamic type error.
    TypeError(TypeErrorInfo),
    /// Resolution, implicit-closure and getter-call paths all failed.
    NoSuchMethod(NoSuchMethodInfo),
    /// The compiler reported an error for a callee.
    Compilation(CompileError),
}

impl GarnetError {
    /// Whether this error is an in-flight language-level exception.
    #[inline]
    #[must_use]
    pub fn is_unwind(&self) -> bool {
        matches!(self, GarnetError::Unwind { .. })
    }

    /// Shorthand for building a compilation error.
    pub fn compilation(function_name: impl Into<String>, message: impl Into<String>) -> Self {
        GarnetError::Compilation(CompileError {
            function_name: function_name.into(),
            message: message.into(),
        })
    }
}

impl fmt::Display for GarnetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GarnetError::Unwind { exception, .. } => {
                write!(f, "unhandled exception: {exception:?}")
            }
            GarnetError::TypeError(info) => {
                write!(
                    f,
                    "type '{}' is not a subtype of type '{}' of '{}'",
                    info.src_type_name, info.dst_type_name, info.dst_name
                )?;
                if let Some(msg) = &info.malformed_message {
                    write!(f, ": {msg}")?;
                }
                Ok(())
            }
            GarnetError::NoSuchMethod(info) => {
                write!(
                    f,
                    "NoSuchMethodError: method '{}' not found with {} positional argument(s)",
                    info.method_name,
                    info.positional_arguments.len()
                )
            }
            GarnetError::Compilation(err) => {
                write!(f, "compilation of '{}' failed: {}", err.function_name, err.message)
            }
        }
    }
}

impl std::error::Error for GarnetError {}

// =============================================================================
// Tests
// =============================================================================
