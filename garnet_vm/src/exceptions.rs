//! Exception construction and propagation.
//!
//! Failures cross the generated-code boundary as [`GarnetError`] values.
//! These helpers build them; entries return them through `Result` and the
//! stub layer transfers control to the nearest managed handler.

use crate::entry::{enter, RuntimeArgs, RuntimeEntry};
use crate::isolate::Isolate;
use garnet_core::error::{GarnetError, NoSuchMethodInfo, TypeErrorInfo, VmResult};
use garnet_core::value::Value;

/// Exception helpers.
pub struct Exceptions;

impl Exceptions {
    /// Throw an exception instance; the stack trace is attached during
    /// unwinding.
    #[must_use]
    pub fn throw(exception: Value) -> GarnetError {
        GarnetError::Unwind {
            exception,
            stacktrace: Value::null(),
        }
    }

    /// Rethrow an exception with its original stack trace.
    #[must_use]
    pub fn rethrow(exception: Value, stacktrace: Value) -> GarnetError {
        GarnetError::Unwind {
            exception,
            stacktrace,
        }
    }

    /// Surface an error to the nearest managed handler.
    ///
    /// Recovery is the exception, not the rule: entries call this for every
    /// error their contract does not explicitly let them swallow.
    #[must_use]
    pub fn propagate_error(error: GarnetError) -> GarnetError {
        error
    }

    /// Build a dynamic type error.
    #[must_use]
    pub fn create_type_error(
        token_pos: i64,
        src_type_name: impl Into<String>,
        dst_type_name: impl Into<String>,
        dst_name: impl Into<String>,
        malformed_message: Option<String>,
    ) -> GarnetError {
        GarnetError::TypeError(TypeErrorInfo {
            token_pos,
            src_type_name: src_type_name.into(),
            dst_type_name: dst_type_name.into(),
            dst_name: dst_name.into(),
            malformed_message,
        })
    }

    /// Build a NoSuchMethod error for a failed `call` on a non-closure or a
    /// mismatched closure invocation, attaching the parameter-name hint of
    /// a same-named method when one exists.
    #[must_use]
    pub fn create_no_such_method(
        isolate: &Isolate,
        receiver: Value,
        method_name: &str,
        positional_arguments: Vec<Value>,
    ) -> GarnetError {
        let similar_parameter_names = isolate.similar_parameter_names(receiver, method_name);
        GarnetError::NoSuchMethod(NoSuchMethodInfo {
            receiver,
            method_name: method_name.to_string(),
            positional_arguments,
            named_arguments: Vec::new(),
            similar_parameter_names,
        })
    }
}

// =============================================================================
// Entries
// =============================================================================

/// Throw an exception.
/// Arg0: the exception instance.
pub const THROW_ENTRY: RuntimeEntry = RuntimeEntry::new("Throw", 1);

/// See [`THROW_ENTRY`].
pub fn throw(isolate: &mut Isolate, arguments: &mut RuntimeArgs) -> VmResult<()> {
    enter(isolate, &THROW_ENTRY, arguments);
    let exception = arguments.arg_at(0).as_value();
    Err(Exceptions::throw(exception))
}

/// Rethrow an exception with its captured stack trace.
/// Arg0: the exception instance.
/// Arg1: the stack trace instance.
pub const RETHROW_ENTRY: RuntimeEntry = RuntimeEntry::new("ReThrow", 2);

/// See [`RETHROW_ENTRY`].
pub fn rethrow(isolate: &mut Isolate, arguments: &mut RuntimeArgs) -> VmResult<()> {
    enter(isolate, &RETHROW_ENTRY, arguments);
    let exception = arguments.arg_at(0).as_value();
    let stacktrace = arguments.arg_at(1).as_value();
    Err(Exceptions::rethrow(exception, stacktrace))
}

// =============================================================================
// Tests
// =============================================================================
