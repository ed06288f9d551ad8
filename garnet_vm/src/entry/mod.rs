//! The runtime-entry ABI.
//!
//! Each entry is declared with a [`RuntimeEntry`] descriptor carrying its
//! name and fixed argument count; every entry asserts the actual count on
//! the way in and traces itself under `trace_runtime_calls`. Arguments and
//! the return value travel through [`RuntimeArgs`]; checked accessors
//! assert the argument kind the entry declared, the way checked handles do
//! in a handle-based runtime.
//!
//! Full entries may allocate, trigger collection and throw. The two deopt
//! leaf entries bypass this structure: they take scalars and return
//! scalars, and must not touch the managed heap.

use crate::isolate::Isolate;
use garnet_core::intern::Symbol;
use garnet_core::value::Value;
use garnet_runtime::arguments::ArgumentsDescriptor;
use garnet_runtime::object::class::ClassId;
use garnet_runtime::object::code::CodeId;
use garnet_runtime::object::function::FunctionId;
use garnet_runtime::object::icdata::IcDataId;
use garnet_runtime::object::subtype_cache::SubtypeCacheId;
use garnet_runtime::type_args::{Type, TypeArgsId};
use smallvec::SmallVec;

pub mod allocate;
pub mod dispatch;
pub mod interrupts;
pub mod tiered;
pub mod type_check;

/// Declaration of one runtime entry.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeEntry {
    /// Entry name, as it appears in traces.
    pub name: &'static str,
    /// Declared argument count; asserted against every call.
    pub argument_count: usize,
    /// Leaf entries must not allocate on the managed heap.
    pub is_leaf: bool,
}

impl RuntimeEntry {
    /// Declare a full entry.
    #[must_use]
    pub const fn new(name: &'static str, argument_count: usize) -> Self {
        Self {
            name,
            argument_count,
            is_leaf: false,
        }
    }

    /// Declare a leaf entry.
    #[must_use]
    pub const fn leaf(name: &'static str, argument_count: usize) -> Self {
        Self {
            name,
            argument_count,
            is_leaf: true,
        }
    }
}

// =============================================================================
// Arguments
// =============================================================================

/// One argument (or result) of a runtime entry.
#[derive(Debug, Clone)]
pub enum NativeArg {
    /// A managed value.
    Value(Value),
    /// A class.
    Class(ClassId),
    /// A function.
    Function(FunctionId),
    /// A code object.
    Code(CodeId),
    /// A type expression.
    Type(Type),
    /// A type-arguments vector, possibly null.
    TypeArgs(Option<TypeArgsId>),
    /// The no-instantiator sentinel: type arguments need no instantiation.
    NoInstantiator,
    /// An IC data record.
    IcData(IcDataId),
    /// A subtype-test cache, possibly null.
    SubtypeCache(Option<SubtypeCacheId>),
    /// An interned symbol.
    Symbol(Symbol),
    /// An arguments descriptor.
    Descriptor(ArgumentsDescriptor),
}

impl NativeArg {
    /// The value, asserting the kind.
    #[must_use]
    pub fn as_value(&self) -> Value {
        match self {
            NativeArg::Value(v) => *v,
            other => panic!("value argument expected, found {other:?}"),
        }
    }

    /// The Smi payload, asserting the kind.
    #[must_use]
    pub fn as_smi(&self) -> i64 {
        self.as_value().as_smi().expect("Smi argument expected")
    }

    /// The class, asserting the kind.
    #[must_use]
    pub fn as_class(&self) -> ClassId {
        match self {
            NativeArg::Class(c) => *c,
            other => panic!("class argument expected, found {other:?}"),
        }
    }

    /// The function, asserting the kind.
    #[must_use]
    pub fn as_function(&self) -> FunctionId {
        match self {
            NativeArg::Function(f) => *f,
            other => panic!("function argument expected, found {other:?}"),
        }
    }

    /// The type, asserting the kind.
    #[must_use]
    pub fn as_type(&self) -> Type {
        match self {
            NativeArg::Type(t) => t.clone(),
            other => panic!("type argument expected, found {other:?}"),
        }
    }

    /// The type arguments, asserting the kind.
    #[must_use]
    pub fn as_type_args(&self) -> Option<TypeArgsId> {
        match self {
            NativeArg::TypeArgs(ta) => *ta,
            other => panic!("type-arguments argument expected, found {other:?}"),
        }
    }

    /// The instantiator: `None` for the no-instantiator sentinel, otherwise
    /// the (possibly null) instantiator type arguments.
    #[must_use]
    pub fn as_instantiator(&self) -> Option<Option<TypeArgsId>> {
        match self {
            NativeArg::NoInstantiator => None,
            NativeArg::TypeArgs(ta) => Some(*ta),
            other => panic!("instantiator argument expected, found {other:?}"),
        }
    }

    /// The IC data, asserting the kind.
    #[must_use]
    pub fn as_ic_data(&self) -> IcDataId {
        match self {
            NativeArg::IcData(ic) => *ic,
            other => panic!("IC data argument expected, found {other:?}"),
        }
    }

    /// The subtype-test cache, asserting the kind.
    #[must_use]
    pub fn as_subtype_cache(&self) -> Option<SubtypeCacheId> {
        match self {
            NativeArg::SubtypeCache(c) => *c,
            other => panic!("subtype-cache argument expected, found {other:?}"),
        }
    }

    /// The symbol, asserting the kind.
    #[must_use]
    pub fn as_symbol(&self) -> Symbol {
        match self {
            NativeArg::Symbol(s) => s.clone(),
            other => panic!("symbol argument expected, found {other:?}"),
        }
    }

    /// The arguments descriptor, asserting the kind.
    #[must_use]
    pub fn as_descriptor(&self) -> ArgumentsDescriptor {
        match self {
            NativeArg::Descriptor(d) => d.clone(),
            other => panic!("arguments-descriptor argument expected, found {other:?}"),
        }
    }
}

/// The runtime-arguments structure of one entry invocation.
#[derive(Debug)]
pub struct RuntimeArgs {
    values: SmallVec<[NativeArg; 8]>,
    return_value: NativeArg,
}

impl RuntimeArgs {
    /// Package arguments for an entry call.
    #[must_use]
    pub fn new(values: impl IntoIterator<Item = NativeArg>) -> Self {
        Self {
            values: values.into_iter().collect(),
            return_value: NativeArg::Value(Value::null()),
        }
    }

    /// Number of arguments supplied.
    #[inline]
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.values.len()
    }

    /// The `i`-th argument.
    #[inline]
    #[must_use]
    pub fn arg_at(&self, i: usize) -> &NativeArg {
        &self.values[i]
    }

    /// Install the entry's result.
    #[inline]
    pub fn set_return(&mut self, value: NativeArg) {
        self.return_value = value;
    }

    /// Install a managed value result.
    #[inline]
    pub fn set_return_value(&mut self, value: Value) {
        self.return_value = NativeArg::Value(value);
    }

    /// The result as installed.
    #[inline]
    #[must_use]
    pub fn return_value(&self) -> &NativeArg {
        &self.return_value
    }

    /// The result as a managed value; null if the entry returned a null
    /// object.
    #[must_use]
    pub fn returned_value(&self) -> Value {
        self.return_value.as_value()
    }

    /// The result as a code object; `None` if the entry returned null.
    #[must_use]
    pub fn returned_code(&self) -> Option<CodeId> {
        match &self.return_value {
            NativeArg::Code(c) => Some(*c),
            NativeArg::Value(v) if v.is_null() => None,
            other => panic!("code result expected, found {other:?}"),
        }
    }

    /// The result as a function; `None` if the entry returned null.
    #[must_use]
    pub fn returned_function(&self) -> Option<FunctionId> {
        match &self.return_value {
            NativeArg::Function(f) => Some(*f),
            NativeArg::Value(v) if v.is_null() => None,
            other => panic!("function result expected, found {other:?}"),
        }
    }
}

/// Entry prologue: argument-count assertion and call tracing.
pub(crate) fn enter(isolate: &Isolate, entry: &RuntimeEntry, arguments: &RuntimeArgs) {
    assert_eq!(
        arguments.arg_count(),
        entry.argument_count,
        "{} declared {} arguments",
        entry.name,
        entry.argument_count
    );
    if isolate.flags.trace_runtime_calls {
        eprintln!("runtime call: {}", entry.name);
    }
}

// =============================================================================
// Tests
// =============================================================================
