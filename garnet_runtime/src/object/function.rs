//! Functions and the function table.
//!
//! A function is the identity of a callable. It owns its current code (one
//! ownership slot used for dispatch) and keeps its unoptimized code as the
//! permanent fallback; tiered compilation and deoptimization swap the
//! current-code slot, never the identity.

use crate::object::class::{ClassId, ClassTable};
use crate::object::code::CodeId;
use garnet_core::intern::Symbol;

bitflags::bitflags! {
    /// Function attribute flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FunctionFlags: u8 {
        /// Static function (no receiver).
        const STATIC = 1 << 0;
        /// Eligible for optimizing compilation.
        const OPTIMIZABLE = 1 << 1;
    }
}

/// What kind of callable a function is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// An ordinary method or top-level function.
    Regular,
    /// A getter (mangled `get:` name).
    Getter,
    /// A setter.
    Setter,
    /// An explicit closure function.
    Closure,
    /// A closure conjured for a method accessed as a field.
    ImplicitClosure,
    /// The signature function of a closure class.
    Signature,
}

/// Identity of a callable within an isolate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(u32);

impl FunctionId {
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

// =============================================================================
// Function
// =============================================================================

/// A callable.
///
/// Parameter counting convention: for dynamic functions the receiver counts
/// as the first fixed parameter, matching the call-site argument counts seen
/// by the dispatch engine.
#[derive(Debug)]
pub struct Function {
    /// Function name (a symbol; getters carry the mangled `get:` name).
    pub name: Symbol,
    /// Owning class.
    pub owner: ClassId,
    /// Kind of callable.
    pub kind: FunctionKind,
    /// Attribute flags.
    pub flags: FunctionFlags,
    /// Fixed (required) parameters, including the receiver when dynamic.
    pub num_fixed_parameters: usize,
    /// Optional positional parameters.
    pub num_optional_parameters: usize,
    /// Declared named parameters.
    pub named_parameters: Vec<Symbol>,
    /// Names of all positional parameters, receiver first when dynamic.
    pub parameter_names: Vec<Symbol>,
    /// Token position of the declaration.
    pub token_pos: i64,
    /// Monotonically increasing hotness counter; may be swung negative to
    /// cool a function.
    pub usage_counter: i64,
    /// Number of times frames of this function have deoptimized.
    pub deoptimization_counter: u32,
    /// Code currently bound for dispatch.
    pub current_code: Option<CodeId>,
    /// Permanent unoptimized fallback code.
    pub unoptimized_code: Option<CodeId>,
    /// Cached implicit-closure function, created on demand.
    pub implicit_closure_function: Option<FunctionId>,
    /// For implicit closures: the function they close over.
    pub parent_function: Option<FunctionId>,
}

impl Function {
    /// Create a dynamic instance function with only fixed parameters.
    ///
    /// `num_fixed_parameters` includes the receiver.
    #[must_use]
    pub fn dynamic(name: Symbol, owner: ClassId, num_fixed_parameters: usize) -> Self {
        Self {
            name,
            owner,
            kind: FunctionKind::Regular,
            flags: FunctionFlags::OPTIMIZABLE,
            num_fixed_parameters,
            num_optional_parameters: 0,
            named_parameters: Vec::new(),
            parameter_names: Vec::new(),
            token_pos: -1,
            usage_counter: 0,
            deoptimization_counter: 0,
            current_code: None,
            unoptimized_code: None,
            implicit_closure_function: None,
            parent_function: None,
        }
    }

    /// Create a static function with only fixed parameters.
    #[must_use]
    pub fn static_function(name: Symbol, owner: ClassId, num_fixed_parameters: usize) -> Self {
        let mut f = Self::dynamic(name, owner, num_fixed_parameters);
        f.flags |= FunctionFlags::STATIC;
        f
    }

    /// Whether this is a static function.
    #[inline]
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FunctionFlags::STATIC)
    }

    /// Whether this function can be dispatched on an instance.
    #[inline]
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        !self.is_static()
    }

    /// Whether the optimizing compiler may compile this function.
    #[inline]
    #[must_use]
    pub fn is_optimizable(&self) -> bool {
        self.flags.contains(FunctionFlags::OPTIMIZABLE)
    }

    /// Whether the function has code bound for dispatch.
    #[inline]
    #[must_use]
    pub fn has_code(&self) -> bool {
        self.current_code.is_some()
    }

    /// Whether the function declares optional (positional or named)
    /// parameters.
    #[inline]
    #[must_use]
    pub fn has_optional_parameters(&self) -> bool {
        self.num_optional_parameters > 0 || !self.named_parameters.is_empty()
    }

    /// Total declared parameter count.
    #[inline]
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        self.num_fixed_parameters + self.num_optional_parameters + self.named_parameters.len()
    }

    /// Whether a call with `num_arguments` total arguments, of which
    /// `num_named_arguments` are named, can bind to this function.
    ///
    /// Only the count of named arguments is checked, not their names.
    #[must_use]
    pub fn are_valid_argument_counts(
        &self,
        num_arguments: usize,
        num_named_arguments: usize,
    ) -> bool {
        if num_named_arguments > self.named_parameters.len() {
            return false;
        }
        let num_positional = match num_arguments.checked_sub(num_named_arguments) {
            Some(n) => n,
            None => return false,
        };
        num_positional >= self.num_fixed_parameters
            && num_positional <= self.num_fixed_parameters + self.num_optional_parameters
    }

    /// `Owner.name`, for traces and the optimization filter.
    #[must_use]
    pub fn qualified_name(&self, classes: &ClassTable) -> String {
        format!("{}.{}", classes.get(self.owner).name, self.name)
    }
}

// =============================================================================
// Function table
// =============================================================================

/// Per-isolate function table. Function ids index into it.
#[derive(Debug, Default)]
pub struct FunctionTable {
    functions: Vec<Function>,
}

impl FunctionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            functions: Vec::new(),
        }
    }

    /// Register a function, returning its id.
    pub fn register(&mut self, function: Function) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(function);
        id
    }

    /// Get a function.
    #[inline]
    #[must_use]
    pub fn get(&self, id: FunctionId) -> &Function {
        &self.functions[id.0 as usize]
    }

    /// Get a function mutably.
    #[inline]
    pub fn get_mut(&mut self, id: FunctionId) -> &mut Function {
        &mut self.functions[id.0 as usize]
    }

    /// Number of registered functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
