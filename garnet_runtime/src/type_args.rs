//! Type-argument vectors: instantiation, canonicalization and bounds.
//!
//! Type arguments come in two shapes:
//!
//! - **`Vector`**: an explicit list of types. May still contain type
//!   parameters (uninstantiated) and may or may not be the interned
//!   canonical representative.
//! - **`Instantiated`**: a lazy pair `(uninstantiated, instantiator)` whose
//!   reduction is deferred until something needs the flat vector.
//!
//! `canonicalize` reduces lazy wrappers transitively and interns the result,
//! so equal vectors share one id afterwards and everything downstream (the
//! subtype-test cache in particular) compares type arguments by id equality.

use crate::object::class::{Class, ClassId, ClassTable};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// Handle to a type-arguments record in the isolate's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeArgsId(u32);

impl TypeArgsId {
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
// Types
// =============================================================================

/// A type expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// The dynamic type; every instance satisfies it.
    Dynamic,
    /// A reference to the enclosing declaration's type parameter `i`.
    Parameter(u16),
    /// A (possibly generic) interface type.
    Interface {
        /// The type's class.
        class: ClassId,
        /// Type arguments, absent for raw types.
        arguments: Option<TypeArgsId>,
    },
    /// A type whose declaration did not resolve; carries the diagnostic.
    Malformed(Arc<str>),
}

impl Type {
    /// A non-generic interface type.
    #[inline]
    #[must_use]
    pub const fn interface(class: ClassId) -> Self {
        Type::Interface {
            class,
            arguments: None,
        }
    }

    /// User-visible name of the type.
    #[must_use]
    pub fn user_visible_name(&self, classes: &ClassTable) -> String {
        match self {
            Type::Dynamic => "dynamic".to_string(),
            Type::Parameter(i) => format!("T{i}"),
            Type::Interface { class, .. } => classes.get(*class).name.as_str().to_string(),
            Type::Malformed(_) => "malformed".to_string(),
        }
    }
}

/// A type-arguments record.
#[derive(Debug, Clone)]
pub enum TypeArguments {
    /// An explicit vector of types.
    Vector(Vec<Type>),
    /// A lazy pair awaiting reduction.
    Instantiated {
        /// The uninstantiated vector.
        uninstantiated: TypeArgsId,
        /// The instantiator vector, or `None` for the raw instantiation.
        instantiator: Option<TypeArgsId>,
    },
}

// =============================================================================
// Table
// =============================================================================

/// Per-isolate type-arguments table with an intern map for canonical forms.
#[derive(Debug, Default)]
pub struct TypeArgumentsTable {
    all: Vec<TypeArguments>,
    canonical: FxHashMap<Vec<Type>, TypeArgsId>,
    canonical_ids: FxHashSet<TypeArgsId>,
}

impl TypeArgumentsTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh (non-interned) vector.
    pub fn new_vector(&mut self, types: Vec<Type>) -> TypeArgsId {
        let id = TypeArgsId(self.all.len() as u32);
        self.all.push(TypeArguments::Vector(types));
        id
    }

    /// Record a lazy instantiation pair.
    pub fn new_instantiated(
        &mut self,
        uninstantiated: TypeArgsId,
        instantiator: Option<TypeArgsId>,
    ) -> TypeArgsId {
        let id = TypeArgsId(self.all.len() as u32);
        self.all.push(TypeArguments::Instantiated {
            uninstantiated,
            instantiator,
        });
        id
    }

    /// Get a record.
    #[inline]
    #[must_use]
    pub fn get(&self, id: TypeArgsId) -> &TypeArguments {
        &self.all[id.0 as usize]
    }

    /// Vector length. A lazy pair has the length of its uninstantiated
    /// vector.
    #[must_use]
    pub fn len_of(&self, id: TypeArgsId) -> usize {
        match self.get(id) {
            TypeArguments::Vector(types) => types.len(),
            TypeArguments::Instantiated { uninstantiated, .. } => self.len_of(*uninstantiated),
        }
    }

    /// Whether the record is fully instantiated: a lazy pair always is, a
    /// vector is when no type parameter occurs anywhere in it.
    #[must_use]
    pub fn is_instantiated(&self, id: TypeArgsId) -> bool {
        match self.get(id) {
            TypeArguments::Vector(types) => types.iter().all(|t| self.type_is_instantiated(t)),
            TypeArguments::Instantiated { .. } => true,
        }
    }

    fn type_is_instantiated(&self, ty: &Type) -> bool {
        match ty {
            Type::Parameter(_) => false,
            Type::Interface {
                arguments: Some(args),
                ..
            } => self.is_instantiated(*args),
            _ => true,
        }
    }

    /// Whether the record is a still-lazy `Instantiated` wrapper.
    #[inline]
    #[must_use]
    pub fn is_lazy(&self, id: TypeArgsId) -> bool {
        matches!(self.get(id), TypeArguments::Instantiated { .. })
    }

    /// Whether the record is the interned canonical representative of its
    /// vector.
    #[inline]
    #[must_use]
    pub fn is_canonical(&self, id: TypeArgsId) -> bool {
        self.canonical_ids.contains(&id)
    }

    /// Whether the vector is the identity mapping `[T0, T1, ..]` onto the
    /// instantiator.
    #[must_use]
    pub fn is_uninstantiated_identity(&self, id: TypeArgsId) -> bool {
        match self.get(id) {
            TypeArguments::Vector(types) => types
                .iter()
                .enumerate()
                .all(|(i, t)| matches!(t, Type::Parameter(p) if *p as usize == i)),
            TypeArguments::Instantiated { .. } => false,
        }
    }

    // =========================================================================
    // Instantiation
    // =========================================================================

    /// Instantiate `uninstantiated` against `instantiator`.
    ///
    /// When the instantiator is null, or the uninstantiated vector is the
    /// identity mapping of matching length, the instantiator is the result;
    /// otherwise a lazy wrapper is produced. Compiled code is expected to
    /// have inlined the identity case already, so reaching the wrapper path
    /// with an identity vector of equal length would be a compiler bug.
    pub fn instantiate(
        &mut self,
        uninstantiated: TypeArgsId,
        instantiator: Option<TypeArgsId>,
    ) -> Option<TypeArgsId> {
        debug_assert!(!self.is_instantiated(uninstantiated));
        let Some(instantiator_id) = instantiator else {
            return None;
        };
        if self.is_uninstantiated_identity(uninstantiated)
            && self.len_of(instantiator_id) == self.len_of(uninstantiated)
        {
            return Some(instantiator_id);
        }
        Some(self.new_instantiated(uninstantiated, instantiator))
    }

    /// Substitute `instantiator_types` into one type.
    fn instantiate_type(&mut self, ty: &Type, instantiator_types: &[Type]) -> Type {
        match ty {
            Type::Parameter(i) => instantiator_types
                .get(*i as usize)
                .cloned()
                .unwrap_or(Type::Dynamic),
            Type::Interface {
                class,
                arguments: Some(args),
            } => {
                let flat = self.flatten(*args);
                let substituted: Vec<Type> = flat
                    .iter()
                    .map(|t| self.instantiate_type(t, instantiator_types))
                    .collect();
                let new_args = self.new_vector(substituted);
                Type::Interface {
                    class: *class,
                    arguments: Some(new_args),
                }
            }
            other => other.clone(),
        }
    }

    /// Instantiate one type expression against an instantiator vector.
    /// With no instantiator, type parameters become dynamic.
    pub fn instantiate_type_from(
        &mut self,
        ty: &Type,
        instantiator: Option<TypeArgsId>,
    ) -> Type {
        let instantiator_types = match instantiator {
            Some(id) => self.flatten(id),
            None => Vec::new(),
        };
        self.instantiate_type(ty, &instantiator_types)
    }

    /// The flat vector of a record, reducing lazy wrappers transitively.
    #[must_use]
    pub fn flatten(&mut self, id: TypeArgsId) -> Vec<Type> {
        match self.get(id).clone() {
            TypeArguments::Vector(types) => types,
            TypeArguments::Instantiated {
                uninstantiated,
                instantiator,
            } => {
                let instantiator_types = match instantiator {
                    Some(inst) => self.flatten(inst),
                    None => Vec::new(),
                };
                let base = self.flatten(uninstantiated);
                base.iter()
                    .map(|t| self.instantiate_type(t, &instantiator_types))
                    .collect()
            }
        }
    }

    // =========================================================================
    // Canonicalization
    // =========================================================================

    /// The unique interned canonical form of a record. Reduces lazy wrappers
    /// transitively; equal vectors share identity afterwards.
    pub fn canonicalize(&mut self, id: TypeArgsId) -> TypeArgsId {
        if self.is_canonical(id) {
            return id;
        }
        let flat = self.flatten(id);
        // Canonicalize nested vectors first so Interface arguments intern to
        // shared ids as well.
        let flat: Vec<Type> = flat
            .into_iter()
            .map(|t| match t {
                Type::Interface {
                    class,
                    arguments: Some(args),
                } => {
                    let canonical = self.canonicalize(args);
                    Type::Interface {
                        class,
                        arguments: Some(canonical),
                    }
                }
                other => other,
            })
            .collect();
        if let Some(existing) = self.canonical.get(&flat) {
            return *existing;
        }
        let id = self.new_vector(flat.clone());
        self.canonical.insert(flat, id);
        self.canonical_ids.insert(id);
        id
    }

    // =========================================================================
    // Bounds
    // =========================================================================

    /// Check instantiated type arguments against a class's declared bounds.
    ///
    /// `Err` carries the malformed-type diagnostic: either a malformed bound
    /// declaration or the description of the violated bound.
    pub fn within_bounds_of(
        &mut self,
        arguments: TypeArgsId,
        class: &Class,
        bounds_instantiator: Option<TypeArgsId>,
        classes: &ClassTable,
    ) -> Result<(), String> {
        let argument_types = self.flatten(arguments);
        assert_eq!(argument_types.len(), class.num_type_parameters);
        let instantiator_types = match bounds_instantiator {
            Some(id) => self.flatten(id),
            None => Vec::new(),
        };
        for (i, bound) in class.bounds.iter().enumerate() {
            if let Type::Malformed(message) = bound {
                return Err(message.to_string());
            }
            let bound = self.instantiate_type(&bound.clone(), &instantiator_types);
            let argument = &argument_types[i];
            if !self.is_subtype(argument, &bound, classes) {
                return Err(format!(
                    "type '{}' does not extend bound '{}' of '{}'",
                    argument.user_visible_name(classes),
                    bound.user_visible_name(classes),
                    class.name
                ));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Subtype oracle
    // =========================================================================

    /// Whether `sub` is a subtype of `sup`.
    ///
    /// Class subtyping follows the superclass chain; generic interface types
    /// compare their argument vectors covariantly, with a raw supertype
    /// accepting anything.
    #[must_use]
    pub fn is_subtype(&mut self, sub: &Type, sup: &Type, classes: &ClassTable) -> bool {
        match (sub, sup) {
            (_, Type::Dynamic) | (Type::Dynamic, _) => true,
            (Type::Malformed(_), _) | (_, Type::Malformed(_)) => false,
            (Type::Parameter(a), Type::Parameter(b)) => a == b,
            (Type::Parameter(_), _) | (_, Type::Parameter(_)) => false,
            (
                Type::Interface {
                    class: sub_class,
                    arguments: sub_args,
                },
                Type::Interface {
                    class: sup_class,
                    arguments: sup_args,
                },
            ) => {
                if !classes.is_subclass_of(*sub_class, *sup_class) {
                    return false;
                }
                let Some(sup_args) = sup_args else {
                    // Raw supertype: no argument constraints.
                    return true;
                };
                let Some(sub_args) = sub_args else {
                    // Raw subtype against a generic supertype only works if
                    // the supertype's arguments are all dynamic.
                    let sup_flat = self.flatten(*sup_args);
                    return sup_flat.iter().all(|t| matches!(t, Type::Dynamic));
                };
                let sub_flat = self.flatten(*sub_args);
                let sup_flat = self.flatten(*sup_args);
                if sub_flat.len() != sup_flat.len() {
                    return false;
                }
                sub_flat
                    .iter()
                    .zip(sup_flat.iter())
                    .all(|(a, b)| self.is_subtype(a, b, classes))
            }
        }
    }

    /// User-visible name of a vectorized type-arguments record, for traces.
    #[must_use]
    pub fn user_visible_name(&mut self, id: TypeArgsId, classes: &ClassTable) -> String {
        let flat = self.flatten(id);
        let names: Vec<String> = flat.iter().map(|t| t.user_visible_name(classes)).collect();
        format!("<{}>", names.join(", "))
    }
}

/// The uninstantiated identity vector `[T0, T1, ..]` of length `n`.
#[must_use]
pub fn identity_vector(n: usize) -> Vec<Type> {
    (0..n).map(|i| Type::Parameter(i as u16)).collect()
}

/// A generic interface type with an explicit argument vector.
#[must_use]
pub fn generic_interface(class: ClassId, arguments: TypeArgsId) -> Type {
    Type::Interface {
        class,
        arguments: Some(arguments),
    }
}

// =============================================================================
// Tests
// =============================================================================
