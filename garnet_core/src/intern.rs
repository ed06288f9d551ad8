//! Symbol interning.
//!
//! Method names, parameter names and type names are interned once per
//! isolate and compared by pointer identity. The dispatch engine relies on
//! this: IC checks and arguments-descriptor scans compare symbols with a
//! single pointer comparison.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Prefix mangled onto a method name to form its getter name.
const GETTER_PREFIX: &str = "get:";

// =============================================================================
// Symbol
// =============================================================================

/// A handle to an interned string.
///
/// Two symbols interned by the same table are equal if and only if they hold
/// the same content, so equality is a pointer comparison.
#[derive(Clone)]
pub struct Symbol {
    inner: Arc<str>,
}

impl Symbol {
    #[inline]
    fn new(s: Arc<str>) -> Self {
        Self { inner: s }
    }

    /// String content of the symbol.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Whether this symbol is a mangled getter name.
    #[inline]
    #[must_use]
    pub fn is_getter_name(&self) -> bool {
        self.inner.starts_with(GETTER_PREFIX)
    }
}

impl PartialEq for Symbol {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.inner) as *const u8).hash(state);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Symbol {
    #[inline]
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

// =============================================================================
// Symbol table
// =============================================================================

/// Per-isolate symbol table.
///
/// Interning the same string twice returns the same handle.
pub struct SymbolTable {
    symbols: RwLock<FxHashMap<Arc<str>, Symbol>>,
}

impl SymbolTable {
    /// Create an empty symbol table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            symbols: RwLock::new(FxHashMap::default()),
        }
    }

    /// Intern a string, returning its unique symbol.
    pub fn intern(&self, s: &str) -> Symbol {
        if let Some(sym) = self.symbols.read().get(s) {
            return sym.clone();
        }
        let mut symbols = self.symbols.write();
        // Double-checked: another caller may have interned between the locks.
        if let Some(sym) = symbols.get(s) {
            return sym.clone();
        }
        let arc: Arc<str> = Arc::from(s);
        let sym = Symbol::new(Arc::clone(&arc));
        symbols.insert(arc, sym.clone());
        sym
    }

    /// Mangled getter name for `name` (`foo` → `get:foo`).
    pub fn getter_name(&self, name: &Symbol) -> Symbol {
        self.intern(&format!("{GETTER_PREFIX}{}", name.as_str()))
    }

    /// Base name of a mangled getter name (`get:foo` → `foo`).
    ///
    /// The argument must satisfy [`Symbol::is_getter_name`].
    pub fn name_from_getter(&self, getter: &Symbol) -> Symbol {
        debug_assert!(getter.is_getter_name());
        self.intern(&getter.as_str()[GETTER_PREFIX.len()..])
    }

    /// Number of distinct symbols interned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    /// Whether no symbols have been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
