//! Runtime flags.
//!
//! A plain value struct owned by the isolate. Tests flip individual fields;
//! embedders construct one up front.

/// Usage-counter sentinel that keeps a function from being considered hot
/// again for a very long time ("permanently cooled").
pub const LOW_INVOCATION_COUNT: i64 = -100_000_000;

/// Runtime flag surface.
#[derive(Debug, Clone)]
pub struct Flags {
    /// Enable IC-based dispatch.
    pub inline_cache: bool,
    /// Log IC misses.
    pub trace_ic: bool,
    /// Log IC misses coming from optimized code.
    pub trace_ic_miss_in_optimized: bool,
    /// Log IC calls in optimized code.
    pub trace_optimized_ic_calls: bool,
    /// Log code patches.
    pub trace_patching: bool,
    /// Log every runtime entry.
    pub trace_runtime_calls: bool,
    /// Log each type-check entry.
    pub trace_type_checks: bool,
    /// Log a per-frame summary for each deoptimization.
    pub trace_deoptimization: bool,
    /// Log each deopt-info instruction.
    pub trace_deoptimization_verbose: bool,
    /// Log failed optimization attempts.
    pub trace_failed_optimization_attempts: bool,
    /// Force deoptimization of all live frames on every native-to-managed
    /// return.
    pub deoptimize_alot: bool,
    /// Perform assignability checks at run time.
    pub enable_type_checks: bool,
    /// Usage count before a function is optimized; -1 means never.
    pub optimization_counter_threshold: i64,
    /// Extra usage ticks required before a reoptimization.
    pub reoptimization_counter_threshold: i64,
    /// Deoptimization count beyond which a function is permanently cooled.
    pub deoptimization_counter_threshold: u32,
    /// Per-site cap on subtype-test cache entries.
    pub max_subtype_cache_entries: usize,
    /// Optimize only functions whose qualified name contains this substring.
    pub optimization_filter: Option<String>,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            inline_cache: true,
            trace_ic: false,
            trace_ic_miss_in_optimized: false,
            trace_optimized_ic_calls: false,
            trace_patching: false,
            trace_runtime_calls: false,
            trace_type_checks: false,
            trace_deoptimization: false,
            trace_deoptimization_verbose: false,
            trace_failed_optimization_attempts: false,
            deoptimize_alot: false,
            enable_type_checks: false,
            optimization_counter_threshold: 2000,
            reoptimization_counter_threshold: 2000,
            deoptimization_counter_threshold: 16,
            max_subtype_cache_entries: 100,
            optimization_filter: None,
        }
    }
}

impl Flags {
    /// Whether hotness-based optimization is enabled at all.
    #[inline]
    #[must_use]
    pub fn optimization_enabled(&self) -> bool {
        self.optimization_counter_threshold >= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_flag_table() {
        let flags = Flags::default();
        assert!(flags.inline_cache);
        assert!(!flags.trace_ic);
        assert!(!flags.deoptimize_alot);
        assert_eq!(flags.optimization_counter_threshold, 2000);
        assert_eq!(flags.reoptimization_counter_threshold, 2000);
        assert_eq!(flags.max_subtype_cache_entries, 100);
        assert!(flags.optimization_filter.is_none());
    }

    #[test]
    fn test_optimization_disabled_by_negative_threshold() {
        let mut flags = Flags::default();
        assert!(flags.optimization_enabled());
        flags.optimization_counter_threshold = -1;
        assert!(!flags.optimization_enabled());
    }
}
