//! Deoptimization context and deferred boxes.
//!
//! The three deopt phases communicate through scratch buffers owned by the
//! isolate, because the stack is being rewritten underneath them. The fill
//! phase assembles those buffers into a [`DeoptContext`]; boxing
//! allocations discovered while filling are deferred to the
//! materialization phase, which is the only step allowed to touch the
//! managed heap.

use crate::stack::{NUM_CPU_REGISTERS, NUM_FPU_REGISTERS};
use garnet_core::value::RawWord;
use garnet_runtime::object::code::{Address, CodeId, DeoptReason};

/// A pending boxed-double allocation: the payload and the stack slot that
/// will hold the box.
#[derive(Debug, Clone, Copy)]
pub struct DeferredDouble {
    /// Target stack slot.
    pub slot: Address,
    /// Unboxed payload.
    pub value: f64,
}

/// A pending boxed-int64 allocation for a payload outside the Smi range.
#[derive(Debug, Clone, Copy)]
pub struct DeferredInt64 {
    /// Target stack slot.
    pub slot: Address,
    /// Unboxed payload.
    pub value: i64,
}

// =============================================================================
// DeoptContext
// =============================================================================

/// Everything the fill phase needs to execute one frame translation.
///
/// The frame copy is laid out as the copy phase wrote it:
///
/// ```text
///   [0]                      return address into the optimized frame
///   [1 .. 1 + locals]        locals and pc marker (sp up to fp)
///   [len - num_args - 2]     saved caller frame pointer
///   [len - num_args - 1]     caller return address
///   [len - num_args ..]      incoming fixed arguments
/// ```
#[derive(Debug)]
pub struct DeoptContext {
    /// The optimized code being deoptimized; its constants pool feeds the
    /// `Constant`, `PcMarker` and `RetAddress` translations.
    pub code: CodeId,
    /// First target address of the unoptimized frame being written.
    pub start: Address,
    /// Number of target slots.
    pub translation_length: usize,
    /// Incoming fixed arguments included in the frame copy (0 when the
    /// function has optional parameters).
    pub num_args: usize,
    /// Why the frame deoptimized.
    pub reason: DeoptReason,
    /// CPU-register copy taken by the copy phase.
    pub cpu_registers: Box<[RawWord; NUM_CPU_REGISTERS]>,
    /// FPU-register copy taken by the copy phase.
    pub fpu_registers: Box<[f64; NUM_FPU_REGISTERS]>,
    /// The optimized-frame copy taken by the copy phase.
    pub frame_copy: Vec<RawWord>,
    /// Caller frame pointer recovered by the `CallerFp` translation.
    caller_fp: Option<Address>,
}

impl DeoptContext {
    /// Assemble a context from the scratch buffers.
    #[must_use]
    pub fn new(
        code: CodeId,
        start: Address,
        translation_length: usize,
        num_args: usize,
        reason: DeoptReason,
        cpu_registers: Box<[RawWord; NUM_CPU_REGISTERS]>,
        fpu_registers: Box<[f64; NUM_FPU_REGISTERS]>,
        frame_copy: Vec<RawWord>,
    ) -> Self {
        Self {
            code,
            start,
            translation_length,
            num_args,
            reason,
            cpu_registers,
            fpu_registers,
            frame_copy,
            caller_fp: None,
        }
    }

    /// Target stack address of one translation slot.
    #[inline]
    #[must_use]
    pub fn to_address(&self, to_index: usize) -> Address {
        debug_assert!(to_index < self.translation_length);
        self.start + to_index
    }

    /// Index of the saved caller frame pointer in the frame copy.
    #[inline]
    #[must_use]
    pub fn caller_fp_index(&self) -> usize {
        self.frame_copy.len() - self.num_args - 2
    }

    /// The caller frame pointer as copied from the optimized frame.
    #[inline]
    #[must_use]
    pub fn from_fp(&self) -> RawWord {
        self.frame_copy[self.caller_fp_index()]
    }

    /// The caller return address as copied from the optimized frame.
    #[inline]
    #[must_use]
    pub fn from_pc(&self) -> RawWord {
        self.frame_copy[self.caller_fp_index() + 1]
    }

    /// Record the reconstructed caller frame pointer.
    pub fn set_caller_fp(&mut self, fp: Address) {
        self.caller_fp = Some(fp);
    }

    /// The reconstructed caller frame pointer. The translation must have
    /// executed a `CallerFp` instruction.
    #[must_use]
    pub fn caller_fp(&self) -> Address {
        self.caller_fp
            .expect("translation did not reconstruct the caller fp")
    }
}

// =============================================================================
// Tests
// =============================================================================
