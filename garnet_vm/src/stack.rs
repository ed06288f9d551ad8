//! The simulated managed stack and frame walker.
//!
//! Managed frames live in a word-addressed stack memory owned by the
//! isolate. Frames grow downward. The layout of one frame, relative to its
//! frame pointer:
//!
//! ```text
//!   fp + 2 + n-1  first incoming argument
//!   fp + 2        last incoming argument
//!   fp + 1        return address (the call-site pc in the caller)
//!   fp + 0        saved caller frame pointer
//!   fp - 1        pc marker: entry/stub marker, or the code entry point
//!   fp - 2 .. sp  locals and expression slots (sp = lowest used address)
//! ```
//!
//! The pc marker classifies a frame without a code lookup: entry frames and
//! stub frames use reserved markers below [`CODE_BASE`]; managed frames
//! store their code's entry point.
//!
//! Walking starts from the exit-frame info the stub layer records when
//! native code is entered, or from a caller-supplied frame pointer inside
//! the deopt leaf entries, where the normal top-of-stack is not yet linked.

use garnet_core::value::RawWord;
use garnet_runtime::object::code::{Address, CodeId, CodeTable, CODE_BASE};

/// Number of CPU registers a deopt stub saves.
pub const NUM_CPU_REGISTERS: usize = 16;

/// Number of FPU registers a deopt stub saves.
pub const NUM_FPU_REGISTERS: usize = 16;

/// Pc marker of a stub frame.
pub const STUB_FRAME_MARKER: RawWord = 0;

/// Pc marker of an entry frame (the native-to-managed transition).
pub const ENTRY_FRAME_MARKER: RawWord = 1;

/// What a frame is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// The native-to-managed transition frame; terminates a walk.
    Entry,
    /// A stub frame (runtime-call glue, allocation stubs and the like).
    Stub,
    /// A frame of managed code.
    Managed,
}

// =============================================================================
// Stack memory
// =============================================================================

/// Word-addressed stack memory. Addresses are word indexes.
#[derive(Debug)]
pub struct StackMemory {
    words: Vec<RawWord>,
}

impl StackMemory {
    /// Create a stack of `capacity` words, zeroed.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity],
        }
    }

    /// Number of words.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the stack has no words.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Read one word.
    #[inline]
    #[must_use]
    pub fn read(&self, address: Address) -> RawWord {
        self.words[address]
    }

    /// Write one word.
    #[inline]
    pub fn write(&mut self, address: Address, word: RawWord) {
        self.words[address] = word;
    }

    /// Lay down a frame header at `fp`: saved caller fp, return address and
    /// pc marker.
    pub fn write_frame_header(
        &mut self,
        fp: Address,
        caller_fp: Address,
        return_address: Address,
        marker: RawWord,
    ) {
        self.words[fp] = caller_fp as RawWord;
        self.words[fp + 1] = return_address as RawWord;
        self.words[fp - 1] = marker;
    }
}

// =============================================================================
// Frames
// =============================================================================

/// A located frame. Plain data; holds no borrows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Frame pointer.
    pub fp: Address,
    /// Lowest live address of the frame.
    pub sp: Address,
    /// The frame's pc (the return address its callee holds).
    pub pc: Address,
}

impl Frame {
    /// Classify the frame by its pc marker.
    #[must_use]
    pub fn kind(&self, stack: &StackMemory) -> FrameKind {
        match stack.read(self.fp - 1) {
            STUB_FRAME_MARKER => FrameKind::Stub,
            ENTRY_FRAME_MARKER => FrameKind::Entry,
            marker => {
                debug_assert!(marker as Address >= CODE_BASE);
                FrameKind::Managed
            }
        }
    }

    /// The code containing this frame's pc.
    #[must_use]
    pub fn lookup_code(&self, codes: &CodeTable) -> Option<CodeId> {
        codes.lookup_code(self.pc)
    }
}

// =============================================================================
// Iterators
// =============================================================================

/// Walks frames outward from a starting frame pointer, without filtering.
pub struct FrameIterator<'a> {
    stack: &'a StackMemory,
    next_fp: Address,
}

impl<'a> FrameIterator<'a> {
    /// Start from a frame pointer (an exit frame or a caller-supplied fp).
    #[must_use]
    pub fn from_fp(stack: &'a StackMemory, fp: Address) -> Self {
        Self { stack, next_fp: fp }
    }

    /// The next frame outward, or `None` past the entry frame.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let current = self.next_fp;
        if current == 0 {
            return None;
        }
        let caller_fp = self.stack.read(current) as Address;
        if caller_fp == 0 {
            return None;
        }
        let caller_pc = self.stack.read(current + 1) as Address;
        self.next_fp = caller_fp;
        Some(Frame {
            fp: caller_fp,
            sp: current + 2,
            pc: caller_pc,
        })
    }
}

/// Walks managed frames only, skipping stub frames and stopping at the
/// entry frame.
pub struct ManagedFrameIterator<'a> {
    frames: FrameIterator<'a>,
}

impl<'a> ManagedFrameIterator<'a> {
    /// Start from a frame pointer.
    #[must_use]
    pub fn from_fp(stack: &'a StackMemory, fp: Address) -> Self {
        Self {
            frames: FrameIterator::from_fp(stack, fp),
        }
    }

    /// The next managed frame outward.
    pub fn next_frame(&mut self) -> Option<Frame> {
        while let Some(frame) = self.frames.next_frame() {
            match frame.kind(self.frames.stack) {
                FrameKind::Managed => return Some(frame),
                FrameKind::Stub => continue,
                FrameKind::Entry => return None,
            }
        }
        None
    }
}

// =============================================================================
// Tests
// =============================================================================
