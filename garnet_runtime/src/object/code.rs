//! Code objects and the code address space.
//!
//! A code object is a compiled artifact. Its instruction stream is modeled
//! as one-word slots in a flat address space: the [`CodeTable`] hands each
//! registered code a disjoint address range, so a pc identifies both the
//! code (binary search over ranges) and the slot within it. Call sites are
//! slots the VM's patcher rewrites; everything else is a patchable `Nop`.
//!
//! A function owns its current code; a code's `function` field is a
//! back-reference, not ownership — code replaced by reoptimization stays
//! reachable from live stack frames until they unwind or deoptimize.

use crate::object::function::FunctionId;
use crate::object::icdata::IcDataId;
use garnet_core::intern::Symbol;
use garnet_core::value::Value;
use std::fmt;

/// An address in the flat code/stack address space.
pub type Address = usize;

/// First address handed out to code objects. Lower addresses are reserved
/// for stub entry points and frame markers.
pub const CODE_BASE: Address = 0x1000;

/// A compiled artifact's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeId(u32);

impl CodeId {
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
// PC descriptors
// =============================================================================

/// What a described pc is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcDescriptorKind {
    /// An instance-call site.
    IcCall,
    /// A static-call site.
    FuncCall,
    /// A deoptimization point.
    Deopt,
    /// A return site.
    Return,
    /// Anything else worth a token position.
    Other,
}

/// One pc-descriptor record: maps a pc to its token position and kind.
#[derive(Debug, Clone, Copy)]
pub struct PcDescriptor {
    /// Described pc (absolute).
    pub pc: Address,
    /// Source token position, or -1.
    pub token_pos: i64,
    /// Site kind.
    pub kind: PcDescriptorKind,
}

// =============================================================================
// Instruction slots
// =============================================================================

/// An instance-call site: the call instruction's operands.
#[derive(Debug, Clone)]
pub struct InstanceCallSite {
    /// Name being invoked.
    pub name: Symbol,
    /// Total argument count, receiver included.
    pub argument_count: usize,
    /// Number of named arguments within `argument_count`.
    pub named_argument_count: usize,
    /// Current dispatch target (a stub or a resolved entry point).
    pub target: Address,
    /// The call site's IC data, held in the code's constants pool.
    pub ic_data: Option<IcDataId>,
}

/// One word of the modeled instruction stream.
#[derive(Debug, Clone)]
pub enum InstrSlot {
    /// A patchable non-call word.
    Nop,
    /// A static call to an entry point.
    StaticCall {
        /// Current call target.
        target: Address,
    },
    /// An instance call dispatched through its IC.
    InstanceCall(InstanceCallSite),
}

// =============================================================================
// Static-call target table
// =============================================================================

/// One row of a code's static-call-target table.
#[derive(Debug, Clone, Copy)]
pub struct StaticCallEntry {
    /// Call-site pc (absolute).
    pub pc: Address,
    /// The callee the site binds to.
    pub function: FunctionId,
    /// The code last patched in at the site, once patched.
    pub code: Option<CodeId>,
}

// =============================================================================
// Deoptimization metadata
// =============================================================================

/// Why an optimized frame bailed out. Dense; recovered from the deopt table
/// and reported in traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeoptReason {
    /// No deopt information found for the pc.
    Unknown = 0,
    /// A class/type speculation guard failed.
    TypeGuard = 1,
    /// Speculative fixed-width integer arithmetic overflowed.
    IntegerOverflow = 2,
    /// A speculatively elided bounds check failed.
    BoundsCheck = 3,
    /// An inline-cache-based speculation saw an unexpected receiver.
    InlineCacheMiss = 4,
    /// Speculative division hit a zero divisor.
    DivisionByZero = 5,
    /// A rarely-taken path was reached.
    UncommonTrap = 6,
}

impl DeoptReason {
    /// Convert from the raw table encoding.
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            1 => Some(Self::TypeGuard),
            2 => Some(Self::IntegerOverflow),
            3 => Some(Self::BoundsCheck),
            4 => Some(Self::InlineCacheMiss),
            5 => Some(Self::DivisionByZero),
            6 => Some(Self::UncommonTrap),
            _ => None,
        }
    }
}

impl fmt::Display for DeoptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::TypeGuard => "type guard",
            Self::IntegerOverflow => "integer overflow",
            Self::BoundsCheck => "bounds check",
            Self::InlineCacheMiss => "inline cache miss",
            Self::DivisionByZero => "division by zero",
            Self::UncommonTrap => "uncommon trap",
        };
        f.write_str(name)
    }
}

/// One row of a code's deopt table: pc offset, deopt-info index, reason.
#[derive(Debug, Clone, Copy)]
pub struct DeoptTableEntry {
    /// Offset of the deopting pc from the code's entry point.
    pub pc_offset: usize,
    /// Index into the code's deopt-info array.
    pub deopt_info: u32,
    /// Guard class that failed.
    pub reason: DeoptReason,
}

/// One deopt-info instruction: how to produce the value of one target slot
/// of the unoptimized frame.
///
/// Sources are the register copies, the optimized-frame copy and the code's
/// constants pool. `FpuRegister`/`Int64Register` (and their stack-slot
/// variants) carry unboxed payloads; executing them defers the boxing
/// allocation because the fill phase must not touch the managed heap.
#[derive(Debug, Clone, Copy)]
pub enum DeoptInstr {
    /// Load a constant from the code's object table.
    Constant {
        /// Constants-pool index.
        object_table_index: usize,
    },
    /// Load a tagged word from the CPU-register copy.
    Register {
        /// CPU register index.
        reg: usize,
    },
    /// Box a double from the FPU-register copy (deferred).
    FpuRegister {
        /// FPU register index.
        reg: usize,
    },
    /// Re-tag or box a 64-bit integer from the CPU-register copy (boxing
    /// deferred when the payload exceeds the Smi range).
    Int64Register {
        /// CPU register index.
        reg: usize,
    },
    /// Load a tagged word from the optimized-frame copy.
    StackSlot {
        /// Index into the frame copy.
        slot: usize,
    },
    /// Box a double stored unboxed in the optimized frame (deferred).
    DoubleStackSlot {
        /// Index into the frame copy.
        slot: usize,
    },
    /// Re-tag or box a 64-bit integer stored unboxed in the optimized frame.
    Int64StackSlot {
        /// Index into the frame copy.
        slot: usize,
    },
    /// Write the pc marker identifying the unoptimized code.
    PcMarker {
        /// Constants-pool index of the unoptimized code.
        object_table_index: usize,
    },
    /// Write the caller frame pointer recovered from the frame copy.
    CallerFp,
    /// Write the caller return address recovered from the frame copy.
    CallerPc,
    /// Write the continuation address in the unoptimized code.
    RetAddress {
        /// Constants-pool index of the unoptimized code.
        object_table_index: usize,
        /// Pc offset within that code to resume at.
        pc_offset: usize,
    },
}

/// Instruction list reconstructing one unoptimized frame slot-by-slot.
#[derive(Debug, Clone, Default)]
pub struct DeoptInfo {
    /// One instruction per target slot, in target-slot order.
    pub instructions: Vec<DeoptInstr>,
}

impl DeoptInfo {
    /// Number of target slots the translation produces.
    #[inline]
    #[must_use]
    pub fn translation_length(&self) -> usize {
        self.instructions.len()
    }
}

// =============================================================================
// Constants pool
// =============================================================================

/// An entry of a code's constants pool.
#[derive(Debug, Clone, Copy)]
pub enum CodeConstant {
    /// A managed value.
    Value(Value),
    /// Another code object (pc markers, return-address translations).
    Code(CodeId),
    /// An IC data record owned by this pool.
    IcData(IcDataId),
}

impl CodeConstant {
    /// The value, asserting the variant.
    #[inline]
    #[must_use]
    pub fn as_value(&self) -> Value {
        match self {
            CodeConstant::Value(v) => *v,
            other => panic!("constant is not a value: {other:?}"),
        }
    }

    /// The code id, asserting the variant.
    #[inline]
    #[must_use]
    pub fn as_code(&self) -> CodeId {
        match self {
            CodeConstant::Code(c) => *c,
            other => panic!("constant is not a code: {other:?}"),
        }
    }
}

// =============================================================================
// Code
// =============================================================================

/// A compiled artifact.
#[derive(Debug)]
pub struct Code {
    /// Owning function (back-reference, not ownership).
    pub function: FunctionId,
    /// First address of this code's range; assigned at registration.
    pub entry_point: Address,
    /// The instruction-slot stream, one slot per word.
    pub instructions: Vec<InstrSlot>,
    /// Whether this artifact came from the optimizing compiler.
    pub is_optimized: bool,
    /// Cleared when the code is abandoned so the GC may release its embedded
    /// objects.
    pub is_alive: bool,
    /// Pc descriptors, sorted by pc.
    pub pc_descriptors: Vec<PcDescriptor>,
    /// Static-call-target table.
    pub static_calls: Vec<StaticCallEntry>,
    /// Deopt table; optimized code only.
    pub deopt_table: Vec<DeoptTableEntry>,
    /// Deopt-info array indexed by the deopt table.
    pub deopt_infos: Vec<DeoptInfo>,
    /// Constants pool.
    pub object_table: Vec<CodeConstant>,
}

impl Code {
    /// Create an unregistered code object for `function` with the given
    /// instruction stream. The entry point is assigned by
    /// [`CodeTable::register`].
    #[must_use]
    pub fn new(function: FunctionId, instructions: Vec<InstrSlot>) -> Self {
        assert!(!instructions.is_empty(), "code must span at least one word");
        Self {
            function,
            entry_point: 0,
            instructions,
            is_optimized: false,
            is_alive: true,
            pc_descriptors: Vec::new(),
            static_calls: Vec::new(),
            deopt_table: Vec::new(),
            deopt_infos: Vec::new(),
            object_table: Vec::new(),
        }
    }

    /// Size of the code range in words.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.instructions.len()
    }

    /// Whether `pc` falls inside this code's range.
    #[inline]
    #[must_use]
    pub fn contains_pc(&self, pc: Address) -> bool {
        pc >= self.entry_point && pc < self.entry_point + self.size()
    }

    /// Slot offset of `pc` within this code.
    #[inline]
    #[must_use]
    pub fn pc_offset(&self, pc: Address) -> usize {
        debug_assert!(self.contains_pc(pc));
        pc - self.entry_point
    }

    /// The instruction slot at `pc`.
    #[inline]
    #[must_use]
    pub fn instr_at(&self, pc: Address) -> &InstrSlot {
        &self.instructions[self.pc_offset(pc)]
    }

    /// The instruction slot at `pc`, mutably.
    #[inline]
    pub fn instr_at_mut(&mut self, pc: Address) -> &mut InstrSlot {
        let offset = self.pc_offset(pc);
        &mut self.instructions[offset]
    }

    /// Token position recorded for exactly `pc`, or -1.
    #[must_use]
    pub fn token_pos_at(&self, pc: Address) -> i64 {
        for descriptor in &self.pc_descriptors {
            if descriptor.pc == pc {
                return descriptor.token_pos;
            }
        }
        -1
    }

    /// The function a static-call site binds to. The site must be in the
    /// table.
    #[must_use]
    pub fn static_call_target_function_at(&self, pc: Address) -> FunctionId {
        self.static_calls
            .iter()
            .find(|entry| entry.pc == pc)
            .unwrap_or_else(|| panic!("no static-call record at {pc:#x}"))
            .function
    }

    /// The code last patched in at a static-call site, if any.
    #[must_use]
    pub fn static_call_code_at(&self, pc: Address) -> Option<CodeId> {
        self.static_calls
            .iter()
            .find(|entry| entry.pc == pc)
            .and_then(|entry| entry.code)
    }

    /// Record the code patched in at a static-call site.
    pub fn set_static_call_code_at(&mut self, pc: Address, code: CodeId) {
        let entry = self
            .static_calls
            .iter_mut()
            .find(|entry| entry.pc == pc)
            .unwrap_or_else(|| panic!("no static-call record at {pc:#x}"));
        entry.code = Some(code);
    }

    /// Deopt info and reason for `pc`, by linear scan of the deopt table.
    #[must_use]
    pub fn deopt_info_at(&self, pc: Address) -> Option<(&DeoptInfo, DeoptReason)> {
        debug_assert!(self.is_optimized);
        for entry in &self.deopt_table {
            if self.entry_point + entry.pc_offset == pc {
                return Some((&self.deopt_infos[entry.deopt_info as usize], entry.reason));
            }
        }
        None
    }

    /// A constant from the pool.
    #[inline]
    #[must_use]
    pub fn constant_at(&self, index: usize) -> &CodeConstant {
        &self.object_table[index]
    }
}

// =============================================================================
// Code table
// =============================================================================

/// The flat code address space: registers code objects at disjoint address
/// ranges and finds the code containing a pc by binary search.
#[derive(Debug)]
pub struct CodeTable {
    codes: Vec<Code>,
    /// `(start, end, code)` ranges, sorted by start (allocation is
    /// monotonic).
    ranges: Vec<(Address, Address, CodeId)>,
    next_address: Address,
}

impl CodeTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            codes: Vec::new(),
            ranges: Vec::new(),
            next_address: CODE_BASE,
        }
    }

    /// Register a code object, assigning its entry point.
    pub fn register(&mut self, mut code: Code) -> CodeId {
        let id = CodeId(self.codes.len() as u32);
        let start = self.next_address;
        let end = start + code.size();
        code.entry_point = start;
        self.next_address = end;
        self.ranges.push((start, end, id));
        self.codes.push(code);
        id
    }

    /// Get a code object.
    #[inline]
    #[must_use]
    pub fn get(&self, id: CodeId) -> &Code {
        &self.codes[id.0 as usize]
    }

    /// Get a code object mutably.
    #[inline]
    pub fn get_mut(&mut self, id: CodeId) -> &mut Code {
        &mut self.codes[id.0 as usize]
    }

    /// The code whose range contains `pc`, if any.
    #[must_use]
    pub fn lookup_code(&self, pc: Address) -> Option<CodeId> {
        let index = self.ranges.partition_point(|&(start, _, _)| start <= pc);
        if index == 0 {
            return None;
        }
        let (_, end, id) = self.ranges[index - 1];
        (pc < end).then_some(id)
    }

    /// Number of registered code objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl Default for CodeTable {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
