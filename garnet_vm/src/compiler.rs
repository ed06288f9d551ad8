//! The compiler interface and the template compiler.
//!
//! Compilation proper is an external collaborator reached through the
//! [`Compiler`] trait. The [`TemplateCompiler`] is the stand-in backend:
//! it binds declared code templates (instruction slots, metadata and a
//! native thunk) to functions, assigning entry points and materializing
//! per-call-site IC data the way a real backend would emit them into the
//! constants pool.

use crate::isolate::Isolate;
use crate::stub::NativeThunk;
use garnet_core::error::{CompileError, GarnetError, VmResult};
use garnet_runtime::object::code::{
    Code, CodeConstant, CodeId, DeoptInfo, DeoptTableEntry, InstrSlot, PcDescriptor,
    PcDescriptorKind, StaticCallEntry,
};
use garnet_runtime::object::function::FunctionId;
use garnet_runtime::object::icdata::ICData;
use rustc_hash::FxHashMap;

/// Which tier is being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileKind {
    /// Baseline code.
    Unoptimized,
    /// Optimizing recompilation.
    Optimized,
}

/// The compiler interface runtime entries call through.
pub trait Compiler {
    /// Compile `function` at the given tier, binding the produced code as
    /// the function's current code.
    fn compile(
        &mut self,
        isolate: &mut Isolate,
        function: FunctionId,
        kind: CompileKind,
    ) -> Result<CodeId, CompileError>;
}

// =============================================================================
// Code templates
// =============================================================================

/// Declares the IC data a template's instance-call slot needs.
#[derive(Debug, Clone, Copy)]
pub struct IcSite {
    /// Slot offset of the instance call within the template.
    pub offset: usize,
    /// How many leading arguments the site tests (1, 2 or 3).
    pub num_args_tested: usize,
}

/// A declared compilation result for one function and tier.
#[derive(Clone)]
pub struct CodeTemplate {
    /// Instruction slots. Call-site targets are absolute stub addresses.
    pub instructions: Vec<InstrSlot>,
    /// `(offset, token_pos, kind)` pc descriptors.
    pub pc_descriptors: Vec<(usize, i64, PcDescriptorKind)>,
    /// `(offset, callee)` static-call-target rows.
    pub static_calls: Vec<(usize, FunctionId)>,
    /// Instance-call sites needing fresh IC data.
    pub ic_sites: Vec<IcSite>,
    /// Deopt table rows; optimized templates only.
    pub deopt_table: Vec<DeoptTableEntry>,
    /// Deopt-info array indexed by the deopt table.
    pub deopt_infos: Vec<DeoptInfo>,
    /// Constants pool.
    pub object_table: Vec<CodeConstant>,
    /// The native body standing in for generated code.
    pub native: NativeThunk,
}

// =============================================================================
// Template compiler
// =============================================================================

/// The stand-in backend: compiles by instantiating declared templates.
#[derive(Default)]
pub struct TemplateCompiler {
    templates: FxHashMap<(FunctionId, CompileKind), CodeTemplate>,
}

impl TemplateCompiler {
    /// Create an empty template compiler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the compilation result for a function and tier.
    pub fn declare(&mut self, function: FunctionId, kind: CompileKind, template: CodeTemplate) {
        self.templates.insert((function, kind), template);
    }
}

impl Compiler for TemplateCompiler {
    fn compile(
        &mut self,
        isolate: &mut Isolate,
        function: FunctionId,
        kind: CompileKind,
    ) -> Result<CodeId, CompileError> {
        let Some(template) = self.templates.get(&(function, kind)).cloned() else {
            return Err(CompileError {
                function_name: isolate.qualified_function_name(function),
                message: format!("no {kind:?} template declared"),
            });
        };

        let mut code = Code::new(function, template.instructions);
        code.is_optimized = kind == CompileKind::Optimized;
        code.deopt_table = template.deopt_table;
        code.deopt_infos = template.deopt_infos;
        code.object_table = template.object_table;
        let id = isolate.codes.register(code);
        let entry_point = isolate.codes.get(id).entry_point;

        // Metadata offsets become absolute once the entry point is known.
        for (offset, token_pos, pc_kind) in template.pc_descriptors {
            isolate.codes.get_mut(id).pc_descriptors.push(PcDescriptor {
                pc: entry_point + offset,
                token_pos,
                kind: pc_kind,
            });
        }
        for (offset, callee) in template.static_calls {
            isolate.codes.get_mut(id).static_calls.push(StaticCallEntry {
                pc: entry_point + offset,
                function: callee,
                code: None,
            });
        }

        // Emit per-site IC data into the constants pool.
        for site in template.ic_sites {
            let name = match isolate.codes.get(id).instructions[site.offset] {
                InstrSlot::InstanceCall(ref call) => call.name.clone(),
                ref other => panic!("IC site at non-instance-call slot {other:?}"),
            };
            let ic = isolate.register_ic_data(ICData::new(name, site.num_args_tested));
            let code = isolate.codes.get_mut(id);
            match code.instructions[site.offset] {
                InstrSlot::InstanceCall(ref mut call) => call.ic_data = Some(ic),
                _ => unreachable!(),
            }
            code.object_table.push(CodeConstant::IcData(ic));
        }

        isolate.stub_code.install_thunk(id, template.native);

        let function = isolate.functions.get_mut(function);
        function.current_code = Some(id);
        if kind == CompileKind::Unoptimized {
            function.unoptimized_code = Some(id);
        }
        Ok(id)
    }
}

// =============================================================================
// Compile helpers
// =============================================================================

/// Compile a function at the given tier, propagating backend failures as
/// compilation errors.
pub fn compile_function(
    isolate: &mut Isolate,
    function: FunctionId,
    kind: CompileKind,
) -> VmResult<CodeId> {
    let mut compiler = isolate
        .compiler
        .take()
        .expect("no compiler installed on the isolate");
    let result = compiler.compile(isolate, function, kind);
    isolate.compiler = Some(compiler);
    result.map_err(GarnetError::Compilation)
}

/// The function's current code, compiling unoptimized code on first use.
pub fn ensure_compiled(isolate: &mut Isolate, function: FunctionId) -> VmResult<CodeId> {
    if let Some(code) = isolate.functions.get(function).current_code {
        return Ok(code);
    }
    compile_function(isolate, function, CompileKind::Unoptimized)
}

// =============================================================================
// Tests
// =============================================================================
