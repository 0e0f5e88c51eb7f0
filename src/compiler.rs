//! Public entry point: decode, analyze, emit, link.

use tracing::{debug, trace};

use crate::analyzer::{self, Analysis};
use crate::codegen::threaded::{CompiledFilter, ThreadedAssembler};
use crate::codegen::Assembler;
use crate::context::{JitConfig, JitContext};
use crate::emitter;
use crate::error::CompileError;
use crate::insn::{Instruction, Opcode};

/// Decode and structurally validate a raw instruction stream, without
/// compiling it. Exposed for callers (and the reference interpreter) that
/// want the decoded form without paying for code generation.
pub fn decode_program(insns: &[Instruction]) -> Result<Vec<Opcode>, CompileError> {
    if insns.is_empty() {
        return Err(CompileError::EmptyProgram);
    }
    insns.iter().map(Opcode::decode).collect()
}

/// Run the analyzer over an already-decoded program.
pub fn analyze_program(decoded: &[Opcode]) -> Result<Analysis, CompileError> {
    analyzer::analyze(decoded)
}

/// Compile a classical BPF program into an executable filter.
///
/// `ctx` is the extension-function table `cop`/`copx` instructions dispatch
/// through; it's resolved once, here, and baked into the returned
/// [`CompiledFilter`] rather than supplied again on every
/// [`CompiledFilter::run`] call, mirroring the original's
/// `bpfjit_generate_code(bc, insns, insn_count)` contract. `None` is fine
/// for a program with no `cop`/`copx` instructions; if one is present
/// anyway, its call site resolves to "no such function" and returns 0 at
/// runtime.
///
/// `config.assert_scratch_initialized` causes a `debug_assert!` (never a
/// runtime `Result` rejection) if the analyzer finds any scratch cell read
/// before being written along every reaching path. The kernel build's
/// bytecode validator is expected to already guarantee this, so tripping it
/// indicates a validator bug upstream of this crate, not a malformed filter
/// this crate should itself reject.
#[tracing::instrument(skip(insns, ctx), fields(n_insns = insns.len()))]
pub fn generate_code(
    config: JitConfig,
    ctx: Option<&JitContext>,
    insns: &[Instruction],
) -> Result<CompiledFilter, CompileError> {
    let decoded = decode_program(insns)?;
    let analysis = analyzer::analyze(&decoded)?;

    debug!(
        nscratches = analysis.summary.nscratches,
        ncopfuncs = analysis.summary.ncopfuncs,
        "analysis complete"
    );

    if config.assert_scratch_initialized {
        debug_assert!(
            analysis.summary.initmask.mem_is_empty(),
            "bytecode reads an uninitialized scratch cell; the kernel-build \
             bytecode validator should have rejected this program upstream",
        );
    }

    let mut asm = ThreadedAssembler::new();
    emitter::emit(&mut asm, &decoded, &analysis, config);

    for (i, op) in decoded.iter().enumerate() {
        trace!(insn = i, ?op, "emitted");
    }

    Ok(asm.link()?.with_context(ctx.cloned()))
}
