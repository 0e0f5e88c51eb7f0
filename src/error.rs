//! Compile-time error types.
//!
//! Runtime aborts (division by zero, out-of-bounds packet reads, extension
//! call failures) are never surfaced as a Rust error: per the specification
//! they are compiled into a branch to the shared return-0 tail, so the
//! emitted filter always returns a `u32`. `CompileError` covers only the
//! structural-rejection and resource-exhaustion cases of §7.

use thiserror::Error;

/// Reason [`crate::compiler::generate_code`] rejected a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The instruction array was empty; there is nothing to compile.
    #[error("empty instruction stream")]
    EmptyProgram,

    /// A jump's target (`i + 1 + jt/jf`, or `i + 1 + k` for `ja`) falls
    /// outside `[0, N)`.
    #[error("jump at instruction {insn} targets out-of-range instruction {target}")]
    JumpOutOfRange {
        /// Index of the instruction containing the jump.
        insn: usize,
        /// The out-of-range target index it computed.
        target: usize,
    },

    /// A scratch-memory operand named an index `>= MEMWORDS`.
    #[error("scratch index {0} is out of bounds")]
    ScratchIndexOutOfBounds(usize),

    /// The opcode's class/size/mode/source bits don't decode to anything
    /// in the accepted opcode table.
    #[error("unsupported or malformed opcode bits {0:#06x}")]
    UnsupportedOpcode(u16),

    /// `RET X` was requested; only `RET k` and `RET A` are legal return
    /// instructions.
    #[error("RET X is not a legal instruction")]
    ReturnFromIndexRegister,

    /// The underlying assembler failed to allocate or link the emitted
    /// code. Carries no further detail, mirroring the black-box assembler
    /// contract described in the specification.
    #[error("code generation backend failed to produce an executable artifact")]
    BackendFailure,
}
