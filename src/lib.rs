//! Just-in-time compilation of classical BPF packet-filter bytecode.
//!
//! [`generate_code`] takes a raw instruction stream and a [`JitContext`] of
//! host extension functions and produces a [`CompiledFilter`] with that
//! context baked in; [`CompiledFilter::run`] evaluates the filter against a
//! packet, returning how many leading bytes to accept (`0` rejects the
//! packet outright).
//!
//! Compilation is a two-pass affair: [`analyzer`] walks the program once to
//! work out block boundaries, per-block safe read lengths, and which
//! scratch cells need zero-initializing; [`emitter`] walks it a second time
//! driving a [`codegen::Assembler`] to build the executable artifact.

mod analyzer;
pub mod codegen;
mod compiler;
mod consts;
mod context;
mod emitter;
mod error;
mod init_mask;
mod insn;

#[cfg(feature = "test-util")]
pub mod reference;

pub use codegen::threaded::{ChainedPacket, CompiledFilter, FilterArgs};
pub use compiler::{analyze_program, decode_program, generate_code};
pub use consts::MEMWORDS;
pub use context::{CopFn, JitConfig, JitContext};
pub use error::CompileError;
pub use insn::{AluOp, Instruction, JmpCond, Opcode, Src, Width};

/// Re-exports of the types most callers need, for a single `use bpfjit::prelude::*;`.
pub mod prelude {
    pub use crate::{
        generate_code, ChainedPacket, CompileError, CompiledFilter, FilterArgs, Instruction,
        JitConfig, JitContext,
    };
}
