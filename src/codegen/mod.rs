//! The black-box code-generation backend.
//!
//! The specification deliberately keeps the actual native-code-emission
//! library out of scope, describing it only as something that "provides
//! registers, instructions, jumps, labels, and a linker." [`Assembler`] is
//! that minimal vocabulary, expressed as a Rust trait instead of an FFI
//! binding to a real JIT assembler (none of the crates available here are a
//! realistic stand-in for one). [`threaded`] supplies the one concrete,
//! entirely-safe implementation: it assembles into a flat instruction
//! vector and "links" by handing that vector to an interpreter loop. There
//! is no machine code and no `unsafe` anywhere in this crate.

pub mod threaded;

use crate::error::CompileError;
use crate::insn::{AluOp, JmpCond, Width};

/// A location in the emitted program, bound exactly once via [`Assembler::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub(crate) usize);

/// A scratch-register operand: the accumulator, the index register, or one
/// of the `M[0..MEMWORDS)` cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    A,
    X,
    Mem(usize),
}

/// The right-hand side of an ALU operation or comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RValue {
    Reg(Reg),
    Imm(u32),
}

impl From<u32> for RValue {
    fn from(k: u32) -> Self {
        RValue::Imm(k)
    }
}

impl From<Reg> for RValue {
    fn from(r: Reg) -> Self {
        RValue::Reg(r)
    }
}

/// Which packet-buffer-relative source a load reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PktBase {
    /// `P[k:width]`.
    Abs,
    /// `P[X+k:width]`.
    Ind,
}

/// A runtime condition an emitted conditional branch evaluates against the
/// live machine state. Each variant corresponds to one guard the
/// specification calls for; none of them can be decided at compile time
/// (if they could, the emitter wouldn't emit a branch for them at all).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Test {
    /// `buflen < len`: the hoisted block-entry bounds check.
    BufLenLessThan(u32),
    /// `buflen - (k + width) < X`: the per-`ld [x+k]` bounds check, computed
    /// this way (rather than `k + width + X > buflen`) to avoid overflowing
    /// when `k + width` is already close to `u32::MAX`.
    IndOutOfRange { k: u32, width: u32 },
    XEqZero,
    Compare(JmpCond, Reg, RValue),
}

/// The minimal assembler vocabulary the emitter drives.
///
/// An implementation owns an in-progress program plus whatever bookkeeping
/// it needs to resolve jumps; [`Assembler::link`] consumes it and produces
/// an executable artifact.
pub trait Assembler {
    type Output;

    /// Allocate a new, not-yet-bound label.
    fn new_label(&mut self) -> Label;
    /// Bind `label` to the current position. Every label must be bound
    /// exactly once before [`Assembler::link`] is called.
    fn bind(&mut self, label: Label);

    /// `reg <- 0`.
    fn zero(&mut self, reg: Reg);
    /// `reg <- value`.
    fn set(&mut self, reg: Reg, value: RValue);
    /// `reg <- wirelen` (`ld len` / `ldx len`).
    fn load_wirelen(&mut self, reg: Reg);
    /// `A <- A op rhs`. `op == Neg` ignores `rhs`.
    fn alu(&mut self, op: AluOp, rhs: RValue);
    /// `A <- P[base:width]` (base offset `k`, plus `X` at runtime for `Ind`).
    fn load_pkt(&mut self, base: PktBase, width: Width, k: u32);
    /// The kernel-build fallback for [`Assembler::load_pkt`]: reads through
    /// the chained-buffer helper instead of the contiguous primary buffer,
    /// returning 0 immediately if that also fails.
    fn load_pkt_chain(&mut self, base: PktBase, width: Width, k: u32);
    /// `A <- (P[k:1] & 0xf) << 2` (the `ldx msh` combinator).
    fn load_msh(&mut self, k: u32);
    /// The kernel-build fallback for [`Assembler::load_msh`].
    fn load_msh_chain(&mut self, k: u32);
    /// `X <- A`.
    fn tax(&mut self);
    /// `A <- X`.
    fn txa(&mut self);
    /// `A <- copfuncs[index](A, args)`, index either a compile-time constant
    /// (`cop`) or the live `X` register (`copx`); returns 0 immediately if
    /// no such function is registered.
    fn call_cop(&mut self, index: RValue);

    /// Branch to `target` if `test` holds; falls through otherwise.
    fn branch_if(&mut self, test: Test, target: Label);
    /// Unconditional branch to `target`.
    fn jump(&mut self, target: Label);

    /// Return `value` (only ever `A` or a compile-time constant).
    fn ret(&mut self, value: RValue);

    /// Finish assembly and produce the executable artifact. Fails with
    /// [`CompileError::BackendFailure`] if the backend cannot produce one
    /// (for [`threaded::ThreadedAssembler`], an unbound label).
    fn link(self) -> Result<Self::Output, CompileError>;
}
