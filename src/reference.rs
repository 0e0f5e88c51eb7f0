//! A plain, unoptimized interpreter over decoded programs.
//!
//! Deliberately independent of [`crate::emitter`] and
//! [`crate::codegen::threaded`]: where the compiled path hoists bounds
//! checks to one per block and resolves jumps into label positions ahead of
//! time, this walks the instruction stream pc-by-pc, re-deriving every
//! check at the instruction that needs it. The two are expected to agree on
//! every input; that agreement is exactly the property the `test-util`
//! feature's tests check the compiled path against.

use crate::compiler::decode_program;
use crate::context::JitContext;
use crate::error::CompileError;
use crate::insn::{AluOp, Instruction, JmpCond, Opcode, Src, Width};

/// Runtime arguments for [`interpret`]; mirrors
/// [`crate::codegen::threaded::FilterArgs`] but without the chained-buffer
/// fallback, since this interpreter never needs one: it naturally
/// re-checks bounds at the exact instruction performing each read.
pub struct ReferenceArgs<'a> {
    pub pkt: &'a [u8],
    pub wirelen: u32,
}

fn read_be(pkt: &[u8], offset: u32, width: Width) -> Option<u32> {
    let start = usize::try_from(offset).ok()?;
    let len = width.bytes() as usize;
    let end = start.checked_add(len)?;
    let bytes = pkt.get(start..end)?;
    Some(match width {
        Width::Word => u32::from_be_bytes(bytes.try_into().unwrap()),
        Width::Half => u16::from_be_bytes(bytes.try_into().unwrap()) as u32,
        Width::Byte => bytes[0] as u32,
    })
}

/// Interpret a raw instruction stream directly, without compiling it.
/// Returns the same `u32` accept-length a compiled filter's `run` would.
pub fn interpret(
    insns: &[Instruction],
    ctx: Option<&JitContext>,
    args: &ReferenceArgs<'_>,
) -> Result<u32, CompileError> {
    let decoded = decode_program(insns)?;
    Ok(run_decoded(&decoded, ctx, args))
}

fn run_decoded(decoded: &[Opcode], ctx: Option<&JitContext>, args: &ReferenceArgs<'_>) -> u32 {
    use crate::codegen::threaded::FilterArgs;

    let mut a: u32 = 0;
    let mut x: u32 = 0;
    let mut mem = [0u32; crate::consts::MEMWORDS];
    let mut pc: usize = 0;

    // Wrap into a FilterArgs purely to hand something to cop functions; the
    // interpreter itself never reads its `chain` field.
    let cop_args = FilterArgs {
        pkt: args.pkt,
        wirelen: args.wirelen,
        chain: None,
    };

    loop {
        let op = &decoded[pc];
        let mut next = pc + 1;

        match *op {
            Opcode::LdImm(k) => a = k,
            Opcode::LdMem(k) => a = mem[k],
            Opcode::LdLen => a = args.wirelen,
            Opcode::LdAbs(width, k) => match read_be(args.pkt, k, width) {
                Some(v) => a = v,
                None => return 0,
            },
            Opcode::LdInd(width, k) => {
                let offset = match k.checked_add(x) {
                    Some(v) => v,
                    None => return 0,
                };
                match read_be(args.pkt, offset, width) {
                    Some(v) => a = v,
                    None => return 0,
                }
            }
            Opcode::LdxImm(k) => x = k,
            Opcode::LdxMem(k) => x = mem[k],
            Opcode::LdxLen => x = args.wirelen,
            Opcode::LdxMsh(k) => match args.pkt.get(k as usize) {
                Some(byte) => x = u32::from(byte & 0x0f) << 2,
                None => return 0,
            },
            Opcode::St(k) => mem[k] = a,
            Opcode::Stx(k) => mem[k] = x,
            Opcode::Alu(op, src) => {
                let rhs = match src {
                    Src::Imm(k) => k,
                    Src::X => x,
                };
                match op {
                    AluOp::Add => a = a.wrapping_add(rhs),
                    AluOp::Sub => a = a.wrapping_sub(rhs),
                    AluOp::Mul => a = a.wrapping_mul(rhs),
                    AluOp::Div => {
                        if rhs == 0 {
                            return 0;
                        }
                        a /= rhs;
                    }
                    AluOp::Or => a |= rhs,
                    AluOp::And => a &= rhs,
                    AluOp::Lsh => a = a.wrapping_shl(rhs),
                    AluOp::Rsh => a = a.wrapping_shr(rhs),
                    AluOp::Neg => a = a.wrapping_neg(),
                }
            }
            Opcode::Tax => x = a,
            Opcode::Txa => a = x,
            Opcode::Cop(k) => match ctx.and_then(|c| c.get(k)) {
                Some(f) => a = f(a, &cop_args),
                None => return 0,
            },
            Opcode::Copx => match ctx.and_then(|c| c.get(x)) {
                Some(f) => a = f(a, &cop_args),
                None => return 0,
            },
            Opcode::JmpA(k) => next = pc + 1 + k as usize,
            Opcode::JmpCond(cond, src, jt, jf) => {
                let rhs = match src {
                    Src::Imm(k) => k,
                    Src::X => x,
                };
                let taken = match cond {
                    JmpCond::Gt => a > rhs,
                    JmpCond::Ge => a >= rhs,
                    JmpCond::Eq => a == rhs,
                    JmpCond::Set => a & rhs != 0,
                };
                next = pc + 1 + if taken { jt as usize } else { jf as usize };
            }
            Opcode::RetK(k) => return k,
            Opcode::RetA => return a,
        }

        pc = next;
    }
}
