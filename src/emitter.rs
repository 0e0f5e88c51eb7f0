//! The compiler's second pass: walks the analyzed program once, driving an
//! [`Assembler`] to build the executable artifact.
//!
//! Closely follows the structure of the original's main emission loop: bind
//! a label at every jump target, emit the block-entry length guard at the
//! first read of each block, then the opcode's own body, with every packet
//! read additionally carrying a kernel-build fallback to the chained-buffer
//! reader when [`JitConfig::kernel`] is set.

use crate::analyzer::Analysis;
use crate::codegen::{Assembler, Label, PktBase, RValue, Reg, Test};
use crate::consts::NO_CHECK_LENGTH;
use crate::context::JitConfig;
use crate::insn::{AluOp, Opcode, Src};

fn src_to_rvalue(src: Src) -> RValue {
    match src {
        Src::Imm(k) => RValue::Imm(k),
        Src::X => RValue::Reg(Reg::X),
    }
}

fn label_of<A: Assembler>(asm: &mut A, labels: &mut [Option<Label>], i: usize) -> Label {
    match labels[i] {
        Some(l) => l,
        None => {
            let l = asm.new_label();
            labels[i] = Some(l);
            l
        }
    }
}

/// Emit `decoded` against `analysis`'s results into `asm`. Does not call
/// [`Assembler::link`]; that's the caller's (the compiler's) job, once it
/// also knows whether to bother linking at all.
pub fn emit<A: Assembler>(asm: &mut A, decoded: &[Opcode], analysis: &Analysis, config: JitConfig) {
    let n = decoded.len();
    let mut labels: Vec<Option<Label>> = vec![None; n];

    for idx in analysis.summary.initmask.mem_indices() {
        asm.zero(Reg::Mem(idx));
    }
    if analysis.summary.initmask.contains_a() {
        asm.zero(Reg::A);
    }
    if analysis.summary.initmask.contains_x() {
        asm.zero(Reg::X);
    }

    let ret0 = asm.new_label();

    for i in 0..n {
        if let Some(l) = labels[i] {
            asm.bind(l);
        }

        let rec = &analysis.records[i];
        if rec.unreachable {
            continue;
        }

        let is_read = decoded[i].read_width().is_some();
        let (fallback, resume) = if config.kernel && is_read {
            (Some(asm.new_label()), Some(asm.new_label()))
        } else {
            (None, None)
        };
        let fail = fallback.unwrap_or(ret0);

        if rec.check_length != NO_CHECK_LENGTH {
            asm.branch_if(Test::BufLenLessThan(rec.check_length), fail);
        }

        match decoded[i] {
            Opcode::LdImm(k) => asm.set(Reg::A, RValue::Imm(k)),
            Opcode::LdMem(k) => asm.set(Reg::A, RValue::Reg(Reg::Mem(k))),
            Opcode::LdLen => asm.load_wirelen(Reg::A),
            Opcode::LdAbs(width, k) => asm.load_pkt(PktBase::Abs, width, k),
            Opcode::LdInd(width, k) => {
                asm.branch_if(
                    Test::IndOutOfRange { k, width: width.bytes() },
                    fail,
                );
                asm.load_pkt(PktBase::Ind, width, k);
            }
            Opcode::LdxImm(k) => asm.set(Reg::X, RValue::Imm(k)),
            Opcode::LdxMem(k) => asm.set(Reg::X, RValue::Reg(Reg::Mem(k))),
            Opcode::LdxLen => asm.load_wirelen(Reg::X),
            Opcode::LdxMsh(k) => asm.load_msh(k),
            Opcode::St(k) => asm.set(Reg::Mem(k), RValue::Reg(Reg::A)),
            Opcode::Stx(k) => asm.set(Reg::Mem(k), RValue::Reg(Reg::X)),
            Opcode::Alu(op, src) => {
                if op == AluOp::Div && src == Src::Imm(0) {
                    // Division by a literal zero can never succeed; skip
                    // straight to the shared reject path instead of emitting
                    // a division nothing will ever execute.
                    asm.jump(ret0);
                } else {
                    if op == AluOp::Div && src == Src::X {
                        asm.branch_if(Test::XEqZero, ret0);
                    }
                    asm.alu(op, src_to_rvalue(src));
                }
            }
            Opcode::Tax => asm.tax(),
            Opcode::Txa => asm.txa(),
            Opcode::Cop(k) => asm.call_cop(RValue::Imm(k)),
            Opcode::Copx => asm.call_cop(RValue::Reg(Reg::X)),
            Opcode::JmpA(k) => {
                if k != 0 {
                    let target = label_of(asm, &mut labels, i + 1 + k as usize);
                    asm.jump(target);
                }
            }
            Opcode::JmpCond(cond, src, jt, jf) => {
                let jt_idx = i + 1 + jt as usize;
                let jf_idx = i + 1 + jf as usize;
                let jt_label = label_of(asm, &mut labels, jt_idx);
                asm.branch_if(Test::Compare(cond, Reg::A, src_to_rvalue(src)), jt_label);
                if jf != 0 {
                    let jf_label = label_of(asm, &mut labels, jf_idx);
                    asm.jump(jf_label);
                }
            }
            Opcode::RetK(k) => asm.ret(RValue::Imm(k)),
            Opcode::RetA => asm.ret(RValue::Reg(Reg::A)),
        }

        if let (Some(fallback), Some(resume)) = (fallback, resume) {
            asm.jump(resume);
            asm.bind(fallback);
            match decoded[i] {
                Opcode::LdAbs(width, k) => asm.load_pkt_chain(PktBase::Abs, width, k),
                Opcode::LdInd(width, k) => asm.load_pkt_chain(PktBase::Ind, width, k),
                Opcode::LdxMsh(k) => asm.load_msh_chain(k),
                _ => unreachable!("fallback only created for read instructions"),
            }
            asm.bind(resume);
        }
    }

    asm.bind(ret0);
    asm.ret(RValue::Imm(0));
}
