//! Classical BPF instruction encoding and decoding.
//!
//! `Instruction` is the wire format the analyzer and emitter consume:
//! a fixed-width opcode byte plus two jump displacements and an immediate,
//! matching the historical `struct bpf_insn` layout. [`Opcode`] is the
//! decomposed, dispatch-friendly view the rest of the compiler works with.

use crate::consts::MEMWORDS;
use crate::error::CompileError;

/// Raw instruction record, exactly as it arrives from the (already
/// validated) bytecode source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl Instruction {
    pub const fn new(code: u16, jt: u8, jf: u8, k: u32) -> Self {
        Self { code, jt, jf, k }
    }
}

mod bits {
    pub const CLASS_MASK: u16 = 0x07;
    pub const LD: u16 = 0x00;
    pub const LDX: u16 = 0x01;
    pub const ST: u16 = 0x02;
    pub const STX: u16 = 0x03;
    pub const ALU: u16 = 0x04;
    pub const JMP: u16 = 0x05;
    pub const RET: u16 = 0x06;
    pub const MISC: u16 = 0x07;

    pub const SIZE_MASK: u16 = 0x18;
    pub const W: u16 = 0x00;
    pub const H: u16 = 0x08;
    pub const B: u16 = 0x10;

    pub const MODE_MASK: u16 = 0xe0;
    pub const IMM: u16 = 0x00;
    pub const ABS: u16 = 0x20;
    pub const IND: u16 = 0x40;
    pub const MEM: u16 = 0x60;
    pub const LEN: u16 = 0x80;
    pub const MSH: u16 = 0xa0;

    pub const SRC_MASK: u16 = 0x08;
    pub const K: u16 = 0x00;
    pub const X: u16 = 0x08;

    pub const ALUOP_MASK: u16 = 0xf0;
    pub const ADD: u16 = 0x00;
    pub const SUB: u16 = 0x10;
    pub const MUL: u16 = 0x20;
    pub const DIV: u16 = 0x30;
    pub const OR: u16 = 0x40;
    pub const AND: u16 = 0x50;
    pub const LSH: u16 = 0x60;
    pub const RSH: u16 = 0x70;
    pub const NEG: u16 = 0x80;

    pub const JMPOP_MASK: u16 = 0xf0;
    pub const JA: u16 = 0x00;
    pub const JEQ: u16 = 0x10;
    pub const JGT: u16 = 0x20;
    pub const JGE: u16 = 0x30;
    pub const JSET: u16 = 0x40;

    pub const RVAL_MASK: u16 = 0x18;
    pub const RVAL_K: u16 = 0x00;
    pub const RVAL_X: u16 = 0x08;
    pub const RVAL_A: u16 = 0x10;

    pub const MISCOP_MASK: u16 = 0xf8;
    pub const TAX: u16 = 0x00;
    pub const COP: u16 = 0x20;
    pub const COPX: u16 = 0x40;
    pub const TXA: u16 = 0x80;
}

/// Read width of a packet load, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Word,
    Half,
    Byte,
}

impl Width {
    pub const fn bytes(self) -> u32 {
        match self {
            Width::Word => 4,
            Width::Half => 2,
            Width::Byte => 1,
        }
    }
}

/// Source operand of an ALU/jump instruction: an immediate or the index register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Src {
    Imm(u32),
    X,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIter)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    Or,
    And,
    Lsh,
    Rsh,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIter)]
pub enum JmpCond {
    Gt,
    Ge,
    Eq,
    Set,
}

/// Decomposed, dispatch-ready form of [`Instruction`].
///
/// Unlike `Instruction`, decoding this never out-of-range-indexes anything:
/// every opcode whose class/size/mode/source combination isn't one of the
/// accepted ones in the specification's opcode table is rejected by
/// [`Opcode::decode`] instead of being represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    LdImm(u32),
    LdMem(usize),
    LdLen,
    LdAbs(Width, u32),
    LdInd(Width, u32),
    LdxImm(u32),
    LdxMem(usize),
    LdxLen,
    LdxMsh(u32),
    St(usize),
    Stx(usize),
    Alu(AluOp, Src),
    JmpA(u32),
    JmpCond(JmpCond, Src, u8, u8),
    RetK(u32),
    RetA,
    Tax,
    Txa,
    Cop(u32),
    Copx,
}

impl Opcode {
    /// Decode a raw instruction. Returns `Err` for anything outside the
    /// accepted opcode table in the specification (§6): unknown bits, an
    /// unsupported size/mode combination, `RET X`, or a scratch index
    /// `>= MEMWORDS`.
    pub fn decode(insn: &Instruction) -> Result<Opcode, CompileError> {
        use bits::*;

        let class = insn.code & CLASS_MASK;
        let size = insn.code & SIZE_MASK;
        let mode = insn.code & MODE_MASK;
        let src = insn.code & SRC_MASK;

        let width = |code: u16| -> Result<Width, CompileError> {
            match code & SIZE_MASK {
                W => Ok(Width::Word),
                H => Ok(Width::Half),
                B => Ok(Width::Byte),
                _ => Err(CompileError::UnsupportedOpcode(insn.code)),
            }
        };

        let scratch = |k: u32| -> Result<usize, CompileError> {
            let k = k as usize;
            if k >= MEMWORDS {
                Err(CompileError::ScratchIndexOutOfBounds(k))
            } else {
                Ok(k)
            }
        };

        match class {
            LD => match mode {
                IMM => Ok(Opcode::LdImm(insn.k)),
                MEM => scratch(insn.k).map(Opcode::LdMem),
                LEN => Ok(Opcode::LdLen),
                ABS => Ok(Opcode::LdAbs(width(insn.code)?, insn.k)),
                IND => Ok(Opcode::LdInd(width(insn.code)?, insn.k)),
                _ => Err(CompileError::UnsupportedOpcode(insn.code)),
            },
            LDX => match mode {
                IMM => Ok(Opcode::LdxImm(insn.k)),
                MEM => scratch(insn.k).map(Opcode::LdxMem),
                LEN => Ok(Opcode::LdxLen),
                MSH if size == B => Ok(Opcode::LdxMsh(insn.k)),
                _ => Err(CompileError::UnsupportedOpcode(insn.code)),
            },
            ST => scratch(insn.k).map(Opcode::St),
            STX => scratch(insn.k).map(Opcode::Stx),
            ALU => {
                let op = match insn.code & ALUOP_MASK {
                    ADD => AluOp::Add,
                    SUB => AluOp::Sub,
                    MUL => AluOp::Mul,
                    DIV => AluOp::Div,
                    OR => AluOp::Or,
                    AND => AluOp::And,
                    LSH => AluOp::Lsh,
                    RSH => AluOp::Rsh,
                    NEG => AluOp::Neg,
                    _ => return Err(CompileError::UnsupportedOpcode(insn.code)),
                };
                let operand = if op == AluOp::Neg {
                    Src::Imm(0)
                } else {
                    match src {
                        K => Src::Imm(insn.k),
                        X => Src::X,
                        _ => unreachable!("SRC_MASK has only two values"),
                    }
                };
                // DIV by a literal zero immediate is not rejected here: it
                // compiles successfully into an unconditional branch to the
                // shared return-0 tail, the same destination DIV by X==0
                // reaches at runtime. See the emitter's Alu arm.
                Ok(Opcode::Alu(op, operand))
            }
            JMP => {
                let op = insn.code & JMPOP_MASK;
                if op == JA {
                    Ok(Opcode::JmpA(insn.k))
                } else {
                    let cond = match op {
                        JGT => JmpCond::Gt,
                        JGE => JmpCond::Ge,
                        JEQ => JmpCond::Eq,
                        JSET => JmpCond::Set,
                        _ => return Err(CompileError::UnsupportedOpcode(insn.code)),
                    };
                    let operand = match src {
                        K => Src::Imm(insn.k),
                        X => Src::X,
                        _ => unreachable!("SRC_MASK has only two values"),
                    };
                    Ok(Opcode::JmpCond(cond, operand, insn.jt, insn.jf))
                }
            }
            RET => match insn.code & RVAL_MASK {
                RVAL_K => Ok(Opcode::RetK(insn.k)),
                RVAL_A => Ok(Opcode::RetA),
                RVAL_X => Err(CompileError::ReturnFromIndexRegister),
                _ => Err(CompileError::UnsupportedOpcode(insn.code)),
            },
            MISC => match insn.code & MISCOP_MASK {
                TAX => Ok(Opcode::Tax),
                TXA => Ok(Opcode::Txa),
                COP => Ok(Opcode::Cop(insn.k)),
                COPX => Ok(Opcode::Copx),
                _ => Err(CompileError::UnsupportedOpcode(insn.code)),
            },
            _ => Err(CompileError::UnsupportedOpcode(insn.code)),
        }
    }

    /// `true` if this instruction reads the packet buffer, and if so the
    /// number of bytes the read requires starting at its `k` offset.
    pub const fn read_width(&self) -> Option<u32> {
        match self {
            Opcode::LdAbs(w, _) | Opcode::LdInd(w, _) => Some(w.bytes()),
            Opcode::LdxMsh(_) => Some(1),
            _ => None,
        }
    }

    /// Packet offset a read instruction starts at (`k` for `LdAbs`/`LdInd`
    /// is a compile-time base; `LdInd` additionally adds the runtime `X`
    /// register, which the analyzer cannot fold into `k`).
    pub const fn read_offset(&self) -> Option<u32> {
        match self {
            Opcode::LdAbs(_, k) | Opcode::LdInd(_, k) | Opcode::LdxMsh(k) => Some(*k),
            _ => None,
        }
    }
}
