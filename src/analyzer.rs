//! The compiler's first pass: block structure, safe lengths, the
//! initialization mask, and scratch-register/extension-call counts.
//!
//! See the design notes for why incoming jump edges are tracked by
//! `(source instruction, arm)` rather than an intrusive linked list: classic
//! BPF's displacement encoding (`target = i + 1 + disp`, `disp` unsigned)
//! guarantees every jump target is strictly greater than its source, so a
//! single forward pass can always resolve a target's incoming edges by the
//! time it reaches them; there is never a backward edge to reason about.

use crate::consts::{MAX_NSCRATCHES, MIN_NSCRATCHES, NO_CHECK_LENGTH};
use crate::error::CompileError;
use crate::init_mask::InitMask;
use crate::insn::{AluOp, Opcode, Src};

/// Which outgoing arm of a two-way jump an edge came from. `Ja` instructions
/// and `jt == jf` conditionals record a single `Unconditional` edge instead
/// of duplicating it into both arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arm {
    Unconditional,
    Jt,
    Jf,
}

/// Identifies one outgoing jump edge: the instruction it departs from and
/// which arm. The emitter uses this to find the handle it created when it
/// visited `source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeId {
    pub source: usize,
    pub arm: Arm,
}

#[derive(Debug, Clone, Copy)]
pub struct IncomingEdge {
    pub edge: EdgeId,
    pub safe_length: u32,
}

/// Per-instruction output of the analyzer.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRecord {
    /// Edges landing on this instruction (non-empty iff it starts a block
    /// via being a jump target).
    pub incoming: Vec<IncomingEdge>,
    /// For the first packet-read instruction of a block: the block's safe
    /// length. Zero for every other instruction (including later reads in
    /// the same block, whose check has already been hoisted).
    pub check_length: u32,
    /// Slots not proven initialized when this instruction is reached.
    pub invalid: InitMask,
    pub unreachable: bool,
}

/// Summary outputs of the analyzer, threaded into the emitter's prologue
/// and register bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisSummary {
    pub initmask: InitMask,
    pub nscratches: u8,
    pub ncopfuncs: u32,
}

pub struct Analysis {
    pub records: Vec<AnalysisRecord>,
    pub summary: AnalysisSummary,
}

/// Does this opcode read the packet buffer, and if so how many bytes
/// starting at its (compile-time) `k` offset?
fn read_pkt_width(op: &Opcode) -> Option<u32> {
    op.read_width()
}

fn checked_length(k: u32, width: u32) -> u32 {
    k.checked_add(width).unwrap_or(u32::MAX)
}

/// Zero out `check_length` for every read in `[from, to)` except the first,
/// and set the first one to `length`. A no-op if `from` is `None` (no reads
/// were seen in the just-closed block).
fn set_check_length(decoded: &[Opcode], records: &mut [AnalysisRecord], from: Option<usize>, to: usize, mut length: u32) {
    let Some(from) = from else { return };
    for rec in records.iter_mut().zip(decoded).skip(from).take(to - from).filter_map(|(r, op)| read_pkt_width(op).map(|_| r)) {
        rec.check_length = length;
        length = NO_CHECK_LENGTH;
    }
}

/// The weakest (smallest) safe length guaranteed by every edge landing on
/// this instruction. `u32::MAX` (vacuously true) if there are no edges yet;
/// callers only use this result when `jump_dst` is true.
fn join_safe_length(incoming: &[IncomingEdge]) -> u32 {
    incoming.iter().map(|e| e.safe_length).min().unwrap_or(u32::MAX)
}

fn require_nscratches(summary: &mut AnalysisSummary, n: u8) {
    if summary.nscratches < n {
        summary.nscratches = n;
    }
    debug_assert!(summary.nscratches <= MAX_NSCRATCHES);
}

/// Run the analyzer over an already-decoded instruction stream.
///
/// `insns` and `decoded` must have the same length; `decoded[i]` is the
/// result of `Opcode::decode(&insns[i])`, already validated not to be a
/// structural rejection for reasons other than jump range (the one failure
/// this pass itself can still produce).
pub fn analyze(decoded: &[Opcode]) -> Result<Analysis, CompileError> {
    let n = decoded.len();
    if n == 0 {
        return Err(CompileError::EmptyProgram);
    }

    let mut records: Vec<AnalysisRecord> = vec![AnalysisRecord::default(); n];

    let mut summary = AnalysisSummary {
        initmask: InitMask::EMPTY,
        nscratches: MIN_NSCRATCHES,
        ncopfuncs: 0,
    };

    let mut safe_length: u32 = 0;
    let mut invalid = InitMask::ALL;
    let mut unreachable = false;
    let mut first_read: Option<usize> = None;

    for i in 0..n {
        let jump_dst = !records[i].incoming.is_empty();
        let breaks_block = matches!(decoded[i], Opcode::Cop(_) | Opcode::Copx);

        if jump_dst || (breaks_block && !unreachable) {
            unreachable = false;
            set_check_length(decoded, &mut records, first_read, i, safe_length);
            first_read = None;
            if jump_dst {
                safe_length = join_safe_length(&records[i].incoming);
            }
        }

        records[i].unreachable = unreachable;
        if unreachable {
            continue;
        }

        invalid = invalid.union(records[i].invalid);

        if let Some(width) = read_pkt_width(&decoded[i]) {
            if first_read.is_none() {
                first_read = Some(i);
            }
            let k = decoded[i].read_offset().unwrap_or(0);
            let length = checked_length(k, width);
            if length > safe_length {
                safe_length = length;
            }
        }

        match &decoded[i] {
            Opcode::RetK(_) => {
                unreachable = true;
            }
            Opcode::RetA => {
                summary.initmask = summary.initmask.union(invalid.intersect(InitMask::a()));
                unreachable = true;
            }

            Opcode::LdImm(_) | Opcode::LdLen => {
                invalid = invalid.remove(InitMask::a());
            }
            Opcode::LdAbs(width, _) | Opcode::LdInd(width, _) => {
                if matches!(decoded[i], Opcode::LdInd(..)) {
                    require_nscratches(&mut summary, 4);
                }
                if *width == crate::insn::Width::Word {
                    require_nscratches(&mut summary, 3);
                }
                if matches!(decoded[i], Opcode::LdInd(..)) {
                    summary.initmask = summary.initmask.union(invalid.intersect(InitMask::x()));
                }
                invalid = invalid.remove(InitMask::a());
            }
            Opcode::LdMem(k) => {
                summary.initmask = summary.initmask.union(invalid.intersect(InitMask::mem(*k)));
                invalid = invalid.remove(InitMask::a());
            }

            Opcode::LdxImm(_) | Opcode::LdxLen => {
                require_nscratches(&mut summary, 4);
                invalid = invalid.remove(InitMask::x());
            }
            Opcode::LdxMem(k) => {
                require_nscratches(&mut summary, 4);
                summary.initmask = summary.initmask.union(invalid.intersect(InitMask::mem(*k)));
                invalid = invalid.remove(InitMask::x());
            }
            Opcode::LdxMsh(_) => {
                require_nscratches(&mut summary, 4);
                invalid = invalid.remove(InitMask::x());
            }

            Opcode::St(k) => {
                summary.initmask = summary.initmask.union(invalid.intersect(InitMask::a()));
                invalid = invalid.remove(InitMask::mem(*k));
            }
            Opcode::Stx(k) => {
                require_nscratches(&mut summary, 4);
                summary.initmask = summary.initmask.union(invalid.intersect(InitMask::x()));
                invalid = invalid.remove(InitMask::mem(*k));
            }

            Opcode::Alu(op, src) => {
                summary.initmask = summary.initmask.union(invalid.intersect(InitMask::a()));
                if *op != AluOp::Neg && *src == Src::X {
                    summary.initmask = summary.initmask.union(invalid.intersect(InitMask::x()));
                    require_nscratches(&mut summary, 4);
                }
                invalid = invalid.remove(InitMask::a());
            }

            Opcode::Tax => {
                require_nscratches(&mut summary, 4);
                summary.initmask = summary.initmask.union(invalid.intersect(InitMask::a()));
                invalid = invalid.remove(InitMask::x());
            }
            Opcode::Txa => {
                require_nscratches(&mut summary, 4);
                summary.initmask = summary.initmask.union(invalid.intersect(InitMask::x()));
                invalid = invalid.remove(InitMask::a());
            }
            Opcode::Copx => {
                require_nscratches(&mut summary, 4);
                require_nscratches(&mut summary, 3);
                summary.ncopfuncs += 1;
                summary.initmask = summary.initmask.union(invalid.intersect(InitMask::a()));
                invalid = invalid.remove(InitMask::a());
            }
            Opcode::Cop(_) => {
                require_nscratches(&mut summary, 3);
                summary.ncopfuncs += 1;
                summary.initmask = summary.initmask.union(invalid.intersect(InitMask::a()));
                invalid = invalid.remove(InitMask::a());
            }

            Opcode::JmpA(k) => {
                let (jt, jf) = (*k, *k);
                link_jump(&mut records, n, i, jt, jf, safe_length, invalid)?;
                if jt > 0 {
                    unreachable = true;
                }
                invalid = InitMask::EMPTY;
            }
            Opcode::JmpCond(_, _, jt, jf) => {
                let (jt, jf) = (*jt as u32, *jf as u32);
                link_jump(&mut records, n, i, jt, jf, safe_length, invalid)?;
                if jt > 0 && jf > 0 {
                    unreachable = true;
                }
                invalid = InitMask::EMPTY;
            }
        }
    }

    set_check_length(decoded, &mut records, first_read, n, safe_length);

    Ok(Analysis { records, summary })
}

fn link_jump(
    records: &mut [AnalysisRecord],
    n: usize,
    i: usize,
    jt: u32,
    jf: u32,
    safe_length: u32,
    invalid: InitMask,
) -> Result<(), CompileError> {
    let remaining = (n - (i + 1)) as u32;
    if jt >= remaining || jf >= remaining {
        let bad_disp = if jt >= remaining { jt } else { jf };
        return Err(CompileError::JumpOutOfRange {
            insn: i,
            target: i + 1 + bad_disp as usize,
        });
    }

    let jt_idx = i + 1 + jt as usize;
    let jf_idx = i + 1 + jf as usize;

    let jt_arm = if jt == jf { Arm::Unconditional } else { Arm::Jt };
    records[jt_idx].incoming.push(IncomingEdge {
        edge: EdgeId { source: i, arm: jt_arm },
        safe_length,
    });
    records[jt_idx].invalid = records[jt_idx].invalid.union(invalid);

    if jf_idx != jt_idx {
        records[jf_idx].incoming.push(IncomingEdge {
            edge: EdgeId { source: i, arm: Arm::Jf },
            safe_length,
        });
        records[jf_idx].invalid = records[jf_idx].invalid.union(invalid);
    }

    Ok(())
}
