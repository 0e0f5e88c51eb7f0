//! A safe, dependency-free `Assembler` backend.
//!
//! Instead of native machine code, [`ThreadedAssembler`] assembles into a
//! flat `Vec<Step>`, a threaded-code program in the classic sense, just
//! interpreted rather than executed directly by the CPU. [`CompiledFilter`]
//! is the linked artifact; its [`CompiledFilter::run`] method is the
//! stand-in for calling through an emitted function pointer.

use std::fmt;

use crate::consts::MEMWORDS;
use crate::context::JitContext;
use crate::error::CompileError;
use crate::insn::{AluOp, JmpCond, Width};

use super::{Assembler, Label, PktBase, RValue, Reg, Test};

#[derive(Debug, Clone)]
enum Template {
    Zero(Reg),
    Set(Reg, RValue),
    LoadWirelen(Reg),
    Alu(AluOp, RValue),
    LoadPkt(PktBase, Width, u32),
    LoadPktChain(PktBase, Width, u32),
    LoadMsh(u32),
    LoadMshChain(u32),
    Tax,
    Txa,
    CallCop(RValue),
    BranchIf(Test, Label),
    Jump(Label),
    Ret(RValue),
}

/// One step of the linked, position-addressed program. Not constructible
/// outside this module; [`CompiledFilter::run`] is the only consumer.
#[derive(Debug, Clone)]
enum Step {
    Zero(Reg),
    Set(Reg, RValue),
    LoadWirelen(Reg),
    Alu(AluOp, RValue),
    LoadPkt(PktBase, Width, u32),
    LoadPktChain(PktBase, Width, u32),
    LoadMsh(u32),
    LoadMshChain(u32),
    Tax,
    Txa,
    CallCop(RValue),
    BranchIf(Test, usize),
    Jump(usize),
    Ret(RValue),
}

/// In-progress program plus label bookkeeping, per [`Assembler`].
#[derive(Default)]
pub struct ThreadedAssembler {
    steps: Vec<Template>,
    label_positions: Vec<Option<usize>>,
}

impl ThreadedAssembler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Assembler for ThreadedAssembler {
    type Output = CompiledFilter;

    fn new_label(&mut self) -> Label {
        let id = self.label_positions.len();
        self.label_positions.push(None);
        Label(id)
    }

    fn bind(&mut self, label: Label) {
        debug_assert!(
            self.label_positions[label.0].is_none(),
            "label bound more than once"
        );
        self.label_positions[label.0] = Some(self.steps.len());
    }

    fn zero(&mut self, reg: Reg) {
        self.steps.push(Template::Zero(reg));
    }

    fn set(&mut self, reg: Reg, value: RValue) {
        self.steps.push(Template::Set(reg, value));
    }

    fn load_wirelen(&mut self, reg: Reg) {
        self.steps.push(Template::LoadWirelen(reg));
    }

    fn alu(&mut self, op: AluOp, rhs: RValue) {
        self.steps.push(Template::Alu(op, rhs));
    }

    fn load_pkt(&mut self, base: PktBase, width: Width, k: u32) {
        self.steps.push(Template::LoadPkt(base, width, k));
    }

    fn load_pkt_chain(&mut self, base: PktBase, width: Width, k: u32) {
        self.steps.push(Template::LoadPktChain(base, width, k));
    }

    fn load_msh(&mut self, k: u32) {
        self.steps.push(Template::LoadMsh(k));
    }

    fn load_msh_chain(&mut self, k: u32) {
        self.steps.push(Template::LoadMshChain(k));
    }

    fn tax(&mut self) {
        self.steps.push(Template::Tax);
    }

    fn txa(&mut self) {
        self.steps.push(Template::Txa);
    }

    fn call_cop(&mut self, index: RValue) {
        self.steps.push(Template::CallCop(index));
    }

    fn branch_if(&mut self, test: Test, target: Label) {
        self.steps.push(Template::BranchIf(test, target));
    }

    fn jump(&mut self, target: Label) {
        self.steps.push(Template::Jump(target));
    }

    fn ret(&mut self, value: RValue) {
        self.steps.push(Template::Ret(value));
    }

    fn link(self) -> Result<CompiledFilter, CompileError> {
        let resolve = |label: Label| {
            self.label_positions[label.0].ok_or(CompileError::BackendFailure)
        };
        let mut steps = Vec::with_capacity(self.steps.len());
        for t in self.steps {
            steps.push(match t {
                Template::Zero(r) => Step::Zero(r),
                Template::Set(r, v) => Step::Set(r, v),
                Template::LoadWirelen(r) => Step::LoadWirelen(r),
                Template::Alu(op, v) => Step::Alu(op, v),
                Template::LoadPkt(b, w, k) => Step::LoadPkt(b, w, k),
                Template::LoadPktChain(b, w, k) => Step::LoadPktChain(b, w, k),
                Template::LoadMsh(k) => Step::LoadMsh(k),
                Template::LoadMshChain(k) => Step::LoadMshChain(k),
                Template::Tax => Step::Tax,
                Template::Txa => Step::Txa,
                Template::CallCop(v) => Step::CallCop(v),
                Template::BranchIf(test, label) => Step::BranchIf(test, resolve(label)?),
                Template::Jump(label) => Step::Jump(resolve(label)?),
                Template::Ret(v) => Step::Ret(v),
            });
        }
        Ok(CompiledFilter { steps, ctx: None })
    }
}

/// A chained-buffer packet source, for the kernel-build fallback path.
///
/// Models the real system's segmented packet buffers (`mbuf` chains and
/// similar): a read that falls outside the contiguous primary buffer may
/// still be satisfiable by walking the chain. Each method returns `None` if
/// `offset` lies beyond the end of the chained data.
pub trait ChainedPacket {
    fn read_u8(&self, offset: u32) -> Option<u32>;
    fn read_u16(&self, offset: u32) -> Option<u32>;
    fn read_u32(&self, offset: u32) -> Option<u32>;
}

fn read_chain(c: &dyn ChainedPacket, offset: u32, width: Width) -> Option<u32> {
    match width {
        Width::Byte => c.read_u8(offset),
        Width::Half => c.read_u16(offset),
        Width::Word => c.read_u32(offset),
    }
}

/// The arguments a compiled filter runs against: the captured packet bytes,
/// the original on-wire length (what `ld len` reads), and, for kernel
/// builds, a chained-buffer fallback source.
pub struct FilterArgs<'a> {
    pub pkt: &'a [u8],
    pub wirelen: u32,
    pub chain: Option<&'a dyn ChainedPacket>,
}

impl<'a> FilterArgs<'a> {
    /// Construct arguments for a single contiguous buffer with no chain
    /// fallback, the common userspace case, where `pkt` is the entire
    /// captured packet and also its own wire length.
    pub fn from_packet(pkt: &'a [u8]) -> Self {
        Self {
            pkt,
            wirelen: pkt.len() as u32,
            chain: None,
        }
    }
}

impl fmt::Debug for FilterArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterArgs")
            .field("pkt_len", &self.pkt.len())
            .field("wirelen", &self.wirelen)
            .field("chained", &self.chain.is_some())
            .finish()
    }
}

fn read_be(pkt: &[u8], offset: u32, width: Width) -> Option<u32> {
    let start = offset as usize;
    let end = start.checked_add(width.bytes() as usize)?;
    let bytes = pkt.get(start..end)?;
    Some(match width {
        Width::Word => u32::from_be_bytes(bytes.try_into().unwrap()),
        Width::Half => u16::from_be_bytes(bytes.try_into().unwrap()) as u32,
        Width::Byte => bytes[0] as u32,
    })
}

fn pkt_offset(base: PktBase, k: u32, x: u32) -> u32 {
    match base {
        PktBase::Abs => k,
        PktBase::Ind => k.wrapping_add(x),
    }
}

/// The linked, executable artifact of compilation.
///
/// Stands in for the native function pointer a real JIT assembler would
/// hand back; [`CompiledFilter::run`] is this crate's equivalent of calling
/// through it. The extension-function table a `cop`/`copx` instruction
/// dispatches through is fixed at compile time (via
/// [`CompiledFilter::with_context`]), not supplied per call: the same
/// compiled filter always resolves the same `cop k` to the same host
/// function, matching the original's `bpfjit_generate_code(bc, ...)`
/// contract.
pub struct CompiledFilter {
    steps: Vec<Step>,
    ctx: Option<JitContext>,
}

impl CompiledFilter {
    /// Attach the extension-function table this filter's `cop`/`copx`
    /// instructions dispatch through. Called once, by
    /// [`crate::compiler::generate_code`], right after linking.
    pub(crate) fn with_context(mut self, ctx: Option<JitContext>) -> Self {
        self.ctx = ctx;
        self
    }

    /// Evaluate the filter against one packet, returning the number of
    /// leading bytes of `args.pkt` the filter accepts.
    pub fn run(&self, args: &FilterArgs<'_>) -> u32 {
        let ctx = self.ctx.as_ref();
        let mut a: u32 = 0;
        let mut x: u32 = 0;
        let mut mem = [0u32; MEMWORDS];
        let buflen = args.pkt.len() as u32;
        let mut pc = 0usize;

        loop {
            match &self.steps[pc] {
                Step::Zero(reg) => {
                    write_reg(*reg, &mut a, &mut x, &mut mem, 0);
                    pc += 1;
                }
                Step::Set(reg, value) => {
                    let v = eval(*value, a, x, &mem);
                    write_reg(*reg, &mut a, &mut x, &mut mem, v);
                    pc += 1;
                }
                Step::LoadWirelen(reg) => {
                    write_reg(*reg, &mut a, &mut x, &mut mem, args.wirelen);
                    pc += 1;
                }
                Step::Alu(op, rhs) => {
                    let rhs = eval(*rhs, a, x, &mem);
                    a = apply_alu(*op, a, rhs);
                    pc += 1;
                }
                Step::LoadPkt(base, width, k) => {
                    let offset = pkt_offset(*base, *k, x);
                    a = read_be(args.pkt, offset, *width).unwrap_or(0);
                    pc += 1;
                }
                Step::LoadPktChain(base, width, k) => {
                    let offset = pkt_offset(*base, *k, x);
                    match args.chain.and_then(|c| read_chain(c, offset, *width)) {
                        Some(v) => {
                            a = v;
                            pc += 1;
                        }
                        None => return 0,
                    }
                }
                Step::LoadMsh(k) => {
                    let byte = args.pkt.get(*k as usize).copied().unwrap_or(0);
                    a = u32::from(byte & 0x0f) << 2;
                    pc += 1;
                }
                Step::LoadMshChain(k) => match args.chain.and_then(|c| c.read_u8(*k)) {
                    Some(byte) => {
                        a = (byte & 0x0f) << 2;
                        pc += 1;
                    }
                    None => return 0,
                },
                Step::Tax => {
                    x = a;
                    pc += 1;
                }
                Step::Txa => {
                    a = x;
                    pc += 1;
                }
                Step::CallCop(index) => {
                    let idx = eval(*index, a, x, &mem);
                    match ctx.and_then(|c| c.get(idx)) {
                        Some(f) => {
                            a = f(a, args);
                            pc += 1;
                        }
                        None => return 0,
                    }
                }
                Step::BranchIf(test, target) => {
                    if eval_test(test, a, x, &mem, buflen) {
                        pc = *target;
                    } else {
                        pc += 1;
                    }
                }
                Step::Jump(target) => {
                    pc = *target;
                }
                Step::Ret(value) => {
                    return eval(*value, a, x, &mem);
                }
            }
        }
    }
}

fn read_reg(reg: Reg, a: u32, x: u32, mem: &[u32; MEMWORDS]) -> u32 {
    match reg {
        Reg::A => a,
        Reg::X => x,
        Reg::Mem(k) => mem[k],
    }
}

fn write_reg(reg: Reg, a: &mut u32, x: &mut u32, mem: &mut [u32; MEMWORDS], value: u32) {
    match reg {
        Reg::A => *a = value,
        Reg::X => *x = value,
        Reg::Mem(k) => mem[k] = value,
    }
}

fn eval(value: RValue, a: u32, x: u32, mem: &[u32; MEMWORDS]) -> u32 {
    match value {
        RValue::Reg(reg) => read_reg(reg, a, x, mem),
        RValue::Imm(k) => k,
    }
}

/// Applies one ALU op. Division by zero and `Neg` are handled by the
/// emitter: `Neg` always emits `Alu(Neg, _)` where `rhs` is ignored, and a
/// zero divisor is guarded by a preceding `Test::XEqZero` branch, so `rhs ==
/// 0` never reaches `Div` here.
fn apply_alu(op: AluOp, a: u32, rhs: u32) -> u32 {
    match op {
        AluOp::Add => a.wrapping_add(rhs),
        AluOp::Sub => a.wrapping_sub(rhs),
        AluOp::Mul => a.wrapping_mul(rhs),
        AluOp::Div => a / rhs,
        AluOp::Or => a | rhs,
        AluOp::And => a & rhs,
        AluOp::Lsh => a.wrapping_shl(rhs),
        AluOp::Rsh => a.wrapping_shr(rhs),
        AluOp::Neg => a.wrapping_neg(),
    }
}

fn eval_test(test: &Test, a: u32, x: u32, mem: &[u32; MEMWORDS], buflen: u32) -> bool {
    match *test {
        Test::BufLenLessThan(len) => buflen < len,
        Test::IndOutOfRange { k, width } => {
            let need = k.checked_add(width).unwrap_or(u32::MAX);
            match buflen.checked_sub(need) {
                Some(room) => room < x,
                None => true,
            }
        }
        Test::XEqZero => x == 0,
        Test::Compare(cond, reg, rhs) => {
            let lhs = read_reg(reg, a, x, mem);
            let rhs = eval(rhs, a, x, mem);
            match cond {
                JmpCond::Gt => lhs > rhs,
                JmpCond::Ge => lhs >= rhs,
                JmpCond::Eq => lhs == rhs,
                JmpCond::Set => lhs & rhs != 0,
            }
        }
    }
}
