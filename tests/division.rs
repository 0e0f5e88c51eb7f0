mod common;

use bpfjit::{generate_code, FilterArgs, JitConfig};
use common::*;

fn run(insns: &[bpfjit::Instruction], pkt: &[u8]) -> u32 {
    let filter = generate_code(JitConfig::default(), None, insns).expect("compiles");
    filter.run(&FilterArgs::from_packet(pkt))
}

#[test]
fn division_by_constant_zero_compiles_and_returns_zero_at_runtime() {
    // ld #10; div #0; ret a -- compiles fine: a literal zero divisor can
    // never succeed, so it's routed straight to the shared reject path
    // instead of being rejected up front.
    let insns = [
        insn(LD_IMM, 0, 0, 10),
        insn(ALU_DIV_K, 0, 0, 0),
        ret_a(),
    ];
    assert_eq!(run(&insns, b""), 0);
}

#[test]
fn division_by_constant_nonzero_works() {
    let insns = [
        insn(LD_IMM, 0, 0, 20),
        insn(ALU_DIV_K, 0, 0, 4),
        ret_a(),
    ];
    assert_eq!(run(&insns, b""), 5);
}

#[test]
fn division_by_x_equal_to_zero_returns_zero_at_runtime() {
    // ld #10; ldx #0; div x; ret a -- X==0 is only known at runtime, so it
    // becomes a guard that falls through to the filter's shared reject path.
    let insns = [
        insn(LD_IMM, 0, 0, 10),
        insn(LDX_IMM, 0, 0, 0),
        insn(ALU_DIV_X, 0, 0, 0),
        ret_a(),
    ];
    assert_eq!(run(&insns, b""), 0);
}

#[test]
fn division_by_x_nonzero_works() {
    let insns = [
        insn(LD_IMM, 0, 0, 99),
        insn(LDX_IMM, 0, 0, 9),
        insn(ALU_DIV_X, 0, 0, 0),
        ret_a(),
    ];
    assert_eq!(run(&insns, b""), 11);
}
