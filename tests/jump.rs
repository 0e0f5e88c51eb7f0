mod common;

use bpfjit::{generate_code, CompileError, FilterArgs, JitConfig};
use common::*;

fn run(insns: &[bpfjit::Instruction], pkt: &[u8]) -> u32 {
    let filter = generate_code(JitConfig::default(), None, insns).expect("compiles");
    filter.run(&FilterArgs::from_packet(pkt))
}

#[test]
fn unconditional_jump_skips_dead_code() {
    // ja +1; ret 1 (dead); ret 2
    let insns = [insn(JMP_JA, 0, 0, 1), ret_k(1), ret_k(2)];
    assert_eq!(run(&insns, b""), 2);
}

#[test]
fn conditional_jump_both_arms_reachable() {
    // ld #5; jeq #5, jt +1, jf +0; ret 10 (jf path); ret 20 (jt path)
    let insns = [
        insn(LD_IMM, 0, 0, 5),
        insn(JMP_JEQ_K, 1, 0, 5),
        ret_k(10),
        ret_k(20),
    ];
    assert_eq!(run(&insns, b""), 20);
}

#[test]
fn conditional_jump_false_arm() {
    let insns = [
        insn(LD_IMM, 0, 0, 7),
        insn(JMP_JEQ_K, 1, 0, 5),
        ret_k(10),
        ret_k(20),
    ];
    assert_eq!(run(&insns, b""), 10);
}

#[test]
fn jump_out_of_range_is_rejected() {
    let insns = [insn(JMP_JA, 0, 0, 5), ret_k(0)];
    let err = generate_code(JitConfig::default(), None, &insns).unwrap_err();
    assert!(matches!(err, CompileError::JumpOutOfRange { insn: 0, .. }));
}

#[test]
fn conditional_jump_target_out_of_range_is_rejected() {
    let insns = [insn(JMP_JEQ_K, 10, 0, 1), ret_k(0), ret_k(1)];
    let err = generate_code(JitConfig::default(), None, &insns).unwrap_err();
    assert!(matches!(err, CompileError::JumpOutOfRange { insn: 0, .. }));
}

#[test]
fn empty_program_is_rejected() {
    let err = generate_code(JitConfig::default(), None, &[]).unwrap_err();
    assert!(matches!(err, CompileError::EmptyProgram));
}

#[test]
fn return_from_index_register_is_rejected() {
    let insns = [insn(RET_X, 0, 0, 0)];
    let err = generate_code(JitConfig::default(), None, &insns).unwrap_err();
    assert!(matches!(err, CompileError::ReturnFromIndexRegister));
}

#[test]
fn diamond_shaped_jumps_converge_on_a_shared_return() {
    // ld #1; jeq #1, jt->pc3, jf->pc5; (dead filler); ld #111; ja->pc6; ld #222; ret a
    let insns = [
        insn(LD_IMM, 0, 0, 1),
        insn(JMP_JEQ_K, 1, 3, 1),
        ret_k(0),
        insn(LD_IMM, 0, 0, 111),
        insn(JMP_JA, 0, 0, 1),
        insn(LD_IMM, 0, 0, 222),
        ret_a(),
    ];
    assert_eq!(run(&insns, b""), 111);
}
