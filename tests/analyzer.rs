#![cfg(feature = "test-util")]

mod common;

use bpfjit::reference::{interpret, ReferenceArgs};
use bpfjit::{analyze_program, decode_program, generate_code, FilterArgs, Instruction, JitConfig};
use common::*;
use quickcheck_macros::quickcheck;

#[test]
fn a_straight_line_block_hoists_one_guard_for_all_its_reads() {
    let insns = [
        insn(LD_ABS_B, 0, 0, 0),
        insn(LD_ABS_B, 0, 0, 5),
        insn(LD_ABS_B, 0, 0, 2),
        ret_a(),
    ];
    let decoded = decode_program(&insns).expect("decodes");
    let analysis = analyze_program(&decoded).expect("analyzes");
    // Only the first read in the block carries a nonzero check_length; the
    // rest of the block rides on the length that guard already established.
    let nonzero_guards = (0..3).filter(|&i| analysis.records[i].check_length != 0).count();
    assert_eq!(nonzero_guards, 1);
    // The single guard covers the farthest read in the block: byte 5.
    assert_eq!(analysis.records[0].check_length, 6);
}

#[test]
fn a_jump_target_starts_a_new_block_with_its_own_guard() {
    // ld [0]; jeq #0, jt +1, jf +0; ret 0; ld [10]; ret a
    let insns = [
        insn(LD_ABS_B, 0, 0, 0),
        insn(JMP_JEQ_K, 1, 0, 1),
        ret_k(0),
        insn(LD_ABS_B, 0, 0, 10),
        ret_a(),
    ];
    let decoded = decode_program(&insns).expect("decodes");
    let analysis = analyze_program(&decoded).expect("analyzes");
    assert_eq!(analysis.records[0].check_length, 1);
    assert_eq!(analysis.records[3].check_length, 11);
}

#[test]
fn dead_code_after_an_unconditional_jump_is_marked_unreachable() {
    let insns = [insn(JMP_JA, 0, 0, 1), ret_k(1), ret_k(2)];
    let decoded = decode_program(&insns).expect("decodes");
    let analysis = analyze_program(&decoded).expect("analyzes");
    assert!(analysis.records[1].unreachable);
    assert!(!analysis.records[2].unreachable);
}

#[test]
fn reading_an_uninitialized_scratch_cell_is_recorded_in_the_init_mask() {
    // ld M[3]; ret a -- nothing ever stores to M[3] first.
    let insns = [insn(LD_MEM, 0, 0, 3), ret_a()];
    let decoded = decode_program(&insns).expect("decodes");
    let analysis = analyze_program(&decoded).expect("analyzes");
    assert!(!analysis.summary.initmask.mem_is_empty());
}

#[test]
fn a_fully_initialized_program_has_an_empty_init_mask() {
    let insns = [
        insn(LD_IMM, 0, 0, 7),
        insn(ST, 0, 0, 3),
        insn(LD_MEM, 0, 0, 3),
        ret_a(),
    ];
    let decoded = decode_program(&insns).expect("decodes");
    let analysis = analyze_program(&decoded).expect("analyzes");
    assert!(analysis.summary.initmask.mem_is_empty());
    assert!(!analysis.summary.initmask.contains_a());
}

fn build_program(ops: &[u8], consts: &[u32]) -> Vec<Instruction> {
    // Map a handful of arbitrary bytes onto a small, always-structurally-valid
    // instruction stream that exercises reads, arithmetic, a conditional
    // jump, and a final return -- enough to give quickcheck's shrinker
    // something to chew on without needing a full arbitrary-bytecode
    // generator (jump targets alone make that its own project).
    let k0 = consts.first().copied().unwrap_or(0) % 16;
    let k1 = consts.get(1).copied().unwrap_or(0) % 8;
    let width_choice = ops.first().copied().unwrap_or(0) % 3;
    let (ld_abs, width_bytes) = match width_choice {
        0 => (LD_ABS_W, 4u32),
        1 => (LD_ABS_H, 2u32),
        _ => (LD_ABS_B, 1u32),
    };
    let offset = consts.get(2).copied().unwrap_or(0) % 32;
    let cmp = match ops.get(1).copied().unwrap_or(0) % 4 {
        0 => JMP_JEQ_K,
        1 => JMP_JGT_K,
        2 => JMP_JGE_K,
        _ => JMP_JSET_K,
    };

    vec![
        insn(LD_ABS_B, 0, 0, 0),
        insn(ALU_ADD_K, 0, 0, k0),
        insn(ST, 0, 0, 0),
        insn(ld_abs, 0, 0, offset),
        insn(cmp, 1, 0, k1 + width_bytes),
        ret_k(0),
        insn(LD_MEM, 0, 0, 0),
        ret_a(),
    ]
}

#[quickcheck]
fn compiled_filter_agrees_with_the_reference_interpreter(
    pkt: Vec<u8>,
    ops: Vec<u8>,
    consts: Vec<u32>,
) -> bool {
    if pkt.len() > 256 {
        return true; // keep the shrinker's search space sane
    }
    let insns = build_program(&ops, &consts);
    let wirelen = pkt.len() as u32;

    let compiled = generate_code(JitConfig::default(), None, &insns)
        .expect("build_program only produces structurally valid programs");
    let compiled_result = compiled.run(&FilterArgs {
        pkt: &pkt,
        wirelen,
        chain: None,
    });

    let reference_result = interpret(&insns, None, &ReferenceArgs { pkt: &pkt, wirelen })
        .expect("build_program only produces structurally valid programs");

    compiled_result == reference_result
}
