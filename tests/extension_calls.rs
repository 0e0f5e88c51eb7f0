mod common;

use bpfjit::{generate_code, FilterArgs, JitConfig, JitContext};
use common::*;
use std::sync::Arc;

#[test]
fn cop_invokes_the_registered_host_function() {
    // ld #5; cop #0; ret a -- the host function doubles the accumulator.
    let insns = [insn(LD_IMM, 0, 0, 5), insn(MISC_COP, 0, 0, 0), ret_a()];
    let ctx = JitContext::new(vec![Arc::new(|a, _args: &FilterArgs<'_>| a * 2)]);
    let filter = generate_code(JitConfig::default(), Some(&ctx), &insns).expect("compiles");
    assert_eq!(filter.run(&FilterArgs::from_packet(b"")), 10);
}

#[test]
fn copx_dispatches_through_x() {
    // ld #7; ldx #1; copx; ret a -- funcs[1] adds 100.
    let insns = [
        insn(LD_IMM, 0, 0, 7),
        insn(LDX_IMM, 0, 0, 1),
        insn(MISC_COPX, 0, 0, 0),
        ret_a(),
    ];
    let ctx = JitContext::new(vec![
        Arc::new(|a, _args: &FilterArgs<'_>| a),
        Arc::new(|a, _args: &FilterArgs<'_>| a + 100),
    ]);
    let filter = generate_code(JitConfig::default(), Some(&ctx), &insns).expect("compiles");
    assert_eq!(filter.run(&FilterArgs::from_packet(b"")), 107);
}

#[test]
fn cop_with_no_context_returns_zero() {
    let insns = [insn(LD_IMM, 0, 0, 5), insn(MISC_COP, 0, 0, 0), ret_a()];
    let filter = generate_code(JitConfig::default(), None, &insns).expect("compiles");
    assert_eq!(filter.run(&FilterArgs::from_packet(b"")), 0);
}

#[test]
fn cop_index_out_of_range_returns_zero() {
    let insns = [insn(LD_IMM, 0, 0, 5), insn(MISC_COP, 0, 0, 3), ret_a()];
    let ctx = JitContext::new(vec![Arc::new(|a, _args: &FilterArgs<'_>| a)]);
    let filter = generate_code(JitConfig::default(), Some(&ctx), &insns).expect("compiles");
    assert_eq!(filter.run(&FilterArgs::from_packet(b"")), 0);
}

#[test]
fn copx_index_out_of_range_returns_zero() {
    let insns = [
        insn(LD_IMM, 0, 0, 5),
        insn(LDX_IMM, 0, 0, 40),
        insn(MISC_COPX, 0, 0, 0),
        ret_a(),
    ];
    let ctx = JitContext::new(vec![Arc::new(|a, _args: &FilterArgs<'_>| a)]);
    let filter = generate_code(JitConfig::default(), Some(&ctx), &insns).expect("compiles");
    assert_eq!(filter.run(&FilterArgs::from_packet(b"")), 0);
}

#[test]
fn cop_function_can_read_the_packet_through_filter_args() {
    let insns = [insn(MISC_COP, 0, 0, 0), ret_a()];
    let ctx = JitContext::new(vec![Arc::new(|_a, args: &FilterArgs<'_>| {
        args.pkt.first().copied().unwrap_or(0) as u32
    })]);
    let filter = generate_code(JitConfig::default(), Some(&ctx), &insns).expect("compiles");
    assert_eq!(filter.run(&FilterArgs::from_packet(&[42])), 42);
}
