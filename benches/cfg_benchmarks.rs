//! Criterion micro-benchmarks over the CFG analyses.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use fusedb::cfg::{bb_label, compute_dominator_tree, find_loops, rpo_label};

/// A chain of `n` sequential loops: entry, then a (header, body) pair per
/// loop, then one exit block.
fn loop_chain_cfg(loops: usize) -> Vec<Vec<usize>> {
    let exit = 1 + 2 * loops;
    let mut succ = vec![Vec::new(); exit + 1];
    succ[0] = vec![1];
    for i in 0..loops {
        let header = 1 + 2 * i;
        let body = header + 1;
        let next = if i + 1 < loops { header + 2 } else { exit };
        succ[header] = vec![body, next];
        succ[body] = vec![header];
    }
    succ
}

fn pred_from_succ(succ: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut pred = vec![Vec::new(); succ.len()];
    for (from, outs) in succ.iter().enumerate() {
        for &to in outs {
            pred[to].push(from);
        }
    }
    pred
}

fn bench_analyses(c: &mut Criterion) {
    let succ = loop_chain_cfg(24);
    let pred = pred_from_succ(&succ);

    c.bench_function("rpo_label/chain24", |b| {
        b.iter(|| rpo_label(black_box(&succ)))
    });
    c.bench_function("bb_label/chain24", |b| {
        b.iter(|| bb_label(black_box(&succ)))
    });
    c.bench_function("dominator_tree/chain24", |b| {
        b.iter(|| compute_dominator_tree(black_box(&pred)))
    });
    c.bench_function("find_loops/chain24", |b| {
        b.iter(|| find_loops(black_box(&succ), black_box(&pred)))
    });
}

criterion_group!(benches, bench_analyses);
criterion_main!(benches);
