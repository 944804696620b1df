//! Property tests for the CFG analyses: totality, the path
//! characterization of dominance, idom-removal disconnection, loop-tree
//! shape, and determinism over arbitrary small graphs.

use std::collections::{BTreeSet, VecDeque};

use proptest::prelude::*;

use fusedb::cfg::{bb_label, compute_dominator_tree, dominates, find_loops, rpo_label};

/// Arbitrary CFGs: up to 8 blocks, each with up to 3 distinct successors.
/// Entry is block 0.
fn cfg_strategy() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1usize..8).prop_flat_map(|n| {
        proptest::collection::vec(
            proptest::collection::btree_set(0..n, 0..=3usize.min(n)),
            n,
        )
        .prop_map(|sets| {
            sets.into_iter()
                .map(|s| s.into_iter().collect::<Vec<usize>>())
                .collect()
        })
    })
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

fn reachable(succ: &[Vec<usize>]) -> BTreeSet<usize> {
    reachable_without(succ, usize::MAX)
}

/// Blocks reachable from entry when `removed` is deleted from the graph.
fn reachable_without(succ: &[Vec<usize>], removed: usize) -> BTreeSet<usize> {
    let mut seen = BTreeSet::new();
    if succ.is_empty() || removed == 0 {
        return seen;
    }
    let mut queue = VecDeque::from([0usize]);
    seen.insert(0);
    while let Some(b) = queue.pop_front() {
        for &next in &succ[b] {
            if next != removed && !seen.contains(&next) {
                seen.insert(next);
                queue.push_back(next);
            }
        }
    }
    seen
}

proptest! {
    #[test]
    fn rpo_labels_exactly_the_reachable_blocks(succ in cfg_strategy()) {
        let result = rpo_label(&succ);
        let reach = reachable(&succ);

        for b in 0..succ.len() {
            prop_assert_eq!(result.label[b] >= 0, reach.contains(&b));
        }
        prop_assert_eq!(result.order.len(), reach.len());
        for (i, &b) in result.order.iter().enumerate() {
            prop_assert_eq!(result.label[b], i as i32);
        }
    }

    #[test]
    fn rpo_places_non_retreating_edges_forward(succ in cfg_strategy()) {
        let result = rpo_label(&succ);
        let labels = bb_label(&succ);

        for (u, outs) in succ.iter().enumerate() {
            if result.label[u] < 0 {
                continue;
            }
            for &v in outs {
                // Either the edge goes forward in RPO, or it retreats to a
                // DFS ancestor (a back-edge in every reducible CFG).
                let ancestor = labels.preorder[v] <= labels.preorder[u]
                    && labels.postorder[v] >= labels.postorder[u];
                prop_assert!(
                    result.label[u] < result.label[v] || ancestor,
                    "edge {u} -> {v} goes backward without retreating to an ancestor"
                );
            }
        }
    }

    #[test]
    fn dominance_matches_path_characterization(succ in cfg_strategy()) {
        let pred = pred_from_succ(&succ);
        let dom_tree = compute_dominator_tree(&pred);
        let reach = reachable(&succ);

        for &a in &reach {
            let without_a = reachable_without(&succ, a);
            for &b in &reach {
                // a dominates b iff a lies on every path from entry to b.
                prop_assert_eq!(
                    dominates(&dom_tree, a, b),
                    !without_a.contains(&b),
                    "dominates({}, {}) disagrees with path reachability", a, b
                );
            }
        }
    }

    #[test]
    fn every_reachable_block_has_one_idom(succ in cfg_strategy()) {
        let pred = pred_from_succ(&succ);
        let dom_tree = compute_dominator_tree(&pred);
        let reach = reachable(&succ);

        for &b in &reach {
            if b == 0 {
                continue;
            }
            let parents: Vec<usize> = (0..succ.len())
                .filter(|&p| dom_tree[p].contains(&b))
                .collect();
            prop_assert_eq!(parents.len(), 1, "block {} has parents {:?}", b, &parents);

            // Removing the immediate dominator disconnects the block.
            let without = reachable_without(&succ, parents[0]);
            prop_assert!(!without.contains(&b));
        }
    }

    #[test]
    fn loop_tree_is_a_forest_of_dominated_blocks(succ in cfg_strategy()) {
        let pred = pred_from_succ(&succ);
        let dom_tree = compute_dominator_tree(&pred);
        let loop_tree = find_loops(&succ, &pred);

        // Each block is claimed by at most one loop.
        let mut claimed = BTreeSet::new();
        for children in &loop_tree {
            for &c in children {
                prop_assert!(claimed.insert(c), "block {} claimed twice", c);
            }
        }

        for (header, children) in loop_tree.iter().enumerate() {
            if children.is_empty() {
                continue;
            }
            // Headers are back-edge targets...
            let is_backedge_target = succ
                .iter()
                .enumerate()
                .any(|(u, outs)| outs.contains(&header) && dominates(&dom_tree, header, u));
            prop_assert!(is_backedge_target, "header {} has no back-edge", header);

            // ...and dominate every block in their loop.
            for &c in children {
                prop_assert!(
                    dominates(&dom_tree, header, c),
                    "loop member {} escapes header {}", c, header
                );
            }
        }
    }

    #[test]
    fn analyses_are_deterministic(succ in cfg_strategy()) {
        let pred = pred_from_succ(&succ);
        prop_assert_eq!(rpo_label(&succ), rpo_label(&succ));
        prop_assert_eq!(bb_label(&succ), bb_label(&succ));
        prop_assert_eq!(
            compute_dominator_tree(&pred),
            compute_dominator_tree(&pred)
        );
        prop_assert_eq!(find_loops(&succ, &pred), find_loops(&succ, &pred));
    }

    #[test]
    fn bb_label_stamps_are_dense(succ in cfg_strategy()) {
        let labels = bb_label(&succ);
        let reach = reachable(&succ);

        let mut stamps: Vec<i32> = Vec::new();
        for b in 0..succ.len() {
            prop_assert_eq!(labels.preorder[b] >= 0, reach.contains(&b));
            prop_assert_eq!(labels.postorder[b] >= 0, reach.contains(&b));
            if labels.preorder[b] >= 0 {
                stamps.push(labels.preorder[b]);
                stamps.push(labels.postorder[b]);
            }
        }
        stamps.sort_unstable();
        let expected: Vec<i32> = (0..stamps.len() as i32).collect();
        prop_assert_eq!(stamps, expected, "stamps must form a dense range");
    }

    #[test]
    fn bb_label_agrees_with_dfs_ancestry(succ in cfg_strategy()) {
        let labels = bb_label(&succ);
        let reach = reachable(&succ);

        // Stamp intervals of reachable blocks either nest or are disjoint.
        for &a in &reach {
            for &b in &reach {
                let a_encloses =
                    labels.preorder[a] <= labels.preorder[b] && labels.postorder[a] >= labels.postorder[b];
                let b_encloses =
                    labels.preorder[b] <= labels.preorder[a] && labels.postorder[b] >= labels.postorder[a];
                let disjoint = labels.postorder[a] < labels.preorder[b]
                    || labels.postorder[b] < labels.preorder[a];
                prop_assert!(a_encloses || b_encloses || disjoint);
            }
        }
    }
}
