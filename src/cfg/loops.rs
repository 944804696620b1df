//! Natural-loop discovery and loop-tree construction.
//!
//! A back-edge is an edge `u -> v` where `v` dominates `u`. The natural loop
//! at header `v` is `v` plus everything that reaches a back-edge source
//! backwards through predecessors without leaving the region `v` dominates;
//! loops sharing a header are merged. The loop tree attaches each loop under
//! its smallest enclosing loop, smallest loops first, using a union-find
//! from block to representative header so each inner loop contributes
//! exactly one child to its parent.

use std::collections::{BTreeSet, HashSet, VecDeque};

use super::dominators::{compute_dominator_tree, dominates};
use super::union_find;

/// Find natural loops and build the loop tree.
///
/// Returns per-block children lists: `tree[h]` is non-empty only when `h` is
/// a loop header, and holds the headers of directly nested loops plus the
/// member blocks not claimed by any inner loop.
pub fn find_loops(succ: &[Vec<usize>], pred: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = succ.len();
    let dom_tree = compute_dominator_tree(pred);

    // Back-edge sources per header.
    let mut backedges: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (u, outs) in succ.iter().enumerate() {
        for &v in outs {
            if dominates(&dom_tree, v, u) {
                backedges[v].push(u);
            }
        }
    }

    // Loop membership per header; loops sharing a header merge here.
    let mut loops: Vec<HashSet<usize>> = vec![HashSet::new(); n];
    for header in 0..n {
        if backedges[header].is_empty() {
            continue;
        }

        loops[header].insert(header);

        // Reverse BFS from every back-edge source, ignoring edges into the
        // header and anything the header does not dominate.
        let mut visited = vec![false; n];
        visited[header] = true;

        let mut queue = VecDeque::new();
        for &src in &backedges[header] {
            queue.push_back(src);
            visited[src] = true;
        }

        while let Some(block) = queue.pop_front() {
            loops[header].insert(block);

            for &p in &pred[block] {
                if !visited[p] {
                    visited[p] = true;
                    if dominates(&dom_tree, header, p) {
                        queue.push_back(p);
                    }
                }
            }
        }
    }

    // Attach loops smallest-first; equal sizes break ties by header index so
    // the tree is deterministic.
    let mut order: Vec<usize> = (0..n).filter(|&i| !loops[i].is_empty()).collect();
    order.sort_by_key(|&h| (loops[h].len(), h));

    let mut loop_tree: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut parent: Vec<usize> = (0..n).collect();

    for header in order {
        let mut children = BTreeSet::new();
        for &block in &loops[header] {
            children.insert(union_find::find(&mut parent, block));
        }
        children.remove(&header);

        loop_tree[header] = children.iter().copied().collect();
        for &child in &children {
            union_find::union(&mut parent, child, header);
        }
    }

    loop_tree
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pred_from_succ(succ: &[Vec<usize>]) -> Vec<Vec<usize>> {
        let mut pred = vec![Vec::new(); succ.len()];
        for (from, outs) in succ.iter().enumerate() {
            for &to in outs {
                pred[to].push(from);
            }
        }
        pred
    }

    #[test]
    fn test_no_loop() {
        let succ = vec![vec![1], vec![2, 3], vec![4], vec![4], vec![]];
        let tree = find_loops(&succ, &pred_from_succ(&succ));

        assert_eq!(tree, vec![vec![], vec![], vec![], vec![], vec![]]);
    }

    #[test]
    fn test_simple_loop() {
        let succ = vec![vec![1], vec![2, 3], vec![1], vec![]];
        let tree = find_loops(&succ, &pred_from_succ(&succ));

        assert_eq!(tree, vec![vec![], vec![2], vec![], vec![]]);
    }

    #[test]
    fn test_simple_loop_with_early_return() {
        let succ = vec![vec![1], vec![2], vec![3, 4], vec![], vec![1]];
        let tree = find_loops(&succ, &pred_from_succ(&succ));

        assert_eq!(tree, vec![vec![], vec![2, 4], vec![], vec![], vec![]]);
    }

    #[test]
    fn test_nested_loop() {
        let succ = vec![vec![1], vec![2, 5], vec![3, 4], vec![2], vec![1], vec![]];
        let tree = find_loops(&succ, &pred_from_succ(&succ));

        // Inner loop {2, 3} headed at 2 contributes one child to the outer
        // loop headed at 1.
        assert_eq!(tree, vec![vec![], vec![2, 4], vec![3], vec![], vec![], vec![]]);
    }

    #[test]
    fn test_back_edge_targets_are_headers() {
        let succ = vec![vec![1], vec![2, 5], vec![3, 4], vec![2], vec![1], vec![]];
        let pred = pred_from_succ(&succ);
        let dom_tree = compute_dominator_tree(&pred);
        let tree = find_loops(&succ, &pred);

        for (u, outs) in succ.iter().enumerate() {
            for &v in outs {
                if dominates(&dom_tree, v, u) {
                    assert!(!tree[v].is_empty(), "header {v} has no loop entry");
                }
            }
        }
    }
}
