//! Reverse post-order numbering.
//!
//! A DFS from the entry block emits each block after all of its
//! not-yet-visited successors; reversing that postorder places every block
//! before any successor that is not reached through a back-edge.

/// Result of [`rpo_label`]: the blocks in reverse post-order, and a
/// per-block label equal to the block's RPO index. Unreachable blocks are
/// absent from `order` and labeled `-1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpoLabel {
    pub order: Vec<usize>,
    pub label: Vec<i32>,
}

/// Compute the reverse post-order of a CFG given successor lists.
pub fn rpo_label(succ: &[Vec<usize>]) -> RpoLabel {
    let mut postorder = Vec::with_capacity(succ.len());
    let mut visited = vec![false; succ.len()];
    if !succ.is_empty() {
        dfs(0, succ, &mut postorder, &mut visited);
    }

    let mut label = vec![-1; succ.len()];
    let mut order = Vec::with_capacity(postorder.len());
    for (i, &block) in postorder.iter().rev().enumerate() {
        order.push(block);
        label[block] = i as i32;
    }

    RpoLabel { order, label }
}

fn dfs(curr: usize, succ: &[Vec<usize>], postorder: &mut Vec<usize>, visited: &mut [bool]) {
    visited[curr] = true;
    for &next in &succ[curr] {
        if !visited[next] {
            dfs(next, succ, postorder, visited);
        }
    }
    postorder.push(curr);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_graph() {
        let succ = vec![vec![1, 5], vec![2], vec![3], vec![], vec![], vec![]];
        let result = rpo_label(&succ);

        assert_eq!(result.order, vec![0, 5, 1, 2, 3]);
        assert_eq!(result.label, vec![0, 2, 3, 4, -1, 1]);
    }

    #[test]
    fn test_loop_graph() {
        let succ = vec![vec![1], vec![2, 4], vec![3], vec![1], vec![]];
        let result = rpo_label(&succ);

        assert_eq!(result.order, vec![0, 1, 4, 2, 3]);
        assert_eq!(result.label, vec![0, 1, 3, 4, 2]);
    }

    #[test]
    fn test_loop_with_multiple_exit() {
        let succ = vec![vec![1], vec![2, 4], vec![3, 5], vec![1], vec![], vec![]];
        let result = rpo_label(&succ);

        assert_eq!(result.order, vec![0, 1, 4, 2, 5, 3]);
        assert_eq!(result.label, vec![0, 1, 3, 5, 2, 4]);
    }

    #[test]
    fn test_single_block() {
        let succ = vec![vec![]];
        let result = rpo_label(&succ);

        assert_eq!(result.order, vec![0]);
        assert_eq!(result.label, vec![0]);
    }
}
