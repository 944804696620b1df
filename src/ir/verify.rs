//! IR invariant verification.
//!
//! Violations here are internal compiler bugs, not user errors: the driver
//! checks a program before lowering and aborts the query when verification
//! fails. The operand check reuses the dominator analysis so the verifier
//! and the code generator agree on reachability.

use std::collections::HashMap;

use thiserror::Error;

use crate::cfg::{compute_dominator_tree, dominates, rpo_label};

use super::{Function, Instr, Program, ValId};

/// IR invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("function {function}: block {block} does not end in a terminator")]
    UnterminatedBlock { function: String, block: usize },

    #[error("function {function}: block {block} has a terminator before its end")]
    MisplacedTerminator { function: String, block: usize },

    #[error("function {function}: block {block} adjacency disagrees with its terminator")]
    SuccessorMismatch { function: String, block: usize },

    #[error("function {function}: phi in block {block} names a non-predecessor")]
    PhiPredecessorMismatch { function: String, block: usize },

    #[error("function {function}: value v{value} used in block {block} without dominating definition")]
    UndefinedOperand {
        function: String,
        block: usize,
        value: u32,
    },
}

/// Verify every defined function of a program.
pub fn verify(program: &Program) -> Result<(), IrError> {
    for function in &program.functions {
        if !function.is_external() {
            verify_function(function)?;
        }
    }
    Ok(())
}

fn verify_function(function: &Function) -> Result<(), IrError> {
    let name = function.name.clone();

    // Terminator placement.
    for (bi, block) in function.blocks.iter().enumerate() {
        match block.instrs.last() {
            Some(last) if last.is_terminator() => {}
            _ => {
                return Err(IrError::UnterminatedBlock {
                    function: name.clone(),
                    block: bi,
                })
            }
        }
        if block.instrs[..block.instrs.len() - 1]
            .iter()
            .any(Instr::is_terminator)
        {
            return Err(IrError::MisplacedTerminator {
                function: name.clone(),
                block: bi,
            });
        }
    }

    // Successor/predecessor consistency with the terminators.
    let mut expected_preds: Vec<Vec<usize>> = vec![Vec::new(); function.blocks.len()];
    for (bi, block) in function.blocks.iter().enumerate() {
        let expected_succ: Vec<usize> = match block.instrs.last() {
            Some(Instr::Branch { target }) => vec![*target as usize],
            Some(Instr::CondBranch {
                if_true, if_false, ..
            }) => vec![*if_true as usize, *if_false as usize],
            _ => vec![],
        };
        if block.successors != expected_succ {
            return Err(IrError::SuccessorMismatch {
                function: name.clone(),
                block: bi,
            });
        }
        for &s in &expected_succ {
            expected_preds[s].push(bi);
        }
    }
    for (bi, block) in function.blocks.iter().enumerate() {
        let mut got = block.predecessors.clone();
        got.sort_unstable();
        let mut want = expected_preds[bi].clone();
        want.sort_unstable();
        if got != want {
            return Err(IrError::SuccessorMismatch {
                function: name.clone(),
                block: bi,
            });
        }
    }

    // Phi incoming blocks must be predecessors, each at most once.
    for (bi, block) in function.blocks.iter().enumerate() {
        for instr in &block.instrs {
            if let Instr::Phi { incomings, .. } = instr {
                let mut seen = Vec::new();
                for (_, from) in incomings {
                    let from = *from as usize;
                    if !block.predecessors.contains(&from) || seen.contains(&from) {
                        return Err(IrError::PhiPredecessorMismatch {
                            function: name.clone(),
                            block: bi,
                        });
                    }
                    seen.push(from);
                }
            }
        }
    }

    // Operand dominance over the reachable region.
    let succ = function.successor_lists();
    let pred = function.predecessor_lists();
    let reachable = rpo_label(&succ).label;
    let dom_tree = compute_dominator_tree(&pred);

    // value -> (defining block, instruction index)
    let mut defs: HashMap<ValId, (usize, usize)> = HashMap::new();
    for (bi, block) in function.blocks.iter().enumerate() {
        for (ii, instr) in block.instrs.iter().enumerate() {
            if let Some(result) = instr.result() {
                defs.insert(result, (bi, ii));
            }
        }
    }

    let param_count = function.params.len() as u32;
    let defined_before = |v: ValId, block: usize, index: usize| -> bool {
        if v.0 < param_count {
            return true;
        }
        match defs.get(&v) {
            Some(&(db, di)) => {
                if db == block {
                    di < index
                } else {
                    dominates(&dom_tree, db, block)
                }
            }
            None => false,
        }
    };

    for (bi, block) in function.blocks.iter().enumerate() {
        if reachable[bi] < 0 {
            continue;
        }
        for (ii, instr) in block.instrs.iter().enumerate() {
            if let Instr::Phi { incomings, .. } = instr {
                // A phi operand must be available at the end of its
                // incoming edge, not at the phi itself.
                for (v, from) in incomings {
                    let from = *from as usize;
                    let end = function.blocks[from].instrs.len();
                    if !defined_before(*v, from, end) {
                        return Err(IrError::UndefinedOperand {
                            function: name.clone(),
                            block: bi,
                            value: v.0,
                        });
                    }
                }
                continue;
            }
            for v in instr.operands() {
                if !defined_before(v, bi, ii) {
                    return Err(IrError::UndefinedOperand {
                        function: name.clone(),
                        block: bi,
                        value: v.0,
                    });
                }
            }
        }
    }

    Ok(())
}
