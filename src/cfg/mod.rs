//! # CFG Analyses
//!
//! The analyses the machine-code generator needs, computed over a function
//! given as basic blocks with successor and predecessor adjacency (entry is
//! block 0): reverse post-order labeling, the dominator tree, natural-loop
//! discovery, and the pre/post block labeling used for liveness.
//!
//! All of these are total, pure functions over `(successors, predecessors)`:
//! identical inputs yield identical outputs byte for byte. They read a
//! frozen graph; mutating the function afterwards invalidates the results
//! and callers re-run the analysis.

pub mod bb_label;
pub mod dominators;
pub mod loops;
pub mod rpo;
pub mod union_find;

pub use bb_label::{bb_label, BbLabel};
pub use dominators::{compute_dominator_tree, dominates};
pub use loops::find_loops;
pub use rpo::{rpo_label, RpoLabel};
