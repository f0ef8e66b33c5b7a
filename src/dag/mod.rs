// src/dag/mod.rs

//! DAG representation and the pure decisions made over it.
//!
//! - [`graph`] builds the immutable per-pass DAG from a workflow definition,
//!   optionally restricted to a start-node selection.
//! - [`resolver`] decides whether a task may run and which successors to
//!   submit after a task finished, including branch pruning.
//! - [`varpool`] merges predecessor outputs into task inputs.

pub mod graph;
pub mod resolver;
pub mod varpool;

pub use graph::{StartNodes, WorkflowDag};
pub use resolver::{DependResult, chosen_branch, mark_skipped, post_nodes, resolve};
