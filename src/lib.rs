//! # Lethe
//! Right-to-be-forgotten engine for relational data under denial constraints
//!
//! ## What is Lethe?
//! Deleting one cell of a dataset is not enough to forget it: denial
//! constraints — rules asserted to hold across every pair of tuples — let an
//! observer re-derive the deleted value from the cells that remain. Lethe
//! computes, for a target cell, the minimal set of additional cells to delete
//! so the value can no longer be reconstructed, and measures how much of the
//! attribute's domain an observer can still rule out afterwards.
//!
//! ### Inference hypergraph
//! Each denial constraint mentioning the target attribute implicates a set of
//! "tail" cells of the same row. Expanding these hyperedges recursively yields
//! a cost-annotated hypergraph; a walk along each branch's cheapest child
//! extracts a minimal blocking set in one pass.
//!
//! ### Multi-level optimizer
//! Beyond the blocking set, the optimizer greedily deletes the
//! constraint-related cells that most restrict the target's inferred domain,
//! until the ratio of inferred to original domain size reaches a configured
//! privacy threshold.
//!

pub mod builder;
pub mod cell;
pub mod constraint;
pub mod domain;
pub mod hypergraph;
pub mod io;
pub mod optimizer;
pub mod setup;

pub use builder::{Ready, With, WithIterator};
pub use cell::{Attribute, Cell, Value};
pub use constraint::{ConstraintSet, DenialConstraint};
pub use domain::{AttributeDomain, DomainMap, Interval};
pub use hypergraph::{tree::HyperGraph, Hyperedge, HyperedgeBuilder};
pub use io::{Database, Dataset, Registry};
pub use optimizer::{blocking_set, MultiLevelOptimizer, OptimizerBuilder, Report};
