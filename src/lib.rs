//! Branch-and-bound search over composable abstract constraint domains.
//!
//! Three cooperating domains implement a complete depth-first solver on top
//! of an opaque constraint store:
//!
//! - the [`SplitStrategy`](branching::SplitStrategy) chooses an unassigned
//!   variable and derives a [`Branch`](branching::Branch) of candidate
//!   refinements from a value order;
//! - the [`SearchTree`](search::SearchTree) drives the exploration, one
//!   `pop ∘ push ∘ split` node step per
//!   [`refine`](search::SearchTree::refine) call, backtracking through
//!   snapshot/restore and replaying the committed path on sibling switches;
//! - [`BranchAndBound`](optimisation::BranchAndBound) wraps the tree,
//!   records every solution it extracts and tightens the objective bound so
//!   the remaining search only visits strictly better solutions.
//!
//! Each layer is itself an [`AbstractDomain`](domains::AbstractDomain) and
//! composes with any sub-domain implementing that capability set. The crate
//! ships two representative sub-domains: the
//! [`IntervalStore`](domains::IntervalStore) with a bounds-consistency
//! [`Propagation`](domains::Propagation) layer, and the extensional
//! [`Table`](domains::Table) constraint running in reduced product with the
//! store.
//!
//! A typical driver loop alternates propagation to fixpoint, a
//! `BranchAndBound::refine` whenever the tree is extractable, and one
//! `SearchTree::refine` node step, until the tree reports `is_bot` (the
//! space is exhausted) — at which point `BranchAndBound::is_extractable`
//! certifies the recorded solution optimal.

#[doc(hidden)]
pub mod asserts;

pub mod basic_types;
pub mod branching;
pub mod containers;
pub mod domains;
pub mod logic;
pub mod optimisation;
pub mod search;
pub mod universe;

pub use crate::basic_types::AType;
pub use crate::basic_types::AVar;
pub use crate::basic_types::Diagnostic;
pub use crate::basic_types::DiagnosticCode;
pub use crate::basic_types::DiagnosticSink;
pub use crate::basic_types::Severity;
pub use crate::branching::Branch;
pub use crate::branching::SplitStrategy;
pub use crate::branching::Strategy;
pub use crate::branching::ValueOrder;
pub use crate::branching::VariableOrder;
pub use crate::domains::AbstractDomain;
pub use crate::domains::CloneWith;
pub use crate::domains::CopyTracker;
pub use crate::domains::Embed;
pub use crate::domains::Extract;
pub use crate::domains::IntervalStore;
pub use crate::domains::Propagation;
pub use crate::domains::Propagator;
pub use crate::domains::Table;
pub use crate::logic::Env;
pub use crate::logic::Formula;
pub use crate::logic::Sig;
pub use crate::optimisation::BranchAndBound;
pub use crate::optimisation::Objective;
pub use crate::optimisation::OptimisationDirection;
pub use crate::search::SearchTree;
pub use crate::universe::Interval;
