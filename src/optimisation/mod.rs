//! Contains structures related to optimisation.

mod branch_and_bound;

pub use branch_and_bound::*;

/// The direction of the optimisation, either maximising or minimising.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimisationDirection {
    Maximise,
    Minimise,
}
