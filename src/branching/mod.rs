//! Decision making: how a node of the search tree is split into children.
//!
//! A [`SplitStrategy`] chooses the next unassigned variable according to a
//! [`VariableOrder`], derives candidate child tells from a [`ValueOrder`]
//! and returns them as a [`Branch`], which the
//! [`SearchTree`](crate::search::SearchTree) then commits to child by child.

mod branch;
mod split_strategy;

pub use branch::Branch;
pub use split_strategy::*;
