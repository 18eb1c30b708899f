use std::fmt::Display;
use std::fmt::Formatter;

use crate::logic::Sig;

/// A closed integer interval, ordered by set inclusion.
///
/// The unbounded endpoints are represented by [`i64::MIN`] and [`i64::MAX`];
/// [`Interval::TOP`] is the fully unknown interval and [`Interval::BOT`] the
/// empty one. [`Interval::meet`] intersects (moves down the lattice) and
/// [`Interval::join`] takes the convex hull (moves up).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    lb: i64,
    ub: i64,
}

impl Interval {
    pub const TOP: Interval = Interval {
        lb: i64::MIN,
        ub: i64::MAX,
    };

    /// The canonical empty interval.
    pub const BOT: Interval = Interval {
        lb: i64::MAX,
        ub: i64::MIN,
    };

    /// Creates `[lb, ub]`; any empty input collapses to [`Interval::BOT`].
    pub fn new(lb: i64, ub: i64) -> Interval {
        if lb > ub {
            Interval::BOT
        } else {
            Interval { lb, ub }
        }
    }

    pub fn singleton(value: i64) -> Interval {
        Interval::new(value, value)
    }

    /// `[-oo, k]`.
    pub fn at_most(k: i64) -> Interval {
        Interval::new(i64::MIN, k)
    }

    /// `[-oo, k - 1]`.
    pub fn below(k: i64) -> Interval {
        Interval::new(i64::MIN, k.saturating_sub(1))
    }

    /// `[k + 1, +oo]`.
    pub fn above(k: i64) -> Interval {
        Interval::new(k.saturating_add(1), i64::MAX)
    }

    pub fn lb(self) -> i64 {
        self.lb
    }

    pub fn ub(self) -> i64 {
        self.ub
    }

    pub fn is_bot(self) -> bool {
        self.lb > self.ub
    }

    pub fn is_top(self) -> bool {
        self == Interval::TOP
    }

    pub fn is_fixed(self) -> bool {
        self.lb == self.ub
    }

    pub fn has_finite_lb(self) -> bool {
        self.lb != i64::MIN
    }

    pub fn has_finite_ub(self) -> bool {
        self.ub != i64::MAX
    }

    /// The number of values minus one; saturates on unbounded intervals.
    pub fn width(self) -> i64 {
        self.ub.saturating_sub(self.lb)
    }

    /// The lower median, `lb + width / 2`.
    ///
    /// Only meaningful on non-empty bounded intervals; branching refuses
    /// unbounded pivots before asking for a median.
    pub fn median(self) -> i64 {
        self.lb + self.width() / 2
    }

    pub fn contains(self, value: i64) -> bool {
        self.lb <= value && value <= self.ub
    }

    /// Set inclusion: `self` carries at least as much information as
    /// `other`.
    pub fn is_below(self, other: Interval) -> bool {
        self.is_bot() || (other.lb <= self.lb && self.ub <= other.ub)
    }

    /// Intersects `other` into `self`; returns whether `self` changed.
    pub fn meet(&mut self, other: Interval) -> bool {
        let refined = Interval::new(self.lb.max(other.lb), self.ub.min(other.ub));
        let changed = *self != refined;
        *self = refined;
        changed
    }

    /// Extends `self` to the convex hull of both; returns whether `self`
    /// changed.
    pub fn join(&mut self, other: Interval) -> bool {
        if other.is_bot() {
            return false;
        }
        if self.is_bot() {
            let changed = *self != other;
            *self = other;
            return changed;
        }
        let hull = Interval::new(self.lb.min(other.lb), self.ub.max(other.ub));
        let changed = *self != hull;
        *self = hull;
        changed
    }

    /// The interval a unary tell atom `x <sig> k` constrains `x` to, or
    /// `None` when the atom has no exact interval meaning (e.g. `!=` punches
    /// a hole).
    pub fn from_tell_atom(sig: Sig, k: i64) -> Option<Interval> {
        Interval::from_tell_comparison(sig, k, true)
    }

    /// Like [`Interval::from_tell_atom`], but the variable may sit on either
    /// side of the comparison: `3 < x` constrains `x` to `[4, +oo]`.
    pub fn from_tell_comparison(sig: Sig, k: i64, var_on_left: bool) -> Option<Interval> {
        if var_on_left {
            match sig {
                Sig::Eq => Some(Interval::singleton(k)),
                Sig::Leq => Some(Interval::at_most(k)),
                Sig::Lt => Some(Interval::below(k)),
                Sig::Gt => Some(Interval::above(k)),
                _ => None,
            }
        } else {
            match sig {
                Sig::Eq => Some(Interval::singleton(k)),
                // k <= x
                Sig::Leq => Some(Interval::new(k, i64::MAX)),
                // k < x
                Sig::Lt => Some(Interval::above(k)),
                // k > x
                Sig::Gt => Some(Interval::below(k)),
                _ => None,
            }
        }
    }

    /// The ask cell of a unary atom: `x <sig> k` is entailed iff the
    /// projection of `x` is included in the returned interval.
    pub fn from_ask_atom(sig: Sig, k: i64) -> Option<Interval> {
        Interval::from_ask_comparison(sig, k, true)
    }

    /// The ask cell of a comparison with the variable on either side.
    pub fn from_ask_comparison(sig: Sig, k: i64, var_on_left: bool) -> Option<Interval> {
        // For the atoms with an exact interval meaning, the tell and ask
        // interpretations coincide.
        Interval::from_tell_comparison(sig, k, var_on_left)
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_bot() {
            return write!(f, "[]");
        }
        if self.has_finite_lb() {
            write!(f, "[{}..", self.lb)?;
        } else {
            write!(f, "[-oo..")?;
        }
        if self.has_finite_ub() {
            write!(f, "{}]", self.ub)
        } else {
            write!(f, "+oo]")
        }
    }
}
