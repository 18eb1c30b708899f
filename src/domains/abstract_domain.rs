use crate::basic_types::AType;
use crate::basic_types::AVar;
use crate::basic_types::DiagnosticSink;
use crate::logic::Env;
use crate::logic::Formula;
use crate::universe::Interval;

/// The capability set the search layers require from a sub-domain.
///
/// An abstract domain is a lattice element: [`AbstractDomain::deduce`]
/// applies a meet (it adds information and moves the state strictly down),
/// `bot` is the empty concretisation (an inconsistent or exhausted state)
/// and `top` is the absence of information.
///
/// Interpretation is split from deduction: [`AbstractDomain::interpret_tell`]
/// turns a [`Formula`] into a domain-specific intermediate without touching
/// the state, collecting problems in the [`DiagnosticSink`] instead of
/// aborting on the first one; `None` signals that the intermediate is
/// unusable. The intermediate is then applied with
/// [`AbstractDomain::deduce`], which reports whether the state changed.
pub trait AbstractDomain {
    /// The intermediate produced by tell interpretation. The `Default`
    /// value must be a no-op tell.
    type Tell: Clone + Default;
    /// The intermediate produced by ask interpretation.
    type Ask: Clone;
    /// A scoped capture of the domain state, reinstated with
    /// [`AbstractDomain::restore`].
    type Snapshot: Clone;

    /// The abstract type identifying this domain instance.
    fn aty(&self) -> AType;

    fn is_bot(&self) -> bool;

    fn is_top(&self) -> bool;

    fn interpret_tell(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
    ) -> Option<Self::Tell>;

    fn interpret_ask(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
    ) -> Option<Self::Ask>;

    /// Applies a tell; returns whether the state changed.
    fn deduce(&mut self, tell: &Self::Tell) -> bool;

    /// Returns whether the ask is entailed by the current state.
    fn ask(&self, ask: &Self::Ask) -> bool;

    /// The current universe value of `x`.
    fn project(&self, x: AVar) -> Interval;

    fn snapshot(&self) -> Self::Snapshot;

    fn restore(&mut self, snapshot: &Self::Snapshot);

    /// Whether the current state under-approximates the concrete problem,
    /// i.e. whether [`Extract::extract`] would produce a solution.
    fn is_extractable(&self) -> bool;
}

/// Extraction of an under-approximation into `Target`.
///
/// Returns whether an under-approximation was produced; when it returns
/// `false` the target is unspecified and must not be read as a solution.
pub trait Extract<Target> {
    fn extract(&self, target: &mut Target) -> bool;
}

/// Direct variable-level meet, required of any store refined by a
/// propagator or a table column.
pub trait Embed {
    /// Meets `u` into the universe of `x`; returns whether it changed.
    fn embed(&mut self, x: AVar, u: Interval) -> bool;
}
