use std::cell::RefCell;
use std::rc::Rc;

use log::trace;
use log::warn;

use crate::arbor_assert_simple;
use crate::basic_types::AType;
use crate::basic_types::AVar;
use crate::basic_types::DiagnosticCode;
use crate::basic_types::DiagnosticSink;
use crate::domains::AbstractDomain;
use crate::domains::CloneWith;
use crate::domains::CopyTracker;
use crate::domains::Extract;
use crate::domains::IntervalStore;
use crate::logic::Env;
use crate::logic::Formula;
use crate::logic::Sig;
use crate::optimisation::OptimisationDirection;
use crate::universe::Interval;

/// The objective of a [`BranchAndBound`] search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Objective {
    pub variable: AVar,
    pub direction: OptimisationDirection,
}

/// The tell intermediate of branch and bound: an optional objective plus
/// the tells routed to the wrapped search tree.
#[derive(Debug, Clone)]
pub struct BabTell<T> {
    pub objective: Option<Objective>,
    pub sub_tells: Vec<T>,
}

impl<T> Default for BabTell<T> {
    fn default() -> Self {
        BabTell {
            objective: None,
            sub_tells: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BabSnapshot<Snap, B> {
    sub: Snap,
    best: B,
    objective: Option<Objective>,
    solutions_found: usize,
}

/// Branch and bound over a search tree.
///
/// Interpretation routes `MINIMIZE`/`MAXIMIZE` predicates to this domain
/// and everything else into the wrapped sub-domain (for a search tree,
/// `search(...)` continues on to the split strategy). With no objective the
/// wrapper degenerates to satisfaction.
///
/// Each time the sub-domain reaches an extractable node, [`BranchAndBound::refine`]
/// records the solution in the exclusively-owned `best` store and, for an
/// optimisation problem, tells `objective < bound` (or `>` when maximising)
/// back into the sub-domain, so the rest of the search only visits strictly
/// better solutions. The tightening tell is deferred to the root by the
/// search tree, which is what makes the bound survive backtracking.
pub struct BranchAndBound<A: AbstractDomain, B> {
    aty: AType,
    sub: Rc<RefCell<A>>,
    /// The best solution found so far; owned by this domain and never
    /// shared with the sub-domain's store.
    best: B,
    objective: Option<Objective>,
    solutions_found: usize,
}

impl<A, B> BranchAndBound<A, B>
where
    A: AbstractDomain + Extract<B>,
    B: AbstractDomain,
{
    pub fn new(aty: AType, sub: Rc<RefCell<A>>, best: B) -> BranchAndBound<A, B> {
        BranchAndBound {
            aty,
            sub,
            best,
            objective: None,
            solutions_found: 0,
        }
    }

    pub fn is_satisfaction(&self) -> bool {
        self.objective.is_none()
    }

    pub fn is_optimisation(&self) -> bool {
        !self.is_satisfaction()
    }

    pub fn is_minimisation(&self) -> bool {
        self.objective
            .is_some_and(|objective| objective.direction == OptimisationDirection::Minimise)
    }

    pub fn is_maximisation(&self) -> bool {
        self.objective
            .is_some_and(|objective| objective.direction == OptimisationDirection::Maximise)
    }

    pub fn objective_var(&self) -> Option<AVar> {
        self.objective.map(|objective| objective.variable)
    }

    pub fn solutions_count(&self) -> usize {
        self.solutions_found
    }

    /// The best solution found so far. Unless
    /// [`AbstractDomain::is_extractable`] holds, it might not be the
    /// optimum.
    pub fn optimum(&self) -> &B {
        &self.best
    }

    /// The formula that tightens the store past `bound`, or `true` when no
    /// bound has been recorded yet.
    pub fn deinterpret_bound(&self, bound: Interval) -> Formula {
        let Some(Objective {
            variable,
            direction,
        }) = self.objective
        else {
            return Formula::Bool(true);
        };
        match direction {
            OptimisationDirection::Minimise if bound.has_finite_lb() => Formula::binary(
                Formula::var(variable),
                Sig::Lt,
                Formula::Int(bound.lb()),
            ),
            OptimisationDirection::Maximise if bound.has_finite_ub() => Formula::binary(
                Formula::var(variable),
                Sig::Gt,
                Formula::Int(bound.ub()),
            ),
            // No information on the relevant bound yet: nothing to tighten.
            _ => Formula::Bool(true),
        }
    }

    /// [`BranchAndBound::deinterpret_bound`] of the best bound so far.
    pub fn deinterpret_best_bound(&self) -> Formula {
        match self.objective {
            Some(objective) => self.deinterpret_bound(self.best.project(objective.variable)),
            None => Formula::Bool(true),
        }
    }

    /// Whether `s1` has a strictly better objective bound than `s2`.
    ///
    /// When minimising, bounds improve by shrinking, so the comparison runs
    /// in the dual order on lower bounds; dually for maximisation.
    pub fn compare_bound(
        &self,
        s1: &impl AbstractDomain,
        s2: &impl AbstractDomain,
    ) -> bool {
        arbor_assert_simple!(self.is_optimisation());
        let Some(Objective {
            variable,
            direction,
        }) = self.objective
        else {
            return false;
        };
        let bound1 = s1.project(variable);
        let bound2 = s2.project(variable);
        match direction {
            OptimisationDirection::Minimise => bound1.lb() < bound2.lb(),
            OptimisationDirection::Maximise => bound1.ub() > bound2.ub(),
        }
    }

    /// Records the current solution and tightens the objective.
    ///
    /// Preconditions: the sub-domain is extractable and, for an
    /// optimisation problem, strictly better than the recorded best. Not
    /// idempotent: call exactly once per new solution.
    pub fn refine(&mut self) -> bool {
        if !self.sub.borrow().extract(&mut self.best) {
            return false;
        }
        self.solutions_found += 1;
        let mut has_changed = true;
        if let Some(objective) = self.objective {
            let bound = self.best.project(objective.variable);
            trace!(
                "solution {} recorded, objective {} in {bound}",
                self.solutions_found,
                objective.variable
            );
            has_changed |= self.tighten();
        }
        has_changed
    }

    /// Tells the sub-domain that the next solution must beat the recorded
    /// best.
    fn tighten(&mut self) -> bool {
        let bound_formula = self.deinterpret_best_bound();
        let env = Env::new();
        let mut sink = DiagnosticSink::new();
        let tell = self.sub.borrow().interpret_tell(&bound_formula, &env, &mut sink);
        match tell {
            Some(tell) => self.sub.borrow_mut().deduce(&tell),
            None => {
                warn!("the sub-domain rejected the tightening tell `{bound_formula}`");
                for diagnostic in sink.iter() {
                    warn!("{diagnostic}");
                }
                false
            }
        }
    }

    fn interpret_into(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
        tell: &mut BabTell<A::Tell>,
    ) -> bool {
        match formula {
            Formula::Seq(Sig::And, conjuncts) => {
                let mut usable = true;
                for conjunct in conjuncts {
                    usable &= self.interpret_into(conjunct, env, sink, tell);
                }
                usable
            }
            Formula::Seq(sig @ (Sig::Minimize | Sig::Maximize), args) => {
                let [argument] = args.as_slice() else {
                    sink.report(
                        DiagnosticCode::UnsupportedFormula,
                        formula,
                        "optimisation predicates take exactly one argument",
                    );
                    return false;
                };
                let direction = if *sig == Sig::Minimize {
                    OptimisationDirection::Minimise
                } else {
                    OptimisationDirection::Maximise
                };
                if argument.is_variable() {
                    match env.interpret(argument, sink) {
                        Some(variable) => {
                            tell.objective = Some(Objective {
                                variable,
                                direction,
                            });
                            true
                        }
                        None => false,
                    }
                } else if argument.num_vars() == 0 {
                    // A fixed objective: the problem degenerates to
                    // satisfaction and the predicate is dropped.
                    true
                } else {
                    sink.report(
                        DiagnosticCode::BadObjective,
                        formula,
                        "optimisation predicates expect a variable; introduce one constrained to the expression to optimise",
                    );
                    false
                }
            }
            _ => match self.sub.borrow().interpret_tell(formula, env, sink) {
                Some(sub_tell) => {
                    tell.sub_tells.push(sub_tell);
                    true
                }
                None => false,
            },
        }
    }
}

impl<A, B> AbstractDomain for BranchAndBound<A, B>
where
    A: AbstractDomain + Extract<B>,
    B: AbstractDomain + Clone,
{
    type Tell = BabTell<A::Tell>;
    type Ask = A::Ask;
    type Snapshot = BabSnapshot<A::Snapshot, B>;

    fn aty(&self) -> AType {
        self.aty
    }

    /// The sub-domain being exhausted means no further solution exists.
    fn is_bot(&self) -> bool {
        self.sub.borrow().is_bot()
    }

    fn is_top(&self) -> bool {
        self.objective.is_none() && self.sub.borrow().is_top()
    }

    fn interpret_tell(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
    ) -> Option<Self::Tell> {
        let mut tell = BabTell::default();
        self.interpret_into(formula, env, sink, &mut tell)
            .then_some(tell)
    }

    fn interpret_ask(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
    ) -> Option<Self::Ask> {
        self.sub.borrow().interpret_ask(formula, env, sink)
    }

    fn deduce(&mut self, tell: &Self::Tell) -> bool {
        let mut has_changed = false;
        for sub_tell in &tell.sub_tells {
            has_changed |= self.sub.borrow_mut().deduce(sub_tell);
        }
        if let Some(objective) = tell.objective {
            arbor_assert_simple!(
                self.objective.is_none(),
                "multi-objective optimisation is not supported"
            );
            self.objective = Some(objective);
            has_changed = true;
        }
        has_changed
    }

    fn ask(&self, ask: &Self::Ask) -> bool {
        self.sub.borrow().ask(ask)
    }

    fn project(&self, x: AVar) -> Interval {
        self.sub.borrow().project(x)
    }

    fn snapshot(&self) -> Self::Snapshot {
        BabSnapshot {
            sub: self.sub.borrow().snapshot(),
            best: self.best.clone(),
            objective: self.objective,
            solutions_found: self.solutions_found,
        }
    }

    fn restore(&mut self, snapshot: &Self::Snapshot) {
        self.sub.borrow_mut().restore(&snapshot.sub);
        self.best = snapshot.best.clone();
        self.objective = snapshot.objective;
        self.solutions_found = snapshot.solutions_found;
    }

    /// An optimum is certain once the whole space has been explored (the
    /// sub-domain is `bot`), at least one solution was recorded, and the
    /// recorded solution is itself extractable.
    fn is_extractable(&self) -> bool {
        self.solutions_found > 0 && self.sub.borrow().is_bot() && self.best.is_extractable()
    }
}

impl<A, B> Extract<IntervalStore> for BranchAndBound<A, B>
where
    A: AbstractDomain + Extract<B>,
    B: AbstractDomain + Clone + Extract<IntervalStore>,
{
    fn extract(&self, target: &mut IntervalStore) -> bool {
        if !self.is_extractable() {
            return false;
        }
        self.best.extract(target)
    }
}

/// Extraction into another branch-and-bound element copies the best
/// solution together with the objective bookkeeping.
impl<A, B> Extract<BranchAndBound<A, B>> for BranchAndBound<A, B>
where
    A: AbstractDomain + Extract<B>,
    B: AbstractDomain + Clone + Extract<B>,
{
    fn extract(&self, target: &mut BranchAndBound<A, B>) -> bool {
        if !self.is_extractable() {
            return false;
        }
        let extracted = self.best.extract(&mut target.best);
        target.objective = self.objective;
        target.solutions_found = self.solutions_found;
        extracted
    }
}

impl<A, B> CloneWith for BranchAndBound<A, B>
where
    A: AbstractDomain + CloneWith + 'static,
    B: CloneWith,
{
    /// The sub-domain keeps its sharing; `best` is cloned through a fresh
    /// tracker so it stays exclusively owned by the copy.
    fn clone_with(&self, tracker: &mut CopyTracker) -> Self {
        BranchAndBound {
            aty: self.aty,
            sub: tracker.clone_shared(&self.sub),
            best: self.best.clone_with(&mut CopyTracker::new()),
            objective: self.objective,
            solutions_found: self.solutions_found,
        }
    }
}
