use std::cell::RefCell;
use std::rc::Rc;

use crate::basic_types::AType;
use crate::basic_types::AVar;
use crate::basic_types::DiagnosticCode;
use crate::basic_types::DiagnosticSink;
use crate::domains::AbstractDomain;
use crate::domains::CloneWith;
use crate::domains::CopyTracker;
use crate::domains::Embed;
use crate::domains::Extract;
use crate::logic::Env;
use crate::logic::Formula;
use crate::logic::Sig;
use crate::universe::Interval;

/// Lower-bound addition; `-oo` absorbs.
fn add_lb(a: i64, b: i64) -> i64 {
    if a == i64::MIN || b == i64::MIN {
        i64::MIN
    } else {
        a.saturating_add(b)
    }
}

/// Upper-bound addition; `+oo` absorbs.
fn add_ub(a: i64, b: i64) -> i64 {
    if a == i64::MAX || b == i64::MAX {
        i64::MAX
    } else {
        a.saturating_add(b)
    }
}

/// Lower-bound subtraction `a - b`; `-oo - x` and `x - +oo` are `-oo`.
fn sub_lb(a: i64, b: i64) -> i64 {
    if a == i64::MIN || b == i64::MAX {
        i64::MIN
    } else {
        a.saturating_sub(b)
    }
}

/// Upper-bound subtraction `a - b`; `+oo - x` and `x - -oo` are `+oo`.
fn sub_ub(a: i64, b: i64) -> i64 {
    if a == i64::MAX || b == i64::MIN {
        i64::MAX
    } else {
        a.saturating_sub(b)
    }
}

/// A bounds-consistency propagator over store variables.
#[derive(Debug, Clone, PartialEq)]
pub enum Propagator {
    /// `operands[0] + ... + operands[n-1] = total`.
    Sum { operands: Vec<AVar>, total: AVar },
    /// `left <= right`.
    Leq { left: AVar, right: AVar },
    /// `left < right`.
    Lt { left: AVar, right: AVar },
}

impl Propagator {
    /// One application of the propagator; returns whether the store changed.
    fn deduce<S: AbstractDomain + Embed>(&self, store: &mut S) -> bool {
        match self {
            Propagator::Sum { operands, total } => {
                let universes: Vec<Interval> =
                    operands.iter().map(|x| store.project(*x)).collect();
                let sum_lb = universes.iter().fold(0, |acc, u| add_lb(acc, u.lb()));
                let sum_ub = universes.iter().fold(0, |acc, u| add_ub(acc, u.ub()));

                let mut has_changed = store.embed(*total, Interval::new(sum_lb, sum_ub));
                let total_universe = store.project(*total);
                for (i, x) in operands.iter().enumerate() {
                    let mut others_lb = 0;
                    let mut others_ub = 0;
                    for (j, u) in universes.iter().enumerate() {
                        if i != j {
                            others_lb = add_lb(others_lb, u.lb());
                            others_ub = add_ub(others_ub, u.ub());
                        }
                    }
                    has_changed |= store.embed(
                        *x,
                        Interval::new(
                            sub_lb(total_universe.lb(), others_ub),
                            sub_ub(total_universe.ub(), others_lb),
                        ),
                    );
                }
                has_changed
            }
            Propagator::Leq { left, right } => {
                let mut has_changed = false;
                let l = store.project(*left);
                let r = store.project(*right);
                if r.has_finite_ub() {
                    has_changed |= store.embed(*left, Interval::at_most(r.ub()));
                }
                if l.has_finite_lb() {
                    has_changed |= store.embed(*right, Interval::new(l.lb(), i64::MAX));
                }
                has_changed
            }
            Propagator::Lt { left, right } => {
                let mut has_changed = false;
                let l = store.project(*left);
                let r = store.project(*right);
                if r.has_finite_ub() {
                    has_changed |= store.embed(*left, Interval::below(r.ub()));
                }
                if l.has_finite_lb() {
                    has_changed |= store.embed(*right, Interval::above(l.lb()));
                }
                has_changed
            }
        }
    }

    /// Whether the constraint holds for every point of the current box.
    ///
    /// A sum is only claimed entailed once all its variables are fixed;
    /// bounds reasoning cannot certify it earlier.
    fn is_entailed<S: AbstractDomain>(&self, store: &S) -> bool {
        match self {
            Propagator::Sum { operands, total } => {
                let total_universe = store.project(*total);
                if !total_universe.is_fixed() {
                    return false;
                }
                let mut sum = 0;
                for x in operands {
                    let u = store.project(*x);
                    if !u.is_fixed() {
                        return false;
                    }
                    sum = add_lb(sum, u.lb());
                }
                sum == total_universe.lb()
            }
            Propagator::Leq { left, right } => {
                store.project(*left).ub() <= store.project(*right).lb()
            }
            Propagator::Lt { left, right } => {
                store.project(*left).ub() < store.project(*right).lb()
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropagationTell<T> {
    pub sub_tells: Vec<T>,
    pub propagators: Vec<Propagator>,
}

#[derive(Debug, Clone)]
pub struct PropagationAsk<A> {
    pub sub_asks: Vec<A>,
    pub propagators: Vec<Propagator>,
}

#[derive(Debug, Clone)]
pub struct PropagationSnapshot<Snap> {
    sub: Snap,
    num_propagators: usize,
}

/// A propagator layer over an embeddable store.
///
/// Interprets n-ary linear sums (`x1 + ... + xn = y`) and orderings between
/// variables; everything else is delegated to the store. Propagators are
/// append-only during search and truncated by [`AbstractDomain::restore`],
/// mirroring the store snapshot they are paired with.
///
/// Deduction to fixpoint is driven externally (or with the Gauss–Seidel
/// helper [`Propagation::fixpoint`]); a single [`AbstractDomain::deduce`]
/// only records new propagators and applies store tells.
#[derive(Debug)]
pub struct Propagation<S> {
    aty: AType,
    store: Rc<RefCell<S>>,
    propagators: Vec<Propagator>,
}

impl<S: AbstractDomain + Embed> Propagation<S> {
    pub fn new(aty: AType, store: Rc<RefCell<S>>) -> Propagation<S> {
        Propagation {
            aty,
            store,
            propagators: Vec::new(),
        }
    }

    pub fn num_propagators(&self) -> usize {
        self.propagators.len()
    }

    /// One Gauss–Seidel cell: applies the `i`-th propagator once.
    pub fn deduce_at(&mut self, i: usize) -> bool {
        let mut store = self.store.borrow_mut();
        self.propagators[i].deduce(&mut *store)
    }

    /// Gauss–Seidel iteration to fixpoint; stops early once the store is
    /// inconsistent. Returns whether anything changed.
    pub fn fixpoint(&mut self) -> bool {
        let mut has_changed = false;
        loop {
            if self.store.borrow().is_bot() {
                break;
            }
            let mut round_changed = false;
            for i in 0..self.propagators.len() {
                round_changed |= self.deduce_at(i);
            }
            has_changed |= round_changed;
            if !round_changed {
                break;
            }
        }
        has_changed
    }

    /// Resolves a sum shape `x1 + ... + xn = total` if `formula` has one.
    fn interpret_sum(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
    ) -> Option<Option<Propagator>> {
        let Formula::Seq(Sig::Eq, args) = formula else {
            return Some(None);
        };
        let [lhs, rhs] = args.as_slice() else {
            return Some(None);
        };
        let (addition, total) = match (lhs, rhs) {
            (Formula::Seq(Sig::Add, operands), t) if t.is_variable() => (operands, t),
            (t, Formula::Seq(Sig::Add, operands)) if t.is_variable() => (operands, t),
            _ => return Some(None),
        };
        let mut usable = true;
        let mut resolved = Vec::with_capacity(addition.len());
        for operand in addition {
            if !operand.is_variable() {
                sink.report(
                    DiagnosticCode::UnsupportedFormula,
                    formula,
                    "sum operands must be variables",
                );
                usable = false;
                continue;
            }
            match env.interpret(operand, sink) {
                Some(x) => resolved.push(x),
                None => usable = false,
            }
        }
        let total = env.interpret(total, sink);
        if !usable {
            return None;
        }
        Some(Some(Propagator::Sum {
            operands: resolved,
            total: total?,
        }))
    }

    /// Resolves a variable-to-variable comparison if `formula` is one.
    fn interpret_comparison(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
    ) -> Option<Option<Vec<Propagator>>> {
        let Formula::Seq(sig, args) = formula else {
            return Some(None);
        };
        let [lhs, rhs] = args.as_slice() else {
            return Some(None);
        };
        if !lhs.is_variable() || !rhs.is_variable() {
            return Some(None);
        }
        let left = env.interpret(lhs, sink);
        let right = env.interpret(rhs, sink);
        let (left, right) = (left?, right?);
        let propagators = match sig {
            Sig::Eq => vec![
                Propagator::Leq { left, right },
                Propagator::Leq {
                    left: right,
                    right: left,
                },
            ],
            Sig::Leq => vec![Propagator::Leq { left, right }],
            Sig::Lt => vec![Propagator::Lt { left, right }],
            Sig::Gt => vec![Propagator::Lt {
                left: right,
                right: left,
            }],
            _ => return Some(None),
        };
        Some(Some(propagators))
    }

    fn interpret_into(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
        tell: &mut PropagationTell<S::Tell>,
    ) -> bool {
        match formula {
            Formula::Seq(Sig::And, conjuncts) => {
                let mut usable = true;
                for conjunct in conjuncts {
                    usable &= self.interpret_into(conjunct, env, sink, tell);
                }
                usable
            }
            _ => {
                match self.interpret_sum(formula, env, sink) {
                    Some(Some(sum)) => {
                        tell.propagators.push(sum);
                        return true;
                    }
                    None => return false,
                    Some(None) => {}
                }
                match self.interpret_comparison(formula, env, sink) {
                    Some(Some(propagators)) => {
                        tell.propagators.extend(propagators);
                        return true;
                    }
                    None => return false,
                    Some(None) => {}
                }
                match self.store.borrow().interpret_tell(formula, env, sink) {
                    Some(sub_tell) => {
                        tell.sub_tells.push(sub_tell);
                        true
                    }
                    None => false,
                }
            }
        }
    }
}

impl<S: AbstractDomain + Embed> AbstractDomain for Propagation<S> {
    type Tell = PropagationTell<S::Tell>;
    type Ask = PropagationAsk<S::Ask>;
    type Snapshot = PropagationSnapshot<S::Snapshot>;

    fn aty(&self) -> AType {
        self.aty
    }

    fn is_bot(&self) -> bool {
        self.store.borrow().is_bot()
    }

    fn is_top(&self) -> bool {
        self.propagators.is_empty() && self.store.borrow().is_top()
    }

    fn interpret_tell(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
    ) -> Option<Self::Tell> {
        let mut tell = PropagationTell::default();
        self.interpret_into(formula, env, sink, &mut tell)
            .then_some(tell)
    }

    fn interpret_ask(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
    ) -> Option<Self::Ask> {
        match formula {
            Formula::Seq(Sig::And, conjuncts) => {
                let mut ask = PropagationAsk {
                    sub_asks: Vec::new(),
                    propagators: Vec::new(),
                };
                let mut usable = true;
                for conjunct in conjuncts {
                    match self.interpret_ask(conjunct, env, sink) {
                        Some(more) => {
                            ask.sub_asks.extend(more.sub_asks);
                            ask.propagators.extend(more.propagators);
                        }
                        None => usable = false,
                    }
                }
                usable.then_some(ask)
            }
            _ => {
                match self.interpret_sum(formula, env, sink) {
                    Some(Some(sum)) => {
                        return Some(PropagationAsk {
                            sub_asks: Vec::new(),
                            propagators: vec![sum],
                        });
                    }
                    None => return None,
                    Some(None) => {}
                }
                match self.interpret_comparison(formula, env, sink) {
                    Some(Some(propagators)) => {
                        return Some(PropagationAsk {
                            sub_asks: Vec::new(),
                            propagators,
                        });
                    }
                    None => return None,
                    Some(None) => {}
                }
                self.store
                    .borrow()
                    .interpret_ask(formula, env, sink)
                    .map(|sub_ask| PropagationAsk {
                        sub_asks: vec![sub_ask],
                        propagators: Vec::new(),
                    })
            }
        }
    }

    fn deduce(&mut self, tell: &Self::Tell) -> bool {
        let mut has_changed = false;
        {
            let mut store = self.store.borrow_mut();
            for sub_tell in &tell.sub_tells {
                has_changed |= store.deduce(sub_tell);
            }
        }
        for propagator in &tell.propagators {
            self.propagators.push(propagator.clone());
            has_changed = true;
        }
        has_changed
    }

    fn ask(&self, ask: &Self::Ask) -> bool {
        let store = self.store.borrow();
        ask.sub_asks.iter().all(|sub_ask| store.ask(sub_ask))
            && ask
                .propagators
                .iter()
                .all(|propagator| propagator.is_entailed(&*store))
    }

    fn project(&self, x: AVar) -> Interval {
        self.store.borrow().project(x)
    }

    fn snapshot(&self) -> Self::Snapshot {
        PropagationSnapshot {
            sub: self.store.borrow().snapshot(),
            num_propagators: self.propagators.len(),
        }
    }

    fn restore(&mut self, snapshot: &Self::Snapshot) {
        self.store.borrow_mut().restore(&snapshot.sub);
        self.propagators.truncate(snapshot.num_propagators);
    }

    fn is_extractable(&self) -> bool {
        if self.is_bot() {
            return false;
        }
        let store = self.store.borrow();
        self.propagators
            .iter()
            .all(|propagator| propagator.is_entailed(&*store))
    }
}

impl<S: AbstractDomain + Embed> Embed for Propagation<S> {
    fn embed(&mut self, x: AVar, u: Interval) -> bool {
        self.store.borrow_mut().embed(x, u)
    }
}

impl<S, T> Extract<T> for Propagation<S>
where
    S: AbstractDomain + Embed + Extract<T>,
{
    fn extract(&self, target: &mut T) -> bool {
        if !self.is_extractable() {
            return false;
        }
        self.store.borrow().extract(target)
    }
}

impl<S: CloneWith + 'static> CloneWith for Propagation<S> {
    fn clone_with(&self, tracker: &mut CopyTracker) -> Self {
        Propagation {
            aty: self.aty,
            store: tracker.clone_shared(&self.store),
            propagators: self.propagators.clone(),
        }
    }
}
