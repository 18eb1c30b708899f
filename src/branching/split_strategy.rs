use std::cell::RefCell;
use std::rc::Rc;

use log::warn;

use crate::basic_types::AType;
use crate::basic_types::AVar;
use crate::basic_types::DiagnosticCode;
use crate::basic_types::DiagnosticSink;
use crate::branching::Branch;
use crate::domains::AbstractDomain;
use crate::domains::CloneWith;
use crate::domains::CopyTracker;
use crate::logic::Env;
use crate::logic::Formula;
use crate::logic::Sig;
use crate::universe::Interval;

/// The order in which unassigned variables are considered for branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableOrder {
    /// The first unassigned variable in declaration order.
    InputOrder,
    /// The unassigned variable with the smallest domain.
    FirstFail,
    /// The unassigned variable with the largest domain.
    AntiFirstFail,
    /// The unassigned variable with the smallest lower bound.
    Smallest,
    /// The unassigned variable with the largest upper bound.
    Largest,
}

/// How the domain of the chosen variable is split into children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueOrder {
    /// `x = lb` then `x > lb`.
    Min,
    /// `x = ub` then `x < ub`.
    Max,
    /// `x = median` then `x != median`.
    Median,
    /// `x <= median` then `x > median`.
    Split,
    /// `x > median` then `x <= median`.
    ReverseSplit,
}

/// A variable order and value order over a subset of the variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub var_order: VariableOrder,
    pub val_order: ValueOrder,
    pub vars: Vec<AVar>,
}

/// The tell intermediate of the split strategy: strategies to append.
pub type StrategyTell = Vec<Strategy>;

#[derive(Debug, Clone, Copy)]
pub struct StrategySnapshot {
    num_strategies: usize,
    current_strategy: usize,
    next_unassigned_var: usize,
}

/// Which end of the selection key wins a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Minimum,
    Maximum,
}

/// Chooses the next variable to branch on and builds the corresponding
/// [`Branch`] of child tells.
///
/// Strategies are appended by [`SplitStrategy::deduce`] and consulted in
/// order: once every variable of the current strategy is assigned, the next
/// strategy takes over. When all strategies are exhausted, [`SplitStrategy::split`]
/// returns an empty branch, which the search tree reads as "nothing left to
/// explore here".
///
/// Snapshots record counters only; restoring truncates the strategy list
/// and rewinds the cursor pair, which is all the backtracking the strategy
/// needs.
#[derive(Debug)]
pub struct SplitStrategy<A> {
    aty: AType,
    a: Rc<RefCell<A>>,
    strategies: Vec<Strategy>,
    current_strategy: usize,
    next_unassigned_var: usize,
}

impl<A: AbstractDomain> SplitStrategy<A> {
    pub fn new(aty: AType, a: Rc<RefCell<A>>) -> SplitStrategy<A> {
        SplitStrategy {
            aty,
            a,
            strategies: Vec::new(),
            current_strategy: 0,
            next_unassigned_var: 0,
        }
    }

    pub fn aty(&self) -> AType {
        self.aty
    }

    pub fn num_strategies(&self) -> usize {
        self.strategies.len()
    }

    pub fn snapshot(&self) -> StrategySnapshot {
        StrategySnapshot {
            num_strategies: self.strategies.len(),
            current_strategy: self.current_strategy,
            next_unassigned_var: self.next_unassigned_var,
        }
    }

    pub fn restore(&mut self, snapshot: &StrategySnapshot) {
        self.strategies.truncate(snapshot.num_strategies);
        self.current_strategy = snapshot.current_strategy;
        self.next_unassigned_var = snapshot.next_unassigned_var;
    }

    /// Interprets a predicate of the form
    /// `search(<var_order>, <val_order>, x1, ..., xN)`.
    ///
    /// Constant arguments are ignored; an empty variable list drops the
    /// strategy with a warning.
    pub fn interpret_tell(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
    ) -> Option<StrategyTell> {
        let Formula::ESeq(symbol, args) = formula else {
            sink.report(
                DiagnosticCode::UnsupportedFormula,
                formula,
                "the split strategy only interprets `search(input_order, indomain_min, x1, ..., xN)` predicates",
            );
            return None;
        };
        let var_order_atom = args.first().and_then(as_atom);
        let val_order_atom = args.get(1).and_then(as_atom);
        let (Some(var_order_atom), Some(val_order_atom)) = (var_order_atom, val_order_atom) else {
            sink.report(
                DiagnosticCode::UnsupportedFormula,
                formula,
                "the split strategy only interprets `search(input_order, indomain_min, x1, ..., xN)` predicates",
            );
            return None;
        };
        if symbol != "search" {
            sink.report(
                DiagnosticCode::UnsupportedFormula,
                formula,
                "the split strategy only interprets `search(...)` predicates",
            );
            return None;
        }
        let var_order = match var_order_atom {
            "input_order" => VariableOrder::InputOrder,
            "first_fail" => VariableOrder::FirstFail,
            "anti_first_fail" => VariableOrder::AntiFirstFail,
            "smallest" => VariableOrder::Smallest,
            "largest" => VariableOrder::Largest,
            _ => {
                sink.report(
                    DiagnosticCode::UnknownStrategy,
                    formula,
                    format!("the variable order `{var_order_atom}` is unsupported"),
                );
                return None;
            }
        };
        let val_order = match val_order_atom {
            "indomain_min" => ValueOrder::Min,
            "indomain_max" => ValueOrder::Max,
            "indomain_median" => ValueOrder::Median,
            "indomain_split" => ValueOrder::Split,
            "indomain_reverse_split" => ValueOrder::ReverseSplit,
            _ => {
                sink.report(
                    DiagnosticCode::UnknownStrategy,
                    formula,
                    format!("the value order `{val_order_atom}` is unsupported"),
                );
                return None;
            }
        };
        let mut vars = Vec::new();
        let mut usable = true;
        for arg in &args[2..] {
            if arg.is_variable() {
                match env.interpret(arg, sink) {
                    Some(x) => vars.push(x),
                    None => usable = false,
                }
            } else if arg.num_vars() > 0 {
                sink.report(
                    DiagnosticCode::UnsupportedFormula,
                    arg,
                    "`search` only accepts variables or constants, not expressions over variables",
                );
                usable = false;
            }
            // Constant expressions are ignored.
        }
        if !usable {
            return None;
        }
        if vars.is_empty() {
            sink.report(
                DiagnosticCode::EmptyStrategy,
                formula,
                "the `search` predicate has no variable and is ignored",
            );
            return Some(Vec::new());
        }
        Some(vec![Strategy {
            var_order,
            val_order,
            vars,
        }])
    }

    /// Appends the strategies of `tell`. Strategies accumulate: telling
    /// twice queues two strategies consulted in order.
    pub fn deduce(&mut self, tell: &StrategyTell) -> bool {
        let mut has_changed = false;
        for strategy in tell {
            if !strategy.vars.is_empty() {
                self.strategies.push(strategy.clone());
                has_changed = true;
            }
        }
        has_changed
    }

    fn current_vars(&self) -> &[AVar] {
        &self.strategies[self.current_strategy].vars
    }

    /// Advances `(current_strategy, next_unassigned_var)` past every
    /// variable that is fixed (or emptied) in the store.
    fn move_to_next_unassigned_var(&mut self, store: &A) {
        while self.current_strategy < self.strategies.len() {
            let vars = &self.strategies[self.current_strategy].vars;
            while self.next_unassigned_var < vars.len() {
                let universe = store.project(vars[self.next_unassigned_var]);
                if universe.lb() < universe.ub() {
                    return;
                }
                self.next_unassigned_var += 1;
            }
            self.current_strategy += 1;
            self.next_unassigned_var = 0;
        }
    }

    /// Scans the remaining unassigned variables and keeps the strictly best
    /// key; ties resolve to the first variable encountered.
    fn select_by_key(
        &self,
        store: &A,
        key: impl Fn(Interval) -> i64,
        direction: Direction,
    ) -> AVar {
        let vars = self.current_vars();
        let mut best_index = self.next_unassigned_var;
        let mut best_key = key(store.project(vars[best_index]));
        for (index, &x) in vars.iter().enumerate().skip(best_index + 1) {
            let universe = store.project(x);
            if universe.lb() >= universe.ub() {
                continue;
            }
            let candidate = key(universe);
            let better = match direction {
                Direction::Minimum => candidate < best_key,
                Direction::Maximum => candidate > best_key,
            };
            if better {
                best_index = index;
                best_key = candidate;
            }
        }
        vars[best_index]
    }

    fn select_var(&self, store: &A) -> AVar {
        match self.strategies[self.current_strategy].var_order {
            VariableOrder::InputOrder => self.current_vars()[self.next_unassigned_var],
            VariableOrder::FirstFail => {
                self.select_by_key(store, |u| u.width(), Direction::Minimum)
            }
            VariableOrder::AntiFirstFail => {
                self.select_by_key(store, |u| u.width(), Direction::Maximum)
            }
            VariableOrder::Smallest => self.select_by_key(store, |u| u.lb(), Direction::Minimum),
            VariableOrder::Largest => self.select_by_key(store, |u| u.ub(), Direction::Maximum),
        }
    }

    /// Interprets the two child tells `x <left> pivot` and `x <right>
    /// pivot`.
    ///
    /// If the sub-domain rejects either child and the operators are not
    /// already `(<=, >)`, one fallback to a domain split on the same pivot
    /// is attempted; a second failure produces diagnostics and an empty
    /// branch.
    fn make_branch(&self, store: &A, x: AVar, left: Sig, right: Sig, pivot: i64) -> Branch<A::Tell> {
        let env = Env::new();
        let mut sink = DiagnosticSink::new();
        let left_formula = Formula::binary(Formula::var(x), left, Formula::Int(pivot));
        let right_formula = Formula::binary(Formula::var(x), right, Formula::Int(pivot));
        let left_tell = store.interpret_tell(&left_formula, &env, &mut sink);
        let right_tell = store.interpret_tell(&right_formula, &env, &mut sink);
        match (left_tell, right_tell) {
            (Some(left_tell), Some(right_tell)) => Branch::new(vec![left_tell, right_tell]),
            _ if left != Sig::Leq || right != Sig::Gt => {
                // Fall back on a domain split with the same pivot.
                self.make_branch(store, x, Sig::Leq, Sig::Gt, pivot)
            }
            _ => {
                warn!("the sub-domain does not support the underlying search strategy");
                for diagnostic in sink.iter() {
                    warn!("{diagnostic}");
                }
                Branch::default()
            }
        }
    }

    /// Splits the next unassigned variable according to the current
    /// strategy.
    ///
    /// Returns an empty branch when the current node is already `bot`, when
    /// every strategy is exhausted, or when the chosen variable cannot be
    /// branched on. An empty branch therefore does not mean the node is
    /// `bot`.
    pub fn split(&mut self) -> Branch<A::Tell> {
        let a = Rc::clone(&self.a);
        let store = a.borrow();
        if store.is_bot() {
            return Branch::default();
        }
        self.move_to_next_unassigned_var(&store);
        if self.current_strategy >= self.strategies.len() {
            return Branch::default();
        }
        let x = self.select_var(&store);
        let universe = store.project(x);
        let (left, right, pivot) = match self.strategies[self.current_strategy].val_order {
            ValueOrder::Min => (Sig::Eq, Sig::Gt, finite(universe.lb())),
            ValueOrder::Max => (Sig::Eq, Sig::Lt, finite(universe.ub())),
            ValueOrder::Median => (Sig::Eq, Sig::Neq, bounded_median(universe)),
            ValueOrder::Split => (Sig::Leq, Sig::Gt, bounded_median(universe)),
            ValueOrder::ReverseSplit => (Sig::Gt, Sig::Leq, bounded_median(universe)),
        };
        match pivot {
            Some(pivot) => self.make_branch(&store, x, left, right, pivot),
            None => {
                // No caller to hand a sink to here, so the diagnostic goes
                // to the log.
                let mut sink = DiagnosticSink::new();
                sink.report(
                    DiagnosticCode::UnbranchableVariable,
                    &Formula::var(x),
                    format!("cannot branch on an unbounded variable (domain {universe})"),
                );
                for diagnostic in sink.iter() {
                    warn!("{diagnostic}");
                }
                Branch::default()
            }
        }
    }
}

fn as_atom(formula: &Formula) -> Option<&str> {
    match formula {
        Formula::ESeq(symbol, args) if args.is_empty() => Some(symbol.as_str()),
        _ => None,
    }
}

fn finite(bound: i64) -> Option<i64> {
    (bound != i64::MIN && bound != i64::MAX).then_some(bound)
}

fn bounded_median(universe: Interval) -> Option<i64> {
    (universe.has_finite_lb() && universe.has_finite_ub()).then(|| universe.median())
}

impl<A: CloneWith + 'static> CloneWith for SplitStrategy<A> {
    fn clone_with(&self, tracker: &mut CopyTracker) -> Self {
        SplitStrategy {
            aty: self.aty,
            a: tracker.clone_shared(&self.a),
            strategies: self.strategies.clone(),
            current_strategy: self.current_strategy,
            next_unassigned_var: self.next_unassigned_var,
        }
    }
}
