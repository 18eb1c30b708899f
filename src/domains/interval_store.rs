use crate::arbor_assert_eq_simple;
use crate::arbor_assert_simple;
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

/// The tell intermediate of the store: variable/interval meets to apply.
pub type StoreTell = Vec<(AVar, Interval)>;

/// The ask intermediate of the store: a conjunction of containment cells.
/// `(x, cell)` is entailed iff the projection of `x` is included in `cell`.
pub type StoreAsk = Vec<(AVar, Interval)>;

#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    domains: Vec<Interval>,
}

/// The concrete store: one [`Interval`] per abstract variable.
///
/// The store interprets unary comparison atoms (`x = k`, `x <= k`, `x < k`,
/// `x > k`) and conjunctions thereof. Disequalities have no exact interval
/// meaning and are rejected, which is what makes the split strategy fall
/// back from `indomain_median` to a domain split.
#[derive(Debug, Clone)]
pub struct IntervalStore {
    aty: AType,
    domains: Vec<Interval>,
    /// Whether any domain has been emptied by a meet.
    inconsistent: bool,
}

impl IntervalStore {
    pub fn new(aty: AType, domains: Vec<Interval>) -> IntervalStore {
        let inconsistent = domains.iter().any(|universe| universe.is_bot());
        IntervalStore {
            aty,
            domains,
            inconsistent,
        }
    }

    /// A store of `num_vars` fully unknown variables.
    pub fn top(aty: AType, num_vars: usize) -> IntervalStore {
        IntervalStore::new(aty, vec![Interval::TOP; num_vars])
    }

    /// Appends a fresh variable with the given initial universe.
    pub fn new_var(&mut self, universe: Interval) -> AVar {
        self.domains.push(universe);
        self.inconsistent |= universe.is_bot();
        AVar::new(self.aty, self.domains.len() - 1)
    }

    pub fn num_vars(&self) -> usize {
        self.domains.len()
    }

    pub fn vars(&self) -> impl Iterator<Item = AVar> + '_ {
        (0..self.domains.len()).map(|index| AVar::new(self.aty, index))
    }

    /// Whether every variable is fixed to a single value.
    pub fn is_all_assigned(&self) -> bool {
        self.domains.iter().all(|universe| universe.is_fixed())
    }

    /// Interprets one atom into a `(variable, interval)` pair, reporting on
    /// `sink` when the atom is not exactly representable.
    fn interpret_atom(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
    ) -> Option<(AVar, Interval)> {
        if let Formula::Seq(sig, args) = formula {
            if let [lhs, rhs] = args.as_slice() {
                let (variable, constant, var_on_left) = match (lhs, rhs) {
                    (var, Formula::Int(k)) if var.is_variable() => (var, *k, true),
                    (Formula::Int(k), var) if var.is_variable() => (var, *k, false),
                    _ => {
                        sink.report(
                            DiagnosticCode::UnsupportedFormula,
                            formula,
                            "the store only supports comparisons between a variable and a constant",
                        );
                        return None;
                    }
                };
                let x = env.interpret(variable, sink)?;
                return match Interval::from_tell_comparison(*sig, constant, var_on_left) {
                    Some(universe) => Some((x, universe)),
                    None => {
                        sink.report(
                            DiagnosticCode::UnsupportedFormula,
                            formula,
                            "this comparison has no exact interval meaning",
                        );
                        None
                    }
                };
            }
        }
        sink.report(
            DiagnosticCode::UnsupportedFormula,
            formula,
            "expected a unary comparison atom",
        );
        None
    }

    fn interpret_atoms(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
    ) -> Option<Vec<(AVar, Interval)>> {
        match formula {
            Formula::Bool(true) => Some(Vec::new()),
            Formula::Seq(Sig::And, conjuncts) => {
                let mut atoms = Vec::with_capacity(conjuncts.len());
                let mut usable = true;
                for conjunct in conjuncts {
                    match self.interpret_atoms(conjunct, env, sink) {
                        Some(more) => atoms.extend(more),
                        None => usable = false,
                    }
                }
                usable.then_some(atoms)
            }
            _ => self
                .interpret_atom(formula, env, sink)
                .map(|atom| vec![atom]),
        }
    }
}

impl AbstractDomain for IntervalStore {
    type Tell = StoreTell;
    type Ask = StoreAsk;
    type Snapshot = StoreSnapshot;

    fn aty(&self) -> AType {
        self.aty
    }

    fn is_bot(&self) -> bool {
        self.inconsistent
    }

    fn is_top(&self) -> bool {
        self.domains.iter().all(|universe| universe.is_top())
    }

    fn interpret_tell(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
    ) -> Option<Self::Tell> {
        self.interpret_atoms(formula, env, sink)
    }

    fn interpret_ask(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
    ) -> Option<Self::Ask> {
        // For the atoms the store supports, the ask cell coincides with the
        // tell interval.
        self.interpret_atoms(formula, env, sink)
    }

    fn deduce(&mut self, tell: &Self::Tell) -> bool {
        let mut has_changed = false;
        for (x, universe) in tell {
            has_changed |= self.embed(*x, *universe);
        }
        has_changed
    }

    fn ask(&self, ask: &Self::Ask) -> bool {
        ask.iter()
            .all(|(x, cell)| self.project(*x).is_below(*cell))
    }

    fn project(&self, x: AVar) -> Interval {
        arbor_assert_eq_simple!(x.aty(), self.aty, "projection of a foreign variable");
        self.domains[x.index()]
    }

    fn snapshot(&self) -> Self::Snapshot {
        StoreSnapshot {
            domains: self.domains.clone(),
        }
    }

    fn restore(&mut self, snapshot: &Self::Snapshot) {
        self.domains.clone_from(&snapshot.domains);
        self.inconsistent = self.domains.iter().any(|universe| universe.is_bot());
    }

    fn is_extractable(&self) -> bool {
        // Without constraints, any non-empty box under-approximates itself.
        !self.is_bot()
    }
}

impl Embed for IntervalStore {
    fn embed(&mut self, x: AVar, u: Interval) -> bool {
        arbor_assert_eq_simple!(x.aty(), self.aty, "embedding into a foreign variable");
        let changed = self.domains[x.index()].meet(u);
        self.inconsistent |= self.domains[x.index()].is_bot();
        changed
    }
}

impl Extract<IntervalStore> for IntervalStore {
    fn extract(&self, target: &mut IntervalStore) -> bool {
        if !self.is_extractable() {
            return false;
        }
        arbor_assert_simple!(
            target.aty == self.aty,
            "extraction targets a store of the same abstract type"
        );
        target.domains.clone_from(&self.domains);
        target.inconsistent = false;
        true
    }
}

impl CloneWith for IntervalStore {
    fn clone_with(&self, _: &mut CopyTracker) -> Self {
        self.clone()
    }
}
