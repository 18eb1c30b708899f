use std::cell::RefCell;
use std::rc::Rc;

use arbor_solver::AVar;
use arbor_solver::AbstractDomain;
use arbor_solver::DiagnosticSink;
use arbor_solver::Env;
use arbor_solver::Formula;
use arbor_solver::IntervalStore;
use arbor_solver::Interval;
use arbor_solver::Sig;

/// A store of fully unknown variables, one per name, declared in `env`.
pub fn top_store(env: &mut Env, names: &[&str]) -> Rc<RefCell<IntervalStore>> {
    let aty = env.extends_abstract_dom();
    let store = Rc::new(RefCell::new(IntervalStore::top(aty, names.len())));
    for (index, name) in names.iter().enumerate() {
        let _ = env.declare(*name, AVar::new(aty, index));
    }
    store
}

/// `lb <= name <= ub` for every name, as interpretable atoms.
pub fn domain_constraints(names: &[&str], lb: i64, ub: i64) -> Formula {
    let mut atoms = Vec::new();
    for name in names {
        atoms.push(Formula::binary(
            Formula::named(*name),
            Sig::Gt,
            Formula::Int(lb - 1),
        ));
        atoms.push(Formula::binary(
            Formula::named(*name),
            Sig::Leq,
            Formula::Int(ub),
        ));
    }
    Formula::conjunction(atoms)
}

/// `a1 + a2 = a3`.
pub fn plus_constraint(a1: &str, a2: &str, a3: &str) -> Formula {
    Formula::binary(
        Formula::Seq(Sig::Add, vec![Formula::named(a1), Formula::named(a2)]),
        Sig::Eq,
        Formula::named(a3),
    )
}

/// Interprets `formula` in `domain` and applies the resulting tell,
/// asserting the interpretation is clean.
pub fn interpret_and_tell<D: AbstractDomain>(domain: &mut D, formula: &Formula, env: &Env) -> bool {
    let mut sink = DiagnosticSink::new();
    let tell = domain
        .interpret_tell(formula, env, &mut sink)
        .expect("the formula interprets");
    assert!(!sink.has_errors(), "unexpected diagnostics: {sink:?}");
    domain.deduce(&tell)
}

/// Asserts that `store` assigns exactly `expected` to the named variables.
pub fn check_solution(store: &IntervalStore, env: &Env, names: &[&str], expected: &[i64]) {
    assert_eq!(names.len(), expected.len());
    for (name, &value) in names.iter().zip(expected) {
        let x = env.lookup(name).expect("the variable is declared");
        assert_eq!(
            store.project(x),
            Interval::singleton(value),
            "variable {name} differs from the expected solution"
        );
    }
}
