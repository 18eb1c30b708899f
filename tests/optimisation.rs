//! End-to-end branch-and-bound searches, unconstrained and under
//! propagation, in both optimisation directions.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use arbor_solver::AbstractDomain;
use arbor_solver::BranchAndBound;
use arbor_solver::Env;
use arbor_solver::Formula;
use arbor_solver::Interval;
use arbor_solver::IntervalStore;
use arbor_solver::OptimisationDirection;
use arbor_solver::Propagation;
use arbor_solver::SearchTree;
use arbor_solver::SplitStrategy;
use common::*;

const NAMES: [&str; 3] = ["a1", "a2", "a3"];

fn objective(direction: OptimisationDirection) -> Formula {
    match direction {
        OptimisationDirection::Minimise => Formula::minimize(Formula::named("a3")),
        OptimisationDirection::Maximise => Formula::maximize(Formula::named("a3")),
    }
}

fn search_annotation() -> Formula {
    Formula::search(
        "input_order",
        "indomain_min",
        NAMES.iter().map(|name| Formula::named(*name)),
    )
}

fn unconstrained_optimisation(direction: OptimisationDirection) {
    let mut env = Env::new();
    let store = top_store(&mut env, &NAMES);
    let store_aty = store.borrow().aty();
    let split = Rc::new(RefCell::new(SplitStrategy::new(
        env.extends_abstract_dom(),
        Rc::clone(&store),
    )));
    let tree = Rc::new(RefCell::new(SearchTree::new(
        env.extends_abstract_dom(),
        Rc::clone(&store),
        split,
    )));
    let best = IntervalStore::top(store_aty, NAMES.len());
    let mut bab = BranchAndBound::new(env.extends_abstract_dom(), Rc::clone(&tree), best);

    // Nothing is known yet: no objective over a fully unknown store.
    assert!(bab.is_top());
    assert!(!bab.is_bot());

    let problem = Formula::conjunction(vec![
        domain_constraints(&NAMES, 0, 2),
        search_annotation(),
        objective(direction),
    ]);
    assert!(interpret_and_tell(&mut bab, &problem, &env));

    assert!(!bab.is_top());
    assert!(!bab.is_bot());
    assert_eq!(
        bab.is_minimisation(),
        direction == OptimisationDirection::Minimise
    );

    let mut iterations = 0;
    let mut has_changed = true;
    while !bab.is_extractable() && has_changed {
        iterations += 1;
        has_changed = false;
        if tree.borrow().is_extractable() {
            has_changed |= bab.refine();
        }
        has_changed |= tree.borrow_mut().refine();
    }

    // With no constraint, the root itself is the optimum.
    assert_eq!(iterations, 1);
    assert_eq!(bab.solutions_count(), 1);
    for name in NAMES {
        let x = env.lookup(name).unwrap();
        assert_eq!(bab.optimum().project(x), Interval::new(0, 2));
    }
    assert!(tree.borrow().is_bot());

    // One more step changes nothing.
    assert!(!tree.borrow_mut().refine());
    assert!(bab.is_extractable());
}

#[test]
fn unconstrained_minimisation_finds_the_optimum_at_the_root() {
    unconstrained_optimisation(OptimisationDirection::Minimise);
}

#[test]
fn unconstrained_maximisation_finds_the_optimum_at_the_root() {
    unconstrained_optimisation(OptimisationDirection::Maximise);
}

fn constrained_optimisation(
    direction: OptimisationDirection,
    expected_best: [i64; 3],
    expected_iterations: usize,
) {
    let mut env = Env::new();
    let store = top_store(&mut env, &NAMES);
    let store_aty = store.borrow().aty();
    let propagation = Rc::new(RefCell::new(Propagation::new(
        env.extends_abstract_dom(),
        Rc::clone(&store),
    )));
    let split = Rc::new(RefCell::new(SplitStrategy::new(
        env.extends_abstract_dom(),
        Rc::clone(&propagation),
    )));
    let tree = Rc::new(RefCell::new(SearchTree::new(
        env.extends_abstract_dom(),
        Rc::clone(&propagation),
        split,
    )));
    let best = IntervalStore::top(store_aty, NAMES.len());
    let mut bab = BranchAndBound::new(env.extends_abstract_dom(), Rc::clone(&tree), best);

    let problem = Formula::conjunction(vec![
        domain_constraints(&NAMES, 0, 2),
        plus_constraint("a1", "a2", "a3"),
        search_annotation(),
        objective(direction),
    ]);
    assert!(interpret_and_tell(&mut bab, &problem, &env));

    let mut iterations = 0;
    let mut has_changed = true;
    while !bab.is_extractable() && has_changed {
        iterations += 1;
        has_changed = false;
        has_changed |= propagation.borrow_mut().fixpoint();
        if tree.borrow().is_extractable() {
            has_changed |= bab.refine();
        }
        has_changed |= tree.borrow_mut().refine();
    }

    assert!(bab.is_extractable());
    assert!(bab.is_bot());
    check_solution(bab.optimum(), &env, &NAMES, &expected_best);
    assert_eq!(iterations, expected_iterations);
    assert!(tree.borrow().is_bot());

    // Exhaustion is stable.
    assert!(!propagation.borrow_mut().fixpoint());
    assert!(!tree.borrow_mut().refine());
}

#[test]
fn constrained_minimisation_reaches_the_zero_solution() {
    constrained_optimisation(OptimisationDirection::Minimise, [0, 0, 0], 5);
}

#[test]
fn constrained_maximisation_pushes_the_objective_to_two() {
    constrained_optimisation(OptimisationDirection::Maximise, [0, 2, 2], 7);
}

/// The objective bound tightened below the root must constrain every
/// subtree explored afterwards: each recorded solution strictly improves on
/// the previous one.
#[test]
fn recorded_solutions_improve_monotonically() {
    let mut env = Env::new();
    let store = top_store(&mut env, &NAMES);
    let store_aty = store.borrow().aty();
    let propagation = Rc::new(RefCell::new(Propagation::new(
        env.extends_abstract_dom(),
        Rc::clone(&store),
    )));
    let split = Rc::new(RefCell::new(SplitStrategy::new(
        env.extends_abstract_dom(),
        Rc::clone(&propagation),
    )));
    let tree = Rc::new(RefCell::new(SearchTree::new(
        env.extends_abstract_dom(),
        Rc::clone(&propagation),
        split,
    )));
    let best = IntervalStore::top(store_aty, NAMES.len());
    let mut bab = BranchAndBound::new(env.extends_abstract_dom(), Rc::clone(&tree), best);

    let problem = Formula::conjunction(vec![
        domain_constraints(&NAMES, 0, 2),
        plus_constraint("a1", "a2", "a3"),
        search_annotation(),
        objective(OptimisationDirection::Maximise),
    ]);
    let _ = interpret_and_tell(&mut bab, &problem, &env);
    let a3 = env.lookup("a3").unwrap();

    let mut bounds = Vec::new();
    let mut has_changed = true;
    while !bab.is_extractable() && has_changed {
        has_changed = false;
        has_changed |= propagation.borrow_mut().fixpoint();
        if tree.borrow().is_extractable() {
            has_changed |= bab.refine();
            bounds.push(bab.optimum().project(a3).ub());
        }
        has_changed |= tree.borrow_mut().refine();
    }

    assert!(bounds.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(bounds.last(), Some(&2));
}
