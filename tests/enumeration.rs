//! End-to-end satisfaction searches: plain enumeration over a store,
//! enumeration under propagation, deferred root tells, and the table domain
//! as the sub-domain of a search tree.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use arbor_solver::AbstractDomain;
use arbor_solver::Env;
use arbor_solver::Extract;
use arbor_solver::Formula;
use arbor_solver::Interval;
use arbor_solver::IntervalStore;
use arbor_solver::Propagation;
use arbor_solver::SearchTree;
use arbor_solver::Sig;
use arbor_solver::SplitStrategy;
use arbor_solver::Table;
use common::*;

const NAMES: [&str; 3] = ["a1", "a2", "a3"];

fn search_annotation() -> Formula {
    Formula::search(
        "input_order",
        "indomain_min",
        NAMES.iter().map(|name| Formula::named(*name)),
    )
}

#[test]
fn unconstrained_enumeration_yields_the_grid_in_lexicographic_order() {
    let mut env = Env::new();
    let store = top_store(&mut env, &NAMES);
    let store_aty = store.borrow().aty();
    let split = Rc::new(RefCell::new(SplitStrategy::new(
        env.extends_abstract_dom(),
        Rc::clone(&store),
    )));
    let mut tree = SearchTree::new(env.extends_abstract_dom(), Rc::clone(&store), split);

    assert!(tree.is_top());
    assert!(!tree.is_bot());

    let _ = interpret_and_tell(&mut tree, &domain_constraints(&NAMES, 0, 2), &env);
    let _ = interpret_and_tell(&mut tree, &search_annotation(), &env);

    assert!(!tree.is_top());
    assert!(!tree.is_bot());

    let mut solution = IntervalStore::top(store_aty, NAMES.len());
    let mut solutions = 0;
    for a1 in 0..3 {
        for a2 in 0..3 {
            for a3 in 0..3 {
                // Walk down a branch until every variable is assigned.
                loop {
                    assert!(tree.refine());
                    if store.borrow().is_all_assigned() {
                        break;
                    }
                }
                // With no constraint, every leaf under-approximates.
                assert!(tree.is_extractable());
                assert!(tree.extract(&mut solution));
                check_solution(&solution, &env, &NAMES, &[a1, a2, a3]);
                solutions += 1;
            }
        }
    }
    assert_eq!(solutions, 27);

    assert!(!tree.is_top());
    assert!(!tree.is_bot());
    // One more node step exhausts the tree.
    assert!(tree.refine());
    assert!(tree.is_bot());
    assert!(!tree.is_top());
    assert!(!tree.refine());
    assert!(tree.is_bot());
}

#[test]
fn constrained_enumeration_interleaves_propagation_and_search() {
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
    let mut tree = SearchTree::new(
        env.extends_abstract_dom(),
        Rc::clone(&propagation),
        split,
    );

    let _ = interpret_and_tell(&mut tree, &domain_constraints(&NAMES, 0, 2), &env);
    let _ = interpret_and_tell(&mut tree, &plus_constraint("a1", "a2", "a3"), &env);
    let _ = interpret_and_tell(&mut tree, &search_annotation(), &env);

    let expected = [
        [0, 0, 0],
        [0, 1, 1],
        [0, 2, 2],
        [1, 0, 1],
        [1, 1, 2],
        [2, 0, 2],
    ];
    let mut solution = IntervalStore::top(store_aty, NAMES.len());
    let mut solutions = 0;
    let mut iterations = 0;
    let mut has_changed = true;
    while has_changed {
        iterations += 1;
        has_changed = false;
        has_changed |= propagation.borrow_mut().fixpoint();
        if store.borrow().is_all_assigned() && tree.is_extractable() {
            assert!(tree.extract(&mut solution));
            check_solution(&solution, &env, &NAMES, &expected[solutions]);
            solutions += 1;
        }
        has_changed |= tree.refine();
    }

    assert_eq!(solutions, expected.len());
    assert_eq!(iterations, 12);
    assert!(tree.is_bot());
    assert!(!tree.is_top());

    // Exhaustion is stable: nothing changes any more.
    assert!(!propagation.borrow_mut().fixpoint());
    assert!(!tree.refine());
    assert!(tree.is_bot());
}

#[test]
fn a_tell_below_root_survives_backtracking() {
    let mut env = Env::new();
    let names = ["x", "y"];
    let store = top_store(&mut env, &names);
    let split = Rc::new(RefCell::new(SplitStrategy::new(
        env.extends_abstract_dom(),
        Rc::clone(&store),
    )));
    let mut tree = SearchTree::new(env.extends_abstract_dom(), Rc::clone(&store), split);

    let _ = interpret_and_tell(&mut tree, &domain_constraints(&names, 0, 2), &env);
    let _ = interpret_and_tell(
        &mut tree,
        &Formula::search("input_order", "indomain_min", [Formula::named("x")]),
        &env,
    );
    let x = env.lookup("x").unwrap();
    let y = env.lookup("y").unwrap();

    // Push one branch of two children and commit to the left one.
    assert!(tree.refine());
    assert_eq!(tree.depth(), 1);
    assert_eq!(store.borrow().project(x), Interval::singleton(0));

    // Deduce y <= 1 below the root: the current node sees it immediately.
    let bound = Formula::binary(Formula::var(y), Sig::Leq, Formula::Int(1));
    assert!(interpret_and_tell(&mut tree, &bound, &env));
    assert_eq!(store.borrow().project(y), Interval::new(0, 1));

    // Backtracking to the sibling re-applies the tell to the root first.
    assert!(tree.refine());
    assert_eq!(store.borrow().project(x), Interval::new(1, 2));
    assert_eq!(store.borrow().project(y), Interval::new(0, 1));

    // The refreshed root keeps the bound for the rest of the search: the
    // remaining leaves all satisfy it.
    loop {
        if !tree.refine() {
            break;
        }
    }
    assert!(tree.is_bot());
}

/// Runs every table refinement cell to fixpoint.
fn table_fixpoint(table: &Rc<RefCell<Table<IntervalStore>>>) -> bool {
    let mut has_changed = false;
    loop {
        if table.borrow().is_bot() {
            break;
        }
        let mut round_changed = false;
        let cells = table.borrow().num_refinements();
        for i in 0..cells {
            round_changed |= table.borrow_mut().refine_at(i);
        }
        has_changed |= round_changed;
        if !round_changed {
            break;
        }
    }
    has_changed
}

#[test]
fn a_search_tree_over_a_table_enumerates_the_rows() {
    let mut env = Env::new();
    let names = ["x", "y"];
    let store = top_store(&mut env, &names);
    let store_aty = store.borrow().aty();
    let table = Rc::new(RefCell::new(Table::new(
        env.extends_abstract_dom(),
        Rc::clone(&store),
    )));
    let split = Rc::new(RefCell::new(SplitStrategy::new(
        env.extends_abstract_dom(),
        Rc::clone(&table),
    )));
    let mut tree = SearchTree::new(env.extends_abstract_dom(), Rc::clone(&table), split);

    let eq = |name: &str, value: i64| {
        Formula::binary(Formula::named(name), Sig::Eq, Formula::Int(value))
    };
    let rows = Formula::disjunction(vec![
        Formula::conjunction(vec![eq("x", 0), eq("y", 1)]),
        Formula::conjunction(vec![eq("x", 1), eq("y", 2)]),
        Formula::conjunction(vec![eq("x", 2), eq("y", 3)]),
    ]);
    let _ = interpret_and_tell(&mut tree, &domain_constraints(&names, 0, 3), &env);
    let _ = interpret_and_tell(&mut tree, &rows, &env);
    let _ = interpret_and_tell(
        &mut tree,
        &Formula::search(
            "input_order",
            "indomain_min",
            names.iter().map(|name| Formula::named(*name)),
        ),
        &env,
    );

    let expected = [[0, 1], [1, 2], [2, 3]];
    let mut solution = IntervalStore::top(store_aty, names.len());
    let mut solutions = 0;
    let mut iterations = 0;
    let mut has_changed = true;
    while has_changed {
        iterations += 1;
        has_changed = false;
        has_changed |= table_fixpoint(&table);
        if store.borrow().is_all_assigned() && tree.is_extractable() {
            assert!(tree.extract(&mut solution));
            check_solution(&solution, &env, &names, &expected[solutions]);
            solutions += 1;
        }
        has_changed |= tree.refine();
    }

    assert_eq!(solutions, expected.len());
    assert_eq!(iterations, 6);
    assert!(tree.is_bot());
}
