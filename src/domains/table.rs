use std::cell::RefCell;
use std::rc::Rc;

use fixedbitset::FixedBitSet;
use log::trace;

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

/// The shared cell matrix of a [`Table`] domain, flattened row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMatrix {
    rows: usize,
    cols: usize,
    tell_cells: Vec<Interval>,
    ask_cells: Vec<Interval>,
}

impl TableMatrix {
    fn tell_cell(&self, row: usize, col: usize) -> Interval {
        self.tell_cells[row * self.cols + col]
    }

    fn ask_cell(&self, row: usize, col: usize) -> Interval {
        self.ask_cells[row * self.cols + col]
    }
}

/// One interpreted table: a column renaming plus the matrix it was parsed
/// with.
#[derive(Debug, Clone, PartialEq)]
pub struct TableInstance {
    header: Vec<AVar>,
    matrix: TableMatrix,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableTell<T> {
    pub sub_tells: Vec<T>,
    instances: Vec<TableInstance>,
}

impl<T> Default for TableTell<T> {
    fn default() -> Self {
        TableTell {
            sub_tells: Vec::new(),
            instances: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableAsk<A> {
    pub sub_asks: Vec<A>,
    instances: Vec<TableInstance>,
}

#[derive(Debug, Clone)]
pub struct TableSnapshot<Snap> {
    sub: Snap,
    matrix: Option<TableMatrix>,
    num_instances: usize,
    eliminated: Vec<FixedBitSet>,
}

/// An extensional constraint in reduced product with the underlying store.
///
/// The table is a disjunction of conjunctions of unary atoms: each row is a
/// candidate assignment region whose cells are universe values. All
/// instances share one matrix; an instance is a renaming of the columns
/// ([`TableInstance`] headers) plus a bitset of rows already proven
/// inconsistent with the store.
///
/// [`Table::refine`] eliminates rows whose cell is incompatible with the
/// current projection of the column variable and tells the store the hull of
/// the surviving cells, realising the reduced product. Once every row of an
/// instance is eliminated the hull is empty and the store is driven to
/// `bot`.
#[derive(Debug)]
pub struct Table<S> {
    aty: AType,
    sub: Rc<RefCell<S>>,
    matrix: Option<TableMatrix>,
    headers: Vec<Vec<AVar>>,
    eliminated: Vec<FixedBitSet>,
}

impl<S: AbstractDomain + Embed> Table<S> {
    pub fn new(aty: AType, sub: Rc<RefCell<S>>) -> Table<S> {
        Table {
            aty,
            sub,
            matrix: None,
            headers: Vec::new(),
            eliminated: Vec::new(),
        }
    }

    pub fn num_tables(&self) -> usize {
        self.headers.len()
    }

    pub fn num_columns(&self) -> usize {
        self.matrix.as_ref().map_or(0, |matrix| matrix.cols)
    }

    pub fn num_rows(&self) -> usize {
        self.matrix.as_ref().map_or(0, |matrix| matrix.rows)
    }

    /// One refinement cell per (instance, column) pair.
    pub fn num_refinements(&self) -> usize {
        self.num_tables() * self.num_columns()
    }

    /// Refines one column of one table instance: eliminates the rows whose
    /// cell has become incompatible with the store, then tells the store the
    /// hull of the surviving cells. Returns whether anything changed.
    pub fn refine(&mut self, table: usize, col: usize) -> bool {
        let matrix = self
            .matrix
            .as_ref()
            .expect("refine requires an installed table");
        let x = self.headers[table][col];
        let mut store = self.sub.borrow_mut();
        if store.is_bot() {
            return false;
        }
        let current = store.project(x);
        let mut hull = Interval::BOT;
        let mut has_changed = false;
        for row in 0..matrix.rows {
            if self.eliminated[table].contains(row) {
                continue;
            }
            let mut value = current;
            let _ = value.meet(matrix.tell_cell(row, col));
            if value.is_bot() {
                trace!("table {table}: row {row} eliminated on column {col}");
                self.eliminated[table].insert(row);
                has_changed = true;
            } else {
                let _ = hull.join(value);
            }
        }
        has_changed |= store.embed(x, hull);
        has_changed
    }

    /// Flat refinement index for fixpoint drivers, decomposed as
    /// `(i / num_columns, i % num_columns)`.
    pub fn refine_at(&mut self, i: usize) -> bool {
        let cols = self.num_columns();
        self.refine(i / cols, i % cols)
    }

    /// Parses `formula` as an `OR` of `AND`s of unary atoms. Diagnostics go
    /// to `sink`; `None` means the formula does not make a table and the
    /// caller should fall back to the sub-domain.
    fn interpret_table(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
    ) -> Option<TableInstance> {
        let Formula::Seq(Sig::Or, disjuncts) = formula else {
            return None;
        };
        let mut header: Vec<AVar> = Vec::new();
        let mut tell_rows: Vec<Vec<Interval>> = Vec::new();
        let mut ask_rows: Vec<Vec<Interval>> = Vec::new();
        for disjunct in disjuncts {
            let Formula::Seq(Sig::And, atoms) = disjunct else {
                sink.report(
                    DiagnosticCode::UnsupportedFormula,
                    formula,
                    "a table is a disjunction of conjunctions",
                );
                return None;
            };
            tell_rows.push(vec![Interval::TOP; header.len()]);
            ask_rows.push(vec![Interval::TOP; header.len()]);
            for atom in atoms {
                if atom.num_vars() != 1 {
                    sink.report(
                        DiagnosticCode::UnsupportedFormula,
                        atom,
                        "only unary atoms are supported in table cells",
                    );
                    return None;
                }
                let (x, tell_cell, ask_cell) = self.interpret_cell(atom, env, sink)?;
                let col = match header.iter().position(|&y| y == x) {
                    Some(col) => col,
                    None => {
                        // A variable new to this table: pad every row with an
                        // unconstrained cell.
                        header.push(x);
                        for row in tell_rows.iter_mut().chain(ask_rows.iter_mut()) {
                            row.push(Interval::TOP);
                        }
                        header.len() - 1
                    }
                };
                let row = tell_rows.len() - 1;
                let _ = tell_rows[row][col].meet(tell_cell);
                let _ = ask_rows[row][col].meet(ask_cell);
            }
        }
        let cols = header.len();
        Some(TableInstance {
            header,
            matrix: TableMatrix {
                rows: tell_rows.len(),
                cols,
                tell_cells: tell_rows.into_iter().flatten().collect(),
                ask_cells: ask_rows.into_iter().flatten().collect(),
            },
        })
    }

    fn interpret_cell(
        &self,
        atom: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
    ) -> Option<(AVar, Interval, Interval)> {
        if let Formula::Seq(sig, args) = atom {
            if let [lhs, rhs] = args.as_slice() {
                let (variable, constant, var_on_left) = match (lhs, rhs) {
                    (var, Formula::Int(k)) if var.is_variable() => (var, *k, true),
                    (Formula::Int(k), var) if var.is_variable() => (var, *k, false),
                    _ => {
                        sink.report(
                            DiagnosticCode::UnsupportedFormula,
                            atom,
                            "table cells compare a variable with a constant",
                        );
                        return None;
                    }
                };
                let x = env.interpret(variable, sink)?;
                let tell_cell = Interval::from_tell_comparison(*sig, constant, var_on_left);
                let ask_cell = Interval::from_ask_comparison(*sig, constant, var_on_left);
                if let (Some(tell_cell), Some(ask_cell)) = (tell_cell, ask_cell) {
                    return Some((x, tell_cell, ask_cell));
                }
            }
        }
        sink.report(
            DiagnosticCode::UnsupportedFormula,
            atom,
            "this atom has no universe cell",
        );
        None
    }

    fn interpret_into(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
        tell: &mut TableTell<S::Tell>,
    ) -> bool {
        match formula {
            Formula::Seq(Sig::And, conjuncts) => {
                let mut usable = true;
                for conjunct in conjuncts {
                    usable &= self.interpret_into(conjunct, env, sink, tell);
                }
                usable
            }
            Formula::Seq(Sig::Or, _) => {
                // Attempt the table shape on a scratch sink; any failure
                // falls back to sub-domain interpretation of the whole
                // disjunction.
                let mut scratch = DiagnosticSink::new();
                match self.interpret_table(formula, env, &mut scratch) {
                    Some(instance) => {
                        // Only a matrix with live instances constrains new
                        // tables; without one, the first table of this tell
                        // sets the shape.
                        let reference = self
                            .matrix
                            .as_ref()
                            .filter(|_| !self.headers.is_empty())
                            .or_else(|| tell.instances.first().map(|first| &first.matrix));
                        if let Some(reference) = reference {
                            if reference.ask_cells != instance.matrix.ask_cells
                                || reference.cols != instance.matrix.cols
                            {
                                sink.report(
                                    DiagnosticCode::TableShapeMismatch,
                                    formula,
                                    "all tables must share an identical ask matrix",
                                );
                                return false;
                            }
                        }
                        tell.instances.push(instance);
                        true
                    }
                    None => match self.sub.borrow().interpret_tell(formula, env, sink) {
                        Some(sub_tell) => {
                            tell.sub_tells.push(sub_tell);
                            true
                        }
                        None => false,
                    },
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

    /// Whether some row of `instance` is fully entailed by the store:
    /// every column projection included in the row's ask cell.
    fn instance_entailed<P: AbstractDomain>(
        store: &P,
        instance_header: &[AVar],
        matrix: &TableMatrix,
        eliminated: Option<&FixedBitSet>,
    ) -> bool {
        (0..matrix.rows)
            .filter(|&row| eliminated.map_or(true, |bits| !bits.contains(row)))
            .any(|row| {
                instance_header
                    .iter()
                    .enumerate()
                    .all(|(col, &x)| store.project(x).is_below(matrix.ask_cell(row, col)))
            })
    }
}

impl<S: AbstractDomain + Embed> AbstractDomain for Table<S> {
    type Tell = TableTell<S::Tell>;
    type Ask = TableAsk<S::Ask>;
    type Snapshot = TableSnapshot<S::Snapshot>;

    fn aty(&self) -> AType {
        self.aty
    }

    fn is_bot(&self) -> bool {
        self.sub.borrow().is_bot()
            || self.eliminated.iter().any(|bits| {
                self.num_rows() > 0 && bits.count_ones(..) == self.num_rows()
            })
    }

    fn is_top(&self) -> bool {
        self.headers.is_empty() && self.sub.borrow().is_top()
    }

    fn interpret_tell(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
    ) -> Option<Self::Tell> {
        let mut tell = TableTell::default();
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
                let mut ask = TableAsk {
                    sub_asks: Vec::new(),
                    instances: Vec::new(),
                };
                let mut usable = true;
                for conjunct in conjuncts {
                    match self.interpret_ask(conjunct, env, sink) {
                        Some(more) => {
                            ask.sub_asks.extend(more.sub_asks);
                            ask.instances.extend(more.instances);
                        }
                        None => usable = false,
                    }
                }
                usable.then_some(ask)
            }
            Formula::Seq(Sig::Or, _) => {
                let mut scratch = DiagnosticSink::new();
                match self.interpret_table(formula, env, &mut scratch) {
                    Some(instance) => Some(TableAsk {
                        sub_asks: Vec::new(),
                        instances: vec![instance],
                    }),
                    None => self
                        .sub
                        .borrow()
                        .interpret_ask(formula, env, sink)
                        .map(|sub_ask| TableAsk {
                            sub_asks: vec![sub_ask],
                            instances: Vec::new(),
                        }),
                }
            }
            _ => self
                .sub
                .borrow()
                .interpret_ask(formula, env, sink)
                .map(|sub_ask| TableAsk {
                    sub_asks: vec![sub_ask],
                    instances: Vec::new(),
                }),
        }
    }

    fn deduce(&mut self, tell: &Self::Tell) -> bool {
        let mut has_changed = false;
        {
            let mut store = self.sub.borrow_mut();
            for sub_tell in &tell.sub_tells {
                has_changed |= store.deduce(sub_tell);
            }
        }
        for instance in &tell.instances {
            if self.headers.is_empty() {
                // The first instance (re)installs the shared matrix; a
                // matrix left over from restored-away instances does not
                // constrain it.
                self.matrix = Some(instance.matrix.clone());
            } else {
                let matrix = self
                    .matrix
                    .as_ref()
                    .expect("live instances share an installed matrix");
                arbor_assert_simple!(
                    matrix.ask_cells == instance.matrix.ask_cells
                        && matrix.cols == instance.matrix.cols,
                    "tables deduced into one domain share one matrix"
                );
            }
            self.headers.push(instance.header.clone());
            self.eliminated
                .push(FixedBitSet::with_capacity(instance.matrix.rows));
            has_changed = true;
        }
        has_changed
    }

    fn ask(&self, ask: &Self::Ask) -> bool {
        let store = self.sub.borrow();
        ask.sub_asks.iter().all(|sub_ask| store.ask(sub_ask))
            && ask.instances.iter().all(|instance| {
                Table::<S>::instance_entailed(&*store, &instance.header, &instance.matrix, None)
            })
    }

    fn project(&self, x: AVar) -> Interval {
        self.sub.borrow().project(x)
    }

    fn snapshot(&self) -> Self::Snapshot {
        TableSnapshot {
            sub: self.sub.borrow().snapshot(),
            matrix: self.matrix.clone(),
            num_instances: self.headers.len(),
            eliminated: self.eliminated.clone(),
        }
    }

    fn restore(&mut self, snapshot: &Self::Snapshot) {
        self.sub.borrow_mut().restore(&snapshot.sub);
        self.matrix.clone_from(&snapshot.matrix);
        self.headers.truncate(snapshot.num_instances);
        self.eliminated.truncate(snapshot.num_instances);
        for (bits, saved) in self.eliminated.iter_mut().zip(&snapshot.eliminated) {
            bits.clone_from(saved);
        }
    }

    fn is_extractable(&self) -> bool {
        if self.is_bot() {
            return false;
        }
        let store = self.sub.borrow();
        if !store.is_extractable() {
            return false;
        }
        let Some(matrix) = &self.matrix else {
            return true;
        };
        self.headers
            .iter()
            .zip(&self.eliminated)
            .all(|(header, eliminated)| {
                Table::<S>::instance_entailed(&*store, header, matrix, Some(eliminated))
            })
    }
}

impl<S: AbstractDomain + Embed> Embed for Table<S> {
    fn embed(&mut self, x: AVar, u: Interval) -> bool {
        self.sub.borrow_mut().embed(x, u)
    }
}

impl<S, T> Extract<T> for Table<S>
where
    S: AbstractDomain + Embed + Extract<T>,
{
    fn extract(&self, target: &mut T) -> bool {
        if !self.is_extractable() {
            return false;
        }
        self.sub.borrow().extract(target)
    }
}

impl<S: CloneWith + 'static> CloneWith for Table<S> {
    fn clone_with(&self, tracker: &mut CopyTracker) -> Self {
        Table {
            aty: self.aty,
            sub: tracker.clone_shared(&self.sub),
            matrix: self.matrix.clone(),
            headers: self.headers.clone(),
            eliminated: self.eliminated.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::IntervalStore;

    fn eq(name: &str, value: i64) -> Formula {
        Formula::binary(Formula::named(name), Sig::Eq, Formula::Int(value))
    }

    /// `(x = 0 /\ y = 1) \/ (x = 1 /\ y = 2) \/ (x = 2 /\ y = 3)`.
    fn successor_table() -> Formula {
        Formula::disjunction(vec![
            Formula::conjunction(vec![eq("x", 0), eq("y", 1)]),
            Formula::conjunction(vec![eq("x", 1), eq("y", 2)]),
            Formula::conjunction(vec![eq("x", 2), eq("y", 3)]),
        ])
    }

    fn setup() -> (Env, Rc<RefCell<IntervalStore>>, Table<IntervalStore>) {
        let mut env = Env::new();
        let store_aty = env.extends_abstract_dom();
        let store = Rc::new(RefCell::new(IntervalStore::new(
            store_aty,
            vec![Interval::new(0, 3); 2],
        )));
        let _ = env.declare("x", AVar::new(store_aty, 0));
        let _ = env.declare("y", AVar::new(store_aty, 1));
        let table = Table::new(env.extends_abstract_dom(), Rc::clone(&store));
        (env, store, table)
    }

    #[test]
    fn a_disjunction_of_conjunctions_becomes_a_table() {
        let (env, _, mut table) = setup();
        let mut sink = DiagnosticSink::new();
        let tell = table
            .interpret_tell(&successor_table(), &env, &mut sink)
            .unwrap();
        assert!(sink.is_empty());
        assert!(table.deduce(&tell));
        assert_eq!(table.num_tables(), 1);
        assert_eq!(table.num_rows(), 3);
        assert_eq!(table.num_columns(), 2);
    }

    #[test]
    fn refine_eliminates_rows_and_tightens_columns() {
        let (env, store, mut table) = setup();
        let mut sink = DiagnosticSink::new();
        let tell = table
            .interpret_tell(&successor_table(), &env, &mut sink)
            .unwrap();
        let _ = table.deduce(&tell);

        let x = env.lookup("x").unwrap();
        let y = env.lookup("y").unwrap();

        // First pass: nothing eliminated, columns get the hulls.
        let _ = table.refine(0, 0);
        let _ = table.refine(0, 1);
        assert_eq!(store.borrow().project(x), Interval::new(0, 2));
        assert_eq!(store.borrow().project(y), Interval::new(1, 3));

        // Constrain x > 0: the first row dies, y follows.
        let _ = store.borrow_mut().embed(x, Interval::above(0));
        assert!(table.refine(0, 0));
        assert!(table.refine(0, 1));
        assert_eq!(store.borrow().project(y), Interval::new(2, 3));
    }

    #[test]
    fn eliminating_every_row_drives_the_store_to_bot() {
        let (env, store, mut table) = setup();
        let mut sink = DiagnosticSink::new();
        let tell = table
            .interpret_tell(&successor_table(), &env, &mut sink)
            .unwrap();
        let _ = table.deduce(&tell);

        let y = env.lookup("y").unwrap();
        let _ = store.borrow_mut().embed(y, Interval::singleton(0));
        let _ = table.refine(0, 1);
        assert!(table.is_bot());
        assert!(store.borrow().is_bot());
    }

    #[test]
    fn entailment_needs_one_fully_included_row() {
        let (env, store, mut table) = setup();
        let mut sink = DiagnosticSink::new();
        let formula = successor_table();
        let tell = table.interpret_tell(&formula, &env, &mut sink).unwrap();
        let _ = table.deduce(&tell);

        let ask = table.interpret_ask(&formula, &env, &mut sink).unwrap();
        assert!(!table.ask(&ask));

        let x = env.lookup("x").unwrap();
        let y = env.lookup("y").unwrap();
        let _ = store.borrow_mut().embed(x, Interval::singleton(1));
        let _ = store.borrow_mut().embed(y, Interval::singleton(2));
        assert!(table.ask(&ask));
        assert!(table.is_extractable());
    }

    #[test]
    fn a_second_table_with_a_different_matrix_is_rejected() {
        let (env, _, mut table) = setup();
        let mut sink = DiagnosticSink::new();
        let tell = table
            .interpret_tell(&successor_table(), &env, &mut sink)
            .unwrap();
        let _ = table.deduce(&tell);

        let other = Formula::disjunction(vec![
            Formula::conjunction(vec![eq("x", 3), eq("y", 3)]),
            Formula::conjunction(vec![eq("x", 0), eq("y", 0)]),
        ]);
        assert!(table.interpret_tell(&other, &env, &mut sink).is_none());
        assert!(sink.has_errors());
        assert_eq!(
            sink.iter().next().unwrap().code,
            DiagnosticCode::TableShapeMismatch
        );
    }

    #[test]
    fn a_renaming_of_the_same_matrix_is_accepted() {
        let mut env = Env::new();
        let store_aty = env.extends_abstract_dom();
        let store = Rc::new(RefCell::new(IntervalStore::new(
            store_aty,
            vec![Interval::new(0, 3); 4],
        )));
        for (i, name) in ["x", "y", "z", "w"].iter().enumerate() {
            let _ = env.declare(*name, AVar::new(store_aty, i));
        }
        let mut table = Table::new(env.extends_abstract_dom(), Rc::clone(&store));

        let mut sink = DiagnosticSink::new();
        let first = table
            .interpret_tell(&successor_table(), &env, &mut sink)
            .unwrap();
        let _ = table.deduce(&first);

        let renamed = Formula::disjunction(vec![
            Formula::conjunction(vec![eq("z", 0), eq("w", 1)]),
            Formula::conjunction(vec![eq("z", 1), eq("w", 2)]),
            Formula::conjunction(vec![eq("z", 2), eq("w", 3)]),
        ]);
        let second = table.interpret_tell(&renamed, &env, &mut sink).unwrap();
        assert!(sink.is_empty());
        let _ = table.deduce(&second);
        assert_eq!(table.num_tables(), 2);

        // Refining the second instance touches z and w, not x and y.
        let z = env.lookup("z").unwrap();
        let _ = table.refine(1, 0);
        assert_eq!(store.borrow().project(z), Interval::new(0, 2));
        let x = env.lookup("x").unwrap();
        assert_eq!(store.borrow().project(x), Interval::new(0, 3));
    }

    #[test]
    fn restore_revives_eliminated_rows() {
        let (env, store, mut table) = setup();
        let mut sink = DiagnosticSink::new();
        let tell = table
            .interpret_tell(&successor_table(), &env, &mut sink)
            .unwrap();
        let _ = table.deduce(&tell);

        let snapshot = table.snapshot();
        let x = env.lookup("x").unwrap();
        let _ = store.borrow_mut().embed(x, Interval::above(1));
        let _ = table.refine(0, 0);
        let _ = table.refine(0, 1);
        assert_eq!(table.eliminated[0].count_ones(..), 2);

        table.restore(&snapshot);
        assert_eq!(table.eliminated[0].count_ones(..), 0);
        assert_eq!(store.borrow().project(x), Interval::new(0, 3));
        assert_eq!(table.num_tables(), 1);
    }

    #[test]
    fn restore_to_zero_instances_forgets_the_matrix() {
        let (env, _, mut table) = setup();
        let snapshot = table.snapshot();

        let mut sink = DiagnosticSink::new();
        let tell = table
            .interpret_tell(&successor_table(), &env, &mut sink)
            .unwrap();
        let _ = table.deduce(&tell);
        assert_eq!(table.num_tables(), 1);
        assert_eq!(table.num_rows(), 3);

        table.restore(&snapshot);
        assert_eq!(table.num_tables(), 0);
        assert_eq!(table.num_rows(), 0);

        // With no live instance, a differently-shaped table is a fresh
        // installation, not a mismatch.
        let other = Formula::disjunction(vec![
            Formula::conjunction(vec![eq("x", 3), eq("y", 3)]),
            Formula::conjunction(vec![eq("x", 0), eq("y", 0)]),
        ]);
        let tell = table.interpret_tell(&other, &env, &mut sink).unwrap();
        assert!(sink.is_empty());
        let _ = table.deduce(&tell);
        assert_eq!(table.num_tables(), 1);
        assert_eq!(table.num_rows(), 2);
    }
}
