use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

use crate::arbor_assert_moderate;
use crate::arbor_assert_simple;
use crate::basic_types::AType;
use crate::basic_types::AVar;
use crate::basic_types::DiagnosticSink;
use crate::branching::Branch;
use crate::branching::SplitStrategy;
use crate::branching::StrategySnapshot;
use crate::branching::StrategyTell;
use crate::domains::AbstractDomain;
use crate::domains::CloneWith;
use crate::domains::CopyTracker;
use crate::domains::Extract;
use crate::domains::IntervalStore;
use crate::logic::Env;
use crate::logic::Formula;
use crate::universe::Interval;

/// The tell intermediate of the search tree: a sub-domain part and a split
/// strategy part, of which interpretation fills exactly one.
#[derive(Debug, Clone, Default)]
pub struct SearchTreeTell<T> {
    pub sub_tell: T,
    pub split_tell: StrategyTell,
}

/// Tells deduced below root, kept to be re-applied to the root node at the
/// next backtrack that reaches it.
#[derive(Debug, Clone)]
struct RootTells<T> {
    sub_tells: Vec<T>,
    split_tells: Vec<StrategyTell>,
}

impl<T> Default for RootTells<T> {
    fn default() -> Self {
        RootTells {
            sub_tells: Vec::new(),
            split_tells: Vec::new(),
        }
    }
}

impl<T> RootTells<T> {
    fn is_empty(&self) -> bool {
        self.sub_tells.is_empty() && self.split_tells.is_empty()
    }

    fn clear(&mut self) {
        self.sub_tells.clear();
        self.split_tells.clear();
    }
}

pub struct SearchTreeSnapshot<A: AbstractDomain> {
    sub_snapshot: A::Snapshot,
    split_snapshot: StrategySnapshot,
    sub: Rc<RefCell<A>>,
}

impl<A: AbstractDomain> Clone for SearchTreeSnapshot<A> {
    fn clone(&self) -> Self {
        SearchTreeSnapshot {
            sub_snapshot: self.sub_snapshot.clone(),
            split_snapshot: self.split_snapshot,
            sub: Rc::clone(&self.sub),
        }
    }
}

/// Depth-first search over a sub-domain, one node step at a time.
///
/// The tree keeps a pointer to the sub-domain element of the *current* node
/// only; the path from the root is the stack of [`Branch`]es, and the root
/// itself is a snapshot. One [`SearchTree::refine`] call performs one node
/// step, `pop ∘ push ∘ split`:
///
/// - `split` asks the [`SplitStrategy`] for the children of the current
///   node;
/// - `push` stacks them (refreshing the root snapshot when leaving the
///   root), or reports the node pruned when there are none;
/// - `pop` commits to the first child, or backtracks to the next sibling:
///   restore the root, replay the stack prefix, descend into the sibling.
///
/// Tells deduced while below the root are applied to the current node
/// immediately *and* buffered, so the root (and thus every subtree explored
/// after the next backtrack) eventually observes them too. This is how an
/// objective bound tightened in the middle of the search survives
/// backtracking.
///
/// Once every branch is exhausted the current pointer is dropped and the
/// tree is `bot`: the empty set of remaining nodes.
pub struct SearchTree<A: AbstractDomain> {
    aty: AType,
    /// The sub-domain element of the node currently explored; `None` once
    /// the tree is exhausted.
    a: Option<Rc<RefCell<A>>>,
    split: Rc<RefCell<SplitStrategy<A>>>,
    stack: Vec<Branch<A::Tell>>,
    root: (A::Snapshot, StrategySnapshot),
    root_tells: RootTells<A::Tell>,
}

impl<A: AbstractDomain> SearchTree<A> {
    pub fn new(
        aty: AType,
        a: Rc<RefCell<A>>,
        split: Rc<RefCell<SplitStrategy<A>>>,
    ) -> SearchTree<A> {
        let root = (a.borrow().snapshot(), split.borrow().snapshot());
        SearchTree {
            aty,
            a: Some(a),
            split,
            stack: Vec::new(),
            root,
            root_tells: RootTells::default(),
        }
    }

    /// Whether the tree consists of the root node alone.
    pub fn is_singleton(&self) -> bool {
        self.stack.is_empty() && self.a.is_some()
    }

    /// The depth of the current node; the root has depth 0.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// One node step, `pop ∘ push ∘ split`. Returns whether the sub-domain
    /// or the tree changed; once the tree is `bot` this is a no-op.
    ///
    /// Observed from the outside the sub-domain may backtrack, so it does
    /// not evolve monotonically; the search tree itself does.
    pub fn refine(&mut self) -> bool {
        if self.is_bot() {
            return false;
        }
        let branch = self.split.borrow_mut().split();
        let pruned = self.push(branch);
        self.pop(pruned)
    }

    /// Returns `true` when the node is pruned (no children), `false` when a
    /// branch was pushed.
    fn push(&mut self, branch: Branch<A::Tell>) -> bool {
        if branch.size() == 0 {
            return true;
        }
        if self.is_singleton() {
            // Leaving the root: remember it.
            let a = self.a.as_ref().expect("the root node exists");
            self.root = (a.borrow().snapshot(), self.split.borrow().snapshot());
        }
        self.stack.push(branch);
        false
    }

    fn pop(&mut self, pruned: bool) -> bool {
        if !pruned {
            self.commit_left()
        } else {
            let mut has_changed = self.backtrack();
            has_changed |= self.commit_right();
            has_changed
        }
    }

    /// Commits to the leftmost unexplored child of the newly pushed branch.
    fn commit_left(&mut self) -> bool {
        let a = self.a.as_ref().expect("committing requires a current node");
        let branch = self.stack.last_mut().expect("a branch was just pushed");
        a.borrow_mut().deduce(branch.next())
    }

    /// After a backtrack, descends into the next sibling: advance the
    /// deepest surviving branch and replay the whole path from the root.
    fn commit_right(&mut self) -> bool {
        if self.stack.is_empty() {
            return false;
        }
        let _ = self
            .stack
            .last_mut()
            .expect("the stack is not empty")
            .next();
        self.replay()
    }

    /// Pops exhausted branches and restores the root; drops the current
    /// pointer entirely when the whole tree is exhausted.
    fn backtrack(&mut self) -> bool {
        while self.stack.last().is_some_and(|branch| !branch.has_next()) {
            let _ = self.stack.pop();
        }
        if !self.stack.is_empty() {
            trace!("backtracking to depth {}", self.stack.len());
            {
                let a = self.a.as_ref().expect("backtracking requires a current node");
                a.borrow_mut().restore(&self.root.0);
                self.split.borrow_mut().restore(&self.root.1);
            }
            self.deduce_root_tells()
        } else if self.a.is_some() {
            trace!("search space exhausted");
            self.a = None;
            true
        } else {
            false
        }
    }

    /// Applies the buffered root tells to the (just restored) root and
    /// refreshes the root snapshot so they stick for the remaining
    /// subtrees.
    fn deduce_root_tells(&mut self) -> bool {
        if self.root_tells.is_empty() {
            return false;
        }
        let mut has_changed = false;
        let a = self.a.as_ref().expect("the root node exists");
        for tell in &self.root_tells.sub_tells {
            has_changed |= a.borrow_mut().deduce(tell);
        }
        for tell in &self.root_tells.split_tells {
            has_changed |= self.split.borrow_mut().deduce(tell);
        }
        self.root_tells.clear();
        self.root = (a.borrow().snapshot(), self.split.borrow().snapshot());
        has_changed
    }

    /// Re-applies every committed child tell from the root to the current
    /// leaf.
    fn replay(&mut self) -> bool {
        let a = self.a.as_ref().expect("replaying requires a current node");
        let mut has_changed = false;
        for branch in &self.stack {
            has_changed |= a.borrow_mut().deduce(branch.current());
        }
        has_changed
    }
}

impl<A: AbstractDomain> AbstractDomain for SearchTree<A> {
    type Tell = SearchTreeTell<A::Tell>;
    type Ask = A::Ask;
    type Snapshot = SearchTreeSnapshot<A>;

    fn aty(&self) -> AType {
        self.aty
    }

    /// The tree is `bot` once exhausted: no current node remains.
    fn is_bot(&self) -> bool {
        self.a.is_none()
    }

    fn is_top(&self) -> bool {
        self.is_singleton()
            && self
                .a
                .as_ref()
                .expect("a singleton tree has a root")
                .borrow()
                .is_top()
    }

    /// Routes `search(...)` predicates to the split strategy and everything
    /// else to the sub-domain.
    fn interpret_tell(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
    ) -> Option<Self::Tell> {
        arbor_assert_simple!(!self.is_bot(), "interpretation requires a current node");
        let a = self.a.as_ref().expect("the tree is not bot");
        match formula {
            Formula::ESeq(symbol, _) if symbol == "search" => self
                .split
                .borrow()
                .interpret_tell(formula, env, sink)
                .map(|split_tell| SearchTreeTell {
                    sub_tell: A::Tell::default(),
                    split_tell,
                }),
            _ => a
                .borrow()
                .interpret_tell(formula, env, sink)
                .map(|sub_tell| SearchTreeTell {
                    sub_tell,
                    split_tell: StrategyTell::default(),
                }),
        }
    }

    fn interpret_ask(
        &self,
        formula: &Formula,
        env: &Env,
        sink: &mut DiagnosticSink,
    ) -> Option<Self::Ask> {
        arbor_assert_simple!(!self.is_bot(), "interpretation requires a current node");
        self.a
            .as_ref()
            .expect("the tree is not bot")
            .borrow()
            .interpret_ask(formula, env, sink)
    }

    /// Applies `tell` to the current node. Below the root the tell is also
    /// buffered, to be re-applied to the root on the next backtrack that
    /// reaches it.
    fn deduce(&mut self, tell: &Self::Tell) -> bool {
        if self.is_bot() {
            return false;
        }
        if !self.is_singleton() {
            self.root_tells.sub_tells.push(tell.sub_tell.clone());
            self.root_tells.split_tells.push(tell.split_tell.clone());
        }
        let a = self.a.as_ref().expect("the tree is not bot");
        let mut has_changed = a.borrow_mut().deduce(&tell.sub_tell);
        has_changed |= self.split.borrow_mut().deduce(&tell.split_tell);
        has_changed
    }

    fn ask(&self, ask: &Self::Ask) -> bool {
        arbor_assert_simple!(!self.is_bot(), "entailment requires a current node");
        self.a.as_ref().expect("the tree is not bot").borrow().ask(ask)
    }

    /// Projection is defined at the root only; inside the tree the root
    /// store is not addressable without replaying, which this domain does
    /// not attempt.
    fn project(&self, x: AVar) -> Interval {
        if self.is_bot() {
            return Interval::BOT;
        }
        if self.is_singleton() {
            return self.a.as_ref().expect("the tree is not bot").borrow().project(x);
        }
        arbor_assert_moderate!(false, "projection inside a multi-node search tree");
        Interval::TOP
    }

    fn snapshot(&self) -> Self::Snapshot {
        arbor_assert_simple!(self.is_singleton(), "snapshots are taken at the root");
        let a = self.a.as_ref().expect("a singleton tree has a root");
        SearchTreeSnapshot {
            sub_snapshot: a.borrow().snapshot(),
            split_snapshot: self.split.borrow().snapshot(),
            sub: Rc::clone(a),
        }
    }

    fn restore(&mut self, snapshot: &Self::Snapshot) {
        let a = Rc::clone(&snapshot.sub);
        a.borrow_mut().restore(&snapshot.sub_snapshot);
        self.split.borrow_mut().restore(&snapshot.split_snapshot);
        self.stack.clear();
        self.root = (a.borrow().snapshot(), self.split.borrow().snapshot());
        self.root_tells.clear();
        self.a = Some(a);
    }

    /// The current node is eligible for extraction.
    fn is_extractable(&self) -> bool {
        !self.is_bot()
            && self
                .a
                .as_ref()
                .expect("the tree is not bot")
                .borrow()
                .is_extractable()
    }
}

impl<A> Extract<IntervalStore> for SearchTree<A>
where
    A: AbstractDomain + Extract<IntervalStore>,
{
    fn extract(&self, target: &mut IntervalStore) -> bool {
        match &self.a {
            Some(a) => a.borrow().extract(target),
            None => false,
        }
    }
}

/// Extraction into another search tree: the under-approximation is the
/// singleton tree holding the extracted node.
impl<A> Extract<SearchTree<A>> for SearchTree<A>
where
    A: AbstractDomain + Extract<A>,
{
    fn extract(&self, target: &mut SearchTree<A>) -> bool {
        let Some(a) = &self.a else {
            return false;
        };
        let target_a = target
            .a
            .as_ref()
            .expect("the target tree holds a node to extract into");
        arbor_assert_simple!(
            !Rc::ptr_eq(a, target_a),
            "extraction requires an independently cloned target"
        );
        let extracted = a.borrow().extract(&mut target_a.borrow_mut());
        target.stack.clear();
        target.root_tells.clear();
        extracted
    }
}

impl<A> CloneWith for SearchTree<A>
where
    A: AbstractDomain + CloneWith + 'static,
{
    fn clone_with(&self, tracker: &mut CopyTracker) -> Self {
        SearchTree {
            aty: self.aty,
            a: self.a.as_ref().map(|a| tracker.clone_shared(a)),
            split: tracker.clone_shared(&self.split),
            stack: self.stack.clone(),
            root: (self.root.0.clone(), self.root.1),
            root_tells: self.root_tells.clone(),
        }
    }
}
