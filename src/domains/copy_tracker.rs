use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::containers::HashMap;

/// Sharing-preserving cloning of a domain composition.
///
/// Implementors clone their owned state directly and route every shared
/// sub-domain pointer through [`CopyTracker::clone_shared`], so that
/// pointers which were shared in the original (e.g. the store observed by
/// both the split strategy and the search tree) remain shared in the copy.
pub trait CloneWith: Sized {
    fn clone_with(&self, tracker: &mut CopyTracker) -> Self;
}

/// Keyed map from original pointer identity to its clone.
///
/// One tracker spans one cloning operation: reusing it across unrelated
/// clones would alias their sub-domains.
#[derive(Default)]
pub struct CopyTracker {
    copies: HashMap<usize, Box<dyn Any>>,
}

impl CopyTracker {
    pub fn new() -> CopyTracker {
        CopyTracker::default()
    }

    /// Clones `original`, returning the previously-made clone when the same
    /// pointer was already seen by this tracker.
    pub fn clone_shared<T: CloneWith + 'static>(
        &mut self,
        original: &Rc<RefCell<T>>,
    ) -> Rc<RefCell<T>> {
        let key = Rc::as_ptr(original) as usize;
        if let Some(existing) = self.copies.get(&key) {
            return existing
                .downcast_ref::<Rc<RefCell<T>>>()
                .expect("a tracked pointer is always re-requested at its original type")
                .clone();
        }
        let copy = Rc::new(RefCell::new(original.borrow().clone_with(self)));
        let _ = self.copies.insert(key, Box::new(Rc::clone(&copy)));
        copy
    }
}

impl std::fmt::Debug for CopyTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyTracker")
            .field("tracked", &self.copies.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Leaf(i32);

    impl CloneWith for Leaf {
        fn clone_with(&self, _: &mut CopyTracker) -> Self {
            self.clone()
        }
    }

    #[test]
    fn shared_pointers_stay_shared() {
        let leaf = Rc::new(RefCell::new(Leaf(7)));
        let mut tracker = CopyTracker::new();

        let first = tracker.clone_shared(&leaf);
        let second = tracker.clone_shared(&leaf);

        assert!(Rc::ptr_eq(&first, &second));
        assert!(!Rc::ptr_eq(&first, &leaf));

        leaf.borrow_mut().0 = 9;
        assert_eq!(first.borrow().0, 7);
    }

    #[test]
    fn distinct_trackers_produce_distinct_clones() {
        let leaf = Rc::new(RefCell::new(Leaf(1)));
        let first = CopyTracker::new().clone_shared(&leaf);
        let second = CopyTracker::new().clone_shared(&leaf);
        assert!(!Rc::ptr_eq(&first, &second));
    }
}
