//! Type-erased callback delegate (C1).
//!
//! A [`Handler`] carries a debug name and a zero/one/two-argument callback.
//! Equality is by name, matching the original design's "same debug name ⇒
//! same handler" contract used for `isScheduled`/`cancelEvent` lookups.
//! Arguments to one/two-arg handlers are type-erased through `Box<dyn Any>`
//! and downcast at the call site — the safe equivalent of the original's
//! raw function-pointer-plus-`void*` delegate.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Arity of a [`Handler`]'s callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Zero,
    One,
    Two,
}

enum HandlerFn {
    Zero(Rc<RefCell<dyn FnMut()>>),
    One(Rc<RefCell<dyn FnMut(&dyn Any)>>),
    Two(Rc<RefCell<dyn FnMut(&dyn Any, &dyn Any)>>),
}

impl Clone for HandlerFn {
    fn clone(&self) -> Self {
        match self {
            HandlerFn::Zero(f) => HandlerFn::Zero(f.clone()),
            HandlerFn::One(f) => HandlerFn::One(f.clone()),
            HandlerFn::Two(f) => HandlerFn::Two(f.clone()),
        }
    }
}

/// A type-erased, cheaply-cloneable callback reference.
///
/// Cloning a `Handler` shares the same underlying closure (via `Rc`), so
/// every copy invokes the same state — the "copyable and nothrow-movable"
/// requirement is satisfied by reference counting rather than duplicating
/// the closure's captured state.
#[derive(Clone)]
pub struct Handler {
    name: Rc<str>,
    func: HandlerFn,
}

impl Handler {
    /// Build a zero-argument handler.
    pub fn new0<F: FnMut() + 'static>(name: impl Into<Rc<str>>, f: F) -> Self {
        Self {
            name: name.into(),
            func: HandlerFn::Zero(Rc::new(RefCell::new(f))),
        }
    }

    /// Build a one-argument handler. The argument is downcast to `T` at
    /// invocation time; a mismatched type is a programming error and panics,
    /// the same way a bad `reinterpret_cast` in the original would corrupt
    /// state silently — we prefer a loud failure.
    pub fn new1<T: 'static, F: FnMut(&T) + 'static>(name: impl Into<Rc<str>>, mut f: F) -> Self {
        let wrapped = move |arg: &dyn Any| {
            let typed = arg
                .downcast_ref::<T>()
                .expect("Handler::new1 invoked with mismatched payload type");
            f(typed);
        };
        Self {
            name: name.into(),
            func: HandlerFn::One(Rc::new(RefCell::new(wrapped))),
        }
    }

    /// Build a two-argument handler.
    pub fn new2<T: 'static, U: 'static, F: FnMut(&T, &U) + 'static>(
        name: impl Into<Rc<str>>,
        mut f: F,
    ) -> Self {
        let wrapped = move |a: &dyn Any, b: &dyn Any| {
            let ta = a
                .downcast_ref::<T>()
                .expect("Handler::new2 invoked with mismatched first payload type");
            let tb = b
                .downcast_ref::<U>()
                .expect("Handler::new2 invoked with mismatched second payload type");
            f(ta, tb);
        };
        Self {
            name: name.into(),
            func: HandlerFn::Two(Rc::new(RefCell::new(wrapped))),
        }
    }

    /// Debug name, used for diagnostics and equality.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Arity of the underlying callback.
    pub fn arity(&self) -> Arity {
        match self.func {
            HandlerFn::Zero(_) => Arity::Zero,
            HandlerFn::One(_) => Arity::One,
            HandlerFn::Two(_) => Arity::Two,
        }
    }

    /// Invoke a zero-argument handler. Panics if arity doesn't match.
    pub fn invoke0(&self) {
        match &self.func {
            HandlerFn::Zero(f) => (f.borrow_mut())(),
            _ => panic!("Handler '{}' invoked with wrong arity (expected 0)", self.name),
        }
    }

    /// Invoke a one-argument handler.
    pub fn invoke1(&self, arg: &dyn Any) {
        match &self.func {
            HandlerFn::One(f) => (f.borrow_mut())(arg),
            _ => panic!("Handler '{}' invoked with wrong arity (expected 1)", self.name),
        }
    }

    /// Invoke a two-argument handler.
    pub fn invoke2(&self, a: &dyn Any, b: &dyn Any) {
        match &self.func {
            HandlerFn::Two(f) => (f.borrow_mut())(a, b),
            _ => panic!("Handler '{}' invoked with wrong arity (expected 2)", self.name),
        }
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for Handler {}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("arity", &self.arity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn zero_arg_invokes_shared_state() {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let h = Handler::new0("tick", move || c.set(c.get() + 1));
        let h2 = h.clone();
        h.invoke0();
        h2.invoke0();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn equality_is_by_name() {
        let a = Handler::new0("same", || {});
        let b = Handler::new0("same", || {});
        let c = Handler::new0("different", || {});
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn one_arg_downcasts() {
        let seen = Rc::new(Cell::new(0u32));
        let s = seen.clone();
        let h = Handler::new1::<u32, _>("payload", move |v: &u32| s.set(*v));
        h.invoke1(&42u32);
        assert_eq!(seen.get(), 42);
    }

    #[test]
    #[should_panic(expected = "wrong arity")]
    fn wrong_arity_panics() {
        let h = Handler::new0("z", || {});
        h.invoke1(&1u32);
    }
}
