//! Placeholder values resolved by the inference loop.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::abstract_value::Slot;
use crate::error::{InferResult, InferenceError};

pub(crate) type Resolver = Box<dyn FnOnce() -> InferResult<Slot>>;
pub(crate) type PriorityFn = Box<dyn Fn() -> Option<i64>>;

enum PendingState {
    Unresolved,
    /// The resolver is running.
    Resolving,
    Resolved(Slot),
    Failed(InferenceError),
}

struct PendingCell {
    id: usize,
    state: RefCell<PendingState>,
    resolver: RefCell<Option<Resolver>>,
    priority: Option<PriorityFn>,
    wakers: RefCell<Vec<Waker>>,
}

/// A value that is not known yet.
///
/// Clones share the same cell: resolving a pending is observed through
/// every abstract value that embeds it. Equality is identity.
#[derive(Clone)]
pub struct Pending(Rc<PendingCell>);

impl Pending {
    pub(crate) fn new(id: usize, resolver: Option<Resolver>, priority: Option<PriorityFn>) -> Self {
        Pending(Rc::new(PendingCell {
            id,
            state: RefCell::new(PendingState::Unresolved),
            resolver: RefCell::new(resolver),
            priority,
            wakers: RefCell::new(Vec::new()),
        }))
    }

    pub fn id(&self) -> usize {
        self.0.id
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.0.state.borrow(), PendingState::Resolved(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.0.state.borrow(), PendingState::Failed(_))
    }

    pub(crate) fn is_resolving(&self) -> bool {
        matches!(*self.0.state.borrow(), PendingState::Resolving)
    }

    /// Neither resolved nor failed.
    pub fn is_open(&self) -> bool {
        matches!(
            *self.0.state.borrow(),
            PendingState::Unresolved | PendingState::Resolving
        )
    }

    /// The resolved VALUE, if any.
    pub fn result(&self) -> Option<Slot> {
        match &*self.0.state.borrow() {
            PendingState::Resolved(slot) => Some(slot.clone()),
            _ => None,
        }
    }

    pub(crate) fn error(&self) -> Option<InferenceError> {
        match &*self.0.state.borrow() {
            PendingState::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Resolve this pending. A pending is resolved at most once; its resolver
    /// will not run afterwards.
    pub fn set_result(&self, value: impl Into<Slot>) -> InferResult<()> {
        let value = value.into();
        if !self.is_open() {
            return Err(InferenceError::AlreadyResolved { pending: self.id() });
        }
        if let Slot::Pending(p) = &value {
            if p.ptr_eq(self) {
                return Err(InferenceError::InvalidConstruction(format!(
                    "pending #{} cannot resolve to itself",
                    self.id()
                )));
            }
        }
        self.0.resolver.borrow_mut().take();
        *self.0.state.borrow_mut() = PendingState::Resolved(value);
        self.wake_all();
        Ok(())
    }

    pub(crate) fn fail(&self, err: InferenceError) {
        self.0.resolver.borrow_mut().take();
        *self.0.state.borrow_mut() = PendingState::Failed(err);
        self.wake_all();
    }

    pub(crate) fn take_resolver(&self) -> Option<Resolver> {
        let resolver = self.0.resolver.borrow_mut().take();
        if resolver.is_some() {
            *self.0.state.borrow_mut() = PendingState::Resolving;
        }
        resolver
    }

    pub(crate) fn has_resolver(&self) -> bool {
        self.0.resolver.borrow().is_some()
    }

    /// Current priority; `None` when no priority function was given.
    pub fn priority(&self) -> Option<i64> {
        self.0.priority.as_ref().and_then(|f| f())
    }

    /// Whether some task is suspended on this pending.
    pub fn has_waiters(&self) -> bool {
        !self.0.wakers.borrow().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.0.wakers.borrow().len()
    }

    /// Future resolving to this pending's VALUE.
    pub fn wait(&self) -> PendingFuture {
        PendingFuture {
            pending: self.clone(),
        }
    }

    pub fn ptr_eq(&self, other: &Pending) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn wake_all(&self) {
        let wakers = std::mem::take(&mut *self.0.wakers.borrow_mut());
        for waker in wakers {
            waker.wake();
        }
    }

    fn register(&self, waker: &Waker) {
        let mut wakers = self.0.wakers.borrow_mut();
        if !wakers.iter().any(|w| w.will_wake(waker)) {
            wakers.push(waker.clone());
        }
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Pending {}

impl Hash for Pending {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0.state.borrow() {
            PendingState::Unresolved => write!(f, "Pending#{}", self.id()),
            PendingState::Resolving => write!(f, "Pending#{}(resolving)", self.id()),
            PendingState::Resolved(slot) => write!(f, "Pending#{}({:?})", self.id(), slot),
            PendingState::Failed(err) => write!(f, "Pending#{}(failed: {})", self.id(), err),
        }
    }
}

/// Future returned by [`Pending::wait`].
#[derive(Debug)]
pub struct PendingFuture {
    pending: Pending,
}

impl Future for PendingFuture {
    type Output = InferResult<Slot>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(slot) = self.pending.result() {
            return Poll::Ready(Ok(slot));
        }
        if let Some(err) = self.pending.error() {
            return Poll::Ready(Err(err));
        }
        self.pending.register(cx.waker());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::task::noop_waker_ref;

    #[test]
    fn test_set_result_once() {
        let p = Pending::new(0, None, None);
        assert!(!p.is_resolved());
        p.set_result(1234i64).unwrap();
        assert!(p.is_resolved());
        assert!(matches!(p.result(), Some(Slot::Value(_))));
        assert!(matches!(
            p.set_result(5i64),
            Err(InferenceError::AlreadyResolved { pending: 0 })
        ));
    }

    #[test]
    fn test_cannot_resolve_to_itself() {
        let p = Pending::new(1, None, None);
        assert!(p.set_result(Slot::Pending(p.clone())).is_err());
        assert!(!p.is_resolved());
    }

    #[test]
    fn test_wait_registers_and_completes() {
        let p = Pending::new(2, None, Some(Box::new(|| Some(3))));
        assert_eq!(p.priority(), Some(3));

        let mut fut = p.wait();
        let mut cx = Context::from_waker(noop_waker_ref());
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());
        assert!(p.has_waiters());

        p.set_result(true).unwrap();
        assert!(!p.has_waiters());
        assert!(matches!(
            Pin::new(&mut fut).poll(&mut cx),
            Poll::Ready(Ok(Slot::Value(_)))
        ));
    }

    #[test]
    fn test_taking_resolver_marks_resolving() {
        let p = Pending::new(3, Some(Box::new(|| Ok(Slot::Anything))), None);
        assert!(p.has_resolver());
        let resolver = p.take_resolver().unwrap();
        assert!(p.is_resolving());
        assert!(p.take_resolver().is_none());
        p.set_result(resolver().unwrap()).unwrap();
        assert!(p.is_resolved());
    }
}
