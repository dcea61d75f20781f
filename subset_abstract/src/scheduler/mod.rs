//! The inference loop: a single-threaded cooperative scheduler.
//!
//! Work is expressed as `'static` local futures spawned on the loop. A task
//! suspends only when it waits on an unresolved [`Pending`]. When every task
//! is suspended, the loop forces one pending by running its resolver:
//!
//! 1. Candidates are unresolved pendings that have a resolver and at least
//!    one suspended waiter.
//! 2. The candidate with the highest priority wins. A pending without a
//!    priority ranks below every prioritized one.
//! 3. Ties go to the pending registered first.
//!
//! If no candidate exists the loop reports a deadlock. The number of forced
//! resolutions per loop is bounded by
//! [`InferenceConfig::max_forced_resolutions`].

mod pending;

pub use pending::{Pending, PendingFuture};

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use futures_util::future::{FutureExt, LocalBoxFuture};
use futures_util::task::{waker, ArcWake};

use crate::abstract_value::Slot;
use crate::config::InferenceConfig;
use crate::diagnostics::{emit_deadlock, emit_forced_resolution};
use crate::error::{InferResult, InferenceError};

type ReadyQueue = Arc<Mutex<VecDeque<usize>>>;

struct TaskWaker {
    task: usize,
    ready: ReadyQueue,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if let Ok(mut queue) = arc_self.ready.lock() {
            if !queue.contains(&arc_self.task) {
                queue.push_back(arc_self.task);
            }
        }
    }
}

struct LoopInner {
    config: InferenceConfig,
    tasks: RefCell<HashMap<usize, LocalBoxFuture<'static, InferResult<()>>>>,
    ready: ReadyQueue,
    /// One waker per suspended task, so pendings can dedupe registrations.
    wakers: RefCell<HashMap<usize, Waker>>,
    pendings: RefCell<Vec<Pending>>,
    next_task: Cell<usize>,
    next_pending: Cell<usize>,
    forced: Cell<usize>,
    errors: RefCell<Vec<InferenceError>>,
}

/// Handle onto an inference loop. Clones share the same loop.
#[derive(Clone)]
pub struct InferenceLoop {
    inner: Rc<LoopInner>,
}

/// Non-owning handle, for tasks that must not keep their loop alive.
#[derive(Clone)]
pub struct WeakLoop(Weak<LoopInner>);

impl WeakLoop {
    pub fn upgrade(&self) -> Option<InferenceLoop> {
        self.0.upgrade().map(|inner| InferenceLoop { inner })
    }
}

impl fmt::Debug for WeakLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakLoop")
    }
}

impl Default for InferenceLoop {
    fn default() -> Self {
        Self::new(InferenceConfig::default())
    }
}

impl InferenceLoop {
    pub fn new(config: InferenceConfig) -> Self {
        InferenceLoop {
            inner: Rc::new(LoopInner {
                config,
                tasks: RefCell::new(HashMap::new()),
                ready: Arc::new(Mutex::new(VecDeque::new())),
                wakers: RefCell::new(HashMap::new()),
                pendings: RefCell::new(Vec::new()),
                next_task: Cell::new(0),
                next_pending: Cell::new(0),
                forced: Cell::new(0),
                errors: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.inner.config
    }

    pub fn downgrade(&self) -> WeakLoop {
        WeakLoop(Rc::downgrade(&self.inner))
    }

    /// Register a pending resolved by `resolve` when the loop forces it.
    ///
    /// `priority` is consulted only when the loop has to choose which
    /// blocked pending to force.
    pub fn create_pending<R, P>(&self, resolve: R, priority: P) -> Pending
    where
        R: FnOnce() -> InferResult<Slot> + 'static,
        P: Fn() -> Option<i64> + 'static,
    {
        self.register(Some(Box::new(resolve)), Some(Box::new(priority)))
    }

    /// Register a pending that only [`Pending::set_result`] can resolve.
    pub fn create_placeholder(&self) -> Pending {
        self.register(None, None)
    }

    fn register(
        &self,
        resolver: Option<pending::Resolver>,
        priority: Option<pending::PriorityFn>,
    ) -> Pending {
        let id = self.inner.next_pending.get();
        self.inner.next_pending.set(id + 1);
        let p = Pending::new(id, resolver, priority);
        self.inner.pendings.borrow_mut().push(p.clone());
        log::trace!("created pending #{}", id);
        p
    }

    /// Schedule a task. It first runs on the next call that drives the loop.
    pub fn spawn<F>(&self, task: F) -> usize
    where
        F: Future<Output = InferResult<()>> + 'static,
    {
        let id = self.inner.next_task.get();
        self.inner.next_task.set(id + 1);
        self.inner.tasks.borrow_mut().insert(id, task.boxed_local());
        self.schedule(id);
        id
    }

    fn schedule(&self, task: usize) {
        if let Ok(mut queue) = self.inner.ready.lock() {
            if !queue.contains(&task) {
                queue.push_back(task);
            }
        }
    }

    fn task_waker(&self, task: usize) -> Waker {
        self.inner
            .wakers
            .borrow_mut()
            .entry(task)
            .or_insert_with(|| {
                waker(Arc::new(TaskWaker {
                    task,
                    ready: Arc::clone(&self.inner.ready),
                }))
            })
            .clone()
    }

    fn pop_ready(&self) -> Option<usize> {
        self.inner.ready.lock().ok().and_then(|mut queue| queue.pop_front())
    }

    /// Poll every runnable task until none is runnable.
    ///
    /// Returns whether any task was polled. Task errors are recorded and
    /// surface from the next [`InferenceLoop::run`].
    pub fn run_ready(&self) -> bool {
        let mut progressed = false;
        while let Some(id) = self.pop_ready() {
            // The task leaves the table while it runs so it can spawn.
            let task = self.inner.tasks.borrow_mut().remove(&id);
            let Some(mut task) = task else {
                continue;
            };
            progressed = true;
            let task_waker = self.task_waker(id);
            let mut cx = Context::from_waker(&task_waker);
            match task.as_mut().poll(&mut cx) {
                Poll::Ready(result) => {
                    self.inner.wakers.borrow_mut().remove(&id);
                    if let Err(err) = result {
                        log::debug!("task {} failed: {}", id, err);
                        self.inner.errors.borrow_mut().push(err);
                    }
                }
                Poll::Pending => {
                    self.inner.tasks.borrow_mut().insert(id, task);
                }
            }
        }
        progressed
    }

    fn take_error(&self) -> Option<InferenceError> {
        let mut errors = self.inner.errors.borrow_mut();
        if errors.is_empty() {
            None
        } else {
            Some(errors.remove(0))
        }
    }

    fn drive(&self, done: &dyn Fn() -> bool) -> InferResult<()> {
        loop {
            self.run_ready();
            if let Some(err) = self.take_error() {
                return Err(err);
            }
            if done() || self.inner.tasks.borrow().is_empty() {
                return Ok(());
            }
            self.force_next()?;
        }
    }

    /// Run until every task has completed, forcing pendings as needed.
    pub fn run(&self) -> InferResult<()> {
        self.drive(&|| false)
    }

    /// Spawn `fut` and drive the loop until it completes.
    pub fn run_until_complete<T, F>(&self, fut: F) -> InferResult<T>
    where
        T: 'static,
        F: Future<Output = InferResult<T>> + 'static,
    {
        let output: Rc<RefCell<Option<InferResult<T>>>> = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&output);
        self.spawn(async move {
            let result = fut.await;
            *sink.borrow_mut() = Some(result);
            Ok(())
        });
        self.drive(&|| output.borrow().is_some())?;
        let result = output.borrow_mut().take();
        match result {
            Some(result) => result,
            None => Err(self.deadlock()),
        }
    }

    /// Resolve `p` now, running its resolver directly if it has one.
    pub fn force(&self, p: &Pending) -> InferResult<Slot> {
        if let Some(slot) = p.result() {
            return Ok(slot);
        }
        if let Some(err) = p.error() {
            return Err(err);
        }
        if p.is_resolving() {
            // The resolver of `p` needs `p` itself.
            emit_deadlock(&[p.id()]);
            return Err(InferenceError::Deadlock {
                blocked: vec![p.id()],
            });
        }
        if p.has_resolver() {
            self.resolve(p)?;
        } else {
            self.drive(&|| !p.is_open())?;
        }
        match (p.result(), p.error()) {
            (Some(slot), _) => Ok(slot),
            (None, Some(err)) => Err(err),
            (None, None) => Err(self.deadlock()),
        }
    }

    /// Declare that no further information will arrive.
    ///
    /// Runs the loop to completion, then forces every remaining pending in
    /// priority order. Pendings that still cannot be resolved are reported
    /// as a deadlock.
    pub fn finish(&self) -> InferResult<()> {
        self.run()?;
        while let Some(p) = self.pick(|p| p.has_resolver()) {
            self.charge_forced(&p)?;
            self.resolve(&p)?;
            self.run()?;
        }
        let unresolved = self.unresolved_ids();
        if unresolved.is_empty() {
            Ok(())
        } else {
            emit_deadlock(&unresolved);
            Err(InferenceError::Deadlock {
                blocked: unresolved,
            })
        }
    }

    /// Force the best blocked pending.
    fn force_next(&self) -> InferResult<()> {
        let Some(p) = self.pick(|p| p.has_resolver() && p.has_waiters()) else {
            return Err(self.deadlock());
        };
        self.charge_forced(&p)?;
        self.resolve(&p)
    }

    fn pick(&self, eligible: impl Fn(&Pending) -> bool) -> Option<Pending> {
        // Priority functions may register pendings of their own.
        let pendings: Vec<Pending> = self.inner.pendings.borrow().clone();
        pendings
            .iter()
            .filter(|p| p.is_open() && !p.is_resolving() && eligible(p))
            .max_by_key(|p| (p.priority(), Reverse(p.id())))
            .cloned()
    }

    fn charge_forced(&self, p: &Pending) -> InferResult<()> {
        let forced = self.inner.forced.get();
        if forced >= self.inner.config.max_forced_resolutions {
            log::debug!(
                "forced-resolution budget of {} exhausted",
                self.inner.config.max_forced_resolutions
            );
            return Err(self.deadlock());
        }
        self.inner.forced.set(forced + 1);
        let priority = p.priority();
        log::debug!("forcing pending #{} (priority {:?})", p.id(), priority);
        emit_forced_resolution(p.id(), priority);
        Ok(())
    }

    fn resolve(&self, p: &Pending) -> InferResult<()> {
        let Some(resolver) = p.take_resolver() else {
            return Ok(());
        };
        match resolver() {
            Ok(slot) => {
                // A task may have resolved `p` while its resolver ran.
                if p.is_open() {
                    p.set_result(slot)?;
                }
                log::trace!("resolved pending #{}", p.id());
                Ok(())
            }
            Err(err) => {
                p.fail(err.clone());
                Err(InferenceError::ResolverFailed {
                    pending: p.id(),
                    source: Box::new(err),
                })
            }
        }
    }

    fn unresolved_ids(&self) -> Vec<usize> {
        self.inner
            .pendings
            .borrow()
            .iter()
            .filter(|p| p.is_open())
            .map(Pending::id)
            .collect()
    }

    fn deadlock(&self) -> InferenceError {
        let blocked: Vec<usize> = self
            .inner
            .pendings
            .borrow()
            .iter()
            .filter(|p| p.is_open() && p.has_waiters())
            .map(Pending::id)
            .collect();
        emit_deadlock(&blocked);
        InferenceError::Deadlock { blocked }
    }

    /// Number of pendings forced so far.
    pub fn forced_count(&self) -> usize {
        self.inner.forced.get()
    }

    /// Number of tasks that have not completed.
    pub fn task_count(&self) -> usize {
        self.inner.tasks.borrow().len()
    }
}

impl fmt::Debug for InferenceLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceLoop")
            .field("config", &self.inner.config)
            .field("tasks", &self.task_count())
            .field("pendings", &self.inner.pendings.borrow().len())
            .field("forced", &self.forced_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_run_until_complete_plain_future() {
        let lp = InferenceLoop::default();
        let out = lp.run_until_complete(async { Ok(41 + 1) }).unwrap();
        assert_eq!(out, 42);
    }

    #[test]
    fn test_waiting_task_forces_pending() {
        let lp = InferenceLoop::default();
        let p = lp.create_pending(|| Ok(Slot::from(7i64)), || None);
        let waited = p.clone();
        let slot = lp
            .run_until_complete(async move { waited.wait().await })
            .unwrap();
        assert_eq!(slot, Slot::from(7i64));
        assert_eq!(lp.forced_count(), 1);
    }

    #[test]
    fn test_set_result_wakes_waiter() {
        let lp = InferenceLoop::default();
        let p = lp.create_placeholder();
        let waited = p.clone();
        let done = Rc::new(Cell::new(false));
        let flag = Rc::clone(&done);
        lp.spawn(async move {
            waited.wait().await?;
            flag.set(true);
            Ok(())
        });
        lp.run_ready();
        assert!(!done.get());
        p.set_result(Value::Int(3)).unwrap();
        lp.run().unwrap();
        assert!(done.get());
    }

    #[test]
    fn test_repolled_task_registers_once() {
        let lp = InferenceLoop::default();
        let p = lp.create_placeholder();
        let q = lp.create_placeholder();
        let (wp, wq) = (p.clone(), q.clone());
        lp.spawn(async move {
            let (a, b) = futures_util::future::join(wp.wait(), wq.wait()).await;
            a?;
            b?;
            Ok(())
        });
        lp.run_ready();
        assert_eq!(p.waiter_count(), 1);

        // Resolving `q` polls the task again, which polls `p` again.
        q.set_result(Value::Int(1)).unwrap();
        assert!(lp.run_ready());
        assert_eq!(p.waiter_count(), 1);

        p.set_result(Value::Int(2)).unwrap();
        lp.run().unwrap();
        assert_eq!(lp.task_count(), 0);
        assert!(lp.inner.wakers.borrow().is_empty());
    }

    #[test]
    fn test_highest_priority_forced_first() {
        let lp = InferenceLoop::default();
        let order = Rc::new(RefCell::new(Vec::new()));

        let log_a = Rc::clone(&order);
        let a = lp.create_pending(
            move || {
                log_a.borrow_mut().push("a");
                Ok(Slot::Anything)
            },
            || Some(1),
        );
        let log_b = Rc::clone(&order);
        let b = lp.create_pending(
            move || {
                log_b.borrow_mut().push("b");
                Ok(Slot::Anything)
            },
            || Some(5),
        );

        let (wa, wb) = (a.clone(), b.clone());
        lp.run_until_complete(async move {
            wa.wait().await?;
            wb.wait().await?;
            Ok(())
        })
        .unwrap();
        // Only `a` is awaited first, so it is the only candidate.
        assert_eq!(*order.borrow(), vec!["a", "b"]);

        order.borrow_mut().clear();
        let lp = InferenceLoop::default();
        let log_c = Rc::clone(&order);
        let c = lp.create_pending(
            move || {
                log_c.borrow_mut().push("c");
                Ok(Slot::Anything)
            },
            || Some(1),
        );
        let log_d = Rc::clone(&order);
        let d = lp.create_pending(
            move || {
                log_d.borrow_mut().push("d");
                Ok(Slot::Anything)
            },
            || Some(5),
        );
        lp.spawn(async move { c.wait().await.map(|_| ()) });
        lp.spawn(async move { d.wait().await.map(|_| ()) });
        lp.run().unwrap();
        assert_eq!(*order.borrow(), vec!["d", "c"]);
    }

    #[test]
    fn test_ties_go_to_first_registered() {
        let lp = InferenceLoop::default();
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut pendings = Vec::new();
        for name in ["first", "second", "third"] {
            let log = Rc::clone(&order);
            pendings.push(lp.create_pending(
                move || {
                    log.borrow_mut().push(name);
                    Ok(Slot::Anything)
                },
                || None,
            ));
        }
        for p in pendings.into_iter().rev() {
            lp.spawn(async move { p.wait().await.map(|_| ()) });
        }
        lp.run().unwrap();
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unforceable_wait_is_a_deadlock() {
        let lp = InferenceLoop::default();
        let p = lp.create_placeholder();
        let id = p.id();
        let err = lp
            .run_until_complete(async move { p.wait().await })
            .unwrap_err();
        assert!(matches!(err, InferenceError::Deadlock { ref blocked } if blocked == &vec![id]));
        assert!(err.is_fatal_to_run());
    }

    #[test]
    fn test_resolver_runs_once() {
        let lp = InferenceLoop::default();
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let p = lp.create_pending(
            move || {
                counter.set(counter.get() + 1);
                Ok(Slot::from(1i64))
            },
            || None,
        );
        assert_eq!(lp.force(&p).unwrap(), Slot::from(1i64));
        assert_eq!(lp.force(&p).unwrap(), Slot::from(1i64));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_resolver_failure_is_reported() {
        let lp = InferenceLoop::default();
        let p = lp.create_pending(
            || Err(InferenceError::InvalidConstruction("boom".to_string())),
            || None,
        );
        let err = lp.force(&p).unwrap_err();
        assert!(matches!(err, InferenceError::ResolverFailed { pending: 0, .. }));
        assert!(p.is_failed());
    }

    #[test]
    fn test_self_dependent_resolver_deadlocks() {
        let lp = InferenceLoop::default();
        let slot: Rc<RefCell<Option<Pending>>> = Rc::new(RefCell::new(None));
        let inner_slot = Rc::clone(&slot);
        let inner_loop = lp.downgrade();
        let p = lp.create_pending(
            move || {
                let lp = inner_loop.upgrade().ok_or(InferenceError::UnboundPending)?;
                let me = inner_slot
                    .borrow()
                    .clone()
                    .ok_or(InferenceError::UnboundPending)?;
                lp.force(&me)
            },
            || None,
        );
        *slot.borrow_mut() = Some(p.clone());
        let err = lp.force(&p).unwrap_err();
        let InferenceError::ResolverFailed { source, .. } = err else {
            panic!("expected a resolver failure, got {:?}", err);
        };
        assert!(matches!(*source, InferenceError::Deadlock { .. }));
    }

    #[test]
    fn test_finish_forces_leftovers_and_reports_placeholders() {
        let lp = InferenceLoop::default();
        let forced = lp.create_pending(|| Ok(Slot::Anything), || Some(0));
        lp.finish().unwrap();
        assert!(forced.is_resolved());

        let stuck = lp.create_placeholder();
        let err = lp.finish().unwrap_err();
        assert!(matches!(err, InferenceError::Deadlock { ref blocked } if blocked == &vec![stuck.id()]));
    }

    #[test]
    fn test_forced_budget() {
        let config = InferenceConfig {
            max_forced_resolutions: 1,
            ..InferenceConfig::default()
        };
        let lp = InferenceLoop::new(config);
        let a = lp.create_pending(|| Ok(Slot::Anything), || None);
        let b = lp.create_pending(|| Ok(Slot::Anything), || None);
        let err = lp
            .run_until_complete(async move {
                a.wait().await?;
                b.wait().await
            })
            .unwrap_err();
        assert!(matches!(err, InferenceError::Deadlock { .. }));
    }
}
