//! Inference loop behavior as seen by a driver: tasks waiting on each
//! other, forced resolution, and failure reporting.

mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::*;
use pretty_assertions::assert_eq;
use subset_abstract::diagnostics::{DiagnosticReason, DiagnosticsCollector};
use subset_abstract::*;

#[test]
fn test_mutual_dependency_broken_by_priority() {
    let lp = InferenceLoop::default();
    let low = lp.create_pending(|| Ok(ANYTHING), || Some(1));
    let high = lp.create_pending(|| Ok(Slot::from(0i64)), || Some(10));

    // Each task publishes what it learned from the other.
    let (wait_high, set_low) = (high.clone(), low.clone());
    lp.spawn(async move {
        let known = wait_high.wait().await?;
        if set_low.is_open() {
            set_low.set_result(known)?;
        }
        Ok(())
    });
    let (wait_low, set_high) = (low.clone(), high.clone());
    lp.spawn(async move {
        let known = wait_low.wait().await?;
        if set_high.is_open() {
            set_high.set_result(known)?;
        }
        Ok(())
    });

    lp.run().unwrap();
    assert_eq!(high.result(), Some(Slot::from(0i64)));
    assert_eq!(low.result(), Some(Slot::from(0i64)));
    assert_eq!(lp.forced_count(), 1);
    assert_eq!(lp.task_count(), 0);
}

#[test]
fn test_shared_pending_resolved_once() {
    let lp = InferenceLoop::default();
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let p = lp.create_pending(
        move || {
            counter.set(counter.get() + 1);
            Ok(Slot::from(2.5))
        },
        || None,
    );

    let seen = Rc::new(Cell::new(0));
    for _ in 0..3 {
        let (p, seen) = (p.clone(), Rc::clone(&seen));
        lp.spawn(async move {
            let slot = p.wait().await?;
            assert_eq!(slot, Slot::from(2.5));
            seen.set(seen.get() + 1);
            Ok(())
        });
    }
    lp.run().unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(seen.get(), 3);
}

#[test]
fn test_placeholders_nobody_sets_deadlock() {
    let lp = InferenceLoop::default();
    let a = lp.create_placeholder();
    let b = lp.create_placeholder();
    let ids = vec![a.id(), b.id()];
    lp.spawn(async move { a.wait().await.map(|_| ()) });
    lp.spawn(async move { b.wait().await.map(|_| ()) });

    let err = lp.run().unwrap_err();
    let InferenceError::Deadlock { blocked } = err else {
        panic!("expected a deadlock, got {:?}", err);
    };
    assert_eq!(blocked, ids);
}

#[test]
fn test_resolver_failure_surfaces_to_driver() {
    let lp = InferenceLoop::default();
    let p = lp.create_pending(
        || Err(InferenceError::InvalidConstruction("no candidates".to_string())),
        || None,
    );
    let waited = p.clone();
    let err = lp
        .run_until_complete(async move { waited.wait().await })
        .unwrap_err();
    let InferenceError::ResolverFailed { pending, source } = err else {
        panic!("expected a resolver failure, got {:?}", err);
    };
    assert_eq!(pending, p.id());
    assert!(matches!(*source, InferenceError::InvalidConstruction(_)));
    assert!(p.is_failed());
    assert!(!p.is_open());
}

#[test]
fn test_forced_resolution_is_diagnosed() {
    DiagnosticsCollector::enable();
    DiagnosticsCollector::clear();

    let lp = InferenceLoop::default();
    let p = lp.create_pending(|| Ok(Slot::from(true)), || Some(3));
    let id = p.id();
    lp.run_until_complete(async move { p.wait().await }).unwrap();

    let diags = DiagnosticsCollector::take();
    DiagnosticsCollector::disable();
    assert_eq!(diags.len(), 1);
    assert_eq!(
        diags[0].reason,
        DiagnosticReason::ForcedResolution {
            pending: id,
            priority: Some(3)
        }
    );
}

#[test]
fn test_finish_forces_by_priority() {
    let lp = InferenceLoop::default();
    let order = Rc::new(std::cell::RefCell::new(Vec::new()));
    for (name, priority) in [("none", None), ("two", Some(2)), ("seven", Some(7))] {
        let log = Rc::clone(&order);
        lp.create_pending(
            move || {
                log.borrow_mut().push(name);
                Ok(ANYTHING)
            },
            move || priority,
        );
    }
    lp.finish().unwrap();
    assert_eq!(*order.borrow(), vec!["seven", "two", "none"]);
}

#[test]
fn test_forced_budget_from_toml() {
    let config = InferenceConfig::from_toml_str("max_forced_resolutions = 1").unwrap();
    let lp = InferenceLoop::new(config);
    let a = lp.create_pending(|| Ok(ANYTHING), || None);
    let b = lp.create_pending(|| Ok(ANYTHING), || None);
    let err = lp
        .run_until_complete(async move {
            a.wait().await?;
            b.wait().await
        })
        .unwrap_err();
    assert!(err.is_fatal_to_run());
    assert_eq!(lp.forced_count(), 1);
}

#[test]
fn test_merges_of_pendings_settle_after_run() {
    let lp = InferenceLoop::default();
    let pa = lp.create_placeholder();
    let pb = lp.create_placeholder();
    let a = AbstractValue::scalar(pa.clone(), Type::I64).unwrap();
    let b = AbstractValue::scalar(pb.clone(), Type::I64).unwrap();
    let merged = amerge(&t(vec![a, s(1i64)]), &t(vec![b, s(1i64)]), Some(&lp), false).unwrap();

    pa.set_result(1i64).unwrap();
    pb.set_result(2i64).unwrap();
    lp.run().unwrap();
    assert_eq!(merged.to_string(), "T(S(TYPE=Int[64]), S(VALUE=1, TYPE=Int[64]))");
}

#[test]
fn test_weak_loop_does_not_keep_loop_alive() {
    let lp = InferenceLoop::default();
    let weak = lp.downgrade();
    assert!(weak.upgrade().is_some());
    drop(lp);
    assert!(weak.upgrade().is_none());
}
