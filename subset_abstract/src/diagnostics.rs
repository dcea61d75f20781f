//! Diagnostics for precision loss during inference.
//!
//! Inference silently gives up precision in a few places: a relaxed merge
//! widens a VALUE to `ANYTHING`, two scalar types fall back to `Any`, a
//! possibility set grows past its limit, or the loop forces a pending by
//! priority because nothing else can progress. Those events are recorded
//! here so a driver can explain why a value ended up less precise than
//! expected.
//!
//! # Usage
//!
//! Collection is disabled by default. Enable it with
//! [`DiagnosticsCollector::enable`], run inference, then retrieve the events
//! with [`DiagnosticsCollector::take`]. Every event is also sent to the `log`
//! facade at `debug` level regardless of collection.

use std::cell::RefCell;

use crate::widening::MAX_POSSIBILITIES;

/// Why inference lost precision.
#[derive(Clone, Debug, PartialEq)]
pub enum DiagnosticReason {
    /// Two different concrete values were merged into `ANYTHING`.
    /// Contains the rendered operands.
    WidenedToAnything(String, String),

    /// Two different scalar types were merged into `Any`.
    TypeWidened(String, String),

    /// A possibility set exceeded the configured maximum.
    /// Contains the size it would have had.
    PossibilitiesTooLarge(usize),

    /// The loop forced a pending because nothing else could progress.
    ForcedResolution { pending: usize, priority: Option<i64> },

    /// The loop gave up with these pendings still blocked.
    DeadlockDetected(Vec<usize>),
}

impl std::fmt::Display for DiagnosticReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosticReason::WidenedToAnything(a, b) => {
                write!(f, "values {} and {} widened to ANYTHING", a, b)
            }
            DiagnosticReason::TypeWidened(a, b) => {
                write!(f, "types {} and {} widened to Any", a, b)
            }
            DiagnosticReason::PossibilitiesTooLarge(n) => {
                write!(
                    f,
                    "possibility set has {} candidates (default max {})",
                    n, MAX_POSSIBILITIES
                )
            }
            DiagnosticReason::ForcedResolution { pending, priority } => match priority {
                Some(p) => write!(f, "forced pending #{} (priority {})", pending, p),
                None => write!(f, "forced pending #{} (no priority)", pending),
            },
            DiagnosticReason::DeadlockDetected(ids) => {
                let ids: Vec<String> = ids.iter().map(|id| format!("#{}", id)).collect();
                write!(f, "deadlock: {}", ids.join(", "))
            }
        }
    }
}

/// A single inference diagnostic.
#[derive(Clone, Debug)]
pub struct InferenceDiagnostic {
    pub reason: DiagnosticReason,
}

impl InferenceDiagnostic {
    pub fn new(reason: DiagnosticReason) -> Self {
        Self { reason }
    }
}

impl std::fmt::Display for InferenceDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "inference: {}", self.reason)
    }
}

thread_local! {
    static DIAGNOSTICS_ENABLED: RefCell<bool> = const { RefCell::new(false) };
    static DIAGNOSTICS: RefCell<Vec<InferenceDiagnostic>> = const { RefCell::new(Vec::new()) };
}

/// Thread-local collector for inference diagnostics.
#[derive(Debug)]
pub struct DiagnosticsCollector;

impl DiagnosticsCollector {
    pub fn enable() {
        DIAGNOSTICS_ENABLED.with(|enabled| {
            *enabled.borrow_mut() = true;
        });
    }

    pub fn disable() {
        DIAGNOSTICS_ENABLED.with(|enabled| {
            *enabled.borrow_mut() = false;
        });
    }

    pub fn is_enabled() -> bool {
        DIAGNOSTICS_ENABLED.with(|enabled| *enabled.borrow())
    }

    /// Record a diagnostic (if enabled) and log it.
    pub fn emit(diagnostic: InferenceDiagnostic) {
        log::debug!("{}", diagnostic);
        if Self::is_enabled() {
            DIAGNOSTICS.with(|diags| {
                diags.borrow_mut().push(diagnostic);
            });
        }
    }

    /// Take all collected diagnostics, clearing the collection.
    pub fn take() -> Vec<InferenceDiagnostic> {
        DIAGNOSTICS.with(|diags| std::mem::take(&mut *diags.borrow_mut()))
    }

    pub fn clear() {
        DIAGNOSTICS.with(|diags| {
            diags.borrow_mut().clear();
        });
    }

    pub fn count() -> usize {
        DIAGNOSTICS.with(|diags| diags.borrow().len())
    }
}

pub fn emit_widened_to_anything(left: &dyn std::fmt::Display, right: &dyn std::fmt::Display) {
    DiagnosticsCollector::emit(InferenceDiagnostic::new(
        DiagnosticReason::WidenedToAnything(left.to_string(), right.to_string()),
    ));
}

pub fn emit_type_widened(left: &dyn std::fmt::Display, right: &dyn std::fmt::Display) {
    DiagnosticsCollector::emit(InferenceDiagnostic::new(DiagnosticReason::TypeWidened(
        left.to_string(),
        right.to_string(),
    )));
}

pub fn emit_possibilities_too_large(size: usize) {
    DiagnosticsCollector::emit(InferenceDiagnostic::new(
        DiagnosticReason::PossibilitiesTooLarge(size),
    ));
}

pub fn emit_forced_resolution(pending: usize, priority: Option<i64>) {
    DiagnosticsCollector::emit(InferenceDiagnostic::new(
        DiagnosticReason::ForcedResolution { pending, priority },
    ));
}

pub fn emit_deadlock(blocked: &[usize]) {
    DiagnosticsCollector::emit(InferenceDiagnostic::new(
        DiagnosticReason::DeadlockDetected(blocked.to_vec()),
    ));
}
