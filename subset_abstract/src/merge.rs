//! Merging two descriptions of the same program point.
//!
//! `amerge(a, b, lp, forced)` reconciles `a`, the description already known
//! for a site, with `b`, a new observation of it.
//!
//! - **relaxed** (`forced = false`): widen to a description covering both
//! - **forced** (`forced = true`): `b` must already be covered by `a`; the
//!   result is then `a` itself, otherwise the merge fails
//!
//! Whenever nothing changes the left operand is returned as-is, so callers
//! can detect convergence with `ptr_eq`. Structural mismatches (tuple
//! length, array shape, record tag or fields, variant) fail in both modes.
//!
//! # Lattice
//!
//! ```text
//!              ANYTHING
//!            /    |     \
//!   Possibilities{..}    ...      (relaxed union, widened past a limit)
//!       /     \
//!    Value   Value
//! ```
//!
//! Only numeric constants widen to `ANYTHING` when two of them differ.
//! Other constants (strings, types, records) must agree.

use crate::abstract_value::{
    abstract_union, AbstractKind, AbstractValue, Candidate, ErrorReason, Possibilities, Slot,
};
use crate::config::InferenceConfig;
use crate::diagnostics::{
    emit_possibilities_too_large, emit_type_widened, emit_widened_to_anything,
};
use crate::error::{InferResult, InferenceError};
use crate::scheduler::InferenceLoop;
use crate::types::Type;

/// Environment of a merge.
#[derive(Debug)]
pub struct MergeContext<'a> {
    lp: Option<&'a InferenceLoop>,
    config: InferenceConfig,
}

impl<'a> MergeContext<'a> {
    pub fn new(lp: Option<&'a InferenceLoop>) -> Self {
        let config = lp.map(|l| *l.config()).unwrap_or_default();
        Self { lp, config }
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }
}

/// Types that can be merged.
pub trait Merge: Sized {
    fn merge(a: &Self, b: &Self, cx: &MergeContext<'_>, forced: bool) -> InferResult<Self>;
}

/// Merge `b` into `a`.
///
/// `lp` is needed only when an operand holds an unresolved pending; without
/// a loop such a merge fails with [`InferenceError::UnboundPending`].
pub fn amerge<T: Merge>(a: &T, b: &T, lp: Option<&InferenceLoop>, forced: bool) -> InferResult<T> {
    T::merge(a, b, &MergeContext::new(lp), forced)
}

impl Merge for AbstractValue {
    fn merge(a: &Self, b: &Self, cx: &MergeContext<'_>, forced: bool) -> InferResult<Self> {
        if a.ptr_eq(b) || a == b {
            return Ok(a.clone());
        }
        use AbstractKind::*;
        match (a.kind(), b.kind()) {
            (Error(ErrorReason::Dead), _) => {
                if forced {
                    Err(InferenceError::mismatch(
                        a.clone(),
                        b.clone(),
                        "cannot force a live value into a dead one",
                    ))
                } else {
                    Ok(b.clone())
                }
            }
            (_, Error(ErrorReason::Dead)) => Ok(a.clone()),

            (Scalar { value: v1, ty: t1 }, Scalar { value: v2, ty: t2 }) => {
                let ty = Type::merge(t1, t2, cx, forced)?;
                let value = Slot::merge(v1, v2, cx, forced)?;
                if ty == *t1 && value.same_as(v1) {
                    return Ok(a.clone());
                }
                AbstractValue::scalar(value, ty)
            }

            (Tuple(xs), Tuple(ys)) => {
                if xs.len() != ys.len() {
                    return Err(InferenceError::mismatch(
                        a.clone(),
                        b.clone(),
                        "tuple lengths differ",
                    ));
                }
                let items = merge_all(xs, ys, cx, forced)?;
                Ok(rebuild(a, xs, items, AbstractValue::tuple))
            }

            (List(x), List(y)) => {
                let element = AbstractValue::merge(x, y, cx, forced)?;
                Ok(if element.ptr_eq(x) {
                    a.clone()
                } else {
                    AbstractValue::list(element)
                })
            }

            (
                Array {
                    element: x,
                    shape: s1,
                },
                Array {
                    element: y,
                    shape: s2,
                },
            ) => {
                if s1 != s2 {
                    return Err(InferenceError::mismatch(
                        a.clone(),
                        b.clone(),
                        "array shapes differ",
                    ));
                }
                let element = AbstractValue::merge(x, y, cx, forced)?;
                Ok(if element.ptr_eq(x) {
                    a.clone()
                } else {
                    AbstractValue::array(element, s1.clone())
                })
            }

            (Class { tag: t1, fields: f1 }, Class { tag: t2, fields: f2 }) => {
                if t1 != t2 {
                    return Err(InferenceError::mismatch(
                        a.clone(),
                        b.clone(),
                        "record tags differ",
                    ));
                }
                let same_fields = f1.len() == f2.len()
                    && f1.iter().all(|(n, _)| f2.iter().any(|(m, _)| m == n));
                if !same_fields {
                    return Err(InferenceError::mismatch(
                        a.clone(),
                        b.clone(),
                        "record fields differ",
                    ));
                }
                let mut changed = false;
                let mut fields = Vec::with_capacity(f1.len());
                for (name, x) in f1 {
                    let y = f2
                        .iter()
                        .find(|(m, _)| m == name)
                        .map(|(_, y)| y)
                        .ok_or_else(|| {
                            InferenceError::mismatch(a.clone(), b.clone(), "record fields differ")
                        })?;
                    let merged = AbstractValue::merge(x, y, cx, forced)?;
                    changed |= !merged.ptr_eq(x);
                    fields.push((name.clone(), merged));
                }
                if changed {
                    AbstractValue::class(t1.clone(), fields)
                } else {
                    Ok(a.clone())
                }
            }

            (Union(_), _) | (_, Union(_)) => merge_union(a, b, cx, forced),

            (TaggedUnion(xs), TaggedUnion(ys)) => {
                let mut changed = false;
                let mut options = xs.clone();
                for (tag, y) in ys {
                    match options.iter_mut().find(|(t, _)| t == tag) {
                        Some((_, x)) => {
                            let merged = AbstractValue::merge(x, y, cx, forced)?;
                            changed |= !merged.ptr_eq(x);
                            *x = merged;
                        }
                        None if forced => {
                            return Err(InferenceError::mismatch(
                                a.clone(),
                                b.clone(),
                                format!("tag {} is not an option of the left operand", tag),
                            ))
                        }
                        None => {
                            changed = true;
                            options.push((*tag, y.clone()));
                        }
                    }
                }
                if changed {
                    AbstractValue::tagged_union(options)
                } else {
                    Ok(a.clone())
                }
            }

            (Function(s1), Function(s2)) => {
                let merged = Slot::merge(s1, s2, cx, forced)?;
                if merged.same_as(s1) {
                    Ok(a.clone())
                } else {
                    AbstractValue::function(merged)
                }
            }

            (JTagged(x), JTagged(y)) => {
                let inner = AbstractValue::merge(x, y, cx, forced)?;
                Ok(if inner.ptr_eq(x) {
                    a.clone()
                } else {
                    AbstractValue::jtagged(inner)
                })
            }

            (Ty(_), Ty(_)) => Err(InferenceError::mismatch(
                a.clone(),
                b.clone(),
                "type values differ",
            )),

            (Error(_), Error(_)) => Err(InferenceError::mismatch(
                a.clone(),
                b.clone(),
                "error reasons differ",
            )),

            _ => Err(InferenceError::mismatch(
                a.clone(),
                b.clone(),
                "different kinds of abstract value",
            )),
        }
    }
}

fn merge_all(
    xs: &[AbstractValue],
    ys: &[AbstractValue],
    cx: &MergeContext<'_>,
    forced: bool,
) -> InferResult<Vec<AbstractValue>> {
    xs.iter()
        .zip(ys)
        .map(|(x, y)| AbstractValue::merge(x, y, cx, forced))
        .collect()
}

/// `a` when every merged child is the left child, else a rebuilt value.
fn rebuild(
    a: &AbstractValue,
    old: &[AbstractValue],
    new: Vec<AbstractValue>,
    build: impl FnOnce(Vec<AbstractValue>) -> AbstractValue,
) -> AbstractValue {
    if old.iter().zip(&new).all(|(x, y)| x.ptr_eq(y)) {
        a.clone()
    } else {
        build(new)
    }
}

fn union_members(av: &AbstractValue) -> Vec<AbstractValue> {
    match av.kind() {
        AbstractKind::Union(members) => members.clone(),
        _ => vec![av.clone()],
    }
}

/// Each right member must be absorbed by some left member: a forced merge
/// into it gives back that member unchanged. In relaxed mode a member
/// nobody absorbs is appended; in forced mode it is an error.
fn merge_union(
    a: &AbstractValue,
    b: &AbstractValue,
    cx: &MergeContext<'_>,
    forced: bool,
) -> InferResult<AbstractValue> {
    // Trial merges must not defer work to the loop.
    let trial = MergeContext {
        lp: None,
        config: cx.config,
    };
    let mut members = union_members(a);
    let mut added = false;
    for member in union_members(b) {
        let absorbed = members.iter().any(|m| {
            AbstractValue::merge(m, &member, &trial, true).is_ok_and(|merged| merged.ptr_eq(m))
        });
        if absorbed {
            continue;
        }
        if forced {
            return Err(InferenceError::mismatch(
                a.clone(),
                b.clone(),
                "union has members the left operand does not cover",
            ));
        }
        members.push(member);
        added = true;
    }
    if added {
        abstract_union(members)
    } else {
        Ok(a.clone())
    }
}

impl Merge for Type {
    fn merge(a: &Self, b: &Self, _cx: &MergeContext<'_>, forced: bool) -> InferResult<Self> {
        if a == b || *a == Type::Any {
            return Ok(a.clone());
        }
        if forced {
            return Err(InferenceError::mismatch(a.clone(), b.clone(), "types differ"));
        }
        log::trace!("widening types {} and {} to Any", a, b);
        emit_type_widened(a, b);
        Ok(Type::Any)
    }
}

/// A resolved, non-pending slot viewed as a candidate set.
fn as_possibilities(slot: &Slot) -> InferResult<Possibilities> {
    match slot {
        Slot::Possibilities(p) => Ok(p.clone()),
        Slot::Value(v) => Possibilities::new([Candidate::Value(v.clone())]),
        other => Err(InferenceError::InvalidConstruction(format!(
            "{} is not a candidate set",
            other
        ))),
    }
}

impl Merge for Slot {
    fn merge(a: &Self, b: &Self, cx: &MergeContext<'_>, forced: bool) -> InferResult<Self> {
        let ra = a.resolved();
        let rb = b.resolved();
        match (&ra, &rb) {
            (Slot::Anything, _) => return Ok(a.clone()),
            (Slot::Pending(pa), Slot::Pending(pb)) if pa.ptr_eq(pb) => return Ok(a.clone()),
            (Slot::Pending(_), _) | (_, Slot::Pending(_)) => {
                return bind_pending(ra, rb, cx, forced)
            }
            _ => {}
        }
        match (&ra, &rb) {
            (Slot::Anything, _) => Ok(a.clone()),
            (_, Slot::Anything) => {
                if forced {
                    Err(InferenceError::mismatch(
                        ra,
                        rb,
                        "cannot force ANYTHING into a known value",
                    ))
                } else {
                    Ok(Slot::Anything)
                }
            }
            (Slot::Value(x), Slot::Value(y)) => {
                if x == y {
                    Ok(a.clone())
                } else if forced {
                    Err(InferenceError::mismatch(ra, rb, "values differ"))
                } else if x.is_widenable() && y.is_widenable() {
                    log::trace!("widening values {} and {} to ANYTHING", x, y);
                    emit_widened_to_anything(x, y);
                    Ok(Slot::Anything)
                } else {
                    Err(InferenceError::mismatch(
                        ra,
                        rb,
                        "constants of this kind cannot be widened",
                    ))
                }
            }
            _ => {
                let p = as_possibilities(&ra)?;
                let q = as_possibilities(&rb)?;
                if q.is_subset(&p) {
                    Ok(a.clone())
                } else if forced {
                    Err(InferenceError::mismatch(
                        ra,
                        rb,
                        "possibilities are not a subset of the left operand",
                    ))
                } else if p.is_subset(&q) {
                    Ok(b.clone())
                } else {
                    let union = p.union(&q);
                    let all_values = union.value_count() == union.len();
                    if all_values && union.len() > cx.config.max_possibilities {
                        log::trace!(
                            "possibility set of {} widened to ANYTHING",
                            union.len()
                        );
                        emit_possibilities_too_large(union.len());
                        Ok(Slot::Anything)
                    } else {
                        Ok(Slot::Possibilities(union))
                    }
                }
            }
        }
    }
}

impl Merge for Possibilities {
    fn merge(a: &Self, b: &Self, _cx: &MergeContext<'_>, forced: bool) -> InferResult<Self> {
        if b.is_subset(a) {
            Ok(a.clone())
        } else if forced {
            Err(InferenceError::mismatch(
                Slot::Possibilities(a.clone()),
                Slot::Possibilities(b.clone()),
                "possibilities are not a subset of the left operand",
            ))
        } else if a.is_subset(b) {
            Ok(b.clone())
        } else {
            Ok(a.union(b))
        }
    }
}

/// Merge where one side is still pending: defer the merge to a task on the
/// loop and return a pending standing for its result.
///
/// If the loop forces that pending before the task finishes, it resolves to
/// the known operand broadened, and the task later checks the real merge
/// against it with a forced merge.
fn bind_pending(a: Slot, b: Slot, cx: &MergeContext<'_>, forced: bool) -> InferResult<Slot> {
    let lp = cx.lp.ok_or(InferenceError::UnboundPending)?;

    let (ra, rb) = (a.clone(), b.clone());
    let (pa, pb) = (a.unresolved_pending(), b.unresolved_pending());
    let result = lp.create_pending(
        move || match (ra.resolved(), rb.resolved()) {
            (Slot::Pending(x), Slot::Pending(y)) => Err(InferenceError::Deadlock {
                blocked: vec![x.id(), y.id()],
            }),
            (Slot::Pending(_), known) | (known, _) => Ok(known.broaden()),
        },
        move || {
            let pa = pa.as_ref().and_then(|p| p.priority());
            let pb = pb.as_ref().and_then(|p| p.priority());
            pa.max(pb)
        },
    );
    log::trace!("merge deferred to pending #{}", result.id());

    let weak = lp.downgrade();
    let out = result.clone();
    lp.spawn(async move {
        let va = a.wait().await?;
        let vb = b.wait().await?;
        let lp = weak.upgrade().ok_or(InferenceError::UnboundPending)?;
        let merged = amerge(&va, &vb, Some(&lp), forced)?;
        match out.result() {
            Some(existing) => {
                amerge(&existing, &merged, Some(&lp), true)?;
            }
            None => out.set_result(merged)?,
        }
        Ok(())
    });
    Ok(Slot::Pending(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_type_merge() {
        assert_eq!(amerge(&Type::I64, &Type::I64, None, true).unwrap(), Type::I64);
        assert_eq!(amerge(&Type::Any, &Type::F32, None, true).unwrap(), Type::Any);
        assert_eq!(amerge(&Type::I64, &Type::F32, None, false).unwrap(), Type::Any);
        assert!(amerge(&Type::I64, &Type::F32, None, true)
            .unwrap_err()
            .is_type_error());
    }

    #[test]
    fn test_numeric_values_widen() {
        let a = Slot::from(1i64);
        let b = Slot::from(2i64);
        assert_eq!(amerge(&a, &b, None, false).unwrap(), Slot::Anything);
        assert!(amerge(&a, &b, None, true).is_err());
    }

    #[test]
    fn test_string_values_never_widen() {
        let a = Slot::from("hello");
        let b = Slot::from("world");
        assert!(amerge(&a, &b, None, false).is_err());
        assert!(amerge(&a, &b, None, true).is_err());
    }

    #[test]
    fn test_possibility_limit() {
        let lp = InferenceLoop::new(InferenceConfig {
            max_possibilities: 3,
            ..InferenceConfig::default()
        });
        let a = Slot::from(Possibilities::values([1i64, 2]).unwrap());
        let b = Slot::from(Possibilities::values([3i64]).unwrap());
        let c = Slot::from(Possibilities::values([4i64]).unwrap());
        let abc = amerge(&a, &b, Some(&lp), false).unwrap();
        assert!(matches!(abc, Slot::Possibilities(ref p) if p.len() == 3));
        assert_eq!(amerge(&abc, &c, Some(&lp), false).unwrap(), Slot::Anything);
    }

    #[test]
    fn test_unresolved_pending_needs_loop() {
        let lp = InferenceLoop::default();
        let p = lp.create_placeholder();
        let err = amerge(&Slot::from(p), &Slot::from(1i64), None, false).unwrap_err();
        assert!(matches!(err, InferenceError::UnboundPending));
    }

    #[test]
    fn test_pending_merge_resolves_after_operands() {
        let lp = InferenceLoop::default();
        let p = lp.create_placeholder();
        let merged = amerge(&Slot::from(p.clone()), &Slot::from(2i64), Some(&lp), false).unwrap();
        let Slot::Pending(out) = merged.clone() else {
            panic!("expected a pending, got {:?}", merged);
        };
        assert!(!out.is_resolved());

        p.set_result(Value::Int(1)).unwrap();
        lp.run().unwrap();
        assert_eq!(out.result(), Some(Slot::Anything));
        assert_eq!(merged.resolved(), Slot::Anything);
    }

    #[test]
    fn test_same_pending_merges_to_itself() {
        let lp = InferenceLoop::default();
        let p = Slot::from(lp.create_placeholder());
        let merged = amerge(&p, &p.clone(), None, true).unwrap();
        assert!(merged.same_as(&p));
    }
}
