//! Broadening: forget known constants, keep types and shapes.
//!
//! Used between fixpoint iterations so that inference does not specialize
//! forever on the constant seen in one iteration.

use crate::abstract_value::{AbstractValue, Slot};
use crate::clone::{abstract_clone, CloneContext, CloneVariant};
use crate::error::InferResult;
use crate::types::Type;

impl Slot {
    /// A known constant becomes `ANYTHING`. Possibility sets and unresolved
    /// pendings are kept as they are.
    pub fn broaden(&self) -> Slot {
        match self.resolved() {
            Slot::Value(_) => Slot::Anything,
            _ => self.clone(),
        }
    }
}

/// Clone variant applying [`Slot::broaden`] to every scalar.
///
/// Function values are left alone: which functions may be called is not a
/// constant to forget.
#[derive(Debug, Default, Clone, Copy)]
pub struct Broaden;

impl CloneVariant for Broaden {
    fn scalar(
        &mut self,
        _cx: &mut CloneContext,
        av: &AbstractValue,
        value: &Slot,
        ty: &Type,
    ) -> InferResult<AbstractValue> {
        let broad = value.broaden();
        if broad.same_as(value) {
            Ok(av.clone())
        } else {
            AbstractValue::scalar(broad, ty.clone())
        }
    }

    fn function(
        &mut self,
        _cx: &mut CloneContext,
        av: &AbstractValue,
        _slot: &Slot,
    ) -> InferResult<AbstractValue> {
        Ok(av.clone())
    }
}

/// Broaden `av`.
pub fn broaden(av: &AbstractValue) -> InferResult<AbstractValue> {
    abstract_clone(&mut Broaden, av)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstract_value::Possibilities;
    use crate::scheduler::InferenceLoop;

    #[test]
    fn test_constant_becomes_anything() {
        let one = AbstractValue::scalar(1i64, Type::I64).unwrap();
        let out = broaden(&one).unwrap();
        assert!(out.ptr_eq(&AbstractValue::any_of(Type::I64)));
    }

    #[test]
    fn test_already_broad_is_identity() {
        let t = AbstractValue::tuple(vec![
            AbstractValue::any_of(Type::F32),
            AbstractValue::ty(Type::I64),
        ]);
        assert!(broaden(&t).unwrap().ptr_eq(&t));
    }

    #[test]
    fn test_possibilities_are_kept() {
        let p = Slot::from(Possibilities::values([1i64, 2]).unwrap());
        assert!(p.broaden().same_as(&p));
    }

    #[test]
    fn test_pendings() {
        let lp = InferenceLoop::default();
        let open = Slot::from(lp.create_placeholder());
        assert!(open.broaden().same_as(&open));

        let done = lp.create_placeholder();
        done.set_result(3i64).unwrap();
        assert!(Slot::from(done).broaden().is_anything());
    }
}
