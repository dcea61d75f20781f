//! Shared constructors for integration tests
// Each test target uses a different subset of these helpers.
#![allow(dead_code)]

use subset_abstract::*;

/// Scalar with a known value and its natural type.
pub fn s(v: impl Into<Value>) -> AbstractValue {
    let v = v.into();
    let ty = v.type_of();
    AbstractValue::scalar(v, ty).expect("literal fits its own type")
}

/// Scalar with a known value and an explicit type.
pub fn s_of(v: impl Into<Value>, ty: Type) -> AbstractValue {
    AbstractValue::scalar(v.into(), ty).expect("value fits type")
}

/// Scalar of a type, value unknown.
pub fn s_ty(ty: Type) -> AbstractValue {
    AbstractValue::any_of(ty)
}

/// Scalar whose VALUE is one of `values`.
pub fn poss(values: &[i64]) -> AbstractValue {
    let p = Possibilities::values(values.iter().copied()).expect("non-empty possibilities");
    AbstractValue::scalar(p, Type::I64).expect("integers fit Int[64]")
}

pub fn t(items: Vec<AbstractValue>) -> AbstractValue {
    AbstractValue::tuple(items)
}

pub fn l(element: AbstractValue) -> AbstractValue {
    AbstractValue::list(element)
}

pub fn u(members: Vec<AbstractValue>) -> AbstractValue {
    abstract_union(members).expect("non-empty union")
}

pub fn prim(name: &str) -> FunctionRef {
    FunctionRef::primitive(name)
}

/// Function value over the given references.
pub fn f(refs: Vec<FunctionRef>) -> AbstractValue {
    AbstractValue::functions(refs).expect("function references")
}

/// Rewrites every integer scalar to `Int[64]`.
#[derive(Debug, Default)]
pub struct Upcast;

fn upcast_scalar(av: &AbstractValue, value: &Slot, ty: &Type) -> InferResult<AbstractValue> {
    match ty {
        Type::Int(bits) if *bits != 64 => AbstractValue::scalar(value.clone(), Type::I64),
        _ => Ok(av.clone()),
    }
}

impl CloneVariant for Upcast {
    fn scalar(
        &mut self,
        _cx: &mut CloneContext,
        av: &AbstractValue,
        value: &Slot,
        ty: &Type,
    ) -> InferResult<AbstractValue> {
        upcast_scalar(av, value, ty)
    }
}

impl AsyncCloneVariant for Upcast {
    async fn scalar(
        &mut self,
        cx: &mut AsyncCloneContext,
        av: &AbstractValue,
        value: &Slot,
        ty: &Type,
    ) -> InferResult<AbstractValue> {
        let waited = AsyncCloneVariant::slot(self, cx, value).await?;
        if waited.same_as(value) {
            upcast_scalar(av, value, ty)
        } else {
            let ty = match ty {
                Type::Int(_) => Type::I64,
                other => other.clone(),
            };
            AbstractValue::scalar(waited, ty)
        }
    }
}

pub fn upcast(av: &AbstractValue) -> AbstractValue {
    abstract_clone(&mut Upcast, av).expect("upcast")
}
