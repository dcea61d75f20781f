//! Function references: the candidates of a `Function` abstract value.

use std::hash::{Hash, Hasher};

use super::structural;
use super::AbstractValue;
use crate::types::{FunctionSig, Type};
use crate::widening::CYCLIC_HASH_DEPTH;

/// A primitive operation, identified by name.
///
/// The signature, when present, is what [`crate::projection::build_type_fn`]
/// reports for a bare reference to the primitive.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Primitive {
    pub name: String,
    pub signature: Option<FunctionSig>,
}

impl Primitive {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signature: None,
        }
    }

    pub fn with_signature(name: impl Into<String>, args: Vec<Type>, ret: Type) -> Self {
        Self {
            name: name.into(),
            signature: Some(FunctionSig {
                args,
                ret: Box::new(ret),
            }),
        }
    }
}

/// One function a `Function` abstract value may refer to.
#[derive(Clone, Debug)]
pub enum FunctionRef {
    /// Bare primitive.
    Primitive(Primitive),
    /// Primitive specialized to explicit argument and output descriptions.
    TypedPrimitive {
        prim: Primitive,
        args: Vec<AbstractValue>,
        output: AbstractValue,
    },
    /// `func` with its leading arguments bound.
    Partial {
        func: Box<FunctionRef>,
        args: Vec<AbstractValue>,
    },
    /// A function known only by its argument and output descriptions.
    Virtual {
        args: Vec<AbstractValue>,
        output: AbstractValue,
    },
    /// A user graph.
    Graph { name: String },
}

impl FunctionRef {
    pub fn primitive(name: impl Into<String>) -> Self {
        FunctionRef::Primitive(Primitive::new(name))
    }

    pub fn typed(prim: Primitive, args: Vec<AbstractValue>, output: AbstractValue) -> Self {
        FunctionRef::TypedPrimitive { prim, args, output }
    }

    pub fn partial(func: FunctionRef, args: Vec<AbstractValue>) -> Self {
        FunctionRef::Partial {
            func: Box::new(func),
            args,
        }
    }

    pub fn virtual_fn(args: Vec<AbstractValue>, output: AbstractValue) -> Self {
        FunctionRef::Virtual { args, output }
    }

    pub fn graph(name: impl Into<String>) -> Self {
        FunctionRef::Graph { name: name.into() }
    }

    pub(crate) fn collect_children(&self, out: &mut Vec<AbstractValue>) {
        match self {
            FunctionRef::Primitive(_) | FunctionRef::Graph { .. } => {}
            FunctionRef::TypedPrimitive { args, output, .. }
            | FunctionRef::Virtual { args, output } => {
                out.extend(args.iter().cloned());
                out.push(output.clone());
            }
            FunctionRef::Partial { func, args } => {
                func.collect_children(out);
                out.extend(args.iter().cloned());
            }
        }
    }
}

impl PartialEq for FunctionRef {
    fn eq(&self, other: &Self) -> bool {
        structural::function_ref_eq(self, other, &mut structural::Seen::new())
    }
}

impl Eq for FunctionRef {}

impl Hash for FunctionRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        structural::hash_function_ref(self, CYCLIC_HASH_DEPTH, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_children_include_inner_function() {
        let i64s = AbstractValue::any_of(Type::I64);
        let f = FunctionRef::partial(
            FunctionRef::virtual_fn(vec![i64s.clone(), i64s.clone()], i64s.clone()),
            vec![i64s.clone()],
        );
        let mut children = Vec::new();
        f.collect_children(&mut children);
        assert_eq!(children.len(), 4);
        assert!(children.iter().all(|c| c.ptr_eq(&i64s)));
    }

    #[test]
    fn test_equality_is_structural() {
        let a = FunctionRef::typed(
            Primitive::new("scalar_add"),
            vec![AbstractValue::any_of(Type::F64)],
            AbstractValue::any_of(Type::F64),
        );
        let b = FunctionRef::typed(
            Primitive::new("scalar_add"),
            vec![AbstractValue::any_of(Type::F64)],
            AbstractValue::any_of(Type::F64),
        );
        assert_eq!(a, b);
        assert_ne!(a, FunctionRef::primitive("scalar_add"));
        assert_ne!(FunctionRef::graph("f"), FunctionRef::graph("g"));
    }
}
