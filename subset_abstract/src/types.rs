//! Concrete type descriptors.
//!
//! A [`Type`] is what the TYPE track of a scalar holds and what
//! [`crate::projection::build_type_fn`] projects an abstract value onto.
//! Types are plain values: equality is structural and they order totally,
//! which lets unions live in a `BTreeSet` and stay canonical regardless of
//! construction order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{InferResult, InferenceError};

/// A concrete type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Type {
    /// Signed integer of the given bit width.
    Int(u8),
    /// Unsigned integer of the given bit width.
    UInt(u8),
    /// Floating point number of the given bit width.
    Float(u8),
    Bool,
    Nil,
    String,
    /// Type of symbolic keys (environment keys used by gradients).
    SymbolicKey,
    /// Type of a value that is itself a type.
    TypeType,
    /// Unknown type; the relaxed merge of two different scalar types.
    Any,

    Tuple(Vec<Type>),
    List(Box<Type>),
    Array(Box<Type>),
    /// Nominal record type, identified by its tag.
    Class(String),
    JTagged(Box<Type>),

    /// Function type. `None` is the generic `Function` whose signature is
    /// not known.
    Function(Option<FunctionSig>),

    /// Union of at least two distinct non-union types.
    Union(BTreeSet<Type>),
}

/// Argument and return types of a function.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionSig {
    pub args: Vec<Type>,
    pub ret: Box<Type>,
}

impl Type {
    pub const I8: Type = Type::Int(8);
    pub const I16: Type = Type::Int(16);
    pub const I32: Type = Type::Int(32);
    pub const I64: Type = Type::Int(64);
    pub const U8: Type = Type::UInt(8);
    pub const U64: Type = Type::UInt(64);
    pub const F16: Type = Type::Float(16);
    pub const F32: Type = Type::Float(32);
    pub const F64: Type = Type::Float(64);

    /// Function type with a known signature.
    pub fn function(args: Vec<Type>, ret: Type) -> Type {
        Type::Function(Some(FunctionSig {
            args,
            ret: Box::new(ret),
        }))
    }

    /// Build a union type.
    ///
    /// Nested unions are flattened and duplicates removed. A union of a single
    /// type is that type. An empty union is rejected.
    pub fn union(options: impl IntoIterator<Item = Type>) -> InferResult<Type> {
        let mut members = BTreeSet::new();
        for option in options {
            match option {
                Type::Union(inner) => members.extend(inner),
                other => {
                    members.insert(other);
                }
            }
        }
        match members.len() {
            0 => Err(InferenceError::InvalidConstruction(
                "union of no types".to_string(),
            )),
            1 => Ok(members.into_iter().next().unwrap_or(Type::Any)),
            _ => Ok(Type::Union(members)),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, types: &[Type]) -> fmt::Result {
    for (i, ty) in types.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", ty)?;
    }
    Ok(())
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int(bits) => write!(f, "Int[{}]", bits),
            Type::UInt(bits) => write!(f, "UInt[{}]", bits),
            Type::Float(bits) => write!(f, "Float[{}]", bits),
            Type::Bool => write!(f, "Bool"),
            Type::Nil => write!(f, "Nil"),
            Type::String => write!(f, "String"),
            Type::SymbolicKey => write!(f, "SymbolicKeyType"),
            Type::TypeType => write!(f, "TypeType"),
            Type::Any => write!(f, "Any"),
            Type::Tuple(elements) => {
                write!(f, "Tuple[")?;
                write_list(f, elements)?;
                write!(f, "]")
            }
            Type::List(element) => write!(f, "List[{}]", element),
            Type::Array(element) => write!(f, "Array[{}]", element),
            Type::Class(tag) => write!(f, "{}", tag),
            Type::JTagged(inner) => write!(f, "JTagged[{}]", inner),
            Type::Function(None) => write!(f, "Function"),
            Type::Function(Some(sig)) => {
                write!(f, "Function[[")?;
                write_list(f, &sig.args)?;
                write!(f, "], {}]", sig.ret)
            }
            Type::Union(members) => {
                write!(f, "Union[")?;
                for (i, ty) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", ty)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_of_one_is_the_type() {
        assert_eq!(Type::union([Type::I64]).unwrap(), Type::I64);
        assert_eq!(Type::union([Type::I64, Type::I64]).unwrap(), Type::I64);
    }

    #[test]
    fn test_union_flattens_and_ignores_order() {
        let flat = Type::union([Type::I64, Type::I32, Type::I16]).unwrap();
        let nested = Type::union([
            Type::I16,
            Type::union([Type::I64, Type::I32]).unwrap(),
        ])
        .unwrap();
        assert_eq!(flat, nested);
        let Type::Union(members) = &flat else {
            panic!("expected a union, got {}", flat);
        };
        assert_eq!(members.len(), 3);
    }

    #[test]
    fn test_empty_union_is_rejected() {
        assert!(Type::union(Vec::new()).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Type::I64.to_string(), "Int[64]");
        assert_eq!(Type::F32.to_string(), "Float[32]");
        assert_eq!(Type::Function(None).to_string(), "Function");
        assert_eq!(
            Type::function(vec![Type::F64, Type::I64], Type::Bool).to_string(),
            "Function[[Float[64], Int[64]], Bool]"
        );
        assert_eq!(
            Type::union([Type::I64, Type::I16]).unwrap().to_string(),
            "Union[Int[16], Int[64]]"
        );
    }
}
