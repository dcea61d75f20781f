//! Concrete values known at inference time.
//!
//! These are the constants carried in the VALUE track of scalars and the
//! results of [`crate::projection::build_value`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::types::Type;

/// A concrete constant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Str(String),
    Nil,
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Record(Record),
    SymbolicKey(SymbolicKey),
    Type(Type),
}

/// An instance of a nominal record type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    pub tag: String,
    pub fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new(tag: impl Into<String>, fields: Vec<(String, Value)>) -> Self {
        Self {
            tag: tag.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// A key into a gradient environment: the graph node it was created for,
/// plus a discriminating index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolicKey {
    pub node: String,
    pub index: i64,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::SymbolicKey(a), Value::SymbolicKey(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Int(v) => v.hash(state),
            Value::UInt(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Bool(v) => v.hash(state),
            Value::Str(v) => v.hash(state),
            Value::Nil => {}
            Value::Tuple(vs) | Value::List(vs) => vs.hash(state),
            Value::Record(r) => r.hash(state),
            Value::SymbolicKey(k) => k.hash(state),
            Value::Type(t) => t.hash(state),
        }
    }
}

impl Value {
    /// The natural type of this value.
    pub fn type_of(&self) -> Type {
        match self {
            Value::Int(_) => Type::I64,
            Value::UInt(_) => Type::U64,
            Value::Float(_) => Type::F64,
            Value::Bool(_) => Type::Bool,
            Value::Str(_) => Type::String,
            Value::Nil => Type::Nil,
            Value::Tuple(vs) => Type::Tuple(vs.iter().map(Value::type_of).collect()),
            Value::List(vs) => {
                let element = Type::union(vs.iter().map(Value::type_of)).unwrap_or(Type::Any);
                Type::List(Box::new(element))
            }
            Value::Record(r) => Type::Class(r.tag.clone()),
            Value::SymbolicKey(_) => Type::SymbolicKey,
            Value::Type(_) => Type::TypeType,
        }
    }

    /// Whether this value may be described by a scalar of type `ty`.
    ///
    /// Integers must lie in the range of the type's width and signedness.
    /// Floats fit any float width.
    pub fn fits(&self, ty: &Type) -> bool {
        match (self, ty) {
            (_, Type::Any) => true,
            (_, Type::Union(members)) => members.iter().any(|m| self.fits(m)),
            (Value::Int(v), Type::Int(bits)) => int_in_range(i128::from(*v), true, *bits),
            (Value::Int(v), Type::UInt(bits)) => int_in_range(i128::from(*v), false, *bits),
            (Value::UInt(v), Type::Int(bits)) => int_in_range(i128::from(*v), true, *bits),
            (Value::UInt(v), Type::UInt(bits)) => int_in_range(i128::from(*v), false, *bits),
            (Value::Float(_), Type::Float(_)) => true,
            (Value::Bool(_), Type::Bool) => true,
            (Value::Str(_), Type::String) => true,
            (Value::Nil, Type::Nil) => true,
            (Value::SymbolicKey(_), Type::SymbolicKey) => true,
            (Value::Type(_), Type::TypeType) => true,
            (Value::Tuple(vs), Type::Tuple(ts)) => {
                vs.len() == ts.len() && vs.iter().zip(ts).all(|(v, t)| v.fits(t))
            }
            (Value::List(vs), Type::List(t)) => vs.iter().all(|v| v.fits(t)),
            (Value::Record(r), Type::Class(tag)) => &r.tag == tag,
            _ => false,
        }
    }

    /// Numeric constants (booleans included) may be widened to `ANYTHING`
    /// when two of them meet in a relaxed merge; other constants may not.
    pub fn is_widenable(&self) -> bool {
        matches!(
            self,
            Value::Int(_) | Value::UInt(_) | Value::Float(_) | Value::Bool(_)
        )
    }
}

fn int_in_range(v: i128, signed: bool, bits: u8) -> bool {
    if bits == 0 {
        return false;
    }
    let bits = u32::from(bits.min(127));
    if signed {
        let half = 1i128 << (bits - 1);
        (-half..half).contains(&v)
    } else {
        v >= 0 && (bits == 127 || v < 1i128 << bits)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

fn write_values(f: &mut fmt::Formatter<'_>, values: &[Value]) -> fmt::Result {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", v)?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{:?}", v),
            Value::Nil => write!(f, "nil"),
            Value::Tuple(vs) => {
                write!(f, "(")?;
                write_values(f, vs)?;
                if vs.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Value::List(vs) => {
                write!(f, "[")?;
                write_values(f, vs)?;
                write!(f, "]")
            }
            Value::Record(r) => {
                write!(f, "{}(", r.tag)?;
                for (i, (name, v)) in r.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={}", name, v)?;
                }
                write!(f, ")")
            }
            Value::SymbolicKey(k) => write!(f, "SymbolicKey({}, {})", k.node, k.index),
            Value::Type(t) => write!(f, "{}", t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_of_literals() {
        assert_eq!(Value::Int(1).type_of(), Type::I64);
        assert_eq!(Value::Float(1.5).type_of(), Type::F64);
        assert_eq!(Value::from("x").type_of(), Type::String);
        assert_eq!(
            Value::Tuple(vec![Value::Int(1), Value::Bool(true)]).type_of(),
            Type::Tuple(vec![Type::I64, Type::Bool])
        );
    }

    #[test]
    fn test_fits_checks_kind_and_range() {
        assert!(Value::Int(3).fits(&Type::I32));
        assert!(Value::Int(3).fits(&Type::U8));
        assert!(Value::Int(255).fits(&Type::U8));
        assert!(!Value::Int(256).fits(&Type::U8));
        assert!(!Value::Int(-1).fits(&Type::U8));
        assert!(Value::Int(-128).fits(&Type::I8));
        assert!(!Value::Int(128).fits(&Type::I8));
        assert!(Value::Int(i64::MIN).fits(&Type::I64));
        assert!(Value::UInt(u64::MAX).fits(&Type::U64));
        assert!(!Value::UInt(u64::MAX).fits(&Type::I64));
        assert!(!Value::Int(3).fits(&Type::F64));
        assert!(Value::Float(0.5).fits(&Type::F16));
        assert!(!Value::from("a").fits(&Type::I64));
        assert!(Value::from("a").fits(&Type::Any));
    }

    #[test]
    fn test_float_equality_is_bitwise() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Tuple(vec![Value::Int(1), Value::Int(2)]).to_string(), "(1, 2)");
        assert_eq!(Value::Tuple(vec![Value::Int(1)]).to_string(), "(1,)");
        assert_eq!(Value::from("hi").to_string(), "\"hi\"");
        let point = Record::new(
            "Point",
            vec![("x".to_string(), Value::Int(1)), ("y".to_string(), Value::Int(2))],
        );
        assert_eq!(Value::from(point).to_string(), "Point(x=1, y=2)");
    }
}
