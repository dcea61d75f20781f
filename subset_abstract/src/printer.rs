//! Canonical one-line rendering of abstract values.
//!
//! ```text
//! S(VALUE=1, TYPE=Int[64])            scalar with a known value
//! S(TYPE=Float[32])                   scalar with VALUE = ANYTHING
//! T(a, b)  L(x)  A(x, SHAPE=(4, 5))   containers
//! *Point(x=..., y=...)                record
//! U(a, b)  TU(0: a, 1: b)             unions
//! Fn(Possibilities({scalar_mul}))     function
//! J(x)  E(DEAD)  Ty(Float[32])        wrappers
//! ```
//!
//! A value that contains itself prints `#rec` at the point of recursion.
//! The rendering is meant for diagnostics and tests, not for persistence.

use std::fmt::{self, Display, Formatter};

use crate::abstract_value::{
    AbstractKind, AbstractValue, Candidate, Dim, ErrorReason, FunctionRef, Possibilities, Shape,
    Slot,
};

/// Addresses of the abstract values currently being printed.
type Path = Vec<usize>;

fn write_av(av: &AbstractValue, f: &mut Formatter<'_>, path: &mut Path) -> fmt::Result {
    let addr = av.addr();
    if path.contains(&addr) {
        return write!(f, "#rec");
    }
    path.push(addr);
    let result = write_kind(av.kind(), f, path);
    path.pop();
    result
}

fn write_kind(kind: &AbstractKind, f: &mut Formatter<'_>, path: &mut Path) -> fmt::Result {
    match kind {
        AbstractKind::Scalar { value, ty } => {
            write!(f, "S(")?;
            match value.resolved() {
                Slot::Anything => {}
                other => {
                    write!(f, "VALUE=")?;
                    write_slot(&other, f, path)?;
                    write!(f, ", ")?;
                }
            }
            write!(f, "TYPE={})", ty)
        }
        AbstractKind::Tuple(items) => {
            write!(f, "T(")?;
            write_seq(items, f, path)?;
            write!(f, ")")
        }
        AbstractKind::List(element) => {
            write!(f, "L(")?;
            write_av(element, f, path)?;
            write!(f, ")")
        }
        AbstractKind::Array { element, shape } => {
            write!(f, "A(")?;
            write_av(element, f, path)?;
            write!(f, ", SHAPE={})", shape)
        }
        AbstractKind::Class { tag, fields } => {
            write!(f, "*{}(", tag)?;
            for (i, (name, v)) in fields.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}=", name)?;
                write_av(v, f, path)?;
            }
            write!(f, ")")
        }
        AbstractKind::Union(members) => {
            write!(f, "U(")?;
            write_seq(members, f, path)?;
            write!(f, ")")
        }
        AbstractKind::TaggedUnion(options) => {
            write!(f, "TU(")?;
            for (i, (tag, v)) in options.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: ", tag)?;
                write_av(v, f, path)?;
            }
            write!(f, ")")
        }
        AbstractKind::Function(slot) => {
            write!(f, "Fn(")?;
            write_slot(&slot.resolved(), f, path)?;
            write!(f, ")")
        }
        AbstractKind::JTagged(inner) => {
            write!(f, "J(")?;
            write_av(inner, f, path)?;
            write!(f, ")")
        }
        AbstractKind::Error(reason) => write!(f, "E({})", reason),
        AbstractKind::Ty(ty) => write!(f, "Ty({})", ty),
    }
}

fn write_seq(items: &[AbstractValue], f: &mut Formatter<'_>, path: &mut Path) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write_av(item, f, path)?;
    }
    Ok(())
}

fn write_slot(slot: &Slot, f: &mut Formatter<'_>, path: &mut Path) -> fmt::Result {
    match slot {
        Slot::Value(v) => write!(f, "{}", v),
        Slot::Anything => write!(f, "ANYTHING"),
        Slot::Possibilities(p) => write_possibilities(p, f, path),
        Slot::Pending(p) => match p.result() {
            Some(resolved) => write_slot(&resolved, f, path),
            None => write!(f, "Pending#{}", p.id()),
        },
    }
}

fn write_possibilities(p: &Possibilities, f: &mut Formatter<'_>, path: &mut Path) -> fmt::Result {
    write!(f, "Possibilities({{")?;
    for (i, candidate) in p.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write_candidate(candidate, f, path)?;
    }
    write!(f, "}})")
}

fn write_candidate(c: &Candidate, f: &mut Formatter<'_>, path: &mut Path) -> fmt::Result {
    match c {
        Candidate::Value(v) => write!(f, "{}", v),
        Candidate::Function(func) => write_function_ref(func, f, path),
    }
}

fn write_signature(
    args: &[AbstractValue],
    output: &AbstractValue,
    f: &mut Formatter<'_>,
    path: &mut Path,
) -> fmt::Result {
    write!(f, "(")?;
    write_seq(args, f, path)?;
    write!(f, ") -> ")?;
    write_av(output, f, path)
}

fn write_function_ref(func: &FunctionRef, f: &mut Formatter<'_>, path: &mut Path) -> fmt::Result {
    match func {
        FunctionRef::Primitive(p) => write!(f, "{}", p.name),
        FunctionRef::TypedPrimitive { prim, args, output } => {
            write!(f, "{}[", prim.name)?;
            write_signature(args, output, f, path)?;
            write!(f, "]")
        }
        FunctionRef::Partial { func, args } => {
            write!(f, "partial(")?;
            write_function_ref(func, f, path)?;
            for arg in args {
                write!(f, ", ")?;
                write_av(arg, f, path)?;
            }
            write!(f, ")")
        }
        FunctionRef::Virtual { args, output } => {
            write!(f, "Virtual(")?;
            write_signature(args, output, f, path)?;
            write!(f, ")")
        }
        FunctionRef::Graph { name } => write!(f, "Graph({})", name),
    }
}

impl Display for AbstractValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_av(self, f, &mut Path::new())
    }
}

impl Display for Slot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_slot(self, f, &mut Path::new())
    }
}

impl Display for Possibilities {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_possibilities(self, f, &mut Path::new())
    }
}

impl Display for Candidate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_candidate(self, f, &mut Path::new())
    }
}

impl Display for FunctionRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_function_ref(self, f, &mut Path::new())
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", dim)?;
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

impl Display for Dim {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Known(n) => write!(f, "{}", n),
            Dim::Any => write!(f, "?"),
        }
    }
}

impl Display for ErrorReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ErrorReason::Dead => write!(f, "DEAD"),
            ErrorReason::Incomplete => write!(f, "INCOMPLETE"),
            ErrorReason::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    #[test]
    fn test_scalar_forms() {
        let one = AbstractValue::scalar(1i64, Type::I64).unwrap();
        assert_eq!(one.to_string(), "S(VALUE=1, TYPE=Int[64])");
        assert_eq!(
            AbstractValue::any_of(Type::F32).to_string(),
            "S(TYPE=Float[32])"
        );
    }

    #[test]
    fn test_shape_forms() {
        assert_eq!(Shape::known(&[4, 5]).to_string(), "(4, 5)");
        assert_eq!(Shape::known(&[3]).to_string(), "(3,)");
        assert_eq!(Shape(vec![Dim::Any, Dim::Known(2)]).to_string(), "(?, 2)");
    }

    #[test]
    fn test_recursion_marker() {
        let node = AbstractValue::placeholder();
        node.complete(AbstractKind::Tuple(vec![
            AbstractValue::any_of(Type::I64),
            AbstractValue::list(node.clone()),
        ]))
        .unwrap();
        assert_eq!(node.to_string(), "T(S(TYPE=Int[64]), L(#rec))");
    }

    #[test]
    fn test_incomplete_placeholder() {
        assert_eq!(AbstractValue::placeholder().to_string(), "E(INCOMPLETE)");
    }
}
