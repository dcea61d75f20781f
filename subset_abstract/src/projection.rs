//! Projections from abstract values to concrete values and types, and the
//! reverse mapping from literals.

use crate::abstract_value::{AbstractKind, AbstractValue, Candidate, FunctionRef, Slot};
use crate::broaden::broaden;
use crate::error::{InferResult, InferenceError};
use crate::merge::amerge;
use crate::types::Type;
use crate::value::{Record, Value};

/// The unique concrete value described by `av`.
///
/// Scalars need a known VALUE (a resolved pending counts); tuples and
/// records need one for every member; a `Ty` yields the type itself.
/// Anything else is a [`InferenceError::ValueIndeterminate`].
pub fn build_value(av: &AbstractValue) -> InferResult<Value> {
    build_value_in(av, &mut Vec::new())
}

fn build_value_in(av: &AbstractValue, path: &mut Vec<usize>) -> InferResult<Value> {
    if path.contains(&av.addr()) {
        return Err(InferenceError::indeterminate(av, "value contains itself"));
    }
    path.push(av.addr());
    let result = match av.kind() {
        AbstractKind::Scalar { value, .. } => match value.resolved() {
            Slot::Value(v) => Ok(v),
            other => Err(InferenceError::indeterminate(
                av,
                format!("VALUE is {}", other),
            )),
        },
        AbstractKind::Tuple(items) => items
            .iter()
            .map(|item| build_value_in(item, path))
            .collect::<InferResult<Vec<_>>>()
            .map(Value::Tuple),
        AbstractKind::Class { tag, fields } => fields
            .iter()
            .map(|(name, field)| -> InferResult<(String, Value)> {
                Ok((name.clone(), build_value_in(field, path)?))
            })
            .collect::<InferResult<Vec<_>>>()
            .map(|fields| Value::Record(Record::new(tag.clone(), fields))),
        AbstractKind::Ty(ty) => Ok(Value::Type(ty.clone())),
        _ => Err(InferenceError::indeterminate(
            av,
            "no unique concrete value",
        )),
    };
    path.pop();
    result
}

/// Like [`build_value`], but returns `default` when the value is not
/// determined.
pub fn build_value_or(av: &AbstractValue, default: Slot) -> Slot {
    match build_value(av) {
        Ok(v) => Slot::Value(v),
        Err(_) => default,
    }
}

/// The concrete type described by `av`.
///
/// For a function, every candidate must agree on one type; a function
/// value whose candidates are unknown has the generic `Function` type.
pub fn build_type_fn(av: &AbstractValue) -> InferResult<Type> {
    build_type_in(av, &mut Vec::new())
}

fn build_type_in(av: &AbstractValue, path: &mut Vec<usize>) -> InferResult<Type> {
    if path.contains(&av.addr()) {
        return Err(InferenceError::indeterminate(av, "recursive type"));
    }
    path.push(av.addr());
    let result = match av.kind() {
        AbstractKind::Scalar { ty, .. } => Ok(ty.clone()),
        AbstractKind::Tuple(items) => types_of(items, path).map(Type::Tuple),
        AbstractKind::List(element) => {
            build_type_in(element, path).map(|t| Type::List(Box::new(t)))
        }
        AbstractKind::Array { element, .. } => {
            build_type_in(element, path).map(|t| Type::Array(Box::new(t)))
        }
        AbstractKind::Class { tag, .. } => Ok(Type::Class(tag.clone())),
        AbstractKind::Union(members) => types_of(members, path).and_then(Type::union),
        AbstractKind::TaggedUnion(options) => options
            .iter()
            .map(|(_, option)| build_type_in(option, path))
            .collect::<InferResult<Vec<_>>>()
            .and_then(Type::union),
        AbstractKind::Function(slot) => function_type(av, slot, path),
        AbstractKind::JTagged(inner) => {
            build_type_in(inner, path).map(|t| Type::JTagged(Box::new(t)))
        }
        AbstractKind::Ty(_) => Ok(Type::TypeType),
        AbstractKind::Error(reason) => Err(InferenceError::indeterminate(
            av,
            format!("error value ({}) has no type", reason),
        )),
    };
    path.pop();
    result
}

fn types_of(items: &[AbstractValue], path: &mut Vec<usize>) -> InferResult<Vec<Type>> {
    items.iter().map(|item| build_type_in(item, path)).collect()
}

fn function_type(av: &AbstractValue, slot: &Slot, path: &mut Vec<usize>) -> InferResult<Type> {
    match slot.resolved() {
        Slot::Anything => Ok(Type::Function(None)),
        Slot::Possibilities(p) => {
            let mut found: Option<Type> = None;
            for candidate in p.iter() {
                let Candidate::Function(f) = candidate else {
                    return Err(InferenceError::indeterminate(
                        av,
                        format!("{} is not a function", candidate),
                    ));
                };
                let ty = function_ref_type(av, f, path)?;
                match &found {
                    Some(prev) if *prev != ty => {
                        return Err(InferenceError::indeterminate(
                            av,
                            format!("candidates disagree: {} and {}", prev, ty),
                        ))
                    }
                    Some(_) => {}
                    None => found = Some(ty),
                }
            }
            found.ok_or_else(|| InferenceError::indeterminate(av, "no candidates"))
        }
        other => Err(InferenceError::indeterminate(
            av,
            format!("candidates are {}", other),
        )),
    }
}

fn function_ref_type(
    av: &AbstractValue,
    f: &FunctionRef,
    path: &mut Vec<usize>,
) -> InferResult<Type> {
    match f {
        FunctionRef::Primitive(p) => Ok(Type::Function(p.signature.clone())),
        FunctionRef::TypedPrimitive { args, output, .. } | FunctionRef::Virtual { args, output } => {
            let args = types_of(args, path)?;
            let ret = build_type_in(output, path)?;
            Ok(Type::function(args, ret))
        }
        FunctionRef::Partial { func, args } => match function_ref_type(av, func, path)? {
            Type::Function(Some(sig)) => {
                if args.len() > sig.args.len() {
                    return Err(InferenceError::indeterminate(
                        av,
                        format!(
                            "partial application binds {} arguments of {}",
                            args.len(),
                            Type::Function(Some(sig))
                        ),
                    ));
                }
                Ok(Type::function(sig.args[args.len()..].to_vec(), *sig.ret))
            }
            other => Ok(other),
        },
        FunctionRef::Graph { .. } => Ok(Type::Function(None)),
    }
}

/// Abstract value of a literal.
///
/// A list's element description is the relaxed merge of its broadened
/// elements; an empty list has a dead element.
pub fn to_abstract(v: &Value) -> InferResult<AbstractValue> {
    match v {
        Value::Tuple(items) => Ok(AbstractValue::tuple(
            items.iter().map(to_abstract).collect::<InferResult<_>>()?,
        )),
        Value::List(items) => {
            let mut element = AbstractValue::dead();
            for item in items {
                let item = broaden(&to_abstract(item)?)?;
                element = amerge(&element, &item, None, false)?;
            }
            Ok(AbstractValue::list(element))
        }
        Value::Record(r) => AbstractValue::class(
            r.tag.clone(),
            r.fields
                .iter()
                .map(|(name, field)| -> InferResult<(String, AbstractValue)> {
                    Ok((name.clone(), to_abstract(field)?))
                })
                .collect::<InferResult<_>>()?,
        ),
        Value::Type(ty) => Ok(AbstractValue::ty(ty.clone())),
        scalar => AbstractValue::scalar(scalar.clone(), scalar.type_of()),
    }
}
