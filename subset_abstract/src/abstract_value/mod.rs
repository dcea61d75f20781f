//! The abstract value model.
//!
//! An [`AbstractValue`] describes the set of run-time values an expression
//! may take. It is a shared, immutable handle onto an [`AbstractKind`]:
//!
//! ```text
//! S(VALUE, TYPE)     scalar: a constant, ANYTHING, a Possibilities set or a Pending
//! T(a, b, ...)       tuple
//! L(x)               list with element description x
//! A(x, SHAPE)        array with element description x
//! *Tag(f=..., ...)   record with a fixed field set
//! U(a, b, ...)       union of alternatives
//! TU(0: a, ...)      tagged union
//! Fn(Possibilities)  function reference(s)
//! J(x)               value that crossed a differentiation boundary
//! E(reason)          dead / invalid value
//! Ty(type)           a type used as a value
//! ```
//!
//! # Identity and interning
//!
//! Acyclic abstract values are hash-consed: building the same structure twice
//! yields the same instance, so `ptr_eq` is a valid fast path for equality
//! and the merge engine can return an operand by identity when nothing
//! changes. Cyclic values (recursive types) are built with
//! [`AbstractValue::placeholder`] and [`AbstractValue::complete`]; they are
//! never interned and compare coinductively.

pub mod function;
mod intern;
pub mod possibilities;
pub(crate) mod structural;

use once_cell::unsync::OnceCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::error::{InferResult, InferenceError};
use crate::scheduler::Pending;
use crate::types::Type;
use crate::value::Value;

pub use function::{FunctionRef, Primitive};
pub use possibilities::{Candidate, Possibilities};

/// The VALUE track of a scalar (and the option set of a function).
#[derive(Clone, Debug)]
pub enum Slot {
    /// A single known constant.
    Value(Value),
    /// Any value of the accompanying type.
    Anything,
    /// One of several known candidates.
    Possibilities(Possibilities),
    /// Not known yet; resolved later by the inference loop.
    Pending(Pending),
}

/// Sentinel for "any value of the given type".
pub const ANYTHING: Slot = Slot::Anything;

/// Sentinel reason carried by unreachable values.
pub const DEAD: ErrorReason = ErrorReason::Dead;

impl Slot {
    /// Follow resolved pendings to the slot they stand for.
    pub fn resolved(&self) -> Slot {
        let mut current = self.clone();
        loop {
            let next = match &current {
                Slot::Pending(p) => p.result(),
                _ => None,
            };
            match next {
                Some(slot) => current = slot,
                None => return current,
            }
        }
    }

    /// The unresolved pending this slot is waiting on, if any.
    pub fn unresolved_pending(&self) -> Option<Pending> {
        match self.resolved() {
            Slot::Pending(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Slot::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_anything(&self) -> bool {
        matches!(self, Slot::Anything)
    }

    /// Identity comparison: sets and pendings by reference, constants by value.
    pub fn same_as(&self, other: &Slot) -> bool {
        match (self, other) {
            (Slot::Value(a), Slot::Value(b)) => a == b,
            (Slot::Anything, Slot::Anything) => true,
            (Slot::Possibilities(a), Slot::Possibilities(b)) => a.ptr_eq(b),
            (Slot::Pending(a), Slot::Pending(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Suspend until this slot no longer refers to an unresolved pending.
    pub async fn wait(&self) -> InferResult<Slot> {
        let mut current = self.clone();
        loop {
            match current {
                Slot::Pending(p) => current = p.wait().await?,
                other => return Ok(other),
            }
        }
    }
}

impl From<Value> for Slot {
    fn from(v: Value) -> Self {
        Slot::Value(v)
    }
}

impl From<i64> for Slot {
    fn from(v: i64) -> Self {
        Slot::Value(Value::Int(v))
    }
}

impl From<f64> for Slot {
    fn from(v: f64) -> Self {
        Slot::Value(Value::Float(v))
    }
}

impl From<bool> for Slot {
    fn from(v: bool) -> Self {
        Slot::Value(Value::Bool(v))
    }
}

impl From<&str> for Slot {
    fn from(v: &str) -> Self {
        Slot::Value(Value::from(v))
    }
}

impl From<Possibilities> for Slot {
    fn from(p: Possibilities) -> Self {
        Slot::Possibilities(p)
    }
}

impl From<Pending> for Slot {
    fn from(p: Pending) -> Self {
        Slot::Pending(p)
    }
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        structural::slot_eq(self, other, &mut structural::Seen::new())
    }
}

impl Eq for Slot {}

impl Hash for Slot {
    fn hash<H: Hasher>(&self, state: &mut H) {
        structural::hash_slot(self, crate::widening::CYCLIC_HASH_DEPTH, state);
    }
}

/// One array dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dim {
    Known(u64),
    Any,
}

/// Array shape.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Shape(pub Vec<Dim>);

impl Shape {
    pub fn known(dims: &[u64]) -> Self {
        Shape(dims.iter().map(|&d| Dim::Known(d)).collect())
    }
}

/// Why a value is an error value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorReason {
    /// The value is unreachable.
    Dead,
    /// Placeholder of a cyclic value that has not been completed yet.
    Incomplete,
    Custom(String),
}

/// The variants of an abstract value.
#[derive(Clone, Debug)]
pub enum AbstractKind {
    Scalar { value: Slot, ty: Type },
    Tuple(Vec<AbstractValue>),
    List(AbstractValue),
    Array { element: AbstractValue, shape: Shape },
    Class {
        tag: String,
        fields: Vec<(String, AbstractValue)>,
    },
    /// Normalized by [`abstract_union`]: at least two members, none a union.
    Union(Vec<AbstractValue>),
    TaggedUnion(Vec<(u32, AbstractValue)>),
    /// `Possibilities` of function candidates, `ANYTHING`, or a pending set.
    Function(Slot),
    JTagged(AbstractValue),
    Error(ErrorReason),
    Ty(Type),
}

impl AbstractKind {
    /// Every abstract value directly reachable from this kind, including
    /// those inside function references.
    pub(crate) fn children(&self) -> Vec<AbstractValue> {
        let mut out = Vec::new();
        match self {
            AbstractKind::Scalar { value, .. } => collect_slot_children(value, &mut out),
            AbstractKind::Tuple(items) | AbstractKind::Union(items) => {
                out.extend(items.iter().cloned())
            }
            AbstractKind::List(x) | AbstractKind::JTagged(x) => out.push(x.clone()),
            AbstractKind::Array { element, .. } => out.push(element.clone()),
            AbstractKind::Class { fields, .. } => {
                out.extend(fields.iter().map(|(_, v)| v.clone()))
            }
            AbstractKind::TaggedUnion(options) => {
                out.extend(options.iter().map(|(_, v)| v.clone()))
            }
            AbstractKind::Function(slot) => collect_slot_children(slot, &mut out),
            AbstractKind::Error(_) | AbstractKind::Ty(_) => {}
        }
        out
    }

    fn validate(&self) -> InferResult<()> {
        match self {
            AbstractKind::Scalar { value, ty } => match value {
                Slot::Value(v) if !v.fits(ty) => Err(InferenceError::InvalidConstruction(
                    format!("value {} does not fit type {}", v, ty),
                )),
                Slot::Possibilities(p) => {
                    for candidate in p.iter() {
                        match candidate {
                            Candidate::Value(v) if v.fits(ty) => {}
                            other => {
                                return Err(InferenceError::InvalidConstruction(format!(
                                    "candidate {} does not fit type {}",
                                    other, ty
                                )))
                            }
                        }
                    }
                    Ok(())
                }
                _ => Ok(()),
            },
            AbstractKind::Class { tag, fields } => {
                for (i, (name, _)) in fields.iter().enumerate() {
                    if fields[..i].iter().any(|(other, _)| other == name) {
                        return Err(InferenceError::InvalidConstruction(format!(
                            "duplicate field '{}' in record {}",
                            name, tag
                        )));
                    }
                }
                Ok(())
            }
            AbstractKind::Union(members) => {
                if members.len() < 2 {
                    return Err(InferenceError::InvalidConstruction(
                        "a union needs at least two members; use abstract_union".to_string(),
                    ));
                }
                if members
                    .iter()
                    .any(|m| matches!(m.kind(), AbstractKind::Union(_)))
                {
                    return Err(InferenceError::InvalidConstruction(
                        "nested union; use abstract_union".to_string(),
                    ));
                }
                Ok(())
            }
            AbstractKind::TaggedUnion(options) => {
                if options.is_empty() {
                    return Err(InferenceError::InvalidConstruction(
                        "tagged union with no options".to_string(),
                    ));
                }
                for (i, (tag, _)) in options.iter().enumerate() {
                    if options[..i].iter().any(|(other, _)| other == tag) {
                        return Err(InferenceError::InvalidConstruction(format!(
                            "duplicate tag {} in tagged union",
                            tag
                        )));
                    }
                }
                Ok(())
            }
            AbstractKind::Function(slot) => match slot {
                Slot::Possibilities(p) if p.iter().any(|c| c.as_function().is_none()) => {
                    Err(InferenceError::InvalidConstruction(format!(
                        "function possibilities must be function references, got {}",
                        p
                    )))
                }
                Slot::Value(v) => Err(InferenceError::InvalidConstruction(format!(
                    "function abstract value cannot hold constant {}",
                    v
                ))),
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

fn collect_slot_children(slot: &Slot, out: &mut Vec<AbstractValue>) {
    if let Slot::Possibilities(p) = slot {
        for candidate in p.iter() {
            if let Candidate::Function(f) = candidate {
                f.collect_children(out);
            }
        }
    }
}

pub(crate) struct Node {
    kind: OnceCell<AbstractKind>,
    /// Structural hash; present exactly when the value is acyclic.
    full_hash: OnceCell<u64>,
    interned: bool,
}

/// Shared handle onto an immutable abstract value.
#[derive(Clone)]
pub struct AbstractValue(Rc<Node>);

thread_local! {
    static INCOMPLETE: &'static AbstractKind =
        Box::leak(Box::new(AbstractKind::Error(ErrorReason::Incomplete)));
}

impl AbstractValue {
    /// Validate and build an abstract value.
    pub fn new(kind: AbstractKind) -> InferResult<Self> {
        kind.validate()?;
        Ok(Self::build(kind))
    }

    /// Build without validation; only for kinds that cannot be invalid.
    pub(crate) fn build(kind: AbstractKind) -> Self {
        let children = kind.children();
        if children.iter().all(|c| c.is_interned()) {
            return intern::intern(kind);
        }
        let full_hash = if children.iter().all(|c| c.full_hash().is_some()) {
            Some(structural::full_hash(&kind))
        } else {
            None
        };
        Self::from_parts(kind, full_hash, false)
    }

    pub(crate) fn from_parts(kind: AbstractKind, full_hash: Option<u64>, interned: bool) -> Self {
        let node = Node {
            kind: OnceCell::with_value(kind),
            full_hash: OnceCell::new(),
            interned,
        };
        if let Some(h) = full_hash {
            let _ = node.full_hash.set(h);
        }
        AbstractValue(Rc::new(node))
    }

    /// An empty node, to be filled with [`AbstractValue::complete`].
    ///
    /// Until completed it reads as `E(INCOMPLETE)`.
    pub fn placeholder() -> Self {
        AbstractValue(Rc::new(Node {
            kind: OnceCell::new(),
            full_hash: OnceCell::new(),
            interned: false,
        }))
    }

    /// Fill a placeholder. The kind may refer back to the placeholder itself.
    pub fn complete(&self, kind: AbstractKind) -> InferResult<()> {
        kind.validate()?;
        let acyclic = kind.children().iter().all(|c| c.full_hash().is_some());
        let hash = if acyclic {
            Some(structural::full_hash(&kind))
        } else {
            None
        };
        self.0.kind.set(kind).map_err(|_| {
            InferenceError::InvalidConstruction("abstract value completed twice".to_string())
        })?;
        if let Some(h) = hash {
            let _ = self.0.full_hash.set(h);
        }
        Ok(())
    }

    pub fn kind(&self) -> &AbstractKind {
        match self.0.kind.get() {
            Some(kind) => kind,
            None => INCOMPLETE.with(|k| *k),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.0.kind.get().is_some()
    }

    pub fn is_interned(&self) -> bool {
        self.0.interned
    }

    pub(crate) fn full_hash(&self) -> Option<u64> {
        self.0.full_hash.get().copied()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &AbstractValue) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub(crate) fn downgrade(&self) -> std::rc::Weak<Node> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn from_rc(node: Rc<Node>) -> Self {
        AbstractValue(node)
    }

    // Constructors

    pub fn scalar(value: impl Into<Slot>, ty: Type) -> InferResult<Self> {
        Self::new(AbstractKind::Scalar {
            value: value.into(),
            ty,
        })
    }

    /// Scalar whose value is any value of `ty`.
    pub fn any_of(ty: Type) -> Self {
        Self::build(AbstractKind::Scalar {
            value: Slot::Anything,
            ty,
        })
    }

    pub fn tuple(items: Vec<AbstractValue>) -> Self {
        Self::build(AbstractKind::Tuple(items))
    }

    pub fn list(element: AbstractValue) -> Self {
        Self::build(AbstractKind::List(element))
    }

    pub fn array(element: AbstractValue, shape: Shape) -> Self {
        Self::build(AbstractKind::Array { element, shape })
    }

    pub fn class(tag: impl Into<String>, fields: Vec<(String, AbstractValue)>) -> InferResult<Self> {
        Self::new(AbstractKind::Class {
            tag: tag.into(),
            fields,
        })
    }

    pub fn tagged_union(options: Vec<(u32, AbstractValue)>) -> InferResult<Self> {
        let mut options = options;
        options.sort_by_key(|(tag, _)| *tag);
        Self::new(AbstractKind::TaggedUnion(options))
    }

    /// Function value with the given candidates.
    pub fn function(options: impl Into<Slot>) -> InferResult<Self> {
        Self::new(AbstractKind::Function(options.into()))
    }

    /// Function value over a list of references.
    pub fn functions(refs: impl IntoIterator<Item = FunctionRef>) -> InferResult<Self> {
        let possibilities = Possibilities::new(refs.into_iter().map(Candidate::Function))?;
        Self::function(possibilities)
    }

    pub fn jtagged(inner: AbstractValue) -> Self {
        Self::build(AbstractKind::JTagged(inner))
    }

    pub fn error(reason: ErrorReason) -> Self {
        Self::build(AbstractKind::Error(reason))
    }

    pub fn dead() -> Self {
        Self::error(ErrorReason::Dead)
    }

    pub fn ty(ty: Type) -> Self {
        Self::build(AbstractKind::Ty(ty))
    }

    // Accessors

    pub fn as_scalar(&self) -> Option<(&Slot, &Type)> {
        match self.kind() {
            AbstractKind::Scalar { value, ty } => Some((value, ty)),
            _ => None,
        }
    }

    pub fn is_dead(&self) -> bool {
        matches!(self.kind(), AbstractKind::Error(ErrorReason::Dead))
    }
}

/// Build a union of abstract values.
///
/// Nested unions are flattened, structurally equal members are merged, and a
/// union of a single member is that member. Members are kept in canonical
/// (rendered) order, so the result does not depend on input order.
pub fn abstract_union(options: impl IntoIterator<Item = AbstractValue>) -> InferResult<AbstractValue> {
    fn push(av: AbstractValue, members: &mut Vec<AbstractValue>) {
        if !members.iter().any(|m| *m == av) {
            members.push(av);
        }
    }

    let mut members: Vec<AbstractValue> = Vec::new();
    for option in options {
        match option.kind() {
            AbstractKind::Union(inner) => {
                for m in inner {
                    push(m.clone(), &mut members);
                }
            }
            _ => push(option.clone(), &mut members),
        }
    }
    match members.len() {
        0 => Err(InferenceError::InvalidConstruction(
            "union of no abstract values".to_string(),
        )),
        1 => Ok(members.remove(0)),
        _ => {
            members.sort_by_cached_key(|m| m.to_string());
            AbstractValue::new(AbstractKind::Union(members))
        }
    }
}

impl PartialEq for AbstractValue {
    fn eq(&self, other: &Self) -> bool {
        structural::av_eq(self, other, &mut structural::Seen::new())
    }
}

impl Eq for AbstractValue {}

impl Hash for AbstractValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        structural::hash_av(self, crate::widening::CYCLIC_HASH_DEPTH, state);
    }
}

impl fmt::Debug for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
