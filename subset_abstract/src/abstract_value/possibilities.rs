//! Finite candidate sets.

use std::hash::{Hash, Hasher};
use std::rc::Rc;

use super::structural;
use super::FunctionRef;
use crate::error::{InferResult, InferenceError};
use crate::value::Value;
use crate::widening::CYCLIC_HASH_DEPTH;

/// A member of a [`Possibilities`] set.
#[derive(Clone, Debug)]
pub enum Candidate {
    Value(Value),
    Function(FunctionRef),
}

impl Candidate {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Candidate::Value(v) => Some(v),
            Candidate::Function(_) => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            Candidate::Function(f) => Some(f),
            Candidate::Value(_) => None,
        }
    }
}

impl From<Value> for Candidate {
    fn from(v: Value) -> Self {
        Candidate::Value(v)
    }
}

impl From<FunctionRef> for Candidate {
    fn from(f: FunctionRef) -> Self {
        Candidate::Function(f)
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        structural::candidate_eq(self, other, &mut structural::Seen::new())
    }
}

impl Eq for Candidate {}

impl Hash for Candidate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        structural::hash_candidate(self, CYCLIC_HASH_DEPTH, state);
    }
}

/// A non-empty, duplicate-free set of candidates.
///
/// Equality is set equality. Candidates keep their insertion order, which
/// only affects rendering.
#[derive(Clone)]
pub struct Possibilities(Rc<Vec<Candidate>>);

impl Possibilities {
    pub fn new(items: impl IntoIterator<Item = Candidate>) -> InferResult<Self> {
        let mut out: Vec<Candidate> = Vec::new();
        for item in items {
            if !out.contains(&item) {
                out.push(item);
            }
        }
        if out.is_empty() {
            return Err(InferenceError::InvalidConstruction(
                "empty possibility set".to_string(),
            ));
        }
        Ok(Possibilities(Rc::new(out)))
    }

    /// Set of concrete values.
    pub fn values<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> InferResult<Self> {
        Self::new(items.into_iter().map(|v| Candidate::Value(v.into())))
    }

    /// Set of function references.
    pub fn functions(items: impl IntoIterator<Item = FunctionRef>) -> InferResult<Self> {
        Self::new(items.into_iter().map(Candidate::Function))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Candidate] {
        &self.0
    }

    pub fn contains(&self, candidate: &Candidate) -> bool {
        self.0.contains(candidate)
    }

    pub fn is_subset(&self, other: &Possibilities) -> bool {
        self.ptr_eq(other) || self.iter().all(|c| other.contains(c))
    }

    /// Set union; `self`'s candidates first.
    pub fn union(&self, other: &Possibilities) -> Possibilities {
        let mut out: Vec<Candidate> = self.0.as_ref().clone();
        for c in other.iter() {
            if !out.contains(c) {
                out.push(c.clone());
            }
        }
        Possibilities(Rc::new(out))
    }

    /// Number of concrete value candidates.
    pub fn value_count(&self) -> usize {
        self.iter().filter(|c| c.as_value().is_some()).count()
    }

    pub fn ptr_eq(&self, other: &Possibilities) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<'a> IntoIterator for &'a Possibilities {
    type Item = &'a Candidate;
    type IntoIter = std::slice::Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl PartialEq for Possibilities {
    fn eq(&self, other: &Self) -> bool {
        structural::possibilities_eq(self, other, &mut structural::Seen::new())
    }
}

impl Eq for Possibilities {}

impl Hash for Possibilities {
    fn hash<H: Hasher>(&self, state: &mut H) {
        structural::hash_possibilities(self, CYCLIC_HASH_DEPTH, state);
    }
}

impl std::fmt::Debug for Possibilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}
