//! Structural equality and hashing.
//!
//! Equality is coinductive: a pair of nodes already under comparison is
//! assumed equal, which makes cyclic values comparable. Sets (union members,
//! possibilities, record fields) compare order-independently and hash with a
//! commutative combination.
//!
//! Acyclic nodes cache a full structural hash at construction. Cyclic nodes
//! are hashed by unfolding them to a bounded depth.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use super::{AbstractKind, AbstractValue, Candidate, FunctionRef, Possibilities, Slot};
use crate::widening::CYCLIC_HASH_DEPTH;

/// Pairs of node addresses assumed equal during a comparison.
pub(crate) type Seen = HashSet<(usize, usize)>;

pub(crate) fn av_eq(a: &AbstractValue, b: &AbstractValue, seen: &mut Seen) -> bool {
    if a.ptr_eq(b) {
        return true;
    }
    if let (Some(x), Some(y)) = (a.full_hash(), b.full_hash()) {
        if x != y {
            return false;
        }
    }
    // Structurally equal interned values are the same instance.
    if a.is_interned() && b.is_interned() {
        return false;
    }
    if !seen.insert((a.addr(), b.addr())) {
        return true;
    }
    kind_eq_in(a.kind(), b.kind(), seen)
}

pub(crate) fn kind_eq(a: &AbstractKind, b: &AbstractKind) -> bool {
    kind_eq_in(a, b, &mut Seen::new())
}

fn kind_eq_in(a: &AbstractKind, b: &AbstractKind, seen: &mut Seen) -> bool {
    use AbstractKind::*;
    match (a, b) {
        (Scalar { value: v1, ty: t1 }, Scalar { value: v2, ty: t2 }) => {
            t1 == t2 && slot_eq(v1, v2, seen)
        }
        (Tuple(x), Tuple(y)) => seq_eq(x, y, seen),
        (List(x), List(y)) | (JTagged(x), JTagged(y)) => av_eq(x, y, seen),
        (
            Array {
                element: e1,
                shape: s1,
            },
            Array {
                element: e2,
                shape: s2,
            },
        ) => s1 == s2 && av_eq(e1, e2, seen),
        (Class { tag: t1, fields: f1 }, Class { tag: t2, fields: f2 }) => {
            t1 == t2
                && set_eq(f1, f2, seen, |(n1, v1), (n2, v2), seen| {
                    n1 == n2 && av_eq(v1, v2, seen)
                })
        }
        (Union(x), Union(y)) => set_eq(x, y, seen, av_eq),
        (TaggedUnion(x), TaggedUnion(y)) => set_eq(x, y, seen, |(t1, v1), (t2, v2), seen| {
            t1 == t2 && av_eq(v1, v2, seen)
        }),
        (Function(x), Function(y)) => slot_eq(x, y, seen),
        (Error(x), Error(y)) => x == y,
        (Ty(x), Ty(y)) => x == y,
        _ => false,
    }
}

pub(crate) fn slot_eq(a: &Slot, b: &Slot, seen: &mut Seen) -> bool {
    match (a, b) {
        (Slot::Value(x), Slot::Value(y)) => x == y,
        (Slot::Anything, Slot::Anything) => true,
        (Slot::Possibilities(x), Slot::Possibilities(y)) => possibilities_eq(x, y, seen),
        (Slot::Pending(x), Slot::Pending(y)) => x.ptr_eq(y),
        _ => false,
    }
}

pub(crate) fn possibilities_eq(a: &Possibilities, b: &Possibilities, seen: &mut Seen) -> bool {
    a.ptr_eq(b) || set_eq(a.as_slice(), b.as_slice(), seen, candidate_eq)
}

pub(crate) fn candidate_eq(a: &Candidate, b: &Candidate, seen: &mut Seen) -> bool {
    match (a, b) {
        (Candidate::Value(x), Candidate::Value(y)) => x == y,
        (Candidate::Function(x), Candidate::Function(y)) => function_ref_eq(x, y, seen),
        _ => false,
    }
}

pub(crate) fn function_ref_eq(a: &FunctionRef, b: &FunctionRef, seen: &mut Seen) -> bool {
    match (a, b) {
        (FunctionRef::Primitive(x), FunctionRef::Primitive(y)) => x == y,
        (
            FunctionRef::TypedPrimitive {
                prim: p1,
                args: a1,
                output: o1,
            },
            FunctionRef::TypedPrimitive {
                prim: p2,
                args: a2,
                output: o2,
            },
        ) => p1 == p2 && seq_eq(a1, a2, seen) && av_eq(o1, o2, seen),
        (
            FunctionRef::Partial { func: f1, args: a1 },
            FunctionRef::Partial { func: f2, args: a2 },
        ) => function_ref_eq(f1, f2, seen) && seq_eq(a1, a2, seen),
        (
            FunctionRef::Virtual {
                args: a1,
                output: o1,
            },
            FunctionRef::Virtual {
                args: a2,
                output: o2,
            },
        ) => seq_eq(a1, a2, seen) && av_eq(o1, o2, seen),
        (FunctionRef::Graph { name: n1 }, FunctionRef::Graph { name: n2 }) => n1 == n2,
        _ => false,
    }
}

fn seq_eq(a: &[AbstractValue], b: &[AbstractValue], seen: &mut Seen) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| av_eq(x, y, seen))
}

/// Order-independent comparison of two duplicate-free sequences.
fn set_eq<T>(a: &[T], b: &[T], seen: &mut Seen, eq: impl Fn(&T, &T, &mut Seen) -> bool) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|x| {
        b.iter().any(|y| {
            let mut trial = seen.clone();
            if eq(x, y, &mut trial) {
                *seen = trial;
                true
            } else {
                false
            }
        })
    })
}

/// Structural hash of a kind whose children are all acyclic.
pub(crate) fn full_hash(kind: &AbstractKind) -> u64 {
    let mut hasher = DefaultHasher::new();
    hash_kind(kind, CYCLIC_HASH_DEPTH, &mut hasher);
    hasher.finish()
}

pub(crate) fn hash_av<H: Hasher>(av: &AbstractValue, depth: usize, state: &mut H) {
    match av.full_hash() {
        Some(h) => state.write_u64(h),
        None if depth == 0 => state.write_u64(0),
        None => {
            let mut hasher = DefaultHasher::new();
            hash_kind(av.kind(), depth - 1, &mut hasher);
            state.write_u64(hasher.finish());
        }
    }
}

fn hash_kind<H: Hasher>(kind: &AbstractKind, depth: usize, state: &mut H) {
    use AbstractKind::*;
    std::mem::discriminant(kind).hash(state);
    match kind {
        Scalar { value, ty } => {
            ty.hash(state);
            hash_slot(value, depth, state);
        }
        Tuple(items) => hash_seq(items, depth, state),
        List(x) | JTagged(x) => hash_av(x, depth, state),
        Array { element, shape } => {
            shape.hash(state);
            hash_av(element, depth, state);
        }
        Class { tag, fields } => {
            tag.hash(state);
            hash_unordered(fields, state, |(name, v), h| {
                name.hash(h);
                hash_av(v, depth, h);
            });
        }
        Union(members) => hash_unordered(members, state, |m, h| hash_av(m, depth, h)),
        TaggedUnion(options) => hash_unordered(options, state, |(tag, v), h| {
            tag.hash(h);
            hash_av(v, depth, h);
        }),
        Function(slot) => hash_slot(slot, depth, state),
        Error(reason) => reason.hash(state),
        Ty(ty) => ty.hash(state),
    }
}

pub(crate) fn hash_slot<H: Hasher>(slot: &Slot, depth: usize, state: &mut H) {
    std::mem::discriminant(slot).hash(state);
    match slot {
        Slot::Value(v) => v.hash(state),
        Slot::Anything => {}
        Slot::Possibilities(p) => hash_possibilities(p, depth, state),
        Slot::Pending(p) => p.id().hash(state),
    }
}

pub(crate) fn hash_possibilities<H: Hasher>(p: &Possibilities, depth: usize, state: &mut H) {
    hash_unordered(p.as_slice(), state, |c, h| hash_candidate(c, depth, h));
}

pub(crate) fn hash_candidate<H: Hasher>(c: &Candidate, depth: usize, state: &mut H) {
    match c {
        Candidate::Value(v) => {
            state.write_u8(0);
            v.hash(state);
        }
        Candidate::Function(f) => {
            state.write_u8(1);
            hash_function_ref(f, depth, state);
        }
    }
}

pub(crate) fn hash_function_ref<H: Hasher>(f: &FunctionRef, depth: usize, state: &mut H) {
    std::mem::discriminant(f).hash(state);
    match f {
        FunctionRef::Primitive(p) => p.hash(state),
        FunctionRef::TypedPrimitive { prim, args, output } => {
            prim.hash(state);
            hash_seq(args, depth, state);
            hash_av(output, depth, state);
        }
        FunctionRef::Partial { func, args } => {
            hash_function_ref(func, depth, state);
            hash_seq(args, depth, state);
        }
        FunctionRef::Virtual { args, output } => {
            hash_seq(args, depth, state);
            hash_av(output, depth, state);
        }
        FunctionRef::Graph { name } => name.hash(state),
    }
}

fn hash_seq<H: Hasher>(items: &[AbstractValue], depth: usize, state: &mut H) {
    state.write_usize(items.len());
    for item in items {
        hash_av(item, depth, state);
    }
}

fn hash_unordered<T, H: Hasher>(items: &[T], state: &mut H, f: impl Fn(&T, &mut DefaultHasher)) {
    let mut sum: u64 = 0;
    for item in items {
        let mut hasher = DefaultHasher::new();
        f(item, &mut hasher);
        sum = sum.wrapping_add(hasher.finish());
    }
    state.write_usize(items.len());
    state.write_u64(sum);
}
