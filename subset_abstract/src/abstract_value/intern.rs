//! Thread-local hash-consing of acyclic abstract values.
//!
//! The table holds weak references, so interning never keeps a value alive.
//! Dead entries are pruned from a bucket whenever the bucket is probed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Weak;

use super::structural;
use super::{AbstractKind, AbstractValue, Node};

thread_local! {
    static INTERNER: RefCell<HashMap<u64, Vec<Weak<Node>>>> = RefCell::new(HashMap::new());
}

/// Return the canonical instance for `kind`, creating it if needed.
///
/// Every child of `kind` must already be interned.
pub(super) fn intern(kind: AbstractKind) -> AbstractValue {
    let hash = structural::full_hash(&kind);
    INTERNER.with(|table| {
        let mut table = table.borrow_mut();
        let bucket = table.entry(hash).or_default();
        bucket.retain(|weak| weak.strong_count() > 0);
        for weak in bucket.iter() {
            if let Some(node) = weak.upgrade() {
                let existing = AbstractValue::from_rc(node);
                if structural::kind_eq(existing.kind(), &kind) {
                    return existing;
                }
            }
        }
        let created = AbstractValue::from_parts(kind, Some(hash), true);
        bucket.push(created.downgrade());
        created
    })
}

/// Number of live interned values on this thread.
#[cfg(test)]
pub(crate) fn live_count() -> usize {
    INTERNER.with(|table| {
        table
            .borrow()
            .values()
            .flat_map(|bucket| bucket.iter())
            .filter(|weak| weak.strong_count() > 0)
            .count()
    })
}
