//! Constants bounding how far inference may refine before widening.
//!
//! These are the defaults of [`crate::config::InferenceConfig`].

/// Maximum number of concrete value candidates a relaxed merge keeps in a
/// `Possibilities` set before widening the VALUE track to `ANYTHING`.
/// Function candidates are never widened.
pub const MAX_POSSIBILITIES: usize = 16;

/// Maximum number of pendings the loop may force within one run.
/// Exceeding it is reported as a deadlock.
pub const MAX_FORCED_RESOLUTIONS: usize = 10_000;

/// Depth to which cyclic abstract values are unfolded when hashing.
pub const CYCLIC_HASH_DEPTH: usize = 4;
