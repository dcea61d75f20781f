//! Abstract-value inference core.
//!
//! An [`AbstractValue`] describes what an expression may evaluate to: its
//! type, its shape, and where known its exact value. This crate provides
//! the value model, the merge of two descriptions of the same site
//! ([`amerge`]), projection to concrete values and types, the structural
//! transform used by broadening and specialization ([`clone`]), and the
//! cooperative loop that resolves values not known yet ([`InferenceLoop`]).
//!
//! ```
//! use subset_abstract::{amerge, AbstractValue, Type};
//!
//! let one = AbstractValue::scalar(1i64, Type::I64).unwrap();
//! let two = AbstractValue::scalar(2i64, Type::I64).unwrap();
//! let merged = amerge(&one, &two, None, false).unwrap();
//! assert_eq!(merged.to_string(), "S(TYPE=Int[64])");
//! ```

// Diagnostics go through `log` and the collector, never straight to stderr.
#![deny(clippy::print_stderr)]

// Value model
pub mod abstract_value;
pub mod types;
pub mod value;

// Algorithms
pub mod broaden;
pub mod clone;
pub mod merge;
pub mod projection;

// Pending values and the inference loop
pub mod scheduler;

// Rendering
pub mod printer;

// Ambient
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod widening;

pub use abstract_value::{
    abstract_union, AbstractKind, AbstractValue, Candidate, Dim, ErrorReason, FunctionRef,
    Possibilities, Primitive, Shape, Slot, ANYTHING, DEAD,
};
pub use broaden::{broaden, Broaden};
pub use clone::{
    abstract_clone, abstract_clone_async, AsyncCloneContext, AsyncCloneVariant, CloneContext,
    CloneVariant, IdentityClone,
};
pub use config::InferenceConfig;
pub use error::{InferResult, InferenceError};
pub use merge::{amerge, Merge, MergeContext};
pub use projection::{build_type_fn, build_value, build_value_or, to_abstract};
pub use scheduler::{InferenceLoop, Pending, PendingFuture, WeakLoop};
pub use types::{FunctionSig, Type};
pub use value::{Record, SymbolicKey, Value};
