//! # Reconcile
//!
//! A framework for idempotent state reconciliation.
//!
//! This crate provides the core protocol for converging a managed entity
//! toward a declared desired state: compute the current state, compare it
//! against the desired state, decide the minimal corrective action, and
//! report a structured record of what changed (or would change).
//!
//! ## Core Concepts
//!
//! - **StatusRecord**: the canonical outcome of one operation - result,
//!   message, structured changes, raw output
//! - **Property reconciliation**: scalar compare through a typed registry
//!   of property descriptors
//! - **Set reconciliation**: membership compare with add/remove deltas
//! - **Sequencer**: an ordered list of named steps with failure
//!   short-circuiting, merged into one aggregate [`Report`]
//! - **RunContext**: caller-scoped settings (dry-run, status verbosity)
//!   passed explicitly into every call - there are no ambient globals
//!
//! ## Dry-run
//!
//! Every decision point honors `RunContext::test_mode`. A dry run never
//! invokes a mutator; it still reports the intended change, with the
//! outcome downgraded to [`Outcome::Unknown`] because success could not be
//! verified. At the report boundary `Unknown` maps to `result: None`,
//! which callers must treat as distinct from both pass and fail.
//!
//! ## Idempotence
//!
//! The central invariant: the decided action is `Skip` whenever the
//! current state already equals the desired state. Reconciling twice in
//! succession therefore reports `changed` at most on the first pass.
//!
//! The crate performs no I/O itself. Callers own the accessors and
//! mutators; this crate owns the skip-or-correct decision and the status
//! protocol around it.

pub mod context;
pub mod error;
pub mod property;
pub mod sequence;
pub mod set;
pub mod status;

// Re-export main types at crate root
pub use context::{RunContext, StatusMode};
pub use error::ReconcileError;
pub use property::{
    DesiredValue, PropertyAction, PropertyDescriptor, PropertyKind, PropertyRegistry,
    PropertyState, PropertyValue, fmt_line, reconcile_property,
};
pub use sequence::{FailurePolicy, Sequencer, Step};
pub use set::{
    ItemOutcome, SetAction, SetOp, SetPlan, apply_delta, dedup_preserving_order, reconcile_set,
};
pub use status::{Outcome, Report, StatusBuffer, StatusRecord, ValueChange, SKIP_PREFIX};
