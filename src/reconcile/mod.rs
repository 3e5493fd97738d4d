//! Status reconciliation
//!
//! Runs independently of the listeners and meets them only through the store:
//! resolves relay source hashes, reports transactions stuck unfinished and
//! recomputes wrapper statuses from the legs present.

mod engine;
pub mod status;

pub use engine::StatusReconciler;
