//! Daily closing reconciliation: comparing a physical cash count against the
//! ledger and materializing the difference as synthetic adjustment movements.

mod reconciler;

pub use reconciler::{ClosingInput, Reconciler, ADJUSTMENT_ACCOUNT, SYSTEM_MANAGER, SYSTEM_PROVIDER};
