//! Balance bookkeeping for Arqueo funds.
//!
//! The ledger is the single source of truth for current balances: it is
//! advanced by signed deltas only and never recomputed by re-summing a
//! possibly partial movement window.

mod audit;
mod balance;

pub use audit::{compress, record_change, replay, MAX_EDITS};
pub use balance::{
    apply_initial_overrides, apply_mutation, balance_before, InitialOverride, MutationKind,
};
