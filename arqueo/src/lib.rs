//! Arqueo: movement ledger and reconciliation engine for multi-tenant cash
//! funds.
//!
//! The [`FundService`] facade wires the storage, ledger and reconciliation
//! crates together and exposes the operations collaborating systems call.

mod collaborators;
mod guard;
mod service;

pub use collaborators::{
    IdentityProvider, Notification, NotificationDispatcher, ProviderDirectory, ProviderInfo,
    StaticIdentity, StaticProviderDirectory, TracingDispatcher,
};
pub use guard::{EditGuard, EditPass};
pub use service::{FundService, FundServiceConfig, MovementDraft, MutationOutcome};
