//! Domain types shared by the Arqueo cash-fund bookkeeping crates.

mod account;
mod closing;
mod error;
mod fund;
mod money;
mod movement;

pub use account::{default_configuration, AccountConfig, AccountId, Currency, CurrencyMap};
pub use closing::{AdjustmentResolution, DailyClosing};
pub use error::{FundError, FundResult};
pub use fund::{AccountBalance, FundDocument};
pub use money::truncate_amount;
pub use movement::{
    AuditHistoryEntry, Movement, MovementClass, MovementId, MovementKind, MovementPatch,
};
