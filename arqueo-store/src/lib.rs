//! Storage layer for Arqueo: the partitioned movement store, the fund
//! document record, daily closings, legacy-shape normalization and the
//! window/query planner.

mod cache;
mod normalize;
mod planner;
mod repository;
mod sqlite;

pub use cache::MovementCache;
pub use normalize::{normalize, NormalizedFund};
pub use planner::{drain, resolve_window, QueryWindow, DEFAULT_PAGE_SIZE, MAX_PAGES};
pub use repository::{
    ClosingRepository, FundRepository, MovementPage, MovementQuery, MovementRepository,
    PageCursor, WriteAck,
};
pub use sqlite::SqliteFundStore;
