use chrono::{DateTime, Utc};

use arqueo_core::{DailyClosing, FundDocument, FundResult, Movement, MovementId};

use crate::planner::DEFAULT_PAGE_SIZE;

/// Outcome of a durable write.
///
/// `Pending` means the write was issued but its confirmation did not arrive
/// within the bounded timeout; callers treat it as provisionally successful
/// and surface a warning, never a hard failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteAck {
    Confirmed,
    Pending,
}

impl WriteAck {
    pub fn merge(self, other: WriteAck) -> WriteAck {
        if self == WriteAck::Confirmed && other == WriteAck::Confirmed {
            WriteAck::Confirmed
        } else {
            WriteAck::Pending
        }
    }

    pub fn is_confirmed(self) -> bool {
        self == WriteAck::Confirmed
    }
}

/// Continuation point for paginated movement reads: the sort key of the last
/// row of the previous page.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub id: MovementId,
}

/// Filter describing which movements to load from one fund's partition.
#[derive(Clone, Debug)]
pub struct MovementQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub original_entry_id: Option<String>,
    pub cursor: Option<PageCursor>,
    pub page_size: usize,
}

impl Default for MovementQuery {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            original_entry_id: None,
            cursor: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl MovementQuery {
    /// Restrict to movements created within the half-open window `[start, end)`.
    pub fn with_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn with_origin(mut self, original_entry_id: impl Into<String>) -> Self {
        self.original_entry_id = Some(original_entry_id.into());
        self
    }

    pub fn with_cursor(mut self, cursor: PageCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

/// One page of movements ordered by creation time descending, id descending
/// as tiebreak. `next` is present only when more rows may follow.
#[derive(Clone, Debug, Default)]
pub struct MovementPage {
    pub items: Vec<Movement>,
    pub next: Option<PageCursor>,
}

/// Per-fund partitioned movement persistence.
pub trait MovementRepository: Send + Sync {
    fn upsert(&self, company: &str, movement: &Movement) -> FundResult<WriteAck>;

    fn delete(&self, company: &str, id: &MovementId) -> FundResult<WriteAck>;

    fn fetch(&self, company: &str, id: &MovementId) -> FundResult<Option<Movement>>;

    fn page(&self, company: &str, query: &MovementQuery) -> FundResult<MovementPage>;
}

/// Storage for the per-fund balance/configuration document.
///
/// `load` returns the raw stored value so every read passes through the
/// normalizer before anything downstream touches it.
pub trait FundRepository: Send + Sync {
    fn load(&self, company: &str) -> FundResult<Option<serde_json::Value>>;

    fn store(&self, company: &str, document: &FundDocument) -> FundResult<WriteAck>;
}

/// Storage for daily closing records.
pub trait ClosingRepository: Send + Sync {
    fn upsert(&self, company: &str, closing: &DailyClosing) -> FundResult<WriteAck>;

    fn fetch(&self, company: &str, id: &str) -> FundResult<Option<DailyClosing>>;

    fn list(&self, company: &str) -> FundResult<Vec<DailyClosing>>;
}
