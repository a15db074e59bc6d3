use chrono::{DateTime, Days, FixedOffset, NaiveDate, Utc};
use tracing::warn;

use arqueo_core::{FundResult, Movement};

use crate::{MovementQuery, MovementRepository};

/// Rows fetched per page when draining a window.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Hard safety cap on pages followed for one window. Hitting it stops the
/// walk with whatever was accumulated instead of looping forever.
pub const MAX_PAGES: usize = 40;

/// Resolved half-open time window plus the cache key identifying it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueryWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub key: String,
}

/// Decide which `[start, end)` window a read should target. Dates are
/// calendar days in the fund's `offset`; the resolved instants are UTC.
///
/// With both bounds set the window spans the full-day range covering the
/// smaller through the larger date (order-normalized). Otherwise it is the
/// single selected day, defaulting to `today`.
pub fn resolve_window(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    today: NaiveDate,
    offset: FixedOffset,
) -> QueryWindow {
    match (from, to) {
        (Some(a), Some(b)) => {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            QueryWindow {
                start: day_start(lo, offset),
                end: day_start(hi + Days::new(1), offset),
                key: format!("range:{lo}..{hi}"),
            }
        }
        (single, other) => {
            let day = single.or(other).unwrap_or(today);
            QueryWindow {
                start: day_start(day, offset),
                end: day_start(day + Days::new(1), offset),
                key: format!("day:{day}"),
            }
        }
    }
}

/// Walk the cursor through every page of the window, newest first. Stops on a
/// short page (exhausted) or at [`MAX_PAGES`].
pub fn drain(
    repo: &dyn MovementRepository,
    company: &str,
    window: &QueryWindow,
) -> FundResult<Vec<Movement>> {
    let mut collected = Vec::new();
    let mut cursor = None;
    for page_index in 0..MAX_PAGES {
        let mut query = MovementQuery::default()
            .with_window(window.start, window.end)
            .with_page_size(DEFAULT_PAGE_SIZE);
        if let Some(resume) = cursor.take() {
            query = query.with_cursor(resume);
        }
        let page = repo.page(company, &query)?;
        collected.extend(page.items);
        match page.next {
            Some(next) => cursor = Some(next),
            None => return Ok(collected),
        }
        if page_index + 1 == MAX_PAGES {
            warn!(
                company,
                key = %window.key,
                pages = MAX_PAGES,
                "movement window hit the page safety cap; returning a truncated read"
            );
        }
    }
    Ok(collected)
}

fn day_start(day: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    day.and_hms_opt(0, 0, 0)
        .and_then(|naive| naive.and_local_timezone(offset).single())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}
