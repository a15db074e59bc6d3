use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{CurrencyMap, MovementId};

/// Record of one physical cash count against the drawer.
///
/// `diff` is `counted - recorded` per currency. Editing a closing mutates the
/// same record and re-runs reconciliation; it never creates a second one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyClosing {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub closing_date: NaiveDate,
    pub manager: String,
    pub counted: CurrencyMap<i64>,
    pub recorded: CurrencyMap<i64>,
    pub diff: CurrencyMap<i64>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub breakdown: CurrencyMap<BTreeMap<i64, u32>>,
    #[serde(default)]
    pub resolution: Option<AdjustmentResolution>,
}

impl DailyClosing {
    pub fn generate_id(created_at: DateTime<Utc>) -> String {
        format!("{:013}-cierre", created_at.timestamp_millis())
    }
}

/// Audit summary of what an edit-reconciliation did to the synthetic
/// adjustment movements of a closing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentResolution {
    pub removed: Vec<MovementId>,
    pub note: String,
    pub post_balance: CurrencyMap<i64>,
}
