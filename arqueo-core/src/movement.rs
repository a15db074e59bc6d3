use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{AccountId, Currency};

/// Identifier derived from the creation instant plus the account code, so
/// lexicographic order on ids matches chronological order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(String);

impl MovementId {
    pub fn generate(created_at: DateTime<Utc>, account: AccountId) -> Self {
        Self(format!(
            "{:013}-{}",
            created_at.timestamp_millis(),
            account.as_str()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MovementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MovementId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for MovementId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Bookkeeping category of a movement.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Income,
    Expense,
    OtherIncome,
    MiscExpense,
    Informational,
}

impl MovementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Income => "income",
            MovementKind::Expense => "expense",
            MovementKind::OtherIncome => "other_income",
            MovementKind::MiscExpense => "misc_expense",
            MovementKind::Informational => "informational",
        }
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(MovementKind::Income),
            "expense" => Ok(MovementKind::Expense),
            "other_income" => Ok(MovementKind::OtherIncome),
            "misc_expense" => Ok(MovementKind::MiscExpense),
            "informational" => Ok(MovementKind::Informational),
            other => Err(format!("unknown movement kind: {other}")),
        }
    }
}

/// Ownership class of a movement, assigned once at creation. System classes
/// are owned by the reconciler and refuse ordinary edit/delete paths.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementClass {
    Ordinary,
    SystemAdjustment,
    SystemInformational,
}

impl MovementClass {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementClass::Ordinary => "ordinary",
            MovementClass::SystemAdjustment => "system_adjustment",
            MovementClass::SystemInformational => "system_informational",
        }
    }

    pub fn is_system(self) -> bool {
        !matches!(self, MovementClass::Ordinary)
    }
}

impl fmt::Display for MovementClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ordinary" => Ok(MovementClass::Ordinary),
            "system_adjustment" => Ok(MovementClass::SystemAdjustment),
            "system_informational" => Ok(MovementClass::SystemInformational),
            other => Err(format!("unknown movement class: {other}")),
        }
    }
}

/// A single credit or debit entry against one account/currency pair.
///
/// Exactly one of `amount_credit`/`amount_debit` is non-zero for well-formed
/// ordinary and adjustment movements; informational movements carry both
/// zero. Amounts are integral minor currency units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movement {
    pub id: MovementId,
    pub created_at: DateTime<Utc>,
    pub account: AccountId,
    pub currency: Currency,
    pub provider_code: String,
    pub invoice_number: String,
    pub kind: MovementKind,
    pub class: MovementClass,
    pub amount_credit: i64,
    pub amount_debit: i64,
    pub manager: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub is_audited: bool,
    #[serde(default)]
    pub original_entry_id: Option<String>,
    #[serde(default)]
    pub audit_history: Vec<AuditHistoryEntry>,
    #[serde(default)]
    pub breakdown: Option<BTreeMap<i64, u32>>,
}

impl Movement {
    /// Signed contribution of this movement to its currency balance.
    pub fn delta(&self) -> i64 {
        self.amount_credit - self.amount_debit
    }
}

/// Partial view of a movement holding only the audited fields that changed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<MovementKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_credit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_debit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,
}

impl MovementPatch {
    pub fn is_empty(&self) -> bool {
        self.provider_code.is_none()
            && self.invoice_number.is_none()
            && self.kind.is_none()
            && self.amount_credit.is_none()
            && self.amount_debit.is_none()
            && self.manager.is_none()
            && self.notes.is_none()
            && self.currency.is_none()
    }
}

/// One field-level edit record: only fields that differ appear on both sides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditHistoryEntry {
    pub at: DateTime<Utc>,
    pub before: MovementPatch,
    pub after: MovementPatch,
}
