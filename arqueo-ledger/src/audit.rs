use chrono::{DateTime, Utc};

use arqueo_core::{AuditHistoryEntry, FundError, FundResult, Movement, MovementPatch};

/// Maximum number of edits a single movement may accumulate.
pub const MAX_EDITS: usize = 5;

/// Diff `before` against `after` over the audited field set and append the
/// result to `existing`. Refuses outright once the cap is reached; the stored
/// history is never truncated to make room.
pub fn record_change(
    before: &Movement,
    after: &Movement,
    existing: &[AuditHistoryEntry],
    at: DateTime<Utc>,
) -> FundResult<Vec<AuditHistoryEntry>> {
    if existing.len() >= MAX_EDITS {
        return Err(FundError::AuditCapExceeded {
            id: before.id.to_string(),
            max: MAX_EDITS,
        });
    }
    let (changed_before, changed_after) = diff(before, after);
    let mut history = existing.to_vec();
    if !changed_before.is_empty() || !changed_after.is_empty() {
        history.push(AuditHistoryEntry {
            at,
            before: changed_before,
            after: changed_after,
        });
    }
    Ok(history)
}

/// Bound a history to five entries: the creation entry and the most recent
/// one always survive, plus three interior samples at deterministic evenly
/// spaced indices. Idempotent by construction.
pub fn compress(history: &[AuditHistoryEntry]) -> Vec<AuditHistoryEntry> {
    let n = history.len();
    if n <= MAX_EDITS {
        return history.to_vec();
    }
    let step = (n - 2) / 4;
    let mut keep = vec![0];
    for k in 1..=3 {
        let idx = (k * step).clamp(1, n - 2);
        if !keep.contains(&idx) {
            keep.push(idx);
        }
    }
    keep.push(n - 1);
    keep.into_iter().map(|idx| history[idx].clone()).collect()
}

/// Reconstruct the as-of-now values of the audited fields by replaying the
/// `after` side of every entry in chronological order. A single entry's
/// `before` never reflects the live values of fields it did not touch.
pub fn replay(history: &[AuditHistoryEntry]) -> MovementPatch {
    let mut current = MovementPatch::default();
    for entry in history {
        let after = &entry.after;
        if after.provider_code.is_some() {
            current.provider_code = after.provider_code.clone();
        }
        if after.invoice_number.is_some() {
            current.invoice_number = after.invoice_number.clone();
        }
        if after.kind.is_some() {
            current.kind = after.kind;
        }
        if after.amount_credit.is_some() {
            current.amount_credit = after.amount_credit;
        }
        if after.amount_debit.is_some() {
            current.amount_debit = after.amount_debit;
        }
        if after.manager.is_some() {
            current.manager = after.manager.clone();
        }
        if after.notes.is_some() {
            current.notes = after.notes.clone();
        }
        if after.currency.is_some() {
            current.currency = after.currency;
        }
    }
    current
}

fn diff(before: &Movement, after: &Movement) -> (MovementPatch, MovementPatch) {
    let mut b = MovementPatch::default();
    let mut a = MovementPatch::default();
    if before.provider_code != after.provider_code {
        b.provider_code = Some(before.provider_code.clone());
        a.provider_code = Some(after.provider_code.clone());
    }
    if before.invoice_number != after.invoice_number {
        b.invoice_number = Some(before.invoice_number.clone());
        a.invoice_number = Some(after.invoice_number.clone());
    }
    if before.kind != after.kind {
        b.kind = Some(before.kind);
        a.kind = Some(after.kind);
    }
    if before.amount_credit != after.amount_credit {
        b.amount_credit = Some(before.amount_credit);
        a.amount_credit = Some(after.amount_credit);
    }
    if before.amount_debit != after.amount_debit {
        b.amount_debit = Some(before.amount_debit);
        a.amount_debit = Some(after.amount_debit);
    }
    if before.manager != after.manager {
        b.manager = Some(before.manager.clone());
        a.manager = Some(after.manager.clone());
    }
    if before.notes != after.notes {
        b.notes = Some(before.notes.clone());
        a.notes = Some(after.notes.clone());
    }
    if before.currency != after.currency {
        b.currency = Some(before.currency);
        a.currency = Some(after.currency);
    }
    (b, a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arqueo_core::{AccountId, Currency, MovementClass, MovementId, MovementKind};
    use chrono::TimeZone;

    fn sample_movement(notes: &str, credit: i64) -> Movement {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap();
        Movement {
            id: MovementId::generate(at, AccountId::FondoGeneral),
            created_at: at,
            account: AccountId::FondoGeneral,
            currency: Currency::Crc,
            provider_code: "P001".into(),
            invoice_number: "F-1".into(),
            kind: MovementKind::Income,
            class: MovementClass::Ordinary,
            amount_credit: credit,
            amount_debit: 0,
            manager: "Ana".into(),
            notes: notes.into(),
            is_audited: false,
            original_entry_id: None,
            audit_history: Vec::new(),
            breakdown: None,
        }
    }

    fn entry_at(minute: u32) -> AuditHistoryEntry {
        AuditHistoryEntry {
            at: Utc.with_ymd_and_hms(2024, 3, 5, 9, minute, 0).unwrap(),
            before: MovementPatch {
                notes: Some(format!("v{}", minute)),
                ..Default::default()
            },
            after: MovementPatch {
                notes: Some(format!("v{}", minute + 1)),
                ..Default::default()
            },
        }
    }

    #[test]
    fn records_only_changed_fields() {
        let before = sample_movement("old", 1_000);
        let mut after = before.clone();
        after.notes = "new".into();
        after.amount_credit = 1_500;
        let history = record_change(&before, &after, &[], Utc::now()).unwrap();
        assert_eq!(history.len(), 1);
        let entry = &history[0];
        assert_eq!(entry.before.notes.as_deref(), Some("old"));
        assert_eq!(entry.after.notes.as_deref(), Some("new"));
        assert_eq!(entry.before.amount_credit, Some(1_000));
        assert_eq!(entry.after.amount_credit, Some(1_500));
        assert!(entry.before.manager.is_none());
        assert!(entry.before.provider_code.is_none());
    }

    #[test]
    fn rejects_the_sixth_edit() {
        let before = sample_movement("old", 1_000);
        let mut after = before.clone();
        after.notes = "new".into();
        let existing: Vec<_> = (0..MAX_EDITS as u32).map(entry_at).collect();
        let err = record_change(&before, &after, &existing, Utc::now()).unwrap_err();
        assert!(matches!(err, FundError::AuditCapExceeded { max: 5, .. }));
    }

    #[test]
    fn compress_keeps_endpoints_and_is_idempotent() {
        let history: Vec<_> = (0..10).map(entry_at).collect();
        let bounded = compress(&history);
        assert_eq!(bounded.len(), 5);
        assert_eq!(bounded[0], history[0]);
        assert_eq!(bounded[4], history[9]);
        // step = (10 - 2) / 4 = 2 -> interior indices 2, 4, 6
        assert_eq!(bounded[1], history[2]);
        assert_eq!(bounded[2], history[4]);
        assert_eq!(bounded[3], history[6]);
        assert_eq!(compress(&bounded), bounded);
    }

    #[test]
    fn compress_leaves_short_histories_alone() {
        let history: Vec<_> = (0..5).map(entry_at).collect();
        assert_eq!(compress(&history), history);
    }

    #[test]
    fn replay_folds_after_patches_in_order() {
        let history = vec![entry_at(1), entry_at(7)];
        let current = replay(&history);
        assert_eq!(current.notes.as_deref(), Some("v8"));
        assert!(current.manager.is_none());
    }
}
