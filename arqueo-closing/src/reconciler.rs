use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

use arqueo_core::{
    truncate_amount, AccountId, AdjustmentResolution, Currency, CurrencyMap, DailyClosing,
    FundDocument, FundError, FundResult, Movement, MovementClass, MovementId, MovementKind,
};
use arqueo_ledger::{apply_mutation, record_change, MutationKind};
use arqueo_store::{ClosingRepository, MovementQuery, MovementRepository, WriteAck, MAX_PAGES};

/// System identity stamped on every reconciler-owned movement.
pub const SYSTEM_MANAGER: &str = "Sistema";

/// Provider sentinel carried by reconciler-owned movements for display.
/// Ownership checks go through [`MovementClass`], never this string.
pub const SYSTEM_PROVIDER: &str = "AJU-SYS";

/// Account the physical count is reconciled against.
pub const ADJUSTMENT_ACCOUNT: AccountId = AccountId::FondoGeneral;

/// Operator-supplied data for creating or editing a daily closing.
#[derive(Clone, Debug)]
pub struct ClosingInput {
    pub closing_date: NaiveDate,
    pub manager: String,
    pub counted: CurrencyMap<Decimal>,
    pub notes: String,
    pub breakdown: CurrencyMap<BTreeMap<i64, u32>>,
}

/// Runs reconciliation against the movement and closing stores. The caller
/// owns persisting the mutated fund document afterwards.
pub struct Reconciler<'a> {
    movements: &'a dyn MovementRepository,
    closings: &'a dyn ClosingRepository,
}

impl<'a> Reconciler<'a> {
    pub fn new(movements: &'a dyn MovementRepository, closings: &'a dyn ClosingRepository) -> Self {
        Self {
            movements,
            closings,
        }
    }

    /// Commit a new closing: persist the record, materialize per-currency
    /// adjustments for any non-zero difference (or one informational
    /// movement when there is none), then seal the ledger up to `now`.
    ///
    /// Adjustments are only generated after the closing record itself is
    /// durably committed; a persistence failure there aborts everything.
    pub fn commit(
        &self,
        company: &str,
        doc: &mut FundDocument,
        input: ClosingInput,
        now: DateTime<Utc>,
    ) -> FundResult<(DailyClosing, WriteAck)> {
        validate_manager(&input.manager)?;
        let recorded = drawer_balances(doc);
        let counted = truncate_counts(&input.counted);
        let diff = subtract(&counted, &recorded);

        let closing = DailyClosing {
            id: DailyClosing::generate_id(now),
            created_at: now,
            closing_date: input.closing_date,
            manager: input.manager,
            counted,
            recorded,
            diff,
            notes: input.notes,
            breakdown: input.breakdown,
            resolution: None,
        };
        let mut ack = ClosingRepository::upsert(self.closings, company, &closing)?;

        ack = ack.merge(self.materialize_adjustments(company, doc, &closing, now)?);

        doc.locked_until = Some(now);
        info!(
            company,
            closing = %closing.id,
            diff_crc = closing.diff.crc,
            diff_usd = closing.diff.usd,
            "daily closing committed; ledger sealed"
        );
        Ok((closing, ack))
    }

    /// Re-run reconciliation for an existing closing.
    ///
    /// The new difference is computed against a base balance that excludes
    /// the contribution of this closing's previously generated adjustments;
    /// computing against the live balance would double-count them.
    pub fn edit(
        &self,
        company: &str,
        doc: &mut FundDocument,
        id: &str,
        input: ClosingInput,
        now: DateTime<Utc>,
    ) -> FundResult<(DailyClosing, WriteAck)> {
        validate_manager(&input.manager)?;
        let mut closing =
            ClosingRepository::fetch(self.closings, company, id)?.ok_or(FundError::NotFound {
                entity: "closing",
                id: id.to_string(),
            })?;

        let prior = self.fetch_owned_movements(company, id)?;
        let mut base = drawer_balances(doc);
        for movement in &prior {
            *base.get_mut(movement.currency) -= movement.delta();
        }

        let counted = truncate_counts(&input.counted);
        let diff = subtract(&counted, &base);
        let mut removed = Vec::new();
        let mut updated = 0usize;
        let mut created = 0usize;
        let all_zero = diff.iter().all(|(_, value)| *value == 0);

        for (offset, currency) in Currency::ALL.into_iter().enumerate() {
            let target = *diff.get(currency);
            let existing = prior
                .iter()
                .find(|m| m.class == MovementClass::SystemAdjustment && m.currency == currency);
            match (existing, target) {
                (Some(adjustment), 0) => {
                    self.retract(company, doc, adjustment)?;
                    removed.push(adjustment.id.clone());
                }
                (Some(adjustment), _) => {
                    let after = self.reshape(adjustment, target, now)?;
                    apply_mutation(
                        doc,
                        MutationKind::Edit,
                        Some(adjustment),
                        Some(&after),
                        &[],
                    )?;
                    self.movements.upsert(company, &after)?;
                    updated += 1;
                }
                (None, 0) => {}
                (None, _) => {
                    let adjustment = build_adjustment(
                        &closing.id,
                        currency,
                        target,
                        now + Duration::milliseconds(offset as i64),
                    );
                    apply_mutation(doc, MutationKind::Create, None, Some(&adjustment), &[])?;
                    self.movements.upsert(company, &adjustment)?;
                    created += 1;
                }
            }
        }

        let informational = prior
            .iter()
            .find(|m| m.class == MovementClass::SystemInformational);
        if all_zero {
            if informational.is_none() {
                let marker = build_informational(&closing.id, now);
                apply_mutation(doc, MutationKind::Create, None, Some(&marker), &[])?;
                self.movements.upsert(company, &marker)?;
                created += 1;
            }
        } else if let Some(marker) = informational {
            self.retract(company, doc, marker)?;
            removed.push(marker.id.clone());
        }

        let post_balance = drawer_balances(doc);
        closing.closing_date = input.closing_date;
        closing.manager = input.manager;
        closing.notes = input.notes;
        closing.breakdown = input.breakdown;
        closing.counted = counted;
        closing.recorded = base;
        closing.diff = diff;
        closing.resolution = Some(AdjustmentResolution {
            removed: removed.clone(),
            note: format!(
                "re-reconciled: {} removed, {updated} updated, {created} created",
                removed.len()
            ),
            post_balance,
        });
        let ack = ClosingRepository::upsert(self.closings, company, &closing)?;
        info!(
            company,
            closing = %closing.id,
            removed = removed.len(),
            updated,
            created,
            "daily closing edited and re-reconciled"
        );
        Ok((closing, ack))
    }

    fn materialize_adjustments(
        &self,
        company: &str,
        doc: &mut FundDocument,
        closing: &DailyClosing,
        now: DateTime<Utc>,
    ) -> FundResult<WriteAck> {
        let mut ack = WriteAck::Confirmed;
        if closing.diff.iter().all(|(_, value)| *value == 0) {
            let marker = build_informational(&closing.id, now);
            apply_mutation(doc, MutationKind::Create, None, Some(&marker), &[])?;
            ack = ack.merge(self.movements.upsert(company, &marker)?);
            debug!(company, closing = %closing.id, "zero-difference closing recorded");
            return Ok(ack);
        }
        for (offset, (currency, value)) in closing.diff.iter().enumerate() {
            if *value == 0 {
                continue;
            }
            let adjustment = build_adjustment(
                &closing.id,
                currency,
                *value,
                now + Duration::milliseconds(offset as i64),
            );
            apply_mutation(doc, MutationKind::Create, None, Some(&adjustment), &[])?;
            ack = ack.merge(self.movements.upsert(company, &adjustment)?);
            debug!(
                company,
                closing = %closing.id,
                currency = %currency,
                amount = *value,
                "adjustment movement materialized"
            );
        }
        Ok(ack)
    }

    fn retract(
        &self,
        company: &str,
        doc: &mut FundDocument,
        movement: &Movement,
    ) -> FundResult<()> {
        apply_mutation(doc, MutationKind::Delete, Some(movement), None, &[])?;
        self.movements.delete(company, &movement.id)?;
        Ok(())
    }

    /// Rebuild an existing adjustment for a new signed difference, keeping
    /// its identity and extending its own audit history when under the cap.
    fn reshape(&self, adjustment: &Movement, target: i64, now: DateTime<Utc>) -> FundResult<Movement> {
        let mut after = adjustment.clone();
        set_adjustment_amounts(&mut after, target);
        match record_change(adjustment, &after, &adjustment.audit_history, now) {
            Ok(history) => after.audit_history = history,
            Err(FundError::AuditCapExceeded { .. }) => {
                after.audit_history = adjustment.audit_history.clone();
            }
            Err(other) => return Err(other),
        }
        after.is_audited = true;
        Ok(after)
    }

    fn fetch_owned_movements(&self, company: &str, closing_id: &str) -> FundResult<Vec<Movement>> {
        let mut collected = Vec::new();
        let mut cursor = None;
        for _ in 0..MAX_PAGES {
            let mut query = MovementQuery::default().with_origin(closing_id);
            if let Some(resume) = cursor.take() {
                query = query.with_cursor(resume);
            }
            let page = self.movements.page(company, &query)?;
            collected.extend(page.items);
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(collected)
    }
}

fn validate_manager(manager: &str) -> FundResult<()> {
    if manager.trim().is_empty() {
        return Err(FundError::Validation {
            field: "manager",
            reason: "a manager name is required to commit a closing".to_string(),
        });
    }
    Ok(())
}

fn drawer_balances(doc: &FundDocument) -> CurrencyMap<i64> {
    let mut balances = CurrencyMap::default();
    for currency in Currency::ALL {
        *balances.get_mut(currency) = doc
            .balance(ADJUSTMENT_ACCOUNT, currency)
            .map(|entry| entry.current_balance)
            .unwrap_or(0);
    }
    balances
}

fn truncate_counts(counted: &CurrencyMap<Decimal>) -> CurrencyMap<i64> {
    let mut result = CurrencyMap::default();
    for (currency, value) in counted.iter() {
        *result.get_mut(currency) = truncate_amount(*value);
    }
    result
}

fn subtract(counted: &CurrencyMap<i64>, recorded: &CurrencyMap<i64>) -> CurrencyMap<i64> {
    let mut diff = CurrencyMap::default();
    for currency in Currency::ALL {
        *diff.get_mut(currency) = counted.get(currency) - recorded.get(currency);
    }
    diff
}

fn build_adjustment(
    closing_id: &str,
    currency: Currency,
    diff: i64,
    created_at: DateTime<Utc>,
) -> Movement {
    let mut movement = Movement {
        id: MovementId::generate(created_at, ADJUSTMENT_ACCOUNT),
        created_at,
        account: ADJUSTMENT_ACCOUNT,
        currency,
        provider_code: SYSTEM_PROVIDER.to_string(),
        invoice_number: closing_id.to_string(),
        kind: MovementKind::OtherIncome,
        class: MovementClass::SystemAdjustment,
        amount_credit: 0,
        amount_debit: 0,
        manager: SYSTEM_MANAGER.to_string(),
        notes: "Ajuste por cierre de caja".to_string(),
        is_audited: false,
        original_entry_id: Some(closing_id.to_string()),
        audit_history: Vec::new(),
        breakdown: None,
    };
    set_adjustment_amounts(&mut movement, diff);
    movement
}

fn set_adjustment_amounts(movement: &mut Movement, diff: i64) {
    if diff >= 0 {
        movement.kind = MovementKind::OtherIncome;
        movement.amount_credit = diff;
        movement.amount_debit = 0;
    } else {
        movement.kind = MovementKind::MiscExpense;
        movement.amount_credit = 0;
        movement.amount_debit = -diff;
    }
}

fn build_informational(closing_id: &str, created_at: DateTime<Utc>) -> Movement {
    Movement {
        id: MovementId::generate(created_at, ADJUSTMENT_ACCOUNT),
        created_at,
        account: ADJUSTMENT_ACCOUNT,
        currency: Currency::Crc,
        provider_code: SYSTEM_PROVIDER.to_string(),
        invoice_number: closing_id.to_string(),
        kind: MovementKind::Informational,
        class: MovementClass::SystemInformational,
        amount_credit: 0,
        amount_debit: 0,
        manager: SYSTEM_MANAGER.to_string(),
        notes: "Cierre completado sin diferencias".to_string(),
        is_audited: false,
        original_entry_id: Some(closing_id.to_string()),
        audit_history: Vec::new(),
        breakdown: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arqueo_store::SqliteFundStore;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tempfile::{tempdir, TempDir};

    fn setup() -> (TempDir, SqliteFundStore, FundDocument) {
        let dir = tempdir().unwrap();
        let store = SqliteFundStore::new(dir.path().join("arqueo.db")).unwrap();
        let doc = FundDocument::default_for("acme");
        (dir, store, doc)
    }

    fn input(counted_crc: Decimal, counted_usd: Decimal) -> ClosingInput {
        ClosingInput {
            closing_date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            manager: "Ana".into(),
            counted: CurrencyMap {
                crc: counted_crc,
                usd: counted_usd,
            },
            notes: String::new(),
            breakdown: CurrencyMap::default(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 18, 0, 0).unwrap()
    }

    fn drawer_crc(doc: &FundDocument) -> i64 {
        doc.balance(ADJUSTMENT_ACCOUNT, Currency::Crc)
            .unwrap()
            .current_balance
    }

    fn owned(store: &SqliteFundStore, closing_id: &str) -> Vec<Movement> {
        Reconciler::new(store, store)
            .fetch_owned_movements("acme", closing_id)
            .unwrap()
    }

    #[test]
    fn surplus_count_creates_one_credit_adjustment() {
        let (_dir, store, mut doc) = setup();
        doc.balance_mut(ADJUSTMENT_ACCOUNT, Currency::Crc)
            .unwrap()
            .current_balance = 9_700;

        let reconciler = Reconciler::new(&store, &store);
        let (closing, ack) = reconciler
            .commit("acme", &mut doc, input(dec!(10000), dec!(0)), now())
            .unwrap();
        assert!(ack.is_confirmed());
        assert_eq!(closing.diff.crc, 300);
        assert_eq!(drawer_crc(&doc), 10_000);

        let adjustments = owned(&store, &closing.id);
        assert_eq!(adjustments.len(), 1);
        let adjustment = &adjustments[0];
        assert_eq!(adjustment.class, MovementClass::SystemAdjustment);
        assert_eq!(adjustment.kind, MovementKind::OtherIncome);
        assert_eq!(adjustment.amount_credit, 300);
        assert_eq!(adjustment.manager, SYSTEM_MANAGER);
        assert_eq!(adjustment.original_entry_id.as_deref(), Some(closing.id.as_str()));
    }

    #[test]
    fn shortage_creates_a_debit_adjustment() {
        let (_dir, store, mut doc) = setup();
        doc.balance_mut(ADJUSTMENT_ACCOUNT, Currency::Usd)
            .unwrap()
            .current_balance = 500;

        let reconciler = Reconciler::new(&store, &store);
        let (closing, _) = reconciler
            .commit("acme", &mut doc, input(dec!(0), dec!(420)), now())
            .unwrap();
        assert_eq!(closing.diff.usd, -80);

        let adjustments = owned(&store, &closing.id);
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].kind, MovementKind::MiscExpense);
        assert_eq!(adjustments[0].amount_debit, 80);
        assert_eq!(
            doc.balance(ADJUSTMENT_ACCOUNT, Currency::Usd)
                .unwrap()
                .current_balance,
            420
        );
    }

    #[test]
    fn zero_difference_creates_one_informational_marker() {
        let (_dir, store, mut doc) = setup();
        let reconciler = Reconciler::new(&store, &store);
        let (closing, _) = reconciler
            .commit("acme", &mut doc, input(dec!(0), dec!(0)), now())
            .unwrap();

        let markers = owned(&store, &closing.id);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].class, MovementClass::SystemInformational);
        assert_eq!(markers[0].delta(), 0);
        assert_eq!(drawer_crc(&doc), 0);
    }

    #[test]
    fn commit_seals_the_ledger() {
        let (_dir, store, mut doc) = setup();
        let reconciler = Reconciler::new(&store, &store);
        reconciler
            .commit("acme", &mut doc, input(dec!(0), dec!(0)), now())
            .unwrap();
        assert_eq!(doc.locked_until, Some(now()));
        assert!(doc.is_locked(now() - Duration::hours(1)));
    }

    #[test]
    fn missing_manager_aborts_before_any_write() {
        let (_dir, store, mut doc) = setup();
        let reconciler = Reconciler::new(&store, &store);
        let mut bad = input(dec!(100), dec!(0));
        bad.manager = "  ".into();
        let err = reconciler
            .commit("acme", &mut doc, bad, now())
            .unwrap_err();
        assert!(matches!(err, FundError::Validation { field: "manager", .. }));
        assert!(ClosingRepository::list(&store, "acme").unwrap().is_empty());
        assert_eq!(drawer_crc(&doc), 0);
    }

    #[test]
    fn edit_retracts_an_adjustment_that_is_no_longer_needed() {
        let (_dir, store, mut doc) = setup();
        doc.balance_mut(ADJUSTMENT_ACCOUNT, Currency::Crc)
            .unwrap()
            .current_balance = 9_700;
        let reconciler = Reconciler::new(&store, &store);
        let (closing, _) = reconciler
            .commit("acme", &mut doc, input(dec!(10000), dec!(0)), now())
            .unwrap();
        assert_eq!(drawer_crc(&doc), 10_000);

        // New count matches the pre-adjustment balance: the +300 adjustment
        // must be removed and the balance must return to 9,700.
        let (edited, _) = reconciler
            .edit(
                "acme",
                &mut doc,
                &closing.id,
                input(dec!(9700), dec!(0)),
                now() + Duration::hours(1),
            )
            .unwrap();
        assert_eq!(drawer_crc(&doc), 9_700);
        assert_eq!(edited.diff.crc, 0);

        let remaining = owned(&store, &closing.id);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].class, MovementClass::SystemInformational);

        let resolution = edited.resolution.unwrap();
        assert_eq!(resolution.removed.len(), 1);
        assert_eq!(resolution.post_balance.crc, 9_700);
    }

    #[test]
    fn edit_recomputes_against_the_base_not_the_live_balance() {
        let (_dir, store, mut doc) = setup();
        doc.balance_mut(ADJUSTMENT_ACCOUNT, Currency::Crc)
            .unwrap()
            .current_balance = 9_700;
        let reconciler = Reconciler::new(&store, &store);
        let (closing, _) = reconciler
            .commit("acme", &mut doc, input(dec!(10000), dec!(0)), now())
            .unwrap();

        // Counted revised to 10,100: the diff against the 9,700 base is +400,
        // not +100 against the already-adjusted live balance.
        let (edited, _) = reconciler
            .edit(
                "acme",
                &mut doc,
                &closing.id,
                input(dec!(10100), dec!(0)),
                now() + Duration::hours(1),
            )
            .unwrap();
        assert_eq!(edited.diff.crc, 400);
        assert_eq!(drawer_crc(&doc), 10_100);

        let adjustments = owned(&store, &closing.id);
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].amount_credit, 400);
        assert_eq!(adjustments[0].class, MovementClass::SystemAdjustment);
        assert_eq!(adjustments[0].audit_history.len(), 1);
    }

    #[test]
    fn edit_creates_an_adjustment_for_a_newly_divergent_currency() {
        let (_dir, store, mut doc) = setup();
        let reconciler = Reconciler::new(&store, &store);
        let (closing, _) = reconciler
            .commit("acme", &mut doc, input(dec!(0), dec!(0)), now())
            .unwrap();

        let (edited, _) = reconciler
            .edit(
                "acme",
                &mut doc,
                &closing.id,
                input(dec!(0), dec!(250)),
                now() + Duration::hours(1),
            )
            .unwrap();
        assert_eq!(edited.diff.usd, 250);
        assert_eq!(
            doc.balance(ADJUSTMENT_ACCOUNT, Currency::Usd)
                .unwrap()
                .current_balance,
            250
        );
        let remaining = owned(&store, &closing.id);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].class, MovementClass::SystemAdjustment);
        assert_eq!(remaining[0].currency, Currency::Usd);
    }

    #[test]
    fn editing_a_missing_closing_is_not_found() {
        let (_dir, store, mut doc) = setup();
        let reconciler = Reconciler::new(&store, &store);
        let err = reconciler
            .edit("acme", &mut doc, "no-such-id", input(dec!(0), dec!(0)), now())
            .unwrap_err();
        assert!(matches!(err, FundError::NotFound { entity: "closing", .. }));
    }
}
