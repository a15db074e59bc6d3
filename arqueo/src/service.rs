use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use arqueo_closing::{ClosingInput, Reconciler};
use arqueo_core::{
    truncate_amount, AccountId, AuditHistoryEntry, Currency, DailyClosing, FundDocument,
    FundError, FundResult, Movement, MovementClass, MovementId, MovementKind, MovementPatch,
};
use arqueo_ledger::{
    apply_initial_overrides, apply_mutation, balance_before, record_change, replay,
    InitialOverride, MutationKind,
};
use arqueo_store::{
    drain, normalize, resolve_window, ClosingRepository, FundRepository, MovementCache,
    MovementRepository, WriteAck,
};

use crate::collaborators::{
    IdentityProvider, Notification, NotificationDispatcher, ProviderDirectory,
};
use crate::guard::EditGuard;

/// How a completed mutation was acknowledged by storage.
///
/// `PendingConfirmation` is a warning, not a failure: the local cache already
/// reflects the new state and the remote store is expected to converge.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MutationOutcome {
    Confirmed,
    PendingConfirmation,
}

impl From<WriteAck> for MutationOutcome {
    fn from(ack: WriteAck) -> Self {
        if ack.is_confirmed() {
            MutationOutcome::Confirmed
        } else {
            MutationOutcome::PendingConfirmation
        }
    }
}

/// Operator-entered data for a new movement. Amounts arrive as decimals and
/// are truncated to integral minor units at this boundary.
#[derive(Clone, Debug)]
pub struct MovementDraft {
    pub account: AccountId,
    pub currency: Currency,
    pub provider_code: String,
    pub invoice_number: String,
    pub kind: MovementKind,
    pub amount_credit: Decimal,
    pub amount_debit: Decimal,
    pub notes: String,
    pub breakdown: Option<BTreeMap<i64, u32>>,
}

/// Wiring for [`FundService`].
pub struct FundServiceConfig {
    pub movements: Arc<dyn MovementRepository>,
    pub funds: Arc<dyn FundRepository>,
    pub closings: Arc<dyn ClosingRepository>,
    pub identity: Arc<dyn IdentityProvider>,
    pub directory: Arc<dyn ProviderDirectory>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub edit_cooldown: Duration,
    /// Fixed offset whose calendar days define movement windows.
    pub timezone: FixedOffset,
}

/// Facade over the ledger engine: every operation collaborating systems are
/// allowed to invoke goes through here.
pub struct FundService {
    movements: Arc<dyn MovementRepository>,
    funds: Arc<dyn FundRepository>,
    closings: Arc<dyn ClosingRepository>,
    identity: Arc<dyn IdentityProvider>,
    directory: Arc<dyn ProviderDirectory>,
    notifier: Arc<dyn NotificationDispatcher>,
    timezone: FixedOffset,
    cache: MovementCache,
    guard: EditGuard,
}

impl FundService {
    pub fn new(config: FundServiceConfig) -> Self {
        Self {
            movements: config.movements,
            funds: config.funds,
            closings: config.closings,
            identity: config.identity,
            directory: config.directory,
            notifier: config.notifier,
            timezone: config.timezone,
            cache: MovementCache::new(),
            guard: EditGuard::new(config.edit_cooldown),
        }
    }

    /// Authoritative current balance for one (account, currency) pair.
    pub fn current_balance(
        &self,
        company: &str,
        account: AccountId,
        currency: Currency,
    ) -> FundResult<i64> {
        let doc = self.load_fund(company)?;
        Ok(doc
            .balance(account, currency)
            .map(|entry| entry.current_balance)
            .unwrap_or(0))
    }

    /// Movements within the resolved window, newest first. Repeated renders
    /// of the same window are served from the cache mirror.
    pub fn list_movements(
        &self,
        company: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> FundResult<Vec<Movement>> {
        let today = Utc::now().with_timezone(&self.timezone).date_naive();
        let window = resolve_window(from, to, today, self.timezone);
        if let Some(cached) = self.cache.get(company, &window.key) {
            return Ok(cached);
        }
        let movements = drain(self.movements.as_ref(), company, &window)?;
        self.cache.put(company, &window.key, movements.clone());
        Ok(movements)
    }

    /// Record a new movement and advance the ledger by its delta.
    pub fn record_movement(
        &self,
        company: &str,
        draft: MovementDraft,
    ) -> FundResult<(Movement, MutationOutcome)> {
        let manager = self.identity.acting_user();
        require_non_empty("manager", &manager)?;
        require_non_empty("providerCode", &draft.provider_code)?;
        let credit = truncate_amount(draft.amount_credit);
        let debit = truncate_amount(draft.amount_debit);
        validate_amounts(credit, debit)?;

        let mut doc = self.load_fund(company)?;
        let slot = doc
            .balance(draft.account, draft.currency)
            .ok_or(FundError::Validation {
                field: "account",
                reason: "unknown account/currency pair".to_string(),
            })?;
        if !slot.enabled {
            return Err(FundError::Validation {
                field: "account",
                reason: format!(
                    "account {} is disabled for {}",
                    draft.account, draft.currency
                ),
            });
        }

        // Ids derive from the creation millisecond; bump forward on the rare
        // same-millisecond collision within one account.
        let mut now = Utc::now();
        while self
            .movements
            .fetch(company, &MovementId::generate(now, draft.account))?
            .is_some()
        {
            now += chrono::Duration::milliseconds(1);
        }
        let movement = Movement {
            id: MovementId::generate(now, draft.account),
            created_at: now,
            account: draft.account,
            currency: draft.currency,
            provider_code: draft.provider_code,
            invoice_number: draft.invoice_number,
            kind: draft.kind,
            class: MovementClass::Ordinary,
            amount_credit: credit,
            amount_debit: debit,
            manager,
            notes: draft.notes,
            is_audited: false,
            original_entry_id: None,
            audit_history: Vec::new(),
            breakdown: draft.breakdown,
        };

        apply_mutation(&mut doc, MutationKind::Create, None, Some(&movement), &[])?;
        // The movement record is the primary write: if it fails nothing else
        // is committed. If the balance write fails afterwards, the movement
        // is backed out again so the two stores cannot drift apart.
        let mut ack = self.movements.upsert(company, &movement)?;
        match self.funds.store(company, &doc) {
            Ok(store_ack) => ack = ack.merge(store_ack),
            Err(err) => {
                self.roll_back_movement(company, Some(&movement), None);
                return Err(err);
            }
        }
        self.cache.invalidate(company);
        self.notify_provider(&movement);
        info!(company, id = %movement.id, delta = movement.delta(), "movement recorded");
        Ok((movement, ack.into()))
    }

    /// Apply a field patch to an existing movement, recording the change in
    /// its bounded audit history.
    pub fn edit_movement(
        &self,
        company: &str,
        id: &MovementId,
        patch: MovementPatch,
    ) -> FundResult<(Movement, MutationOutcome)> {
        let _pass = self.guard.begin(id)?;
        let mut doc = self.load_fund(company)?;
        let before = self.require_movement(company, id)?;
        self.require_mutable(&doc, &before)?;

        let mut after = apply_patch(&before, patch);
        validate_amounts(after.amount_credit, after.amount_debit)?;
        after.audit_history = record_change(&before, &after, &before.audit_history, Utc::now())?;
        after.is_audited = true;

        apply_mutation(
            &mut doc,
            MutationKind::Edit,
            Some(&before),
            Some(&after),
            &[],
        )?;
        let mut ack = self.movements.upsert(company, &after)?;
        match self.funds.store(company, &doc) {
            Ok(store_ack) => ack = ack.merge(store_ack),
            Err(err) => {
                self.roll_back_movement(company, None, Some(&before));
                return Err(err);
            }
        }
        self.cache.invalidate(company);
        info!(company, id = %after.id, "movement edited");
        Ok((after, ack.into()))
    }

    /// Privileged removal of a movement; the ledger backs its delta out.
    pub fn delete_movement(
        &self,
        company: &str,
        id: &MovementId,
    ) -> FundResult<MutationOutcome> {
        let _pass = self.guard.begin(id)?;
        let mut doc = self.load_fund(company)?;
        let movement = self.require_movement(company, id)?;
        self.require_mutable(&doc, &movement)?;

        apply_mutation(&mut doc, MutationKind::Delete, Some(&movement), None, &[])?;
        let mut ack = self.movements.delete(company, id)?;
        match self.funds.store(company, &doc) {
            Ok(store_ack) => ack = ack.merge(store_ack),
            Err(err) => {
                self.roll_back_movement(company, None, Some(&movement));
                return Err(err);
            }
        }
        self.cache.invalidate(company);
        info!(company, id = %id, "movement deleted");
        Ok(ack.into())
    }

    /// Commit a physical count, materializing adjustments and sealing the
    /// ledger up to the closing instant.
    pub fn commit_daily_closing(
        &self,
        company: &str,
        input: ClosingInput,
    ) -> FundResult<(DailyClosing, MutationOutcome)> {
        let mut doc = self.load_fund(company)?;
        let reconciler = Reconciler::new(self.movements.as_ref(), self.closings.as_ref());
        let (closing, ack) = reconciler.commit(company, &mut doc, input, Utc::now())?;
        let ack = ack.merge(self.funds.store(company, &doc)?);
        self.cache.invalidate(company);
        Ok((closing, ack.into()))
    }

    /// Edit an existing closing and re-run reconciliation against it.
    pub fn edit_daily_closing(
        &self,
        company: &str,
        id: &str,
        input: ClosingInput,
    ) -> FundResult<(DailyClosing, MutationOutcome)> {
        let mut doc = self.load_fund(company)?;
        let reconciler = Reconciler::new(self.movements.as_ref(), self.closings.as_ref());
        let (closing, ack) = reconciler.edit(company, &mut doc, id, input, Utc::now())?;
        let ack = ack.merge(self.funds.store(company, &doc)?);
        self.cache.invalidate(company);
        Ok((closing, ack.into()))
    }

    pub fn list_closings(&self, company: &str) -> FundResult<Vec<DailyClosing>> {
        self.closings.list(company)
    }

    /// Operator edit of an initial balance; the current balance shifts by
    /// the same delta.
    pub fn set_initial_balance(
        &self,
        company: &str,
        account: AccountId,
        currency: Currency,
        new_initial: Decimal,
    ) -> FundResult<MutationOutcome> {
        let mut doc = self.load_fund(company)?;
        apply_initial_overrides(
            &mut doc,
            &[InitialOverride {
                account,
                currency,
                new_initial: truncate_amount(new_initial),
            }],
        )?;
        let ack = self.funds.store(company, &doc)?;
        self.cache.invalidate(company);
        Ok(ack.into())
    }

    /// Explicit operator override of a current balance. Bypasses the delta
    /// algebra on purpose; use for corrections only.
    pub fn set_current_balance(
        &self,
        company: &str,
        account: AccountId,
        currency: Currency,
        new_current: Decimal,
    ) -> FundResult<MutationOutcome> {
        let mut doc = self.load_fund(company)?;
        let entry = doc
            .balance_mut(account, currency)
            .ok_or(FundError::Validation {
                field: "account",
                reason: "unknown account/currency pair".to_string(),
            })?;
        entry.current_balance = truncate_amount(new_current);
        doc.updated_at = Utc::now();
        let ack = self.funds.store(company, &doc)?;
        self.cache.invalidate(company);
        warn!(company, account = %account, currency = %currency, "current balance overridden");
        Ok(ack.into())
    }

    /// Bounded audit history of a movement plus the replayed as-of-now view
    /// of its audited fields.
    pub fn movement_history(
        &self,
        company: &str,
        id: &MovementId,
    ) -> FundResult<(Vec<AuditHistoryEntry>, MovementPatch)> {
        let movement = self.require_movement(company, id)?;
        let current = replay(&movement.audit_history);
        Ok((movement.audit_history, current))
    }

    /// Display aid: balance immediately before one movement, derived from
    /// the loaded window. Only meaningful for a window ending at "now".
    pub fn balance_before_movement(
        &self,
        company: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        account: AccountId,
        currency: Currency,
        id: &MovementId,
    ) -> FundResult<i64> {
        let doc = self.load_fund(company)?;
        let loaded = self.list_movements(company, from, to)?;
        balance_before(&doc, &loaded, account, currency, id)
    }

    /// Load and normalize the fund document, migrating any movements still
    /// embedded in a legacy layout into the partitioned store.
    fn load_fund(&self, company: &str) -> FundResult<FundDocument> {
        let raw = self.funds.load(company)?;
        let normalized = match raw {
            Some(value) => normalize(&value, company),
            None => return Ok(FundDocument::default_for(company)),
        };
        if !normalized.movements.is_empty() {
            info!(
                company,
                count = normalized.movements.len(),
                "migrating embedded legacy movements into the movement store"
            );
            for movement in &normalized.movements {
                self.movements.upsert(company, movement)?;
            }
            self.funds.store(company, &normalized.document)?;
            self.cache.invalidate(company);
        }
        Ok(normalized.document)
    }

    /// Best-effort compensation when the balance write fails after the
    /// movement write succeeded: remove the freshly created record, or
    /// restore the pre-mutation one. A failure here is only logged; the
    /// original persistence error is what the caller sees.
    fn roll_back_movement(
        &self,
        company: &str,
        created: Option<&Movement>,
        restore: Option<&Movement>,
    ) {
        if let Some(movement) = created {
            if let Err(err) = self.movements.delete(company, &movement.id) {
                warn!(company, id = %movement.id, error = %err, "rollback of movement create failed");
            }
        }
        if let Some(movement) = restore {
            if let Err(err) = self.movements.upsert(company, movement) {
                warn!(company, id = %movement.id, error = %err, "rollback to prior movement state failed");
            }
        }
        self.cache.invalidate(company);
    }

    fn require_movement(&self, company: &str, id: &MovementId) -> FundResult<Movement> {
        self.movements
            .fetch(company, id)?
            .ok_or(FundError::NotFound {
                entity: "movement",
                id: id.to_string(),
            })
    }

    fn require_mutable(&self, doc: &FundDocument, movement: &Movement) -> FundResult<()> {
        if movement.class.is_system() {
            return Err(FundError::LockedMovement {
                id: movement.id.to_string(),
                reason: "system-owned adjustment movements are managed by reconciliation"
                    .to_string(),
            });
        }
        if doc.is_locked(movement.created_at) {
            return Err(FundError::LockedMovement {
                id: movement.id.to_string(),
                reason: "movement predates the most recent closing seal".to_string(),
            });
        }
        Ok(())
    }

    fn notify_provider(&self, movement: &Movement) {
        let Some(info) = self.directory.lookup(&movement.provider_code) else {
            return;
        };
        let Some(recipient) = info.notify_email else {
            return;
        };
        let notification = Notification {
            recipient,
            subject: format!("Movimiento registrado: {}", movement.invoice_number),
            body: format!(
                "{} registró un movimiento de {} {} para {} (factura {}).",
                movement.manager,
                movement.delta().abs(),
                movement.currency,
                info.name,
                movement.invoice_number
            ),
        };
        if let Err(err) = self.notifier.dispatch(notification) {
            warn!(provider = %movement.provider_code, error = %err, "notification dispatch failed");
        }
    }
}

fn apply_patch(before: &Movement, patch: MovementPatch) -> Movement {
    let mut after = before.clone();
    if let Some(provider_code) = patch.provider_code {
        after.provider_code = provider_code;
    }
    if let Some(invoice_number) = patch.invoice_number {
        after.invoice_number = invoice_number;
    }
    if let Some(kind) = patch.kind {
        after.kind = kind;
    }
    if let Some(amount_credit) = patch.amount_credit {
        after.amount_credit = amount_credit;
    }
    if let Some(amount_debit) = patch.amount_debit {
        after.amount_debit = amount_debit;
    }
    if let Some(manager) = patch.manager {
        after.manager = manager;
    }
    if let Some(notes) = patch.notes {
        after.notes = notes;
    }
    if let Some(currency) = patch.currency {
        after.currency = currency;
    }
    after
}

fn validate_amounts(credit: i64, debit: i64) -> FundResult<()> {
    if credit < 0 || debit < 0 {
        return Err(FundError::Validation {
            field: "amount",
            reason: "amounts must not be negative".to_string(),
        });
    }
    if (credit == 0) == (debit == 0) {
        return Err(FundError::Validation {
            field: "amount",
            reason: "exactly one of credit or debit must be non-zero".to_string(),
        });
    }
    Ok(())
}

fn require_non_empty(field: &'static str, value: &str) -> FundResult<()> {
    if value.trim().is_empty() {
        return Err(FundError::Validation {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}
