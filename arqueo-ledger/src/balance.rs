use chrono::Utc;
use tracing::debug;

use arqueo_core::{
    AccountId, Currency, FundDocument, FundError, FundResult, Movement, MovementId,
};

/// Kind of ledger mutation being applied.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MutationKind {
    Create,
    Edit,
    Delete,
}

/// Operator-issued change to an initial balance, applied in the same update
/// as any movement delta so manual float chains correctly.
#[derive(Clone, Copy, Debug)]
pub struct InitialOverride {
    pub account: AccountId,
    pub currency: Currency,
    pub new_initial: i64,
}

/// Advance the authoritative balances of `doc` by the signed delta of one
/// movement mutation, plus any explicit initial-balance overrides.
///
/// The touched (account, currency) entries are replaced wholesale; every
/// other entry is preserved untouched. Nothing here ever re-sums movements.
pub fn apply_mutation(
    doc: &mut FundDocument,
    kind: MutationKind,
    before: Option<&Movement>,
    after: Option<&Movement>,
    overrides: &[InitialOverride],
) -> FundResult<()> {
    let (remove, add) = match kind {
        MutationKind::Create => (None, Some(required(after, "after")?)),
        MutationKind::Delete => (Some(required(before, "before")?), None),
        MutationKind::Edit => (
            Some(required(before, "before")?),
            Some(required(after, "after")?),
        ),
    };

    // An edit that moves a movement across currencies (or accounts) must
    // back the delta out of the old pair and apply it to the new one.
    if let Some(movement) = remove {
        shift(doc, movement.account, movement.currency, -movement.delta())?;
    }
    if let Some(movement) = add {
        shift(doc, movement.account, movement.currency, movement.delta())?;
    }

    apply_initial_overrides(doc, overrides)?;
    doc.updated_at = Utc::now();
    Ok(())
}

/// Apply operator-issued initial-balance edits: the current balance shifts by
/// the same delta so the manual float chains through correctly.
pub fn apply_initial_overrides(
    doc: &mut FundDocument,
    overrides: &[InitialOverride],
) -> FundResult<()> {
    for override_entry in overrides {
        let entry = doc
            .balance_mut(override_entry.account, override_entry.currency)
            .ok_or_else(|| missing_slot(override_entry.account, override_entry.currency))?;
        let shift_by = override_entry.new_initial - entry.initial_balance;
        entry.initial_balance = override_entry.new_initial;
        entry.current_balance += shift_by;
        debug!(
            account = %override_entry.account,
            currency = %override_entry.currency,
            new_initial = override_entry.new_initial,
            shift = shift_by,
            "initial balance override applied"
        );
    }
    doc.updated_at = Utc::now();
    Ok(())
}

/// Display aid: the balance immediately before `id`, derived by walking the
/// currently loaded movements for one (account, currency) pair in descending
/// time order from the authoritative current balance.
///
/// Only correct when `loaded` is a contiguous window ending at "now"; a
/// disjoint historical window makes the result meaningless. Never persist
/// this value.
pub fn balance_before(
    doc: &FundDocument,
    loaded: &[Movement],
    account: AccountId,
    currency: Currency,
    id: &MovementId,
) -> FundResult<i64> {
    let entry = doc
        .balance(account, currency)
        .ok_or_else(|| missing_slot(account, currency))?;
    let mut running = entry.current_balance;

    let mut window: Vec<&Movement> = loaded
        .iter()
        .filter(|m| m.account == account && m.currency == currency)
        .collect();
    window.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));

    for movement in window {
        running -= movement.delta();
        if movement.id == *id {
            return Ok(running);
        }
    }
    Err(FundError::NotFound {
        entity: "movement",
        id: id.to_string(),
    })
}

fn shift(
    doc: &mut FundDocument,
    account: AccountId,
    currency: Currency,
    delta: i64,
) -> FundResult<()> {
    let entry = doc
        .balance_mut(account, currency)
        .ok_or_else(|| missing_slot(account, currency))?;
    entry.current_balance += delta;
    Ok(())
}

fn required<'a>(
    movement: Option<&'a Movement>,
    field: &'static str,
) -> FundResult<&'a Movement> {
    movement.ok_or_else(|| FundError::Validation {
        field,
        reason: "movement required for this mutation kind".to_string(),
    })
}

fn missing_slot(account: AccountId, currency: Currency) -> FundError {
    FundError::Validation {
        field: "balances",
        reason: format!("no balance slot for {account}/{currency}"),
    }
}
