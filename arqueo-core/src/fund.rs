use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{default_configuration, AccountConfig, AccountId, Currency};

/// Balance slot for one (account, currency) pair. Amounts are integral minor
/// currency units. Unrecognized fields found in stored documents are kept in
/// `extra` so a round-trip never drops them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub account_id: AccountId,
    pub currency: Currency,
    pub enabled: bool,
    pub initial_balance: i64,
    pub current_balance: i64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl AccountBalance {
    pub fn empty(account_id: AccountId, currency: Currency) -> Self {
        Self {
            account_id,
            currency,
            enabled: true,
            initial_balance: 0,
            current_balance: 0,
            extra: BTreeMap::new(),
        }
    }
}

/// Canonical per-tenant balance/configuration record. `balances` always holds
/// exactly one entry per (account, currency) combination.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundDocument {
    pub company: String,
    pub configuration: Vec<AccountConfig>,
    pub balances: Vec<AccountBalance>,
    #[serde(default)]
    pub locked_until: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl FundDocument {
    /// Fresh document with every balance slot present and zeroed.
    pub fn default_for(company: &str) -> Self {
        let mut balances = Vec::with_capacity(AccountId::ALL.len() * Currency::ALL.len());
        for account in AccountId::ALL {
            for currency in Currency::ALL {
                balances.push(AccountBalance::empty(account, currency));
            }
        }
        Self {
            company: company.to_string(),
            configuration: default_configuration(),
            balances,
            locked_until: None,
            updated_at: Utc::now(),
        }
    }

    pub fn balance(&self, account: AccountId, currency: Currency) -> Option<&AccountBalance> {
        self.balances
            .iter()
            .find(|entry| entry.account_id == account && entry.currency == currency)
    }

    pub fn balance_mut(
        &mut self,
        account: AccountId,
        currency: Currency,
    ) -> Option<&mut AccountBalance> {
        self.balances
            .iter_mut()
            .find(|entry| entry.account_id == account && entry.currency == currency)
    }

    /// Whether `created_at` falls inside the immutable range sealed by the
    /// most recent committed closing.
    pub fn is_locked(&self, created_at: DateTime<Utc>) -> bool {
        self.locked_until
            .map(|lock| created_at <= lock)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_document_populates_every_pair() {
        let doc = FundDocument::default_for("acme");
        assert_eq!(doc.balances.len(), 8);
        for account in AccountId::ALL {
            for currency in Currency::ALL {
                let entry = doc.balance(account, currency).unwrap();
                assert!(entry.enabled);
                assert_eq!(entry.initial_balance, 0);
                assert_eq!(entry.current_balance, 0);
            }
        }
    }

    #[test]
    fn lock_covers_timestamps_at_or_before_the_seal() {
        let mut doc = FundDocument::default_for("acme");
        let seal = Utc::now();
        doc.locked_until = Some(seal);
        assert!(doc.is_locked(seal));
        assert!(doc.is_locked(seal - chrono::Duration::seconds(1)));
        assert!(!doc.is_locked(seal + chrono::Duration::seconds(1)));
    }
}
