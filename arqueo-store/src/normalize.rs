use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use arqueo_core::{
    default_configuration, AccountBalance, AccountConfig, AccountId, Currency, FundDocument,
    Movement, MovementClass, MovementId, MovementKind,
};

/// Canonical result of decoding a stored fund blob: the normalized document
/// plus any movements still embedded in a legacy layout, ready to be migrated
/// into the partitioned movement store.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedFund {
    pub document: FundDocument,
    pub movements: Vec<Movement>,
}

/// Convert any stored or legacy representation of a fund into the canonical
/// shape. Pure function, no I/O, idempotent: a canonical input round-trips to
/// an equal document with no extracted movements.
///
/// Three layouts are recognized:
/// 1. canonical (`balances` array present);
/// 2. legacy nested buckets: account key -> currency key -> bucket holding
///    balance fields and an embedded `movements` array;
/// 3. legacy flat map: `metadata` plus an `accounts` map keyed
///    `"ACCOUNT:CURRENCY"`.
pub fn normalize(raw: &Value, company: &str) -> NormalizedFund {
    let mut result = match raw {
        Value::Object(map) if map.get("balances").map(Value::is_array) == Some(true) => {
            decode_canonical(map, company)
        }
        Value::Object(map) if map.contains_key("accounts") || map.contains_key("metadata") => {
            decode_flat(map, company)
        }
        Value::Object(map) => decode_nested(map, company),
        _ => NormalizedFund {
            document: FundDocument::default_for(company),
            movements: Vec::new(),
        },
    };
    fill_missing_balances(&mut result.document);
    result
}

fn decode_canonical(map: &serde_json::Map<String, Value>, company: &str) -> NormalizedFund {
    let mut balances = Vec::new();
    if let Some(Value::Array(entries)) = map.get("balances") {
        for entry in entries {
            if let Some(balance) = decode_balance_entry(entry) {
                balances.push(balance);
            }
        }
    }
    let configuration = map
        .get("configuration")
        .and_then(|value| serde_json::from_value::<Vec<AccountConfig>>(value.clone()).ok())
        .unwrap_or_else(default_configuration);
    let locked_until = map.get("lockedUntil").and_then(parse_time);
    let updated_at = map
        .get("updatedAt")
        .and_then(parse_time)
        .unwrap_or(DateTime::UNIX_EPOCH);

    // Movements may still be embedded mid-migration; extract them so the
    // caller can finish moving them into the partitioned store.
    let mut movements = Vec::new();
    if let Some(Value::Array(entries)) = map.get("movements") {
        for entry in entries {
            if let Some(movement) = decode_movement(entry, None, None) {
                movements.push(movement);
            }
        }
    }

    NormalizedFund {
        document: FundDocument {
            company: company.to_string(),
            configuration,
            balances,
            locked_until,
            updated_at,
        },
        movements,
    }
}

fn decode_nested(map: &serde_json::Map<String, Value>, company: &str) -> NormalizedFund {
    let mut balances = Vec::new();
    let mut movements = Vec::new();
    for (account_key, currencies) in map {
        let Ok(account) = AccountId::from_str(account_key) else {
            debug!(key = %account_key, "dropping unrecognized account bucket");
            continue;
        };
        let Value::Object(currency_map) = currencies else {
            continue;
        };
        for (currency_key, bucket) in currency_map {
            let Ok(currency) = Currency::from_str(currency_key) else {
                debug!(key = %currency_key, "dropping unrecognized currency bucket");
                continue;
            };
            balances.push(decode_bucket_balance(bucket, account, currency));
            if let Some(Value::Array(entries)) = bucket.get("movements") {
                for entry in entries {
                    if let Some(movement) = decode_movement(entry, Some(account), Some(currency)) {
                        movements.push(movement);
                    }
                }
            }
        }
    }
    NormalizedFund {
        document: FundDocument {
            company: company.to_string(),
            configuration: default_configuration(),
            balances,
            locked_until: None,
            updated_at: DateTime::UNIX_EPOCH,
        },
        movements,
    }
}

fn decode_flat(map: &serde_json::Map<String, Value>, company: &str) -> NormalizedFund {
    let mut balances = Vec::new();
    let mut movements = Vec::new();
    if let Some(Value::Object(accounts)) = map.get("accounts") {
        for (key, bucket) in accounts {
            let Some((account_key, currency_key)) = key.split_once(':') else {
                debug!(key = %key, "dropping malformed account:currency key");
                continue;
            };
            let (Ok(account), Ok(currency)) = (
                AccountId::from_str(account_key),
                Currency::from_str(currency_key),
            ) else {
                debug!(key = %key, "dropping unrecognized account:currency key");
                continue;
            };
            balances.push(decode_bucket_balance(bucket, account, currency));
            if let Some(Value::Array(entries)) = bucket.get("movements") {
                for entry in entries {
                    if let Some(movement) = decode_movement(entry, Some(account), Some(currency)) {
                        movements.push(movement);
                    }
                }
            }
        }
    }
    let metadata = map.get("metadata").and_then(Value::as_object);
    let locked_until = metadata
        .and_then(|meta| meta.get("lockedUntil"))
        .and_then(parse_time);
    let updated_at = metadata
        .and_then(|meta| meta.get("updatedAt"))
        .and_then(parse_time)
        .unwrap_or(DateTime::UNIX_EPOCH);
    NormalizedFund {
        document: FundDocument {
            company: company.to_string(),
            configuration: default_configuration(),
            balances,
            locked_until,
            updated_at,
        },
        movements,
    }
}

fn decode_balance_entry(entry: &Value) -> Option<AccountBalance> {
    let map = entry.as_object()?;
    let account = AccountId::from_str(map.get("accountId")?.as_str()?).ok()?;
    let currency = Currency::from_str(map.get("currency")?.as_str()?).ok()?;
    let mut extra = BTreeMap::new();
    for (key, value) in map {
        if !matches!(
            key.as_str(),
            "accountId" | "currency" | "enabled" | "initialBalance" | "currentBalance"
        ) {
            extra.insert(key.clone(), value.clone());
        }
    }
    Some(AccountBalance {
        account_id: account,
        currency,
        enabled: coerce_bool(map.get("enabled")),
        initial_balance: coerce_amount(map.get("initialBalance")),
        current_balance: coerce_amount(map.get("currentBalance")),
        extra,
    })
}

fn decode_bucket_balance(bucket: &Value, account: AccountId, currency: Currency) -> AccountBalance {
    let map = bucket.as_object();
    AccountBalance {
        account_id: account,
        currency,
        enabled: coerce_bool(map.and_then(|m| m.get("enabled"))),
        initial_balance: coerce_amount(
            map.and_then(|m| m.get("initialBalance").or_else(|| m.get("initial"))),
        ),
        current_balance: coerce_amount(
            map.and_then(|m| m.get("currentBalance").or_else(|| m.get("current"))),
        ),
        extra: BTreeMap::new(),
    }
}

fn decode_movement(
    entry: &Value,
    bucket_account: Option<AccountId>,
    bucket_currency: Option<Currency>,
) -> Option<Movement> {
    let map = entry.as_object()?;
    let account = map
        .get("accountId")
        .and_then(Value::as_str)
        .and_then(|s| AccountId::from_str(s).ok())
        .or(bucket_account)?;
    let currency = map
        .get("currency")
        .and_then(Value::as_str)
        .and_then(|s| Currency::from_str(s).ok())
        .or(bucket_currency)?;
    let created_at = map
        .get("createdAt")
        .and_then(parse_time)
        .unwrap_or(DateTime::UNIX_EPOCH);
    let amount_credit = coerce_amount(map.get("amountCredit"));
    let amount_debit = coerce_amount(map.get("amountDebit"));
    let kind = map
        .get("kind")
        .and_then(Value::as_str)
        .and_then(|s| MovementKind::from_str(s).ok())
        .unwrap_or(if amount_credit >= amount_debit {
            MovementKind::Income
        } else {
            MovementKind::Expense
        });
    let class = map
        .get("class")
        .and_then(Value::as_str)
        .and_then(|s| MovementClass::from_str(s).ok())
        .unwrap_or(MovementClass::Ordinary);
    let id = map
        .get("id")
        .and_then(Value::as_str)
        .map(MovementId::from)
        .unwrap_or_else(|| MovementId::generate(created_at, account));
    Some(Movement {
        id,
        created_at,
        account,
        currency,
        provider_code: string_field(map, "providerCode"),
        invoice_number: string_field(map, "invoiceNumber"),
        kind,
        class,
        amount_credit,
        amount_debit,
        manager: string_field(map, "manager"),
        notes: string_field(map, "notes"),
        is_audited: map
            .get("isAudited")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        original_entry_id: map
            .get("originalEntryId")
            .and_then(Value::as_str)
            .map(str::to_string),
        audit_history: map
            .get("auditHistory")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default(),
        breakdown: map
            .get("breakdown")
            .and_then(|value| serde_json::from_value(value.clone()).ok()),
    })
}

/// Every (account, currency) pair must exist even if never used.
fn fill_missing_balances(document: &mut FundDocument) {
    for account in AccountId::ALL {
        for currency in Currency::ALL {
            if document.balance(account, currency).is_none() {
                document
                    .balances
                    .push(AccountBalance::empty(account, currency));
            }
        }
    }
}

/// Money fields truncate to integral units; malformed values coerce to 0.
fn coerce_amount(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|v| v.trunc() as i64))
            .unwrap_or(0),
        Some(Value::String(raw)) => raw
            .parse::<f64>()
            .map(|v| v.trunc() as i64)
            .unwrap_or(0),
        _ => 0,
    }
}

fn coerce_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_i64() != Some(0),
        _ => true,
    }
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.with_timezone(&Utc))
            .ok(),
        Value::Number(number) => number
            .as_i64()
            .and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn string_field(map: &serde_json::Map<String, Value>, key: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_legacy_shape_is_flattened() {
        let raw = json!({
            "FondoGeneral": {
                "CRC": {
                    "enabled": true,
                    "initialBalance": 1000.75,
                    "currentBalance": "2500.99",
                    "movements": [
                        {
                            "createdAt": "2024-03-05T09:00:00Z",
                            "amountCredit": 1500,
                            "amountDebit": 0,
                            "providerCode": "P001",
                            "manager": "Ana"
                        }
                    ]
                },
                "XXX": { "currentBalance": 99 }
            },
            "Desconocido": { "CRC": { "currentBalance": 1 } }
        });
        let normalized = normalize(&raw, "acme");

        let entry = normalized
            .document
            .balance(AccountId::FondoGeneral, Currency::Crc)
            .unwrap();
        assert_eq!(entry.initial_balance, 1_000);
        assert_eq!(entry.current_balance, 2_500);

        assert_eq!(normalized.movements.len(), 1);
        let movement = &normalized.movements[0];
        assert_eq!(movement.account, AccountId::FondoGeneral);
        assert_eq!(movement.currency, Currency::Crc);
        assert_eq!(movement.amount_credit, 1_500);

        // Unrecognized keys are dropped, every valid pair is populated.
        assert_eq!(normalized.document.balances.len(), 8);
    }

    #[test]
    fn flat_legacy_shape_is_flattened() {
        let raw = json!({
            "metadata": { "updatedAt": "2024-03-05T10:00:00Z" },
            "accounts": {
                "BCR:USD": { "initial": 50, "current": 75, "enabled": false },
                "bogus": { "current": 10 }
            }
        });
        let normalized = normalize(&raw, "acme");
        let entry = normalized
            .document
            .balance(AccountId::Bcr, Currency::Usd)
            .unwrap();
        assert_eq!(entry.initial_balance, 50);
        assert_eq!(entry.current_balance, 75);
        assert!(!entry.enabled);
        assert!(normalized.movements.is_empty());
    }

    #[test]
    fn malformed_numbers_coerce_to_zero() {
        let raw = json!({
            "balances": [
                {
                    "accountId": "BN",
                    "currency": "CRC",
                    "initialBalance": "not-a-number",
                    "currentBalance": null
                }
            ],
            "updatedAt": "2024-03-05T10:00:00Z"
        });
        let normalized = normalize(&raw, "acme");
        let entry = normalized
            .document
            .balance(AccountId::Bn, Currency::Crc)
            .unwrap();
        assert_eq!(entry.initial_balance, 0);
        assert_eq!(entry.current_balance, 0);
        assert!(entry.enabled);
    }

    #[test]
    fn unknown_balance_fields_are_preserved() {
        let raw = json!({
            "balances": [
                {
                    "accountId": "BAC",
                    "currency": "USD",
                    "enabled": true,
                    "initialBalance": 5,
                    "currentBalance": 5,
                    "legacyNote": "keep me"
                }
            ],
            "updatedAt": "2024-03-05T10:00:00Z"
        });
        let normalized = normalize(&raw, "acme");
        let entry = normalized
            .document
            .balance(AccountId::Bac, Currency::Usd)
            .unwrap();
        assert_eq!(entry.extra.get("legacyNote"), Some(&json!("keep me")));
    }

    #[test]
    fn normalization_is_idempotent() {
        let raw = json!({
            "FondoGeneral": {
                "CRC": { "initialBalance": 100, "currentBalance": 250 }
            }
        });
        let once = normalize(&raw, "acme");
        let canonical = serde_json::to_value(&once.document).unwrap();
        let twice = normalize(&canonical, "acme");
        assert_eq!(twice.document, once.document);
        assert!(twice.movements.is_empty());
    }

    #[test]
    fn empty_input_yields_default_document() {
        let normalized = normalize(&Value::Null, "acme");
        assert_eq!(normalized.document, {
            let mut expected = FundDocument::default_for("acme");
            expected.updated_at = normalized.document.updated_at;
            expected
        });
        assert_eq!(normalized.document.balances.len(), 8);
    }
}
