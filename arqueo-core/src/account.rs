use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Currencies the fund tracks. Every account keeps one balance per currency.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "CRC")]
    Crc,
    #[serde(rename = "USD")]
    Usd,
}

impl Currency {
    pub const ALL: [Currency; 2] = [Currency::Crc, Currency::Usd];

    pub fn as_str(self) -> &'static str {
        match self {
            Currency::Crc => "CRC",
            Currency::Usd => "USD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CRC" => Ok(Currency::Crc),
            "USD" => Ok(Currency::Usd),
            other => Err(format!("unknown currency: {other}")),
        }
    }
}

/// Cash pools within a fund: the general drawer plus one pool per bank.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccountId {
    #[serde(rename = "FondoGeneral")]
    FondoGeneral,
    #[serde(rename = "BCR")]
    Bcr,
    #[serde(rename = "BN")]
    Bn,
    #[serde(rename = "BAC")]
    Bac,
}

impl AccountId {
    pub const ALL: [AccountId; 4] = [
        AccountId::FondoGeneral,
        AccountId::Bcr,
        AccountId::Bn,
        AccountId::Bac,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AccountId::FondoGeneral => "FondoGeneral",
            AccountId::Bcr => "BCR",
            AccountId::Bn => "BN",
            AccountId::Bac => "BAC",
        }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FondoGeneral" => Ok(AccountId::FondoGeneral),
            "BCR" => Ok(AccountId::Bcr),
            "BN" => Ok(AccountId::Bn),
            "BAC" => Ok(AccountId::Bac),
            other => Err(format!("unknown account: {other}")),
        }
    }
}

/// Declarative description of one account within a fund.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountConfig {
    pub id: AccountId,
    pub label: String,
    pub currencies: Vec<Currency>,
}

/// Configuration used for funds that have never been configured explicitly.
pub fn default_configuration() -> Vec<AccountConfig> {
    AccountId::ALL
        .iter()
        .map(|&id| AccountConfig {
            id,
            label: match id {
                AccountId::FondoGeneral => "Fondo General",
                AccountId::Bcr => "Banco de Costa Rica",
                AccountId::Bn => "Banco Nacional",
                AccountId::Bac => "BAC Credomatic",
            }
            .to_string(),
            currencies: Currency::ALL.to_vec(),
        })
        .collect()
}

/// Fixed-size map with one slot per supported currency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyMap<T> {
    #[serde(rename = "CRC")]
    pub crc: T,
    #[serde(rename = "USD")]
    pub usd: T,
}

impl<T> CurrencyMap<T> {
    pub fn get(&self, currency: Currency) -> &T {
        match currency {
            Currency::Crc => &self.crc,
            Currency::Usd => &self.usd,
        }
    }

    pub fn get_mut(&mut self, currency: Currency) -> &mut T {
        match currency {
            Currency::Crc => &mut self.crc,
            Currency::Usd => &mut self.usd,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Currency, &T)> {
        [(Currency::Crc, &self.crc), (Currency::Usd, &self.usd)].into_iter()
    }
}
