use bitcoin::{Amount, Denomination, OutPoint, Txid};
use serde::{Deserialize, Serialize, Serializer};
use crate::error::AppError;

/// One row of the funding plan: every one of `account_count` new accounts receives `amount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingLine {
    pub amount: Amount,
    pub account_count: u32,
}

/// A single destination account still waiting to be funded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingObligation {
    pub name: String,
    pub amount: Amount,
    pub private_key: Option<String>,
    pub public_key: Option<String>,
}

impl FundingObligation {
    pub fn new(name: String, amount: Amount) -> Self {
        FundingObligation { name, amount, private_key: None, public_key: None }
    }

    /// Attaches the destination key material. Keys are never replaced once set.
    pub fn assign_keys(&mut self, keys: KeyPair) -> Result<(), AppError> {
        if self.private_key.is_some() {
            return Err(AppError::InputValidation(format!(
                "obligation {} already has key material assigned",
                self.name
            )));
        }
        self.private_key = Some(keys.private_key);
        self.public_key = Some(keys.public_address);
        Ok(())
    }

    pub fn into_record(self, amount_sent: Amount) -> Result<LedgerRecord, AppError> {
        match (self.private_key, self.public_key) {
            (Some(private_key), Some(public_key)) => Ok(LedgerRecord {
                name: self.name,
                private_key,
                public_key,
                amount: amount_sent,
            }),
            _ => Err(AppError::InputValidation(format!(
                "obligation {} was funded without key material",
                self.name
            ))),
        }
    }
}

/// An unspent output as reported by `listunspent`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Coin {
    pub txid: Txid,
    pub vout: u32,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    pub amount: Amount,
    pub confirmations: u32,
    pub spendable: bool,
    // Older wallets omit the field; their listings only contain wallet-owned outputs.
    #[serde(default = "default_solvable")]
    pub solvable: bool,
}

fn default_solvable() -> bool {
    true
}

impl Coin {
    pub fn is_eligible(&self) -> bool {
        self.spendable && self.solvable
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// WIF encoding of the secret key.
    pub private_key: String,
    pub public_address: String,
}

/// Result of `fundrawtransaction`.
#[derive(Debug, Clone, Deserialize)]
pub struct FundedTransaction {
    pub hex: String,
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    pub fee: Amount,
    #[serde(default, rename = "changepos")]
    pub change_position: i32,
}

/// Result of `signrawtransaction`.
#[derive(Debug, Clone, Deserialize)]
pub struct SignedTransaction {
    pub hex: String,
    pub complete: bool,
    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
}

/// One ledger row: `name,privateKey,publicKey,amount`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerRecord {
    pub name: String,
    pub private_key: String,
    pub public_key: String,
    #[serde(serialize_with = "serialize_btc_decimal")]
    pub amount: Amount,
}

/// Exact decimal coin value with trailing zeros trimmed, e.g. `1.5` or `0.00000001`.
fn serialize_btc_decimal<S: Serializer>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&amount.display_in(Denomination::Bitcoin))
}
