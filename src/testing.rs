use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::str::FromStr;
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode;
use bitcoin::{Amount, Denomination, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};

use crate::error::{AppError, TxStage};
use crate::keys::KeyGenerator;
use crate::rpc::WalletRpc;
use crate::types::{Coin, FundedTransaction, KeyPair, SignedTransaction};

pub fn btc(value: &str) -> Amount {
    Amount::from_str_in(value, Denomination::Bitcoin).expect("amount literal")
}

pub fn coin(n: u32, amount: &str, confirmations: u32) -> Coin {
    Coin {
        txid: Txid::from_str(&format!("{n:064x}")).expect("txid"),
        vout: n,
        address: Some("source".to_string()),
        amount: btc(amount),
        confirmations,
        spendable: true,
        solvable: true,
    }
}

type CreatedTransaction = (Vec<OutPoint>, Vec<(String, Amount)>);

/// In-memory wallet: serves a fixed unspent set and records every call that changes state.
pub struct FakeWallet {
    height: u64,
    coins: Vec<Coin>,
    balances: HashMap<String, Amount>,
    fee: Amount,
    fail_broadcast_at: Option<usize>,
    incomplete_signatures: bool,
    foreign_label_addresses: Vec<String>,
    list_imported: bool,
    listings: RefCell<Vec<(u64, u64)>>,
    imported: RefCell<Vec<(String, String)>>,
    created: RefCell<Vec<CreatedTransaction>>,
    broadcasts: RefCell<Vec<Txid>>,
    broadcast_attempts: Cell<usize>,
}

impl FakeWallet {
    pub fn new(height: u64, coins: Vec<Coin>) -> Self {
        FakeWallet {
            height,
            coins,
            balances: HashMap::new(),
            fee: btc("0.0001"),
            fail_broadcast_at: None,
            incomplete_signatures: false,
            foreign_label_addresses: Vec::new(),
            list_imported: true,
            listings: RefCell::new(Vec::new()),
            imported: RefCell::new(Vec::new()),
            created: RefCell::new(Vec::new()),
            broadcasts: RefCell::new(Vec::new()),
            broadcast_attempts: Cell::new(0),
        }
    }

    pub fn with_balance(mut self, address: &str, amount: Amount) -> Self {
        self.balances.insert(address.to_string(), amount);
        self
    }

    /// The `n`th broadcast (zero-based) is rejected.
    pub fn fail_broadcast_at(mut self, n: usize) -> Self {
        self.fail_broadcast_at = Some(n);
        self
    }

    pub fn incomplete_signatures(mut self) -> Self {
        self.incomplete_signatures = true;
        self
    }

    /// Every label also lists `address`, ahead of the imported key's own address.
    pub fn with_foreign_label_address(mut self, address: &str) -> Self {
        self.foreign_label_addresses.push(address.to_string());
        self
    }

    pub fn hide_imported_addresses(mut self) -> Self {
        self.list_imported = false;
        self
    }

    pub fn coins(&self) -> &[Coin] {
        &self.coins
    }

    pub fn fee(&self) -> Amount {
        self.fee
    }

    pub fn listings(&self) -> Vec<(u64, u64)> {
        self.listings.borrow().clone()
    }

    pub fn imported(&self) -> Vec<(String, String)> {
        self.imported.borrow().clone()
    }

    pub fn created(&self) -> Vec<CreatedTransaction> {
        self.created.borrow().clone()
    }

    pub fn broadcasts(&self) -> Vec<Txid> {
        self.broadcasts.borrow().clone()
    }
}

impl WalletRpc for FakeWallet {
    fn list_address_balances(&self, min_amount: Amount) -> Result<HashMap<String, Amount>, AppError> {
        Ok(self
            .balances
            .iter()
            .filter(|(_, amount)| **amount >= min_amount)
            .map(|(address, amount)| (address.clone(), *amount))
            .collect())
    }

    fn list_unspent(&self, min_conf: u64, max_conf: u64, addresses: &[String]) -> Result<Vec<Coin>, AppError> {
        self.listings.borrow_mut().push((min_conf, max_conf));
        Ok(self
            .coins
            .iter()
            .filter(|c| (min_conf..=max_conf).contains(&u64::from(c.confirmations)))
            .filter(|c| c.address.as_ref().is_some_and(|a| addresses.contains(a)))
            .cloned()
            .collect())
    }

    fn get_block_count(&self) -> Result<u64, AppError> {
        Ok(self.height)
    }

    fn import_private_key(&self, key: &str, label: &str, _rescan: bool) -> Result<(), AppError> {
        self.imported.borrow_mut().push((key.to_string(), label.to_string()));
        Ok(())
    }

    fn get_addresses_for_label(&self, label: &str) -> Result<Vec<String>, AppError> {
        let imported = self.imported.borrow();
        let own = imported
            .iter()
            .filter(|(_, l)| l == label && self.list_imported)
            // SequentialKeys pairs wif-N with pub-N.
            .map(|(key, _)| key.replacen("wif-", "pub-", 1));
        let mut addresses = Vec::new();
        if imported.iter().any(|(_, l)| l == label) {
            addresses.extend(self.foreign_label_addresses.iter().cloned());
        }
        addresses.extend(own);
        Ok(addresses)
    }

    fn create_raw_transaction(&self, inputs: &[OutPoint], outputs: &[(String, Amount)]) -> Result<String, AppError> {
        self.created.borrow_mut().push((inputs.to_vec(), outputs.to_vec()));
        let tx = Transaction {
            version: bitcoin::transaction::Version(2),
            lock_time: LockTime::ZERO,
            input: inputs
                .iter()
                .map(|outpoint| TxIn {
                    previous_output: *outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: outputs
                .iter()
                .map(|(_, value)| TxOut { value: *value, script_pubkey: ScriptBuf::new() })
                .collect(),
        };
        Ok(encode::serialize_hex(&tx))
    }

    fn fund_raw_transaction(&self, hex: &str, _change_address: &str) -> Result<FundedTransaction, AppError> {
        Ok(FundedTransaction { hex: hex.to_string(), fee: self.fee, change_position: -1 })
    }

    fn sign_raw_transaction(&self, hex: &str) -> Result<SignedTransaction, AppError> {
        Ok(SignedTransaction {
            hex: hex.to_string(),
            complete: !self.incomplete_signatures,
            errors: Vec::new(),
        })
    }

    fn send_raw_transaction(&self, hex: &str) -> Result<Txid, AppError> {
        let attempt = self.broadcast_attempts.get();
        self.broadcast_attempts.set(attempt + 1);
        if self.fail_broadcast_at == Some(attempt) {
            return Err(AppError::transaction(TxStage::Broadcast, "transaction rejected"));
        }
        let tx: Transaction = encode::deserialize_hex(hex)?;
        let txid = tx.compute_txid();
        self.broadcasts.borrow_mut().push(txid);
        Ok(txid)
    }
}

/// Hands out numbered keys so ledger contents are predictable.
#[derive(Default)]
pub struct SequentialKeys {
    issued: Cell<u32>,
}

impl KeyGenerator for SequentialKeys {
    fn generate_key_pair(&self) -> Result<KeyPair, AppError> {
        let n = self.issued.get();
        self.issued.set(n + 1);
        Ok(KeyPair { private_key: format!("wif-{n}"), public_address: format!("pub-{n}") })
    }
}
