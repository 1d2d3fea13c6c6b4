use std::collections::HashMap;
use bitcoin::{Amount, OutPoint, Txid};
use bitcoincore_rpc::{Auth, Client, RpcApi};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::AppError;
use crate::types::{Coin, FundedTransaction, SignedTransaction};

/// The wallet/node operations the distribution engine depends on.
pub trait WalletRpc {
    /// Balance per wallet address, ignoring addresses holding less than `min_amount`.
    fn list_address_balances(&self, min_amount: Amount) -> Result<HashMap<String, Amount>, AppError>;
    fn list_unspent(&self, min_conf: u64, max_conf: u64, addresses: &[String]) -> Result<Vec<Coin>, AppError>;
    fn get_block_count(&self) -> Result<u64, AppError>;
    fn import_private_key(&self, key: &str, label: &str, rescan: bool) -> Result<(), AppError>;
    fn get_addresses_for_label(&self, label: &str) -> Result<Vec<String>, AppError>;
    fn create_raw_transaction(&self, inputs: &[OutPoint], outputs: &[(String, Amount)]) -> Result<String, AppError>;
    fn fund_raw_transaction(&self, hex: &str, change_address: &str) -> Result<FundedTransaction, AppError>;
    fn sign_raw_transaction(&self, hex: &str) -> Result<SignedTransaction, AppError>;
    fn send_raw_transaction(&self, hex: &str) -> Result<Txid, AppError>;
}

#[derive(Deserialize)]
struct BtcAmount(#[serde(with = "bitcoin::amount::serde::as_btc")] Amount);

/// JSON-RPC binding to an account-era wallet daemon.
pub struct NodeClient {
    inner: Client,
}

impl NodeClient {
    pub fn connect(host: &str, port: u16, user: &str, password: &str) -> Result<Self, AppError> {
        let url = format!("http://{host}:{port}/");
        log::debug!("Connecting to wallet RPC at {}", url);
        let inner = Client::new(&url, Auth::UserPass(user.to_string(), password.to_string()))?;
        Ok(NodeClient { inner })
    }
}

impl WalletRpc for NodeClient {
    fn list_address_balances(&self, min_amount: Amount) -> Result<HashMap<String, Amount>, AppError> {
        let balances: HashMap<String, BtcAmount> =
            self.inner.call("listaddressbalances", &[json!(min_amount.to_btc())])?;
        Ok(balances.into_iter().map(|(address, amount)| (address, amount.0)).collect())
    }

    fn list_unspent(&self, min_conf: u64, max_conf: u64, addresses: &[String]) -> Result<Vec<Coin>, AppError> {
        let coins = self
            .inner
            .call("listunspent", &[json!(min_conf), json!(max_conf), json!(addresses)])?;
        Ok(coins)
    }

    fn get_block_count(&self) -> Result<u64, AppError> {
        Ok(self.inner.call("getblockcount", &[])?)
    }

    fn import_private_key(&self, key: &str, label: &str, rescan: bool) -> Result<(), AppError> {
        let _: Value = self.inner.call("importprivkey", &[json!(key), json!(label), json!(rescan)])?;
        Ok(())
    }

    fn get_addresses_for_label(&self, label: &str) -> Result<Vec<String>, AppError> {
        Ok(self.inner.call("getaddressesbyaccount", &[json!(label)])?)
    }

    fn create_raw_transaction(&self, inputs: &[OutPoint], outputs: &[(String, Amount)]) -> Result<String, AppError> {
        let inputs: Vec<Value> = inputs
            .iter()
            .map(|outpoint| json!({ "txid": outpoint.txid.to_string(), "vout": outpoint.vout }))
            .collect();
        let outputs: Map<String, Value> = outputs
            .iter()
            .map(|(address, amount)| (address.clone(), json!(amount.to_btc())))
            .collect();
        Ok(self
            .inner
            .call("createrawtransaction", &[Value::Array(inputs), Value::Object(outputs)])?)
    }

    fn fund_raw_transaction(&self, hex: &str, change_address: &str) -> Result<FundedTransaction, AppError> {
        Ok(self
            .inner
            .call("fundrawtransaction", &[json!(hex), json!({ "changeAddress": change_address })])?)
    }

    fn sign_raw_transaction(&self, hex: &str) -> Result<SignedTransaction, AppError> {
        Ok(self.inner.call("signrawtransaction", &[json!(hex)])?)
    }

    fn send_raw_transaction(&self, hex: &str) -> Result<Txid, AppError> {
        Ok(self.inner.call("sendrawtransaction", &[json!(hex)])?)
    }
}
