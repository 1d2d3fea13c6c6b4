use std::path::PathBuf;
use bitcoin::Amount;
use bitcoin::consensus::encode::FromHexError as BitcoinHexError;
use thiserror::Error;

/// Which step of the create/fund/sign/broadcast sequence failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStage {
    Create,
    Fund,
    Sign,
    Decode,
    Broadcast,
}

impl std::fmt::Display for TxStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TxStage::Create => "create",
            TxStage::Fund => "fund",
            TxStage::Sign => "sign",
            TxStage::Decode => "decode",
            TxStage::Broadcast => "broadcast",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("funding plan {path:?}: {reason}")]
    Plan { path: PathBuf, reason: String },

    #[error("insufficient funds: source addresses hold {available}, run requires {required}")]
    FundsInsufficient { available: Amount, required: Amount },

    #[error("insufficient unspent inputs: gathered {available}, run requires {required}")]
    CoinSupplyInsufficient { available: Amount, required: Amount },

    #[error("transaction failed at {stage}: {detail}")]
    Transaction { stage: TxStage, detail: String },

    #[error("ledger write failed: {0}")]
    Ledger(#[from] csv::Error),

    #[error("wallet RPC error: {0}")]
    Rpc(#[from] bitcoincore_rpc::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("signed transaction is not valid consensus hex: {0}")]
    BitcoinConsensus(#[from] BitcoinHexError),

    #[error("input validation error: {0}")]
    InputValidation(String),
}

impl AppError {
    pub fn transaction(stage: TxStage, detail: impl Into<String>) -> Self {
        AppError::Transaction { stage, detail: detail.into() }
    }
}
