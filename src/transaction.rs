use bitcoin::consensus::encode;
use bitcoin::{Amount, OutPoint, Transaction, Txid};

use crate::error::{AppError, TxStage};
use crate::rpc::WalletRpc;

/// A transaction accepted by the wallet's broadcast call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pub txid: Txid,
    pub fee: Amount,
}

/// Creates a raw transaction spending `inputs` to `outputs`, lets the wallet add change to
/// `change_address`, signs it with wallet keys and broadcasts it.
pub fn send_transaction<R: WalletRpc + ?Sized>(
    rpc: &R,
    inputs: &[OutPoint],
    outputs: &[(String, Amount)],
    change_address: &str,
) -> Result<Broadcast, AppError> {
    log::debug!("Building transaction with {} inputs and {} outputs.", inputs.len(), outputs.len());

    let raw = rpc
        .create_raw_transaction(inputs, outputs)
        .map_err(|e| AppError::transaction(TxStage::Create, e.to_string()))?;

    let funded = rpc
        .fund_raw_transaction(&raw, change_address)
        .map_err(|e| AppError::transaction(TxStage::Fund, e.to_string()))?;
    log::debug!("Funded transaction, fee {}, change position {}", funded.fee, funded.change_position);

    let signed = rpc
        .sign_raw_transaction(&funded.hex)
        .map_err(|e| AppError::transaction(TxStage::Sign, e.to_string()))?;
    if !signed.complete {
        return Err(AppError::transaction(
            TxStage::Sign,
            format!("wallet could not sign every input: {:?}", signed.errors),
        ));
    }

    let decoded = verify_signed(&signed.hex, inputs)?;
    log::info!(
        "Signed transaction {} ({} vB, {} inputs, {} outputs)",
        decoded.compute_txid(),
        decoded.vsize(),
        decoded.input.len(),
        decoded.output.len()
    );

    let txid = rpc
        .send_raw_transaction(&signed.hex)
        .map_err(|e| AppError::transaction(TxStage::Broadcast, e.to_string()))?;
    if txid != decoded.compute_txid() {
        log::warn!("Wallet reported txid {} for transaction {}", txid, decoded.compute_txid());
    }

    Ok(Broadcast { txid, fee: funded.fee })
}

/// Decodes the signed hex and checks that every requested input survived funding.
fn verify_signed(hex: &str, inputs: &[OutPoint]) -> Result<Transaction, AppError> {
    let decoded: Transaction = encode::deserialize_hex(hex)
        .map_err(|e| AppError::transaction(TxStage::Decode, AppError::BitcoinConsensus(e).to_string()))?;

    if let Some(missing) = inputs
        .iter()
        .find(|outpoint| !decoded.input.iter().any(|txin| txin.previous_output == **outpoint))
    {
        return Err(AppError::transaction(
            TxStage::Decode,
            format!("signed transaction does not spend {}", missing),
        ));
    }
    Ok(decoded)
}
