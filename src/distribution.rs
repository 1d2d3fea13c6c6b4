use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use bitcoin::{Amount, Denomination, OutPoint};

use crate::coins::{CoinCache, SelectionStrategy, select_coins};
use crate::error::{AppError, TxStage};
use crate::keys::KeyGenerator;
use crate::ledger::LedgerWriter;
use crate::plan::total_amount;
use crate::rpc::WalletRpc;
use crate::transaction::{Broadcast, send_transaction};
use crate::types::{Coin, FundingObligation};

/// Fixed knobs of a distribution run.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionPolicy {
    /// Fee reserved per obligation when checking the source balance.
    pub fee_margin: Amount,
    pub window_size: u64,
    pub min_confirmations: u64,
    /// Consolidation stops packing once a coin's unused capacity falls below this.
    pub min_working_capacity: Amount,
    pub chunk_size: Amount,
    pub chunk_delay: Duration,
    /// Addresses holding less than this are ignored by the balance lookup.
    pub balance_min_amount: Amount,
}

impl Default for DistributionPolicy {
    fn default() -> Self {
        DistributionPolicy {
            fee_margin: Amount::from_sat(1_000_000),
            window_size: 1000,
            min_confirmations: 6,
            min_working_capacity: Amount::ONE_BTC,
            chunk_size: Amount::from_sat(10_000 * 100_000_000),
            chunk_delay: Duration::from_millis(200),
            balance_min_amount: Amount::from_sat(1_000_000),
        }
    }
}

/// Where to fund from and where the ledger goes.
#[derive(Debug, Clone)]
pub struct DistributionRequest {
    pub sources: Vec<String>,
    pub strategy: SelectionStrategy,
    pub ledger_path: PathBuf,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub obligations_funded: usize,
    pub amount_sent: Amount,
    pub fees_paid: Amount,
    pub transactions: usize,
}

impl RunSummary {
    fn record_broadcast(&mut self, broadcast: &Broadcast) {
        self.transactions += 1;
        self.fees_paid += broadcast.fee;
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Funded {} accounts with {} in {} transactions (fees {}).",
            self.obligations_funded,
            self.amount_sent.display_in(Denomination::Bitcoin),
            self.transactions,
            self.fees_paid.display_in(Denomination::Bitcoin)
        )
    }
}

pub fn required_funds(obligations: &[FundingObligation], policy: &DistributionPolicy) -> Result<Amount, AppError> {
    let total = total_amount(obligations)?;
    policy
        .fee_margin
        .checked_mul(obligations.len() as u64)
        .and_then(|margin| total.checked_add(margin))
        .ok_or_else(|| AppError::InputValidation("required funds overflow".to_string()))
}

/// Checks the summed balance of `sources` against the plan total plus fee margin.
pub fn verify_balance<R: WalletRpc + ?Sized>(
    rpc: &R,
    obligations: &[FundingObligation],
    sources: &[String],
    policy: &DistributionPolicy,
) -> Result<Amount, AppError> {
    let required = required_funds(obligations, policy)?;
    let balances = rpc.list_address_balances(policy.balance_min_amount)?;
    // Each address counts once however often it is listed.
    let mut seen = HashSet::new();
    let available = sources
        .iter()
        .filter(|address| seen.insert(address.as_str()))
        .filter_map(|address| balances.get(address))
        .try_fold(Amount::ZERO, |total, amount| total.checked_add(*amount))
        .ok_or_else(|| AppError::InputValidation("source balance overflows".to_string()))?;
    log::info!("Source balance {}, required {}", available, required);

    if required > available {
        return Err(AppError::FundsInsufficient { available, required });
    }
    Ok(required)
}

/// Best-fit-descending packing of obligations under one coin's value.
///
/// Repeatedly takes the largest unpicked obligation strictly smaller than the remaining
/// capacity, stopping when nothing fits or the capacity drops below `min_working`. Returns
/// indices into `pending` in pick order.
pub fn pack_obligations(capacity: Amount, pending: &[FundingObligation], min_working: Amount) -> Vec<usize> {
    let mut picked: Vec<usize> = Vec::new();
    let mut remaining = capacity;

    while remaining >= min_working {
        let best = pending
            .iter()
            .enumerate()
            .filter(|(i, o)| o.amount < remaining && !picked.contains(i))
            .fold(None, |best: Option<(usize, Amount)>, (i, o)| match best {
                Some((_, amount)) if amount >= o.amount => best,
                _ => Some((i, o.amount)),
            });
        let Some((index, amount)) = best else { break };
        picked.push(index);
        remaining -= amount;
    }
    picked
}

/// `floor(amount / chunk_size) + 1` portions, each at most `chunk_size`; an empty trailing
/// portion is dropped.
pub fn chunk_amounts(amount: Amount, chunk_size: Amount) -> Vec<Amount> {
    let chunk_size = chunk_size.max(Amount::from_sat(1));
    let count = amount.to_sat() / chunk_size.to_sat() + 1;
    let mut remaining = amount;
    let mut chunks = Vec::new();
    for _ in 0..count {
        let chunk = remaining.min(chunk_size);
        if chunk == Amount::ZERO {
            break;
        }
        chunks.push(chunk);
        remaining -= chunk;
    }
    chunks
}

/// Spends the coin cache against pending obligations and writes the ledger.
pub struct Distributor<'a, R: WalletRpc + ?Sized, K: KeyGenerator + ?Sized, W: Write> {
    rpc: &'a R,
    keys: &'a K,
    cache: CoinCache,
    pending: Vec<FundingObligation>,
    ledger: LedgerWriter<W>,
    change_address: String,
    policy: DistributionPolicy,
    summary: RunSummary,
}

impl<'a, R: WalletRpc + ?Sized, K: KeyGenerator + ?Sized, W: Write> Distributor<'a, R, K, W> {
    pub fn new(
        rpc: &'a R,
        keys: &'a K,
        cache: CoinCache,
        pending: Vec<FundingObligation>,
        ledger: LedgerWriter<W>,
        change_address: String,
        policy: DistributionPolicy,
    ) -> Self {
        Distributor { rpc, keys, cache, pending, ledger, change_address, policy, summary: RunSummary::default() }
    }

    /// Consolidation then chunked sending. The ledger is closed whether or not a phase fails.
    pub fn run(mut self) -> Result<RunSummary, AppError> {
        let outcome = self.consolidate().and_then(|()| self.send_remaining());

        let Distributor { ledger, summary, pending, .. } = self;
        if outcome.is_err() {
            log::warn!(
                "Stopping with {} ledger records written and {} obligations unfunded",
                ledger.records_written(),
                pending.len()
            );
        }
        let closed = ledger.close();
        if let Err(e) = outcome {
            if let Err(close_err) = closed {
                log::error!("Ledger could not be closed after failure: {}", close_err);
            }
            return Err(e);
        }
        closed?;
        Ok(summary)
    }

    /// Packs pending obligations under the largest cached coin until nothing fits.
    fn consolidate(&mut self) -> Result<(), AppError> {
        while !self.pending.is_empty() && !self.cache.is_empty() {
            let Some(capacity) = self.cache.largest().map(|coin| coin.amount) else { break };
            let picked = pack_obligations(capacity, &self.pending, self.policy.min_working_capacity);
            if picked.is_empty() {
                log::debug!("No obligations fit under the largest coin ({})", capacity);
                break;
            }
            let Some(large) = self.cache.take_largest() else { break };
            log::info!("Consolidating {} obligations under coin {} ({})", picked.len(), large.outpoint(), large.amount);

            let mut outputs = Vec::with_capacity(picked.len());
            for &index in &picked {
                let address = self.prepare_destination(index)?;
                outputs.push((address, self.pending[index].amount));
            }

            let broadcast = send_transaction(self.rpc, &[large.outpoint()], &outputs, &self.change_address)?;
            log::info!("Consolidation transaction {} broadcast", broadcast.txid);
            self.summary.record_broadcast(&broadcast);

            let (batch, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
                .into_iter()
                .enumerate()
                .partition(|(i, _)| picked.contains(i));
            self.pending = rest.into_iter().map(|(_, o)| o).collect();
            for (_, obligation) in batch {
                let amount = obligation.amount;
                self.record(obligation, amount)?;
            }
        }
        Ok(())
    }

    /// Funds each remaining obligation with one or more chunk transactions.
    fn send_remaining(&mut self) -> Result<(), AppError> {
        while !self.pending.is_empty() {
            let address = self.prepare_destination(0)?;
            let obligation = &self.pending[0];
            let chunks = chunk_amounts(obligation.amount, self.policy.chunk_size);
            log::info!("Sending {} to {} in {} chunks", obligation.amount, obligation.name, chunks.len());

            let mut sent = Amount::ZERO;
            for chunk in chunks {
                let inputs: Vec<OutPoint> = self
                    .cache
                    .take_front_exceeding(chunk)?
                    .iter()
                    .map(Coin::outpoint)
                    .collect();
                let broadcast =
                    send_transaction(self.rpc, &inputs, &[(address.clone(), chunk)], &self.change_address)?;
                log::info!("Chunk of {} sent in {}", chunk, broadcast.txid);
                self.summary.record_broadcast(&broadcast);
                sent += chunk;
                thread::sleep(self.policy.chunk_delay);
            }

            let obligation = self.pending.remove(0);
            self.record(obligation, sent)?;
        }
        Ok(())
    }

    /// Generates and imports a key for `pending[index]`. The returned address is the
    /// generated one, and the wallet must list it under the obligation's label.
    fn prepare_destination(&mut self, index: usize) -> Result<String, AppError> {
        let keys = self.keys.generate_key_pair()?;
        let obligation = &mut self.pending[index];
        self.rpc.import_private_key(&keys.private_key, &obligation.name, false)?;
        let address = self
            .rpc
            .get_addresses_for_label(&obligation.name)?
            .into_iter()
            .find(|address| *address == keys.public_address)
            .ok_or_else(|| {
                AppError::transaction(
                    TxStage::Create,
                    format!("wallet does not list {} under {}", keys.public_address, obligation.name),
                )
            })?;
        log::debug!("Imported key for {} at {}", obligation.name, address);
        obligation.assign_keys(keys)?;
        Ok(address)
    }

    fn record(&mut self, obligation: FundingObligation, amount_sent: Amount) -> Result<(), AppError> {
        let record = obligation.into_record(amount_sent)?;
        self.ledger.append(&record)?;
        self.summary.obligations_funded += 1;
        self.summary.amount_sent += amount_sent;
        Ok(())
    }
}

/// Validates the source balance, opens the ledger, gathers coins and distributes.
pub fn run_pipeline<R: WalletRpc + ?Sized, K: KeyGenerator + ?Sized>(
    rpc: &R,
    keys: &K,
    obligations: Vec<FundingObligation>,
    request: &DistributionRequest,
    policy: &DistributionPolicy,
) -> Result<RunSummary, AppError> {
    let change_address = request
        .sources
        .first()
        .cloned()
        .ok_or_else(|| AppError::InputValidation("no source addresses configured".to_string()))?;

    let required = match verify_balance(rpc, &obligations, &request.sources, policy) {
        Ok(required) => {
            println!("Sufficient funds verified.");
            required
        }
        Err(e) => {
            eprintln!("Insufficient funds at source addresses.");
            return Err(e);
        }
    };

    let ledger = LedgerWriter::create(&request.ledger_path)?;

    let cache = match select_coins(
        rpc,
        &request.sources,
        required,
        request.strategy,
        policy.window_size,
        policy.min_confirmations,
    ) {
        Ok(cache) => {
            println!(
                "Retrieved {} unspent inputs worth {}.",
                cache.len(),
                cache.total().display_in(Denomination::Bitcoin)
            );
            log::debug!(
                "Cached inputs: {:?}",
                cache.coins().iter().map(Coin::outpoint).collect::<Vec<_>>()
            );
            cache
        }
        Err(e) => {
            eprintln!("Unable to retrieve sufficient unspent inputs.");
            ledger.close()?;
            return Err(e);
        }
    };

    let distributor = Distributor::new(rpc, keys, cache, obligations, ledger, change_address, policy.clone());
    match distributor.run() {
        Ok(summary) => {
            println!("Distribution complete.");
            Ok(summary)
        }
        Err(e) => {
            eprintln!("Distribution aborted; the ledger holds only completed accounts.");
            Err(e)
        }
    }
}
