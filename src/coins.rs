use bitcoin::Amount;
use serde::Deserialize;

use crate::error::AppError;
use crate::rpc::WalletRpc;
use crate::types::Coin;

/// Order in which confirmation windows are walked when gathering inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStrategy {
    /// Deepest-confirmed coins first, walking down from the chain tip.
    #[default]
    Oldest,
    /// Shallowest-confirmed coins first, walking up from the confirmation floor.
    Newest,
}

/// Coins gathered for this run. Once populated it is the only view of spendable inputs:
/// every component that spends a coin removes it here, and the wallet is not asked again.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CoinCache {
    coins: Vec<Coin>,
}

impl CoinCache {
    pub fn new(coins: Vec<Coin>) -> Self {
        CoinCache { coins }
    }

    pub fn coins(&self) -> &[Coin] {
        &self.coins
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    pub fn total(&self) -> Amount {
        self.coins.iter().map(|c| c.amount).sum()
    }

    fn largest_index(&self) -> Option<usize> {
        // Earliest entry wins ties.
        self.coins
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, Amount)>, (i, coin)| match best {
                Some((_, amount)) if amount >= coin.amount => best,
                _ => Some((i, coin.amount)),
            })
            .map(|(i, _)| i)
    }

    pub fn largest(&self) -> Option<&Coin> {
        self.largest_index().map(|i| &self.coins[i])
    }

    pub fn take_largest(&mut self) -> Option<Coin> {
        self.largest_index().map(|i| self.coins.remove(i))
    }

    /// Removes coins from the front until their sum exceeds `target`. Nothing is removed
    /// when the whole cache cannot exceed it.
    pub fn take_front_exceeding(&mut self, target: Amount) -> Result<Vec<Coin>, AppError> {
        let available = self.total();
        if available <= target {
            return Err(AppError::CoinSupplyInsufficient { available, required: target });
        }

        let mut gathered = Amount::ZERO;
        let mut count = 0;
        for coin in &self.coins {
            gathered += coin.amount;
            count += 1;
            if gathered > target {
                break;
            }
        }
        Ok(self.coins.drain(..count).collect())
    }
}

/// Inclusive `(min_conf, max_conf)` ranges to query, in the order the strategy visits them.
pub fn confirmation_windows(
    strategy: SelectionStrategy,
    chain_height: u64,
    window_size: u64,
    floor: u64,
) -> Vec<(u64, u64)> {
    let window_size = window_size.max(1);
    let mut windows = Vec::new();
    if chain_height < floor {
        return windows;
    }

    match strategy {
        SelectionStrategy::Oldest => {
            let mut upper = chain_height;
            loop {
                let lower = upper.saturating_sub(window_size - 1).max(floor);
                windows.push((lower, upper));
                if lower == floor {
                    break;
                }
                upper = lower - 1;
            }
        }
        SelectionStrategy::Newest => {
            let mut lower = floor;
            while lower <= chain_height {
                let upper = lower.saturating_add(window_size - 1).min(chain_height);
                windows.push((lower, upper));
                lower = upper + 1;
            }
        }
    }
    windows
}

/// Fills a cache with eligible coins from `addresses` until `required` is covered.
pub fn select_coins<R: WalletRpc + ?Sized>(
    rpc: &R,
    addresses: &[String],
    required: Amount,
    strategy: SelectionStrategy,
    window_size: u64,
    floor: u64,
) -> Result<CoinCache, AppError> {
    let chain_height = rpc.get_block_count()?;
    log::info!(
        "Selecting {} of inputs, {:?} first, chain height {}",
        required,
        strategy,
        chain_height
    );

    let mut selected = Vec::new();
    let mut total = Amount::ZERO;

    'windows: for (min_conf, max_conf) in confirmation_windows(strategy, chain_height, window_size, floor) {
        if total >= required {
            break;
        }
        let mut batch: Vec<Coin> = rpc
            .list_unspent(min_conf, max_conf, addresses)?
            .into_iter()
            .filter(Coin::is_eligible)
            .collect();
        log::debug!("Window {}..={} returned {} eligible coins", min_conf, max_conf, batch.len());

        batch.sort_by(|a, b| {
            let by_depth = match strategy {
                SelectionStrategy::Oldest => b.confirmations.cmp(&a.confirmations),
                SelectionStrategy::Newest => a.confirmations.cmp(&b.confirmations),
            };
            by_depth.then_with(|| a.outpoint().cmp(&b.outpoint()))
        });

        for coin in batch {
            log::debug!(
                "Taking {} ({}) from {}",
                coin.outpoint(),
                coin.amount,
                coin.address.as_deref().unwrap_or("unknown address")
            );
            total += coin.amount;
            selected.push(coin);
            if total >= required {
                break 'windows;
            }
        }
    }

    if total < required {
        return Err(AppError::CoinSupplyInsufficient { available: total, required });
    }
    log::info!("Selected {} coins worth {}", selected.len(), total);
    Ok(CoinCache::new(selected))
}
