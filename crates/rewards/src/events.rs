// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Brute-force reward event scanning over a block range.
//!
//! Used when era attribution reports no payout for a range: every block's
//! events are fetched and filtered for staking reward events naming a
//! tracked account. Blocks that error or time out are skipped and logged,
//! never retried, so the result is best-effort and a lower bound on the
//! true rewards.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use subxt::ext::scale_value::Composite;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use url::Url;

use ctc_chain::{decode, planck_to_ctc, AccountLookup, ChainClient};

/// Pallets that have emitted staking reward events across runtime upgrades.
const REWARD_PALLETS: [&str; 4] = ["Staking", "StakingReward", "Rewards", "Creditstaking"];
/// Event variants that carry a reward payout.
const REWARD_VARIANTS: [&str; 2] = ["Rewarded", "Reward"];

/// Bounds for one scan batch.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Concurrent scan workers, each with its own connection
    pub workers: usize,
    /// Budget for fetching and filtering a single block
    pub block_timeout: Duration,
    /// Budget for the whole batch; on expiry the partial result is returned
    pub scan_timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            block_timeout: Duration::from_secs(20),
            scan_timeout: Duration::from_secs(900),
        }
    }
}

/// Scan `[start_block, end_block]` for staking reward events paid to the
/// tracked accounts. Amounts are decimal CTC; every tracked account appears
/// in the result, zero when nothing was found.
pub async fn scan_reward_events(
    url: &Url,
    start_block: u64,
    end_block: u64,
    tracked: &AccountLookup,
    config: &ScanConfig,
) -> Result<HashMap<String, f64>> {
    let mut totals: HashMap<String, u128> =
        tracked.values().map(|name| (name.clone(), 0u128)).collect();

    if start_block > end_block {
        return Ok(finalize(totals));
    }

    let total_blocks = end_block - start_block + 1;
    tracing::info!(
        "scanning {total_blocks} blocks [{start_block}, {end_block}] for reward events"
    );

    let queue: Arc<Mutex<VecDeque<u64>>> =
        Arc::new(Mutex::new((start_block..=end_block).collect()));
    let workers = config.workers.max(1);
    let (tx, mut rx) = mpsc::channel::<HashMap<String, u128>>(workers);

    let mut set = JoinSet::new();
    for _ in 0..workers {
        let queue = Arc::clone(&queue);
        let tx = tx.clone();
        let url = url.clone();
        let tracked = tracked.clone();
        let block_timeout = config.block_timeout;
        set.spawn(async move {
            let client = match ChainClient::connect(&url).await {
                Ok(client) => client,
                Err(err) => {
                    tracing::warn!("scan worker could not connect: {err}");
                    return;
                }
            };
            let mut local: HashMap<String, u128> = HashMap::new();
            loop {
                let block = { queue.lock().await.pop_front() };
                let Some(block) = block else { break };
                match tokio::time::timeout(block_timeout, scan_block(&client, block, &tracked))
                    .await
                {
                    Ok(Ok(found)) => {
                        for (name, amount) in found {
                            *local.entry(name).or_insert(0) += amount;
                        }
                    }
                    Ok(Err(err)) => tracing::warn!("skipping block {block}: {err:#}"),
                    Err(_) => tracing::warn!("skipping block {block}: timed out"),
                }
            }
            let _ = tx.send(local).await;
        });
    }
    drop(tx);

    let collect = async {
        while let Some(local) = rx.recv().await {
            for (name, amount) in local {
                *totals.entry(name).or_insert(0) += amount;
            }
        }
    };
    if tokio::time::timeout(config.scan_timeout, collect).await.is_err() {
        tracing::warn!(
            "event scan exceeded {:?}, returning partial results",
            config.scan_timeout
        );
        set.abort_all();
    }
    while set.join_next().await.is_some() {}

    Ok(finalize(totals))
}

fn finalize(totals: HashMap<String, u128>) -> HashMap<String, f64> {
    totals.into_iter().map(|(name, raw)| (name, planck_to_ctc(raw))).collect()
}

/// Rewards paid to tracked accounts in one block.
async fn scan_block(
    client: &ChainClient,
    number: u64,
    tracked: &AccountLookup,
) -> Result<Vec<(String, u128)>> {
    let hash = client.block_hash(number).await?;
    let events = client.block_events(&hash).await?;

    let mut found = Vec::new();
    for event in events.iter() {
        let event = event?;
        if !REWARD_PALLETS.contains(&event.pallet_name()) {
            continue;
        }
        if !REWARD_VARIANTS.contains(&event.variant_name()) {
            continue;
        }
        let fields = event.field_values()?;
        if let Some((stash, amount)) = reward_event_parts(&fields) {
            if let Some(name) = tracked.get(&stash) {
                tracing::debug!("block {number}: {name} rewarded {amount}");
                found.push((name.clone(), amount));
            }
        }
    }
    Ok(found)
}

/// Pull the beneficiary and amount out of a reward event's fields. Handles
/// both named (`stash`/`amount`) and positional layouts; the amount is the
/// last integer field so reward destinations and point counts in between
/// are ignored.
fn reward_event_parts<T>(fields: &Composite<T>) -> Option<([u8; 32], u128)> {
    match fields {
        Composite::Named(named) => {
            let stash = named
                .iter()
                .find(|(name, _)| name == "stash" || name == "who" || name == "account")
                .and_then(|(_, value)| decode::account_bytes(value))
                .or_else(|| named.iter().find_map(|(_, value)| decode::account_bytes(value)))?;
            let amount = named
                .iter()
                .find(|(name, _)| name == "amount" || name == "reward" || name == "value")
                .and_then(|(_, value)| decode::as_u128(value))
                .or_else(|| named.iter().rev().find_map(|(_, value)| decode::as_u128(value)))?;
            Some((stash, amount))
        }
        Composite::Unnamed(values) => {
            let stash = values.iter().find_map(|value| decode::account_bytes(value))?;
            let amount = values.iter().rev().find_map(|value| decode::as_u128(value))?;
            Some((stash, amount))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subxt::ext::scale_value::Value;

    const TRACKED: [u8; 32] = [9u8; 32];
    const OTHER: [u8; 32] = [4u8; 32];

    fn rewarded_fields(stash: [u8; 32], amount: u128) -> Composite<()> {
        Composite::Named(vec![
            ("stash".to_string(), Value::from_bytes(stash)),
            ("dest".to_string(), Value::variant("Staked", Composite::Unnamed(vec![]))),
            ("amount".to_string(), Value::u128(amount)),
        ])
    }

    #[test]
    fn parses_named_reward_event() {
        let fields = rewarded_fields(TRACKED, 5_000_000_000_000_000_000);
        assert_eq!(reward_event_parts(&fields), Some((TRACKED, 5_000_000_000_000_000_000)));
    }

    #[test]
    fn parses_positional_reward_event() {
        let fields = Composite::Unnamed(vec![
            Value::from_bytes(TRACKED),
            Value::u128(42_000_000_000_000_000_000),
        ]);
        assert_eq!(reward_event_parts(&fields), Some((TRACKED, 42_000_000_000_000_000_000)));
    }

    #[test]
    fn ignores_events_without_an_account() {
        let fields = Composite::Named(vec![("era_index".to_string(), Value::u128(12))]);
        assert_eq!(reward_event_parts(&fields), None);
    }

    #[test]
    fn one_rewarded_block_and_one_empty_block() {
        let mut tracked = AccountLookup::new();
        tracked.insert(TRACKED, "X".to_string());

        // Block A pays 5 CTC to X, block B emits nothing.
        let blocks: Vec<Vec<Composite<()>>> =
            vec![vec![rewarded_fields(TRACKED, 5 * 10u128.pow(18))], vec![]];

        let mut totals: HashMap<String, u128> =
            tracked.values().map(|name| (name.clone(), 0)).collect();
        for block in &blocks {
            for fields in block {
                if let Some((stash, amount)) = reward_event_parts(fields) {
                    if let Some(name) = tracked.get(&stash) {
                        *totals.entry(name.clone()).or_insert(0) += amount;
                    }
                }
            }
        }

        let result = finalize(totals);
        assert_eq!(result.len(), 1);
        assert_eq!(result["X"], 5.0);
    }

    #[test]
    fn untracked_beneficiaries_are_ignored() {
        let mut tracked = AccountLookup::new();
        tracked.insert(TRACKED, "X".to_string());

        let fields = rewarded_fields(OTHER, 10u128.pow(18));
        let (stash, _) = reward_event_parts(&fields).unwrap();
        assert!(tracked.get(&stash).is_none());
    }

    #[tokio::test]
    async fn empty_range_returns_zeroed_accounts() {
        let mut tracked = AccountLookup::new();
        tracked.insert(TRACKED, "X".to_string());
        let url: Url = "ws://127.0.0.1:1".parse().unwrap();

        let result = scan_reward_events(&url, 10, 9, &tracked, &ScanConfig::default())
            .await
            .unwrap();
        assert_eq!(result["X"], 0.0);
    }
}
