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

//! The tracker's two scheduled phases.
//!
//! Phase A resolves each date to its canonical block, phase B fetches
//! balances and attributes rewards per date. Both fan out over the worker
//! pool, skip items already cached, and checkpoint durable state every few
//! completions so a crash loses at most one checkpoint interval. Dates
//! whose era attribution comes back empty are rescanned through the
//! event fallback after the pool drains.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use ctc_chain::balance::{fetch_balances, Balance};
use ctc_chain::resolver::{resolve_block_for_date, BlockRef};
use ctc_chain::{ChainClient, RetryPolicy, BLOCKS_PER_DAY};
use ctc_rewards::{era_rewards, scan_reward_events, ScanConfig};
use url::Url;

use crate::accounts::TrackedAccounts;
use crate::cache::{BlockCache, RewardCache};
use crate::csv_output::HistoryMap;
use crate::scheduler::{run_pool, PoolConfig};

/// Tunables for a tracker run.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub rpc_url: Url,
    pub tolerance_secs: u64,
    pub block_workers: usize,
    pub history_workers: usize,
    pub retry: RetryPolicy,
    /// Flush caches after this many completed items
    pub checkpoint_every: usize,
    pub fetch_rewards: bool,
    /// Re-fetch dates where every tracked balance is zero
    pub refetch_zero: bool,
    pub scan: ScanConfig,
}

impl ServiceConfig {
    pub fn new(rpc_url: Url) -> Self {
        Self {
            rpc_url,
            tolerance_secs: ctc_chain::resolver::DEFAULT_TOLERANCE_SECS,
            block_workers: 5,
            history_workers: 3,
            retry: RetryPolicy::default(),
            checkpoint_every: 10,
            fetch_rewards: true,
            refetch_zero: false,
            scan: ScanConfig::default(),
        }
    }
}

pub struct TrackerService {
    config: ServiceConfig,
}

#[derive(Debug, Clone)]
struct DayTask {
    date: String,
    block: BlockRef,
    end_block: u64,
    end_hash: Option<String>,
    need_balances: bool,
    need_rewards: bool,
}

#[derive(Debug)]
enum RewardOutcome {
    /// Rewards already cached for this date
    Skipped,
    Attributed(HashMap<String, f64>),
    /// Era accounting absent or zero; scan events instead
    NeedsScan,
}

#[derive(Debug)]
struct DayOutcome {
    balances: HashMap<String, Balance>,
    rewards: RewardOutcome,
}

pub fn date_key(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

impl TrackerService {
    pub fn new(config: ServiceConfig) -> Self {
        Self { config }
    }

    /// Phase A: resolve a block for every date not already cached.
    pub async fn resolve_blocks(
        &self,
        dates: &[NaiveDate],
        cache: &mut BlockCache,
    ) -> Result<()> {
        let pending: Vec<NaiveDate> = dates
            .iter()
            .copied()
            .filter(|date| !cache.is_cached(&date_key(date)))
            .collect();
        if pending.is_empty() {
            tracing::info!("all {} dates already have resolved blocks", dates.len());
            return Ok(());
        }
        tracing::info!("resolving blocks for {} uncached dates", pending.len());

        let pool = PoolConfig { workers: self.config.block_workers, retry: self.config.retry };
        let tolerance = self.config.tolerance_secs;
        let total = pending.len();
        let checkpoint = self.config.checkpoint_every.max(1);
        let mut failures = 0usize;

        let url = self.config.rpc_url.clone();
        let connect = move || {
            let url = url.clone();
            async move { Ok(ChainClient::connect(&url).await?) }
        };

        run_pool(
            &pool,
            connect,
            move |client: ChainClient, date: NaiveDate| async move {
                Ok(resolve_block_for_date(&client, date, tolerance).await?)
            },
            pending,
            |done, date, result| {
                match result {
                    Some(block) => cache.insert(date_key(&date), block),
                    None => failures += 1,
                }
                if done % checkpoint == 0 || done == total {
                    tracing::info!("[{done}/{total}] blocks resolved");
                    if let Err(err) = cache.save() {
                        tracing::warn!("block cache checkpoint failed: {err:#}");
                    }
                }
            },
        )
        .await;

        cache.save()?;
        if failures > 0 {
            tracing::warn!("{failures} dates could not be resolved; rerun to retry them");
        }
        Ok(())
    }

    /// Phase B: fetch balances and rewards for every date with missing
    /// data, then run the event-scan fallback for dates without era
    /// payouts.
    pub async fn fetch_history(
        &self,
        dates: &[NaiveDate],
        blocks: &BlockCache,
        accounts: &TrackedAccounts,
        history: &mut HistoryMap,
        rewards: &mut RewardCache,
    ) -> Result<()> {
        let probe = ChainClient::connect(&self.config.rpc_url)
            .await
            .context("chain endpoint unreachable")?;
        let latest = probe.latest_finalized().await?;

        let names = accounts.names_sorted();
        let lookup = accounts.lookup();
        let date_keys: Vec<String> = dates.iter().map(date_key).collect();

        let mut tasks = Vec::new();
        for (index, key) in date_keys.iter().enumerate() {
            let Some(block) = blocks.lookup(key) else {
                tracing::debug!("no resolved block for {key}, skipping");
                continue;
            };

            let missing_balance = names
                .iter()
                .any(|name| history.get(name).and_then(|dates| dates.get(key)).is_none());
            let all_zero = self.config.refetch_zero
                && names.iter().all(|name| {
                    history
                        .get(name)
                        .and_then(|dates| dates.get(key))
                        .map(|balance| *balance == 0.0)
                        .unwrap_or(true)
                });
            let need_balances = missing_balance || all_zero;
            let need_rewards = self.config.fetch_rewards
                && names.iter().any(|name| !rewards.contains(name, key));
            if !need_balances && !need_rewards {
                continue;
            }

            // The day's range ends at the next resolved block, or one day's
            // worth of blocks capped at the chain head.
            let (end_block, end_hash) =
                match date_keys.get(index + 1).and_then(|next| blocks.lookup(next)) {
                    Some(next) => (next.number, Some(next.hash.clone())),
                    None => (block.number + BLOCKS_PER_DAY, None),
                };

            tasks.push(DayTask {
                date: key.clone(),
                block: block.clone(),
                end_block: end_block.min(latest),
                end_hash,
                need_balances,
                need_rewards,
            });
        }

        if tasks.is_empty() {
            tracing::info!("balances and rewards are up to date");
            return Ok(());
        }
        tracing::info!("fetching balances and rewards for {} dates", tasks.len());

        let pool =
            PoolConfig { workers: self.config.history_workers, retry: self.config.retry };
        let total = tasks.len();
        let checkpoint = self.config.checkpoint_every.max(1);
        let job_lookup = lookup.clone();
        let mut scan_ranges: Vec<(String, u64, u64)> = Vec::new();
        let mut failures = 0usize;

        let url = self.config.rpc_url.clone();
        let connect = move || {
            let url = url.clone();
            async move { Ok(ChainClient::connect(&url).await?) }
        };

        run_pool(
            &pool,
            connect,
            move |client: ChainClient, task: DayTask| {
                let lookup = job_lookup.clone();
                async move {
                    let balances = if task.need_balances {
                        fetch_balances(&client, &lookup, &task.block.hash).await?
                    } else {
                        HashMap::new()
                    };

                    let rewards = if task.need_rewards {
                        let end_hash = match &task.end_hash {
                            Some(hash) => hash.clone(),
                            None => client.block_hash(task.end_block).await?,
                        };
                        match era_rewards(&client, &lookup, &task.block.hash, &end_hash).await? {
                            Some(amounts) if amounts.values().sum::<f64>() > 0.0 => {
                                RewardOutcome::Attributed(amounts)
                            }
                            Some(_) | None => RewardOutcome::NeedsScan,
                        }
                    } else {
                        RewardOutcome::Skipped
                    };

                    Ok(DayOutcome { balances, rewards })
                }
            },
            tasks,
            |done, task, outcome| {
                match outcome {
                    Some(outcome) => {
                        for (name, balance) in outcome.balances {
                            history
                                .entry(name)
                                .or_default()
                                .insert(task.date.clone(), balance.free);
                        }
                        match outcome.rewards {
                            RewardOutcome::Attributed(amounts) => {
                                for (name, amount) in amounts {
                                    rewards.insert(name, task.date.clone(), amount);
                                }
                            }
                            RewardOutcome::NeedsScan => scan_ranges.push((
                                task.date.clone(),
                                task.block.number,
                                task.end_block,
                            )),
                            RewardOutcome::Skipped => {}
                        }
                    }
                    None => failures += 1,
                }
                if done % checkpoint == 0 || done == total {
                    tracing::info!("[{done}/{total}] dates fetched");
                    if let Err(err) = rewards.save() {
                        tracing::warn!("reward cache checkpoint failed: {err:#}");
                    }
                }
            },
        )
        .await;

        for (date, start_block, end_block) in scan_ranges {
            tracing::info!("no era payouts recorded for {date}, scanning events instead");
            match scan_reward_events(
                &self.config.rpc_url,
                start_block,
                end_block,
                &lookup,
                &self.config.scan,
            )
            .await
            {
                Ok(amounts) => {
                    for (name, amount) in amounts {
                        rewards.insert(name, date.clone(), amount);
                    }
                    if let Err(err) = rewards.save() {
                        tracing::warn!("reward cache checkpoint failed: {err:#}");
                    }
                }
                Err(err) => tracing::warn!("event scan for {date} failed: {err:#}"),
            }
        }

        rewards.save()?;
        if failures > 0 {
            tracing::warn!("{failures} dates failed to fetch; rerun to retry them");
        }
        Ok(())
    }
}
