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

//! Era-based staking reward attribution.
//!
//! Each era pools a total payout `R` that is split across validators in
//! proportion to their reward points; a validator keeps its commission plus
//! the share of the remainder backed by its own stake, and each nominator
//! earns the remainder share backed by its stake. Fetching is separated
//! from the share formula: `fetch_era_snapshot` gathers one era's state
//! into an [`EraSnapshot`], and [`attribute_era`] applies the formula to it.

use std::collections::HashMap;

use anyhow::{Context, Result};
use subxt::dynamic::Value;
use subxt::utils::AccountId32;

use crate::PERBILL_DENOMINATOR;
use ctc_chain::{decode, AccountLookup, ChainClient, PLANCK_PER_CTC};

/// Stake backing a validator in one era, in either of the runtime's two
/// storage representations. Paged exposure carries its nominator pages
/// already concatenated.
#[derive(Debug, Clone)]
pub enum Exposure {
    /// `ErasStakersOverview` + `ErasStakersPaged` (current runtimes)
    Paged {
        total: u128,
        own: u128,
        nominators: Vec<(AccountId32, u128)>,
        page_count: u32,
    },
    /// `ErasStakersClipped` (older chain state)
    Clipped {
        total: u128,
        own: u128,
        nominators: Vec<(AccountId32, u128)>,
    },
}

impl Exposure {
    pub fn total(&self) -> u128 {
        match self {
            Exposure::Paged { total, .. } | Exposure::Clipped { total, .. } => *total,
        }
    }

    pub fn own(&self) -> u128 {
        match self {
            Exposure::Paged { own, .. } | Exposure::Clipped { own, .. } => *own,
        }
    }

    pub fn nominators(&self) -> &[(AccountId32, u128)] {
        match self {
            Exposure::Paged { nominators, .. } | Exposure::Clipped { nominators, .. } => nominators,
        }
    }
}

/// One validator's slice of an era: points earned, commission and exposure.
#[derive(Debug, Clone)]
pub struct ValidatorSlice {
    pub stash: AccountId32,
    pub points: u64,
    /// Commission ratio in `[0, 1]`, from the Perbill-scaled preference
    pub commission: f64,
    pub exposure: Exposure,
}

/// Everything needed to attribute one era's payout.
#[derive(Debug, Clone)]
pub struct EraSnapshot {
    pub era: u32,
    /// Total era payout in minimal units (`ErasValidatorReward`)
    pub total_reward: u128,
    /// Sum of all validators' reward points
    pub total_points: u64,
    pub validators: Vec<ValidatorSlice>,
}

/// Apply the distribution formula to one era, returning accumulated
/// minimal-unit amounts for the tracked accounts that participated.
pub fn attribute_era(snapshot: &EraSnapshot, tracked: &AccountLookup) -> HashMap<String, f64> {
    let mut totals: HashMap<String, f64> = HashMap::new();
    if snapshot.total_reward == 0 || snapshot.total_points == 0 {
        return totals;
    }

    for validator in &snapshot.validators {
        if validator.points == 0 {
            continue;
        }
        let total_stake = validator.exposure.total();
        if total_stake == 0 {
            continue;
        }

        let r_v = snapshot.total_reward as f64 * validator.points as f64
            / snapshot.total_points as f64;
        let commission = validator.commission;

        if let Some(name) = tracked.get(&validator.stash.0) {
            let own_share = r_v * commission
                + r_v * (1.0 - commission)
                    * (validator.exposure.own() as f64 / total_stake as f64);
            *totals.entry(name.clone()).or_insert(0.0) += own_share;
        }

        for (who, stake) in validator.exposure.nominators() {
            if let Some(name) = tracked.get(&who.0) {
                let share = r_v * (1.0 - commission) * (*stake as f64 / total_stake as f64);
                *totals.entry(name.clone()).or_insert(0.0) += share;
            }
        }
    }

    totals
}

/// Active era index at a block hash, or `None` when the pallet has no era
/// state there.
pub async fn active_era(client: &ChainClient, at: &str) -> Result<Option<u32>> {
    let Some(value) = client.storage_value("Staking", "ActiveEra", vec![], at).await? else {
        return Ok(None);
    };
    Ok(decode::field(&value, "index").and_then(decode::as_u128).map(|index| index as u32))
}

/// Gather one era's payout, points, commissions and exposures, read at
/// `at`. `None` means the era has no payout record yet.
pub async fn fetch_era_snapshot(
    client: &ChainClient,
    era: u32,
    at: &str,
) -> Result<Option<EraSnapshot>> {
    let era_key = || vec![Value::u128(era as u128)];

    let Some(reward) =
        client.storage_value("Staking", "ErasValidatorReward", era_key(), at).await?
    else {
        return Ok(None);
    };
    let total_reward =
        decode::as_u128(&reward).context("decoding Staking.ErasValidatorReward")?;

    let Some(points) =
        client.storage_value("Staking", "ErasRewardPoints", era_key(), at).await?
    else {
        return Ok(None);
    };
    let total_points = decode::field(&points, "total")
        .and_then(decode::as_u128)
        .context("decoding Staking.ErasRewardPoints total")? as u64;

    let mut validators = Vec::new();
    if let Some(pairs) = decode::field(&points, "individual").and_then(decode::items) {
        for pair in pairs {
            let Some(parts) = decode::items(pair) else { continue };
            if parts.len() != 2 {
                continue;
            }
            let Some(stash) = decode::account_bytes(parts[0]) else { continue };
            let Some(earned) = decode::as_u128(parts[1]) else { continue };
            if earned == 0 {
                continue;
            }
            let stash = AccountId32(stash);

            let commission = fetch_commission(client, era, &stash, at).await?;
            let Some(exposure) = fetch_exposure(client, era, &stash, at).await? else {
                tracing::debug!("era {era}: validator {stash} has no exposure, skipping");
                continue;
            };
            validators.push(ValidatorSlice {
                stash,
                points: earned as u64,
                commission,
                exposure,
            });
        }
    }

    Ok(Some(EraSnapshot { era, total_reward, total_points, validators }))
}

async fn fetch_commission(
    client: &ChainClient,
    era: u32,
    stash: &AccountId32,
    at: &str,
) -> Result<f64> {
    let keys = vec![Value::u128(era as u128), Value::from_bytes(stash.0)];
    let Some(prefs) = client.storage_value("Staking", "ErasValidatorPrefs", keys, at).await?
    else {
        return Ok(0.0);
    };
    let perbill = decode::field(&prefs, "commission").and_then(decode::as_u128).unwrap_or(0);
    Ok(perbill as f64 / PERBILL_DENOMINATOR)
}

/// Resolve a validator's exposure, preferring the paged overview and
/// falling back to the legacy clipped entry on older chain state.
async fn fetch_exposure(
    client: &ChainClient,
    era: u32,
    stash: &AccountId32,
    at: &str,
) -> Result<Option<Exposure>> {
    let validator_key = || vec![Value::u128(era as u128), Value::from_bytes(stash.0)];

    if let Some(overview) =
        client.storage_value("Staking", "ErasStakersOverview", validator_key(), at).await?
    {
        let total = decode::field(&overview, "total").and_then(decode::as_u128).unwrap_or(0);
        let own = decode::field(&overview, "own").and_then(decode::as_u128).unwrap_or(0);
        let page_count = decode::field(&overview, "page_count")
            .and_then(decode::as_u128)
            .unwrap_or(0) as u32;

        let mut nominators = Vec::new();
        for page in 0..page_count {
            let keys = vec![
                Value::u128(era as u128),
                Value::from_bytes(stash.0),
                Value::u128(page as u128),
            ];
            let Some(page_value) =
                client.storage_value("Staking", "ErasStakersPaged", keys, at).await?
            else {
                continue;
            };
            if let Some(others) = decode::field(&page_value, "others").and_then(decode::items) {
                nominators.extend(others.into_iter().filter_map(individual_exposure));
            }
        }
        return Ok(Some(Exposure::Paged { total, own, nominators, page_count }));
    }

    if let Some(clipped) =
        client.storage_value("Staking", "ErasStakersClipped", validator_key(), at).await?
    {
        let total = decode::field(&clipped, "total").and_then(decode::as_u128).unwrap_or(0);
        let own = decode::field(&clipped, "own").and_then(decode::as_u128).unwrap_or(0);
        let nominators = decode::field(&clipped, "others")
            .and_then(decode::items)
            .map(|others| others.into_iter().filter_map(individual_exposure).collect())
            .unwrap_or_default();
        return Ok(Some(Exposure::Clipped { total, own, nominators }));
    }

    Ok(None)
}

fn individual_exposure<T>(
    value: &subxt::ext::scale_value::Value<T>,
) -> Option<(AccountId32, u128)> {
    let who = decode::field(value, "who")
        .or_else(|| decode::items(value).and_then(|parts| parts.first().copied()))
        .and_then(decode::account_bytes)?;
    let stake = decode::field(value, "value")
        .or_else(|| decode::items(value).and_then(|parts| parts.get(1).copied()))
        .and_then(decode::as_u128)?;
    Some((AccountId32(who), stake))
}

/// Attribute staking rewards to the tracked accounts over the block range
/// `[start_hash, end_hash]`, walking the active eras at the endpoints
/// inclusively. Returns `None` when era state is unresolvable at either
/// endpoint, signalling the caller to fall back to event scanning. Amounts
/// are decimal CTC; every tracked account appears in the result.
pub async fn era_rewards(
    client: &ChainClient,
    tracked: &AccountLookup,
    start_hash: &str,
    end_hash: &str,
) -> Result<Option<HashMap<String, f64>>> {
    let (Some(start_era), Some(end_era)) =
        (active_era(client, start_hash).await?, active_era(client, end_hash).await?)
    else {
        return Ok(None);
    };

    let mut totals: HashMap<String, f64> =
        tracked.values().map(|name| (name.clone(), 0.0)).collect();

    for era in start_era..=end_era {
        let Some(snapshot) = fetch_era_snapshot(client, era, end_hash).await? else {
            tracing::debug!("era {era}: no payout recorded yet, skipping");
            continue;
        };
        for (name, amount) in attribute_era(&snapshot, tracked) {
            if let Some(total) = totals.get_mut(&name) {
                *total += amount;
            }
        }
    }

    Ok(Some(
        totals.into_iter().map(|(name, raw)| (name, raw / PLANCK_PER_CTC)).collect(),
    ))
}
