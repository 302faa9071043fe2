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

//! Timestamp-targeted block resolution.
//!
//! Block timestamps increase monotonically with block number, so a date is
//! resolved by estimating a block from the genesis timestamp and block time,
//! then binary searching a window around the estimate. If the narrowed
//! search lands more than a day off the target, the search is rerun once
//! over the full chain before the result is accepted.

use std::future::Future;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::client::ChainClient;
use crate::error::ChainError;
use crate::BLOCK_TIME_SECONDS;

/// Accept a block whose timestamp is within this many seconds of the target.
pub const DEFAULT_TOLERANCE_SECS: u64 = 60;
/// Half-width of the search window around the estimated block (~3.5 days).
pub const SEARCH_WINDOW_BLOCKS: u64 = 20_000;
/// A best match further off than this is considered degraded.
const DEGRADED_THRESHOLD_SECS: u64 = 86_400;

/// A resolved block: number plus hex hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    #[serde(rename = "block")]
    pub number: u64,
    pub hash: String,
}

struct Candidate {
    number: u64,
    hash: String,
    diff: u64,
}

/// Binary search `[low, high]` for the block closest to `target_ts`,
/// stopping early within `tolerance`. Returns the best candidate seen, or
/// `None` when the range is empty.
async fn search_range<F, Fut>(
    lookup: &mut F,
    mut low: u64,
    mut high: u64,
    target_ts: u64,
    tolerance: u64,
) -> Result<Option<Candidate>, ChainError>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<(String, u64), ChainError>>,
{
    let mut best: Option<Candidate> = None;
    while low <= high {
        let mid = low + (high - low) / 2;
        let (hash, timestamp) = lookup(mid).await?;
        let diff = target_ts.abs_diff(timestamp);

        if best.as_ref().map_or(true, |b| diff < b.diff) {
            best = Some(Candidate { number: mid, hash, diff });
        }
        if diff <= tolerance {
            break;
        }

        if timestamp < target_ts {
            low = mid + 1;
        } else {
            if mid == 0 {
                break;
            }
            high = mid - 1;
        }
    }
    Ok(best)
}

/// Window estimation, search and the one-shot widening retry, generic over
/// the timestamp lookup so the behavior is testable against an oracle.
async fn resolve_with_lookup<F, Fut>(
    lookup: &mut F,
    latest: u64,
    genesis_ts: Option<u64>,
    target_ts: u64,
    tolerance: u64,
) -> Result<BlockRef, ChainError>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<(String, u64), ChainError>>,
{
    let (low, high) = match genesis_ts {
        Some(genesis_ts) => {
            let estimate = target_ts.saturating_sub(genesis_ts) / BLOCK_TIME_SECONDS;
            let low = estimate.saturating_sub(SEARCH_WINDOW_BLOCKS).min(latest);
            let high = estimate.saturating_add(SEARCH_WINDOW_BLOCKS).min(latest);
            (low, high)
        }
        None => (0, latest),
    };

    let mut best = search_range(lookup, low, high, target_ts, tolerance)
        .await?
        .ok_or(ChainError::EmptySearchRange)?;

    let narrowed = low > 0 || high < latest;
    if best.diff > DEGRADED_THRESHOLD_SECS && narrowed {
        tracing::warn!(
            "closest block in window [{low}, {high}] is {}s off target {target_ts}, widening to the full chain",
            best.diff
        );
        if let Some(full) = search_range(lookup, 0, latest, target_ts, tolerance).await? {
            if full.diff < best.diff {
                best = full;
            }
        }
    }
    if best.diff > DEGRADED_THRESHOLD_SECS {
        tracing::warn!(
            "resolved block {} is still {}s away from target {target_ts}",
            best.number,
            best.diff
        );
    }

    Ok(BlockRef { number: best.number, hash: best.hash })
}

/// Find the block whose timestamp best matches `target_ts`.
///
/// A target before genesis resolves near block 0; a target beyond the chain
/// head resolves to the latest finalized block.
pub async fn find_block_at_timestamp(
    client: &ChainClient,
    target_ts: u64,
    tolerance_secs: u64,
) -> Result<BlockRef, ChainError> {
    let latest = client.latest_finalized().await?;
    let genesis_ts = match client.genesis_timestamp().await {
        Ok(ts) => Some(ts),
        Err(err) => {
            tracing::warn!("genesis timestamp unavailable, searching the full chain: {err}");
            None
        }
    };

    let mut lookup = |number: u64| {
        let client = client.clone();
        async move {
            let hash = client.block_hash(number).await?;
            let timestamp = client.block_timestamp(&hash).await?;
            Ok((hash, timestamp))
        }
    };

    resolve_with_lookup(&mut lookup, latest, genesis_ts, target_ts, tolerance_secs).await
}

/// Unix timestamp of UTC midnight for a calendar date.
pub fn utc_midnight_timestamp(date: NaiveDate) -> u64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp().max(0) as u64
}

/// Resolve the canonical block for a calendar date (UTC midnight).
pub async fn resolve_block_for_date(
    client: &ChainClient,
    date: NaiveDate,
    tolerance_secs: u64,
) -> Result<BlockRef, ChainError> {
    find_block_at_timestamp(client, utc_midnight_timestamp(date), tolerance_secs).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const GENESIS_TS: u64 = 1_724_889_600; // 2024-08-29 00:00:00 UTC

    fn oracle_ts(number: u64) -> u64 {
        GENESIS_TS + number * BLOCK_TIME_SECONDS
    }

    /// Linear chain oracle: block n has timestamp genesis + 15n.
    async fn oracle(number: u64) -> Result<(String, u64), ChainError> {
        Ok((format!("0x{number:064x}"), oracle_ts(number)))
    }

    async fn resolve(latest: u64, target_ts: u64, tolerance: u64) -> BlockRef {
        let mut lookup = |n| oracle(n);
        resolve_with_lookup(&mut lookup, latest, Some(GENESIS_TS), target_ts, tolerance)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn finds_block_within_tolerance() {
        let latest = 500_000;
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let target = oracle_ts(rng.random_range(0..latest)) + rng.random_range(0..15);
            let block = resolve(latest, target, DEFAULT_TOLERANCE_SECS).await;
            let diff = target.abs_diff(oracle_ts(block.number));
            assert!(diff <= DEFAULT_TOLERANCE_SECS, "target {target}: diff {diff}");
        }
    }

    #[tokio::test]
    async fn resolved_numbers_are_monotonic_in_date() {
        let latest = 500_000;
        let mut previous = 0u64;
        for day in 0..40 {
            let target = GENESIS_TS + day * 86_400;
            let block = resolve(latest, target, DEFAULT_TOLERANCE_SECS).await;
            assert!(block.number >= previous, "day {day} went backwards");
            previous = block.number;
        }
    }

    #[tokio::test]
    async fn target_before_genesis_resolves_near_block_zero() {
        let block = resolve(500_000, GENESIS_TS - 86_400, DEFAULT_TOLERANCE_SECS).await;
        assert_eq!(block.number, 0);
    }

    #[tokio::test]
    async fn target_beyond_head_resolves_to_latest() {
        let latest = 100_000;
        let target = oracle_ts(latest) + 30 * 86_400;
        let block = resolve(latest, target, DEFAULT_TOLERANCE_SECS).await;
        assert_eq!(block.number, latest);
    }

    #[tokio::test]
    async fn exhausted_search_returns_best_candidate() {
        // Zero tolerance on a target between two blocks: no block matches
        // exactly, so the search exhausts and returns the closest one.
        let target = oracle_ts(1000) + 7;
        let block = resolve(500_000, target, 0).await;
        assert_eq!(block.number, 1000);
    }

    #[tokio::test]
    async fn missing_genesis_falls_back_to_full_range() {
        let mut lookup = |n| oracle(n);
        let target = oracle_ts(123_456);
        let block = resolve_with_lookup(&mut lookup, 500_000, None, target, 60).await.unwrap();
        assert_eq!(block.number, 123_456);
    }

    #[tokio::test]
    async fn widening_recovers_from_a_bad_estimate() {
        // A genesis timestamp far in the past skews the estimate well beyond
        // the real chain, so the narrowed window misses by days and the
        // full-range retry must find the true block.
        let target = oracle_ts(100_000);
        let mut lookup = |n| oracle(n);
        let skewed_genesis = GENESIS_TS - 400_000 * BLOCK_TIME_SECONDS;
        let block =
            resolve_with_lookup(&mut lookup, 500_000, Some(skewed_genesis), target, 60)
                .await
                .unwrap();
        assert_eq!(block.number, 100_000);
    }

    #[test]
    fn midnight_timestamp_is_utc() {
        let date = NaiveDate::from_ymd_opt(2024, 8, 29).unwrap();
        assert_eq!(utc_midnight_timestamp(date), GENESIS_TS);
    }

    #[test]
    fn block_ref_serializes_to_cache_format() {
        let block = BlockRef { number: 12345, hash: "0xabcd".into() };
        let json = serde_json::to_string(&block).unwrap();
        assert_eq!(json, r#"{"block":12345,"hash":"0xabcd"}"#);
        let back: BlockRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }
}
