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

//! Chain access layer for the Creditcoin3 tracker: connection handles,
//! timestamp-targeted block resolution and balance queries.

pub mod balance;
pub mod client;
pub mod decode;
pub mod error;
pub mod resolver;
pub mod retry;

pub use balance::{account_balance, fetch_balances, Balance};
pub use client::{ChainClient, ChainInfo};
pub use error::ChainError;
pub use resolver::{find_block_at_timestamp, resolve_block_for_date, BlockRef};
pub use retry::RetryPolicy;

use std::collections::HashMap;

/// Default Creditcoin3 mainnet RPC endpoint
pub const NODE_URL: &str = "wss://mainnet3.creditcoin.network";
/// Creditcoin3 mainnet genesis date (block 1)
pub const GENESIS_DATE: &str = "2024-08-29";
/// Target block time in seconds
pub const BLOCK_TIME_SECONDS: u64 = 15;
/// Blocks produced per day at the target block time
pub const BLOCKS_PER_DAY: u64 = 86_400 / BLOCK_TIME_SECONDS;
/// CTC token decimals
pub const CTC_DECIMALS: u32 = 18;
/// Minimal units (planck) per whole CTC
pub const PLANCK_PER_CTC: f64 = 1e18;

/// Tracked account set: raw 32-byte account id to account name
pub type AccountLookup = HashMap<[u8; 32], String>;

/// Convert a minimal-unit integer amount to decimal CTC.
pub fn planck_to_ctc(raw: u128) -> f64 {
    raw as f64 / PLANCK_PER_CTC
}

/// Convert a decimal CTC amount back to minimal units.
pub fn ctc_to_planck(ctc: f64) -> u128 {
    (ctc * PLANCK_PER_CTC).round() as u128
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planck_round_trips_within_one_unit() {
        for raw in [0u128, 1, 999, 123_456_789, 10u128.pow(18), 5 * 10u128.pow(18)] {
            let back = ctc_to_planck(planck_to_ctc(raw));
            assert!(back.abs_diff(raw) <= 1, "raw {raw} round-tripped to {back}");
        }
        // Values adjacent to a whole token land within one minimal unit.
        let raw = 10u128.pow(18) + 1;
        assert!(ctc_to_planck(planck_to_ctc(raw)).abs_diff(raw) <= 1);
    }

    #[test]
    fn decimal_conversion_matches_divisor() {
        assert_eq!(planck_to_ctc(5 * 10u128.pow(18)), 5.0);
        assert_eq!(planck_to_ctc(25 * 10u128.pow(17)), 2.5);
        assert_eq!(ctc_to_planck(2.5), 25 * 10u128.pow(17));
    }

    #[test]
    fn blocks_per_day_matches_block_time() {
        assert_eq!(BLOCKS_PER_DAY, 5760);
    }
}
