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

//! Staking reward computation for Creditcoin3: era-based attribution with an
//! event-scan fallback for ranges without era payout records.

pub mod attribution;
pub mod events;

pub use attribution::{
    attribute_era, era_rewards, fetch_era_snapshot, EraSnapshot, Exposure, ValidatorSlice,
};
pub use events::{scan_reward_events, ScanConfig};

/// Denominator of the fixed-point `Perbill` commission ratio.
pub const PERBILL_DENOMINATOR: f64 = 1_000_000_000.0;
