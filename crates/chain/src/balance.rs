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

//! Account balance queries against `System.Account` at a block hash.

use std::collections::HashMap;

use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use subxt::dynamic::Value;
use subxt::utils::AccountId32;

use crate::client::ChainClient;
use crate::error::ChainError;
use crate::{decode, planck_to_ctc, AccountLookup};

/// Account balance in decimal CTC at a given block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub free: f64,
    pub reserved: f64,
    pub frozen: f64,
}

impl Balance {
    /// Free plus reserved.
    pub fn total(&self) -> f64 {
        self.free + self.reserved
    }
}

/// Balance of one account at `at`. An absent storage entry is a zero
/// balance, not an error.
pub async fn account_balance(
    client: &ChainClient,
    account: &AccountId32,
    at: &str,
) -> Result<Balance, ChainError> {
    let keys = vec![Value::from_bytes(account.0)];
    let Some(value) = client.storage_value("System", "Account", keys, at).await? else {
        return Ok(Balance::default());
    };
    let data = decode::field(&value, "data").ok_or(ChainError::Decode("System.Account.data"))?;
    let free = decode::field(data, "free").and_then(decode::as_u128).unwrap_or(0);
    let reserved = decode::field(data, "reserved").and_then(decode::as_u128).unwrap_or(0);
    let frozen = decode::field(data, "frozen").and_then(decode::as_u128).unwrap_or(0);
    Ok(Balance {
        free: planck_to_ctc(free),
        reserved: planck_to_ctc(reserved),
        frozen: planck_to_ctc(frozen),
    })
}

/// Balances for the whole tracked set at one block, fetched concurrently
/// over the shared handle.
pub async fn fetch_balances(
    client: &ChainClient,
    accounts: &AccountLookup,
    at: &str,
) -> Result<HashMap<String, Balance>, ChainError> {
    let futures: Vec<_> = accounts
        .iter()
        .map(|(id, name)| {
            let client = client.clone();
            let name = name.clone();
            let account = AccountId32(*id);
            let at = at.to_string();
            async move {
                let balance = account_balance(&client, &account, &at).await?;
                Ok::<_, ChainError>((name, balance))
            }
        })
        .collect();
    Ok(try_join_all(futures).await?.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_sums_free_and_reserved() {
        let balance = Balance { free: 100.0, reserved: 50.0, frozen: 10.0 };
        assert_eq!(balance.total(), 150.0);
    }

    #[test]
    fn default_is_zero() {
        assert_eq!(Balance::default(), Balance { free: 0.0, reserved: 0.0, frozen: 0.0 });
    }
}
