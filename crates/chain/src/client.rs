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

//! Connection handle for a Creditcoin3 node.
//!
//! A `ChainClient` is an explicitly constructed, cheaply clonable handle.
//! Workers that need connection isolation construct their own handle and
//! reuse it across tasks; recovery from a broken connection is a fresh
//! `connect`, decided by the caller's retry policy rather than hidden
//! reconnect state.

use std::sync::Arc;

use subxt::backend::legacy::LegacyRpcMethods;
use subxt::backend::rpc::RpcClient;
use subxt::dynamic::Value;
use subxt::events::Events;
use subxt::ext::scale_value;
use subxt::utils::H256;
use subxt::{OnlineClient, PolkadotConfig};
use tokio::sync::OnceCell;
use url::Url;

use crate::decode;
use crate::error::ChainError;

/// Chain name and runtime versions reported by the node.
#[derive(Debug, Clone)]
pub struct ChainInfo {
    pub chain: String,
    pub spec_version: u32,
    pub transaction_version: u32,
    pub genesis_hash: String,
}

impl std::fmt::Display for ChainInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}.{}", self.chain, self.spec_version, self.transaction_version)
    }
}

/// Handle over one RPC connection to a Creditcoin3 node.
#[derive(Clone)]
pub struct ChainClient {
    client: OnlineClient<PolkadotConfig>,
    rpc: LegacyRpcMethods<PolkadotConfig>,
    genesis: Arc<OnceCell<u64>>,
}

impl ChainClient {
    /// Open a new connection to the node at `url`.
    pub async fn connect(url: &Url) -> Result<Self, ChainError> {
        let rpc_client =
            RpcClient::from_url(url.as_str()).await.map_err(subxt::Error::from)?;
        let client = OnlineClient::<PolkadotConfig>::from_rpc_client(rpc_client.clone()).await?;
        let rpc = LegacyRpcMethods::<PolkadotConfig>::new(rpc_client);
        Ok(Self { client, rpc, genesis: Arc::new(OnceCell::new()) })
    }

    /// Chain name and runtime version, for startup diagnostics.
    pub async fn chain_info(&self) -> Result<ChainInfo, ChainError> {
        let chain = self.rpc.system_chain().await?;
        let runtime = self.client.runtime_version();
        Ok(ChainInfo {
            chain,
            spec_version: runtime.spec_version,
            transaction_version: runtime.transaction_version,
            genesis_hash: format!("{:?}", self.client.genesis_hash()),
        })
    }

    /// Number of the latest finalized block.
    pub async fn latest_finalized(&self) -> Result<u64, ChainError> {
        let head = self.rpc.chain_get_finalized_head().await?;
        let header = self
            .rpc
            .chain_get_header(Some(head))
            .await?
            .ok_or(ChainError::MissingHeader)?;
        Ok(header.number as u64)
    }

    /// Hex block hash for a block number.
    pub async fn block_hash(&self, number: u64) -> Result<String, ChainError> {
        let hash = self
            .rpc
            .chain_get_block_hash(Some(number.into()))
            .await?
            .ok_or(ChainError::BlockNotFound(number))?;
        Ok(format!("{hash:?}"))
    }

    /// Unix timestamp (seconds) of the block at `hash`, from `Timestamp.Now`.
    pub async fn block_timestamp(&self, hash: &str) -> Result<u64, ChainError> {
        let value = self
            .storage_value("Timestamp", "Now", vec![], hash)
            .await?
            .ok_or(ChainError::MissingStorage("Timestamp", "Now"))?;
        let millis = decode::as_u128(&value).ok_or(ChainError::Decode("Timestamp.Now"))?;
        Ok((millis / 1000) as u64)
    }

    /// Timestamp of block 1, memoized on the handle.
    pub async fn genesis_timestamp(&self) -> Result<u64, ChainError> {
        self.genesis
            .get_or_try_init(|| async {
                let hash = self.block_hash(1).await?;
                self.block_timestamp(&hash).await
            })
            .await
            .copied()
    }

    /// Fetch and decode a storage entry at a block hash. `Ok(None)` means the
    /// entry is absent at that block, which callers treat as expected state
    /// (older runtimes, unpaid eras), not as an error.
    pub async fn storage_value(
        &self,
        pallet: &'static str,
        entry: &'static str,
        keys: Vec<Value>,
        at: &str,
    ) -> Result<Option<scale_value::Value<u32>>, ChainError> {
        let hash = parse_block_hash(at)?;
        let address = subxt::dynamic::storage(pallet, entry, keys);
        let Some(thunk) = self.client.storage().at(hash).fetch(&address).await? else {
            return Ok(None);
        };
        Ok(Some(thunk.to_value()?))
    }

    /// All events emitted in the block at `hash`.
    pub async fn block_events(&self, at: &str) -> Result<Events<PolkadotConfig>, ChainError> {
        let hash = parse_block_hash(at)?;
        let block = self.client.blocks().at(hash).await?;
        Ok(block.events().await?)
    }
}

/// Parse a 0x-prefixed hex block hash.
pub fn parse_block_hash(hash: &str) -> Result<H256, ChainError> {
    let bytes = hex::decode(hash.trim_start_matches("0x"))
        .map_err(|_| ChainError::InvalidHash(hash.to_string()))?;
    let bytes: [u8; 32] =
        bytes.try_into().map_err(|_| ChainError::InvalidHash(hash.to_string()))?;
    Ok(H256::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefixed_and_bare_hashes() {
        let hex = "a3".repeat(32);
        let prefixed = format!("0x{hex}");
        let parsed = parse_block_hash(&prefixed).unwrap();
        assert_eq!(parse_block_hash(&hex).unwrap(), parsed);
        assert_eq!(format!("{parsed:?}"), prefixed);
    }

    #[test]
    fn rejects_bad_hashes() {
        assert!(parse_block_hash("0x1234").is_err());
        assert!(parse_block_hash("not-hex").is_err());
    }
}
