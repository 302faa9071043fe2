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

/// Errors from the chain access layer.
///
/// `Rpc` covers transient transport failures and is the retryable class;
/// the remaining variants describe malformed inputs or chain state that a
/// retry will not fix.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error(transparent)]
    Rpc(#[from] subxt::Error),

    #[error(transparent)]
    DecodeValue(#[from] subxt::error::DecodeError),

    #[error("block {0} not found")]
    BlockNotFound(u64),

    #[error("chain head header not available")]
    MissingHeader,

    #[error("storage item {0}.{1} not found")]
    MissingStorage(&'static str, &'static str),

    #[error("invalid block hash: {0}")]
    InvalidHash(String),

    #[error("failed to decode {0}")]
    Decode(&'static str),

    #[error("empty block search range")]
    EmptySearchRange,
}
