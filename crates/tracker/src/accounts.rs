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

//! Tracked account set loaded from an accounts file.
//!
//! Two line formats are accepted, `Name = Address` and `Name Address`;
//! `#` comments and blank lines are skipped. Addresses are SS58-validated
//! at load and name↔address must be a bijection.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use subxt::utils::AccountId32;

use ctc_chain::AccountLookup;

/// One tracked account: display name, SS58 address and raw account id.
#[derive(Debug, Clone)]
pub struct TrackedAccount {
    pub name: String,
    pub address: String,
    pub account_id: AccountId32,
}

/// The validated tracked set.
#[derive(Debug, Clone)]
pub struct TrackedAccounts {
    accounts: Vec<TrackedAccount>,
}

impl TrackedAccounts {
    /// Load and validate an accounts file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("accounts file not found: {}", path.display()))?;

        let mut entries = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, address) = if let Some((name, address)) = line.split_once('=') {
                (name.trim(), address.trim())
            } else {
                let mut parts = line.split_whitespace();
                match (parts.next(), parts.next()) {
                    (Some(name), Some(address)) => (name, address),
                    _ => continue,
                }
            };
            entries.push((name.to_string(), address.to_string()));
        }
        Self::from_entries(entries)
    }

    /// A single-wallet set.
    pub fn single(name: &str, address: &str) -> Result<Self> {
        Self::from_entries(vec![(name.to_string(), address.to_string())])
    }

    fn from_entries(entries: Vec<(String, String)>) -> Result<Self> {
        if entries.is_empty() {
            bail!("no accounts to track");
        }

        let mut seen_names = HashSet::new();
        let mut seen_addresses = HashSet::new();
        let mut accounts = Vec::with_capacity(entries.len());
        for (name, address) in entries {
            if !seen_names.insert(name.clone()) {
                bail!("duplicate account name: {name}");
            }
            if !seen_addresses.insert(address.clone()) {
                bail!("duplicate account address: {address}");
            }
            let account_id = AccountId32::from_str(&address)
                .map_err(|err| anyhow::anyhow!("invalid SS58 address '{address}': {err}"))?;
            accounts.push(TrackedAccount { name, address, account_id });
        }
        Ok(Self { accounts })
    }

    /// Account names in sorted order, the order used for CSV columns.
    pub fn names_sorted(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.accounts.iter().map(|account| account.name.clone()).collect();
        names.sort();
        names
    }

    /// Raw account id to name, the lookup the reward paths match against.
    pub fn lookup(&self) -> AccountLookup {
        self.accounts
            .iter()
            .map(|account| (account.account_id.0, account.name.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedAccount> {
        self.accounts.iter()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // Well-known Substrate dev addresses.
    const ALICE: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";
    const BOB: &str = "5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty";

    fn write_accounts(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_both_line_formats_and_comments() {
        let file = write_accounts(&format!(
            "# tracked wallets\n\nalice = {ALICE}\nbob {BOB}\n"
        ));
        let accounts = TrackedAccounts::from_file(file.path()).unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts.names_sorted(), vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn lookup_maps_raw_ids_to_names() {
        let accounts = TrackedAccounts::single("alice", ALICE).unwrap();
        let lookup = accounts.lookup();
        let id = AccountId32::from_str(ALICE).unwrap();
        assert_eq!(lookup.get(&id.0), Some(&"alice".to_string()));
    }

    #[test]
    fn rejects_duplicate_names_and_addresses() {
        let file = write_accounts(&format!("alice = {ALICE}\nalice = {BOB}\n"));
        assert!(TrackedAccounts::from_file(file.path()).is_err());

        let file = write_accounts(&format!("alice = {ALICE}\nalice2 = {ALICE}\n"));
        assert!(TrackedAccounts::from_file(file.path()).is_err());
    }

    #[test]
    fn rejects_invalid_addresses_and_empty_sets() {
        assert!(TrackedAccounts::single("alice", "not-an-address").is_err());
        let file = write_accounts("# nothing here\n");
        assert!(TrackedAccounts::from_file(file.path()).is_err());
    }
}
