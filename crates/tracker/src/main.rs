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

//! Daily balance and staking reward tracker for Creditcoin3 accounts.

mod accounts;
mod cache;
mod csv_output;
#[cfg(feature = "charts")]
mod plot;
mod scheduler;
mod service;

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{Days, NaiveDate, Utc};
use clap::Parser;
use url::Url;

use ctc_chain::{ChainClient, GENESIS_DATE};

use crate::accounts::TrackedAccounts;
use crate::cache::{BlockCache, RewardCache};
use crate::csv_output::{build_entries, load_existing_csv, save_combined_csv, save_individual_csvs};
use crate::service::{date_key, ServiceConfig, TrackerService};

/// Track Creditcoin3 wallet balances and staking rewards day by day.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Accounts file with one `Name = Address` entry per line
    #[clap(short, long)]
    file: Option<PathBuf>,

    /// Single wallet address to track
    #[clap(short, long, conflicts_with = "file")]
    address: Option<String>,

    /// Name for the single wallet
    #[clap(short, long, default_value = "wallet")]
    name: String,

    /// Start date (YYYY-MM-DD), defaults to the chain genesis date
    #[clap(long)]
    start: Option<NaiveDate>,

    /// End date (YYYY-MM-DD), defaults to today
    #[clap(long)]
    end: Option<NaiveDate>,

    /// Output CSV file
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Render PNG charts next to the CSV output
    #[clap(short, long)]
    graph: bool,

    /// Skip staking reward fetching
    #[clap(long)]
    no_rewards: bool,

    /// Ignore the block and reward caches
    #[clap(long)]
    no_cache: bool,

    /// Re-fetch dates where every tracked balance is zero
    #[clap(long)]
    refetch_zero: bool,

    /// RPC endpoint of the Creditcoin3 node
    #[clap(long, env = "CTC_RPC_URL", default_value = ctc_chain::NODE_URL)]
    rpc_url: Url,

    /// Directory for caches and default output files
    #[clap(long, default_value = "output")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    run(args).await
}

async fn run(args: Args) -> Result<()> {
    let (accounts, source_name) = if let Some(file) = &args.file {
        let accounts = TrackedAccounts::from_file(file)?;
        let source =
            file.file_stem().and_then(OsStr::to_str).unwrap_or("accounts").to_string();
        (accounts, source)
    } else if let Some(address) = &args.address {
        (TrackedAccounts::single(&args.name, address)?, args.name.clone())
    } else {
        bail!("either --file or --address must be given");
    };
    tracing::info!("[1/6] tracking {} accounts ({source_name})", accounts.len());

    // An unreachable endpoint is the one fatal condition; probe before any
    // parallel work is scheduled.
    let probe = ChainClient::connect(&args.rpc_url)
        .await
        .context("chain endpoint unreachable")?;
    let info = probe.chain_info().await?;
    tracing::info!("[2/6] connected to {} ({info})", args.rpc_url);

    let genesis = NaiveDate::parse_from_str(GENESIS_DATE, "%Y-%m-%d")?;
    let start = args.start.unwrap_or(genesis);
    let end = args.end.unwrap_or_else(|| Utc::now().date_naive());
    if end < start {
        bail!("end date {end} precedes start date {start}");
    }
    let mut dates = Vec::new();
    let mut current = start;
    while current <= end {
        dates.push(current);
        current = current.checked_add_days(Days::new(1)).context("date out of range")?;
    }
    tracing::info!("[3/6] date range {start} - {end} ({} days)", dates.len());

    let mut config = ServiceConfig::new(args.rpc_url.clone());
    config.fetch_rewards = !args.no_rewards;
    config.refetch_zero = args.refetch_zero;
    let service = TrackerService::new(config);

    let mut block_cache =
        BlockCache::open(args.output_dir.join("block_cache.json"), args.no_cache);
    service.resolve_blocks(&dates, &mut block_cache).await?;

    let output_file = args
        .output
        .clone()
        .unwrap_or_else(|| args.output_dir.join(format!("{source_name}_history.csv")));
    let mut history = load_existing_csv(&output_file)?;
    let mut reward_cache =
        RewardCache::open(args.output_dir.join("reward_cache.json"), args.no_cache);

    tracing::info!("[4/6] fetching balances and rewards");
    service
        .fetch_history(&dates, &block_cache, &accounts, &mut history, &mut reward_cache)
        .await?;

    tracing::info!("[5/6] writing CSV output");
    let account_names = accounts.names_sorted();
    let mut seen_dates: HashSet<String> = dates.iter().map(date_key).collect();
    for per_account in history.values() {
        seen_dates.extend(per_account.keys().cloned());
    }
    let mut all_dates: Vec<String> = seen_dates.into_iter().collect();
    all_dates.sort();

    let entries = build_entries(&all_dates, &account_names, &history, reward_cache.entries());
    save_combined_csv(&output_file, &account_names, &entries, !args.no_rewards)?;
    let individual_dir =
        output_file.parent().unwrap_or(Path::new(".")).join("individual");
    save_individual_csvs(
        &individual_dir,
        &account_names,
        &history,
        &all_dates,
        (!args.no_rewards).then(|| reward_cache.entries()),
    )?;
    tracing::info!("combined CSV: {}", output_file.display());

    if args.graph {
        #[cfg(feature = "charts")]
        {
            tracing::info!("[6/6] rendering charts");
            let written = plot::plot_balances(
                &output_file,
                &all_dates,
                &history,
                &account_names,
                &source_name,
                (!args.no_rewards).then(|| reward_cache.entries()),
            )?;
            tracing::info!("{} charts written", written.len());
        }
        #[cfg(not(feature = "charts"))]
        tracing::warn!("built without the charts feature, skipping --graph");
    }

    if let Some(latest) = entries.last() {
        tracing::info!("latest ({}): {:.1} CTC", latest.date, latest.total);
    }
    Ok(())
}
