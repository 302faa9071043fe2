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

//! CSV output: one combined history file plus one file per account.
//!
//! The combined file doubles as the balance cache: existing rows are
//! loaded before a run so already-fetched dates are skipped, and new rows
//! merge into them. Daily diffs and the trailing 10-day averages are
//! recomputed on every save.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::cache::RewardMap;

/// Name to date (ISO) to free balance, mirroring the combined CSV.
pub type HistoryMap = HashMap<String, HashMap<String, f64>>;

const AVERAGE_WINDOW: usize = 10;

/// One combined-CSV row.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub date: String,
    pub balances: HashMap<String, f64>,
    pub total: f64,
    pub diff: f64,
    pub diff_avg10: f64,
    pub rewards: HashMap<String, f64>,
    pub total_reward: f64,
    pub reward_avg10: f64,
    pub total_reward_cumulative: f64,
}

fn trailing_average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let window = values.len().min(AVERAGE_WINDOW);
    values.iter().rev().take(window).sum::<f64>() / window as f64
}

/// Assemble rows for `dates` (sorted ascending) from the balance history
/// and reward maps, computing totals, diffs and running averages.
pub fn build_entries(
    dates: &[String],
    account_names: &[String],
    history: &HistoryMap,
    rewards: &RewardMap,
) -> Vec<HistoryEntry> {
    let mut entries = Vec::with_capacity(dates.len());
    let mut reward_series = Vec::with_capacity(dates.len());
    let mut reward_cumulative = 0.0;

    for date in dates {
        let mut balances = HashMap::new();
        let mut day_rewards = HashMap::new();
        let mut total = 0.0;
        let mut total_reward = 0.0;

        for name in account_names {
            let balance =
                history.get(name).and_then(|dates| dates.get(date)).copied().unwrap_or(0.0);
            balances.insert(name.clone(), balance);
            total += balance;

            let reward =
                rewards.get(name).and_then(|dates| dates.get(date)).copied().unwrap_or(0.0);
            day_rewards.insert(name.clone(), reward);
            total_reward += reward;
        }

        reward_cumulative += total_reward;
        reward_series.push(total_reward);

        entries.push(HistoryEntry {
            date: date.clone(),
            balances,
            total,
            diff: 0.0,
            diff_avg10: 0.0,
            rewards: day_rewards,
            total_reward,
            reward_avg10: trailing_average(&reward_series),
            total_reward_cumulative: reward_cumulative,
        });
    }

    calculate_diffs(&mut entries);
    entries
}

/// Fill in day-over-day total diffs and their trailing 10-day average.
pub fn calculate_diffs(entries: &mut [HistoryEntry]) {
    let mut diffs = Vec::with_capacity(entries.len());
    let mut previous_total: Option<f64> = None;

    for entry in entries.iter_mut() {
        entry.diff = match previous_total {
            Some(previous) => entry.total - previous,
            None => 0.0,
        };
        diffs.push(entry.diff);
        entry.diff_avg10 = trailing_average(&diffs);
        previous_total = Some(entry.total);
    }
}

/// Write the combined CSV with all accounts.
pub fn save_combined_csv(
    output_file: impl AsRef<Path>,
    account_names: &[String],
    entries: &[HistoryEntry],
    include_rewards: bool,
) -> Result<()> {
    let path = output_file.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("creating output directory")?;
    }
    let mut file = File::create(path)
        .with_context(|| format!("creating CSV file {}", path.display()))?;

    let mut header: Vec<String> = vec!["date".into()];
    header.extend(account_names.iter().cloned());
    header.extend(["total".into(), "diff".into(), "diff_avg10".into()]);
    if include_rewards {
        header.extend(account_names.iter().map(|name| format!("{name}_reward")));
        header.extend([
            "total_reward".into(),
            "reward_avg10".into(),
            "total_reward_cumulative".into(),
        ]);
    }
    writeln!(file, "{}", header.join(","))?;

    for entry in entries {
        let mut row = vec![entry.date.clone()];
        for name in account_names {
            row.push(format!("{:.1}", entry.balances.get(name).unwrap_or(&0.0)));
        }
        row.push(format!("{:.1}", entry.total));
        row.push(format!("{:.1}", entry.diff));
        row.push(format!("{:.1}", entry.diff_avg10));
        if include_rewards {
            for name in account_names {
                row.push(format!("{:.4}", entry.rewards.get(name).unwrap_or(&0.0)));
            }
            row.push(format!("{:.4}", entry.total_reward));
            row.push(format!("{:.4}", entry.reward_avg10));
            row.push(format!("{:.4}", entry.total_reward_cumulative));
        }
        writeln!(file, "{}", row.join(","))?;
    }

    Ok(())
}

/// Write one CSV per account under `output_dir`.
pub fn save_individual_csvs(
    output_dir: impl AsRef<Path>,
    account_names: &[String],
    history: &HistoryMap,
    sorted_dates: &[String],
    rewards: Option<&RewardMap>,
) -> Result<()> {
    let dir = output_dir.as_ref();
    fs::create_dir_all(dir).context("creating individual output directory")?;

    for name in account_names {
        let path = dir.join(format!("{name}.csv"));
        let mut file =
            File::create(&path).with_context(|| format!("creating {}", path.display()))?;

        if rewards.is_some() {
            writeln!(file, "date,balance,diff,diff_avg10,reward,reward_avg10,reward_cumulative")?;
        } else {
            writeln!(file, "date,balance,diff,diff_avg10")?;
        }

        let account_history = history.get(name);
        let account_rewards = rewards.and_then(|rewards| rewards.get(name));

        let mut previous: Option<f64> = None;
        let mut diffs = Vec::new();
        let mut reward_series = Vec::new();
        let mut reward_cumulative = 0.0;

        for date in sorted_dates {
            let balance =
                account_history.and_then(|dates| dates.get(date)).copied().unwrap_or(0.0);
            let diff = previous.map(|previous| balance - previous).unwrap_or(0.0);
            diffs.push(diff);
            let diff_avg10 = trailing_average(&diffs);

            if rewards.is_some() {
                let reward =
                    account_rewards.and_then(|dates| dates.get(date)).copied().unwrap_or(0.0);
                reward_cumulative += reward;
                reward_series.push(reward);
                writeln!(
                    file,
                    "{},{:.1},{:.1},{:.1},{:.4},{:.4},{:.4}",
                    date,
                    balance,
                    diff,
                    diff_avg10,
                    reward,
                    trailing_average(&reward_series),
                    reward_cumulative
                )?;
            } else {
                writeln!(file, "{},{:.1},{:.1},{:.1}", date, balance, diff, diff_avg10)?;
            }
            previous = Some(balance);
        }
    }

    Ok(())
}

/// Load balances from an existing combined CSV so already-fetched dates
/// survive reruns. Summary and reward columns are not balances and are
/// skipped.
pub fn load_existing_csv(csv_file: impl AsRef<Path>) -> Result<HistoryMap> {
    let path = csv_file.as_ref();
    if !path.exists() {
        return Ok(HistoryMap::new());
    }

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening CSV {}", path.display()))?;
    let headers: Vec<String> =
        reader.headers().context("reading CSV header")?.iter().map(String::from).collect();

    let mut history = HistoryMap::new();
    for record in reader.records() {
        let record = record?;
        let Some(date) = record.get(0).filter(|date| !date.is_empty()) else { continue };

        for (index, header) in headers.iter().enumerate().skip(1) {
            if matches!(header.as_str(), "total" | "diff" | "diff_avg10")
                || matches!(
                    header.as_str(),
                    "total_reward" | "reward_avg10" | "total_reward_cumulative"
                )
                || header.ends_with("_reward")
            {
                continue;
            }
            if let Some(value) = record.get(index).and_then(|value| value.parse::<f64>().ok()) {
                history
                    .entry(header.clone())
                    .or_default()
                    .insert(date.to_string(), value);
            }
        }
    }

    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_history() -> (Vec<String>, Vec<String>, HistoryMap, RewardMap) {
        let dates: Vec<String> =
            vec!["2024-09-01".into(), "2024-09-02".into(), "2024-09-03".into()];
        let names: Vec<String> = vec!["alice".into(), "bob".into()];

        let mut history = HistoryMap::new();
        for (i, date) in dates.iter().enumerate() {
            history.entry("alice".into()).or_default().insert(date.clone(), 100.0 + i as f64);
            history.entry("bob".into()).or_default().insert(date.clone(), 50.0);
        }
        let mut rewards = RewardMap::new();
        rewards.entry("alice".into()).or_default().insert("2024-09-02".into(), 2.5);

        (dates, names, history, rewards)
    }

    #[test]
    fn entries_carry_totals_diffs_and_cumulative_rewards() {
        let (dates, names, history, rewards) = sample_history();
        let entries = build_entries(&dates, &names, &history, &rewards);

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].total, 150.0);
        assert_eq!(entries[0].diff, 0.0);
        assert_eq!(entries[1].diff, 1.0);
        assert_eq!(entries[1].total_reward, 2.5);
        assert_eq!(entries[2].total_reward_cumulative, 2.5);
    }

    #[test]
    fn trailing_average_windows_at_ten() {
        let values: Vec<f64> = (1..=20).map(|v| v as f64).collect();
        // Last ten of 1..=20 are 11..=20, averaging 15.5.
        assert_eq!(trailing_average(&values), 15.5);
        assert_eq!(trailing_average(&values[..4]), 2.5);
        assert_eq!(trailing_average(&[]), 0.0);
    }

    #[test]
    fn combined_csv_round_trips_balances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.csv");
        let (dates, names, history, rewards) = sample_history();
        let entries = build_entries(&dates, &names, &history, &rewards);

        save_combined_csv(&path, &names, &entries, true).unwrap();
        let loaded = load_existing_csv(&path).unwrap();

        assert_eq!(loaded["alice"]["2024-09-01"], 100.0);
        assert_eq!(loaded["alice"]["2024-09-03"], 102.0);
        assert_eq!(loaded["bob"]["2024-09-02"], 50.0);
        // Reward and summary columns must not come back as accounts.
        assert!(!loaded.contains_key("total"));
        assert!(!loaded.contains_key("alice_reward"));
        assert!(!loaded.contains_key("total_reward_cumulative"));
    }

    #[test]
    fn individual_csvs_are_written_per_account() {
        let dir = tempdir().unwrap();
        let (dates, names, history, rewards) = sample_history();

        save_individual_csvs(dir.path(), &names, &history, &dates, Some(&rewards)).unwrap();

        let alice = fs::read_to_string(dir.path().join("alice.csv")).unwrap();
        let mut lines = alice.lines();
        assert_eq!(
            lines.next().unwrap(),
            "date,balance,diff,diff_avg10,reward,reward_avg10,reward_cumulative"
        );
        assert_eq!(alice.lines().count(), 4);
        assert!(alice.contains("2024-09-02,101.0,1.0"));
        assert!(fs::metadata(dir.path().join("bob.csv")).is_ok());
    }

    #[test]
    fn missing_csv_loads_empty() {
        let dir = tempdir().unwrap();
        let loaded = load_existing_csv(dir.path().join("absent.csv")).unwrap();
        assert!(loaded.is_empty());
    }
}
