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

//! PNG charts for balance and reward history.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use plotters::prelude::*;

use crate::cache::RewardMap;
use crate::csv_output::HistoryMap;

const ORANGE: RGBColor = RGBColor(255, 140, 0);

/// Label the x axis with dates at up to eight tick positions.
macro_rules! date_mesh {
    ($chart:expr, $dates:expr) => {
        $chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels($dates.len().min(8))
            .x_label_formatter(&|index| $dates.get(*index).cloned().unwrap_or_default())
            .y_label_formatter(&|value| format!("{value:.1}"))
            .draw()?
    };
}

/// Render the combined chart (per-account balances, total balance and
/// daily rewards) plus one chart per account. Returns the written files.
pub fn plot_balances(
    output_file: &Path,
    dates: &[String],
    history: &HistoryMap,
    account_names: &[String],
    source_name: &str,
    rewards: Option<&RewardMap>,
) -> Result<Vec<PathBuf>> {
    if dates.is_empty() {
        return Ok(Vec::new());
    }
    if let Some(parent) = output_file.parent() {
        fs::create_dir_all(parent).context("creating output directory")?;
    }

    let mut written = Vec::new();

    let main_path = output_file.with_extension("png");
    draw_main_chart(&main_path, dates, history, account_names, source_name, rewards)?;
    written.push(main_path);

    let individual_dir = output_file.parent().unwrap_or(Path::new(".")).join("individual");
    fs::create_dir_all(&individual_dir).context("creating individual chart directory")?;
    for name in account_names {
        let path = individual_dir.join(format!("{name}.png"));
        draw_account_chart(&path, dates, history, name, rewards)?;
        written.push(path);
    }

    Ok(written)
}

fn series_for<'a>(
    dates: &'a [String],
    values: &'a HashMap<String, f64>,
) -> impl Iterator<Item = (usize, f64)> + 'a {
    dates
        .iter()
        .enumerate()
        .map(move |(index, date)| (index, values.get(date).copied().unwrap_or(0.0)))
}

fn totals_per_date(
    dates: &[String],
    per_account: &HashMap<String, HashMap<String, f64>>,
    account_names: &[String],
) -> HashMap<String, f64> {
    dates
        .iter()
        .map(|date| {
            let total: f64 = account_names
                .iter()
                .filter_map(|name| per_account.get(name).and_then(|dates| dates.get(date)))
                .sum();
            (date.clone(), total)
        })
        .collect()
}

fn y_ceiling(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(1.0f64, f64::max) * 1.05
}

fn draw_main_chart(
    path: &Path,
    dates: &[String],
    history: &HistoryMap,
    account_names: &[String],
    source_name: &str,
    rewards: Option<&RewardMap>,
) -> Result<()> {
    let root = BitMapBackend::new(path, (1400, 1000)).into_drawing_area();
    root.fill(&WHITE)?;
    let rows = if rewards.is_some() { 3 } else { 2 };
    let panels = root.split_evenly((rows, 1));

    let empty = HashMap::new();

    // Panel 1: one line per account.
    {
        let max_y = y_ceiling(account_names.iter().flat_map(|name| {
            series_for(dates, history.get(name).unwrap_or(&empty)).map(|(_, value)| value)
        }));
        let mut chart = ChartBuilder::on(&panels[0])
            .margin(10)
            .caption(format!("CTC balances - {source_name}"), ("sans-serif", 22))
            .x_label_area_size(30)
            .y_label_area_size(70)
            .build_cartesian_2d(0..dates.len(), 0f64..max_y)?;
        date_mesh!(chart, dates);

        for (index, name) in account_names.iter().enumerate() {
            let color = Palette99::pick(index);
            let points: Vec<(usize, f64)> =
                series_for(dates, history.get(name).unwrap_or(&empty)).collect();
            chart
                .draw_series(LineSeries::new(points, &color))?
                .label(name.clone())
                .legend(move |(x, y)| {
                    PathElement::new(vec![(x, y), (x + 18, y)], color.stroke_width(2))
                });
        }
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    // Panel 2: total balance over time.
    {
        let totals = totals_per_date(dates, history, account_names);
        let max_y = y_ceiling(totals.values().copied());
        let mut chart = ChartBuilder::on(&panels[1])
            .margin(10)
            .caption("Total balance", ("sans-serif", 22))
            .x_label_area_size(30)
            .y_label_area_size(70)
            .build_cartesian_2d(0..dates.len(), 0f64..max_y)?;
        date_mesh!(chart, dates);
        chart.draw_series(
            AreaSeries::new(series_for(dates, &totals), 0.0, BLUE.mix(0.2))
                .border_style(&BLUE),
        )?;
    }

    // Panel 3: daily rewards.
    if let Some(rewards) = rewards {
        let daily = totals_per_date(dates, rewards, account_names);
        let max_y = y_ceiling(daily.values().copied());
        let mut chart = ChartBuilder::on(&panels[2])
            .margin(10)
            .caption("Daily staking rewards", ("sans-serif", 22))
            .x_label_area_size(30)
            .y_label_area_size(70)
            .build_cartesian_2d(0..dates.len(), 0f64..max_y)?;
        date_mesh!(chart, dates);
        chart.draw_series(
            AreaSeries::new(series_for(dates, &daily), 0.0, ORANGE.mix(0.4))
                .border_style(&ORANGE),
        )?;
    }

    root.present().with_context(|| format!("writing chart {}", path.display()))?;
    Ok(())
}

fn draw_account_chart(
    path: &Path,
    dates: &[String],
    history: &HistoryMap,
    name: &str,
    rewards: Option<&RewardMap>,
) -> Result<()> {
    let root = BitMapBackend::new(path, (1200, 800)).into_drawing_area();
    root.fill(&WHITE)?;
    let rows = if rewards.is_some() { 2 } else { 1 };
    let panels = root.split_evenly((rows, 1));

    let empty = HashMap::new();
    let balances = history.get(name).unwrap_or(&empty);

    {
        let max_y = y_ceiling(series_for(dates, balances).map(|(_, value)| value));
        let mut chart = ChartBuilder::on(&panels[0])
            .margin(10)
            .caption(format!("CTC balance - {name}"), ("sans-serif", 22))
            .x_label_area_size(30)
            .y_label_area_size(70)
            .build_cartesian_2d(0..dates.len(), 0f64..max_y)?;
        date_mesh!(chart, dates);
        chart.draw_series(
            AreaSeries::new(series_for(dates, balances), 0.0, BLUE.mix(0.2))
                .border_style(&BLUE),
        )?;
    }

    if let Some(rewards) = rewards {
        let account_rewards = rewards.get(name).unwrap_or(&empty);
        let max_y = y_ceiling(series_for(dates, account_rewards).map(|(_, value)| value));
        let mut chart = ChartBuilder::on(&panels[1])
            .margin(10)
            .caption("Daily reward", ("sans-serif", 22))
            .x_label_area_size(30)
            .y_label_area_size(70)
            .build_cartesian_2d(0..dates.len(), 0f64..max_y)?;
        date_mesh!(chart, dates);
        chart.draw_series(
            AreaSeries::new(series_for(dates, account_rewards), 0.0, ORANGE.mix(0.4))
                .border_style(&ORANGE),
        )?;
    }

    root.present().with_context(|| format!("writing chart {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    #[ignore = "renders PNG text; requires system fonts"]
    fn renders_combined_and_individual_charts() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("demo_history.csv");

        let dates: Vec<String> = vec!["2024-09-01".into(), "2024-09-02".into()];
        let names: Vec<String> = vec!["alice".into()];
        let mut history = HistoryMap::new();
        history.entry("alice".into()).or_default().insert("2024-09-01".into(), 10.0);
        history.entry("alice".into()).or_default().insert("2024-09-02".into(), 12.0);
        let mut rewards = RewardMap::new();
        rewards.entry("alice".into()).or_default().insert("2024-09-02".into(), 2.0);

        let written =
            plot_balances(&output, &dates, &history, &names, "demo", Some(&rewards)).unwrap();
        assert_eq!(written.len(), 2);
        for path in written {
            assert!(fs::metadata(&path).map(|meta| meta.len() > 0).unwrap_or(false));
        }
    }

    #[test]
    fn empty_dates_write_nothing() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("demo.csv");
        let written = plot_balances(
            &output,
            &[],
            &HistoryMap::new(),
            &["alice".to_string()],
            "demo",
            None,
        )
        .unwrap();
        assert!(written.is_empty());
    }
}
