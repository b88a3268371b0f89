use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::Connection;

use crate::db::{self, MatchResult};
use crate::schema_evolve::{StatScope, stat_columns};

/// Trailing window length for rolling statistic averages.
pub const ROLLING_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Home,
    Away,
}

/// One finished match with its per-side sparse statistics, the feature
/// engine's input. Stat maps are keyed by the unprefixed metric name.
#[derive(Debug, Clone)]
pub struct MatchRecord {
    pub match_id: i64,
    pub season: i64,
    pub date: NaiveDate,
    pub home_team: String,
    pub away_team: String,
    pub result: MatchResult,
    pub home_stats: BTreeMap<String, Option<f64>>,
    pub away_stats: BTreeMap<String, Option<f64>>,
}

/// Pre-match streak values for one match: the home side's
/// home-appearance streak and the away side's away-appearance streak.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreakPair {
    pub home: i64,
    pub away: i64,
}

#[derive(Debug, Clone, Default)]
pub struct RollingFeatures {
    pub home: BTreeMap<String, f64>,
    pub away: BTreeMap<String, f64>,
}

/// Load every finished match joined with its statistics row, ordered for
/// feature computation. Matches without a statistics row carry empty maps.
pub fn load_match_records(conn: &Connection) -> Result<Vec<MatchRecord>> {
    let stats = load_stats_by_match(conn)?;
    let mut records = Vec::new();
    for m in db::load_matches(conn)? {
        let Some(result) = m.outcome() else {
            continue;
        };
        let Some(date) = m.date() else {
            continue;
        };
        let (home_stats, away_stats) = stats.get(&m.match_id).cloned().unwrap_or_default();
        records.push(MatchRecord {
            match_id: m.match_id,
            season: m.season,
            date,
            home_team: m.home_team,
            away_team: m.away_team,
            result,
            home_stats,
            away_stats,
        });
    }
    sort_chronologically(&mut records);
    Ok(records)
}

type SideStats = (BTreeMap<String, Option<f64>>, BTreeMap<String, Option<f64>>);

fn load_stats_by_match(conn: &Connection) -> Result<HashMap<i64, SideStats>> {
    let columns = stat_columns(conn, StatScope::MatchStatistics)?;
    if columns.is_empty() {
        return Ok(HashMap::new());
    }
    let quoted = columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT match_id, {quoted} FROM match_statistics");
    let mut stmt = conn.prepare(&sql).context("prepare statistics query")?;
    let mut rows = stmt.query([]).context("query statistics")?;

    let mut out = HashMap::new();
    while let Some(row) = rows.next().context("step statistics rows")? {
        let match_id: i64 = row.get(0).context("decode match id")?;
        let mut home = BTreeMap::new();
        let mut away = BTreeMap::new();
        for (idx, column) in columns.iter().enumerate() {
            let value: Option<f64> = row.get(idx + 1).context("decode stat value")?;
            if let Some(metric) = column.strip_prefix("home_") {
                home.insert(metric.to_string(), value);
            } else if let Some(metric) = column.strip_prefix("away_") {
                away.insert(metric.to_string(), value);
            }
        }
        out.insert(match_id, (home, away));
    }
    Ok(out)
}

pub fn sort_chronologically(records: &mut [MatchRecord]) {
    records.sort_by(|a, b| a.date.cmp(&b.date).then(a.match_id.cmp(&b.match_id)));
}

/// Pre-match winning streaks, processed in ascending date order.
///
/// Each team carries two independent counters: one over its home
/// appearances, one over its away appearances (an away win does not credit
/// the home counter — pure home-form and away-form signals). For every
/// match the counter value *before* the update is recorded; recording
/// before updating is what keeps the feature free of the match's own
/// outcome. Counters reset to zero when the team's season changes between
/// appearances, and a first appearance starts at zero.
pub fn compute_streaks(records: &[MatchRecord]) -> HashMap<i64, StreakPair> {
    let mut ordered: Vec<&MatchRecord> = records.iter().collect();
    ordered.sort_by(|a, b| a.date.cmp(&b.date).then(a.match_id.cmp(&b.match_id)));

    let mut home_streaks: HashMap<&str, i64> = HashMap::new();
    let mut away_streaks: HashMap<&str, i64> = HashMap::new();
    let mut home_seasons: HashMap<&str, i64> = HashMap::new();
    let mut away_seasons: HashMap<&str, i64> = HashMap::new();
    let mut out = HashMap::with_capacity(ordered.len());

    for record in ordered {
        let home = record.home_team.as_str();
        let away = record.away_team.as_str();

        // Season boundary: reset before recording.
        if home_seasons.insert(home, record.season).is_some_and(|s| s != record.season) {
            home_streaks.insert(home, 0);
        }
        if away_seasons.insert(away, record.season).is_some_and(|s| s != record.season) {
            away_streaks.insert(away, 0);
        }

        out.insert(
            record.match_id,
            StreakPair {
                home: *home_streaks.entry(home).or_insert(0),
                away: *away_streaks.entry(away).or_insert(0),
            },
        );

        match record.result {
            MatchResult::Home => {
                *home_streaks.entry(home).or_insert(0) += 1;
                away_streaks.insert(away, 0);
            }
            MatchResult::Away => {
                *away_streaks.entry(away).or_insert(0) += 1;
                home_streaks.insert(home, 0);
            }
            MatchResult::Draw => {
                home_streaks.insert(home, 0);
                away_streaks.insert(away, 0);
            }
        }
    }
    out
}

/// Closed-left rolling averages over each team's unified chronological
/// sequence.
///
/// A team's home and away appearances interleave into one sequence before
/// averaging; computing home-only and away-only windows would halve the
/// effective history. For each appearance, the feature is the mean of the
/// metric over the preceding `window` appearances, excluding the current
/// one. NULL samples are excluded from the mean rather than counted as
/// zero; with fewer than `window` priors the available ones are averaged;
/// with zero usable priors the feature is absent.
pub fn compute_rolling_averages(
    records: &[MatchRecord],
    window: usize,
) -> HashMap<i64, RollingFeatures> {
    let mut ordered: Vec<&MatchRecord> = records.iter().collect();
    ordered.sort_by(|a, b| a.date.cmp(&b.date).then(a.match_id.cmp(&b.match_id)));

    // Team-centric long form: (match_id, side, stats) per appearance.
    let mut sequences: HashMap<&str, Vec<(i64, Side, &BTreeMap<String, Option<f64>>)>> =
        HashMap::new();
    for record in &ordered {
        sequences
            .entry(record.home_team.as_str())
            .or_default()
            .push((record.match_id, Side::Home, &record.home_stats));
        sequences
            .entry(record.away_team.as_str())
            .or_default()
            .push((record.match_id, Side::Away, &record.away_stats));
    }

    let mut out: HashMap<i64, RollingFeatures> = HashMap::new();
    for appearances in sequences.values() {
        for (idx, (match_id, side, _)) in appearances.iter().enumerate() {
            let start = idx.saturating_sub(window);
            let prior = &appearances[start..idx];
            if prior.is_empty() {
                continue;
            }

            let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
            for (_, _, stats) in prior {
                for (metric, value) in stats.iter() {
                    if let Some(v) = value {
                        let entry = sums.entry(metric.as_str()).or_insert((0.0, 0));
                        entry.0 += v;
                        entry.1 += 1;
                    }
                }
            }
            if sums.is_empty() {
                continue;
            }

            let averages: BTreeMap<String, f64> = sums
                .into_iter()
                .map(|(metric, (sum, n))| (metric.to_string(), sum / n as f64))
                .collect();
            let features = out.entry(*match_id).or_default();
            match side {
                Side::Home => features.home = averages,
                Side::Away => features.away = averages,
            }
        }
    }
    out
}
