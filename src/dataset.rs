use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::Connection;

use crate::db::{self, MatchResult};
use crate::features::{self, ROLLING_WINDOW};

/// Which side the market prices shorter. Draws are never the favorite;
/// only the two team odds are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Favoritism {
    Home,
    Away,
}

impl Favoritism {
    pub fn as_str(&self) -> &'static str {
        match self {
            Favoritism::Home => "home",
            Favoritism::Away => "away",
        }
    }

    fn as_result(&self) -> MatchResult {
        match self {
            Favoritism::Home => MatchResult::Home,
            Favoritism::Away => MatchResult::Away,
        }
    }
}

/// One row of the outbound feature table: identity, market odds, derived
/// labels and the temporal features for both sides.
#[derive(Debug, Clone)]
pub struct DatasetRow {
    pub match_id: i64,
    pub competition: String,
    pub season: i64,
    pub match_date: String,
    pub home_team: String,
    pub away_team: String,
    pub home_odds: f64,
    pub draw_odds: f64,
    pub away_odds: f64,
    pub favorite: Favoritism,
    pub underdog: Favoritism,
    pub result: MatchResult,
    pub goal_difference: i64,
    pub home_streak: i64,
    pub away_streak: i64,
    /// `home_avg_*` / `away_avg_*` rolling features, sparse.
    pub rolling: BTreeMap<String, f64>,
}

/// The side with the lower decimal odds. Equal odds side with the away
/// team, mirroring a strict less-than comparison on the home side.
pub fn favorite_of(home_odds: f64, away_odds: f64) -> Favoritism {
    if home_odds < away_odds {
        Favoritism::Home
    } else {
        Favoritism::Away
    }
}

pub fn underdog_of(home_odds: f64, away_odds: f64) -> Favoritism {
    if home_odds > away_odds {
        Favoritism::Home
    } else {
        Favoritism::Away
    }
}

/// Join finished matches with their resolved odds and temporal features.
/// Rows missing any of the three market odds are dropped; a model can't
/// be scored against a market that never priced the outcome. Matches whose
/// statistics were never ingested are dropped the same way; the statistics
/// join is inner, not left.
pub fn assemble(conn: &Connection) -> Result<Vec<DatasetRow>> {
    let records = features::load_match_records(conn)?;
    let streaks = features::compute_streaks(&records);
    let rolling = features::compute_rolling_averages(&records, ROLLING_WINDOW);

    let mut odds_by_match: HashMap<i64, (f64, f64, f64)> = HashMap::new();
    for row in db::load_resolved_odds(conn)? {
        let (Some(match_id), Some(home), Some(draw), Some(away)) =
            (row.match_id, row.home_odds, row.draw_odds, row.away_odds)
        else {
            continue;
        };
        odds_by_match.entry(match_id).or_insert((home, draw, away));
    }

    let mut matches_by_id: HashMap<i64, db::StoredMatch> = HashMap::new();
    for m in db::load_matches(conn)? {
        matches_by_id.insert(m.match_id, m);
    }

    let mut rows = Vec::new();
    for record in &records {
        if record.home_stats.is_empty() && record.away_stats.is_empty() {
            continue;
        }
        let Some(&(home_odds, draw_odds, away_odds)) = odds_by_match.get(&record.match_id) else {
            continue;
        };
        let Some(stored) = matches_by_id.get(&record.match_id) else {
            continue;
        };
        let (Some(home_goals), Some(away_goals)) = (stored.home_goals, stored.away_goals) else {
            continue;
        };

        let streak = streaks.get(&record.match_id).copied().unwrap_or_default();
        let mut row_features = BTreeMap::new();
        if let Some(f) = rolling.get(&record.match_id) {
            for (metric, value) in &f.home {
                row_features.insert(format!("home_avg_{metric}"), *value);
            }
            for (metric, value) in &f.away {
                row_features.insert(format!("away_avg_{metric}"), *value);
            }
        }

        rows.push(DatasetRow {
            match_id: record.match_id,
            competition: stored.competition.clone(),
            season: record.season,
            match_date: db::format_match_date(record.date),
            home_team: record.home_team.clone(),
            away_team: record.away_team.clone(),
            home_odds,
            draw_odds,
            away_odds,
            favorite: favorite_of(home_odds, away_odds),
            underdog: underdog_of(home_odds, away_odds),
            result: record.result,
            goal_difference: home_goals - away_goals,
            home_streak: streak.home,
            away_streak: streak.away,
            rolling: row_features,
        });
    }
    Ok(rows)
}

/// Write the feature table. Fixed identity/odds/label columns first, then
/// every rolling-feature column seen anywhere in the set, sorted, so the
/// header is deterministic across runs. Absent features are empty cells.
pub fn write_csv(rows: &[DatasetRow], path: &Path) -> Result<()> {
    let mut feature_columns: BTreeSet<&str> = BTreeSet::new();
    for row in rows {
        for column in row.rolling.keys() {
            feature_columns.insert(column);
        }
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("create csv at {}", path.display()))?;

    let mut header = vec![
        "match_id",
        "competition",
        "season",
        "match_date",
        "home_team",
        "away_team",
        "home_odds",
        "draw_odds",
        "away_odds",
        "favorite",
        "underdog",
        "result",
        "goal_difference",
        "home_streak",
        "away_streak",
    ];
    header.extend(feature_columns.iter().copied());
    writer.write_record(&header).context("write csv header")?;

    for row in rows {
        let mut record = vec![
            row.match_id.to_string(),
            row.competition.clone(),
            row.season.to_string(),
            row.match_date.clone(),
            row.home_team.clone(),
            row.away_team.clone(),
            row.home_odds.to_string(),
            row.draw_odds.to_string(),
            row.away_odds.to_string(),
            row.favorite.as_str().to_string(),
            row.underdog.as_str().to_string(),
            row.result.as_str().to_string(),
            row.goal_difference.to_string(),
            row.home_streak.to_string(),
            row.away_streak.to_string(),
        ];
        for column in &feature_columns {
            record.push(
                row.rolling
                    .get(*column)
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            );
        }
        writer.write_record(&record).context("write csv row")?;
    }
    writer.flush().context("flush csv")?;
    Ok(())
}

/// Predicted outcome distribution for one match, in market order.
#[derive(Debug, Clone, Copy)]
pub struct OutcomeProbabilities {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

impl OutcomeProbabilities {
    fn best(&self) -> (MatchResult, f64) {
        let mut best = (MatchResult::Home, self.home);
        if self.draw > best.1 {
            best = (MatchResult::Draw, self.draw);
        }
        if self.away > best.1 {
            best = (MatchResult::Away, self.away);
        }
        best
    }
}

/// Flat-stake simulation of betting against the market with a model's
/// predicted probabilities. A bet is placed only when the model's most
/// likely outcome is *more* likely than the market's implied probability
/// for it (1/odds). Betting every row would just pay the bookmaker's
/// margin; the policy is to stake only on positive expected value.
pub fn simulate_bets(
    rows: &[DatasetRow],
    predictions: &[OutcomeProbabilities],
    stake: f64,
) -> Result<f64> {
    if rows.len() != predictions.len() {
        bail!(
            "prediction count {} does not match row count {}",
            predictions.len(),
            rows.len()
        );
    }

    let mut profit = 0.0;
    for (row, probs) in rows.iter().zip(predictions) {
        let (best_outcome, model_prob) = probs.best();
        let odds = match best_outcome {
            MatchResult::Home => row.home_odds,
            MatchResult::Draw => row.draw_odds,
            MatchResult::Away => row.away_odds,
        };
        if model_prob <= 1.0 / odds {
            continue;
        }
        if best_outcome == row.result {
            profit += stake * odds - stake;
        } else {
            profit -= stake;
        }
    }
    Ok(profit)
}

/// Naive always-bet baselines the simulator is judged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BetTarget {
    Favorite,
    Underdog,
    Draw,
}

/// Profit/loss of flat-staking one target on every row.
pub fn flat_margin(rows: &[DatasetRow], target: BetTarget, stake: f64) -> f64 {
    let mut profit = 0.0;
    for row in rows {
        let (picked, odds) = match target {
            BetTarget::Draw => (MatchResult::Draw, row.draw_odds),
            BetTarget::Favorite => (
                row.favorite.as_result(),
                match row.favorite {
                    Favoritism::Home => row.home_odds,
                    Favoritism::Away => row.away_odds,
                },
            ),
            BetTarget::Underdog => (
                row.underdog.as_result(),
                match row.underdog {
                    Favoritism::Home => row.home_odds,
                    Favoritism::Away => row.away_odds,
                },
            ),
        };
        if picked == row.result {
            profit += stake * odds - stake;
        } else {
            profit -= stake;
        }
    }
    profit
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(home_odds: f64, draw_odds: f64, away_odds: f64, result: MatchResult) -> DatasetRow {
        DatasetRow {
            match_id: 1,
            competition: "Bundesliga".to_string(),
            season: 2021,
            match_date: "14.05.2022".to_string(),
            home_team: "FC Bayern München".to_string(),
            away_team: "VfB Stuttgart".to_string(),
            home_odds,
            draw_odds,
            away_odds,
            favorite: favorite_of(home_odds, away_odds),
            underdog: underdog_of(home_odds, away_odds),
            result,
            goal_difference: 0,
            home_streak: 0,
            away_streak: 0,
            rolling: BTreeMap::new(),
        }
    }

    #[test]
    fn favorite_is_the_shorter_side() {
        assert_eq!(favorite_of(1.4, 7.0), Favoritism::Home);
        assert_eq!(favorite_of(3.2, 2.1), Favoritism::Away);
        assert_eq!(underdog_of(1.4, 7.0), Favoritism::Away);
        // Ties go away-side, consistent between the two labels.
        assert_eq!(favorite_of(2.0, 2.0), Favoritism::Away);
        assert_eq!(underdog_of(2.0, 2.0), Favoritism::Away);
    }

    #[test]
    fn no_bet_without_edge_over_implied_probability() {
        // Market: home 2.0 implies 50%. Model agrees at 50%: no stake.
        let rows = vec![row(2.0, 3.5, 3.8, MatchResult::Home)];
        let predictions = vec![OutcomeProbabilities {
            home: 0.5,
            draw: 0.3,
            away: 0.2,
        }];
        assert_eq!(simulate_bets(&rows, &predictions, 10.0).unwrap(), 0.0);
    }

    #[test]
    fn winning_edge_bet_pays_odds_minus_stake() {
        let rows = vec![
            row(2.0, 3.5, 3.8, MatchResult::Home),
            row(2.0, 3.5, 3.8, MatchResult::Away),
        ];
        let edge = OutcomeProbabilities {
            home: 0.6,
            draw: 0.25,
            away: 0.15,
        };
        // First bet wins 10 * 2.0 - 10, second loses the stake.
        let profit = simulate_bets(&rows, &[edge, edge], 10.0).unwrap();
        assert!((profit - 0.0).abs() < 1e-9);
    }

    #[test]
    fn prediction_row_mismatch_is_an_error() {
        let rows = vec![row(2.0, 3.5, 3.8, MatchResult::Home)];
        assert!(simulate_bets(&rows, &[], 10.0).is_err());
    }

    #[test]
    fn flat_favorite_margin() {
        let rows = vec![
            row(1.5, 4.0, 6.0, MatchResult::Home),
            row(1.5, 4.0, 6.0, MatchResult::Away),
        ];
        // Win pays 10 * 1.5 - 10 = 5, loss costs 10.
        assert!((flat_margin(&rows, BetTarget::Favorite, 10.0) - (-5.0)).abs() < 1e-9);
        // Underdog: one loss, one win at 6.0.
        assert!((flat_margin(&rows, BetTarget::Underdog, 10.0) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn csv_columns_are_deterministic_and_sparse() {
        let dir = std::env::temp_dir().join("footy_dataset_csv_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("features.csv");

        let mut a = row(1.5, 4.0, 6.0, MatchResult::Home);
        a.rolling.insert("home_avg_fouls".to_string(), 11.5);
        let mut b = row(2.5, 3.2, 2.9, MatchResult::Draw);
        b.match_id = 2;
        b.rolling.insert("away_avg_corner_kicks".to_string(), 5.0);

        write_csv(&[a, b], &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        // Sorted feature columns after the fixed block.
        assert!(header.ends_with("away_avg_corner_kicks,home_avg_fouls"));
        // Row a has fouls but no corner kicks: empty cell, then the value.
        assert!(lines.next().unwrap().ends_with(",11.5"));
        assert!(lines.next().unwrap().ends_with("5,"));
        std::fs::remove_file(&path).ok();
    }
}
