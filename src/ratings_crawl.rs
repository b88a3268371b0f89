use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db;
use crate::schema_evolve::{self, StatKey};
use crate::session::CrawlSession;

/// One point-in-time rating profile for a player, as handed over by the
/// rating-site scrape layer. Snapshots are immutable facts: once stored for
/// an effective date they are never updated, only new dates appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRatingProfile {
    #[serde(default)]
    pub overall_rating: Option<i64>,
    #[serde(default)]
    pub potential: Option<i64>,
    #[serde(default)]
    pub preferred_foot: Option<String>,
    #[serde(default)]
    pub best_position: Option<String>,
    #[serde(default)]
    pub position_ratings: BTreeMap<String, i64>,
    #[serde(default)]
    pub skill_stats: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct PlayerRef {
    pub player_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct RatingsCrawlSummary {
    pub players_total: usize,
    pub snapshots_inserted: usize,
    pub snapshots_skipped: usize,
    pub profiles_missing: usize,
    pub fetches_failed: usize,
    pub errors: Vec<String>,
}

pub fn snapshot_exists(conn: &Connection, player_id: i64, effective_date: &str) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM player_rating_snapshots
             WHERE player_id = ?1 AND effective_date = ?2",
            params![player_id, effective_date],
            |row| row.get(0),
        )
        .context("count rating snapshots")?;
    Ok(count > 0)
}

/// Append one snapshot. Duplicate (player, date) keys are ignored, keeping
/// re-ingestion a no-op. Returns true when a row was written.
pub fn insert_snapshot(
    conn: &Connection,
    player_id: i64,
    effective_date: &str,
    profile: &PlayerRatingProfile,
) -> Result<bool> {
    let position_ratings_json =
        serde_json::to_string(&profile.position_ratings).context("encode position ratings")?;
    let skill_stats_json =
        serde_json::to_string(&profile.skill_stats).context("encode skill stats")?;
    let changed = conn
        .execute(
            r#"
            INSERT OR IGNORE INTO player_rating_snapshots (
                player_id, effective_date, overall_rating, potential,
                preferred_foot, best_position, position_ratings_json,
                skill_stats_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                player_id,
                effective_date,
                profile.overall_rating,
                profile.potential,
                profile.preferred_foot,
                profile.best_position,
                position_ratings_json,
                skill_stats_json,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("insert rating snapshot")?;
    Ok(changed > 0)
}

/// Players known to the store (i.e. seen in at least one lineup), the
/// population the rating crawl walks.
pub fn known_players(conn: &Connection) -> Result<Vec<PlayerRef>> {
    let mut stmt = conn
        .prepare("SELECT player_id, name FROM players ORDER BY player_id ASC")
        .context("prepare players query")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PlayerRef {
                player_id: row.get(0)?,
                name: row.get(1)?,
            })
        })
        .context("query players")?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode player row")?);
    }
    Ok(out)
}

/// Crawl rating profiles for every known player lacking a snapshot at
/// `effective_date`. The fetch closure is the scrape layer: `Ok(None)`
/// means the player could not be found on the rating site (kept as a
/// counted outcome), `Err` is a transient failure that skips the player
/// and leaves them for the next run.
pub fn crawl_ratings<F>(
    session: &mut CrawlSession,
    effective_date: &str,
    mut fetch_profile: F,
) -> Result<RatingsCrawlSummary>
where
    F: FnMut(&PlayerRef) -> Result<Option<PlayerRatingProfile>>,
{
    let players = known_players(&session.conn)?;
    let mut summary = RatingsCrawlSummary {
        players_total: players.len(),
        ..Default::default()
    };
    let run_id = db::start_crawl_run(&session.conn, "rating_site", players.len())?;

    for player in &players {
        if snapshot_exists(&session.conn, player.player_id, effective_date)? {
            summary.snapshots_skipped += 1;
            continue;
        }
        session.delay.sleep_jittered();
        match fetch_profile(player) {
            Ok(Some(profile)) => {
                if insert_snapshot(&session.conn, player.player_id, effective_date, &profile)? {
                    summary.snapshots_inserted += 1;
                } else {
                    summary.snapshots_skipped += 1;
                }
            }
            Ok(None) => {
                summary.profiles_missing += 1;
                summary
                    .errors
                    .push(format!("no rating profile for {} ({})", player.name, player.player_id));
            }
            Err(err) => {
                summary.fetches_failed += 1;
                summary
                    .errors
                    .push(format!("player {}: {err:#}", player.player_id));
            }
        }
    }

    db::finish_crawl_run(
        &session.conn,
        run_id,
        summary.snapshots_inserted,
        summary.snapshots_skipped,
        summary.fetches_failed,
        &summary.errors,
    )?;
    Ok(summary)
}

/// Flatten one api-football player-season payload into the evolver's
/// sparse numeric form and persist it per (player, season, competition).
pub fn ingest_player_season_json(conn: &Connection, raw: &str) -> Result<usize> {
    let value: Value = serde_json::from_str(raw.trim()).context("invalid player json")?;
    let entries = value
        .get("response")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("missing response array in player payload"))?;

    let mut written = 0usize;
    for entry in entries {
        let Some(player_id) = entry
            .get("player")
            .and_then(|p| p.get("id"))
            .and_then(|i| i.as_i64())
        else {
            continue;
        };
        if let Some(name) = entry
            .get("player")
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
        {
            db::upsert_player(conn, player_id, name)?;
        }

        let Some(stat_sets) = entry.get("statistics").and_then(|s| s.as_array()) else {
            continue;
        };
        for stats in stat_sets {
            let Some(season) = stats
                .get("league")
                .and_then(|l| l.get("season"))
                .and_then(|s| s.as_i64())
            else {
                continue;
            };
            let competition = stats
                .get("league")
                .and_then(|l| l.get("name"))
                .and_then(|n| n.as_str())
                .unwrap_or("unknown")
                .to_string();

            let fields = flatten_stat_groups(stats);
            if fields.is_empty() {
                continue;
            }
            let key = StatKey::PlayerSeason {
                player_id,
                season,
                competition,
            };
            if schema_evolve::insert_stat_row(conn, &key, &fields)? {
                written += 1;
            }
        }
    }
    Ok(written)
}

/// `{"games": {"appearences": 30, ...}, "shots": {...}}` becomes
/// `games_appearences`, `shots_total`, ... with the evolver's
/// normalization applied to each leaf.
fn flatten_stat_groups(stats: &Value) -> BTreeMap<String, Option<f64>> {
    let mut fields = BTreeMap::new();
    let Some(groups) = stats.as_object() else {
        return fields;
    };
    for (group_name, group) in groups {
        if group_name == "league" || group_name == "team" {
            continue;
        }
        let Some(leaves) = group.as_object() else {
            continue;
        };
        for (leaf_name, leaf) in leaves {
            if leaf.is_object() || leaf.is_array() {
                continue;
            }
            let name = schema_evolve::sanitize_metric_name(&format!("{group_name} {leaf_name}"));
            if name.is_empty() {
                continue;
            }
            fields.insert(name, schema_evolve::normalize_stat_value(leaf));
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn profile() -> PlayerRatingProfile {
        PlayerRatingProfile {
            overall_rating: Some(87),
            potential: Some(90),
            preferred_foot: Some("Right".to_string()),
            best_position: Some("ST".to_string()),
            position_ratings: [("ST".to_string(), 87), ("CF".to_string(), 85)].into(),
            skill_stats: [("Finishing".to_string(), 91.0)].into(),
        }
    }

    #[test]
    fn snapshots_are_append_only() {
        let conn = open_in_memory().unwrap();
        assert!(insert_snapshot(&conn, 278, "01.09.2021", &profile()).unwrap());
        // Re-ingesting the same effective date changes nothing.
        let mut changed = profile();
        changed.overall_rating = Some(99);
        assert!(!insert_snapshot(&conn, 278, "01.09.2021", &changed).unwrap());
        let stored: i64 = conn
            .query_row(
                "SELECT overall_rating FROM player_rating_snapshots
                 WHERE player_id = 278 AND effective_date = '01.09.2021'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stored, 87);
        // A new effective date is a new fact.
        assert!(insert_snapshot(&conn, 278, "01.02.2022", &changed).unwrap());
    }

    #[test]
    fn player_season_payload_flattens_into_sparse_row() {
        let conn = open_in_memory().unwrap();
        let raw = r#"{
            "response": [{
                "player": {"id": 278, "name": "R. Lewandowski"},
                "statistics": [{
                    "league": {"name": "Bundesliga", "season": 2021},
                    "games": {"appearences": 34, "minutes": 2946, "rating": "8.1"},
                    "goals": {"total": 35, "assists": 3},
                    "passes": {"accuracy": "76%"}
                }]
            }]
        }"#;
        assert_eq!(ingest_player_season_json(&conn, raw).unwrap(), 1);
        let (goals, accuracy): (f64, f64) = conn
            .query_row(
                "SELECT goals_total, passes_accuracy FROM player_season_statistics
                 WHERE player_id = 278 AND season = 2021",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(goals, 35.0);
        assert!((accuracy - 0.76).abs() < 1e-9);
        // Duplicate ingestion is a no-op.
        assert_eq!(ingest_player_season_json(&conn, raw).unwrap(), 0);
    }
}
