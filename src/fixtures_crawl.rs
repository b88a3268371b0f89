use std::collections::BTreeMap;
use std::env;

use anyhow::{Context, Result, anyhow};
use chrono::DateTime;
use rusqlite::params;
use serde_json::Value;

use crate::db::{self, StoredMatch};
use crate::http_client::{fetch_text, http_client};
use crate::schema_evolve::{self, StatKey, StatScope};
use crate::session::CrawlSession;

const DEFAULT_BASE_URL: &str = "https://api-football-v1.p.rapidapi.com/v3";
const DEFAULT_API_HOST: &str = "api-football-v1.p.rapidapi.com";

/// Per-invocation cap on expensive per-fixture detail fetches. Subsequent
/// runs continue where this one stopped via the duplicate-skip check, so no
/// offset needs to be persisted.
const DEFAULT_DETAIL_BATCH_CAP: usize = 20;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_key: String,
    pub api_host: String,
    pub base_url: String,
    pub detail_batch_cap: usize,
}

impl ApiConfig {
    /// A missing API key is a configuration error and aborts the run;
    /// everything past this point is recovered per unit of work.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("API_FOOTBALL_KEY")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("API_FOOTBALL_KEY is not set"))?;
        let api_host = env::var("API_FOOTBALL_HOST")
            .unwrap_or_else(|_| DEFAULT_API_HOST.to_string())
            .trim()
            .to_string();
        let base_url = env::var("API_FOOTBALL_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();
        let detail_batch_cap = env::var("DETAIL_BATCH_CAP")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_DETAIL_BATCH_CAP)
            .clamp(1, 500);
        Ok(Self {
            api_key,
            api_host,
            base_url,
            detail_batch_cap,
        })
    }
}

/// Outcome of one unit of work in the detail pass. Every unit lands in
/// exactly one of these and is counted once in the season summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Persisted,
    SkippedDuplicate,
    FetchFailed,
}

#[derive(Debug, Clone, Default)]
pub struct SeasonCrawlSummary {
    pub competition: String,
    pub season: i64,
    pub fixtures_listed: usize,
    pub matches_inserted: usize,
    pub matches_skipped: usize,
    pub details_persisted: usize,
    pub details_skipped: usize,
    pub details_failed: usize,
    pub errors: Vec<String>,
}

/// Per-side sparse statistics payload for one fixture, already sanitized
/// and prefixed (`home_*` / `away_*`).
#[derive(Debug, Clone, Default)]
pub struct MatchStatsFields(pub BTreeMap<String, Option<f64>>);

#[derive(Debug, Clone)]
pub struct LineupPlayer {
    pub player_id: i64,
    pub name: String,
    pub position: Option<String>,
    pub grid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TeamLineup {
    pub formation: Option<String>,
    pub starters: Vec<LineupPlayer>,
}

#[derive(Debug, Clone)]
pub struct Lineups {
    pub home: TeamLineup,
    pub away: TeamLineup,
}

#[derive(Debug, Clone)]
pub struct Substitution {
    pub team: Option<String>,
    pub player_id_off: Option<i64>,
    pub player_id_on: Option<i64>,
    pub player_name_off: Option<String>,
    pub player_name_on: Option<String>,
    pub minute: Option<i64>,
}

/// Crawl one competition+season: list fixtures, persist the finished ones,
/// then run the capped detail pass. A listing failure fails this unit; the
/// caller's loop over units keeps going.
pub fn crawl_competition_season(
    session: &mut CrawlSession,
    cfg: &ApiConfig,
    competition: &str,
    api_id: u32,
    season: i64,
) -> Result<SeasonCrawlSummary> {
    let url = format!(
        "{}/fixtures?league={}&season={}&timezone=Europe/Berlin",
        cfg.base_url, api_id, season
    );
    let body = fetch_api_json(cfg, &url)
        .with_context(|| format!("list fixtures for {competition} season {season}"))?;
    let matches = parse_fixtures_json(&body, competition, season)?;

    let mut summary = SeasonCrawlSummary {
        competition: competition.to_string(),
        season,
        fixtures_listed: matches.len(),
        ..Default::default()
    };

    let run_id = db::start_crawl_run(&session.conn, "fixtures_api", matches.len())?;

    // One transaction per logical unit: the season's match rows commit
    // together, bounding lost work on interruption.
    let tx = session.conn.transaction().context("begin match transaction")?;
    for m in &matches {
        if db::insert_match(&tx, m)? {
            summary.matches_inserted += 1;
        } else {
            summary.matches_skipped += 1;
        }
    }
    tx.commit().context("commit match transaction")?;

    let mut fetched = 0usize;
    for m in &matches {
        if fetched >= cfg.detail_batch_cap {
            break;
        }
        let state = if match_stats_exist(&session.conn, m.match_id)? {
            UnitState::SkippedDuplicate
        } else {
            fetched += 1;
            match ingest_fixture_detail(session, cfg, m.match_id) {
                Ok(()) => UnitState::Persisted,
                Err(err) => {
                    summary
                        .errors
                        .push(format!("fixture {}: {err:#}", m.match_id));
                    UnitState::FetchFailed
                }
            }
        };
        match state {
            UnitState::Persisted => summary.details_persisted += 1,
            UnitState::SkippedDuplicate => summary.details_skipped += 1,
            UnitState::FetchFailed => summary.details_failed += 1,
        }
    }

    db::finish_crawl_run(
        &session.conn,
        run_id,
        summary.matches_inserted + summary.details_persisted,
        summary.matches_skipped + summary.details_skipped,
        summary.details_failed,
        &summary.errors,
    )?;

    Ok(summary)
}

/// Statistics, lineups and events for one fixture. Absent payloads (not yet
/// published by the source) are typed no-data outcomes, not failures.
fn ingest_fixture_detail(
    session: &mut CrawlSession,
    cfg: &ApiConfig,
    match_id: i64,
) -> Result<()> {
    session.delay.sleep_jittered();
    let stats_body = fetch_api_json(
        cfg,
        &format!("{}/fixtures/statistics?fixture={match_id}", cfg.base_url),
    )
    .context("fetch statistics")?;
    if let Some(fields) = parse_statistics_json(&stats_body)? {
        schema_evolve::insert_stat_row(&session.conn, &StatKey::Match(match_id), &fields.0)?;
    }

    session.delay.sleep_jittered();
    let lineups_body = fetch_api_json(
        cfg,
        &format!("{}/fixtures/lineups?fixture={match_id}", cfg.base_url),
    )
    .context("fetch lineups")?;
    if let Some(lineups) = parse_lineups_json(&lineups_body)? {
        persist_lineups(session, match_id, &lineups)?;
    }

    session.delay.sleep_jittered();
    let events_body = fetch_api_json(
        cfg,
        &format!("{}/fixtures/events?fixture={match_id}", cfg.base_url),
    )
    .context("fetch events")?;
    let subs = parse_events_json(&events_body)?;
    persist_substitutions(&session.conn, match_id, &subs)?;

    Ok(())
}

pub fn persist_lineups(
    session: &mut CrawlSession,
    match_id: i64,
    lineups: &Lineups,
) -> Result<()> {
    db::update_formations(
        &session.conn,
        match_id,
        lineups.home.formation.as_deref(),
        lineups.away.formation.as_deref(),
    )?;

    if db::lineup_exists(&session.conn, match_id)? {
        return Ok(());
    }
    for (side, team) in [("home", &lineups.home), ("away", &lineups.away)] {
        for player in &team.starters {
            session.conn.execute(
                r#"
                INSERT OR IGNORE INTO starting_xi
                    (match_id, player_id, player_name, position, grid, side)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    match_id,
                    player.player_id,
                    player.name,
                    player.position,
                    player.grid,
                    side
                ],
            )
            .context("insert starting xi row")?;
            if session.players_seen.insert(player.player_id) {
                db::upsert_player(&session.conn, player.player_id, &player.name)?;
            }
        }
    }
    Ok(())
}

pub fn persist_substitutions(
    conn: &rusqlite::Connection,
    match_id: i64,
    subs: &[Substitution],
) -> Result<()> {
    for sub in subs {
        conn.execute(
            r#"
            INSERT OR IGNORE INTO substitutes
                (match_id, team, player_id_off, player_id_on,
                 player_name_off, player_name_on, minute)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                match_id,
                sub.team,
                sub.player_id_off,
                sub.player_id_on,
                sub.player_name_off,
                sub.player_name_on,
                sub.minute
            ],
        )
        .context("insert substitute row")?;
    }
    Ok(())
}

pub fn match_stats_exist(conn: &rusqlite::Connection, match_id: i64) -> Result<bool> {
    if !db::table_exists(conn, StatScope::MatchStatistics.table_name())? {
        return Ok(false);
    }
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM match_statistics WHERE match_id = ?1",
            params![match_id],
            |row| row.get(0),
        )
        .context("count match statistics")?;
    Ok(count > 0)
}

fn fetch_api_json(cfg: &ApiConfig, url: &str) -> Result<String> {
    let client = http_client()?;
    fetch_text(
        client,
        url,
        &[
            ("X-RapidAPI-Key", cfg.api_key.as_str()),
            ("X-RapidAPI-Host", cfg.api_host.as_str()),
        ],
    )
}

/// Parse a fixtures listing. Fixtures without both goal counts have not
/// been played (or lack data) and are skipped, matching the historical
/// backfill scope.
pub fn parse_fixtures_json(raw: &str, competition: &str, season: i64) -> Result<Vec<StoredMatch>> {
    let value: Value = serde_json::from_str(raw.trim()).context("invalid fixtures json")?;
    let rows = value
        .get("response")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("missing response array in fixtures payload"))?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(m) = parse_fixture(row, competition, season) {
            out.push(m);
        }
    }
    Ok(out)
}

fn parse_fixture(v: &Value, competition: &str, season: i64) -> Option<StoredMatch> {
    let fixture = v.get("fixture")?;
    let match_id = fixture.get("id")?.as_i64()?;
    let teams = v.get("teams")?;
    let home_team = teams.get("home")?.get("name")?.as_str()?.to_string();
    let away_team = teams.get("away")?.get("name")?.as_str()?.to_string();

    let goals = v.get("goals")?;
    let home_goals = goals.get("home").and_then(|g| g.as_i64());
    let away_goals = goals.get("away").and_then(|g| g.as_i64());
    // Not played yet, or data unavailable for other reasons.
    if home_goals.is_none() && away_goals.is_none() {
        return None;
    }

    let status = fixture
        .get("status")
        .and_then(|s| s.get("short"))
        .and_then(|s| s.as_str())
        .map(|s| s.to_string());

    let raw_date = fixture.get("date")?.as_str()?;
    let parsed = DateTime::parse_from_rfc3339(raw_date).ok()?;
    let match_date = parsed.format(db::MATCH_DATE_FMT).to_string();
    let match_time = Some(parsed.format("%H:%M").to_string());

    Some(StoredMatch {
        match_id,
        competition: competition.to_string(),
        season,
        match_date,
        match_time,
        home_team,
        away_team,
        home_goals,
        away_goals,
        status,
        home_formation: None,
        away_formation: None,
    })
}

/// Parse a per-fixture statistics payload into the evolver's sparse form.
/// An empty response means the source has not published statistics for the
/// fixture; that is `None`, not an error.
pub fn parse_statistics_json(raw: &str) -> Result<Option<MatchStatsFields>> {
    let value: Value = serde_json::from_str(raw.trim()).context("invalid statistics json")?;
    let sides = value
        .get("response")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("missing response array in statistics payload"))?;
    if sides.len() < 2 {
        return Ok(None);
    }

    let mut fields = BTreeMap::new();
    for (prefix, side) in [("home", &sides[0]), ("away", &sides[1])] {
        let Some(stats) = side.get("statistics").and_then(|s| s.as_array()) else {
            continue;
        };
        for stat in stats {
            let Some(label) = stat.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            let name = schema_evolve::sanitize_metric_name(label);
            if name.is_empty() {
                continue;
            }
            let normalized = stat
                .get("value")
                .map(schema_evolve::normalize_stat_value)
                .unwrap_or(None);
            fields.insert(format!("{prefix}_{name}"), normalized);
        }
    }
    if fields.is_empty() {
        return Ok(None);
    }
    Ok(Some(MatchStatsFields(fields)))
}

/// Parse a lineups payload. `None` when the source has not published
/// lineups yet.
pub fn parse_lineups_json(raw: &str) -> Result<Option<Lineups>> {
    let value: Value = serde_json::from_str(raw.trim()).context("invalid lineups json")?;
    let sides = value
        .get("response")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("missing response array in lineups payload"))?;
    if sides.len() < 2 {
        return Ok(None);
    }
    Ok(Some(Lineups {
        home: parse_team_lineup(&sides[0]),
        away: parse_team_lineup(&sides[1]),
    }))
}

fn parse_team_lineup(v: &Value) -> TeamLineup {
    let formation = v
        .get("formation")
        .and_then(|f| f.as_str())
        .map(|f| f.to_string());
    let starters = v
        .get("startXI")
        .and_then(|s| s.as_array())
        .map(|players| {
            players
                .iter()
                .filter_map(|entry| {
                    let player = entry.get("player")?;
                    Some(LineupPlayer {
                        player_id: player.get("id")?.as_i64()?,
                        name: player.get("name")?.as_str()?.to_string(),
                        position: player
                            .get("pos")
                            .and_then(|p| p.as_str())
                            .map(|p| p.to_string()),
                        grid: player
                            .get("grid")
                            .and_then(|g| g.as_str())
                            .map(|g| g.to_string()),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    TeamLineup { formation, starters }
}

/// Substitution events from a fixture events payload; other event kinds
/// (goals, cards) are ignored here.
pub fn parse_events_json(raw: &str) -> Result<Vec<Substitution>> {
    let value: Value = serde_json::from_str(raw.trim()).context("invalid events json")?;
    let events = value
        .get("response")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("missing response array in events payload"))?;

    let mut out = Vec::new();
    for event in events {
        let kind = event.get("type").and_then(|t| t.as_str()).unwrap_or("");
        if !kind.eq_ignore_ascii_case("subst") {
            continue;
        }
        out.push(Substitution {
            team: event
                .get("team")
                .and_then(|t| t.get("name"))
                .and_then(|n| n.as_str())
                .map(|n| n.to_string()),
            player_id_off: event
                .get("player")
                .and_then(|p| p.get("id"))
                .and_then(|i| i.as_i64()),
            player_id_on: event
                .get("assist")
                .and_then(|p| p.get("id"))
                .and_then(|i| i.as_i64()),
            player_name_off: event
                .get("player")
                .and_then(|p| p.get("name"))
                .and_then(|n| n.as_str())
                .map(|n| n.to_string()),
            player_name_on: event
                .get("assist")
                .and_then(|p| p.get("name"))
                .and_then(|n| n.as_str())
                .map(|n| n.to_string()),
            minute: event
                .get("time")
                .and_then(|t| t.get("elapsed"))
                .and_then(|e| e.as_i64()),
        });
    }
    Ok(out)
}
