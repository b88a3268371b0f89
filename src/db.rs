use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};

/// Canonical storage format for match dates, inherited from the odds-site
/// listing format so resolution can compare dates as plain strings.
pub const MATCH_DATE_FMT: &str = "%d.%m.%Y";

/// Odds-site spelling -> fixtures-API spelling. Consulted before any
/// similarity scoring; extend via `add_team_alias` when the crawl summary
/// reports recurring resolution failures.
const TEAM_ALIAS_SEED: &[(&str, &str)] = &[
    ("Dortmund", "Borussia Dortmund"),
    ("Wolfsburg", "VfL Wolfsburg"),
    ("Mainz", "FSV Mainz 05"),
    ("Schalke", "FC Schalke 04"),
    ("B. Monchengladbach", "Borussia Monchengladbach"),
    ("Stuttgart", "VfB Stuttgart"),
    ("Augsburg", "FC Augsburg"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Home,
    Draw,
    Away,
}

impl MatchResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchResult::Home => "home",
            MatchResult::Draw => "draw",
            MatchResult::Away => "away",
        }
    }

    pub fn from_goals(home_goals: i64, away_goals: i64) -> Self {
        if home_goals > away_goals {
            MatchResult::Home
        } else if home_goals < away_goals {
            MatchResult::Away
        } else {
            MatchResult::Draw
        }
    }
}

/// Canonical match row as assigned by the fixtures API.
#[derive(Debug, Clone)]
pub struct StoredMatch {
    pub match_id: i64,
    pub competition: String,
    pub season: i64,
    pub match_date: String,
    pub match_time: Option<String>,
    pub home_team: String,
    pub away_team: String,
    pub home_goals: Option<i64>,
    pub away_goals: Option<i64>,
    pub status: Option<String>,
    pub home_formation: Option<String>,
    pub away_formation: Option<String>,
}

impl StoredMatch {
    /// A match is final once both goal counts are present.
    pub fn outcome(&self) -> Option<MatchResult> {
        let (Some(home), Some(away)) = (self.home_goals, self.away_goals) else {
            return None;
        };
        Some(MatchResult::from_goals(home, away))
    }

    pub fn date(&self) -> Option<NaiveDate> {
        parse_match_date(&self.match_date)
    }
}

/// One scraped odds row. `match_id` stays NULL until resolution succeeds;
/// unresolved rows are retained for audit and later alias extension.
#[derive(Debug, Clone)]
pub struct OddsRow {
    pub match_id: Option<i64>,
    pub match_date: String,
    pub home_team_name: String,
    pub away_team_name: String,
    pub home_odds: Option<f64>,
    pub draw_odds: Option<f64>,
    pub away_odds: Option<f64>,
    pub source_href: Option<String>,
}

pub fn parse_match_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), MATCH_DATE_FMT).ok()
}

pub fn format_match_date(date: NaiveDate) -> String {
    date.format(MATCH_DATE_FMT).to_string()
}

pub fn default_db_path() -> PathBuf {
    PathBuf::from("data/football.sqlite")
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Create every fixed-shape table. The two statistics tables are created
/// lazily by the schema evolver because their column sets are source-driven.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS matches (
            match_id INTEGER PRIMARY KEY,
            competition TEXT NOT NULL,
            season INTEGER NOT NULL,
            match_date TEXT NOT NULL,
            match_time TEXT NULL,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            home_goals INTEGER NULL,
            away_goals INTEGER NULL,
            status TEXT NULL,
            home_formation TEXT NULL,
            away_formation TEXT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_date ON matches(match_date);
        CREATE INDEX IF NOT EXISTS idx_matches_comp_season ON matches(competition, season);

        CREATE TABLE IF NOT EXISTS odds (
            match_id INTEGER NULL,
            match_date TEXT NOT NULL,
            home_team_name TEXT NOT NULL,
            away_team_name TEXT NOT NULL,
            home_odds REAL NULL,
            draw_odds REAL NULL,
            away_odds REAL NULL,
            source_href TEXT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(match_date, home_team_name, away_team_name)
        );
        CREATE INDEX IF NOT EXISTS idx_odds_match ON odds(match_id);

        CREATE TABLE IF NOT EXISTS starting_xi (
            match_id INTEGER NOT NULL,
            player_id INTEGER NOT NULL,
            player_name TEXT NULL,
            position TEXT NULL,
            grid TEXT NULL,
            side TEXT NOT NULL,
            UNIQUE(match_id, player_id)
        );

        CREATE TABLE IF NOT EXISTS substitutes (
            match_id INTEGER NOT NULL,
            team TEXT NULL,
            player_id_off INTEGER NULL,
            player_id_on INTEGER NULL,
            player_name_off TEXT NULL,
            player_name_on TEXT NULL,
            minute INTEGER NULL,
            UNIQUE(match_id, player_id_off, player_id_on)
        );

        CREATE TABLE IF NOT EXISTS players (
            player_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            nationality TEXT NULL,
            birth_date TEXT NULL,
            height_cm INTEGER NULL,
            weight_kg INTEGER NULL
        );

        CREATE TABLE IF NOT EXISTS player_rating_snapshots (
            player_id INTEGER NOT NULL,
            effective_date TEXT NOT NULL,
            overall_rating INTEGER NULL,
            potential INTEGER NULL,
            preferred_foot TEXT NULL,
            best_position TEXT NULL,
            position_ratings_json TEXT NOT NULL,
            skill_stats_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY(player_id, effective_date)
        );

        CREATE TABLE IF NOT EXISTS team_aliases (
            alias TEXT PRIMARY KEY,
            canonical TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS crawl_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NULL,
            units_total INTEGER NOT NULL,
            units_succeeded INTEGER NOT NULL,
            units_skipped INTEGER NOT NULL,
            units_failed INTEGER NOT NULL,
            errors_json TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    seed_team_aliases(conn)?;
    Ok(())
}

fn seed_team_aliases(conn: &Connection) -> Result<()> {
    for (alias, canonical) in TEAM_ALIAS_SEED {
        conn.execute(
            "INSERT OR IGNORE INTO team_aliases(alias, canonical) VALUES (?1, ?2)",
            params![alias, canonical],
        )
        .context("seed team alias")?;
    }
    Ok(())
}

pub fn add_team_alias(conn: &Connection, alias: &str, canonical: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO team_aliases(alias, canonical) VALUES (?1, ?2)",
        params![alias.trim(), canonical.trim()],
    )
    .context("insert team alias")?;
    Ok(())
}

pub fn lookup_team_alias(conn: &Connection, name: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT canonical FROM team_aliases WHERE alias = ?1",
        params![name],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .context("query team alias")
}

/// Insert a canonical match. Returns true when the row was new. Existing
/// rows are never touched: the fixtures source is authoritative and a match
/// with goals recorded is final.
pub fn insert_match(conn: &Connection, m: &StoredMatch) -> Result<bool> {
    let changed = conn
        .execute(
            r#"
            INSERT OR IGNORE INTO matches (
                match_id, competition, season, match_date, match_time,
                home_team, away_team, home_goals, away_goals, status,
                home_formation, away_formation, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                m.match_id,
                m.competition,
                m.season,
                m.match_date,
                m.match_time,
                m.home_team,
                m.away_team,
                m.home_goals,
                m.away_goals,
                m.status,
                m.home_formation,
                m.away_formation,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("insert match")?;
    Ok(changed > 0)
}

/// The one permitted mutation of a match row: filling the formation columns
/// once the lineup payload becomes available. Backfill only; an absent
/// incoming value never clears a stored formation, so re-fetching a lineup
/// the source has since thinned out stays a no-op.
pub fn update_formations(
    conn: &Connection,
    match_id: i64,
    home_formation: Option<&str>,
    away_formation: Option<&str>,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE matches
        SET home_formation = COALESCE(?1, home_formation),
            away_formation = COALESCE(?2, away_formation)
        WHERE match_id = ?3
        "#,
        params![home_formation, away_formation, match_id],
    )
    .context("update match formations")?;
    Ok(())
}

pub fn load_matches(conn: &Connection) -> Result<Vec<StoredMatch>> {
    load_matches_where(conn, "1 = 1", &[])
}

pub fn load_matches_for_season(
    conn: &Connection,
    competition: &str,
    season: i64,
) -> Result<Vec<StoredMatch>> {
    load_matches_where(
        conn,
        "competition = ?1 AND season = ?2",
        &[&competition as &dyn rusqlite::ToSql, &season],
    )
}

pub fn load_matches_on_date(conn: &Connection, match_date: &str) -> Result<Vec<StoredMatch>> {
    load_matches_where(conn, "match_date = ?1", &[&match_date as &dyn rusqlite::ToSql])
}

fn load_matches_where(
    conn: &Connection,
    predicate: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<StoredMatch>> {
    let sql = format!(
        r#"
        SELECT
            match_id, competition, season, match_date, match_time,
            home_team, away_team, home_goals, away_goals, status,
            home_formation, away_formation
        FROM matches
        WHERE {predicate}
        ORDER BY match_date ASC, match_id ASC
        "#
    );
    let mut stmt = conn.prepare(&sql).context("prepare load matches query")?;
    let rows = stmt
        .query_map(args, |row| {
            Ok(StoredMatch {
                match_id: row.get(0)?,
                competition: row.get(1)?,
                season: row.get(2)?,
                match_date: row.get(3)?,
                match_time: row.get(4)?,
                home_team: row.get(5)?,
                away_team: row.get(6)?,
                home_goals: row.get(7)?,
                away_goals: row.get(8)?,
                status: row.get(9)?,
                home_formation: row.get(10)?,
                away_formation: row.get(11)?,
            })
        })
        .context("query load matches")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode match row")?);
    }
    Ok(out)
}

/// Insert a scraped odds row. Duplicate (date, home, away) triples are
/// silently ignored so re-crawling a page is a no-op.
pub fn insert_odds_row(conn: &Connection, row: &OddsRow) -> Result<bool> {
    let changed = conn
        .execute(
            r#"
            INSERT OR IGNORE INTO odds (
                match_id, match_date, home_team_name, away_team_name,
                home_odds, draw_odds, away_odds, source_href, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                row.match_id,
                row.match_date,
                row.home_team_name,
                row.away_team_name,
                row.home_odds,
                row.draw_odds,
                row.away_odds,
                row.source_href,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("insert odds row")?;
    Ok(changed > 0)
}

pub fn load_resolved_odds(conn: &Connection) -> Result<Vec<OddsRow>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT match_id, match_date, home_team_name, away_team_name,
                   home_odds, draw_odds, away_odds, source_href
            FROM odds
            WHERE match_id IS NOT NULL
            ORDER BY match_date ASC, rowid ASC
            "#,
        )
        .context("prepare load odds query")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(OddsRow {
                match_id: row.get(0)?,
                match_date: row.get(1)?,
                home_team_name: row.get(2)?,
                away_team_name: row.get(3)?,
                home_odds: row.get(4)?,
                draw_odds: row.get(5)?,
                away_odds: row.get(6)?,
                source_href: row.get(7)?,
            })
        })
        .context("query load odds")?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode odds row")?);
    }
    Ok(out)
}

pub fn count_unresolved_odds(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM odds WHERE match_id IS NULL", [], |row| {
        row.get(0)
    })
    .context("count unresolved odds")
}

pub fn upsert_player(conn: &Connection, player_id: i64, name: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO players(player_id, name) VALUES (?1, ?2)",
        params![player_id, name],
    )
    .context("insert player")?;
    Ok(())
}

pub fn lineup_exists(conn: &Connection, match_id: i64) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM starting_xi WHERE match_id = ?1",
            params![match_id],
            |row| row.get(0),
        )
        .context("count starting xi rows")?;
    Ok(count > 0)
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )
        .context("query sqlite_master")?;
    Ok(count > 0)
}

/// Crawl-run bookkeeping: one row per invocation per source, finished in
/// place with the final counts and the accumulated per-unit errors.
pub fn start_crawl_run(conn: &Connection, source: &str, units_total: usize) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO crawl_runs(source, started_at, finished_at,
            units_total, units_succeeded, units_skipped, units_failed, errors_json)
        VALUES (?1, ?2, NULL, ?3, 0, 0, 0, '[]')
        "#,
        params![source, Utc::now().to_rfc3339(), units_total as i64],
    )
    .context("insert crawl run")?;
    Ok(conn.last_insert_rowid())
}

pub fn finish_crawl_run(
    conn: &Connection,
    run_id: i64,
    succeeded: usize,
    skipped: usize,
    failed: usize,
    errors: &[String],
) -> Result<()> {
    let errors_json = serde_json::to_string(errors).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        r#"
        UPDATE crawl_runs
        SET finished_at = ?1, units_succeeded = ?2, units_skipped = ?3,
            units_failed = ?4, errors_json = ?5
        WHERE run_id = ?6
        "#,
        params![
            Utc::now().to_rfc3339(),
            succeeded as i64,
            skipped as i64,
            failed as i64,
            errors_json,
            run_id
        ],
    )
    .context("update crawl run")?;
    Ok(())
}
