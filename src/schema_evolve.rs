use std::collections::{BTreeMap, HashSet};

use anyhow::{Context, Result};
use rusqlite::{Connection, params_from_iter, types::Value as SqlValue};
use serde_json::Value;

/// The two evolving statistics tables. Their metric vocabulary is not known
/// up front and grows between ingestion runs, so the tables are created
/// lazily and widened column by column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatScope {
    MatchStatistics,
    PlayerSeasonStatistics,
}

impl StatScope {
    pub fn table_name(&self) -> &'static str {
        match self {
            StatScope::MatchStatistics => "match_statistics",
            StatScope::PlayerSeasonStatistics => "player_season_statistics",
        }
    }

    fn key_columns(&self) -> &'static [&'static str] {
        match self {
            StatScope::MatchStatistics => &["match_id"],
            StatScope::PlayerSeasonStatistics => &["player_id", "season", "competition"],
        }
    }

    fn create_sql(&self) -> &'static str {
        match self {
            StatScope::MatchStatistics => {
                r#"
                CREATE TABLE IF NOT EXISTS match_statistics (
                    match_id INTEGER PRIMARY KEY,
                    FOREIGN KEY (match_id) REFERENCES matches(match_id)
                )
                "#
            }
            StatScope::PlayerSeasonStatistics => {
                r#"
                CREATE TABLE IF NOT EXISTS player_season_statistics (
                    player_id INTEGER NOT NULL,
                    season INTEGER NOT NULL,
                    competition TEXT NOT NULL,
                    PRIMARY KEY (player_id, season, competition)
                )
                "#
            }
        }
    }
}

/// Primary-key value for one statistics row.
#[derive(Debug, Clone)]
pub enum StatKey {
    Match(i64),
    PlayerSeason { player_id: i64, season: i64, competition: String },
}

impl StatKey {
    fn scope(&self) -> StatScope {
        match self {
            StatKey::Match(_) => StatScope::MatchStatistics,
            StatKey::PlayerSeason { .. } => StatScope::PlayerSeasonStatistics,
        }
    }

    fn values(&self) -> Vec<SqlValue> {
        match self {
            StatKey::Match(id) => vec![SqlValue::Integer(*id)],
            StatKey::PlayerSeason { player_id, season, competition } => vec![
                SqlValue::Integer(*player_id),
                SqlValue::Integer(*season),
                SqlValue::Text(competition.clone()),
            ],
        }
    }
}

/// Turn a source-side metric label into a storable column name:
/// lower-cased, spaces to underscores, `%` spelled out, anything else
/// non-alphanumeric dropped. The result is safe to splice into DDL.
pub fn sanitize_metric_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if ch == '%' {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            out.push_str("percent");
        } else if ch == ' ' || ch == '_' || ch == '-' {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Normalize one raw statistic value for storage. Percentage strings become
/// a 0-1 fraction; plain numerics pass through; null and anything
/// unparseable map to None, which is stored as SQL NULL rather than being
/// conflated with a measured zero.
pub fn normalize_stat_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Some(stripped) = trimmed.strip_suffix('%') {
                stripped.trim().parse::<f64>().ok().map(|v| v / 100.0)
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

/// Ensure the scope's table exists and contains a column for every incoming
/// field. Append-only: columns are never dropped or retyped, and a field
/// that already has a column is left alone. Safe to call repeatedly and
/// concurrently across runs; the duplicate-column race resolves to a no-op.
pub fn ensure_columns(conn: &Connection, scope: StatScope, fields: &[String]) -> Result<()> {
    conn.execute_batch(scope.create_sql())
        .with_context(|| format!("create {} table", scope.table_name()))?;

    let existing = existing_columns(conn, scope)?;
    for field in fields {
        if existing.contains(field) {
            continue;
        }
        if !is_safe_column_name(field) {
            return Err(anyhow::anyhow!(
                "refusing unsanitized column name {field:?} for {}",
                scope.table_name()
            ));
        }
        let ddl = format!(
            "ALTER TABLE {} ADD COLUMN \"{}\" REAL",
            scope.table_name(),
            field
        );
        if let Err(err) = conn.execute_batch(&ddl) {
            // Another run may have added the column between our PRAGMA read
            // and the ALTER; that exact conflict is fine.
            if !err.to_string().contains("duplicate column name") {
                return Err(err).with_context(|| format!("add column {field}"));
            }
        }
    }
    Ok(())
}

pub fn existing_columns(conn: &Connection, scope: StatScope) -> Result<HashSet<String>> {
    let sql = format!("PRAGMA table_info({})", scope.table_name());
    let mut stmt = conn.prepare(&sql).context("prepare table_info pragma")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .context("query table_info pragma")?;
    let mut out = HashSet::new();
    for row in rows {
        out.insert(row.context("decode column name")?);
    }
    Ok(out)
}

/// Metric columns of the scope's table, i.e. everything except the key.
pub fn stat_columns(conn: &Connection, scope: StatScope) -> Result<Vec<String>> {
    if !crate::db::table_exists(conn, scope.table_name())? {
        return Ok(Vec::new());
    }
    let keys: HashSet<&str> = scope.key_columns().iter().copied().collect();
    let mut cols: Vec<String> = existing_columns(conn, scope)?
        .into_iter()
        .filter(|c| !keys.contains(c.as_str()))
        .collect();
    cols.sort();
    Ok(cols)
}

/// Write one sparse statistics row, evolving the schema first. Duplicate
/// keys are ignored so re-ingesting the same payload is a no-op.
/// Returns true when a row was actually written.
pub fn insert_stat_row(
    conn: &Connection,
    key: &StatKey,
    fields: &BTreeMap<String, Option<f64>>,
) -> Result<bool> {
    let scope = key.scope();
    let names: Vec<String> = fields.keys().cloned().collect();
    ensure_columns(conn, scope, &names)?;

    let mut columns: Vec<String> = scope.key_columns().iter().map(|c| c.to_string()).collect();
    let mut values: Vec<SqlValue> = key.values();
    for (name, value) in fields {
        columns.push(format!("\"{name}\""));
        values.push(match value {
            Some(v) => SqlValue::Real(*v),
            None => SqlValue::Null,
        });
    }

    let placeholders = (1..=values.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
        scope.table_name(),
        columns.join(", "),
        placeholders
    );
    let changed = conn
        .execute(&sql, params_from_iter(values))
        .with_context(|| format!("insert {} row", scope.table_name()))?;
    Ok(changed > 0)
}

fn is_safe_column_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}
