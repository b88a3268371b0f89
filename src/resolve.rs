use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use crate::db;

/// Similarity floor (0-100 ratio) for the fuzzy fallback. A tuned constant:
/// low enough to absorb transliteration and sponsor-suffix noise, high
/// enough not to glue two different clubs playing on the same day.
pub const FUZZY_THRESHOLD: f64 = 65.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Resolved(i64),
    Unresolved,
}

impl Resolution {
    pub fn match_id(&self) -> Option<i64> {
        match self {
            Resolution::Resolved(id) => Some(*id),
            Resolution::Unresolved => None,
        }
    }
}

/// Normalized string-similarity ratio on a 0-100 scale.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a.trim(), b.trim()) * 100.0
}

/// Map a (date, home, away) triple from a non-authoritative source to the
/// canonical match id. Steps short-circuit on first success:
/// alias substitution, exact name-on-date lookup, fuzzy fallback over all
/// matches on the date. `Unresolved` is an outcome, not an error; the
/// caller keeps the orphan record.
pub fn resolve_match_id(
    conn: &Connection,
    match_date: &str,
    home_team: &str,
    away_team: &str,
) -> Result<Resolution> {
    let home = normalize_name(conn, home_team)?;
    let away = normalize_name(conn, away_team)?;

    if let Some(id) = exact_match(conn, match_date, &home, &away)? {
        return Ok(Resolution::Resolved(id));
    }
    fuzzy_match(conn, match_date, &home, &away)
}

fn normalize_name(conn: &Connection, name: &str) -> Result<String> {
    Ok(db::lookup_team_alias(conn, name)?.unwrap_or_else(|| name.trim().to_string()))
}

fn exact_match(
    conn: &Connection,
    match_date: &str,
    home_team: &str,
    away_team: &str,
) -> Result<Option<i64>> {
    // Ties are not expected on a single date; first row in store order wins.
    conn.query_row(
        r#"
        SELECT match_id FROM matches
        WHERE match_date = ?1 AND (home_team = ?2 OR away_team = ?3)
        ORDER BY rowid ASC
        "#,
        params![match_date, home_team, away_team],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .context("exact match query")
}

fn fuzzy_match(
    conn: &Connection,
    match_date: &str,
    home_team: &str,
    away_team: &str,
) -> Result<Resolution> {
    let candidates = db::load_matches_on_date(conn, match_date)?;
    for candidate in &candidates {
        let home_similarity = similarity_ratio(home_team, &candidate.home_team);
        let away_similarity = similarity_ratio(away_team, &candidate.away_team);
        if home_similarity >= FUZZY_THRESHOLD || away_similarity >= FUZZY_THRESHOLD {
            return Ok(Resolution::Resolved(candidate.match_id));
        }
    }
    Ok(Resolution::Unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{StoredMatch, insert_match, open_in_memory};

    fn canonical_match(id: i64, date: &str, home: &str, away: &str) -> StoredMatch {
        StoredMatch {
            match_id: id,
            competition: "Bundesliga".to_string(),
            season: 2022,
            match_date: date.to_string(),
            match_time: None,
            home_team: home.to_string(),
            away_team: away.to_string(),
            home_goals: Some(1),
            away_goals: Some(0),
            status: Some("FT".to_string()),
            home_formation: None,
            away_formation: None,
        }
    }

    #[test]
    fn identical_names_score_one_hundred() {
        assert!((similarity_ratio("Bayern", "Bayern") - 100.0).abs() < 1e-9);
    }

    #[test]
    fn alias_then_exact_match_resolves() {
        let conn = open_in_memory().unwrap();
        insert_match(
            &conn,
            &canonical_match(10, "14.05.2022", "Borussia Dortmund", "FC Bayern München"),
        )
        .unwrap();

        // "Dortmund" is in the alias seed; the away spelling never matches
        // exactly but the home side alone is enough.
        let got = resolve_match_id(&conn, "14.05.2022", "Dortmund", "Bayern Munich").unwrap();
        assert_eq!(got, Resolution::Resolved(10));
    }

    #[test]
    fn fuzzy_fallback_resolves_near_miss() {
        let conn = open_in_memory().unwrap();
        insert_match(
            &conn,
            &canonical_match(11, "14.05.2022", "Hertha BSC", "1. FC Union Berlin"),
        )
        .unwrap();

        let got = resolve_match_id(&conn, "14.05.2022", "Hertha Berlin", "Union Berlin").unwrap();
        assert_eq!(got, Resolution::Resolved(11));
    }

    #[test]
    fn dissimilar_names_stay_unresolved() {
        let conn = open_in_memory().unwrap();
        insert_match(
            &conn,
            &canonical_match(12, "14.05.2022", "Borussia Dortmund", "FC Bayern München"),
        )
        .unwrap();

        let got = resolve_match_id(&conn, "14.05.2022", "Real Madrid", "Barcelona").unwrap();
        assert_eq!(got, Resolution::Unresolved);
    }

    #[test]
    fn wrong_date_stays_unresolved() {
        let conn = open_in_memory().unwrap();
        insert_match(
            &conn,
            &canonical_match(13, "14.05.2022", "Borussia Dortmund", "FC Bayern München"),
        )
        .unwrap();

        let got =
            resolve_match_id(&conn, "15.05.2022", "Borussia Dortmund", "FC Bayern München").unwrap();
        assert_eq!(got, Resolution::Unresolved);
    }

    #[test]
    fn both_naming_conventions_reach_the_same_match() {
        let conn = open_in_memory().unwrap();
        insert_match(
            &conn,
            &canonical_match(14, "14.05.2022", "Borussia Dortmund", "FC Bayern München"),
        )
        .unwrap();

        let via_alias = resolve_match_id(&conn, "14.05.2022", "Dortmund", "Bayern Munich").unwrap();
        let via_exact =
            resolve_match_id(&conn, "14.05.2022", "Borussia Dortmund", "FC Bayern München")
                .unwrap();
        assert_eq!(via_alias, via_exact);
        assert_eq!(via_alias, Resolution::Resolved(14));
    }
}
