use std::fs;
use std::path::PathBuf;

use chrono::NaiveDate;

use footy_dataset::db::{self, StoredMatch};
use footy_dataset::odds_crawl::{self, OddsPageBlock};
use footy_dataset::session::CrawlSession;

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

fn canonical_match(id: i64, date: &str, home: &str, away: &str, goals: (i64, i64)) -> StoredMatch {
    StoredMatch {
        match_id: id,
        competition: "Bundesliga".to_string(),
        season: 2021,
        match_date: date.to_string(),
        match_time: Some("15:30".to_string()),
        home_team: home.to_string(),
        away_team: away.to_string(),
        home_goals: Some(goals.0),
        away_goals: Some(goals.1),
        status: Some("FT".to_string()),
        home_formation: None,
        away_formation: None,
    }
}

/// The three resolution paths plus the unresolved outcome, driven through
/// the same ingest entry point the crawl binary uses.
#[test]
fn odds_blocks_resolve_via_alias_exact_and_fuzzy() {
    let mut session = CrawlSession::in_memory().expect("in-memory session");
    for m in [
        canonical_match(719405, "14.05.2022", "Borussia Dortmund", "VfB Stuttgart", (2, 1)),
        canonical_match(719406, "14.05.2022", "FC Bayern München", "VfL Wolfsburg", (2, 2)),
        canonical_match(719410, "14.05.2022", "1. FC Union Berlin", "VfL Bochum", (3, 2)),
    ] {
        db::insert_match(&session.conn, &m).expect("insert canonical match");
    }

    let blocks: Vec<OddsPageBlock> =
        serde_json::from_str(&read_fixture("odds_blocks.json")).expect("blocks decode");
    let today = NaiveDate::from_ymd_opt(2022, 5, 15).unwrap();
    let summary = odds_crawl::ingest_blocks(&mut session, &blocks, today).expect("ingest");

    assert_eq!(summary.blocks_seen, 4);
    // Dortmund/Stuttgart via alias table, Bayern/Wolfsburg exactly,
    // Union Berlin via similarity; Real Madrid has no canonical match.
    assert_eq!(summary.resolved, 3);
    assert_eq!(summary.unresolved, 1);
    assert_eq!(summary.rows_inserted, 4);

    let resolved = db::load_resolved_odds(&session.conn).expect("load odds");
    let mut ids: Vec<i64> = resolved.iter().filter_map(|r| r.match_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![719405, 719406, 719410]);

    // The unresolved row is retained, not dropped.
    assert_eq!(db::count_unresolved_odds(&session.conn).expect("count"), 1);
    let unresolved = summary
        .errors
        .iter()
        .find(|e| e.contains("Real Madrid"))
        .expect("unresolved inputs surfaced");
    assert!(unresolved.contains("14.05.2022"));
}

#[test]
fn reingesting_the_same_blocks_is_a_noop() {
    let mut session = CrawlSession::in_memory().expect("in-memory session");
    db::insert_match(
        &session.conn,
        &canonical_match(719405, "14.05.2022", "Borussia Dortmund", "VfB Stuttgart", (2, 1)),
    )
    .expect("insert canonical match");

    let blocks: Vec<OddsPageBlock> =
        serde_json::from_str(&read_fixture("odds_blocks.json")).expect("blocks decode");
    let today = NaiveDate::from_ymd_opt(2022, 5, 15).unwrap();

    let first = odds_crawl::ingest_blocks(&mut session, &blocks, today).expect("first ingest");
    assert_eq!(first.rows_inserted, 4);

    let second = odds_crawl::ingest_blocks(&mut session, &blocks, today).expect("second ingest");
    assert_eq!(second.rows_inserted, 0);
    assert_eq!(second.rows_duplicate, 4);
}

#[test]
fn page_failures_skip_without_aborting_the_crawl() {
    let mut session = CrawlSession::in_memory().expect("in-memory session");
    db::insert_match(
        &session.conn,
        &canonical_match(719405, "14.05.2022", "Borussia Dortmund", "VfB Stuttgart", (2, 1)),
    )
    .expect("insert canonical match");

    let blocks: Vec<OddsPageBlock> =
        serde_json::from_str(&read_fixture("odds_blocks.json")).expect("blocks decode");
    let today = NaiveDate::from_ymd_opt(2022, 5, 15).unwrap();

    let summary = odds_crawl::crawl_results_pages(&mut session, today, |page| match page {
        1 => Ok(blocks.clone()),
        2 => Err(anyhow::anyhow!("503 from upstream")),
        _ => Ok(Vec::new()),
    })
    .expect("crawl");

    // Page 2 failed but every other page was still ingested.
    assert_eq!(summary.rows_inserted, 4);
    assert_eq!(summary.resolved, 1);
    assert!(summary.errors.iter().any(|e| e.contains("page 2")));
}

#[test]
fn alias_added_at_runtime_resolves_later_rows() {
    let mut session = CrawlSession::in_memory().expect("in-memory session");
    db::insert_match(
        &session.conn,
        &canonical_match(900, "07.05.2022", "Eintracht Frankfurt", "FSV Mainz 05", (1, 1)),
    )
    .expect("insert canonical match");

    let block = OddsPageBlock {
        date_text: "07 May 2022".to_string(),
        time_text: None,
        home_team: "Ein. Frankfurt".to_string(),
        away_team: "FC Mainz".to_string(),
        home_odds: "2.10".to_string(),
        draw_odds: "3.40".to_string(),
        away_odds: "3.50".to_string(),
        href: None,
    };

    // Similarity alone reaches the match through the home side.
    let today = NaiveDate::from_ymd_opt(2022, 5, 8).unwrap();
    let summary =
        odds_crawl::ingest_blocks(&mut session, &[block.clone()], today).expect("ingest");
    assert_eq!(summary.resolved, 1);

    // An operator-added alias makes the mapping exact for future sources.
    db::add_team_alias(&session.conn, "Ein. Frankfurt", "Eintracht Frankfurt").expect("add alias");
    let resolution = footy_dataset::resolve::resolve_match_id(
        &session.conn,
        "07.05.2022",
        "Ein. Frankfurt",
        "FC Mainz",
    )
    .expect("resolve");
    assert_eq!(resolution.match_id(), Some(900));
}
