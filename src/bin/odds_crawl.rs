use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::{Local, NaiveDate};

use footy_dataset::db::{self, MATCH_DATE_FMT};
use footy_dataset::odds_crawl::{self, OddsPageBlock};
use footy_dataset::session::{CrawlSession, DelayPolicy};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let db_path = parse_path_arg("--db").unwrap_or_else(db::default_db_path);
    let blocks_path = parse_path_arg("--blocks")
        .ok_or_else(|| anyhow!("--blocks=FILE.json (scraped odds blocks) is required"))?;
    let today = parse_today_arg()?.unwrap_or_else(|| Local::now().date_naive());

    let raw = fs::read_to_string(&blocks_path)
        .with_context(|| format!("read {}", blocks_path.display()))?;
    let blocks: Vec<OddsPageBlock> =
        serde_json::from_str(&raw).context("decode odds blocks json")?;

    let mut session = CrawlSession::open(&db_path, DelayPolicy::none())?;
    let summary = odds_crawl::ingest_blocks(&mut session, &blocks, today)?;

    println!("Odds ingest complete");
    println!("DB: {}", db_path.display());
    println!(
        "Blocks: {} inserted={} duplicate={} bad-date={}",
        summary.blocks_seen, summary.rows_inserted, summary.rows_duplicate, summary.skipped_bad_date
    );
    println!(
        "Resolution: {} resolved, {} unresolved",
        summary.resolved, summary.unresolved
    );
    let unresolved_total = db::count_unresolved_odds(&session.conn)?;
    if unresolved_total > 0 {
        println!("Unresolved odds rows in store: {unresolved_total}");
    }
    if !summary.errors.is_empty() {
        println!("Errors: {}", summary.errors.len());
        for err in summary.errors.iter().take(10) {
            println!("   - {err}");
        }
    }
    Ok(())
}

fn parse_path_arg(flag: &str) -> Option<PathBuf> {
    let prefix = format!("{flag}=");
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix(&prefix) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == flag
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(PathBuf::from(next));
        }
    }
    None
}

/// `--today=14.05.2022` pins the reference day for the site's relative
/// date labels, so archived pages re-ingest deterministically.
fn parse_today_arg() -> Result<Option<NaiveDate>> {
    for arg in std::env::args().skip(1) {
        let Some(raw) = arg.strip_prefix("--today=") else {
            continue;
        };
        let date = NaiveDate::parse_from_str(raw.trim(), MATCH_DATE_FMT)
            .with_context(|| format!("--today must be {MATCH_DATE_FMT}, got {raw:?}"))?;
        return Ok(Some(date));
    }
    Ok(None)
}
