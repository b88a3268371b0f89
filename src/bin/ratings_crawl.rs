use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::Local;

use footy_dataset::db::{self, MATCH_DATE_FMT};
use footy_dataset::ratings_crawl::{self, PlayerRatingProfile};
use footy_dataset::session::{CrawlSession, DelayPolicy};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let db_path = parse_path_arg("--db").unwrap_or_else(db::default_db_path);
    let profiles_path = parse_path_arg("--profiles");
    let players_path = parse_path_arg("--players");
    if profiles_path.is_none() && players_path.is_none() {
        return Err(anyhow!(
            "nothing to ingest: pass --profiles=FILE.json (rating profiles keyed by \
             player id) and/or --players=FILE.json (player-season statistics payload)"
        ));
    }
    let effective_date = parse_date_arg()
        .unwrap_or_else(|| Local::now().date_naive().format(MATCH_DATE_FMT).to_string());

    let mut session = CrawlSession::open(&db_path, DelayPolicy::none())?;
    println!("Ratings ingest");
    println!("DB: {}", db_path.display());

    if let Some(profiles_path) = profiles_path {
        let raw = fs::read_to_string(&profiles_path)
            .with_context(|| format!("read {}", profiles_path.display()))?;
        let profiles: HashMap<i64, PlayerRatingProfile> =
            serde_json::from_str(&raw).context("decode rating profiles json")?;

        let summary = ratings_crawl::crawl_ratings(&mut session, &effective_date, |player| {
            Ok(profiles.get(&player.player_id).cloned())
        })?;

        println!("Effective date: {effective_date}");
        println!(
            "Players: {} inserted={} skipped={} missing={} failed={}",
            summary.players_total,
            summary.snapshots_inserted,
            summary.snapshots_skipped,
            summary.profiles_missing,
            summary.fetches_failed,
        );
        if !summary.errors.is_empty() {
            println!("Errors: {}", summary.errors.len());
            for err in summary.errors.iter().take(10) {
                println!("   - {err}");
            }
        }
    }

    if let Some(players_path) = players_path {
        let raw = fs::read_to_string(&players_path)
            .with_context(|| format!("read {}", players_path.display()))?;
        let written = ratings_crawl::ingest_player_season_json(&session.conn, &raw)?;
        println!("Player-season statistic rows written: {written}");
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

fn parse_date_arg() -> Option<String> {
    for arg in std::env::args().skip(1) {
        if let Some(raw) = arg.strip_prefix("--date=") {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}
