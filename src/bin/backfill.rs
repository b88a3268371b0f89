use std::path::PathBuf;

use anyhow::{Result, anyhow};

use footy_dataset::db;
use footy_dataset::fixtures_crawl::{self, ApiConfig};
use footy_dataset::session::{CrawlSession, DelayPolicy};

const DEFAULT_COMPETITIONS: &[(&str, u32)] = &[("Bundesliga", 78), ("2. Bundesliga", 79)];
const DEFAULT_SEASONS: &[i64] = &[2016, 2017, 2018, 2019, 2020, 2021, 2022];

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let db_path = parse_db_path_arg().unwrap_or_else(db::default_db_path);
    let competitions = parse_competitions_arg().unwrap_or_else(|| {
        DEFAULT_COMPETITIONS
            .iter()
            .map(|(name, id)| (name.to_string(), *id))
            .collect()
    });
    let seasons = parse_seasons_arg().unwrap_or_else(|| DEFAULT_SEASONS.to_vec());
    if seasons.is_empty() {
        return Err(anyhow!("no seasons resolved for backfill"));
    }

    let cfg = ApiConfig::from_env()?;
    let delay = DelayPolicy::from_env("FIXTURES", 400, 1200);
    let mut session = CrawlSession::open(&db_path, delay)?;

    println!("Fixture backfill starting");
    println!("DB: {}", db_path.display());
    println!("Detail batch cap: {}", cfg.detail_batch_cap);

    let mut units_failed = 0usize;
    for (competition, api_id) in &competitions {
        for season in &seasons {
            match fixtures_crawl::crawl_competition_season(
                &mut session,
                &cfg,
                competition,
                *api_id,
                *season,
            ) {
                Ok(summary) => {
                    println!(
                        "{} {}: listed={} inserted={} skipped={} details persisted={} skipped={} failed={}",
                        summary.competition,
                        summary.season,
                        summary.fixtures_listed,
                        summary.matches_inserted,
                        summary.matches_skipped,
                        summary.details_persisted,
                        summary.details_skipped,
                        summary.details_failed,
                    );
                    for err in summary.errors.iter().take(6) {
                        println!("   - {err}");
                    }
                }
                Err(err) => {
                    units_failed += 1;
                    println!("{competition} {season}: failed: {err:#}");
                }
            }
        }
    }

    println!(
        "Backfill complete ({}/{} units ok)",
        competitions.len() * seasons.len() - units_failed,
        competitions.len() * seasons.len()
    );
    Ok(())
}

fn parse_db_path_arg() -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix("--db=") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == "--db"
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(PathBuf::from(next));
        }
    }
    None
}

/// `--league=Bundesliga:78` may repeat; each adds one competition.
fn parse_competitions_arg() -> Option<Vec<(String, u32)>> {
    let mut out = Vec::new();
    for arg in std::env::args().skip(1) {
        let Some(raw) = arg.strip_prefix("--league=") else {
            continue;
        };
        let Some((name, id)) = raw.rsplit_once(':') else {
            continue;
        };
        if let Ok(id) = id.trim().parse::<u32>()
            && !name.trim().is_empty()
        {
            out.push((name.trim().to_string(), id));
        }
    }
    (!out.is_empty()).then_some(out)
}

/// `--seasons=2019,2020,2021` or a single `--seasons=2022`.
fn parse_seasons_arg() -> Option<Vec<i64>> {
    for arg in std::env::args().skip(1) {
        let Some(raw) = arg.strip_prefix("--seasons=") else {
            continue;
        };
        let seasons = raw
            .split(',')
            .filter_map(|s| s.trim().parse::<i64>().ok())
            .collect::<Vec<_>>();
        if !seasons.is_empty() {
            return Some(seasons);
        }
    }
    None
}
