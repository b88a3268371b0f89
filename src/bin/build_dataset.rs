use std::path::PathBuf;

use anyhow::Result;

use footy_dataset::dataset::{self, BetTarget};
use footy_dataset::db;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let db_path = parse_path_arg("--db").unwrap_or_else(db::default_db_path);
    let out_path = parse_path_arg("--out").unwrap_or_else(|| PathBuf::from("features.csv"));

    let conn = db::open_db(&db_path)?;
    let rows = dataset::assemble(&conn)?;
    dataset::write_csv(&rows, &out_path)?;

    println!("Dataset written");
    println!("DB: {}", db_path.display());
    println!("Out: {}", out_path.display());
    println!("Rows: {}", rows.len());

    // Flat-stake baselines over the assembled table, 10 units a bet.
    for (label, target) in [
        ("favorite", BetTarget::Favorite),
        ("underdog", BetTarget::Underdog),
        ("draw", BetTarget::Draw),
    ] {
        println!(
            "always-{label} margin: {:+.2}",
            dataset::flat_margin(&rows, target, 10.0)
        );
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
