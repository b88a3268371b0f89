use std::collections::BTreeMap;
use std::hint::black_box;

use chrono::NaiveDate;
use criterion::{Criterion, criterion_group, criterion_main};

use footy_dataset::db::MatchResult;
use footy_dataset::features::{
    MatchRecord, ROLLING_WINDOW, compute_rolling_averages, compute_streaks,
};
use footy_dataset::resolve::similarity_ratio;

const TEAMS: &[&str] = &[
    "Borussia Dortmund",
    "FC Bayern München",
    "VfB Stuttgart",
    "VfL Wolfsburg",
    "Bayer Leverkusen",
    "Eintracht Frankfurt",
    "1. FC Union Berlin",
    "SC Freiburg",
    "FC Augsburg",
    "FSV Mainz 05",
    "Hertha BSC",
    "VfL Bochum",
    "TSG Hoffenheim",
    "1. FC Köln",
    "RB Leipzig",
    "Borussia Mönchengladbach",
    "Arminia Bielefeld",
    "SpVgg Greuther Fürth",
];

/// Six synthetic seasons of a round-robin league, with deterministic
/// pseudo-random results and statistics.
fn synthetic_history() -> Vec<MatchRecord> {
    let mut records = Vec::new();
    let mut match_id = 1i64;
    for season in 2017..2023 {
        let start = NaiveDate::from_ymd_opt(season as i32, 8, 1).expect("valid date");
        let mut round = 0i64;
        for (i, home) in TEAMS.iter().enumerate() {
            for (j, away) in TEAMS.iter().enumerate() {
                if i == j {
                    continue;
                }
                let seed = match_id * 2654435761 % 97;
                let (home_goals, away_goals) = ((seed % 4), (seed / 4 % 3));
                let mut home_stats = BTreeMap::new();
                let mut away_stats = BTreeMap::new();
                for metric in ["fouls", "corner_kicks", "shots_on_goal", "ball_possession"] {
                    home_stats.insert(metric.to_string(), Some((seed % 23) as f64));
                    away_stats.insert(
                        metric.to_string(),
                        (seed % 7 != 0).then_some((seed % 17) as f64),
                    );
                }
                records.push(MatchRecord {
                    match_id,
                    season,
                    date: start + chrono::Duration::days(round / 9 * 7),
                    home_team: home.to_string(),
                    away_team: away.to_string(),
                    result: MatchResult::from_goals(home_goals, away_goals),
                    home_stats,
                    away_stats,
                });
                match_id += 1;
                round += 1;
            }
        }
    }
    records
}

fn bench_streaks(c: &mut Criterion) {
    let records = synthetic_history();
    c.bench_function("compute_streaks", |b| {
        b.iter(|| {
            let streaks = compute_streaks(black_box(&records));
            black_box(streaks.len());
        })
    });
}

fn bench_rolling_averages(c: &mut Criterion) {
    let records = synthetic_history();
    c.bench_function("compute_rolling_averages", |b| {
        b.iter(|| {
            let rolling = compute_rolling_averages(black_box(&records), ROLLING_WINDOW);
            black_box(rolling.len());
        })
    });
}

fn bench_similarity_scan(c: &mut Criterion) {
    c.bench_function("similarity_scan", |b| {
        b.iter(|| {
            let mut best = 0.0f64;
            for team in TEAMS {
                let score = similarity_ratio(black_box("Union Berlin"), team);
                if score > best {
                    best = score;
                }
            }
            black_box(best);
        })
    });
}

criterion_group!(
    benches,
    bench_streaks,
    bench_rolling_averages,
    bench_similarity_scan
);
criterion_main!(benches);
