use anyhow::Result;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::db::{self, OddsRow};
use crate::resolve::{self, Resolution};
use crate::session::CrawlSession;

/// Result listings on the odds site are paginated; the historical crawl
/// walks this fixed range per season.
pub const RESULT_PAGES: std::ops::RangeInclusive<u32> = 1..=9;

/// One candidate match block as handed over by the scrape layer. This is
/// the inbound contract: the core never touches markup, only these fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsPageBlock {
    pub date_text: String,
    #[serde(default)]
    pub time_text: Option<String>,
    pub home_team: String,
    pub away_team: String,
    pub home_odds: String,
    pub draw_odds: String,
    pub away_odds: String,
    #[serde(default)]
    pub href: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct OddsIngestSummary {
    pub blocks_seen: usize,
    pub rows_inserted: usize,
    pub rows_duplicate: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub skipped_bad_date: usize,
    pub errors: Vec<String>,
}

impl OddsIngestSummary {
    fn absorb(&mut self, other: OddsIngestSummary) {
        self.blocks_seen += other.blocks_seen;
        self.rows_inserted += other.rows_inserted;
        self.rows_duplicate += other.rows_duplicate;
        self.resolved += other.resolved;
        self.unresolved += other.unresolved;
        self.skipped_bad_date += other.skipped_bad_date;
        self.errors.extend(other.errors);
    }
}

/// Normalize the listing's date label to the canonical `%d.%m.%Y` form.
/// The site uses relative labels around the current day; `today` is
/// injected so the conversion is reproducible.
pub fn parse_block_date(raw: &str, today: NaiveDate) -> Option<String> {
    let cleaned = raw.trim().replace(" - Relegation", "");
    let cleaned = cleaned.trim();
    if cleaned.contains("Yesterday") {
        return Some(db::format_match_date(today - Duration::days(1)));
    }
    if cleaned.contains("Today") {
        return Some(db::format_match_date(today));
    }
    if cleaned.contains("Tomorrow") {
        return Some(db::format_match_date(today + Duration::days(1)));
    }
    NaiveDate::parse_from_str(cleaned, "%d %b %Y")
        .ok()
        .map(db::format_match_date)
}

/// Odds cells occasionally hold a dash for a market the site never opened.
pub fn parse_odds_value(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "-" {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| *v > 1.0)
}

/// Ingest one page worth of scraped blocks: resolve each block against the
/// canonical match set and persist the odds row either way. Resolution
/// failure retains the row with a NULL match id and surfaces the inputs in
/// the summary for later alias-table extension.
pub fn ingest_blocks(
    session: &mut CrawlSession,
    blocks: &[OddsPageBlock],
    today: NaiveDate,
) -> Result<OddsIngestSummary> {
    let mut summary = OddsIngestSummary {
        blocks_seen: blocks.len(),
        ..Default::default()
    };

    for block in blocks {
        let Some(match_date) = parse_block_date(&block.date_text, today) else {
            summary.skipped_bad_date += 1;
            summary
                .errors
                .push(format!("unparseable date {:?}", block.date_text));
            continue;
        };

        let resolution = resolve::resolve_match_id(
            &session.conn,
            &match_date,
            &block.home_team,
            &block.away_team,
        )?;
        match resolution {
            Resolution::Resolved(_) => summary.resolved += 1,
            Resolution::Unresolved => {
                summary.unresolved += 1;
                summary.errors.push(format!(
                    "unresolved: {} vs {} on {}",
                    block.home_team, block.away_team, match_date
                ));
            }
        }

        let row = OddsRow {
            match_id: resolution.match_id(),
            match_date,
            home_team_name: block.home_team.trim().to_string(),
            away_team_name: block.away_team.trim().to_string(),
            home_odds: parse_odds_value(&block.home_odds),
            draw_odds: parse_odds_value(&block.draw_odds),
            away_odds: parse_odds_value(&block.away_odds),
            source_href: block.href.clone(),
        };
        if db::insert_odds_row(&session.conn, &row)? {
            summary.rows_inserted += 1;
        } else {
            summary.rows_duplicate += 1;
        }
    }

    Ok(summary)
}

/// Drive the paginated crawl for one listing (a season's results). The
/// fetch closure belongs to the scrape layer; a failed page is logged and
/// skipped, never fatal to the batch. Duplicate rows make re-runs cheap.
pub fn crawl_results_pages<F>(
    session: &mut CrawlSession,
    today: NaiveDate,
    mut fetch_page: F,
) -> Result<OddsIngestSummary>
where
    F: FnMut(u32) -> Result<Vec<OddsPageBlock>>,
{
    let mut summary = OddsIngestSummary::default();
    let run_id = db::start_crawl_run(&session.conn, "odds_site", RESULT_PAGES.count())?;

    let mut pages_failed = 0usize;
    for page in RESULT_PAGES {
        if page > 1 {
            session.delay.sleep_jittered();
        }
        match fetch_page(page) {
            Ok(blocks) => {
                let page_summary = ingest_blocks(session, &blocks, today)?;
                summary.absorb(page_summary);
            }
            Err(err) => {
                pages_failed += 1;
                summary.errors.push(format!("page {page}: {err:#}"));
            }
        }
    }

    db::finish_crawl_run(
        &session.conn,
        run_id,
        summary.rows_inserted,
        summary.rows_duplicate,
        pages_failed,
        &summary.errors,
    )?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 5, 15).unwrap()
    }

    #[test]
    fn relative_dates_resolve_against_today() {
        assert_eq!(
            parse_block_date("Yesterday, 14 May", today()).as_deref(),
            Some("14.05.2022")
        );
        assert_eq!(
            parse_block_date("Today", today()).as_deref(),
            Some("15.05.2022")
        );
        assert_eq!(
            parse_block_date("Tomorrow", today()).as_deref(),
            Some("16.05.2022")
        );
    }

    #[test]
    fn absolute_dates_parse_and_reformat() {
        assert_eq!(
            parse_block_date("14 May 2022", today()).as_deref(),
            Some("14.05.2022")
        );
        assert_eq!(
            parse_block_date("14 May 2022 - Relegation", today()).as_deref(),
            Some("14.05.2022")
        );
        assert_eq!(parse_block_date("not a date", today()), None);
    }

    #[test]
    fn dash_odds_are_absent_not_zero() {
        assert_eq!(parse_odds_value("2.45"), Some(2.45));
        assert_eq!(parse_odds_value("-"), None);
        assert_eq!(parse_odds_value(""), None);
        assert_eq!(parse_odds_value("0.5"), None);
    }
}
