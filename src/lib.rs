//! Historical football-match dataset assembly: incremental crawls of a
//! fixtures API, an odds site and a player-rating site into one SQLite
//! store, cross-source identity resolution, and temporally-ordered
//! feature derivation for model training.

pub mod dataset;
pub mod db;
pub mod features;
pub mod fixtures_crawl;
pub mod http_client;
pub mod odds_crawl;
pub mod ratings_crawl;
pub mod resolve;
pub mod schema_evolve;
pub mod session;
