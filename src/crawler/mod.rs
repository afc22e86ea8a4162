//! Crawler module for page retrieval and multi-page crawls
//!
//! This module contains the network-facing half of the pipeline:
//! - `fetcher`: single GET and HEAD requests with failure classification
//! - `parser`: link discovery in fetched HTML
//! - `session`: the resumable crawl loop over a source's frontier

mod fetcher;
mod parser;
mod session;

pub use fetcher::{
    build_http_client, FetchFailure, FetchedPage, Fetcher, HeaderProbe, ProbeOutcome,
};
pub use parser::{extract_links, is_html};
pub use session::{CrawlSession, SeedValidators, SessionReport, StopReason};
