//! Pipeline runner
//!
//! Entry points for the three run modes and the result they produce:
//! - `check`: change detection only
//! - `acquire`: retrieval of new and flagged sources
//! - `run`: both, per source
//!
//! Document conversion is outside this crate; it plugs in through the
//! [`ContentParser`] trait.

mod content;
mod result;
mod runner;
mod worker;

pub use content::{ChecksumParser, ContentParser, ParsedContent};
pub use result::{PipelineRunResult, RunMode, RunOptions};
pub use runner::PipelineRunner;
