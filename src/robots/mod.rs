//! Robots.txt handling module
//!
//! This module provides functionality for fetching, parsing, and caching
//! robots.txt files. Rules are resolved for our user agent once per origin
//! and per session; `allowed` is then a pure lookup.

mod gate;
mod parser;

pub use gate::RobotsGate;
pub use parser::{pattern_matches, RobotsRuleSet};
