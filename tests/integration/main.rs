//! Integration tests for the content pipeline
//!
//! These tests use wiremock to stand in for origin servers and a temporary
//! SQLite database for the registry, and drive complete runs end to end.
//! Fetch limits are tested against a raw TCP server that streams chunked
//! bodies, which wiremock cannot produce.

mod common;
mod crawl_tests;
mod detection_tests;
mod fetch_tests;
mod run_tests;
