//! URL handling module
//!
//! This module provides URL normalization, fingerprinting, domain extraction
//! and scope validation.

mod domain;
mod fingerprint;
mod normalize;
mod scope;

pub use domain::{domain_key, extract_domain, registrable_domain};
pub use fingerprint::{content_checksum, source_key, Fingerprint};
pub use normalize::{normalize_parsed, normalize_url};
pub use scope::{is_in_scope, ScopeKind};
