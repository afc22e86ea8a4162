use crate::url::domain::registrable_domain;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Boundary restricting which discovered links a crawl may follow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// Same host, and the path must sit under the source's path
    Path,
    /// Exact host match
    Host,
    /// Any host sharing the source's registrable domain
    Domain,
}

impl ScopeKind {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Host => "host",
            Self::Domain => "domain",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "path" => Some(Self::Path),
            "host" => Some(Self::Host),
            "domain" => Some(Self::Domain),
            _ => None,
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl FromStr for ScopeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(&s.to_ascii_lowercase())
            .ok_or_else(|| format!("unknown scope '{}', expected path, host or domain", s))
    }
}

/// Decides whether `candidate` lies inside the boundary drawn around `source`
///
/// Both URLs are expected to be normalized.
///
/// * `Path`: same scheme and host (and port, when the source names one); the
///   candidate path equals the source path or continues it after a `/`.
///   A root source path admits the whole host.
/// * `Host`: the hosts are identical.
/// * `Domain`: the hosts share a registrable domain, so subdomains are admitted.
///
/// # Examples
///
/// ```
/// use source_sentinel::url::{is_in_scope, normalize_url, ScopeKind};
///
/// let source = normalize_url("https://example.com/docs/").unwrap();
/// let guide = normalize_url("https://example.com/docs/guide").unwrap();
/// let blog = normalize_url("https://example.com/blog/").unwrap();
/// assert!(is_in_scope(&guide, &source, ScopeKind::Path));
/// assert!(!is_in_scope(&blog, &source, ScopeKind::Path));
/// ```
pub fn is_in_scope(candidate: &Url, source: &Url, scope: ScopeKind) -> bool {
    let (Some(candidate_host), Some(source_host)) = (candidate.host_str(), source.host_str())
    else {
        return false;
    };
    let candidate_host = candidate_host.to_lowercase();
    let source_host = source_host.to_lowercase();

    match scope {
        ScopeKind::Host => candidate_host == source_host,
        ScopeKind::Domain => {
            registrable_domain(&candidate_host) == registrable_domain(&source_host)
        }
        ScopeKind::Path => {
            if candidate.scheme() != source.scheme() || candidate_host != source_host {
                return false;
            }
            if source.port().is_some() && candidate.port() != source.port() {
                return false;
            }
            path_within(candidate.path(), source.path())
        }
    }
}

fn path_within(candidate: &str, source: &str) -> bool {
    let base = source.trim_end_matches('/');
    if base.is_empty() {
        return true;
    }
    let candidate_trimmed = candidate.trim_end_matches('/');
    candidate_trimmed == base
        || candidate
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('/'))
}
