use std::net::IpAddr;
use url::Url;

/// Public suffixes made of two labels that this crate recognises
///
/// Without a full public suffix list, `bbc.co.uk` would otherwise collapse to
/// `co.uk` and every UK site would share one politeness budget.
const MULTI_PART_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "gov.uk", "ac.uk", "com.au", "org.au", "gov.au", "edu.au", "co.nz",
    "org.nz", "gov.nz", "co.jp", "or.jp", "go.jp", "com.br", "org.br", "gov.br", "co.in",
    "org.in", "gov.in",
];

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use source_sentinel::url::extract_domain;
///
/// let url = Url::parse("https://Docs.Example.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("docs.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns the registrable domain of a host
///
/// The registrable domain is the public suffix plus one label:
/// `docs.example.com` → `example.com`, `news.bbc.co.uk` → `bbc.co.uk`.
/// IP addresses and single-label hosts such as `localhost` are returned unchanged.
///
/// # Examples
///
/// ```
/// use source_sentinel::url::registrable_domain;
///
/// assert_eq!(registrable_domain("a.b.example.org"), "example.org");
/// assert_eq!(registrable_domain("www.gov.uk"), "www.gov.uk");
/// assert_eq!(registrable_domain("127.0.0.1"), "127.0.0.1");
/// ```
pub fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_lowercase();
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() {
        return host;
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }

    let last_two = labels[labels.len() - 2..].join(".");
    let keep = if MULTI_PART_SUFFIXES.contains(&last_two.as_str()) {
        3
    } else {
        2
    };

    labels[labels.len() - keep..].join(".")
}

/// Key used to group work by origin operator
///
/// Two URLs share a key when their hosts share a registrable domain; politeness
/// limits are enforced per key.
pub fn domain_key(url: &Url) -> String {
    extract_domain(url)
        .map(|host| registrable_domain(&host))
        .unwrap_or_default()
}
