use crate::UrlError;
use url::{form_urlencoded, Url};

/// Query parameters that only carry tracking data and never select content
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "ref"];

/// Normalizes a URL into its canonical form
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not HTTP(S)
/// 2. Lowercase the host
/// 3. Remove the port when it is the scheme's default
/// 4. Collapse redundant path segments (`//`, `.` and `..`); an empty path becomes `/`
/// 5. Remove the fragment
/// 6. Remove tracking query parameters and sort the remaining ones
/// 7. Remove an empty query string
///
/// The trailing slash is preserved: `/docs/` and `/docs` may be different
/// resources and scope checks depend on the distinction.
///
/// Normalization is idempotent: normalizing an already normalized URL returns it unchanged.
///
/// # Arguments
///
/// * `url_str` - The URL string to normalize
///
/// # Returns
///
/// * `Ok(Url)` - Normalized URL
/// * `Err(UrlError)` - Failed to parse or normalize the URL
///
/// # Examples
///
/// ```
/// use source_sentinel::url::normalize_url;
///
/// let url = normalize_url("HTTP://Example.COM:80/a//b/../c?b=2&a=1#top").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/a/c?a=1&b=2");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;
    normalize_parsed(url)
}

/// Normalizes an already parsed URL
///
/// Used for links resolved against a page's base URL.
pub fn normalize_parsed(mut url: Url) -> Result<Url, UrlError> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = url.host_str().ok_or(UrlError::MissingHost)?.to_lowercase();
    if host.is_empty() {
        return Err(UrlError::MissingHost);
    }
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let default_port = match url.scheme() {
        "http" => 80,
        _ => 443,
    };
    if url.port() == Some(default_port) {
        url.set_port(None)
            .map_err(|_| UrlError::Malformed("Failed to drop default port".to_string()))?;
    }

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if let Some(query) = url.query().map(str::to_string) {
        let params = filter_and_sort_query_params(&query);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&params.join("&")));
        }
    }

    Ok(url)
}

/// Collapses empty, `.` and `..` segments while keeping a trailing slash
fn normalize_path(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_string();
    }

    let raw_segments: Vec<&str> = path.split('/').collect();
    let directory_like = matches!(raw_segments.last(), Some(&"") | Some(&".") | Some(&".."));

    let mut segments: Vec<&str> = Vec::new();
    for segment in raw_segments {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut result = format!("/{}", segments.join("/"));
    if directory_like {
        result.push('/');
    }
    result
}

/// Filters out tracking parameters and sorts the remaining ones
///
/// Pairs are kept as written: re-encoding would change the request sent to
/// the origin.
fn filter_and_sort_query_params(query: &str) -> Vec<&str> {
    let mut params: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or_default();
            let decoded = form_urlencoded::parse(key.as_bytes())
                .next()
                .map(|(k, _)| k.into_owned())
                .unwrap_or_default();
            !is_tracking_param(&decoded)
        })
        .collect();

    params.sort_unstable();
    params
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
