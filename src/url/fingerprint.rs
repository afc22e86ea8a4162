use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// Fixed-size identity of a normalized URL or a body of content
///
/// Fingerprints are SHA-256 digests. URL fingerprints must be taken from a
/// normalized URL (see [`normalize_url`](crate::url::normalize_url)) so that
/// equivalent spellings of one address collapse to the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint of a normalized URL
    pub fn of_url(url: &Url) -> Self {
        Self::of_bytes(url.as_str().as_bytes())
    }

    /// Fingerprint of arbitrary bytes
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// Lowercase hex form, used for persistence and header-free comparisons
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses the hex form produced by [`to_hex`](Self::to_hex)
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Stable key for a source, derived from its URL
///
/// The first 16 hex characters of SHA-256 over the URL text. Crawl state is
/// stored under this key.
pub fn source_key(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(&digest[..8])
}

/// Hex SHA-256 of a response body
pub fn content_checksum(body: &[u8]) -> String {
    Fingerprint::of_bytes(body).to_hex()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::normalize_url;

    #[test]
    fn test_same_url_same_fingerprint() {
        let a = normalize_url("https://example.com/docs/").unwrap();
        let b = normalize_url("https://example.com/docs/").unwrap();
        assert_eq!(Fingerprint::of_url(&a), Fingerprint::of_url(&b));
    }

    #[test]
    fn test_fragment_and_default_port_fingerprint_identically() {
        let plain = normalize_url("https://example.com/docs/intro").unwrap();
        let fragment = normalize_url("https://example.com/docs/intro#install").unwrap();
        let port = normalize_url("https://example.com:443/docs/intro").unwrap();
        let http_port = normalize_url("http://example.com:80/docs/intro").unwrap();
        let http = normalize_url("http://example.com/docs/intro").unwrap();

        let fp = Fingerprint::of_url(&plain);
        assert_eq!(fp, Fingerprint::of_url(&fragment));
        assert_eq!(fp, Fingerprint::of_url(&port));
        assert_eq!(Fingerprint::of_url(&http), Fingerprint::of_url(&http_port));
    }

    #[test]
    fn test_different_paths_differ() {
        let a = normalize_url("https://example.com/a").unwrap();
        let b = normalize_url("https://example.com/b").unwrap();
        assert_ne!(Fingerprint::of_url(&a), Fingerprint::of_url(&b));
    }

    #[test]
    fn test_hex_roundtrip() {
        let fp = Fingerprint::of_bytes(b"hello");
        assert_eq!(fp.to_hex().len(), 64);
        assert_eq!(Fingerprint::from_hex(&fp.to_hex()), Some(fp));
        assert_eq!(Fingerprint::from_hex("zz"), None);
        assert_eq!(Fingerprint::from_hex("abcd"), None);
    }

    #[test]
    fn test_source_key_is_short_and_stable() {
        let key = source_key("https://example.com/docs/");
        assert_eq!(key.len(), 16);
        assert_eq!(key, source_key("https://example.com/docs/"));
        assert_ne!(key, source_key("https://example.com/blog/"));
    }

    #[test]
    fn test_content_checksum() {
        assert_eq!(
            content_checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
