//! Boundary to the document conversion layer
//!
//! The pipeline hands every fetched body to a `ContentParser` and keeps only
//! the checksum and success/failure it returns.

use crate::url::content_checksum;
use url::Url;

/// What a parser returns for an accepted document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedContent {
    /// Reference to the stored document, if the parser keeps one
    pub document_ref: Option<String>,
    /// Checksum driving change-detection bookkeeping
    pub checksum: String,
}

/// Converts fetched bytes into a structured document
pub trait ContentParser: Send + Sync {
    /// # Arguments
    ///
    /// * `body` - Raw response bytes
    /// * `content_type` - Declared Content-Type, if any
    /// * `source_url` - URL the bytes were retrieved from
    ///
    /// # Returns
    ///
    /// The parsed content, or a human-readable failure reason
    fn parse(
        &self,
        body: &[u8],
        content_type: Option<&str>,
        source_url: &Url,
    ) -> Result<ParsedContent, String>;
}

/// Parser that stores nothing and reports the SHA-256 of the raw body
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumParser;

impl ContentParser for ChecksumParser {
    fn parse(
        &self,
        body: &[u8],
        _content_type: Option<&str>,
        _source_url: &Url,
    ) -> Result<ParsedContent, String> {
        Ok(ParsedContent {
            document_ref: None,
            checksum: content_checksum(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_parser_matches_fetch_checksum() {
        let url = Url::parse("https://example.com/").unwrap();
        let parsed = ChecksumParser.parse(b"hello", Some("text/plain"), &url).unwrap();
        assert_eq!(parsed.checksum, content_checksum(b"hello"));
        assert!(parsed.document_ref.is_none());
    }
}
