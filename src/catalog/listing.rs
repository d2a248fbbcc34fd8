//! Parsing for paginated storage-bucket directory listings.
//!
//! A page is a namespaced `ListBucketResult` document:
//! ```text
//! <ListBucketResult xmlns="http://doc.s3.amazonaws.com/2006-03-01">
//!   <Prefix>Linux/</Prefix>
//!   <NextMarker>Linux/120/</NextMarker>
//!   <IsTruncated>true</IsTruncated>
//!   <CommonPrefixes><Prefix>Linux/100/</Prefix></CommonPrefixes>
//!   ...
//! </ListBucketResult>
//! ```
use crate::error::BisectError;
use crate::revision::Revision;
use regex::Regex;
use std::sync::OnceLock;

/// Revisions found on one page plus the marker for the next page, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage {
    pub revisions: Vec<Revision>,
    pub next_marker: Option<String>,
}

/// Parse one listing page into build-number revisions.
///
/// Entries whose revision segment is not an integer are skipped.
pub fn parse_listing_page(xml: &str) -> Result<ListingPage, BisectError> {
    static ROOT_RE: OnceLock<Regex> = OnceLock::new();
    let root = ROOT_RE.get_or_init(|| {
        Regex::new(r#"(?s)^\s*(?:<\?xml.*?\?>\s*)?<[A-Za-z][\w:.-]*\s[^>]*\bxmlns(?::\w+)?\s*=\s*"[^"]*""#)
            .expect("regex for namespaced root element")
    });
    if !root.is_match(xml) {
        return Err(BisectError::CatalogUnavailable(
            "could not locate namespace for directory index".to_string(),
        ));
    }

    // The listing prefix is the first <Prefix> outside any <CommonPrefixes>.
    let head = xml.split("<CommonPrefixes>").next().unwrap_or_default();
    static PREFIX_RE: OnceLock<Regex> = OnceLock::new();
    let prefix_re = PREFIX_RE.get_or_init(|| {
        Regex::new(r"<Prefix>([^<]*)</Prefix>").expect("regex for listing prefix")
    });
    let prefix = prefix_re
        .captures(head)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            BisectError::CatalogUnavailable("directory index has no <Prefix>".to_string())
        })?;

    static TRUNCATED_RE: OnceLock<Regex> = OnceLock::new();
    let truncated_re = TRUNCATED_RE.get_or_init(|| {
        Regex::new(r"<IsTruncated>\s*([^<]*?)\s*</IsTruncated>").expect("regex for truncation flag")
    });
    let truncated = truncated_re
        .captures(xml)
        .and_then(|cap| cap.get(1))
        .is_some_and(|m| m.as_str().eq_ignore_ascii_case("true"));

    let next_marker = if truncated {
        static MARKER_RE: OnceLock<Regex> = OnceLock::new();
        let marker_re = MARKER_RE.get_or_init(|| {
            Regex::new(r"<NextMarker>([^<]*)</NextMarker>").expect("regex for next marker")
        });
        let marker = marker_re
            .captures(xml)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|marker| !marker.is_empty())
            .ok_or_else(|| {
                BisectError::CatalogUnavailable(
                    "truncated directory index has no <NextMarker>".to_string(),
                )
            })?;
        Some(marker)
    } else {
        None
    };

    static ENTRY_RE: OnceLock<Regex> = OnceLock::new();
    let entry_re = ENTRY_RE.get_or_init(|| {
        Regex::new(r"(?s)<CommonPrefixes>\s*<Prefix>([^<]*)</Prefix>")
            .expect("regex for common prefixes")
    });
    let mut revisions = Vec::new();
    for cap in entry_re.captures_iter(xml) {
        let entry = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
        let Some(rest) = entry.strip_prefix(prefix.as_str()) else {
            continue;
        };
        let segment = rest.strip_suffix('/').unwrap_or(rest);
        if let Ok(number) = segment.parse::<u64>() {
            revisions.push(Revision::Number(number));
        }
    }

    Ok(ListingPage {
        revisions,
        next_marker,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn page(prefix: &str, entries: &[&str], next_marker: Option<&str>) -> String {
        let mut xml = String::from(
            "<?xml version='1.0' encoding='UTF-8'?>\
             <ListBucketResult xmlns=\"http://doc.s3.amazonaws.com/2006-03-01\">\
             <Name>chromium-browser-snapshots</Name>",
        );
        xml.push_str(&format!("<Prefix>{prefix}</Prefix>"));
        match next_marker {
            Some(marker) => xml.push_str(&format!(
                "<NextMarker>{marker}</NextMarker><IsTruncated>true</IsTruncated>"
            )),
            None => xml.push_str("<IsTruncated>false</IsTruncated>"),
        }
        for entry in entries {
            xml.push_str(&format!(
                "<CommonPrefixes><Prefix>{prefix}{entry}/</Prefix></CommonPrefixes>"
            ));
        }
        xml.push_str("</ListBucketResult>");
        xml
    }

    #[test]
    fn parses_revisions_and_skips_non_numeric_entries() {
        let xml = page("Linux/", &["100", "110", "LAST_CHANGE", "120"], None);
        let parsed = parse_listing_page(&xml).expect("parse page");
        assert_eq!(
            parsed.revisions,
            vec![
                Revision::Number(100),
                Revision::Number(110),
                Revision::Number(120)
            ]
        );
        assert_eq!(parsed.next_marker, None);
    }

    #[test]
    fn truncated_page_reports_next_marker() {
        let xml = page("Linux_x64/", &["5"], Some("Linux_x64/5/"));
        let parsed = parse_listing_page(&xml).expect("parse page");
        assert_eq!(parsed.next_marker.as_deref(), Some("Linux_x64/5/"));
    }

    #[test]
    fn malformed_pages_are_catalog_unavailable() {
        let no_namespace = "<ListBucketResult><Prefix>Linux/</Prefix></ListBucketResult>";
        let no_prefix = "<ListBucketResult xmlns=\"urn:x\"><IsTruncated>false</IsTruncated></ListBucketResult>";
        let no_marker = "<ListBucketResult xmlns=\"urn:x\"><Prefix>Linux/</Prefix><IsTruncated>true</IsTruncated></ListBucketResult>";
        for xml in [no_namespace, no_prefix, no_marker, "not xml at all"] {
            assert!(
                matches!(
                    parse_listing_page(xml),
                    Err(BisectError::CatalogUnavailable(_))
                ),
                "expected failure for {xml}"
            );
        }
    }
}
