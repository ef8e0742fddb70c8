//! Cursor pagination from the REST `Link` header.
//!
//! Shopify returns page links as
//! `<https://shop.myshopify.com/admin/api/2024-10/products.json?limit=250&page_info=abc>; rel="next"`,
//! optionally preceded by a `rel="previous"` entry. Each URL already carries
//! its `page_info` cursor and `limit`, so it can be requested verbatim.

use url::Url;

/// The `rel="next"` URL of a `Link` header value.
///
/// Entries that are malformed or whose URL does not parse are skipped, so a
/// damaged header reads as "no further pages" rather than an error.
pub fn parse_link_header(link_header: &str) -> Option<Url> {
    let mut next = None;

    for part in link_header.split(',') {
        let mut url = None;
        let mut rel = None;

        for segment in part.split(';') {
            let segment = segment.trim();
            if let Some(inner) = segment
                .strip_prefix('<')
                .and_then(|s| s.strip_suffix('>'))
            {
                url = Url::parse(inner.trim()).ok();
            } else if let Some(rel_value) = segment.strip_prefix("rel=") {
                rel = Some(rel_value.trim().trim_matches('"'));
            }
        }

        if let (Some(url), Some("next")) = (url, rel) {
            next = Some(url);
        }
    }

    next
}

/// Next page URL from an optional `Link` header.
#[inline]
pub fn next_page_url(link_header: Option<&str>) -> Option<Url> {
    link_header.and_then(parse_link_header)
}
