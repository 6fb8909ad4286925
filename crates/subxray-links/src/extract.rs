//! Link extraction from free-form subscription text.
//!
//! Subscription bodies arrive as HTML pages, Markdown, plain newline lists or
//! one base64 blob wrapping any of those. [`find_links`] handles all of them.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::b64;
use crate::error::{LinkError, Result};
use crate::node::Scheme;

static LINK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:vless|vmess|trojan|ssr|ss)://[^\s"'<>]+"#)
        .expect("link pattern is a valid regex")
});

/// Closers left behind by Markdown, HTML or prose around a link.
const TRAILING_JUNK: &[char] = &[')', ']', '}', ',', '.', ';', '\'', '"'];

/// Extract supported links in input order, de-duplicated case-insensitively.
///
/// `text` is expected to be HTML-entity-decoded already.
pub fn extract_links(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    // `[label](target)` with a link as the label matches as one run.
    let candidates = LINK_PATTERN
        .find_iter(text)
        .flat_map(|m| m.as_str().split("]("));

    for candidate in candidates {
        let link = candidate.trim().trim_end_matches(TRAILING_JUNK);
        if Scheme::detect(link).is_none() {
            continue;
        }
        if seen.insert(link.to_lowercase()) {
            links.push(link.to_string());
        }
    }

    links
}

/// Extract links from raw subscription text, falling back to treating the
/// whole input as one base64 blob when nothing is found directly.
pub fn find_links(text: &str) -> Result<Vec<String>> {
    let links = extract_links(text);
    if !links.is_empty() {
        return Ok(links);
    }

    let decoded = match b64::decode_lossy(text.trim()) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::debug!("subscription is not a base64 blob: {e}");
            return Err(LinkError::NoLinksFound);
        }
    };

    let links = extract_links(&unescape_html(&decoded));
    if links.is_empty() {
        return Err(LinkError::NoLinksFound);
    }
    tracing::debug!("decoded base64 subscription blob with {} links", links.len());
    Ok(links)
}

/// Decode HTML character references.
///
/// Handles the named entities that appear in provider pages plus decimal and
/// hexadecimal numeric references. Unknown entities are left untouched.
pub fn unescape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match decode_entity(tail) {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decode one entity at the start of `s` (which begins with `&`).
/// Returns the character and the number of bytes consumed.
fn decode_entity(s: &str) -> Option<(char, usize)> {
    let end = s.get(1..)?.find(';')? + 1;
    // Longest reference we care about is `&#x10FFFF;`.
    if end > 10 {
        return None;
    }
    let body = &s[1..end];
    let ch = match body {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        _ => {
            let digits = body.strip_prefix('#')?;
            let code = match digits.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse::<u32>().ok()?,
            };
            char::from_u32(code)?
        }
    };
    Some((ch, end + 1))
}
