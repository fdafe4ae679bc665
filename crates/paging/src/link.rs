//! `Link` header parsing (RFC 8288 subset)
//!
//! Format: `<https://api.github.com/...?page=2>; rel="next", <...>; rel="last"`.
//! Entries that fail to parse are skipped, so a malformed header yields no
//! `next` relation and pagination simply stops.

use reqwest::header::{HeaderMap, LINK};
use std::collections::HashMap;

/// Parse one `Link` header value into a relation -> URL map.
///
/// Relation names are lowercased. A space-separated `rel` list maps every
/// name to the same URL. When a relation appears twice the first one wins.
pub fn parse_link_header(value: &str) -> HashMap<String, String> {
    let mut links = HashMap::new();
    for entry in split_entries(value) {
        let Some((url, rels)) = parse_entry(entry) else {
            continue;
        };
        for rel in rels {
            links
                .entry(rel.to_ascii_lowercase())
                .or_insert_with(|| url.to_string());
        }
    }
    links
}

/// URL of the `rel="next"` link across all `Link` headers of a response.
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    let mut links: HashMap<String, String> = HashMap::new();
    for value in headers.get_all(LINK) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for (rel, url) in parse_link_header(value) {
            links.entry(rel).or_insert(url);
        }
    }
    links.remove("next")
}

/// Split on commas that are outside `<...>` and outside quoted strings.
fn split_entries(value: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut start = 0;
    let mut in_url = false;
    let mut in_quotes = false;

    for (i, c) in value.char_indices() {
        match c {
            '<' if !in_quotes => in_url = true,
            '>' if !in_quotes => in_url = false,
            '"' if !in_url => in_quotes = !in_quotes,
            ',' if !in_url && !in_quotes => {
                entries.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(&value[start..]);
    entries
}

fn parse_entry(entry: &str) -> Option<(&str, Vec<&str>)> {
    let rest = entry.trim().strip_prefix('<')?;
    let (url, params) = rest.split_once('>')?;
    let url = url.trim();
    if url.is_empty() {
        return None;
    }

    let mut params = params.split(';');
    // Anything between '>' and the first ';' means the entry is garbled.
    if !params.next()?.trim().is_empty() {
        return None;
    }

    let mut rels = Vec::new();
    for param in params {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("rel") {
            rels.extend(value.trim().trim_matches('"').split_whitespace());
        }
    }

    if rels.is_empty() { None } else { Some((url, rels)) }
}
