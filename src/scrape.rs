//! Text and HTML extraction helpers for portal responses.
//!
//! Pure functions over strings. The fetcher in [`crate::portal`] calls them
//! for both retrieval paths, so a message fetched over the BFF API and the
//! same message scraped from HTML end up with identical body text.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;

use crate::parse::{self, MessageTemplate};

/// Marker word every consumption notice contains.
pub const CONSUMPTION_MARKER: &str = "Verbrauchswerte";
/// Upper bound for a block that has no recognisable closing line.
pub const CONSUMPTION_EXTRACT_MAX_CHARS: usize = 3500;

/// Hidden input names the portal has used for its anti-forgery token.
pub const ANTIFORGERY_INPUT_NAMES: [&str; 3] = [
    "__RequestVerificationToken",
    "RequestVerificationToken",
    "requestVerificationToken",
];

static CLOSING_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^(?:Falls Sie Fragen|Mit freundlichen|Viele Grüße|Bitte beachten)")
        .expect("Invalid CLOSING_LINE regex")
});

static INLINE_WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\u{a0}]+").expect("Invalid INLINE_WHITESPACE regex"));

static CONTAINER_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)message|nachricht|content").expect("Invalid CONTAINER_CLASS regex")
});

static CONTAINER_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div, article, section").expect("Invalid container selector"));

static SCRIPT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script").expect("Invalid script selector"));

static BODY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("body").expect("Invalid body selector"));

/// Cut the consumption notice out of free text.
///
/// Line endings are normalised, runs of blanks collapsed, each line trimmed
/// and empty lines dropped. The block starts at [`CONSUMPTION_MARKER`] and
/// ends before the first closing line, or after
/// [`CONSUMPTION_EXTRACT_MAX_CHARS`] characters.
pub fn extract_consumption_text(text: &str) -> Option<String> {
    if !text.contains(CONSUMPTION_MARKER) {
        return None;
    }

    let cleaned = text
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(|line| INLINE_WHITESPACE.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let start = cleaned.find(CONSUMPTION_MARKER)?;
    let rest = &cleaned[start..];
    let end = CLOSING_LINE
        .find_iter(rest)
        .map(|m| m.start())
        .find(|pos| *pos > 0)
        .unwrap_or(rest.len());
    let block = truncate_chars(&rest[..end], CONSUMPTION_EXTRACT_MAX_CHARS).trim();

    (!block.is_empty()).then(|| block.to_string())
}

/// Collapse all whitespace, for duplicate detection only.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep the first occurrence of each block, comparing whitespace-normalised text.
pub fn dedup_blocks<I>(blocks: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    blocks
        .into_iter()
        .filter(|block| seen.insert(normalize_whitespace(block)))
        .collect()
}

/// All distinct consumption notices found on a messages page.
///
/// Message containers are preferred. A container counts only when its block
/// has at least one recognisable category, and of nested counting
/// containers only the innermost is read, so a list wrapper does not
/// produce a merged block and a header element alone is never taken for a
/// notice. When no container counts, script payloads are tried, then the
/// whole page text.
pub fn consumption_blocks(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);

    let recognised: Vec<(ElementRef<'_>, String)> = document
        .select(&CONTAINER_SELECTOR)
        .filter(is_message_container)
        .filter_map(|el| recognised_block(&element_text(&el)).map(|block| (el, block)))
        .collect();
    let from_containers = dedup_blocks(
        recognised
            .iter()
            .filter(|(el, _)| {
                !recognised
                    .iter()
                    .any(|(other, _)| other != el && is_descendant_of(other, el))
            })
            .map(|(_, block)| block.clone()),
    );
    if !from_containers.is_empty() {
        return from_containers;
    }

    let from_scripts = dedup_blocks(
        script_contents(&document)
            .filter(|content| content.contains(CONSUMPTION_MARKER))
            .filter_map(|content| recognised_block(&content.replace("\\n", "\n"))),
    );
    if !from_scripts.is_empty() {
        return from_scripts;
    }

    document
        .select(&BODY_SELECTOR)
        .next()
        .and_then(|body| extract_consumption_text(&element_text(&body)))
        .into_iter()
        .collect()
}

/// A consumption block that names at least one category.
fn recognised_block(text: &str) -> Option<String> {
    extract_consumption_text(text)
        .filter(|block| parse::classify(block) != MessageTemplate::Unrecognized)
}

/// Find the anti-forgery token on the login page.
///
/// The `token` field of `window.__ANTIFORGERY_CONFIG__` is preferred, then
/// the known hidden input names. The cookie fallback lives in the fetcher.
pub fn antiforgery_token(html: &str) -> Option<String> {
    if let Some(token) = window_string_field(html, "__ANTIFORGERY_CONFIG__", "token") {
        return Some(token);
    }

    let document = Html::parse_document(html);
    ANTIFORGERY_INPUT_NAMES.iter().find_map(|name| {
        let selector = Selector::parse(&format!("input[name=\"{}\"]", name)).ok()?;
        document
            .select(&selector)
            .filter_map(|input| input.value().attr("value"))
            .find(|value| !value.is_empty())
            .map(str::to_string)
    })
}

/// Read a string field from a `window.<variable> = { ... };` script assignment.
///
/// Returns `None` when the variable, the field, or a non-null value is absent.
pub fn window_string_field(html: &str, variable: &str, field: &str) -> Option<String> {
    let literal = window_object_literal(html, variable)?;
    let pattern = Regex::new(&format!(
        r#"(?s)["']?{}["']?\s*:\s*(null|"((?:\\.|[^"\\])*)")"#,
        regex::escape(field)
    ))
    .ok()?;
    let caps = pattern.captures(&literal)?;
    let raw = caps.get(2)?.as_str();
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).ok()
}

fn window_object_literal(html: &str, variable: &str) -> Option<String> {
    let pattern = Regex::new(&format!(
        r"(?s)window\.{}\s*=\s*(\{{.*?\}})\s*;",
        regex::escape(variable)
    ))
    .ok()?;
    let document = Html::parse_document(html);
    let found = script_contents(&document)
        .find_map(|content| pattern.captures(&content).map(|caps| caps[1].to_string()));
    found
}

fn script_contents(document: &Html) -> impl Iterator<Item = String> + '_ {
    document
        .select(&SCRIPT_SELECTOR)
        .map(|script| script.text().collect::<String>())
}

fn is_message_container(el: &ElementRef<'_>) -> bool {
    el.value()
        .attr("class")
        .is_some_and(|class| CONTAINER_CLASS.is_match(class))
}

fn is_descendant_of(el: &ElementRef<'_>, ancestor: &ElementRef<'_>) -> bool {
    el.ancestors().any(|node| node.id() == ancestor.id())
}

/// Visible text of an element: one trimmed text node per line.
fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
