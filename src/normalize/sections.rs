//! Tier-2 recovery: labeled-section scanning.
//!
//! Providers without structured output are asked for `## field` sections;
//! in practice models emit all kinds of header styles (`Summary:`,
//! `**Insights**`, `### Categories`). The scanner matches any of them
//! case-insensitively against a fixed alias table.

/// Canonical output fields a section header can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Summary,
    Insights,
    Categories,
    Relevance,
    AnalysisType,
}

/// Header aliases, all compared lowercase.
const ALIASES: &[(&str, Field)] = &[
    ("summary", Field::Summary),
    ("overview", Field::Summary),
    ("insights", Field::Insights),
    ("key insights", Field::Insights),
    ("key points", Field::Insights),
    ("findings", Field::Insights),
    ("categories", Field::Categories),
    ("tags", Field::Categories),
    ("topics", Field::Categories),
    ("relevance", Field::Relevance),
    ("relevance score", Field::Relevance),
    ("score", Field::Relevance),
    ("analysis type", Field::AnalysisType),
    ("type", Field::AnalysisType),
];

/// Maximum bytes scanned per reply. Keeps pathological inputs bounded.
pub const MAX_SCAN_BYTES: usize = 65_536;

/// Scan `text` for labeled sections. Returns `(field, body)` pairs in
/// document order; the first occurrence of a field wins, later duplicates
/// are dropped. An empty result means tier 2 found nothing.
pub fn find_sections(text: &str) -> Vec<(Field, String)> {
    let bounded = bound_to_char(text, MAX_SCAN_BYTES);
    let mut found: Vec<(Field, String)> = Vec::new();
    let mut current: Option<(Field, Vec<String>)> = None;

    for line in bounded.lines() {
        if let Some((field, inline)) = parse_header(line) {
            if let Some((prev_field, body)) = current.take() {
                push_section(&mut found, prev_field, body);
            }
            let mut body = Vec::new();
            if !inline.is_empty() {
                body.push(inline.to_string());
            }
            current = Some((field, body));
        } else if let Some((_, ref mut body)) = current {
            body.push(line.to_string());
        }
    }
    if let Some((field, body)) = current {
        push_section(&mut found, field, body);
    }
    found
}

fn push_section(found: &mut Vec<(Field, String)>, field: Field, body: Vec<String>) {
    if found.iter().any(|(f, _)| *f == field) {
        return;
    }
    let text = body.join("\n").trim().to_string();
    if !text.is_empty() {
        found.push((field, text));
    }
}

/// Check whether a line is a section header. Accepts markdown headings,
/// bold labels, and plain `Label:` lines; returns the matched field and
/// any content following the label on the same line.
fn parse_header(line: &str) -> Option<(Field, &str)> {
    let mut s = line.trim();
    // Markdown heading prefix.
    while let Some(rest) = s.strip_prefix('#') {
        s = rest;
    }
    s = s.trim_start();
    // Bold markers around the label.
    let stripped = s.trim_start_matches('*');

    for (alias, field) in ALIASES {
        if let Some(rest) = match_alias(stripped, alias) {
            let rest = rest.trim_start_matches('*').trim_start();
            let rest = rest.strip_prefix(':').unwrap_or(rest).trim();
            // A bare heading line, or a label followed by a delimiter.
            // `summarize the following` must not match `summary`.
            let after = stripped[alias.len()..].trim_start_matches('*');
            let delimited = after.is_empty() || after.starts_with(':') || after.starts_with('-');
            if delimited {
                return Some((*field, rest));
            }
        }
    }
    None
}

/// Case-insensitive prefix match; returns the text after the alias.
fn match_alias<'a>(s: &'a str, alias: &str) -> Option<&'a str> {
    let n = alias.len();
    if s.len() >= n && s.is_char_boundary(n) && s[..n].eq_ignore_ascii_case(alias) {
        Some(&s[n..])
    } else {
        None
    }
}

/// Truncate to at most `max` bytes, backing off to a char boundary.
pub fn bound_to_char(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
