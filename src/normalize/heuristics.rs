//! Tier-3 recovery: unstructured-text heuristics.
//!
//! Last resort when a reply has neither parseable JSON nor labeled
//! sections. Pulls bullet lines as insights, frequent tokens as category
//! suggestions, and guesses an analysis-type label from a keyword table.

use std::collections::HashMap;

const STOPWORDS: &[&str] = &[
    "about", "after", "also", "been", "before", "being", "between", "both", "could", "does",
    "each", "from", "have", "having", "here", "into", "just", "like", "more", "most", "much",
    "only", "other", "over", "same", "should", "some", "such", "than", "that", "their", "them",
    "then", "there", "these", "they", "this", "those", "through", "under", "very", "were",
    "what", "when", "where", "which", "while", "will", "with", "would", "your",
];

/// Keyword table for guessing an analysis-type label. The row with the
/// most keyword hits wins; ties go to the earlier row.
const TYPE_KEYWORDS: &[(&str, &[&str])] = &[
    ("code", &["function", "class", "method", "variable", "import", "compile"]),
    ("meeting-notes", &["meeting", "agenda", "attendees", "action item", "minutes"]),
    ("research", &["research", "study", "hypothesis", "experiment", "dataset"]),
    ("task-list", &["todo", "task", "deadline", "checklist"]),
    ("document", &["document", "report", "section", "chapter", "article"]),
];

/// Lines prefixed with a bullet marker or a `1.`-style number become
/// insight strings, marker stripped.
pub fn bullet_insights(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            strip_bullet(trimmed).map(|s| s.to_string())
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn strip_bullet(line: &str) -> Option<&str> {
    for marker in ["- ", "* ", "• ", "– "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }
    // Numbered list: digits, then '.' or ')', then a space.
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 && digits <= 3 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(rest.trim());
        }
    }
    None
}

/// The `max` most frequent non-stopword tokens, lowercased, length >= 4.
/// Ties break alphabetically so the result is deterministic.
pub fn frequent_tokens(text: &str, max: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for token in text.split(|c: char| !c.is_alphanumeric()) {
        if token.len() < 4 || token.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let lower = token.to_lowercase();
        if STOPWORDS.contains(&lower.as_str()) {
            continue;
        }
        *counts.entry(lower).or_insert(0) += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .take(max)
        .map(|(token, _)| token)
        .collect()
}

/// Guess an analysis-type label from the keyword table, or `None` when
/// nothing hits.
pub fn guess_analysis_type(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let mut best: Option<(&str, usize)> = None;
    for (label, keywords) in TYPE_KEYWORDS {
        let hits = keywords.iter().filter(|kw| lower.contains(**kw)).count();
        if hits > 0 && best.map(|(_, b)| hits > b).unwrap_or(true) {
            best = Some((label, hits));
        }
    }
    best.map(|(label, _)| label.to_string())
}

/// First non-empty paragraph, capped at `max_chars` characters.
pub fn first_paragraph(text: &str, max_chars: usize) -> String {
    let para = text
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty())
        .unwrap_or("");
    para.chars().take(max_chars).collect()
}
