//! Shared extraction helpers for messy provider output.
//!
//! Every normalization tier calls through here for preprocessing,
//! code-fence extraction, and bracket matching. All scanning is linear;
//! no regex anywhere in the normalizer.

/// Strip reasoning blocks and trim. Applied to every free-text reply
/// before any tier runs.
pub fn preprocess(text: &str) -> String {
    let stripped = strip_reasoning_blocks(text);
    stripped.trim().to_string()
}

/// Remove `<think>...</think>` and `<thinking>...</thinking>` blocks,
/// including an unterminated trailing block.
pub fn strip_reasoning_blocks(text: &str) -> String {
    let mut result = strip_tag_pair(text, "<think>", "</think>");
    result = strip_tag_pair(&result, "<thinking>", "</thinking>");
    result
}

fn strip_tag_pair(text: &str, open: &str, close: &str) -> String {
    let mut result = text.to_string();
    while let Some(start) = result.find(open) {
        match result[start..].find(close) {
            Some(offset) => {
                let end = start + offset + close.len();
                result = format!("{}{}", &result[..start], &result[end..]);
            }
            None => {
                result.truncate(start);
                break;
            }
        }
    }
    result
}

/// Extract the content of the first fenced code block, preferring a
/// block tagged with `lang` over a bare fence.
pub fn extract_code_block<'a>(text: &'a str, lang: &str) -> Option<&'a str> {
    if let Some(content) = fenced_block(text, Some(lang)) {
        return Some(content);
    }
    fenced_block(text, None)
}

/// Find a ``` fenced block. With `Some(lang)`, only blocks whose info
/// string matches (case-insensitive); with `None`, any block.
fn fenced_block<'a>(text: &'a str, lang: Option<&str>) -> Option<&'a str> {
    let mut search_from = 0;
    while let Some(fence_offset) = text[search_from..].find("```") {
        let after_fence = search_from + fence_offset + 3;
        let Some(line_end) = text[after_fence..].find('\n') else {
            return None;
        };
        let info = text[after_fence..after_fence + line_end].trim();
        let content_start = after_fence + line_end + 1;

        let matches = match lang {
            Some(want) => info.eq_ignore_ascii_case(want),
            None => true,
        };

        if matches {
            if let Some(close) = text[content_start..].find("```") {
                return Some(text[content_start..content_start + close].trim());
            }
        }

        search_from = content_start;
    }
    None
}

/// Find the last balanced `{...}` or `[...]` region, nesting- and
/// string-aware. Later regions win because the model's actual answer
/// usually follows its preamble.
pub fn find_bracketed(text: &str, open: char, close: char) -> Option<&str> {
    let mut best: Option<&str> = None;
    let mut scan_from = 0;

    while scan_from < text.len() {
        let Some(offset) = text[scan_from..].find(open) else {
            break;
        };
        let start = scan_from + offset;
        let mut depth = 0;
        let mut in_string = false;
        let mut escape_next = false;
        let mut found_end = None;

        for (i, ch) in text[start..].char_indices() {
            if escape_next {
                escape_next = false;
                continue;
            }
            match ch {
                '\\' if in_string => escape_next = true,
                '"' => in_string = !in_string,
                _ if in_string => {}
                c if c == open => depth += 1,
                c if c == close => {
                    depth -= 1;
                    if depth == 0 {
                        found_end = Some(start + i);
                        break;
                    }
                }
                _ => {}
            }
        }

        match found_end {
            Some(end) => {
                best = Some(&text[start..=end]);
                scan_from = end + 1;
            }
            None => break,
        }
    }

    best
}
