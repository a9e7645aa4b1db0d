//! Deterministic repair of common model JSON mistakes.
//!
//! A fixed pass sequence rewrites the candidate string and the result is
//! only accepted if `serde_json` validates it. Manual character scans
//! throughout; no regex.

use serde_json::Value;

/// Try to turn broken model JSON into valid JSON without another model
/// call. Returns `None` if the input was already valid or stays broken
/// after every pass.
///
/// Passes, in order:
/// 1. Strip `//` and `/* */` comments
/// 2. Python literals: `True`/`False`/`None` → `true`/`false`/`null`
/// 3. Remove trailing commas before `}` / `]`
/// 4. Single-quoted strings → double-quoted
/// 5. Quote unquoted object keys: `{key: 1}` → `{"key": 1}`
/// 6. Escape raw newlines inside string values
/// 7. Append missing closing brackets for a truncated reply
pub fn try_repair_json(broken: &str) -> Option<String> {
    if serde_json::from_str::<Value>(broken).is_ok() {
        return None;
    }

    let mut s = strip_comments(broken);
    s = replace_python_literals(&s);
    s = remove_trailing_commas(&s);
    s = replace_single_quotes(&s);
    s = quote_unquoted_keys(&s);
    s = escape_raw_newlines(&s);
    s = close_missing_brackets(&s);

    if serde_json::from_str::<Value>(&s).is_ok() {
        Some(s)
    } else {
        None
    }
}

/// Walk `s` once, tracking string state, and let `emit` decide what to
/// push for each non-string character.
fn scan_outside_strings(s: &str, mut emit: impl FnMut(&mut String, &[char], &mut usize)) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    let mut in_string = false;
    let mut escape_next = false;

    while i < chars.len() {
        let ch = chars[i];
        if in_string {
            if escape_next {
                escape_next = false;
            } else if ch == '\\' {
                escape_next = true;
            } else if ch == '"' {
                in_string = false;
            }
            out.push(ch);
            i += 1;
            continue;
        }
        if ch == '"' {
            in_string = true;
            out.push(ch);
            i += 1;
            continue;
        }
        emit(&mut out, &chars, &mut i);
    }
    out
}

fn strip_comments(s: &str) -> String {
    scan_outside_strings(s, |out, chars, i| {
        if chars[*i] == '/' && chars.get(*i + 1) == Some(&'/') {
            while *i < chars.len() && chars[*i] != '\n' {
                *i += 1;
            }
        } else if chars[*i] == '/' && chars.get(*i + 1) == Some(&'*') {
            *i += 2;
            while *i + 1 < chars.len() && !(chars[*i] == '*' && chars[*i + 1] == '/') {
                *i += 1;
            }
            *i = (*i + 2).min(chars.len());
        } else {
            out.push(chars[*i]);
            *i += 1;
        }
    })
}

fn replace_python_literals(s: &str) -> String {
    scan_outside_strings(s, |out, chars, i| {
        for (word, replacement) in [("True", "true"), ("False", "false"), ("None", "null")] {
            let word_chars: Vec<char> = word.chars().collect();
            if chars[*i..].starts_with(&word_chars) {
                let before_ok = *i == 0 || !chars[*i - 1].is_alphanumeric();
                let after = chars.get(*i + word_chars.len());
                let after_ok = after.map_or(true, |c| !c.is_alphanumeric() && *c != '_');
                if before_ok && after_ok {
                    out.push_str(replacement);
                    *i += word_chars.len();
                    return;
                }
            }
        }
        out.push(chars[*i]);
        *i += 1;
    })
}

fn remove_trailing_commas(s: &str) -> String {
    scan_outside_strings(s, |out, chars, i| {
        if chars[*i] == ',' {
            // Look ahead past whitespace for a closing delimiter.
            let mut j = *i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                *i += 1;
                return;
            }
        }
        out.push(chars[*i]);
        *i += 1;
    })
}

fn replace_single_quotes(s: &str) -> String {
    // Only rewrite when the text has no double-quoted strings at all;
    // mixed quoting is more likely apostrophes than Python-style JSON.
    if s.contains('"') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if ch == '\'' {
            out.push('"');
        } else {
            out.push(ch);
        }
    }
    out
}

/// Quote bare identifier keys after `{` or `,`. Only an identifier
/// followed by `:` counts; anything else passes through untouched.
fn quote_unquoted_keys(s: &str) -> String {
    scan_outside_strings(s, |out, chars, i| {
        let ch = chars[*i];
        out.push(ch);
        *i += 1;
        if ch != '{' && ch != ',' {
            return;
        }
        while *i < chars.len() && chars[*i].is_whitespace() {
            out.push(chars[*i]);
            *i += 1;
        }
        let start = *i;
        if start >= chars.len() || !(chars[start].is_alphabetic() || chars[start] == '_') {
            return;
        }
        let mut end = start;
        while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
            end += 1;
        }
        let mut after = end;
        while after < chars.len() && chars[after].is_whitespace() {
            after += 1;
        }
        if after < chars.len() && chars[after] == ':' {
            out.push('"');
            out.extend(&chars[start..end]);
            out.push('"');
            *i = end;
        }
    })
}

/// Escape raw `\n` / `\r` inside string values; models often emit real
/// line breaks mid-string when asked for multi-line summaries.
fn escape_raw_newlines(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escape_next = false;

    for ch in s.chars() {
        if in_string {
            if escape_next {
                escape_next = false;
                out.push(ch);
            } else if ch == '\\' {
                escape_next = true;
                out.push(ch);
            } else if ch == '"' {
                in_string = false;
                out.push(ch);
            } else if ch == '\n' {
                out.push_str("\\n");
            } else if ch == '\r' {
                out.push_str("\\r");
            } else {
                out.push(ch);
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
        }
        out.push(ch);
    }
    out
}

fn close_missing_brackets(s: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for ch in s.chars() {
        if in_string {
            if escape_next {
                escape_next = false;
            } else if ch == '\\' {
                escape_next = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = s.trim_end().to_string();
    if in_string {
        out.push('"');
    }
    while let Some(close) = stack.pop() {
        out.push(close);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_json_needs_no_repair() {
        assert!(try_repair_json(r#"{"a": 1}"#).is_none());
    }

    #[test]
    fn repairs_trailing_comma() {
        let fixed = try_repair_json(r#"{"a": 1,}"#).unwrap();
        assert_eq!(fixed, r#"{"a": 1}"#);
    }

    #[test]
    fn repairs_trailing_comma_in_array() {
        let fixed = try_repair_json(r#"["a", "b", ]"#).unwrap();
        assert!(serde_json::from_str::<Value>(&fixed).is_ok());
    }

    #[test]
    fn repairs_single_quotes() {
        let fixed = try_repair_json("{'summary': 'fine'}").unwrap();
        let v: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["summary"], "fine");
    }

    #[test]
    fn repairs_python_literals() {
        let fixed = try_repair_json(r#"{"ok": True, "bad": False, "missing": None}"#).unwrap();
        let v: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(v["bad"], false);
        assert!(v["missing"].is_null());
    }

    #[test]
    fn python_literal_inside_string_untouched() {
        let fixed = try_repair_json(r#"{"note": "None shall pass",}"#).unwrap();
        let v: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["note"], "None shall pass");
    }

    #[test]
    fn repairs_comments() {
        let input = "{\n  \"a\": 1, // inline note\n  /* block */ \"b\": 2\n}";
        let fixed = try_repair_json(input).unwrap();
        let v: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["a"], 1);
        assert_eq!(v["b"], 2);
    }

    #[test]
    fn closes_truncated_object() {
        let fixed = try_repair_json(r#"{"summary": "cut off", "insights": ["one""#).unwrap();
        let v: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["summary"], "cut off");
        assert_eq!(v["insights"][0], "one");
    }

    #[test]
    fn repairs_unquoted_keys() {
        let fixed = try_repair_json(r#"{summary: "found it", relevance: 0.9}"#).unwrap();
        let v: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["summary"], "found it");
        assert_eq!(v["relevance"], 0.9);
    }

    #[test]
    fn unquoted_key_lookalike_in_value_untouched() {
        // "key:" shapes inside strings must not be quoted.
        let fixed = try_repair_json(r#"{note: "ratio: 3, total: 4",}"#).unwrap();
        let v: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["note"], "ratio: 3, total: 4");
    }

    #[test]
    fn repairs_raw_newline_in_string() {
        let input = "{\"summary\": \"line one\nline two\"}";
        let fixed = try_repair_json(input).unwrap();
        let v: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["summary"], "line one\nline two");
    }

    #[test]
    fn unrepairable_stays_none() {
        assert!(try_repair_json("not anything like json").is_none());
    }

    #[test]
    fn apostrophes_not_treated_as_quotes() {
        // Mixed quoting: double-quoted JSON containing an apostrophe.
        let input = r#"{"summary": "it's fine",}"#;
        let fixed = try_repair_json(input).unwrap();
        let v: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["summary"], "it's fine");
    }
}
