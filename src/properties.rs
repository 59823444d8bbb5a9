//! Reading and writing the `key=value` text format of profile data files.
//!
//! The format follows the classic properties layout: `#`/`!` comment lines,
//! `=`, `:` or whitespace as the key separator, backslash escapes and
//! backslash line continuations.

use std::collections::{BTreeMap, HashMap};

const HEADER: &str = "profile-config configuration";
const BLANKS: [char; 3] = [' ', '\t', '\x0c'];

pub fn parse(contents: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let mut lines = contents.lines();

    while let Some(line) = lines.next() {
        let trimmed = line.trim_start_matches(BLANKS);
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
            continue;
        }

        let mut logical = String::from(trimmed);
        while ends_with_continuation(&logical) {
            logical.pop();
            match lines.next() {
                Some(next) => logical.push_str(next.trim_start_matches(BLANKS)),
                None => break,
            }
        }

        let (key, value) = split_entry(&logical);
        map.insert(unescape(key), unescape(value));
    }

    map
}

/// Serializes `map` with a comment header, sorted by key so that rewriting
/// an unchanged map produces identical bytes.
pub fn store(map: &HashMap<String, String>) -> String {
    let sorted: BTreeMap<&String, &String> = map.iter().collect();

    let mut out = String::new();
    out.push('#');
    out.push_str(HEADER);
    out.push('\n');
    for (key, value) in sorted {
        out.push_str(&escape(key, true));
        out.push('=');
        out.push_str(&escape(value, false));
        out.push('\n');
    }
    out
}

fn ends_with_continuation(line: &str) -> bool {
    let slashes = line.chars().rev().take_while(|c| *c == '\\').count();
    slashes % 2 == 1
}

fn split_entry(line: &str) -> (&str, &str) {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => {
                let key = &line[..i];
                let value = line[i + c.len_utf8()..].trim_start_matches(BLANKS);
                return (key, value);
            }
            ' ' | '\t' | '\x0c' => {
                let key = &line[..i];
                let mut value = line[i..].trim_start_matches(BLANKS);
                if let Some(rest) = value.strip_prefix(['=', ':']) {
                    value = rest.trim_start_matches(BLANKS);
                }
                return (key, value);
            }
            _ => {}
        }
    }
    (line, "")
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn escape(s: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, c) in s.chars().enumerate() {
        match c {
            ' ' if is_key || i == 0 => out.push_str("\\ "),
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x0c' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}
