//! Small CSS helpers shared by the style resolver, transpiler and sanitizer.
//!
//! These work on declaration lists as they appear in `style` attributes and
//! in `getComputedStyle` output. They are not a CSS parser; values are kept
//! as strings and only split where the target format needs longhands.

use std::fmt;

/// A single `property: value` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub property: String,
    pub value: String,
}

impl Declaration {
    pub fn new(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.property, self.value)
    }
}

/// Split a declaration block (`a: b; c: d`) into declarations.
///
/// Semicolons inside parentheses or quotes are not separators, so data URIs
/// such as `url(data:image/png;base64,...)` survive intact. Property names
/// are lowercased; `!important` is dropped.
pub fn parse_declarations(block: &str) -> Vec<Declaration> {
    split_top_level(block, ';')
        .into_iter()
        .filter_map(|chunk| {
            let colon = chunk.find(':')?;
            let property = chunk[..colon].trim().to_ascii_lowercase();
            let mut value = chunk[colon + 1..].trim();
            if let Some(stripped) = value.strip_suffix("!important") {
                value = stripped.trim_end();
            }
            if property.is_empty() || value.is_empty() {
                return None;
            }
            Some(Declaration::new(property, value))
        })
        .collect()
}

/// Join declarations back into a `style` attribute value.
pub fn serialize_declarations(declarations: &[Declaration]) -> String {
    declarations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Split on `separator` outside of parentheses and quotes.
fn split_top_level(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (idx, ch) in input.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '"' | '\'' => quote = Some(ch),
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                c if c == separator && depth == 0 => {
                    parts.push(&input[start..idx]);
                    start = idx + c.len_utf8();
                }
                _ => {}
            },
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Split a value into whitespace-separated tokens, keeping functions such as
/// `rgb(0, 0, 0)` or `minmax(0, 1fr)` as single tokens.
pub fn split_value_tokens(value: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut start: Option<usize> = None;

    for (idx, ch) in value.char_indices() {
        match ch {
            '(' => {
                depth += 1;
                start.get_or_insert(idx);
            }
            ')' => depth = depth.saturating_sub(1),
            c if c.is_whitespace() && depth == 0 => {
                if let Some(s) = start.take() {
                    tokens.push(&value[s..idx]);
                }
            }
            _ => {
                start.get_or_insert(idx);
            }
        }
    }
    if let Some(s) = start {
        tokens.push(&value[s..]);
    }
    tokens
}

/// Leading integer of a length, mirroring `parseInt("10.5px") == 10`.
pub fn parse_px(value: &str) -> Option<i64> {
    let value = value.trim();
    let end = value
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    value[..end].parse().ok()
}

/// Leading number of a length, keeping fractions (`"12.5px" -> 12.5`).
pub fn parse_number(value: &str) -> Option<f64> {
    let value = value.trim();
    let end = value
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    value[..end].parse().ok()
}

/// Whether a value is an absolute px length such as `120px`.
pub fn is_px_length(value: &str) -> bool {
    value
        .trim()
        .strip_suffix("px")
        .map(|n| n.parse::<f64>().is_ok())
        .unwrap_or(false)
}

const SIDES: [&str; 4] = ["top", "right", "bottom", "left"];

const BORDER_STYLES: &[&str] = &[
    "none", "hidden", "solid", "dashed", "dotted", "double", "groove", "ridge", "inset", "outset",
];

fn is_border_width(token: &str) -> bool {
    matches!(token, "thin" | "medium" | "thick")
        || token == "0"
        || (token.chars().next().map_or(false, |c| c.is_ascii_digit() || c == '.')
            && parse_number(token).is_some())
}

/// Expand a `border` shorthand into per-side longhands.
///
/// `none` yields the four `border-<side>-style: none` declarations and `0`
/// yields four zero widths. Otherwise each component present among width,
/// style and colour is emitted for all four sides, in that order. Returns
/// `None` when the value cannot be classified.
pub fn expand_border(value: &str) -> Option<Vec<Declaration>> {
    let value = value.trim();
    let lower = value.to_ascii_lowercase();
    let tokens = split_value_tokens(&lower);
    let first = *tokens.first()?;

    if first == "none" {
        return Some(per_side("border-{}-style", "none"));
    }
    if first == "0" {
        return Some(per_side("border-{}-width", "0"));
    }

    let original_tokens = split_value_tokens(value);
    let mut width = None;
    let mut style = None;
    let mut color = None;
    for (token, original) in tokens.iter().zip(original_tokens.iter()) {
        if width.is_none() && is_border_width(token) {
            width = Some(*original);
        } else if style.is_none() && BORDER_STYLES.contains(token) {
            style = Some(*original);
        } else if color.is_none() {
            color = Some(*original);
        } else {
            return None;
        }
    }

    let mut out = Vec::with_capacity(12);
    if let Some(w) = width {
        out.extend(per_side("border-{}-width", w));
    }
    if let Some(s) = style {
        out.extend(per_side("border-{}-style", s));
    }
    if let Some(c) = color {
        out.extend(per_side("border-{}-color", c));
    }
    Some(out)
}

fn per_side(pattern: &str, value: &str) -> Vec<Declaration> {
    SIDES
        .iter()
        .map(|side| Declaration::new(pattern.replace("{}", side), value))
        .collect()
}

/// Expand a one-to-four value box shorthand (`margin`, `padding`).
pub fn expand_box(property: &str, value: &str) -> Vec<Declaration> {
    let tokens = split_value_tokens(value);
    let (top, right, bottom, left) = match tokens.as_slice() {
        [a] => (*a, *a, *a, *a),
        [a, b] => (*a, *b, *a, *b),
        [a, b, c] => (*a, *b, *c, *b),
        [a, b, c, d, ..] => (*a, *b, *c, *d),
        [] => return Vec::new(),
    };
    [("top", top), ("right", right), ("bottom", bottom), ("left", left)]
        .into_iter()
        .map(|(side, v)| Declaration::new(format!("{property}-{side}"), v))
        .collect()
}

/// Upper bound on the columns a grid is laid out with.
pub const MAX_GRID_TRACKS: usize = 1000;

/// Number of column tracks described by `grid-template-columns`.
///
/// Computed values are a flat list of sizes; authored values may use
/// `repeat(<n>, ...)`. Anything unrecognised counts as a single track.
pub fn count_grid_tracks(template: &str) -> usize {
    let template = template.trim();
    if template.is_empty() || template == "none" {
        return 1;
    }
    let count: usize = split_value_tokens(template)
        .into_iter()
        .filter(|t| !t.starts_with('['))
        .map(|token| {
            let Some(inner) = token
                .strip_prefix("repeat(")
                .and_then(|rest| rest.strip_suffix(')'))
            else {
                return 1;
            };
            let Some((times, tracks)) = inner.split_once(',') else {
                return 1;
            };
            let per_repeat = split_value_tokens(tracks.trim()).len().max(1);
            times
                .trim()
                .parse::<usize>()
                .map_or(1, |n| n.checked_mul(per_repeat).unwrap_or(MAX_GRID_TRACKS))
        })
        .fold(0usize, usize::saturating_add);
    count.clamp(1, MAX_GRID_TRACKS)
}
