//! Final compatibility pass over serialized DOCX-bound markup.
//!
//! The converter's style parser rejects `border` shorthands and any `width`
//! outside `px|pt|cm|in`; a single bad value breaks the whole document, so
//! every `style="..."` attribute is rewritten declaration by declaration.

use crate::css::{expand_border, parse_declarations, serialize_declarations, Declaration};
use tracing::debug;

fn is_absolute_width(value: &str) -> bool {
    let width = static_regex!(ABSOLUTE_WIDTH, r"^\d+(\.\d+)?(px|pt|cm|in)$");
    width.is_match(value)
}

fn is_unitless_number(value: &str) -> bool {
    let number = static_regex!(UNITLESS, r"^\d+(\.\d+)?$");
    number.is_match(value)
}

/// Repair a `width` value, or `None` to drop the declaration.
pub fn sanitize_width(value: &str, fallback_width_px: u32) -> Option<String> {
    let value = value.trim();
    if is_absolute_width(value) {
        Some(value.to_string())
    } else if value.contains('%') {
        Some(format!("{fallback_width_px}px"))
    } else if is_unitless_number(value) {
        Some(format!("{value}px"))
    } else {
        None
    }
}

/// Rewrite one declaration block.
pub fn sanitize_style(block: &str, fallback_width_px: u32) -> String {
    let mut out: Vec<Declaration> = Vec::new();
    for decl in parse_declarations(block) {
        match decl.property.as_str() {
            "border" => match expand_border(&decl.value) {
                Some(longhands) => out.extend(longhands),
                None => debug!("Dropping unrecognised border '{}'", decl.value),
            },
            "width" => {
                if let Some(width) = sanitize_width(&decl.value, fallback_width_px) {
                    out.push(Declaration::new("width", width));
                }
            }
            _ => out.push(decl),
        }
    }
    serialize_declarations(&out)
}

/// Rewrite every double-quoted `style` attribute in `markup`.
pub fn sanitize_for_docx(markup: &str, fallback_width_px: u32) -> String {
    let style_attr = static_regex!(STYLE_ATTR, r#"style="([^"]*)""#);
    style_attr
        .replace_all(markup, |caps: &regex::Captures| {
            format!("style=\"{}\"", sanitize_style(&caps[1], fallback_width_px))
        })
        .into_owned()
}
