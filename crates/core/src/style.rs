//! Style snapshots and the sources that resolve computed styles.
//!
//! The transpiler never reads styles from the tree it is mutating. Instead a
//! [`StyleSource`] stamps every element with a node id and captures the
//! computed values up front, producing a [`ResolvedDocument`].

use crate::config::{TranspileConfig, Viewport};
use crate::css::{expand_border, expand_box, parse_declarations, Declaration};
use crate::dom;
use crate::error::{ExportError, Result};
use crate::surface::{evaluate_json, CaptureTarget, RenderBackend};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, info};

/// Attribute carrying the node id assigned during style resolution.
pub const NODE_ID_ATTR: &str = "data-fixer-node";

/// Properties the target document format understands, in kebab case.
pub const SNAPSHOT_PROPERTIES: &[&str] = &[
    "color",
    "background-color",
    "font-size",
    "font-weight",
    "font-style",
    "font-family",
    "text-align",
    "text-decoration",
    "line-height",
    "letter-spacing",
    "margin-top",
    "margin-bottom",
    "margin-left",
    "margin-right",
    "padding-top",
    "padding-bottom",
    "padding-left",
    "padding-right",
    "border-top-width",
    "border-bottom-width",
    "border-left-width",
    "border-right-width",
    "border-top-style",
    "border-bottom-style",
    "border-left-style",
    "border-right-style",
    "border-top-color",
    "border-bottom-color",
    "border-left-color",
    "border-right-color",
    "width",
    "max-width",
    "min-height",
    "vertical-align",
    "text-indent",
];

/// Properties read only to drive layout decisions.
pub const LAYOUT_PROPERTIES: &[&str] = &[
    "display",
    "flex-direction",
    "flex-basis",
    "flex-grow",
    "gap",
    "column-gap",
    "row-gap",
    "grid-template-columns",
];

/// Values that carry no information for the target format.
const SKIP_VALUES: &[&str] = &[
    "rgba(0, 0, 0, 0)",
    "transparent",
    "none",
    "normal",
    "start",
    "0px",
    "auto",
    "medium",
    "rgb(0, 0, 0)",
];

/// Properties inherited from the parent when resolving statically.
const INHERITED: &[&str] = &[
    "color",
    "font-size",
    "font-weight",
    "font-style",
    "font-family",
    "text-align",
    "line-height",
    "letter-spacing",
    "text-indent",
];

/// Resolved style values of one element, keyed by kebab-case property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ComputedStyle(BTreeMap<String, String>);

impl ComputedStyle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, property: &str) -> Option<&str> {
        self.0.get(property).map(String::as_str)
    }

    pub fn set(&mut self, property: impl Into<String>, value: impl Into<String>) {
        self.0.insert(property.into(), value.into());
    }

    /// `display` value, defaulting to `inline`.
    pub fn display(&self) -> &str {
        self.get("display").unwrap_or("inline")
    }

    /// The constrained snapshot written back as an inline `style`.
    pub fn snapshot(&self) -> Vec<Declaration> {
        SNAPSHOT_PROPERTIES
            .iter()
            .filter_map(|&property| {
                let value = self.get(property)?.trim();
                if value.is_empty() || SKIP_VALUES.contains(&value) {
                    return None;
                }
                let redundant = match property {
                    "font-size" => value == "16px",
                    "font-weight" => value == "400" || value == "normal",
                    _ => false,
                };
                (!redundant).then(|| Declaration::new(property, value))
            })
            .collect()
    }

    /// Background and text colour only, for table cells.
    pub fn color_declarations(&self) -> Vec<Declaration> {
        let mut out = Vec::new();
        if let Some(bg) = self.get("background-color") {
            if bg != "rgba(0, 0, 0, 0)" && bg != "transparent" {
                out.push(Declaration::new("background-color", bg));
            }
        }
        if let Some(color) = self.get("color") {
            if color != "rgb(0, 0, 0)" {
                out.push(Declaration::new("color", color));
            }
        }
        out
    }
}

/// A document whose elements carry [`NODE_ID_ATTR`] plus the styles captured
/// for each id.
#[derive(Debug, Clone, Default)]
pub struct ResolvedDocument {
    pub html: String,
    pub styles: HashMap<u32, ComputedStyle>,
}

impl ResolvedDocument {
    pub fn style_of(&self, id: u32) -> Option<&ComputedStyle> {
        self.styles.get(&id)
    }
}

/// Produces computed styles for a document before it is rewritten.
pub trait StyleSource: Send + Sync {
    fn resolve(&self, html: &str) -> Result<ResolvedDocument>;
}

/// Static approximation of the cascade built from tag defaults and inline
/// `style` attributes.
///
/// Utility classes and stylesheets are ignored; use [`BrowserStyleSource`]
/// when the document relies on them.
#[derive(Debug, Clone, Default)]
pub struct InlineStyleSource;

impl InlineStyleSource {
    pub fn new() -> Self {
        Self
    }

    fn compute(node: &kuchiki::NodeRef, parent: Option<&ComputedStyle>) -> ComputedStyle {
        let mut style = ComputedStyle::new();
        if let Some(parent) = parent {
            for &property in INHERITED {
                if let Some(value) = parent.get(property) {
                    style.set(property, value);
                }
            }
        }

        let tag = dom::tag_name(node).unwrap_or_default();
        for (property, value) in tag_defaults(&tag) {
            style.set(*property, *value);
        }

        let inline = dom::get_attr(node, "style").unwrap_or_default();
        for decl in parse_declarations(&inline) {
            for longhand in expand_shorthand(decl) {
                style.set(longhand.property, longhand.value);
            }
        }
        style
    }
}

impl StyleSource for InlineStyleSource {
    fn resolve(&self, html: &str) -> Result<ResolvedDocument> {
        let document = dom::parse_document(html);
        let mut styles = HashMap::new();
        // Document order visits every parent before its children.
        let mut ids: HashMap<*const kuchiki::Node, u32> = HashMap::new();

        for (id, node) in dom::elements(&document).into_iter().enumerate() {
            let id = id as u32;
            let parent_style = node
                .parent()
                .and_then(|parent| ids.get(&Rc::as_ptr(&parent.0)))
                .and_then(|pid| styles.get(pid));
            let style = Self::compute(&node, parent_style);
            dom::set_attr(&node, NODE_ID_ATTR, id.to_string());
            styles.insert(id, style);
            ids.insert(Rc::as_ptr(&node.0), id);
        }

        debug!("Resolved {} elements from inline styles", styles.len());
        Ok(ResolvedDocument {
            html: dom::serialize(&document),
            styles,
        })
    }
}

fn tag_defaults(tag: &str) -> &'static [(&'static str, &'static str)] {
    match tag {
        "div" | "p" | "section" | "article" | "header" | "footer" | "main" | "nav" | "aside"
        | "ul" | "ol" | "blockquote" | "figure" | "body" | "html" | "form" | "pre" => {
            &[("display", "block")]
        }
        "h1" => &[("display", "block"), ("font-size", "32px"), ("font-weight", "700")],
        "h2" => &[("display", "block"), ("font-size", "24px"), ("font-weight", "700")],
        "h3" => &[("display", "block"), ("font-size", "18.72px"), ("font-weight", "700")],
        "h4" | "h5" | "h6" => &[("display", "block"), ("font-weight", "700")],
        "li" => &[("display", "list-item")],
        "table" => &[("display", "table")],
        "tr" => &[("display", "table-row")],
        "td" => &[("display", "table-cell")],
        "th" => &[("display", "table-cell"), ("font-weight", "700")],
        "b" | "strong" => &[("font-weight", "700")],
        "em" | "i" => &[("font-style", "italic")],
        "head" | "script" | "style" | "link" | "meta" | "title" => &[("display", "none")],
        _ => &[],
    }
}

fn expand_shorthand(decl: Declaration) -> Vec<Declaration> {
    match decl.property.as_str() {
        "margin" | "padding" => expand_box(&decl.property, &decl.value),
        "border" => expand_border(&decl.value).unwrap_or_else(|| vec![decl]),
        "background" if !decl.value.contains("url(") => {
            vec![Declaration::new("background-color", decl.value)]
        }
        "flex" => expand_flex(&decl.value),
        _ => vec![decl],
    }
}

fn expand_flex(value: &str) -> Vec<Declaration> {
    let tokens: Vec<&str> = value.split_whitespace().collect();
    let (grow, basis) = match tokens.as_slice() {
        ["none"] => ("0", "auto"),
        ["auto"] => ("1", "auto"),
        [g] if g.parse::<f64>().is_ok() => (*g, "0%"),
        [b] => ("1", *b),
        [g, shrink] if shrink.parse::<f64>().is_ok() => (*g, "0%"),
        [g, b] => (*g, *b),
        [g, _shrink, b, ..] => (*g, *b),
        [] => return Vec::new(),
    };
    vec![
        Declaration::new("flex-grow", grow),
        Declaration::new("flex-basis", basis),
    ]
}

/// Captures computed styles from a live render in a browser surface, after
/// the page's utility-class framework has had time to apply.
pub struct BrowserStyleSource<B: RenderBackend> {
    backend: Arc<B>,
    config: TranspileConfig,
}

impl<B: RenderBackend> BrowserStyleSource<B> {
    pub fn new(backend: Arc<B>, config: TranspileConfig) -> Self {
        Self { backend, config }
    }

    fn viewport(&self) -> Viewport {
        self.config.resolve_viewport
    }
}

#[derive(Debug, Deserialize)]
struct CapturedStyles {
    html: String,
    styles: HashMap<String, ComputedStyle>,
}

impl<B: RenderBackend> StyleSource for BrowserStyleSource<B> {
    fn resolve(&self, html: &str) -> Result<ResolvedDocument> {
        let target = CaptureTarget::acquire(
            self.backend.as_ref(),
            html,
            self.viewport(),
            self.config.framework_settle_delay,
        )?;

        let script = style_capture_script();
        let captured: CapturedStyles = evaluate_json(target.surface(), &script)?;
        target.release()?;

        let mut styles = HashMap::with_capacity(captured.styles.len());
        for (key, style) in captured.styles {
            let id = key.parse::<u32>().map_err(|_| {
                ExportError::ScriptFailed(format!("non-numeric node id '{key}'"))
            })?;
            styles.insert(id, style);
        }

        info!("Captured computed styles for {} elements", styles.len());
        Ok(ResolvedDocument {
            html: captured.html,
            styles,
        })
    }
}

fn style_capture_script() -> String {
    let properties: Vec<&str> = SNAPSHOT_PROPERTIES
        .iter()
        .chain(LAYOUT_PROPERTIES.iter())
        .copied()
        .collect();
    let properties = serde_json::to_string(&properties).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"(() => {{
    const props = {properties};
    const styles = {{}};
    let next = 0;
    for (const el of document.querySelectorAll('*')) {{
        const id = String(next++);
        el.setAttribute('{NODE_ID_ATTR}', id);
        const computed = window.getComputedStyle(el);
        const entry = {{}};
        for (const p of props) {{
            const v = computed.getPropertyValue(p);
            if (v) entry[p] = v.trim();
        }}
        styles[id] = entry;
    }}
    return JSON.stringify({{ html: '<!DOCTYPE html>' + document.documentElement.outerHTML, styles }});
}})()"#
    )
}
