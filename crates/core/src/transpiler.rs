//! Layout transpiler: rewrites flex and grid layout into tables and resolves
//! styles into the subset a word-processor document understands.
//!
//! The walk is post-order over a kuchiki tree. Styles are looked up by the
//! node id stamped during resolution, so nothing here depends on the tree
//! that is being rewritten.

use crate::config::TranspileConfig;
use crate::css::{count_grid_tracks, parse_px, serialize_declarations, Declaration};
use crate::dom;
use crate::error::Result;
use crate::images::PLACEHOLDER_ID_ATTR;
use crate::style::{ComputedStyle, ResolvedDocument, StyleSource, NODE_ID_ATTR};
use kuchiki::NodeRef;
use std::time::Instant;
use tracing::{debug, info};

/// Stylesheet injected into every transpiled document.
pub const DOCX_BASE_STYLESHEET: &str = "
body { font-family: 'Malgun Gothic', 'Noto Sans KR', sans-serif; font-size: 11pt; line-height: 1.6; color: #222; }
table { border-collapse: collapse; }
th, td { border-top: 1px solid #ccc; border-right: 1px solid #ccc; border-bottom: 1px solid #ccc; border-left: 1px solid #ccc; padding: 6px 10px; }
th { background-color: #f0f0f0; font-weight: bold; }
img { max-width: 100%; height: auto; }
h1 { font-size: 22pt; font-weight: bold; }
h2 { font-size: 18pt; font-weight: bold; }
h3 { font-size: 14pt; font-weight: bold; }
h4 { font-size: 12pt; font-weight: bold; }
";

const TABLE_TAGS: &[&str] = &["table", "tr", "td", "th"];

/// Elements rendered from icon fonts.
const ICON_SELECTOR: &str = r#"[class*="fa-"], [class*="bi-"], .material-icons"#;

/// How a node is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Flex,
    Grid,
    Image,
    Table,
    Flow,
}

impl LayoutKind {
    pub fn classify(tag: &str, style: &ComputedStyle) -> Self {
        match style.display() {
            "flex" | "inline-flex" => return LayoutKind::Flex,
            "grid" | "inline-grid" => return LayoutKind::Grid,
            _ => {}
        }
        match tag {
            "img" => LayoutKind::Image,
            t if TABLE_TAGS.contains(&t) => LayoutKind::Table,
            _ => LayoutKind::Flow,
        }
    }
}

fn border_none() -> [Declaration; 4] {
    ["top", "right", "bottom", "left"]
        .map(|side| Declaration::new(format!("border-{side}-style"), "none"))
}

/// Width of a flex item when it is given explicitly, in the order
/// `flex-basis`, then `width`.
fn explicit_width(style: &ComputedStyle) -> Option<String> {
    let usable = |value: &str| {
        let value = value.trim();
        !value.is_empty() && value != "auto" && value != "0px" && !value.ends_with('%')
    };
    style
        .get("flex-basis")
        .filter(|v| usable(v))
        .or_else(|| style.get("width").filter(|v| usable(v)))
        .map(str::to_string)
}

fn is_growing(style: &ComputedStyle) -> bool {
    style
        .get("flex-grow")
        .and_then(|v| v.trim().parse::<f64>().ok())
        .is_some_and(|grow| grow > 0.0)
}

/// Move a replaced child's content into its cell, or the child itself when
/// it has none (void elements) or is a table.
fn fill_cell(td: &NodeRef, child: &NodeRef) {
    let is_table = dom::tag_name(child).as_deref() == Some("table");
    if child.first_child().is_some() && !is_table {
        dom::move_children(child, td);
    } else {
        td.append(child.clone());
    }
}

/// Rewrites resolved documents for DOCX conversion.
#[derive(Debug, Clone, Default)]
pub struct Transpiler {
    config: TranspileConfig,
}

struct Walk<'a> {
    resolved: &'a ResolvedDocument,
    fallback_width: i64,
    empty: ComputedStyle,
    tables: usize,
}

impl Walk<'_> {
    fn style_of(&self, node: &NodeRef) -> &ComputedStyle {
        dom::get_attr(node, NODE_ID_ATTR)
            .and_then(|id| id.parse::<u32>().ok())
            .and_then(|id| self.resolved.style_of(id))
            .unwrap_or(&self.empty)
    }

    fn container_width(&self, style: &ComputedStyle) -> i64 {
        style
            .get("width")
            .and_then(parse_px)
            .filter(|px| *px > 0)
            .unwrap_or(self.fallback_width)
    }

    fn new_table(&self, node: &NodeRef, style: &ComputedStyle, width: i64) -> NodeRef {
        let mut decls = vec![
            Declaration::new("border-collapse", "collapse"),
            Declaration::new("width", format!("{width}px")),
        ];
        decls.extend(style.color_declarations());
        let mut attrs = vec![("style", serialize_declarations(&decls))];
        // Keep the id so an enclosing container can still read this node's styles.
        if let Some(id) = dom::get_attr(node, NODE_ID_ATTR) {
            attrs.push((NODE_ID_ATTR, id));
        }
        dom::new_element("table", &attrs)
    }

    fn replace(&mut self, node: &NodeRef, table: NodeRef) {
        node.insert_before(table);
        node.detach();
        self.tables += 1;
    }

    /// Flex container → single-row or single-column table.
    fn convert_flex(&mut self, node: &NodeRef, style: &ComputedStyle) -> bool {
        let children = dom::element_children(node);
        if children.is_empty() {
            return false;
        }

        let direction = style.get("flex-direction").unwrap_or("row");
        let is_row = direction == "row" || direction == "row-reverse";
        let gap = style
            .get("gap")
            .and_then(parse_px)
            .filter(|g| *g > 0)
            .or_else(|| {
                let axis = if is_row { "column-gap" } else { "row-gap" };
                style.get(axis).and_then(parse_px)
            })
            .unwrap_or(0);
        let container = self.container_width(style);
        let table = self.new_table(node, style, container);
        let last = children.len() - 1;

        if is_row {
            let styles: Vec<ComputedStyle> =
                children.iter().map(|c| self.style_of(c).clone()).collect();
            let explicit: Vec<Option<String>> = styles.iter().map(explicit_width).collect();
            let growers = styles
                .iter()
                .zip(&explicit)
                .filter(|(s, w)| w.is_none() && is_growing(s))
                .count() as i64;
            let claimed: i64 = explicit
                .iter()
                .flatten()
                .filter_map(|w| parse_px(w))
                .sum();
            let grow_share = if growers > 0 {
                ((container - claimed) as f64 / growers as f64).round().max(0.0) as i64
            } else {
                0
            };

            let tr = dom::new_element("tr", &[]);
            for (i, child) in children.iter().enumerate() {
                let child_style = &styles[i];
                let mut decls = vec![Declaration::new("vertical-align", "top")];
                decls.extend(border_none());

                match &explicit[i] {
                    Some(width) => decls.push(Declaration::new("width", width.clone())),
                    None if is_growing(child_style) => {
                        decls.push(Declaration::new("width", format!("{grow_share}px")))
                    }
                    None => {}
                }
                if gap > 0 && i < last {
                    decls.push(Declaration::new("padding-right", format!("{gap}px")));
                }
                decls.extend(child_style.color_declarations());
                if let Some(align) = child_style.get("text-align") {
                    if !matches!(align, "start" | "left") {
                        decls.push(Declaration::new("text-align", align));
                    }
                }

                let td = dom::new_element("td", &[("style", serialize_declarations(&decls))]);
                fill_cell(&td, child);
                tr.append(td);
            }
            table.append(tr);
        } else {
            for (i, child) in children.iter().enumerate() {
                let child_style = self.style_of(child).clone();
                let mut decls: Vec<Declaration> = border_none().into();
                decls.push(Declaration::new("width", format!("{container}px")));
                if gap > 0 && i < last {
                    decls.push(Declaration::new("padding-bottom", format!("{gap}px")));
                }
                decls.extend(child_style.color_declarations());

                let tr = dom::new_element("tr", &[]);
                let td = dom::new_element("td", &[("style", serialize_declarations(&decls))]);
                fill_cell(&td, child);
                tr.append(td);
                table.append(tr);
            }
        }

        debug!(
            "flex ({}) with {} children -> table",
            if is_row { "row" } else { "column" },
            children.len()
        );
        self.replace(node, table);
        true
    }

    /// Grid container → table with one column per track, filled row-major.
    fn convert_grid(&mut self, node: &NodeRef, style: &ComputedStyle) -> bool {
        let children = dom::element_children(node);
        if children.is_empty() {
            return false;
        }

        let columns = count_grid_tracks(style.get("grid-template-columns").unwrap_or(""));
        let gap = style
            .get("gap")
            .and_then(parse_px)
            .filter(|g| *g > 0)
            .or_else(|| style.get("row-gap").and_then(parse_px))
            .unwrap_or(0);
        let container = self.container_width(style);
        let cell_width = (container as f64 / columns as f64).round() as i64;
        let table = self.new_table(node, style, container);

        for row in children.chunks(columns) {
            let tr = dom::new_element("tr", &[]);
            for child in row {
                let child_style = self.style_of(child).clone();
                let mut decls = vec![
                    Declaration::new("width", format!("{cell_width}px")),
                    Declaration::new("vertical-align", "top"),
                ];
                decls.extend(border_none());
                if gap > 0 {
                    decls.push(Declaration::new(
                        "padding",
                        format!("{}px", (gap as f64 / 2.0).round() as i64),
                    ));
                }
                decls.extend(child_style.color_declarations());

                let td = dom::new_element("td", &[("style", serialize_declarations(&decls))]);
                fill_cell(&td, child);
                tr.append(td);
            }
            table.append(tr);
        }

        debug!("grid ({} columns) with {} children -> table", columns, children.len());
        self.replace(node, table);
        true
    }

    fn apply_snapshot(&self, node: &NodeRef, tag: &str) {
        let snapshot = self.style_of(node).snapshot();
        if tag == "img" {
            let mut decls = snapshot;
            decls.push(Declaration::new("max-width", "100%"));
            decls.push(Declaration::new("height", "auto"));
            dom::set_attr(node, "style", serialize_declarations(&decls));
        } else if !snapshot.is_empty() {
            dom::set_attr(node, "style", serialize_declarations(&snapshot));
        }
    }

    /// Post-order rewrite of `node` and everything below it.
    fn visit(&mut self, node: &NodeRef, is_root: bool) {
        for child in dom::element_children(node) {
            self.visit(&child, false);
        }

        let Some(tag) = dom::tag_name(node) else {
            return;
        };
        let style = self.style_of(node).clone();
        let kind = LayoutKind::classify(&tag, &style);

        if !is_root {
            match kind {
                LayoutKind::Flex if self.convert_flex(node, &style) => return,
                LayoutKind::Grid if self.convert_grid(node, &style) => return,
                _ => {}
            }
        }

        match kind {
            LayoutKind::Table => {}
            LayoutKind::Image => self.apply_snapshot(node, "img"),
            _ => self.apply_snapshot(node, &tag),
        }
        dom::remove_attr(node, "class");
    }

    /// Re-style everything inside table cells except table structure and images.
    fn restyle_cell_contents(&self, document: &NodeRef) {
        for cell in dom::select_all(document, "table td, table th") {
            for node in dom::elements(&cell).into_iter().skip(1) {
                let tag = dom::tag_name(&node).unwrap_or_default();
                if tag == "img" || TABLE_TAGS.contains(&tag.as_str()) {
                    continue;
                }
                self.apply_snapshot(&node, &tag);
                dom::remove_attr(&node, "class");
            }
        }
    }
}

impl Transpiler {
    pub fn new(config: TranspileConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TranspileConfig {
        &self.config
    }

    /// Resolve styles with `source` and transpile the result.
    pub fn transpile_html(&self, html: &str, source: &dyn StyleSource) -> Result<String> {
        let resolved = source.resolve(html)?;
        Ok(self.transpile(&resolved))
    }

    /// Rewrite a resolved document into DOCX-ready markup.
    pub fn transpile(&self, resolved: &ResolvedDocument) -> String {
        let start = Instant::now();
        let document = dom::parse_document(&resolved.html);
        let icons = dom::select_all(&document, ICON_SELECTOR);

        let mut walk = Walk {
            resolved,
            fallback_width: self.config.fallback_width_px as i64,
            empty: ComputedStyle::new(),
            tables: 0,
        };
        if let Some(body) = dom::select_first(&document, "body") {
            walk.visit(&body, true);
        }
        walk.restyle_cell_contents(&document);

        remove_unrenderable(&document, &icons);
        strip_attributes(&document);
        for node in dom::select_all(&document, "script, link[rel=\"stylesheet\"], style, meta[charset]") {
            node.detach();
        }

        let head = dom::select_first(&document, "head")
            .map(|head| dom::inner_html(&head))
            .unwrap_or_default();
        let body = dom::select_first(&document, "body")
            .map(|body| dom::inner_html(&body))
            .unwrap_or_default();
        let base = if self.config.base_stylesheet {
            format!("<style>{DOCX_BASE_STYLESHEET}</style>")
        } else {
            String::new()
        };

        info!(
            "Transpiled document: {} layout tables in {:?}",
            walk.tables,
            start.elapsed()
        );
        format!(
            "<!DOCTYPE html><html><head><meta charset=\"UTF-8\">{head}{base}</head><body>{body}</body></html>"
        )
    }
}

/// Drop vector graphics, icon-font elements and empty `<i>` placeholders.
fn remove_unrenderable(document: &NodeRef, icons: &[NodeRef]) {
    for svg in dom::select_all(document, "svg") {
        svg.detach();
    }
    for icon in icons {
        if icon.text_contents().trim().is_empty() {
            icon.detach();
        }
    }
    for i in dom::select_all(document, "i") {
        if i.text_contents().trim().is_empty() && dom::element_children(&i).is_empty() {
            i.detach();
        }
    }
}

/// Strip `data-*` attributes other than the placeholder id, and XML
/// namespace declarations.
fn strip_attributes(document: &NodeRef) {
    for node in dom::elements(document) {
        for name in dom::attr_names(&node) {
            let is_data = name.starts_with("data-") && name != PLACEHOLDER_ID_ATTR;
            let is_xmlns = name == "xmlns" || name.starts_with("xmlns:");
            if is_data || is_xmlns {
                dom::remove_attr(&node, &name);
            }
        }
    }
}
