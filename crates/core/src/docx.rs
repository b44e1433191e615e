//! Writes sanitized markup out as a Word document.
//!
//! Only the subset the transpiler emits is understood: block elements become
//! paragraphs, `<table>` becomes a Word table (nested tables included), inline
//! formatting becomes run properties and data-URI `<img>` sources become
//! embedded pictures.

use crate::css::{parse_declarations, parse_number, parse_px, Declaration};
use crate::dom;
use crate::error::{ExportError, Result};
use crate::images::decode_data_uri;
use docx_rs::{
    AlignmentType, BreakType, Docx, PageMargin, Paragraph, Pic, Run, RunFonts, Shading, Table,
    TableBorders, TableCell, TableRow, WidthType,
};
use kuchiki::NodeRef;
use std::io::Cursor;
use tracing::{debug, info, warn};

/// Page margin on every side, in twentieths of a point.
pub const PAGE_MARGIN_TWIPS: i32 = 1440;
/// Body font.
pub const DEFAULT_FONT: &str = "Malgun Gothic";
/// Body size, in half-points.
pub const DEFAULT_FONT_SIZE: usize = 22;

/// Printable width of a Letter page with one-inch margins, in CSS pixels.
const TEXT_WIDTH_PX: f64 = 624.0;
const EMU_PER_PX: f64 = 9525.0;
const TWIPS_PER_PX: f64 = 15.0;

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "header", "footer", "main", "aside", "nav", "blockquote",
    "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "figure", "figcaption", "hr",
];
const SKIPPED_TAGS: &[&str] = &["head", "script", "style", "title", "meta", "link", "noscript"];

/// Title safe to embed as an XML attribute; falls back to `document`.
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || c == '_' || c == '-' {
                c
            } else {
                ' '
            }
        })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Download name for a document: a trailing `.hwp` is dropped, `.docx` added.
pub fn docx_file_name(name: &str) -> String {
    let name = name.trim();
    let stem = match name.len().checked_sub(4) {
        Some(cut) if name.is_char_boundary(cut) && name[cut..].eq_ignore_ascii_case(".hwp") => {
            &name[..cut]
        }
        _ => name,
    };
    let stem = if stem.is_empty() { "document" } else { stem };
    format!("{stem}.docx")
}

/// Any CSS colour as an upper-case hex triple; `None` when it is
/// unparseable or fully transparent.
pub fn css_color_to_hex(value: &str) -> Option<String> {
    let value = value.trim();
    if !value.is_ascii() {
        return None;
    }
    let color = csscolorparser::parse(value).ok()?;
    let [r, g, b, a] = color.to_rgba8();
    if a == 0 {
        return None;
    }
    Some(format!("{r:02X}{g:02X}{b:02X}"))
}

/// CSS font size (`px` or `pt`) in half-points.
fn font_size_half_points(value: &str) -> Option<usize> {
    let value = value.trim();
    let number = parse_number(value)?;
    let points = if value.ends_with("pt") {
        number
    } else if value.ends_with("px") {
        number * 0.75
    } else {
        return None;
    };
    (points > 0.0).then(|| (points * 2.0).round() as usize)
}

fn css_length_px(value: &str) -> Option<f64> {
    let value = value.trim();
    let number = parse_number(value)?;
    if value.ends_with("px") || value.chars().all(|c| c.is_ascii_digit() || c == '.') {
        Some(number)
    } else if value.ends_with("pt") {
        Some(number / 0.75)
    } else if value.ends_with("in") {
        Some(number * 96.0)
    } else if value.ends_with("cm") {
        Some(number * 96.0 / 2.54)
    } else {
        None
    }
}

fn style_declarations(node: &NodeRef) -> Vec<Declaration> {
    dom::get_attr(node, "style")
        .map(|s| parse_declarations(&s))
        .unwrap_or_default()
}

fn find<'a>(decls: &'a [Declaration], property: &str) -> Option<&'a str> {
    decls
        .iter()
        .rev()
        .find(|d| d.property == property)
        .map(|d| d.value.as_str())
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq)]
struct RunStyle {
    bold: bool,
    italic: bool,
    underline: bool,
    size: Option<usize>,
    color: Option<String>,
    font: Option<String>,
}

impl RunStyle {
    fn child(&self, tag: &str, decls: &[Declaration]) -> RunStyle {
        let mut style = self.clone();
        match tag {
            "b" | "strong" | "th" => style.bold = true,
            "i" | "em" => style.italic = true,
            "u" => style.underline = true,
            "h1" => {
                style.bold = true;
                style.size = Some(44);
            }
            "h2" => {
                style.bold = true;
                style.size = Some(36);
            }
            "h3" => {
                style.bold = true;
                style.size = Some(28);
            }
            "h4" | "h5" | "h6" => {
                style.bold = true;
                style.size = Some(24);
            }
            _ => {}
        }
        if let Some(weight) = find(decls, "font-weight") {
            style.bold = match weight {
                "bold" | "bolder" => true,
                "normal" | "lighter" => false,
                other => parse_px(other).map(|w| w >= 600).unwrap_or(style.bold),
            };
        }
        if let Some(font_style) = find(decls, "font-style") {
            style.italic = font_style == "italic" || font_style == "oblique";
        }
        if let Some(decoration) = find(decls, "text-decoration")
            .or_else(|| find(decls, "text-decoration-line"))
        {
            style.underline = decoration.contains("underline");
        }
        if let Some(size) = find(decls, "font-size").and_then(font_size_half_points) {
            style.size = Some(size);
        }
        if let Some(color) = find(decls, "color").and_then(css_color_to_hex) {
            style.color = Some(color);
        }
        if let Some(family) = find(decls, "font-family") {
            let first = family
                .split(',')
                .next()
                .map(|f| f.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
                .filter(|f| !f.is_empty());
            if first.is_some() {
                style.font = first;
            }
        }
        style
    }

    fn run(&self) -> Run {
        let mut run = Run::new();
        if self.bold {
            run = run.bold();
        }
        if self.italic {
            run = run.italic();
        }
        if self.underline {
            run = run.underline("single");
        }
        if let Some(size) = self.size {
            run = run.size(size);
        }
        if let Some(color) = &self.color {
            run = run.color(color.clone());
        }
        if let Some(font) = &self.font {
            run = run.fonts(RunFonts::new().ascii(font).hi_ansi(font).east_asia(font));
        }
        run
    }
}

enum Block {
    Paragraph(Paragraph),
    Table(Table),
}

#[derive(Default)]
struct ParagraphBuffer {
    runs: Vec<Run>,
    align: Option<AlignmentType>,
    has_text: bool,
}

impl ParagraphBuffer {
    fn aligned(align: Option<AlignmentType>) -> Self {
        Self {
            align,
            ..Default::default()
        }
    }

    fn flush(&mut self, out: &mut Vec<Block>) {
        if self.runs.is_empty() {
            return;
        }
        let mut paragraph = Paragraph::new();
        for run in self.runs.drain(..) {
            paragraph = paragraph.add_run(run);
        }
        if let Some(align) = self.align {
            paragraph = paragraph.align(align);
        }
        self.has_text = false;
        out.push(Block::Paragraph(paragraph));
    }
}

fn alignment(decls: &[Declaration]) -> Option<AlignmentType> {
    match find(decls, "text-align")? {
        "center" => Some(AlignmentType::Center),
        "right" | "end" => Some(AlignmentType::Right),
        "justify" => Some(AlignmentType::Both),
        "left" | "start" => Some(AlignmentType::Left),
        _ => None,
    }
}

/// Converts sanitized markup into `.docx` bytes.
#[derive(Debug, Clone)]
pub struct DocxWriter {
    title: String,
}

impl DocxWriter {
    pub fn new(title: &str) -> Self {
        Self {
            title: sanitize_title(title),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn write(&self, html: &str) -> Result<Vec<u8>> {
        let document = dom::parse_document(html);
        let root = dom::select_first(&document, "body").unwrap_or(document);

        let mut blocks = Vec::new();
        let mut paragraph = ParagraphBuffer::default();
        walk_children(&root, &RunStyle::default(), &mut paragraph, &mut blocks);
        paragraph.flush(&mut blocks);

        let mut docx = Docx::new()
            .page_margin(
                PageMargin::new()
                    .top(PAGE_MARGIN_TWIPS)
                    .right(PAGE_MARGIN_TWIPS)
                    .bottom(PAGE_MARGIN_TWIPS)
                    .left(PAGE_MARGIN_TWIPS),
            )
            .default_fonts(
                RunFonts::new()
                    .ascii(DEFAULT_FONT)
                    .hi_ansi(DEFAULT_FONT)
                    .east_asia(DEFAULT_FONT),
            )
            .default_size(DEFAULT_FONT_SIZE);

        let count = blocks.len();
        for block in blocks {
            docx = match block {
                Block::Paragraph(p) => docx.add_paragraph(p),
                Block::Table(t) => docx.add_table(t),
            };
        }
        if count == 0 {
            docx = docx.add_paragraph(Paragraph::new());
        }

        let mut buffer = Cursor::new(Vec::new());
        docx.build()
            .pack(&mut buffer)
            .map_err(|e| ExportError::DocxError(e.to_string()))?;
        let bytes = buffer.into_inner();
        info!(
            "Wrote '{}' with {} blocks ({} bytes)",
            self.title,
            count,
            bytes.len()
        );
        Ok(bytes)
    }
}

fn walk_children(
    node: &NodeRef,
    style: &RunStyle,
    paragraph: &mut ParagraphBuffer,
    out: &mut Vec<Block>,
) {
    for child in node.children() {
        walk(&child, style, paragraph, out);
    }
}

fn walk(node: &NodeRef, style: &RunStyle, paragraph: &mut ParagraphBuffer, out: &mut Vec<Block>) {
    if let Some(text) = node.as_text() {
        let text = collapse_whitespace(&text.borrow());
        let text = if paragraph.has_text {
            text
        } else {
            text.trim_start().to_string()
        };
        if !text.is_empty() {
            paragraph.runs.push(style.run().add_text(text));
            paragraph.has_text = true;
        }
        return;
    }
    let Some(tag) = dom::tag_name(node) else {
        return;
    };
    if SKIPPED_TAGS.contains(&tag.as_str()) {
        return;
    }
    let decls = style_declarations(node);
    if find(&decls, "display") == Some("none") {
        return;
    }
    match tag.as_str() {
        "br" => {
            paragraph
                .runs
                .push(Run::new().add_break(BreakType::TextWrapping));
            paragraph.has_text = false;
        }
        "img" => {
            if let Some(run) = image_run(node, &decls) {
                paragraph.runs.push(run);
            }
        }
        "table" => {
            paragraph.flush(out);
            out.push(Block::Table(build_table(node, style)));
        }
        tag if BLOCK_TAGS.contains(&tag) => {
            paragraph.flush(out);
            let child_style = style.child(tag, &decls);
            let mut inner = ParagraphBuffer::aligned(alignment(&decls).or(paragraph.align));
            walk_children(node, &child_style, &mut inner, out);
            inner.flush(out);
        }
        tag => {
            let child_style = style.child(tag, &decls);
            walk_children(node, &child_style, paragraph, out);
        }
    }
}

fn image_run(node: &NodeRef, decls: &[Declaration]) -> Option<Run> {
    let src = dom::get_attr(node, "src")?;
    let Some((_, bytes)) = decode_data_uri(&src) else {
        debug!("Skipping non-embedded image source");
        return None;
    };
    let decoded = match image::load_from_memory(&bytes) {
        Ok(img) => img,
        Err(e) => {
            warn!("Skipping undecodable image: {}", e);
            return None;
        }
    };
    let mut png = Cursor::new(Vec::new());
    if let Err(e) = decoded.write_to(&mut png, image::ImageFormat::Png) {
        warn!("Skipping image that failed to re-encode: {}", e);
        return None;
    }

    let natural_w = decoded.width().max(1) as f64;
    let natural_h = decoded.height().max(1) as f64;
    let width = find(decls, "width")
        .and_then(css_length_px)
        .or_else(|| dom::get_attr(node, "width").and_then(|w| css_length_px(&w)))
        .unwrap_or(natural_w)
        .min(TEXT_WIDTH_PX);
    let height = width * natural_h / natural_w;

    let pic = Pic::new(&png.into_inner()).size(
        (width * EMU_PER_PX).round() as u32,
        (height * EMU_PER_PX).round() as u32,
    );
    Some(Run::new().add_image(pic))
}

fn table_rows(table: &NodeRef) -> Vec<NodeRef> {
    let mut rows = Vec::new();
    for child in dom::element_children(table) {
        match dom::tag_name(&child).as_deref() {
            Some("tr") => rows.push(child),
            Some("thead") | Some("tbody") | Some("tfoot") => rows.extend(
                dom::element_children(&child)
                    .into_iter()
                    .filter(|n| dom::tag_name(n).as_deref() == Some("tr")),
            ),
            _ => {}
        }
    }
    rows
}

fn is_borderless(decls: &[Declaration]) -> bool {
    ["top", "right", "bottom", "left"].iter().all(|side| {
        find(decls, &format!("border-{side}-style")) == Some("none")
            || find(decls, &format!("border-{side}-width")).and_then(parse_number) == Some(0.0)
    })
}

fn build_table(node: &NodeRef, style: &RunStyle) -> Table {
    let table_decls = style_declarations(node);
    let mut rows = Vec::new();
    let mut grid: Vec<usize> = Vec::new();
    let mut all_borderless = true;

    for (index, row) in table_rows(node).into_iter().enumerate() {
        let mut cells = Vec::new();
        for cell_node in dom::element_children(&row) {
            let tag = dom::tag_name(&cell_node).unwrap_or_default();
            if tag != "td" && tag != "th" {
                continue;
            }
            let decls = style_declarations(&cell_node);
            all_borderless &= is_borderless(&decls);

            let mut blocks = Vec::new();
            let mut paragraph = ParagraphBuffer::aligned(alignment(&decls));
            walk_children(&cell_node, &style.child(&tag, &decls), &mut paragraph, &mut blocks);
            paragraph.flush(&mut blocks);

            let mut cell = TableCell::new();
            let mut ends_with_paragraph = false;
            for block in blocks {
                cell = match block {
                    Block::Paragraph(p) => {
                        ends_with_paragraph = true;
                        cell.add_paragraph(p)
                    }
                    Block::Table(t) => {
                        ends_with_paragraph = false;
                        cell.add_table(t)
                    }
                };
            }
            // A cell must end with a paragraph.
            if !ends_with_paragraph {
                cell = cell.add_paragraph(Paragraph::new());
            }

            let width = find(&decls, "width")
                .and_then(css_length_px)
                .map(|px| (px * TWIPS_PER_PX).round() as usize);
            if let Some(width) = width {
                cell = cell.width(width, WidthType::Dxa);
            }
            if index == 0 {
                grid.push(width.unwrap_or(0));
            }
            if let Some(fill) = find(&decls, "background-color").and_then(css_color_to_hex) {
                cell = cell.shading(Shading::new().fill(fill));
            }
            cells.push(cell);
        }
        if !cells.is_empty() {
            rows.push(TableRow::new(cells));
        }
    }

    let mut table = Table::new(rows);
    if !grid.is_empty() && grid.iter().all(|w| *w > 0) {
        table = table.set_grid(grid);
    }
    if all_borderless || is_borderless(&table_decls) {
        table = table.set_borders(TableBorders::with_empty());
    }
    table
}
