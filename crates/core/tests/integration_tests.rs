//! Integration tests for gdoc-fixer-core.
//!
//! Most tests drive the pipelines through in-memory render backends, fetchers
//! and generators. Tests marked with `require_browser!` need a local Chrome or
//! Chromium and skip themselves when none is found.
//!
//! Run with: cargo test --package gdoc-fixer-core --test integration_tests

use gdoc_fixer_core::error::{ExportError, Result};
use gdoc_fixer_core::fetch::FetchedResource;
use gdoc_fixer_core::generate::{modify_all_slides_html, GenerationRequest};
use gdoc_fixer_core::images::{extract_and_replace_with_placeholders, restore_placeholders};
use gdoc_fixer_core::sanitize::sanitize_for_docx;
use gdoc_fixer_core::{
    ChromeBackend, Exporter, ExporterConfig, Fetcher, HtmlGenerator, InlineStyleSource,
    PresentationStore, RenderBackend, RenderConfig, RenderSurface, SlideConfig, StyleMode,
    TranspileConfig, Transpiler, Viewport,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Surface that answers the readiness checks and captures a blank canvas.
struct BlankSurface {
    closed: Arc<AtomicUsize>,
}

impl RenderSurface for BlankSurface {
    fn evaluate(&self, script: &str, _await_promise: bool) -> Result<Value> {
        if script.contains("document.body !== null") {
            return Ok(Value::Bool(true));
        }
        if script.contains("document.styleSheets") {
            return Ok(Value::Array(Vec::new()));
        }
        if script.contains("outerHTML") {
            return Ok(Value::String("<html><body><p>rendered</p></body></html>".to_string()));
        }
        Ok(Value::Null)
    }

    fn capture_png(&self, clip: Viewport, pixel_ratio: f64) -> Result<Vec<u8>> {
        let (w, h) = clip.scaled(pixel_ratio);
        let img = image::RgbaImage::from_pixel(w, h, image::Rgba([20, 40, 60, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png)
            .map_err(|e| ExportError::PngEncodingError(e.to_string()))?;
        Ok(out.into_inner())
    }

    fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct BlankBackend {
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl RenderBackend for BlankBackend {
    type Surface = BlankSurface;

    fn open(&self, _html: &str, _viewport: Viewport) -> Result<BlankSurface> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(BlankSurface {
            closed: Arc::clone(&self.closed),
        })
    }
}

#[derive(Default)]
struct StaticFetcher {
    resources: HashMap<String, (String, Vec<u8>)>,
}

impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResource> {
        match self.resources.get(url) {
            Some((content_type, bytes)) => Ok(FetchedResource {
                url: url.to_string(),
                content_type: Some(content_type.clone()),
                bytes: bytes.clone(),
            }),
            None => Err(ExportError::Http {
                url: url.to_string(),
                message: "status 404".to_string(),
            }),
        }
    }
}

/// Edits whichever slide it receives after a per-slide delay.
struct SlowEditor {
    delays: Vec<(&'static str, Duration)>,
}

impl HtmlGenerator for SlowEditor {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String> {
        for (marker, delay) in &self.delays {
            if request.payload.contains(&format!(">{marker}<")) {
                tokio::time::sleep(*delay).await;
                return Ok(slide(&format!("{marker} (edited)")));
            }
        }
        Err(ExportError::UnusableHtml)
    }
}

/// Returns a fixed response.
struct Canned(String);

impl HtmlGenerator for Canned {
    async fn generate(&self, _request: GenerationRequest<'_>) -> Result<String> {
        Ok(self.0.clone())
    }
}

fn slide(body: &str) -> String {
    format!(r#"<div style="width:1280px;height:720px;overflow:hidden">{body}</div>"#)
}

fn test_config() -> ExporterConfig {
    let mut config = ExporterConfig::default();
    config.render.settle_delay = Duration::ZERO;
    config.transpile = TranspileConfig::default().style_mode(StyleMode::Inline);
    config
}

fn png_bytes() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(3, 3, image::Rgba([0, 255, 0, 255]));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Check if Chrome is available
fn browser_available() -> bool {
    ChromeBackend::find_browser(&RenderConfig::default()).is_ok()
}

/// Skip test if no browser is available
macro_rules! require_browser {
    () => {
        if !browser_available() {
            eprintln!("Skipping test: Chrome/Chromium not found");
            return;
        }
    };
}

// ============================================================================
// PNG export
// ============================================================================

#[tokio::test]
async fn test_png_export_1080_at_ratio_2_is_2160() {
    let backend = Arc::new(BlankBackend::default());
    let exporter = Exporter::new(Arc::clone(&backend), StaticFetcher::default(), test_config()).unwrap();

    let export = exporter
        .export_png("<p>poster</p>", Viewport::new(1080.0, 1080.0))
        .await
        .unwrap();

    let decoded = image::load_from_memory(&export.data).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (2160, 2160));
    assert_eq!(export.file_name(Some("poster")), "poster_1080x1080.png");
    assert_eq!(
        backend.opened.load(Ordering::SeqCst),
        backend.closed.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn test_png_export_clamps_viewport() {
    let exporter =
        Exporter::new(Arc::new(BlankBackend::default()), StaticFetcher::default(), test_config()).unwrap();
    let export = exporter
        .export_png("<p>tiny</p>", Viewport::new(10.0, 9999.0))
        .await
        .unwrap();
    assert_eq!(export.viewport, Viewport::exact(320, 4096));
    assert_eq!((export.width, export.height), (640, 8192));
}

#[tokio::test]
async fn test_png_export_with_chrome() {
    require_browser!();

    let exporter = Exporter::with_chrome(ExporterConfig::default()).unwrap();
    let html = r#"<!DOCTYPE html><html><head><style>body { margin: 0; background: #123456; }</style></head>
        <body><h1 style="color: white">Hello</h1></body></html>"#;
    let export = exporter
        .export_png(html, Viewport::new(1080.0, 1080.0))
        .await
        .unwrap();

    let decoded = image::load_from_memory(&export.data).unwrap().to_rgba8();
    assert_eq!((decoded.width(), decoded.height()), (2160, 2160));
    assert_eq!(decoded.get_pixel(2100, 2100).0, [0x12, 0x34, 0x56, 255]);
}

// ============================================================================
// DOCX export
// ============================================================================

#[test]
fn test_flex_row_scenario() {
    let out = Transpiler::new(TranspileConfig::default())
        .transpile_html(
            r#"<div style="display:flex;gap:10px;width:300px"><span style="width:100px">A</span><span style="flex-grow:1">B</span></div>"#,
            &InlineStyleSource::new(),
        )
        .unwrap();

    assert_eq!(out.matches("<tr").count(), 1);
    assert_eq!(out.matches("<td").count(), 2);
    assert!(out.contains("width: 300px"));
    let first = out.find("width: 100px").unwrap();
    let second = out.find("width: 200px").unwrap();
    assert!(first < second);
    assert!(out[first..second].contains("padding-right: 10px"));
}

#[test]
fn test_grid_distribution_keeps_every_child() {
    let children: String = (0..10).map(|i| format!("<section>item{i}</section>")).collect();
    let out = Transpiler::new(TranspileConfig::default())
        .transpile_html(
            &format!(r#"<div style="display:grid;grid-template-columns:1fr 1fr 1fr 1fr;width:800px">{children}</div>"#),
            &InlineStyleSource::new(),
        )
        .unwrap();

    assert_eq!(out.matches("<tr").count(), 3);
    assert_eq!(out.matches("<td").count(), 10);
    for i in 0..10 {
        assert_eq!(out.matches(&format!("item{i}<")).count(), 1);
    }
}

#[test]
fn test_placeholders_survive_transpile_and_sanitize() {
    let html = r#"<body>
        <div style="display:flex;width:400px">
            <img src="https://img.example/a.png">
            <img src='data:image/png;base64,iVBORw0KGgo='>
        </div>
        <p><img SRC="data:image/gif;base64,R0lGOD=="></p>
    </body>"#;
    let (shielded, map) = extract_and_replace_with_placeholders(html);
    assert_eq!(map.len(), 3);
    assert!(!shielded.contains("iVBORw0KGgo"));

    let transpiled = Transpiler::new(TranspileConfig::default())
        .transpile_html(&shielded, &InlineStyleSource::new())
        .unwrap();
    let sanitized = sanitize_for_docx(&transpiled, 800);
    let restored = restore_placeholders(&sanitized, &map);

    assert!(restored.contains("https://img.example/a.png"));
    assert!(restored.contains("data:image/png;base64,iVBORw0KGgo="));
    assert!(restored.contains("data:image/gif;base64,R0lGOD=="));
    assert!(!restored.contains("data-docx-id"));
    assert_eq!(restored.matches("<td").count(), 2);
}

#[tokio::test]
async fn test_docx_export_embeds_remote_images() {
    let mut fetcher = StaticFetcher::default();
    fetcher.resources.insert(
        "https://img.example/logo.png".to_string(),
        ("image/png".to_string(), png_bytes()),
    );
    let exporter = Exporter::new(Arc::new(BlankBackend::default()), fetcher, test_config()).unwrap();

    let markup = exporter
        .export_docx_html(r#"<body><h1>Report</h1><img src="https://img.example/logo.png"><img src="https://img.example/missing.png"></body>"#)
        .await
        .unwrap();
    assert!(markup.contains("data:image/png;base64,"));
    assert!(markup.contains("https://img.example/missing.png"));

    let export = exporter
        .export_docx(r#"<body><h1>Report</h1><img src="https://img.example/logo.png"></body>"#, "report.hwp")
        .await
        .unwrap();
    assert_eq!(&export.data[..2], b"PK");
    assert_eq!(export.file_name, "report.docx");
}

// ============================================================================
// Slides
// ============================================================================

#[tokio::test]
async fn test_concurrent_slide_edits_are_not_lost() {
    let store = PresentationStore::with_slides(
        vec![slide("A"), slide("B"), slide("C")],
        SlideConfig::default(),
    );
    let editor = SlowEditor {
        delays: vec![
            ("A", Duration::from_millis(80)),
            ("C", Duration::from_millis(10)),
        ],
    };

    let (a, c) = tokio::join!(
        store.modify_slide(&editor, 0, "bigger title"),
        store.modify_slide(&editor, 2, "add chart"),
    );
    a.unwrap();
    c.unwrap();

    assert_eq!(
        store.slides().await,
        vec![slide("A (edited)"), slide("B"), slide("C (edited)")]
    );
}

#[test]
fn test_bulk_modify_never_drops_slides() {
    let originals = vec![slide("1"), slide("2"), slide("3"), slide("4")];
    let generator = Canned(format!("```html\n{}\n<!--SLIDE_BREAK-->\n{}\n```", slide("one"), slide("two")));

    let out = tokio_test::block_on(modify_all_slides_html(
        &generator,
        &originals,
        "translate",
        &SlideConfig::default(),
    ))
    .unwrap();
    assert_eq!(out, vec![slide("one"), slide("two"), slide("3"), slide("4")]);
}
