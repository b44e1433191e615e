//! # gdoc-fixer-core
//!
//! Rendering pipelines for AI-edited HTML documents.
//!
//! - **PNG export**: the document is rendered in a headless browser, every
//!   external stylesheet, web font and image is inlined, and the
//!   self-contained result is captured at a fixed viewport and pixel ratio.
//! - **DOCX export**: flex and grid layouts are rewritten as tables from
//!   resolved computed styles, declarations Word converters reject are
//!   repaired, and the markup is packaged as a `.docx`.
//! - **Slides**: decks are generated and edited through a generative
//!   collaborator, held in a [`PresentationStore`], and repaired when they
//!   overflow the 1280×720 canvas. Finished decks export as a PDF with one
//!   page image per slide.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gdoc_fixer_core::{Exporter, ExporterConfig, Viewport};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let exporter = Exporter::with_chrome(ExporterConfig::default())?;
//!
//!     let html = std::fs::read_to_string("poster.html")?;
//!     let png = exporter.export_png(&html, Viewport::new(1080.0, 1080.0)).await?;
//!     std::fs::write(png.file_name(Some("poster")), &png.data)?;
//!
//!     let docx = exporter.export_docx(&html, "poster").await?;
//!     std::fs::write(&docx.file_name, &docx.data)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Slide Editing
//!
//! ```rust,no_run
//! use gdoc_fixer_core::{GeminiClient, GeminiConfig, PresentationStore, SlideConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gemini = GeminiClient::new(GeminiConfig::default())?;
//!     let store = PresentationStore::new(SlideConfig::default());
//!
//!     store.generate(&gemini, "<h1>Quarterly review</h1>").await?;
//!     let (a, b) = tokio::join!(
//!         store.modify_slide(&gemini, 0, "Use a dark theme"),
//!         store.modify_slide(&gemini, 1, "Add a summary line"),
//!     );
//!     a?;
//!     b?;
//!     Ok(())
//! }
//! ```

/// Lazily compiled, process-wide regex.
macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {{
        static $name: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
        $name.get_or_init(|| crate::compile_regex($pattern, stringify!($name)))
    }};
}

pub mod chrome;
pub mod config;
pub mod css;
pub mod docx;
pub mod dom;
pub mod error;
pub mod exporter;
pub mod fetch;
pub mod generate;
pub mod images;
pub mod inliner;
pub mod pdf;
pub mod rasterizer;
pub mod sanitize;
pub mod store;
pub mod style;
pub mod surface;
pub mod transpiler;
pub mod viewport_fixer;

// Re-export main types for convenience
pub use chrome::ChromeBackend;
pub use config::{
    viewport_presets, ExporterConfig, GeminiConfig, InlinerConfig, PngExport, RenderConfig,
    SlideConfig, StyleMode, TranspileConfig, Viewport, ViewportPreset,
};
pub use docx::DocxWriter;
pub use error::{ExportError, Result};
pub use exporter::{DocxExport, Exporter};
pub use fetch::{Fetcher, HttpFetcher};
pub use generate::{GeminiClient, HtmlGenerator, ImageGenerator};
pub use rasterizer::Rasterizer;
pub use store::PresentationStore;
pub use style::{BrowserStyleSource, InlineStyleSource, StyleSource};
pub use surface::{CaptureTarget, RenderBackend, RenderSurface};
pub use transpiler::Transpiler;
pub use viewport_fixer::{FixReport, ViewportFixer};

pub(crate) fn compile_regex(pattern: &'static str, desc: &'static str) -> regex::Regex {
    regex::Regex::new(pattern).unwrap_or_else(|err| panic!("invalid {desc} regex: {err}"))
}

/// Initialize the library's logging.
/// Call this once at application startup if you want to see logs.
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();
}
