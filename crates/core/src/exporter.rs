//! Export orchestration: HTML to PNG, HTML to DOCX and slide decks to PDF.

use crate::chrome::ChromeBackend;
use crate::config::{ExporterConfig, PngExport, StyleMode, Viewport};
use crate::docx::{docx_file_name, DocxWriter};
use crate::error::{ExportError, Result};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::images::{
    convert_background_images_to_img_tags, extract_and_replace_with_placeholders,
    inline_remote_images, restore_placeholders,
};
use crate::inliner::{assemble, inline_stylesheets, inline_web_fonts, StylesheetRecord};
use crate::pdf::{write_image_pdf, PdfPage};
use crate::rasterizer::Rasterizer;
use crate::sanitize::sanitize_for_docx;
use crate::style::{BrowserStyleSource, InlineStyleSource};
use crate::surface::{CaptureTarget, RenderBackend};
use crate::transpiler::Transpiler;
use crate::viewport_fixer::slide_page;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// A packaged Word document.
#[derive(Debug, Clone)]
pub struct DocxExport {
    pub data: Vec<u8>,
    pub title: String,
    pub file_name: String,
}

/// Clears the exporter's busy flag when an export ends.
struct BusyFlag<'a>(&'a AtomicBool);

impl<'a> BusyFlag<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ExportError::Busy)?;
        Ok(Self(flag))
    }
}

impl Drop for BusyFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs the PNG and DOCX pipelines against one render backend and fetcher.
/// One export at a time; overlapping requests fail with [`ExportError::Busy`].
pub struct Exporter<B: RenderBackend, F: Fetcher> {
    backend: Arc<B>,
    fetcher: F,
    config: ExporterConfig,
    rasterizer: Rasterizer,
    transpiler: Transpiler,
    busy: AtomicBool,
}

impl Exporter<ChromeBackend, HttpFetcher> {
    /// Exporter over a local Chrome and the network.
    pub fn with_chrome(config: ExporterConfig) -> Result<Self> {
        let backend = ChromeBackend::new(config.render.clone())?;
        let fetcher = HttpFetcher::new(config.inliner.fetch_timeout)?;
        Self::new(Arc::new(backend), fetcher, config)
    }
}

impl<B: RenderBackend, F: Fetcher> Exporter<B, F> {
    pub fn new(backend: Arc<B>, fetcher: F, config: ExporterConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "Initializing exporter with pixel_ratio={}, style_mode={:?}",
            config.render.pixel_ratio, config.transpile.style_mode
        );
        Ok(Self {
            rasterizer: Rasterizer::new(config.render.clone())?,
            transpiler: Transpiler::new(config.transpile.clone()),
            backend,
            fetcher,
            config,
            busy: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Render `html` at `viewport` and rasterize it at the configured ratio.
    pub async fn export_png(&self, html: &str, viewport: Viewport) -> Result<PngExport> {
        let _busy = BusyFlag::acquire(&self.busy)?;
        let start = Instant::now();
        info!("Exporting PNG at {}", viewport.label());

        // Stage 1: read stylesheets and the rendered markup from a live surface
        debug!("Stage 1: Reading live document");
        let (sheets, rendered) = self.read_live_document(html, viewport).await?;

        // Stage 2: inline fonts, stylesheets and images
        debug!("Stage 2: Inlining resources");
        let inliner = &self.config.inliner;
        let external: Vec<StylesheetRecord> =
            sheets.into_iter().filter(|s| s.href.is_some()).collect();
        let mut css = inline_web_fonts(html, &self.fetcher, inliner).await;
        css.push_str(&inline_stylesheets(&external));
        let rendered = inline_remote_images(
            &rendered,
            &self.fetcher,
            inliner.fetch_timeout,
            inliner.fetch_concurrency,
        )
        .await;
        let inlined = assemble(&rendered, &css);

        // Stage 3: capture the self-contained document
        debug!("Stage 3: Rasterizing");
        let backend = Arc::clone(&self.backend);
        let rasterizer = self.rasterizer.clone();
        let settle = self.config.render.settle_delay;
        let export = tokio::task::spawn_blocking(move || -> Result<PngExport> {
            let target = CaptureTarget::acquire(backend.as_ref(), &inlined, viewport, settle)?;
            target.wait_for_images()?;
            let export = rasterizer.rasterize(&target)?;
            target.release()?;
            Ok(export)
        })
        .await??;

        info!(
            "Exported {}x{} PNG in {:?}",
            export.width,
            export.height,
            start.elapsed()
        );
        Ok(export)
    }

    /// Capture every slide on the slide canvas and assemble a PDF with one
    /// page per slide, in order.
    pub async fn export_slides_pdf(&self, slides: &[String]) -> Result<Vec<u8>> {
        if slides.is_empty() {
            return Err(ExportError::NoSlides);
        }
        let _busy = BusyFlag::acquire(&self.busy)?;
        let start = Instant::now();
        info!("Exporting {} slides to PDF", slides.len());

        let backend = Arc::clone(&self.backend);
        let rasterizer = self.rasterizer.clone();
        let config = self.config.slides.clone();
        let pages: Vec<String> = slides.iter().map(|slide| slide_page(slide)).collect();
        let pdf = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let mut rendered = Vec::with_capacity(pages.len());
            for (index, page) in pages.iter().enumerate() {
                let target = CaptureTarget::acquire(
                    backend.as_ref(),
                    page,
                    Viewport::slide(),
                    config.render_settle_delay,
                )?;
                target.wait_for_images()?;
                let export = rasterizer.rasterize_at(&target, config.pdf_pixel_ratio)?;
                target.release()?;
                rendered.push(PdfPage::from_png(&export.data, config.pdf_jpeg_quality)?);
                debug!("Captured slide {} at {}x{}", index, export.width, export.height);
            }
            write_image_pdf(&rendered, Viewport::slide())
        })
        .await??;

        info!(
            "Exported {}-page PDF ({} bytes) in {:?}",
            slides.len(),
            pdf.len(),
            start.elapsed()
        );
        Ok(pdf)
    }

    async fn read_live_document(
        &self,
        html: &str,
        viewport: Viewport,
    ) -> Result<(Vec<StylesheetRecord>, String)> {
        let backend = Arc::clone(&self.backend);
        let html = html.to_string();
        let settle = self.config.render.settle_delay;
        tokio::task::spawn_blocking(move || -> Result<(Vec<StylesheetRecord>, String)> {
            let target = CaptureTarget::acquire(backend.as_ref(), &html, viewport, settle)?;
            let sheets = target.stylesheets()?;
            let rendered = target.rendered_html()?;
            target.release()?;
            Ok((sheets, rendered))
        })
        .await?
    }

    /// Produce sanitized, fully inlined markup ready for DOCX packaging.
    pub async fn export_docx_html(&self, html: &str) -> Result<String> {
        let _busy = BusyFlag::acquire(&self.busy)?;
        self.docx_html(html).await
    }

    /// Produce a `.docx` package for `html`.
    pub async fn export_docx(&self, html: &str, title: &str) -> Result<DocxExport> {
        let _busy = BusyFlag::acquire(&self.busy)?;
        let start = Instant::now();
        let markup = self.docx_html(html).await?;

        let writer = DocxWriter::new(title);
        let safe_title = writer.title().to_string();
        let data = tokio::task::spawn_blocking(move || writer.write(&markup)).await??;

        info!("Exported DOCX '{}' in {:?}", safe_title, start.elapsed());
        Ok(DocxExport {
            data,
            title: safe_title,
            file_name: docx_file_name(title),
        })
    }

    async fn docx_html(&self, html: &str) -> Result<String> {
        let start = Instant::now();
        let inliner = &self.config.inliner;

        // Stage 1: embed images and shield them from the rewriting passes
        debug!("Stage 1: Materializing images");
        let html = inline_remote_images(
            html,
            &self.fetcher,
            inliner.fetch_timeout,
            inliner.fetch_concurrency,
        )
        .await;
        let html = convert_background_images_to_img_tags(&html);
        let (html, placeholders) = extract_and_replace_with_placeholders(&html);
        debug!("Replaced {} image sources with placeholders", placeholders.len());

        // Stage 2: resolve styles and rewrite flex/grid layout as tables
        debug!("Stage 2: Transpiling layout");
        let transpiler = self.transpiler.clone();
        let backend = Arc::clone(&self.backend);
        let transpiled = tokio::task::spawn_blocking(move || -> Result<String> {
            match transpiler.config().style_mode {
                StyleMode::Browser => {
                    let source = BrowserStyleSource::new(backend, transpiler.config().clone());
                    transpiler.transpile_html(&html, &source)
                }
                StyleMode::Inline => transpiler.transpile_html(&html, &InlineStyleSource::new()),
            }
        })
        .await??;

        // Stage 3: repair declarations the converter rejects, then restore images
        debug!("Stage 3: Sanitizing");
        let sanitized = sanitize_for_docx(&transpiled, self.config.transpile.fallback_width_px);
        let restored = restore_placeholders(&sanitized, &placeholders);

        info!(
            "Prepared DOCX markup ({} bytes, {} images) in {:?}",
            restored.len(),
            placeholders.len(),
            start.elapsed()
        );
        Ok(restored)
    }
}
