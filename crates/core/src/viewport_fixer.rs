//! Slide viewport repair: render each slide on its fixed canvas, show the
//! screenshot to a vision model and take its corrected markup when usable.

use crate::config::{RenderConfig, SlideConfig, Viewport};
use crate::error::Result;
use crate::generate::{fix_slide_html, HtmlGenerator};
use crate::rasterizer::Rasterizer;
use crate::surface::{CaptureTarget, RenderBackend};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Wrap a slide fragment in a page that clips it to the slide canvas.
pub fn slide_page(slide: &str) -> String {
    let canvas = Viewport::slide();
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"UTF-8\"><style>html, body {{ margin: 0; padding: 0; width: {w}px; height: {h}px; overflow: hidden; }}</style></head><body>{slide}</body></html>",
        w = canvas.width,
        h = canvas.height,
    )
}

/// What happened to one slide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlideOutcome {
    /// The corrected markup replaced the slide.
    Fixed,
    /// The original slide was kept.
    Kept { reason: String },
}

/// Result of a repair pass: always one slide and one outcome per input slide.
#[derive(Debug, Clone)]
pub struct FixReport {
    pub slides: Vec<String>,
    pub outcomes: Vec<SlideOutcome>,
}

impl FixReport {
    pub fn fixed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| **o == SlideOutcome::Fixed)
            .count()
    }
}

/// Runs the render, screenshot, correct loop over a deck.
pub struct ViewportFixer<B: RenderBackend> {
    backend: Arc<B>,
    rasterizer: Rasterizer,
    config: SlideConfig,
}

impl<B: RenderBackend> ViewportFixer<B> {
    pub fn new(backend: Arc<B>, render: RenderConfig, config: SlideConfig) -> Result<Self> {
        Ok(Self {
            backend,
            rasterizer: Rasterizer::new(render)?,
            config,
        })
    }

    /// Repair every slide, one at a time. Never fails as a whole.
    pub async fn fix_slides<G: HtmlGenerator>(&self, generator: &G, slides: &[String]) -> FixReport {
        let start = Instant::now();
        let mut fixed = Vec::with_capacity(slides.len());
        let mut outcomes = Vec::with_capacity(slides.len());

        for (index, slide) in slides.iter().enumerate() {
            match self.fix_slide(generator, slide).await {
                Ok(html) => {
                    debug!("Slide {} repaired", index);
                    fixed.push(html);
                    outcomes.push(SlideOutcome::Fixed);
                }
                Err(e) => {
                    warn!("Keeping slide {} unchanged: {}", index, e);
                    fixed.push(slide.clone());
                    outcomes.push(SlideOutcome::Kept {
                        reason: e.to_string(),
                    });
                }
            }
        }

        let report = FixReport {
            slides: fixed,
            outcomes,
        };
        info!(
            "Viewport repair fixed {}/{} slides in {:?}",
            report.fixed_count(),
            slides.len(),
            start.elapsed()
        );
        report
    }

    /// Repair one slide.
    pub async fn fix_slide<G: HtmlGenerator>(&self, generator: &G, slide: &str) -> Result<String> {
        let screenshot = self.capture_slide(slide).await?;
        fix_slide_html(generator, slide, &screenshot, &self.config).await
    }

    /// Screenshot one slide on its canvas.
    pub async fn capture_slide(&self, slide: &str) -> Result<Vec<u8>> {
        let backend = Arc::clone(&self.backend);
        let rasterizer = self.rasterizer.clone();
        let page = slide_page(slide);
        let settle = self.config.render_settle_delay;
        let ratio = self.config.screenshot_ratio;

        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let target = CaptureTarget::acquire(backend.as_ref(), &page, Viewport::slide(), settle)?;
            target.wait_for_images()?;
            let export = rasterizer.rasterize_at(&target, ratio)?;
            target.release()?;
            Ok(export.data)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExportError;
    use crate::generate::testing::ScriptedGenerator;
    use crate::surface::testing::ScriptedBackend;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn slide(body: &str) -> String {
        format!(r#"<div style="width:1280px;height:720px;overflow:hidden">{body}</div>"#)
    }

    fn fixer(backend: ScriptedBackend) -> ViewportFixer<ScriptedBackend> {
        let config = SlideConfig {
            render_settle_delay: Duration::ZERO,
            ..Default::default()
        };
        ViewportFixer::new(Arc::new(backend), RenderConfig::default(), config).unwrap()
    }

    #[test]
    fn test_slide_page_clips_to_canvas() {
        let page = slide_page("<div>x</div>");
        assert!(page.contains("width: 1280px; height: 720px; overflow: hidden;"));
        assert!(page.ends_with("<body><div>x</div></body></html>"));
    }

    #[tokio::test]
    async fn test_fix_slides_keeps_failures_and_order() {
        let backend = ScriptedBackend::new();
        let recorder = Arc::clone(&backend.recorder);
        let fixer = fixer(backend);
        let generator = ScriptedGenerator::new()
            .reply(slide("one fixed"))
            .reply("cannot do that")
            .fail(ExportError::GenerationIncomplete("MAX_TOKENS".to_string()));

        let slides = vec![slide("one"), slide("two"), slide("three")];
        let report = fixer.fix_slides(&generator, &slides).await;

        assert_eq!(
            report.slides,
            vec![slide("one fixed"), slide("two"), slide("three")]
        );
        assert_eq!(report.fixed_count(), 1);
        assert!(matches!(report.outcomes[1], SlideOutcome::Kept { .. }));
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 3);
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_screenshot_is_slide_sized() {
        let fixer = fixer(ScriptedBackend::new());
        let png = fixer.capture_slide(&slide("x")).await.unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1280, 720));
    }

    #[tokio::test]
    async fn test_unreadable_surface_keeps_slide() {
        let mut backend = ScriptedBackend::new();
        backend.body_accessible = false;
        let fixer = fixer(backend);
        let generator = ScriptedGenerator::new().reply(slide("never used"));
        let report = fixer.fix_slides(&generator, &[slide("a")]).await;
        assert_eq!(report.slides, vec![slide("a")]);
        assert_eq!(report.fixed_count(), 0);
        assert!(generator.payloads.lock().unwrap().is_empty());
    }
}
