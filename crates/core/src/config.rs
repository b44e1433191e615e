//! Configuration and result types for the export pipelines.

use crate::error::{ExportError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Smallest accepted viewport edge in CSS pixels.
pub const MIN_VIEWPORT: u32 = 320;

/// Largest accepted viewport edge in CSS pixels.
pub const MAX_VIEWPORT: u32 = 4096;

/// Default viewport edge used for new documents.
pub const DEFAULT_VIEWPORT_SIZE: u32 = 1080;

/// Fixed slide canvas width.
pub const SLIDE_WIDTH: u32 = 1280;

/// Fixed slide canvas height.
pub const SLIDE_HEIGHT: u32 = 720;

/// A pixel canvas in device-independent pixels.
///
/// Values constructed through [`Viewport::new`] are always clamped to
/// `[MIN_VIEWPORT, MAX_VIEWPORT]`. [`Viewport::exact`] bypasses clamping and is
/// reserved for fixed canvases such as slides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: DEFAULT_VIEWPORT_SIZE,
            height: DEFAULT_VIEWPORT_SIZE,
        }
    }
}

impl Viewport {
    /// Create a viewport, rounding and clamping each edge.
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width: clamp_edge(width),
            height: clamp_edge(height),
        }
    }

    /// Create a viewport without clamping.
    pub const fn exact(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The slide canvas.
    pub const fn slide() -> Self {
        Self::exact(SLIDE_WIDTH, SLIDE_HEIGHT)
    }

    /// Output pixel size at a given pixel ratio.
    pub fn scaled(&self, pixel_ratio: f64) -> (u32, u32) {
        (
            (self.width as f64 * pixel_ratio).round() as u32,
            (self.height as f64 * pixel_ratio).round() as u32,
        )
    }

    /// Label in `WxH` form, used for file names.
    pub fn label(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

fn clamp_edge(value: f64) -> u32 {
    if value.is_nan() {
        return MIN_VIEWPORT;
    }
    value
        .round()
        .clamp(MIN_VIEWPORT as f64, MAX_VIEWPORT as f64) as u32
}

/// A named viewport preset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportPreset {
    pub label: String,
    pub viewport: Viewport,
}

/// Built-in presets offered by the editor.
pub fn viewport_presets() -> Vec<ViewportPreset> {
    [
        (1080, 1080),
        (1024, 768),
        (1024, 900),
        (1920, 1080),
        (1080, 1920),
        (800, 600),
    ]
    .into_iter()
    .map(|(w, h)| {
        let viewport = Viewport::exact(w, h);
        ViewportPreset {
            label: viewport.label(),
            viewport,
        }
    })
    .collect()
}

/// Configuration for render surfaces and rasterization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Supersampling ratio applied at capture time.
    /// Default: 2.0.
    pub pixel_ratio: f64,

    /// Extra wait after the load event so fonts and scripts can settle.
    /// Default: 500 ms.
    pub settle_delay: Duration,

    /// Upper bound for navigation to finish.
    /// Default: 30 seconds.
    pub load_timeout: Duration,

    /// Background colour used to flatten transparent pixels.
    /// Default: white (255, 255, 255).
    pub background_color: (u8, u8, u8),

    /// PNG compression level (0-9).
    /// Default: 6.
    pub png_compression: u8,

    /// Path to the Chrome/Chromium binary. If None, searches well-known
    /// locations and PATH.
    pub browser_path: Option<PathBuf>,

    /// Run the browser headless.
    /// Default: true.
    pub headless: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            pixel_ratio: 2.0,
            settle_delay: Duration::from_millis(500),
            load_timeout: Duration::from_secs(30),
            background_color: (255, 255, 255),
            png_compression: 6,
            browser_path: None,
            headless: true,
        }
    }
}

impl RenderConfig {
    /// Create a render config with the given pixel ratio.
    pub fn with_pixel_ratio(pixel_ratio: f64) -> Self {
        Self {
            pixel_ratio,
            ..Default::default()
        }
    }

    /// Set the settle delay.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set PNG compression level.
    pub fn png_compression(mut self, level: u8) -> Self {
        self.png_compression = level.min(9);
        self
    }

    /// Set the browser binary path.
    pub fn browser_path(mut self, path: PathBuf) -> Self {
        self.browser_path = Some(path);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !(self.pixel_ratio > 0.0 && self.pixel_ratio <= 4.0) {
            return Err(ExportError::InvalidConfig(
                "pixel_ratio must be in (0, 4]".to_string(),
            ));
        }
        if self.load_timeout.is_zero() {
            return Err(ExportError::InvalidConfig(
                "load_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the resource inliner and image fetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InlinerConfig {
    /// Host serving web-font stylesheets.
    /// Default: fonts.googleapis.com.
    pub font_host: String,

    /// Families the font host does not serve; requests for them are skipped.
    pub unhosted_families: Vec<String>,

    /// Timeout for each external stylesheet or resource fetch.
    /// Default: 5 seconds.
    pub fetch_timeout: Duration,

    /// Maximum number of resource fetches in flight.
    /// Default: 4 × number of CPU cores.
    pub fetch_concurrency: usize,
}

impl Default for InlinerConfig {
    fn default() -> Self {
        Self {
            font_host: "fonts.googleapis.com".to_string(),
            unhosted_families: vec!["pretendard".to_string(), "paperlogy".to_string()],
            fetch_timeout: Duration::from_secs(5),
            fetch_concurrency: num_cpus::get() * 4,
        }
    }
}

impl InlinerConfig {
    /// Set the per-fetch timeout.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the fetch concurrency.
    pub fn fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency;
        self
    }

    /// Whether a family name is known not to be served by the font host.
    pub fn is_unhosted(&self, family: &str) -> bool {
        let family = family.to_ascii_lowercase();
        self.unhosted_families
            .iter()
            .any(|f| family.contains(&f.to_ascii_lowercase()))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.fetch_concurrency == 0 {
            return Err(ExportError::InvalidConfig(
                "fetch_concurrency must be at least 1".to_string(),
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(ExportError::InvalidConfig(
                "fetch_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where computed styles come from during transpilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StyleMode {
    /// Render in a browser surface and read `getComputedStyle`.
    Browser,
    /// Derive styles statically from inline `style` attributes.
    Inline,
}

/// Configuration for the HTML → DOCX layout transpiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranspileConfig {
    /// Width used when a container width or a percentage width cannot be
    /// expressed in absolute units.
    /// Default: 800.
    pub fallback_width_px: u32,

    /// Source of computed styles.
    /// Default: Browser.
    pub style_mode: StyleMode,

    /// Wait for the utility-class framework to apply its styles.
    /// Default: 2 seconds.
    pub framework_settle_delay: Duration,

    /// Surface size used when resolving styles in a browser.
    /// Default: 800x600.
    pub resolve_viewport: Viewport,

    /// Inject the base stylesheet for headings, tables and images.
    /// Default: true.
    pub base_stylesheet: bool,
}

impl Default for TranspileConfig {
    fn default() -> Self {
        Self {
            fallback_width_px: 800,
            style_mode: StyleMode::Browser,
            framework_settle_delay: Duration::from_secs(2),
            resolve_viewport: Viewport::exact(800, 600),
            base_stylesheet: true,
        }
    }
}

impl TranspileConfig {
    /// Set the style mode.
    pub fn style_mode(mut self, mode: StyleMode) -> Self {
        self.style_mode = mode;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.fallback_width_px == 0 {
            return Err(ExportError::InvalidConfig(
                "fallback_width_px must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for slide generation and viewport repair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlideConfig {
    /// Delimiter separating slides in generated output.
    pub delimiter: String,

    /// Marker a generated fragment must contain to be trusted.
    pub root_marker: String,

    /// Wait after a slide is loaded before it is captured.
    /// Default: 500 ms.
    pub render_settle_delay: Duration,

    /// Pixel ratio used for the screenshot sent to the vision model.
    /// Default: 1.0.
    pub screenshot_ratio: f64,

    /// Pixel ratio of the page images in PDF exports.
    /// Default: 3.0.
    pub pdf_pixel_ratio: f64,

    /// JPEG quality (1-100) of the page images in PDF exports.
    /// Default: 95.
    pub pdf_jpeg_quality: u8,
}

impl Default for SlideConfig {
    fn default() -> Self {
        Self {
            delimiter: "<!--SLIDE_BREAK-->".to_string(),
            root_marker: "<div".to_string(),
            render_settle_delay: Duration::from_millis(500),
            screenshot_ratio: 1.0,
            pdf_pixel_ratio: 3.0,
            pdf_jpeg_quality: 95,
        }
    }
}

impl SlideConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, ratio) in [
            ("screenshot_ratio", self.screenshot_ratio),
            ("pdf_pixel_ratio", self.pdf_pixel_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 4.0) {
                return Err(ExportError::InvalidConfig(format!(
                    "slides.{name} must be in (0, 4], got {ratio}"
                )));
            }
        }
        if !(1..=100).contains(&self.pdf_jpeg_quality) {
            return Err(ExportError::InvalidConfig(format!(
                "slides.pdf_jpeg_quality must be in 1..=100, got {}",
                self.pdf_jpeg_quality
            )));
        }
        Ok(())
    }
}

/// Environment variable consulted when no API key is configured.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Configuration for the Gemini generative collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// Base URL of the model endpoints, ending in `/models/`.
    pub api_base: String,

    /// Model producing HTML.
    /// Default: gemini-2.5-pro.
    pub text_model: String,

    /// Model producing images.
    pub image_model: String,

    /// Sampling temperature.
    /// Default: 0.7.
    pub temperature: f32,

    /// Output token ceiling for whole-deck and whole-document requests.
    pub long_output_tokens: u32,

    /// Output token ceiling for single-slide requests.
    pub short_output_tokens: u32,

    /// Upper bound for one generation request.
    /// Default: 5 minutes.
    pub request_timeout: Duration,

    /// API key. Falls back to `GEMINI_API_KEY`. Never written out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta/models/".to_string(),
            text_model: "gemini-2.5-pro".to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
            temperature: 0.7,
            long_output_tokens: 65536,
            short_output_tokens: 8192,
            request_timeout: Duration::from_secs(300),
            api_key: None,
        }
    }
}

impl GeminiConfig {
    /// Set the API key.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// The configured key, else the environment's.
    pub fn resolve_api_key(&self) -> Result<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(GEMINI_API_KEY_ENV).ok())
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(ExportError::MissingApiKey)
    }

    /// `generateContent` endpoint of `model`.
    pub fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/{}:generateContent",
            self.api_base.trim_end_matches('/'),
            model
        )
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.api_base.starts_with("https://") && !self.api_base.starts_with("http://") {
            return Err(ExportError::InvalidConfig(
                "gemini.api_base must be an http(s) URL".to_string(),
            ));
        }
        if self.long_output_tokens == 0 || self.short_output_tokens == 0 {
            return Err(ExportError::InvalidConfig(
                "gemini output token limits must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ExportError::InvalidConfig(
                "gemini.request_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Combined configuration for the exporter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    pub render: RenderConfig,
    pub inliner: InlinerConfig,
    pub transpile: TranspileConfig,
    pub slides: SlideConfig,
    pub gemini: GeminiConfig,
}

impl ExporterConfig {
    /// Validate the entire configuration.
    pub fn validate(&self) -> Result<()> {
        self.render.validate()?;
        self.inliner.validate()?;
        self.transpile.validate()?;
        self.slides.validate()?;
        self.gemini.validate()?;
        Ok(())
    }
}

/// A rasterized document.
#[derive(Debug, Clone)]
pub struct PngExport {
    /// PNG image data.
    pub data: Vec<u8>,

    /// Image width in pixels.
    pub width: u32,

    /// Image height in pixels.
    pub height: u32,

    /// The viewport the image was captured at.
    pub viewport: Viewport,
}

impl PngExport {
    /// Conventional download name, e.g. `report_1080x1080.png`.
    pub fn file_name(&self, stem: Option<&str>) -> String {
        format!("{}_{}.png", stem.unwrap_or("export"), self.viewport.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_default() {
        let viewport = Viewport::default();
        assert_eq!(viewport, Viewport::exact(1080, 1080));
    }

    #[test]
    fn test_viewport_clamps_small() {
        assert_eq!(Viewport::new(10.0, 10.0), Viewport::exact(320, 320));
    }

    #[test]
    fn test_viewport_clamps_large() {
        assert_eq!(Viewport::new(9999.0, 9999.0), Viewport::exact(4096, 4096));
    }

    #[test]
    fn test_viewport_rounds() {
        assert_eq!(Viewport::new(1023.6, 767.4), Viewport::exact(1024, 767));
    }

    #[test]
    fn test_viewport_nan_clamps_to_min() {
        assert_eq!(Viewport::new(f64::NAN, 500.0), Viewport::exact(320, 500));
    }

    #[test]
    fn test_viewport_scaled() {
        assert_eq!(Viewport::exact(1080, 1080).scaled(2.0), (2160, 2160));
        assert_eq!(Viewport::exact(801, 600).scaled(1.5), (1202, 900));
    }

    #[test]
    fn test_slide_viewport() {
        assert_eq!(Viewport::slide(), Viewport::exact(1280, 720));
    }

    #[test]
    fn test_presets_are_within_bounds() {
        let presets = viewport_presets();
        assert_eq!(presets.len(), 6);
        assert_eq!(presets[0].label, "1080x1080");
        for preset in presets {
            assert_eq!(
                Viewport::new(preset.viewport.width as f64, preset.viewport.height as f64),
                preset.viewport
            );
        }
    }

    #[test]
    fn test_render_config_defaults() {
        let config = RenderConfig::default();
        assert_eq!(config.pixel_ratio, 2.0);
        assert_eq!(config.settle_delay, Duration::from_millis(500));
        assert_eq!(config.background_color, (255, 255, 255));
        assert!(config.browser_path.is_none());
        assert!(config.headless);
    }

    #[test]
    fn test_render_config_png_compression_clamped() {
        let config = RenderConfig::default().png_compression(15);
        assert_eq!(config.png_compression, 9);
    }

    #[test]
    fn test_render_config_validation() {
        assert!(RenderConfig::with_pixel_ratio(2.0).validate().is_ok());
        assert!(RenderConfig::with_pixel_ratio(0.0).validate().is_err());
        assert!(RenderConfig::with_pixel_ratio(5.0).validate().is_err());
        assert!(RenderConfig::with_pixel_ratio(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_inliner_config_defaults() {
        let config = InlinerConfig::default();
        assert_eq!(config.font_host, "fonts.googleapis.com");
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
        assert!(config.fetch_concurrency > 0);
    }

    #[test]
    fn test_inliner_config_unhosted_family() {
        let config = InlinerConfig::default();
        assert!(config.is_unhosted("Pretendard+Variable"));
        assert!(config.is_unhosted("paperlogy"));
        assert!(!config.is_unhosted("Noto+Sans+KR"));
    }

    #[test]
    fn test_inliner_config_validation_zero_concurrency() {
        let config = InlinerConfig::default().fetch_concurrency(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_transpile_config_defaults() {
        let config = TranspileConfig::default();
        assert_eq!(config.fallback_width_px, 800);
        assert_eq!(config.style_mode, StyleMode::Browser);
        assert_eq!(config.framework_settle_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_slide_config_pdf_defaults_and_validation() {
        let mut config = SlideConfig::default();
        assert_eq!(config.pdf_pixel_ratio, 3.0);
        assert_eq!(config.pdf_jpeg_quality, 95);
        assert_eq!(config.render_settle_delay, Duration::from_millis(500));
        assert!(config.validate().is_ok());

        config.pdf_jpeg_quality = 0;
        assert!(config.validate().is_err());
        config.pdf_jpeg_quality = 95;
        config.pdf_pixel_ratio = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_exporter_config_validate_propagates() {
        let mut config = ExporterConfig::default();
        assert!(config.validate().is_ok());
        config.transpile.fallback_width_px = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_exporter_config_serde_roundtrip_keeps_mode() {
        let mut config = ExporterConfig::default();
        config.transpile.style_mode = StyleMode::Inline;
        let json = serde_json::to_string(&config).unwrap();
        let back: ExporterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.transpile.style_mode, StyleMode::Inline);
    }

    #[test]
    fn test_png_export_file_name() {
        let export = PngExport {
            data: vec![],
            width: 2160,
            height: 2160,
            viewport: Viewport::default(),
        };
        assert_eq!(export.file_name(Some("report")), "report_1080x1080.png");
        assert_eq!(export.file_name(None), "export_1080x1080.png");
    }

    #[test]
    fn test_gemini_config_defaults() {
        let config = GeminiConfig::default();
        assert_eq!(config.text_model, "gemini-2.5-pro");
        assert_eq!(config.long_output_tokens, 65536);
        assert_eq!(config.short_output_tokens, 8192);
        assert_eq!(
            config.endpoint("gemini-2.5-pro"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:generateContent"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_gemini_explicit_key_wins_and_is_not_serialized() {
        let config = GeminiConfig::default().api_key("  secret ");
        assert_eq!(config.resolve_api_key().unwrap(), "secret");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
