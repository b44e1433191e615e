//! Rasterizer: captures a settled render surface as an opaque PNG of exactly
//! `viewport × pixel_ratio` pixels.
//!
//! Icon-font glyphs drawn through `::before` content are swapped for canvas
//! rasterized `<img>` elements for the duration of the capture, and restored
//! afterwards whatever the outcome.

use crate::config::{PngExport, RenderConfig};
use crate::error::{ExportError, Result};
use crate::surface::{evaluate_json, CaptureTarget, RenderSurface};
use image::{imageops, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Attribute marking icon elements that carry a substituted glyph.
pub const ICON_ATTR: &str = "data-fixer-icon";

/// Class hiding the original `::before` glyph while the substitute is shown.
pub const GLYPH_FIX_CLASS: &str = "fixer-glyph-fix";

/// Script locating icon-font elements and reporting their glyph and font.
pub const ICON_SCAN_SCRIPT: &str = r#"(() => {
    const found = [];
    const selector = '[class*="fa-"], [class*="bi-"], .material-icons';
    let next = 0;
    window.__fixerIconOriginal = window.__fixerIconOriginal || {};
    for (const el of Array.from(document.querySelectorAll(selector))) {
        try {
            const before = window.getComputedStyle(el, '::before');
            const content = before.getPropertyValue('content');
            if (!content || content === 'none' || content === 'normal') continue;
            const glyph = content.replace(/^["']|["']$/g, '');
            if (!glyph) continue;
            const computed = window.getComputedStyle(el);
            const id = String(next++);
            el.setAttribute('data-fixer-icon', id);
            window.__fixerIconOriginal[id] = el.innerHTML;
            found.push({
                id,
                glyph,
                font_size: parseFloat(computed.fontSize) || 16,
                color: computed.color || '#000',
                font_family: before.getPropertyValue('font-family') || computed.fontFamily,
                font_weight: before.getPropertyValue('font-weight') || computed.fontWeight,
            });
        } catch (e) {}
    }
    return JSON.stringify(found);
})()"#;

/// Script undoing every glyph substitution.
pub const ICON_RESTORE_SCRIPT: &str = r#"(() => {
    const originals = window.__fixerIconOriginal || {};
    for (const el of Array.from(document.querySelectorAll('[data-fixer-icon]'))) {
        const id = el.getAttribute('data-fixer-icon');
        if (id in originals) el.innerHTML = originals[id];
        el.classList.remove('fixer-glyph-fix');
        el.removeAttribute('data-fixer-icon');
    }
    const style = document.getElementById('fixer-glyph-style');
    if (style) style.remove();
    window.__fixerIconOriginal = {};
    return true;
})()"#;

/// An icon element found by [`ICON_SCAN_SCRIPT`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IconGlyph {
    pub id: String,
    pub glyph: String,
    pub font_size: f64,
    pub color: String,
    pub font_family: String,
    pub font_weight: String,
}

/// How one glyph is drawn and displayed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlyphPlan {
    pub id: String,
    pub glyph: String,
    /// Edge of the square canvas, in device pixels.
    pub canvas_size: u32,
    /// Canvas font, e.g. `900 32px "Font Awesome 6 Free"`.
    pub font: String,
    pub color: String,
    /// Displayed edge of the `<img>`, in CSS pixels (the glyph's em box).
    pub display_size: f64,
}

impl GlyphPlan {
    pub fn new(icon: &IconGlyph, pixel_ratio: f64) -> Self {
        let font_size = if icon.font_size > 0.0 { icon.font_size } else { 16.0 };
        let draw_px = font_size * pixel_ratio;
        Self {
            id: icon.id.clone(),
            glyph: icon.glyph.clone(),
            canvas_size: (draw_px * 1.5).ceil() as u32,
            font: format!("{} {}px {}", icon.font_weight, draw_px, icon.font_family),
            color: icon.color.clone(),
            display_size: font_size,
        }
    }
}

/// Script drawing each planned glyph into a canvas and appending it as an
/// `<img>` to its icon element.
pub fn glyph_apply_script(plans: &[GlyphPlan]) -> String {
    let plans = serde_json::to_string(plans).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"(() => {{
    const plans = {plans};
    if (!document.getElementById('fixer-glyph-style')) {{
        const style = document.createElement('style');
        style.id = 'fixer-glyph-style';
        style.textContent = '.{GLYPH_FIX_CLASS}::before {{ content: none !important; }}';
        document.head.appendChild(style);
    }}
    let applied = 0;
    for (const plan of plans) {{
        const el = document.querySelector('[{ICON_ATTR}="' + plan.id + '"]');
        if (!el) continue;
        const canvas = document.createElement('canvas');
        canvas.width = plan.canvas_size;
        canvas.height = plan.canvas_size;
        const ctx = canvas.getContext('2d');
        ctx.font = plan.font;
        ctx.fillStyle = plan.color;
        ctx.textAlign = 'center';
        ctx.textBaseline = 'middle';
        ctx.fillText(plan.glyph, plan.canvas_size / 2, plan.canvas_size / 2);
        const img = document.createElement('img');
        img.src = canvas.toDataURL('image/png');
        img.style.cssText = 'width:' + plan.display_size + 'px;height:' + plan.display_size + 'px;vertical-align:middle;';
        el.classList.add('{GLYPH_FIX_CLASS}');
        el.appendChild(img);
        applied++;
    }}
    return applied;
}})()"#
    )
}

/// Restores icon glyphs when dropped.
struct GlyphGuard<'a, S: RenderSurface> {
    surface: &'a S,
}

impl<S: RenderSurface> Drop for GlyphGuard<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.surface.evaluate(ICON_RESTORE_SCRIPT, false) {
            warn!("Failed to restore icon glyphs: {}", e);
        }
    }
}

/// Produces PNG exports from capture targets.
#[derive(Debug, Clone)]
pub struct Rasterizer {
    config: RenderConfig,
}

impl Rasterizer {
    pub fn new(config: RenderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Capture the target at the configured pixel ratio.
    pub fn rasterize<S: RenderSurface>(&self, target: &CaptureTarget<S>) -> Result<PngExport> {
        self.rasterize_at(target, self.config.pixel_ratio)
    }

    /// Capture the target at an explicit pixel ratio.
    pub fn rasterize_at<S: RenderSurface>(
        &self,
        target: &CaptureTarget<S>,
        pixel_ratio: f64,
    ) -> Result<PngExport> {
        let start = Instant::now();
        let viewport = target.viewport();
        let surface = target.surface();
        let expected = viewport.scaled(pixel_ratio);

        let captured = {
            let _guard = self.substitute_icon_glyphs(surface, pixel_ratio);
            surface.capture_png(viewport, pixel_ratio)?
        };
        if captured.is_empty() {
            return Err(ExportError::NoImageProduced);
        }

        let image = normalize_capture(&captured, expected)?;
        let image = apply_background(image, self.config.background_color);
        let data = encode_png(&image, self.config.png_compression)?;

        info!(
            "Rasterized {} at {}x in {:?} ({} bytes)",
            viewport.label(),
            pixel_ratio,
            start.elapsed(),
            data.len()
        );
        Ok(PngExport {
            data,
            width: image.width(),
            height: image.height(),
            viewport,
        })
    }

    fn substitute_icon_glyphs<'a, S: RenderSurface>(
        &self,
        surface: &'a S,
        pixel_ratio: f64,
    ) -> Option<GlyphGuard<'a, S>> {
        let icons: Vec<IconGlyph> = match evaluate_json(surface, ICON_SCAN_SCRIPT) {
            Ok(icons) => icons,
            Err(e) => {
                debug!("Icon scan failed, capturing without substitution: {}", e);
                Vec::new()
            }
        };
        if icons.is_empty() {
            return None;
        }

        let plans: Vec<GlyphPlan> = icons.iter().map(|icon| GlyphPlan::new(icon, pixel_ratio)).collect();
        let guard = GlyphGuard { surface };
        match surface.evaluate(&glyph_apply_script(&plans), false) {
            Ok(applied) => debug!("Substituted {} icon glyphs", applied),
            Err(e) => warn!("Icon glyph substitution failed: {}", e),
        }
        Some(guard)
    }
}

/// Decode a capture and bring it to exactly `expected` pixels. Larger
/// captures are cropped from the top-left; smaller ones are an error.
pub fn normalize_capture(data: &[u8], expected: (u32, u32)) -> Result<RgbaImage> {
    let decoded = image::load_from_memory(data)?.into_rgba8();
    let (width, height) = decoded.dimensions();
    let (expected_width, expected_height) = expected;

    if width < expected_width || height < expected_height {
        return Err(ExportError::DimensionMismatch {
            expected_width,
            expected_height,
            actual_width: width,
            actual_height: height,
        });
    }
    if (width, height) == expected {
        return Ok(decoded);
    }

    debug!(
        "Cropping capture from {}x{} to {}x{}",
        width, height, expected_width, expected_height
    );
    Ok(imageops::crop_imm(&decoded, 0, 0, expected_width, expected_height).to_image())
}

/// Blend transparent pixels onto an opaque background colour.
pub fn apply_background(mut image: RgbaImage, background: (u8, u8, u8)) -> RgbaImage {
    let (r, g, b) = background;

    for pixel in image.pixels_mut() {
        let alpha = pixel[3] as f32 / 255.0;
        if alpha < 1.0 {
            let inv_alpha = 1.0 - alpha;
            pixel[0] = ((pixel[0] as f32 * alpha) + (r as f32 * inv_alpha)).round() as u8;
            pixel[1] = ((pixel[1] as f32 * alpha) + (g as f32 * inv_alpha)).round() as u8;
            pixel[2] = ((pixel[2] as f32 * alpha) + (b as f32 * inv_alpha)).round() as u8;
            pixel[3] = 255;
        }
    }

    image
}

fn compression_for(level: u8) -> png::Compression {
    match level {
        0..=3 => png::Compression::Fast,
        4..=6 => png::Compression::Default,
        _ => png::Compression::Best,
    }
}

/// Encode an RGBA image as PNG.
pub fn encode_png(image: &RgbaImage, level: u8) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());

    let mut encoder = png::Encoder::new(&mut buffer, image.width(), image.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(compression_for(level));

    let mut writer = encoder.write_header().map_err(|e| {
        ExportError::PngEncodingError(format!("Failed to write PNG header: {}", e))
    })?;

    writer.write_image_data(image.as_raw()).map_err(|e| {
        ExportError::PngEncodingError(format!("Failed to write PNG data: {}", e))
    })?;

    drop(writer);

    Ok(buffer.into_inner())
}
