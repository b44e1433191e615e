//! Render surfaces: isolated, same-origin documents that can be scripted and
//! screenshotted.
//!
//! A [`RenderBackend`] opens surfaces; a [`CaptureTarget`] owns one for the
//! duration of a single export and always tears it down, on success, on error
//! and on panic.

use crate::config::Viewport;
use crate::error::{ExportError, Result};
use crate::inliner::StylesheetRecord;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Script that proves the document body is readable from the host.
pub const BODY_CHECK_SCRIPT: &str =
    "(() => { try { return document.body !== null && typeof document.body.innerHTML === 'string'; } catch (e) { return false; } })()";

/// Script resolving once all declared fonts are ready.
pub const FONTS_READY_SCRIPT: &str = "document.fonts.ready.then(() => true)";

/// Script serializing the live document including its doctype.
pub const RENDERED_HTML_SCRIPT: &str =
    "'<!DOCTYPE html>' + document.documentElement.outerHTML";

/// Script listing every stylesheet and, where the browser permits, its rules.
pub const STYLESHEETS_SCRIPT: &str = r#"(() => {
    const sheets = [];
    for (const sheet of Array.from(document.styleSheets)) {
        let rules = null;
        try {
            rules = Array.from(sheet.cssRules).map((rule) => ({
                kind: (typeof CSSFontFaceRule !== 'undefined' && rule instanceof CSSFontFaceRule) ? 'font-face' : 'other',
                text: rule.cssText,
            }));
        } catch (e) {
            rules = null;
        }
        sheets.push({ href: sheet.href || null, rules });
    }
    return JSON.stringify(sheets);
})()"#;

/// Script resolving once every image has loaded or failed, or after 10 s.
pub const WAIT_FOR_IMAGES_SCRIPT: &str = r#"Promise.race([
    Promise.all(Array.from(document.images).map((img) => img.complete ? true : new Promise((resolve) => {
        img.addEventListener('load', () => resolve(true), { once: true });
        img.addEventListener('error', () => resolve(true), { once: true });
    }))).then(() => true),
    new Promise((resolve) => setTimeout(() => resolve(false), 10000)),
])"#;

/// A live document that can run scripts and be captured.
///
/// Implementations are blocking; async callers drive them from
/// `tokio::task::spawn_blocking`.
pub trait RenderSurface: Send {
    /// Evaluate a script and return its JSON value (`Null` for `undefined`).
    fn evaluate(&self, script: &str, await_promise: bool) -> Result<Value>;

    /// Capture `clip` (in CSS pixels from the top-left) as PNG, scaled by
    /// `pixel_ratio`.
    fn capture_png(&self, clip: Viewport, pixel_ratio: f64) -> Result<Vec<u8>>;

    /// Tear the surface down. Must be safe to call once per surface.
    fn close(&mut self) -> Result<()>;
}

/// Factory for render surfaces.
pub trait RenderBackend: Send + Sync + 'static {
    type Surface: RenderSurface + 'static;

    /// Open a surface at `viewport` showing `html`, returning once it has
    /// loaded.
    fn open(&self, html: &str, viewport: Viewport) -> Result<Self::Surface>;
}

/// Evaluate a script returning either a JSON string or a plain value and
/// deserialize the result.
pub fn evaluate_json<T: DeserializeOwned>(surface: &dyn RenderSurface, script: &str) -> Result<T> {
    let value = surface.evaluate(script, false)?;
    let parsed = match value {
        Value::String(text) => serde_json::from_str(&text),
        other => serde_json::from_value(other),
    };
    parsed.map_err(|e| ExportError::ScriptFailed(e.to_string()))
}

/// Scoped owner of a render surface.
pub struct CaptureTarget<S: RenderSurface> {
    surface: Option<S>,
    viewport: Viewport,
}

impl<S: RenderSurface> CaptureTarget<S> {
    /// Open a surface, verify it is usable, wait for fonts, then settle.
    pub fn acquire<B>(backend: &B, html: &str, viewport: Viewport, settle: Duration) -> Result<Self>
    where
        B: RenderBackend<Surface = S>,
    {
        let surface = backend.open(html, viewport)?;
        let target = Self {
            surface: Some(surface),
            viewport,
        };

        let accessible = target.surface().evaluate(BODY_CHECK_SCRIPT, false)?;
        if accessible != Value::Bool(true) {
            return Err(ExportError::SurfaceUnavailable(format!(
                "body check returned {accessible}"
            )));
        }

        if let Err(e) = target.surface().evaluate(FONTS_READY_SCRIPT, true) {
            debug!("Font readiness wait failed, continuing: {}", e);
        }

        if !settle.is_zero() {
            thread::sleep(settle);
        }

        debug!("Acquired render surface at {}", viewport.label());
        Ok(target)
    }

    pub fn surface(&self) -> &S {
        // Only `release` and `drop` take the surface, and both consume self.
        match &self.surface {
            Some(surface) => surface,
            None => unreachable!("capture target used after release"),
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// All stylesheets of the live document.
    pub fn stylesheets(&self) -> Result<Vec<StylesheetRecord>> {
        evaluate_json(self.surface(), STYLESHEETS_SCRIPT)
    }

    /// The live document serialized after scripts have run.
    pub fn rendered_html(&self) -> Result<String> {
        match self.surface().evaluate(RENDERED_HTML_SCRIPT, false)? {
            Value::String(html) => Ok(html),
            other => Err(ExportError::ScriptFailed(format!(
                "expected serialized document, got {other}"
            ))),
        }
    }

    /// Wait until every image has either loaded or failed.
    pub fn wait_for_images(&self) -> Result<()> {
        let settled = self.surface().evaluate(WAIT_FOR_IMAGES_SCRIPT, true)?;
        if settled != Value::Bool(true) {
            warn!("Timed out waiting for images to load");
        }
        Ok(())
    }

    /// Tear down the surface, reporting any error.
    pub fn release(mut self) -> Result<()> {
        match self.surface.take() {
            Some(mut surface) => surface.close(),
            None => Ok(()),
        }
    }
}

impl<S: RenderSurface> Drop for CaptureTarget<S> {
    fn drop(&mut self) {
        if let Some(mut surface) = self.surface.take() {
            if let Err(e) = surface.close() {
                warn!("Failed to close render surface: {}", e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted surface used by unit tests across the crate.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct Recorder {
        pub opened: AtomicUsize,
        pub closed: AtomicUsize,
        pub scripts: Mutex<Vec<String>>,
    }

    pub struct ScriptedBackend {
        pub recorder: Arc<Recorder>,
        pub body_accessible: bool,
        pub responses: Vec<(&'static str, Value)>,
    }

    impl ScriptedBackend {
        pub fn new() -> Self {
            Self {
                recorder: Arc::new(Recorder::default()),
                body_accessible: true,
                responses: Vec::new(),
            }
        }

        pub fn respond(mut self, needle: &'static str, value: Value) -> Self {
            self.responses.push((needle, value));
            self
        }
    }

    pub struct ScriptedSurface {
        recorder: Arc<Recorder>,
        body_accessible: bool,
        responses: Vec<(&'static str, Value)>,
        html: String,
    }

    impl RenderBackend for ScriptedBackend {
        type Surface = ScriptedSurface;

        fn open(&self, html: &str, _viewport: Viewport) -> Result<ScriptedSurface> {
            self.recorder.opened.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedSurface {
                recorder: Arc::clone(&self.recorder),
                body_accessible: self.body_accessible,
                responses: self.responses.clone(),
                html: html.to_string(),
            })
        }
    }

    impl RenderSurface for ScriptedSurface {
        fn evaluate(&self, script: &str, _await_promise: bool) -> Result<Value> {
            self.recorder.scripts.lock().unwrap().push(script.to_string());
            if script == BODY_CHECK_SCRIPT {
                return Ok(Value::Bool(self.body_accessible));
            }
            if script == RENDERED_HTML_SCRIPT {
                return Ok(Value::String(self.html.clone()));
            }
            for (needle, value) in &self.responses {
                if script.contains(needle) {
                    return Ok(value.clone());
                }
            }
            Ok(Value::Null)
        }

        fn capture_png(&self, clip: Viewport, pixel_ratio: f64) -> Result<Vec<u8>> {
            let (w, h) = clip.scaled(pixel_ratio);
            let img = image::RgbaImage::from_pixel(w, h, image::Rgba([0, 0, 0, 0]));
            let mut out = std::io::Cursor::new(Vec::new());
            img.write_to(&mut out, image::ImageFormat::Png)?;
            Ok(out.into_inner())
        }

        fn close(&mut self) -> Result<()> {
            self.recorder.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
