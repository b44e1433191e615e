//! Error types for the gdoc-fixer pipelines.

use thiserror::Error;

/// Main error type for the gdoc-fixer library.
///
/// Only failures that abort a whole export or generation operation are
/// represented here. A single unreachable stylesheet, font or image degrades
/// the output and is logged instead.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Chrome/Chromium is not installed or not found in PATH.
    #[error("Chrome not found. Please install Chrome or Chromium, or set render.browser_path")]
    BrowserNotFound,

    /// The headless browser driver reported an error.
    #[error("Browser error: {0}")]
    Browser(String),

    /// The render surface was created but its document body cannot be read.
    #[error("Render surface body is not accessible: {0}")]
    SurfaceUnavailable(String),

    /// A script evaluated inside the render surface failed or returned garbage.
    #[error("Script evaluation failed in render surface: {0}")]
    ScriptFailed(String),

    /// The rasterizer produced no image at all.
    #[error("Failed to generate PNG: capture returned no data")]
    NoImageProduced,

    /// The captured image is smaller than the requested viewport.
    #[error("Captured image is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// PNG decoding of a captured screenshot failed.
    #[error("Image decoding failed: {0}")]
    ImageDecodeError(String),

    /// PNG encoding failed.
    #[error("PNG encoding failed: {0}")]
    PngEncodingError(String),

    /// Packaging the DOCX archive failed.
    #[error("DOCX packaging failed: {0}")]
    DocxError(String),

    /// Assembling the PDF failed.
    #[error("PDF export failed: {0}")]
    PdfError(String),

    /// A deck export was requested with no slides.
    #[error("No slides to export")]
    NoSlides,

    /// An HTTP request to a collaborator failed.
    #[error("HTTP request to '{url}' failed: {message}")]
    Http { url: String, message: String },

    /// The generative API returned a non-success status.
    #[error("Generation API error ({status}): {message}")]
    GenerationApi { status: u16, message: String },

    /// The generative API blocked the prompt.
    #[error("Generation request was blocked: {0}")]
    GenerationBlocked(String),

    /// The generative API stopped before finishing.
    #[error("Generation stopped early: {0}")]
    GenerationIncomplete(String),

    /// The generative API returned no usable payload.
    #[error("Generation API returned no {0}")]
    GenerationEmpty(&'static str),

    /// The collaborator answered, but not with the expected HTML root.
    #[error("Generated HTML has no usable root container")]
    UnusableHtml,

    /// No API key was configured for the generative collaborator.
    #[error("Gemini API key is not configured (set GEMINI_API_KEY)")]
    MissingApiKey,

    /// An export is already running on this exporter.
    #[error("Another export is already in progress")]
    Busy,

    /// An edit was requested with a blank instruction.
    #[error("Instruction must not be empty")]
    EmptyInstruction,

    /// The same slide already has an edit in flight.
    #[error("Slide {0} is already being modified")]
    SlideBusy(usize),

    /// Slide index out of range.
    #[error("Slide index {index} out of range (presentation has {len} slides)")]
    SlideOutOfRange { index: usize, len: usize },

    /// History or snapshot position out of range.
    #[error("No {kind} at position {position}")]
    HistoryOutOfRange { kind: &'static str, position: usize },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Blocking render task panicked or was cancelled.
    #[error("Render task failed: {0}")]
    TaskFailed(String),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, ExportError>;

impl From<anyhow::Error> for ExportError {
    fn from(err: anyhow::Error) -> Self {
        ExportError::Browser(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ExportError {
    fn from(err: tokio::task::JoinError) -> Self {
        ExportError::TaskFailed(err.to_string())
    }
}

impl From<image::ImageError> for ExportError {
    fn from(err: image::ImageError) -> Self {
        ExportError::ImageDecodeError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_browser_not_found() {
        let err = ExportError::BrowserNotFound;
        let msg = format!("{}", err);
        assert!(msg.contains("Chrome not found"));
        assert!(msg.contains("browser_path"));
    }

    #[test]
    fn test_error_display_dimension_mismatch() {
        let err = ExportError::DimensionMismatch {
            expected_width: 2160,
            expected_height: 2160,
            actual_width: 2000,
            actual_height: 2160,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("2000x2160"));
        assert!(msg.contains("expected 2160x2160"));
    }

    #[test]
    fn test_error_display_http() {
        let err = ExportError::Http {
            url: "https://fonts.googleapis.com/css2".to_string(),
            message: "timed out".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("fonts.googleapis.com"));
        assert!(msg.contains("timed out"));
    }

    #[test]
    fn test_error_display_slide_out_of_range() {
        let err = ExportError::SlideOutOfRange { index: 5, len: 3 };
        let msg = format!("{}", err);
        assert!(msg.contains("5"));
        assert!(msg.contains("3 slides"));
    }

    #[test]
    fn test_error_display_generation_empty() {
        let err = ExportError::GenerationEmpty("text");
        assert_eq!(format!("{}", err), "Generation API returned no text");
    }

    #[test]
    fn test_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ExportError = io_err.into();
        match err {
            ExportError::Io(_) => (),
            _ => panic!("Expected Io"),
        }
    }

    #[test]
    fn test_error_from_anyhow() {
        let err: ExportError = anyhow::anyhow!("tab crashed").into();
        match err {
            ExportError::Browser(msg) => assert!(msg.contains("tab crashed")),
            _ => panic!("Expected Browser"),
        }
    }

    #[test]
    fn test_error_debug_impl() {
        let err = ExportError::SurfaceUnavailable("cross-origin".to_string());
        let debug = format!("{:?}", err);
        assert!(debug.contains("SurfaceUnavailable"));
        assert!(debug.contains("cross-origin"));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);

        fn returns_error() -> Result<i32> {
            Err(ExportError::Busy)
        }
        assert!(returns_error().is_err());
    }
}
