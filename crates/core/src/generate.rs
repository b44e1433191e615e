//! Generative collaborators: HTML/slide generation and image generation.
//!
//! The collaborators are black boxes behind [`HtmlGenerator`] and
//! [`ImageGenerator`]. Everything returned by them is checked here before it
//! is trusted: code fences are stripped and the root container must be
//! present.

use crate::config::{GeminiConfig, SlideConfig};
use crate::error::{ExportError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::stream::{self, StreamExt};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use tracing::{debug, info, warn};

/// Instructions for turning a document into a slide deck.
pub const SLIDES_PROMPT: &str = "You are an expert at turning HTML content into 16:9 presentation slides.

Analyse the given HTML and restructure it as a proposal/presentation deck.

Rules:
- Every slide is standalone HTML sized to width:1280px, height:720px
- Use inline CSS only (no external CSS or JS)
- The root of every slide must be <div style=\"width:1280px;height:720px;overflow:hidden;...\">
- Apply a clean, professional presentation design
  - generous padding (60px or more)
  - large readable type (titles 40px+, body 24px+)
  - harmonious background and text colours
  - clear visual hierarchy (title, subtitle, body)
- The first slide is a title slide
- The last slide is a thank-you/closing slide
- Split the source content into logical units, one per slide
- Do not overload a slide; keep to the key points
- Korean text: use font-family 'Noto Sans KR', sans-serif
- Never use external images (img src); draw shapes and icons with CSS instead
- Never reference external resources (images, font CDNs, ...)

Response format: separate the slides with the delimiter <!--SLIDE_BREAK-->.
Output only slide HTML, no explanations.

Example:
<div style=\"width:1280px;height:720px;...\">slide 1</div>
<!--SLIDE_BREAK-->
<div style=\"width:1280px;height:720px;...\">slide 2</div>";

/// Instructions for editing one slide.
pub const MODIFY_SLIDE_PROMPT: &str = "You are an expert at editing HTML presentation slides.

Given the slide HTML and the user's instruction, return the edited slide HTML.

Rules:
- Keep the slide size (width:1280px, height:720px)
- Use inline CSS only
- Keep the root element in the form <div style=\"width:1280px;height:720px;overflow:hidden;...\">
- Korean text: use font-family 'Noto Sans KR', sans-serif
- Never use external images (img src)
- Never reference external resources (images, font CDNs, ...)
- Output only the edited slide HTML, no explanations.";

/// Instructions for editing every slide of a deck in one request.
pub const MODIFY_ALL_SLIDES_PROMPT: &str = "You are an expert at editing HTML presentation decks.

Given every slide of a deck and the user's instruction, apply the instruction to the whole deck and return every slide.

Rules:
- Return exactly as many slides as you were given, in the same order
- Separate the slides with the delimiter <!--SLIDE_BREAK-->
- Keep each slide's root element in the form <div style=\"width:1280px;height:720px;overflow:hidden;...\">
- Use inline CSS only
- Korean text: use font-family 'Noto Sans KR', sans-serif
- Never use external images (img src)
- Never reference external resources (images, font CDNs, ...)
- Output only slide HTML, no explanations.";

/// Instructions for editing a whole document.
pub const MODIFY_DOCUMENT_PROMPT: &str = "You are an expert at editing HTML documents.

Given the document HTML and the user's instruction, return the complete edited document.

Rules:
- Keep everything the instruction does not ask to change
- Keep the existing styling approach (classes, inline styles, linked stylesheets)
- Output only the complete HTML document, no explanations.";

/// Instructions for repairing a slide that overflows its canvas.
pub const VIEWPORT_FIX_PROMPT: &str = "You are an expert at fixing HTML presentation slides that overflow their canvas.

You receive a slide's HTML and a screenshot of how it renders on a 1280x720 canvas with overflow hidden.
Anything cut off in the screenshot is overflowing. Rewrite the slide so all content fits inside the canvas.

Rules:
- The root element must be <div style=\"width:1280px;height:720px;overflow:hidden;position:relative;...\">
- Lay content out with absolute or relative positioning
- Every dimension in px; never use %, vw, vh or other viewport units
- Shrink type, spacing or content density as needed, but keep the content and the design language
- Use inline CSS only and never reference external resources
- Output only the slide HTML, no explanations.";

/// How large the collaborator's answer may get.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSize {
    /// A whole deck or document.
    Long,
    /// A single slide.
    Short,
}

/// One request to an [`HtmlGenerator`].
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub system: &'a str,
    pub payload: &'a str,
    /// PNG attached for vision-capable models.
    pub image_png: Option<&'a [u8]>,
    pub size: ResponseSize,
}

impl<'a> GenerationRequest<'a> {
    pub fn new(system: &'a str, payload: &'a str, size: ResponseSize) -> Self {
        Self {
            system,
            payload,
            image_png: None,
            size,
        }
    }

    pub fn with_image(mut self, png: &'a [u8]) -> Self {
        self.image_png = Some(png);
        self
    }
}

/// Produces HTML text from instructions and a payload.
pub trait HtmlGenerator: Send + Sync {
    fn generate(&self, request: GenerationRequest<'_>) -> impl Future<Output = Result<String>> + Send;
}

/// Produces one raster image, as a data URI, from a prompt.
pub trait ImageGenerator: Send + Sync {
    fn generate_image(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;
}

/// Remove a leading ```` ```html ```` / ```` ``` ```` fence and its closing fence.
pub fn strip_code_fences(text: &str) -> String {
    let mut html = text.trim();
    if let Some(rest) = html.strip_prefix("```") {
        let rest = rest.strip_prefix("html").unwrap_or(rest);
        let rest = rest.strip_prefix('\n').unwrap_or(rest);
        let rest = rest.strip_suffix("```").unwrap_or(rest);
        html = rest.strip_suffix('\n').unwrap_or(rest);
    }
    html.trim().to_string()
}

/// Whether a response contains the marker of a usable root container.
pub fn has_root_container(html: &str, config: &SlideConfig) -> bool {
    html.contains(config.root_marker.as_str())
}

/// Split a delimited response into slides, keeping only usable fragments.
pub fn parse_slides(text: &str, config: &SlideConfig) -> Result<Vec<String>> {
    let cleaned = strip_code_fences(text);
    let slides: Vec<String> = cleaned
        .split(config.delimiter.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty() && has_root_container(s, config))
        .map(str::to_string)
        .collect();
    if slides.is_empty() {
        return Err(ExportError::UnusableHtml);
    }
    Ok(slides)
}

/// Generate a deck from a document.
pub async fn convert_html_to_slides<G: HtmlGenerator>(
    generator: &G,
    html: &str,
    config: &SlideConfig,
) -> Result<Vec<String>> {
    let payload = format!("Convert the following HTML into presentation slides:\n\n{html}");
    let text = generator
        .generate(GenerationRequest::new(SLIDES_PROMPT, &payload, ResponseSize::Long))
        .await?;
    let slides = parse_slides(&text, config)?;
    info!("Generated {} slides", slides.len());
    Ok(slides)
}

/// Edit one slide.
pub async fn modify_slide_html<G: HtmlGenerator>(
    generator: &G,
    slide: &str,
    instruction: &str,
    config: &SlideConfig,
) -> Result<String> {
    let payload = format!("Current slide HTML:\n\n{slide}\n\nInstruction:\n{instruction}");
    let text = generator
        .generate(GenerationRequest::new(MODIFY_SLIDE_PROMPT, &payload, ResponseSize::Short))
        .await?;
    let html = strip_code_fences(&text);
    if !has_root_container(&html, config) {
        return Err(ExportError::UnusableHtml);
    }
    Ok(html)
}

/// Edit every slide in one request. Always returns `slides.len()` slides.
pub async fn modify_all_slides_html<G: HtmlGenerator>(
    generator: &G,
    slides: &[String],
    instruction: &str,
    config: &SlideConfig,
) -> Result<Vec<String>> {
    let mut deck = String::new();
    for (i, slide) in slides.iter().enumerate() {
        if i > 0 {
            deck.push('\n');
            deck.push_str(&config.delimiter);
            deck.push('\n');
        }
        deck.push_str(slide);
    }
    let payload = format!(
        "The deck has {} slides:\n\n{deck}\n\nInstruction:\n{instruction}",
        slides.len()
    );
    let text = generator
        .generate(GenerationRequest::new(
            MODIFY_ALL_SLIDES_PROMPT,
            &payload,
            ResponseSize::Long,
        ))
        .await?;

    let mut modified = parse_slides(&text, config)?;
    if modified.len() != slides.len() {
        warn!(
            "Collaborator returned {} slides for a deck of {}",
            modified.len(),
            slides.len()
        );
    }
    modified.truncate(slides.len());
    let returned = modified.len();
    modified.extend(slides[returned..].iter().cloned());
    Ok(modified)
}

/// Edit a whole document.
pub async fn modify_document_html<G: HtmlGenerator>(
    generator: &G,
    html: &str,
    instruction: &str,
) -> Result<String> {
    let payload = format!("Current document HTML:\n\n{html}\n\nInstruction:\n{instruction}");
    let text = generator
        .generate(GenerationRequest::new(
            MODIFY_DOCUMENT_PROMPT,
            &payload,
            ResponseSize::Long,
        ))
        .await?;
    let modified = strip_code_fences(&text);
    let lower = modified.to_ascii_lowercase();
    if !["<html", "<body", "<div", "<p", "<main", "<section"]
        .iter()
        .any(|tag| lower.contains(tag))
    {
        return Err(ExportError::UnusableHtml);
    }
    Ok(modified)
}

/// Ask a vision model to rewrite a slide that overflows its canvas.
pub async fn fix_slide_html<G: HtmlGenerator>(
    generator: &G,
    slide: &str,
    screenshot_png: &[u8],
    config: &SlideConfig,
) -> Result<String> {
    let payload = format!("Slide HTML:\n\n{slide}");
    let text = generator
        .generate(
            GenerationRequest::new(VIEWPORT_FIX_PROMPT, &payload, ResponseSize::Short)
                .with_image(screenshot_png),
        )
        .await?;
    let html = strip_code_fences(&text);
    if !has_root_container(&html, config) {
        return Err(ExportError::UnusableHtml);
    }
    Ok(html)
}

/// Generate one image per prompt, concurrently. Failed prompts yield `None`.
pub async fn generate_images<I: ImageGenerator>(
    generator: &I,
    prompts: &[String],
    concurrency: usize,
) -> Vec<Option<String>> {
    let results: Vec<Option<String>> = stream::iter(prompts.iter().enumerate())
        .map(|(i, prompt)| async move {
            match generator.generate_image(prompt).await {
                Ok(uri) => Some(uri),
                Err(e) => {
                    warn!("Image {} failed: {}", i, e);
                    None
                }
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;
    let produced = results.iter().filter(|r| r.is_some()).count();
    info!("Generated {}/{} images", produced, prompts.len());
    results
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

fn first_candidate(response: &GenerateResponse) -> Result<&Candidate> {
    let Some(candidate) = response.candidates.first() else {
        return Err(match response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.clone())
        {
            Some(reason) => ExportError::GenerationBlocked(reason),
            None => ExportError::GenerationEmpty("candidates"),
        });
    };
    if let Some(reason) = candidate.finish_reason.as_deref() {
        if reason != "STOP" {
            return Err(ExportError::GenerationIncomplete(reason.to_string()));
        }
    }
    Ok(candidate)
}

fn extract_text(response: &GenerateResponse) -> Result<String> {
    first_candidate(response)?
        .content
        .as_ref()
        .and_then(|c| c.parts.first())
        .and_then(|p| p.text.clone())
        .filter(|t| !t.is_empty())
        .ok_or(ExportError::GenerationEmpty("text"))
}

fn extract_image(response: &GenerateResponse) -> Result<String> {
    first_candidate(response)?
        .content
        .as_ref()
        .and_then(|c| c.parts.iter().find_map(|p| p.inline_data.as_ref()))
        .map(|d| format!("data:{};base64,{}", d.mime_type, d.data))
        .ok_or(ExportError::GenerationEmpty("image"))
}

/// Gemini `generateContent` client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    config: GeminiConfig,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        config.validate()?;
        let api_key = config.resolve_api_key()?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("gdoc-fixer/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ExportError::Http {
                url: config.api_base.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn max_output_tokens(&self, size: ResponseSize) -> u32 {
        match size {
            ResponseSize::Long => self.config.long_output_tokens,
            ResponseSize::Short => self.config.short_output_tokens,
        }
    }

    async fn post(&self, model: &str, body: &Value) -> Result<GenerateResponse> {
        let url = self.config.endpoint(model);
        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ExportError::Http {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail: Value = response.json().await.unwrap_or(Value::Null);
            let message = detail
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("status {}", status.as_u16()));
            return Err(ExportError::GenerationApi {
                status: status.as_u16(),
                message,
            });
        }

        response.json().await.map_err(|e| ExportError::Http {
            url,
            message: format!("invalid response body: {e}"),
        })
    }
}

impl HtmlGenerator for GeminiClient {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String> {
        let mut parts = vec![json!({ "text": request.system }), json!({ "text": request.payload })];
        if let Some(png) = request.image_png {
            parts.push(json!({
                "inline_data": { "mime_type": "image/png", "data": STANDARD.encode(png) }
            }));
        }
        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "temperature": self.config.temperature,
                "maxOutputTokens": self.max_output_tokens(request.size),
            },
        });
        let response = self.post(&self.config.text_model, &body).await?;
        extract_text(&response)
    }
}

impl ImageGenerator for GeminiClient {
    async fn generate_image(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
        });
        let response = self.post(&self.config.image_model, &body).await?;
        extract_image(&response)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedGenerator;
    use super::*;

    fn slide(body: &str) -> String {
        format!(r#"<div style="width:1280px;height:720px;overflow:hidden">{body}</div>"#)
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```html\n<div>a</div>\n```"), "<div>a</div>");
        assert_eq!(strip_code_fences("```\n<div>a</div>\n```"), "<div>a</div>");
        assert_eq!(strip_code_fences("  <div>a</div>  "), "<div>a</div>");
        assert_eq!(strip_code_fences("```html<div>a</div>```"), "<div>a</div>");
    }

    #[test]
    fn test_parse_slides_filters_unusable_fragments() {
        let config = SlideConfig::default();
        let text = format!(
            "```html\n{}\n<!--SLIDE_BREAK-->\nSure, here you go\n<!--SLIDE_BREAK-->\n{}\n```",
            slide("one"),
            slide("two")
        );
        let slides = parse_slides(&text, &config).unwrap();
        assert_eq!(slides, vec![slide("one"), slide("two")]);
    }

    #[test]
    fn test_parse_slides_errors_when_nothing_usable() {
        let config = SlideConfig::default();
        assert!(matches!(
            parse_slides("no markup here", &config),
            Err(ExportError::UnusableHtml)
        ));
    }

    #[tokio::test]
    async fn test_modify_slide_rejects_response_without_root() {
        let generator = ScriptedGenerator::new().reply("I cannot help with that.");
        let result =
            modify_slide_html(&generator, &slide("a"), "make it blue", &SlideConfig::default())
                .await;
        assert!(matches!(result, Err(ExportError::UnusableHtml)));
    }

    #[tokio::test]
    async fn test_modify_slide_payload_carries_instruction() {
        let generator = ScriptedGenerator::new().reply(format!("```html\n{}\n```", slide("b")));
        let out = modify_slide_html(&generator, &slide("a"), "make it blue", &SlideConfig::default())
            .await
            .unwrap();
        assert_eq!(out, slide("b"));
        let payloads = generator.payloads.lock().unwrap();
        assert!(payloads[0].contains("make it blue"));
        assert!(payloads[0].contains(&slide("a")));
    }

    #[tokio::test]
    async fn test_modify_all_backfills_missing_slides() {
        let originals = vec![slide("a"), slide("b"), slide("c")];
        let generator = ScriptedGenerator::new().reply(format!(
            "{}\n<!--SLIDE_BREAK-->\n{}",
            slide("A"),
            slide("B")
        ));
        let out = modify_all_slides_html(&generator, &originals, "caps", &SlideConfig::default())
            .await
            .unwrap();
        assert_eq!(out, vec![slide("A"), slide("B"), slide("c")]);
    }

    #[tokio::test]
    async fn test_modify_all_drops_extra_slides() {
        let originals = vec![slide("a")];
        let generator = ScriptedGenerator::new().reply(format!(
            "{}\n<!--SLIDE_BREAK-->\n{}",
            slide("A"),
            slide("extra")
        ));
        let out = modify_all_slides_html(&generator, &originals, "caps", &SlideConfig::default())
            .await
            .unwrap();
        assert_eq!(out, vec![slide("A")]);
    }

    #[tokio::test]
    async fn test_fix_slide_attaches_screenshot() {
        let generator = ScriptedGenerator::new().reply(slide("fixed"));
        let out = fix_slide_html(&generator, &slide("big"), &[1, 2, 3], &SlideConfig::default())
            .await
            .unwrap();
        assert_eq!(out, slide("fixed"));
        assert_eq!(*generator.images.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_modify_document_requires_markup() {
        let generator = ScriptedGenerator::new()
            .reply("Sorry.")
            .reply("<html><body><p>edited</p></body></html>");
        assert!(matches!(
            modify_document_html(&generator, "<p>x</p>", "edit").await,
            Err(ExportError::UnusableHtml)
        ));
        assert!(modify_document_html(&generator, "<p>x</p>", "edit")
            .await
            .unwrap()
            .contains("edited"));
    }

    struct FlakyImages;

    impl ImageGenerator for FlakyImages {
        async fn generate_image(&self, prompt: &str) -> Result<String> {
            if prompt.contains("bad") {
                Err(ExportError::GenerationBlocked("SAFETY".to_string()))
            } else {
                Ok(format!("data:image/png;base64,{}", STANDARD.encode(prompt)))
            }
        }
    }

    #[tokio::test]
    async fn test_generate_images_keeps_partial_results_in_order() {
        let prompts = vec!["cat".to_string(), "bad dog".to_string(), "owl".to_string()];
        let out = generate_images(&FlakyImages, &prompts, 2).await;
        assert_eq!(out.len(), 3);
        assert!(out[0].as_deref().unwrap().starts_with("data:image/png;base64,"));
        assert!(out[1].is_none());
        assert!(out[2].is_some());
    }

    fn response(value: Value) -> GenerateResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_response_text_extraction() {
        let ok = response(json!({
            "candidates": [{ "content": { "parts": [{ "text": "<div>x</div>" }] }, "finishReason": "STOP" }]
        }));
        assert_eq!(extract_text(&ok).unwrap(), "<div>x</div>");
    }

    #[test]
    fn test_response_blocked() {
        let blocked = response(json!({ "promptFeedback": { "blockReason": "SAFETY" } }));
        assert!(matches!(
            extract_text(&blocked),
            Err(ExportError::GenerationBlocked(reason)) if reason == "SAFETY"
        ));
        let empty = response(json!({}));
        assert!(matches!(
            extract_text(&empty),
            Err(ExportError::GenerationEmpty("candidates"))
        ));
    }

    #[test]
    fn test_response_truncated() {
        let truncated = response(json!({
            "candidates": [{ "content": { "parts": [{ "text": "<div" }] }, "finishReason": "MAX_TOKENS" }]
        }));
        assert!(matches!(
            extract_text(&truncated),
            Err(ExportError::GenerationIncomplete(reason)) if reason == "MAX_TOKENS"
        ));
    }

    #[test]
    fn test_response_missing_text() {
        let no_text = response(json!({ "candidates": [{ "content": { "parts": [] } }] }));
        assert!(matches!(
            extract_text(&no_text),
            Err(ExportError::GenerationEmpty("text"))
        ));
    }

    #[test]
    fn test_response_image_extraction() {
        let image = response(json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "here" },
                    { "inlineData": { "mimeType": "image/png", "data": "AAAA" } }
                ] },
                "finishReason": "STOP"
            }]
        }));
        assert_eq!(extract_image(&image).unwrap(), "data:image/png;base64,AAAA");
    }
}
