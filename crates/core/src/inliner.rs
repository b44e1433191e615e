//! Resource inliner: turns a rendered document into one with no network
//! dependencies.
//!
//! Stylesheet rules are read from the live document as [`StylesheetRecord`]s
//! (sheets the browser refuses to expose are dropped). Web-font stylesheets
//! are fetched separately and their font binaries embedded as data URIs.
//! [`assemble`] then strips the external references and injects everything
//! into a single generated `<style>` block.

use crate::config::InlinerConfig;
use crate::fetch::{fetch_with_timeout, Fetcher};
use crate::images::encode_data_uri;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Marker attribute of the generated style block.
pub const INLINED_STYLE_ATTR: &str = "data-inlined";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CssRuleKind {
    FontFace,
    Other,
}

/// One rule of a stylesheet as reported by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CssRuleRecord {
    pub kind: CssRuleKind,
    pub text: String,
}

/// A stylesheet of the live document. `rules` is `None` when the browser
/// does not allow its rules to be read.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StylesheetRecord {
    pub href: Option<String>,
    pub rules: Option<Vec<CssRuleRecord>>,
}

impl StylesheetRecord {
    pub fn is_inspectable(&self) -> bool {
        self.rules.is_some()
    }
}

fn concat_rules<'a>(
    sheets: &'a [StylesheetRecord],
    filter: impl Fn(&CssRuleRecord) -> bool + 'a,
) -> String {
    let mut css = String::new();
    for sheet in sheets {
        let Some(rules) = &sheet.rules else {
            debug!(
                "Skipping uninspectable stylesheet {}",
                sheet.href.as_deref().unwrap_or("<inline>")
            );
            continue;
        };
        for rule in rules.iter().filter(|r| filter(r)) {
            css.push_str(&rule.text);
            css.push('\n');
        }
    }
    css
}

/// Text of every readable rule, in document order.
pub fn inline_stylesheets(sheets: &[StylesheetRecord]) -> String {
    concat_rules(sheets, |_| true)
}

/// Text of every readable `@font-face` rule.
pub fn inline_font_faces(sheets: &[StylesheetRecord]) -> String {
    concat_rules(sheets, |rule| rule.kind == CssRuleKind::FontFace)
}

/// Whether `url` is a stylesheet served by the configured web-font host.
pub fn is_web_font_url(url: &str, config: &InlinerConfig) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(rest) => rest
            .strip_prefix(config.font_host.as_str())
            .is_some_and(|path| path.starts_with("/css")),
        None => false,
    }
}

/// The first `family=` parameter of a web-font URL, with `+` decoded.
pub fn font_family_param(url: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let value = pair.strip_prefix("family=")?;
        let family = value.split(':').next().unwrap_or(value);
        Some(family.replace('+', " ").replace("%20", " "))
    })
}

/// Web-font stylesheet URLs referenced by `<link href>` or `@import url()`,
/// first occurrence first.
pub fn web_font_urls(html: &str, config: &InlinerConfig) -> Vec<String> {
    let href = static_regex!(HREF, r#"(?i)href\s*=\s*["'](https?://[^"']+)["']"#);
    let import = static_regex!(IMPORT, r#"(?i)@import\s+url\(\s*["']?(https?://[^"')]+)["']?\s*\)"#);

    let mut urls: Vec<String> = Vec::new();
    for caps in href.captures_iter(html).chain(import.captures_iter(html)) {
        let url = caps[1].replace("&amp;", "&");
        if is_web_font_url(&url, config) && !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

/// MIME type for a font binary, judged from its URL.
pub fn font_mime(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".woff2") {
        "font/woff2"
    } else if path.ends_with(".woff") {
        "font/woff"
    } else if path.ends_with(".ttf") {
        "font/ttf"
    } else if path.ends_with(".otf") {
        "font/otf"
    } else if url.contains(".woff2") {
        "font/woff2"
    } else {
        "font/woff"
    }
}

/// Fetch one web-font stylesheet and embed every font binary it references.
/// Returns `None` when the stylesheet itself cannot be obtained.
async fn fetch_font_css<F: Fetcher>(fetcher: &F, url: &str, config: &InlinerConfig) -> Option<String> {
    if let Some(family) = font_family_param(url) {
        if config.is_unhosted(&family) {
            debug!("Skipping web font '{}': not served by {}", family, config.font_host);
            return None;
        }
    }

    let css = match fetch_with_timeout(fetcher, url, config.fetch_timeout).await {
        Ok(resource) => resource.text(),
        Err(e) => {
            warn!("Web font stylesheet skipped: {}", e);
            return None;
        }
    };

    let font_url = static_regex!(FONT_URL, r#"url\(\s*["']?(https?://[^"')\s]+)["']?\s*\)"#);
    let mut binaries: Vec<(String, String)> = font_url
        .captures_iter(&css)
        .map(|caps| (caps[0].to_string(), caps[1].to_string()))
        .collect();
    binaries.dedup();

    let embedded: HashMap<String, String> = stream::iter(binaries)
        .map(|(token, font)| async move {
            match fetch_with_timeout(fetcher, &font, config.fetch_timeout).await {
                Ok(resource) => {
                    let uri = encode_data_uri(font_mime(&font), &resource.bytes);
                    Some((token, format!("url({uri})")))
                }
                Err(e) => {
                    debug!("Font binary skipped: {}", e);
                    None
                }
            }
        })
        .buffer_unordered(config.fetch_concurrency.max(1))
        .filter_map(|entry| async move { entry })
        .collect()
        .await;

    let mut css = css;
    for (token, replacement) in &embedded {
        css = css.replace(token, replacement);
    }
    Some(css)
}

/// Fetch every web-font stylesheet referenced by `html` and return their
/// combined CSS with font binaries embedded.
pub async fn inline_web_fonts<F: Fetcher>(html: &str, fetcher: &F, config: &InlinerConfig) -> String {
    let urls = web_font_urls(html, config);
    if urls.is_empty() {
        return String::new();
    }

    let mut css = String::new();
    let mut inlined = 0;
    for url in &urls {
        if let Some(text) = fetch_font_css(fetcher, url, config).await {
            css.push_str(&text);
            css.push('\n');
            inlined += 1;
        }
    }
    info!("Inlined {}/{} web font stylesheets", inlined, urls.len());
    css
}

/// Strip external stylesheet and framework references from `html` and insert
/// `css` as a single generated `<style>` block before `</head>`.
pub fn assemble(html: &str, css: &str) -> String {
    let framework_script = static_regex!(
        FRAMEWORK_SCRIPT,
        r#"(?is)<script[^>]*src\s*=\s*["']https://(?:cdn\.tailwindcss\.com|unpkg\.com/lucide)[^"']*["'][^>]*>.*?</script>"#
    );
    let icon_init = static_regex!(ICON_INIT, r#"(?is)<script>\s*lucide\.createIcons\(\);?\s*</script>"#);
    let link_tag = static_regex!(LINK_TAG, r#"(?is)<link\b[^>]*>"#);
    let import = static_regex!(
        REMOTE_IMPORT,
        r#"(?i)@import\s+url\(\s*["']?https?://[^)]*\)[\s;]*"#
    );

    let out = framework_script.replace_all(html, "");
    let out = icon_init.replace_all(&out, "");
    let out = link_tag.replace_all(&out, |caps: &regex::Captures| {
        if is_remote_stylesheet_link(&caps[0]) {
            String::new()
        } else {
            caps[0].to_string()
        }
    });
    let out = import.replace_all(&out, "");

    let block = format!("<style {INLINED_STYLE_ATTR}=\"true\">\n{css}\n</style>");
    insert_into_head(&out, &block)
}

fn is_remote_stylesheet_link(tag: &str) -> bool {
    let lower = tag.to_ascii_lowercase();
    let rel_stylesheet = static_regex!(REL_STYLESHEET, r#"rel\s*=\s*["']?[^"'>]*stylesheet"#);
    let remote_href = static_regex!(REMOTE_HREF, r#"href\s*=\s*["']?https?://"#);
    let font_host = lower.contains("fonts.googleapis.com") || lower.contains("fonts.gstatic.com");
    remote_href.is_match(&lower) && (rel_stylesheet.is_match(&lower) || font_host)
}

fn insert_into_head(html: &str, block: &str) -> String {
    let lower = html.to_ascii_lowercase();
    if let Some(pos) = lower.find("</head>") {
        return format!("{}{}\n{}", &html[..pos], block, &html[pos..]);
    }
    let head = format!("<head>{block}</head>");
    if let Some(pos) = lower.find("<body") {
        return format!("{}{}{}", &html[..pos], head, &html[pos..]);
    }
    if let Some(start) = lower.find("<html") {
        if let Some(end) = lower[start..].find('>') {
            let at = start + end + 1;
            return format!("{}{}{}", &html[..at], head, &html[at..]);
        }
    }
    format!("{head}{html}")
}
