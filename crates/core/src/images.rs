//! Image materializer.
//!
//! Normalizes every image reference (remote URL, CSS background, data URI)
//! into embedded data, and shields image payloads from the text-based
//! rewriting passes by swapping them for short placeholders.

use crate::css::{parse_declarations, serialize_declarations};
use crate::dom;
use crate::fetch::{fetch_with_timeout, Fetcher};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, info};

/// Attribute carrying the placeholder id on `<img>` elements.
pub const PLACEHOLDER_ID_ATTR: &str = "data-docx-id";

/// 1×1 transparent GIF substituted for every image source.
pub const PLACEHOLDER_GIF: &str =
    "data:image/gif;base64,R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7";

/// Inline style of `<img>` elements created from CSS backgrounds.
pub const BACKGROUND_IMG_STYLE: &str = "width: 100%; height: auto; display: block;";

const BACKGROUND_PROPERTIES: &[&str] = &[
    "background-image",
    "background-size",
    "background-position",
    "background-repeat",
];

const FONT_EXTENSIONS: &[&str] = &[".woff2", ".woff", ".ttf", ".otf", ".eot"];

/// Build a base64 data URI.
pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Decode a base64 data URI into its MIME type and bytes.
pub fn decode_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let rest = uri.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?;
    let bytes = STANDARD.decode(payload.trim()).ok()?;
    Some((mime.to_string(), bytes))
}

/// Fetch an image and return it as a data URI, or `None` on any failure.
pub async fn fetch_as_data_uri<F: Fetcher>(fetcher: &F, url: &str, timeout: Duration) -> Option<String> {
    match fetch_with_timeout(fetcher, url, timeout).await {
        Ok(resource) if !resource.bytes.is_empty() => {
            let mime = match resource.mime() {
                Some(mime) if mime.starts_with("image/") => mime.to_string(),
                _ => sniff_image_mime(&resource.bytes)?,
            };
            Some(encode_data_uri(&mime, &resource.bytes))
        }
        Ok(_) => {
            debug!("Image {} is empty", url);
            None
        }
        Err(e) => {
            debug!("Image fetch failed: {}", e);
            None
        }
    }
}

fn sniff_image_mime(bytes: &[u8]) -> Option<String> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type().to_string())
}

/// Remote image URLs referenced by `<img src>` or CSS `url(...)`.
pub fn collect_remote_image_urls(html: &str) -> BTreeSet<String> {
    let img_src = static_regex!(
        IMG_SRC,
        r#"(?is)<img\s[^>]*?src\s*=\s*["'](https?://[^"']+)["']"#
    );
    let css_url = static_regex!(CSS_URL, r#"(?i)url\(\s*["']?(https?://[^"')\s]+)["']?\s*\)"#);

    img_src
        .captures_iter(html)
        .chain(css_url.captures_iter(html))
        .map(|caps| caps[1].to_string())
        .filter(|url| {
            let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
            !FONT_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        })
        .collect()
}

/// Replace every remote image reference with an embedded data URI. Images
/// that cannot be fetched keep their original URL.
pub async fn inline_remote_images<F: Fetcher>(
    html: &str,
    fetcher: &F,
    timeout: Duration,
    concurrency: usize,
) -> String {
    let urls = collect_remote_image_urls(html);
    if urls.is_empty() {
        return html.to_string();
    }
    let total = urls.len();

    let embedded: HashMap<String, String> = stream::iter(urls)
        .map(|url| async move {
            let uri = fetch_as_data_uri(fetcher, &url, timeout).await;
            uri.map(|uri| (url, uri))
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|entry| async move { entry })
        .collect()
        .await;

    // Only attribute and `url()` values are rewritten; the same URL in text
    // or an href stays as written.
    let src_value = static_regex!(SRC_VALUE, r#"(?i)(\bsrc\s*=\s*["'])(https?://[^"']+)"#);
    let url_value = static_regex!(URL_VALUE, r#"(?i)(url\(\s*["']?)(https?://[^"')\s]+)"#);
    let swap = |caps: &regex::Captures<'_>| match embedded.get(&caps[2]) {
        Some(uri) => format!("{}{}", &caps[1], uri),
        None => caps[0].to_string(),
    };
    let out = src_value.replace_all(html, &swap);
    let out = url_value.replace_all(&out, &swap).into_owned();
    info!("Embedded {}/{} remote images", embedded.len(), total);
    out
}

fn background_source(value: &str) -> Option<String> {
    let url = static_regex!(
        BACKGROUND_URL,
        r#"(?i)^url\(\s*["']?(data:[^"')]+|https?:[^"')]+)["']?\s*\)"#
    );
    url.captures(value.trim()).map(|caps| caps[1].to_string())
}

/// Turn `background-image: url(...)` declarations into a leading `<img>`
/// child and drop the background declarations from the element.
pub fn convert_background_images_to_img_tags(html: &str) -> String {
    let document = dom::parse_document(html);
    let mut converted = 0;

    for node in dom::select_all(&document, "[style]") {
        let style = dom::get_attr(&node, "style").unwrap_or_default();
        let declarations = parse_declarations(&style);
        let Some(source) = declarations
            .iter()
            .filter(|d| d.property == "background-image")
            .find_map(|d| background_source(&d.value))
        else {
            continue;
        };

        let kept: Vec<_> = declarations
            .into_iter()
            .filter(|d| !BACKGROUND_PROPERTIES.contains(&d.property.as_str()))
            .collect();
        dom::set_attr(&node, "style", serialize_declarations(&kept));

        let img = dom::new_element(
            "img",
            &[
                ("src", source),
                ("style", BACKGROUND_IMG_STYLE.to_string()),
                ("alt", String::new()),
            ],
        );
        node.prepend(img);
        converted += 1;
    }

    debug!("Converted {} background images to <img>", converted);
    dom::serialize(&document)
}

/// An image source removed by [`extract_and_replace_with_placeholders`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderEntry {
    pub source: String,
    pub quote: char,
}

/// Placeholder id → original image source, in extraction order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderMap {
    entries: Vec<(String, PlaceholderEntry)>,
    index: HashMap<String, usize>,
}

impl PlaceholderMap {
    pub fn placeholder_id(n: usize) -> String {
        format!("__DOCX_IMG_{n}__")
    }

    fn push(&mut self, source: String, quote: char) -> String {
        let id = Self::placeholder_id(self.entries.len());
        self.index.insert(id.clone(), self.entries.len());
        self.entries.push((id.clone(), PlaceholderEntry { source, quote }));
        id
    }

    pub fn get(&self, id: &str) -> Option<&PlaceholderEntry> {
        self.index.get(id).map(|&i| &self.entries[i].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PlaceholderEntry)> {
        self.entries.iter().map(|(id, entry)| (id.as_str(), entry))
    }
}

/// Swap every embedded or remote `<img>` source for [`PLACEHOLDER_GIF`],
/// stamping the element with a sequential placeholder id.
pub fn extract_and_replace_with_placeholders(html: &str) -> (String, PlaceholderMap) {
    let img_tag = static_regex!(IMG_TAG, r#"(?is)<img\s[^>]*>"#);
    let src_attr = static_regex!(
        SRC_ATTR,
        r#"(?i)(\s)(src)\s*=\s*(?:"((?:data:|https?://)[^"]*)"|'((?:data:|https?://)[^']*)')"#
    );

    let mut map = PlaceholderMap::default();
    let out = img_tag.replace_all(html, |tag: &regex::Captures| {
        let tag = &tag[0];
        let Some(caps) = src_attr.captures(tag) else {
            return tag.to_string();
        };
        let (source, quote) = match (caps.get(3), caps.get(4)) {
            (Some(m), _) => (m.as_str(), '"'),
            (None, Some(m)) => (m.as_str(), '\''),
            (None, None) => return tag.to_string(),
        };
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        let id = map.push(source.to_string(), quote);
        format!(
            "{}{}{PLACEHOLDER_ID_ATTR}=\"{}\" {}={quote}{PLACEHOLDER_GIF}{quote}{}",
            &tag[..whole.start],
            &caps[1],
            id,
            &caps[2],
            &tag[whole.end..],
        )
    });

    info!("Protected {} images with placeholders", map.len());
    (out.into_owned(), map)
}

/// Undo [`extract_and_replace_with_placeholders`], restoring each source and
/// removing the id attribute. Exact on text that was not rewritten in
/// between; otherwise the sources are restored wherever the ids ended up.
pub fn restore_placeholders(html: &str, map: &PlaceholderMap) -> String {
    let img_tag = static_regex!(RESTORE_IMG_TAG, r#"(?is)<img\s[^>]*>"#);
    let id_attr = static_regex!(ID_ATTR, r#"data-docx-id="([^"]*)""#);

    let out = img_tag.replace_all(html, |tag: &regex::Captures| {
        let tag = &tag[0];
        let Some(caps) = id_attr.captures(tag) else {
            return tag.to_string();
        };
        let id = &caps[1];
        let Some(entry) = map.get(id) else {
            return strip_id_attr(tag, id);
        };

        let q = entry.quote;
        let mut restored = tag.to_string();
        let placeholder_forms = [
            format!("=\"{PLACEHOLDER_GIF}\""),
            format!("='{PLACEHOLDER_GIF}'"),
        ];
        match placeholder_forms.iter().find_map(|form| restored.find(form.as_str()).map(|at| (at, form.len()))) {
            Some((at, len)) => {
                restored.replace_range(at..at + len, &format!("={q}{}{q}", entry.source));
            }
            None => {
                let insert_at = restored.len() - if restored.ends_with("/>") { 2 } else { 1 };
                restored.insert_str(insert_at, &format!(" src={q}{}{q}", entry.source));
            }
        }
        strip_id_attr(&restored, id)
    });
    out.into_owned()
}

fn strip_id_attr(tag: &str, id: &str) -> String {
    let attr = format!("{PLACEHOLDER_ID_ATTR}=\"{id}\"");
    let Some(at) = tag.find(&attr) else {
        return tag.to_string();
    };
    let end = at + attr.len();
    // Inserted form: `<ws>data-docx-id="ID" src=`; drop the attr and its trailing space.
    if tag[end..].starts_with(' ') {
        let mut out = tag.to_string();
        out.replace_range(at..end + 1, "");
        return out;
    }
    let start = tag[..at].trim_end().len();
    let mut out = tag.to_string();
    out.replace_range(start..end, "");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::MapFetcher;

    const PNG_1X1: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, 0x49, 0x48, 0x44, 0x52,
    ];

    #[test]
    fn test_data_uri_round_trip() {
        let uri = encode_data_uri("image/png", b"abc");
        assert_eq!(uri, "data:image/png;base64,YWJj");
        assert_eq!(
            decode_data_uri(&uri),
            Some(("image/png".to_string(), b"abc".to_vec()))
        );
        assert_eq!(decode_data_uri("https://x/a.png"), None);
    }

    #[test]
    fn test_collect_remote_image_urls() {
        let html = r#"<img src="https://a.example/1.png"><div style="background-image: url('https://a.example/2.jpg')"></div>
<img src="data:image/png;base64,AAAA"><style>@font-face { src: url(https://f.example/x.woff2) }</style>"#;
        let urls: Vec<_> = collect_remote_image_urls(html).into_iter().collect();
        assert_eq!(urls, vec!["https://a.example/1.png", "https://a.example/2.jpg"]);
    }

    #[tokio::test]
    async fn test_fetch_as_data_uri_sniffs_mime() {
        let fetcher = MapFetcher::default().with(
            "https://a.example/1",
            "application/octet-stream",
            PNG_1X1.to_vec(),
        );
        let uri = fetch_as_data_uri(&fetcher, "https://a.example/1", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
        assert!(fetch_as_data_uri(&fetcher, "https://a.example/missing", Duration::from_secs(1))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_inline_remote_images_keeps_failures() {
        let fetcher = MapFetcher::default().with("https://a.example/ok.png", "image/png", b"ok".to_vec());
        let html = r#"<img src="https://a.example/ok.png"><img src="https://a.example/gone.png">"#;
        let out = inline_remote_images(html, &fetcher, Duration::from_secs(1), 4).await;
        assert!(out.contains("data:image/png;base64,b2s="));
        assert!(out.contains("https://a.example/gone.png"));
        assert!(!out.contains("ok.png"));
    }

    #[tokio::test]
    async fn test_inline_remote_images_leaves_text_and_links() {
        let fetcher = MapFetcher::default().with("https://a.example/ok.png", "image/png", b"ok".to_vec());
        let html = r#"<a href="https://a.example/ok.png">https://a.example/ok.png</a><img src="https://a.example/ok.png"><div style="background: url(https://a.example/ok.png)"></div>"#;
        let out = inline_remote_images(html, &fetcher, Duration::from_secs(1), 4).await;
        assert!(out.starts_with(
            r#"<a href="https://a.example/ok.png">https://a.example/ok.png</a><img src="data:image/png;base64,b2s=">"#
        ));
        assert!(out.contains("url(data:image/png;base64,b2s=)"));
    }

    #[test]
    fn test_convert_background_images() {
        let html = r#"<div style="color: red; background-image: url('data:image/png;base64,AAAA'); background-size: cover; background-repeat: no-repeat"><p>x</p></div>"#;
        let out = convert_background_images_to_img_tags(html);
        let doc = dom::parse_document(&out);
        let div = dom::select_first(&doc, "div").unwrap();
        assert_eq!(dom::get_attr(&div, "style").as_deref(), Some("color: red"));
        let first = dom::element_children(&div).remove(0);
        assert_eq!(dom::tag_name(&first).as_deref(), Some("img"));
        assert_eq!(
            dom::get_attr(&first, "src").as_deref(),
            Some("data:image/png;base64,AAAA")
        );
        assert_eq!(
            dom::get_attr(&first, "style").as_deref(),
            Some(BACKGROUND_IMG_STYLE)
        );
    }

    #[test]
    fn test_convert_background_ignores_gradients() {
        let html = r#"<div style="background-image: linear-gradient(red, blue)">x</div>"#;
        let out = convert_background_images_to_img_tags(html);
        assert!(!out.contains("<img"));
        assert!(out.contains("linear-gradient"));
    }

    #[test]
    fn test_placeholders_replace_sources() {
        let html = r#"<p><img src="data:image/png;base64,AAAA" alt="a"><img class="x" src='https://a.example/1.png'><img src="/local.png"></p>"#;
        let (out, map) = extract_and_replace_with_placeholders(html);
        assert_eq!(map.len(), 2);
        assert!(!out.contains("base64,AAAA\""));
        assert!(!out.contains("a.example"));
        assert!(out.contains(r#"data-docx-id="__DOCX_IMG_0__" src="data:image/gif"#));
        assert!(out.contains(r#"data-docx-id="__DOCX_IMG_1__" src='data:image/gif"#));
        assert!(out.contains(r#"src="/local.png""#));
        assert_eq!(map.get("__DOCX_IMG_1__").unwrap().quote, '\'');
    }

    #[test]
    fn test_placeholders_accept_spaced_src() {
        let html = r#"<p><img src = "data:image/png;base64,AAAA"><img alt="b" SRC= 'https://a.example/1.png'></p>"#;
        let (out, map) = extract_and_replace_with_placeholders(html);
        assert_eq!(map.len(), 2);
        assert!(!out.contains("base64,AAAA"));
        assert!(!out.contains("a.example"));

        let restored = restore_placeholders(&out, &map);
        assert!(restored.contains(r#"<img src="data:image/png;base64,AAAA">"#));
        assert!(restored.contains(r#"SRC='https://a.example/1.png'"#));
        assert!(!restored.contains(PLACEHOLDER_ID_ATTR));
    }

    #[test]
    fn test_placeholder_round_trip_is_exact() {
        let html = "<div><img src=\"data:image/png;base64,AAAA\"><span>t</span>\n<img\n  alt='x' src='https://a.example/p.png' /><img SRC=\"https://b.example/q.gif\"></div>";
        let (out, map) = extract_and_replace_with_placeholders(html);
        assert_eq!(map.len(), 3);
        assert_eq!(restore_placeholders(&out, &map), html);
    }

    #[test]
    fn test_restore_after_dom_rewrite() {
        let html = r#"<div><img src="data:image/png;base64,AAAA" alt="a"><img src="https://a.example/1.png"></div>"#;
        let (out, map) = extract_and_replace_with_placeholders(html);
        // Reserialization reorders attributes and normalizes quotes.
        let doc = dom::parse_document(&out);
        for img in dom::select_all(&doc, "img") {
            dom::set_attr(&img, "style", "max-width: 100%; height: auto");
        }
        let rewritten = dom::serialize(&doc);
        let restored = restore_placeholders(&rewritten, &map);
        assert!(restored.contains(r#"src="data:image/png;base64,AAAA""#));
        assert!(restored.contains(r#"src="https://a.example/1.png""#));
        assert!(!restored.contains(PLACEHOLDER_ID_ATTR));
        assert!(!restored.contains("R0lGOD"));
    }
}
