//! Remote resource fetching for stylesheets, fonts and images.

use crate::error::{ExportError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// A fetched resource body and its declared content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    pub url: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FetchedResource {
    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Media type without parameters, e.g. `image/png`.
    pub fn mime(&self) -> Option<&str> {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
    }
}

/// Fetches remote resources by URL.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedResource>> + Send;
}

/// Whether a URL is one the fetcher is willing to request.
pub fn is_remote_url(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// [`Fetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gdoc-fixer/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ExportError::Http {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResource> {
        let http_error = |message: String| ExportError::Http {
            url: url.to_string(),
            message,
        };

        if !is_remote_url(url) {
            return Err(http_error("blocked: unsupported scheme".to_string()));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| http_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(http_error(format!("status {}", status.as_u16())));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| http_error(e.to_string()))?
            .to_vec();

        debug!("Fetched {} ({} bytes)", url, bytes.len());
        Ok(FetchedResource {
            url: url.to_string(),
            content_type,
            bytes,
        })
    }
}

/// Run a fetch with an upper time bound.
pub async fn fetch_with_timeout<F: Fetcher>(
    fetcher: &F,
    url: &str,
    timeout: Duration,
) -> Result<FetchedResource> {
    match tokio::time::timeout(timeout, fetcher.fetch(url)).await {
        Ok(result) => result,
        Err(_) => Err(ExportError::Http {
            url: url.to_string(),
            message: format!("timed out after {:?}", timeout),
        }),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory fetcher keyed by exact URL.
    #[derive(Default)]
    pub struct MapFetcher {
        pub resources: HashMap<String, (Option<String>, Vec<u8>)>,
        pub requested: Mutex<Vec<String>>,
    }

    impl MapFetcher {
        pub fn with(mut self, url: &str, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
            self.resources
                .insert(url.to_string(), (Some(content_type.to_string()), body.into()));
            self
        }

        pub fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    impl Fetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedResource> {
            self.requested.lock().unwrap().push(url.to_string());
            match self.resources.get(url) {
                Some((content_type, bytes)) => Ok(FetchedResource {
                    url: url.to_string(),
                    content_type: content_type.clone(),
                    bytes: bytes.clone(),
                }),
                None => Err(ExportError::Http {
                    url: url.to_string(),
                    message: "status 404".to_string(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MapFetcher;
    use super::*;

    #[test]
    fn test_is_remote_url() {
        assert!(is_remote_url("https://a.example/x.png"));
        assert!(is_remote_url("HTTP://a.example"));
        assert!(!is_remote_url("data:image/png;base64,AAAA"));
        assert!(!is_remote_url("file:///etc/passwd"));
        assert!(!is_remote_url("/relative.png"));
    }

    #[test]
    fn test_mime_strips_parameters() {
        let res = FetchedResource {
            url: "u".to_string(),
            content_type: Some("text/css; charset=utf-8".to_string()),
            bytes: b"p{}".to_vec(),
        };
        assert_eq!(res.mime(), Some("text/css"));
        assert_eq!(res.text(), "p{}");
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_non_http() {
        let fetcher = HttpFetcher::new(Duration::from_secs(1)).unwrap();
        let err = fetcher.fetch("file:///etc/hosts").await.unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[tokio::test]
    async fn test_map_fetcher() {
        let fetcher = MapFetcher::default().with("https://x/a.css", "text/css", "p{}");
        assert!(fetch_with_timeout(&fetcher, "https://x/a.css", Duration::from_secs(1))
            .await
            .is_ok());
        assert!(fetcher.fetch("https://x/missing").await.is_err());
        assert_eq!(fetcher.requested().len(), 2);
    }
}
