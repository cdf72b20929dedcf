//! Resource fetching.
//!
//! Everything the pipeline downloads (linked stylesheets, font binaries, images) goes through
//! [`ResourceFetcher`]. Fetches are futures so many can be in flight at once while the pipeline
//! itself stays on one thread.

use crate::encoding::data_uri_to_binary;
use futures::channel::oneshot;
use futures::future::{self, FutureExt, LocalBoxFuture};
use log::debug;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const DEFAULT_USER_AGENT: &str = concat!("svginline/", env!("CARGO_PKG_VERSION"));

/// Bytes returned by a fetch, with the content type when the source reported one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl FetchedResource {
    pub fn new(bytes: Vec<u8>, content_type: Option<String>) -> Self {
        Self {
            bytes,
            content_type,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {reason}")]
    Http { url: String, reason: String },
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("failed to read {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("request for {0} was aborted")]
    Aborted(String),
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid data URL {url}: {reason}")]
    DataUrl { url: String, reason: String },
}

pub type FetchResult = Result<FetchedResource, FetchError>;
pub type FetchFuture = LocalBoxFuture<'static, FetchResult>;

/// Source of external bytes. Implementations must not block the calling thread for network I/O;
/// return a future that completes when the body is available.
pub trait ResourceFetcher {
    /// Fetch an absolute `http(s)://`, `file://` or `data:` URL.
    fn fetch(&self, url: &str) -> FetchFuture;
}

impl<T: ResourceFetcher + ?Sized> ResourceFetcher for Rc<T> {
    fn fetch(&self, url: &str) -> FetchFuture {
        (**self).fetch(url)
    }
}

impl<T: ResourceFetcher + ?Sized> ResourceFetcher for Arc<T> {
    fn fetch(&self, url: &str) -> FetchFuture {
        (**self).fetch(url)
    }
}

fn fetch_data(url: &str) -> FetchResult {
    data_uri_to_binary(url)
        .map(|blob| FetchedResource::new(blob.data, Some(blob.content_type)))
        .map_err(|e| FetchError::DataUrl {
            url: url.chars().take(64).collect(),
            reason: e.to_string(),
        })
}

fn fetch_file(url: &str) -> FetchResult {
    let path = Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.to_file_path().ok())
        .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;
    let bytes = std::fs::read(&path).map_err(|source| FetchError::Io {
        url: url.to_string(),
        source,
    })?;
    Ok(FetchedResource::new(bytes, None))
}

/// Default fetcher: HTTP(S) through ureq, plus `file://` and `data:` URLs.
///
/// ureq is blocking, so each HTTP request runs on its own thread and reports back through a
/// oneshot channel. The returned future never blocks.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout: Duration,
    user_agent: String,
    max_size: usize,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport timeout for a single request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Maximum response body size in bytes.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    fn fetch_http_blocking(&self, url: &str) -> FetchResult {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build();
        let agent: ureq::Agent = config.into();

        let mut response = agent
            .get(url)
            .header("User-Agent", &self.user_agent)
            .call()
            .map_err(|e| match e {
                ureq::Error::StatusCode(status) => FetchError::Status {
                    url: url.to_string(),
                    status,
                },
                other => FetchError::Http {
                    url: url.to_string(),
                    reason: other.to_string(),
                },
            })?;

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response
            .body_mut()
            .with_config()
            .limit(self.max_size as u64)
            .read_to_vec()
            .map_err(|e| FetchError::Http {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(FetchedResource::new(bytes, content_type))
    }

    fn fetch_http(&self, url: &str) -> FetchFuture {
        let (tx, rx) = oneshot::channel();
        let fetcher = self.clone();
        let request_url = url.to_string();
        let spawned = std::thread::Builder::new()
            .name("svginline-fetch".into())
            .spawn(move || {
                // The receiver may be gone if the conversion was dropped.
                let _ = tx.send(fetcher.fetch_http_blocking(&request_url));
            });
        if let Err(err) = spawned {
            return future::ready(Err(FetchError::Http {
                url: url.to_string(),
                reason: err.to_string(),
            }))
            .boxed_local();
        }
        let url = url.to_string();
        async move { rx.await.unwrap_or(Err(FetchError::Aborted(url))) }.boxed_local()
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_size: 50 * 1024 * 1024,
        }
    }
}

impl ResourceFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> FetchFuture {
        debug!("fetching {}", url.chars().take(96).collect::<String>());
        if url.starts_with("data:") {
            future::ready(fetch_data(url)).boxed_local()
        } else if url.starts_with("file:") {
            future::ready(fetch_file(url)).boxed_local()
        } else if url.starts_with("http://") || url.starts_with("https://") {
            self.fetch_http(url)
        } else {
            future::ready(Err(FetchError::UnsupportedScheme(url.to_string()))).boxed_local()
        }
    }
}

/// Serves resources from memory and records every request.
///
/// Useful offline and in tests. A lookup that misses is retried without the query string, so
/// cache-busting parameters do not get in the way. `data:` URLs are decoded directly.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    resources: HashMap<String, FetchedResource>,
    requests: RefCell<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(
        mut self,
        url: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
        content_type: Option<&str>,
    ) -> Self {
        self.resources.insert(
            url.into(),
            FetchedResource::new(bytes.into(), content_type.map(str::to_string)),
        );
        self
    }

    /// Every URL requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.borrow().iter().filter(|r| *r == url).count()
    }

    fn lookup(&self, url: &str) -> Option<&FetchedResource> {
        self.resources.get(url).or_else(|| {
            let (without_query, _) = url.split_once('?')?;
            self.resources.get(without_query)
        })
    }
}

impl ResourceFetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> FetchFuture {
        self.requests.borrow_mut().push(url.to_string());
        let result = if url.starts_with("data:") {
            fetch_data(url)
        } else {
            self.lookup(url).cloned().ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
        };
        future::ready(result).boxed_local()
    }
}
