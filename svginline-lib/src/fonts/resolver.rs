use super::{font_url_regex, FontCache, FontDescriptor};
use crate::encoding::array_buffer_to_base64;
use crate::error::FONT_FAILURES;
use crate::fetch::{FetchError, ResourceFetcher};
use futures::future::{join_all, FutureExt, LocalBoxFuture, Shared};
use log::debug;
use regex::NoExpand;
use std::collections::HashMap;
use std::rc::Rc;

type SharedFetch = Shared<LocalBoxFuture<'static, Option<Rc<Vec<u8>>>>>;

/// Turns font descriptors into `@font-face` CSS with the binaries embedded as data URIs.
pub struct FontResolver<'a> {
    cache: &'a FontCache,
    fetcher: &'a dyn ResourceFetcher,
}

impl<'a> FontResolver<'a> {
    pub fn new(cache: &'a FontCache, fetcher: &'a dyn ResourceFetcher) -> Self {
        FontResolver { cache, fetcher }
    }

    /// Resolves every descriptor and concatenates the results in descriptor order.
    ///
    /// Cached URLs are answered without a fetch. All other fetches start together, and
    /// descriptors sharing a URL share one fetch. A font that fails or is aborted is logged,
    /// remembered as failed, and left out.
    pub async fn inline_fonts(&self, fonts: &[FontDescriptor]) -> String {
        let mut in_flight: HashMap<&str, SharedFetch> = HashMap::new();
        let tasks = fonts
            .iter()
            .map(|font| {
                let cached = self.cache.lookup(&font.url);
                let pending = match cached {
                    Some(_) => None,
                    None => Some(
                        in_flight
                            .entry(font.url.as_str())
                            .or_insert_with(|| self.fetch_font(&font.url))
                            .clone(),
                    ),
                };
                let cache = self.cache;
                async move {
                    if let Some(entry) = cached {
                        return entry;
                    }
                    let bytes = match pending {
                        Some(pending) => pending.await,
                        None => None,
                    };
                    let css = bytes.map(|bytes| embed_font(font, &bytes));
                    cache.store(&font.url, css.clone());
                    css
                }
            })
            .collect::<Vec<_>>();
        debug!(
            "resolving {} fonts with {} fetches",
            fonts.len(),
            in_flight.len()
        );
        join_all(tasks).await.into_iter().flatten().collect()
    }

    fn fetch_font(&self, url: &str) -> SharedFetch {
        let pending = self.fetcher.fetch(url);
        let url = url.to_string();
        async move {
            let result = pending.await;
            let context = match &result {
                Err(FetchError::Aborted(_)) => format!("Aborted loading font from: {}", url),
                _ => format!("Failed to load font from: {}", url),
            };
            FONT_FAILURES
                .tolerate(context, result)
                .map(|resource| Rc::new(resource.bytes))
        }
        .boxed_local()
        .shared()
    }
}

/// The descriptor's rule with its first `url(...)` replaced by a data URI, plus a newline.
fn embed_font(font: &FontDescriptor, bytes: &[u8]) -> String {
    let data_url = format!(
        "url(\"data:{};base64,{}\")",
        font.format,
        array_buffer_to_base64(bytes)
    );
    let rewritten = font_url_regex().replacen(&font.text, 1, NoExpand(&data_url));
    format!("{}\n", rewritten)
}
