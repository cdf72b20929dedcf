//! Replaces `<image>` references in a detached copy with embedded PNG data.

use crate::canvas::Canvas;
use crate::dom::dom_tree::{descendants_by_tag, get_attribute, set_attribute, NodeRef};
use crate::error::{Error, Result, IMAGE_FAILURES};
use crate::fetch::ResourceFetcher;
use futures::future::try_join_all;
use log::debug;
use url::Url;

/// Fetches every `<image>` below `copy`, redraws it at its natural size and writes the PNG data
/// URI back into `xlink:href` (and `href` when the element uses it).
///
/// Images load concurrently. The first one that cannot be loaded or decoded fails the whole call,
/// and elements processed so far keep their new value.
pub async fn inline_images(
    copy: &NodeRef,
    page_url: Option<&Url>,
    fetcher: &dyn ResourceFetcher,
) -> Result<()> {
    let images = descendants_by_tag(copy, "image");
    debug!("inlining {} images", images.len());
    let tasks = images.iter().map(|image| inline_image(image, page_url, fetcher));
    try_join_all(tasks).await?;
    Ok(())
}

async fn inline_image(
    image: &NodeRef,
    page_url: Option<&Url>,
    fetcher: &dyn ResourceFetcher,
) -> Result<()> {
    let href = match image_href(image) {
        Some(href) => href,
        None => return Ok(()),
    };
    let mut url = resolve(&href, page_url);
    if is_external(&url, page_url) {
        let separator = if url.contains('?') { '&' } else { '?' };
        url = format!("{}{}t={}", url, separator, chrono::Utc::now().timestamp_millis());
    }

    let loaded = load_as_png(&url, fetcher).await;
    if let Some(data_url) = IMAGE_FAILURES.handle(format!("Could not inline {}", url), loaded)? {
        set_attribute(image, "xlink:href", data_url.as_str());
        if get_attribute(image, "href").is_some() {
            set_attribute(image, "href", data_url);
        }
    }
    Ok(())
}

async fn load_as_png(url: &str, fetcher: &dyn ResourceFetcher) -> Result<String> {
    let resource = fetcher.fetch(url).await.map_err(|source| Error::ImageLoad {
        url: url.to_string(),
        source,
    })?;
    draw(url, &resource.bytes)?.to_data_url()
}

fn image_href(image: &NodeRef) -> Option<String> {
    ["xlink:href", "href"]
        .iter()
        .filter_map(|name| get_attribute(image, name))
        .find(|href| !href.is_empty())
}

fn resolve(href: &str, page_url: Option<&Url>) -> String {
    match page_url.and_then(|base| base.join(href).ok()) {
        Some(url) => url.to_string(),
        None => href.to_string(),
    }
}

/// An `http(s)` address that does not mention the page's host.
fn is_external(url: &str, page_url: Option<&Url>) -> bool {
    let host = match page_url.and_then(|page| {
        let host = page.host_str()?;
        Some(match page.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }) {
        Some(host) => host,
        None => return false,
    };
    url.starts_with("http") && !url.contains(&host)
}

/// Decodes raster formats with `image`; anything it does not recognise is tried as SVG.
fn draw(url: &str, bytes: &[u8]) -> Result<Canvas> {
    let decode_error = |reason: String| Error::ImageDecode {
        url: url.to_string(),
        reason,
    };
    if image::guess_format(bytes).is_ok() {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| decode_error(e.to_string()))?
            .to_rgba8();
        let mut canvas = Canvas::new(decoded.width(), decoded.height())?;
        canvas.draw_image(&decoded)?;
        return Ok(canvas);
    }
    let tree = usvg::Tree::from_data(bytes, &usvg::Options::default())
        .map_err(|e| decode_error(e.to_string()))?;
    let size = tree.size();
    let mut canvas = Canvas::new(size.width().ceil() as u32, size.height().ceil() as u32)?;
    canvas.draw_svg(&tree);
    Ok(canvas)
}
