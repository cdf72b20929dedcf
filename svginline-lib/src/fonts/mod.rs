//! `@font-face` discovery and embedding.

pub mod cache;
pub mod formats;
pub mod resolver;

pub use cache::FontCache;
pub use formats::{font_mime_type_from_url, FONT_FORMATS};
pub use resolver::FontResolver;

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// First `url(...)` reference of a rule, quotes optional.
pub(crate) fn font_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"url\(["']?(.+?)["']?\)"#).expect("font url pattern is valid"))
}

/// A font binary referenced by an `@font-face` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontDescriptor {
    /// The rule text; its first `url(...)` is replaced when the font is embedded.
    pub text: String,
    /// Content type of the binary.
    pub format: String,
    /// Absolute location of the binary.
    pub url: String,
}

impl FontDescriptor {
    pub fn new(text: impl Into<String>, format: impl Into<String>, url: impl Into<String>) -> Self {
        FontDescriptor {
            text: text.into(),
            format: format.into(),
            url: url.into(),
        }
    }

    /// Builds a descriptor from an `@font-face` rule of the stylesheet at `location`.
    ///
    /// Returns `None` when the rule has no `url(...)`, or it is empty, a data URI or
    /// `about:blank`. `../` and `./` references are appended to `location` as text rather than
    /// resolved, so `../f.woff` in `https://x/css` becomes `https://x/css/../f.woff`.
    // FIXME: `./f.woff` becomes `{location}/../f.woff`, one level above where a browser looks.
    pub fn detect(css_text: &str, location: Option<&str>) -> Option<FontDescriptor> {
        let url = font_url_regex()
            .captures(css_text)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().trim())
            .unwrap_or("");
        if url.is_empty() || url.starts_with("data:") || url == "about:blank" {
            return None;
        }
        let full_url = match location {
            Some(href) if url.starts_with("../") => format!("{}/{}", href, url),
            Some(href) if url.starts_with("./") => format!("{}/.{}", href, url),
            _ => url.to_string(),
        };
        // Anything still relative is resolved properly so the fetcher always gets an absolute URL.
        let full_url = match (Url::parse(&full_url), location) {
            (Err(_), Some(href)) => Url::parse(href)
                .and_then(|base| base.join(&full_url))
                .map(String::from)
                .unwrap_or(full_url),
            _ => full_url,
        };
        Some(FontDescriptor {
            text: css_text.to_string(),
            format: font_mime_type_from_url(&full_url).to_string(),
            url: full_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ROBOTO: &str = "@font-face { font-family: Roboto; src: url(\"../fonts/a.woff2\") format(\"woff2\"), url(../fonts/a.woff) }";

    #[test]
    fn parent_relative_urls_are_appended_to_the_sheet_location() {
        let font = FontDescriptor::detect(ROBOTO, Some("https://x/css")).unwrap();
        assert_eq!(font.url, "https://x/css/../fonts/a.woff2");
        assert_eq!(font.format, "font/woff2");
        assert_eq!(font.text, ROBOTO);
    }

    #[test]
    fn dot_relative_urls_keep_the_historic_concatenation() {
        let rule = "@font-face { src: url('./fonts/b.ttf') }";
        let font = FontDescriptor::detect(rule, Some("https://x/css")).unwrap();
        assert_eq!(font.url, "https://x/css/../fonts/b.ttf");
        assert_eq!(font.format, "application/x-font-ttf");
    }

    #[test]
    fn other_relative_urls_resolve_against_the_location() {
        let rule = "@font-face { src: url(fonts/c.otf) }";
        let font = FontDescriptor::detect(rule, Some("https://x/static/site.css")).unwrap();
        assert_eq!(font.url, "https://x/static/fonts/c.otf");
        let absolute = "@font-face { src: url(https://cdn.x/d.eot) }";
        assert_eq!(
            FontDescriptor::detect(absolute, None).unwrap().url,
            "https://cdn.x/d.eot"
        );
    }

    #[test]
    fn skips_unusable_references() {
        for rule in [
            "@font-face { font-family: Local; src: local(Arial) }",
            "@font-face { src: url(data:font/woff2;base64,AAAA) }",
            "@font-face { src: url(about:blank) }",
        ] {
            assert_eq!(FontDescriptor::detect(rule, Some("https://x/css")), None);
        }
    }
}
