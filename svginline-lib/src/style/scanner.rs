//! Collects the CSS an element needs from the page's stylesheets.

use crate::dom::dom_tree::{descendants, parent, NodeRef};
use crate::error::STYLESHEET_FAILURES;
use crate::fonts::{FontDescriptor, FontResolver};
use crate::style::css_matcher::{matches_selector_list, parse_selector_list};
use crate::style::sheets::{RuleRecord, StylesheetRecord};
use log::debug;
use std::fmt;
use url::Url;

pub type SelectorRemap = Box<dyn Fn(&str) -> String>;
pub type ModifyStyle = Box<dyn Fn(&str) -> String>;
pub type ModifyCss = Box<dyn Fn(&str, &str) -> String>;

/// How matched rules are rendered and which fonts are embedded.
#[derive(Default)]
pub struct CssOptions {
    /// Rewrites the selector of each matched rule.
    pub selector_remap: Option<SelectorRemap>,
    /// Rewrites the declarations of each matched rule. They arrive re-serialized by lightningcss,
    /// with `!important` declarations after the others.
    pub modify_style: Option<ModifyStyle>,
    /// Renders a matched rule from `(selector, declarations)`, replacing the default template.
    /// The declarations are normalized as for `modify_style`.
    pub modify_css: Option<ModifyCss>,
    /// Fonts to embed. When set, `@font-face` rules are not inspected for fonts.
    pub fonts: Option<Vec<FontDescriptor>>,
    /// Drop rules that match nothing instead of copying them verbatim.
    pub exclude_unused_css: bool,
}

impl CssOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_selector_remap(mut self, remap: impl Fn(&str) -> String + 'static) -> Self {
        self.selector_remap = Some(Box::new(remap));
        self
    }

    pub fn with_modify_style(mut self, modify: impl Fn(&str) -> String + 'static) -> Self {
        self.modify_style = Some(Box::new(modify));
        self
    }

    pub fn with_modify_css(mut self, modify: impl Fn(&str, &str) -> String + 'static) -> Self {
        self.modify_css = Some(Box::new(modify));
        self
    }

    pub fn with_fonts(mut self, fonts: Vec<FontDescriptor>) -> Self {
        self.fonts = Some(fonts);
        self
    }

    pub fn with_exclude_unused_css(mut self, exclude: bool) -> Self {
        self.exclude_unused_css = exclude;
        self
    }

    fn generate_css(&self, selector: &str, properties: &str) -> String {
        if let Some(modify_css) = &self.modify_css {
            return modify_css(selector, properties);
        }
        let sel = match &self.selector_remap {
            Some(remap) => remap(selector),
            None => selector.to_string(),
        };
        let props = match &self.modify_style {
            Some(modify) => modify(properties),
            None => properties.to_string(),
        };
        format!("{}{{{}}}\n", sel, props)
    }
}

impl fmt::Debug for CssOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CssOptions")
            .field("selector_remap", &self.selector_remap.is_some())
            .field("modify_style", &self.modify_style.is_some())
            .field("modify_css", &self.modify_css.is_some())
            .field("fonts", &self.fonts)
            .field("exclude_unused_css", &self.exclude_unused_css)
            .finish()
    }
}

/// Whether `selector` matches something below `el`, or failing that something below its parent
/// (which includes `el` and its siblings).
///
/// `None` for invalid selector syntax, after a warning.
pub fn query(el: &NodeRef, selector: &str) -> Option<bool> {
    if selector.trim().is_empty() {
        return Some(false);
    }
    let list = STYLESHEET_FAILURES.tolerate(
        format!("Invalid CSS selector \"{}\"", selector),
        parse_selector_list(selector),
    )?;
    let below = |root: &NodeRef| {
        descendants(root)
            .iter()
            .any(|node| matches_selector_list(node, &list))
    };
    Some(below(el) || parent(el).map_or(false, |p| below(&p)))
}

/// Builds the CSS for `el`: every matching style rule rendered through `options`, unmatched rules
/// copied verbatim (unless excluded), then the embedded fonts.
///
/// `document_url` stands in for the location of sheets without an `href`.
pub async fn inline_css(
    el: &NodeRef,
    options: &CssOptions,
    sheets: &[StylesheetRecord],
    document_url: Option<&Url>,
    fonts: &FontResolver<'_>,
) -> String {
    let detect_fonts = options.fonts.is_none();
    let mut font_list = options.fonts.clone().unwrap_or_default();
    let mut css = Vec::new();

    for sheet in sheets {
        let rules = match &sheet.rules {
            Some(rules) => rules,
            None => continue,
        };
        let location = sheet
            .href
            .clone()
            .or_else(|| document_url.map(|url| url.to_string()));
        for rule in rules {
            match rule {
                RuleRecord::Style {
                    selector_text,
                    style_text,
                    css_text,
                    ..
                } => {
                    if style_text.trim().is_empty() {
                        continue;
                    }
                    match query(el, selector_text) {
                        Some(true) => css.push(options.generate_css(selector_text, style_text)),
                        Some(false) if !options.exclude_unused_css => css.push(css_text.clone()),
                        _ => {}
                    }
                }
                RuleRecord::FontFace { css_text } if detect_fonts => {
                    if let Some(font) = FontDescriptor::detect(css_text, location.as_deref()) {
                        font_list.push(font);
                    }
                }
                other => {
                    if !options.exclude_unused_css {
                        css.push(other.css_text().to_string());
                    }
                }
            }
        }
    }

    debug!(
        "generated {} CSS rules, {} fonts to embed",
        css.len(),
        font_list.len()
    );
    let font_css = fonts.inline_fonts(&font_list).await;
    css.join("\n") + &font_css
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::dom_tree::{descendants_by_tag, Document};
    use crate::fetch::MemoryFetcher;
    use crate::fonts::FontCache;
    use crate::parser::html::create_dom_tree;
    use crate::style::sheets::parse_rules;
    use futures::executor::block_on;
    use pretty_assertions::assert_eq;

    fn chart() -> Document {
        create_dom_tree(
            r#"<div><svg class="chart"><g class="axis"><text>1</text></g></svg><p class="note">x</p></div>"#,
        )
    }

    fn sheet(href: Option<&str>, css: &str) -> StylesheetRecord {
        StylesheetRecord {
            href: href.map(str::to_string),
            rules: Some(parse_rules(css).unwrap()),
        }
    }

    fn scan(options: &CssOptions, sheets: &[StylesheetRecord], fetcher: &MemoryFetcher) -> String {
        let doc = chart();
        let svg = descendants_by_tag(&doc.root, "svg").remove(0);
        let cache = FontCache::new();
        let resolver = FontResolver::new(&cache, fetcher);
        block_on(inline_css(&svg, options, sheets, None, &resolver))
    }

    #[test]
    fn query_checks_descendants_then_parent() {
        let doc = chart();
        let svg = descendants_by_tag(&doc.root, "svg").remove(0);
        assert_eq!(query(&svg, ".axis text"), Some(true));
        assert_eq!(query(&svg, "svg.chart"), Some(true));
        assert_eq!(query(&svg, "p.note"), Some(true));
        assert_eq!(query(&svg, "circle"), Some(false));
        assert_eq!(query(&svg, "text:bogus"), Some(false));
        assert_eq!(query(&svg, "text >"), None);
    }

    #[test]
    fn has_rules_are_matched_and_unknown_pseudo_classes_copied() {
        let sheets = [sheet(
            None,
            "g:has(text) { stroke: red } p:has(span) { fill: blue } text:frobnicate { fill: red } text { fill: green }",
        )];
        let fetcher = MemoryFetcher::new();
        let css = scan(&CssOptions::new(), &sheets, &fetcher);
        assert!(css.starts_with("g:has(text){stroke: red;}\n"));
        assert!(css.contains("p:has(span)"));
        assert!(css.contains("text{fill: green;}"));

        let excluded = scan(&CssOptions::new().with_exclude_unused_css(true), &sheets, &fetcher);
        assert_eq!(excluded, "g:has(text){stroke: red;}\n\ntext{fill: green;}\n");
    }

    #[test]
    fn matched_rules_are_rendered_and_unmatched_copied() {
        let sheets = [sheet(
            None,
            ".axis text { fill: red } circle { fill: blue } .empty { } @keyframes spin { to { opacity: 0 } }",
        )];
        let fetcher = MemoryFetcher::new();
        let css = scan(&CssOptions::new(), &sheets, &fetcher);
        let parts: Vec<&str> = css.split('\n').collect();
        assert_eq!(parts[0], ".axis text{fill: red;}");
        assert!(css.contains("circle {"));
        assert!(css.contains("@keyframes spin"));
        assert!(!css.contains(".empty"));

        let excluded = scan(&CssOptions::new().with_exclude_unused_css(true), &sheets, &fetcher);
        assert_eq!(excluded, ".axis text{fill: red;}\n");
    }

    #[test]
    fn custom_renderers_apply_to_matched_rules() {
        let sheets = [sheet(None, ".axis text { fill: red }")];
        let fetcher = MemoryFetcher::new();
        let remapped = CssOptions::new()
            .with_selector_remap(|s| format!("#copy {}", s))
            .with_modify_style(|p| p.replace("red", "green"));
        assert_eq!(
            scan(&remapped, &sheets, &fetcher),
            "#copy .axis text{fill: green;}\n"
        );
        let custom = CssOptions::new().with_modify_css(|s, p| format!("{} => {}", s, p));
        assert_eq!(scan(&custom, &sheets, &fetcher), ".axis text => fill: red;");
    }

    #[test]
    fn font_faces_are_detected_and_embedded_after_the_rules() {
        let sheets = [sheet(
            Some("https://x/css"),
            ".axis text { font-family: B } @font-face { font-family: B; src: url(./fonts/b.ttf) }",
        )];
        let fetcher = MemoryFetcher::new().with_resource("https://x/css/../fonts/b.ttf", *b"ttf", None);
        let css = scan(&CssOptions::new(), &sheets, &fetcher);
        assert!(css.starts_with(".axis text{font-family: B;}\n"));
        assert!(css.contains("url(\"data:application/x-font-ttf;base64,dHRm\")"));
        assert!(css.ends_with("}\n"));
        assert_eq!(fetcher.requests(), vec!["https://x/css/../fonts/b.ttf"]);
    }

    #[test]
    fn supplied_fonts_replace_detection() {
        let sheets = [sheet(Some("https://x/css"), "@font-face { font-family: B; src: url(b.woff) }")];
        let fetcher = MemoryFetcher::new();
        let options = CssOptions::new().with_fonts(Vec::new());
        let css = scan(&options, &sheets, &fetcher);
        assert!(css.starts_with("@font-face"));
        assert!(fetcher.requests().is_empty());
    }
}
