//! Stylesheet enumeration.
//!
//! Collects the page's `<style>` elements and `<link rel="stylesheet">` targets in document order
//! and flattens each into [`RuleRecord`]s with lightningcss. A sheet that cannot be read (another
//! origin, a failed fetch, unparsable text) stays in the list with `rules: None`.

use crate::dom::dom_tree::{
    descendants, get_attribute, is_element, parent, parse_inline_style, tag_name, text_content,
    Document, Node, NodeRef,
};
use crate::error::STYLESHEET_FAILURES;
use crate::fetch::ResourceFetcher;
use crate::style::css_matcher::{
    compute_computed_style, matching_rules, parse_selector_list, CssRule,
};
use futures::future::join_all;
use lightningcss::printer::PrinterOptions;
use lightningcss::rules::style::StyleRule;
use lightningcss::rules::CssRule as LcssRule;
use lightningcss::stylesheet::{ParserOptions, StyleSheet as LightningStyleSheet};
use lightningcss::traits::ToCss;
use log::{debug, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use url::Url;

/// One top-level rule of a stylesheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleRecord {
    Style {
        /// e.g. `svg .axis text, .legend`
        selector_text: String,
        /// Declarations as `prop: value;` joined by spaces. Values are lightningcss's serialization
        /// (`blue` prints as `#00f`), and `!important` declarations follow the normal ones
        /// whatever their source order.
        style_text: String,
        css_text: String,
        declarations: Vec<(String, String)>,
    },
    FontFace {
        css_text: String,
    },
    /// `@media`, `@keyframes`, `@import` and everything else.
    Other {
        css_text: String,
    },
}

impl RuleRecord {
    pub fn css_text(&self) -> &str {
        match self {
            RuleRecord::Style { css_text, .. }
            | RuleRecord::FontFace { css_text }
            | RuleRecord::Other { css_text } => css_text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StylesheetRecord {
    /// Absolute location of a linked sheet; `None` for `<style>` elements.
    pub href: Option<String>,
    /// `None` when the sheet's rules are not accessible.
    pub rules: Option<Vec<RuleRecord>>,
}

/// Which linked stylesheets may be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StylesheetAccess {
    /// Only sheets with the document's scheme, host and port. A document without a URL can only
    /// use its inline `<style>` elements.
    #[default]
    SameOrigin,
    Any,
}

/// Parse CSS text into rule records. Invalid declarations and rules are dropped the way a
/// browser drops them.
pub fn parse_rules(css_text: &str) -> Result<Vec<RuleRecord>, String> {
    let parser_opts = ParserOptions {
        error_recovery: true,
        ..ParserOptions::default()
    };
    let sheet = LightningStyleSheet::parse(css_text, parser_opts).map_err(|e| e.to_string())?;
    Ok(sheet.rules.0.iter().filter_map(convert_rule).collect())
}

fn convert_rule(rule: &LcssRule<'_>) -> Option<RuleRecord> {
    if matches!(rule, LcssRule::Ignored) {
        return None;
    }
    let css_text = match rule.to_css_string(PrinterOptions::default()) {
        Ok(text) => text,
        Err(err) => {
            debug!("dropping rule that failed to print: {}", err);
            return None;
        }
    };
    Some(match rule {
        LcssRule::Style(style_rule) => convert_style_rule(style_rule, css_text),
        LcssRule::FontFace(_) => RuleRecord::FontFace { css_text },
        _ => RuleRecord::Other { css_text },
    })
}

/// Helper to copy a single StyleRule's selectors + declarations into a record.
fn convert_style_rule(style_rule: &StyleRule<'_>, css_text: String) -> RuleRecord {
    let selector_text = style_rule
        .selectors
        .0
        .iter()
        .filter_map(|selector| selector.to_css_string(PrinterOptions::default()).ok())
        .collect::<Vec<_>>()
        .join(", ");

    let block = &style_rule.declarations;
    let mut declarations = Vec::new();
    let mut parts = Vec::new();
    let tagged = block
        .declarations
        .iter()
        .map(|p| (p, false))
        .chain(block.important_declarations.iter().map(|p| (p, true)));
    for (property, important) in tagged {
        let name = property.property_id().name().to_string();
        let value = match property.value_to_css_string(PrinterOptions::default()) {
            Ok(value) => value,
            Err(_) => continue,
        };
        if important {
            parts.push(format!("{}: {} !important;", name, value));
        } else {
            parts.push(format!("{}: {};", name, value));
        }
        declarations.push((name, value));
    }

    RuleRecord::Style {
        selector_text,
        style_text: parts.join(" "),
        css_text,
        declarations,
    }
}

/// Scheme, host and port all equal.
fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

fn is_stylesheet_link(node: &NodeRef) -> bool {
    tag_name(node).as_deref() == Some("link")
        && get_attribute(node, "rel").map_or(false, |rel| {
            rel.split_whitespace()
                .any(|token| token.eq_ignore_ascii_case("stylesheet"))
        })
}

enum SheetSource {
    Inline(String),
    Linked(String),
    Unreadable(String),
}

fn collect_sources(document: &Document, access: StylesheetAccess) -> Vec<SheetSource> {
    let mut sources = Vec::new();
    for node in descendants(&document.root) {
        if tag_name(&node).as_deref() == Some("style") {
            sources.push(SheetSource::Inline(text_content(&node)));
            continue;
        }
        if !is_stylesheet_link(&node) {
            continue;
        }
        let href = match get_attribute(&node, "href") {
            Some(href) if !href.trim().is_empty() => href,
            _ => continue,
        };
        let resolved = match &document.url {
            Some(base) => base.join(href.trim()).ok(),
            None => Url::parse(href.trim()).ok(),
        };
        let source = match resolved {
            Some(url) => {
                let readable = match (access, &document.url) {
                    (StylesheetAccess::Any, _) => true,
                    (StylesheetAccess::SameOrigin, Some(base)) => same_origin(base, &url),
                    (StylesheetAccess::SameOrigin, None) => false,
                };
                if readable {
                    SheetSource::Linked(url.to_string())
                } else {
                    SheetSource::Unreadable(url.to_string())
                }
            }
            None => SheetSource::Unreadable(href),
        };
        sources.push(source);
    }
    sources
}

/// Enumerate the document's stylesheets. Linked sheets are fetched concurrently; the result keeps
/// document order.
pub async fn load_stylesheets(
    document: &Document,
    fetcher: &dyn ResourceFetcher,
    access: StylesheetAccess,
) -> Vec<StylesheetRecord> {
    let loads = collect_sources(document, access)
        .into_iter()
        .map(|source| {
            let pending = match &source {
                SheetSource::Linked(href) => Some(fetcher.fetch(href)),
                _ => None,
            };
            async move {
                match source {
                    SheetSource::Inline(css_text) => StylesheetRecord {
                        href: None,
                        rules: STYLESHEET_FAILURES
                            .tolerate("Inline stylesheet could not be parsed", parse_rules(&css_text)),
                    },
                    SheetSource::Unreadable(href) => {
                        warn!("Stylesheet could not be loaded: {}", href);
                        StylesheetRecord {
                            href: Some(href),
                            rules: None,
                        }
                    }
                    SheetSource::Linked(href) => {
                        let context = format!("Stylesheet could not be loaded: {}", href);
                        let rules = match pending {
                            Some(pending) => STYLESHEET_FAILURES
                                .tolerate(&context, pending.await)
                                .and_then(|resource| {
                                    let css_text = String::from_utf8_lossy(&resource.bytes);
                                    STYLESHEET_FAILURES.tolerate(&context, parse_rules(&css_text))
                                }),
                            None => None,
                        };
                        StylesheetRecord {
                            href: Some(href),
                            rules,
                        }
                    }
                }
            }
        })
        .collect::<Vec<_>>();
    let sheets = join_all(loads).await;
    debug!("enumerated {} stylesheets", sheets.len());
    sheets
}

/// Memo of the enumerated stylesheets.
///
/// Filled by the first conversion and reused after that, even for other documents; later changes
/// to the page's stylesheets are not seen until [`StylesheetCache::reset`].
#[derive(Debug, Default)]
pub struct StylesheetCache {
    snapshot: RefCell<Option<Rc<Vec<StylesheetRecord>>>>,
}

impl StylesheetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Rc<Vec<StylesheetRecord>>> {
        self.snapshot.borrow().clone()
    }

    pub async fn get_or_load(
        &self,
        document: &Document,
        fetcher: &dyn ResourceFetcher,
        access: StylesheetAccess,
    ) -> Rc<Vec<StylesheetRecord>> {
        if let Some(sheets) = self.get() {
            return sheets;
        }
        let sheets = Rc::new(load_stylesheets(document, fetcher, access).await);
        *self.snapshot.borrow_mut() = Some(Rc::clone(&sheets));
        sheets
    }

    pub fn reset(&self) {
        self.snapshot.borrow_mut().take();
    }
}

/// Style rules of every readable sheet as matcher rules, one per selector in a selector list.
/// Selectors the matcher does not understand are left out.
pub fn cascade_rules(sheets: &[StylesheetRecord]) -> Vec<CssRule> {
    let mut rules = Vec::new();
    let mut source_order = 0;
    let records = sheets.iter().filter_map(|sheet| sheet.rules.as_ref()).flatten();
    for record in records {
        let (selector_text, declarations) = match record {
            RuleRecord::Style {
                selector_text,
                declarations,
                ..
            } => (selector_text, declarations),
            _ => continue,
        };
        source_order += 1;
        let selectors = match parse_selector_list(selector_text) {
            Ok(selectors) => selectors,
            Err(err) => {
                debug!("{}", err);
                continue;
            }
        };
        let declarations: HashMap<String, String> = declarations.iter().cloned().collect();
        for selector in selectors {
            rules.push(CssRule {
                selector,
                declarations: declarations.clone(),
                source_order,
            });
        }
    }
    rules
}

/// Cascaded style of an element: matching rules by specificity and order, then the inline
/// `style` attribute, with inherited properties taken from the ancestors.
pub fn computed_style(node: &NodeRef, rules: &[CssRule]) -> HashMap<String, String> {
    let parent_style = parent(node)
        .filter(is_element)
        .map(|p| computed_style(&p, rules));
    let mut style = compute_computed_style(matching_rules(node, rules), parent_style.as_ref());
    if let Node::Element(elem) = &*node.borrow() {
        if let Some(inline) = elem.get_attribute("style") {
            for (name, value) in parse_inline_style(inline) {
                style.insert(name.to_ascii_lowercase(), value);
            }
        }
    }
    style
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;
    use crate::parser::html::create_dom_tree_with_url;
    use futures::executor::block_on;
    use pretty_assertions::assert_eq;

    const PAGE: &str = r#"<html><head>
        <link rel="stylesheet" href="/css/site.css">
        <link rel="alternate stylesheet" href="https://cdn.example.net/theme.css">
        <style>
          svg .bar { fill: red; stroke-width: 2px !important }
          @font-face { font-family: Roboto; src: url(../fonts/roboto.woff2) format("woff2") }
          @media print { .bar { fill: black } }
        </style>
        </head><body><svg><rect class="bar"/></svg></body></html>"#;

    fn page_url() -> Url {
        Url::parse("https://example.com/charts/index.html").unwrap()
    }

    #[test]
    fn parses_rule_kinds() {
        let rules = parse_rules(
            "rect.a, circle { fill: red; display: none !important } @page { margin: 1cm }",
        ).unwrap();
        assert_eq!(rules.len(), 2);
        match &rules[0] {
            RuleRecord::Style {
                selector_text,
                style_text,
                declarations,
                ..
            } => {
                assert_eq!(selector_text, "rect.a, circle");
                assert_eq!(style_text, "fill: red; display: none !important;");
                assert_eq!(declarations[0], ("fill".to_string(), "red".to_string()));
            }
            other => panic!("expected a style rule, got {:?}", other),
        }
        assert!(matches!(rules[1], RuleRecord::Other { .. }));
    }

    #[test]
    fn important_declarations_come_last() {
        let rules = parse_rules("a { color: red !important; fill: green }").unwrap();
        match &rules[0] {
            RuleRecord::Style { style_text, .. } => {
                assert_eq!(style_text, "fill: green; color: red !important;")
            }
            other => panic!("expected a style rule, got {:?}", other),
        }
    }

    #[test]
    fn loads_sheets_in_document_order() {
        let doc = create_dom_tree_with_url(PAGE, page_url());
        let fetcher = MemoryFetcher::new().with_resource(
            "https://example.com/css/site.css",
            "rect { width: 10px }",
            Some("text/css"),
        );
        let sheets = block_on(load_stylesheets(&doc, &fetcher, StylesheetAccess::SameOrigin));
        assert_eq!(sheets.len(), 3);
        assert_eq!(sheets[0].href.as_deref(), Some("https://example.com/css/site.css"));
        assert_eq!(sheets[0].rules.as_ref().map(Vec::len), Some(1));
        // Cross-origin sheets are listed but unreadable, and never fetched.
        assert_eq!(sheets[1].rules, None);
        assert_eq!(fetcher.requests(), vec!["https://example.com/css/site.css"]);
        let inline = sheets[2].rules.as_ref().unwrap();
        assert_eq!(sheets[2].href, None);
        assert!(matches!(inline[1], RuleRecord::FontFace { .. }));
        assert!(matches!(inline[2], RuleRecord::Other { .. }));
    }

    #[test]
    fn failed_fetch_leaves_sheet_unreadable() {
        let doc = create_dom_tree_with_url(PAGE, page_url());
        let fetcher = MemoryFetcher::new();
        let sheets = block_on(load_stylesheets(&doc, &fetcher, StylesheetAccess::Any));
        assert_eq!(sheets[0].rules, None);
        assert_eq!(sheets[1].rules, None);
        assert_eq!(fetcher.requests().len(), 2);
    }

    #[test]
    fn cache_loads_once_until_reset() {
        let doc = create_dom_tree_with_url(PAGE, page_url());
        let fetcher = MemoryFetcher::new();
        let cache = StylesheetCache::new();
        block_on(cache.get_or_load(&doc, &fetcher, StylesheetAccess::SameOrigin));
        block_on(cache.get_or_load(&doc, &fetcher, StylesheetAccess::SameOrigin));
        assert_eq!(fetcher.requests().len(), 1);
        cache.reset();
        assert!(cache.get().is_none());
        block_on(cache.get_or_load(&doc, &fetcher, StylesheetAccess::SameOrigin));
        assert_eq!(fetcher.requests().len(), 2);
    }

    #[test]
    fn computed_style_applies_cascade_and_inline_style() {
        let doc = create_dom_tree_with_url(PAGE, page_url());
        let sheets = vec![StylesheetRecord {
            href: None,
            rules: Some(parse_rules("svg { fill: blue } .bar { fill: red; width: 5px } rect { width: 1px }").unwrap()),
        }];
        let rules = cascade_rules(&sheets);
        assert_eq!(rules.len(), 3);
        let rect = descendants(&doc.root)
            .into_iter()
            .find(|n| tag_name(n).as_deref() == Some("rect"))
            .unwrap();
        crate::dom::dom_tree::set_attribute(&rect, "style", "height: 7px");
        let style = computed_style(&rect, &rules);
        assert_eq!(style.get("width").map(String::as_str), Some("5px"));
        assert_eq!(style.get("fill").map(String::as_str), Some("red"));
        assert_eq!(style.get("height").map(String::as_str), Some("7px"));
    }
}
