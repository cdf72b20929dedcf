//! Turns an element of a parsed page into a standalone SVG document.

use crate::dimensions::{resolve_dimensions, Dimensions, Geometry, ResolvedDimensions, StaticGeometry};
use crate::dom::dom_tree::{
    append_child, create_element, deep_clone, descendants_by_tag, element_children, get_attribute,
    insert_child, set_attribute, tag_name, Document, Node, NodeRef,
};
use crate::dom::{SVG_NS, XHTML_NS, XLINK_NS};
use crate::encoding::svg_data_uri;
use crate::error::{Error, Result};
use crate::fetch::{HttpFetcher, ResourceFetcher};
use crate::fonts::{FontCache, FontResolver};
use crate::images::inline_images;
use crate::parser::serialize::serialize_node;
use crate::style::scanner::{self, CssOptions};
use crate::style::sheets::{StylesheetAccess, StylesheetCache, StylesheetRecord};
use log::debug;
use regex::Regex;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::OnceLock;

/// Prologue of every exported document. Declares `&nbsp;`, which the serializer emits.
pub const DOCTYPE: &str = r#"<?xml version="1.0" standalone="no"?><!DOCTYPE svg PUBLIC "-//W3C//DTD SVG 1.1//EN" "http://www.w3.org/Graphics/SVG/1.1/DTD/svg11.dtd" [<!ENTITY nbsp "&#160;">]>"#;

fn translate_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"translate\(.*?\)").expect("translate pattern is valid"))
}

#[derive(Debug)]
pub struct ExportOptions {
    /// Origin of the `viewBox`.
    pub left: f64,
    pub top: f64,
    /// Size overrides. Only a root `<svg>` honours them, unless its content box is unknown.
    pub width: Option<f64>,
    pub height: Option<f64>,
    /// Multiplies the `width`/`height` attributes, not the `viewBox`.
    pub scale: f64,
    /// Drop `width`/`height` so the document fills its container.
    pub responsive: bool,
    /// Skip the embedded `<style>` entirely.
    pub exclude_css: bool,
    /// Background color for the root; falls back to the element's own inline background.
    pub background_color: Option<String>,
    pub css: CssOptions,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions {
            left: 0.0,
            top: 0.0,
            width: None,
            height: None,
            scale: 1.0,
            responsive: false,
            exclude_css: false,
            background_color: None,
            css: CssOptions::default(),
        }
    }
}

impl ExportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_origin(mut self, left: f64, top: f64) -> Self {
        self.left = left;
        self.top = top;
        self
    }

    pub fn with_size(mut self, width: Option<f64>, height: Option<f64>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_responsive(mut self, responsive: bool) -> Self {
        self.responsive = responsive;
        self
    }

    pub fn with_exclude_css(mut self, exclude_css: bool) -> Self {
        self.exclude_css = exclude_css;
        self
    }

    pub fn with_background_color(mut self, color: impl Into<String>) -> Self {
        self.background_color = Some(color.into());
        self
    }

    pub fn with_css(mut self, css: CssOptions) -> Self {
        self.css = css;
        self
    }
}

/// Serialized document body with the size it was laid out at.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSvg {
    /// Markup of the root `<svg>`, without the XML prologue.
    pub src: String,
    pub width: f64,
    pub height: f64,
    pub scale: f64,
}

impl PreparedSvg {
    /// Pixel size a rasterizer should allocate.
    pub fn surface_size(&self) -> Dimensions {
        Dimensions {
            width: self.width * self.scale,
            height: self.height * self.scale,
        }
    }

    /// The complete document: prologue plus markup.
    pub fn to_document(&self) -> String {
        format!("{}{}", DOCTYPE, self.src)
    }
}

/// Runs the export pipeline and owns the state shared between conversions.
///
/// Fonts and stylesheets are cached on the exporter. Use one exporter per page, or call
/// [`SvgExporter::reset_caches`] when the page's stylesheets change.
pub struct SvgExporter {
    fetcher: Rc<dyn ResourceFetcher>,
    font_cache: FontCache,
    stylesheets: StylesheetCache,
    geometry: Option<Rc<dyn Geometry>>,
    stylesheet_access: StylesheetAccess,
}

impl Default for SvgExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl SvgExporter {
    pub fn new() -> Self {
        Self::with_fetcher(Rc::new(HttpFetcher::new()))
    }

    pub fn with_fetcher(fetcher: Rc<dyn ResourceFetcher>) -> Self {
        SvgExporter {
            fetcher,
            font_cache: FontCache::new(),
            stylesheets: StylesheetCache::new(),
            geometry: None,
            stylesheet_access: StylesheetAccess::default(),
        }
    }

    /// Replaces the built-in [`StaticGeometry`], e.g. with one backed by a real layout engine.
    pub fn with_geometry(mut self, geometry: Rc<dyn Geometry>) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_stylesheet_access(mut self, access: StylesheetAccess) -> Self {
        self.stylesheet_access = access;
        self
    }

    pub fn font_cache(&self) -> &FontCache {
        &self.font_cache
    }

    pub fn reset_caches(&self) {
        self.font_cache.reset();
        self.stylesheets.reset();
    }

    async fn stylesheets(&self, document: &Document) -> Rc<Vec<StylesheetRecord>> {
        self.stylesheets
            .get_or_load(document, self.fetcher.as_ref(), self.stylesheet_access)
            .await
    }

    /// CSS the element needs: matching rules, unmatched rules unless excluded, embedded fonts.
    pub async fn inline_css(&self, document: &Document, element: &NodeRef, options: &CssOptions) -> String {
        let sheets = self.stylesheets(document).await;
        let resolver = FontResolver::new(&self.font_cache, self.fetcher.as_ref());
        scanner::inline_css(element, options, &sheets, document.url.as_ref(), &resolver).await
    }

    /// Builds the self-contained markup for `element`. The element itself is left untouched.
    pub async fn prepare_svg(
        &self,
        document: &Document,
        element: &NodeRef,
        options: &ExportOptions,
    ) -> Result<PreparedSvg> {
        require_dom_node(element)?;
        let is_root = tag_name(element).as_deref() == Some("svg");
        if !is_root && !is_svg_element(element) {
            return Err(Error::NonSvgElement(tag_name(element).unwrap_or_default()));
        }

        let mut clone = deep_clone(element);
        inline_images(&clone, document.url.as_ref(), self.fetcher.as_ref()).await?;
        apply_background(element, &clone, options.background_color.as_deref());

        let sheets = self.stylesheets(document).await;
        let geometry: Rc<dyn Geometry> = match &self.geometry {
            Some(geometry) => Rc::clone(geometry),
            None => Rc::new(StaticGeometry::from_stylesheets(&sheets)),
        };
        let resolved = resolve_dimensions(element, &clone, options.width, options.height, geometry.as_ref());
        let Dimensions { width, height } = match (resolved, options.width, options.height) {
            (ResolvedDimensions::Unavailable, Some(width), Some(height)) => Dimensions { width, height },
            (ResolvedDimensions::Unavailable, _, _) => {
                return Err(Error::MissingDimensions(tag_name(element).unwrap_or_default()))
            }
            (resolved, _, _) => resolved.dimensions().unwrap_or_default(),
        };
        debug!("exporting <{}> at {}x{}", tag_name(element).unwrap_or_default(), width, height);

        if !is_root {
            clone = wrap_in_svg(clone);
        }
        set_root_attributes(&clone, width, height, options);
        declare_foreign_namespaces(&clone);

        if !options.exclude_css {
            let resolver = FontResolver::new(&self.font_cache, self.fetcher.as_ref());
            let css =
                scanner::inline_css(element, &options.css, &sheets, document.url.as_ref(), &resolver).await;
            insert_child(&clone, 0, style_defs(&css));
        }

        Ok(PreparedSvg {
            src: serialize_node(&clone),
            width,
            height,
            scale: options.scale,
        })
    }

    /// The prepared element as a complete SVG document.
    pub async fn svg_as_markup(
        &self,
        document: &Document,
        element: &NodeRef,
        options: &ExportOptions,
    ) -> Result<String> {
        Ok(self.prepare_svg(document, element, options).await?.to_document())
    }

    /// The prepared element as a `data:image/svg+xml;base64,...` URI.
    pub async fn svg_as_data_uri(
        &self,
        document: &Document,
        element: &NodeRef,
        options: &ExportOptions,
    ) -> Result<String> {
        svg_data_uri(&self.svg_as_markup(document, element, options).await?)
    }
}

fn require_dom_node(node: &NodeRef) -> Result<()> {
    let kind = match &*node.borrow() {
        Node::Element(_) => return Ok(()),
        Node::DocumentRoot(_) => "document",
        Node::Text(_) => "text",
        Node::Comment(_) => "comment",
        Node::CData(_) => "CDATA section",
    };
    Err(Error::InvalidInput(kind.to_string()))
}

fn is_svg_element(node: &NodeRef) -> bool {
    match &*node.borrow() {
        Node::Element(elem) => elem.is_svg(),
        _ => false,
    }
}

fn apply_background(original: &NodeRef, clone: &NodeRef, color: Option<&str>) {
    let fallback = match &*original.borrow() {
        Node::Element(elem) => elem.inline_style_property("background-color"),
        _ => None,
    };
    let color = color.map(str::to_string).or(fallback).unwrap_or_default();
    if let Node::Element(elem) = &mut *clone.borrow_mut() {
        elem.set_inline_style_property("background-color", &color);
    }
}

/// Puts a non-root element under a fresh `<svg>`, dropping its first `translate(...)` so the
/// content lands at the origin.
fn wrap_in_svg(clone: NodeRef) -> NodeRef {
    if let Some(transform) = get_attribute(&clone, "transform") {
        let stripped = translate_regex().replacen(&transform, 1, "").into_owned();
        set_attribute(&clone, "transform", stripped);
    }
    let svg = create_element(SVG_NS, "svg");
    append_child(&svg, clone);
    svg
}

fn set_root_attributes(root: &NodeRef, width: f64, height: f64, options: &ExportOptions) {
    let mut root = root.borrow_mut();
    let elem = match &mut *root {
        Node::Element(elem) => elem,
        _ => return,
    };
    elem.set_attribute("version", "1.1");
    elem.set_attribute(
        "viewBox",
        format!("{} {} {} {}", options.left, options.top, width, height),
    );
    if elem.get_attribute("xmlns").map_or(true, str::is_empty) {
        elem.set_attribute("xmlns", SVG_NS);
    }
    if elem.get_attribute("xmlns:xlink").map_or(true, str::is_empty) {
        elem.set_attribute("xmlns:xlink", XLINK_NS);
    }
    if options.responsive {
        elem.remove_attribute("width");
        elem.remove_attribute("height");
        elem.set_attribute("preserveAspectRatio", "xMinYMin meet");
    } else {
        elem.set_attribute("width", (width * options.scale).to_string());
        elem.set_attribute("height", (height * options.scale).to_string());
    }
}

/// Content of a `foreignObject` is parsed as XML on its own, so it needs its namespace spelled out.
fn declare_foreign_namespaces(root: &NodeRef) {
    for foreign_object in descendants_by_tag(root, "foreignObject") {
        for child in element_children(&foreign_object) {
            let namespace = match tag_name(&child).as_deref() {
                Some("svg") => SVG_NS,
                _ => XHTML_NS,
            };
            set_attribute(&child, "xmlns", namespace);
        }
    }
}

fn style_defs(css: &str) -> NodeRef {
    let style = create_element(SVG_NS, "style");
    set_attribute(&style, "type", "text/css");
    append_child(&style, Rc::new(RefCell::new(Node::CData(format!("\n{}\n", css)))));
    let defs = create_element(SVG_NS, "defs");
    append_child(&defs, style);
    defs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;
    use crate::parser::html::create_dom_tree;
    use futures::executor::block_on;
    use pretty_assertions::assert_eq;

    fn exporter() -> SvgExporter {
        SvgExporter::with_fetcher(Rc::new(MemoryFetcher::new()))
    }

    fn first(document: &Document, tag: &str) -> NodeRef {
        descendants_by_tag(&document.root, tag).remove(0)
    }

    #[test]
    fn root_svg_gets_size_and_namespaces() {
        let doc = create_dom_tree(r#"<svg width="80" height="40"><rect width="10" height="10"/></svg>"#);
        let svg = first(&doc, "svg");
        let options = ExportOptions::new().with_scale(2.0).with_exclude_css(true);
        let prepared = block_on(exporter().prepare_svg(&doc, &svg, &options)).unwrap();
        assert_eq!(
            prepared.src,
            r#"<svg width="160" height="80" version="1.1" viewBox="0 0 80 40" xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink"><rect width="10" height="10"/></svg>"#
        );
        assert_eq!(prepared.surface_size(), Dimensions { width: 160.0, height: 80.0 });
        assert!(prepared.to_document().starts_with("<?xml version=\"1.0\" standalone=\"no\"?>"));
        assert_eq!(get_attribute(&svg, "version"), None);
    }

    #[test]
    fn style_block_comes_first() {
        let doc = create_dom_tree(
            r#"<style>rect { fill: red }</style><svg viewBox="0 0 10 10"><rect/></svg>"#,
        );
        let svg = first(&doc, "svg");
        let prepared = block_on(exporter().prepare_svg(&doc, &svg, &ExportOptions::new())).unwrap();
        assert!(prepared.src.contains(
            "<defs><style type=\"text/css\"><![CDATA[\nrect{fill: red;}\n\n]]></style></defs><rect/>"
        ));
    }

    #[test]
    fn html_elements_are_rejected() {
        let doc = create_dom_tree("<div><p>x</p></div>");
        let div = first(&doc, "div");
        let err = block_on(exporter().prepare_svg(&doc, &div, &ExportOptions::new())).unwrap_err();
        assert!(matches!(err, Error::NonSvgElement(ref tag) if tag == "div"));

        let text = Rc::new(RefCell::new(Node::Text("x".into())));
        let err = block_on(exporter().prepare_svg(&doc, &text, &ExportOptions::new())).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn unmeasurable_elements_need_an_explicit_size() {
        let doc = create_dom_tree(r#"<svg><defs><linearGradient id="g"/></defs></svg>"#);
        let gradient = first(&doc, "linearGradient");
        let err = block_on(exporter().prepare_svg(&doc, &gradient, &ExportOptions::new())).unwrap_err();
        assert!(matches!(err, Error::MissingDimensions(_)));

        let options = ExportOptions::new().with_size(Some(5.0), Some(6.0)).with_exclude_css(true);
        let prepared = block_on(exporter().prepare_svg(&doc, &gradient, &options)).unwrap();
        assert_eq!((prepared.width, prepared.height), (5.0, 6.0));
    }

    #[test]
    fn background_falls_back_to_the_element_style() {
        let doc = create_dom_tree(r#"<svg width="1" height="1" style="background-color: blue"></svg>"#);
        let svg = first(&doc, "svg");
        let plain = ExportOptions::new().with_exclude_css(true);
        let prepared = block_on(exporter().prepare_svg(&doc, &svg, &plain)).unwrap();
        assert!(prepared.src.contains(r#"style="background-color: blue;""#));

        let overridden = ExportOptions::new()
            .with_exclude_css(true)
            .with_background_color("white");
        let prepared = block_on(exporter().prepare_svg(&doc, &svg, &overridden)).unwrap();
        assert!(prepared.src.contains(r#"style="background-color: white;""#));
    }

    #[test]
    fn data_uri_wraps_the_document() {
        let doc = create_dom_tree(r#"<svg width="2" height="2"><text>é</text></svg>"#);
        let svg = first(&doc, "svg");
        let options = ExportOptions::new().with_exclude_css(true);
        let uri = block_on(exporter().svg_as_data_uri(&doc, &svg, &options)).unwrap();
        let blob = crate::encoding::data_uri_to_binary(&uri).unwrap();
        assert_eq!(blob.content_type, "image/svg+xml");
        let text = String::from_utf8(blob.data).unwrap();
        assert!(text.starts_with(DOCTYPE));
        assert!(text.ends_with("<text>é</text></svg>"));
    }
}
