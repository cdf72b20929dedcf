//! Size of the exported document.
//!
//! A root `<svg>` takes its size from the first usable of: the caller's override, its `viewBox`,
//! its `width`/`height` attributes, its layout box, its inline style and its computed style. Any
//! other element is sized by its content bounding box, which only some elements can report.

use crate::dom::dom_tree::{element_children, get_attribute, tag_name, text_content, Node, NodeRef};
use crate::style::css_matcher::CssRule;
use crate::style::sheets::{cascade_rules, computed_style, StylesheetRecord};
use std::str::FromStr;
use svgtypes::{
    Length, LengthUnit, PointsParser, SimplePathSegment, SimplifyingPathParser, Transform, ViewBox,
};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    fn from_corners(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Rect::new(x0.min(x1), y0.min(y1), (x1 - x0).abs(), (y1 - y0).abs())
    }

    fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Rect> {
        let mut points = points.into_iter();
        let (x, y) = points.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);
        for (x, y) in points {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Some(Rect::from_corners(min_x, min_y, max_x, max_y))
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect::from_corners(
            self.x.min(other.x),
            self.y.min(other.y),
            (self.x + self.width).max(other.x + other.width),
            (self.y + self.height).max(other.y + other.height),
        )
    }

    fn transformed(&self, ts: &Transform) -> Rect {
        let corners = [
            (self.x, self.y),
            (self.x + self.width, self.y),
            (self.x, self.y + self.height),
            (self.x + self.width, self.y + self.height),
        ];
        Rect::from_points(corners.iter().map(|&(x, y)| {
            (ts.a * x + ts.c * y + ts.e, ts.b * x + ts.d * y + ts.f)
        }))
        .unwrap_or(*self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Width,
    Height,
}

impl Axis {
    pub fn name(self) -> &'static str {
        match self {
            Axis::Width => "width",
            Axis::Height => "height",
        }
    }

    fn of_rect(self, rect: &Rect) -> f64 {
        match self {
            Axis::Width => rect.width,
            Axis::Height => rect.height,
        }
    }
}

/// Where the size came from decides how the caller may use it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedDimensions {
    /// Root `<svg>`: each side resolved independently, 0 when nothing was usable.
    RootSurface(Dimensions),
    /// Any other element: the far corner of its content box, so content offset from the
    /// origin is not clipped.
    ContentBox(Dimensions),
    /// The element cannot report a content box; the caller has to supply a size.
    Unavailable,
}

impl ResolvedDimensions {
    pub fn dimensions(&self) -> Option<Dimensions> {
        match self {
            ResolvedDimensions::RootSurface(d) | ResolvedDimensions::ContentBox(d) => Some(*d),
            ResolvedDimensions::Unavailable => None,
        }
    }
}

/// Layout questions the resolver needs answered about the live element.
pub trait Geometry {
    /// Rendered layout box. `None` when there is no layout engine.
    fn bounding_client_rect(&self, element: &NodeRef) -> Option<Rect>;

    /// Bounding box of the element's content in user units. `None` when the element does not
    /// support the query at all (an empty group still answers, with a zero box).
    fn content_bbox(&self, element: &NodeRef) -> Option<Rect>;

    /// Cascaded value of one CSS property.
    fn computed_style(&self, element: &NodeRef, property: &str) -> Option<String>;
}

/// Sizes an element for export.
///
/// `width` and `height` are caller overrides and win when usable. A value is usable when it is
/// finite and greater than zero; `%` attribute values never are.
pub fn resolve_dimensions(
    original: &NodeRef,
    copy: &NodeRef,
    width: Option<f64>,
    height: Option<f64>,
    geometry: &dyn Geometry,
) -> ResolvedDimensions {
    if tag_name(original).as_deref() == Some("svg") {
        let width = usable(width)
            .unwrap_or_else(|| resolve_axis(original, copy, Axis::Width, geometry));
        let height = usable(height)
            .unwrap_or_else(|| resolve_axis(original, copy, Axis::Height, geometry));
        return ResolvedDimensions::RootSurface(Dimensions { width, height });
    }
    match geometry.content_bbox(original) {
        Some(bbox) => ResolvedDimensions::ContentBox(Dimensions {
            width: bbox.x + bbox.width,
            height: bbox.y + bbox.height,
        }),
        None => ResolvedDimensions::Unavailable,
    }
}

fn resolve_axis(original: &NodeRef, copy: &NodeRef, axis: Axis, geometry: &dyn Geometry) -> f64 {
    view_box_side(original, axis)
        .or_else(|| {
            let attr = get_attribute(copy, axis.name())?;
            if attr.trim_end().ends_with('%') {
                return None;
            }
            usable(parse_int(&attr))
        })
        .or_else(|| usable(geometry.bounding_client_rect(original).map(|r| axis.of_rect(&r))))
        .or_else(|| {
            let value = match &*copy.borrow() {
                Node::Element(elem) => elem.inline_style_property(axis.name()),
                _ => None,
            };
            usable(value.as_deref().and_then(parse_int))
        })
        .or_else(|| usable(geometry.computed_style(original, axis.name()).as_deref().and_then(parse_int)))
        .unwrap_or(0.0)
}

fn view_box_side(element: &NodeRef, axis: Axis) -> Option<f64> {
    let view_box = ViewBox::from_str(&get_attribute(element, "viewBox")?).ok()?;
    usable(Some(match axis {
        Axis::Width => view_box.w,
        Axis::Height => view_box.h,
    }))
}

fn usable(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

/// Leading integer of a string, the way `parseInt` reads `"120.5px"` as 120.
pub fn parse_int(text: &str) -> Option<f64> {
    let text = text.trim_start();
    let (sign, digits) = match text.as_bytes().first() {
        Some(b'-') => (-1.0, &text[1..]),
        Some(b'+') => (1.0, &text[1..]),
        _ => (1.0, text),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    digits[..end].parse::<f64>().ok().map(|v| sign * v)
}

/// Geometry without a layout engine.
///
/// There is no client rect. Content boxes are estimated from SVG geometry attributes: shapes,
/// paths and images directly, containers as the union of their rendered children (child
/// transforms applied), text from its position and a nominal glyph width. Computed style comes
/// from the stylesheet cascade plus the inline `style` attribute.
#[derive(Debug, Clone, Default)]
pub struct StaticGeometry {
    rules: Vec<CssRule>,
}

const GRAPHICS_ELEMENTS: &[&str] = &[
    "a",
    "circle",
    "ellipse",
    "foreignObject",
    "g",
    "image",
    "line",
    "path",
    "polygon",
    "polyline",
    "rect",
    "svg",
    "switch",
    "text",
    "tspan",
    "use",
];

/// Not rendered in place, so never part of a parent's box.
const NON_RENDERED: &[&str] = &[
    "clipPath",
    "defs",
    "desc",
    "filter",
    "linearGradient",
    "marker",
    "mask",
    "metadata",
    "pattern",
    "radialGradient",
    "script",
    "style",
    "symbol",
    "title",
];

const DEFAULT_FONT_SIZE: f64 = 16.0;
/// Average advance of a glyph relative to the font size.
const GLYPH_WIDTH_RATIO: f64 = 0.6;

impl StaticGeometry {
    pub fn new(rules: Vec<CssRule>) -> Self {
        StaticGeometry { rules }
    }

    pub fn from_stylesheets(sheets: &[StylesheetRecord]) -> Self {
        Self::new(cascade_rules(sheets))
    }

    fn is_hidden(&self, node: &NodeRef) -> bool {
        get_attribute(node, "display").as_deref() == Some("none")
            || computed_style(node, &self.rules)
                .get("display")
                .map_or(false, |d| d == "none")
    }

    fn length(node: &NodeRef, name: &str) -> f64 {
        get_attribute(node, name)
            .and_then(|v| Length::from_str(&v).ok())
            .filter(|l| matches!(l.unit, LengthUnit::None | LengthUnit::Px))
            .map_or(0.0, |l| l.number)
    }

    fn element_bbox(&self, node: &NodeRef) -> Option<Rect> {
        let tag = tag_name(node)?;
        if NON_RENDERED.contains(&tag.as_str()) || self.is_hidden(node) {
            return None;
        }
        let len = |name: &str| Self::length(node, name);
        match tag.as_str() {
            "rect" | "image" | "foreignObject" => {
                Some(Rect::new(len("x"), len("y"), len("width"), len("height")))
            }
            "use" | "svg" if get_attribute(node, "width").is_some() => {
                Some(Rect::new(len("x"), len("y"), len("width"), len("height")))
            }
            "circle" => {
                let r = len("r");
                Some(Rect::new(len("cx") - r, len("cy") - r, 2.0 * r, 2.0 * r))
            }
            "ellipse" => {
                let (rx, ry) = (len("rx"), len("ry"));
                Some(Rect::new(len("cx") - rx, len("cy") - ry, 2.0 * rx, 2.0 * ry))
            }
            "line" => Some(Rect::from_corners(len("x1"), len("y1"), len("x2"), len("y2"))),
            "polyline" | "polygon" => {
                Rect::from_points(PointsParser::from(get_attribute(node, "points")?.as_str()))
            }
            "path" => path_bbox(&get_attribute(node, "d")?),
            "text" | "tspan" => Some(self.text_bbox(node)),
            _ => self.children_bbox(node),
        }
    }

    fn children_bbox(&self, node: &NodeRef) -> Option<Rect> {
        element_children(node)
            .iter()
            .filter_map(|child| {
                let bbox = self.element_bbox(child)?;
                Some(match get_attribute(child, "transform").and_then(|t| Transform::from_str(&t).ok()) {
                    Some(ts) => bbox.transformed(&ts),
                    None => bbox,
                })
            })
            .reduce(|a, b| a.union(&b))
    }

    fn text_bbox(&self, node: &NodeRef) -> Rect {
        let font_size = computed_style(node, &self.rules)
            .get("font-size")
            .and_then(|v| parse_int(v))
            .filter(|v| *v > 0.0)
            .unwrap_or(DEFAULT_FONT_SIZE);
        let chars = text_content(node).trim().chars().count() as f64;
        let own = Rect::new(
            Self::length(node, "x"),
            Self::length(node, "y") - font_size,
            chars * font_size * GLYPH_WIDTH_RATIO,
            font_size,
        );
        match self.children_bbox(node) {
            Some(children) => own.union(&children),
            None => own,
        }
    }
}

fn path_bbox(data: &str) -> Option<Rect> {
    let mut points = Vec::new();
    for segment in SimplifyingPathParser::from(data) {
        // Like a renderer, keep everything before the first error.
        let segment = match segment {
            Ok(segment) => segment,
            Err(_) => break,
        };
        match segment {
            SimplePathSegment::MoveTo { x, y } | SimplePathSegment::LineTo { x, y } => {
                points.push((x, y))
            }
            // Control points bound the curve, so the box may be slightly generous.
            SimplePathSegment::Quadratic { x1, y1, x, y } => {
                points.extend([(x1, y1), (x, y)]);
            }
            SimplePathSegment::CurveTo {
                x1,
                y1,
                x2,
                y2,
                x,
                y,
            } => {
                points.extend([(x1, y1), (x2, y2), (x, y)]);
            }
            SimplePathSegment::ClosePath => {}
        }
    }
    Rect::from_points(points)
}

impl Geometry for StaticGeometry {
    fn bounding_client_rect(&self, _element: &NodeRef) -> Option<Rect> {
        None
    }

    fn content_bbox(&self, element: &NodeRef) -> Option<Rect> {
        let supported = match &*element.borrow() {
            Node::Element(elem) => elem.is_svg() && GRAPHICS_ELEMENTS.contains(&elem.tag.as_str()),
            _ => false,
        };
        if !supported {
            return None;
        }
        Some(self.element_bbox(element).unwrap_or_default())
    }

    fn computed_style(&self, element: &NodeRef, property: &str) -> Option<String> {
        computed_style(element, &self.rules).remove(property)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::dom_tree::{deep_clone, descendants, Document};
    use crate::parser::html::create_dom_tree;
    use crate::style::sheets::parse_rules;
    use pretty_assertions::assert_eq;

    fn element(doc: &Document, id: &str) -> NodeRef {
        descendants(&doc.root)
            .into_iter()
            .find(|n| get_attribute(n, "id").as_deref() == Some(id))
            .unwrap()
    }

    /// A layout engine that reports one fixed client rect for every element.
    struct LaidOut(Rect);

    impl Geometry for LaidOut {
        fn bounding_client_rect(&self, _element: &NodeRef) -> Option<Rect> {
            Some(self.0)
        }

        fn content_bbox(&self, _element: &NodeRef) -> Option<Rect> {
            None
        }

        fn computed_style(&self, _element: &NodeRef, _property: &str) -> Option<String> {
            Some("999px".to_string())
        }
    }

    fn root_size(html: &str, geometry: &dyn Geometry) -> ResolvedDimensions {
        let doc = create_dom_tree(html);
        let svg = element(&doc, "s");
        resolve_dimensions(&svg, &deep_clone(&svg), None, None, geometry)
    }

    fn root(width: f64, height: f64) -> ResolvedDimensions {
        ResolvedDimensions::RootSurface(Dimensions { width, height })
    }

    #[test]
    fn view_box_wins_over_attributes() {
        let geometry = StaticGeometry::default();
        assert_eq!(
            root_size(r#"<svg id="s" viewBox="0 0 100 50" width="300" height="10"></svg>"#, &geometry),
            root(100.0, 50.0)
        );
    }

    #[test]
    fn percentage_attributes_are_skipped() {
        let geometry = StaticGeometry::default();
        assert_eq!(
            root_size(r#"<svg id="s" width="100%" height="80.9px" style="width: 240px"></svg>"#, &geometry),
            root(240.0, 80.0)
        );
        assert_eq!(
            root_size(r#"<svg id="s" width="50%"></svg>"#, &geometry),
            root(0.0, 0.0)
        );
    }

    #[test]
    fn client_rect_comes_after_attributes() {
        let layout = LaidOut(Rect::new(0.0, 0.0, 333.0, 77.0));
        assert_eq!(
            root_size(r#"<svg id="s" width="100%" height="50%"></svg>"#, &layout),
            root(333.0, 77.0)
        );
        assert_eq!(
            root_size(r#"<svg id="s" width="120" style="height: 10px"></svg>"#, &layout),
            root(120.0, 77.0)
        );
        assert_eq!(
            root_size(r#"<svg id="s" viewBox="0 0 40 30"></svg>"#, &layout),
            root(40.0, 30.0)
        );
    }

    #[test]
    fn empty_client_rect_falls_through_to_style() {
        let layout = LaidOut(Rect::new(5.0, 5.0, 0.0, 0.0));
        assert_eq!(
            root_size(r#"<svg id="s" style="width: 64px"></svg>"#, &layout),
            root(64.0, 999.0)
        );
    }

    #[test]
    fn computed_style_is_the_last_resort() {
        let sheets = vec![StylesheetRecord {
            href: None,
            rules: Some(parse_rules("svg.chart { width: 640px; height: 0 }").unwrap()),
        }];
        let geometry = StaticGeometry::from_stylesheets(&sheets);
        assert_eq!(
            root_size(r#"<svg id="s" class="chart" height="12"></svg>"#, &geometry),
            root(640.0, 12.0)
        );
    }

    #[test]
    fn overrides_win_when_usable() {
        let doc = create_dom_tree(r#"<svg id="s" viewBox="0 0 100 50"></svg>"#);
        let svg = element(&doc, "s");
        let geometry = StaticGeometry::default();
        assert_eq!(
            resolve_dimensions(&svg, &svg, Some(20.0), Some(0.0), &geometry),
            root(20.0, 50.0)
        );
    }

    #[test]
    fn subtree_uses_far_corner_of_content_box() {
        let doc = create_dom_tree(
            r#"<svg><g id="g">
                 <rect x="10" y="20" width="30" height="40"/>
                 <circle cx="100" cy="10" r="5" transform="translate(10, 5)"/>
                 <path d="M 0 0 L 20 90"/>
                 <defs><rect width="900" height="900"/></defs>
                 <rect width="500" height="500" style="display: none"/>
               </g><g id="empty"></g></svg><div id="d"></div>"#,
        );
        let geometry = StaticGeometry::default();
        let g = element(&doc, "g");
        assert_eq!(
            resolve_dimensions(&g, &g, None, None, &geometry),
            ResolvedDimensions::ContentBox(Dimensions {
                width: 115.0,
                height: 90.0
            })
        );
        let empty = element(&doc, "empty");
        assert_eq!(
            resolve_dimensions(&empty, &empty, None, None, &geometry),
            ResolvedDimensions::ContentBox(Dimensions::default())
        );
        let div = element(&doc, "d");
        assert_eq!(
            resolve_dimensions(&div, &div, None, None, &geometry),
            ResolvedDimensions::Unavailable
        );
    }

    #[test]
    fn parse_int_reads_leading_integer() {
        assert_eq!(parse_int(" 120.5px"), Some(120.0));
        assert_eq!(parse_int("-3"), Some(-3.0));
        assert_eq!(parse_int("px"), None);
        assert_eq!(parse_int(""), None);
    }
}
