//! Parsing of page markup into the crate's DOM tree.
//!
//! html5ever does the tokenizing and tree construction (including the foreign-content rules that
//! give inline `<svg>` elements their SVG namespace and camel-cased names such as `viewBox`), and
//! [`SvgInlineTreeSink`] materialises the result as `crate::dom::dom_tree` nodes.

use crate::dom::dom_tree;
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{
    interface::{ElemName, NodeOrText, QuirksMode, TreeSink},
    LocalName, Namespace, QualName,
};
use log::trace;
use std::cell::RefCell;
use std::rc::Rc;
use url::Url;

/// Creates a DOM tree from the provided HTML (or standalone SVG) content.
///
/// # Arguments
///
/// * `html_content` - A string slice containing the markup to parse.
///
/// # Returns
///
/// A `dom_tree::Document` without a location. Use [`create_dom_tree_with_url`] when the page
/// references stylesheets, fonts or images relatively.
pub fn create_dom_tree(html_content: &str) -> dom_tree::Document {
    let tree_sink = SvgInlineTreeSink::new();
    html5ever::parse_document(tree_sink, Default::default()).one(html_content.to_string())
}

/// Same as [`create_dom_tree`], recording where the document was loaded from.
pub fn create_dom_tree_with_url(html_content: &str, url: Url) -> dom_tree::Document {
    create_dom_tree(html_content).with_url(url)
}

/// Attribute names keep their prefix (`xlink:href`, `xmlns:xlink`) so they serialize back as
/// written.
fn qualified_attribute_name(name: &QualName) -> String {
    match &name.prefix {
        Some(prefix) => format!("{}:{}", prefix, name.local),
        None => name.local.to_string(),
    }
}

/// A custom TreeSink for building the DOM tree used by the exporter.
///
/// It holds the Document being built and the current quirks mode.
pub struct SvgInlineTreeSink {
    document: dom_tree::Document,
    quirks_mode: RefCell<QuirksMode>,
}

impl SvgInlineTreeSink {
    /// Creates a new `SvgInlineTreeSink` with an empty document.
    pub fn new() -> Self {
        Self {
            document: dom_tree::new_document(),
            quirks_mode: RefCell::new(QuirksMode::NoQuirks),
        }
    }

    fn text_node(text: &str) -> Rc<RefCell<dom_tree::Node>> {
        Rc::new(RefCell::new(dom_tree::Node::Text(text.to_string())))
    }

    /// Adjacent text must end up in a single node, as the tree builder expects.
    fn merge_into_last_text(children: &[Rc<RefCell<dom_tree::Node>>], text: &str) -> bool {
        if let Some(last) = children.last() {
            if let dom_tree::Node::Text(existing) = &mut *last.borrow_mut() {
                existing.push_str(text);
                return true;
            }
        }
        false
    }
}

impl Default for SvgInlineTreeSink {
    fn default() -> Self {
        Self::new()
    }
}

/// A simple implementation of the `ElemName` trait for our elements.
#[derive(Debug)]
pub struct SvgInlineElemName {
    ns: Namespace,
    local: LocalName,
}

impl ElemName for SvgInlineElemName {
    fn local_name(&self) -> &LocalName {
        &self.local
    }

    fn ns(&self) -> &Namespace {
        &self.ns
    }
}

impl TreeSink for SvgInlineTreeSink {
    type Handle = Rc<RefCell<dom_tree::Node>>;
    type Output = dom_tree::Document;
    type ElemName<'a>
        = SvgInlineElemName
    where
        Self: 'a;

    fn finish(self) -> Self::Output {
        self.document
    }

    fn parse_error(&self, msg: std::borrow::Cow<'static, str>) {
        trace!("HTML parse error: {}", msg);
    }

    fn get_document(&self) -> Self::Handle {
        self.document.root.clone()
    }

    fn elem_name<'a>(&'a self, target: &'a Self::Handle) -> Self::ElemName<'a> {
        match &*target.borrow() {
            dom_tree::Node::Element(elem) => SvgInlineElemName {
                ns: elem.qual_name.ns.clone(),
                local: elem.qual_name.local.clone(),
            },
            // The tree builder only asks for names of elements.
            _ => SvgInlineElemName {
                ns: Namespace::from(""),
                local: LocalName::from(""),
            },
        }
    }

    fn create_element(
        &self,
        name: QualName,
        attrs: Vec<html5ever::Attribute>,
        _flags: html5ever::interface::ElementFlags,
    ) -> Self::Handle {
        let mut element = dom_tree::ElementNode::new(name.local.to_string(), name);
        element.attributes = attrs
            .into_iter()
            .map(|attr| (qualified_attribute_name(&attr.name), attr.value.to_string()))
            .collect();
        Rc::new(RefCell::new(dom_tree::Node::Element(element)))
    }

    fn create_comment(&self, text: StrTendril) -> Self::Handle {
        Rc::new(RefCell::new(dom_tree::Node::Comment(text.to_string())))
    }

    /// Processing instructions only exist in XML; keep them as comments.
    fn create_pi(&self, target: StrTendril, data: StrTendril) -> Self::Handle {
        let combined = format!("?{} {}?", target, data);
        Rc::new(RefCell::new(dom_tree::Node::Comment(combined)))
    }

    fn append(&self, parent: &Self::Handle, child: NodeOrText<Self::Handle>) {
        match child {
            NodeOrText::AppendNode(node) => dom_tree::append_child(parent, node),
            NodeOrText::AppendText(text) => {
                if !Self::merge_into_last_text(&dom_tree::children(parent), &text) {
                    dom_tree::append_child(parent, Self::text_node(&text));
                }
            }
        }
    }

    fn append_based_on_parent_node(
        &self,
        element: &Self::Handle,
        prev_element: &Self::Handle,
        child: NodeOrText<Self::Handle>,
    ) {
        if dom_tree::parent(element).is_some() {
            self.append_before_sibling(element, child);
        } else {
            self.append(prev_element, child);
        }
    }

    fn append_doctype_to_document(
        &self,
        name: StrTendril,
        public_id: StrTendril,
        system_id: StrTendril,
    ) {
        *self.document.doctype.borrow_mut() = Some(dom_tree::Doctype {
            name: name.to_string(),
            public_id: public_id.to_string(),
            system_id: system_id.to_string(),
        });
    }

    fn get_template_contents(&self, target: &Self::Handle) -> Self::Handle {
        target.clone()
    }

    fn same_node(&self, x: &Self::Handle, y: &Self::Handle) -> bool {
        Rc::ptr_eq(x, y)
    }

    fn set_quirks_mode(&self, mode: QuirksMode) {
        *self.quirks_mode.borrow_mut() = mode;
    }

    /// Used for foster parenting (content misplaced inside tables).
    fn append_before_sibling(&self, sibling: &Self::Handle, child: NodeOrText<Self::Handle>) {
        let Some(parent) = dom_tree::parent(sibling) else {
            return;
        };
        let siblings = dom_tree::children(&parent);
        let Some(index) = siblings.iter().position(|node| Rc::ptr_eq(node, sibling)) else {
            return;
        };
        match child {
            NodeOrText::AppendNode(node) => dom_tree::insert_child(&parent, index, node),
            NodeOrText::AppendText(text) => {
                if !Self::merge_into_last_text(&siblings[..index], &text) {
                    dom_tree::insert_child(&parent, index, Self::text_node(&text));
                }
            }
        }
    }

    fn add_attrs_if_missing(&self, target: &Self::Handle, attrs: Vec<html5ever::Attribute>) {
        if let dom_tree::Node::Element(elem_node) = &mut *target.borrow_mut() {
            for attr in attrs {
                let key = qualified_attribute_name(&attr.name);
                if !elem_node.has_attribute(&key) {
                    elem_node.attributes.push((key, attr.value.to_string()));
                }
            }
        }
    }

    fn remove_from_parent(&self, target: &Self::Handle) {
        let Some(parent) = dom_tree::parent(target) else {
            return;
        };
        match &mut *parent.borrow_mut() {
            dom_tree::Node::Element(elem) => elem.children.retain(|c| !Rc::ptr_eq(c, target)),
            dom_tree::Node::DocumentRoot(root) => {
                root.children.retain(|c| !Rc::ptr_eq(c, target))
            }
            _ => {}
        }
        if let dom_tree::Node::Element(elem) = &mut *target.borrow_mut() {
            elem.parent = None;
        }
    }

    fn reparent_children(&self, node: &Self::Handle, new_parent: &Self::Handle) {
        let moved = match &mut *node.borrow_mut() {
            dom_tree::Node::Element(elem) => std::mem::take(&mut elem.children),
            dom_tree::Node::DocumentRoot(root) => std::mem::take(&mut root.children),
            _ => Vec::new(),
        };
        for child in moved {
            dom_tree::append_child(new_parent, child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::dom_tree::{descendants_by_tag, get_attribute, Node};

    #[test]
    fn inline_svg_keeps_namespace_and_camel_case() {
        let document = create_dom_tree(
            r#"<!DOCTYPE html><html><body>
            <svg viewbox="0 0 10 10"><image xlink:href="a.png"/><linearGradient id="g"/></svg>
            </body></html>"#,
        );
        let svg = descendants_by_tag(&document.root, "svg").remove(0);
        assert_eq!(get_attribute(&svg, "viewBox").as_deref(), Some("0 0 10 10"));
        match &*svg.borrow() {
            Node::Element(elem) => assert!(elem.is_svg()),
            _ => panic!("expected element"),
        }
        let image = descendants_by_tag(&svg, "image").remove(0);
        assert_eq!(get_attribute(&image, "xlink:href").as_deref(), Some("a.png"));
        assert_eq!(descendants_by_tag(&svg, "linearGradient").len(), 1);
        assert_eq!(document.doctype.borrow().as_ref().map(|d| d.name.clone()), Some("html".into()));
    }

    #[test]
    fn text_is_merged_and_parents_are_linked() {
        let document = create_dom_tree("<p>one &amp; two</p>");
        let p = descendants_by_tag(&document.root, "p").remove(0);
        assert_eq!(crate::dom::dom_tree::text_content(&p), "one & two");
        let body = crate::dom::dom_tree::parent(&p).expect("p has a parent");
        assert_eq!(crate::dom::dom_tree::tag_name(&body).as_deref(), Some("body"));
    }

    #[test]
    fn foster_parented_text_lands_before_table() {
        let document = create_dom_tree("<table>stray<tr><td>cell</td></tr></table>");
        let body = descendants_by_tag(&document.root, "body").remove(0);
        assert_eq!(crate::dom::dom_tree::text_content(&body), "straycell");
    }
}
