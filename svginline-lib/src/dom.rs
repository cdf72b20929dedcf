use html5ever::{namespace_url, ns, LocalName, Namespace, QualName};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use url::Url;

pub const SVG_NS: &str = "http://www.w3.org/2000/svg";
pub const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

pub mod dom_tree {
    use super::*;

    /// Shared handle to a node. Parents own their children; children point back weakly.
    pub type NodeRef = Rc<RefCell<Node>>;

    #[derive(Debug, Clone)]
    pub enum Node {
        DocumentRoot(DocumentRootNode),
        Element(ElementNode),
        Text(String),
        Comment(String),
        /// Character data that is serialized verbatim inside a CDATA section.
        CData(String),
    }

    #[derive(Debug, Clone, Default)]
    pub struct DocumentRootNode {
        pub children: Vec<NodeRef>,
    }

    #[derive(Debug, Clone)]
    pub struct ElementNode {
        pub tag: String,
        pub qual_name: QualName,
        /// Attributes in source order, keyed by qualified name (`xlink:href`, `viewBox`).
        pub attributes: Vec<(String, String)>,
        pub children: Vec<NodeRef>,
        pub parent: Option<Weak<RefCell<Node>>>,
    }

    #[derive(Debug)]
    pub struct Document {
        pub root: NodeRef,
        pub doctype: RefCell<Option<Doctype>>,
        /// Location the document was loaded from; relative references resolve against it.
        pub url: Option<Url>,
    }

    #[derive(Debug)]
    pub struct Doctype {
        pub name: String,
        pub public_id: String,
        pub system_id: String,
    }

    impl DocumentRootNode {
        pub fn new() -> Self {
            DocumentRootNode {
                children: Vec::new(),
            }
        }
    }

    impl ElementNode {
        pub fn new(tag: String, qual_name: QualName) -> Self {
            ElementNode {
                tag,
                qual_name,
                attributes: Vec::new(),
                children: Vec::new(),
                parent: None,
            }
        }

        pub fn is_svg(&self) -> bool {
            self.qual_name.ns == ns!(svg)
        }

        pub fn is_html(&self) -> bool {
            self.qual_name.ns == ns!(html)
        }

        pub fn get_attribute(&self, name: &str) -> Option<&str> {
            self.attributes
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        }

        pub fn has_attribute(&self, name: &str) -> bool {
            self.get_attribute(name).is_some()
        }

        /// Replaces the value in place when the attribute exists so source order is kept.
        pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
            let value = value.into();
            match self.attributes.iter_mut().find(|(k, _)| k == name) {
                Some(slot) => slot.1 = value,
                None => self.attributes.push((name.to_string(), value)),
            }
        }

        pub fn remove_attribute(&mut self, name: &str) {
            self.attributes.retain(|(k, _)| k != name);
        }

        pub fn classes(&self) -> impl Iterator<Item = &str> {
            self.get_attribute("class")
                .unwrap_or("")
                .split_whitespace()
        }

        /// Value of one property from the inline `style` attribute, e.g. `width` in `width: 10px`.
        pub fn inline_style_property(&self, property: &str) -> Option<String> {
            parse_inline_style(self.get_attribute("style")?)
                .into_iter()
                .rev()
                .find(|(name, _)| name.eq_ignore_ascii_case(property))
                .map(|(_, value)| value)
        }

        /// Sets or, with an empty value, removes one inline style property.
        pub fn set_inline_style_property(&mut self, property: &str, value: &str) {
            let mut declarations: Vec<(String, String)> = self
                .get_attribute("style")
                .map(parse_inline_style)
                .unwrap_or_default()
                .into_iter()
                .filter(|(name, _)| !name.eq_ignore_ascii_case(property))
                .collect();
            if !value.is_empty() {
                declarations.push((property.to_string(), value.to_string()));
            }
            if declarations.is_empty() {
                self.remove_attribute("style");
            } else {
                let text = declarations
                    .iter()
                    .map(|(name, value)| format!("{}: {};", name, value))
                    .collect::<Vec<_>>()
                    .join(" ");
                self.set_attribute("style", text);
            }
        }
    }

    impl Document {
        pub fn with_url(mut self, url: Url) -> Self {
            self.url = Some(url);
            self
        }
    }

    pub fn new_document() -> Document {
        Document {
            root: Rc::new(RefCell::new(Node::DocumentRoot(DocumentRootNode::new()))),
            doctype: RefCell::new(None),
            url: None,
        }
    }

    /// Splits `a: b; c: d` into declarations. Values keep their original text.
    pub fn parse_inline_style(style: &str) -> Vec<(String, String)> {
        style
            .split(';')
            .filter_map(|declaration| {
                let (name, value) = declaration.split_once(':')?;
                let name = name.trim();
                let value = value.trim();
                if name.is_empty() {
                    None
                } else {
                    Some((name.to_string(), value.to_string()))
                }
            })
            .collect()
    }

    /// Creates a detached element in the given namespace.
    pub fn create_element(namespace: &str, local: &str) -> NodeRef {
        let qual_name = QualName::new(None, Namespace::from(namespace), LocalName::from(local));
        Rc::new(RefCell::new(Node::Element(ElementNode::new(
            local.to_string(),
            qual_name,
        ))))
    }

    pub fn is_element(node: &NodeRef) -> bool {
        matches!(*node.borrow(), Node::Element(_))
    }

    pub fn tag_name(node: &NodeRef) -> Option<String> {
        match &*node.borrow() {
            Node::Element(elem) => Some(elem.tag.clone()),
            _ => None,
        }
    }

    pub fn get_attribute(node: &NodeRef, name: &str) -> Option<String> {
        match &*node.borrow() {
            Node::Element(elem) => elem.get_attribute(name).map(str::to_string),
            _ => None,
        }
    }

    pub fn set_attribute(node: &NodeRef, name: &str, value: impl Into<String>) {
        if let Node::Element(elem) = &mut *node.borrow_mut() {
            elem.set_attribute(name, value);
        }
    }

    pub fn parent(node: &NodeRef) -> Option<NodeRef> {
        match &*node.borrow() {
            Node::Element(elem) => elem.parent.as_ref().and_then(Weak::upgrade),
            _ => None,
        }
    }

    pub fn children(node: &NodeRef) -> Vec<NodeRef> {
        match &*node.borrow() {
            Node::DocumentRoot(root) => root.children.clone(),
            Node::Element(elem) => elem.children.clone(),
            _ => Vec::new(),
        }
    }

    pub fn element_children(node: &NodeRef) -> Vec<NodeRef> {
        children(node).into_iter().filter(is_element).collect()
    }

    /// All descendant elements in document order, excluding `node` itself.
    pub fn descendants(node: &NodeRef) -> Vec<NodeRef> {
        let mut out = Vec::new();
        collect_descendants(node, &mut out);
        out
    }

    fn collect_descendants(node: &NodeRef, out: &mut Vec<NodeRef>) {
        for child in element_children(node) {
            out.push(Rc::clone(&child));
            collect_descendants(&child, out);
        }
    }

    pub fn descendants_by_tag(node: &NodeRef, tag: &str) -> Vec<NodeRef> {
        descendants(node)
            .into_iter()
            .filter(|candidate| tag_name(candidate).as_deref() == Some(tag))
            .collect()
    }

    /// Concatenated text of all descendant text and CDATA nodes.
    pub fn text_content(node: &NodeRef) -> String {
        let mut out = String::new();
        for child in children(node) {
            let nested = match &*child.borrow() {
                Node::Text(text) | Node::CData(text) => {
                    out.push_str(text);
                    false
                }
                Node::Element(_) => true,
                _ => false,
            };
            if nested {
                out.push_str(&text_content(&child));
            }
        }
        out
    }

    /// Appends `child`, pointing its parent link at `parent` when it is an element.
    pub fn append_child(parent: &NodeRef, child: NodeRef) {
        let len = children(parent).len();
        insert_child(parent, len, child);
    }

    pub fn insert_child(parent: &NodeRef, index: usize, child: NodeRef) {
        if let Node::Element(elem) = &mut *child.borrow_mut() {
            elem.parent = Some(Rc::downgrade(parent));
        }
        match &mut *parent.borrow_mut() {
            Node::DocumentRoot(root) => {
                let index = index.min(root.children.len());
                root.children.insert(index, child)
            }
            Node::Element(elem) => {
                let index = index.min(elem.children.len());
                elem.children.insert(index, child)
            }
            _ => {}
        }
    }

    /// Deep copy of `node` that shares nothing with the original and has no parent.
    pub fn deep_clone(node: &NodeRef) -> NodeRef {
        let copy = match &*node.borrow() {
            Node::DocumentRoot(_) => Node::DocumentRoot(DocumentRootNode::new()),
            Node::Element(elem) => Node::Element(ElementNode {
                tag: elem.tag.clone(),
                qual_name: elem.qual_name.clone(),
                attributes: elem.attributes.clone(),
                children: Vec::new(),
                parent: None,
            }),
            Node::Text(text) => Node::Text(text.clone()),
            Node::Comment(text) => Node::Comment(text.clone()),
            Node::CData(text) => Node::CData(text.clone()),
        };
        let copy = Rc::new(RefCell::new(copy));
        for child in children(node) {
            append_child(&copy, deep_clone(&child));
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::dom_tree::*;
    use super::*;

    fn svg_element(tag: &str) -> NodeRef {
        create_element(SVG_NS, tag)
    }

    #[test]
    fn deep_clone_is_detached() {
        let parent = svg_element("g");
        let svg = svg_element("svg");
        let rect = svg_element("rect");
        set_attribute(&rect, "width", "10");
        append_child(&svg, Rc::clone(&rect));
        append_child(&parent, Rc::clone(&svg));

        let copy = deep_clone(&svg);
        assert!(dom_tree::parent(&copy).is_none());
        let copied_rect = element_children(&copy).remove(0);
        set_attribute(&copied_rect, "width", "20");

        assert_eq!(get_attribute(&rect, "width").as_deref(), Some("10"));
        assert!(Rc::ptr_eq(&dom_tree::parent(&copied_rect).unwrap(), &copy));
    }

    #[test]
    fn inline_style_round_trip() {
        let node = svg_element("svg");
        set_attribute(&node, "style", "width: 120px;fill:red");
        if let Node::Element(elem) = &mut *node.borrow_mut() {
            assert_eq!(elem.inline_style_property("WIDTH").as_deref(), Some("120px"));
            elem.set_inline_style_property("background-color", "white");
            elem.set_inline_style_property("fill", "");
        }
        assert_eq!(
            get_attribute(&node, "style").as_deref(),
            Some("width: 120px; background-color: white;")
        );
    }

    #[test]
    fn descendants_are_in_document_order() {
        let root = svg_element("svg");
        let g = svg_element("g");
        let a = svg_element("image");
        let b = svg_element("image");
        append_child(&g, a);
        append_child(&root, Rc::clone(&g));
        append_child(&root, b);
        let tags: Vec<_> = descendants(&root)
            .iter()
            .filter_map(tag_name)
            .collect();
        assert_eq!(tags, vec!["g", "image", "image"]);
        assert_eq!(descendants_by_tag(&root, "image").len(), 2);
    }
}
