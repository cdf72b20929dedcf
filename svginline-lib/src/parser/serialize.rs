//! XML serialization of DOM subtrees.
//!
//! Output is meant to be read by an XML parser, so every element is closed (`<rect/>` when it has
//! no children) and text is escaped regardless of which element holds it. U+00A0 is written as
//! `&nbsp;`, which the exported document's DOCTYPE declares.

use crate::dom::dom_tree::{Node, NodeRef};

/// Serializes `node` and its subtree.
pub fn serialize_node(node: &NodeRef) -> String {
    let mut out = String::new();
    write_node(node, &mut out);
    out
}

fn write_node(node: &NodeRef, out: &mut String) {
    match &*node.borrow() {
        Node::DocumentRoot(root) => {
            for child in &root.children {
                write_node(child, out);
            }
        }
        Node::Element(elem) => {
            out.push('<');
            out.push_str(&elem.tag);
            for (name, value) in &elem.attributes {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                escape_into(value, true, out);
                out.push('"');
            }
            if elem.children.is_empty() {
                out.push_str("/>");
            } else {
                out.push('>');
                for child in &elem.children {
                    write_node(child, out);
                }
                out.push_str("</");
                out.push_str(&elem.tag);
                out.push('>');
            }
        }
        Node::Text(text) => escape_into(text, false, out),
        Node::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        Node::CData(text) => {
            out.push_str("<![CDATA[");
            // A literal `]]>` would end the section early; split it across two sections.
            out.push_str(&text.replace("]]>", "]]]]><![CDATA[>"));
            out.push_str("]]>");
        }
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}
