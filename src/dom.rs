//! Small DOM helpers over kuchikiki.
//!
//! Host documents, app containers and fetched fragments are all plain
//! `NodeRef` trees; these helpers cover the handful of operations the
//! loader and the controller need.

use html5ever::{LocalName, Namespace, QualName};
use kuchikiki::traits::TendrilSink;
use kuchikiki::{NodeData, NodeRef};

const HTML_NS: &str = "http://www.w3.org/1999/xhtml";

fn html_name(tag: &str) -> QualName {
    QualName::new(None, Namespace::from(HTML_NS), LocalName::from(tag))
}

pub fn new_element(tag: &str) -> NodeRef {
    NodeRef::new_element(html_name(tag), Vec::new())
}

/// Parses `html` the way assigning `innerHTML` on a detached `div` would,
/// and returns that `div`. `link`, `script` and friends stay where they
/// appear instead of being hoisted into a document head.
pub fn parse_fragment(html: &str) -> NodeRef {
    let parsed = kuchikiki::parse_fragment(html_name("div"), Vec::new()).one(html);
    let root = new_element("div");
    // The fragment parser wraps its output in a synthetic <html> element.
    if let Some(wrapper) = find_element(&parsed, "html") {
        for child in wrapper.children().collect::<Vec<_>>() {
            root.append(child);
        }
    }
    root
}

/// Parses a complete host document.
pub fn parse_document(html: &str) -> NodeRef {
    kuchikiki::parse_html().one(html)
}

pub fn is_element(node: &NodeRef, tag: &str) -> bool {
    node.as_element()
        .is_some_and(|element| (*element.name.local).eq_ignore_ascii_case(tag))
}

pub fn attribute(node: &NodeRef, name: &str) -> Option<String> {
    node.as_element()
        .and_then(|element| element.attributes.borrow().get(name).map(str::to_string))
}

/// Sets `name` on an element node. Non-elements are left unchanged.
pub fn set_attribute(node: &NodeRef, name: &str, value: &str) {
    if let Some(element) = node.as_element() {
        element.attributes.borrow_mut().insert(name, value.to_string());
    }
}

/// First element named `tag` at or below `root`, in tree order.
pub fn find_element(root: &NodeRef, tag: &str) -> Option<NodeRef> {
    root.inclusive_descendants().find(|node| is_element(node, tag))
}

/// Deep copy of `node`. Doctypes, processing instructions and documents
/// have no place inside a container and are skipped.
pub fn deep_clone(node: &NodeRef) -> Option<NodeRef> {
    let copy = match node.data() {
        NodeData::Element(element) => NodeRef::new_element(
            element.name.clone(),
            element.attributes.borrow().map.clone(),
        ),
        NodeData::Text(text) => NodeRef::new_text(text.borrow().clone()),
        NodeData::Comment(text) => NodeRef::new_comment(text.borrow().clone()),
        _ => return None,
    };
    for child in node.children() {
        if let Some(child) = deep_clone(&child) {
            copy.append(child);
        }
    }
    Some(copy)
}

pub fn inner_html(node: &NodeRef) -> String {
    node.children().map(|child| child.to_string()).collect()
}
