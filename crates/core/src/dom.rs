//! Thin helpers over the `kuchiki` DOM used by the rewriting passes.

use html5ever::{LocalName, Namespace, QualName};
use kuchiki::traits::TendrilSink;
use kuchiki::{Attribute, ExpandedName, NodeRef};

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Parse a full HTML document.
pub fn parse_document(html: &str) -> NodeRef {
    kuchiki::parse_html().one(html)
}

/// Serialize a node (document or element) back to markup.
pub fn serialize(node: &NodeRef) -> String {
    node.to_string()
}

/// Serialize only the children of a node.
pub fn inner_html(node: &NodeRef) -> String {
    node.children().map(|child| child.to_string()).collect()
}

/// Create a detached HTML element with the given attributes.
pub fn new_element(tag: &str, attributes: &[(&str, String)]) -> NodeRef {
    let name = QualName::new(None, Namespace::from(HTML_NAMESPACE), LocalName::from(tag));
    let attrs = attributes.iter().map(|(key, value)| {
        (
            ExpandedName::new(Namespace::from(""), LocalName::from(*key)),
            Attribute {
                prefix: None,
                value: value.clone(),
            },
        )
    });
    NodeRef::new_element(name, attrs)
}

/// Lowercased local tag name, or `None` for non-element nodes.
pub fn tag_name(node: &NodeRef) -> Option<String> {
    node.as_element()
        .map(|el| el.name.local.as_ref().to_ascii_lowercase())
}

pub fn get_attr(node: &NodeRef, name: &str) -> Option<String> {
    node.as_element()
        .and_then(|el| el.attributes.borrow().get(name).map(str::to_string))
}

pub fn set_attr(node: &NodeRef, name: &str, value: impl Into<String>) {
    if let Some(el) = node.as_element() {
        el.attributes.borrow_mut().insert(name, value.into());
    }
}

pub fn remove_attr(node: &NodeRef, name: &str) {
    if let Some(el) = node.as_element() {
        el.attributes.borrow_mut().remove(name);
    }
}

/// Names of all attributes on an element.
pub fn attr_names(node: &NodeRef) -> Vec<String> {
    node.as_element()
        .map(|el| {
            el.attributes
                .borrow()
                .map
                .keys()
                .map(|name| name.local.as_ref().to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Element children, snapshotted so the caller may mutate the tree.
pub fn element_children(node: &NodeRef) -> Vec<NodeRef> {
    node.children().filter(|c| c.as_element().is_some()).collect()
}

/// All elements under `node` (inclusive), in document order, snapshotted.
pub fn elements(node: &NodeRef) -> Vec<NodeRef> {
    node.inclusive_descendants()
        .filter(|n| n.as_element().is_some())
        .collect()
}

/// Elements matching a CSS selector, snapshotted. Invalid selectors match
/// nothing.
pub fn select_all(node: &NodeRef, selector: &str) -> Vec<NodeRef> {
    node.select(selector)
        .map(|found| found.map(|el| el.as_node().clone()).collect())
        .unwrap_or_default()
}

pub fn select_first(node: &NodeRef, selector: &str) -> Option<NodeRef> {
    node.select_first(selector).ok().map(|el| el.as_node().clone())
}

/// Move every child of `from` to the end of `to`.
pub fn move_children(from: &NodeRef, to: &NodeRef) {
    while let Some(child) = from.first_child() {
        to.append(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_element_and_serialize() {
        let td = new_element("td", &[("style", "width: 10px".to_string())]);
        assert_eq!(serialize(&td), r#"<td style="width: 10px"></td>"#);
    }

    #[test]
    fn test_attr_helpers() {
        let doc = parse_document(r#"<div id="a" data-x="1">hi</div>"#);
        let div = select_first(&doc, "div").unwrap();
        assert_eq!(get_attr(&div, "id").as_deref(), Some("a"));
        set_attr(&div, "class", "c");
        remove_attr(&div, "data-x");
        let mut names = attr_names(&div);
        names.sort();
        assert_eq!(names, vec!["class", "id"]);
    }

    #[test]
    fn test_move_children() {
        let doc = parse_document("<div id=a><b>1</b>2</div><div id=b></div>");
        let a = select_first(&doc, "#a").unwrap();
        let b = select_first(&doc, "#b").unwrap();
        move_children(&a, &b);
        assert_eq!(inner_html(&a), "");
        assert_eq!(inner_html(&b), "<b>1</b>2");
    }

    #[test]
    fn test_select_all_invalid_selector() {
        let doc = parse_document("<p>x</p>");
        assert!(select_all(&doc, "p[").is_empty());
        assert_eq!(select_all(&doc, "p").len(), 1);
    }
}
