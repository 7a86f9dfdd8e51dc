use std::collections::BTreeMap;

use qti_core::{QtiError, SourceLocation, SourceSpan};
use roxmltree::{Document, Node, NodeType};

#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    pub root: XmlElementNode,
}

/// Owned element tree. QTI documents are namespaced, so `name` is the
/// namespace-stripped local name; inline character data is folded into
/// `text` because rule elements like `<baseValue>` carry their payload
/// as text content.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElementNode {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<XmlElementNode>,
    pub text: String,
    pub location: SourceSpan,
}

impl XmlElementNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElementNode> {
        self.children.iter()
    }

    pub fn first_child_element(&self) -> Option<&XmlElementNode> {
        self.children.first()
    }
}

pub fn parse_xml_document(source: &str) -> Result<XmlDocument, QtiError> {
    let document = Document::parse(source)
        .map_err(|error| QtiError::new("XML_PARSE_ERROR", error.to_string()))?;

    let Some(root) = document.root().children().find(|node| node.is_element()) else {
        return Err(QtiError::new(
            "XML_PARSE_ERROR",
            "XML document must contain a root element.",
        ));
    };

    Ok(XmlDocument {
        root: parse_element(&document, root),
    })
}

fn parse_element(document: &Document<'_>, node: Node<'_, '_>) -> XmlElementNode {
    let mut attributes = BTreeMap::new();
    for attribute in node.attributes() {
        attributes.insert(attribute.name().to_string(), attribute.value().to_string());
    }

    let mut children = Vec::new();
    let mut text = String::new();
    for child in node.children() {
        match child.node_type() {
            NodeType::Element => children.push(parse_element(document, child)),
            NodeType::Text => {
                text.push_str(child.text().unwrap_or_default());
            }
            _ => {}
        }
    }

    XmlElementNode {
        name: node.tag_name().name().to_string(),
        attributes,
        children,
        text,
        location: node_span(document, node.range().start, node.range().end),
    }
}

fn node_span(document: &Document<'_>, start: usize, end: usize) -> SourceSpan {
    let start_pos = document.text_pos_at(start);
    let end_pos = document.text_pos_at(end);
    SourceSpan {
        start: SourceLocation {
            line: start_pos.row as usize,
            column: start_pos.col as usize,
        },
        end: SourceLocation {
            line: end_pos.row as usize,
            column: end_pos.col as usize,
        },
    }
}
