//! Minimal XML tree for reading SOAP responses.

use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::error::{MailboxError, Result};

/// An element with namespace prefixes stripped from its name and attributes.
#[derive(Debug, Default, Clone)]
pub(crate) struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Parses a document. The returned node is a synthetic root holding the
    /// top-level element(s).
    pub fn parse(xml: &str) -> Result<XmlNode> {
        let mut reader = Reader::from_str(xml);
        let mut stack = vec![XmlNode {
            name: "#document".to_string(),
            ..XmlNode::default()
        }];

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => stack.push(element(&reader, e)),
                Ok(Event::Empty(ref e)) => {
                    let node = element(&reader, e);
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(node);
                    }
                }
                Ok(Event::End(_)) => {
                    if stack.len() < 2 {
                        return Err(MailboxError::ParseError(
                            "unbalanced closing tag".to_string(),
                        ));
                    }
                    if let (Some(node), Some(parent)) = (stack.pop(), stack.last_mut()) {
                        parent.children.push(node);
                    }
                }
                Ok(Event::Text(e)) => {
                    let raw = String::from_utf8_lossy(&e);
                    let decoded = match unescape(&raw) {
                        Ok(text) => text.into_owned(),
                        Err(_) => raw.to_string(),
                    };
                    if let Some(node) = stack.last_mut() {
                        node.text.push_str(&decoded);
                    }
                }
                Ok(Event::CData(e)) => {
                    if let Some(node) = stack.last_mut() {
                        node.text.push_str(&String::from_utf8_lossy(&e));
                    }
                }
                Ok(Event::GeneralRef(e)) => {
                    let resolved = match e.resolve_char_ref() {
                        Ok(Some(ch)) => Some(ch.to_string()),
                        _ => resolve_predefined_entity(&String::from_utf8_lossy(&e))
                            .map(str::to_string),
                    };
                    if let (Some(text), Some(node)) = (resolved, stack.last_mut()) {
                        node.text.push_str(&text);
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(MailboxError::ParseError(format!("XML: {}", e))),
                _ => {}
            }
        }

        if stack.len() != 1 {
            return Err(MailboxError::ParseError("unterminated XML element".to_string()));
        }
        Ok(stack.remove(0))
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Trimmed text of the first direct child called `name`.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.trim())
    }

    /// All elements called `name` below this node, in document order.
    pub fn descendants<'a>(&'a self, name: &str) -> Vec<&'a XmlNode> {
        let mut found = Vec::new();
        self.collect(name, &mut found);
        found
    }

    pub fn first_descendant(&self, name: &str) -> Option<&XmlNode> {
        self.descendants(name).into_iter().next()
    }

    fn collect<'a>(&'a self, name: &str, found: &mut Vec<&'a XmlNode>) {
        for child in &self.children {
            if child.name == name {
                found.push(child);
            }
            child.collect(name, found);
        }
    }
}

fn element(reader: &Reader<&[u8]>, start: &BytesStart) -> XmlNode {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let attributes = start
        .attributes()
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .map(|v| v.into_owned())
                .unwrap_or_default();
            (key, value)
        })
        .collect();

    XmlNode {
        name,
        attributes,
        ..XmlNode::default()
    }
}
