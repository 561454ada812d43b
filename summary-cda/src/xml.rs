//! Minimal owned XML tree built from `quick-xml` events.
//!
//! Each element keeps its name three ways: the prefix as written, the local
//! name, and the namespace URI the prefix resolved to in scope. The locator
//! needs all three because documents in the wild declare namespaces in every
//! possible way.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use summary_core::{SummaryError, SummaryResult};

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementName {
    pub prefix: Option<String>,
    pub local: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub prefix: Option<String>,
    pub local: String,
    pub value: String,
}

/// `xmlns` / `xmlns:p` declaration carried by an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDecl {
    pub prefix: Option<String>,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    pub name: ElementName,
    pub attributes: Vec<XmlAttribute>,
    pub namespaces: Vec<NamespaceDecl>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn local_name(&self) -> &str {
        &self.name.local
    }

    /// Name as written in the document (`prefix:local` or `local`).
    pub fn qualified_name(&self) -> String {
        match &self.name.prefix {
            Some(prefix) => format!("{prefix}:{}", self.name.local),
            None => self.name.local.clone(),
        }
    }

    /// `{namespace}local`, or just `local` when the element has no namespace.
    pub fn clark_name(&self) -> String {
        match &self.name.namespace {
            Some(uri) => format!("{{{uri}}}{}", self.name.local),
            None => self.name.local.clone(),
        }
    }

    /// Unprefixed attribute by local name.
    pub fn attribute(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.prefix.is_none() && attr.local == local)
            .map(|attr| attr.value.as_str())
    }

    /// Unprefixed attribute, trimmed, `None` when blank.
    pub fn attribute_text(&self, local: &str) -> Option<String> {
        self.attribute(local)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    /// Prefixed attribute by local name, whatever the prefix (e.g. `xsi:type`).
    pub fn prefixed_attribute(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.prefix.is_some() && attr.local == local)
            .map(|attr| attr.value.as_str())
    }

    /// `xsi:type` without any prefix on the value (`hl7:PQ` becomes `PQ`).
    pub fn xsi_type(&self) -> Option<&str> {
        let value = self.prefixed_attribute("type")?.trim();
        Some(value.rsplit(':').next().unwrap_or(value))
    }

    /// Direct child elements.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    /// All descendant elements in document order, excluding `self`.
    pub fn descendants(&self) -> Vec<&XmlElement> {
        let mut out = Vec::new();
        collect_descendants(self, &mut out);
        out
    }

    /// Direct text content, trimmed. `None` when there is none.
    pub fn own_text(&self) -> Option<String> {
        let text: String = self
            .children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(text) => Some(text.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect();
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// All text below this element with whitespace collapsed.
    pub fn flattened_text(&self) -> String {
        let mut parts = Vec::new();
        collect_text(self, &mut parts);
        parts
            .iter()
            .flat_map(|part| part.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn collect_descendants<'a>(element: &'a XmlElement, out: &mut Vec<&'a XmlElement>) {
    for child in element.elements() {
        out.push(child);
        collect_descendants(child, out);
    }
}

fn collect_text<'a>(element: &'a XmlElement, out: &mut Vec<&'a str>) {
    for node in &element.children {
        match node {
            XmlNode::Text(text) => out.push(text),
            XmlNode::Element(child) => collect_text(child, out),
        }
    }
}

/// Parse a document into a tree and return its root element.
pub fn parse_xml(xml: &str) -> SummaryResult<XmlElement> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(err) => {
                return Err(SummaryError::malformed_xml(format!(
                    "{err} (near byte {})",
                    reader.buffer_position()
                )))
            }
        };

        match event {
            Event::Start(start) => {
                let element = open_element(&start, &stack)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = open_element(&start, &stack)?;
                attach(element, &mut stack, &mut root)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| SummaryError::malformed_xml("unexpected closing tag"))?;
                attach(element, &mut stack, &mut root)?;
            }
            Event::Text(text) => {
                let value = match text.unescape() {
                    Ok(value) => value.into_owned(),
                    // Narrative blocks sometimes carry HTML entities; keep them raw.
                    Err(_) => String::from_utf8_lossy(&text).into_owned(),
                };
                push_text(value, &mut stack);
            }
            Event::CData(data) => {
                let value = String::from_utf8_lossy(&data.into_inner()).into_owned();
                push_text(value, &mut stack);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(SummaryError::malformed_xml(format!(
            "element <{}> is never closed",
            open.qualified_name()
        )));
    }

    root.ok_or_else(|| SummaryError::malformed_xml("document has no root element"))
}

fn push_text(value: String, stack: &mut [XmlElement]) {
    if value.trim().is_empty() {
        return;
    }
    if let Some(parent) = stack.last_mut() {
        parent.children.push(XmlNode::Text(value));
    }
}

fn attach(
    element: XmlElement,
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
) -> SummaryResult<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(XmlNode::Element(element));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(SummaryError::malformed_xml(
            "more than one root element in document",
        )),
    }
}

fn open_element(start: &BytesStart<'_>, ancestors: &[XmlElement]) -> SummaryResult<XmlElement> {
    let raw_name = decode(start.name().as_ref())?;
    let (prefix, local) = split_name(&raw_name);

    let mut attributes = Vec::new();
    let mut namespaces = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|err| SummaryError::malformed_xml(err.to_string()))?;
        let key = decode(attr.key.as_ref())?;
        let value = attr
            .unescape_value()
            .map_err(|err| SummaryError::malformed_xml(err.to_string()))?
            .into_owned();
        match split_name(&key) {
            (None, name) if name == "xmlns" => namespaces.push(NamespaceDecl {
                prefix: None,
                uri: value,
            }),
            (Some(ns), name) if ns == "xmlns" => namespaces.push(NamespaceDecl {
                prefix: Some(name),
                uri: value,
            }),
            (prefix, local) => attributes.push(XmlAttribute {
                prefix,
                local,
                value,
            }),
        }
    }

    let namespace = resolve_namespace(prefix.as_deref(), &namespaces, ancestors);
    Ok(XmlElement {
        name: ElementName {
            prefix,
            local,
            namespace,
        },
        attributes,
        namespaces,
        children: Vec::new(),
    })
}

/// Innermost declaration wins. Undeclared prefixes resolve to no namespace
/// rather than failing; the locator can still match them by prefix.
fn resolve_namespace(
    prefix: Option<&str>,
    own: &[NamespaceDecl],
    ancestors: &[XmlElement],
) -> Option<String> {
    if prefix == Some("xml") {
        return Some(XML_NAMESPACE.to_string());
    }
    let declared = std::iter::once(own)
        .chain(ancestors.iter().rev().map(|element| element.namespaces.as_slice()))
        .flat_map(|decls| decls.iter())
        .find(|decl| decl.prefix.as_deref() == prefix)?;
    (!declared.uri.is_empty()).then(|| declared.uri.clone())
}

fn split_name(raw: &str) -> (Option<String>, String) {
    match raw.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
        None => (None, raw.to_string()),
    }
}

fn decode(bytes: &[u8]) -> SummaryResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|err| SummaryError::malformed_xml(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_prefixes_in_scope() {
        let root = parse_xml(
            r#"<ClinicalDocument xmlns="urn:hl7-org:v3" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
                 <component><section xmlns:x="urn:hl7-org:v3"><x:title>Allergies</x:title></section></component>
                 <value xsi:type="hl7:PQ" value="1"/>
               </ClinicalDocument>"#,
        )
        .unwrap();

        assert_eq!(root.clark_name(), "{urn:hl7-org:v3}ClinicalDocument");
        let title = root
            .descendants()
            .into_iter()
            .find(|element| element.local_name() == "title")
            .unwrap();
        assert_eq!(title.qualified_name(), "x:title");
        assert_eq!(title.name.namespace.as_deref(), Some("urn:hl7-org:v3"));
        assert_eq!(title.own_text().as_deref(), Some("Allergies"));

        let value = root.elements().find(|e| e.local_name() == "value").unwrap();
        assert_eq!(value.xsi_type(), Some("PQ"));
        assert_eq!(value.attribute("value"), Some("1"));
    }

    #[test]
    fn rejects_unbalanced_documents() {
        assert!(matches!(
            parse_xml("<ClinicalDocument><title></ClinicalDocument>"),
            Err(SummaryError::MalformedInput { .. })
        ));
        assert!(parse_xml("   ").is_err());
    }
}
