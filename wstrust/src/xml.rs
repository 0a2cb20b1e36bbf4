//! A small owned, namespace-aware XML element model
//!
//! Protocol documents are built and inspected as trees of [`XmlElement`]. Parsing is backed by
//! the `quick-xml` namespace-aware reader. Each element remembers the namespace declarations it
//! was parsed with, and serialization re-declares any binding that is not in scope, so a subtree
//! lifted out of one document (an issued assertion, say) can be written out on its own or
//! embedded into another document.

use std::fmt;

use quick_xml::{escape::escape, events::Event, name::ResolveResult, NsReader};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const XML_PREFIX: &str = "xml";

/// An error indicating that an XML document could not be read
#[derive(Debug, Error)]
#[error("malformed XML document: {message}")]
pub struct XmlError {
    message: String,
}

impl XmlError {
    pub(crate) fn malformed(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// A namespace-qualified name
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct XmlName {
    namespace: Option<String>,
    prefix: Option<String>,
    local: String,
}

impl XmlName {
    /// Constructs a name bound to `namespace` and written with `prefix`
    pub fn new(
        namespace: impl Into<String>,
        prefix: impl Into<String>,
        local: impl Into<String>,
    ) -> Self {
        Self {
            namespace: Some(namespace.into()),
            prefix: Some(prefix.into()),
            local: local.into(),
        }
    }

    /// Constructs a name that is not in any namespace
    pub fn unqualified(local: impl Into<String>) -> Self {
        Self {
            namespace: None,
            prefix: None,
            local: local.into(),
        }
    }

    /// The namespace URI, if any
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The prefix used when this name was written or parsed
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// The local part of the name
    pub fn local_name(&self) -> &str {
        &self.local
    }

    /// Checks whether this name matches the namespace and local part
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.local == local && self.namespace.as_deref() == Some(namespace)
    }

    fn write_qualified(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{}:{}", prefix, self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// An attribute on an element
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlAttribute {
    name: XmlName,
    value: String,
}

impl XmlAttribute {
    /// The attribute name
    pub fn name(&self) -> &XmlName {
        &self.name
    }

    /// The attribute value
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// A child node of an element
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XmlNode {
    /// A nested element
    Element(XmlElement),
    /// Character data
    Text(String),
}

/// An owned XML element
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlElement {
    name: XmlName,
    attributes: Vec<XmlAttribute>,
    declarations: Vec<(Option<String>, String)>,
    children: Vec<XmlNode>,
}

impl XmlElement {
    /// Constructs an empty element
    pub fn new(name: XmlName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            declarations: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Adds an unqualified attribute
    pub fn with_attribute(self, local: &str, value: impl Into<String>) -> Self {
        self.with_qualified_attribute(XmlName::unqualified(local), value)
    }

    /// Adds a namespace-qualified attribute
    pub fn with_qualified_attribute(mut self, name: XmlName, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Sets an attribute, replacing any existing attribute of the same name
    pub fn set_attribute(&mut self, name: XmlName, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|a| {
            a.name.local == name.local && a.name.namespace == name.namespace
        }) {
            Some(existing) => existing.value = value,
            None => self.attributes.push(XmlAttribute { name, value }),
        }
    }

    /// Declares an extra namespace binding on this element
    ///
    /// Needed only when a namespace is referenced from content, such as a QName-valued
    /// attribute, rather than from element or attribute names.
    pub fn with_declaration(mut self, prefix: Option<&str>, namespace: &str) -> Self {
        self.declarations
            .push((prefix.map(String::from), namespace.to_owned()));
        self
    }

    /// Appends a child element
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.push_child(child);
        self
    }

    /// Appends a child element if one is provided
    pub fn with_optional_child(mut self, child: Option<XmlElement>) -> Self {
        if let Some(child) = child {
            self.push_child(child);
        }
        self
    }

    /// Appends character data
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    /// Appends a child element in place
    pub fn push_child(&mut self, child: XmlElement) {
        self.children.push(XmlNode::Element(child));
    }

    /// The element name
    pub fn name(&self) -> &XmlName {
        &self.name
    }

    /// Checks whether this element has the given namespace and local name
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.name.is(namespace, local)
    }

    /// Looks up an unqualified attribute
    pub fn attribute(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.namespace.is_none() && a.name.local == local)
            .map(|a| a.value.as_str())
    }

    /// Looks up a namespace-qualified attribute
    pub fn attribute_ns(&self, namespace: &str, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.is(namespace, local))
            .map(|a| a.value.as_str())
    }

    /// All attributes of this element
    pub fn attributes(&self) -> &[XmlAttribute] {
        &self.attributes
    }

    /// Child elements, skipping character data
    pub fn children(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// All child nodes
    pub fn nodes(&self) -> &[XmlNode] {
        &self.children
    }

    /// The first child element, if any
    pub fn first_child(&self) -> Option<&XmlElement> {
        self.children().next()
    }

    /// The first child element with the given namespace and local name
    pub fn child(&self, namespace: &str, local: &str) -> Option<&XmlElement> {
        self.children().find(|c| c.is(namespace, local))
    }

    /// The first child element with the given local name, in any namespace
    pub fn child_by_local_name(&self, local: &str) -> Option<&XmlElement> {
        self.children().find(|c| c.name.local == local)
    }

    /// Depth-first search for a descendant (or self) with the given name
    pub fn find(&self, namespace: &str, local: &str) -> Option<&XmlElement> {
        if self.is(namespace, local) {
            return Some(self);
        }
        self.children().find_map(|c| c.find(namespace, local))
    }

    /// The concatenated character data directly under this element
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(t) => Some(t.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    /// Parses a document and returns its root element
    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        let mut reader = NsReader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        loop {
            match reader.read_event().map_err(XmlError::malformed)? {
                Event::Start(start) => {
                    let element = read_start(&reader, &start)?;
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let element = read_start(&reader, &start)?;
                    if let Some(root) = close(&mut stack, element) {
                        return Ok(root);
                    }
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| XmlError::malformed("unbalanced end tag"))?;
                    if let Some(root) = close(&mut stack, element) {
                        return Ok(root);
                    }
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(XmlError::malformed)?;
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlNode::Text(text.into_owned()));
                    }
                }
                Event::CData(data) => {
                    let text =
                        String::from_utf8(data.into_inner().into_owned()).map_err(XmlError::malformed)?;
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlNode::Text(text));
                    }
                }
                Event::Eof => return Err(XmlError::malformed("no root element")),
                _ => {}
            }
        }
    }

    fn write<'a>(
        &'a self,
        scope: &mut Vec<(Option<&'a str>, &'a str)>,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        let mark = scope.len();
        let mut declared: Vec<(Option<&'a str>, &'a str)> = Vec::new();

        let mut bind = |prefix: Option<&'a str>,
                        ns: &'a str,
                        scope: &mut Vec<(Option<&'a str>, &'a str)>| {
            if prefix == Some(XML_PREFIX) || lookup(scope, prefix) == Some(ns) {
                return;
            }
            scope.push((prefix, ns));
            declared.push((prefix, ns));
        };

        for (prefix, ns) in &self.declarations {
            bind(prefix.as_deref(), ns.as_str(), scope);
        }

        match self.name.namespace.as_deref() {
            Some(ns) => bind(self.name.prefix.as_deref(), ns, scope),
            None => {
                if lookup(scope, None).map_or(false, |ns| !ns.is_empty()) {
                    bind(None, "", scope);
                }
            }
        }

        for attr in &self.attributes {
            if let (Some(ns), Some(prefix)) = (attr.name.namespace(), attr.name.prefix()) {
                bind(Some(prefix), ns, scope);
            }
        }

        f.write_str("<")?;
        self.name.write_qualified(f)?;
        for (prefix, ns) in &declared {
            match prefix {
                Some(prefix) => write!(f, " xmlns:{}=\"{}\"", prefix, escape(*ns))?,
                None => write!(f, " xmlns=\"{}\"", escape(*ns))?,
            }
        }
        for attr in &self.attributes {
            f.write_str(" ")?;
            attr.name.write_qualified(f)?;
            write!(f, "=\"{}\"", escape(attr.value.as_str()))?;
        }

        if self.children.is_empty() {
            f.write_str("/>")?;
        } else {
            f.write_str(">")?;
            for node in &self.children {
                match node {
                    XmlNode::Element(e) => e.write(scope, f)?,
                    XmlNode::Text(t) => f.write_str(&escape(t.as_str()))?,
                }
            }
            f.write_str("</")?;
            self.name.write_qualified(f)?;
            f.write_str(">")?;
        }

        scope.truncate(mark);
        Ok(())
    }
}

fn lookup<'a>(scope: &[(Option<&'a str>, &'a str)], prefix: Option<&str>) -> Option<&'a str> {
    scope
        .iter()
        .rev()
        .find(|(p, _)| *p == prefix)
        .map(|(_, ns)| *ns)
}

fn close(stack: &mut Vec<XmlElement>, element: XmlElement) -> Option<XmlElement> {
    match stack.last_mut() {
        Some(parent) => {
            parent.push_child(element);
            None
        }
        None => Some(element),
    }
}

fn utf8(bytes: &[u8]) -> Result<String, XmlError> {
    std::str::from_utf8(bytes)
        .map(String::from)
        .map_err(XmlError::malformed)
}

fn resolved_namespace(resolved: ResolveResult) -> Result<Option<String>, XmlError> {
    match resolved {
        ResolveResult::Bound(ns) => utf8(ns.as_ref()).map(Some),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(XmlError::malformed(format_args!(
            "unbound namespace prefix `{}`",
            String::from_utf8_lossy(&prefix)
        ))),
    }
}

fn read_start(
    reader: &NsReader<&[u8]>,
    start: &quick_xml::events::BytesStart,
) -> Result<XmlElement, XmlError> {
    let qname = start.name();
    let (resolved, local) = reader.resolve_element(qname);
    let name = XmlName {
        namespace: resolved_namespace(resolved)?,
        prefix: qname.prefix().map(|p| utf8(p.as_ref())).transpose()?,
        local: utf8(local.as_ref())?,
    };

    let mut element = XmlElement::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(XmlError::malformed)?;
        let key = attr.key.as_ref();
        let value = attr.unescape_value().map_err(XmlError::malformed)?.into_owned();

        if key == b"xmlns" {
            element.declarations.push((None, value));
        } else if let Some(prefix) = key.strip_prefix(b"xmlns:") {
            element.declarations.push((Some(utf8(prefix)?), value));
        } else {
            let (resolved, local) = reader.resolve_attribute(attr.key);
            let name = XmlName {
                namespace: resolved_namespace(resolved)?,
                prefix: attr.key.prefix().map(|p| utf8(p.as_ref())).transpose()?,
                local: utf8(local.as_ref())?,
            };
            element.attributes.push(XmlAttribute { name, value });
        }
    }

    Ok(element)
}

impl fmt::Display for XmlElement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.write(&mut Vec::new(), f)
    }
}

impl Serialize for XmlElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for XmlElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WST: &str = "http://docs.oasis-open.org/ws-sx/ws-trust/200512";

    #[test]
    fn parses_prefixed_and_default_namespaces() {
        let doc = XmlElement::parse(
            r#"<wst:RequestSecurityTokenResponse xmlns:wst="http://docs.oasis-open.org/ws-sx/ws-trust/200512">
                 <TokenType xmlns="http://docs.oasis-open.org/ws-sx/ws-trust/200512">urn:t</TokenType>
                 <wst:KeySize>128</wst:KeySize>
               </wst:RequestSecurityTokenResponse>"#,
        )
        .unwrap();

        assert!(doc.is(WST, "RequestSecurityTokenResponse"));
        assert_eq!(doc.child(WST, "TokenType").unwrap().text(), "urn:t");
        assert_eq!(doc.child(WST, "KeySize").unwrap().text(), "128");
    }

    #[test]
    fn lifted_subtree_redeclares_its_bindings() {
        let doc = XmlElement::parse(
            r#"<a:Outer xmlns:a="urn:a" xmlns:b="urn:b"><b:Inner b:Id="x1">v &amp; w</b:Inner></a:Outer>"#,
        )
        .unwrap();

        let inner = doc.child("urn:b", "Inner").unwrap().clone();
        let written = inner.to_string();
        assert_eq!(
            written,
            r#"<b:Inner xmlns:b="urn:b" b:Id="x1">v &amp; w</b:Inner>"#
        );

        let reparsed = XmlElement::parse(&written).unwrap();
        assert_eq!(reparsed.attribute_ns("urn:b", "Id"), Some("x1"));
        assert_eq!(reparsed.text(), "v & w");
    }

    #[test]
    fn built_elements_declare_prefixes_once() {
        let root = XmlElement::new(XmlName::new(WST, "wst", "RequestSecurityToken"))
            .with_attribute("Context", "ctx")
            .with_child(
                XmlElement::new(XmlName::new(WST, "wst", "RequestType")).with_text("issue"),
            );

        assert_eq!(
            root.to_string(),
            format!(
                r#"<wst:RequestSecurityToken xmlns:wst="{0}" Context="ctx"><wst:RequestType>issue</wst:RequestType></wst:RequestSecurityToken>"#,
                WST
            )
        );
    }

    #[test]
    fn unqualified_child_of_default_namespace_resets_it() {
        let root = XmlElement::new(XmlName {
            namespace: Some("urn:d".into()),
            prefix: None,
            local: "Root".into(),
        })
        .with_child(XmlElement::new(XmlName::unqualified("Plain")));

        assert_eq!(
            root.to_string(),
            r#"<Root xmlns="urn:d"><Plain xmlns=""/></Root>"#
        );
    }

    #[test]
    fn rejects_unbound_prefix() {
        assert!(XmlElement::parse("<x:Root/>").is_err());
    }

    #[test]
    fn rejects_truncated_document() {
        assert!(XmlElement::parse("<Root><Child>").is_err());
    }
}
