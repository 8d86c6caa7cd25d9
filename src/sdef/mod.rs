//! Scripting dictionary (`sdef`) parsing.
//!
//! The XML is read into a small element tree once; the projections in
//! [`projection`] walk that tree.

use std::{
    fmt::Write as _,
    path::Path,
    process::Stdio,
    time::Duration,
};

use quick_xml::{escape::escape, events::Event, Reader};
use tokio::{process::Command, time::timeout};
use tracing::debug;

use crate::error::{Error, Result};

pub mod encoding;
pub mod projection;

pub use encoding::decode_document;
pub use projection::{
    full, overview, query, query_raw, DictionaryView, InterfaceDocument, Projection, QueryMatch,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    fn new(tag: String) -> Self {
        Self { tag, ..Self::default() }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn name(&self) -> Option<&str> {
        self.attr("name")
    }

    pub fn children_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.tag == tag)
    }

    pub fn child(&self, tag: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.tag == tag)
    }

    /// Serialize back to indented XML.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out, 0);
        out
    }

    fn write_xml(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = write!(out, "{}<{}", indent, self.tag);
        for (k, v) in &self.attrs {
            let _ = write!(out, " {}=\"{}\"", k, escape(v.as_str()));
        }
        let text = self.text.trim();
        if self.children.is_empty() && text.is_empty() {
            out.push_str("/>\n");
            return;
        }
        out.push('>');
        if self.children.is_empty() {
            let _ = writeln!(out, "{}</{}>", escape(text), self.tag);
            return;
        }
        out.push('\n');
        if !text.is_empty() {
            let _ = writeln!(out, "{}  {}", indent, escape(text));
        }
        for child in &self.children {
            child.write_xml(out, depth + 1);
        }
        let _ = writeln!(out, "{}</{}>", indent, self.tag);
    }
}

fn xml_err(reader: &Reader<&[u8]>, e: impl std::fmt::Display) -> Error {
    Error::Xml(format!("at byte {}: {}", reader.buffer_position(), e))
}

fn start_element(
    reader: &Reader<&[u8]>,
    e: &quick_xml::events::BytesStart<'_>,
) -> Result<Element> {
    let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut el = Element::new(tag);
    for attr in e.attributes() {
        let attr = attr.map_err(|err| xml_err(reader, err))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|err| xml_err(reader, err))?;
        el.attrs.push((key, value.into_owned()));
    }
    Ok(el)
}

/// Parse a decoded document into its root element.
pub fn parse_document(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader.read_event().map_err(|e| xml_err(&reader, e))?;
        match event {
            Event::Start(e) => stack.push(start_element(&reader, &e)?),
            Event::Empty(e) => {
                let el = start_element(&reader, &e)?;
                attach(&mut stack, &mut root, el, &reader)?;
            }
            Event::End(_) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| xml_err(&reader, "unexpected closing tag"))?;
                attach(&mut stack, &mut root, el, &reader)?;
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    let text = t.unescape().map_err(|e| xml_err(&reader, e))?;
                    top.text.push_str(&text);
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(Error::Xml(format!("unclosed element <{}>", open.tag)));
    }
    root.ok_or_else(|| Error::Xml("document has no root element".into()))
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    el: Element,
    reader: &Reader<&[u8]>,
) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(el);
        return Ok(());
    }
    if root.is_some() {
        return Err(xml_err(reader, "multiple root elements"));
    }
    *root = Some(el);
    Ok(())
}

/// Run the `sdef` tool against an application bundle and return raw bytes.
pub async fn fetch_dictionary(tool: &Path, application: &str, timeout_ms: u64) -> Result<Vec<u8>> {
    let child = Command::new(tool)
        .arg(application)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| Error::Spawn { program: tool.display().to_string(), source })?;

    let out = timeout(Duration::from_millis(timeout_ms), child.wait_with_output())
        .await
        .map_err(|_| Error::DictionaryUnavailable(format!("{} timed out after {} ms", tool.display(), timeout_ms)))??;

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(Error::DictionaryUnavailable(format!(
            "{} {}: {}",
            tool.display(),
            application,
            stderr.trim()
        )));
    }
    debug!(application, bytes = out.stdout.len(), "fetched dictionary");
    Ok(out.stdout)
}

/// Decode, parse and project in one step.
pub fn load_and_project(bytes: &[u8], application: &str, projection: &Projection) -> Result<DictionaryView> {
    let text = decode_document(bytes)?;
    let root = parse_document(&text)?;
    Ok(projection::project(&root, application, projection))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tree() {
        let root = parse_document(
            r#"<?xml version="1.0"?>
            <!DOCTYPE dictionary SYSTEM "file://localhost/System/Library/DTDs/sdef.dtd">
            <dictionary title="Demo">
              <suite name="Standard" code="core">
                <class name="window" code="cwin"><property name="name" type="text"/></class>
                <documentation><![CDATA[a < b]]></documentation>
              </suite>
            </dictionary>"#,
        )
        .unwrap();
        assert_eq!(root.tag, "dictionary");
        assert_eq!(root.attr("title"), Some("Demo"));
        let suite = root.child("suite").unwrap();
        assert_eq!(suite.name(), Some("Standard"));
        assert_eq!(suite.children_named("class").count(), 1);
        assert_eq!(suite.child("documentation").unwrap().text, "a < b");
    }

    #[test]
    fn test_attribute_entities_unescaped() {
        let root = parse_document(r#"<d description="a &amp; b &lt;c&gt;"/>"#).unwrap();
        assert_eq!(root.attr("description"), Some("a & b <c>"));
    }

    #[test]
    fn test_malformed_xml() {
        assert!(matches!(parse_document("<a><b></a>"), Err(Error::Xml(_))));
        assert!(matches!(parse_document("<a>"), Err(Error::Xml(_))));
        assert!(matches!(parse_document(""), Err(Error::Xml(_))));
    }

    #[test]
    fn test_to_xml_round_trips_structure() {
        let root = parse_document(r#"<class name="a&amp;b"><property name="p"/><x>t</x></class>"#).unwrap();
        let xml = root.to_xml();
        assert_eq!(
            xml,
            "<class name=\"a&amp;b\">\n  <property name=\"p\"/>\n  <x>t</x>\n</class>\n"
        );
        assert_eq!(parse_document(&xml).unwrap(), root);
    }
}
