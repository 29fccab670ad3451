//! # XML Helpers
//!
//! A writer that emits canonical XML directly and a few readers built on
//! quick-xml for the authority's answers.
//!
//! ## Why Write Canonically
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  XmlWriter output                     C14N 1.0 requires                 │
//! │  ────────────────                     ─────────────────                 │
//! │  no XML declaration                   declaration removed               │
//! │  <a></a>, never <a/>                  empty elements expanded           │
//! │  attributes in call order             attributes sorted (callers pass   │
//! │                                       them sorted)                      │
//! │  &amp; &lt; &gt; in text              same escaping                     │
//! │  no whitespace between elements       whitespace is significant         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The signed element can therefore be digested as written, with only the
//! inherited namespace declaration added.

use quick_xml::events::Event;
use quick_xml::Reader;

// =============================================================================
// Writer
// =============================================================================

/// Builds canonical XML in a string.
#[derive(Debug, Default)]
pub struct XmlWriter {
    buf: String,
}

impl XmlWriter {
    pub fn new() -> Self {
        XmlWriter::default()
    }

    /// Opens an element. Attributes are written in the given order.
    pub fn open(&mut self, name: &str, attributes: &[(&str, &str)]) -> &mut Self {
        self.buf.push('<');
        self.buf.push_str(name);
        for (key, value) in attributes {
            self.buf.push(' ');
            self.buf.push_str(key);
            self.buf.push_str("=\"");
            escape_attribute_into(&mut self.buf, value);
            self.buf.push('"');
        }
        self.buf.push('>');
        self
    }

    pub fn close(&mut self, name: &str) -> &mut Self {
        self.buf.push_str("</");
        self.buf.push_str(name);
        self.buf.push('>');
        self
    }

    /// Writes `<name>text</name>`.
    pub fn leaf(&mut self, name: &str, text: &str) -> &mut Self {
        self.open(name, &[]);
        escape_text_into(&mut self.buf, text);
        self.close(name)
    }

    /// Writes the leaf only when a value is present and not blank.
    pub fn opt_leaf(&mut self, name: &str, text: Option<&str>) -> &mut Self {
        if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
            self.leaf(name, text);
        }
        self
    }

    /// Appends markup that is already canonical.
    pub fn raw(&mut self, markup: &str) -> &mut Self {
        self.buf.push_str(markup);
        self
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

fn escape_text_into(buf: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '>' => buf.push_str("&gt;"),
            '\r' => buf.push_str("&#xD;"),
            other => buf.push(other),
        }
    }
}

fn escape_attribute_into(buf: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '"' => buf.push_str("&quot;"),
            '\t' => buf.push_str("&#x9;"),
            '\n' => buf.push_str("&#xA;"),
            '\r' => buf.push_str("&#xD;"),
            other => buf.push(other),
        }
    }
}

/// Escapes text content.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    escape_text_into(&mut out, text);
    out
}

// =============================================================================
// Readers
// =============================================================================

/// Returns the first element with the given local name, markup included,
/// exactly as it appears in `xml`.
///
/// Used to digest the signed element and to keep the authority's
/// `protNFe` byte-for-byte.
pub fn extract_element<'a>(xml: &'a str, local_name: &str) -> Option<&'a str> {
    let mut reader = Reader::from_str(xml);
    // `xml` may be a fragment that starts after its parent opened
    reader.config_mut().check_end_names = false;
    let mut start: Option<usize> = None;
    let mut depth = 0usize;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if start.is_some() {
                    if e.local_name().as_ref() == local_name.as_bytes() {
                        depth += 1;
                    }
                } else if e.local_name().as_ref() == local_name.as_bytes() {
                    start = Some(before);
                    depth = 1;
                }
            }
            Ok(Event::End(e)) => {
                if let Some(from) = start {
                    if e.local_name().as_ref() == local_name.as_bytes() {
                        depth -= 1;
                        if depth == 0 {
                            let to = reader.buffer_position() as usize;
                            return xml.get(from..to);
                        }
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                if start.is_none() && e.local_name().as_ref() == local_name.as_bytes() {
                    let to = reader.buffer_position() as usize;
                    return xml.get(before..to);
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Returns every element with the given local name, in document order.
/// Nested elements of the same name are not returned separately.
pub fn extract_all<'a>(xml: &'a str, local_name: &str) -> Vec<&'a str> {
    let mut found = Vec::new();
    let mut rest = xml;
    while let Some(element) = extract_element(rest, local_name) {
        found.push(element);
        // `element` is a subslice of `rest`
        let offset = element.as_ptr() as usize - rest.as_ptr() as usize + element.len();
        rest = &rest[offset..];
    }
    found
}

/// Unescaped text of the first element with the given local name.
pub fn text_of(xml: &str, local_name: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut inside = false;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if !inside && e.local_name().as_ref() == local_name.as_bytes() => {
                inside = true;
            }
            Ok(Event::Text(t)) if inside => {
                text.push_str(&t.unescape().ok()?);
            }
            Ok(Event::CData(c)) if inside => {
                text.push_str(std::str::from_utf8(&c).ok()?);
            }
            Ok(Event::End(e)) if inside && e.local_name().as_ref() == local_name.as_bytes() => {
                return Some(text);
            }
            Ok(Event::Empty(e)) if !inside && e.local_name().as_ref() == local_name.as_bytes() => {
                return Some(String::new());
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Value of an attribute on the first element with the given local name.
pub fn attribute_of(xml: &str, local_name: &str, attribute: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == local_name.as_bytes() =>
            {
                return e
                    .try_get_attribute(attribute)
                    .ok()
                    .flatten()
                    .and_then(|a| a.unescape_value().ok())
                    .map(|v| v.into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Adds `xmlns="{namespace}"` to the root start tag of `element`.
///
/// The namespace declaration goes before the other attributes, which is
/// where C14N places it.
pub fn with_namespace(element: &str, namespace: &str) -> Option<String> {
    let name_end = element
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == ' ' || *c == '>' || *c == '/')
        .map(|(i, _)| i)?;
    let mut out = String::with_capacity(element.len() + namespace.len() + 10);
    out.push_str(&element[..name_end]);
    out.push_str(" xmlns=\"");
    out.push_str(namespace);
    out.push('"');
    out.push_str(&element[name_end..]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_is_canonical() {
        let mut w = XmlWriter::new();
        w.open("root", &[("Id", "a&b"), ("versao", "4.00")])
            .leaf("x", "1 < 2 & 3 > 2")
            .leaf("empty", "")
            .opt_leaf("absent", None)
            .opt_leaf("blank", Some("  "))
            .close("root");
        assert_eq!(
            w.finish(),
            "<root Id=\"a&amp;b\" versao=\"4.00\"><x>1 &lt; 2 &amp; 3 &gt; 2</x><empty></empty></root>"
        );
    }

    #[test]
    fn test_extract_element_is_verbatim() {
        let xml = "<a><b x=\"1\"><c>t</c><b>inner</b></b><d/></a>";
        assert_eq!(
            extract_element(xml, "b"),
            Some("<b x=\"1\"><c>t</c><b>inner</b></b>")
        );
        assert_eq!(extract_element(xml, "d"), Some("<d/>"));
        assert_eq!(extract_element(xml, "z"), None);
    }

    #[test]
    fn test_extract_element_ignores_prefixes() {
        let xml = "<soap:Envelope xmlns:soap=\"s\"><soap:Body><r><cStat>104</cStat></r></soap:Body></soap:Envelope>";
        assert_eq!(extract_element(xml, "Body"), Some("<soap:Body><r><cStat>104</cStat></r></soap:Body>"));
    }

    #[test]
    fn test_extract_all() {
        let xml = "<r><det n=\"1\"><v>1</v></det><det n=\"2\"><v>2</v></det></r>";
        let dets = extract_all(xml, "det");
        assert_eq!(dets.len(), 2);
        assert_eq!(text_of(dets[1], "v").as_deref(), Some("2"));
    }

    #[test]
    fn test_text_and_attribute() {
        let xml = "<r><infNFe Id=\"NFe123\"><xNome>A &amp; B</xNome></infNFe></r>";
        assert_eq!(text_of(xml, "xNome").as_deref(), Some("A & B"));
        assert_eq!(attribute_of(xml, "infNFe", "Id").as_deref(), Some("NFe123"));
        assert_eq!(text_of(xml, "missing"), None);
    }

    #[test]
    fn test_with_namespace() {
        assert_eq!(
            with_namespace("<infNFe Id=\"x\"><a></a></infNFe>", "urn:n").as_deref(),
            Some("<infNFe xmlns=\"urn:n\" Id=\"x\"><a></a></infNFe>")
        );
        assert_eq!(
            with_namespace("<SignedInfo><a></a></SignedInfo>", "urn:d").as_deref(),
            Some("<SignedInfo xmlns=\"urn:d\"><a></a></SignedInfo>")
        );
    }
}
