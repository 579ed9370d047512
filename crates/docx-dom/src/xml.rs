//! Minimal XML reader/writer for the document parts this crate emits.
//!
//! Handles elements, attributes, character data, the five predefined
//! entities, numeric character references, comments, and the XML
//! declaration. Namespace prefixes are kept as part of the name.

use crate::error::DomError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

impl XmlElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.name == name)
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|n| match n {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// Concatenated character data of this element's direct children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                XmlNode::Text(t) => Some(t.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }
}

/// Parse a complete document and return its root element.
pub fn parse(input: &str, part: &str) -> Result<XmlElement, DomError> {
    let mut parser = Parser {
        bytes: input.as_bytes(),
        pos: 0,
        part,
    };
    parser.skip_prolog()?;
    let root = parser.parse_element()?;
    parser.skip_whitespace_and_comments();
    if parser.pos != parser.bytes.len() {
        return Err(DomError::xml(part, "trailing content after document root"));
    }
    Ok(root)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    part: &'a str,
}

impl<'a> Parser<'a> {
    fn err(&self, detail: impl Into<String>) -> DomError {
        DomError::xml(self.part, detail)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.bytes[self.pos..].starts_with(s.as_bytes())
    }

    fn skip_prolog(&mut self) -> Result<(), DomError> {
        self.skip_whitespace_and_comments();
        if self.starts_with("<?xml") {
            match self.bytes[self.pos..].windows(2).position(|w| w == b"?>") {
                Some(rel) => self.pos += rel + 2,
                None => return Err(self.err("unterminated XML declaration")),
            }
        }
        self.skip_whitespace_and_comments();
        Ok(())
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
                self.pos += 1;
            }
            if self.starts_with("<!--") {
                match self.bytes[self.pos + 4..]
                    .windows(3)
                    .position(|w| w == b"-->")
                {
                    Some(rel) => self.pos += 4 + rel + 3,
                    None => {
                        self.pos = self.bytes.len();
                        return;
                    }
                }
            } else {
                return;
            }
        }
    }

    fn parse_element(&mut self) -> Result<XmlElement, DomError> {
        if self.peek() != Some(b'<') {
            return Err(self.err("expected element start"));
        }
        self.pos += 1;
        let name = self.parse_name()?;
        let mut attrs = Vec::new();

        loop {
            self.skip_spaces();
            match self.peek() {
                Some(b'/') => {
                    self.pos += 1;
                    if self.peek() != Some(b'>') {
                        return Err(self.err(format!("malformed empty-element tag <{name}>")));
                    }
                    self.pos += 1;
                    return Ok(XmlElement {
                        name,
                        attrs,
                        children: Vec::new(),
                    });
                }
                Some(b'>') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {
                    let attr_name = self.parse_name()?;
                    self.skip_spaces();
                    if self.peek() != Some(b'=') {
                        return Err(self.err(format!("attribute {attr_name} missing '='")));
                    }
                    self.pos += 1;
                    self.skip_spaces();
                    let value = self.parse_attr_value()?;
                    attrs.push((attr_name, value));
                }
                None => return Err(self.err(format!("unterminated start tag <{name}>"))),
            }
        }

        let mut children = Vec::new();
        loop {
            if self.starts_with("</") {
                self.pos += 2;
                let close = self.parse_name()?;
                self.skip_spaces();
                if self.peek() != Some(b'>') {
                    return Err(self.err(format!("malformed end tag </{close}>")));
                }
                self.pos += 1;
                if close != name {
                    return Err(self.err(format!("mismatched end tag </{close}> for <{name}>")));
                }
                return Ok(XmlElement {
                    name,
                    attrs,
                    children,
                });
            }
            if self.starts_with("<!--") {
                self.skip_whitespace_and_comments();
                continue;
            }
            match self.peek() {
                Some(b'<') => children.push(XmlNode::Element(self.parse_element()?)),
                Some(_) => {
                    let text = self.parse_text()?;
                    children.push(XmlNode::Text(text));
                }
                None => return Err(self.err(format!("unterminated element <{name}>"))),
            }
        }
    }

    fn parse_name(&mut self) -> Result<String, DomError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || matches!(b, b':' | b'_' | b'-' | b'.') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.err("expected a name"));
        }
        // Safe: only ASCII bytes were consumed.
        Ok(String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned())
    }

    fn parse_attr_value(&mut self) -> Result<String, DomError> {
        let quote = match self.peek() {
            Some(q @ (b'"' | b'\'')) => q,
            _ => return Err(self.err("attribute value must be quoted")),
        };
        self.pos += 1;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == quote {
                let raw = &self.bytes[start..self.pos];
                self.pos += 1;
                let raw = std::str::from_utf8(raw)
                    .map_err(|_| self.err("attribute value is not UTF-8"))?;
                return unescape(raw).map_err(|e| self.err(e));
            }
            self.pos += 1;
        }
        Err(self.err("unterminated attribute value"))
    }

    fn parse_text(&mut self) -> Result<String, DomError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'<' {
                break;
            }
            self.pos += 1;
        }
        let raw = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| self.err("character data is not UTF-8"))?;
        unescape(raw).map_err(|e| self.err(e))
    }

    fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }
}

fn unescape(raw: &str) -> Result<String, String> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let end = tail
            .find(';')
            .ok_or_else(|| "unterminated entity reference".to_string())?;
        let entity = &tail[1..end];
        match entity {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ => {
                let code = entity
                    .strip_prefix("#x")
                    .map(|h| u32::from_str_radix(h, 16))
                    .or_else(|| entity.strip_prefix('#').map(|d| d.parse::<u32>()))
                    .ok_or_else(|| format!("unknown entity &{entity};"))?
                    .map_err(|_| format!("invalid character reference &{entity};"))?;
                out.push(
                    char::from_u32(code)
                        .ok_or_else(|| format!("invalid character reference &{entity};"))?,
                );
            }
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

pub fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

pub fn escape_attr(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_and_attrs() {
        let root = parse(
            r#"<?xml version="1.0"?><w:body><w:p w:id="a1"><w:t xml:space="preserve"> hi </w:t></w:p></w:body>"#,
            "word/document.xml",
        )
        .unwrap();
        assert_eq!(root.name, "w:body");
        let p = root.child("w:p").unwrap();
        assert_eq!(p.attr("w:id"), Some("a1"));
        assert_eq!(p.child("w:t").unwrap().text(), " hi ");
    }

    #[test]
    fn decodes_entities() {
        let root = parse("<t a=\"x&quot;y\">a &amp; b &lt; &#65;</t>", "t.xml").unwrap();
        assert_eq!(root.attr("a"), Some("x\"y"));
        assert_eq!(root.text(), "a & b < A");
    }

    #[test]
    fn rejects_mismatched_tags() {
        assert!(parse("<a><b></a></b>", "t.xml").is_err());
        assert!(parse("<a>", "t.xml").is_err());
    }

    #[test]
    fn escape_round_trip() {
        let mut s = String::new();
        escape_text("a<b&c>d", &mut s);
        assert_eq!(s, "a&lt;b&amp;c&gt;d");
        let root = parse(&format!("<t>{s}</t>"), "t.xml").unwrap();
        assert_eq!(root.text(), "a<b&c>d");
    }

    #[test]
    fn skips_comments() {
        let root = parse("<!-- head --><a><!-- mid --><b/></a>", "t.xml").unwrap();
        assert_eq!(root.elements().count(), 1);
    }
}
