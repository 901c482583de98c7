//! Parse and serialize record files.

use crate::document::{Document, RecordChild};
use crate::error::CodecError;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;
use tracing::debug;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const INDENT: &str = "  ";

/// Parse a record file.
///
/// Zero, one or many children all land in `children`. Unknown elements are
/// skipped; a child missing one of its fields gets an empty string for it.
pub fn parse<T: RecordChild>(bytes: &[u8]) -> Result<Document<T>, CodecError> {
    let text = decode_text(bytes);
    let mut reader = Reader::from_str(&text);
    let mut state = ParseState::<T>::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => state.open(element_name(e.name().as_ref()))?,
            Ok(Event::Empty(e)) => {
                state.open(element_name(e.name().as_ref()))?;
                state.close()?;
            }
            Ok(Event::End(_)) => state.close()?,
            Ok(Event::Text(t)) => {
                let value = t.unescape().map_err(|e| CodecError::Xml(e.to_string()))?;
                state.text(&value);
            }
            Ok(Event::CData(c)) => {
                let raw = c.into_inner();
                state.text(&String::from_utf8_lossy(&raw));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(CodecError::Xml(e.to_string())),
        }
    }

    state.finish()
}

/// Serialize a document in the canonical layout.
pub fn serialize<T: RecordChild>(doc: &Document<T>) -> Vec<u8> {
    let mut out = String::with_capacity(64 + doc.children.len() * 96);
    out.push('<');
    out.push_str(T::ROOT);
    out.push_str(">\n");

    if let Some(title) = &doc.title {
        push_leaf(&mut out, 1, "Title", title);
    }
    if let Some(prompt) = &doc.prompt {
        push_leaf(&mut out, 1, "Prompt", prompt);
    }

    for child in &doc.children {
        out.push_str(INDENT);
        out.push('<');
        out.push_str(T::ELEMENT);
        out.push_str(">\n");
        for (element, value) in T::FIELDS.iter().zip(child.fields()) {
            push_leaf(&mut out, 2, element, value);
        }
        out.push_str(INDENT);
        out.push_str("</");
        out.push_str(T::ELEMENT);
        out.push_str(">\n");
    }

    out.push_str("</");
    out.push_str(T::ROOT);
    out.push_str(">\n");
    out.into_bytes()
}

/// Escape `&`, `<` and `>` for element text.
pub fn escape_text(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '<', '>']) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 8);
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

fn push_leaf(out: &mut String, depth: usize, element: &str, value: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push('<');
    out.push_str(element);
    out.push('>');
    out.push_str(&escape_text(value));
    out.push_str("</");
    out.push_str(element);
    out.push_str(">\n");
}

fn element_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

/// Older phone tooling wrote ISO-8859-1; anything that is not valid UTF-8 is
/// read as Latin-1.
fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => {
            debug!("Record is not valid UTF-8, decoding as Latin-1");
            Cow::Owned(bytes.iter().map(|&b| b as char).collect())
        }
    }
}

struct ParseState<T> {
    stack: Vec<String>,
    text: String,
    title: Option<String>,
    prompt: Option<String>,
    fields: Option<[Option<String>; 2]>,
    children: Vec<T>,
    root_closed: bool,
}

impl<T: RecordChild> ParseState<T> {
    fn new() -> Self {
        Self {
            stack: Vec::new(),
            text: String::new(),
            title: None,
            prompt: None,
            fields: None,
            children: Vec::new(),
            root_closed: false,
        }
    }

    fn open(&mut self, name: String) -> Result<(), CodecError> {
        if self.stack.is_empty() {
            if self.root_closed {
                return Err(CodecError::TrailingContent(name));
            }
            if name != T::ROOT {
                return Err(CodecError::UnexpectedRoot {
                    expected: T::ROOT,
                    found: name,
                });
            }
        } else if self.stack.len() == 1 && name == T::ELEMENT {
            self.fields = Some([None, None]);
        }
        self.stack.push(name);
        self.text.clear();
        Ok(())
    }

    fn text(&mut self, value: &str) {
        if self.stack.len() >= 2 {
            self.text.push_str(value);
        }
    }

    fn close(&mut self) -> Result<(), CodecError> {
        let name = self
            .stack
            .pop()
            .ok_or_else(|| CodecError::Xml("closing tag without an open element".to_string()))?;
        let value = std::mem::take(&mut self.text);

        match self.stack.len() {
            0 => self.root_closed = true,
            1 => match name.as_str() {
                "Title" => self.title = Some(value),
                "Prompt" => self.prompt = Some(value),
                element if element == T::ELEMENT => {
                    if let Some([first, second]) = self.fields.take() {
                        self.children.push(T::from_fields(
                            first.unwrap_or_default(),
                            second.unwrap_or_default(),
                        ));
                    }
                }
                other => debug!(element = other, root = T::ROOT, "Ignoring unknown element"),
            },
            2 if self.stack[1] == T::ELEMENT => {
                if let Some(fields) = self.fields.as_mut() {
                    if name == T::FIELDS[0] {
                        fields[0] = Some(value);
                    } else if name == T::FIELDS[1] {
                        fields[1] = Some(value);
                    } else {
                        debug!(element = %name, parent = T::ELEMENT, "Ignoring unknown field");
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> Result<Document<T>, CodecError> {
        if let Some(open) = self.stack.last() {
            return Err(CodecError::Truncated(open.clone()));
        }
        if !self.root_closed {
            return Err(CodecError::MissingRoot(T::ROOT));
        }
        Ok(Document {
            title: self.title,
            prompt: self.prompt,
            children: self.children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Directory, DirectoryEntry, Menu, MenuItem};

    #[test]
    fn serialize_uses_canonical_layout() {
        let mut doc = Directory::new("Bavaro");
        doc.children.push(DirectoryEntry::new("Caja 1", "2201"));
        let bytes = serialize(&doc);
        let expected = "<CiscoIPPhoneDirectory>\n  <Title>Bavaro</Title>\n  <DirectoryEntry>\n    <Name>Caja 1</Name>\n    <Telephone>2201</Telephone>\n  </DirectoryEntry>\n</CiscoIPPhoneDirectory>\n";
        assert_eq!(String::from_utf8(bytes).unwrap(), expected);
    }

    #[test]
    fn serialize_empty_document() {
        let doc = Menu::default();
        assert_eq!(
            String::from_utf8(serialize(&doc)).unwrap(),
            "<CiscoIPPhoneMenu>\n</CiscoIPPhoneMenu>\n"
        );
    }

    #[test]
    fn parse_accepts_zero_one_and_many_children() {
        let none = "<CiscoIPPhoneMenu><Title>Vacio</Title></CiscoIPPhoneMenu>";
        let one = "<CiscoIPPhoneMenu><MenuItem><Name>A</Name><URL>u1</URL></MenuItem></CiscoIPPhoneMenu>";
        let many = "<CiscoIPPhoneMenu>\
            <MenuItem><Name>A</Name><URL>u1</URL></MenuItem>\
            <MenuItem><Name>B</Name><URL>u2</URL></MenuItem>\
            <MenuItem><Name>C</Name><URL>u3</URL></MenuItem>\
            </CiscoIPPhoneMenu>";

        let parsed: Menu = parse(none.as_bytes()).unwrap();
        assert!(parsed.is_empty());
        assert_eq!(parsed.title.as_deref(), Some("Vacio"));

        let parsed: Menu = parse(one.as_bytes()).unwrap();
        assert_eq!(parsed.children, vec![MenuItem::new("A", "u1")]);

        let parsed: Menu = parse(many.as_bytes()).unwrap();
        let names: Vec<&str> = parsed.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn parse_tolerates_declaration_bom_and_comments() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(
            b"<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!-- generated -->\n\
              <CiscoIPPhoneDirectory>\n<Prompt/>\n<DirectoryEntry>\n<Name>Recepcion</Name>\n\
              <Telephone>100</Telephone>\n</DirectoryEntry>\n</CiscoIPPhoneDirectory>\n",
        );
        let parsed: Directory = parse(&bytes).unwrap();
        assert_eq!(parsed.title, None);
        assert_eq!(parsed.prompt.as_deref(), Some(""));
        assert_eq!(parsed.children, vec![DirectoryEntry::new("Recepcion", "100")]);
    }

    #[test]
    fn parse_skips_unknown_elements_and_fills_missing_fields() {
        let xml = "<CiscoIPPhoneDirectory>\
            <SoftKeyItem><Name>Dial</Name></SoftKeyItem>\
            <DirectoryEntry><Name>Solo nombre</Name></DirectoryEntry>\
            </CiscoIPPhoneDirectory>";
        let parsed: Directory = parse(xml.as_bytes()).unwrap();
        assert_eq!(parsed.children, vec![DirectoryEntry::new("Solo nombre", "")]);
    }

    #[test]
    fn parse_unescapes_and_reads_cdata() {
        let xml = "<CiscoIPPhoneDirectory><DirectoryEntry>\
            <Name>Compras &amp; Ventas</Name><Telephone><![CDATA[300]]></Telephone>\
            </DirectoryEntry></CiscoIPPhoneDirectory>";
        let parsed: Directory = parse(xml.as_bytes()).unwrap();
        assert_eq!(parsed.children[0].name, "Compras & Ventas");
        assert_eq!(parsed.children[0].telephone, "300");
    }

    #[test]
    fn parse_decodes_latin1_files() {
        let bytes = b"<CiscoIPPhoneMenu><Title>Bav\xe1ro</Title></CiscoIPPhoneMenu>";
        let parsed: Menu = parse(bytes).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Baváro"));
    }

    #[test]
    fn parse_rejects_wrong_root() {
        let xml = "<CiscoIPPhoneMenu></CiscoIPPhoneMenu>";
        let err = parse::<DirectoryEntry>(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedRoot { .. }));
    }

    #[test]
    fn parse_rejects_broken_documents() {
        assert!(parse::<MenuItem>(b"").is_err());
        assert!(parse::<MenuItem>(b"<CiscoIPPhoneMenu><MenuItem>").is_err());
        assert!(parse::<MenuItem>(b"<CiscoIPPhoneMenu><Title>x</Name></CiscoIPPhoneMenu>").is_err());
        let trailing = b"<CiscoIPPhoneMenu></CiscoIPPhoneMenu><CiscoIPPhoneMenu></CiscoIPPhoneMenu>";
        assert!(matches!(
            parse::<MenuItem>(trailing),
            Err(CodecError::TrailingContent(_))
        ));
    }

    #[test]
    fn escape_text_only_touches_markup() {
        assert_eq!(escape_text("Caja 1"), "Caja 1");
        assert_eq!(escape_text("A & B <C>"), "A &amp; B &lt;C&gt;");
    }

    #[test]
    fn round_trip_preserves_order_and_content() {
        let mut menu = Menu::new("Zona <Este> & Norte");
        menu.prompt = Some("  Seleccione  ".to_string());
        menu.children = vec![
            MenuItem::new("Bávaro", "http://h/localities/bavaro.xml"),
            MenuItem::new("", ""),
            MenuItem::new("Centro", "http://h/branches/zona/centro.xml?a=1&b=2"),
        ];
        let parsed: Menu = parse(&serialize(&menu)).unwrap();
        assert_eq!(parsed, menu);

        let mut dir = Directory::default();
        dir.children = (0..5)
            .map(|i| DirectoryEntry::new(format!("Caja {i} - Ana"), format!("22{i:02}")))
            .collect();
        let parsed: Directory = parse(&serialize(&dir)).unwrap();
        assert_eq!(parsed, dir);
    }

    #[test]
    fn serialize_is_stable_after_parse() {
        let mut dir = Directory::new("Bavaro");
        dir.children.push(DirectoryEntry::new("Caja 1", "2201"));
        let first = serialize(&dir);
        let reparsed: Directory = parse(&first).unwrap();
        assert_eq!(serialize(&reparsed), first);
    }
}
