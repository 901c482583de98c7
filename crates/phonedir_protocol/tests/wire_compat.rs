//! Wire Compatibility Tests
//!
//! Files in the field were written by several generations of tooling. These
//! tests pin down that they all parse, and that anything we write is in the
//! canonical layout the phones were tested against.

use phonedir_protocol::*;

/// Menu as written by the old admin pages: declaration, Latin-1 header, CRLF.
const LEGACY_MENU: &str = "<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\r\n\
<CiscoIPPhoneMenu>\r\n\
<Title>Directorio</Title>\r\n\
<Prompt>Seleccione una zona</Prompt>\r\n\
<MenuItem>\r\n\
<Name>Zona Este</Name>\r\n\
<URL>http://10.0.0.5/dir/zones/ZonaEste.xml</URL>\r\n\
</MenuItem>\r\n\
</CiscoIPPhoneMenu>\r\n";

/// Directory exported by the spreadsheet macro: everything on one line.
const LEGACY_DIRECTORY: &str = "<CiscoIPPhoneDirectory><Title>Bavaro</Title>\
<DirectoryEntry><Name>Recepcion - Maria Lopez</Name><Telephone>2200</Telephone></DirectoryEntry>\
<DirectoryEntry><Name>Caja 1</Name><Telephone>2201</Telephone></DirectoryEntry>\
</CiscoIPPhoneDirectory>";

#[test]
fn legacy_menu_parses_with_single_child() {
    let menu: Menu = parse(LEGACY_MENU.as_bytes()).expect("legacy menu parses");
    assert_eq!(menu.title.as_deref(), Some("Directorio"));
    assert_eq!(menu.prompt.as_deref(), Some("Seleccione una zona"));
    assert_eq!(menu.children.len(), 1);

    let target = parse_link(&menu.children[0].url).expect("zone link");
    match target {
        LinkTarget::Zone(zone) => assert_eq!(zone.as_str(), "zonaeste"),
        other => panic!("expected a zone link, got {:?}", other),
    }
}

#[test]
fn legacy_directory_parses_in_order() {
    let dir: Directory = parse(LEGACY_DIRECTORY.as_bytes()).expect("legacy directory parses");
    let telephones: Vec<&str> = dir.children.iter().map(|e| e.telephone.as_str()).collect();
    assert_eq!(telephones, vec!["2200", "2201"]);
}

#[test]
fn rewritten_legacy_files_are_canonical() {
    let dir: Directory = parse(LEGACY_DIRECTORY.as_bytes()).unwrap();
    let written = String::from_utf8(serialize(&dir)).unwrap();
    assert!(written.starts_with("<CiscoIPPhoneDirectory>\n  <Title>Bavaro</Title>\n"));
    assert!(written.ends_with("</CiscoIPPhoneDirectory>\n"));
    assert!(!written.contains('\r'));

    let reparsed: Directory = parse(written.as_bytes()).unwrap();
    assert_eq!(reparsed, dir);
}

#[test]
fn menu_shape_and_directory_shape_do_not_mix() {
    assert!(parse::<DirectoryEntry>(LEGACY_MENU.as_bytes()).is_err());
    assert!(parse::<MenuItem>(LEGACY_DIRECTORY.as_bytes()).is_err());
}

#[test]
fn escaped_text_survives_a_round_trip() -> anyhow::Result<()> {
    let mut dir = Directory::new("I+D <Lab>");
    dir.children.push(DirectoryEntry::new("Compras & Ventas - R&D", "4100"));
    let bytes = serialize(&dir);
    let text = std::str::from_utf8(&bytes)?;
    assert!(text.contains("<Title>I+D &lt;Lab&gt;</Title>"));
    assert!(text.contains("<Name>Compras &amp; Ventas - R&amp;D</Name>"));
    assert_eq!(parse::<DirectoryEntry>(&bytes)?, dir);
    Ok(())
}
