//! QML style documents.
//!
//! A style is split into the attributes of its `<qgis>` root, which end up
//! on the `<maplayer>` element, and the serialized children of the root.
//! For vector layers `<aliases>` is rebuilt from the view attributes.

use gdi_model::{parse_alias, Attribute, StyleKind};
use quick_xml::escape::escape;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::SynthesisError;
use crate::run_log::RunLog;

const POINT_QML: &str = include_str!("../../templates/qgs/point.qml");
const LINESTRING_QML: &str = include_str!("../../templates/qgs/linestring.qml");
const POLYGON_QML: &str = include_str!("../../templates/qgs/polygon.qml");
const RASTER_QML: &str = include_str!("../../templates/qgs/raster.qml");

/// Bundled style for a geometry family.
pub fn default_style(kind: StyleKind) -> &'static str {
    match kind {
        StyleKind::Point => POINT_QML,
        StyleKind::LineString => LINESTRING_QML,
        StyleKind::Polygon => POLYGON_QML,
        StyleKind::Raster => RASTER_QML,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedStyle {
    /// `key="value"` pairs of the root element, without `version`.
    pub attributes: String,
    /// Children of the root element as XML.
    pub style: String,
}

fn style_error(e: impl ToString) -> SynthesisError {
    SynthesisError::Style(e.to_string())
}

/// Splits a QML document and rewrites its aliases.
///
/// `attributes` empty leaves `<aliases>` untouched.
pub fn parse_qml_style(
    qml: &str,
    attributes: &[Attribute],
    log: &RunLog,
) -> Result<ParsedStyle, SynthesisError> {
    let mut reader = Reader::from_str(qml);

    // skip prolog up to the root element
    let (root, empty_root) = loop {
        match reader.read_event().map_err(style_error)? {
            Event::Start(element) => break (element.into_owned(), false),
            Event::Empty(element) => break (element.into_owned(), true),
            Event::Eof => return Err(style_error("no root element")),
            _ => {}
        }
    };
    if root.name().as_ref() != b"qgis" {
        return Err(style_error(format!(
            "root element is <{}>, expected <qgis>",
            String::from_utf8_lossy(root.name().as_ref())
        )));
    }

    let mut root_attributes = Vec::new();
    for attribute in root.attributes() {
        let attribute = attribute.map_err(style_error)?;
        if attribute.key.as_ref() == b"version" {
            continue;
        }
        let value = attribute.unescape_value().map_err(style_error)?;
        root_attributes.push(format!(
            "{}=\"{}\"",
            String::from_utf8_lossy(attribute.key.as_ref()),
            escape(value.as_ref())
        ));
    }

    let aliases = (!attributes.is_empty()).then(|| alias_entries(attributes, log));
    let mut writer = Writer::new(Vec::new());
    let mut aliases_written = false;

    if !empty_root {
        let mut depth = 0usize;
        // depth inside a replaced <aliases> element
        let mut skipping: Option<usize> = None;
        loop {
            let event = reader.read_event().map_err(style_error)?;
            match &event {
                Event::Eof => return Err(style_error("unexpected end of document")),
                Event::Start(element) => {
                    if let Some(level) = skipping.as_mut() {
                        *level += 1;
                        continue;
                    }
                    if let (Some(aliases), b"aliases") = (&aliases, element.name().as_ref()) {
                        write_aliases(&mut writer, aliases)?;
                        aliases_written = true;
                        skipping = Some(0);
                        continue;
                    }
                    depth += 1;
                }
                Event::Empty(element) => {
                    if skipping.is_some() {
                        continue;
                    }
                    if let (Some(aliases), b"aliases") = (&aliases, element.name().as_ref()) {
                        write_aliases(&mut writer, aliases)?;
                        aliases_written = true;
                        continue;
                    }
                }
                Event::End(_) => {
                    match skipping {
                        Some(0) => {
                            skipping = None;
                            continue;
                        }
                        Some(ref mut level) => {
                            *level -= 1;
                            continue;
                        }
                        None => {}
                    }
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                _ => {
                    if skipping.is_some() {
                        continue;
                    }
                }
            }
            writer.write_event(event).map_err(style_error)?;
        }
    }

    if let (Some(aliases), false) = (&aliases, aliases_written) {
        write_aliases(&mut writer, aliases)?;
    }

    Ok(ParsedStyle {
        attributes: root_attributes.join(" "),
        style: String::from_utf8(writer.into_inner()).map_err(style_error)?,
    })
}

/// `(field, alias)` per attribute in attribute order.
fn alias_entries(attributes: &[Attribute], log: &RunLog) -> Vec<(String, String)> {
    attributes
        .iter()
        .map(|attribute| {
            let raw = attribute.alias.as_deref().unwrap_or_default();
            let alias = match parse_alias(raw) {
                Ok(parsed) => parsed.alias.unwrap_or_else(|| raw.to_string()),
                Err(e) => {
                    log.warning(format!("Could not parse value as JSON: '{}'\n{}", raw, e));
                    raw.to_string()
                }
            };
            (attribute.name.clone(), alias)
        })
        .collect()
}

fn write_aliases(
    writer: &mut Writer<Vec<u8>>,
    aliases: &[(String, String)],
) -> Result<(), SynthesisError> {
    writer
        .write_event(Event::Start(BytesStart::new("aliases")))
        .map_err(style_error)?;
    for (index, (field, name)) in aliases.iter().enumerate() {
        let index = index.to_string();
        let alias = BytesStart::new("alias").with_attributes([
            ("field", field.as_str()),
            ("index", index.as_str()),
            ("name", name.as_str()),
        ]);
        writer
            .write_event(Event::Empty(alias))
            .map_err(style_error)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("aliases")))
        .map_err(style_error)?;
    Ok(())
}

/// Escapes text for element content and attribute values.
pub fn xml_escape(raw: &str) -> String {
    escape(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const STYLE: &str = r#"<!DOCTYPE qgis PUBLIC 'http://mrcc.com/qgis.dtd' 'SYSTEM'>
<qgis version="3.10" minScale="1e+08" labelsEnabled="1"><renderer-v2 type="singleSymbol"/><aliases><alias field="old" index="0" name="Old"/></aliases><layerOpacity>1</layerOpacity></qgis>"#;

    #[test]
    fn root_attributes_skip_version() {
        let log = RunLog::new();
        let parsed = parse_qml_style(STYLE, &[], &log).unwrap();
        assert_eq!(parsed.attributes, r#"minScale="1e+08" labelsEnabled="1""#);
        assert_eq!(
            parsed.style,
            r#"<renderer-v2 type="singleSymbol"/><aliases><alias field="old" index="0" name="Old"/></aliases><layerOpacity>1</layerOpacity>"#
        );
    }

    #[test]
    fn aliases_are_rebuilt_from_attributes() {
        let log = RunLog::new();
        let attributes = vec![
            Attribute::new(1, "number").with_alias("Nr. & Code"),
            Attribute::new(2, "owner").with_alias(r#"{"alias": "Owner", "json_attrs": []}"#),
            Attribute::new(3, "broken").with_alias("{not json"),
        ];
        let parsed = parse_qml_style(STYLE, &attributes, &log).unwrap();
        assert_eq!(
            parsed.style,
            concat!(
                r#"<renderer-v2 type="singleSymbol"/>"#,
                r#"<aliases><alias field="number" index="0" name="Nr. &amp; Code"/>"#,
                r#"<alias field="owner" index="1" name="Owner"/>"#,
                r#"<alias field="broken" index="2" name="{not json"/></aliases>"#,
                r#"<layerOpacity>1</layerOpacity>"#
            )
        );
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].msg.starts_with("Could not parse value as JSON: '{not json'"));
    }

    #[test]
    fn missing_aliases_are_appended() {
        let log = RunLog::new();
        let parsed = parse_qml_style(
            r#"<qgis version="3"><pipe/></qgis>"#,
            &[Attribute::new(1, "egid")],
            &log,
        )
        .unwrap();
        assert_eq!(
            parsed.style,
            r#"<pipe/><aliases><alias field="egid" index="0" name=""/></aliases>"#
        );
    }

    #[test]
    fn invalid_documents_are_errors() {
        let log = RunLog::new();
        assert!(parse_qml_style("", &[], &log).is_err());
        assert!(parse_qml_style("<style/>", &[], &log).is_err());
        assert!(parse_qml_style("<qgis><pipe>", &[], &log).is_err());
    }

    #[test]
    fn bundled_styles_parse() {
        let log = RunLog::new();
        for kind in [
            StyleKind::Point,
            StyleKind::LineString,
            StyleKind::Polygon,
            StyleKind::Raster,
        ] {
            let parsed = parse_qml_style(default_style(kind), &[], &log).unwrap();
            assert!(!parsed.attributes.contains("version"));
            assert!(parsed.style.contains("<blendMode>0</blendMode>"));
        }
    }
}
