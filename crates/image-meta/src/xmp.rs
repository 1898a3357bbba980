//! XMP packet extraction.
//!
//! The packet is located by scanning for the `x:xmpmeta` element, which works
//! for any container that embeds XMP as plain text (JPEG APP1, PNG iTXt,
//! TIFF tag 700, WebP XMP chunk).

use crate::orientation::Orientation;
use crate::MetaError;
use roxmltree::{Document, Node};
use std::collections::BTreeMap;

const XMPMETA_OPEN: &[u8] = b"<x:xmpmeta";
const XMPMETA_CLOSE: &[u8] = b"</x:xmpmeta>";
const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const TIFF_NS: &str = "http://ns.adobe.com/tiff/1.0/";

#[derive(Debug, Default)]
pub(crate) struct XmpFields {
    pub orientation: Option<Orientation>,
    pub tags: BTreeMap<String, String>,
}

/// Find and parse the first XMP packet in `raw`. `Ok(None)` if there is none.
pub(crate) fn read_xmp(raw: &[u8]) -> Result<Option<XmpFields>, MetaError> {
    let Some(packet) = find_packet(raw) else {
        return Ok(None);
    };
    let text = std::str::from_utf8(packet)?;
    let doc = Document::parse(text)?;

    let mut fields = XmpFields::default();
    for node in doc.descendants().filter(Node::is_element) {
        if is_rdf(node) {
            if node.tag_name().name() == "Description" {
                for attr in node.attributes() {
                    if attr.namespace().is_some_and(|ns| ns != RDF_NS) {
                        record(&mut fields, node, attr.namespace(), attr.name(), attr.value());
                    }
                }
            }
            continue;
        }

        // simple-valued property: element whose only child is text
        let mut children = node.children();
        if let (Some(child), None) = (children.next(), children.next()) {
            if let Some(text) = child.text().filter(|_| child.is_text()) {
                let tag = node.tag_name();
                record(&mut fields, node, tag.namespace(), tag.name(), text);
            }
        }
    }

    Ok(Some(fields))
}

fn is_rdf(node: Node) -> bool {
    node.tag_name().namespace() == Some(RDF_NS)
}

fn record(fields: &mut XmpFields, node: Node, ns: Option<&str>, name: &str, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    if ns == Some(TIFF_NS) && name == "Orientation" {
        fields.orientation = value.parse::<u16>().ok().and_then(Orientation::from_exif);
    }

    let prefix = ns.and_then(|ns| node.lookup_prefix(ns)).unwrap_or("xmp");
    fields
        .tags
        .entry(format!("{}:{}", prefix, name))
        .or_insert_with(|| value.to_string());
}

fn find_packet(raw: &[u8]) -> Option<&[u8]> {
    let start = find(raw, XMPMETA_OPEN)?;
    let end = find(&raw[start..], XMPMETA_CLOSE)? + start + XMPMETA_CLOSE.len();
    Some(&raw[start..end])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
