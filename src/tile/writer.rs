use std::fs;
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;

use crate::bbox::BoundingBox;
use crate::data::osm::{Entity, EntityKind, Metadata, Tags};
use crate::errors::{Error, Result};

const GENERATOR: &str = concat!("vectile ", env!("CARGO_PKG_VERSION"));

/// Serialize a finalized tile and write it to `path`.
///
/// The document is built completely in memory first, so a failing build or
/// serialization never replaces an existing tile with a truncated one. An
/// existing file is only overwritten when `force` is set.
pub fn write_tile(path: &Path, entities: &[Entity], bbox: &BoundingBox, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::from(format!(
            "output file {} already exists, use force to overwrite it",
            path.display()
        )));
    }
    let document = serialize(entities, bbox)?;
    fs::write(path, document)?;
    Ok(())
}

/// Render entities as an OSM XML document.
pub fn serialize(entities: &[Entity], bbox: &BoundingBox) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut osm = BytesStart::new("osm");
    osm.push_attribute(("version", "0.6"));
    osm.push_attribute(("generator", GENERATOR));
    osm.push_attribute(("copyright", "OpenStreetMap and contributors"));
    osm.push_attribute(("attribution", "http://www.openstreetmap.org/copyright"));
    osm.push_attribute(("license", "http://opendatacommons.org/licenses/odbl/1-0/"));
    writer.write_event(Event::Start(osm))?;

    let mut bounds = BytesStart::new("bounds");
    bounds.push_attribute(("minlat", format_coordinate(bbox.min_lat).as_str()));
    bounds.push_attribute(("minlon", format_coordinate(bbox.min_lon).as_str()));
    bounds.push_attribute(("maxlat", format_coordinate(bbox.max_lat).as_str()));
    bounds.push_attribute(("maxlon", format_coordinate(bbox.max_lon).as_str()));
    writer.write_event(Event::Empty(bounds))?;

    for entity in entities {
        match entity {
            Entity::Node(node) => {
                let mut element = BytesStart::new("node");
                element.push_attribute(("id", node.id.to_string().as_str()));
                element.push_attribute(("lat", format_coordinate(node.location.lat).as_str()));
                element.push_attribute(("lon", format_coordinate(node.location.lon).as_str()));
                push_metadata(&mut element, &node.metadata);
                if node.tags.is_empty() {
                    writer.write_event(Event::Empty(element))?;
                    continue;
                }
                writer.write_event(Event::Start(element))?;
                write_tags(&mut writer, &node.tags)?;
                writer.write_event(Event::End(BytesEnd::new("node")))?;
            }
            Entity::Way(way) => {
                let mut element = BytesStart::new("way");
                element.push_attribute(("id", way.id.to_string().as_str()));
                push_metadata(&mut element, &way.metadata);
                let has_children = !way.tags.is_empty() || !way.nodes.is_empty();
                if !has_children {
                    writer.write_event(Event::Empty(element))?;
                    continue;
                }
                writer.write_event(Event::Start(element))?;
                for node_id in &way.nodes {
                    let mut nd = BytesStart::new("nd");
                    nd.push_attribute(("ref", node_id.to_string().as_str()));
                    writer.write_event(Event::Empty(nd))?;
                }
                write_tags(&mut writer, &way.tags)?;
                writer.write_event(Event::End(BytesEnd::new("way")))?;
            }
            Entity::Relation(relation) => {
                let mut element = BytesStart::new("relation");
                element.push_attribute(("id", relation.id.to_string().as_str()));
                push_metadata(&mut element, &relation.metadata);
                let members: Vec<_> = relation
                    .members
                    .iter()
                    .filter(|m| m.kind != EntityKind::Undefined)
                    .collect();
                if members.is_empty() && relation.tags.is_empty() {
                    writer.write_event(Event::Empty(element))?;
                    continue;
                }
                writer.write_event(Event::Start(element))?;
                for member in members {
                    let mut m = BytesStart::new("member");
                    m.push_attribute(("type", member.kind.name()));
                    m.push_attribute(("ref", member.id.to_string().as_str()));
                    m.push_attribute(("role", member.role.as_str()));
                    writer.write_event(Event::Empty(m))?;
                }
                write_tags(&mut writer, &relation.tags)?;
                writer.write_event(Event::End(BytesEnd::new("relation")))?;
            }
        }
    }

    writer.write_event(Event::End(BytesEnd::new("osm")))?;
    let mut document = writer.into_inner();
    document.push(b'\n');
    Ok(document)
}

fn format_coordinate(value: f64) -> String {
    format!("{:.7}", value)
}

fn push_metadata(element: &mut BytesStart, metadata: &Metadata) {
    if let Some(version) = &metadata.version {
        element.push_attribute(("version", version.as_str()));
    }
    if let Some(timestamp) = &metadata.timestamp {
        element.push_attribute(("timestamp", timestamp.as_str()));
    }
    if let Some(changeset) = &metadata.changeset {
        element.push_attribute(("changeset", changeset.as_str()));
    }
    if let Some(uid) = &metadata.uid {
        element.push_attribute(("uid", uid.as_str()));
    }
    if let Some(user) = &metadata.user {
        element.push_attribute(("user", user.as_str()));
    }
    // Some consumers behave strangely without an explicit visible attribute.
    element.push_attribute(("visible", "true"));
}

fn write_tags(writer: &mut Writer<Vec<u8>>, tags: &Tags) -> Result<()> {
    for (key, value) in tags {
        let mut tag = BytesStart::new("tag");
        tag.push_attribute(("k", key.as_str()));
        tag.push_attribute(("v", value.as_str()));
        writer.write_event(Event::Empty(tag))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::osm::{Location, Member, Metadata, Node, Relation, Way};

    fn document(entities: &[Entity]) -> String {
        let bbox = BoundingBox::from_corners(8.0, 48.0, 9.0, 49.0);
        String::from_utf8(serialize(entities, &bbox).unwrap()).unwrap()
    }

    #[test]
    fn header_and_bounds() {
        let xml = document(&[]);
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("generator=\"vectile"));
        assert!(xml.contains("copyright=\"OpenStreetMap and contributors\""));
        assert!(xml.contains(
            "<bounds minlat=\"48.0000000\" minlon=\"8.0000000\" maxlat=\"49.0000000\" maxlon=\"9.0000000\"/>"
        ));
        assert!(xml.trim_end().ends_with("</osm>"));
    }

    #[test]
    fn node_with_tags_and_metadata() {
        let mut metadata = Metadata::default();
        metadata.version = Some("3".to_string());
        metadata.uid = Some("42".to_string());
        let node = Node {
            id: 17,
            location: Location::new(8.5, 48.25),
            metadata,
            tags: vec![("name".to_string(), "Gasthaus \"Zur Linde\"".to_string())],
        };
        let xml = document(&[Entity::Node(node)]);
        assert!(xml.contains("<node id=\"17\" lat=\"48.2500000\" lon=\"8.5000000\" version=\"3\" uid=\"42\" visible=\"true\">"));
        // The quote in the tag value must be escaped.
        assert!(xml.contains("&quot;"));
        assert!(xml.contains("</node>"));
    }

    #[test]
    fn untagged_node_is_self_closing() {
        let node = Node {
            id: 5,
            location: Location::new(0.0, 0.0),
            metadata: Metadata::default(),
            tags: Vec::new(),
        };
        let xml = document(&[Entity::Node(node)]);
        assert!(xml.contains("<node id=\"5\" lat=\"0.0000000\" lon=\"0.0000000\" visible=\"true\"/>"));
    }

    #[test]
    fn way_lists_node_refs_in_order() {
        let way = Way {
            id: 9,
            nodes: vec![3, 1, 2],
            metadata: Metadata::default(),
            tags: vec![("highway".to_string(), "residential".to_string())],
        };
        let xml = document(&[Entity::Way(way)]);
        let first = xml.find("<nd ref=\"3\"/>").unwrap();
        let second = xml.find("<nd ref=\"1\"/>").unwrap();
        let third = xml.find("<nd ref=\"2\"/>").unwrap();
        assert!(first < second && second < third);
        assert!(xml.contains("<tag k=\"highway\" v=\"residential\"/>"));
    }

    #[test]
    fn relation_members_skip_undefined_kinds() {
        let relation = Relation {
            id: 77,
            members: vec![
                Member { kind: EntityKind::Way, id: 9, role: "outer".to_string(), pos: 0 },
                Member { kind: EntityKind::Undefined, id: 1, role: String::new(), pos: 1 },
                Member { kind: EntityKind::Node, id: 3, role: "admin_centre".to_string(), pos: 2 },
            ],
            metadata: Metadata::default(),
            tags: Vec::new(),
        };
        let xml = document(&[Entity::Relation(relation)]);
        assert!(xml.contains("<member type=\"way\" ref=\"9\" role=\"outer\"/>"));
        assert!(xml.contains("<member type=\"node\" ref=\"3\" role=\"admin_centre\"/>"));
        assert!(!xml.contains("undefined"));
    }

    #[test]
    fn existing_file_is_preserved_without_force() {
        let dir = std::env::temp_dir().join("vectile-writer-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tile.osm");
        std::fs::write(&path, b"old tile").unwrap();

        let bbox = BoundingBox::from_corners(0.0, 0.0, 1.0, 1.0);
        assert!(write_tile(&path, &[], &bbox, false).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"old tile");

        write_tile(&path, &[], &bbox, true).unwrap();
        assert!(std::fs::read(&path).unwrap().starts_with(b"<?xml"));
        std::fs::remove_file(&path).unwrap();
    }
}
