use std::collections::{BTreeMap, BTreeSet};

use crate::bbox::BoundingBox;
use crate::data::osm::{EntityKind, Node, OsmId, Relation, Way};
use crate::errors::Result;
use crate::source::DataSource;
use crate::tile::assembler::Assembler;

/// An in-memory [`DataSource`] over plain entity maps.
///
/// Stands in for a database in tests and offline runs: spatial queries select
/// by node location, per-ID queries are map lookups. Ways count as inside the
/// window when any of their nodes is; relations when any node or way member
/// is.
#[derive(Debug, Default)]
pub struct MemorySource {
    nodes: BTreeMap<OsmId, Node>,
    ways: BTreeMap<OsmId, Way>,
    relations: BTreeMap<OsmId, Relation>,
    bbox: BoundingBox,
}

impl MemorySource {
    pub fn new() -> MemorySource {
        MemorySource::default()
    }

    pub fn insert_node(&mut self, node: Node) {
        self.nodes.insert(node.id, node);
    }

    pub fn insert_way(&mut self, way: Way) {
        self.ways.insert(way.id, way);
    }

    pub fn insert_relation(&mut self, relation: Relation) {
        self.relations.insert(relation.id, relation);
    }

    fn node_inside(&self, id: OsmId) -> bool {
        self.nodes
            .get(&id)
            .map(|n| self.bbox.contains(&n.location))
            .unwrap_or(false)
    }

    fn way_inside(&self, way: &Way) -> bool {
        way.nodes.iter().any(|id| self.node_inside(*id))
    }

    fn emit_node(&self, node: &Node, sink: &mut Assembler) {
        sink.add_node(node.id, node.location, node.metadata.clone(), node.tags.clone());
    }

    fn emit_way(&self, way: &Way, sink: &mut Assembler) {
        sink.add_way(way.id, way.nodes.clone(), way.metadata.clone(), way.tags.clone());
    }

    fn emit_relation(&self, relation: &Relation, sink: &mut Assembler) {
        sink.add_relation(
            relation.id,
            relation.members.clone(),
            relation.metadata.clone(),
            relation.tags.clone(),
        );
    }
}

impl DataSource for MemorySource {
    fn set_bbox(&mut self, bbox: &BoundingBox) {
        self.bbox = *bbox;
    }

    fn nodes_inside(&mut self, sink: &mut Assembler) -> Result<()> {
        for node in self.nodes.values() {
            if self.bbox.contains(&node.location) {
                self.emit_node(node, sink);
            }
        }
        Ok(())
    }

    fn ways_inside(&mut self, sink: &mut Assembler) -> Result<()> {
        for way in self.ways.values() {
            if self.way_inside(way) {
                self.emit_way(way, sink);
            }
        }
        Ok(())
    }

    fn relations_inside(&mut self, sink: &mut Assembler) -> Result<()> {
        for relation in self.relations.values() {
            let inside = relation.members.iter().any(|member| match member.kind {
                EntityKind::Node => self.node_inside(member.id),
                EntityKind::Way => self
                    .ways
                    .get(&member.id)
                    .map(|w| self.way_inside(w))
                    .unwrap_or(false),
                _ => false,
            });
            if inside {
                self.emit_relation(relation, sink);
            }
        }
        Ok(())
    }

    fn missing_nodes(&mut self, ids: &BTreeSet<OsmId>, sink: &mut Assembler) -> Result<()> {
        for id in ids {
            if let Some(node) = self.nodes.get(id) {
                self.emit_node(node, sink);
            }
        }
        Ok(())
    }

    fn missing_ways(&mut self, ids: &BTreeSet<OsmId>, sink: &mut Assembler) -> Result<()> {
        for id in ids {
            if let Some(way) = self.ways.get(id) {
                self.emit_way(way, sink);
            }
        }
        Ok(())
    }

    fn missing_relations(&mut self, ids: &BTreeSet<OsmId>, sink: &mut Assembler) -> Result<()> {
        for id in ids {
            if let Some(relation) = self.relations.get(id) {
                self.emit_relation(relation, sink);
            }
        }
        Ok(())
    }
}
