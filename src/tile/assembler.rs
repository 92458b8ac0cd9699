use std::collections::{BTreeSet, HashMap};
use std::mem;

use log::warn;

use crate::config::RecursionFlags;
use crate::data::osm::{Entity, EntityKind, Location, Member, Metadata, Node, OsmId, Relation, Tags, Way};

/// Accumulates the entities of one tile build.
///
/// The data access layer feeds decoded rows through `add_node`/`add_way`/
/// `add_relation`; the assembler keeps a location index for dangling-reference
/// detection and grows the missing-reference sets that drive the recursion
/// loop. The buffer is append-only and only sorted and deduplicated by
/// `finalize`.
pub struct Assembler {
    flags: RecursionFlags,
    buffer: Vec<Entity>,
    /// Node ID to location, for every node fetched so far.
    locations: HashMap<OsmId, Location>,
    ways_got: BTreeSet<OsmId>,
    relations_got: BTreeSet<OsmId>,
    missing_nodes: BTreeSet<OsmId>,
    missing_ways: BTreeSet<OsmId>,
    missing_relations: BTreeSet<OsmId>,
    /// IDs that were requested but not delivered; never requested again.
    unresolved_nodes: BTreeSet<OsmId>,
    unresolved_ways: BTreeSet<OsmId>,
    unresolved_relations: BTreeSet<OsmId>,
}

impl Assembler {
    pub fn new(flags: RecursionFlags) -> Assembler {
        Assembler {
            flags,
            buffer: Vec::new(),
            locations: HashMap::new(),
            ways_got: BTreeSet::new(),
            relations_got: BTreeSet::new(),
            missing_nodes: BTreeSet::new(),
            missing_ways: BTreeSet::new(),
            missing_relations: BTreeSet::new(),
            unresolved_nodes: BTreeSet::new(),
            unresolved_ways: BTreeSet::new(),
            unresolved_relations: BTreeSet::new(),
        }
    }

    /// Drop all state of the previous tile build.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.locations.clear();
        self.ways_got.clear();
        self.relations_got.clear();
        self.missing_nodes.clear();
        self.missing_ways.clear();
        self.missing_relations.clear();
        self.unresolved_nodes.clear();
        self.unresolved_ways.clear();
        self.unresolved_relations.clear();
    }

    pub fn add_node(&mut self, id: OsmId, location: Location, metadata: Metadata, tags: Tags) {
        self.locations.insert(id, location);
        self.buffer.push(Entity::Node(Node {
            id,
            location,
            metadata,
            tags,
        }));
    }

    pub fn add_way(&mut self, id: OsmId, nodes: Vec<OsmId>, metadata: Metadata, tags: Tags) {
        self.ways_got.insert(id);
        for node_id in &nodes {
            self.check_node_availability(*node_id);
        }
        self.buffer.push(Entity::Way(Way {
            id,
            nodes,
            metadata,
            tags,
        }));
    }

    pub fn add_relation(&mut self, id: OsmId, members: Vec<Member>, metadata: Metadata, tags: Tags) {
        self.relations_got.insert(id);
        for member in &members {
            match member.kind {
                EntityKind::Node if self.flags.nodes => {
                    self.check_node_availability(member.id);
                }
                EntityKind::Way if self.flags.ways => {
                    if !self.ways_got.contains(&member.id) {
                        self.missing_ways.insert(member.id);
                    }
                }
                EntityKind::Relation if self.flags.relations => {
                    if !self.relations_got.contains(&member.id) {
                        self.missing_relations.insert(member.id);
                    }
                }
                _ => {}
            }
        }
        self.buffer.push(Entity::Relation(Relation {
            id,
            members,
            metadata,
            tags,
        }));
    }

    fn check_node_availability(&mut self, id: OsmId) {
        if !self.locations.contains_key(&id) {
            self.missing_nodes.insert(id);
        }
    }

    pub fn node_location(&self, id: OsmId) -> Option<Location> {
        self.locations.get(&id).copied()
    }

    pub fn has_missing(&self) -> bool {
        !self.missing_nodes.is_empty()
            || !self.missing_ways.is_empty()
            || !self.missing_relations.is_empty()
    }

    /// Drain the missing-node set for the next fetch round, excluding IDs that
    /// have arrived in the meantime or are known to be unresolvable.
    pub fn take_missing_nodes(&mut self) -> BTreeSet<OsmId> {
        let missing = mem::take(&mut self.missing_nodes);
        missing
            .into_iter()
            .filter(|id| !self.locations.contains_key(id) && !self.unresolved_nodes.contains(id))
            .collect()
    }

    pub fn take_missing_ways(&mut self) -> BTreeSet<OsmId> {
        let missing = mem::take(&mut self.missing_ways);
        missing
            .into_iter()
            .filter(|id| !self.ways_got.contains(id) && !self.unresolved_ways.contains(id))
            .collect()
    }

    pub fn take_missing_relations(&mut self) -> BTreeSet<OsmId> {
        let missing = mem::take(&mut self.missing_relations);
        missing
            .into_iter()
            .filter(|id| !self.relations_got.contains(id) && !self.unresolved_relations.contains(id))
            .collect()
    }

    /// Record every requested ID that the fetch round did not deliver, so the
    /// recursion loop terminates instead of asking for it again.
    pub fn settle_nodes(&mut self, requested: &BTreeSet<OsmId>) {
        for id in requested {
            if !self.locations.contains_key(id) && self.unresolved_nodes.insert(*id) {
                warn!(id = *id, kind = "node"; "referenced object could not be resolved");
            }
        }
    }

    pub fn settle_ways(&mut self, requested: &BTreeSet<OsmId>) {
        for id in requested {
            if !self.ways_got.contains(id) && self.unresolved_ways.insert(*id) {
                warn!(id = *id, kind = "way"; "referenced object could not be resolved");
            }
        }
    }

    pub fn settle_relations(&mut self, requested: &BTreeSet<OsmId>) {
        for id in requested {
            if !self.relations_got.contains(id) && self.unresolved_relations.insert(*id) {
                warn!(id = *id, kind = "relation"; "referenced object could not be resolved");
            }
        }
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved_nodes.len() + self.unresolved_ways.len() + self.unresolved_relations.len()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Sort the buffer into output order (nodes, ways, relations, ascending ID)
    /// and collapse duplicate IDs. Ties sort by descending version, so the
    /// newest instance of a duplicated object survives.
    pub fn finalize(&mut self) -> Vec<Entity> {
        let mut entities = mem::take(&mut self.buffer);
        entities.sort_by(|a, b| {
            a.kind()
                .rank()
                .cmp(&b.kind().rank())
                .then(a.id().cmp(&b.id()))
                .then(b.metadata().version_number().cmp(&a.metadata().version_number()))
        });
        entities.dedup_by_key(|e| (e.kind(), e.id()));
        entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_recursion() -> RecursionFlags {
        RecursionFlags {
            nodes: true,
            ways: true,
            relations: true,
        }
    }

    fn node_member(id: OsmId, pos: usize) -> Member {
        Member {
            kind: EntityKind::Node,
            id,
            role: String::new(),
            pos,
        }
    }

    fn add_plain_node(assembler: &mut Assembler, id: OsmId) {
        assembler.add_node(id, Location::new(1.0, 2.0), Metadata::default(), Vec::new());
    }

    #[test]
    fn way_with_unknown_nodes_grows_the_missing_set() {
        let mut assembler = Assembler::new(RecursionFlags::default());
        add_plain_node(&mut assembler, 1);
        assembler.add_way(10, vec![1, 2, 3], Metadata::default(), Vec::new());
        assert_eq!(assembler.take_missing_nodes(), BTreeSet::from([2, 3]));
    }

    #[test]
    fn relation_members_respect_recursion_flags() {
        let mut assembler = Assembler::new(RecursionFlags::default());
        assembler.add_relation(
            7,
            vec![
                node_member(1, 0),
                Member { kind: EntityKind::Way, id: 2, role: "outer".to_string(), pos: 1 },
                Member { kind: EntityKind::Relation, id: 3, role: String::new(), pos: 2 },
            ],
            Metadata::default(),
            Vec::new(),
        );
        assert!(!assembler.has_missing());

        let mut assembler = Assembler::new(all_recursion());
        assembler.add_relation(
            7,
            vec![
                node_member(1, 0),
                Member { kind: EntityKind::Way, id: 2, role: "outer".to_string(), pos: 1 },
                Member { kind: EntityKind::Relation, id: 3, role: String::new(), pos: 2 },
            ],
            Metadata::default(),
            Vec::new(),
        );
        assert_eq!(assembler.take_missing_nodes(), BTreeSet::from([1]));
        assert_eq!(assembler.take_missing_ways(), BTreeSet::from([2]));
        assert_eq!(assembler.take_missing_relations(), BTreeSet::from([3]));
    }

    #[test]
    fn already_fetched_members_are_not_missing() {
        let mut assembler = Assembler::new(all_recursion());
        assembler.add_way(2, Vec::new(), Metadata::default(), Vec::new());
        assembler.add_relation(
            7,
            vec![Member { kind: EntityKind::Way, id: 2, role: String::new(), pos: 0 }],
            Metadata::default(),
            Vec::new(),
        );
        assert!(assembler.take_missing_ways().is_empty());
    }

    #[test]
    fn settled_ids_are_never_requested_again() {
        let mut assembler = Assembler::new(RecursionFlags::default());
        assembler.add_way(10, vec![5], Metadata::default(), Vec::new());
        let requested = assembler.take_missing_nodes();
        assert_eq!(requested, BTreeSet::from([5]));
        assembler.settle_nodes(&requested);
        assert_eq!(assembler.unresolved_count(), 1);

        // The same dangling reference appears again in a later way.
        assembler.add_way(11, vec![5], Metadata::default(), Vec::new());
        assert!(assembler.take_missing_nodes().is_empty());
    }

    #[test]
    fn finalize_sorts_by_kind_then_id() {
        let mut assembler = Assembler::new(RecursionFlags::default());
        assembler.add_way(4, Vec::new(), Metadata::default(), Vec::new());
        add_plain_node(&mut assembler, 9);
        assembler.add_relation(1, Vec::new(), Metadata::default(), Vec::new());
        add_plain_node(&mut assembler, 2);

        let entities = assembler.finalize();
        let order: Vec<(EntityKind, OsmId)> = entities.iter().map(|e| (e.kind(), e.id())).collect();
        assert_eq!(
            order,
            vec![
                (EntityKind::Node, 2),
                (EntityKind::Node, 9),
                (EntityKind::Way, 4),
                (EntityKind::Relation, 1),
            ]
        );
    }

    #[test]
    fn finalize_keeps_the_highest_version_of_duplicates() {
        let mut assembler = Assembler::new(RecursionFlags::default());
        let mut old = Metadata::default();
        old.version = Some("3".to_string());
        let mut new = Metadata::default();
        new.version = Some("7".to_string());
        assembler.add_node(1, Location::new(0.0, 0.0), old, Vec::new());
        assembler.add_node(1, Location::new(1.0, 1.0), new, Vec::new());

        let entities = assembler.finalize();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].metadata().version, Some("7".to_string()));
    }

    #[test]
    fn clear_resets_everything() {
        let mut assembler = Assembler::new(all_recursion());
        assembler.add_way(1, vec![2], Metadata::default(), Vec::new());
        let requested = assembler.take_missing_nodes();
        assembler.settle_nodes(&requested);
        assembler.clear();
        assert!(assembler.is_empty());
        assert!(!assembler.has_missing());
        assert_eq!(assembler.unresolved_count(), 0);
    }
}
