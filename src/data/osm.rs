use crate::errors::{Error, Result};
use crate::pgtext::convert::parse_i64_prefix;

pub type OsmId = i64;

/// Ordered key/value tags of a single OSM object.
pub type Tags = Vec<(String, String)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    Node,
    Way,
    Relation,
    /// Database returned an item type we do not know. Members of this kind are
    /// carried through assembly but never recursed into or written out.
    Undefined,
}

impl EntityKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Node => "node",
            EntityKind::Way => "way",
            EntityKind::Relation => "relation",
            EntityKind::Undefined => "undefined",
        }
    }

    /// Sort rank used by the output ordering: nodes before ways before relations.
    pub fn rank(&self) -> u8 {
        match self {
            EntityKind::Node => 0,
            EntityKind::Way => 1,
            EntityKind::Relation => 2,
            EntityKind::Undefined => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub lon: f64,
    pub lat: f64,
}

impl Location {
    pub fn new(lon: f64, lat: f64) -> Location {
        Location { lon, lat }
    }

    /// Build a location from fixed-point int32 coordinates (1e-7 degree units),
    /// the storage format of coordinate columns without PostGIS geometries.
    pub fn from_fixed(x: i32, y: i32) -> Location {
        Location {
            lon: x as f64 / 10_000_000.0,
            lat: y as f64 / 10_000_000.0,
        }
    }
}

/// Optional per-object metadata. Each field is either present as the raw
/// database string or entirely absent, depending on which metadata columns the
/// configuration enables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub version: Option<String>,
    pub changeset: Option<String>,
    pub uid: Option<String>,
    pub user: Option<String>,
    pub timestamp: Option<String>,
}

impl Metadata {
    /// Numeric version for ordering, 0 when absent or non-numeric.
    pub fn version_number(&self) -> i64 {
        self.version.as_deref().map(parse_i64_prefix).unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: OsmId,
    pub location: Location,
    pub metadata: Metadata,
    pub tags: Tags,
}

#[derive(Debug, Clone)]
pub struct Way {
    pub id: OsmId,
    /// Referenced node IDs in way order. Order is semantically significant.
    pub nodes: Vec<OsmId>,
    pub metadata: Metadata,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub kind: EntityKind,
    pub id: OsmId,
    pub role: String,
    /// Position of the member within the relation.
    pub pos: usize,
}

#[derive(Debug, Clone)]
pub struct Relation {
    pub id: OsmId,
    /// Members ordered by their position index.
    pub members: Vec<Member>,
    pub metadata: Metadata,
    pub tags: Tags,
}

#[derive(Debug, Clone)]
pub enum Entity {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Node(_) => EntityKind::Node,
            Entity::Way(_) => EntityKind::Way,
            Entity::Relation(_) => EntityKind::Relation,
        }
    }

    pub fn id(&self) -> OsmId {
        match self {
            Entity::Node(n) => n.id,
            Entity::Way(w) => w.id,
            Entity::Relation(r) => r.id,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Entity::Node(n) => &n.metadata,
            Entity::Way(w) => &w.metadata,
            Entity::Relation(r) => &r.metadata,
        }
    }
}

/// Zip the parallel member columns of a relation row into an ordered member
/// list. The three arrays must have the same length; a length mismatch means
/// one of them was truncated or misdecoded and aborts the row.
///
/// `positions` supplies an explicit position per member. Without it, array
/// order is taken as member order.
pub fn zip_members(
    ids: Vec<OsmId>,
    kinds: Vec<EntityKind>,
    roles: Vec<String>,
    positions: Option<Vec<usize>>,
) -> Result<Vec<Member>> {
    if ids.len() != kinds.len() || ids.len() != roles.len() {
        return Err(Error::from(format!(
            "relation member columns are misaligned: {} ids, {} types, {} roles",
            ids.len(),
            kinds.len(),
            roles.len()
        )));
    }
    if let Some(pos) = &positions {
        if pos.len() != ids.len() {
            return Err(Error::from(format!(
                "relation member columns are misaligned: {} ids, {} positions",
                ids.len(),
                pos.len()
            )));
        }
    }
    let mut members: Vec<Member> = ids
        .into_iter()
        .zip(kinds)
        .zip(roles)
        .enumerate()
        .map(|(i, ((id, kind), role))| Member {
            kind,
            id,
            role,
            pos: positions.as_ref().map(|p| p[i]).unwrap_or(i),
        })
        .collect();
    members.sort_by_key(|m| m.pos);
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members_keep_array_order_without_positions() {
        let members = zip_members(
            vec![1, 2, 3],
            vec![EntityKind::Node, EntityKind::Way, EntityKind::Node],
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            None,
        )
        .unwrap();
        assert_eq!(members[0].id, 1);
        assert_eq!(members[1].id, 2);
        assert_eq!(members[2].id, 3);
        assert_eq!(members[1].pos, 1);
    }

    #[test]
    fn members_reorder_by_explicit_positions() {
        let members = zip_members(
            vec![5, 9, 2],
            vec![EntityKind::Way, EntityKind::Node, EntityKind::Relation],
            vec!["inner".to_string(), String::new(), "outer".to_string()],
            Some(vec![2, 0, 1]),
        )
        .unwrap();
        assert_eq!(
            members,
            vec![
                Member { kind: EntityKind::Node, id: 9, role: String::new(), pos: 0 },
                Member { kind: EntityKind::Relation, id: 2, role: "outer".to_string(), pos: 1 },
                Member { kind: EntityKind::Way, id: 5, role: "inner".to_string(), pos: 2 },
            ]
        );
    }

    #[test]
    fn member_column_length_mismatch_is_an_error() {
        let result = zip_members(
            vec![1, 2],
            vec![EntityKind::Node],
            vec!["a".to_string(), "b".to_string()],
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn version_number_tolerates_missing_and_garbage() {
        let mut metadata = Metadata::default();
        assert_eq!(metadata.version_number(), 0);
        metadata.version = Some("17".to_string());
        assert_eq!(metadata.version_number(), 17);
        metadata.version = Some("unknown".to_string());
        assert_eq!(metadata.version_number(), 0);
    }
}
