use std::collections::BTreeSet;

use crate::bbox::BoundingBox;
use crate::config::MetadataOptions;
use crate::data::osm::{Metadata, OsmId};
use crate::errors::Result;
use crate::tile::assembler::Assembler;

pub mod cerepso;
pub mod memory;
pub mod osm2pgsql;
pub mod pg;

/// One result row; SQL NULL is `None`, every other value arrives as text.
pub type Row = Vec<Option<String>>;

/// An immutable query, built once at startup. All parameters are passed and
/// all columns are selected as text, so executors stay trivial.
#[derive(Debug, Clone)]
pub struct QueryTemplate {
    pub name: &'static str,
    pub sql: String,
}

impl QueryTemplate {
    pub fn new(name: &'static str, sql: String) -> QueryTemplate {
        QueryTemplate { name, sql }
    }
}

/// Stateless execution of a query template. The engine only ever talks to the
/// database through this seam, so tests substitute an in-memory fixture.
pub trait QueryExecutor {
    fn execute(&mut self, template: &QueryTemplate, params: &[&str]) -> Result<Vec<Row>>;
}

/// Access to one database layout. Spatial queries and per-ID queries feed
/// decoded rows straight into the assembler.
pub trait DataSource {
    fn set_bbox(&mut self, bbox: &BoundingBox);

    fn nodes_inside(&mut self, sink: &mut Assembler) -> Result<()>;

    fn ways_inside(&mut self, sink: &mut Assembler) -> Result<()>;

    fn relations_inside(&mut self, sink: &mut Assembler) -> Result<()>;

    fn missing_nodes(&mut self, ids: &BTreeSet<OsmId>, sink: &mut Assembler) -> Result<()>;

    fn missing_ways(&mut self, ids: &BTreeSet<OsmId>, sink: &mut Assembler) -> Result<()>;

    fn missing_relations(&mut self, ids: &BTreeSet<OsmId>, sink: &mut Assembler) -> Result<()>;
}

/// Positions of the enabled metadata columns within a query result.
///
/// The SELECT fragment and the result offsets are derived from the same
/// configuration, so they cannot drift apart.
#[derive(Debug, Clone, Copy)]
pub struct MetadataFields {
    user: Option<usize>,
    uid: Option<usize>,
    version: Option<usize>,
    timestamp: Option<usize>,
    changeset: Option<usize>,
    count: usize,
}

impl MetadataFields {
    pub fn new(options: &MetadataOptions) -> MetadataFields {
        let mut count = 0;
        let mut claim = |enabled: bool| {
            if enabled {
                count += 1;
                Some(count - 1)
            } else {
                None
            }
        };
        MetadataFields {
            user: claim(options.user),
            uid: claim(options.uid),
            version: claim(options.version),
            timestamp: claim(options.timestamp),
            changeset: claim(options.changeset),
            count,
        }
    }

    /// Number of metadata columns in each query result.
    pub fn count(&self) -> usize {
        self.count
    }

    /// `osm_user::text, osm_uid::text, ...` for the enabled columns, with a
    /// trailing comma when non-empty, ready to splice into a SELECT.
    pub fn select_fragment(&self) -> String {
        let mut fragment = String::new();
        for (enabled, column) in [
            (self.user.is_some(), "osm_user"),
            (self.uid.is_some(), "osm_uid"),
            (self.version.is_some(), "osm_version"),
            (self.timestamp.is_some(), "osm_lastmodified"),
            (self.changeset.is_some(), "osm_changeset"),
        ] {
            if enabled {
                fragment.push_str(column);
                fragment.push_str("::text, ");
            }
        }
        fragment
    }

    /// Read the metadata columns of `row` starting at column `base`.
    pub fn extract(&self, row: &Row, base: usize) -> Metadata {
        let field = |offset: Option<usize>| {
            offset.and_then(|o| row.get(base + o).cloned().flatten())
        };
        Metadata {
            user: field(self.user),
            uid: field(self.uid),
            version: field(self.version),
            timestamp: field(self.timestamp),
            changeset: field(self.changeset),
        }
    }
}
