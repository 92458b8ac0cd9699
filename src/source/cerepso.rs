use std::collections::BTreeSet;

use log::warn;

use crate::bbox::BoundingBox;
use crate::config::Config;
use crate::data::osm::{zip_members, Location, OsmId, Tags};
use crate::errors::{Error, Result};
use crate::pgtext::convert::{Int64Conversion, ItemTypeConversion, StringConversion};
use crate::pgtext::{ArrayParser, HStoreParser};
use crate::source::{DataSource, MetadataFields, QueryExecutor, QueryTemplate, Row};
use crate::tile::assembler::Assembler;

const ENVELOPE: &str = "ST_MakeEnvelope($1::float8, $2::float8, $3::float8, $4::float8, 4326)";

/// Data access for the direct-table layout: `nodes`, `untagged_nodes`, `ways`
/// and `relations`, with hstore tag columns and array columns for way nodes
/// and relation members.
pub struct CerepsoSource<E: QueryExecutor> {
    executor: E,
    metadata: MetadataFields,
    orphaned_nodes: bool,
    untagged_nodes_geom: bool,
    templates: Templates,
    bbox_params: [String; 4],
}

struct Templates {
    nodes_in_bbox: QueryTemplate,
    node_by_id: QueryTemplate,
    untagged_nodes_in_bbox: QueryTemplate,
    untagged_node_by_id: QueryTemplate,
    ways_in_bbox: QueryTemplate,
    way_by_id: QueryTemplate,
    relations_in_bbox: QueryTemplate,
    relation_by_id: QueryTemplate,
}

impl Templates {
    /// Build all query templates once. Every query of a kind selects the same
    /// columns in the same order, whether spatial or by ID, so the decoders
    /// need no per-query column offsets; all result columns are cast to text.
    fn new(metadata: &MetadataFields, untagged_nodes_geom: bool) -> Templates {
        let meta = metadata.select_fragment();
        let node_columns = format!(
            "tags::text, osm_id::text, {}ST_X(geom)::text, ST_Y(geom)::text",
            meta
        );
        let untagged_columns = if untagged_nodes_geom {
            format!("osm_id::text, {}ST_X(geom)::text, ST_Y(geom)::text", meta)
        } else {
            format!("osm_id::text, {}x::text, y::text", meta)
        };
        let way_columns = format!("tags::text, osm_id::text, {}way_nodes::text", meta);
        let relation_columns = format!(
            "tags::text, osm_id::text, {}member_ids::text, member_types::text, member_roles::text",
            meta
        );
        Templates {
            nodes_in_bbox: QueryTemplate::new(
                "nodes_in_bbox",
                format!(
                    "SELECT {} FROM nodes WHERE ST_INTERSECTS(geom, {})",
                    node_columns, ENVELOPE
                ),
            ),
            node_by_id: QueryTemplate::new(
                "node_by_id",
                format!("SELECT {} FROM nodes WHERE osm_id = $1::bigint", node_columns),
            ),
            untagged_nodes_in_bbox: QueryTemplate::new(
                "untagged_nodes_in_bbox",
                format!(
                    "SELECT {} FROM untagged_nodes WHERE ST_INTERSECTS(geom, {})",
                    untagged_columns, ENVELOPE
                ),
            ),
            untagged_node_by_id: QueryTemplate::new(
                "untagged_node_by_id",
                format!(
                    "SELECT {} FROM untagged_nodes WHERE osm_id = $1::bigint",
                    untagged_columns
                ),
            ),
            ways_in_bbox: QueryTemplate::new(
                "ways_in_bbox",
                format!(
                    "SELECT {} FROM ways WHERE ST_INTERSECTS(geom, {})",
                    way_columns, ENVELOPE
                ),
            ),
            way_by_id: QueryTemplate::new(
                "way_by_id",
                format!("SELECT {} FROM ways WHERE osm_id = $1::bigint", way_columns),
            ),
            relations_in_bbox: QueryTemplate::new(
                "relations_in_bbox",
                format!(
                    "SELECT {} FROM relations WHERE ST_INTERSECTS(geom_points, {}) OR ST_INTERSECTS(geom_lines, {})",
                    relation_columns, ENVELOPE, ENVELOPE
                ),
            ),
            relation_by_id: QueryTemplate::new(
                "relation_by_id",
                format!(
                    "SELECT {} FROM relations WHERE osm_id = $1::bigint",
                    relation_columns
                ),
            ),
        }
    }
}

/// Column `index` of `row`, which may not be SQL NULL.
fn required(row: &Row, index: usize) -> Result<&str> {
    row.get(index)
        .and_then(|v| v.as_deref())
        .ok_or_else(|| Error::from(format!("query result column {} is missing or NULL", index)))
}

fn optional(row: &Row, index: usize) -> Option<&str> {
    row.get(index).and_then(|v| v.as_deref())
}

/// Decode an hstore tag column; SQL NULL and the empty literal both mean no
/// tags.
fn decode_tags(raw: Option<&str>) -> Result<Tags> {
    match raw {
        None => Ok(Vec::new()),
        Some(literal) => {
            let tags = HStoreParser::new(literal).collect::<std::result::Result<Tags, _>>()?;
            Ok(tags)
        }
    }
}

impl<E: QueryExecutor> CerepsoSource<E> {
    pub fn new(executor: E, config: &Config) -> CerepsoSource<E> {
        let metadata = MetadataFields::new(&config.metadata);
        CerepsoSource {
            executor,
            metadata,
            orphaned_nodes: config.orphaned_nodes,
            untagged_nodes_geom: config.untagged_nodes_geom,
            templates: Templates::new(&metadata, config.untagged_nodes_geom),
            bbox_params: Default::default(),
        }
    }

    fn decode_node_rows(&self, rows: Vec<Row>, with_tags: bool, sink: &mut Assembler) -> Result<()> {
        // Untagged node rows have no tags column in front.
        let base = if with_tags { 2 } else { 1 };
        for row in rows {
            let id: OsmId = required(&row, base - 1)?.parse()?;
            let metadata = self.metadata.extract(&row, base);
            let coords = base + self.metadata.count();
            let x = required(&row, coords)?;
            let y = required(&row, coords + 1)?;
            let location = if !with_tags && !self.untagged_nodes_geom {
                Location::from_fixed(x.parse()?, y.parse()?)
            } else {
                Location::new(x.parse()?, y.parse()?)
            };
            let tags = if with_tags {
                decode_tags(optional(&row, 0))?
            } else {
                Vec::new()
            };
            sink.add_node(id, location, metadata, tags);
        }
        Ok(())
    }

    fn decode_way_rows(&self, rows: Vec<Row>, sink: &mut Assembler) -> Result<()> {
        for row in rows {
            let id: OsmId = required(&row, 1)?.parse()?;
            let metadata = self.metadata.extract(&row, 2);
            let nodes_column = 2 + self.metadata.count();
            let nodes = ArrayParser::<Int64Conversion>::new(required(&row, nodes_column)?)
                .collect::<std::result::Result<Vec<OsmId>, _>>()?;
            let tags = decode_tags(optional(&row, 0))?;
            sink.add_way(id, nodes, metadata, tags);
        }
        Ok(())
    }

    fn decode_relation_rows(&self, rows: Vec<Row>, sink: &mut Assembler) -> Result<()> {
        for row in rows {
            let id: OsmId = required(&row, 1)?.parse()?;
            let metadata = self.metadata.extract(&row, 2);
            let members_column = 2 + self.metadata.count();
            let ids = ArrayParser::<Int64Conversion>::new(required(&row, members_column)?)
                .collect::<std::result::Result<Vec<OsmId>, _>>()?;
            let kinds = ArrayParser::<ItemTypeConversion>::new(required(&row, members_column + 1)?)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let roles = ArrayParser::<StringConversion>::new(required(&row, members_column + 2)?)
                .collect::<std::result::Result<Vec<String>, _>>()?;
            let members = zip_members(ids, kinds, roles, None)?;
            let tags = decode_tags(optional(&row, 0))?;
            sink.add_relation(id, members, metadata, tags);
        }
        Ok(())
    }
}

impl<E: QueryExecutor> DataSource for CerepsoSource<E> {
    fn set_bbox(&mut self, bbox: &BoundingBox) {
        self.bbox_params = [
            bbox.min_lon.to_string(),
            bbox.min_lat.to_string(),
            bbox.max_lon.to_string(),
            bbox.max_lat.to_string(),
        ];
    }

    fn nodes_inside(&mut self, sink: &mut Assembler) -> Result<()> {
        let params: Vec<&str> = self.bbox_params.iter().map(String::as_str).collect();
        let rows = self.executor.execute(&self.templates.nodes_in_bbox, &params)?;
        self.decode_node_rows(rows, true, sink)?;
        if self.orphaned_nodes {
            let rows = self
                .executor
                .execute(&self.templates.untagged_nodes_in_bbox, &params)?;
            self.decode_node_rows(rows, false, sink)?;
        }
        Ok(())
    }

    fn ways_inside(&mut self, sink: &mut Assembler) -> Result<()> {
        let params: Vec<&str> = self.bbox_params.iter().map(String::as_str).collect();
        let rows = self.executor.execute(&self.templates.ways_in_bbox, &params)?;
        self.decode_way_rows(rows, sink)
    }

    fn relations_inside(&mut self, sink: &mut Assembler) -> Result<()> {
        let params: Vec<&str> = self.bbox_params.iter().map(String::as_str).collect();
        let rows = self
            .executor
            .execute(&self.templates.relations_in_bbox, &params)?;
        self.decode_relation_rows(rows, sink)
    }

    fn missing_nodes(&mut self, ids: &BTreeSet<OsmId>, sink: &mut Assembler) -> Result<()> {
        for &id in ids {
            let id_param = id.to_string();
            // Most nodes referenced by ways are untagged, so that storage is
            // tried first and the nodes table is the fallback.
            let rows = self
                .executor
                .execute(&self.templates.untagged_node_by_id, &[id_param.as_str()])?;
            if !rows.is_empty() {
                self.decode_node_rows(rows, false, sink)?;
                continue;
            }
            let rows = self
                .executor
                .execute(&self.templates.node_by_id, &[id_param.as_str()])?;
            if rows.is_empty() {
                warn!(id = id, kind = "node"; "not found in any node table");
                continue;
            }
            self.decode_node_rows(rows, true, sink)?;
        }
        Ok(())
    }

    fn missing_ways(&mut self, ids: &BTreeSet<OsmId>, sink: &mut Assembler) -> Result<()> {
        for &id in ids {
            let id_param = id.to_string();
            let rows = self
                .executor
                .execute(&self.templates.way_by_id, &[id_param.as_str()])?;
            self.decode_way_rows(rows, sink)?;
        }
        Ok(())
    }

    fn missing_relations(&mut self, ids: &BTreeSet<OsmId>, sink: &mut Assembler) -> Result<()> {
        for &id in ids {
            let id_param = id.to_string();
            let rows = self
                .executor
                .execute(&self.templates.relation_by_id, &[id_param.as_str()])?;
            self.decode_relation_rows(rows, sink)?;
        }
        Ok(())
    }
}
