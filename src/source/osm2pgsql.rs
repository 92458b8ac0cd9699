use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use log::warn;

use crate::bbox::BoundingBox;
use crate::data::osm::{EntityKind, Location, Member, Metadata, OsmId, Tags};
use crate::errors::{Error, Result};
use crate::pgtext::convert::{Int64Conversion, StringConversion};
use crate::pgtext::ArrayParser;
use crate::source::{DataSource, QueryExecutor, QueryTemplate, Row};
use crate::style::{ColumnSet, StyleColumn};
use crate::tile::assembler::Assembler;

const ENVELOPE: &str = "ST_MakeEnvelope($1::float8, $2::float8, $3::float8, $4::float8, 4326)";

/// Node locations stored in an osm2pgsql flatnodes file: one record of two
/// little-endian int32 fixed-point coordinates (lon, lat) per node ID.
/// Zero-filled records mark IDs the file has no entry for.
pub struct FlatNodes {
    file: File,
    size: u64,
}

impl FlatNodes {
    pub fn open(path: &Path) -> Result<FlatNodes> {
        let file = File::open(path)
            .map_err(|e| Error::from(format!("could not open flatnodes file {}: {}", path.display(), e)))?;
        let size = file.metadata()?.len();
        Ok(FlatNodes { file, size })
    }

    pub fn get(&mut self, id: OsmId) -> Result<Option<Location>> {
        if id < 0 {
            return Ok(None);
        }
        let offset = id as u64 * 8;
        if offset + 8 > self.size {
            return Ok(None);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let mut record = [0u8; 8];
        self.file.read_exact(&mut record)?;
        let x = i32::from_le_bytes([record[0], record[1], record[2], record[3]]);
        let y = i32::from_le_bytes([record[4], record[5], record[6], record[7]]);
        if x == 0 && y == 0 {
            return Ok(None);
        }
        Ok(Some(Location::from_fixed(x, y)))
    }
}

/// Data access for the osm2pgsql rendering layout.
///
/// The `planet_osm_point`/`line`/`polygon` tables answer the spatial queries;
/// relations appear in the polygon table as negated IDs. Way nodes, relation
/// members and tags come from the slim middle tables `planet_osm_ways` and
/// `planet_osm_rels`, where tags are interleaved `{k,v,...}` arrays and
/// members are interleaved `{type-prefixed-id,role,...}` arrays. The middle
/// tables carry no metadata, so objects from this source have none.
pub struct Osm2pgsqlSource<E: QueryExecutor> {
    executor: E,
    templates: Templates,
    point_columns: Vec<StyleColumn>,
    flatnodes: Option<FlatNodes>,
    bbox_params: [String; 4],
}

struct Templates {
    points_in_bbox: QueryTemplate,
    point_by_id: QueryTemplate,
    lines_in_bbox: QueryTemplate,
    way_polygons_in_bbox: QueryTemplate,
    relation_polygons_in_bbox: QueryTemplate,
    way_by_id: QueryTemplate,
    relation_by_id: QueryTemplate,
}

impl Templates {
    fn new(columns: &ColumnSet) -> Templates {
        let mut point_columns = String::new();
        for column in &columns.point {
            point_columns.push_str(&format!(", \"{}\"::text", column.name));
        }
        Templates {
            points_in_bbox: QueryTemplate::new(
                "points_in_bbox",
                format!(
                    "SELECT osm_id::text, ST_X(way)::text, ST_Y(way)::text{} FROM planet_osm_point WHERE ST_INTERSECTS(way, {})",
                    point_columns, ENVELOPE
                ),
            ),
            point_by_id: QueryTemplate::new(
                "point_by_id",
                format!(
                    "SELECT osm_id::text, ST_X(way)::text, ST_Y(way)::text{} FROM planet_osm_point WHERE osm_id = $1::bigint",
                    point_columns
                ),
            ),
            lines_in_bbox: QueryTemplate::new(
                "lines_in_bbox",
                format!(
                    "SELECT osm_id::text FROM planet_osm_line WHERE ST_INTERSECTS(way, {}) AND osm_id > 0",
                    ENVELOPE
                ),
            ),
            way_polygons_in_bbox: QueryTemplate::new(
                "way_polygons_in_bbox",
                format!(
                    "SELECT osm_id::text FROM planet_osm_polygon WHERE ST_INTERSECTS(way, {}) AND osm_id > 0",
                    ENVELOPE
                ),
            ),
            relation_polygons_in_bbox: QueryTemplate::new(
                "relation_polygons_in_bbox",
                format!(
                    "SELECT (-osm_id)::text FROM planet_osm_polygon WHERE ST_INTERSECTS(way, {}) AND osm_id < 0",
                    ENVELOPE
                ),
            ),
            way_by_id: QueryTemplate::new(
                "way_by_id",
                "SELECT nodes::text, tags::text FROM planet_osm_ways WHERE id = $1::bigint".to_string(),
            ),
            relation_by_id: QueryTemplate::new(
                "relation_by_id",
                "SELECT members::text, tags::text FROM planet_osm_rels WHERE id = $1::bigint".to_string(),
            ),
        }
    }
}

/// Decode an interleaved `{k,v,k,v,...}` tag array from the middle tables.
fn tags_from_interleaved(raw: Option<&str>) -> Result<Tags> {
    let raw = match raw {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(Vec::new()),
    };
    let elements = ArrayParser::<StringConversion>::new(raw)
        .collect::<std::result::Result<Vec<String>, _>>()?;
    if elements.len() % 2 != 0 {
        return Err(Error::from(format!(
            "interleaved tag array has an odd element count ({})",
            elements.len()
        )));
    }
    let mut elements = elements.into_iter();
    let mut tags = Tags::new();
    while let (Some(key), Some(value)) = (elements.next(), elements.next()) {
        tags.push((key, value));
    }
    Ok(tags)
}

/// Decode an interleaved `{w123,role,...}` member array. The member position
/// is the pair index.
fn members_from_interleaved(raw: Option<&str>) -> Result<Vec<Member>> {
    let raw = match raw {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(Vec::new()),
    };
    let elements = ArrayParser::<StringConversion>::new(raw)
        .collect::<std::result::Result<Vec<String>, _>>()?;
    if elements.len() % 2 != 0 {
        return Err(Error::from(format!(
            "interleaved member array has an odd element count ({})",
            elements.len()
        )));
    }
    let mut members = Vec::with_capacity(elements.len() / 2);
    let mut elements = elements.into_iter();
    let mut pos = 0;
    while let (Some(target), Some(role)) = (elements.next(), elements.next()) {
        let kind = match target.chars().next() {
            Some('n') => EntityKind::Node,
            Some('w') => EntityKind::Way,
            Some('r') => EntityKind::Relation,
            _ => EntityKind::Undefined,
        };
        let id: OsmId = if kind == EntityKind::Undefined {
            0
        } else {
            target[1..].parse().map_err(|_| {
                Error::from(format!("malformed member reference \"{}\"", target))
            })?
        };
        members.push(Member {
            kind,
            id,
            role,
            pos,
        });
        pos += 1;
    }
    Ok(members)
}

impl<E: QueryExecutor> Osm2pgsqlSource<E> {
    pub fn new(executor: E, columns: ColumnSet, flatnodes: Option<FlatNodes>) -> Osm2pgsqlSource<E> {
        Osm2pgsqlSource {
            executor,
            templates: Templates::new(&columns),
            point_columns: columns.point,
            flatnodes,
            bbox_params: Default::default(),
        }
    }

    /// Build a node from a point-table row; tags are the non-NULL style
    /// columns.
    fn decode_point_rows(&self, rows: Vec<Row>, sink: &mut Assembler) -> Result<()> {
        for row in rows {
            let id: OsmId = required(&row, 0)?.parse()?;
            let location = Location::new(required(&row, 1)?.parse()?, required(&row, 2)?.parse()?);
            let mut tags = Tags::new();
            for (offset, column) in self.point_columns.iter().enumerate() {
                if let Some(value) = row.get(3 + offset).and_then(|v| v.as_deref()) {
                    tags.push((column.name.clone(), value.to_string()));
                }
            }
            sink.add_node(id, location, Metadata::default(), tags);
        }
        Ok(())
    }

    fn spatial_ids(&mut self, template_index: SpatialQuery) -> Result<BTreeSet<OsmId>> {
        let params: Vec<&str> = self.bbox_params.iter().map(String::as_str).collect();
        let template = match template_index {
            SpatialQuery::Lines => &self.templates.lines_in_bbox,
            SpatialQuery::WayPolygons => &self.templates.way_polygons_in_bbox,
            SpatialQuery::RelationPolygons => &self.templates.relation_polygons_in_bbox,
        };
        let rows = self.executor.execute(template, &params)?;
        let mut ids = BTreeSet::new();
        for row in rows {
            ids.insert(required(&row, 0)?.parse()?);
        }
        Ok(ids)
    }

    fn way_from_middle(&mut self, id: OsmId, sink: &mut Assembler) -> Result<()> {
        let id_param = id.to_string();
        let rows = self
            .executor
            .execute(&self.templates.way_by_id, &[id_param.as_str()])?;
        let row = match rows.into_iter().next() {
            Some(row) => row,
            None => {
                warn!(id = id, kind = "way"; "not found in the middle table");
                return Ok(());
            }
        };
        let nodes = match required(&row, 0) {
            Ok(raw) => ArrayParser::<Int64Conversion>::new(raw)
                .collect::<std::result::Result<Vec<OsmId>, _>>()?,
            Err(_) => Vec::new(),
        };
        let tags = tags_from_interleaved(row.get(1).and_then(|v| v.as_deref()))?;
        sink.add_way(id, nodes, Metadata::default(), tags);
        Ok(())
    }

    fn relation_from_middle(&mut self, id: OsmId, sink: &mut Assembler) -> Result<()> {
        let id_param = id.to_string();
        let rows = self
            .executor
            .execute(&self.templates.relation_by_id, &[id_param.as_str()])?;
        let row = match rows.into_iter().next() {
            Some(row) => row,
            None => {
                warn!(id = id, kind = "relation"; "not found in the middle table");
                return Ok(());
            }
        };
        let members = members_from_interleaved(row.first().and_then(|v| v.as_deref()))?;
        let tags = tags_from_interleaved(row.get(1).and_then(|v| v.as_deref()))?;
        sink.add_relation(id, members, Metadata::default(), tags);
        Ok(())
    }
}

enum SpatialQuery {
    Lines,
    WayPolygons,
    RelationPolygons,
}

fn required(row: &Row, index: usize) -> Result<&str> {
    row.get(index)
        .and_then(|v| v.as_deref())
        .ok_or_else(|| Error::from(format!("query result column {} is missing or NULL", index)))
}

impl<E: QueryExecutor> DataSource for Osm2pgsqlSource<E> {
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
        let rows = self.executor.execute(&self.templates.points_in_bbox, &params)?;
        self.decode_point_rows(rows, sink)
    }

    fn ways_inside(&mut self, sink: &mut Assembler) -> Result<()> {
        let mut ids = self.spatial_ids(SpatialQuery::Lines)?;
        ids.extend(self.spatial_ids(SpatialQuery::WayPolygons)?);
        for id in ids {
            self.way_from_middle(id, sink)?;
        }
        Ok(())
    }

    fn relations_inside(&mut self, sink: &mut Assembler) -> Result<()> {
        let ids = self.spatial_ids(SpatialQuery::RelationPolygons)?;
        for id in ids {
            self.relation_from_middle(id, sink)?;
        }
        Ok(())
    }

    fn missing_nodes(&mut self, ids: &BTreeSet<OsmId>, sink: &mut Assembler) -> Result<()> {
        for &id in ids {
            let id_param = id.to_string();
            let rows = self
                .executor
                .execute(&self.templates.point_by_id, &[id_param.as_str()])?;
            if !rows.is_empty() {
                self.decode_point_rows(rows, sink)?;
                continue;
            }
            // Untagged nodes never reach the rendering tables; their location
            // lives only in the flatnodes file.
            if let Some(flatnodes) = &mut self.flatnodes {
                if let Some(location) = flatnodes.get(id)? {
                    sink.add_node(id, location, Metadata::default(), Vec::new());
                }
            }
        }
        Ok(())
    }

    fn missing_ways(&mut self, ids: &BTreeSet<OsmId>, sink: &mut Assembler) -> Result<()> {
        for &id in ids {
            self.way_from_middle(id, sink)?;
        }
        Ok(())
    }

    fn missing_relations(&mut self, ids: &BTreeSet<OsmId>, sink: &mut Assembler) -> Result<()> {
        for &id in ids {
            self.relation_from_middle(id, sink)?;
        }
        Ok(())
    }
}
