use std::fs::File;
use std::io::{BufRead, BufReader};

use regex::Regex;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Int,
    Real,
}

impl ColumnType {
    fn from_str(s: &str) -> Option<ColumnType> {
        match s {
            "text" => Some(ColumnType::Text),
            "int4" => Some(ColumnType::Int),
            "real" => Some(ColumnType::Real),
            _ => None,
        }
    }
}

/// One tag column of the osm2pgsql rendering tables.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleColumn {
    pub name: String,
    pub column_type: ColumnType,
}

/// The tag columns per rendering table, parsed from an osm2pgsql style file.
#[derive(Debug, Clone, Default)]
pub struct ColumnSet {
    pub point: Vec<StyleColumn>,
    pub line: Vec<StyleColumn>,
    pub polygon: Vec<StyleColumn>,
}

/// Parse an osm2pgsql style file.
///
/// Each non-comment line is `geometry name type flags`. Unsupported geometry
/// or column types are configuration errors and abort startup; they must never
/// be silently ignored.
pub fn parse_style_file(path: &str) -> Result<ColumnSet> {
    let file = File::open(path)
        .map_err(|e| Error::from(format!("could not open style file {}: {}", path, e)))?;
    parse_style(BufReader::new(file))
}

pub fn parse_style(reader: impl BufRead) -> Result<ColumnSet> {
    let line_re = Regex::new(r"^(\S+)\s+(\S+)\s+(\S+)(?:\s+(\S+))?$")?;
    let mut columns = ColumnSet::default();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = match line.find('#') {
            Some(pos) => &line[..pos],
            None => &line,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let captures = line_re.captures(line).ok_or_else(|| {
            Error::from(format!("configuration error: malformed style line {}: \"{}\"", number + 1, line))
        })?;
        let geometry = captures.get(1).map(|m| m.as_str()).unwrap_or("");
        let name = captures.get(2).map(|m| m.as_str()).unwrap_or("");
        let column_type = captures.get(3).map(|m| m.as_str()).unwrap_or("");
        let flags = captures.get(4).map(|m| m.as_str()).unwrap_or("");

        let (on_node, on_way) = match geometry {
            "node" => (true, false),
            "way" => (false, true),
            "node,way" | "way,node" => (true, true),
            _ => {
                return Err(Error::from(format!(
                    "configuration error: unsupported geometry type \"{}\" in style line {}",
                    geometry,
                    number + 1
                )))
            }
        };
        // Computed by osm2pgsql itself, never a real column here.
        if name == "way_area" || name == "z_order" {
            continue;
        }
        let column_type = ColumnType::from_str(column_type).ok_or_else(|| {
            Error::from(format!(
                "configuration error: unsupported column type \"{}\" in style line {}",
                column_type,
                number + 1
            ))
        })?;
        if flags.split(',').any(|f| f == "delete" || f == "nocolumn") {
            continue;
        }
        let column = StyleColumn {
            name: name.to_string(),
            column_type,
        };
        if on_node {
            columns.point.push(column.clone());
        }
        if on_way {
            let linear = flags.split(',').any(|f| f == "linear");
            let polygon = flags.split(',').any(|f| f == "polygon");
            if linear || !polygon {
                columns.line.push(column.clone());
            }
            if polygon || !linear {
                columns.polygon.push(column);
            }
        }
    }
    Ok(columns)
}
