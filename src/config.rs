use std::fs::File;
use std::io::BufReader;

use serde::Deserialize;

use crate::bbox::{read_tile_list, TileId};
use crate::errors::{Error, Result};

/// Which metadata columns the database carries. Every disabled column is
/// entirely absent from queries and from the produced objects.
#[derive(Deserialize, Debug, Clone, Copy)]
pub struct MetadataOptions {
    #[serde(default = "default_true")]
    pub user: bool,
    #[serde(default = "default_true")]
    pub uid: bool,
    #[serde(default = "default_true")]
    pub version: bool,
    #[serde(default = "default_true")]
    pub timestamp: bool,
    #[serde(default = "default_true")]
    pub changeset: bool,
}

impl Default for MetadataOptions {
    fn default() -> Self {
        MetadataOptions {
            user: true,
            uid: true,
            version: true,
            timestamp: true,
            changeset: true,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Schema {
    /// Direct tables: `nodes`, `untagged_nodes`, `ways`, `relations`.
    Cerepso,
    /// `planet_osm_*` tables with slim middle tables and a flatnodes file.
    Osm2pgsql,
}

/// Which referenced-but-missing entity kinds are fetched recursively.
#[derive(Deserialize, Debug, Clone, Copy, Default)]
pub struct RecursionFlags {
    #[serde(default)]
    pub nodes: bool,
    #[serde(default)]
    pub ways: bool,
    #[serde(default)]
    pub relations: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// Database name or a full connection string.
    pub database: String,
    /// Output file in single-tile mode, output prefix in batch mode.
    pub output_path: String,
    #[serde(default = "default_file_suffix")]
    pub file_suffix: String,

    /// Tile index for single-tile mode.
    pub x: Option<u32>,
    pub y: Option<u32>,
    pub zoom: Option<u8>,
    /// Tile list file for batch mode; one `zoom/x/y` per line.
    #[serde(default)]
    pub tile_list: Option<String>,

    #[serde(default)]
    pub recurse: RecursionFlags,
    /// Also run a spatial query against the untagged nodes storage.
    #[serde(default)]
    pub orphaned_nodes: bool,
    /// Overwrite existing output files.
    #[serde(default)]
    pub force: bool,
    /// Does the `untagged_nodes` table have a geometry column, or raw x/y
    /// int32 columns?
    #[serde(default)]
    pub untagged_nodes_geom: bool,

    #[serde(default = "default_schema")]
    pub schema: Schema,
    /// osm2pgsql style file describing the tag columns of the rendering tables.
    #[serde(default)]
    pub osm2pgsql_style: Option<String>,
    /// osm2pgsql flatnodes file holding untagged node locations.
    #[serde(default)]
    pub flatnodes: Option<String>,

    #[serde(default)]
    pub metadata: MetadataOptions,
}

fn default_true() -> bool {
    true
}

fn default_file_suffix() -> String {
    "osm".to_string()
}

fn default_schema() -> Schema {
    Schema::Cerepso
}

impl Config {
    pub fn from_file(path: &str) -> Result<Config> {
        let file = File::open(path)
            .map_err(|e| Error::from(format!("could not open config file {}: {}", path, e)))?;
        let config: Config = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject impossible configurations before any database work starts.
    fn validate(&self) -> Result<()> {
        if !matches!(self.file_suffix.as_str(), "osm" | "xml" | "osm.xml") {
            return Err(Error::from(format!(
                "configuration error: unsupported file suffix \"{}\", only OSM XML output is available",
                self.file_suffix
            )));
        }
        if self.tile_list.is_none() {
            match (self.x, self.y, self.zoom) {
                (Some(x), Some(y), Some(zoom)) => {
                    TileId::new(x, y, zoom)?;
                }
                _ => {
                    return Err(Error::from(
                        "configuration error: either x, y and zoom or a tile_list file must be given",
                    ))
                }
            }
        }
        if self.schema == Schema::Cerepso && self.osm2pgsql_style.is_some() {
            return Err(Error::from(
                "configuration error: osm2pgsql_style has no meaning with the cerepso schema",
            ));
        }
        Ok(())
    }

    pub fn batch_mode(&self) -> bool {
        self.tile_list.is_some()
    }

    /// The tiles this run generates, either the single configured tile or the
    /// content of the tile list file.
    pub fn tiles(&self) -> Result<Vec<TileId>> {
        match &self.tile_list {
            Some(path) => {
                let file = File::open(path)
                    .map_err(|e| Error::from(format!("could not open tile list {}: {}", path, e)))?;
                read_tile_list(BufReader::new(file))
            }
            // validate() guarantees the indices are present.
            None => Ok(vec![TileId::new(
                self.x.unwrap_or(0),
                self.y.unwrap_or(0),
                self.zoom.unwrap_or(0),
            )?]),
        }
    }

    /// Output path for one tile. Batch mode appends `zoom_x_y.suffix` to the
    /// output prefix, single-tile mode uses the configured path as given.
    pub fn output_file(&self, tile: &TileId) -> String {
        if self.batch_mode() {
            format!(
                "{}{}_{}_{}.{}",
                self.output_path, tile.zoom, tile.x, tile.y, self.file_suffix
            )
        } else {
            self.output_path.clone()
        }
    }

    /// Connection string for the database, accepting a bare database name as
    /// a shorthand.
    pub fn connection_string(&self) -> String {
        if self.database.contains('=') {
            self.database.clone()
        } else {
            format!("dbname={}", self.database)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(extra: &str) -> Result<Config> {
        let json = format!(
            r#"{{"database": "osm", "output_path": "tile.osm", "x": 1, "y": 2, "zoom": 3{}}}"#,
            extra
        );
        let config: Config = serde_json::from_str(&json).map_err(Error::from)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn minimal_config_with_defaults() {
        let config = minimal("").unwrap();
        assert_eq!(config.file_suffix, "osm");
        assert_eq!(config.schema, Schema::Cerepso);
        assert!(!config.recurse.ways);
        assert!(config.metadata.version);
        assert!(!config.batch_mode());
        assert_eq!(config.tiles().unwrap(), vec![TileId::new(1, 2, 3).unwrap()]);
    }

    #[test]
    fn unsupported_suffix_is_a_configuration_error() {
        assert!(minimal(r#", "file_suffix": "pbf""#).is_err());
    }

    #[test]
    fn tile_out_of_zoom_range_is_a_configuration_error() {
        let json = r#"{"database": "osm", "output_path": "t.osm", "x": 9, "y": 0, "zoom": 3}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn style_file_requires_osm2pgsql_schema() {
        assert!(minimal(r#", "osm2pgsql_style": "default.style""#).is_err());
        assert!(minimal(r#", "schema": "osm2pgsql", "osm2pgsql_style": "default.style""#).is_ok());
    }

    #[test]
    fn batch_output_naming() {
        let config = minimal(r#", "recurse": {"ways": true}"#).unwrap();
        let tile = TileId::new(1, 2, 3).unwrap();
        assert_eq!(config.output_file(&tile), "tile.osm");
        assert!(config.recurse.ways);
    }

    #[test]
    fn connection_string_shorthand() {
        let config = minimal("").unwrap();
        assert_eq!(config.connection_string(), "dbname=osm");
    }
}
