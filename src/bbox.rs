use std::fmt;
use std::io::BufRead;
use std::str::FromStr;

use crate::data::osm::Location;
use crate::errors::{Error, Result};

/// Radius of the spherical earth model used by web-mercator tiling.
const EARTH_RADIUS: f64 = 6_378_137.0;
/// Half the circumference of that sphere, i.e. the mercator coordinate of the
/// antimeridian.
const HALF_CIRCUMFERENCE: f64 = 20_037_508.342_789_244;

/// Index of a tile in the usual z/x/y tiling scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileId {
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
}

impl TileId {
    pub fn new(x: u32, y: u32, zoom: u8) -> Result<TileId> {
        if zoom > 31 {
            return Err(Error::from(format!("zoom level {} is out of range", zoom)));
        }
        let map_width = BoundingBox::zoom_to_map_width(zoom);
        if x >= map_width || y >= map_width {
            return Err(Error::from(format!(
                "tile {}/{}/{} does not exist, zoom level {} has only {}x{} tiles",
                zoom, x, y, zoom, map_width, map_width
            )));
        }
        Ok(TileId { x, y, zoom })
    }

    /// Interleave x and y into a quadtree ID (YXYX… from the highest bits),
    /// a compact and zoom-stable identifier for a tile.
    pub fn quadtree_id(&self) -> i64 {
        let x = self.x as i64;
        let y = self.y as i64;
        let mut qt: i64 = 0;
        for z in 0..self.zoom as i64 {
            qt += (x & (1 << z)) << z;
            qt += (y & (1 << z)) << (z + 1);
        }
        qt
    }
}

impl FromStr for TileId {
    type Err = Error;

    /// Parses the `zoom/x/y` form used by tile expiry lists.
    fn from_str(s: &str) -> Result<TileId> {
        let mut parts = s.trim().split('/');
        let zoom = parts.next().unwrap_or("");
        let x = parts.next();
        let y = parts.next();
        match (x, y, parts.next()) {
            (Some(x), Some(y), None) => TileId::new(x.parse()?, y.parse()?, zoom.parse()?),
            _ => Err(Error::from(format!("malformed tile index \"{}\", expected zoom/x/y", s))),
        }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Read a tile list in the expiry-list format, one `zoom/x/y` per line.
pub fn read_tile_list(reader: impl BufRead) -> Result<Vec<TileId>> {
    let mut tiles = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        tiles.push(line.parse()?);
    }
    Ok(tiles)
}

/// Geographic window of one tile build in EPSG:4326 degrees.
///
/// One instance drives one tile build and is replaced, not mutated, between
/// tiles. When derived from a tile index the index is kept for output naming
/// and logging.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
    pub tile: Option<TileId>,
}

impl BoundingBox {
    pub fn from_tile(tile: TileId) -> BoundingBox {
        let map_width = Self::zoom_to_map_width(tile.zoom);
        let min_lon = Self::merc_to_lon(Self::tile_x_to_merc(tile.x as f64, map_width));
        let max_lon = Self::merc_to_lon(Self::tile_x_to_merc(tile.x as f64 + 1.0, map_width));
        let min_lat = Self::merc_to_lat(Self::tile_y_to_merc(tile.y as f64 + 1.0, map_width));
        let max_lat = Self::merc_to_lat(Self::tile_y_to_merc(tile.y as f64, map_width));
        BoundingBox {
            min_lon: min_lon.clamp(-180.0, 180.0),
            min_lat,
            max_lon: max_lon.clamp(-180.0, 180.0),
            max_lat,
            tile: Some(tile),
        }
    }

    pub fn from_corners(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> BoundingBox {
        BoundingBox {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
            tile: None,
        }
    }

    /// A collapsed box selects nothing and points at a configuration mistake.
    pub fn is_valid(&self) -> bool {
        self.min_lon != self.max_lon && self.min_lat != self.max_lat
    }

    pub fn contains(&self, location: &Location) -> bool {
        location.lon >= self.min_lon
            && location.lon <= self.max_lon
            && location.lat >= self.min_lat
            && location.lat <= self.max_lat
    }

    /// Number of tiles along one axis at the given zoom level.
    pub fn zoom_to_map_width(zoom: u8) -> u32 {
        1u32 << zoom
    }

    /// Mercator x coordinate of the western edge of tile column `x`.
    pub fn tile_x_to_merc(x: f64, map_width: u32) -> f64 {
        HALF_CIRCUMFERENCE * (2.0 * x / map_width as f64 - 1.0)
    }

    /// Mercator y coordinate of the northern edge of tile row `y`. Tile rows
    /// count from the north, mercator y grows to the north.
    pub fn tile_y_to_merc(y: f64, map_width: u32) -> f64 {
        HALF_CIRCUMFERENCE * (1.0 - 2.0 * y / map_width as f64)
    }

    pub fn merc_to_lon(x: f64) -> f64 {
        Self::radians_to_degree(x / EARTH_RADIUS)
    }

    pub fn merc_to_lat(y: f64) -> f64 {
        Self::radians_to_degree(2.0 * (y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2)
    }

    pub fn radians_to_degree(coordinate: f64) -> f64 {
        coordinate / std::f64::consts::PI * 180.0
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) -- ({}, {})",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}
