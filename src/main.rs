mod bbox;
mod config;
mod data;
mod errors;
mod pgtext;
mod source;
mod style;
mod tile;

use std::io;
use std::path::Path;

use log::info;
use structured_logger::json::new_writer;
use structured_logger::Builder;
use tqdm::tqdm;

use crate::bbox::{BoundingBox, TileId};
use crate::config::{Config, Schema};
use crate::errors::Result;
use crate::source::cerepso::CerepsoSource;
use crate::source::osm2pgsql::{FlatNodes, Osm2pgsqlSource};
use crate::source::pg::PgExecutor;
use crate::source::DataSource;
use crate::style::{parse_style_file, ColumnSet};
use crate::tile::writer::write_tile;
use crate::tile::TileBuilder;

fn setup_logging() {
    Builder::with_level("info")
        .with_target_writer("*", new_writer(io::stdout()))
        .init();
}

fn config_path() -> String {
    std::env::args().nth(1).unwrap_or_else(|| "vectile.json".to_string())
}

fn generate_one<S: DataSource>(
    builder: &mut TileBuilder<S>,
    tile: TileId,
    config: &Config,
) -> Result<()> {
    let bbox = BoundingBox::from_tile(tile);
    let name = tile.to_string();
    info!(tile = name.as_str(), quadtree = tile.quadtree_id(), bbox = bbox.to_string(); "generating tile");
    let entities = builder.build(&bbox)?;
    let path = config.output_file(&tile);
    write_tile(Path::new(&path), &entities, &bbox, config.force)?;
    info!(tile = name.as_str(), path = path.as_str(); "tile written");
    Ok(())
}

fn generate_tiles<S: DataSource>(
    mut builder: TileBuilder<S>,
    tiles: Vec<TileId>,
    config: &Config,
) -> Result<()> {
    if config.batch_mode() {
        for tile in tqdm(tiles.into_iter()) {
            generate_one(&mut builder, tile, config)?;
        }
    } else {
        for tile in tiles {
            generate_one(&mut builder, tile, config)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    setup_logging();

    let config = Config::from_file(&config_path())?;
    let tiles = config.tiles()?;
    info!(tiles = tiles.len(), database = config.database.as_str(); "starting tile generation");

    let executor = PgExecutor::connect(&config.connection_string())?;
    match config.schema {
        Schema::Cerepso => {
            let source = CerepsoSource::new(executor, &config);
            generate_tiles(TileBuilder::new(source, config.recurse), tiles, &config)
        }
        Schema::Osm2pgsql => {
            let columns = match &config.osm2pgsql_style {
                Some(path) => parse_style_file(path)?,
                None => ColumnSet::default(),
            };
            let flatnodes = match &config.flatnodes {
                Some(path) => Some(FlatNodes::open(Path::new(path))?),
                None => None,
            };
            let source = Osm2pgsqlSource::new(executor, columns, flatnodes);
            generate_tiles(TileBuilder::new(source, config.recurse), tiles, &config)
        }
    }
}
