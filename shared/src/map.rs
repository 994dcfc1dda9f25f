//! Static level data shared by the server and every client
//!
//! A level is a rectangular grid of tiles stored as text, one row per line:
//! `.` is empty space, `c` is a coin and `e` is an electric hazard. Any other
//! character is reserved and loads as empty space.
//!
//! The map is loaded once at server startup, never mutated afterwards, and
//! shipped to each client verbatim inside a MapData frame.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Largest width or height a map may have; coordinates travel as u16
pub const MAX_DIMENSION: usize = u16::MAX as usize;

/// Largest serialized map, so that it fits in a single frame payload
pub const MAX_SERIALIZED_SIZE: usize = 0xFF_FFFF;

/// A single cell of the level grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tile {
    #[default]
    Empty,
    Coin,
    Hazard,
}

impl Tile {
    /// Decodes a tile from its level-file character
    ///
    /// Unrecognized characters map to `Empty` so that reserved codes in
    /// newer level files do not break older servers.
    pub fn from_code(code: u8) -> Self {
        match code {
            b'c' => Tile::Coin,
            b'e' => Tile::Hazard,
            _ => Tile::Empty,
        }
    }

    /// Returns the canonical level-file character for this tile
    pub fn code(self) -> u8 {
        match self {
            Tile::Empty => b'.',
            Tile::Coin => b'c',
            Tile::Hazard => b'e',
        }
    }
}

/// Errors raised while loading a level
#[derive(Debug, Error)]
pub enum MapError {
    #[error("failed to read map file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("map contains no rows")]
    Empty,
    #[error("row {row} has length {found}, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("map of {width}x{height} tiles exceeds the protocol limit")]
    TooLarge { width: usize, height: usize },
}

/// Immutable tile grid indexed by column `x` and row `y`
///
/// Row 0 is the top of the level. All rows share the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelMap {
    tiles: Vec<Tile>,
    width: usize,
    height: usize,
}

impl LevelMap {
    /// Reads and parses a level file from disk
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, MapError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| MapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::load_from_bytes(&data)
    }

    /// Parses a level from its text form
    ///
    /// Lines may end in `\n` or `\r\n`. Trailing blank lines are ignored;
    /// every remaining line must have the same length.
    pub fn load_from_bytes(data: &[u8]) -> Result<Self, MapError> {
        let mut rows: Vec<&[u8]> = data
            .split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .collect();

        while rows.last().is_some_and(|row| row.is_empty()) {
            rows.pop();
        }

        let width = match rows.first() {
            Some(first) if !first.is_empty() => first.len(),
            _ => return Err(MapError::Empty),
        };
        let height = rows.len();

        if width > MAX_DIMENSION
            || height > MAX_DIMENSION
            || (width + 1) * height > MAX_SERIALIZED_SIZE
        {
            return Err(MapError::TooLarge { width, height });
        }

        let mut tiles = Vec::with_capacity(width * height);
        for (index, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(MapError::RaggedRow {
                    row: index,
                    expected: width,
                    found: row.len(),
                });
            }
            tiles.extend(row.iter().map(|&code| Tile::from_code(code)));
        }

        Ok(Self {
            tiles,
            width,
            height,
        })
    }

    /// Encodes the map in its canonical text form, one `\n`-terminated row per line
    pub fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity((self.width + 1) * self.height);
        for row in self.tiles.chunks(self.width) {
            data.extend(row.iter().map(|tile| tile.code()));
            data.push(b'\n');
        }
        data
    }

    /// Returns the tile at `(x, y)`, or `Empty` outside the grid
    pub fn tile(&self, x: usize, y: usize) -> Tile {
        if x >= self.width || y >= self.height {
            return Tile::Empty;
        }
        self.tiles[y * self.width + x]
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_simple_map() {
        let map = LevelMap::load_from_bytes(b"..c..\n.e...\n").unwrap();

        assert_eq!(map.width(), 5);
        assert_eq!(map.height(), 2);
        assert_eq!(map.tile(2, 0), Tile::Coin);
        assert_eq!(map.tile(1, 1), Tile::Hazard);
        assert_eq!(map.tile(0, 0), Tile::Empty);
    }

    #[test]
    fn test_load_without_trailing_newline() {
        let map = LevelMap::load_from_bytes(b"c.\n.e").unwrap();

        assert_eq!(map.height(), 2);
        assert_eq!(map.tile(1, 1), Tile::Hazard);
    }

    #[test]
    fn test_load_crlf_lines() {
        let map = LevelMap::load_from_bytes(b"..c\r\ne..\r\n\r\n").unwrap();

        assert_eq!(map.width(), 3);
        assert_eq!(map.height(), 2);
        assert_eq!(map.tile(2, 0), Tile::Coin);
        assert_eq!(map.tile(0, 1), Tile::Hazard);
    }

    #[test]
    fn test_unknown_characters_load_as_empty() {
        let map = LevelMap::load_from_bytes(b"x_c#\n").unwrap();

        assert_eq!(map.tile(0, 0), Tile::Empty);
        assert_eq!(map.tile(1, 0), Tile::Empty);
        assert_eq!(map.tile(2, 0), Tile::Coin);
        assert_eq!(map.tile(3, 0), Tile::Empty);
    }

    #[test]
    fn test_empty_source_is_rejected() {
        assert!(matches!(LevelMap::load_from_bytes(b""), Err(MapError::Empty)));
        assert!(matches!(
            LevelMap::load_from_bytes(b"\n\n"),
            Err(MapError::Empty)
        ));
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        let result = LevelMap::load_from_bytes(b"....\n...\n....\n");

        match result {
            Err(MapError::RaggedRow {
                row,
                expected,
                found,
            }) => {
                assert_eq!(row, 1);
                assert_eq!(expected, 4);
                assert_eq!(found, 3);
            }
            other => panic!("Expected ragged row error, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_line_inside_map_is_ragged() {
        assert!(matches!(
            LevelMap::load_from_bytes(b"...\n\n...\n"),
            Err(MapError::RaggedRow { row: 1, .. })
        ));
    }

    #[test]
    fn test_out_of_range_tiles_are_empty() {
        let map = LevelMap::load_from_bytes(b"ccc\nccc\n").unwrap();

        assert_eq!(map.tile(3, 0), Tile::Empty);
        assert_eq!(map.tile(0, 2), Tile::Empty);
        assert_eq!(map.tile(usize::MAX, usize::MAX), Tile::Empty);
    }

    #[test]
    fn test_serialize_is_canonical() {
        let map = LevelMap::load_from_bytes(b".?c\r\ne..").unwrap();

        assert_eq!(map.serialize(), b"..c\ne..\n".to_vec());
    }

    #[test]
    fn test_serialize_round_trip() {
        let maps: [&[u8]; 3] = [b"..c..\n", b"e\n", b"..cc..e...\n.e..c.....\n......eeee\n"];

        for source in maps {
            let map = LevelMap::load_from_bytes(source).unwrap();
            let reloaded = LevelMap::load_from_bytes(&map.serialize()).unwrap();
            assert_eq!(reloaded, map);
        }
    }

    #[test]
    fn test_oversized_map_is_rejected() {
        let row = vec![b'.'; MAX_DIMENSION + 1];
        assert!(matches!(
            LevelMap::load_from_bytes(&row),
            Err(MapError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let result = LevelMap::load_from_file("/definitely/not/a/real/level.txt");
        assert!(matches!(result, Err(MapError::Io { .. })));
    }

    #[test]
    fn test_tile_codes() {
        for tile in [Tile::Empty, Tile::Coin, Tile::Hazard] {
            assert_eq!(Tile::from_code(tile.code()), tile);
        }
    }
}
