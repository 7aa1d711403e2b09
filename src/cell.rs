//! Cell keys and block positions.
//!
//! A world is partitioned into square chunks of [`CHUNK_SIZE`] blocks. A
//! [`CellKey`] addresses one chunk and is the unit of ownership for both
//! individual claims and town territory.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Width of a chunk in blocks, as a shift.
const CHUNK_SHIFT: u32 = 4;

/// Width of a chunk in blocks.
pub const CHUNK_SIZE: i32 = 1 << CHUNK_SHIFT;

/// Address of one chunk: `(world, chunk_x, chunk_z)`.
///
/// Serialized as the string `"world:x,z"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CellKey {
    /// World name.
    pub world: String,
    /// Chunk X coordinate.
    pub x: i32,
    /// Chunk Z coordinate.
    pub z: i32,
}

impl CellKey {
    /// Create a key from chunk coordinates.
    #[must_use]
    pub fn new(world: impl Into<String>, x: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            z,
        }
    }

    /// Key of the chunk containing the given block column.
    ///
    /// Uses an arithmetic shift, so negative blocks round toward negative
    /// infinity: block -1 lives in chunk -1, not chunk 0.
    #[must_use]
    pub fn from_block(world: impl Into<String>, block_x: i32, block_z: i32) -> Self {
        Self::new(world, block_x >> CHUNK_SHIFT, block_z >> CHUNK_SHIFT)
    }

    /// The four face-adjacent neighbours (north, south, west, east).
    #[must_use]
    pub fn face_neighbors(&self) -> [CellKey; 4] {
        [
            Self::new(self.world.clone(), self.x, self.z - 1),
            Self::new(self.world.clone(), self.x, self.z + 1),
            Self::new(self.world.clone(), self.x - 1, self.z),
            Self::new(self.world.clone(), self.x + 1, self.z),
        ]
    }

    /// Whether `other` shares a full edge with this cell.
    ///
    /// Diagonal neighbours and cells in other worlds are never adjacent.
    #[must_use]
    pub fn is_face_adjacent(&self, other: &CellKey) -> bool {
        if self.world != other.world {
            return false;
        }
        let dx = (i64::from(self.x) - i64::from(other.x)).abs();
        let dz = (i64::from(self.z) - i64::from(other.z)).abs();
        dx + dz == 1
    }

    /// Chebyshev distance in chunks, or `None` across worlds.
    #[must_use]
    pub fn chebyshev_distance(&self, other: &CellKey) -> Option<u64> {
        if self.world != other.world {
            return None;
        }
        let dx = (i64::from(self.x) - i64::from(other.x)).unsigned_abs();
        let dz = (i64::from(self.z) - i64::from(other.z)).unsigned_abs();
        Some(dx.max(dz))
    }

    /// All cells within `radius` chunks (Chebyshev), excluding this one.
    pub fn surrounding(&self, radius: i32) -> impl Iterator<Item = CellKey> + '_ {
        let radius = radius.max(0);
        (-radius..=radius).flat_map(move |dx| {
            (-radius..=radius).filter_map(move |dz| {
                if dx == 0 && dz == 0 {
                    None
                } else {
                    Some(Self::new(
                        self.world.clone(),
                        self.x.saturating_add(dx),
                        self.z.saturating_add(dz),
                    ))
                }
            })
        })
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{},{}", self.world, self.x, self.z)
    }
}

impl From<CellKey> for String {
    fn from(key: CellKey) -> Self {
        key.to_string()
    }
}

/// Error returned when a cell key string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed cell key {0:?}, expected \"world:x,z\"")]
pub struct ParseCellKeyError(pub String);

impl FromStr for CellKey {
    type Err = ParseCellKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseCellKeyError(s.to_string());
        // World names may themselves contain ':'; coordinates never do.
        let (world, coords) = s.rsplit_once(':').ok_or_else(err)?;
        let (x, z) = coords.split_once(',').ok_or_else(err)?;
        if world.is_empty() {
            return Err(err());
        }
        let x = x.trim().parse().map_err(|_| err())?;
        let z = z.trim().parse().map_err(|_| err())?;
        Ok(Self::new(world, x, z))
    }
}

impl TryFrom<String> for CellKey {
    type Error = ParseCellKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A block position inside a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate (height).
    pub y: i32,
    /// Z coordinate.
    pub z: i32,
}

impl BlockPos {
    /// Create a new block position.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Chebyshev distance to `other` in blocks.
    #[must_use]
    pub fn chebyshev_distance(self, other: BlockPos) -> u64 {
        let dx = (i64::from(self.x) - i64::from(other.x)).unsigned_abs();
        let dy = (i64::from(self.y) - i64::from(other.y)).unsigned_abs();
        let dz = (i64::from(self.z) - i64::from(other.z)).unsigned_abs();
        dx.max(dy).max(dz)
    }

    /// The chunk containing this position.
    #[must_use]
    pub fn cell(self, world: impl Into<String>) -> CellKey {
        CellKey::from_block(world, self.x, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_block_floors_negatives() {
        assert_eq!(CellKey::from_block("w", 0, 15), CellKey::new("w", 0, 0));
        assert_eq!(CellKey::from_block("w", 16, -1), CellKey::new("w", 1, -1));
        assert_eq!(CellKey::from_block("w", -16, -17), CellKey::new("w", -1, -2));
    }

    #[test]
    fn test_display_and_parse() {
        let key = CellKey::new("world_nether", -3, 7);
        assert_eq!(key.to_string(), "world_nether:-3,7");
        assert_eq!("world_nether:-3,7".parse::<CellKey>().unwrap(), key);
    }

    #[test]
    fn test_parse_world_with_colon() {
        let key: CellKey = "minecraft:overworld:1,2".parse().unwrap();
        assert_eq!(key.world, "minecraft:overworld");
        assert_eq!((key.x, key.z), (1, 2));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("nocoords".parse::<CellKey>().is_err());
        assert!("w:1".parse::<CellKey>().is_err());
        assert!("w:a,b".parse::<CellKey>().is_err());
        assert!(":1,2".parse::<CellKey>().is_err());
    }

    #[test]
    fn test_face_adjacency() {
        let origin = CellKey::new("w", 0, 0);
        assert!(origin.is_face_adjacent(&CellKey::new("w", 1, 0)));
        assert!(origin.is_face_adjacent(&CellKey::new("w", 0, -1)));
        assert!(!origin.is_face_adjacent(&CellKey::new("w", 1, 1)));
        assert!(!origin.is_face_adjacent(&origin));
        assert!(!origin.is_face_adjacent(&CellKey::new("other", 1, 0)));
        for n in origin.face_neighbors() {
            assert!(origin.is_face_adjacent(&n));
        }
    }

    #[test]
    fn test_surrounding_counts() {
        let origin = CellKey::new("w", 5, 5);
        assert_eq!(origin.surrounding(0).count(), 0);
        assert_eq!(origin.surrounding(1).count(), 8);
        assert_eq!(origin.surrounding(2).count(), 24);
    }

    #[test]
    fn test_serde_as_string() {
        let key = CellKey::new("w", 4, -9);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"w:4,-9\"");
        let back: CellKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_block_chebyshev() {
        let a = BlockPos::new(0, 64, 0);
        assert_eq!(a.chebyshev_distance(BlockPos::new(1, 65, -1)), 1);
        assert_eq!(a.chebyshev_distance(BlockPos::new(0, 66, 0)), 2);
    }
}
