//! World maps: walkability, spawn data, and chunk extraction.
//!
//! Maps are loaded from JSON files at startup (TMX conversion happens in
//! external tooling). The movement service consults [`MapManager`] as its
//! collision oracle; the chunk service slices the tile grid into
//! fixed-size chunks for the client.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tilefall_core::constants::CHUNK_SIZE;
use tilefall_core::messages::ChunkDataPayload;

/// A static entity spawn point on a map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub id: i64,
    /// Entity definition name (e.g. `GOBLIN`).
    pub entity: String,
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub wander_radius: i32,
    #[serde(default)]
    pub aggro_override: Option<i32>,
    #[serde(default)]
    pub disengage_override: Option<i32>,
}

/// On-disk map format.
#[derive(Debug, Deserialize)]
struct MapFile {
    id: String,
    width: i32,
    height: i32,
    spawn_x: i32,
    spawn_y: i32,
    /// Row-major tile ids; absent rows/cells default to tile 1 (grass).
    #[serde(default)]
    tiles: Vec<Vec<u16>>,
    /// Coordinates of non-walkable tiles.
    #[serde(default)]
    blocked: Vec<(i32, i32)>,
    #[serde(default)]
    spawn_points: Vec<SpawnPoint>,
}

/// One loaded map: tile grid, collision grid, spawn data.
#[derive(Debug, Clone)]
pub struct WorldMap {
    pub id: String,
    pub width: i32,
    pub height: i32,
    pub spawn_x: i32,
    pub spawn_y: i32,
    tiles: Vec<u16>,
    blocked: Vec<bool>,
    pub spawn_points: Vec<SpawnPoint>,
}

impl WorldMap {
    /// Builds an all-walkable map with spawn at the center. Test worlds and
    /// the built-in fallback map start from this.
    #[must_use]
    pub fn open_field(id: impl Into<String>, width: i32, height: i32) -> Self {
        let cells = usize::try_from(width.max(0) * height.max(0)).unwrap_or(0);
        Self {
            id: id.into(),
            width,
            height,
            spawn_x: width / 2,
            spawn_y: height / 2,
            tiles: vec![1; cells],
            blocked: vec![false; cells],
            spawn_points: Vec::new(),
        }
    }

    /// Marks one tile non-walkable. Out-of-bounds coordinates are ignored.
    pub fn block_tile(&mut self, x: i32, y: i32) {
        if let Some(idx) = self.index(x, y) {
            self.blocked[idx] = true;
        }
    }

    /// Sets the spawn position.
    pub fn set_spawn(&mut self, x: i32, y: i32) {
        self.spawn_x = x;
        self.spawn_y = y;
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return None;
        }
        usize::try_from(y * self.width + x).ok()
    }

    /// Whether `(x, y)` is inside the map and not blocked.
    #[must_use]
    pub fn is_walkable(&self, x: i32, y: i32) -> bool {
        self.index(x, y).is_some_and(|idx| !self.blocked[idx])
    }

    /// Collision oracle for one step: the destination must be walkable.
    #[must_use]
    pub fn is_valid_move(&self, _from_x: i32, _from_y: i32, to_x: i32, to_y: i32) -> bool {
        self.is_walkable(to_x, to_y)
    }

    /// Extracts the `CHUNK_SIZE` x `CHUNK_SIZE` chunk at chunk coordinates
    /// `(cx, cy)`. Cells beyond the map edge pad with tile 0 / blocked.
    #[must_use]
    pub fn chunk(&self, cx: i32, cy: i32) -> ChunkDataPayload {
        let size = CHUNK_SIZE;
        let base_x = cx * size;
        let base_y = cy * size;

        let mut tiles = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
        let mut collision = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
        for dy in 0..size {
            let mut tile_row = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
            let mut coll_row = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
            for dx in 0..size {
                let (x, y) = (base_x + dx, base_y + dy);
                match self.index(x, y) {
                    Some(idx) => {
                        tile_row.push(self.tiles[idx]);
                        coll_row.push(self.blocked[idx]);
                    }
                    None => {
                        tile_row.push(0);
                        coll_row.push(true);
                    }
                }
            }
            tiles.push(tile_row);
            collision.push(coll_row);
        }

        ChunkDataPayload {
            map_id: self.id.clone(),
            cx,
            cy,
            size,
            tiles,
            collision,
        }
    }

    fn from_file(file: MapFile) -> Self {
        let mut map = Self::open_field(file.id, file.width, file.height);
        map.spawn_x = file.spawn_x;
        map.spawn_y = file.spawn_y;
        for (y, row) in file.tiles.iter().enumerate() {
            for (x, tile) in row.iter().enumerate() {
                let (x, y) = (
                    i32::try_from(x).unwrap_or(i32::MAX),
                    i32::try_from(y).unwrap_or(i32::MAX),
                );
                if let Some(idx) = map.index(x, y) {
                    map.tiles[idx] = *tile;
                }
            }
        }
        for (x, y) in file.blocked {
            map.block_tile(x, y);
        }
        map.spawn_points = file.spawn_points;
        map
    }
}

/// Registry of loaded maps. Read-only after startup.
#[derive(Debug, Default)]
pub struct MapManager {
    maps: HashMap<String, WorldMap>,
}

impl MapManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            maps: HashMap::new(),
        }
    }

    /// Registers one map, replacing any previous map with the same id.
    pub fn insert(&mut self, map: WorldMap) {
        self.maps.insert(map.id.clone(), map);
    }

    /// Loads every `*.json` map file in a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read or a file fails to
    /// parse.
    pub fn load_dir(&mut self, dir: &Path) -> anyhow::Result<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let raw = std::fs::read_to_string(&path)?;
                let file: MapFile = serde_json::from_str(&raw)?;
                tracing::info!(map_id = %file.id, path = %path.display(), "loaded map");
                self.insert(WorldMap::from_file(file));
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    #[must_use]
    pub fn get(&self, map_id: &str) -> Option<&WorldMap> {
        self.maps.get(map_id)
    }

    /// Whether the step onto `(to_x, to_y)` on `map_id` is allowed.
    /// Unknown maps block everything.
    #[must_use]
    pub fn is_valid_move(&self, map_id: &str, from_x: i32, from_y: i32, to_x: i32, to_y: i32) -> bool {
        self.maps
            .get(map_id)
            .is_some_and(|m| m.is_valid_move(from_x, from_y, to_x, to_y))
    }

    /// Whether `(x, y)` on `map_id` is walkable.
    #[must_use]
    pub fn is_walkable(&self, map_id: &str, x: i32, y: i32) -> bool {
        self.maps.get(map_id).is_some_and(|m| m.is_walkable(x, y))
    }

    /// The death-respawn position for a map, if the map exists.
    #[must_use]
    pub fn spawn_position(&self, map_id: &str) -> Option<(i32, i32)> {
        self.maps.get(map_id).map(|m| (m.spawn_x, m.spawn_y))
    }

    /// Iterates all loaded maps.
    pub fn iter(&self) -> impl Iterator<Item = &WorldMap> {
        self.maps.values()
    }
}
