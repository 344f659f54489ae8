//! Tile map: derived collision/visibility/pathing grids, line of sight and destructibles

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::math::Vec2;
use super::path::{self, Cell};
use super::Team;

/// Tile material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileKind {
    Floor,
    Wall,
    Water,
    Glass,
    Metal,
    Wood,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub kind: TileKind,
    pub walkable: bool,
    pub bullet_penetrable: bool,
    #[serde(default)]
    pub destructible: bool,
    #[serde(default)]
    pub health: Option<f32>,
    #[serde(default)]
    pub texture: String,
}

impl Tile {
    pub fn floor(texture: &str) -> Self {
        Self {
            kind: TileKind::Floor,
            walkable: true,
            bullet_penetrable: true,
            destructible: false,
            health: None,
            texture: texture.to_string(),
        }
    }

    pub fn wall(texture: &str) -> Self {
        Self {
            kind: TileKind::Wall,
            walkable: false,
            bullet_penetrable: false,
            destructible: false,
            health: None,
            texture: texture.to_string(),
        }
    }

    /// Fraction of sight passing through this tile
    pub fn visibility(&self) -> f32 {
        match self.kind {
            TileKind::Wall => 0.0,
            TileKind::Glass => 0.5,
            _ => 1.0,
        }
    }
}

/// Axis-aligned rectangle anchored at its top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub id: String,
    pub position: Vec2,
    pub team: Team,
    #[serde(default)]
    pub angle: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BombSite {
    pub id: String,
    pub name: String,
    pub bounds: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Crate,
    Barrel,
    Car,
    Door,
    Window,
}

/// Placed prop. `position` is the centre, `size` the full extent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapObject {
    pub id: String,
    pub kind: ObjectKind,
    pub position: Vec2,
    pub size: Vec2,
    pub health: f32,
    pub destructible: bool,
    pub provides_cover: bool,
    /// Damage multiplier for bullets passing through
    pub bullet_penetration: f32,
}

impl MapObject {
    pub fn bounds(&self) -> Rect {
        Rect {
            x: self.position.x - self.size.x / 2.0,
            y: self.position.y - self.size.y / 2.0,
            width: self.size.x,
            height: self.size.y,
        }
    }
}

/// Serializable map description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapData {
    pub name: String,
    pub tile_size: f32,
    /// Row-major: `tiles[y][x]`
    pub tiles: Vec<Vec<Tile>>,
    pub spawn_points: Vec<SpawnPoint>,
    #[serde(default)]
    pub bomb_sites: Vec<BombSite>,
    #[serde(default)]
    pub objects: Vec<MapObject>,
}

impl MapData {
    pub fn from_json(json: &str) -> Result<Self, MapError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Built-in 2048x2048 desert map with 32px tiles
    pub fn dust() -> Self {
        const TILE: f32 = 32.0;
        const SIZE: usize = 64;

        let tiles = (0..SIZE)
            .map(|y| {
                (0..SIZE)
                    .map(|x| {
                        let border = x == 0 || y == 0 || x == SIZE - 1 || y == SIZE - 1;
                        let long_wall = (11..15).contains(&x) && (11..40).contains(&y);
                        let small_wall = (31..35).contains(&x) && (21..25).contains(&y);
                        let short_wall = (46..50).contains(&x) && (11..15).contains(&y);
                        if border || long_wall || small_wall || short_wall {
                            Tile::wall("wall_dust")
                        } else {
                            Tile::floor("floor_dust")
                        }
                    })
                    .collect()
            })
            .collect();

        let spawn = |id: &str, x: f32, y: f32, team: Team, angle: f32| SpawnPoint {
            id: id.to_string(),
            position: Vec2::new(x, y),
            team,
            angle,
        };
        let pi = std::f32::consts::PI;

        let object = |id: &str, kind: ObjectKind, x: f32, y: f32, w: f32, h: f32| {
            let (health, destructible, penetration) = match kind {
                ObjectKind::Crate => (200.0, true, 0.5),
                ObjectKind::Barrel => (100.0, true, 0.3),
                _ => (500.0, false, 0.1),
            };
            MapObject {
                id: id.to_string(),
                kind,
                position: Vec2::new(x, y),
                size: Vec2::new(w, h),
                health,
                destructible,
                provides_cover: true,
                bullet_penetration: penetration,
            }
        };

        Self {
            name: "de_dust2".to_string(),
            tile_size: TILE,
            tiles,
            spawn_points: vec![
                spawn("ct_1", 256.0, 256.0, Team::Ct, 0.0),
                spawn("ct_2", 288.0, 256.0, Team::Ct, 0.0),
                spawn("ct_3", 320.0, 256.0, Team::Ct, 0.0),
                spawn("ct_4", 256.0, 288.0, Team::Ct, 0.0),
                spawn("ct_5", 288.0, 288.0, Team::Ct, 0.0),
                spawn("t_1", 1792.0, 1792.0, Team::T, pi),
                spawn("t_2", 1760.0, 1792.0, Team::T, pi),
                spawn("t_3", 1728.0, 1792.0, Team::T, pi),
                spawn("t_4", 1792.0, 1760.0, Team::T, pi),
                spawn("t_5", 1760.0, 1760.0, Team::T, pi),
            ],
            bomb_sites: vec![
                BombSite {
                    id: "site_a".to_string(),
                    name: "A".to_string(),
                    bounds: Rect { x: 512.0, y: 512.0, width: 256.0, height: 256.0 },
                },
                BombSite {
                    id: "site_b".to_string(),
                    name: "B".to_string(),
                    bounds: Rect { x: 1280.0, y: 1280.0, width: 256.0, height: 256.0 },
                },
            ],
            objects: vec![
                object("crate_1", ObjectKind::Crate, 640.0, 400.0, 64.0, 64.0),
                object("crate_2", ObjectKind::Crate, 600.0, 600.0, 64.0, 64.0),
                object("crate_3", ObjectKind::Crate, 1400.0, 600.0, 64.0, 64.0),
                object("barrel_1", ObjectKind::Barrel, 800.0, 400.0, 32.0, 32.0),
                object("barrel_2", ObjectKind::Barrel, 1200.0, 800.0, 32.0, 32.0),
                object("car_1", ObjectKind::Car, 1000.0, 1000.0, 128.0, 64.0),
            ],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("map has no tiles")]
    EmptyGrid,

    #[error("row {row} has {found} tiles, expected {expected}")]
    RaggedRow { row: usize, expected: usize, found: usize },

    #[error("invalid tile size {0}")]
    InvalidTileSize(f32),

    #[error("map has no spawn point for team {0:?}")]
    MissingSpawns(Team),

    #[error("failed to parse map: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Where a bullet path first meets something it cannot pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstruction {
    pub cell: Cell,
    pub point: Vec2,
    pub distance: f32,
}

/// The active map with its derived grids
#[derive(Debug, Clone)]
pub struct GameMap {
    data: MapData,
    width: usize,
    height: usize,
    /// true where movement is blocked (tiles and cover objects)
    collision: Vec<bool>,
    visibility: Vec<f32>,
    /// true where path search may step
    pathing: Vec<bool>,
}

impl GameMap {
    /// Validate `data` and build the derived grids
    pub fn load(data: MapData) -> Result<Self, MapError> {
        if !(data.tile_size.is_finite() && data.tile_size > 0.0) {
            return Err(MapError::InvalidTileSize(data.tile_size));
        }
        let height = data.tiles.len();
        let width = data.tiles.first().map(Vec::len).unwrap_or(0);
        if height == 0 || width == 0 {
            return Err(MapError::EmptyGrid);
        }
        if let Some((row, found)) = data
            .tiles
            .iter()
            .map(Vec::len)
            .enumerate()
            .find(|(_, len)| *len != width)
        {
            return Err(MapError::RaggedRow { row, expected: width, found });
        }
        for team in [Team::Ct, Team::T] {
            if !data.spawn_points.iter().any(|s| s.team == team) {
                return Err(MapError::MissingSpawns(team));
            }
        }

        let mut map = Self {
            data,
            width,
            height,
            collision: Vec::new(),
            visibility: Vec::new(),
            pathing: Vec::new(),
        };
        map.rebuild_grids();

        info!(
            map = %map.data.name,
            width,
            height,
            objects = map.data.objects.len(),
            "Map loaded"
        );
        Ok(map)
    }

    /// Replace the active map; on failure the current map is kept
    pub fn replace(&mut self, data: MapData) -> Result<(), MapError> {
        *self = Self::load(data)?;
        Ok(())
    }

    fn rebuild_grids(&mut self) {
        let tiles = self.data.tiles.iter().flatten();
        self.collision = tiles.clone().map(|t| !t.walkable).collect();
        self.visibility = tiles.map(Tile::visibility).collect();

        let blocked: Vec<Cell> = self
            .data
            .objects
            .iter()
            .filter(|o| o.provides_cover)
            .flat_map(|o| self.cells_under(o.bounds()))
            .collect();
        for (x, y) in blocked {
            self.collision[y * self.width + x] = true;
        }

        self.pathing = self.collision.iter().map(|blocked| !blocked).collect();
    }

    /// Cells whose centre lies inside `rect`
    fn cells_under(&self, rect: Rect) -> Vec<Cell> {
        let ts = self.data.tile_size;
        let mut cells = Vec::new();
        for y in 0..self.height {
            for x in 0..self.width {
                let center = Vec2::new((x as f32 + 0.5) * ts, (y as f32 + 0.5) * ts);
                if rect.contains(center) {
                    cells.push((x, y));
                }
            }
        }
        cells
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn tile_size(&self) -> f32 {
        self.data.tile_size
    }

    /// Grid dimensions in tiles (width, height)
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// World extent in pixels
    pub fn world_size(&self) -> Vec2 {
        Vec2::new(
            self.width as f32 * self.data.tile_size,
            self.height as f32 * self.data.tile_size,
        )
    }

    pub fn cell_at(&self, position: Vec2) -> Option<Cell> {
        if !position.is_finite() {
            return None;
        }
        let x = (position.x / self.data.tile_size).floor();
        let y = (position.y / self.data.tile_size).floor();
        if x < 0.0 || y < 0.0 || x >= self.width as f32 || y >= self.height as f32 {
            return None;
        }
        Some((x as usize, y as usize))
    }

    pub fn cell_center(&self, cell: Cell) -> Vec2 {
        let ts = self.data.tile_size;
        Vec2::new((cell.0 as f32 + 0.5) * ts, (cell.1 as f32 + 0.5) * ts)
    }

    pub fn tile(&self, cell: Cell) -> Option<&Tile> {
        self.data.tiles.get(cell.1).and_then(|row| row.get(cell.0))
    }

    pub fn tile_at(&self, position: Vec2) -> Option<&Tile> {
        self.cell_at(position).and_then(|cell| self.tile(cell))
    }

    /// Out of bounds is never walkable
    pub fn is_walkable(&self, position: Vec2) -> bool {
        self.cell_at(position)
            .map(|(x, y)| !self.collision[y * self.width + x])
            .unwrap_or(false)
    }

    pub fn visibility_at(&self, position: Vec2) -> f32 {
        self.cell_at(position)
            .map(|(x, y)| self.visibility[y * self.width + x])
            .unwrap_or(0.0)
    }

    fn samples(&self, from: Vec2, to: Vec2) -> impl Iterator<Item = (f32, Vec2)> {
        let delta = to - from;
        let distance = delta.length();
        let steps = (distance / (self.data.tile_size / 2.0)).ceil().max(1.0) as u32;
        (0..=steps).map(move |i| {
            let t = i as f32 / steps as f32;
            (distance * t, from + delta * t)
        })
    }

    /// Samples the segment every half tile against the visibility grid;
    /// any opaque cell blocks sight
    pub fn line_of_sight(&self, from: Vec2, to: Vec2) -> bool {
        !self.samples(from, to).any(|(_, p)| {
            self.cell_at(p)
                .is_some_and(|(x, y)| self.visibility[y * self.width + x] <= 0.0)
        })
    }

    /// First sampled tile along the segment that stops bullets
    pub fn first_bullet_obstruction(&self, from: Vec2, to: Vec2) -> Option<Obstruction> {
        self.samples(from, to).find_map(|(distance, point)| {
            let cell = self.cell_at(point)?;
            let tile = self.tile(cell)?;
            (!tile.bullet_penetrable).then_some(Obstruction { cell, point, distance })
        })
    }

    /// Tile-centre waypoints from `start` to `end`; empty when unreachable
    pub fn find_path(&self, start: Vec2, end: Vec2) -> Vec<Vec2> {
        let (Some(from), Some(to)) = (self.cell_at(start), self.cell_at(end)) else {
            return Vec::new();
        };
        path::find_path(&self.pathing, self.width, from, to)
            .into_iter()
            .map(|cell| self.cell_center(cell))
            .collect()
    }

    pub fn spawn_points(&self, team: Team) -> impl Iterator<Item = &SpawnPoint> {
        self.data.spawn_points.iter().filter(move |s| s.team == team)
    }

    pub fn bomb_sites(&self) -> &[BombSite] {
        &self.data.bomb_sites
    }

    pub fn bomb_site_at(&self, position: Vec2) -> Option<&BombSite> {
        self.data.bomb_sites.iter().find(|s| s.bounds.contains(position))
    }

    pub fn objects(&self) -> &[MapObject] {
        &self.data.objects
    }

    pub fn object(&self, id: &str) -> Option<&MapObject> {
        self.data.objects.iter().find(|o| o.id == id)
    }

    /// Returns true when the object was destroyed by this hit.
    /// Non-destructible and unknown objects ignore damage.
    pub fn damage_object(&mut self, id: &str, amount: f32) -> bool {
        let Some(index) = self.data.objects.iter().position(|o| o.id == id) else {
            return false;
        };
        let object = &mut self.data.objects[index];
        if !object.destructible {
            return false;
        }

        object.health -= amount;
        if object.health > 0.0 {
            return false;
        }

        let removed = self.data.objects.remove(index);
        debug!(object_id = %removed.id, "Map object destroyed");
        if removed.provides_cover {
            self.rebuild_grids();
        }
        true
    }

    /// Damage a destructible tile; destroyed tiles become walkable rubble
    pub fn damage_tile(&mut self, cell: Cell, amount: f32) -> bool {
        let Some(tile) = self.data.tiles.get_mut(cell.1).and_then(|row| row.get_mut(cell.0))
        else {
            return false;
        };
        if !tile.destructible {
            return false;
        }
        let Some(health) = tile.health.as_mut() else {
            return false;
        };

        *health -= amount;
        if *health > 0.0 {
            return false;
        }

        *tile = Tile {
            kind: TileKind::Floor,
            walkable: true,
            bullet_penetrable: true,
            destructible: false,
            health: None,
            texture: format!("{}_rubble", tile.texture),
        };
        self.rebuild_grids();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_map(width: usize, height: usize) -> MapData {
        MapData {
            name: "test".to_string(),
            tile_size: 32.0,
            tiles: vec![vec![Tile::floor("floor"); width]; height],
            spawn_points: vec![
                SpawnPoint { id: "ct".into(), position: Vec2::new(16.0, 16.0), team: Team::Ct, angle: 0.0 },
                SpawnPoint { id: "t".into(), position: Vec2::new(48.0, 48.0), team: Team::T, angle: 0.0 },
            ],
            bomb_sites: Vec::new(),
            objects: Vec::new(),
        }
    }

    #[test]
    fn dust_map_loads_with_expected_layout() {
        let map = GameMap::load(MapData::dust()).unwrap();
        assert_eq!(map.dimensions(), (64, 64));
        assert_eq!(map.spawn_points(Team::Ct).count(), 5);
        assert_eq!(map.spawn_points(Team::T).count(), 5);
        assert!(!map.is_walkable(Vec2::new(5.0, 5.0)));
        assert!(map.is_walkable(Vec2::new(256.0, 256.0)));
        assert_eq!(map.bomb_site_at(Vec2::new(600.0, 700.0)).map(|s| s.name.as_str()), Some("A"));
    }

    #[test]
    fn ragged_and_empty_grids_are_rejected() {
        let mut data = open_map(4, 4);
        data.tiles[2].pop();
        assert!(matches!(
            GameMap::load(data),
            Err(MapError::RaggedRow { row: 2, expected: 4, found: 3 })
        ));

        let mut empty = open_map(4, 4);
        empty.tiles.clear();
        assert!(matches!(GameMap::load(empty), Err(MapError::EmptyGrid)));

        let mut bad = open_map(2, 2);
        bad.tile_size = 0.0;
        assert!(matches!(GameMap::load(bad), Err(MapError::InvalidTileSize(_))));
    }

    #[test]
    fn out_of_bounds_is_not_walkable() {
        let map = GameMap::load(open_map(4, 4)).unwrap();
        assert!(map.is_walkable(Vec2::new(10.0, 10.0)));
        assert!(!map.is_walkable(Vec2::new(-1.0, 10.0)));
        assert!(!map.is_walkable(Vec2::new(10.0, 128.0)));
        assert!(!map.is_walkable(Vec2::new(f32::NAN, 0.0)));
    }

    #[test]
    fn walls_block_sight_but_glass_does_not() {
        let mut data = open_map(8, 3);
        data.tiles[1][3] = Tile::wall("wall");
        data.tiles[0][3] = Tile {
            kind: TileKind::Glass,
            walkable: false,
            bullet_penetrable: false,
            destructible: false,
            health: None,
            texture: "glass".into(),
        };
        let map = GameMap::load(data).unwrap();

        assert!(!map.line_of_sight(Vec2::new(16.0, 48.0), Vec2::new(240.0, 48.0)));
        assert!(map.line_of_sight(Vec2::new(16.0, 16.0), Vec2::new(240.0, 16.0)));
        assert!(map.line_of_sight(Vec2::new(16.0, 80.0), Vec2::new(240.0, 80.0)));
        assert_eq!(map.visibility_at(Vec2::new(100.0, 16.0)), 0.5);
    }

    #[test]
    fn path_runs_between_tile_centres() {
        let map = GameMap::load(open_map(10, 10)).unwrap();
        let path = map.find_path(Vec2::new(5.0, 5.0), Vec2::new(310.0, 310.0));
        assert_eq!(path.len(), 19);
        assert_eq!(path[0], Vec2::new(16.0, 16.0));
        assert_eq!(path[18], Vec2::new(304.0, 304.0));
    }

    #[test]
    fn destroying_cover_reopens_the_grid() {
        let mut data = open_map(6, 6);
        data.objects.push(MapObject {
            id: "crate".into(),
            kind: ObjectKind::Crate,
            position: Vec2::new(96.0, 96.0),
            size: Vec2::new(64.0, 64.0),
            health: 50.0,
            destructible: true,
            provides_cover: true,
            bullet_penetration: 0.5,
        });
        let mut map = GameMap::load(data).unwrap();
        assert!(!map.is_walkable(Vec2::new(80.0, 80.0)));

        assert!(!map.damage_object("crate", 30.0));
        assert!(map.damage_object("crate", 30.0));
        assert!(map.object("crate").is_none());
        assert!(map.is_walkable(Vec2::new(80.0, 80.0)));
        assert!(!map.damage_object("crate", 30.0));
    }

    #[test]
    fn indestructible_objects_ignore_damage() {
        let mut map = GameMap::load(MapData::dust()).unwrap();
        assert!(!map.damage_object("car_1", 10_000.0));
        assert_eq!(map.object("car_1").map(|o| o.health), Some(500.0));
    }

    #[test]
    fn destructible_tile_becomes_rubble() {
        let mut data = open_map(4, 4);
        data.tiles[1][1] = Tile {
            kind: TileKind::Wood,
            walkable: false,
            bullet_penetrable: false,
            destructible: true,
            health: Some(40.0),
            texture: "planks".into(),
        };
        let mut map = GameMap::load(data).unwrap();
        let center = map.cell_center((1, 1));
        assert!(map.first_bullet_obstruction(Vec2::new(16.0, 48.0), Vec2::new(112.0, 48.0)).is_some());

        assert!(!map.damage_tile((1, 1), 20.0));
        assert!(map.damage_tile((1, 1), 20.0));
        assert!(map.is_walkable(center));
        assert!(map.first_bullet_obstruction(Vec2::new(16.0, 48.0), Vec2::new(112.0, 48.0)).is_none());
    }

    #[test]
    fn breached_wall_restores_sight() {
        let mut data = open_map(6, 3);
        data.tiles[1][3] = Tile {
            kind: TileKind::Wall,
            walkable: false,
            bullet_penetrable: false,
            destructible: true,
            health: Some(50.0),
            texture: "brick".into(),
        };
        let mut map = GameMap::load(data).unwrap();
        let (from, to) = (Vec2::new(16.0, 48.0), Vec2::new(176.0, 48.0));
        assert!(!map.line_of_sight(from, to));
        assert_eq!(map.visibility_at(map.cell_center((3, 1))), 0.0);

        assert!(map.damage_tile((3, 1), 50.0));
        assert!(map.line_of_sight(from, to));
        assert_eq!(map.visibility_at(map.cell_center((3, 1))), 1.0);
    }
}
