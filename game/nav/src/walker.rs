//! Minion navigation: a tile mesh of walkable-height cells with the same
//! query surface the worker used to get from the tile-cache library —
//! nearest-cell snap within search extents, A\* with straightening, random
//! point around a circle, and cylinder obstacles that recompile the tiles
//! they touch.
//!
//! File section layout (little-endian), ahead of the drone graph in the same
//! level file:
//!
//! ```text
//! Vec3 tile_min
//! i32 width, i32 height                    // tiles in x / z
//! per cell (width * height), row-major:
//!   i32 layer_count
//!   per layer: i32 data_size, u8[data_size] compressed cells (lz4)
//! ```
//!
//! A decompressed layer is `TILE_SIZE * TILE_SIZE` bytes; `0xff` marks an
//! unwalkable cell, anything else is a height step above `tile_min.y`.

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use common::*;

use crate::path::WalkPath;

/// Cells per tile side
pub const TILE_SIZE: usize = 16;
/// Metres per cell
pub const CELL_RESOLUTION: F = 0.5;
/// Unwalkable cell marker
pub const CELL_EMPTY: u8 = 0xff;
/// Max height steps a walker can climb between adjacent cells
const CLIMB_STEPS: i32 = 2;

#[derive(Debug, Error)]
pub enum WalkerLoadError {
    #[error("Failed to read tile cache: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decompress tile layer: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),

    #[error("Bad layer size {0}")]
    BadLayerSize(usize),

    #[error("Bad tile grid {width}x{height}")]
    BadGrid { width: i32, height: i32 },
}

pub struct TileLayer {
    /// `TILE_SIZE * TILE_SIZE` height steps, row-major in (x, z)
    pub heights: Box<[u8]>,
}

pub struct Tile {
    pub layers: Vec<TileLayer>,
    /// Cells currently covered by an obstacle, rebuilt per tile on obstacle
    /// changes: (cell index within tile, layer)
    blocked: HashSet<(u16, u8)>,
}

#[derive(Copy, Clone, Debug)]
struct Obstacle {
    pos: Vec3,
    radius: F,
    height: F,
}

/// One walkable cell: global cell column plus which layer of its tile
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct CellRef {
    pub cx: i32,
    pub cz: i32,
    pub layer: u8,
}

pub struct TileMesh {
    origin: Vec3,
    width: i32,
    height: i32,
    tiles: Vec<Tile>,
    obstacles: HashMap<u32, Obstacle>,
}

impl TileMesh {
    pub fn read_from(r: &mut impl Read) -> Result<Self, WalkerLoadError> {
        let origin = {
            let x = r.read_f32::<LittleEndian>()?;
            let y = r.read_f32::<LittleEndian>()?;
            let z = r.read_f32::<LittleEndian>()?;
            vec3(x, y, z)
        };
        let width = r.read_i32::<LittleEndian>()?;
        let height = r.read_i32::<LittleEndian>()?;
        if !(0..=4096).contains(&width) || !(0..=4096).contains(&height) {
            return Err(WalkerLoadError::BadGrid { width, height });
        }

        let mut tiles = Vec::with_capacity((width * height) as usize);
        for _ in 0..width * height {
            let layer_count = r.read_i32::<LittleEndian>()?;
            let mut layers = Vec::with_capacity(layer_count.max(0) as usize);
            for _ in 0..layer_count {
                let data_size = r.read_i32::<LittleEndian>()?.max(0) as usize;
                let mut compressed = vec![0u8; data_size];
                r.read_exact(&mut compressed)?;

                let cells = lz4_flex::decompress_size_prepended(&compressed)?;
                if cells.len() != TILE_SIZE * TILE_SIZE {
                    return Err(WalkerLoadError::BadLayerSize(cells.len()));
                }
                layers.push(TileLayer {
                    heights: cells.into_boxed_slice(),
                });
            }
            tiles.push(Tile {
                layers,
                blocked: HashSet::new(),
            });
        }

        Ok(Self {
            origin,
            width,
            height,
            tiles,
            obstacles: HashMap::new(),
        })
    }

    pub fn write_to(&self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_f32::<LittleEndian>(self.origin.x)?;
        w.write_f32::<LittleEndian>(self.origin.y)?;
        w.write_f32::<LittleEndian>(self.origin.z)?;
        w.write_i32::<LittleEndian>(self.width)?;
        w.write_i32::<LittleEndian>(self.height)?;
        for tile in &self.tiles {
            w.write_i32::<LittleEndian>(tile.layers.len() as i32)?;
            for layer in &tile.layers {
                let compressed = lz4_flex::compress_prepend_size(&layer.heights);
                w.write_i32::<LittleEndian>(compressed.len() as i32)?;
                w.write_all(&compressed)?;
            }
        }
        Ok(())
    }

    /// Reads past the tile cache section without building it, for the bridge
    /// side which only wants the drone graph that follows
    pub fn skip_section(r: &mut impl Read) -> Result<(), WalkerLoadError> {
        let mut header = [0u8; 12];
        r.read_exact(&mut header)?;
        let width = r.read_i32::<LittleEndian>()?;
        let height = r.read_i32::<LittleEndian>()?;
        if !(0..=4096).contains(&width) || !(0..=4096).contains(&height) {
            return Err(WalkerLoadError::BadGrid { width, height });
        }
        for _ in 0..width * height {
            let layer_count = r.read_i32::<LittleEndian>()?;
            for _ in 0..layer_count {
                let data_size = r.read_i32::<LittleEndian>()?.max(0) as u64;
                std::io::copy(&mut r.by_ref().take(data_size), &mut std::io::sink())?;
            }
        }
        Ok(())
    }

    pub fn from_tiles(origin: Vec3, width: i32, height: i32, layers: Vec<Vec<TileLayer>>) -> Self {
        debug_assert_eq!(layers.len(), (width * height) as usize);
        Self {
            origin,
            width,
            height,
            tiles: layers
                .into_iter()
                .map(|layers| Tile {
                    layers,
                    blocked: HashSet::new(),
                })
                .collect(),
            obstacles: HashMap::new(),
        }
    }

    fn tile_of(&self, cx: i32, cz: i32) -> Option<(usize, u16)> {
        let (tx, tz) = (cx.div_euclid(TILE_SIZE as i32), cz.div_euclid(TILE_SIZE as i32));
        if tx < 0 || tx >= self.width || tz < 0 || tz >= self.height || cx < 0 || cz < 0 {
            return None;
        }
        let cell = (cx.rem_euclid(TILE_SIZE as i32)
            + cz.rem_euclid(TILE_SIZE as i32) * TILE_SIZE as i32) as u16;
        Some(((tx + tz * self.width) as usize, cell))
    }

    fn height_steps(&self, cell: CellRef) -> Option<i32> {
        let (tile, index) = self.tile_of(cell.cx, cell.cz)?;
        let tile = &self.tiles[tile];
        let layer = tile.layers.get(cell.layer as usize)?;
        let h = layer.heights[index as usize];
        (h != CELL_EMPTY && !tile.blocked.contains(&(index, cell.layer))).then_some(h as i32)
    }

    /// World position of a cell's centre
    pub fn position(&self, cell: CellRef) -> Vec3 {
        let steps = self.height_steps(cell).unwrap_or(0);
        vec3(
            self.origin.x + (cell.cx as F + 0.5) * CELL_RESOLUTION,
            self.origin.y + steps as F * CELL_RESOLUTION,
            self.origin.z + (cell.cz as F + 0.5) * CELL_RESOLUTION,
        )
    }

    /// The walkable layer in column (cx, cz) closest to height `y`, within
    /// `max_dy` metres
    fn layer_near(&self, cx: i32, cz: i32, y: F, max_dy: F) -> Option<CellRef> {
        let (tile_index, index) = self.tile_of(cx, cz)?;
        let tile = &self.tiles[tile_index];

        let mut best: Option<(F, CellRef)> = None;
        for (layer, data) in tile.layers.iter().enumerate() {
            let h = data.heights[index as usize];
            if h == CELL_EMPTY || tile.blocked.contains(&(index, layer as u8)) {
                continue;
            }
            let dy = (self.origin.y + h as F * CELL_RESOLUTION - y).abs();
            if dy <= max_dy && best.map(|(d, _)| dy < d).unwrap_or(true) {
                best = Some((
                    dy,
                    CellRef {
                        cx,
                        cz,
                        layer: layer as u8,
                    },
                ));
            }
        }
        best.map(|(_, c)| c)
    }

    /// Nearest walkable cell to `pos` within the given half-extents, the
    /// walker equivalent of a nearest-poly query
    pub fn nearest(&self, pos: Vec3, extents: Vec3) -> Option<CellRef> {
        let min_cx = ((pos.x - extents.x - self.origin.x) / CELL_RESOLUTION).floor() as i32;
        let max_cx = ((pos.x + extents.x - self.origin.x) / CELL_RESOLUTION).ceil() as i32;
        let min_cz = ((pos.z - extents.z - self.origin.z) / CELL_RESOLUTION).floor() as i32;
        let max_cz = ((pos.z + extents.z - self.origin.z) / CELL_RESOLUTION).ceil() as i32;

        let mut best: Option<(F, CellRef)> = None;
        for cx in min_cx..=max_cx {
            for cz in min_cz..=max_cz {
                let cell = some_or_continue!(self.layer_near(cx, cz, pos.y, extents.y));
                let centre = self.position(cell);
                if (centre.x - pos.x).abs() > extents.x || (centre.z - pos.z).abs() > extents.z {
                    continue; // index overshoot past the box
                }
                let d = centre.distance2(pos);
                if best.map(|(b, _)| d < b).unwrap_or(true) {
                    best = Some((d, cell));
                }
            }
        }
        best.map(|(_, c)| c)
    }

    fn step_neighbour(&self, from: CellRef, dx: i32, dz: i32) -> Option<CellRef> {
        let from_h = self.height_steps(from)?;
        let y = self.origin.y + from_h as F * CELL_RESOLUTION;
        self.layer_near(
            from.cx + dx,
            from.cz + dz,
            y,
            CLIMB_STEPS as F * CELL_RESOLUTION,
        )
    }

    /// 4-connected A\* between two cells, then greedy string pulling over
    /// the raw cell path. On an unreachable goal the path is clamped to the
    /// closest cell the search saw
    pub fn find_path(&self, start: CellRef, end: CellRef, path: &mut WalkPath) {
        path.clear();
        if self.height_steps(start).is_none() || self.height_steps(end).is_none() {
            return;
        }

        let end_pos = self.position(end);
        let heuristic = |c: CellRef| {
            ((c.cx - end.cx).abs() + (c.cz - end.cz).abs()) as F * CELL_RESOLUTION
        };

        let mut scores: HashMap<CellRef, F> = HashMap::new();
        let mut came_from: HashMap<CellRef, CellRef> = HashMap::new();
        let mut visited: HashSet<CellRef> = HashSet::new();
        let mut queue = BinaryHeap::new();

        scores.insert(start, 0.0);
        queue.push(MinScored(heuristic(start), start));

        // closest approach, for clamping a partial path
        let mut best_seen = (heuristic(start), start);
        let mut reached = false;

        while let Some(MinScored(_, cell)) = queue.pop() {
            if cell == end {
                reached = true;
                break;
            }
            if !visited.insert(cell) {
                continue;
            }

            let h = heuristic(cell);
            if h < best_seen.0 {
                best_seen = (h, cell);
            }

            let score = scores[&cell];
            for (dx, dz) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
                let next = some_or_continue!(self.step_neighbour(cell, dx, dz));
                if visited.contains(&next) {
                    continue;
                }

                let climb = (self.position(cell).y - self.position(next).y).abs();
                let next_score = score + CELL_RESOLUTION + climb;

                let better = scores.get(&next).map(|&s| next_score < s).unwrap_or(true);
                if better {
                    scores.insert(next, next_score);
                    came_from.insert(next, cell);
                    queue.push(MinScored(next_score + heuristic(next), next));
                }
            }
        }

        let goal = if reached { end } else { best_seen.1 };
        if goal == start {
            if reached {
                let _ = path.try_push(self.position(start));
            }
            return;
        }

        let mut cells = vec![goal];
        let mut current = goal;
        while let Some(&prev) = came_from.get(&current) {
            cells.push(prev);
            current = prev;
            if current == start {
                break;
            }
        }
        cells.reverse();

        self.string_pull(&cells, path);
    }

    /// Greedy straightening: always jump to the furthest cell still in line
    /// of sight
    fn string_pull(&self, cells: &[CellRef], path: &mut WalkPath) {
        let mut i = 0;
        let _ = path.try_push(self.position(cells[0]));
        while i + 1 < cells.len() {
            let mut j = cells.len() - 1;
            while j > i + 1 && !self.has_line(cells[i], cells[j]) {
                j -= 1;
            }
            if path.try_push(self.position(cells[j])).is_err() {
                break; // capped, keep the prefix
            }
            i = j;
        }
    }

    /// Walkability along the segment between two cell centres, sampled at
    /// half-cell steps
    fn has_line(&self, a: CellRef, b: CellRef) -> bool {
        let pa = self.position(a);
        let pb = self.position(b);
        let steps = ((pb - pa).magnitude() / (CELL_RESOLUTION * 0.5)).ceil() as i32;
        for i in 0..=steps {
            let t = i as F / steps.max(1) as F;
            let p = pa + (pb - pa) * t;
            let cx = ((p.x - self.origin.x) / CELL_RESOLUTION).floor() as i32;
            let cz = ((p.z - self.origin.z) / CELL_RESOLUTION).floor() as i32;
            if self
                .layer_near(cx, cz, p.y, CLIMB_STEPS as F * CELL_RESOLUTION)
                .is_none()
            {
                return false;
            }
        }
        true
    }

    /// A walkable point roughly `radius` out from `center`, or None if the
    /// throw landed nowhere walkable
    pub fn random_point_around(
        &self,
        center: Vec3,
        radius: F,
        extents: Vec3,
        rng: &mut impl Rng,
    ) -> Option<Vec3> {
        let angle = rng.gen::<F>() * std::f32::consts::TAU;
        let dist = radius * rng.gen::<F>().sqrt();
        let target = center + vec3(angle.cos() * dist, 0.0, angle.sin() * dist);
        self.nearest(target, extents).map(|c| self.position(c))
    }

    pub fn add_obstacle(&mut self, id: u32, pos: Vec3, radius: F, height: F) {
        self.obstacles.insert(
            id,
            Obstacle {
                pos,
                radius,
                height,
            },
        );
        self.recompile_around(pos, radius);
    }

    pub fn remove_obstacle(&mut self, id: u32) {
        if let Some(obstacle) = self.obstacles.remove(&id) {
            self.recompile_around(obstacle.pos, obstacle.radius);
        }
    }

    /// Rebuilds the blocked overlay of every tile the footprint touches
    fn recompile_around(&mut self, pos: Vec3, radius: F) {
        let tile_metres = TILE_SIZE as F * CELL_RESOLUTION;
        let min_tx = ((pos.x - radius - self.origin.x) / tile_metres).floor() as i32;
        let max_tx = ((pos.x + radius - self.origin.x) / tile_metres).floor() as i32;
        let min_tz = ((pos.z - radius - self.origin.z) / tile_metres).floor() as i32;
        let max_tz = ((pos.z + radius - self.origin.z) / tile_metres).floor() as i32;

        for tx in min_tx.max(0)..=max_tx.min(self.width - 1) {
            for tz in min_tz.max(0)..=max_tz.min(self.height - 1) {
                self.recompile_tile(tx, tz);
            }
        }
    }

    fn recompile_tile(&mut self, tx: i32, tz: i32) {
        let tile_index = (tx + tz * self.width) as usize;
        let origin = self.origin;
        let obstacles: Vec<Obstacle> = self.obstacles.values().copied().collect();

        let tile = &mut self.tiles[tile_index];
        tile.blocked.clear();

        for (layer_index, layer) in tile.layers.iter().enumerate() {
            for cell in 0..(TILE_SIZE * TILE_SIZE) as u16 {
                let h = layer.heights[cell as usize];
                if h == CELL_EMPTY {
                    continue;
                }
                let cell_pos = vec3(
                    origin.x
                        + ((tx * TILE_SIZE as i32 + (cell as i32 % TILE_SIZE as i32)) as F + 0.5)
                            * CELL_RESOLUTION,
                    origin.y + h as F * CELL_RESOLUTION,
                    origin.z
                        + ((tz * TILE_SIZE as i32 + (cell as i32 / TILE_SIZE as i32)) as F + 0.5)
                            * CELL_RESOLUTION,
                );

                let covered = obstacles.iter().any(|o| {
                    let dx = cell_pos.x - o.pos.x;
                    let dz = cell_pos.z - o.pos.z;
                    dx * dx + dz * dz < o.radius * o.radius
                        && cell_pos.y >= o.pos.y - CLIMB_STEPS as F * CELL_RESOLUTION
                        && cell_pos.y <= o.pos.y + o.height
                });
                if covered {
                    tile.blocked.insert((cell, layer_index as u8));
                }
            }
        }
    }
}

/// Min-heap adapter so f32 scores can drive a `BinaryHeap`
#[derive(Copy, Clone)]
struct MinScored(F, CellRef);

impl PartialEq for MinScored {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for MinScored {}

impl PartialOrd for MinScored {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MinScored {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // reversed so the heap pops the lowest score; NaN sorts last
        other
            .0
            .partial_cmp(&self.0)
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Single flat walkable tile at height step 2
    pub(crate) fn flat_mesh() -> TileMesh {
        let heights = vec![2u8; TILE_SIZE * TILE_SIZE].into_boxed_slice();
        TileMesh::from_tiles(
            vec3(0.0, 0.0, 0.0),
            1,
            1,
            vec![vec![TileLayer { heights }]],
        )
    }

    fn mesh_with_wall() -> TileMesh {
        let mut heights = vec![2u8; TILE_SIZE * TILE_SIZE].into_boxed_slice();
        // wall across x = 8 except a gap at z = 14
        for z in 0..TILE_SIZE {
            if z != 14 {
                heights[8 + z * TILE_SIZE] = CELL_EMPTY;
            }
        }
        TileMesh::from_tiles(
            vec3(0.0, 0.0, 0.0),
            1,
            1,
            vec![vec![TileLayer { heights }]],
        )
    }

    #[test]
    fn nearest_snaps_to_cell_centre() {
        let mesh = flat_mesh();
        let cell = mesh
            .nearest(vec3(2.2, 1.0, 3.1), vec3(15.0, 10.0, 15.0))
            .unwrap();
        assert_eq!((cell.cx, cell.cz), (4, 6));
        let pos = mesh.position(cell);
        assert_eq!(pos, vec3(2.25, 1.0, 3.25));
    }

    #[test]
    fn nearest_respects_vertical_extent() {
        let mesh = flat_mesh();
        assert!(mesh.nearest(vec3(2.0, 50.0, 2.0), vec3(15.0, 10.0, 15.0)).is_none());
    }

    #[test]
    fn straight_path_is_pulled_tight() {
        let mesh = flat_mesh();
        let start = mesh.nearest(vec3(0.5, 1.0, 0.5), vec3(15.0, 10.0, 15.0)).unwrap();
        let end = mesh.nearest(vec3(7.1, 1.0, 0.5), vec3(15.0, 10.0, 15.0)).unwrap();

        let mut path = WalkPath::new();
        mesh.find_path(start, end, &mut path);
        // a clear straight run needs no intermediate waypoints
        assert_eq!(path.len(), 2);
        assert_eq!(path[0], mesh.position(start));
        assert_eq!(path[1], mesh.position(end));
    }

    #[test]
    fn path_detours_through_the_gap() {
        let mesh = mesh_with_wall();
        let extents = vec3(15.0, 10.0, 15.0);
        let start = mesh.nearest(vec3(2.25, 1.0, 2.25), extents).unwrap();
        let end = mesh.nearest(vec3(6.25, 1.0, 2.25), extents).unwrap();

        let mut path = WalkPath::new();
        mesh.find_path(start, end, &mut path);
        assert!(path.len() > 2, "must detour, got {:?}", path);
        // detour passes near the gap at z = 14
        assert!(path.iter().any(|p| p.z > 6.0));
        assert_eq!(*path.last().unwrap(), mesh.position(end));
    }

    #[test]
    fn obstacle_blocks_and_removal_restores() {
        let mut mesh = flat_mesh();
        let extents = vec3(2.0, 10.0, 2.0);
        let probe = vec3(4.25, 1.0, 4.25);

        assert!(mesh.nearest(probe, vec3(0.3, 10.0, 0.3)).is_some());

        mesh.add_obstacle(0, vec3(4.25, 1.0, 4.25), 1.0, 2.0);
        assert!(mesh.nearest(probe, vec3(0.3, 10.0, 0.3)).is_none());
        // a wider search finds a cell outside the cylinder
        let outside = mesh.nearest(probe, extents).unwrap();
        assert!(mesh.position(outside).distance(probe) > 0.5);

        mesh.remove_obstacle(0);
        assert!(mesh.nearest(probe, vec3(0.3, 10.0, 0.3)).is_some());
    }

    #[test]
    fn tile_cache_round_trip() {
        let mesh = mesh_with_wall();
        let mut bytes = Vec::new();
        mesh.write_to(&mut bytes).unwrap();

        let read = TileMesh::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(read.width, 1);
        assert_eq!(read.height, 1);
        assert_eq!(read.tiles[0].layers.len(), 1);
        assert_eq!(
            read.tiles[0].layers[0].heights,
            mesh.tiles[0].layers[0].heights
        );

        // skip lands exactly at the end of the section
        let mut cursor = bytes.as_slice();
        TileMesh::skip_section(&mut cursor).unwrap();
        assert!(cursor.is_empty());
    }

    #[test]
    fn random_point_lands_on_the_mesh() {
        let mesh = flat_mesh();
        let mut rng = seeded_rng(Some(99));
        for _ in 0..10 {
            let p = mesh
                .random_point_around(vec3(4.0, 1.0, 4.0), 3.0, vec3(15.0, 10.0, 15.0), &mut rng)
                .unwrap();
            assert_eq!(p.y, 1.0);
            assert!(p.x >= 0.0 && p.x <= 8.0);
        }
    }
}
