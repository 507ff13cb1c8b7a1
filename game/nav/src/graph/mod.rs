use common::*;

use crate::state::{force_field_signature, NavGameState};
use crate::team::Team;

mod io;

pub use io::{read_graph, write_graph, GraphLoadError};

/// Max neighbours per vertex. Flag bits are indexed by neighbour slot
pub const ADJACENCY_MAX: usize = 8;

/// Handle to one vertex of the drone graph
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash, Default)]
pub struct NavNode {
    pub chunk: i16,
    pub vertex: i16,
}

impl NavNode {
    pub const NONE: NavNode = NavNode {
        chunk: -1,
        vertex: -1,
    };

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

slog_value_debug!(NavNode);

/// Per-vertex neighbour list. Bit `i` of `flags` set means the edge to
/// `neighbors[i]` is a crawl edge (co-planar or around a corner), clear means
/// a shoot edge through open space.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Adjacency {
    pub neighbors: ArrayVec<NavNode, ADJACENCY_MAX>,
    pub flags: u64,
}

impl Adjacency {
    pub fn is_crawl(&self, i: usize) -> bool {
        self.flags & (1u64 << i) != 0
    }

    pub fn set_crawl(&mut self, i: usize, value: bool) {
        if value {
            self.flags |= 1u64 << i;
        } else {
            self.flags &= !(1u64 << i);
        }
    }

    pub fn push(&mut self, node: NavNode, crawl: bool) {
        let i = self.neighbors.len();
        self.neighbors.push(node);
        self.set_crawl(i, crawl);
    }

    /// Swap-removes slot `i`, keeping the surviving flag bits aligned with
    /// their neighbours
    pub fn remove(&mut self, i: usize) {
        let last = self.neighbors.len() - 1;
        if i != last {
            let last_flag = self.is_crawl(last);
            self.set_crawl(i, last_flag);
        }
        self.set_crawl(last, false);
        self.neighbors.swap_remove(i);
    }
}

#[derive(Clone, Debug, Default)]
pub struct Chunk {
    pub vertices: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub adjacency: Vec<Adjacency>,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// Chunked vertex graph for drone locomotion. Immutable after load apart
/// from permanent one-directional edge deletion.
#[derive(Clone, Debug)]
pub struct DroneGraph {
    pub chunk_size: F,
    pub vmin: Vec3,
    pub size: [i16; 3],
    pub chunks: Vec<Chunk>,
}

impl Default for DroneGraph {
    fn default() -> Self {
        DroneGraph {
            chunk_size: F::default(),
            vmin: Vec3::zero(),
            size: [0; 3],
            chunks: Vec::default(),
        }
    }
}

impl DroneGraph {
    pub fn coord(&self, p: Vec3) -> ChunkCoord {
        let rel = (p - self.vmin) / self.chunk_size;
        ChunkCoord {
            x: rel.x.floor() as i32,
            y: rel.y.floor() as i32,
            z: rel.z.floor() as i32,
        }
    }

    pub fn index(&self, c: ChunkCoord) -> usize {
        let (sx, sy) = (self.size[0] as i32, self.size[1] as i32);
        (c.x + sx * (c.y + sy * c.z)) as usize
    }

    pub fn vertex(&self, node: NavNode) -> Vec3 {
        self.chunks[node.chunk as usize].vertices[node.vertex as usize]
    }

    pub fn normal(&self, node: NavNode) -> Vec3 {
        self.chunks[node.chunk as usize].normals[node.vertex as usize]
    }

    pub fn adjacency(&self, node: NavNode) -> &Adjacency {
        &self.chunks[node.chunk as usize].adjacency[node.vertex as usize]
    }

    pub fn contains(&self, node: NavNode) -> bool {
        !node.is_none()
            && self
                .chunks
                .get(node.chunk as usize)
                .map(|c| (node.vertex as usize) < c.vertices.len())
                .unwrap_or(false)
    }

    pub fn total_vertices(&self) -> usize {
        self.chunks.iter().map(|c| c.vertices.len()).sum()
    }

    pub fn bounds(&self) -> (Vec3, Vec3) {
        let extent = vec3(
            self.size[0] as F,
            self.size[1] as F,
            self.size[2] as F,
        ) * self.chunk_size;
        (self.vmin, self.vmin + extent)
    }

    /// Nearest vertex to `p` matching the querier's force field signature,
    /// preferring those roughly facing `desired_normal`. Orphan vertices are
    /// skipped. Scans the 3x3x3 chunk neighbourhood around `p`, clamped to
    /// the grid.
    pub fn closest_point(
        &self,
        state: &NavGameState,
        team: Team,
        p: Vec3,
        desired_normal: Option<Vec3>,
        field_radius: F,
    ) -> NavNode {
        if self.chunks.is_empty() {
            return NavNode::NONE;
        }

        let c = self.coord(p);
        let (sx, sy, sz) = (
            self.size[0] as i32,
            self.size[1] as i32,
            self.size[2] as i32,
        );

        let desired_signature = force_field_signature(state, team, p, field_radius);

        let mut closest = NavNode::NONE;
        let mut closest_distance = F::MAX;
        let mut found = false;

        for x in (c.x - 1).clamp(0, sx - 1)..(c.x + 2).clamp(1, sx) {
            for y in (c.y - 1).clamp(0, sy - 1)..(c.y + 2).clamp(1, sy) {
                for z in (c.z - 1).clamp(0, sz - 1)..(c.z + 2).clamp(1, sz) {
                    let chunk_index = self.index(ChunkCoord { x, y, z });
                    let chunk = &self.chunks[chunk_index];
                    for (vertex_index, adjacency) in chunk.adjacency.iter().enumerate() {
                        if adjacency.neighbors.is_empty() {
                            continue; // orphan
                        }

                        let vertex = chunk.vertices[vertex_index];
                        let vertex_normal = chunk.normals[vertex_index];
                        let to_vertex = vertex - p;
                        if to_vertex.dot(vertex_normal) >= 0.0 {
                            continue; // p is behind the surface
                        }

                        let distance = to_vertex.magnitude2();
                        if distance < closest_distance
                            && force_field_signature(state, team, vertex, field_radius)
                                == desired_signature
                        {
                            let node = NavNode {
                                chunk: chunk_index as i16,
                                vertex: vertex_index as i16,
                            };
                            match desired_normal {
                                None => {
                                    closest_distance = distance;
                                    closest = node;
                                    found = true;
                                }
                                Some(n) if n.dot(vertex_normal) > 0.8 => {
                                    closest_distance = distance;
                                    closest = node;
                                    found = true;
                                }
                                Some(_) if !found => {
                                    // wrong way, but usable in an emergency
                                    closest = node;
                                    found = true;
                                }
                                Some(_) => {}
                            }
                        }
                    }
                }
            }
        }

        closest
    }

    /// Can the target be shot at from `start`? True when some shoot-edge
    /// neighbour lies beyond the target and all three points line up within
    /// `dot_threshold`. Returns the alignment dot on success.
    pub fn can_hit_from(&self, start: NavNode, target: Vec3, dot_threshold: F) -> Option<F> {
        let start_pos = self.vertex(start);
        let to_target = target - start_pos;
        let target_distance2 = to_target.magnitude2();
        if target_distance2 <= F::EPSILON {
            return None;
        }
        let to_target = to_target / target_distance2.sqrt();

        let adjacency = self.adjacency(start);
        for (i, &neighbor) in adjacency.neighbors.iter().enumerate() {
            if adjacency.is_crawl(i) {
                continue; // shots only travel shoot edges
            }

            let to_adjacent = self.vertex(neighbor) - start_pos;
            let adjacent_distance2 = to_adjacent.magnitude2();
            if adjacent_distance2 <= target_distance2 {
                continue; // target must sit between us and the neighbour
            }

            let dot = (to_adjacent / adjacent_distance2.sqrt()).dot(to_target);
            if dot > dot_threshold {
                return Some(dot);
            }
        }
        None
    }

    /// Permanently removes the one-directional edge `a -> b`. Idempotent
    pub fn remove_edge(&mut self, a: NavNode, b: NavNode) {
        if !self.contains(a) {
            return;
        }
        let adjacency = &mut self.chunks[a.chunk as usize].adjacency[a.vertex as usize];
        if let Some(i) = adjacency.neighbors.iter().position(|&n| n == b) {
            adjacency.remove(i);
        }
    }

    /// Flat vertex list, for the debug point renderer
    pub fn flat_vertices(&self) -> Vec<Vec3> {
        self.chunks
            .iter()
            .flat_map(|c| c.vertices.iter().copied())
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::state::ForceFieldState;

    /// Single chunk, vertices on the x axis at 0..count, normals +y, linear
    /// crawl adjacency
    pub(crate) fn corridor(count: usize) -> DroneGraph {
        let mut chunk = Chunk::default();
        for i in 0..count {
            chunk.vertices.push(vec3(i as F, 0.0, 0.0));
            chunk.normals.push(vec3(0.0, 1.0, 0.0));
            chunk.adjacency.push(Adjacency::default());
        }
        for i in 0..count {
            if i > 0 {
                chunk.adjacency[i].push(
                    NavNode {
                        chunk: 0,
                        vertex: (i - 1) as i16,
                    },
                    true,
                );
            }
            if i + 1 < count {
                chunk.adjacency[i].push(
                    NavNode {
                        chunk: 0,
                        vertex: (i + 1) as i16,
                    },
                    true,
                );
            }
        }

        DroneGraph {
            chunk_size: 16.0,
            vmin: vec3(-8.0, -8.0, -8.0),
            size: [1, 1, 1],
            chunks: vec![chunk],
        }
    }

    /// [corridor], plus a shoot edge between the two endpoints
    pub(crate) fn corridor_with_shot(count: usize) -> DroneGraph {
        let mut graph = corridor(count);
        let chunk = &mut graph.chunks[0];
        chunk.adjacency[0].push(
            NavNode {
                chunk: 0,
                vertex: (count - 1) as i16,
            },
            false,
        );
        chunk.adjacency[count - 1].push(NavNode { chunk: 0, vertex: 0 }, false);
        graph
    }

    pub(crate) fn node(vertex: i16) -> NavNode {
        NavNode { chunk: 0, vertex }
    }

    #[test]
    fn chunk_index_row_major() {
        let graph = DroneGraph {
            chunk_size: 10.0,
            vmin: vec3(0.0, 0.0, 0.0),
            size: [2, 3, 4],
            chunks: vec![Chunk::default(); 24],
        };
        assert_eq!(graph.index(ChunkCoord { x: 0, y: 0, z: 0 }), 0);
        assert_eq!(graph.index(ChunkCoord { x: 1, y: 0, z: 0 }), 1);
        assert_eq!(graph.index(ChunkCoord { x: 0, y: 1, z: 0 }), 2);
        assert_eq!(graph.index(ChunkCoord { x: 1, y: 2, z: 3 }), 23);
        assert_eq!(graph.coord(vec3(15.0, 25.0, 35.0)), ChunkCoord { x: 1, y: 2, z: 3 });
    }

    #[test]
    fn closest_point_basic() {
        let graph = corridor(5);
        let state = NavGameState::default();
        let node = graph.closest_point(
            &state,
            Team::None,
            vec3(2.2, 1.0, 0.0),
            None,
            8.0,
        );
        assert_eq!(node, NavNode { chunk: 0, vertex: 2 });
    }

    #[test]
    fn closest_point_rejects_behind_surface() {
        let graph = corridor(3);
        let state = NavGameState::default();
        // below the surface: every vertex normal points away from p
        let node = graph.closest_point(&state, Team::None, vec3(1.0, -1.0, 0.0), None, 8.0);
        assert!(node.is_none());
    }

    #[test]
    fn closest_point_respects_signature() {
        let graph = corridor(5);
        let mut state = NavGameState::default();
        state.force_fields.push(ForceFieldState {
            pos: vec3(0.0, 0.0, 0.0),
            team: Team::B,
        });

        // p outside the field, closest in-signature vertex is not v0/v1
        let node = graph.closest_point(&state, Team::A, vec3(0.0, 20.0, 0.0), None, 1.5);
        assert!(!node.is_none());
        assert!(node.vertex >= 2, "{:?} is inside the enemy field", node);
    }

    #[test]
    fn closest_point_prefers_matching_normal() {
        let mut graph = corridor(2);
        graph.chunks[0].normals[0] = vec3(1.0, 0.0, 0.0);
        let state = NavGameState::default();

        let node = graph.closest_point(
            &state,
            Team::None,
            vec3(0.4, 0.5, 0.0),
            Some(vec3(0.0, 1.0, 0.0)),
            8.0,
        );
        // v0 is nearer but faces the wrong way
        assert_eq!(node, NavNode { chunk: 0, vertex: 1 });
    }

    #[test]
    fn can_hit_along_shoot_edge() {
        let graph = corridor_with_shot(5);
        // target between v0 and its shoot neighbour v4
        assert!(graph
            .can_hit_from(node(0), vec3(2.0, 0.0, 0.0), 0.999)
            .is_some());
        // off axis
        assert!(graph
            .can_hit_from(node(0), vec3(2.0, 3.0, 0.0), 0.999)
            .is_none());
        // beyond the far neighbour
        assert!(graph
            .can_hit_from(node(0), vec3(9.0, 0.0, 0.0), 0.999)
            .is_none());
    }

    #[test]
    fn edge_removal_is_idempotent_and_keeps_flags() {
        let mut graph = corridor(5);
        let before = graph.adjacency(node(2)).clone();
        assert_eq!(before.neighbors.len(), 2);

        graph.remove_edge(node(2), node(3));
        let after = graph.adjacency(node(2)).clone();
        assert_eq!(after.neighbors.len(), 1);
        assert_eq!(after.neighbors[0], node(1));
        assert!(after.is_crawl(0));

        graph.remove_edge(node(2), node(3));
        assert_eq!(*graph.adjacency(node(2)), after);

        // reverse direction untouched
        assert!(graph.adjacency(node(3)).neighbors.contains(&node(2)));
    }

    #[test]
    fn swap_remove_moves_last_flag() {
        let mut adjacency = Adjacency::default();
        adjacency.push(node(1), true);
        adjacency.push(node(2), false);
        adjacency.push(node(3), true);

        adjacency.remove(0);
        assert_eq!(adjacency.neighbors.as_slice(), &[node(3), node(2)]);
        assert!(adjacency.is_crawl(0));
        assert!(!adjacency.is_crawl(1));
        assert_eq!(adjacency.flags & !0b11, 0);
    }
}
