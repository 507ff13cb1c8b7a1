//! Audio propagation queries. Path lengths feed occlusion, the reverb cell
//! feeds aux sends. Both are advisory: they run against whichever graph copy
//! the caller holds and are allowed to be slightly stale.

use common::*;

use crate::astar::{self, DroneNavContext, Scratch};
use crate::graph::{ChunkCoord, DroneGraph};
use crate::path::{drone_path_length, DronePath};

/// Aux send levels by room size, plus how outdoor the position feels
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ReverbCell {
    /// small / default / huge
    pub sends: [F; 3],
    pub outdoor: F,
}

/// Graph-walk distance between two points, or infinity when no acceptable
/// detour exists. Runs on the calling thread
pub fn audio_pathfind(ctx: &DroneNavContext, scratch: &mut Scratch, a: Vec3, b: Vec3) -> F {
    let mut path = DronePath::new();
    astar::audio_pathfind(ctx, scratch, a, b, &mut path);
    if path.is_empty() {
        F::INFINITY
    } else {
        drone_path_length(&path)
    }
}

const REVERB_RADII: [F; 3] = [4.0, 12.0, 30.0];

/// Estimates enclosure from drone-graph geometry around `pos`: vertices
/// whose surfaces face the position vote for the send of their distance
/// band, and sparse coverage at the large radius reads as outdoors.
pub fn audio_reverb_calc(graph: &DroneGraph, pos: Vec3) -> ReverbCell {
    if graph.chunks.is_empty() {
        return ReverbCell {
            sends: [0.0; 3],
            outdoor: 1.0,
        };
    }

    let c = graph.coord(pos);
    let (sx, sy, sz) = (
        graph.size[0] as i32,
        graph.size[1] as i32,
        graph.size[2] as i32,
    );

    let mut counts = [0u32; 3];
    for x in (c.x - 1).clamp(0, sx - 1)..(c.x + 2).clamp(1, sx) {
        for y in (c.y - 1).clamp(0, sy - 1)..(c.y + 2).clamp(1, sy) {
            for z in (c.z - 1).clamp(0, sz - 1)..(c.z + 2).clamp(1, sz) {
                let chunk = &graph.chunks[graph.index(ChunkCoord { x, y, z })];
                for (vertex, normal) in chunk.vertices.iter().zip(&chunk.normals) {
                    let to_pos = pos - vertex;
                    if to_pos.dot(*normal) <= 0.0 {
                        continue; // surface faces away
                    }
                    let d2 = to_pos.magnitude2();
                    for (i, radius) in REVERB_RADII.iter().enumerate() {
                        if d2 < radius * radius {
                            counts[i] += 1;
                        }
                    }
                }
            }
        }
    }

    // band densities, saturating at the counts a closed room produces
    let small = (counts[0] as F / 24.0).min(1.0);
    let default = (counts[1] as F / 96.0).min(1.0);
    let huge = ((counts[2] - counts[1]) as F / 192.0).min(1.0);
    let coverage = (counts[2] as F / 128.0).min(1.0);

    ReverbCell {
        sends: [small, default * (1.0 - small * 0.5), huge * (1.0 - small)],
        outdoor: 1.0 - coverage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::astar::DroneAllow;
    use crate::config::Tunables;
    use crate::graph::tests::{corridor, corridor_with_shot, node};
    use crate::state::NavGameState;
    use crate::team::Team;

    fn ctx<'a>(
        graph: &'a DroneGraph,
        state: &'a NavGameState,
        tunables: &'a Tunables,
    ) -> DroneNavContext<'a> {
        DroneNavContext {
            mesh: graph,
            state,
            tunables,
            bias: false,
        }
    }

    #[test]
    fn path_length_matches_route() {
        let graph = corridor(5);
        let state = NavGameState::default();
        let tunables = Tunables::default();
        let mut scratch = Scratch::default();
        scratch.resize_for(&graph);

        let length = audio_pathfind(
            &ctx(&graph, &state, &tunables),
            &mut scratch,
            vec3(0.0, 1.0, 0.0),
            vec3(4.0, 1.0, 0.0),
        );
        assert!((length - 4.0).abs() < 1e-4);
    }

    #[test]
    fn unreachable_is_infinite() {
        let graph = DroneGraph::default();
        let state = NavGameState::default();
        let tunables = Tunables::default();
        let mut scratch = Scratch::default();

        let length = audio_pathfind(
            &ctx(&graph, &state, &tunables),
            &mut scratch,
            vec3(0.0, 1.0, 0.0),
            vec3(4.0, 1.0, 0.0),
        );
        assert!(length.is_infinite());
    }

    #[test]
    fn sync_copy_may_disagree_after_edge_removal() {
        // worker-side mutations are not replicated into the audio copy; the
        // stale copy still routes along the condemned edge
        let mut worker_graph = corridor_with_shot(5);
        let audio_graph = worker_graph.clone();
        worker_graph.remove_edge(node(0), node(4));

        let state = NavGameState::default();
        let tunables = Tunables::default();
        let mut scratch = Scratch::default();
        scratch.resize_for(&audio_graph);

        let length = audio_pathfind(
            &ctx(&audio_graph, &state, &tunables),
            &mut scratch,
            vec3(0.0, 1.0, 0.0),
            vec3(4.0, 1.0, 0.0),
        );
        assert!((length - 4.0).abs() < 1e-4);
    }

    #[test]
    fn reverb_enclosure_beats_open_air() {
        let graph = corridor(5);

        let near = audio_reverb_calc(&graph, vec3(2.0, 0.5, 0.0));
        let empty = audio_reverb_calc(&DroneGraph::default(), vec3(2.0, 0.5, 0.0));

        assert!(near.sends[0] > 0.0);
        assert!(near.outdoor < empty.outdoor);
        assert_eq!(empty.outdoor, 1.0);
        for send in near.sends.iter().chain(empty.sends.iter()) {
            assert!((0.0..=1.0).contains(send));
        }
    }
}
