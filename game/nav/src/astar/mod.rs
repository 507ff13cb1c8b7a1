//! A\* over the drone graph. The scratch table and heap are sized once per
//! level and reused across queries; nothing here allocates after warmup.

use common::*;

use crate::config::Tunables;
use crate::graph::{DroneGraph, NavNode};
use crate::path::{DronePath, DronePathNode};
use crate::state::{force_field_raycast, force_field_signature, sensor_cost, NavGameState};
use crate::team::Team;

pub mod scorer;

use scorer::{AstarScorer, AudioPathfindScorer, PathfindScorer};

/// Which edge kinds a query may traverse
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum DroneAllow {
    Crawl = 1,
    Shoot = 2,
    All = 3,
}

impl DroneAllow {
    pub fn permits(self, crawl_edge: bool) -> bool {
        let bit = if crawl_edge {
            DroneAllow::Crawl as u8
        } else {
            DroneAllow::Shoot as u8
        };
        self as u8 & bit != 0
    }

    pub(crate) fn from_wire(raw: u8) -> Self {
        match raw {
            1 => DroneAllow::Crawl,
            2 => DroneAllow::Shoot,
            _ => DroneAllow::All,
        }
    }
}

const FLAG_VISITED: u8 = 1 << 0;
const FLAG_IN_QUEUE: u8 = 1 << 1;
const FLAG_CRAWLED_FROM_PARENT: u8 = 1 << 2;

/// Per-vertex search scratch. Priority of a vertex is
/// `travel + estimate + sensor`
#[derive(Copy, Clone, Default)]
pub struct NodeData {
    pub travel_score: F,
    pub estimate_score: F,
    pub sensor_score: F,
    pub parent: NavNode,
    flags: u8,
}

impl NodeData {
    pub fn visited(&self) -> bool {
        self.flags & FLAG_VISITED != 0
    }

    pub fn in_queue(&self) -> bool {
        self.flags & FLAG_IN_QUEUE != 0
    }

    pub fn crawled_from_parent(&self) -> bool {
        self.flags & FLAG_CRAWLED_FROM_PARENT != 0
    }

    fn set(&mut self, flag: u8, value: bool) {
        if value {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }
}

/// Scratch table mirroring the graph's chunk layout, reset (not reallocated)
/// at the start of every search
#[derive(Default)]
pub struct ScratchTable {
    chunks: Vec<Vec<NodeData>>,
}

impl ScratchTable {
    pub fn resize_for(&mut self, graph: &DroneGraph) {
        self.chunks.clear();
        self.chunks.extend(
            graph
                .chunks
                .iter()
                .map(|c| vec![NodeData::default(); c.vertices.len()]),
        );
    }

    pub fn reset(&mut self) {
        for chunk in &mut self.chunks {
            chunk.fill(NodeData::default());
        }
    }

    pub fn get(&self, node: NavNode) -> &NodeData {
        &self.chunks[node.chunk as usize][node.vertex as usize]
    }

    pub fn get_mut(&mut self, node: NavNode) -> &mut NodeData {
        &mut self.chunks[node.chunk as usize][node.vertex as usize]
    }

    pub fn priority(&self, node: NavNode) -> F {
        let d = self.get(node);
        d.travel_score + d.estimate_score + d.sensor_score
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).sum()
    }
}

/// Binary min-heap over the scratch priorities, with in-place re-sift when a
/// queued vertex improves
#[derive(Default)]
pub struct AstarQueue {
    heap: Vec<NavNode>,
}

impl AstarQueue {
    pub fn reserve(&mut self, n: usize) {
        self.heap.reserve(n);
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn capacity(&self) -> usize {
        self.heap.capacity()
    }

    pub fn push(&mut self, node: NavNode, key: &ScratchTable) {
        self.heap.push(node);
        self.percolate_up(self.heap.len() - 1, key);
    }

    pub fn pop(&mut self, key: &ScratchTable) -> Option<NavNode> {
        let result = *self.heap.first()?;
        let last = self.heap.pop().unwrap(); // nonempty
        if !self.heap.is_empty() {
            self.heap[0] = last;
            self.percolate_down(0, key);
        }
        Some(result)
    }

    /// Re-sift `node` after its priority changed
    pub fn update(&mut self, node: NavNode, key: &ScratchTable) {
        if let Some(i) = self.heap.iter().position(|&n| n == node) {
            self.percolate_up(i, key);
            self.percolate_down(i, key);
        }
    }

    fn percolate_up(&mut self, mut position: usize, key: &ScratchTable) {
        while position > 0 {
            let parent = (position - 1) / 2;
            if key.priority(self.heap[position]) < key.priority(self.heap[parent]) {
                self.heap.swap(position, parent);
                position = parent;
            } else {
                break;
            }
        }
    }

    fn percolate_down(&mut self, mut position: usize, key: &ScratchTable) {
        loop {
            let left = position * 2 + 1;
            if left >= self.heap.len() {
                break;
            }
            let right = left + 1;
            let child = if right < self.heap.len()
                && key.priority(self.heap[right]) < key.priority(self.heap[left])
            {
                right
            } else {
                left
            };
            if key.priority(self.heap[child]) < key.priority(self.heap[position]) {
                self.heap.swap(child, position);
                position = child;
            } else {
                break;
            }
        }
    }
}

/// Table + queue, always used as a pair
#[derive(Default)]
pub struct Scratch {
    pub table: ScratchTable,
    pub queue: AstarQueue,
}

impl Scratch {
    pub fn resize_for(&mut self, graph: &DroneGraph) {
        self.table.resize_for(graph);
        self.queue.reserve(graph.total_vertices());
    }
}

/// Everything a drone query reads. `bias` enables the sensor/longshot cost
/// shaping; the bridge-side audio context leaves it off
pub struct DroneNavContext<'a> {
    pub mesh: &'a DroneGraph,
    pub state: &'a NavGameState,
    pub tunables: &'a Tunables,
    pub bias: bool,
}

impl<'a> DroneNavContext<'a> {
    fn sensor_cost_at(&self, team: Team, node: NavNode) -> F {
        if self.bias {
            sensor_cost(
                self.state,
                team,
                self.mesh.vertex(node),
                self.mesh.normal(node),
                self.tunables,
            )
        } else {
            0.0
        }
    }

    fn signature(&self, team: Team, pos: Vec3) -> u32 {
        force_field_signature(self.state, team, pos, self.tunables.force_field_radius)
    }
}

pub fn drone_astar<S: AstarScorer>(
    ctx: &DroneNavContext,
    scratch: &mut Scratch,
    rule: DroneAllow,
    team: Team,
    start_vertex: NavNode,
    scorer: &S,
    path: &mut DronePath,
) {
    path.clear();

    if start_vertex.is_none() || !ctx.mesh.contains(start_vertex) {
        return;
    }

    let start_pos = ctx.mesh.vertex(start_vertex);

    scratch.table.reset();
    scratch.queue.clear();

    let start_sensor = ctx.sensor_cost_at(team, start_vertex);
    {
        let start_data = scratch.table.get_mut(start_vertex);
        start_data.travel_score = 0.0;
        start_data.estimate_score = scorer.score(start_pos);
        start_data.sensor_score = start_sensor;
        start_data.parent = NavNode::NONE;
        start_data.flags = FLAG_CRAWLED_FROM_PARENT | FLAG_IN_QUEUE;
    }
    scratch.queue.push(start_vertex, &scratch.table);

    while let Some(vertex_node) = scratch.queue.pop(&scratch.table) {
        {
            let vertex_data = scratch.table.get_mut(vertex_node);
            vertex_data.set(FLAG_VISITED, true);
            vertex_data.set(FLAG_IN_QUEUE, false);
        }

        let vertex_data = *scratch.table.get(vertex_node);
        let vertex_pos = ctx.mesh.vertex(vertex_node);

        if scorer.done(vertex_node, &vertex_data) {
            reconstruct(ctx.mesh, &scratch.table, start_vertex, vertex_node, path);
            break;
        }

        let adjacency = ctx.mesh.adjacency(vertex_node);
        for (i, &adjacent_node) in adjacency.neighbors.iter().enumerate() {
            if scratch.table.get(adjacent_node).visited() {
                continue;
            }

            let crawl_edge = adjacency.is_crawl(i);
            let adjacent_pos = ctx.mesh.vertex(adjacent_node);

            if !rule.permits(crawl_edge)
                || force_field_raycast(
                    ctx.state,
                    team,
                    vertex_pos,
                    adjacent_pos,
                    ctx.tunables.force_field_radius,
                )
            {
                // edge kind not allowed or it crosses an enemy field:
                // unreachable this way and every other way too
                scratch.table.get_mut(adjacent_node).set(FLAG_VISITED, true);
                continue;
            }

            let candidate_travel_score = vertex_data.travel_score
                + vertex_data.sensor_score
                + vertex_pos.distance(adjacent_pos)
                + if ctx.bias { ctx.tunables.path_bias } else { 0.0 };

            if scratch.table.get(adjacent_node).in_queue() {
                let improved = {
                    let adjacent_data = scratch.table.get_mut(adjacent_node);
                    if candidate_travel_score < adjacent_data.travel_score {
                        adjacent_data.set(FLAG_CRAWLED_FROM_PARENT, crawl_edge);
                        adjacent_data.parent = vertex_node;
                        adjacent_data.travel_score = candidate_travel_score;
                        true
                    } else {
                        false
                    }
                };
                if improved {
                    scratch.queue.update(adjacent_node, &scratch.table);
                }
            } else {
                let sensor = ctx.sensor_cost_at(team, adjacent_node);
                let estimate = scorer.score(adjacent_pos);
                {
                    let adjacent_data = scratch.table.get_mut(adjacent_node);
                    adjacent_data.set(FLAG_CRAWLED_FROM_PARENT, crawl_edge);
                    adjacent_data.parent = vertex_node;
                    adjacent_data.sensor_score = sensor;
                    adjacent_data.travel_score = candidate_travel_score;
                    adjacent_data.estimate_score = estimate;
                    adjacent_data.set(FLAG_VISITED | FLAG_IN_QUEUE, true);
                }
                scratch.queue.push(adjacent_node, &scratch.table);
            }
        }
    }
}

fn reconstruct(
    mesh: &DroneGraph,
    table: &ScratchTable,
    start_vertex: NavNode,
    last: NavNode,
    path: &mut DronePath,
) {
    let mut n = last;
    loop {
        if path.is_full() {
            path.pop(); // drop the goal-end tail
        }
        let data = table.get(n);
        path.insert(
            0,
            DronePathNode {
                pos: mesh.vertex(n),
                normal: mesh.normal(n),
                node: n,
                crawled_from_parent: data.crawled_from_parent(),
            },
        );
        if n == start_vertex {
            break;
        }
        n = data.parent;
    }
}

/// Find a path from vertex a to vertex b
pub fn drone_pathfind(
    ctx: &DroneNavContext,
    scratch: &mut Scratch,
    rule: DroneAllow,
    team: Team,
    start_vertex: NavNode,
    end_vertex: NavNode,
    path: &mut DronePath,
) {
    path.clear();
    if start_vertex.is_none() || end_vertex.is_none() {
        return;
    }

    let end_pos = ctx.mesh.vertex(end_vertex);
    let start_pos = ctx.mesh.vertex(start_vertex);
    if ctx.signature(team, start_pos) != ctx.signature(team, end_pos) {
        return; // in a different force field; unreachable
    }

    let scorer = PathfindScorer {
        end_vertex,
        end_pos,
    };
    drone_astar(ctx, scratch, rule, team, start_vertex, &scorer, path);
}

/// Find our way to a vertex from which we can shoot through the given target.
///
/// Even when the target's own closest vertex is where we already stand, a
/// 0-length path is never returned: another vertex that lines up is chosen
/// instead, so an agent stuck at a bad angle still gets somewhere to go.
pub fn drone_pathfind_hit(
    ctx: &DroneNavContext,
    scratch: &mut Scratch,
    rule: DroneAllow,
    team: Team,
    start: Vec3,
    start_normal: Vec3,
    target: Vec3,
    path: &mut DronePath,
) {
    path.clear();
    if ctx.signature(team, start) != ctx.signature(team, target) {
        return; // in a different force field; unreachable
    }

    let radius = ctx.tunables.force_field_radius;
    let target_closest_vertex = ctx
        .mesh
        .closest_point(ctx.state, team, target, None, radius);
    if target_closest_vertex.is_none() {
        return;
    }

    let start_vertex = ctx
        .mesh
        .closest_point(ctx.state, team, start, Some(start_normal), radius);
    if start_vertex.is_none() {
        return;
    }

    if target_closest_vertex != start_vertex
        && ctx
            .mesh
            .can_hit_from(target_closest_vertex, target, 0.999)
            .is_some()
    {
        drone_pathfind(
            ctx,
            scratch,
            rule,
            team,
            start_vertex,
            target_closest_vertex,
            path,
        );
    } else {
        // walk the target's neighbours for the best lined-up stand-in,
        // relaxing the alignment threshold if nothing is dead-on
        let target_adjacency = ctx.mesh.adjacency(target_closest_vertex);
        let mut closest_distance = ctx.tunables.drone_max_distance;
        let mut closest_dot = 0.7;
        let mut closest_vertex = None;

        for &adjacent_vertex in &target_adjacency.neighbors {
            if adjacent_vertex == start_vertex {
                continue;
            }
            let distance = ctx.mesh.vertex(adjacent_vertex).distance2(start);
            let dot = ctx
                .mesh
                .can_hit_from(adjacent_vertex, target, 0.99)
                .unwrap_or(0.0);
            if (dot > 0.999 && distance > closest_distance)
                || (closest_dot < 0.999 && dot > closest_dot)
            {
                closest_distance = distance;
                closest_dot = dot;
                closest_vertex = Some(adjacent_vertex);
            }
        }

        match closest_vertex {
            None => path.clear(), // can't find a path to hit this thing
            Some(closest_vertex) => {
                drone_pathfind(ctx, scratch, rule, team, start_vertex, closest_vertex, path);
                if !path.is_empty() && !path.is_full() {
                    path.push(DronePathNode {
                        pos: ctx.mesh.vertex(target_closest_vertex),
                        normal: ctx.mesh.normal(target_closest_vertex),
                        node: target_closest_vertex,
                        crawled_from_parent: false, // we're shooting, so... no
                    });
                }
            }
        }
    }
}

/// Path between two arbitrary points for audio propagation. Teamless, no
/// bias, cut short once the detour is too long to matter
pub fn audio_pathfind(
    ctx: &DroneNavContext,
    scratch: &mut Scratch,
    a: Vec3,
    b: Vec3,
    path: &mut DronePath,
) {
    path.clear();

    let radius = ctx.tunables.force_field_radius;
    let target_closest_vertex = ctx.mesh.closest_point(ctx.state, Team::None, b, None, radius);
    if target_closest_vertex.is_none() {
        return;
    }

    let start_vertex = ctx.mesh.closest_point(ctx.state, Team::None, a, None, radius);
    if start_vertex.is_none() {
        return;
    }

    let scorer = AudioPathfindScorer {
        end_vertex: target_closest_vertex,
        end_pos: ctx.mesh.vertex(target_closest_vertex),
        budget: a.distance(b) + ctx.tunables.drone_max_distance * 2.0,
    };
    drone_astar(
        ctx,
        scratch,
        DroneAllow::All,
        Team::None,
        start_vertex,
        &scorer,
        path,
    );
}

#[cfg(test)]
mod tests {
    use super::scorer::SpawnScorer;
    use super::*;
    use crate::graph::tests::{corridor, corridor_with_shot, node};
    use crate::state::ForceFieldState;

    struct Fixture {
        graph: DroneGraph,
        state: NavGameState,
        tunables: Tunables,
    }

    impl Fixture {
        fn new(graph: DroneGraph) -> (Self, Scratch) {
            let mut scratch = Scratch::default();
            scratch.resize_for(&graph);
            (
                Self {
                    graph,
                    state: NavGameState::default(),
                    tunables: Tunables::default(),
                },
                scratch,
            )
        }

        fn ctx(&self) -> DroneNavContext {
            DroneNavContext {
                mesh: &self.graph,
                state: &self.state,
                tunables: &self.tunables,
                bias: true,
            }
        }

        fn unbiased(&self) -> DroneNavContext {
            DroneNavContext {
                bias: false,
                ..self.ctx()
            }
        }
    }

    fn assert_path_consecutive(graph: &DroneGraph, path: &DronePath) {
        for pair in path.windows(2) {
            let adjacency = graph.adjacency(pair[0].node);
            let i = adjacency
                .neighbors
                .iter()
                .position(|&n| n == pair[1].node)
                .unwrap_or_else(|| panic!("{:?} -> {:?} not adjacent", pair[0].node, pair[1].node));
            assert_eq!(adjacency.is_crawl(i), pair[1].crawled_from_parent);
        }
    }

    #[test]
    fn corridor_pathfind_in_order() {
        let (f, mut scratch) = Fixture::new(corridor(5));
        let mut path = DronePath::new();
        drone_pathfind(
            &f.ctx(),
            &mut scratch,
            DroneAllow::All,
            Team::None,
            node(0),
            node(4),
            &mut path,
        );

        let vertices: Vec<i16> = path.iter().map(|n| n.node.vertex).collect();
        assert_eq!(vertices, vec![0, 1, 2, 3, 4]);
        assert_path_consecutive(&f.graph, &path);
        assert_eq!(path[0].pos, vec3(0.0, 0.0, 0.0));
        assert_eq!(path[4].pos, vec3(4.0, 0.0, 0.0));
    }

    #[test]
    fn shoot_edge_beats_crawling_when_allowed() {
        let (f, mut scratch) = Fixture::new(corridor_with_shot(5));
        let mut path = DronePath::new();
        drone_pathfind(
            &f.ctx(),
            &mut scratch,
            DroneAllow::All,
            Team::None,
            node(0),
            node(4),
            &mut path,
        );

        let vertices: Vec<i16> = path.iter().map(|n| n.node.vertex).collect();
        assert_eq!(vertices, vec![0, 4]);
        assert!(!path[1].crawled_from_parent);
    }

    #[test]
    fn enemy_field_blocks_the_corridor() {
        let (mut f, mut scratch) = Fixture::new(corridor(5));
        f.state.force_fields.push(ForceFieldState {
            pos: vec3(2.0, 0.0, 0.0),
            team: Team::B,
        });
        f.tunables.force_field_radius = 1.5;

        let mut path = DronePath::new();
        drone_pathfind(
            &f.ctx(),
            &mut scratch,
            DroneAllow::All,
            Team::A,
            node(0),
            node(4),
            &mut path,
        );
        assert!(path.is_empty());

        // the field's own team passes
        drone_pathfind(
            &f.ctx(),
            &mut scratch,
            DroneAllow::All,
            Team::B,
            node(0),
            node(4),
            &mut path,
        );
        assert!(!path.is_empty());
    }

    #[test]
    fn different_signatures_bail_without_searching() {
        let (mut f, mut scratch) = Fixture::new(corridor(5));
        f.state.force_fields.push(ForceFieldState {
            pos: vec3(4.0, 0.0, 0.0),
            team: Team::B,
        });
        f.tunables.force_field_radius = 1.5;

        let mut path = DronePath::new();
        drone_pathfind(
            &f.ctx(),
            &mut scratch,
            DroneAllow::All,
            Team::A,
            node(0),
            node(4),
            &mut path,
        );
        assert!(path.is_empty());
    }

    #[test]
    fn removed_edge_reroutes_or_fails() {
        let (mut f, mut scratch) = Fixture::new(corridor_with_shot(5));
        f.graph.remove_edge(node(2), node(3));

        let mut path = DronePath::new();
        drone_pathfind(
            &f.ctx(),
            &mut scratch,
            DroneAllow::All,
            Team::None,
            node(0),
            node(4),
            &mut path,
        );
        // the endpoint shoot edge still gets there
        let vertices: Vec<i16> = path.iter().map(|n| n.node.vertex).collect();
        assert_eq!(vertices, vec![0, 4]);

        // crawl-only now has no route past the gap
        drone_pathfind(
            &f.ctx(),
            &mut scratch,
            DroneAllow::Crawl,
            Team::None,
            node(0),
            node(4),
            &mut path,
        );
        assert!(path.is_empty());
    }

    #[test]
    fn start_equals_goal_is_single_node() {
        let (f, mut scratch) = Fixture::new(corridor(5));
        let mut path = DronePath::new();
        drone_pathfind(
            &f.ctx(),
            &mut scratch,
            DroneAllow::All,
            Team::None,
            node(2),
            node(2),
            &mut path,
        );
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].node, node(2));
    }

    #[test]
    fn spawn_scorer_heads_forward_of_dir() {
        let (f, mut scratch) = Fixture::new(corridor(5));
        let start = node(2);
        let scorer = SpawnScorer {
            start_vertex: start,
            start_pos: f.graph.vertex(start),
            dir: vec3(1.0, 0.0, 0.0),
        };

        let mut path = DronePath::new();
        drone_astar(
            &f.unbiased(),
            &mut scratch,
            DroneAllow::Crawl,
            Team::None,
            start,
            &scorer,
            &mut path,
        );

        let last = path.last().unwrap();
        assert!(last.pos.x > f.graph.vertex(start).x);
    }

    #[test]
    fn hit_pathfind_reroutes_when_target_snaps_to_start() {
        let (f, mut scratch) = Fixture::new(corridor_with_shot(5));
        let mut path = DronePath::new();

        // standing at v0, asked to hit a target right next to v0: target's
        // closest vertex is our own, so a stand-in that lines up is chosen
        drone_pathfind_hit(
            &f.ctx(),
            &mut scratch,
            DroneAllow::All,
            Team::None,
            vec3(0.0, 1.0, 0.0),
            vec3(0.0, 1.0, 0.0),
            vec3(0.2, 0.5, 0.0),
            &mut path,
        );

        assert!(path.len() >= 2, "got {} nodes", path.len());
        assert_eq!(path[0].node, node(0));
        // target's own vertex appended as the final shot node
        let last = path.last().unwrap();
        assert_eq!(last.node, node(0));
        assert!(!last.crawled_from_parent);
    }

    #[test]
    fn audio_search_reaches_across_the_corridor() {
        let (f, mut scratch) = Fixture::new(corridor(5));

        let mut path = DronePath::new();
        audio_pathfind(
            &f.unbiased(),
            &mut scratch,
            vec3(0.0, 1.0, 0.0),
            vec3(4.0, 1.0, 0.0),
            &mut path,
        );
        assert!(!path.is_empty());
        assert_eq!(path.last().unwrap().node, node(4));
    }

    #[test]
    fn no_allocation_after_warmup() {
        let (f, mut scratch) = Fixture::new(corridor(5));
        let mut path = DronePath::new();

        // warmup
        drone_pathfind(
            &f.ctx(),
            &mut scratch,
            DroneAllow::All,
            Team::None,
            node(0),
            node(4),
            &mut path,
        );

        let heap_capacity = scratch.queue.capacity();
        let table_len = scratch.table.len();
        for _ in 0..8 {
            drone_pathfind(
                &f.ctx(),
                &mut scratch,
                DroneAllow::Crawl,
                Team::None,
                node(0),
                node(4),
                &mut path,
            );
        }
        assert_eq!(scratch.queue.capacity(), heap_capacity);
        assert_eq!(scratch.table.len(), table_len);
    }

    #[test]
    fn scratch_resizes_to_vertex_count() {
        let graph = corridor(5);
        let mut scratch = Scratch::default();
        scratch.resize_for(&graph);
        assert_eq!(scratch.table.len(), graph.total_vertices());
    }
}
