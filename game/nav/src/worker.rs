//! The nav worker thread: blocking read on the inbound ring, dispatch on
//! [Op], exactly one reply on the outbound ring per query. The inbound lock
//! is held only until a message's payload is consumed; long work runs
//! unlocked.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use common::*;

use crate::astar::scorer::{AwayScorer, RandomScorer, SpawnScorer};
use crate::astar::{self, DroneAllow, DroneNavContext, Scratch};
use crate::audio;
use crate::config::Tunables;
use crate::graph::{read_graph, DroneGraph};
use crate::msg::{CallbackKind, DronePathfindKind, Op};
use crate::path::{DronePath, DronePathNode, WalkPath};
use crate::record::{self, RecordedLife, RECORD_BLOB_SIZE};
use crate::ring::{RingGuard, SyncRing};
use crate::state::{force_field_signature, ForceFieldState, NavGameState, RectifierState};
use crate::walker::TileMesh;

pub(crate) const SYNC_RING_SIZE: usize = 64 * 1024;

/// The two SPSC rings joining the game thread and the worker
pub(crate) struct Rings {
    pub sync_in: SyncRing,
    pub sync_out: SyncRing,
}

impl Rings {
    pub fn new() -> Self {
        Self {
            sync_in: SyncRing::with_capacity(SYNC_RING_SIZE),
            sync_out: SyncRing::with_capacity(SYNC_RING_SIZE),
        }
    }
}

pub(crate) fn run(rings: Arc<Rings>, tunables: Tunables) {
    let rng = seeded_rng(tunables.worker_seed);
    let mut worker = Worker {
        rings,
        tunables,
        rng,
        graph: DroneGraph::default(),
        walker: None,
        scratch: Scratch::default(),
        state: NavGameState::default(),
        records_path: None,
        pending_records: Vec::new(),
        level_revision: 0,
    };

    debug!("nav worker up");
    loop {
        match worker.dispatch() {
            Flow::Continue => {}
            Flow::Quit => break,
        }
    }
    debug!("nav worker exiting");
}

enum Flow {
    Continue,
    Quit,
}

struct Worker {
    rings: Arc<Rings>,
    tunables: Tunables,
    rng: SmallRng,

    graph: DroneGraph,
    walker: Option<TileMesh>,
    scratch: Scratch,
    state: NavGameState,

    records_path: Option<PathBuf>,
    pending_records: Vec<(u32, RecordedLife)>,

    level_revision: u16,
}

impl Worker {
    fn dispatch(&mut self) -> Flow {
        let rings = Arc::clone(&self.rings);
        let mut msg = rings.sync_in.lock_wait_read();

        let raw = msg.read_u8();
        let op = match Op::from_wire(raw) {
            Some(op) => op,
            None => {
                // without a length prefix there is no resync point
                debug_assert!(false, "unknown opcode {}", raw);
                crit!("unknown opcode, stopping nav worker"; "op" => raw);
                return Flow::Quit;
            }
        };

        match op {
            Op::Load => self.op_load(msg),
            Op::ObstacleAdd => self.op_obstacle_add(msg),
            Op::ObstacleRemove => self.op_obstacle_remove(msg),
            Op::Pathfind => self.op_pathfind(msg),
            Op::RandomPath => self.op_random_path(msg),
            Op::ClosestWalkPoint => self.op_closest_walk_point(msg),
            Op::DronePathfind => return self.op_drone_pathfind(msg),
            Op::DroneClosestPoint => self.op_drone_closest_point(msg),
            Op::DroneMarkAdjacencyBad => self.op_mark_adjacency_bad(msg),
            Op::UpdateState => self.op_update_state(msg),
            Op::AudioPathfind => self.op_audio_pathfind(msg),
            Op::RecordInit => self.op_record_init(msg),
            Op::RecordAdd => self.op_record_add(msg),
            Op::RecordClose => self.op_record_close(msg),
            Op::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn op_load(&mut self, mut msg: RingGuard) {
        let level_id = msg.read_i32();
        let nav_path = msg.read_string();
        let records_path = msg.read_string();
        drop(msg);

        // free old data
        self.graph = DroneGraph::default();
        self.walker = None;
        self.state.clear();
        self.pending_records.clear();
        self.records_path = None;

        if !records_path.is_empty() {
            let path = PathBuf::from(records_path);
            match record::prepare_file(&path) {
                Ok(()) => self.records_path = Some(path),
                Err(e) => error!("failed to prepare record file"; "error" => %e),
            }
        }

        if !nav_path.is_empty() {
            if let Err(e) = self.load_level(&nav_path) {
                // behave as an empty level rather than dying
                error!("failed to load nav level"; "path" => &nav_path, "error" => %e);
                self.graph = DroneGraph::default();
                self.walker = None;
            }
        }

        self.scratch.resize_for(&self.graph);
        self.level_revision = self.level_revision.wrapping_add(1);

        debug!("nav level loaded";
            "level" => level_id,
            "vertices" => self.graph.total_vertices(),
            "revision" => self.level_revision
        );

        let mut out = self.rings.sync_out.lock();
        out.write_callback_kind(CallbackKind::Load);
        out.write_u16(self.level_revision);
    }

    fn load_level(&mut self, path: &str) -> BoxedResult<()> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let walker = TileMesh::read_from(&mut reader)?;
        let graph = read_graph(&mut reader)?;
        self.walker = Some(walker);
        self.graph = graph;
        Ok(())
    }

    fn op_obstacle_add(&mut self, mut msg: RingGuard) {
        let id = msg.read_u32();
        let pos = msg.read_vec3();
        let radius = msg.read_f32();
        let height = msg.read_f32();
        drop(msg);

        if let Some(walker) = &mut self.walker {
            walker.add_obstacle(id, pos, radius, height);
        }
    }

    fn op_obstacle_remove(&mut self, mut msg: RingGuard) {
        let id = msg.read_u32();
        drop(msg);

        if let Some(walker) = &mut self.walker {
            walker.remove_obstacle(id);
        }
    }

    fn op_pathfind(&mut self, mut msg: RingGuard) {
        let _team = msg.read_team();
        let a = msg.read_vec3();
        let b = msg.read_vec3();
        let id = msg.read_u32();
        drop(msg);

        let mut path = WalkPath::new();
        if let Some(walker) = &self.walker {
            let extents = self.tunables.extents();
            if let (Some(start), Some(end)) = (walker.nearest(a, extents), walker.nearest(b, extents))
            {
                walker.find_path(start, end, &mut path);
                if path.len() > 1 {
                    path.remove(0); // the walker is already at the start
                }
            }
        }

        let mut out = self.rings.sync_out.lock();
        out.write_callback_kind(CallbackKind::Path);
        out.write_u32(id);
        out.write_walk_path(&path);
    }

    fn op_random_path(&mut self, mut msg: RingGuard) {
        let start = msg.read_vec3();
        let patrol_point = msg.read_vec3();
        let team = msg.read_team();
        let range = msg.read_f32();
        let id = msg.read_u32();
        drop(msg);

        let mut path = WalkPath::new();
        if let Some(walker) = &self.walker {
            let extents = self.tunables.extents();
            let radius = self.tunables.force_field_radius;
            if let Some(start_cell) = walker.nearest(start, extents) {
                let start_hash = force_field_signature(&self.state, team, start, radius);

                // rethrow until the destination shares our field signature
                let mut end = None;
                for _ in 0..20 {
                    let throw = range * (0.5 + self.rng.gen::<F>() * 0.5);
                    if let Some(p) =
                        walker.random_point_around(patrol_point, throw, extents, &mut self.rng)
                    {
                        if force_field_signature(&self.state, team, p, radius) == start_hash {
                            end = Some(p);
                            break;
                        }
                    }
                }

                if let Some(end_cell) = end.and_then(|p| walker.nearest(p, extents)) {
                    walker.find_path(start_cell, end_cell, &mut path);
                    if path.len() > 1 {
                        path.remove(0);
                    }
                }
            }
        }

        let mut out = self.rings.sync_out.lock();
        out.write_callback_kind(CallbackKind::Path);
        out.write_u32(id);
        out.write_walk_path(&path);
    }

    fn op_closest_walk_point(&mut self, mut msg: RingGuard) {
        let pos = msg.read_vec3();
        let id = msg.read_u32();
        drop(msg);

        let closest = self
            .walker
            .as_ref()
            .and_then(|walker| walker.nearest(pos, self.tunables.extents()))
            .map(|cell| self.walker.as_ref().unwrap().position(cell))
            .unwrap_or(pos);

        let mut out = self.rings.sync_out.lock();
        out.write_callback_kind(CallbackKind::Point);
        out.write_u32(id);
        out.write_vec3(closest);
    }

    fn op_drone_pathfind(&mut self, mut msg: RingGuard) -> Flow {
        let kind = match DronePathfindKind::from_wire(msg.read_u8()) {
            Some(kind) => kind,
            None => {
                debug_assert!(false, "bad drone pathfind kind");
                crit!("bad drone pathfind kind, stopping nav worker");
                return Flow::Quit;
            }
        };
        let rule = DroneAllow::from_wire(msg.read_u8());
        let team = msg.read_team();
        let id = msg.read_u32();
        let start = msg.read_vec3();
        let start_normal = msg.read_vec3();

        let radius = self.tunables.force_field_radius;
        let mut path = DronePath::new();
        let ctx = DroneNavContext {
            mesh: &self.graph,
            state: &self.state,
            tunables: &self.tunables,
            bias: true,
        };

        match kind {
            DronePathfindKind::LongRange => {
                let end = msg.read_vec3();
                let end_normal = msg.read_vec3();
                drop(msg);

                let start_vertex = self.graph.closest_point(
                    &self.state,
                    team,
                    start,
                    opt_normal(start_normal),
                    radius,
                );
                let end_vertex =
                    self.graph
                        .closest_point(&self.state, team, end, opt_normal(end_normal), radius);
                astar::drone_pathfind(
                    &ctx,
                    &mut self.scratch,
                    rule,
                    team,
                    start_vertex,
                    end_vertex,
                    &mut path,
                );
            }
            DronePathfindKind::Target => {
                let end = msg.read_vec3();
                drop(msg);

                astar::drone_pathfind_hit(
                    &ctx,
                    &mut self.scratch,
                    rule,
                    team,
                    start,
                    start_normal,
                    end,
                    &mut path,
                );
            }
            DronePathfindKind::Spawn => {
                let dir = msg.read_vec3();
                drop(msg);

                let scorer = SpawnScorer {
                    start_vertex: self.graph.closest_point(
                        &self.state,
                        team,
                        start,
                        opt_normal(start_normal),
                        radius,
                    ),
                    start_pos: start,
                    dir,
                };
                astar::drone_astar(
                    &ctx,
                    &mut self.scratch,
                    rule,
                    team,
                    scorer.start_vertex,
                    &scorer,
                    &mut path,
                );
            }
            DronePathfindKind::Random => {
                drop(msg);

                let (vmin, vmax) = self.graph.bounds();
                let goal = vec3(
                    vmin.x + self.rng.gen::<F>() * (vmax.x - vmin.x),
                    vmin.y + self.rng.gen::<F>() * (vmax.y - vmin.y),
                    vmin.z + self.rng.gen::<F>() * (vmax.z - vmin.z),
                );

                let scorer = RandomScorer {
                    mesh: &self.graph,
                    start_vertex: self.graph.closest_point(
                        &self.state,
                        team,
                        start,
                        opt_normal(start_normal),
                        radius,
                    ),
                    start_pos: start,
                    goal,
                    minimum_distance: self.wander_distance(rule),
                };
                astar::drone_astar(
                    &ctx,
                    &mut self.scratch,
                    rule,
                    team,
                    scorer.start_vertex,
                    &scorer,
                    &mut path,
                );
            }
            DronePathfindKind::Away => {
                let away = msg.read_vec3();
                let away_normal = msg.read_vec3();
                drop(msg);

                let away_vertex =
                    self.graph
                        .closest_point(&self.state, team, away, opt_normal(away_normal), radius);
                if !away_vertex.is_none() {
                    let scorer = AwayScorer {
                        mesh: &self.graph,
                        start_vertex: self.graph.closest_point(
                            &self.state,
                            team,
                            start,
                            opt_normal(start_normal),
                            radius,
                        ),
                        away_vertex,
                        away_pos: away,
                        minimum_distance: self.wander_distance(rule),
                        friendly_threshold: self.tunables.friendly_bias,
                    };
                    astar::drone_astar(
                        &ctx,
                        &mut self.scratch,
                        rule,
                        team,
                        scorer.start_vertex,
                        &scorer,
                        &mut path,
                    );
                }
            }
        }

        let mut out = self.rings.sync_out.lock();
        out.write_callback_kind(CallbackKind::DronePath);
        out.write_u32(id);
        out.write_drone_path(&path);
        Flow::Continue
    }

    /// Flee/wander distance: short for crawl-only drones, long for shooters,
    /// never more than half the level's smaller horizontal dimension
    fn wander_distance(&self, rule: DroneAllow) -> F {
        let base = if rule == DroneAllow::Crawl {
            self.tunables.drone_max_distance * 0.5
        } else {
            self.tunables.drone_max_distance * 3.0
        };
        let level = self.graph.size[0].min(self.graph.size[2]) as F * self.graph.chunk_size * 0.5;
        base.min(level)
    }

    fn op_drone_closest_point(&mut self, mut msg: RingGuard) {
        let id = msg.read_u32();
        let team = msg.read_team();
        let search_pos = msg.read_vec3();
        drop(msg);

        let node = self.graph.closest_point(
            &self.state,
            team,
            search_pos,
            None,
            self.tunables.force_field_radius,
        );
        let result = if node.is_none() {
            DronePathNode {
                pos: search_pos,
                normal: AXIS_UP,
                node,
                crawled_from_parent: false,
            }
        } else {
            DronePathNode {
                pos: self.graph.vertex(node),
                normal: self.graph.normal(node),
                node,
                crawled_from_parent: false,
            }
        };

        let mut out = self.rings.sync_out.lock();
        out.write_callback_kind(CallbackKind::DronePoint);
        out.write_u32(id);
        out.write_drone_path_node(&result);
    }

    fn op_mark_adjacency_bad(&mut self, mut msg: RingGuard) {
        let a = msg.read_node();
        let b = msg.read_node();
        drop(msg);

        self.graph.remove_edge(a, b);
    }

    fn op_update_state(&mut self, mut msg: RingGuard) {
        let rectifier_count = msg.read_i32().max(0);
        self.state.rectifiers.clear();
        for _ in 0..rectifier_count {
            let pos = msg.read_vec3();
            let team = msg.read_team();
            self.state.rectifiers.push(RectifierState { pos, team });
        }

        let field_count = msg.read_i32().max(0);
        self.state.force_fields.clear();
        for _ in 0..field_count {
            let pos = msg.read_vec3();
            let team = msg.read_team();
            self.state.force_fields.push(ForceFieldState { pos, team });
        }
    }

    fn op_audio_pathfind(&mut self, mut msg: RingGuard) {
        let id = msg.read_u32();
        let listener = msg.read_i8();
        let a = msg.read_vec3();
        let b = msg.read_vec3();
        let straight_distance = msg.read_f32();
        drop(msg);

        let ctx = DroneNavContext {
            mesh: &self.graph,
            state: &self.state,
            tunables: &self.tunables,
            bias: true,
        };
        let path_length = audio::audio_pathfind(&ctx, &mut self.scratch, a, b);

        let mut out = self.rings.sync_out.lock();
        out.write_callback_kind(CallbackKind::AudioPath);
        out.write_u32(id);
        out.write_i8(listener);
        out.write_f32(path_length);
        out.write_f32(straight_distance);
    }

    fn op_record_init(&mut self, mut msg: RingGuard) {
        let id = msg.read_u32();
        let team = msg.read_team();
        let remaining_drones = msg.read_i8();
        drop(msg);

        self.pending_records
            .push((id, RecordedLife::new(team, remaining_drones)));
    }

    fn op_record_add(&mut self, mut msg: RingGuard) {
        let id = msg.read_u32();
        let mut tag = [0u8; RECORD_BLOB_SIZE];
        let mut action = [0u8; RECORD_BLOB_SIZE];
        msg.read_bytes(&mut tag);
        msg.read_bytes(&mut action);
        drop(msg);

        match self.pending_records.iter_mut().find(|(i, _)| *i == id) {
            Some((_, record)) => record.add(tag, action),
            None => debug_assert!(false, "record {} not in progress", id),
        }
    }

    fn op_record_close(&mut self, mut msg: RingGuard) {
        let id = msg.read_u32();
        drop(msg);

        if id == 0 {
            return; // 0 is an invalid record id
        }

        match self.pending_records.iter().position(|(i, _)| *i == id) {
            Some(index) => {
                let (_, record) = self.pending_records.swap_remove(index);
                if !record.is_empty() {
                    if let Some(path) = &self.records_path {
                        if let Err(e) = record::append(path, &record) {
                            error!("failed to append record"; "error" => %e);
                        }
                    }
                }
            }
            None => debug_assert!(false, "record {} not in progress", id),
        }
    }
}

fn opt_normal(normal: Vec3) -> Option<Vec3> {
    (normal.magnitude2() > 0.0).then_some(normal)
}
