//! Game-thread front end. Owns the rings, the outstanding-callback table and
//! the level revision; every query returns a `u32` id that comes back with
//! the result. Handles never cross the thread boundary — only ids do, and a
//! result whose revision tag no longer matches is silently dropped.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use common::*;

use crate::astar::{DroneAllow, DroneNavContext, Scratch};
use crate::audio::{self, ReverbCell};
use crate::config::Tunables;
use crate::graph::{read_graph, DroneGraph, NavNode};
use crate::msg::{CallbackKind, DronePathfindKind, Op};
use crate::path::{DronePath, DronePathNode, WalkPath};
use crate::record::{RecordAction, RecordTag};
use crate::state::NavGameState;
use crate::team::Team;
use crate::walker::TileMesh;
use crate::worker::{self, Rings};

pub struct PathResult {
    pub id: u32,
    pub path: WalkPath,
}

pub struct DronePathResult {
    pub id: u32,
    pub path: DronePath,
}

pub struct PointResult {
    pub id: u32,
    pub pos: Vec3,
}

pub struct DronePointResult {
    pub id: u32,
    pub node: DronePathNode,
}

pub struct AudioPathResult {
    pub id: u32,
    pub listener: i8,
    pub path_length: F,
    pub straight_distance: F,
}

/// Whatever the game layer wants run when its result lands. Fired on the
/// game thread from `update`, never from the worker
pub enum NavCallback {
    Path(Box<dyn FnOnce(PathResult)>),
    DronePath(Box<dyn FnOnce(DronePathResult)>),
    Point(Box<dyn FnOnce(PointResult)>),
    DronePoint(Box<dyn FnOnce(DronePointResult)>),
    AudioPath(Box<dyn FnOnce(AudioPathResult)>),
}

struct Pending {
    callback: NavCallback,
    revision: u16,
}

/// Lowest-free-slot bitmask for obstacle ids
struct ObstacleSlots {
    bits: Vec<u64>,
    capacity: u32,
}

impl ObstacleSlots {
    fn new(capacity: u32) -> Self {
        Self {
            bits: vec![0; (capacity as usize + 63) / 64],
            capacity,
        }
    }

    fn get(&self, i: u32) -> bool {
        self.bits[(i / 64) as usize] & (1u64 << (i % 64)) != 0
    }

    fn set(&mut self, i: u32, value: bool) {
        let mask = 1u64 << (i % 64);
        if value {
            self.bits[(i / 64) as usize] |= mask;
        } else {
            self.bits[(i / 64) as usize] &= !mask;
        }
    }

    /// Lowest free slot, or None when full
    fn alloc(&mut self) -> Option<u32> {
        let id = (0..self.capacity).find(|&i| !self.get(i))?;
        self.set(id, true);
        Some(id)
    }
}

pub struct NavBridge {
    rings: Arc<Rings>,
    worker: Option<JoinHandle<()>>,
    tunables: Tunables,

    callbacks: HashMap<u32, Pending>,
    next_callback_id: u32,
    level_revision: u16,
    worker_revision: u16,

    obstacles: ObstacleSlots,
    resync_timer: F,

    // read-only copies for synchronous audio/reverb queries and the debug
    // renderer; not kept in sync with worker-side edge deletion
    local_graph: DroneGraph,
    local_state: NavGameState,
    local_scratch: Scratch,
}

impl NavBridge {
    /// Spawns the worker thread
    pub fn init(tunables: Tunables) -> Self {
        let rings = Arc::new(Rings::new());
        let worker = {
            let rings = Arc::clone(&rings);
            let tunables = tunables.clone();
            std::thread::Builder::new()
                .name("nav-worker".to_owned())
                .spawn(move || worker::run(rings, tunables))
                .expect("nav worker failed to start")
        };

        let obstacles = ObstacleSlots::new(tunables.max_obstacles);
        let resync_timer = tunables.state_resync_interval;
        Self {
            rings,
            worker: Some(worker),
            tunables,
            callbacks: HashMap::new(),
            next_callback_id: 1,
            level_revision: 0,
            worker_revision: 0,
            obstacles,
            resync_timer,
            local_graph: DroneGraph::default(),
            local_state: NavGameState::default(),
            local_scratch: Scratch::default(),
        }
    }

    pub fn quit(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.worker.take() {
            {
                let mut guard = self.rings.sync_in.lock();
                guard.write_op(Op::Quit);
            }
            if handle.join().is_err() {
                error!("nav worker panicked");
            }
        }
    }

    /// Per-frame pump: snapshots world state for the worker on the resync
    /// interval and drains whatever results are ready. Never blocks on the
    /// worker
    pub fn update(&mut self, dt: F, game_state: impl FnOnce() -> NavGameState) {
        self.resync_timer -= dt;
        if self.resync_timer < 0.0 {
            self.resync_timer += self.tunables.state_resync_interval;

            let state = game_state();
            {
                let mut guard = self.rings.sync_in.lock();
                guard.write_op(Op::UpdateState);
                guard.write_i32(state.rectifiers.len() as i32);
                for rectifier in &state.rectifiers {
                    guard.write_vec3(rectifier.pos);
                    guard.write_team(rectifier.team);
                }
                guard.write_i32(state.force_fields.len() as i32);
                for field in &state.force_fields {
                    guard.write_vec3(field.pos);
                    guard.write_team(field.team);
                }
            }
            self.local_state = state;
        }

        self.drain();
    }

    fn drain(&mut self) {
        let rings = Arc::clone(&self.rings);
        let mut out = rings.sync_out.lock();
        while out.can_read() {
            let raw = out.read_u8();
            let kind = match CallbackKind::from_wire(raw) {
                Some(kind) => kind,
                None => {
                    debug_assert!(false, "unknown callback {}", raw);
                    crit!("unknown callback, flushing outbound ring"; "callback" => raw);
                    let mut junk = vec![0u8; out.len()];
                    out.read_bytes(&mut junk);
                    break;
                }
            };

            match kind {
                CallbackKind::Load => {
                    self.worker_revision = out.read_u16();
                }
                CallbackKind::Path => {
                    let id = out.read_u32();
                    let path = out.read_walk_path();
                    match self.take(id) {
                        Some(NavCallback::Path(cb)) => cb(PathResult { id, path }),
                        Some(_) => debug_assert!(false, "callback kind mismatch"),
                        None => {}
                    }
                }
                CallbackKind::DronePath => {
                    let id = out.read_u32();
                    let path = out.read_drone_path();
                    match self.take(id) {
                        Some(NavCallback::DronePath(cb)) => cb(DronePathResult { id, path }),
                        Some(_) => debug_assert!(false, "callback kind mismatch"),
                        None => {}
                    }
                }
                CallbackKind::Point => {
                    let id = out.read_u32();
                    let pos = out.read_vec3();
                    match self.take(id) {
                        Some(NavCallback::Point(cb)) => cb(PointResult { id, pos }),
                        Some(_) => debug_assert!(false, "callback kind mismatch"),
                        None => {}
                    }
                }
                CallbackKind::DronePoint => {
                    let id = out.read_u32();
                    let node = out.read_drone_path_node();
                    match self.take(id) {
                        Some(NavCallback::DronePoint(cb)) => cb(DronePointResult { id, node }),
                        Some(_) => debug_assert!(false, "callback kind mismatch"),
                        None => {}
                    }
                }
                CallbackKind::AudioPath => {
                    let id = out.read_u32();
                    let listener = out.read_i8();
                    let path_length = out.read_f32();
                    let straight_distance = out.read_f32();
                    match self.take(id) {
                        Some(NavCallback::AudioPath(cb)) => cb(AudioPathResult {
                            id,
                            listener,
                            path_length,
                            straight_distance,
                        }),
                        Some(_) => debug_assert!(false, "callback kind mismatch"),
                        None => {}
                    }
                }
            }
        }
    }

    /// Removes the pending entry; returns the handle only if the request was
    /// issued on the current level
    fn take(&mut self, id: u32) -> Option<NavCallback> {
        let pending = self.callbacks.remove(&id)?;
        (pending.revision == self.level_revision).then_some(pending.callback)
    }

    fn register(&mut self, callback: NavCallback) -> u32 {
        let id = self.next_callback_id;
        self.next_callback_id = self.next_callback_id.wrapping_add(1);
        self.callbacks.insert(
            id,
            Pending {
                callback,
                revision: self.level_revision,
            },
        );
        id
    }

    /// Tells the worker to load `nav_path`, rebuilds the local graph copy,
    /// and invalidates every outstanding callback by bumping the revision
    pub fn load(&mut self, level_id: i32, nav_path: &Path, records_path: Option<&Path>) {
        self.level_revision = self.level_revision.wrapping_add(1);

        self.local_graph = DroneGraph::default();
        match read_local_copy(nav_path) {
            Ok(graph) => self.local_graph = graph,
            Err(e) => error!("failed to read local graph copy"; "error" => %e),
        }
        self.local_scratch.resize_for(&self.local_graph);

        let records = records_path
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut guard = self.rings.sync_in.lock();
        guard.write_op(Op::Load);
        guard.write_i32(level_id);
        guard.write_str(&nav_path.to_string_lossy());
        guard.write_str(&records);
    }

    /// Lowest free obstacle id, or `max_obstacles` when the slots are full
    pub fn obstacle_add(&mut self, pos: Vec3, radius: F, height: F) -> u32 {
        let id = match self.obstacles.alloc() {
            Some(id) => id,
            None => return self.tunables.max_obstacles, // no room
        };

        let mut guard = self.rings.sync_in.lock();
        guard.write_op(Op::ObstacleAdd);
        guard.write_u32(id);
        guard.write_vec3(pos);
        guard.write_f32(radius);
        guard.write_f32(height);
        id
    }

    pub fn obstacle_remove(&mut self, id: u32) {
        if id < self.tunables.max_obstacles {
            self.obstacles.set(id, false);
            let mut guard = self.rings.sync_in.lock();
            guard.write_op(Op::ObstacleRemove);
            guard.write_u32(id);
        }
    }

    pub fn pathfind(
        &mut self,
        team: Team,
        a: Vec3,
        b: Vec3,
        callback: impl FnOnce(PathResult) + 'static,
    ) -> u32 {
        let id = self.register(NavCallback::Path(Box::new(callback)));
        let mut guard = self.rings.sync_in.lock();
        guard.write_op(Op::Pathfind);
        guard.write_team(team);
        guard.write_vec3(a);
        guard.write_vec3(b);
        guard.write_u32(id);
        id
    }

    pub fn random_path(
        &mut self,
        pos: Vec3,
        patrol_point: Vec3,
        team: Team,
        range: F,
        callback: impl FnOnce(PathResult) + 'static,
    ) -> u32 {
        let id = self.register(NavCallback::Path(Box::new(callback)));
        let mut guard = self.rings.sync_in.lock();
        guard.write_op(Op::RandomPath);
        guard.write_vec3(pos);
        guard.write_vec3(patrol_point);
        guard.write_team(team);
        guard.write_f32(range);
        guard.write_u32(id);
        id
    }

    pub fn closest_walk_point(
        &mut self,
        pos: Vec3,
        callback: impl FnOnce(PointResult) + 'static,
    ) -> u32 {
        let id = self.register(NavCallback::Point(Box::new(callback)));
        let mut guard = self.rings.sync_in.lock();
        guard.write_op(Op::ClosestWalkPoint);
        guard.write_vec3(pos);
        guard.write_u32(id);
        id
    }

    #[allow(clippy::too_many_arguments)]
    pub fn drone_pathfind(
        &mut self,
        kind: DronePathfindKind,
        rule: DroneAllow,
        team: Team,
        a: Vec3,
        a_normal: Vec3,
        b: Vec3,
        b_normal: Vec3,
        callback: impl FnOnce(DronePathResult) + 'static,
    ) -> u32 {
        let id = self.register(NavCallback::DronePath(Box::new(callback)));
        let mut guard = self.rings.sync_in.lock();
        guard.write_op(Op::DronePathfind);
        guard.write_u8(kind as u8);
        guard.write_u8(rule as u8);
        guard.write_team(team);
        guard.write_u32(id);
        guard.write_vec3(a);
        guard.write_vec3(a_normal);
        if kind != DronePathfindKind::Random {
            if kind != DronePathfindKind::Spawn {
                guard.write_vec3(b);
            }
            if kind != DronePathfindKind::Target {
                guard.write_vec3(b_normal);
            }
        }
        id
    }

    pub fn drone_random_path(
        &mut self,
        rule: DroneAllow,
        team: Team,
        pos: Vec3,
        normal: Vec3,
        callback: impl FnOnce(DronePathResult) + 'static,
    ) -> u32 {
        self.drone_pathfind(
            DronePathfindKind::Random,
            rule,
            team,
            pos,
            normal,
            Vec3::zero(),
            Vec3::zero(),
            callback,
        )
    }

    pub fn drone_closest_point(
        &mut self,
        pos: Vec3,
        team: Team,
        callback: impl FnOnce(DronePointResult) + 'static,
    ) -> u32 {
        let id = self.register(NavCallback::DronePoint(Box::new(callback)));
        let mut guard = self.rings.sync_in.lock();
        guard.write_op(Op::DroneClosestPoint);
        guard.write_u32(id);
        guard.write_team(team);
        guard.write_vec3(pos);
        id
    }

    /// Permanently removes the one-directional edge `a -> b` in the worker's
    /// graph. Fire-and-forget; the local audio copy is left alone
    pub fn drone_mark_adjacency_bad(&mut self, a: NavNode, b: NavNode) {
        let mut guard = self.rings.sync_in.lock();
        guard.write_op(Op::DroneMarkAdjacencyBad);
        guard.write_node(a);
        guard.write_node(b);
    }

    /// Synchronous path length between two points, against the local
    /// read-only graph copy. Infinite when unreachable
    pub fn audio_pathfind(&mut self, a: Vec3, b: Vec3) -> F {
        let ctx = DroneNavContext {
            mesh: &self.local_graph,
            state: &self.local_state,
            tunables: &self.tunables,
            bias: false,
        };
        audio::audio_pathfind(&ctx, &mut self.local_scratch, a, b)
    }

    /// Asynchronous variant delivering both the path length and the straight
    /// distance to the callback
    pub fn audio_pathfind_async(
        &mut self,
        a: Vec3,
        b: Vec3,
        listener: i8,
        straight_distance: F,
        callback: impl FnOnce(AudioPathResult) + 'static,
    ) -> u32 {
        let id = self.register(NavCallback::AudioPath(Box::new(callback)));
        let mut guard = self.rings.sync_in.lock();
        guard.write_op(Op::AudioPathfind);
        guard.write_u32(id);
        guard.write_i8(listener);
        guard.write_vec3(a);
        guard.write_vec3(b);
        guard.write_f32(straight_distance);
        id
    }

    pub fn audio_reverb_calc(&self, pos: Vec3) -> ReverbCell {
        audio::audio_reverb_calc(&self.local_graph, pos)
    }

    pub fn record_init(&mut self, id: u32, team: Team, remaining_drones: i8) {
        let mut guard = self.rings.sync_in.lock();
        guard.write_op(Op::RecordInit);
        guard.write_u32(id);
        guard.write_team(team);
        guard.write_i8(remaining_drones);
    }

    pub fn record_add(
        &mut self,
        id: u32,
        tag: RecordTag,
        action: RecordAction,
    ) {
        let mut guard = self.rings.sync_in.lock();
        guard.write_op(Op::RecordAdd);
        guard.write_u32(id);
        guard.write_bytes(&tag);
        guard.write_bytes(&action);
    }

    pub fn record_close(&mut self, id: u32) {
        let mut guard = self.rings.sync_in.lock();
        guard.write_op(Op::RecordClose);
        guard.write_u32(id);
    }

    /// Flat vertex list of the local graph copy, for the debug point
    /// renderer. Rebuilt on `load`
    pub fn render_vertices(&self) -> Vec<Vec3> {
        self.local_graph.flat_vertices()
    }

    pub fn level_revision(&self) -> u16 {
        self.level_revision
    }

    pub fn worker_revision(&self) -> u16 {
        self.worker_revision
    }

    pub fn outstanding_callbacks(&self) -> usize {
        self.callbacks.len()
    }
}

impl Drop for NavBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_local_copy(path: &Path) -> BoxedResult<DroneGraph> {
    let mut reader = BufReader::new(File::open(path)?);
    // bridge only wants the drone graph that follows the tile section
    TileMesh::skip_section(&mut reader)?;
    Ok(read_graph(&mut reader)?)
}
