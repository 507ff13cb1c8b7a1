//! AI pathfinding subsystem: a dedicated worker thread answering walker and
//! drone navigation, line-of-sight and audio-propagation queries over two
//! fixed-capacity byte rings.
//!
//! The game thread talks to [NavBridge]; everything else hangs off the
//! worker it spawns. Two locomotion models are served: minions walk a tile
//! mesh, drones crawl a chunked vertex graph and shoot across it.

pub use astar::scorer::AstarScorer;
pub use astar::{DroneAllow, DroneNavContext, NodeData, Scratch};
pub use audio::ReverbCell;
pub use bridge::{
    AudioPathResult, DronePathResult, DronePointResult, NavBridge, NavCallback, PathResult,
    PointResult,
};
pub use config::{Tunables, TunablesError};
pub use graph::{
    read_graph, write_graph, Adjacency, Chunk, ChunkCoord, DroneGraph, GraphLoadError, NavNode,
    ADJACENCY_MAX,
};
pub use msg::{CallbackKind, DronePathfindKind, Op};
pub use path::{drone_path_length, DronePath, DronePathNode, WalkPath, MAX_PATH_LENGTH};
pub use record::{RecordAction, RecordTag, RecordedLife, RECORD_VERSION};
pub use state::{
    force_field_raycast, force_field_signature, sensor_cost, ForceFieldState, NavGameState,
    RectifierState,
};
pub use team::{Team, TeamMask};
pub use walker::{TileLayer, TileMesh, WalkerLoadError, CELL_EMPTY, CELL_RESOLUTION, TILE_SIZE};

mod astar;
mod audio;
mod bridge;
mod config;
mod graph;
mod msg;
mod path;
pub mod record;
mod ring;
mod state;
mod team;
mod walker;
mod worker;
