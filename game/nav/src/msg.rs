//! Message opcodes and the fixed-shape payload helpers shared by both ends
//! of the rings. There is no length prefix; the reader knows every payload's
//! shape from its opcode. Only callback-table ids cross the thread boundary,
//! never handles.

use common::*;

use crate::path::{DronePath, DronePathNode, WalkPath, MAX_PATH_LENGTH};
use crate::ring::RingGuard;

/// Game -> worker
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Op {
    Load,
    ObstacleAdd,
    ObstacleRemove,
    Pathfind,
    RandomPath,
    ClosestWalkPoint,
    DronePathfind,
    DroneClosestPoint,
    DroneMarkAdjacencyBad,
    UpdateState,
    AudioPathfind,
    RecordInit,
    RecordAdd,
    RecordClose,
    Quit,
}

/// Worker -> game
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum CallbackKind {
    Path,
    DronePath,
    Point,
    DronePoint,
    Load,
    AudioPath,
}

/// Sub-type of a `DronePathfind` request
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum DronePathfindKind {
    LongRange,
    Target,
    Spawn,
    Random,
    Away,
}

macro_rules! opcode_from_wire {
    ($ty:ty, $max:expr) => {
        impl $ty {
            pub(crate) fn from_wire(raw: u8) -> Option<Self> {
                (raw <= $max as u8).then(|| unsafe { std::mem::transmute::<u8, $ty>(raw) })
            }
        }
    };
}

opcode_from_wire!(Op, Op::Quit);
opcode_from_wire!(CallbackKind, CallbackKind::AudioPath);
opcode_from_wire!(DronePathfindKind, DronePathfindKind::Away);

impl RingGuard<'_> {
    pub fn write_op(&mut self, op: Op) {
        self.write_u8(op as u8);
    }

    pub fn write_callback_kind(&mut self, kind: CallbackKind) {
        self.write_u8(kind as u8);
    }

    pub fn write_drone_path_node(&mut self, node: &DronePathNode) {
        self.write_vec3(node.pos);
        self.write_vec3(node.normal);
        self.write_node(node.node);
        self.write_u8(node.crawled_from_parent as u8);
    }

    pub fn read_drone_path_node(&mut self) -> DronePathNode {
        let pos = self.read_vec3();
        let normal = self.read_vec3();
        let node = self.read_node();
        let crawled_from_parent = self.read_u8() != 0;
        DronePathNode {
            pos,
            normal,
            node,
            crawled_from_parent,
        }
    }

    pub fn write_drone_path(&mut self, path: &DronePath) {
        self.write_u16(path.len() as u16);
        for node in path {
            self.write_drone_path_node(node);
        }
    }

    pub fn read_drone_path(&mut self) -> DronePath {
        let len = (self.read_u16() as usize).min(MAX_PATH_LENGTH);
        let mut path = DronePath::new();
        for _ in 0..len {
            path.push(self.read_drone_path_node());
        }
        path
    }

    pub fn write_walk_path(&mut self, path: &WalkPath) {
        self.write_u16(path.len() as u16);
        for &point in path {
            self.write_vec3(point);
        }
    }

    pub fn read_walk_path(&mut self) -> WalkPath {
        let len = (self.read_u16() as usize).min(MAX_PATH_LENGTH);
        let mut path = WalkPath::new();
        for _ in 0..len {
            path.push(self.read_vec3());
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NavNode;
    use crate::ring::SyncRing;

    #[test]
    fn opcode_round_trip() {
        for raw in 0..=u8::MAX {
            match Op::from_wire(raw) {
                Some(op) => assert_eq!(op as u8, raw),
                None => assert!(raw > Op::Quit as u8),
            }
        }
        assert_eq!(Op::from_wire(Op::DronePathfind as u8), Some(Op::DronePathfind));
        assert_eq!(CallbackKind::from_wire(200), None);
    }

    #[test]
    fn drone_path_round_trip() {
        let mut path = DronePath::new();
        for i in 0..3 {
            path.push(DronePathNode {
                pos: vec3(i as f32, 0.0, 0.0),
                normal: vec3(0.0, 1.0, 0.0),
                node: NavNode { chunk: 0, vertex: i },
                crawled_from_parent: i != 0,
            });
        }

        let ring = SyncRing::with_capacity(1024);
        let mut guard = ring.lock();
        guard.write_drone_path(&path);
        let read = guard.read_drone_path();
        assert_eq!(read.as_slice(), path.as_slice());
    }
}
