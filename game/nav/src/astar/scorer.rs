//! One scorer per query intent. `score` is the heuristic (higher = worse),
//! `done` the acceptance predicate checked on every popped vertex.

use common::*;

use super::NodeData;
use crate::graph::{DroneGraph, NavNode, ADJACENCY_MAX};

pub trait AstarScorer {
    /// Heuristic score for a position. Higher is worse
    fn score(&self, pos: Vec3) -> F;

    /// Did we find what we're looking for?
    fn done(&self, node: NavNode, data: &NodeData) -> bool;
}

/// Pathfind to a target vertex
pub struct PathfindScorer {
    pub end_vertex: NavNode,
    pub end_pos: Vec3,
}

impl AstarScorer for PathfindScorer {
    fn score(&self, pos: Vec3) -> F {
        self.end_pos.distance(pos)
    }

    fn done(&self, node: NavNode, _data: &NodeData) -> bool {
        node == self.end_vertex
    }
}

/// Like [PathfindScorer] but gives up once the accumulated travel cost blows
/// the budget. Audio occlusion only cares whether a short-enough detour
/// exists
pub struct AudioPathfindScorer {
    pub end_vertex: NavNode,
    pub end_pos: Vec3,
    pub budget: F,
}

impl AstarScorer for AudioPathfindScorer {
    fn score(&self, pos: Vec3) -> F {
        self.end_pos.distance(pos)
    }

    fn done(&self, node: NavNode, data: &NodeData) -> bool {
        data.travel_score > self.budget || node == self.end_vertex
    }
}

/// Run away from an enemy
pub struct AwayScorer<'a> {
    pub mesh: &'a DroneGraph,
    pub start_vertex: NavNode,
    pub away_vertex: NavNode,
    pub away_pos: Vec3,
    pub minimum_distance: F,
    /// Vertices costing at most this count as inside friendly coverage
    pub friendly_threshold: F,
}

impl AstarScorer for AwayScorer<'_> {
    fn score(&self, pos: Vec3) -> F {
        // estimated distance to goal
        (self.minimum_distance - self.away_pos.distance(pos)).max(0.0)
    }

    fn done(&self, node: NavNode, data: &NodeData) -> bool {
        if node == self.start_vertex {
            return false; // we need to go somewhere other than here
        }

        if data.sensor_score > self.friendly_threshold {
            return false; // not inside a friendly sensor zone or force field
        }

        let vertex = self.mesh.vertex(node);
        if vertex.distance2(self.away_pos) < self.minimum_distance * self.minimum_distance {
            return false; // needs to be farther away
        }

        // safe only if the enemy can't reach it in one hop
        !self
            .mesh
            .adjacency(self.away_vertex)
            .neighbors
            .contains(&node)
    }
}

/// Wander toward a random in-bounds goal, settling anywhere well-connected
pub struct RandomScorer<'a> {
    pub mesh: &'a DroneGraph,
    pub start_vertex: NavNode,
    pub start_pos: Vec3,
    pub goal: Vec3,
    pub minimum_distance: F,
}

impl AstarScorer for RandomScorer<'_> {
    fn score(&self, pos: Vec3) -> F {
        self.goal.distance(pos)
    }

    fn done(&self, node: NavNode, _data: &NodeData) -> bool {
        // end goal must be a highly accessible location
        self.mesh.adjacency(node).neighbors.len() == ADJACENCY_MAX
            && self.start_pos.distance2(self.mesh.vertex(node))
                > self.minimum_distance * self.minimum_distance
    }
}

/// Find a spawn vertex forward of `dir` from the spawn point
pub struct SpawnScorer {
    pub start_vertex: NavNode,
    pub start_pos: Vec3,
    pub dir: Vec3,
}

impl AstarScorer for SpawnScorer {
    fn score(&self, pos: Vec3) -> F {
        // want a vertex that is in the desired direction from the start
        5.0 * (1.0 - self.dir.dot(pos - self.start_pos))
    }

    fn done(&self, node: NavNode, _data: &NodeData) -> bool {
        node != self.start_vertex
    }
}
