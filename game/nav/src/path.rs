use common::*;

use crate::graph::NavNode;

/// Hard cap on any path delivered to the game. When a search overruns this,
/// the goal-end tail is dropped and the start-side prefix survives.
pub const MAX_PATH_LENGTH: usize = 32;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DronePathNode {
    pub pos: Vec3,
    pub normal: Vec3,
    pub node: NavNode,
    /// Copied from the adjacency flag of the edge entering this node
    pub crawled_from_parent: bool,
}

pub type DronePath = ArrayVec<DronePathNode, MAX_PATH_LENGTH>;

/// Walker paths are plain waypoints on the minion mesh
pub type WalkPath = ArrayVec<Vec3, MAX_PATH_LENGTH>;

pub fn drone_path_length(path: &DronePath) -> F {
    path.windows(2)
        .map(|pair| pair[0].pos.distance(pair[1].pos))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_sums_segments() {
        let mut path = DronePath::new();
        for x in [0.0, 3.0, 3.0] {
            path.push(DronePathNode {
                pos: vec3(x, 0.0, 0.0),
                normal: vec3(0.0, 1.0, 0.0),
                node: NavNode::NONE,
                crawled_from_parent: false,
            });
        }
        path[2].pos.y = 4.0;

        assert_eq!(drone_path_length(&path), 7.0);
        assert_eq!(drone_path_length(&DronePath::new()), 0.0);
    }
}
