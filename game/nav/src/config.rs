use std::path::Path;

use common::*;
use serde::Deserialize;

/// Nav constants, overridable from a RON file per level pack.
///
/// Loaded once at startup and passed explicitly; the worker snapshots its own
/// copy at spawn.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Tunables {
    /// Radius of a force field sphere
    pub force_field_radius: F,
    /// Range within which a rectifier sees a vertex
    pub sensor_range: F,
    /// Max drone shot distance
    pub drone_max_distance: F,
    /// Per-edge bias toward longer shots
    pub path_bias: F,
    /// Bias toward staying inside friendly sensor/field coverage
    pub friendly_bias: F,
    /// Vertex cost when covered by an enemy rectifier
    pub enemy_sensor_cost: F,
    /// Obstacle slot capacity. `obstacle_add` returns this value when full
    pub max_obstacles: u32,
    /// Seconds between rectifier/force-field snapshots sent to the worker
    pub state_resync_interval: F,
    /// Half-extents of the walker nearest-cell search, in metres
    pub search_extents: [F; 3],
    /// Fixed worker RNG seed, for reproducing paths
    pub worker_seed: Option<u64>,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            force_field_radius: 8.0,
            sensor_range: 12.0,
            drone_max_distance: 25.0,
            path_bias: 4.0,
            friendly_bias: 8.0,
            enemy_sensor_cost: 24.0,
            max_obstacles: 64,
            state_resync_interval: 0.5,
            search_extents: [15.0, 10.0, 15.0],
            worker_seed: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum TunablesError {
    #[error("Failed to read tunables file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse tunables: {0}")]
    Parsing(#[from] ron::error::SpannedError),
}

impl Tunables {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TunablesError> {
        let bytes = std::fs::read_to_string(path.as_ref())?;
        let parsed = ron::de::from_str(&bytes)?;
        Ok(parsed)
    }

    pub fn extents(&self) -> Vec3 {
        Vec3::from(self.search_extents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let t = Tunables::default();
        assert!(t.force_field_radius > 0.0);
        assert!(t.enemy_sensor_cost > t.friendly_bias);
        assert_eq!(t.extents(), vec3(15.0, 10.0, 15.0));
    }

    #[test]
    fn partial_ron_overrides() {
        let t: Tunables = ron::de::from_str("(drone_max_distance: 40.0)").unwrap();
        assert_eq!(t.drone_max_distance, 40.0);
        assert_eq!(t.friendly_bias, Tunables::default().friendly_bias);
    }
}
