use std::hash::{BuildHasher, Hasher};

use common::*;

use crate::config::Tunables;
use crate::team::Team;

/// A team-owned oriented detector. Vertices it sees cost more (enemy) or less
/// (friendly) to route through.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RectifierState {
    pub pos: Vec3,
    pub team: Team,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ForceFieldState {
    pub pos: Vec3,
    pub team: Team,
}

/// Snapshot of the mutable world state the worker needs, replicated from the
/// game thread every resync interval. The worker never reads live entities.
#[derive(Clone, Debug, Default)]
pub struct NavGameState {
    /// Aliased as "sensors" in cost calculations
    pub rectifiers: Vec<RectifierState>,
    pub force_fields: Vec<ForceFieldState>,
}

impl NavGameState {
    pub fn clear(&mut self) {
        self.rectifiers.clear();
        self.force_fields.clear();
    }
}

fn mix_field_index(i: usize) -> u64 {
    // fixed seeds: both sides of the thread boundary must agree
    let mut hasher = ahash::RandomState::with_seeds(0x243f, 0x6a88, 0x85a3, 0x08d3).build_hasher();
    hasher.write_usize(i);
    hasher.finish()
}

/// Set-hash of the enemy force fields whose spheres contain `pos`, for
/// `team`. Equal signatures are a necessary condition for reachability.
///
/// Commutative accumulation, so only the set membership matters. The empty
/// set hashes to 0.
pub fn force_field_signature(state: &NavGameState, team: Team, pos: Vec3, radius: F) -> u32 {
    let mut acc = 0u64;
    for (i, field) in state.force_fields.iter().enumerate() {
        if field.team != team && field.pos.distance2(pos) < radius * radius {
            acc = acc.wrapping_add(mix_field_index(i));
        }
    }
    (acc ^ (acc >> 32)) as u32
}

/// Does the segment `a -> b` pass through any enemy force field sphere?
pub fn force_field_raycast(state: &NavGameState, team: Team, a: Vec3, b: Vec3, radius: F) -> bool {
    state
        .force_fields
        .iter()
        .any(|field| field.team != team && segment_intersects_sphere(a, b, field.pos, radius))
}

fn segment_intersects_sphere(a: Vec3, b: Vec3, center: Vec3, radius: F) -> bool {
    let ab = b - a;
    let len2 = ab.magnitude2();
    let t = if len2 <= F::EPSILON {
        0.0
    } else {
        ((center - a).dot(ab) / len2).clamp(0.0, 1.0)
    };
    let closest = a + ab * t;
    center.distance2(closest) < radius * radius
}

/// Team/field cost of standing at a vertex. Enemy rectifier coverage is
/// expensive, friendly coverage and friendly field interiors are free,
/// everywhere else pays the friendly bias.
pub fn sensor_cost(
    state: &NavGameState,
    team: Team,
    pos: Vec3,
    normal: Vec3,
    tunables: &Tunables,
) -> F {
    let mut in_friendly_zone = false;
    let mut in_enemy_zone = false;
    for rectifier in &state.rectifiers {
        let to_sensor = rectifier.pos - pos;
        if to_sensor.magnitude2() < tunables.sensor_range * tunables.sensor_range
            && normal.dot(to_sensor) > 0.0
        {
            if rectifier.team == team {
                in_friendly_zone = true;
            } else {
                in_enemy_zone = true;
                break;
            }
        }
    }

    let sensor = if in_enemy_zone {
        tunables.enemy_sensor_cost
    } else if in_friendly_zone {
        0.0
    } else {
        tunables.friendly_bias
    };

    let field = if state.force_fields.iter().any(|f| {
        f.team == team
            && f.pos.distance2(pos) < tunables.force_field_radius * tunables.force_field_radius
    }) {
        0.0
    } else {
        tunables.friendly_bias
    };

    sensor + field
}
