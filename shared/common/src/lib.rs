pub use arrayvec::*;
pub use cgmath::{self, vec3, InnerSpace, MetricSpace, Zero};
pub use parking_lot;
pub use rand::{self, prelude::*};
pub use thiserror::{self, Error};

pub use logging::{self, prelude::*, slog_value_debug, slog_value_display};

// common imports that annoyingly get resolved to other pub exports of std/core
// https://github.com/intellij-rust/intellij-rust/issues/5654
pub use std::{
    error::Error,
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    hash::Hash,
};

pub type BoxedResult<T> = Result<T, Box<dyn Error>>;

pub type F = f32;
pub type Vec3 = cgmath::Vector3<F>;
pub type Quat = cgmath::Quaternion<F>;

/// World up. This game is y-up
pub const AXIS_UP: Vec3 = Vec3::new(0.0, 1.0, 0.0);

pub fn seeded_rng(seed: Option<u64>) -> SmallRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_entropy(),
    }
}

#[macro_export]
macro_rules! some_or_continue {
    ($opt:expr) => {
        match $opt {
            Some(v) => v,
            None => continue,
        }
    };
}
