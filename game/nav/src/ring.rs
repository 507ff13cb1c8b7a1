//! Fixed-capacity SPSC byte ring with a mutex held across one whole logical
//! message. The writer brackets an opcode plus its payload inside a single
//! lock; the reader does the same. Exactly one producer thread and one
//! consumer thread per ring.

use std::time::Duration;

use common::parking_lot::{Condvar, Mutex, MutexGuard};
use common::*;

use crate::graph::NavNode;
use crate::team::Team;

pub struct SyncRing {
    inner: Mutex<RingInner>,
    readable: Condvar,
}

struct RingInner {
    data: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
}

impl SyncRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RingInner {
                data: vec![0u8; capacity].into_boxed_slice(),
                read_pos: 0,
                write_pos: 0,
            }),
            readable: Condvar::new(),
        }
    }

    pub fn lock(&self) -> RingGuard<'_> {
        RingGuard {
            inner: self.inner.lock(),
            readable: &self.readable,
        }
    }

    /// Blocks until at least one byte is readable, polling with a short
    /// sleep so a missed notify can't wedge the worker
    pub fn lock_wait_read(&self) -> RingGuard<'_> {
        let mut inner = self.inner.lock();
        while inner.read_pos == inner.write_pos {
            let _ = self
                .readable
                .wait_for(&mut inner, Duration::from_millis(16));
        }
        RingGuard {
            inner,
            readable: &self.readable,
        }
    }
}

/// One locked message bracket
pub struct RingGuard<'a> {
    inner: MutexGuard<'a, RingInner>,
    readable: &'a Condvar,
}

impl Drop for RingGuard<'_> {
    fn drop(&mut self) {
        self.readable.notify_one();
    }
}

impl RingGuard<'_> {
    pub fn can_read(&self) -> bool {
        self.inner.read_pos != self.inner.write_pos
    }

    /// Readable bytes
    pub fn len(&self) -> usize {
        let RingInner {
            read_pos,
            write_pos,
            ref data,
        } = *self.inner;
        if read_pos <= write_pos {
            write_pos - read_pos
        } else {
            write_pos + data.len() - read_pos
        }
    }

    /// The writer is responsible for never overflowing; the game thread must
    /// not outpace the worker by more than the buffer
    pub fn write_bytes(&mut self, src: &[u8]) {
        let capacity = self.inner.data.len();
        debug_assert!(
            self.len() + src.len() < capacity,
            "ring overflow: {} + {} >= {}",
            self.len(),
            src.len(),
            capacity
        );

        let inner = &mut *self.inner;
        let end = inner.write_pos + src.len();
        if end < capacity {
            inner.data[inner.write_pos..end].copy_from_slice(src);
            inner.write_pos = end;
        } else {
            let partition = capacity - inner.write_pos;
            inner.data[inner.write_pos..].copy_from_slice(&src[..partition]);
            inner.write_pos = end - capacity;
            inner.data[..inner.write_pos].copy_from_slice(&src[partition..]);
        }
    }

    pub fn read_bytes(&mut self, dst: &mut [u8]) {
        if dst.is_empty() {
            return;
        }
        debug_assert!(
            dst.len() <= self.len(),
            "ring underflow: {} > {}",
            dst.len(),
            self.len()
        );

        let capacity = self.inner.data.len();
        let inner = &mut *self.inner;
        let end = inner.read_pos + dst.len();
        if end >= capacity {
            let partition = capacity - inner.read_pos;
            dst[..partition].copy_from_slice(&inner.data[inner.read_pos..]);
            inner.read_pos = dst.len() - partition;
            dst[partition..].copy_from_slice(&inner.data[..inner.read_pos]);
        } else {
            dst.copy_from_slice(&inner.data[inner.read_pos..end]);
            inner.read_pos = end;
        }
    }
}

macro_rules! primitive_io {
    ($write:ident, $read:ident, $ty:ty) => {
        impl RingGuard<'_> {
            pub fn $write(&mut self, value: $ty) {
                self.write_bytes(&value.to_le_bytes());
            }

            pub fn $read(&mut self) -> $ty {
                let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                self.read_bytes(&mut bytes);
                <$ty>::from_le_bytes(bytes)
            }
        }
    };
}

primitive_io!(write_u8, read_u8, u8);
primitive_io!(write_i8, read_i8, i8);
primitive_io!(write_u16, read_u16, u16);
primitive_io!(write_i16, read_i16, i16);
primitive_io!(write_u32, read_u32, u32);
primitive_io!(write_i32, read_i32, i32);
primitive_io!(write_f32, read_f32, f32);

/// Sanity cap on wire strings (paths)
const MAX_WIRE_STRING: i32 = 4096;

impl RingGuard<'_> {
    pub fn write_vec3(&mut self, v: Vec3) {
        self.write_f32(v.x);
        self.write_f32(v.y);
        self.write_f32(v.z);
    }

    pub fn read_vec3(&mut self) -> Vec3 {
        let x = self.read_f32();
        let y = self.read_f32();
        let z = self.read_f32();
        vec3(x, y, z)
    }

    pub fn write_node(&mut self, node: NavNode) {
        self.write_i16(node.chunk);
        self.write_i16(node.vertex);
    }

    pub fn read_node(&mut self) -> NavNode {
        let chunk = self.read_i16();
        let vertex = self.read_i16();
        NavNode { chunk, vertex }
    }

    pub fn write_team(&mut self, team: Team) {
        self.write_i8(team.to_wire());
    }

    pub fn read_team(&mut self) -> Team {
        Team::from_wire(self.read_i8())
    }

    pub fn write_str(&mut self, s: &str) {
        debug_assert!(s.len() <= MAX_WIRE_STRING as usize);
        self.write_i32(s.len() as i32);
        self.write_bytes(s.as_bytes());
    }

    pub fn read_string(&mut self) -> String {
        let len = self.read_i32().clamp(0, MAX_WIRE_STRING) as usize;
        let mut bytes = vec![0u8; len];
        self.read_bytes(&mut bytes);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn write_read_round_trip() {
        let ring = SyncRing::with_capacity(256);
        {
            let mut guard = ring.lock();
            guard.write_u32(0xdeadbeef);
            guard.write_vec3(vec3(1.0, 2.0, 3.0));
            guard.write_str("levels/containment.nav");
            guard.write_team(Team::C);
        }
        {
            let mut guard = ring.lock();
            assert!(guard.can_read());
            assert_eq!(guard.read_u32(), 0xdeadbeef);
            assert_eq!(guard.read_vec3(), vec3(1.0, 2.0, 3.0));
            assert_eq!(guard.read_string(), "levels/containment.nav");
            assert_eq!(guard.read_team(), Team::C);
            assert!(!guard.can_read());
        }
    }

    #[test]
    fn wrap_around_copy_is_split_correctly() {
        let ring = SyncRing::with_capacity(16);
        // park the positions near the end of the buffer
        for _ in 0..3 {
            let mut guard = ring.lock();
            guard.write_u32(0);
            let _ = guard.read_u32();
        }

        let mut guard = ring.lock();
        guard.write_u32(0x01234567); // lands exactly on the boundary
        guard.write_u32(0x89abcdef);
        assert_eq!(guard.len(), 8);
        assert_eq!(guard.read_u32(), 0x01234567);
        assert_eq!(guard.read_u32(), 0x89abcdef);
        assert_eq!(guard.len(), 0);
    }

    #[test]
    fn len_tracks_wrapped_content() {
        let ring = SyncRing::with_capacity(8);
        let mut guard = ring.lock();
        guard.write_u32(7);
        assert_eq!(guard.len(), 4);
        let _ = guard.read_u16();
        guard.write_u32(0xaabbccdd); // wraps past the end
        assert_eq!(guard.len(), 6);
        assert_eq!(guard.read_u16(), 0x0000); // high half of 7u32le
        assert_eq!(guard.read_u32(), 0xaabbccdd);
    }

    #[test]
    fn lock_wait_read_blocks_until_written() {
        let ring = Arc::new(SyncRing::with_capacity(64));

        let reader = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                let mut guard = ring.lock_wait_read();
                guard.read_u32()
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        {
            let mut guard = ring.lock();
            guard.write_u32(42);
        }

        assert_eq!(reader.join().unwrap(), 42);
    }
}
