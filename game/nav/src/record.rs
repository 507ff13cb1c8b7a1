//! Per-life telemetry records. The worker accumulates `(tag, action)` pairs
//! while an AI lives and appends the finished record to a per-level file on
//! close. Records are observational only and never feed back into
//! pathfinding.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use common::*;

use crate::team::Team;

/// Bumped whenever the game's record serializer changes shape
pub const RECORD_VERSION: i32 = 1;

/// The game's serializers produce these; the core shuttles them to disk
/// unparsed
pub const RECORD_BLOB_SIZE: usize = 16;

pub type RecordTag = [u8; RECORD_BLOB_SIZE];
pub type RecordAction = [u8; RECORD_BLOB_SIZE];

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedLife {
    pub team: Team,
    pub remaining_drones: i8,
    pub entries: Vec<(RecordTag, RecordAction)>,
}

impl RecordedLife {
    pub fn new(team: Team, remaining_drones: i8) -> Self {
        Self {
            team,
            remaining_drones,
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, tag: RecordTag, action: RecordAction) {
        self.entries.push((tag, action));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ensures the record file exists and carries the current version header,
/// truncating and recreating it on mismatch
pub fn prepare_file(path: &Path) -> std::io::Result<()> {
    if let Ok(mut f) = File::open(path) {
        let version = f.read_i32::<LittleEndian>().unwrap_or(-1);
        if version == RECORD_VERSION {
            return Ok(());
        }
        warn!("record version mismatch, truncating"; "found" => version, "expected" => RECORD_VERSION);
    }

    let mut f = File::create(path)?;
    f.write_i32::<LittleEndian>(RECORD_VERSION)
}

pub fn append(path: &Path, record: &RecordedLife) -> std::io::Result<()> {
    let mut f = OpenOptions::new().append(true).open(path)?;
    f.write_i8(record.team.to_wire())?;
    f.write_i8(record.remaining_drones)?;
    f.write_u32::<LittleEndian>(record.entries.len() as u32)?;
    for (tag, action) in &record.entries {
        f.write_all(tag)?;
        f.write_all(action)?;
    }
    Ok(())
}

/// Reads every record back, for tooling and tests
pub fn read_all(path: &Path) -> std::io::Result<Vec<RecordedLife>> {
    let mut f = File::open(path)?;
    let version = f.read_i32::<LittleEndian>()?;
    if version != RECORD_VERSION {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    loop {
        let team = match f.read_i8() {
            Ok(raw) => Team::from_wire(raw),
            Err(_) => break, // end of file
        };
        let remaining_drones = f.read_i8()?;
        let count = f.read_u32::<LittleEndian>()?;

        let mut record = RecordedLife::new(team, remaining_drones);
        for _ in 0..count {
            let mut tag = [0u8; RECORD_BLOB_SIZE];
            let mut action = [0u8; RECORD_BLOB_SIZE];
            f.read_exact(&mut tag)?;
            f.read_exact(&mut action)?;
            record.entries.push((tag, action));
        }
        records.push(record);
    }
    Ok(records)
}
