//! Durable serialization of execution state. A snapshot is a ZIP archive
//! holding a self-describing `snapshot.json` plus raw little-endian word
//! dumps of each state section; restoring one replaces the execution state
//! wholesale so the machine resumes exactly where it was preempted.

use crate::state::{words_from_le_bytes, words_to_le_bytes, CallSite, MachineState};
use crate::{Result, VmError, REGISTER_COUNT};
use chrono::{Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::read::ZipArchive;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const SNAPSHOT_MAGIC: &str = "synacor.snapshot";
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub magic: String,
    pub version: u32,
    pub created: String,
    pub ip: u16,
    #[serde(default)]
    pub instruction_count: u64,
    #[serde(default)]
    pub memory_words: usize,
    #[serde(default)]
    pub stack_depth: usize,
    #[serde(default)]
    pub call_depth: usize,
}

impl SnapshotInfo {
    pub fn new(state: &MachineState, instruction_count: u64) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC.to_string(),
            version: SNAPSHOT_VERSION,
            created: Local::now().to_rfc3339_opts(SecondsFormat::Secs, false),
            ip: state.ip,
            instruction_count,
            memory_words: state.mem.len(),
            stack_depth: state.stack.len(),
            call_depth: state.calls.len(),
        }
    }
}

/// Snapshot filename: `<prefix>-<RFC3339 timestamp>`.
pub fn snapshot_name(prefix: &str) -> String {
    format!(
        "{prefix}-{}",
        Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
    )
}

pub fn save_snapshot(path: &Path, info: &SnapshotInfo, state: &MachineState) -> Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file("snapshot.json", options)?;
    zip.write_all(&serde_json::to_vec_pretty(info)?)?;

    zip.start_file("memory.bin", options)?;
    zip.write_all(&words_to_le_bytes(&state.mem))?;

    zip.start_file("registers.bin", options)?;
    zip.write_all(&words_to_le_bytes(&state.registers))?;

    zip.start_file("stack.bin", options)?;
    zip.write_all(&words_to_le_bytes(&state.stack))?;

    zip.start_file("calls.bin", options)?;
    zip.write_all(&words_to_le_bytes(&flatten_calls(&state.calls)))?;

    zip.finish()?;
    Ok(())
}

pub fn load_snapshot(path: &Path) -> Result<(SnapshotInfo, MachineState)> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;

    let info: SnapshotInfo = {
        let buf = read_entry(&mut archive, "snapshot.json")?;
        serde_json::from_slice(&buf)?
    };
    if info.magic != SNAPSHOT_MAGIC || info.version != SNAPSHOT_VERSION {
        return Err(VmError::InvalidSnapshot(
            "snapshot magic/version mismatch".to_string(),
        ));
    }

    let mem = words_from_le_bytes(&read_entry(&mut archive, "memory.bin")?)?;
    let register_words = words_from_le_bytes(&read_entry(&mut archive, "registers.bin")?)?;
    let stack = words_from_le_bytes(&read_entry(&mut archive, "stack.bin")?)?;
    let call_words = words_from_le_bytes(&read_entry(&mut archive, "calls.bin")?)?;

    let registers: [u16; REGISTER_COUNT] = register_words.try_into().map_err(|_| {
        VmError::InvalidSnapshot("registers.bin length mismatch".to_string())
    })?;
    if call_words.len() % 2 != 0 {
        return Err(VmError::InvalidSnapshot(
            "calls.bin has a dangling half pair".to_string(),
        ));
    }
    let calls = call_words
        .chunks_exact(2)
        .map(|pair| CallSite {
            target: pair[0],
            site: pair[1],
        })
        .collect();

    let state = MachineState {
        mem,
        registers,
        stack,
        calls,
        ip: info.ip,
    };
    Ok((info, state))
}

fn flatten_calls(calls: &[CallSite]) -> Vec<u16> {
    let mut words = Vec::with_capacity(calls.len() * 2);
    for call in calls {
        words.push(call.target);
        words.push(call.site);
    }
    words
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| VmError::InvalidSnapshot(format!("{name} missing: {e}")))?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}
