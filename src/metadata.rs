//! Analyst metadata: facts accumulated about the program under execution,
//! persisted separately from execution state so they survive across runs.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Addresses that have ever been the target of a `Call`.
    #[serde(default)]
    pub functions: BTreeSet<u16>,
    /// Per-cell: ever read as data (`RMem`).
    #[serde(default)]
    pub read_mem: Vec<bool>,
    /// Per-cell: ever written (`WMem` or a memory-place store).
    #[serde(default)]
    pub write_mem: Vec<bool>,
    /// Per-cell: ever executed as an opcode.
    #[serde(default)]
    pub exec_mem: Vec<bool>,
    /// Free-form analyst comments keyed by address.
    #[serde(default)]
    pub annotations: BTreeMap<u16, String>,
}

impl Metadata {
    /// Fresh metadata with bitmaps sized to the memory image.
    pub fn sized(mem_len: usize) -> Self {
        let mut meta = Self::default();
        meta.ensure_capacity(mem_len);
        meta
    }

    /// Load from `path` and zero-extend the bitmaps to the current memory
    /// length. Metadata is best-effort: a missing file loads as fresh
    /// metadata, and a malformed one is reported and replaced rather than
    /// ending the session.
    pub fn load(path: &Path, mem_len: usize) -> Self {
        let mut meta = match File::open(path) {
            Ok(file) => match serde_json::from_reader(BufReader::new(file)) {
                Ok(meta) => meta,
                Err(err) => {
                    eprintln!(
                        "metadata file {} is malformed ({err}); starting fresh",
                        path.display()
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        };
        meta.ensure_capacity(mem_len);
        meta
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Grow the bitmaps to at least `mem_len` cells. Recorded bits are never
    /// cleared; the bitmaps only grow.
    pub fn ensure_capacity(&mut self, mem_len: usize) {
        if self.read_mem.len() < mem_len {
            self.read_mem.resize(mem_len, false);
        }
        if self.write_mem.len() < mem_len {
            self.write_mem.resize(mem_len, false);
        }
        if self.exec_mem.len() < mem_len {
            self.exec_mem.resize(mem_len, false);
        }
    }

    pub fn mark_read(&mut self, addr: u16) {
        if let Some(bit) = self.read_mem.get_mut(addr as usize) {
            *bit = true;
        }
    }

    pub fn mark_write(&mut self, addr: u16) {
        if let Some(bit) = self.write_mem.get_mut(addr as usize) {
            *bit = true;
        }
    }

    pub fn mark_exec(&mut self, addr: u16) {
        if let Some(bit) = self.exec_mem.get_mut(addr as usize) {
            *bit = true;
        }
    }

    pub fn mark_function(&mut self, addr: u16) {
        self.functions.insert(addr);
    }

    pub fn is_function(&self, addr: u16) -> bool {
        self.functions.contains(&addr)
    }

    pub fn annotation(&self, addr: u16) -> Option<&str> {
        self.annotations.get(&addr).map(String::as_str)
    }
}
