//! The machine image: word-addressed memory, registers, both stacks, and
//! the instruction pointer.

use crate::{Result, VmError, REGISTER_COUNT};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Initial capacity reserved for the value stack on a fresh load.
pub const STACK_RESERVE: usize = 64;

/// One unreturned `Call`: the callee entry point and the address of the
/// `Call` instruction itself. Bookkeeping for backtraces only; `Ret` never
/// consults this for control flow.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CallSite {
    pub target: u16,
    pub site: u16,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MachineState {
    pub mem: Vec<u16>,
    pub registers: [u16; REGISTER_COUNT],
    pub stack: Vec<u16>,
    pub calls: Vec<CallSite>,
    pub ip: u16,
}

impl MachineState {
    /// Build a fresh machine from a program blob: consecutive little-endian
    /// byte pairs become words starting at address 0. Registers zeroed,
    /// stacks empty, IP 0.
    pub fn from_program_bytes(blob: &[u8]) -> Result<Self> {
        let mem = words_from_le_bytes(blob)?;
        let stack = Vec::with_capacity(STACK_RESERVE);
        Ok(Self {
            mem,
            registers: [0; REGISTER_COUNT],
            stack,
            calls: Vec::new(),
            ip: 0,
        })
    }

    pub fn from_program_file(path: &Path) -> Result<Self> {
        let mut blob = Vec::new();
        File::open(path)?.read_to_end(&mut blob)?;
        Self::from_program_bytes(&blob)
    }

    /// Fetch a word, surfacing addresses past the loaded image as a runtime
    /// error rather than a panic.
    pub fn fetch(&self, addr: u16) -> Result<u16> {
        self.mem
            .get(addr as usize)
            .copied()
            .ok_or(VmError::MemoryOutOfBounds(addr))
    }

    pub fn store(&mut self, addr: u16, value: u16) -> Result<()> {
        match self.mem.get_mut(addr as usize) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(VmError::MemoryOutOfBounds(addr)),
        }
    }
}

pub(crate) fn words_from_le_bytes(blob: &[u8]) -> Result<Vec<u16>> {
    if blob.len() % 2 != 0 {
        return Err(VmError::InvalidImage(format!(
            "odd byte length {}",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

pub(crate) fn words_to_le_bytes(words: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.len() * 2);
    for w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
    out
}
