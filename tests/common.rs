#![allow(dead_code)]

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use synacor_core::{MachineState, Metadata, Vm, REGISTER_COUNT};

/// Build a machine image straight from words.
pub fn machine(words: &[u16]) -> MachineState {
    MachineState {
        mem: words.to_vec(),
        registers: [0; REGISTER_COUNT],
        stack: Vec::new(),
        calls: Vec::new(),
        ip: 0,
    }
}

/// A VM over `words` with metadata sized to match.
pub fn vm_of(words: &[u16]) -> Vm {
    Vm::new(machine(words), Metadata::sized(words.len()))
}

/// A `Write` sink that can be cloned into a VM and read back afterwards.
#[derive(Clone)]
pub struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl SharedWriter {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).to_string()
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A scratch directory unique to the calling test.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("synacor-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("scratch dir");
    dir
}
