//! The executor: opcode semantics, the step loop, and the rendezvous
//! protocol that hands the machine back and forth between the runner and
//! its controller (debugger or supervisor).
//!
//! Ownership of the whole [`Vm`] moves through the channel on every pause,
//! so exactly one side can touch machine state at any moment and no locking
//! is involved.

use crate::decode::{decode, DecodedInstr, Opcode, Operand};
use crate::metadata::Metadata;
use crate::snapshot::{save_snapshot, snapshot_name, SnapshotInfo};
use crate::state::{CallSite, MachineState};
use crate::value::{mod15, Place, Source};
use crate::{Result, VmError};
use std::collections::HashSet;
use std::fmt;
use std::io::{self, BufRead, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;

/// Why the runner handed the machine over.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reason {
    /// A break condition; the controller is expected to release the machine.
    Break,
    /// Opcode 0 or `Ret` on an empty stack.
    Halt,
    /// Input exhausted outside debug mode.
    Eof,
    /// A runtime or decode fault, carrying its description.
    Fault(String),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Break => write!(f, "break"),
            Reason::Halt => write!(f, "halt"),
            Reason::Eof => write!(f, "eof"),
            Reason::Fault(text) => write!(f, "{text}"),
        }
    }
}

/// One rendezvous message: the reason paired with the machine itself.
pub struct Event {
    pub reason: Reason,
    pub vm: Vm,
}

impl Reason {
    /// Terminal reasons end the session; only `Break` expects a release.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Reason::Break)
    }
}

/// The runner's side of the control channel.
pub struct Runner {
    events: SyncSender<Event>,
    resume: Receiver<Vm>,
}

/// The controller's side of the control channel. Dropping it terminates the
/// runner at its next pause.
pub struct Control {
    pub events: Receiver<Event>,
    pub resume: SyncSender<Vm>,
}

/// Build the unbuffered rendezvous pair connecting a [`Runner`] to its
/// controller.
pub fn control_channel() -> (Runner, Control) {
    let (event_tx, event_rx) = sync_channel(0);
    let (resume_tx, resume_rx) = sync_channel(0);
    (
        Runner {
            events: event_tx,
            resume: resume_rx,
        },
        Control {
            events: event_rx,
            resume: resume_tx,
        },
    )
}

pub struct Vm {
    pub state: MachineState,
    pub meta: Metadata,
    pub metadata_file: PathBuf,
    /// Address breakpoints.
    pub breakpoints: HashSet<u16>,
    /// Opcode breakpoints, keyed by raw opcode word.
    pub break_ops: HashSet<u16>,
    /// When set, every step is a break condition.
    pub step_mode: bool,
    pub save_on_eof: bool,
    pub debugging: bool,
    /// Instruction attempts since load, including the terminal one.
    pub counter: u64,
    /// Byte source for the `In` opcode, shared with the debugger REPL.
    pub stdin: Box<dyn BufRead + Send>,
    /// Byte sink for the `Out` opcode and all machine/debugger output.
    pub stdout: Box<dyn Write + Send>,
    /// Directory snapshot files are created in.
    pub save_dir: PathBuf,
    /// Set by the save signal; polled and cleared once per step.
    pub save_signal: Arc<AtomicBool>,
    /// Set by the debug-break signal; polled and cleared once per step.
    pub break_signal: Arc<AtomicBool>,
}

impl Vm {
    pub fn new(state: MachineState, meta: Metadata) -> Self {
        Self {
            state,
            meta,
            metadata_file: PathBuf::from(".metadata"),
            breakpoints: HashSet::new(),
            break_ops: HashSet::new(),
            step_mode: false,
            save_on_eof: false,
            debugging: false,
            counter: 0,
            stdin: Box::new(io::empty()),
            stdout: Box::new(io::sink()),
            save_dir: PathBuf::from("."),
            save_signal: Arc::new(AtomicBool::new(false)),
            break_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Count an attempt and execute the instruction at the current pointer.
    /// The counter covers attempts, not completions, so the terminal
    /// instruction of a run is included in the reported total.
    pub fn step(&mut self) -> Result<()> {
        self.counter += 1;
        self.execute()
    }

    /// Decode and execute the instruction at the current pointer.
    ///
    /// On a decode error the pointer is untouched; on end-of-input it is
    /// restored to the start of the `In` instruction so the same byte is
    /// re-read after recovery.
    fn execute(&mut self) -> Result<()> {
        let op_ip = self.state.ip;
        self.meta.mark_exec(op_ip);
        let instr = decode(&self.state, &self.meta, op_ip, false)?;
        self.state.ip = instr.next_ip;
        match self.apply(&instr, op_ip) {
            Ok(()) => Ok(()),
            Err(VmError::InputEof) => {
                self.state.ip = op_ip;
                Err(VmError::InputEof)
            }
            Err(err) => Err(err),
        }
    }

    fn apply(&mut self, instr: &DecodedInstr, op_ip: u16) -> Result<()> {
        match instr.spec.code {
            Opcode::Halt => return Err(VmError::Halt),
            Opcode::Set => {
                let v = self.source(instr, 1);
                self.write_place(self.place(instr, 0), v)?;
            }
            Opcode::Push => {
                let v = self.source(instr, 0);
                self.state.stack.push(v);
            }
            Opcode::Pop => {
                let v = self.state.stack.pop().ok_or(VmError::Halt)?;
                self.write_place(self.place(instr, 0), v)?;
            }
            Opcode::Eq => {
                let v = (self.source(instr, 1) == self.source(instr, 2)) as u16;
                self.write_place(self.place(instr, 0), v)?;
            }
            Opcode::Gt => {
                let v = (self.source(instr, 1) > self.source(instr, 2)) as u16;
                self.write_place(self.place(instr, 0), v)?;
            }
            Opcode::Jmp => self.state.ip = self.source(instr, 0),
            Opcode::Jt => {
                if self.source(instr, 0) != 0 {
                    self.state.ip = self.source(instr, 1);
                }
            }
            Opcode::Jf => {
                if self.source(instr, 0) == 0 {
                    self.state.ip = self.source(instr, 1);
                }
            }
            Opcode::Add => {
                let v = mod15(self.source(instr, 1) as u32 + self.source(instr, 2) as u32);
                self.write_place(self.place(instr, 0), v)?;
            }
            Opcode::Mult => {
                let v = mod15(self.source(instr, 1) as u32 * self.source(instr, 2) as u32);
                self.write_place(self.place(instr, 0), v)?;
            }
            Opcode::Mod => {
                let v = self
                    .source(instr, 1)
                    .checked_rem(self.source(instr, 2))
                    .ok_or(VmError::DivideByZero)?;
                self.write_place(self.place(instr, 0), v)?;
            }
            Opcode::And => {
                let v = (self.source(instr, 1) & self.source(instr, 2)) & 0x7FFF;
                self.write_place(self.place(instr, 0), v)?;
            }
            Opcode::Or => {
                let v = (self.source(instr, 1) | self.source(instr, 2)) & 0x7FFF;
                self.write_place(self.place(instr, 0), v)?;
            }
            Opcode::Not => {
                let v = !self.source(instr, 1) & 0x7FFF;
                self.write_place(self.place(instr, 0), v)?;
            }
            Opcode::RMem => {
                let ptr = self.source(instr, 1);
                let v = self.state.fetch(ptr)?;
                self.meta.mark_read(ptr);
                self.write_place(self.place(instr, 0), v)?;
            }
            Opcode::WMem => {
                let addr = self.source(instr, 0);
                let v = self.source(instr, 1);
                self.state.store(addr, v)?;
                self.meta.mark_write(addr);
            }
            Opcode::Call => {
                let target = self.source(instr, 0);
                self.meta.mark_function(target);
                self.state.calls.push(CallSite {
                    target,
                    site: op_ip,
                });
                self.state.stack.push(self.state.ip);
                self.state.ip = target;
            }
            Opcode::Ret => {
                let ip = self.state.stack.pop().ok_or(VmError::Halt)?;
                self.state.ip = ip;
                self.state.calls.pop();
            }
            Opcode::Out => {
                let v = self.source(instr, 0);
                self.stdout.write_all(&[(v & 0xFF) as u8])?;
                self.stdout.flush()?;
            }
            Opcode::In => {
                let mut buf = [0u8; 1];
                match self.stdin.read_exact(&mut buf) {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                        return Err(VmError::InputEof)
                    }
                    Err(err) => return Err(VmError::Io(err)),
                }
                self.write_place(self.place(instr, 0), buf[0] as u16)?;
            }
            Opcode::Noop => {}
        }
        Ok(())
    }

    fn source(&self, instr: &DecodedInstr, slot: usize) -> u16 {
        match instr.operands[slot] {
            Operand::Value(Source::Immediate(v)) => v,
            Operand::Value(Source::Register(r)) => self.state.registers[r as usize],
            Operand::Slot(_) => unreachable!("R-slot expected; the opcode table is misaligned"),
        }
    }

    fn place(&self, instr: &DecodedInstr, slot: usize) -> Place {
        match instr.operands[slot] {
            Operand::Slot(place) => place,
            Operand::Value(_) => unreachable!("L-slot expected; the opcode table is misaligned"),
        }
    }

    fn write_place(&mut self, place: Place, value: u16) -> Result<()> {
        match place {
            Place::Register(r) => {
                self.state.registers[r as usize] = value;
                Ok(())
            }
            Place::Memory(addr) => {
                self.state.store(addr, value)?;
                self.meta.mark_write(addr);
                Ok(())
            }
        }
    }

    /// Is a break condition live for the instruction about to execute?
    pub fn break_due(&self, signaled: bool) -> bool {
        let op_break = self
            .state
            .mem
            .get(self.state.ip as usize)
            .is_some_and(|w| self.break_ops.contains(w));
        op_break || self.step_mode || self.breakpoints.contains(&self.state.ip) || signaled
    }

    /// Write a snapshot named `<prefix>-<RFC3339>` into the save directory.
    pub fn take_snapshot(&mut self, prefix: &str) -> Result<PathBuf> {
        let path = self.save_dir.join(snapshot_name(prefix));
        let _ = writeln!(self.stdout, "saving to {}", path.display());
        let info = SnapshotInfo::new(&self.state, self.counter);
        save_snapshot(&path, &info, &self.state)?;
        Ok(path)
    }

    pub fn save_metadata(&mut self) -> Result<()> {
        let _ = writeln!(self.stdout, "saving metadata");
        self.meta.save(&self.metadata_file)
    }
}

impl Runner {
    /// Drive the machine until a terminal condition. The machine is handed
    /// to the controller once before the first step and on every break
    /// condition after that; a closed control channel terminates the run.
    pub fn run(self, mut vm: Vm) {
        vm.counter = 0;
        vm = match self.pause(vm) {
            Some(vm) => vm,
            None => return,
        };
        loop {
            // The attempt about to happen is already counted, so a debugger
            // inspecting a pause sees it included.
            vm.counter += 1;
            if vm.save_signal.swap(false, Ordering::Relaxed) {
                if let Err(err) = vm.take_snapshot("SIG") {
                    let _ = writeln!(vm.stdout, "snapshot failed: {err}");
                }
            }
            let signaled = vm.debugging && vm.break_signal.swap(false, Ordering::Relaxed);
            if signaled {
                let _ = writeln!(vm.stdout, "break signal received");
            }
            if vm.break_due(signaled) {
                vm = match self.pause(vm) {
                    Some(vm) => vm,
                    None => return,
                };
            }
            match vm.execute() {
                Ok(()) => {}
                Err(VmError::Halt) => return self.finish(vm, Reason::Halt),
                Err(VmError::InputEof) => {
                    // The pointer is already back on the In opcode.
                    if vm.debugging {
                        vm.step_mode = true;
                        continue;
                    }
                    if vm.save_on_eof {
                        if let Err(err) = vm.take_snapshot("EOF") {
                            let _ = writeln!(vm.stdout, "snapshot failed: {err}");
                        }
                    }
                    return self.finish(vm, Reason::Eof);
                }
                Err(err) => return self.finish(vm, Reason::Fault(err.to_string())),
            }
        }
    }

    /// Rendezvous: hand the machine over and block until it is released.
    /// `None` means the controller is gone and the run should end.
    fn pause(&self, vm: Vm) -> Option<Vm> {
        if self
            .events
            .send(Event {
                reason: Reason::Break,
                vm,
            })
            .is_err()
        {
            return None;
        }
        self.resume.recv().ok()
    }

    fn finish(&self, vm: Vm, reason: Reason) {
        let _ = self.events.send(Event { reason, vm });
    }
}
