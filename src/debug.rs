//! The debugger REPL and the non-interactive supervisor. Both are
//! controllers for a [`Runner`](crate::exec::Runner): they block on the
//! event channel, own the machine while it is paused, and release it to
//! resume execution.

use crate::decode::OpSpec;
use crate::disasm::{dis, read_string};
use crate::exec::{Control, Event, Reason, Vm};
use crate::{Result, VmError};
use std::io::Write;

/// Default word count for the `d` command.
const DIS_DEFAULT_LEN: usize = 32;
/// Maximum matches listed by the `l`/`look` command.
const LOOK_LIMIT: usize = 100;

enum Verdict {
    /// Release the machine and wait for the next event.
    Release,
    /// Keep the machine paused and prompt again.
    Stay,
}

pub struct Debugger {
    control: Control,
}

impl Debugger {
    pub fn new(control: Control) -> Self {
        Self { control }
    }

    /// Run the interactive session until the machine terminates or the
    /// REPL input is exhausted. Returns the machine and its terminal
    /// reason so the caller can persist metadata and report.
    pub fn run(self) -> Result<(Vm, Reason)> {
        let mut last_fields: Vec<String> = Vec::new();
        let mut repeat: usize = 0;
        loop {
            let Event { reason, mut vm } = self
                .control
                .events
                .recv()
                .map_err(|_| VmError::ChannelClosed)?;
            if reason.is_terminal() {
                return Ok((vm, reason));
            }
            for line in dis(&vm.state, &vm.meta, vm.state.ip, 1) {
                let _ = writeln!(vm.stdout, "{line}");
            }
            loop {
                let _ = write!(vm.stdout, "DBG> ");
                let _ = vm.stdout.flush();
                let mut input = String::new();
                match vm.stdin.read_line(&mut input) {
                    Ok(0) | Err(_) => return Ok((vm, Reason::Eof)),
                    Ok(_) => {}
                }
                let parsed: Vec<String> =
                    input.split_whitespace().map(str::to_owned).collect();
                let fields = if parsed.is_empty() {
                    // A blank line repeats the previous command; only `d`
                    // consults the repeat counter, to paginate forward.
                    if last_fields.is_empty() {
                        continue;
                    }
                    repeat += 1;
                    last_fields.clone()
                } else {
                    repeat = 0;
                    last_fields = parsed.clone();
                    parsed
                };
                match command(&mut vm, &fields, repeat) {
                    Verdict::Release => break,
                    Verdict::Stay => {}
                }
            }
            if self.control.resume.send(vm).is_err() {
                return Err(VmError::ChannelClosed);
            }
        }
    }
}

/// Controller for non-debug runs: acknowledge the initial pause, then wait
/// for the terminal event.
pub fn supervise(control: Control) -> Result<(Vm, Reason)> {
    loop {
        let Event { reason, vm } = control
            .events
            .recv()
            .map_err(|_| VmError::ChannelClosed)?;
        if reason.is_terminal() {
            return Ok((vm, reason));
        }
        if control.resume.send(vm).is_err() {
            return Err(VmError::ChannelClosed);
        }
    }
}

fn command(vm: &mut Vm, fields: &[String], repeat: usize) -> Verdict {
    match fields[0].as_str() {
        "s" => {
            vm.step_mode = true;
            return Verdict::Release;
        }
        "c" => {
            vm.step_mode = false;
            return Verdict::Release;
        }
        "d" => {
            let len = match fields.get(2).map(|f| f.parse::<usize>()) {
                Some(Ok(len)) => len,
                None => DIS_DEFAULT_LEN,
                Some(Err(_)) => return usage(vm, "d [<start> [<length>]]"),
            };
            let addr = match fields.get(1).map(|f| f.parse::<u16>()) {
                Some(Ok(addr)) => addr,
                None => vm.state.ip,
                Some(Err(_)) => return usage(vm, "d [<start> [<length>]]"),
            };
            let start = addr.wrapping_add((repeat * len) as u16);
            for line in dis(&vm.state, &vm.meta, start, len) {
                let _ = writeln!(vm.stdout, "{line}");
            }
        }
        "b" | "break" => match parse_addr(fields, 1) {
            Some(addr) => {
                vm.breakpoints.insert(addr);
            }
            None => return usage(vm, "break <addr>"),
        },
        "del" => match parse_addr(fields, 1) {
            Some(addr) => {
                vm.breakpoints.remove(&addr);
            }
            None => return usage(vm, "del <addr>"),
        },
        "op" => match fields.len() {
            1 => vm.break_ops.clear(),
            2 => match OpSpec::index_by_name(&fields[1]) {
                Some(op) => {
                    vm.break_ops.insert(op);
                }
                None => return usage(vm, "op [<opName>]"),
            },
            _ => return usage(vm, "op [<opName>]"),
        },
        "ann" => {
            if fields.len() < 3 {
                return usage(vm, "ann <addr> <note>");
            }
            match parse_addr(fields, 1) {
                Some(addr) => {
                    vm.meta.annotations.insert(addr, fields[2..].join(" "));
                    for line in dis(&vm.state, &vm.meta, addr, 1) {
                        let _ = writeln!(vm.stdout, "{line}");
                    }
                }
                None => return usage(vm, "ann <addr> <note>"),
            }
        }
        "bt" => {
            for call in &vm.state.calls {
                let _ = writeln!(vm.stdout, "call {}, from {}", call.target, call.site);
            }
        }
        "save" => match fields.get(1) {
            Some(prefix) => {
                if let Err(err) = vm.take_snapshot(prefix) {
                    let _ = writeln!(vm.stdout, "snapshot failed: {err}");
                }
            }
            None => return usage(vm, "save <prefix>"),
        },
        "r" => {
            let reg = fields.get(1).and_then(|f| f.parse::<usize>().ok());
            let value = fields.get(2).and_then(|f| f.parse::<u16>().ok());
            match (reg, value) {
                (Some(reg), Some(value)) if reg < vm.state.registers.len() => {
                    vm.state.registers[reg] = value;
                }
                _ => return usage(vm, "r <reg 0-7> <value>"),
            }
        }
        "m" => {
            let addr = parse_addr(fields, 1);
            let value = fields.get(2).and_then(|f| f.parse::<u16>().ok());
            match (addr, value) {
                (Some(addr), Some(value)) => {
                    if let Err(err) = vm.state.store(addr, value) {
                        let _ = writeln!(vm.stdout, "{err}");
                    }
                }
                _ => return usage(vm, "m <addr> <value>"),
            }
        }
        "string" => match parse_addr(fields, 1) {
            Some(addr) => match read_string(&vm.state, addr) {
                Some(text) => {
                    let _ = writeln!(vm.stdout, "{text}");
                }
                None => {
                    let _ = writeln!(vm.stdout, "no string at {addr}");
                }
            },
            None => return usage(vm, "string <addr>"),
        },
        "l" | "look" => match fields.get(1).and_then(|f| f.parse::<u16>().ok()) {
            Some(value) => {
                let matches: Vec<usize> = vm
                    .state
                    .mem
                    .iter()
                    .enumerate()
                    .filter(|(_, &w)| w == value)
                    .map(|(addr, _)| addr)
                    .take(LOOK_LIMIT)
                    .collect();
                for addr in matches {
                    let _ = writeln!(vm.stdout, "{addr}");
                }
            }
            None => return usage(vm, "look <value>"),
        },
        "binary" | "bin" => match fields.get(1).and_then(|f| f.parse::<u16>().ok()) {
            Some(value) => {
                let _ = writeln!(vm.stdout, "{value:016b}");
            }
            None => return usage(vm, "binary <number>"),
        },
        other => {
            let _ = writeln!(vm.stdout, "error, no such debugger command: {other}");
        }
    }
    Verdict::Stay
}

fn usage(vm: &mut Vm, text: &str) -> Verdict {
    let _ = writeln!(vm.stdout, "{text}");
    Verdict::Stay
}

fn parse_addr(fields: &[String], slot: usize) -> Option<u16> {
    fields.get(slot).and_then(|f| f.parse::<u16>().ok())
}
