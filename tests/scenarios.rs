//! End-to-end scenarios: whole programs driven through the step loop, the
//! runner/controller channel, and the debugger REPL.

mod common;

use common::SharedWriter;
use std::io::Cursor;
use synacor_core::{
    control_channel, load_snapshot, save_snapshot, supervise, Debugger, Reason, SnapshotInfo,
    VmError,
};

/// Step until a terminal condition and return it.
fn run_to_end(vm: &mut synacor_core::Vm) -> VmError {
    loop {
        if let Err(err) = vm.step() {
            return err;
        }
    }
}

#[test]
fn add_out_halt_emits_the_sum() {
    // Add R0 <- R0 + 4; Out R0; Halt
    let mut vm = common::vm_of(&[9, 32768, 32768, 4, 19, 32768, 0]);
    let out = SharedWriter::new();
    vm.stdout = Box::new(out.clone());
    assert!(matches!(run_to_end(&mut vm), VmError::Halt));
    assert_eq!(out.bytes(), vec![0x04]);
}

#[test]
fn set_out_halt_emits_a() {
    let mut vm = common::vm_of(&[1, 32768, 65, 19, 32768, 0]);
    let out = SharedWriter::new();
    vm.stdout = Box::new(out.clone());
    assert!(matches!(run_to_end(&mut vm), VmError::Halt));
    assert_eq!(out.text(), "A");
}

#[test]
fn call_out_ret_terminates_normally() {
    // Call R3 (pointed at 3); the callee sets R0 = 7, emits it, returns to
    // address 2 which holds Halt.
    let mut vm = common::vm_of(&[17, 32771, 0, 1, 32768, 7, 19, 32768, 18]);
    vm.state.registers[3] = 3;
    let out = SharedWriter::new();
    vm.stdout = Box::new(out.clone());
    assert!(matches!(run_to_end(&mut vm), VmError::Halt));
    assert_eq!(out.bytes(), vec![0x07]);
    assert!(vm.state.stack.is_empty());
    assert!(vm.state.calls.is_empty());
    assert!(vm.meta.is_function(3));
}

#[test]
fn save_on_eof_snapshots_the_in_instruction() {
    let dir = common::scratch_dir("save-on-eof");
    let mut vm = common::vm_of(&[19, 66, 20, 32768]);
    vm.save_on_eof = true;
    vm.save_dir = dir.clone();
    vm.stdin = Box::new(Cursor::new(Vec::new()));
    let out = SharedWriter::new();
    vm.stdout = Box::new(out.clone());

    let (runner, control) = control_channel();
    let handle = std::thread::spawn(move || runner.run(vm));
    let (_vm, reason) = supervise(control).unwrap();
    handle.join().unwrap();
    assert_eq!(reason, Reason::Eof);
    assert_eq!(out.bytes()[0], 66);

    let snapshot = std::fs::read_dir(&dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_name().to_string_lossy().starts_with("EOF-"))
        .expect("an EOF snapshot");
    let (info, state) = load_snapshot(&snapshot.path()).unwrap();
    // The pointer was rewound to the start of the In instruction, so the
    // resumed machine re-reads the missing byte.
    assert_eq!(info.ip, 2);
    assert_eq!(state.ip, 2);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn stepping_a_tight_loop_under_the_debugger() {
    // Jmp 0 spins forever; break at 0, step twice, continue. When the REPL
    // script runs out the session ends, leaving the machine at its next
    // break with at least three attempted instructions on the counter.
    let mut vm = common::vm_of(&[6, 0]);
    vm.debugging = true;
    vm.stdin = Box::new(Cursor::new(b"b 0\ns\ns\nc\n".to_vec()));
    let out = SharedWriter::new();
    vm.stdout = Box::new(out.clone());

    let (runner, control) = control_channel();
    let handle = std::thread::spawn(move || runner.run(vm));
    let (vm, reason) = Debugger::new(control).run().unwrap();
    handle.join().unwrap();

    assert_eq!(reason, Reason::Eof);
    assert!(vm.counter >= 3, "counter was {}", vm.counter);
    assert_eq!(vm.state.ip, 0);
}

#[test]
fn breakpoint_pauses_before_the_instruction_runs() {
    let mut vm = common::vm_of(&[21, 21, 21, 0]);
    vm.debugging = true;
    vm.stdin = Box::new(Cursor::new(b"b 2\nc\n".to_vec()));
    let out = SharedWriter::new();
    vm.stdout = Box::new(out.clone());

    let (runner, control) = control_channel();
    let handle = std::thread::spawn(move || runner.run(vm));
    let (vm, _reason) = Debugger::new(control).run().unwrap();
    handle.join().unwrap();

    assert_eq!(vm.state.ip, 2, "paused exactly at the breakpoint");
    assert!(
        !vm.meta.exec_mem[2],
        "the instruction at the breakpoint has not executed"
    );
}

#[test]
fn bad_operand_word_fails_without_advancing() {
    let mut vm = common::vm_of(&[1, 32776, 0]);
    assert!(matches!(vm.step(), Err(VmError::ValueOutOfRange(32776))));
    assert_eq!(vm.state.ip, 0);
}

#[test]
fn restored_snapshot_replays_identically() {
    let dir = common::scratch_dir("replay");
    let path = dir.join("mid-run");

    // Set R0 = 5; Out R0; Add R0 <- R0 + 1; Out R0; Halt
    let program = [1, 32768, 5, 19, 32768, 9, 32768, 32768, 1, 19, 32768, 0];

    let mut vm = common::vm_of(&program);
    let out = SharedWriter::new();
    vm.stdout = Box::new(out.clone());
    vm.step().unwrap();
    let info = SnapshotInfo::new(&vm.state, vm.counter);
    save_snapshot(&path, &info, &vm.state).unwrap();
    assert!(matches!(run_to_end(&mut vm), VmError::Halt));

    let (info, state) = load_snapshot(&path).unwrap();
    let mut replay = synacor_core::Vm::new(state, synacor_core::Metadata::sized(program.len()));
    replay.counter = info.instruction_count;
    let replay_out = SharedWriter::new();
    replay.stdout = Box::new(replay_out.clone());
    assert!(matches!(run_to_end(&mut replay), VmError::Halt));

    assert_eq!(out.bytes(), replay_out.bytes());
    assert_eq!(vm.state, replay.state);
    assert_eq!(vm.counter, replay.counter);
    let _ = std::fs::remove_dir_all(&dir);
}
