//! Instruction decoding: maps an address in the memory image to a decoded
//! instruction with resolved operand slots.

use crate::metadata::Metadata;
use crate::state::MachineState;
use crate::value::{Place, Source};
use crate::{Result, VmError};

/// The 22 opcodes of the architecture, in encoding order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Opcode {
    Halt,
    Set,
    Push,
    Pop,
    Eq,
    Gt,
    Jmp,
    Jt,
    Jf,
    Add,
    Mult,
    Mod,
    And,
    Or,
    Not,
    RMem,
    WMem,
    Call,
    Ret,
    Out,
    In,
    Noop,
}

/// Static descriptor for one opcode: display name plus the operand mode
/// string (`L` names a place, `R` produces a value).
#[derive(Debug)]
pub struct OpSpec {
    pub code: Opcode,
    pub name: &'static str,
    pub modes: &'static str,
}

/// Note `WMem` is `RR`: its first operand's *value* is the destination
/// address, so the slot itself is a source.
pub static OPS: [OpSpec; 22] = [
    OpSpec { code: Opcode::Halt, name: "Halt", modes: "" },
    OpSpec { code: Opcode::Set, name: "Set", modes: "LR" },
    OpSpec { code: Opcode::Push, name: "Push", modes: "R" },
    OpSpec { code: Opcode::Pop, name: "Pop", modes: "L" },
    OpSpec { code: Opcode::Eq, name: "Eq", modes: "LRR" },
    OpSpec { code: Opcode::Gt, name: "Gt", modes: "LRR" },
    OpSpec { code: Opcode::Jmp, name: "Jmp", modes: "R" },
    OpSpec { code: Opcode::Jt, name: "JT", modes: "RR" },
    OpSpec { code: Opcode::Jf, name: "JF", modes: "RR" },
    OpSpec { code: Opcode::Add, name: "Add", modes: "LRR" },
    OpSpec { code: Opcode::Mult, name: "Mult", modes: "LRR" },
    OpSpec { code: Opcode::Mod, name: "Mod", modes: "LRR" },
    OpSpec { code: Opcode::And, name: "And", modes: "LRR" },
    OpSpec { code: Opcode::Or, name: "Or", modes: "LRR" },
    OpSpec { code: Opcode::Not, name: "Not", modes: "LR" },
    OpSpec { code: Opcode::RMem, name: "RMem", modes: "LR" },
    OpSpec { code: Opcode::WMem, name: "WMem", modes: "RR" },
    OpSpec { code: Opcode::Call, name: "Call", modes: "R" },
    OpSpec { code: Opcode::Ret, name: "Ret", modes: "" },
    OpSpec { code: Opcode::Out, name: "Out", modes: "R" },
    OpSpec { code: Opcode::In, name: "In", modes: "L" },
    OpSpec { code: Opcode::Noop, name: "Noop", modes: "" },
];

impl OpSpec {
    /// Look up the descriptor for a raw opcode word.
    pub fn from_word(w: u16) -> Option<&'static OpSpec> {
        OPS.get(w as usize)
    }

    /// Look up an opcode index by display name (used by the `op` debugger
    /// command).
    pub fn index_by_name(name: &str) -> Option<u16> {
        OPS.iter().position(|spec| spec.name == name).map(|i| i as u16)
    }
}

/// A resolved operand slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Operand {
    Value(Source),
    Slot(Place),
}

/// One decoded instruction. Decoding never mutates the machine; the caller
/// commits `next_ip` only after a successful decode, so a decode error
/// leaves the instruction pointer at the offending instruction.
#[derive(Debug)]
pub struct DecodedInstr {
    pub spec: &'static OpSpec,
    /// Raw words consumed: the opcode word followed by the operand words.
    pub codes: Vec<u16>,
    pub operands: Vec<Operand>,
    pub next_ip: u16,
    pub is_function: bool,
    pub annotation: Option<String>,
    /// Per-operand textual forms; populated only when decoding verbosely.
    pub descriptions: Vec<String>,
}

/// Decode the instruction at `at`. `verbose` additionally renders each
/// operand for display, including the current value behind register
/// operands and any annotation on a `Call` target.
pub fn decode(
    state: &MachineState,
    meta: &Metadata,
    at: u16,
    verbose: bool,
) -> Result<DecodedInstr> {
    let word = state.fetch(at)?;
    let spec = OpSpec::from_word(word).ok_or(VmError::BadOpcode {
        opcode: word,
        addr: at,
    })?;

    let mut instr = DecodedInstr {
        spec,
        codes: vec![word],
        operands: Vec::with_capacity(spec.modes.len()),
        next_ip: at.wrapping_add(1),
        is_function: meta.is_function(at),
        annotation: meta.annotation(at).map(str::to_owned),
        descriptions: Vec::new(),
    };

    for mode in spec.modes.bytes() {
        let raw = state.fetch(instr.next_ip)?;
        instr.codes.push(raw);
        let operand = match mode {
            b'R' => Operand::Value(Source::from_word(raw)?),
            _ => Operand::Slot(Place::from_word(raw)?),
        };
        if verbose {
            instr.descriptions.push(describe(state, meta, spec, operand));
        }
        instr.operands.push(operand);
        instr.next_ip = instr.next_ip.wrapping_add(1);
    }
    Ok(instr)
}

fn describe(state: &MachineState, meta: &Metadata, spec: &OpSpec, operand: Operand) -> String {
    let mut desc = match operand {
        Operand::Value(Source::Immediate(v)) if spec.code == Opcode::Out => printable(v),
        Operand::Value(Source::Immediate(v)) => v.to_string(),
        Operand::Value(Source::Register(r)) => {
            let held = state.registers[r as usize];
            if spec.code == Opcode::Out {
                format!("{}(R{r})", printable(held))
            } else {
                format!("{held}(R{r})")
            }
        }
        Operand::Slot(place) => place.to_string(),
    };
    // Decorate a call target with any annotation on the callee.
    if spec.code == Opcode::Call {
        if let Operand::Value(source) = operand {
            let target = match source {
                Source::Immediate(v) => v,
                Source::Register(r) => state.registers[r as usize],
            };
            if let Some(note) = meta.annotation(target) {
                desc.push_str(&format!("({note})"));
            }
        }
    }
    desc
}

fn printable(v: u16) -> String {
    match v {
        10 => "\\n".to_string(),
        32..=126 => char::from(v as u8).to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_of(words: &[u16]) -> MachineState {
        MachineState {
            mem: words.to_vec(),
            ..MachineState::default()
        }
    }

    #[test]
    fn decodes_three_operand_add() {
        let state = state_of(&[9, 32768, 32769, 4]);
        let meta = Metadata::sized(state.mem.len());
        let instr = decode(&state, &meta, 0, false).unwrap();
        assert_eq!(instr.spec.code, Opcode::Add);
        assert_eq!(instr.codes, vec![9, 32768, 32769, 4]);
        assert_eq!(instr.next_ip, 4);
        assert_eq!(
            instr.operands,
            vec![
                Operand::Slot(Place::Register(0)),
                Operand::Value(Source::Register(1)),
                Operand::Value(Source::Immediate(4)),
            ]
        );
    }

    #[test]
    fn bad_opcode_word_is_an_error() {
        let state = state_of(&[22, 0]);
        let meta = Metadata::sized(state.mem.len());
        assert!(matches!(
            decode(&state, &meta, 0, false),
            Err(VmError::BadOpcode { opcode: 22, addr: 0 })
        ));
    }

    #[test]
    fn out_of_range_operand_is_an_error() {
        let state = state_of(&[1, 32776, 0]);
        let meta = Metadata::sized(state.mem.len());
        assert!(matches!(
            decode(&state, &meta, 0, false),
            Err(VmError::ValueOutOfRange(32776))
        ));
    }

    #[test]
    fn decode_past_end_of_image_is_out_of_bounds() {
        let state = state_of(&[1, 32768]);
        let meta = Metadata::sized(state.mem.len());
        assert!(matches!(
            decode(&state, &meta, 0, false),
            Err(VmError::MemoryOutOfBounds(2))
        ));
        assert!(matches!(
            decode(&state, &meta, 9, false),
            Err(VmError::MemoryOutOfBounds(9))
        ));
    }

    #[test]
    fn verbose_descriptions_show_register_contents() {
        let mut state = state_of(&[1, 32770, 65]);
        state.registers[2] = 7;
        let meta = Metadata::sized(state.mem.len());
        let instr = decode(&state, &meta, 0, true).unwrap();
        assert_eq!(instr.descriptions, vec!["R2", "65"]);
    }

    #[test]
    fn verbose_out_renders_characters() {
        let state = state_of(&[19, 65]);
        let meta = Metadata::sized(state.mem.len());
        let instr = decode(&state, &meta, 0, true).unwrap();
        assert_eq!(instr.descriptions, vec!["A"]);
    }

    #[test]
    fn call_target_annotation_is_decorated() {
        let state = state_of(&[17, 123]);
        let mut meta = Metadata::sized(state.mem.len());
        meta.annotations.insert(123, "draw_board".to_string());
        let instr = decode(&state, &meta, 0, true).unwrap();
        assert_eq!(instr.descriptions, vec!["123(draw_board)"]);
    }

    #[test]
    fn opcode_lookup_by_name() {
        assert_eq!(OpSpec::index_by_name("Halt"), Some(0));
        assert_eq!(OpSpec::index_by_name("WMem"), Some(16));
        assert_eq!(OpSpec::index_by_name("Noop"), Some(21));
        assert_eq!(OpSpec::index_by_name("nope"), None);
    }
}
