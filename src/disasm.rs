//! Textual rendering of memory ranges: decoded instructions where the words
//! decode, length-prefixed ASCII strings where they look like one, raw data
//! words otherwise.

use crate::decode::{decode, DecodedInstr};
use crate::metadata::Metadata;
use crate::state::MachineState;

/// Longest length prefix the string probe will accept.
const STRING_PROBE_LIMIT: u16 = 1024;

/// Render the address range `[start, start + words)`, one line per
/// instruction, string, or data word.
pub fn dis(state: &MachineState, meta: &Metadata, start: u16, words: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let end = (start as u32).saturating_add(words as u32);
    let mut p = start as u32;
    while p < end && (p as usize) < state.mem.len() {
        let addr = p as u16;
        match decode(state, meta, addr, true) {
            Ok(instr) => {
                lines.push(render_instr(addr, &instr));
                p = instr.next_ip as u32;
            }
            Err(_) => {
                if let Some(text) = read_string(state, addr) {
                    let span = text.chars().count() as u32 + 1;
                    lines.push(format!("{addr:8} string \"{}\"", escape(&text)));
                    p += span;
                } else {
                    lines.push(render_words(addr, &[state.mem[addr as usize]], None));
                    p += 1;
                }
            }
        }
    }
    lines
}

/// Probe for a pascal-like string at `at`: a length word in
/// `1..=1024` followed by that many printable (or newline) words.
pub fn read_string(state: &MachineState, at: u16) -> Option<String> {
    let len = state.fetch(at).ok()?;
    if len == 0 || len > STRING_PROBE_LIMIT {
        return None;
    }
    let mut text = String::with_capacity(len as usize);
    for offset in 1..=len {
        let word = state.fetch(at.checked_add(offset)?).ok()?;
        match word {
            10 | 32..=126 => text.push(word as u8 as char),
            _ => return None,
        }
    }
    Some(text)
}

fn render_instr(addr: u16, instr: &DecodedInstr) -> String {
    let mut body = String::new();
    body.push_str(if instr.is_function { "* " } else { "  " });
    body.push_str(instr.spec.name);
    for desc in &instr.descriptions {
        body.push_str(", ");
        body.push_str(desc);
    }
    if let Some(note) = &instr.annotation {
        body.push_str(" # ");
        body.push_str(note);
    }
    render_words(addr, &instr.codes, Some(&body))
}

/// Shared line layout: address, raw words as decimals, the same words as
/// printable characters, then the decoded body if any.
fn render_words(addr: u16, codes: &[u16], body: Option<&str>) -> String {
    let values = codes
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let mut chars = String::with_capacity(4);
    for slot in 0..4 {
        match codes.get(slot) {
            Some(&w) if (32..=126).contains(&w) => chars.push(w as u8 as char),
            _ => chars.push(' '),
        }
    }
    match body {
        Some(body) => format!("{addr:8} {values:>25} '{chars}' {body}"),
        None => format!("{addr:8} {values:>25} '{chars}'"),
    }
}

fn escape(text: &str) -> String {
    text.replace('\n', "\\n")
}
