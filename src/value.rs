//! The three-tier operand value space.
//!
//! A raw operand word is a literal in `0..=32767`, a register reference in
//! `32768..=32775`, or invalid. R-slots evaluate to a value ([`Source`]);
//! L-slots name a storage location ([`Place`]). `WMem` is the one opcode
//! whose destination address arrives as an R-slot value rather than an
//! L-slot.

use crate::{Result, VmError, INVALID_BASE, MODULUS, REGISTER_BASE};
use std::fmt;

/// An R-slot operand: produces a value.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Source {
    Immediate(u16),
    Register(u8),
}

/// An L-slot operand: names the cell a result is stored into.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Place {
    Memory(u16),
    Register(u8),
}

impl Source {
    pub fn from_word(w: u16) -> Result<Self> {
        if w < REGISTER_BASE {
            Ok(Source::Immediate(w))
        } else if w < INVALID_BASE {
            Ok(Source::Register((w - REGISTER_BASE) as u8))
        } else {
            Err(VmError::ValueOutOfRange(w))
        }
    }
}

impl Place {
    pub fn from_word(w: u16) -> Result<Self> {
        if w < REGISTER_BASE {
            Ok(Place::Memory(w))
        } else if w < INVALID_BASE {
            Ok(Place::Register((w - REGISTER_BASE) as u8))
        } else {
            Err(VmError::ValueOutOfRange(w))
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Immediate(v) => write!(f, "{v}"),
            Source::Register(r) => write!(f, "*R{r}"),
        }
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Place::Memory(a) => write!(f, "*{a}"),
            Place::Register(r) => write!(f, "R{r}"),
        }
    }
}

/// Reduce an arithmetic result modulo 32768. Takes the unreduced `u32` so
/// `Add`/`Mult` can widen before reducing; the modulus is not a power of the
/// native word size, so relying on `u16` wraparound would be wrong.
pub fn mod15(v: u32) -> u16 {
    (v % MODULUS) as u16
}
