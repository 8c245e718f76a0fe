pub mod debug;
pub mod decode;
pub mod disasm;
pub mod exec;
pub mod metadata;
pub mod snapshot;
pub mod state;
pub mod value;

use thiserror::Error;

pub use debug::{supervise, Debugger};
pub use decode::{decode, DecodedInstr, OpSpec, Opcode, Operand, OPS};
pub use disasm::{dis, read_string};
pub use exec::{control_channel, Control, Event, Reason, Runner, Vm};
pub use metadata::Metadata;
pub use snapshot::{
    load_snapshot, save_snapshot, snapshot_name, SnapshotInfo, SNAPSHOT_MAGIC, SNAPSHOT_VERSION,
};
pub use state::{CallSite, MachineState};
pub use value::{mod15, Place, Source};

/// Arithmetic modulus: every stored arithmetic result lies in `[0, MODULUS)`.
pub const MODULUS: u32 = 32768;
/// First operand word that names a register instead of a literal.
pub const REGISTER_BASE: u16 = 32768;
/// Number of general registers.
pub const REGISTER_COUNT: usize = 8;
/// First operand word with no meaning; decoding it is a hard error.
pub const INVALID_BASE: u16 = 32776;

pub type Result<T> = std::result::Result<T, VmError>;

#[derive(Debug, Error)]
pub enum VmError {
    /// Normal terminal condition: opcode 0, or `Ret`/`Pop` on an empty stack.
    #[error("halt")]
    Halt,
    #[error("bad opcode {opcode} at {addr}")]
    BadOpcode { opcode: u16, addr: u16 },
    #[error("value {0} out of range")]
    ValueOutOfRange(u16),
    #[error("memory address {0} out of bounds")]
    MemoryOutOfBounds(u16),
    #[error("mod by zero")]
    DivideByZero,
    /// End of input reached by the `In` opcode. Recoverable under the
    /// debugger or with save-on-EOF; fatal otherwise.
    #[error("eof")]
    InputEof,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("serialize error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("snapshot error: {0}")]
    InvalidSnapshot(String),
    #[error("corrupt program image: {0}")]
    InvalidImage(String),
    #[error("control channel closed")]
    ChannelClosed,
}
