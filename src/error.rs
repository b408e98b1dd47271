use std::fmt;

/// A fatal interpreter fault.
///
/// The core never retries or silently recovers: every variant here stops the
/// run and is reported to the host through `StopReason::Fault`. Returning past
/// the root call frame is *not* a fault; it is the normal halt signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Image shorter than the 64-byte header, or shorter than a table address
    /// the header declares.
    ImageTooSmall { len: usize, need: usize },
    /// The story file declares a version this interpreter does not support.
    UnsupportedVersion(u8),
    /// A header field is inconsistent with the rest of the image.
    BadHeader(&'static str),
    /// Opcode with no meaning in version 3.
    IllegalOpcode { pc: u32, opcode: u8 },
    /// Instruction encoding ran off the end of memory or is self-contradictory.
    MalformedInstruction { pc: u32, reason: &'static str },
    /// Memory access outside the image.
    OutOfBounds { addr: u32 },
    /// Write at or above the static-memory boundary.
    ReadOnlyWrite { addr: u32 },
    /// Evaluation stack capacity or call depth exceeded.
    StackOverflow,
    /// Pop below the current frame's stack boundary, or from an empty stack.
    StackUnderflow,
    /// Local-variable access with no routine active.
    NoActiveFrame,
    DivisionByZero { pc: u32 },
    /// Object or property access the object table cannot satisfy (object
    /// number 0 or out of range, put_prop on an absent or wide property).
    BadObject(&'static str),
    /// Packed string data that cannot be decoded (orphaned ZSCII escape,
    /// nested abbreviation, runaway string).
    MalformedText { addr: u32, reason: &'static str },
    /// Abbreviation reference that resolves outside the image.
    BadAbbreviation { index: u8 },
    /// Snapshot does not match the loaded image.
    BadSnapshot(&'static str),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::ImageTooSmall { len, need } => {
                write!(f, "story image too small: {len} bytes, need {need}")
            }
            Fault::UnsupportedVersion(v) => {
                write!(f, "unsupported story file version {v} (only version 3)")
            }
            Fault::BadHeader(what) => write!(f, "malformed header: {what}"),
            Fault::IllegalOpcode { pc, opcode } => {
                write!(f, "illegal opcode 0x{opcode:02x} at pc 0x{pc:05x}")
            }
            Fault::MalformedInstruction { pc, reason } => {
                write!(f, "malformed instruction at pc 0x{pc:05x}: {reason}")
            }
            Fault::OutOfBounds { addr } => {
                write!(f, "memory access out of bounds at 0x{addr:05x}")
            }
            Fault::ReadOnlyWrite { addr } => {
                write!(f, "write to read-only memory at 0x{addr:05x}")
            }
            Fault::StackOverflow => write!(f, "stack overflow"),
            Fault::StackUnderflow => write!(f, "stack underflow"),
            Fault::NoActiveFrame => write!(f, "variable access with no active routine"),
            Fault::DivisionByZero { pc } => write!(f, "division by zero at pc 0x{pc:05x}"),
            Fault::BadObject(what) => write!(f, "bad object access: {what}"),
            Fault::MalformedText { addr, reason } => {
                write!(f, "malformed text at 0x{addr:05x}: {reason}")
            }
            Fault::BadAbbreviation { index } => {
                write!(f, "abbreviation {index} resolves outside the image")
            }
            Fault::BadSnapshot(what) => write!(f, "snapshot rejected: {what}"),
        }
    }
}

impl std::error::Error for Fault {}
