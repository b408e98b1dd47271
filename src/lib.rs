//! A version-3 Z-machine interpreter core.
//!
//! The crate loads a story image, validates its header, and executes its
//! bytecode in bounded steps: [`interpreter::Interpreter::run`] takes an
//! instruction budget and returns a [`interpreter::StopReason`] instead of
//! blocking, so the host decides when to pump input, drain output, or
//! snapshot the machine. No I/O happens inside the core.

pub mod dictionary;
pub mod error;
pub mod header;
pub mod instruction;
pub mod interpreter;
pub mod memory;
pub mod object;
pub mod opcode_tables;
pub mod snapshot;
pub mod text;
pub mod vm;
pub mod zrand;

#[cfg(test)]
pub mod test_image;
