//! Ngaro image machine: a two-stack virtual machine for Forth-family images.
//!
//! The machine executes a flat memory image of signed 32-bit cells holding
//! both code and data. It is used by the `ngaro` driver to boot images such as
//! Retro, and by the bench binary to measure dispatch throughput.
//!
//! # Architecture
//!
//! - **Image**: fixed-capacity cell memory, zero-filled past the boot payload
//! - **Data stack**: operands and results of every instruction
//! - **Address stack**: return addresses for `CALL`/`RETURN`, plus values
//!   parked with `PUSH`/`POP`
//! - **Instruction format**: one opcode cell, optionally followed by one
//!   operand cell (literal or absolute address)
//! - **Host I/O**: `IN`, `OUT` and `WAIT` go through a [`ports::Ports`]
//!   controller; the interpreter itself never touches a file or socket
//!
//! # Modules
//!
//! - [`errors`]: Execution error types
//! - [`image`]: Image memory and boot image decoding
//! - [`isa`]: Instruction set definition and opcode mappings
//! - [`ports`]: Port controller trait, halt signal and implementations
//! - [`stack`]: Bounded data/address stacks
//! - [`vm`]: Core interpreter

/// A machine word: every memory slot, stack slot and address.
pub type Cell = i32;

pub mod errors;
pub mod image;
pub mod isa;
pub mod ports;
pub mod stack;
pub mod vm;
