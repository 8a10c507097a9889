//! Instruction set definitions for the Soil virtual machine.
//!
//! Soil bytecode is a byte-oriented encoding: the opcode is the first byte of
//! every instruction and fully determines the instruction's size. This crate
//! defines the register identifiers, the opcode table, a typed [`Instruction`]
//! value with byte-level encode/decode, and the [`PanicReason`] set raised by
//! decoders and executors.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

#[cfg(feature = "alloc")]
extern crate alloc;

mod args;
mod instruction;
#[macro_use]
mod macros;
mod opcode;
mod panic_reason;

pub mod op;

pub use args::{RegId, Word};
pub use instruction::{instructions, Instruction, Instructions};
pub use opcode::Opcode;
pub use panic_reason::PanicReason;

#[cfg(test)]
mod encoding_tests;
