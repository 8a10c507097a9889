//! Host syscall table and trampoline ABI.
//!
//! A `syscall N` instruction selects one of 256 slots. Handlers are host
//! functions with the C ABI; both backends marshal the same way:
//!
//! - arguments: the VM pointer, then the `a..e` registers in order. Every
//!   handler receives the full set; a handler declared with fewer
//!   parameters simply ignores the rest, so the "first n+1 arguments"
//!   property holds for any n.
//! - results: a [`SyscallRet`] pair returned in `rax:rdx`. The slot's
//!   declared [`RetArity`] controls how many of the two values are written
//!   back to `a` and `b`.
//!
//! Unfilled slots have no handler; invoking one panics the VM with
//! [`soil_asm::PanicReason::SyscallNotImplemented`].

use soil_asm::{RegId, Word};

use crate::vm::Vm;

pub mod host;

/// Number of syscall slots.
pub const SYSCALL_SLOT_COUNT: usize = 256;

/// Return value pair of a syscall handler.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyscallRet {
    /// First return value, written back to register `a`.
    pub a: Word,
    /// Second return value, written back to register `b`.
    pub b: Word,
}

impl SyscallRet {
    /// A return value pair for handlers that return nothing.
    pub const fn none() -> Self {
        Self { a: 0, b: 0 }
    }

    /// A single return value.
    pub const fn one(a: Word) -> Self {
        Self { a, b: 0 }
    }

    /// A return value pair.
    pub const fn pair(a: Word, b: Word) -> Self {
        Self { a, b }
    }
}

/// A syscall handler.
///
/// Handlers may mutate the VM through the pointer (linear memory, panic and
/// exit requests) but must not re-enter the executor; program replacement
/// goes through [`Vm::request_execute`]. Register values must be taken from
/// the marshalled arguments: while the JIT runs, the VM's register file is
/// only a spill area.
pub type SyscallFn =
    extern "C" fn(vm: *mut Vm, a: Word, b: Word, c: Word, d: Word, e: Word) -> SyscallRet;

/// Declared number of return values of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetArity {
    /// The handler returns nothing; `a` and `b` are preserved.
    Zero,
    /// The handler returns one value, written to `a`.
    One,
    /// The handler returns a pair, written to `a` and `b`.
    Pair,
}

impl RetArity {
    pub(crate) fn write_back(self, vm: &mut Vm, ret: SyscallRet) {
        match self {
            Self::Zero => (),
            Self::One => vm.reg_set(RegId::A, ret.a),
            Self::Pair => {
                vm.reg_set(RegId::A, ret.a);
                vm.reg_set(RegId::B, ret.b);
            }
        }
    }
}

/// One syscall slot.
#[derive(Debug, Clone, Copy)]
pub struct SyscallEntry {
    /// The handler, or `None` for an unimplemented slot.
    pub handler: Option<SyscallFn>,
    /// Declared return arity, driving register write-back.
    pub ret: RetArity,
    /// Handler name for logs and diagnostics.
    pub name: &'static str,
}

impl SyscallEntry {
    const UNIMPLEMENTED: Self = Self {
        handler: None,
        ret: RetArity::Zero,
        name: "<not implemented>",
    };
}

/// The 256-slot syscall dispatch table.
#[derive(Debug, Clone)]
pub struct SyscallTable {
    entries: [SyscallEntry; SYSCALL_SLOT_COUNT],
}

impl SyscallTable {
    /// A table with every slot unimplemented.
    pub fn empty() -> Self {
        Self {
            entries: [SyscallEntry::UNIMPLEMENTED; SYSCALL_SLOT_COUNT],
        }
    }

    /// A table with the default host handlers installed (see [`host`]).
    pub fn with_host_defaults() -> Self {
        let mut table = Self::empty();
        host::install(&mut table);
        table
    }

    /// Install a handler.
    pub fn set(&mut self, number: u8, handler: SyscallFn, ret: RetArity, name: &'static str) {
        self.entries[number as usize] = SyscallEntry {
            handler: Some(handler),
            ret,
            name,
        };
    }

    /// Remove a handler, making the slot panic when invoked.
    pub fn clear(&mut self, number: u8) {
        self.entries[number as usize] = SyscallEntry::UNIMPLEMENTED;
    }

    /// The entry for a slot.
    pub fn entry(&self, number: u8) -> SyscallEntry {
        self.entries[number as usize]
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::with_host_defaults()
    }
}
