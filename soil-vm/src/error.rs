//! Runtime error types.

use soil_asm::PanicReason;

use crate::backtrace::Backtrace as Trace;

/// Failures while parsing a `.soil` binary image.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ImageError {
    /// The file doesn't start with the `soil` magic bytes.
    #[error("magic bytes mismatch: expected `soil`")]
    MagicMismatch,
    /// The file ends in the middle of a section.
    #[error("binary is truncated")]
    Truncated,
    /// The initial memory section is larger than the configured linear
    /// memory.
    #[error("initial memory of {len} bytes exceeds the memory size of {mem_size} bytes")]
    InitialMemoryTooLarge {
        /// Length of the initial memory section.
        len: usize,
        /// Configured linear memory size.
        mem_size: usize,
    },
    /// A label record points past the end of the bytecode.
    #[error("label `{name}` points at {offset:#x}, past the bytecode end {bytecode_len:#x}")]
    LabelOutOfRange {
        /// The label name.
        name: String,
        /// The out-of-range offset.
        offset: u64,
        /// Length of the bytecode section.
        bytecode_len: usize,
    },
}

/// Failures while translating bytecode to machine code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum JitError {
    /// The bytecode is too large for 32-bit offset maps.
    #[error("bytecode of {0} bytes exceeds the 32-bit translation limit")]
    BytecodeTooLarge(usize),
    /// The configured memory size can't be encoded in the emitted bounds
    /// checks.
    #[error("memory size {0} exceeds the 32-bit translation limit")]
    MemorySizeTooLarge(usize),
    /// The executable code buffer couldn't be allocated or protected.
    #[error("executable memory: {0}")]
    ExecutableMemory(String),
}

/// Fatal interpreter outcome.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum VmError {
    /// An uncaught VM panic. Carries everything a front-end needs to render
    /// the stack trace and register dump.
    #[error("vm panicked: {reason}")]
    Panic {
        /// Why the VM panicked.
        reason: PanicReason,
        /// Bytecode offset of the faulting instruction.
        pc: u64,
        /// Captured call stack and registers.
        trace: Trace,
    },
}

impl VmError {
    /// The panic reason, if this error is a panic.
    pub const fn panic_reason(&self) -> Option<PanicReason> {
        match self {
            Self::Panic { reason, .. } => Some(*reason),
        }
    }
}

/// Result of an operation that can only fail with a VM panic.
pub type SimpleResult<T> = core::result::Result<T, PanicReason>;
