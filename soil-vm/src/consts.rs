//! VM parameters.

use soil_asm::Word;

/// Length of a machine word, in bytes.
pub const WORD_SIZE: usize = core::mem::size_of::<Word>();

/// Number of registers in the file.
pub const VM_REGISTER_COUNT: usize = soil_asm::RegId::COUNT;

/// Default linear memory size, in bytes.
pub const VM_DEFAULT_MEM_SIZE: usize = 16 * 1024 * 1024;

/// Smallest configurable linear memory size, in bytes.
pub const VM_MIN_MEM_SIZE: usize = 16 * 1024 * 1024;

/// Largest configurable linear memory size, in bytes.
///
/// The JIT compares addresses against the memory size with 32-bit
/// immediates, so the limit must stay below `i32::MAX`.
pub const VM_MAX_MEM_SIZE: usize = 2 * 1024 * 1024 * 1024 - WORD_SIZE;

/// Maximum depth of the call-return stack.
pub const VM_CALL_STACK_LIMIT: usize = 1024;

/// Maximum depth of the try stack.
pub const VM_TRY_STACK_LIMIT: usize = 1024;

/// File name of the linear memory dump written on a fatal panic.
pub const CRASH_DUMP_FILE: &str = "crash";
