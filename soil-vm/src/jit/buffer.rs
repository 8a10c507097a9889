//! Page-granular executable code buffers.
//!
//! The buffer is mapped read+write during translation and flipped to
//! read+execute before control transfers into it. Allocation hints `mmap`
//! at low addresses first so emitted code tends to live within a 32-bit
//! displacement window of other buffers; all emitted displacements are
//! intra-buffer, so the hints are best-effort rather than load-bearing.

use std::io;
use std::ptr;

use tracing::debug;

use crate::error::JitError;

/// Candidate base addresses, tried in order. `mmap` without `MAP_FIXED`
/// treats them as hints and falls back to any free region.
const MMAP_HINTS: [usize; 4] = [0x2000_0000, 0x4000_0000, 0x6000_0000, 0];

/// An anonymous mapping holding generated code.
#[derive(Debug)]
pub struct ExecutableBuffer {
    ptr: *mut u8,
    /// Mapping length, page-rounded up from the requested size.
    len: usize,
    executable: bool,
}

impl ExecutableBuffer {
    /// Map `len` bytes of zeroed read+write memory.
    pub fn allocate(len: usize) -> Result<Self, JitError> {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let len = len.max(1).div_ceil(page) * page;

        for hint in MMAP_HINTS {
            let ptr = unsafe {
                libc::mmap(
                    hint as *mut libc::c_void,
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };

            if ptr == libc::MAP_FAILED {
                continue;
            }

            debug!(addr = ptr as usize, len, "mapped code buffer");
            return Ok(Self {
                ptr: ptr.cast(),
                len,
                executable: false,
            });
        }

        Err(JitError::ExecutableMemory(
            io::Error::last_os_error().to_string(),
        ))
    }

    /// Base address of the mapping.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// Length of the mapping, page-rounded up from the requested size.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Copy `code` to the start of the buffer. Only legal while writable.
    pub fn fill(&mut self, code: &[u8]) {
        assert!(!self.executable, "buffer is no longer writable");
        assert!(code.len() <= self.len, "code exceeds the mapping");
        unsafe {
            ptr::copy_nonoverlapping(code.as_ptr(), self.ptr, code.len());
        }
    }

    /// Flip the mapping to read+execute.
    pub fn make_executable(&mut self) -> Result<(), JitError> {
        self.protect(libc::PROT_READ | libc::PROT_EXEC)?;
        self.executable = true;
        Ok(())
    }

    /// Flip the mapping back to read+write, e.g. to retranslate after the
    /// `execute` syscall. No generated code may be running in it.
    pub fn make_writable(&mut self) -> Result<(), JitError> {
        self.protect(libc::PROT_READ | libc::PROT_WRITE)?;
        self.executable = false;
        Ok(())
    }

    fn protect(&mut self, prot: libc::c_int) -> Result<(), JitError> {
        let result = unsafe { libc::mprotect(self.ptr.cast(), self.len, prot) };
        if result != 0 {
            return Err(JitError::ExecutableMemory(
                io::Error::last_os_error().to_string(),
            ));
        }
        Ok(())
    }
}

impl Drop for ExecutableBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.cast(), self.len);
        }
    }
}

// The buffer is only ever driven by the thread running the VM.
unsafe impl Send for ExecutableBuffer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_and_protects() {
        let mut buffer = ExecutableBuffer::allocate(100).unwrap();
        assert!(buffer.len() >= 100);

        buffer.fill(&[0xc3]);
        buffer.make_executable().unwrap();
        buffer.make_writable().unwrap();
        buffer.fill(&[0x90, 0xc3]);
    }
}
