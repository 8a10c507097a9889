use soil_asm::{PanicReason, Word};

use crate::consts::WORD_SIZE;
use crate::error::SimpleResult;

use super::Vm;

impl Vm {
    /// Bounds check an access of `width` bytes at `addr`, returning the
    /// address as an index. Any access with `addr + width > mem_size`
    /// panics the VM.
    fn check_access(&self, addr: Word, width: usize) -> SimpleResult<usize> {
        let limit = self
            .params
            .mem_size
            .checked_sub(width)
            .ok_or(PanicReason::OutOfMemoryAccess)?;
        if addr > limit as Word {
            return Err(PanicReason::OutOfMemoryAccess);
        }
        Ok(addr as usize)
    }

    /// Load one byte from linear memory.
    pub fn mem_load_u8(&self, addr: Word) -> SimpleResult<u8> {
        let at = self.check_access(addr, 1)?;
        Ok(self.memory[at])
    }

    /// Store one byte to linear memory.
    pub fn mem_store_u8(&mut self, addr: Word, value: u8) -> SimpleResult<()> {
        let at = self.check_access(addr, 1)?;
        self.memory[at] = value;
        Ok(())
    }

    /// Load a little-endian word from linear memory.
    pub fn mem_load_u64(&self, addr: Word) -> SimpleResult<Word> {
        let at = self.check_access(addr, WORD_SIZE)?;
        let raw: [u8; WORD_SIZE] = self.memory[at..at + WORD_SIZE]
            .try_into()
            .expect("width checked");
        Ok(Word::from_le_bytes(raw))
    }

    /// Store a little-endian word to linear memory.
    pub fn mem_store_u64(&mut self, addr: Word, value: Word) -> SimpleResult<()> {
        let at = self.check_access(addr, WORD_SIZE)?;
        self.memory[at..at + WORD_SIZE].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Borrow `len` bytes of linear memory starting at `addr`.
    pub fn mem_slice(&self, addr: Word, len: Word) -> SimpleResult<&[u8]> {
        if len == 0 {
            return Ok(&[]);
        }
        let len = usize::try_from(len).map_err(|_| PanicReason::OutOfMemoryAccess)?;
        let at = self.check_access(addr, len)?;
        Ok(&self.memory[at..at + len])
    }

    /// Mutably borrow `len` bytes of linear memory starting at `addr`.
    pub fn mem_slice_mut(&mut self, addr: Word, len: Word) -> SimpleResult<&mut [u8]> {
        if len == 0 {
            return Ok(&mut []);
        }
        let len = usize::try_from(len).map_err(|_| PanicReason::OutOfMemoryAccess)?;
        let at = self.check_access(addr, len)?;
        Ok(&mut self.memory[at..at + len])
    }

    /// Run `f` with a pointer to a temporarily null-terminated view of the
    /// `len` bytes at `addr`.
    ///
    /// The terminator overwrites the byte at `addr + len` for the duration
    /// of the call and is restored afterwards; the guard byte past the
    /// memory end makes this legal even for strings ending exactly at
    /// `mem_size`.
    pub fn with_nul_terminated<R>(
        &mut self,
        addr: Word,
        len: Word,
        f: impl FnOnce(*const u8) -> R,
    ) -> SimpleResult<R> {
        let len = usize::try_from(len).map_err(|_| PanicReason::OutOfMemoryAccess)?;
        let at = self.check_access(addr, len)?;

        let terminator_at = at + len;
        let saved = self.memory[terminator_at];
        self.memory[terminator_at] = 0;
        let result = f(self.memory[at..].as_ptr());
        self.memory[terminator_at] = saved;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use crate::image::Image;
    use crate::vm::Vm;
    use quickcheck_macros::quickcheck;
    use soil_asm::{PanicReason, Word};

    fn vm() -> Vm {
        Vm::from_image(Image::default())
    }

    #[quickcheck]
    fn words_round_trip_at_any_valid_address(addr: u32, value: Word) -> bool {
        let mut vm = vm();
        let addr = Word::from(addr) % (vm.params().mem_size as Word - 7);

        vm.mem_store_u64(addr, value).unwrap();
        vm.mem_load_u64(addr) == Ok(value)
    }

    #[test]
    fn stores_and_loads_little_endian() {
        let mut vm = vm();

        vm.mem_store_u64(8, 0x1122334455667788).unwrap();
        assert_eq!(vm.mem_load_u64(8), Ok(0x1122334455667788));
        assert_eq!(vm.mem_load_u8(8), Ok(0x88));
        assert_eq!(vm.mem_load_u8(15), Ok(0x11));
    }

    #[test]
    fn rejects_out_of_bounds_access() {
        let mut vm = vm();
        let mem_size = vm.params().mem_size as u64;

        assert_eq!(vm.mem_load_u8(mem_size), Err(PanicReason::OutOfMemoryAccess));
        assert_eq!(
            vm.mem_load_u64(mem_size - 7),
            Err(PanicReason::OutOfMemoryAccess)
        );
        assert_eq!(
            vm.mem_store_u64(u64::MAX, 1),
            Err(PanicReason::OutOfMemoryAccess)
        );
        assert!(vm.mem_load_u64(mem_size - 8).is_ok());
    }

    #[test]
    fn nul_termination_restores_the_byte() {
        let mut vm = vm();
        vm.mem_store_u8(0, b'h').unwrap();
        vm.mem_store_u8(1, b'i').unwrap();
        vm.mem_store_u8(2, 0x7f).unwrap();

        let seen = vm
            .with_nul_terminated(0, 2, |ptr| unsafe {
                let mut len = 0;
                while *ptr.add(len) != 0 {
                    len += 1;
                }
                len
            })
            .unwrap();

        assert_eq!(seen, 2);
        assert_eq!(vm.mem_load_u8(2), Ok(0x7f));
    }

    #[test]
    fn nul_termination_may_use_the_guard_byte() {
        let mut vm = vm();
        let mem_size = vm.params().mem_size as u64;

        // A string ending exactly at the memory boundary.
        assert!(vm.with_nul_terminated(mem_size - 4, 4, |_| ()).is_ok());
        // But not one that starts beyond it.
        assert_eq!(
            vm.with_nul_terminated(mem_size - 3, 4, |_| ()),
            Err(PanicReason::OutOfMemoryAccess)
        );
    }
}
