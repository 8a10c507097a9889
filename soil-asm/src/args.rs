use core::fmt;

use crate::PanicReason;

/// Machine word of the Soil VM: the content of one 64-bit register slot.
///
/// Arithmetic comparisons treat the value as signed; bitwise operations treat
/// it as a plain 64-bit word. Callers cast to `i64`/`f64` where signedness or
/// float reinterpretation matters.
pub type Word = u64;

/// Identifier of one of the eight Soil registers.
///
/// The on-wire encoding packs register ids into nibbles, so a valid id is
/// always in `0..8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegId(u8);

impl RegId {
    /// Stack pointer: byte offset into linear memory, grows downward.
    pub const SP: Self = Self(0);
    /// Status register: holds comparison results, read as signed.
    pub const ST: Self = Self(1);
    /// General purpose register `a`.
    pub const A: Self = Self(2);
    /// General purpose register `b`.
    pub const B: Self = Self(3);
    /// General purpose register `c`.
    pub const C: Self = Self(4);
    /// General purpose register `d`.
    pub const D: Self = Self(5);
    /// General purpose register `e`.
    pub const E: Self = Self(6);
    /// General purpose register `f`.
    pub const F: Self = Self(7);

    /// Number of registers in the file.
    pub const COUNT: usize = 8;

    /// Construct a register id from its raw index, if in range.
    pub const fn new_checked(id: u8) -> Option<Self> {
        if id < Self::COUNT as u8 {
            Some(Self(id))
        } else {
            None
        }
    }

    /// Construct a register id from its raw index.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a valid register index. Use
    /// [`RegId::new_checked`] for untrusted input.
    pub const fn new(id: u8) -> Self {
        match Self::new_checked(id) {
            Some(reg) => reg,
            None => panic!("register index out of range"),
        }
    }

    /// The raw register index.
    pub const fn to_u8(self) -> u8 {
        self.0
    }

    /// Assembler name of the register.
    pub const fn name(self) -> &'static str {
        match self.0 {
            0 => "sp",
            1 => "st",
            2 => "a",
            3 => "b",
            4 => "c",
            5 => "d",
            6 => "e",
            _ => "f",
        }
    }
}

impl From<RegId> for u8 {
    fn from(r: RegId) -> u8 {
        r.0
    }
}

impl From<RegId> for usize {
    fn from(r: RegId) -> usize {
        r.0 as usize
    }
}

impl TryFrom<u8> for RegId {
    type Error = PanicReason;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::new_checked(id).ok_or(PanicReason::InvalidRegister)
    }
}

impl fmt::Display for RegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
