use core::fmt;

use crate::PanicReason;

enum_try_from! {
    /// Opcode byte of a Soil instruction.
    ///
    /// The opcode fully determines the instruction's on-wire size; operands
    /// follow the opcode byte in the fixed layout given by [`Opcode::size`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[repr(u8)]
    pub enum Opcode {
        /// No effect.
        NOP = 0x00,

        /// `R1 ← R1 + R2`, two's-complement wrapping.
        ADD = 0xa0,
        /// `R1 ← R1 - R2`, two's-complement wrapping.
        SUB = 0xa1,
        /// `R1 ← R1 * R2`, two's-complement wrapping.
        MUL = 0xa2,
        /// `R1 ← R1 / R2`, signed; panics on zero divisor.
        DIV = 0xa3,
        /// `R1 ← R1 % R2`, signed; panics on zero divisor.
        REM = 0xa4,
        /// `R1 ← R1 + R2` as IEEE-754 doubles, reinterpreting bits.
        FADD = 0xa5,
        /// `R1 ← R1 - R2` as IEEE-754 doubles, reinterpreting bits.
        FSUB = 0xa6,
        /// `R1 ← R1 * R2` as IEEE-754 doubles, reinterpreting bits.
        FMUL = 0xa7,
        /// `R1 ← R1 / R2` as IEEE-754 doubles, reinterpreting bits.
        FDIV = 0xa8,

        /// `R1 ← R1 & R2`.
        AND = 0xb0,
        /// `R1 ← R1 | R2`.
        OR = 0xb1,
        /// `R1 ← R1 ^ R2`.
        XOR = 0xb2,
        /// `R ← !R`.
        NOT = 0xb3,

        /// `st ← R1 - R2`, signed wrapping.
        CMP = 0xc0,
        /// `st ← 1` if `st == 0` else `0`.
        ISEQUAL = 0xc1,
        /// `st ← 1` if `st < 0` (signed) else `0`.
        ISLESS = 0xc2,
        /// `st ← 1` if `st > 0` (signed) else `0`.
        ISGREATER = 0xc3,
        /// `st ← 1` if `st <= 0` (signed) else `0`.
        ISLESSEQUAL = 0xc4,
        /// `st ← 1` if `st >= 0` (signed) else `0`.
        ISGREATEREQUAL = 0xc5,
        /// `st ← 1` if `st != 0` else `0`.
        ISNOTEQUAL = 0xc6,
        /// `st ← bits(R1 - R2)` as IEEE-754 doubles.
        FCMP = 0xc7,
        /// `st ← 1` if `f64(st) == 0.0` else `0`.
        FISEQUAL = 0xc8,
        /// `st ← 1` if `f64(st) < 0.0` else `0`.
        FISLESS = 0xc9,
        /// `st ← 1` if `f64(st) > 0.0` else `0`.
        FISGREATER = 0xca,
        /// `st ← 1` if `f64(st) <= 0.0` else `0`.
        FISLESSEQUAL = 0xcb,
        /// `st ← 1` if `f64(st) >= 0.0` else `0`.
        FISGREATEREQUAL = 0xcc,
        /// `st ← 1` if `f64(st) != 0.0` else `0`.
        FISNOTEQUAL = 0xcd,
        /// `R ← bits(f64(i64(R)))`.
        INTTOFLOAT = 0xce,
        /// `R ← i64(truncate(f64_from_bits(R)))`.
        FLOATTOINT = 0xcf,

        /// `R1 ← R2`.
        MOVE = 0xd0,
        /// `R ← word`, signed immediate.
        MOVEI = 0xd1,
        /// `R ← zero_extend(byte)`.
        MOVEIB = 0xd2,
        /// `R1 ← mem64_le[R2]`.
        LOAD = 0xd3,
        /// `R1 ← zero_extend(mem8[R2])`.
        LOADB = 0xd4,
        /// `mem64_le[R1] ← R2`.
        STORE = 0xd5,
        /// `mem8[R1] ← R2 & 0xff`.
        STOREB = 0xd6,
        /// `sp ← sp - 8; mem64_le[sp] ← R`.
        PUSH = 0xd7,
        /// `R ← mem64_le[sp]; sp ← sp + 8`.
        POP = 0xd8,

        /// Unwind to the innermost try scope, or abort with a stack trace.
        PANIC = 0xe0,
        /// Push a try scope with the given catch target.
        TRYSTART = 0xe1,
        /// Pop the innermost try scope.
        TRYEND = 0xe2,

        /// `ip ← word`.
        JUMP = 0xf0,
        /// If `st != 0` then `ip ← word`.
        CJUMP = 0xf1,
        /// Push the return target, `ip ← word`.
        CALL = 0xf2,
        /// `ip ←` popped return target.
        RET = 0xf3,
        /// Invoke the host handler selected by the byte operand.
        SYSCALL = 0xf4,
    },
    u8,
    PanicReason::UnknownOpcode
}

impl Opcode {
    /// On-wire size of an instruction with this opcode, in bytes, including
    /// the opcode byte itself.
    pub const fn size(self) -> usize {
        match self {
            Self::NOP
            | Self::PANIC
            | Self::TRYEND
            | Self::RET
            | Self::ISEQUAL
            | Self::ISLESS
            | Self::ISGREATER
            | Self::ISLESSEQUAL
            | Self::ISGREATEREQUAL
            | Self::ISNOTEQUAL
            | Self::FISEQUAL
            | Self::FISLESS
            | Self::FISGREATER
            | Self::FISLESSEQUAL
            | Self::FISGREATEREQUAL
            | Self::FISNOTEQUAL => 1,

            Self::MOVE
            | Self::LOAD
            | Self::LOADB
            | Self::STORE
            | Self::STOREB
            | Self::PUSH
            | Self::POP
            | Self::CMP
            | Self::FCMP
            | Self::INTTOFLOAT
            | Self::FLOATTOINT
            | Self::ADD
            | Self::SUB
            | Self::MUL
            | Self::DIV
            | Self::REM
            | Self::FADD
            | Self::FSUB
            | Self::FMUL
            | Self::FDIV
            | Self::AND
            | Self::OR
            | Self::XOR
            | Self::NOT
            | Self::SYSCALL => 2,

            Self::MOVEIB => 3,

            Self::TRYSTART | Self::JUMP | Self::CJUMP | Self::CALL => 9,

            Self::MOVEI => 10,
        }
    }

    /// Assembler mnemonic.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::NOP => "nop",
            Self::ADD => "add",
            Self::SUB => "sub",
            Self::MUL => "mul",
            Self::DIV => "div",
            Self::REM => "rem",
            Self::FADD => "fadd",
            Self::FSUB => "fsub",
            Self::FMUL => "fmul",
            Self::FDIV => "fdiv",
            Self::AND => "and",
            Self::OR => "or",
            Self::XOR => "xor",
            Self::NOT => "not",
            Self::CMP => "cmp",
            Self::ISEQUAL => "isequal",
            Self::ISLESS => "isless",
            Self::ISGREATER => "isgreater",
            Self::ISLESSEQUAL => "islessequal",
            Self::ISGREATEREQUAL => "isgreaterequal",
            Self::ISNOTEQUAL => "isnotequal",
            Self::FCMP => "fcmp",
            Self::FISEQUAL => "fisequal",
            Self::FISLESS => "fisless",
            Self::FISGREATER => "fisgreater",
            Self::FISLESSEQUAL => "fislessequal",
            Self::FISGREATEREQUAL => "fisgreaterequal",
            Self::FISNOTEQUAL => "fisnotequal",
            Self::INTTOFLOAT => "inttofloat",
            Self::FLOATTOINT => "floattoint",
            Self::MOVE => "move",
            Self::MOVEI => "movei",
            Self::MOVEIB => "moveib",
            Self::LOAD => "load",
            Self::LOADB => "loadb",
            Self::STORE => "store",
            Self::STOREB => "storeb",
            Self::PUSH => "push",
            Self::POP => "pop",
            Self::PANIC => "panic",
            Self::TRYSTART => "trystart",
            Self::TRYEND => "tryend",
            Self::JUMP => "jump",
            Self::CJUMP => "cjump",
            Self::CALL => "call",
            Self::RET => "ret",
            Self::SYSCALL => "syscall",
        }
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
