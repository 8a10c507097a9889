use core::fmt;

use crate::{Opcode, PanicReason, RegId};

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

/// A fully decoded Soil instruction.
///
/// The variants carry their operands in on-wire order. Arithmetic, bitwise,
/// and float operations write their result into the first register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Instruction {
    /// No effect.
    Nop,
    /// Unwind to the innermost try scope, or abort with a stack trace.
    Panic,
    /// Push a try scope; the operand is the catch target bytecode offset.
    TryStart(i64),
    /// Pop the innermost try scope.
    TryEnd,
    /// `R1 ← R2`.
    Move(RegId, RegId),
    /// `R ← word`, signed.
    MoveI(RegId, i64),
    /// `R ← zero_extend(byte)`.
    MoveIB(RegId, u8),
    /// `R1 ← mem64_le[R2]`.
    Load(RegId, RegId),
    /// `R1 ← zero_extend(mem8[R2])`.
    LoadB(RegId, RegId),
    /// `mem64_le[R1] ← R2`.
    Store(RegId, RegId),
    /// `mem8[R1] ← R2 & 0xff`.
    StoreB(RegId, RegId),
    /// `sp ← sp - 8; mem64_le[sp] ← R`.
    Push(RegId),
    /// `R ← mem64_le[sp]; sp ← sp + 8`.
    Pop(RegId),
    /// `ip ← target`.
    Jump(i64),
    /// If `st != 0` then `ip ← target`.
    CJump(i64),
    /// Push the return target and jump.
    Call(i64),
    /// Return to the most recent call site.
    Ret,
    /// Invoke the host handler with the given number.
    Syscall(u8),
    /// `st ← R1 - R2`, signed wrapping.
    Cmp(RegId, RegId),
    /// `st ← (st == 0) as Word`.
    IsEqual,
    /// `st ← (st < 0) as Word`, signed.
    IsLess,
    /// `st ← (st > 0) as Word`, signed.
    IsGreater,
    /// `st ← (st <= 0) as Word`, signed.
    IsLessEqual,
    /// `st ← (st >= 0) as Word`, signed.
    IsGreaterEqual,
    /// `st ← (st != 0) as Word`.
    IsNotEqual,
    /// `st ← bits(R1 - R2)` as IEEE-754 doubles.
    FCmp(RegId, RegId),
    /// `st ← (f64(st) == 0.0) as Word`.
    FIsEqual,
    /// `st ← (f64(st) < 0.0) as Word`.
    FIsLess,
    /// `st ← (f64(st) > 0.0) as Word`.
    FIsGreater,
    /// `st ← (f64(st) <= 0.0) as Word`.
    FIsLessEqual,
    /// `st ← (f64(st) >= 0.0) as Word`.
    FIsGreaterEqual,
    /// `st ← (f64(st) != 0.0) as Word`.
    FIsNotEqual,
    /// `R ← bits(f64(i64(R)))`.
    IntToFloat(RegId),
    /// `R ← i64(truncate(f64_from_bits(R)))`.
    FloatToInt(RegId),
    /// `R1 ← R1 + R2`, wrapping.
    Add(RegId, RegId),
    /// `R1 ← R1 - R2`, wrapping.
    Sub(RegId, RegId),
    /// `R1 ← R1 * R2`, wrapping.
    Mul(RegId, RegId),
    /// `R1 ← R1 / R2`, signed; panics on zero divisor.
    Div(RegId, RegId),
    /// `R1 ← R1 % R2`, signed; panics on zero divisor.
    Rem(RegId, RegId),
    /// `R1 ← R1 + R2` as doubles.
    FAdd(RegId, RegId),
    /// `R1 ← R1 - R2` as doubles.
    FSub(RegId, RegId),
    /// `R1 ← R1 * R2` as doubles.
    FMul(RegId, RegId),
    /// `R1 ← R1 / R2` as doubles.
    FDiv(RegId, RegId),
    /// `R1 ← R1 & R2`.
    And(RegId, RegId),
    /// `R1 ← R1 | R2`.
    Or(RegId, RegId),
    /// `R1 ← R1 ^ R2`.
    Xor(RegId, RegId),
    /// `R ← !R`.
    Not(RegId),
}

/// Splits a packed operand byte into its two register nibbles, low nibble
/// first.
fn reg_pair(byte: u8) -> Result<(RegId, RegId), PanicReason> {
    let first = RegId::try_from(byte & 0x0f)?;
    let second = RegId::try_from(byte >> 4)?;
    Ok((first, second))
}

/// Reads a single-register operand byte; the high nibble is reserved and must
/// be zero.
fn reg_single(byte: u8) -> Result<RegId, PanicReason> {
    if byte & 0xf0 != 0 {
        return Err(PanicReason::InvalidRegister);
    }
    RegId::try_from(byte)
}

/// Packs two register ids into one operand byte.
fn pack_pair(first: RegId, second: RegId) -> u8 {
    first.to_u8() | (second.to_u8() << 4)
}

fn byte_at(bytes: &[u8], at: usize) -> Result<u8, PanicReason> {
    bytes
        .get(at)
        .copied()
        .ok_or(PanicReason::TruncatedInstruction)
}

fn word_at(bytes: &[u8], at: usize) -> Result<i64, PanicReason> {
    let raw: [u8; 8] = bytes
        .get(at..at + 8)
        .and_then(|b| b.try_into().ok())
        .ok_or(PanicReason::TruncatedInstruction)?;
    Ok(i64::from_le_bytes(raw))
}

impl Instruction {
    /// Decode one instruction from the start of `bytes`.
    ///
    /// `bytes` is expected to begin at an instruction boundary; truncated or
    /// malformed operands surface as a [`PanicReason`].
    pub fn decode(bytes: &[u8]) -> Result<Self, PanicReason> {
        let op = Opcode::try_from(byte_at(bytes, 0)?)?;

        let instruction = match op {
            Opcode::NOP => Self::Nop,
            Opcode::PANIC => Self::Panic,
            Opcode::TRYSTART => Self::TryStart(word_at(bytes, 1)?),
            Opcode::TRYEND => Self::TryEnd,
            Opcode::MOVE => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::Move(a, b)
            }
            Opcode::MOVEI => Self::MoveI(reg_single(byte_at(bytes, 1)?)?, word_at(bytes, 2)?),
            Opcode::MOVEIB => Self::MoveIB(reg_single(byte_at(bytes, 1)?)?, byte_at(bytes, 2)?),
            Opcode::LOAD => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::Load(a, b)
            }
            Opcode::LOADB => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::LoadB(a, b)
            }
            Opcode::STORE => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::Store(a, b)
            }
            Opcode::STOREB => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::StoreB(a, b)
            }
            Opcode::PUSH => Self::Push(reg_single(byte_at(bytes, 1)?)?),
            Opcode::POP => Self::Pop(reg_single(byte_at(bytes, 1)?)?),
            Opcode::JUMP => Self::Jump(word_at(bytes, 1)?),
            Opcode::CJUMP => Self::CJump(word_at(bytes, 1)?),
            Opcode::CALL => Self::Call(word_at(bytes, 1)?),
            Opcode::RET => Self::Ret,
            Opcode::SYSCALL => Self::Syscall(byte_at(bytes, 1)?),
            Opcode::CMP => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::Cmp(a, b)
            }
            Opcode::ISEQUAL => Self::IsEqual,
            Opcode::ISLESS => Self::IsLess,
            Opcode::ISGREATER => Self::IsGreater,
            Opcode::ISLESSEQUAL => Self::IsLessEqual,
            Opcode::ISGREATEREQUAL => Self::IsGreaterEqual,
            Opcode::ISNOTEQUAL => Self::IsNotEqual,
            Opcode::FCMP => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::FCmp(a, b)
            }
            Opcode::FISEQUAL => Self::FIsEqual,
            Opcode::FISLESS => Self::FIsLess,
            Opcode::FISGREATER => Self::FIsGreater,
            Opcode::FISLESSEQUAL => Self::FIsLessEqual,
            Opcode::FISGREATEREQUAL => Self::FIsGreaterEqual,
            Opcode::FISNOTEQUAL => Self::FIsNotEqual,
            Opcode::INTTOFLOAT => Self::IntToFloat(reg_single(byte_at(bytes, 1)?)?),
            Opcode::FLOATTOINT => Self::FloatToInt(reg_single(byte_at(bytes, 1)?)?),
            Opcode::ADD => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::Add(a, b)
            }
            Opcode::SUB => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::Sub(a, b)
            }
            Opcode::MUL => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::Mul(a, b)
            }
            Opcode::DIV => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::Div(a, b)
            }
            Opcode::REM => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::Rem(a, b)
            }
            Opcode::FADD => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::FAdd(a, b)
            }
            Opcode::FSUB => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::FSub(a, b)
            }
            Opcode::FMUL => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::FMul(a, b)
            }
            Opcode::FDIV => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::FDiv(a, b)
            }
            Opcode::AND => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::And(a, b)
            }
            Opcode::OR => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::Or(a, b)
            }
            Opcode::XOR => {
                let (a, b) = reg_pair(byte_at(bytes, 1)?)?;
                Self::Xor(a, b)
            }
            Opcode::NOT => Self::Not(reg_single(byte_at(bytes, 1)?)?),
        };

        Ok(instruction)
    }

    /// Opcode of this instruction.
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Nop => Opcode::NOP,
            Self::Panic => Opcode::PANIC,
            Self::TryStart(_) => Opcode::TRYSTART,
            Self::TryEnd => Opcode::TRYEND,
            Self::Move(..) => Opcode::MOVE,
            Self::MoveI(..) => Opcode::MOVEI,
            Self::MoveIB(..) => Opcode::MOVEIB,
            Self::Load(..) => Opcode::LOAD,
            Self::LoadB(..) => Opcode::LOADB,
            Self::Store(..) => Opcode::STORE,
            Self::StoreB(..) => Opcode::STOREB,
            Self::Push(_) => Opcode::PUSH,
            Self::Pop(_) => Opcode::POP,
            Self::Jump(_) => Opcode::JUMP,
            Self::CJump(_) => Opcode::CJUMP,
            Self::Call(_) => Opcode::CALL,
            Self::Ret => Opcode::RET,
            Self::Syscall(_) => Opcode::SYSCALL,
            Self::Cmp(..) => Opcode::CMP,
            Self::IsEqual => Opcode::ISEQUAL,
            Self::IsLess => Opcode::ISLESS,
            Self::IsGreater => Opcode::ISGREATER,
            Self::IsLessEqual => Opcode::ISLESSEQUAL,
            Self::IsGreaterEqual => Opcode::ISGREATEREQUAL,
            Self::IsNotEqual => Opcode::ISNOTEQUAL,
            Self::FCmp(..) => Opcode::FCMP,
            Self::FIsEqual => Opcode::FISEQUAL,
            Self::FIsLess => Opcode::FISLESS,
            Self::FIsGreater => Opcode::FISGREATER,
            Self::FIsLessEqual => Opcode::FISLESSEQUAL,
            Self::FIsGreaterEqual => Opcode::FISGREATEREQUAL,
            Self::FIsNotEqual => Opcode::FISNOTEQUAL,
            Self::IntToFloat(_) => Opcode::INTTOFLOAT,
            Self::FloatToInt(_) => Opcode::FLOATTOINT,
            Self::Add(..) => Opcode::ADD,
            Self::Sub(..) => Opcode::SUB,
            Self::Mul(..) => Opcode::MUL,
            Self::Div(..) => Opcode::DIV,
            Self::Rem(..) => Opcode::REM,
            Self::FAdd(..) => Opcode::FADD,
            Self::FSub(..) => Opcode::FSUB,
            Self::FMul(..) => Opcode::FMUL,
            Self::FDiv(..) => Opcode::FDIV,
            Self::And(..) => Opcode::AND,
            Self::Or(..) => Opcode::OR,
            Self::Xor(..) => Opcode::XOR,
            Self::Not(_) => Opcode::NOT,
        }
    }

    /// On-wire size in bytes.
    pub const fn size(&self) -> usize {
        self.opcode().size()
    }

    /// Append the on-wire encoding of this instruction to `buf`.
    #[cfg(feature = "alloc")]
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.opcode() as u8);

        match *self {
            Self::Nop
            | Self::Panic
            | Self::TryEnd
            | Self::Ret
            | Self::IsEqual
            | Self::IsLess
            | Self::IsGreater
            | Self::IsLessEqual
            | Self::IsGreaterEqual
            | Self::IsNotEqual
            | Self::FIsEqual
            | Self::FIsLess
            | Self::FIsGreater
            | Self::FIsLessEqual
            | Self::FIsGreaterEqual
            | Self::FIsNotEqual => {}

            Self::TryStart(word) | Self::Jump(word) | Self::CJump(word) | Self::Call(word) => {
                buf.extend_from_slice(&word.to_le_bytes());
            }

            Self::MoveI(reg, word) => {
                buf.push(reg.to_u8());
                buf.extend_from_slice(&word.to_le_bytes());
            }

            Self::MoveIB(reg, byte) => {
                buf.push(reg.to_u8());
                buf.push(byte);
            }

            Self::Syscall(number) => buf.push(number),

            Self::Push(reg)
            | Self::Pop(reg)
            | Self::IntToFloat(reg)
            | Self::FloatToInt(reg)
            | Self::Not(reg) => buf.push(reg.to_u8()),

            Self::Move(a, b)
            | Self::Load(a, b)
            | Self::LoadB(a, b)
            | Self::Store(a, b)
            | Self::StoreB(a, b)
            | Self::Cmp(a, b)
            | Self::FCmp(a, b)
            | Self::Add(a, b)
            | Self::Sub(a, b)
            | Self::Mul(a, b)
            | Self::Div(a, b)
            | Self::Rem(a, b)
            | Self::FAdd(a, b)
            | Self::FSub(a, b)
            | Self::FMul(a, b)
            | Self::FDiv(a, b)
            | Self::And(a, b)
            | Self::Or(a, b)
            | Self::Xor(a, b) => buf.push(pack_pair(a, b)),
        }
    }

    /// The on-wire encoding of this instruction.
    #[cfg(feature = "alloc")]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        self.encode_to(&mut buf);
        buf
    }
}

/// Iterator over the instructions of a bytecode buffer, yielding each
/// instruction's starting offset alongside the decode result.
///
/// Iteration stops after the first malformed instruction, since the
/// following boundary is unknowable.
#[derive(Debug, Clone)]
pub struct Instructions<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl Iterator for Instructions<'_> {
    type Item = (usize, Result<Instruction, PanicReason>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.bytes.len() {
            return None;
        }

        let start = self.offset;
        let decoded = Instruction::decode(&self.bytes[start..]);
        self.offset = match &decoded {
            Ok(instruction) => start + instruction.size(),
            Err(_) => self.bytes.len(),
        };

        Some((start, decoded))
    }
}

/// Iterate over `bytecode`, decoding one instruction at a time.
pub fn instructions(bytecode: &[u8]) -> Instructions<'_> {
    Instructions {
        bytes: bytecode,
        offset: 0,
    }
}

#[cfg(feature = "alloc")]
impl FromIterator<Instruction> for Vec<u8> {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Instruction>,
    {
        let mut buf = Vec::new();
        for instruction in iter {
            instruction.encode_to(&mut buf);
        }
        buf
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = self.opcode().mnemonic();

        match *self {
            Self::TryStart(word) | Self::Jump(word) | Self::CJump(word) | Self::Call(word) => {
                write!(f, "{mnemonic} {word:#x}")
            }
            Self::MoveI(reg, word) => write!(f, "{mnemonic} {reg}, {word}"),
            Self::MoveIB(reg, byte) => write!(f, "{mnemonic} {reg}, {byte}"),
            Self::Syscall(number) => write!(f, "{mnemonic} {number}"),
            Self::Push(reg)
            | Self::Pop(reg)
            | Self::IntToFloat(reg)
            | Self::FloatToInt(reg)
            | Self::Not(reg) => write!(f, "{mnemonic} {reg}"),
            Self::Move(a, b)
            | Self::Load(a, b)
            | Self::LoadB(a, b)
            | Self::Store(a, b)
            | Self::StoreB(a, b)
            | Self::Cmp(a, b)
            | Self::FCmp(a, b)
            | Self::Add(a, b)
            | Self::Sub(a, b)
            | Self::Mul(a, b)
            | Self::Div(a, b)
            | Self::Rem(a, b)
            | Self::FAdd(a, b)
            | Self::FSub(a, b)
            | Self::FMul(a, b)
            | Self::FDiv(a, b)
            | Self::And(a, b)
            | Self::Or(a, b)
            | Self::Xor(a, b) => write!(f, "{mnemonic} {a}, {b}"),
            _ => f.write_str(mnemonic),
        }
    }
}
