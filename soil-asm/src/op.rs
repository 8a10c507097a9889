//! Constructor shorthands, one per instruction.
//!
//! These exist so programs can be written inline, mainly in tests:
//!
//! ```
//! use soil_asm::{op, RegId};
//!
//! let bytecode: Vec<u8> = [
//!     op::movei(RegId::A, 42),
//!     op::syscall(0),
//! ]
//! .into_iter()
//! .collect();
//! ```

use crate::{Instruction, RegId};

/// Construct a `nop` instruction.
pub fn nop() -> Instruction {
    Instruction::Nop
}

/// Construct a `panic` instruction.
pub fn panic() -> Instruction {
    Instruction::Panic
}

/// Construct a `trystart` instruction.
pub fn trystart(catch: i64) -> Instruction {
    Instruction::TryStart(catch)
}

/// Construct a `tryend` instruction.
pub fn tryend() -> Instruction {
    Instruction::TryEnd
}

/// Construct a `move` instruction.
pub fn move_(dst: RegId, src: RegId) -> Instruction {
    Instruction::Move(dst, src)
}

/// Construct a `movei` instruction.
pub fn movei(dst: RegId, imm: i64) -> Instruction {
    Instruction::MoveI(dst, imm)
}

/// Construct a `moveib` instruction.
pub fn moveib(dst: RegId, imm: u8) -> Instruction {
    Instruction::MoveIB(dst, imm)
}

/// Construct a `load` instruction.
pub fn load(dst: RegId, addr: RegId) -> Instruction {
    Instruction::Load(dst, addr)
}

/// Construct a `loadb` instruction.
pub fn loadb(dst: RegId, addr: RegId) -> Instruction {
    Instruction::LoadB(dst, addr)
}

/// Construct a `store` instruction.
pub fn store(addr: RegId, src: RegId) -> Instruction {
    Instruction::Store(addr, src)
}

/// Construct a `storeb` instruction.
pub fn storeb(addr: RegId, src: RegId) -> Instruction {
    Instruction::StoreB(addr, src)
}

/// Construct a `push` instruction.
pub fn push(src: RegId) -> Instruction {
    Instruction::Push(src)
}

/// Construct a `pop` instruction.
pub fn pop(dst: RegId) -> Instruction {
    Instruction::Pop(dst)
}

/// Construct a `jump` instruction.
pub fn jump(target: i64) -> Instruction {
    Instruction::Jump(target)
}

/// Construct a `cjump` instruction.
pub fn cjump(target: i64) -> Instruction {
    Instruction::CJump(target)
}

/// Construct a `call` instruction.
pub fn call(target: i64) -> Instruction {
    Instruction::Call(target)
}

/// Construct a `ret` instruction.
pub fn ret() -> Instruction {
    Instruction::Ret
}

/// Construct a `syscall` instruction.
pub fn syscall(number: u8) -> Instruction {
    Instruction::Syscall(number)
}

/// Construct a `cmp` instruction.
pub fn cmp(lhs: RegId, rhs: RegId) -> Instruction {
    Instruction::Cmp(lhs, rhs)
}

/// Construct an `isequal` instruction.
pub fn isequal() -> Instruction {
    Instruction::IsEqual
}

/// Construct an `isless` instruction.
pub fn isless() -> Instruction {
    Instruction::IsLess
}

/// Construct an `isgreater` instruction.
pub fn isgreater() -> Instruction {
    Instruction::IsGreater
}

/// Construct an `islessequal` instruction.
pub fn islessequal() -> Instruction {
    Instruction::IsLessEqual
}

/// Construct an `isgreaterequal` instruction.
pub fn isgreaterequal() -> Instruction {
    Instruction::IsGreaterEqual
}

/// Construct an `isnotequal` instruction.
pub fn isnotequal() -> Instruction {
    Instruction::IsNotEqual
}

/// Construct an `fcmp` instruction.
pub fn fcmp(lhs: RegId, rhs: RegId) -> Instruction {
    Instruction::FCmp(lhs, rhs)
}

/// Construct an `fisequal` instruction.
pub fn fisequal() -> Instruction {
    Instruction::FIsEqual
}

/// Construct an `fisless` instruction.
pub fn fisless() -> Instruction {
    Instruction::FIsLess
}

/// Construct an `fisgreater` instruction.
pub fn fisgreater() -> Instruction {
    Instruction::FIsGreater
}

/// Construct an `fislessequal` instruction.
pub fn fislessequal() -> Instruction {
    Instruction::FIsLessEqual
}

/// Construct an `fisgreaterequal` instruction.
pub fn fisgreaterequal() -> Instruction {
    Instruction::FIsGreaterEqual
}

/// Construct an `fisnotequal` instruction.
pub fn fisnotequal() -> Instruction {
    Instruction::FIsNotEqual
}

/// Construct an `inttofloat` instruction.
pub fn inttofloat(reg: RegId) -> Instruction {
    Instruction::IntToFloat(reg)
}

/// Construct a `floattoint` instruction.
pub fn floattoint(reg: RegId) -> Instruction {
    Instruction::FloatToInt(reg)
}

/// Construct an `add` instruction.
pub fn add(dst: RegId, rhs: RegId) -> Instruction {
    Instruction::Add(dst, rhs)
}

/// Construct a `sub` instruction.
pub fn sub(dst: RegId, rhs: RegId) -> Instruction {
    Instruction::Sub(dst, rhs)
}

/// Construct a `mul` instruction.
pub fn mul(dst: RegId, rhs: RegId) -> Instruction {
    Instruction::Mul(dst, rhs)
}

/// Construct a `div` instruction.
pub fn div(dst: RegId, rhs: RegId) -> Instruction {
    Instruction::Div(dst, rhs)
}

/// Construct a `rem` instruction.
pub fn rem(dst: RegId, rhs: RegId) -> Instruction {
    Instruction::Rem(dst, rhs)
}

/// Construct an `fadd` instruction.
pub fn fadd(dst: RegId, rhs: RegId) -> Instruction {
    Instruction::FAdd(dst, rhs)
}

/// Construct an `fsub` instruction.
pub fn fsub(dst: RegId, rhs: RegId) -> Instruction {
    Instruction::FSub(dst, rhs)
}

/// Construct an `fmul` instruction.
pub fn fmul(dst: RegId, rhs: RegId) -> Instruction {
    Instruction::FMul(dst, rhs)
}

/// Construct an `fdiv` instruction.
pub fn fdiv(dst: RegId, rhs: RegId) -> Instruction {
    Instruction::FDiv(dst, rhs)
}

/// Construct an `and` instruction.
pub fn and(dst: RegId, rhs: RegId) -> Instruction {
    Instruction::And(dst, rhs)
}

/// Construct an `or` instruction.
pub fn or(dst: RegId, rhs: RegId) -> Instruction {
    Instruction::Or(dst, rhs)
}

/// Construct an `xor` instruction.
pub fn xor(dst: RegId, rhs: RegId) -> Instruction {
    Instruction::Xor(dst, rhs)
}

/// Construct a `not` instruction.
pub fn not(reg: RegId) -> Instruction {
    Instruction::Not(reg)
}
