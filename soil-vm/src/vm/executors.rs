use tracing::trace;

use soil_asm::{Instruction, PanicReason, RegId, Word};

use crate::error::{SimpleResult, VmError};
use crate::state::{ExecuteState, ProgramState};

use super::alu::float_to_int;
use super::{Vm, HALT_EXIT, HALT_RELOAD};

impl Vm {
    /// Execute a single instruction.
    ///
    /// Panics raised by the instruction are resolved here: caught by an
    /// active try scope (returning [`ExecuteState::Proceed`]) or escalated
    /// to [`VmError::Panic`].
    pub fn step(&mut self) -> Result<ExecuteState, VmError> {
        match self.exec_instruction() {
            Ok(state) => Ok(state),
            Err(reason) => self.unwind_or_fail(reason),
        }
    }

    /// Run to completion: step until the program exits, finishes, or fails
    /// with an uncaught panic. Handles program replacement through the
    /// `execute` syscall.
    pub fn run(&mut self) -> Result<ProgramState, VmError> {
        loop {
            match self.step()? {
                ExecuteState::Proceed => (),
                ExecuteState::Exit(status) => return Ok(ProgramState::Exit(status)),
                ExecuteState::Finished => return Ok(ProgramState::Exit(0)),
                ExecuteState::Reload => {
                    let image = self
                        .take_pending_execute()
                        .expect("reload state implies a pending image");
                    self.load_image(image);
                }
            }
        }
    }

    fn exec_instruction(&mut self) -> SimpleResult<ExecuteState> {
        if self.pc == self.bytecode.len() as u64 {
            return Ok(ExecuteState::Finished);
        }

        let instruction = Instruction::decode(&self.bytecode[self.pc as usize..])?;
        trace!(pc = self.pc, %instruction, "exec");

        let next_pc = self.pc + instruction.size() as u64;

        match instruction {
            Instruction::Nop => (),

            Instruction::Panic => return Err(PanicReason::PanicInstruction),
            Instruction::TryStart(catch) => self.trystart(catch)?,
            Instruction::TryEnd => self.tryend()?,

            Instruction::Move(dst, src) => {
                let value = self.reg_get(src);
                self.reg_set(dst, value);
            }
            Instruction::MoveI(dst, imm) => self.reg_set(dst, imm as Word),
            Instruction::MoveIB(dst, imm) => self.reg_set(dst, imm as Word),
            Instruction::Load(dst, addr) => {
                let value = self.mem_load_u64(self.reg_get(addr))?;
                self.reg_set(dst, value);
            }
            Instruction::LoadB(dst, addr) => {
                let value = self.mem_load_u8(self.reg_get(addr))?;
                self.reg_set(dst, value as Word);
            }
            Instruction::Store(addr, src) => {
                self.mem_store_u64(self.reg_get(addr), self.reg_get(src))?;
            }
            Instruction::StoreB(addr, src) => {
                self.mem_store_u8(self.reg_get(addr), self.reg_get(src) as u8)?;
            }
            Instruction::Push(src) => {
                let sp = self.reg_get(RegId::SP).wrapping_sub(8);
                self.reg_set(RegId::SP, sp);
                self.mem_store_u64(sp, self.reg_get(src))?;
            }
            Instruction::Pop(dst) => {
                let sp = self.reg_get(RegId::SP);
                let value = self.mem_load_u64(sp)?;
                self.reg_set(dst, value);
                self.reg_set(RegId::SP, self.reg_get(RegId::SP).wrapping_add(8));
            }

            Instruction::Jump(target) => {
                self.jump(target)?;
                return Ok(ExecuteState::Proceed);
            }
            Instruction::CJump(target) => {
                if self.reg_get(RegId::ST) != 0 {
                    self.jump(target)?;
                    return Ok(ExecuteState::Proceed);
                }
            }
            Instruction::Call(target) => {
                self.call(target, next_pc)?;
                return Ok(ExecuteState::Proceed);
            }
            Instruction::Ret => return self.ret(),
            Instruction::Syscall(number) => {
                let state = self.dispatch_syscall(number)?;
                self.pc = next_pc;
                return Ok(state);
            }

            Instruction::Cmp(lhs, rhs) => {
                let status = self.reg_get(lhs).wrapping_sub(self.reg_get(rhs));
                self.reg_set(RegId::ST, status);
            }
            Instruction::IsEqual => self.status_test(|st| st == 0),
            Instruction::IsLess => self.status_test(|st| st < 0),
            Instruction::IsGreater => self.status_test(|st| st > 0),
            Instruction::IsLessEqual => self.status_test(|st| st <= 0),
            Instruction::IsGreaterEqual => self.status_test(|st| st >= 0),
            Instruction::IsNotEqual => self.status_test(|st| st != 0),

            Instruction::FCmp(lhs, rhs) => {
                let status =
                    f64::from_bits(self.reg_get(lhs)) - f64::from_bits(self.reg_get(rhs));
                self.reg_set(RegId::ST, status.to_bits());
            }
            Instruction::FIsEqual => self.status_test_float(|st| st == 0.0),
            Instruction::FIsLess => self.status_test_float(|st| st < 0.0),
            Instruction::FIsGreater => self.status_test_float(|st| st > 0.0),
            Instruction::FIsLessEqual => self.status_test_float(|st| st <= 0.0),
            Instruction::FIsGreaterEqual => self.status_test_float(|st| st >= 0.0),
            Instruction::FIsNotEqual => self.status_test_float(|st| st != 0.0),

            Instruction::IntToFloat(reg) => {
                let value = self.reg_get(reg) as i64 as f64;
                self.reg_set(reg, value.to_bits());
            }
            Instruction::FloatToInt(reg) => {
                let value = float_to_int(f64::from_bits(self.reg_get(reg)));
                self.reg_set(reg, value as Word);
            }

            Instruction::Add(dst, src) => self.alu_binary(dst, src, Word::wrapping_add),
            Instruction::Sub(dst, src) => self.alu_binary(dst, src, Word::wrapping_sub),
            Instruction::Mul(dst, src) => self.alu_binary(dst, src, Word::wrapping_mul),
            Instruction::Div(dst, src) => self.alu_division(dst, src, i64::wrapping_div)?,
            Instruction::Rem(dst, src) => self.alu_division(dst, src, i64::wrapping_rem)?,
            Instruction::FAdd(dst, src) => self.alu_float_binary(dst, src, |a, b| a + b),
            Instruction::FSub(dst, src) => self.alu_float_binary(dst, src, |a, b| a - b),
            Instruction::FMul(dst, src) => self.alu_float_binary(dst, src, |a, b| a * b),
            Instruction::FDiv(dst, src) => self.alu_float_binary(dst, src, |a, b| a / b),

            Instruction::And(dst, src) => self.alu_binary(dst, src, |a, b| a & b),
            Instruction::Or(dst, src) => self.alu_binary(dst, src, |a, b| a | b),
            Instruction::Xor(dst, src) => self.alu_binary(dst, src, |a, b| a ^ b),
            Instruction::Not(reg) => {
                let value = !self.reg_get(reg);
                self.reg_set(reg, value);
            }
        }

        self.pc = next_pc;
        Ok(ExecuteState::Proceed)
    }

    /// Invoke a host syscall handler, marshalling registers per the
    /// trampoline ABI: the VM pointer plus `a..e` as arguments, the declared
    /// number of return values written back to `a` (and `b`).
    fn dispatch_syscall(&mut self, number: u8) -> SimpleResult<ExecuteState> {
        let entry = self.syscalls().entry(number);
        let Some(handler) = entry.handler else {
            trace!(number, "syscall slot not implemented");
            return Err(PanicReason::SyscallNotImplemented);
        };

        let [a, b, c, d, e] = [
            self.reg_get(RegId::A),
            self.reg_get(RegId::B),
            self.reg_get(RegId::C),
            self.reg_get(RegId::D),
            self.reg_get(RegId::E),
        ];

        let ret = handler(self as *mut Vm, a, b, c, d, e);

        entry.ret.write_back(self, ret);

        if let Some(reason) = self.take_pending_panic() {
            return Err(reason);
        }

        match std::mem::replace(&mut self.ctx.halt, 0) {
            HALT_EXIT => Ok(ExecuteState::Exit(self.ctx.exit_code)),
            HALT_RELOAD => Ok(ExecuteState::Reload),
            _ => Ok(ExecuteState::Proceed),
        }
    }
}
