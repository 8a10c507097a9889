use soil_asm::{PanicReason, RegId};

use crate::consts::{VM_CALL_STACK_LIMIT, VM_TRY_STACK_LIMIT};
use crate::error::{SimpleResult, VmError};
use crate::state::ExecuteState;

use super::{TryScope, Vm};

impl Vm {
    /// Whether `target` is a valid control-flow destination: the first byte
    /// of an instruction, or one past the bytecode end (which finishes the
    /// program).
    fn is_valid_target(&self, target: i64) -> bool {
        let Ok(target) = usize::try_from(target) else {
            return false;
        };
        target == self.bytecode.len() || self.starts.get(target).copied().unwrap_or(false)
    }

    /// Transfer control to a bytecode offset.
    pub(crate) fn jump(&mut self, target: i64) -> SimpleResult<()> {
        if !self.is_valid_target(target) {
            return Err(PanicReason::JumpOutOfBytecode);
        }
        self.pc = target as u64;
        Ok(())
    }

    pub(crate) fn call(&mut self, target: i64, return_to: u64) -> SimpleResult<()> {
        if self.frames.len() >= VM_CALL_STACK_LIMIT {
            return Err(PanicReason::CallStackOverflow);
        }
        self.jump(target)?;
        self.frames.push(return_to);
        Ok(())
    }

    pub(crate) fn ret(&mut self) -> SimpleResult<ExecuteState> {
        match self.frames.pop() {
            // Returning from the outermost function finishes the program,
            // exactly as the JIT's sentinel return target does.
            None => Ok(ExecuteState::Finished),
            Some(target) => {
                self.pc = target;
                Ok(ExecuteState::Proceed)
            }
        }
    }

    pub(crate) fn trystart(&mut self, catch: i64) -> SimpleResult<()> {
        // The catch target is validated lazily, on unwind.
        self.try_push(TryScope {
            host_sp: self.frames.len() as u64,
            sp: self.reg_get(RegId::SP),
            catch: catch as u64,
        })
    }

    pub(crate) fn tryend(&mut self) -> SimpleResult<()> {
        self.try_pop().map(|_| ())
    }

    /// Push a try scope.
    pub fn try_push(&mut self, scope: TryScope) -> SimpleResult<()> {
        let len = self.ctx.try_len as usize;
        if len >= VM_TRY_STACK_LIMIT {
            return Err(PanicReason::TryStackOverflow);
        }
        self.try_stack[len] = scope;
        self.ctx.try_len += 1;
        Ok(())
    }

    /// Pop the innermost try scope.
    pub fn try_pop(&mut self) -> SimpleResult<TryScope> {
        match self.ctx.try_len {
            0 => Err(PanicReason::TryStackUnderflow),
            len => {
                self.ctx.try_len = len - 1;
                Ok(self.try_stack[len as usize - 1])
            }
        }
    }

    /// The innermost try scope, if any.
    pub fn try_peek(&self) -> Option<&TryScope> {
        match self.ctx.try_len {
            0 => None,
            len => Some(&self.try_stack[len as usize - 1]),
        }
    }

    /// Number of active try scopes.
    pub fn try_depth(&self) -> usize {
        self.ctx.try_len as usize
    }

    /// Push a call-return target.
    pub fn call_push(&mut self, return_to: u64) -> SimpleResult<()> {
        if self.frames.len() >= VM_CALL_STACK_LIMIT {
            return Err(PanicReason::CallStackOverflow);
        }
        self.frames.push(return_to);
        Ok(())
    }

    /// Pop the most recent call-return target.
    pub fn call_pop(&mut self) -> SimpleResult<u64> {
        self.frames.pop().ok_or(PanicReason::CallStackUnderflow)
    }

    /// Depth of the call-return stack.
    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    /// Resolve a panic: unwind to the innermost try scope, restoring the
    /// `sp` snapshot and discarding call frames opened inside the scope, or
    /// fail with a captured backtrace when no scope is active.
    pub(crate) fn unwind_or_fail(&mut self, reason: PanicReason) -> Result<ExecuteState, VmError> {
        let panicked_at = self.pc;

        match self.try_pop() {
            Ok(scope) => {
                tracing::debug!(pc = panicked_at, %reason, catch = scope.catch, "unwinding");
                self.frames.truncate(scope.host_sp as usize);
                self.reg_set(RegId::SP, scope.sp);

                match self.jump(scope.catch as i64) {
                    Ok(()) => Ok(ExecuteState::Proceed),
                    // A bogus catch target panics in turn; the next scope
                    // out gets its chance.
                    Err(reason) => self.unwind_or_fail(reason),
                }
            }
            Err(_) => Err(VmError::Panic {
                reason,
                pc: panicked_at,
                trace: crate::backtrace::Backtrace::capture(self, panicked_at),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::image::Image;
    use crate::vm::{TryScope, Vm};
    use soil_asm::PanicReason;

    fn vm() -> Vm {
        Vm::from_image(Image::default())
    }

    #[test]
    fn call_stack_push_pop() {
        let mut vm = vm();
        assert_eq!(vm.call_depth(), 0);

        vm.call_push(10).unwrap();
        vm.call_push(20).unwrap();
        assert_eq!(vm.call_depth(), 2);
        assert_eq!(vm.call_pop(), Ok(20));
        assert_eq!(vm.call_pop(), Ok(10));
        assert_eq!(vm.call_pop(), Err(PanicReason::CallStackUnderflow));
    }

    #[test]
    fn call_stack_depth_is_limited() {
        let mut vm = vm();
        for i in 0..crate::consts::VM_CALL_STACK_LIMIT {
            vm.call_push(i as u64).unwrap();
        }
        assert_eq!(vm.call_push(0), Err(PanicReason::CallStackOverflow));
    }

    #[test]
    fn try_stack_push_pop() {
        let mut vm = vm();
        let scope = TryScope {
            host_sp: 1,
            sp: 100,
            catch: 7,
        };

        vm.try_push(scope).unwrap();
        assert_eq!(vm.try_depth(), 1);
        assert_eq!(vm.try_peek(), Some(&scope));
        assert_eq!(vm.try_pop(), Ok(scope));
        assert_eq!(vm.try_pop(), Err(PanicReason::TryStackUnderflow));
    }
}
