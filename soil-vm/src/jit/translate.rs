//! One-pass translation of Soil bytecode to x86-64.
//!
//! Register map: `sp..f` live in `r8..r15`, `rbp` holds the linear memory
//! base, `rbx` the VM context pointer. `rax`, `rcx`, `rdx`, `rsi`, `rdi`
//! and `xmm0`/`xmm1` are scratch.
//!
//! The emitted buffer is laid out as: entry shim, exit thunk, panic stub,
//! one code sequence per bytecode instruction, the end-of-bytecode
//! epilogue, and the invalid-target thunk. Branch displacements are left
//! zero during emission; a patch list records them and a final pass
//! rewrites each one from the offset maps.

use std::mem::offset_of;

use soil_asm::{Instruction, PanicReason, RegId};

use crate::consts::VM_TRY_STACK_LIMIT;
use crate::error::JitError;
use crate::syscall::{RetArity, SyscallTable};
use crate::vm::JitContext;

use super::asm::{Assembler, Cond, Reg, Xmm};

/// Host registers backing the Soil register file, in register-id order.
pub(crate) const SOIL_REGS: [Reg; RegId::COUNT] = [
    Reg::R8,
    Reg::R9,
    Reg::R10,
    Reg::R11,
    Reg::R12,
    Reg::R13,
    Reg::R14,
    Reg::R15,
];

/// Pinned pointer to the linear memory base.
const MEM_BASE: Reg = Reg::Rbp;
/// Pinned pointer to the VM context.
const VM_CTX: Reg = Reg::Rbx;

/// Host register backing one Soil register.
fn host(reg: RegId) -> Reg {
    SOIL_REGS[usize::from(reg)]
}

/// Sentinel in the offset maps for bytes that are not an instruction start.
pub const NO_MAPPING: u32 = u32::MAX;

/// How a deferred displacement is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    /// A `rel32` branch displacement, relative to the end of the field.
    Rel32,
    /// An absolute machine-code offset, as stored in try-scope catch
    /// records.
    McOffset,
}

/// A deferred rewrite of a 4-byte field in emitted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patch {
    /// Offset of the field in the emitted code.
    pub at: usize,
    /// Bytecode offset of the branch target.
    pub target: i64,
    /// Resolution rule.
    pub kind: PatchKind,
}

/// The result of translating a program.
#[derive(Debug)]
pub(crate) struct Translation {
    pub code: Vec<u8>,
    /// Machine-code offset of each bytecode instruction start
    /// (`NO_MAPPING` elsewhere); the final entry maps the one-past-the-end
    /// offset to the epilogue.
    pub map_bc_to_mc: Vec<u32>,
    /// Bytecode offset of the instruction containing each emitted byte
    /// (`NO_MAPPING` for the shim, stubs, and thunks).
    pub map_mc_to_bc: Vec<u32>,
    pub patches: Vec<Patch>,
    pub exit_thunk: usize,
    pub invalid_target_thunk: usize,
}

struct Translator<'a> {
    asm: Assembler,
    bytecode: &'a [u8],
    mem_size: usize,
    syscalls: &'a SyscallTable,
    patches: Vec<Patch>,
    map_bc_to_mc: Vec<u32>,
    map_mc_to_bc: Vec<u32>,
    panic_stub: usize,
    exit_thunk: usize,
}

/// Translate `bytecode` into host code.
///
/// Syscall handler addresses are baked into the emitted trampolines, so the
/// table must be fully populated before translation.
pub(crate) fn translate(
    bytecode: &[u8],
    mem_size: usize,
    syscalls: &SyscallTable,
) -> Result<Translation, JitError> {
    if bytecode.len() > i32::MAX as usize {
        return Err(JitError::BytecodeTooLarge(bytecode.len()));
    }
    if mem_size > i32::MAX as usize {
        return Err(JitError::MemorySizeTooLarge(mem_size));
    }

    let mut translator = Translator {
        asm: Assembler::new(),
        bytecode,
        mem_size,
        syscalls,
        patches: Vec::new(),
        map_bc_to_mc: vec![NO_MAPPING; bytecode.len() + 1],
        map_mc_to_bc: Vec::new(),
        panic_stub: 0,
        exit_thunk: 0,
    };

    translator.emit_entry_shim();
    translator.exit_thunk = translator.asm.offset();
    translator.emit_exit_thunk();
    translator.panic_stub = translator.asm.offset();
    translator.emit_panic_stub();
    translator.map_mc_to_bc = vec![NO_MAPPING; translator.asm.offset()];

    translator.emit_instructions();

    // End-of-bytecode epilogue: falling off the end, or jumping to the
    // one-past-the-end offset, finishes the program cleanly.
    translator.map_bc_to_mc[bytecode.len()] = translator.asm.offset() as u32;
    let epilogue_start = translator.asm.offset();
    let at = translator.asm.jmp_rel32();
    let exit_thunk = translator.exit_thunk;
    translator.asm.patch_rel32(at, exit_thunk);
    translator.fill_mc_map(epilogue_start, bytecode.len() as u32);

    let invalid_target_thunk = translator.asm.offset();
    translator.emit_invalid_target_thunk();
    let thunk_start_len = translator.asm.offset();
    translator.fill_mc_map_range(invalid_target_thunk, thunk_start_len, NO_MAPPING);

    translator.resolve_patches(invalid_target_thunk);

    Ok(Translation {
        code: translator.asm.into_code(),
        map_bc_to_mc: translator.map_bc_to_mc,
        map_mc_to_bc: translator.map_mc_to_bc,
        patches: translator.patches,
        exit_thunk: translator.exit_thunk,
        invalid_target_thunk,
    })
}

impl Translator<'_> {
    fn ctx_disp(offset: usize) -> i32 {
        offset as i32
    }

    fn fill_mc_map(&mut self, from: usize, value: u32) {
        self.fill_mc_map_range(from, self.asm.offset(), value);
    }

    fn fill_mc_map_range(&mut self, from: usize, to: usize, value: u32) {
        debug_assert_eq!(self.map_mc_to_bc.len(), from);
        self.map_mc_to_bc.resize(to, value);
    }

    /// The entry shim: save callee-saved host registers, pin the context
    /// and memory-base registers, initialize the Soil register file, push
    /// the terminating return target, and jump to the first instruction.
    fn emit_entry_shim(&mut self) {
        let asm = &mut self.asm;

        for reg in [Reg::Rbp, Reg::Rbx, Reg::R12, Reg::R13, Reg::R14, Reg::R15] {
            asm.push_r(reg);
        }
        asm.mov_rr(VM_CTX, Reg::Rdi);
        asm.mov_rm(
            MEM_BASE,
            VM_CTX,
            Self::ctx_disp(offset_of!(JitContext, memory_base)),
        );
        asm.mov_mr(
            VM_CTX,
            Self::ctx_disp(offset_of!(JitContext, entry_rsp)),
            Reg::Rsp,
        );
        // The terminating return target: `ret` from the outermost Soil
        // function lands in the exit thunk.
        asm.push_m(VM_CTX, Self::ctx_disp(offset_of!(JitContext, exit_thunk)));

        asm.mov_ri(host(RegId::SP), self.mem_size as i64);
        for reg in &SOIL_REGS[1..] {
            asm.xor_rr(*reg, *reg);
        }

        let at = asm.jmp_rel32();
        self.patches.push(Patch {
            at,
            target: 0,
            kind: PatchKind::Rel32,
        });
    }

    /// The exit thunk: spill the Soil registers for the host to inspect,
    /// unwind to the entry stack frame, restore callee-saved registers,
    /// and return to Rust.
    fn emit_exit_thunk(&mut self) {
        let asm = &mut self.asm;

        for (i, reg) in SOIL_REGS.iter().enumerate() {
            asm.mov_mr(
                VM_CTX,
                Self::ctx_disp(offset_of!(JitContext, registers) + i * 8),
                *reg,
            );
        }
        asm.mov_rm(
            Reg::Rsp,
            VM_CTX,
            Self::ctx_disp(offset_of!(JitContext, entry_rsp)),
        );
        for reg in [Reg::R15, Reg::R14, Reg::R13, Reg::R12, Reg::Rbx, Reg::Rbp] {
            asm.pop_r(reg);
        }
        asm.ret();
    }

    /// The shared panic stub. On entry `esi` holds the panic reason code
    /// and `edx` the faulting bytecode offset.
    ///
    /// With an active try scope it unwinds: pops the scope, restores the
    /// host stack pointer and the Soil `sp`, and jumps to the catch
    /// translation. Otherwise it spills the registers and calls the host
    /// fatal handler, which never returns.
    fn emit_panic_stub(&mut self) {
        let asm = &mut self.asm;

        asm.cmp_mi8(VM_CTX, Self::ctx_disp(offset_of!(JitContext, try_len)), 0);
        let fatal = asm.jcc_rel32(Cond::E);

        asm.dec_m64(VM_CTX, Self::ctx_disp(offset_of!(JitContext, try_len)));
        asm.mov_rm(
            Reg::Rax,
            VM_CTX,
            Self::ctx_disp(offset_of!(JitContext, try_len)),
        );
        asm.imul_rri(Reg::Rax, Reg::Rax, std::mem::size_of::<crate::vm::TryScope>() as i32);
        asm.add_rm(
            Reg::Rax,
            VM_CTX,
            Self::ctx_disp(offset_of!(JitContext, try_stack)),
        );
        asm.mov_rm(Reg::Rsp, Reg::Rax, 0);
        asm.mov_rm(host(RegId::SP), Reg::Rax, 8);
        asm.mov_rm(Reg::Rax, Reg::Rax, 16);
        asm.add_rm(
            Reg::Rax,
            VM_CTX,
            Self::ctx_disp(offset_of!(JitContext, code_base)),
        );
        asm.jmp_r(Reg::Rax);

        let here = asm.offset();
        asm.patch_rel32(fatal, here);

        for (i, reg) in SOIL_REGS.iter().enumerate() {
            asm.mov_mr(
                VM_CTX,
                Self::ctx_disp(offset_of!(JitContext, registers) + i * 8),
                *reg,
            );
        }
        asm.mov_rr(Reg::Rdi, VM_CTX);
        // esi and edx already carry the reason and bytecode offset.
        asm.mov_rr(Reg::Rcx, Reg::Rsp);
        asm.and_ri(Reg::Rsp, -16);
        asm.mov_ri64(Reg::Rax, super::fatal_panic as usize as i64);
        asm.call_r(Reg::Rax);
    }

    /// The shared thunk for branches whose bytecode target is not an
    /// instruction start. Reached only if such a branch actually executes.
    fn emit_invalid_target_thunk(&mut self) {
        let panic_stub = self.panic_stub;
        let asm = &mut self.asm;
        asm.mov_ri32u(Reg::Rsi, PanicReason::JumpOutOfBytecode as u32);
        asm.mov_ri32u(Reg::Rdx, NO_MAPPING);
        let at = asm.jmp_rel32();
        asm.patch_rel32(at, panic_stub);
    }

    /// Emit `mov esi, reason; mov edx, bc; jmp panic_stub`.
    fn emit_panic_jump(&mut self, reason: PanicReason, bc: usize) {
        let panic_stub = self.panic_stub;
        let asm = &mut self.asm;
        asm.mov_ri32u(Reg::Rsi, reason as u32);
        asm.mov_ri32u(Reg::Rdx, bc as u32);
        let at = asm.jmp_rel32();
        asm.patch_rel32(at, panic_stub);
    }

    /// Bounds check `addr_reg + width <= mem_size`, panicking with
    /// `OutOfMemoryAccess` on violation. The comparison is unsigned, so
    /// wrapped addresses fail too.
    fn emit_bounds_check(&mut self, addr_reg: Reg, width: usize, bc: usize) {
        self.asm.cmp_ri(addr_reg, (self.mem_size - width) as i32);
        let ok = self.asm.jcc_rel32(Cond::Be);
        self.emit_panic_jump(PanicReason::OutOfMemoryAccess, bc);
        let here = self.asm.offset();
        self.asm.patch_rel32(ok, here);
    }

    fn emit_instructions(&mut self) {
        for (at, decoded) in soil_asm::instructions(self.bytecode) {
            self.map_bc_to_mc[at] = self.asm.offset() as u32;
            let start = self.asm.offset();

            match decoded {
                Ok(instruction) => self.emit_instruction(at, &instruction),
                // Executing this offset must produce the same panic the
                // interpreter raises. Nothing past a malformed instruction
                // can be decoded, so this is the last emission; jumps into
                // the tail resolve to the invalid-target thunk.
                Err(reason) => self.emit_panic_jump(reason, at),
            }

            self.fill_mc_map(start, at as u32);
        }
    }

    fn emit_instruction(&mut self, bc: usize, instruction: &Instruction) {
        use Instruction::*;

        match *instruction {
            Nop => self.asm.nop(),

            Panic => self.emit_panic_jump(PanicReason::PanicInstruction, bc),
            TryStart(catch) => self.emit_trystart(bc, catch),
            TryEnd => self.emit_tryend(bc),

            Move(dst, src) => self.asm.mov_rr(host(dst), host(src)),
            MoveI(dst, imm) => self.asm.mov_ri(host(dst), imm),
            MoveIB(dst, imm) => self.asm.mov_ri32u(host(dst), imm as u32),
            Load(dst, addr) => {
                self.emit_bounds_check(host(addr), 8, bc);
                self.asm.mov_rm_indexed(host(dst), MEM_BASE, host(addr));
            }
            LoadB(dst, addr) => {
                self.emit_bounds_check(host(addr), 1, bc);
                self.asm.movzx_rm8_indexed(host(dst), MEM_BASE, host(addr));
            }
            Store(addr, src) => {
                self.emit_bounds_check(host(addr), 8, bc);
                self.asm.mov_mr_indexed(MEM_BASE, host(addr), host(src));
            }
            StoreB(addr, src) => {
                self.emit_bounds_check(host(addr), 1, bc);
                self.asm.mov_m8r_indexed(MEM_BASE, host(addr), host(src));
            }
            Push(src) => {
                let sp = host(RegId::SP);
                self.asm.sub_ri(sp, 8);
                self.emit_bounds_check(sp, 8, bc);
                self.asm.mov_mr_indexed(MEM_BASE, sp, host(src));
            }
            Pop(dst) => {
                let sp = host(RegId::SP);
                self.emit_bounds_check(sp, 8, bc);
                self.asm.mov_rm_indexed(host(dst), MEM_BASE, sp);
                self.asm.add_ri(sp, 8);
            }

            Jump(target) => {
                let at = self.asm.jmp_rel32();
                self.patches.push(Patch {
                    at,
                    target,
                    kind: PatchKind::Rel32,
                });
            }
            CJump(target) => {
                let st = host(RegId::ST);
                self.asm.test_rr(st, st);
                let at = self.asm.jcc_rel32(Cond::Ne);
                self.patches.push(Patch {
                    at,
                    target,
                    kind: PatchKind::Rel32,
                });
            }
            Call(target) => {
                let at = self.asm.call_rel32();
                self.patches.push(Patch {
                    at,
                    target,
                    kind: PatchKind::Rel32,
                });
            }
            Ret => self.asm.ret(),
            Syscall(number) => self.emit_syscall(number, bc),

            Cmp(lhs, rhs) => {
                let st = host(RegId::ST);
                self.asm.mov_rr(Reg::Rax, host(rhs));
                self.asm.mov_rr(st, host(lhs));
                self.asm.sub_rr(st, Reg::Rax);
            }
            IsEqual => self.emit_status_test(Cond::E),
            IsLess => self.emit_status_test(Cond::L),
            IsGreater => self.emit_status_test(Cond::G),
            IsLessEqual => self.emit_status_test(Cond::Le),
            IsGreaterEqual => self.emit_status_test(Cond::Ge),
            IsNotEqual => self.emit_status_test(Cond::Ne),

            FCmp(lhs, rhs) => {
                self.asm.movq_xr(Xmm::Xmm0, host(lhs));
                self.asm.movq_xr(Xmm::Xmm1, host(rhs));
                self.asm.subsd(Xmm::Xmm0, Xmm::Xmm1);
                self.asm.movq_rx(host(RegId::ST), Xmm::Xmm0);
            }
            FIsEqual => self.emit_float_status_test(FloatTest::Equal),
            FIsLess => self.emit_float_status_test(FloatTest::Less),
            FIsGreater => self.emit_float_status_test(FloatTest::Greater),
            FIsLessEqual => self.emit_float_status_test(FloatTest::LessEqual),
            FIsGreaterEqual => self.emit_float_status_test(FloatTest::GreaterEqual),
            FIsNotEqual => self.emit_float_status_test(FloatTest::NotEqual),

            IntToFloat(reg) => {
                self.asm.cvtsi2sd(Xmm::Xmm0, host(reg));
                self.asm.movq_rx(host(reg), Xmm::Xmm0);
            }
            FloatToInt(reg) => {
                // cvttsd2si returns i64::MIN for NaN and out-of-range
                // inputs, which is the documented Soil semantics.
                self.asm.movq_xr(Xmm::Xmm0, host(reg));
                self.asm.cvttsd2si(host(reg), Xmm::Xmm0);
            }

            Add(dst, src) => self.asm.add_rr(host(dst), host(src)),
            Sub(dst, src) => self.asm.sub_rr(host(dst), host(src)),
            Mul(dst, src) => self.asm.imul_rr(host(dst), host(src)),
            Div(dst, src) => self.emit_division(bc, dst, src, Division::Quotient),
            Rem(dst, src) => self.emit_division(bc, dst, src, Division::Remainder),
            FAdd(dst, src) => self.emit_float_binary(dst, src, Assembler::addsd),
            FSub(dst, src) => self.emit_float_binary(dst, src, Assembler::subsd),
            FMul(dst, src) => self.emit_float_binary(dst, src, Assembler::mulsd),
            FDiv(dst, src) => self.emit_float_binary(dst, src, Assembler::divsd),

            And(dst, src) => self.asm.and_rr(host(dst), host(src)),
            Or(dst, src) => self.asm.or_rr(host(dst), host(src)),
            Xor(dst, src) => self.asm.xor_rr(host(dst), host(src)),
            Not(reg) => self.asm.not_r(host(reg)),
        }
    }

    /// `st ← (signed(st) ⋈ 0) as Word`.
    fn emit_status_test(&mut self, cond: Cond) {
        let st = host(RegId::ST);
        self.asm.cmp_ri(st, 0);
        self.asm.setcc(cond, Reg::Rax);
        self.asm.movzx_rr8(st, Reg::Rax);
    }

    /// `st ← (f64(st) ⋈ 0.0) as Word`, with IEEE-754 unordered semantics:
    /// a NaN status compares false everywhere except "not equal".
    fn emit_float_status_test(&mut self, test: FloatTest) {
        let st = host(RegId::ST);
        let asm = &mut self.asm;

        asm.movq_xr(Xmm::Xmm0, st);
        asm.xorpd(Xmm::Xmm1, Xmm::Xmm1);

        match test {
            FloatTest::Equal => {
                asm.ucomisd(Xmm::Xmm0, Xmm::Xmm1);
                asm.setcc(Cond::E, Reg::Rax);
                asm.setcc(Cond::Np, Reg::Rcx);
                asm.and_rr8(Reg::Rax, Reg::Rcx);
            }
            FloatTest::NotEqual => {
                asm.ucomisd(Xmm::Xmm0, Xmm::Xmm1);
                asm.setcc(Cond::Ne, Reg::Rax);
                asm.setcc(Cond::P, Reg::Rcx);
                asm.or_rr8(Reg::Rax, Reg::Rcx);
            }
            // `x < 0` is `0 > x`; above/above-or-equal are false on
            // unordered results, which is what NaN needs.
            FloatTest::Less => {
                asm.ucomisd(Xmm::Xmm1, Xmm::Xmm0);
                asm.setcc(Cond::A, Reg::Rax);
            }
            FloatTest::LessEqual => {
                asm.ucomisd(Xmm::Xmm1, Xmm::Xmm0);
                asm.setcc(Cond::Ae, Reg::Rax);
            }
            FloatTest::Greater => {
                asm.ucomisd(Xmm::Xmm0, Xmm::Xmm1);
                asm.setcc(Cond::A, Reg::Rax);
            }
            FloatTest::GreaterEqual => {
                asm.ucomisd(Xmm::Xmm0, Xmm::Xmm1);
                asm.setcc(Cond::Ae, Reg::Rax);
            }
        }

        asm.movzx_rr8(st, Reg::Rax);
    }

    fn emit_float_binary(
        &mut self,
        dst: RegId,
        src: RegId,
        op: impl FnOnce(&mut Assembler, Xmm, Xmm),
    ) {
        self.asm.movq_xr(Xmm::Xmm0, host(dst));
        self.asm.movq_xr(Xmm::Xmm1, host(src));
        op(&mut self.asm, Xmm::Xmm0, Xmm::Xmm1);
        self.asm.movq_rx(host(dst), Xmm::Xmm0);
    }

    /// Signed division through `idiv`, with an explicit zero-divisor check
    /// and a wrapping path for `rhs == -1` (which would fault in `idiv`
    /// for `i64::MIN / -1`).
    fn emit_division(&mut self, bc: usize, dst: RegId, src: RegId, kind: Division) {
        let (dst, src) = (host(dst), host(src));

        self.asm.test_rr(src, src);
        let nonzero = self.asm.jcc_rel32(Cond::Ne);
        self.emit_panic_jump(PanicReason::DivideByZero, bc);
        let here = self.asm.offset();
        self.asm.patch_rel32(nonzero, here);

        self.asm.cmp_ri(src, -1);
        let divide = self.asm.jcc_rel32(Cond::Ne);
        match kind {
            Division::Quotient => self.asm.neg_r(dst),
            Division::Remainder => self.asm.xor_rr(dst, dst),
        }
        let done = self.asm.jmp_rel32();

        let here = self.asm.offset();
        self.asm.patch_rel32(divide, here);
        self.asm.mov_rr(Reg::Rax, dst);
        self.asm.cqo();
        self.asm.idiv_r(src);
        match kind {
            Division::Quotient => self.asm.mov_rr(dst, Reg::Rax),
            Division::Remainder => self.asm.mov_rr(dst, Reg::Rdx),
        }

        let here = self.asm.offset();
        self.asm.patch_rel32(done, here);
    }

    fn emit_trystart(&mut self, bc: usize, catch: i64) {
        self.asm.mov_rm(
            Reg::Rax,
            VM_CTX,
            Self::ctx_disp(offset_of!(JitContext, try_len)),
        );
        self.asm.cmp_ri(Reg::Rax, VM_TRY_STACK_LIMIT as i32);
        let ok = self.asm.jcc_rel32(Cond::B);
        self.emit_panic_jump(PanicReason::TryStackOverflow, bc);
        let here = self.asm.offset();
        self.asm.patch_rel32(ok, here);

        self.asm
            .imul_rri(Reg::Rax, Reg::Rax, std::mem::size_of::<crate::vm::TryScope>() as i32);
        self.asm.add_rm(
            Reg::Rax,
            VM_CTX,
            Self::ctx_disp(offset_of!(JitContext, try_stack)),
        );
        self.asm.mov_mr(Reg::Rax, 0, Reg::Rsp);
        self.asm.mov_mr(Reg::Rax, 8, host(RegId::SP));
        // The catch machine-code offset; patched once layout is known.
        self.asm.mov_mi32(Reg::Rax, 16, 0);
        let at = self.asm.offset() - 4;
        self.patches.push(Patch {
            at,
            target: catch,
            kind: PatchKind::McOffset,
        });
        self.asm
            .inc_m64(VM_CTX, Self::ctx_disp(offset_of!(JitContext, try_len)));
    }

    fn emit_tryend(&mut self, bc: usize) {
        self.asm
            .cmp_mi8(VM_CTX, Self::ctx_disp(offset_of!(JitContext, try_len)), 0);
        let ok = self.asm.jcc_rel32(Cond::Ne);
        self.emit_panic_jump(PanicReason::TryStackUnderflow, bc);
        let here = self.asm.offset();
        self.asm.patch_rel32(ok, here);
        self.asm
            .dec_m64(VM_CTX, Self::ctx_disp(offset_of!(JitContext, try_len)));
    }

    /// The syscall trampoline: save the Soil registers and the two
    /// pinned pointers, marshal the VM pointer plus `a..e` into the C ABI
    /// argument registers, align the stack, call the handler, restore, and
    /// write back the declared return values. Afterwards, apply any panic
    /// the handler raised and leave generated code if it requested a halt.
    fn emit_syscall(&mut self, number: u8, bc: usize) {
        let entry = self.syscalls.entry(number);
        let Some(handler) = entry.handler else {
            self.emit_panic_jump(PanicReason::SyscallNotImplemented, bc);
            return;
        };

        let asm = &mut self.asm;

        for reg in SOIL_REGS {
            asm.push_r(reg);
        }
        asm.push_r(MEM_BASE);
        asm.push_r(VM_CTX);

        asm.mov_rr(Reg::Rdi, VM_CTX);
        asm.mov_rr(Reg::Rsi, host(RegId::A));
        asm.mov_rr(Reg::Rdx, host(RegId::B));
        asm.mov_rr(Reg::Rcx, host(RegId::C));
        asm.mov_rr(Reg::R8, host(RegId::D));
        asm.mov_rr(Reg::R9, host(RegId::E));

        // Align rsp to 16 bytes for the call, remembering the previous
        // value in rbp (its own value is already saved above).
        asm.mov_rr(Reg::Rbp, Reg::Rsp);
        asm.and_ri(Reg::Rsp, -16);
        asm.mov_ri64(Reg::Rax, handler as usize as i64);
        asm.call_r(Reg::Rax);
        asm.mov_rr(Reg::Rsp, Reg::Rbp);

        asm.pop_r(VM_CTX);
        asm.pop_r(MEM_BASE);
        for reg in SOIL_REGS.iter().rev() {
            asm.pop_r(*reg);
        }

        match entry.ret {
            RetArity::Zero => (),
            RetArity::One => asm.mov_rr(host(RegId::A), Reg::Rax),
            RetArity::Pair => {
                asm.mov_rr(host(RegId::A), Reg::Rax);
                asm.mov_rr(host(RegId::B), Reg::Rdx);
            }
        }

        // A panic raised by the handler takes effect now.
        asm.cmp_mi8(
            VM_CTX,
            Self::ctx_disp(offset_of!(JitContext, pending_panic)),
            0,
        );
        let no_panic = self.asm.jcc_rel32(Cond::E);
        {
            let panic_stub = self.panic_stub;
            let asm = &mut self.asm;
            asm.mov_r32m(
                Reg::Rsi,
                VM_CTX,
                Self::ctx_disp(offset_of!(JitContext, pending_panic)),
            );
            asm.dec_r32(Reg::Rsi);
            asm.mov_mi32(
                VM_CTX,
                Self::ctx_disp(offset_of!(JitContext, pending_panic)),
                0,
            );
            asm.mov_ri32u(Reg::Rdx, bc as u32);
            let at = asm.jmp_rel32();
            asm.patch_rel32(at, panic_stub);
        }
        let here = self.asm.offset();
        self.asm.patch_rel32(no_panic, here);

        // `exit` and `execute` leave generated code through the exit thunk.
        self.asm.cmp_mi8(
            VM_CTX,
            Self::ctx_disp(offset_of!(JitContext, halt)),
            0,
        );
        let keep_running = self.asm.jcc_rel32(Cond::E);
        let exit_thunk = self.exit_thunk;
        let at = self.asm.jmp_rel32();
        self.asm.patch_rel32(at, exit_thunk);
        let here = self.asm.offset();
        self.asm.patch_rel32(keep_running, here);
    }

    /// Resolve the patch list: rewrite every recorded field from the
    /// offset maps. Targets that are not an instruction start (or lie
    /// outside the bytecode) resolve to the invalid-target thunk, so the
    /// panic stays lazy, exactly like the interpreter's.
    fn resolve_patches(&mut self, invalid_target_thunk: usize) {
        for patch in &self.patches {
            let mc = usize::try_from(patch.target)
                .ok()
                .and_then(|t| self.map_bc_to_mc.get(t).copied())
                .filter(|mc| *mc != NO_MAPPING)
                .map(|mc| mc as usize)
                .unwrap_or(invalid_target_thunk);

            match patch.kind {
                PatchKind::Rel32 => self.asm.patch_rel32(patch.at, mc),
                PatchKind::McOffset => self.asm.write_i32(patch.at, mc as i32),
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Division {
    Quotient,
    Remainder,
}

#[derive(Clone, Copy)]
enum FloatTest {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}
