//! x86-64 JIT backend.
//!
//! The whole program is translated once, up front: every bytecode
//! instruction lowers to a fixed host-code sequence over the register map
//! (`sp..f` in `r8..r15`, `rbp` the memory base, `rbx` the VM context).
//! Branch displacements are recorded as patches and rewritten after layout;
//! two offset maps relate bytecode and machine code in both directions.
//! The code buffer is write-protected and made executable before the entry
//! shim transfers control into it.
//!
//! Panics unwind through the same try stack the interpreter uses; with no
//! active scope the emitted panic stub hands off to [`fatal_panic`], which
//! renders the stack trace by walking the host return addresses through the
//! machine-code map.

use soil_asm::PanicReason;

use crate::backtrace::Backtrace;
use crate::error::JitError;
use crate::state::{ExecuteState, ProgramState};
use crate::vm::{Vm, HALT_EXIT, HALT_RELOAD};

mod asm;
mod buffer;
mod translate;

pub use translate::{Patch, PatchKind, NO_MAPPING};

use buffer::ExecutableBuffer;

/// A program translated to executable host code.
#[derive(Debug)]
pub struct CompiledProgram {
    buffer: ExecutableBuffer,
    /// A readable copy of the emitted code, kept for inspection.
    code: Vec<u8>,
    map_bc_to_mc: Vec<u32>,
    map_mc_to_bc: Vec<u32>,
    patches: Vec<Patch>,
    exit_thunk: usize,
    invalid_target_thunk: usize,
}

impl CompiledProgram {
    /// Translate the VM's loaded bytecode.
    ///
    /// Syscall handler addresses are baked into the emitted code, so the
    /// VM's syscall table must be fully populated first.
    pub fn translate(vm: &Vm) -> Result<Self, JitError> {
        let translation =
            translate::translate(vm.bytecode(), vm.params().mem_size, vm.syscalls())?;

        let mut buffer = ExecutableBuffer::allocate(translation.code.len())?;
        buffer.fill(&translation.code);
        buffer.make_executable()?;

        tracing::debug!(
            bytecode_len = vm.bytecode().len(),
            code_len = translation.code.len(),
            buffer_len = buffer.len(),
            patches = translation.patches.len(),
            "translated program",
        );

        Ok(Self {
            buffer,
            code: translation.code,
            map_bc_to_mc: translation.map_bc_to_mc,
            map_mc_to_bc: translation.map_mc_to_bc,
            patches: translation.patches,
            exit_thunk: translation.exit_thunk,
            invalid_target_thunk: translation.invalid_target_thunk,
        })
    }

    /// The emitted machine code.
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Machine-code offset of each bytecode instruction start. The final
    /// entry maps the one-past-the-end offset to the exit epilogue;
    /// non-boundary bytes hold [`NO_MAPPING`].
    pub fn map_bc_to_mc(&self) -> &[u32] {
        &self.map_bc_to_mc
    }

    /// Bytecode offset of the instruction containing each emitted byte
    /// ([`NO_MAPPING`] for the shim, stubs, and thunks).
    pub fn map_mc_to_bc(&self) -> &[u32] {
        &self.map_mc_to_bc
    }

    /// The patch records resolved during translation.
    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// Machine-code offset of the shared thunk taken by branches whose
    /// target is not an instruction boundary.
    pub fn invalid_target_thunk(&self) -> usize {
        self.invalid_target_thunk
    }

    /// Transfer control to the translated program and run it to an exit,
    /// completion, or reload request. Uncaught panics do not return; they
    /// report through [`fatal_panic`].
    pub fn run(&self, vm: &mut Vm) -> ExecuteState {
        let base = self.buffer.as_ptr() as u64;
        vm.ctx.code_base = base;
        vm.ctx.code_len = self.code.len() as u64;
        vm.ctx.mc_to_bc = self.map_mc_to_bc.as_ptr();
        vm.ctx.exit_thunk = base + self.exit_thunk as u64;
        vm.ctx.halt = 0;
        vm.ctx.pending_panic = 0;

        // Safety: the buffer holds the entry shim at offset zero, emitted
        // for exactly this signature, and is protected read+execute.
        let entry: extern "C" fn(*mut Vm) =
            unsafe { std::mem::transmute(self.buffer.as_ptr()) };
        entry(vm as *mut Vm);

        match std::mem::replace(&mut vm.ctx.halt, 0) {
            HALT_EXIT => ExecuteState::Exit(vm.ctx.exit_code),
            HALT_RELOAD => ExecuteState::Reload,
            _ => ExecuteState::Finished,
        }
    }
}

/// Translate and run the VM's program to completion, retranslating when the
/// `execute` syscall replaces it. The previous code buffer is unmapped
/// before the replacement translation runs.
pub fn run_program(vm: &mut Vm) -> Result<ProgramState, JitError> {
    loop {
        let compiled = CompiledProgram::translate(vm)?;
        match compiled.run(vm) {
            ExecuteState::Exit(status) => return Ok(ProgramState::Exit(status)),
            ExecuteState::Finished => return Ok(ProgramState::Exit(0)),
            ExecuteState::Reload => {
                let image = vm
                    .take_pending_execute()
                    .expect("reload state implies a pending image");
                vm.load_image(image);
            }
            ExecuteState::Proceed => unreachable!("generated code runs to a terminal state"),
        }
    }
}

/// Host side of the emitted panic stub's fatal path.
///
/// Renders the stack trace and register dump to stderr, writes the crash
/// dump, and exits the process. The frames come from walking the host stack
/// between the faulting `rsp` and the entry frame: every word in that range
/// is either a Soil return address or the sentinel.
pub(crate) extern "C" fn fatal_panic(vm: *mut Vm, reason: u32, bc: u32, rsp: u64) -> ! {
    // Safety: the panic stub passes the live VM context.
    let vm = unsafe { &mut *vm };
    let reason = PanicReason::from(reason as u8);

    let mut frames = vec![u64::from(bc)];
    let mut at = rsp;
    while at < vm.ctx.entry_rsp {
        // Safety: the range up to `entry_rsp` is the live host stack of the
        // generated code.
        let value = unsafe { *(at as *const u64) };
        at += 8;

        if value == vm.ctx.exit_thunk {
            break;
        }
        if value >= vm.ctx.code_base && value < vm.ctx.code_base + vm.ctx.code_len {
            let mc = (value - vm.ctx.code_base) as usize;
            // Safety: `mc_to_bc` has one entry per emitted byte.
            let frame_bc = unsafe { *vm.ctx.mc_to_bc.add(mc) };
            if frame_bc != NO_MAPPING {
                frames.push(u64::from(frame_bc));
            }
        }
    }

    let backtrace = Backtrace::from_parts(frames, vm.ctx.registers, vm.labels().clone());

    eprintln!("vm panicked: {reason}");
    eprint!("{backtrace}");

    if let Err(error) = vm.write_crash_dump() {
        tracing::debug!(%error, "failed to write crash dump");
    }

    std::process::exit(101);
}
