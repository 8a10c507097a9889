use tracing::debug;

use soil_asm::RegId;

use crate::image::Image;

use super::Vm;

impl Vm {
    /// Reset all execution state: registers zeroed except `sp = mem_size`,
    /// memory reinitialized from the image's initial memory section, both
    /// internal stacks emptied, `pc = 0`.
    pub fn reset(&mut self) {
        self.ctx.registers = [0; RegId::COUNT];
        self.ctx.registers[usize::from(RegId::SP)] = self.params.mem_size as u64;
        self.ctx.try_len = 0;
        self.ctx.pending_panic = 0;
        self.ctx.halt = 0;
        self.ctx.exit_code = 0;
        self.frames.clear();
        self.pc = 0;

        self.memory.fill(0);
        let len = self.initial_memory.len();
        self.memory[..len].copy_from_slice(&self.initial_memory);
    }

    /// Replace the loaded program, as the `execute` syscall does, and reset.
    ///
    /// The image is expected to have been parsed against this VM's
    /// `mem_size`, so its initial memory always fits.
    pub fn load_image(&mut self, image: Image) {
        debug!(
            name = image.name().unwrap_or("<unnamed>"),
            bytecode_len = image.bytecode().len(),
            "replacing program",
        );

        self.name = image.name().map(str::to_owned);
        let (bytecode, initial_memory, labels) = image.into_parts();
        self.starts = Vm::instruction_starts(&bytecode);
        self.bytecode = bytecode;
        self.initial_memory = initial_memory;
        self.labels = labels;
        self.reset();
    }
}
