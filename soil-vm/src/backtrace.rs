//! Backtrace capture for fatal VM panics.

use std::fmt;

use soil_asm::{RegId, Word};

use crate::consts::VM_REGISTER_COUNT;
use crate::image::Labels;
use crate::vm::Vm;

/// Runtime description of a fatal panic: the active call frames and the
/// register file at the moment of the panic.
///
/// Rendered with `Display` in the stack trace format front-ends print to
/// stderr: one line per frame with the bytecode offset in padded hex and the
/// covering label, then a register dump in decimal and hex.
#[derive(Debug, Clone)]
pub struct Backtrace {
    /// Bytecode offsets, innermost frame first.
    frames: Vec<u64>,
    registers: [Word; VM_REGISTER_COUNT],
    labels: Labels,
}

impl Backtrace {
    /// Capture a backtrace from a VM, with `pc` as the innermost frame.
    pub fn capture(vm: &Vm, pc: u64) -> Self {
        let mut frames = vec![pc];
        frames.extend(vm.frames.iter().rev());

        let mut registers = [0; VM_REGISTER_COUNT];
        registers.copy_from_slice(vm.registers());

        Self {
            frames,
            registers,
            labels: vm.labels().clone(),
        }
    }

    /// Assemble a backtrace from raw parts; the JIT's fatal path collects
    /// frames by walking the host stack.
    pub(crate) fn from_parts(
        frames: Vec<u64>,
        registers: [Word; VM_REGISTER_COUNT],
        labels: Labels,
    ) -> Self {
        Self {
            frames,
            registers,
            labels,
        }
    }

    /// Bytecode offsets of the active frames, innermost first.
    pub fn frames(&self) -> &[u64] {
        &self.frames
    }

    /// Register file at the moment of the panic.
    pub const fn registers(&self) -> &[Word] {
        &self.registers
    }
}

impl fmt::Display for Backtrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &frame in &self.frames {
            let label = self.labels.covering(frame).unwrap_or("<no label>");
            writeln!(f, "{frame:08x} {label}")?;
        }

        for id in 0..VM_REGISTER_COUNT {
            let reg = RegId::new(id as u8);
            let value = self.registers[id];
            writeln!(f, "{} = {} ({value:#x})", reg.name(), value as i64)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;

    #[test]
    fn render_includes_frames_and_registers() {
        let mut vm = Vm::from_image(Image::default());
        vm.reg_set(RegId::A, 55);
        vm.call_push(0x10).unwrap();

        let trace = Backtrace::capture(&vm, 0x42).to_string();

        let mut lines = trace.lines();
        assert_eq!(lines.next(), Some("00000042 <no label>"));
        assert_eq!(lines.next(), Some("00000010 <no label>"));
        assert!(trace.contains("a = 55 (0x37)"));
        assert!(trace.contains(&format!(
            "sp = {} ({:#x})",
            vm.params().mem_size,
            vm.params().mem_size
        )));
    }

    #[test]
    fn labels_resolve_to_covering_record() {
        let mut raw = b"soil".to_vec();
        // Bytecode section of 16 nops.
        raw.push(0);
        raw.extend_from_slice(&16u64.to_le_bytes());
        raw.extend_from_slice(&[0u8; 16]);
        // One label `entry` at offset 4.
        raw.push(3);
        let labels: Vec<u8> = {
            let mut p = 1u64.to_le_bytes().to_vec();
            p.extend_from_slice(&4u64.to_le_bytes());
            p.extend_from_slice(&5u64.to_le_bytes());
            p.extend_from_slice(b"entry");
            p
        };
        raw.extend_from_slice(&(labels.len() as u64).to_le_bytes());
        raw.extend_from_slice(&labels);

        let image = Image::parse(&raw, crate::consts::VM_DEFAULT_MEM_SIZE).unwrap();
        let vm = Vm::from_image(image);

        let trace = Backtrace::capture(&vm, 9).to_string();
        assert!(trace.starts_with("00000009 entry"));

        let trace = Backtrace::capture(&vm, 3).to_string();
        assert!(trace.starts_with("00000003 <no label>"));
    }
}
