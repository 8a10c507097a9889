//! JIT backend: offset maps, patch arithmetic, and end-to-end parity with
//! the interpreter.

#![cfg(all(target_arch = "x86_64", unix))]

use soil_vm::jit::{self, CompiledProgram, PatchKind, NO_MAPPING};
use soil_vm::prelude::*;
use soil_vm::syscall::{RetArity, SyscallRet};

fn vm_with(ops: &[Instruction]) -> Vm {
    Vm::from_image(Image::from_bytecode(ops.iter().copied().collect()))
}

/// Bytecode offsets of every instruction start.
fn instruction_offsets(bytecode: &[u8]) -> Vec<usize> {
    instructions(bytecode).map(|(offset, _)| offset).collect()
}

fn fib10_program() -> Vec<Instruction> {
    let loop_start = 9;
    let end = loop_start + 3 + 2 + 1 + 9 + 2 + 2 + 2 + 2 + 3 + 2 + 9;
    vec![
        op::moveib(RegId::A, 0),
        op::moveib(RegId::B, 1),
        op::moveib(RegId::C, 10),
        op::moveib(RegId::D, 0),
        op::cmp(RegId::C, RegId::D),
        op::isequal(),
        op::cjump(end),
        op::move_(RegId::D, RegId::A),
        op::add(RegId::D, RegId::B),
        op::move_(RegId::A, RegId::B),
        op::move_(RegId::B, RegId::D),
        op::moveib(RegId::E, 1),
        op::sub(RegId::C, RegId::E),
        op::jump(loop_start),
        op::syscall(0),
    ]
}

#[test]
fn offset_maps_are_bidirectional() {
    let vm = vm_with(&fib10_program());
    let compiled = CompiledProgram::translate(&vm).unwrap();

    let bc_to_mc = compiled.map_bc_to_mc();
    let mc_to_bc = compiled.map_mc_to_bc();

    for offset in instruction_offsets(vm.bytecode()) {
        let mc = bc_to_mc[offset];
        assert_ne!(mc, NO_MAPPING, "no translation for instruction at {offset}");
        assert_eq!(
            mc_to_bc[mc as usize], offset as u32,
            "map_mc_to_bc(map_bc_to_mc({offset})) diverged",
        );
    }

    // Non-boundary bytecode bytes have no machine-code mapping.
    assert_eq!(bc_to_mc[1], NO_MAPPING);
    // The one-past-the-end offset maps to the exit epilogue.
    assert_ne!(bc_to_mc[vm.bytecode().len()], NO_MAPPING);
}

#[test]
fn every_machine_byte_of_an_instruction_maps_back_to_it() {
    let vm = vm_with(&fib10_program());
    let compiled = CompiledProgram::translate(&vm).unwrap();

    let offsets = instruction_offsets(vm.bytecode());
    let bc_to_mc = compiled.map_bc_to_mc();
    let mc_to_bc = compiled.map_mc_to_bc();

    for window in offsets.windows(2) {
        let (start, next) = (window[0], window[1]);
        let mc_start = bc_to_mc[start] as usize;
        let mc_end = bc_to_mc[next] as usize;
        assert!(mc_start < mc_end);
        for mc in mc_start..mc_end {
            assert_eq!(mc_to_bc[mc], start as u32);
        }
    }
}

#[test]
fn patches_resolve_to_relative_displacements() {
    let vm = vm_with(&fib10_program());
    let compiled = CompiledProgram::translate(&vm).unwrap();
    let code = compiled.code();

    let mut saw_rel32 = false;
    for patch in compiled.patches() {
        let target_mc = compiled.map_bc_to_mc()[patch.target as usize] as usize;
        let field = i32::from_le_bytes(code[patch.at..patch.at + 4].try_into().unwrap());

        match patch.kind {
            PatchKind::Rel32 => {
                saw_rel32 = true;
                assert_eq!(
                    field as i64,
                    target_mc as i64 - (patch.at as i64 + 4),
                    "patch at {} does not land on its target translation",
                    patch.at,
                );
            }
            PatchKind::McOffset => {
                assert_eq!(field as usize, target_mc);
            }
        }
    }
    assert!(saw_rel32, "the program contains branches");
}

#[test]
fn branch_to_instruction_middle_resolves_to_invalid_target_thunk() {
    let vm = vm_with(&[op::movei(RegId::A, 1), op::jump(4)]);
    let compiled = CompiledProgram::translate(&vm).unwrap();

    let jump_patch = compiled
        .patches()
        .iter()
        .find(|p| p.target == 4)
        .expect("jump patch recorded");
    let field = i32::from_le_bytes(
        compiled.code()[jump_patch.at..jump_patch.at + 4]
            .try_into()
            .unwrap(),
    );
    assert_eq!(
        (jump_patch.at as i64 + 4 + field as i64) as usize,
        compiled.invalid_target_thunk(),
    );
}

#[test]
fn fib_10_runs_to_55() {
    let mut vm = vm_with(&fib10_program());
    assert_eq!(jit::run_program(&mut vm).unwrap(), ProgramState::Exit(55));
    // The exit thunk spilled the register file.
    assert_eq!(vm.reg_get(RegId::A), 55);
}

#[test]
fn forward_jump_to_last_instruction_exits_cleanly() {
    // jump END_INSTRUCTION; nop; END_INSTRUCTION: ret
    let mut vm = vm_with(&[op::jump(10), op::nop(), op::ret()]);
    assert_eq!(jit::run_program(&mut vm).unwrap(), ProgramState::Exit(0));
}

#[test]
fn division_by_zero_unwinds_to_catch_target() {
    let catch = 9 + 10 + 10 + 2 + 1;
    let mut vm = vm_with(&[
        op::trystart(catch),
        op::movei(RegId::A, 1),
        op::movei(RegId::B, 0),
        op::div(RegId::A, RegId::B),
        op::tryend(),
        op::movei(RegId::A, 42),
        op::syscall(0),
    ]);

    assert_eq!(jit::run_program(&mut vm).unwrap(), ProgramState::Exit(42));
}

#[test]
fn panic_across_calls_restores_host_and_soil_stacks() {
    // trystart CATCH; movei a, 7; push a; call F; tryend;
    // CATCH: moveib a, 99; syscall 0
    // F: push a; panic
    let catch = 9 + 10 + 2 + 9 + 1;
    let f = catch + 3 + 2;
    let mut vm = vm_with(&[
        op::trystart(catch),
        op::movei(RegId::A, 7),
        op::push(RegId::A),
        op::call(f),
        op::tryend(),
        op::moveib(RegId::A, 99),
        op::syscall(0),
        op::push(RegId::A),
        op::panic(),
    ]);

    let mem_size = vm.params().mem_size as u64;
    assert_eq!(jit::run_program(&mut vm).unwrap(), ProgramState::Exit(99));
    assert_eq!(vm.reg_get(RegId::SP), mem_size);
}

#[test]
fn nested_call_ret_matches_interpreter() {
    let f = 10 + 10 + 9 + 9 + 9;
    let end = f + 2 + 2 + 2 + 1;
    let program = [
        op::movei(RegId::A, 3),
        op::movei(RegId::B, 4),
        op::call(f),
        op::call(f),
        op::jump(end),
        op::push(RegId::A),
        op::add(RegId::A, RegId::B),
        op::pop(RegId::A),
        op::ret(),
    ];

    let mut jit_vm = vm_with(&program);
    assert_eq!(jit::run_program(&mut jit_vm).unwrap(), ProgramState::Exit(0));

    let mut int_vm = vm_with(&program);
    int_vm.run().unwrap();

    assert_eq!(jit_vm.registers(), int_vm.registers());
}

extern "C" fn capture_print(
    vm: *mut Vm,
    buf: Word,
    len: Word,
    _: Word,
    _: Word,
    _: Word,
) -> SyscallRet {
    let vm = unsafe { &mut *vm };
    let bytes = vm.mem_slice(buf, len).expect("print range").to_vec();
    vm.host_data_mut::<Vec<u8>>()
        .expect("capture buffer")
        .extend_from_slice(&bytes);
    SyscallRet::none()
}

#[test]
fn hello_world_through_the_trampoline() {
    let image = Image::from_bytecode(
        [
            op::movei(RegId::A, 0),
            op::movei(RegId::B, 14),
            op::syscall(1),
            op::movei(RegId::A, 0),
            op::syscall(0),
        ]
        .into_iter()
        .collect(),
    )
    .with_initial_memory(b"Hello, world!\n".to_vec());

    let mut vm = Vm::from_image(image);
    vm.set_host_data(Vec::<u8>::new());
    // Handlers must be installed before translation bakes their addresses.
    vm.syscalls_mut()
        .set(1, capture_print, RetArity::Zero, "print");

    assert_eq!(jit::run_program(&mut vm).unwrap(), ProgramState::Exit(0));
    assert_eq!(vm.host_data::<Vec<u8>>().unwrap(), b"Hello, world!\n");
}

extern "C" fn return_pair(_: *mut Vm, _: Word, _: Word, _: Word, _: Word, _: Word) -> SyscallRet {
    SyscallRet::pair(0x2222, 0x3333)
}

#[test]
fn trampoline_preserves_uninvolved_registers() {
    let mut vm = vm_with(&[
        op::movei(RegId::C, 30),
        op::movei(RegId::D, 40),
        op::movei(RegId::E, 50),
        op::movei(RegId::F, 60),
        op::syscall(102),
        op::syscall(0),
    ]);
    vm.syscalls_mut()
        .set(102, return_pair, RetArity::Pair, "return_pair");

    assert_eq!(
        jit::run_program(&mut vm).unwrap(),
        ProgramState::Exit(0x2222)
    );
    assert_eq!(vm.reg_get(RegId::B), 0x3333);
    assert_eq!(vm.reg_get(RegId::C), 30);
    assert_eq!(vm.reg_get(RegId::D), 40);
    assert_eq!(vm.reg_get(RegId::E), 50);
    assert_eq!(vm.reg_get(RegId::F), 60);
}

#[test]
fn execute_syscall_retranslates_and_resumes() {
    let replacement = Image::from_bytecode(
        [op::moveib(RegId::A, 7), op::syscall(0)].into_iter().collect(),
    )
    .to_bytes();

    let outer = Image::from_bytecode(
        [
            op::movei(RegId::A, 0),
            op::movei(RegId::B, replacement.len() as i64),
            op::syscall(12),
        ]
        .into_iter()
        .collect(),
    )
    .with_initial_memory(replacement);

    let mut vm = Vm::from_image(outer);
    assert_eq!(jit::run_program(&mut vm).unwrap(), ProgramState::Exit(7));
}

#[test]
fn float_pipeline_matches_interpreter() {
    let program = [
        op::movei(RegId::A, f64::to_bits(2.5) as i64),
        op::movei(RegId::B, f64::to_bits(0.25) as i64),
        op::fadd(RegId::A, RegId::B),
        op::movei(RegId::C, f64::to_bits(f64::NAN) as i64),
        op::movei(RegId::D, f64::to_bits(1.0) as i64),
        op::fcmp(RegId::C, RegId::D),
        op::fisless(),
        op::floattoint(RegId::A),
        op::inttofloat(RegId::F),
    ];

    let mut jit_vm = vm_with(&program);
    assert_eq!(jit::run_program(&mut jit_vm).unwrap(), ProgramState::Exit(0));

    let mut int_vm = vm_with(&program);
    int_vm.run().unwrap();

    assert_eq!(jit_vm.registers(), int_vm.registers());
    assert_eq!(jit_vm.reg_get(RegId::ST), 0);
    assert_eq!(jit_vm.reg_get(RegId::A), 2);
}

#[test]
fn floattoint_of_nan_matches_interpreter_sentinel() {
    let program = [
        op::movei(RegId::A, f64::to_bits(f64::NAN) as i64),
        op::floattoint(RegId::A),
    ];

    let mut jit_vm = vm_with(&program);
    assert_eq!(jit::run_program(&mut jit_vm).unwrap(), ProgramState::Exit(0));
    assert_eq!(jit_vm.reg_get(RegId::A) as i64, i64::MIN);
}

#[test]
fn memory_ops_match_interpreter() {
    let program = [
        op::movei(RegId::A, 64),
        op::movei(RegId::B, -12345),
        op::store(RegId::A, RegId::B),
        op::load(RegId::C, RegId::A),
        op::moveib(RegId::D, 200),
        op::storeb(RegId::D, RegId::B),
        op::loadb(RegId::E, RegId::D),
        op::push(RegId::C),
        op::pop(RegId::F),
    ];

    let mut jit_vm = vm_with(&program);
    assert_eq!(jit::run_program(&mut jit_vm).unwrap(), ProgramState::Exit(0));

    let mut int_vm = vm_with(&program);
    int_vm.run().unwrap();

    assert_eq!(jit_vm.registers(), int_vm.registers());
    assert_eq!(jit_vm.memory()[..256], int_vm.memory()[..256]);
}

#[test]
fn out_of_bounds_store_is_caught_by_try_scope() {
    // trystart CATCH; movei a, mem_size; movei b, 1; store a b; tryend;
    // CATCH: moveib a, 3; syscall 0
    let catch = 9 + 10 + 10 + 2 + 1;
    let mem_size = VmParams::default().mem_size as i64;
    let mut vm = vm_with(&[
        op::trystart(catch),
        op::movei(RegId::A, mem_size),
        op::movei(RegId::B, 1),
        op::store(RegId::A, RegId::B),
        op::tryend(),
        op::moveib(RegId::A, 3),
        op::syscall(0),
    ]);

    assert_eq!(jit::run_program(&mut vm).unwrap(), ProgramState::Exit(3));
}

#[test]
fn malformed_tail_translates_to_a_lazy_panic() {
    // A truncated instruction only panics if control reaches it.
    let mut bytecode: Vec<u8> = [op::jump(9), op::ret()].into_iter().collect();
    bytecode.push(0xd1); // movei missing its operands
    let vm = Vm::from_image(Image::from_bytecode(bytecode));

    let compiled = CompiledProgram::translate(&vm).unwrap();
    assert_ne!(compiled.map_bc_to_mc()[10], NO_MAPPING);

    let mut vm = vm;
    assert_eq!(jit::run_program(&mut vm).unwrap(), ProgramState::Exit(0));
}
