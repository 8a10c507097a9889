//! Default host syscall handlers.
//!
//! These implement the standard Soil handler set over the host's stdio and
//! file descriptors. The `ui_dimensions`/`ui_render` slots are left
//! unimplemented here; graphical front-ends install their own handlers.
//!
//! Failure policy per handler: memory range violations panic the VM; I/O
//! errors surface as the documented sentinel (`0` for file descriptors and
//! byte counts).

use std::io::{Read, Write};

use tracing::debug;

use soil_asm::{PanicReason, Word};

use crate::image::Image;
use crate::vm::Vm;

use super::{RetArity, SyscallRet, SyscallTable};

/// Install the default handler set into `table`.
pub fn install(table: &mut SyscallTable) {
    table.set(0, sys_exit, RetArity::Zero, "exit");
    table.set(1, sys_print, RetArity::Zero, "print");
    table.set(2, sys_log, RetArity::Zero, "log");
    #[cfg(unix)]
    {
        table.set(3, sys_create, RetArity::One, "create");
        table.set(4, sys_open_reading, RetArity::One, "open_reading");
        table.set(5, sys_open_writing, RetArity::One, "open_writing");
        table.set(6, sys_read, RetArity::One, "read");
        table.set(7, sys_write, RetArity::One, "write");
        table.set(8, sys_close, RetArity::One, "close");
    }
    table.set(9, sys_argc, RetArity::One, "argc");
    table.set(10, sys_arg, RetArity::One, "arg");
    table.set(11, sys_read_input, RetArity::One, "read_input");
    table.set(12, sys_execute, RetArity::Zero, "execute");
}

/// Reborrow the raw VM pointer handed to a handler.
///
/// # Safety contract
///
/// The trampoline always passes the live VM, and the VM is single-threaded,
/// so the handler has exclusive access for the duration of the call.
fn vm_mut<'a>(vm: *mut Vm) -> &'a mut Vm {
    unsafe { &mut *vm }
}

extern "C" fn sys_exit(vm: *mut Vm, status: Word, _: Word, _: Word, _: Word, _: Word) -> SyscallRet {
    vm_mut(vm).request_exit(status);
    SyscallRet::none()
}

fn write_stream(vm: &mut Vm, stream: &mut dyn Write, buf: Word, len: Word) {
    match vm.mem_slice(buf, len) {
        Ok(bytes) => {
            let _ = stream.write_all(bytes);
            let _ = stream.flush();
        }
        Err(reason) => vm.raise_panic(reason),
    }
}

extern "C" fn sys_print(vm: *mut Vm, buf: Word, len: Word, _: Word, _: Word, _: Word) -> SyscallRet {
    write_stream(vm_mut(vm), &mut std::io::stdout(), buf, len);
    SyscallRet::none()
}

extern "C" fn sys_log(vm: *mut Vm, buf: Word, len: Word, _: Word, _: Word, _: Word) -> SyscallRet {
    write_stream(vm_mut(vm), &mut std::io::stderr(), buf, len);
    SyscallRet::none()
}

extern "C" fn sys_argc(vm: *mut Vm, _: Word, _: Word, _: Word, _: Word, _: Word) -> SyscallRet {
    SyscallRet::one(vm_mut(vm).args().len() as Word)
}

extern "C" fn sys_arg(
    vm: *mut Vm,
    index: Word,
    buf: Word,
    len: Word,
    _: Word,
    _: Word,
) -> SyscallRet {
    let vm = vm_mut(vm);

    let Some(arg) = vm.args().get(index as usize).cloned() else {
        return SyscallRet::one(0);
    };

    match vm.mem_slice_mut(buf, len) {
        Ok(target) => {
            let written = arg.len().min(target.len());
            target[..written].copy_from_slice(&arg.as_bytes()[..written]);
            SyscallRet::one(written as Word)
        }
        Err(reason) => {
            vm.raise_panic(reason);
            SyscallRet::none()
        }
    }
}

extern "C" fn sys_read_input(
    vm: *mut Vm,
    buf: Word,
    len: Word,
    _: Word,
    _: Word,
    _: Word,
) -> SyscallRet {
    let vm = vm_mut(vm);

    match vm.mem_slice_mut(buf, len) {
        Ok(target) => {
            let read = std::io::stdin().read(target).unwrap_or(0);
            SyscallRet::one(read as Word)
        }
        Err(reason) => {
            vm.raise_panic(reason);
            SyscallRet::none()
        }
    }
}

extern "C" fn sys_execute(
    vm: *mut Vm,
    binary: Word,
    binary_len: Word,
    _: Word,
    _: Word,
    _: Word,
) -> SyscallRet {
    let vm = vm_mut(vm);

    let bytes = match vm.mem_slice(binary, binary_len) {
        Ok(bytes) => bytes.to_vec(),
        Err(reason) => {
            vm.raise_panic(reason);
            return SyscallRet::none();
        }
    };

    match Image::parse(&bytes, vm.params().mem_size) {
        Ok(image) => vm.request_execute(image),
        Err(error) => {
            debug!(%error, "execute syscall received an invalid binary");
            vm.raise_panic(PanicReason::SyscallFailure);
        }
    }

    SyscallRet::none()
}

#[cfg(unix)]
mod files {
    use super::*;
    use std::os::raw::c_int;

    /// Open a file named by `len` bytes of linear memory at `ptr`.
    fn open_at(vm: &mut Vm, ptr: Word, len: Word, flags: c_int, mode: c_int) -> SyscallRet {
        let fd = vm.with_nul_terminated(ptr, len, |name| unsafe {
            libc::open(name.cast(), flags, mode)
        });

        match fd {
            Ok(fd) if fd >= 0 => SyscallRet::one(fd as Word),
            // The 0 sentinel is the documented failure value, even though 0
            // is a valid descriptor for stdin.
            Ok(_) => SyscallRet::one(0),
            Err(reason) => {
                vm.raise_panic(reason);
                SyscallRet::none()
            }
        }
    }

    pub extern "C" fn sys_create(
        vm: *mut Vm,
        name: Word,
        name_len: Word,
        mode: Word,
        _: Word,
        _: Word,
    ) -> SyscallRet {
        open_at(
            vm_mut(vm),
            name,
            name_len,
            libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
            mode as c_int,
        )
    }

    pub extern "C" fn sys_open_reading(
        vm: *mut Vm,
        name: Word,
        name_len: Word,
        flags: Word,
        mode: Word,
        _: Word,
    ) -> SyscallRet {
        open_at(
            vm_mut(vm),
            name,
            name_len,
            libc::O_RDONLY | flags as c_int,
            mode as c_int,
        )
    }

    pub extern "C" fn sys_open_writing(
        vm: *mut Vm,
        name: Word,
        name_len: Word,
        flags: Word,
        mode: Word,
        _: Word,
    ) -> SyscallRet {
        open_at(
            vm_mut(vm),
            name,
            name_len,
            libc::O_WRONLY | flags as c_int,
            mode as c_int,
        )
    }

    pub extern "C" fn sys_read(
        vm: *mut Vm,
        fd: Word,
        buf: Word,
        len: Word,
        _: Word,
        _: Word,
    ) -> SyscallRet {
        let vm = vm_mut(vm);

        match vm.mem_slice_mut(buf, len) {
            Ok(target) => {
                let read = unsafe {
                    libc::read(fd as c_int, target.as_mut_ptr().cast(), target.len())
                };
                SyscallRet::one(read.max(0) as Word)
            }
            Err(reason) => {
                vm.raise_panic(reason);
                SyscallRet::none()
            }
        }
    }

    pub extern "C" fn sys_write(
        vm: *mut Vm,
        fd: Word,
        buf: Word,
        len: Word,
        _: Word,
        _: Word,
    ) -> SyscallRet {
        let vm = vm_mut(vm);

        match vm.mem_slice(buf, len) {
            Ok(bytes) => {
                let written =
                    unsafe { libc::write(fd as c_int, bytes.as_ptr().cast(), bytes.len()) };
                SyscallRet::one(written.max(0) as Word)
            }
            Err(reason) => {
                vm.raise_panic(reason);
                SyscallRet::none()
            }
        }
    }

    pub extern "C" fn sys_close(
        vm: *mut Vm,
        fd: Word,
        _: Word,
        _: Word,
        _: Word,
        _: Word,
    ) -> SyscallRet {
        let _ = vm;
        let ok = unsafe { libc::close(fd as c_int) } == 0;
        SyscallRet::one(ok as Word)
    }
}

#[cfg(unix)]
use files::{sys_close, sys_create, sys_open_reading, sys_open_writing, sys_read, sys_write};
