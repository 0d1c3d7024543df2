//! Syscall gate: fixed number table, dispatch, and the non-filesystem
//! syscalls (`exit`, `getpid`, `yield`).
//!
//! The entry trampoline in `arch::x86_64::syscall` lands in
//! [`syscall_handler`] with the syscall number in `arg0` and up to five
//! arguments already moved into the standard C calling convention
//! (`rdi, rsi, rdx, rcx, r8, r9` — the trampoline itself moves the fourth
//! argument out of R10 into RCX, since R10 is where SYSCALL's ABI puts it
//! to avoid clobbering RCX with the return address). Unknown or
//! unregistered numbers, and any error surfaced by a handler, return the
//! negative errno the handler produced via `KernelError::to_errno`.

mod filesystem;

use filesystem::*;

/// Fixed syscall numbers. Any value not listed here dispatches to the
/// catch-all `-1` case in [`handle_syscall`].
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Exit = 0,
    Write = 1,
    Read = 2,
    Open = 3,
    Close = 4,
    GetPid = 5,
    Yield = 11,
    Lseek = 13,
    Stat = 14,
    Fstat = 15,
    Mkdir = 16,
    Rmdir = 17,
    Getdents = 18,
    Unlink = 19,
}

impl TryFrom<usize> for Syscall {
    type Error = ();

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Syscall::Exit),
            1 => Ok(Syscall::Write),
            2 => Ok(Syscall::Read),
            3 => Ok(Syscall::Open),
            4 => Ok(Syscall::Close),
            5 => Ok(Syscall::GetPid),
            11 => Ok(Syscall::Yield),
            13 => Ok(Syscall::Lseek),
            14 => Ok(Syscall::Stat),
            15 => Ok(Syscall::Fstat),
            16 => Ok(Syscall::Mkdir),
            17 => Ok(Syscall::Rmdir),
            18 => Ok(Syscall::Getdents),
            19 => Ok(Syscall::Unlink),
            _ => Err(()),
        }
    }
}

/// Syscall entry point called by the trampoline in
/// `arch::x86_64::syscall::syscall_entry`.
#[no_mangle]
pub extern "C" fn syscall_handler(
    syscall_num: usize,
    arg1: usize,
    arg2: usize,
    arg3: usize,
    arg4: usize,
    arg5: usize,
) -> isize {
    match Syscall::try_from(syscall_num) {
        Ok(syscall) => handle_syscall(syscall, arg1, arg2, arg3, arg4, arg5),
        Err(()) => -1,
    }
}

fn handle_syscall(syscall: Syscall, arg1: usize, arg2: usize, arg3: usize, arg4: usize, _arg5: usize) -> isize {
    match syscall {
        Syscall::Exit => sys_exit(arg1),
        Syscall::Write => sys_write(arg1, arg2, arg3),
        Syscall::Read => sys_read(arg1, arg2, arg3),
        Syscall::Open => sys_open(arg1, arg2, arg3),
        Syscall::Close => sys_close(arg1),
        Syscall::GetPid => sys_getpid(),
        Syscall::Yield => sys_yield(),
        Syscall::Lseek => sys_lseek(arg1, arg2 as isize, arg3),
        Syscall::Stat => sys_stat(arg1, arg2),
        Syscall::Fstat => sys_fstat(arg1, arg2),
        Syscall::Mkdir => sys_mkdir(arg1, arg2),
        Syscall::Rmdir => sys_rmdir(arg1),
        Syscall::Getdents => sys_getdents(arg1, arg2, arg3),
        Syscall::Unlink => sys_unlink(arg1),
    }
}

/// Halt the CPU. There is no real process model to tear down (see the
/// kernel's single-flow design), so `exit` is the terminal path for the
/// one flow that ever calls it.
fn sys_exit(_code: usize) -> isize {
    crate::arch::x86_64::halt();
}

/// This kernel runs a single flow; `getpid` always reports pid 1.
fn sys_getpid() -> isize {
    1
}

/// No scheduler to yield to; park until the next interrupt.
fn sys_yield() -> isize {
    crate::arch::x86_64::idle();
    0
}
