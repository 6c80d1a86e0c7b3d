//! Syscall demultiplexer (spec.md §6 "Syscall ABI"): `int 0x80` lands in
//! [`crate::arch::x86_64::syscall::int80_dispatch`], which calls
//! [`dispatch`] with the six argument registers already in hand.
//!
//! Negative return values in `[-4095, -1]` are errors, matching the
//! convention spec.md §6 calls out explicitly.

pub mod memory;
pub mod process;
pub mod signal;
pub mod time;

use crate::error::KernelError;

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Read = 0,
    Write = 1,
    Close = 3,
    Lseek = 8,
    Mmap = 9,
    Munmap = 11,
    Brk = 12,
    Fork = 57,
    Execve = 59,
    Exit = 60,
    Wait4 = 61,
    Kill = 62,
    Fstat = 5,
    Sigaction = 13,
    Getpid = 39,
    Getppid = 110,
    Gettid = 186,
    Gettimeofday = 96,
    Yield = 24,
}

impl TryFrom<u64> for Syscall {
    type Error = ();

    fn try_from(value: u64) -> Result<Self, ()> {
        Ok(match value {
            0 => Syscall::Read,
            1 => Syscall::Write,
            3 => Syscall::Close,
            5 => Syscall::Fstat,
            8 => Syscall::Lseek,
            9 => Syscall::Mmap,
            11 => Syscall::Munmap,
            12 => Syscall::Brk,
            13 => Syscall::Sigaction,
            24 => Syscall::Yield,
            39 => Syscall::Getpid,
            57 => Syscall::Fork,
            59 => Syscall::Execve,
            60 => Syscall::Exit,
            61 => Syscall::Wait4,
            62 => Syscall::Kill,
            96 => Syscall::Gettimeofday,
            110 => Syscall::Getppid,
            186 => Syscall::Gettid,
            _ => return Err(()),
        })
    }
}

/// Negative errno-style encoding of a `KernelError` (spec.md §6: "negative
/// return values in `[-4095, -1]` are error codes").
fn errno(err: KernelError) -> i64 {
    let code: i64 = match err {
        KernelError::BadArgs => 1,
        KernelError::NotCanonical => 2,
        KernelError::BadEntity => 3,
        KernelError::Dangling => 4,
        KernelError::NoSuch => 5,
        KernelError::Redefined => 6,
        KernelError::Busy => 7,
        KernelError::BadAlloc => 8,
        KernelError::TooMany => 9,
        KernelError::TooLess => 10,
        KernelError::TooBig => 11,
        KernelError::TooSmall => 12,
        KernelError::Limits => 13,
        KernelError::Depleted => 14,
        KernelError::NoRead => 15,
        KernelError::NoWrite => 16,
        KernelError::NoOperations => 17,
        KernelError::Impilict => 18,
        KernelError::NotInit => 19,
        KernelError::NotRooted => 20,
        KernelError::ErrReturn => 21,
        KernelError::Overflow => 22,
        KernelError::BadSystemcall => 23,
        KernelError::CannotLookup => 24,
        KernelError::BadEntry => 25,
        KernelError::NotRecorded => 26,
        KernelError::Missing => 27,
    };
    -code
}

/// The single entry point `int80_dispatch` calls. Returns a value meant
/// to be cast straight into `RAX`: non-negative on success, a small
/// negative errno on failure.
pub fn dispatch(num: u64, a1: u64, a2: u64, a3: u64, a4: u64, a5: u64, a6: u64) -> i64 {
    let syscall = match Syscall::try_from(num) {
        Ok(s) => s,
        Err(()) => return errno(KernelError::BadSystemcall),
    };
    let _ = a6;

    let result = match syscall {
        Syscall::Read => process::sys_read(a1 as i32, a2, a3 as usize),
        Syscall::Write => process::sys_write(a1 as i32, a2, a3 as usize),
        Syscall::Close => process::sys_close(a1 as i32),
        Syscall::Lseek => process::sys_lseek(a1 as i32, a2 as i64, a3 as u32),
        Syscall::Fstat => process::sys_fstat(a1 as i32, a2),
        Syscall::Mmap => memory::sys_mmap(a1, a2 as usize, a3 as u32),
        Syscall::Munmap => memory::sys_munmap(a1, a2 as usize),
        Syscall::Brk => memory::sys_brk(a1),
        Syscall::Fork => process::sys_fork(),
        Syscall::Execve => process::sys_execve(a1, a2, a3),
        Syscall::Exit => {
            process::sys_exit(a1 as i32);
            Ok(0)
        }
        Syscall::Wait4 => process::sys_wait4(a1 as i64, a2, a3 as u32),
        Syscall::Kill => signal::sys_kill(a1, a2 as i32),
        Syscall::Sigaction => signal::sys_sigaction(a1 as i32, a2, a3),
        Syscall::Getpid => process::sys_getpid(),
        Syscall::Getppid => process::sys_getppid(),
        Syscall::Gettid => process::sys_gettid(),
        Syscall::Gettimeofday => time::sys_gettimeofday(a1),
        Syscall::Yield => {
            crate::sched::scheduler::yield_now();
            Ok(0)
        }
    };

    match result {
        Ok(value) => value as i64,
        Err(e) => errno(e),
    }
}
