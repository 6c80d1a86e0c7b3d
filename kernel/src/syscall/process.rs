//! Process-lifecycle syscalls (spec.md §6): `read`/`write`/`close`/
//! `lseek`/`fstat` against the caller's FD table, `fork`/`execve`/`exit`/
//! `wait4`/`getpid`/`getppid`/`gettid` against [`crate::process`].

extern crate alloc;

use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};
use crate::mm::VirtAddr;
use crate::process::fd::SeekFrom;
use crate::process::wait::WaitOptions;
use crate::process::{self};

/// Read a NUL-terminated byte string out of the calling process's address
/// space at `va`, translating page by page through the HHDM alias.
fn read_user_cstr(va: u64) -> KernelResult<Vec<u8>> {
    if va == 0 {
        return Ok(Vec::new());
    }
    let process = process::current_process().ok_or(KernelError::NotInit)?;
    let inner = process.inner();
    let space = inner.address_space.as_ref().ok_or(KernelError::NotInit)?;

    let mut out = Vec::new();
    let mut cur = va;
    loop {
        let page_base = VirtAddr::new(cur).align_down();
        let offset = (cur - page_base.as_u64()) as usize;
        let phys = space.translate(page_base).ok_or(KernelError::NoSuch)?;
        let src = crate::mm::phys_to_virt(phys).as_ptr::<u8>();
        for i in offset..4096 {
            // SAFETY: `src` is the HHDM alias of a frame mapped into the
            // caller's address space.
            let byte = unsafe { *src.add(i) };
            if byte == 0 {
                return Ok(out);
            }
            out.push(byte);
            if out.len() > 4096 {
                return Err(KernelError::TooBig);
            }
        }
        cur = page_base.as_u64() + 4096;
    }
}

/// Read a NULL-terminated array of string pointers (an `argv`/`envp`
/// vector) at `va`, resolving each pointer through the caller's address
/// space.
fn read_user_ptr_array(va: u64) -> KernelResult<Vec<Vec<u8>>> {
    if va == 0 {
        return Ok(Vec::new());
    }
    let process = process::current_process().ok_or(KernelError::NotInit)?;
    let inner = process.inner();
    let space = inner.address_space.as_ref().ok_or(KernelError::NotInit)?;

    let mut strings = Vec::new();
    let mut cur = va;
    loop {
        let page_base = VirtAddr::new(cur).align_down();
        let offset = (cur - page_base.as_u64()) as usize;
        let phys = space.translate(page_base).ok_or(KernelError::NoSuch)?;
        let src = crate::mm::phys_to_virt(phys).as_ptr::<u8>();
        // SAFETY: `offset` is 8-byte aligned, since `va` comes from the
        // SysV argv/envp vector of 8-byte pointers.
        let ptr = unsafe { *(src.add(offset) as *const u64) };
        if ptr == 0 {
            return Ok(strings);
        }
        strings.push(read_user_cstr(ptr)?);
        cur += 8;
        if strings.len() > 4096 {
            return Err(KernelError::TooBig);
        }
    }
}

fn read_user_bytes(va: u64, len: usize) -> KernelResult<Vec<u8>> {
    let process = process::current_process().ok_or(KernelError::NotInit)?;
    let inner = process.inner();
    let space = inner.address_space.as_ref().ok_or(KernelError::NotInit)?;

    let mut out = alloc::vec![0u8; len];
    let mut copied = 0usize;
    while copied < len {
        let cur = VirtAddr::new(va + copied as u64);
        let page_base = cur.align_down();
        let offset = (cur.as_u64() - page_base.as_u64()) as usize;
        let phys = space.translate(page_base).ok_or(KernelError::NoSuch)?;
        let src = crate::mm::phys_to_virt(phys).as_ptr::<u8>();
        let take = (len - copied).min(4096 - offset);
        // SAFETY: `src` is the HHDM alias of a frame mapped into the
        // caller's address space.
        unsafe {
            core::ptr::copy_nonoverlapping(src.add(offset), out.as_mut_ptr().add(copied), take);
        }
        copied += take;
    }
    Ok(out)
}

fn write_user_bytes(va: u64, bytes: &[u8]) -> KernelResult<()> {
    let process = process::current_process().ok_or(KernelError::NotInit)?;
    let inner = process.inner();
    let space = inner.address_space.as_ref().ok_or(KernelError::NotInit)?;

    let mut written = 0usize;
    while written < bytes.len() {
        let cur = VirtAddr::new(va + written as u64);
        let page_base = cur.align_down();
        let offset = (cur.as_u64() - page_base.as_u64()) as usize;
        let phys = space.translate(page_base).ok_or(KernelError::NoSuch)?;
        let dst = crate::mm::phys_to_virt(phys).as_mut_ptr::<u8>();
        let take = (bytes.len() - written).min(4096 - offset);
        // SAFETY: see `read_user_bytes`.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr().add(written), dst.add(offset), take);
        }
        written += take;
    }
    Ok(())
}

pub fn sys_read(fd: i32, buf_ptr: u64, len: usize) -> KernelResult<usize> {
    let process = process::current_process().ok_or(KernelError::NotInit)?;
    let entry = process.fd_table.lock().get(fd)?;
    let mut scratch = alloc::vec![0u8; len.min(4096)];
    let n = entry.object.read(&mut scratch)?;
    write_user_bytes(buf_ptr, &scratch[..n])?;
    Ok(n)
}

pub fn sys_write(fd: i32, buf_ptr: u64, len: usize) -> KernelResult<usize> {
    let process = process::current_process().ok_or(KernelError::NotInit)?;
    let entry = process.fd_table.lock().get(fd)?;
    let bytes = read_user_bytes(buf_ptr, len.min(4096))?;
    entry.object.write(&bytes)
}

pub fn sys_close(fd: i32) -> KernelResult<usize> {
    let process = process::current_process().ok_or(KernelError::NotInit)?;
    process.fd_table.lock().close(fd)?;
    Ok(0)
}

pub fn sys_lseek(fd: i32, offset: i64, whence: u32) -> KernelResult<usize> {
    let process = process::current_process().ok_or(KernelError::NotInit)?;
    let entry = process.fd_table.lock().get(fd)?;
    let seek = match whence {
        0 => SeekFrom::Start(offset as u64),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return Err(KernelError::BadArgs),
    };
    let pos = entry.object.seek(seek)?;
    Ok(pos as usize)
}

pub fn sys_fstat(fd: i32, statbuf_ptr: u64) -> KernelResult<usize> {
    let process = process::current_process().ok_or(KernelError::NotInit)?;
    let entry = process.fd_table.lock().get(fd)?;
    let stat = entry.object.stat()?;
    let mut raw = [0u8; 16];
    raw[0..8].copy_from_slice(&stat.size.to_ne_bytes());
    raw[8] = stat.is_dir as u8;
    write_user_bytes(statbuf_ptr, &raw)?;
    Ok(0)
}

/// `fork()` — duplicates the caller (spec.md §4.5 Fork algorithm).
pub fn sys_fork() -> KernelResult<usize> {
    process::fork::fork().map(|pid| pid.0 as usize)
}

/// `execve(path_fd, argv, envp)`. This kernel has no VFS (spec.md §1), so
/// `path_fd` names an already-open descriptor in the caller's FD table
/// rather than a filesystem path string.
pub fn sys_execve(path_fd: u64, argv_ptr: u64, envp_ptr: u64) -> KernelResult<usize> {
    let process = process::current_process().ok_or(KernelError::NotInit)?;
    let entry = process.fd_table.lock().get(path_fd as i32)?;

    let argv_strings = read_user_ptr_array(argv_ptr)?;
    let envp_strings = read_user_ptr_array(envp_ptr)?;
    let argv_refs: Vec<&[u8]> = argv_strings.iter().map(|s| s.as_slice()).collect();
    let envp_refs: Vec<&[u8]> = envp_strings.iter().map(|s| s.as_slice()).collect();

    process::exec::execve(&*entry.object, &argv_refs, &envp_refs)?;
    Ok(0)
}

pub fn sys_exit(exit_code: i32) {
    process::exit::exit_process(exit_code);
}

pub fn sys_wait4(pid: i64, status_ptr: u64, options: u32) -> KernelResult<usize> {
    let (child_pid, status) = process::wait::wait4(pid, WaitOptions::from_flags(options))?;
    if status_ptr != 0 {
        write_user_bytes(status_ptr, &status.to_raw().to_ne_bytes())?;
    }
    Ok(child_pid.0 as usize)
}

pub fn sys_getpid() -> KernelResult<usize> {
    process::current_pid().map(|p| p.0 as usize).ok_or(KernelError::NotInit)
}

pub fn sys_getppid() -> KernelResult<usize> {
    let process = process::current_process().ok_or(KernelError::NotInit)?;
    Ok(process.ppid.0 as usize)
}

pub fn sys_gettid() -> KernelResult<usize> {
    process::current_tid().map(|t| t.0 as usize).ok_or(KernelError::NotInit)
}
