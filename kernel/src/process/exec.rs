//! `execve` (spec.md §4.5 Execve algorithm, §4.6 User stack).
//!
//! Loads an ELF64 image into a fresh address space, builds the SysV
//! initial stack (argv/envp/auxv, 16-byte `RSP` invariant), and rewrites
//! the calling task's saved register context to start the new image —
//! there is no VFS in this kernel (spec.md §1's out-of-scope collaborator
//! list), so callers supply an already-open `FileObject` rather than a
//! path.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::elf::{self, types::ElfImage};
use crate::error::{KernelError, KernelResult};
use crate::mm::vmm::AddressSpace;
use crate::mm::{PageFlags, VirtAddr};
use crate::process::fd::FileObject;

/// Top of the mapped user stack region (`0x0100_0000` = 16 MiB).
const STACK_TOP: u64 = 0x0100_0000;
/// Size of the mapped stack region.
const STACK_SIZE: u64 = 64 * 1024;
/// Base of the argument/environment string copy area.
const ARG_AREA_BASE: u64 = 0x00F0_0000;
const ARG_AREA_SIZE: u64 = 64 * 1024;

/// Replace the calling process's image with the one in `file`.
///
/// On success, the calling task's context is rewritten to resume at the
/// new entry point; the function does not return to its caller via the
/// normal call path (the syscall dispatcher's `iretq` lands in the new
/// image instead). On failure, the process's existing address space is
/// left untouched (spec.md §4.7's recovery policy).
pub fn execve(file: &dyn FileObject, argv: &[&[u8]], envp: &[&[u8]]) -> KernelResult<()> {
    elf::probe(file).map_err(|_| KernelError::BadEntry)?;

    let new_space = AddressSpace::new()?;
    let image = elf::load(file, &new_space).map_err(|_| KernelError::BadEntry)?;

    map_stack_regions(&new_space)?;
    let (user_sp, _execfn_ptr) = build_user_stack(&new_space, argv, envp, &image)?;

    let process = crate::process::current_process().ok_or(KernelError::NotInit)?;
    install_new_image(&process, new_space, image.entry, user_sp)?;

    log::info!("execve: pid={} entry={:#x} rsp={:#x}", process.pid, image.entry, user_sp);
    Ok(())
}

fn map_stack_regions(space: &AddressSpace) -> KernelResult<()> {
    let flags = PageFlags::PRESENT | PageFlags::USER | PageFlags::WRITABLE | PageFlags::NOEXECUTE;
    space.map_range_zeroed(VirtAddr::new(STACK_TOP - STACK_SIZE), STACK_SIZE as usize, flags)?;
    space.map_range_zeroed(VirtAddr::new(ARG_AREA_BASE), ARG_AREA_SIZE as usize, flags)?;
    Ok(())
}

fn write_user_u64(space: &AddressSpace, va: u64, value: u64) -> KernelResult<()> {
    write_user_bytes(space, va, &value.to_ne_bytes())
}

fn write_user_bytes(space: &AddressSpace, va: u64, bytes: &[u8]) -> KernelResult<()> {
    let mut written = 0usize;
    while written < bytes.len() {
        let cur = VirtAddr::new(va + written as u64);
        let page_base = cur.align_down();
        let offset = (cur.as_u64() - page_base.as_u64()) as usize;
        let phys = space.translate(page_base).ok_or(KernelError::NoSuch)?;
        let dst = crate::mm::phys_to_virt(phys).as_mut_ptr::<u8>();
        let take = (bytes.len() - written).min(4096 - offset);
        // SAFETY: `dst` is the HHDM alias of a frame this address space
        // just mapped writable.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr().add(written), dst.add(offset), take);
        }
        written += take;
    }
    Ok(())
}

/// Copy `argv`/`envp` strings into the argument-copy area and build the
/// SysV initial stack frame below `STACK_TOP` (spec.md §4.6).
fn build_user_stack(
    space: &AddressSpace,
    argv: &[&[u8]],
    envp: &[&[u8]],
    image: &ElfImage,
) -> KernelResult<(u64, u64)> {
    // Copy strings from the high end of the argument area downward.
    let mut cursor = ARG_AREA_BASE + ARG_AREA_SIZE;
    let mut argv_ptrs = Vec::with_capacity(argv.len());
    let mut envp_ptrs = Vec::with_capacity(envp.len());

    for s in argv {
        cursor -= s.len() as u64 + 1;
        write_user_bytes(space, cursor, s)?;
        write_user_bytes(space, cursor + s.len() as u64, &[0u8])?;
        argv_ptrs.push(cursor);
    }
    for s in envp {
        cursor -= s.len() as u64 + 1;
        write_user_bytes(space, cursor, s)?;
        write_user_bytes(space, cursor + s.len() as u64, &[0u8])?;
        envp_ptrs.push(cursor);
    }

    let execfn_ptr = argv_ptrs.first().copied().unwrap_or(0);

    let mut aux = [(0u64, 0u64); 8];
    let aux_len = elf::build_aux(image, execfn_ptr, &mut aux);

    // Qword count pushed below argc: 2 per aux entry, 1 envp sentinel,
    // envp.len() pointers, 1 argv sentinel, argv.len() pointers.
    let mut qwords: Vec<u64> = Vec::new();
    for (k, v) in aux[..aux_len].iter().rev() {
        qwords.push(*v);
        qwords.push(*k);
    }
    qwords.push(0); // envp NULL sentinel
    for p in envp_ptrs.iter().rev() {
        qwords.push(*p);
    }
    qwords.push(0); // argv NULL sentinel
    for p in argv_ptrs.iter().rev() {
        qwords.push(*p);
    }

    // `qwords` plus argc must leave RSP & 0xF == 8 at entry. If pushing
    // argc alone would land on a 16-byte boundary, push one extra shim
    // word first (spec.md §4.6 step 9).
    let total_before_argc = qwords.len() + 1;
    if total_before_argc % 2 == 0 {
        qwords.push(0);
    }
    qwords.push(argv.len() as u64);

    let frame_bytes = (qwords.len() * 8) as u64;
    let mut sp = (cursor - frame_bytes) & !0xF;
    if sp % 16 == 0 {
        sp -= 8;
    }

    let mut addr = sp;
    for word in qwords.iter().rev() {
        write_user_u64(space, addr, *word)?;
        addr += 8;
    }

    Ok((sp, execfn_ptr))
}

fn install_new_image(
    process: &Arc<crate::process::Process>,
    new_space: AddressSpace,
    entry: u64,
    user_sp: u64,
) -> KernelResult<()> {
    let new_pml4 = new_space.pml4_phys().as_u64();
    let main_thread = process.inner().main_thread;

    let old_space = {
        let mut inner = process.inner();
        let old = inner.address_space.replace(new_space);
        inner.pending_signals = 0;
        for h in inner.signal_handlers.iter_mut() {
            *h = crate::process::pcb::SignalHandler::Default;
        }
        old
    };

    let result = match main_thread {
        Some(tid) => rewrite_task_in_place(tid, entry, user_sp, new_pml4),
        None => spawn_main_thread(process, entry, user_sp, new_pml4),
    };

    // The image swap already took effect above even on a spawn/rewrite
    // failure (spec.md §4.7 only guards the load itself); the old space
    // is never referenced again either way.
    if let Some(space) = old_space {
        space.destroy();
    }

    result
}

/// Create the first main thread for a process that started thread-less
/// (spec.md §4.5 Create: "the process starts thread-less; execve creates
/// the main thread"), `Type=User, Priority=Kernel` per the Execve
/// algorithm, enqueued on the least-loaded CPU.
fn spawn_main_thread(process: &Arc<crate::process::Process>, entry: u64, user_sp: u64, pml4: u64) -> KernelResult<()> {
    let kernel_stack_top = crate::sched::task::alloc_kernel_stack();
    let mut task = crate::sched::task::Task::new_user(process.pid, entry, user_sp, kernel_stack_top, pml4);
    task.priority = crate::sched::task::Priority::Kernel;
    let tid = task.tid;

    process.inner().main_thread = Some(tid);

    let boxed = alloc::boxed::Box::new(task);
    let ptr = core::ptr::NonNull::new(alloc::boxed::Box::leak(boxed) as *mut crate::sched::task::Task)
        .expect("boxed task is never null");
    crate::sched::scheduler::enqueue(least_loaded_cpu(), ptr);
    Ok(())
}

/// The CPU with the fewest Ready-queue entries (spec.md §4.4's "enqueue
/// Ready on the least-loaded CPU").
fn least_loaded_cpu() -> usize {
    let mut best_cpu = 0;
    let mut best_len = usize::MAX;
    for cpu in 0..crate::sched::smp::cpu_count() {
        let len = crate::sched::smp::per_cpu(cpu).scheduler.lock().ready.len();
        if len < best_len {
            best_len = len;
            best_cpu = cpu;
        }
    }
    best_cpu
}

fn rewrite_task_in_place(tid: crate::process::ThreadId, entry: u64, user_sp: u64, pml4: u64) -> KernelResult<()> {
    for cpu in 0..crate::sched::smp::cpu_count() {
        let mut sched = crate::sched::smp::per_cpu(cpu).scheduler.lock();
        if let Some(mut current) = sched.current {
            // SAFETY: `current` points at the live task this CPU runs.
            let task = unsafe { current.as_mut() };
            if task.tid == tid {
                task.context = crate::arch::x86_64::context::X86_64Context::new_user(entry, user_sp);
                task.context.cr3 = pml4;
                task.page_directory = pml4;
                task.user_stack_top = user_sp;
                return Ok(());
            }
        }
    }
    Err(KernelError::NoSuch)
}
