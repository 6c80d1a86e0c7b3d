//! `/proc` textual contract (spec.md §6): `/proc/<pid>/stat`,
//! `/proc/<pid>/status`, `/proc/uptime`, `/proc/self`.
//!
//! There is no VFS in this kernel (spec.md §1's out-of-scope collaborator
//! list), so these are plain functions returning the file's contents as a
//! `String` rather than inode operations; whatever serves `/proc` to
//! userspace is expected to call through here verbatim.

extern crate alloc;

use alloc::string::String;

use crate::arch::x86_64::timer;
use crate::error::{KernelError, KernelResult};
use crate::process::{table, ProcessId};

/// A process's live state, reduced to the single letter `stat`/`status`
/// report.
///
/// The per-process lock only tracks a `zombie` flag, not a live
/// [`crate::sched::task::TaskState`] for the main thread — resolving that
/// exactly would mean scanning every CPU's locked scheduler queues for a
/// matching [`crate::process::ThreadId`], which no caller of this module
/// needs badly enough to justify. Running is detected directly (the main
/// thread is some CPU's `current`); everything else that isn't a zombie
/// is reported as sleeping, which is the correct bucket for by far the
/// most common case (blocked in a syscall or waiting on the Ready queue).
fn state_char(is_zombie: bool, main_thread: Option<crate::process::ThreadId>) -> char {
    if is_zombie {
        return 'Z';
    }
    let Some(tid) = main_thread else {
        return 'S';
    };
    for cpu in 0..crate::sched::smp::cpu_count() {
        let sched = crate::sched::smp::per_cpu(cpu).scheduler.lock();
        // SAFETY: `current` points at a live Task for as long as it's
        // installed in this slot, which is true for the duration of the
        // lock held above.
        if sched.current.map(|t| unsafe { t.as_ref().tid }) == Some(tid) {
            return 'R';
        }
    }
    'S'
}

fn state_word(c: char) -> &'static str {
    match c {
        'R' => "Running",
        'Z' => "Zombie",
        _ => "Sleeping",
    }
}

/// `/proc/<pid>/stat`: `pid (comm) state ppid pgrp sid 0 0 0 0 0 0 0 utime
/// stime 0 0 0 0 1 0 starttime 0 0\n` (spec.md §6). The literal zeros are
/// fields Linux's `stat` defines that this kernel's data model has no
/// counterpart for (tty, signal masks, rss limits, ...); the literal `1`
/// is the thread count, always 1 per [`crate::process`]'s 1:1 process/
/// thread correspondence.
pub fn stat(pid: ProcessId) -> KernelResult<String> {
    let process = table::get(pid).ok_or(KernelError::NoSuch)?;
    let (comm, ppid, pgid, sid, main_thread) = {
        let inner = process.inner();
        (inner.comm.clone(), process.ppid, inner.pgid, inner.sid, inner.main_thread)
    };
    let state = state_char(process.is_zombie(), main_thread);
    let utime_ticks = process.user_us.load(core::sync::atomic::Ordering::Relaxed) / 1000;
    let stime_ticks = process.sys_us.load(core::sync::atomic::Ordering::Relaxed) / 1000;

    Ok(alloc::format!(
        "{pid} ({comm}) {state} {ppid} {pgid} {sid} 0 0 0 0 0 0 0 {utime_ticks} {stime_ticks} 0 0 0 0 1 0 {starttime} 0 0\n",
        pid = pid.0,
        comm = comm,
        state = state,
        ppid = ppid.0,
        pgid = pgid,
        sid = sid,
        utime_ticks = utime_ticks,
        stime_ticks = stime_ticks,
        starttime = process.start_tick,
    ))
}

/// `/proc/<pid>/status`: multiline `Name:\t<comm>\nState:\t<X>\n...`,
/// fields drawn from spec.md §3's Data Model (credentials, pgid/sid,
/// thread count).
pub fn status(pid: ProcessId) -> KernelResult<String> {
    let process = table::get(pid).ok_or(KernelError::NoSuch)?;
    let (comm, ppid, pgid, sid, creds, main_thread) = {
        let inner = process.inner();
        (inner.comm.clone(), process.ppid, inner.pgid, inner.sid, inner.creds, inner.main_thread)
    };
    let state = state_char(process.is_zombie(), main_thread);

    Ok(alloc::format!(
        "Name:\t{comm}\n\
         State:\t{state} ({word})\n\
         Pid:\t{pid}\n\
         PPid:\t{ppid}\n\
         PGid:\t{pgid}\n\
         Sid:\t{sid}\n\
         Uid:\t{ruid} {euid} {suid}\n\
         Gid:\t{rgid} {egid} {sgid}\n\
         Threads:\t1\n",
        comm = comm,
        state = state,
        word = state_word(state),
        pid = pid.0,
        ppid = ppid.0,
        pgid = pgid,
        sid = sid,
        ruid = creds.ruid,
        euid = creds.euid,
        suid = creds.suid,
        rgid = creds.rgid,
        egid = creds.egid,
        sgid = creds.sgid,
    ))
}

/// `/proc/uptime`: `<secs> <idle_secs>\n`, both derived from the global
/// tick counter at the scheduler's fixed 1000 Hz rate (spec.md §4.4).
pub fn uptime() -> String {
    let secs = timer::get_ticks() / timer::TICK_HZ;
    let idle_secs = timer::idle_ticks() / timer::TICK_HZ;
    alloc::format!("{secs} {idle_secs}\n")
}

/// `/proc/self`: the calling process's own id.
pub fn self_pid() -> KernelResult<ProcessId> {
    crate::process::current_pid().ok_or(KernelError::NotInit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{table, Process};
    use alloc::sync::Arc;

    fn insert_test_process(pid: u64, ppid: u64) -> Arc<Process> {
        let process = Arc::new(Process::new_for_test(ProcessId(pid), ProcessId(ppid)));
        table::insert(process.clone()).unwrap();
        process
    }

    #[test]
    fn stat_reports_zombie_state() {
        table::init();
        let p = insert_test_process(100, 1);
        p.mark_zombie(7);
        let text = stat(ProcessId(100)).unwrap();
        assert!(text.starts_with("100 (test) Z 1 100 100 "));
        table::remove(ProcessId(100));
    }

    #[test]
    fn status_lists_credentials_and_thread_count() {
        table::init();
        let p = insert_test_process(101, 1);
        p.mark_zombie(0);
        let text = status(ProcessId(101)).unwrap();
        assert!(text.contains("Name:\ttest\n"));
        assert!(text.contains("Threads:\t1\n"));
        assert!(text.contains("Uid:\t0 0 0\n"));
        table::remove(ProcessId(101));
    }

    #[test]
    fn stat_of_unknown_pid_is_no_such() {
        table::init();
        assert_eq!(stat(ProcessId(9999)), Err(KernelError::NoSuch));
    }

    #[test]
    fn uptime_format_has_two_fields() {
        let text = uptime();
        assert_eq!(text.matches(' ').count(), 1);
        assert!(text.ends_with('\n'));
    }
}
