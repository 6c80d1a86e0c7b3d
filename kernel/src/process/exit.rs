//! Process exit and signal delivery (spec.md §4.5): marking a process a
//! zombie, reparenting its children, and the `kill(2)` dispatch table of
//! default signal actions.

extern crate alloc;

use crate::error::{KernelError, KernelResult};
use crate::process::{table, ProcessId};
use crate::sched::task::TaskState;

/// Standard signal numbers (POSIX).
pub mod signals {
    pub const SIGHUP: i32 = 1;
    pub const SIGINT: i32 = 2;
    pub const SIGQUIT: i32 = 3;
    pub const SIGILL: i32 = 4;
    pub const SIGTRAP: i32 = 5;
    pub const SIGABRT: i32 = 6;
    pub const SIGBUS: i32 = 7;
    pub const SIGFPE: i32 = 8;
    pub const SIGKILL: i32 = 9;
    pub const SIGUSR1: i32 = 10;
    pub const SIGSEGV: i32 = 11;
    pub const SIGUSR2: i32 = 12;
    pub const SIGPIPE: i32 = 13;
    pub const SIGALRM: i32 = 14;
    pub const SIGTERM: i32 = 15;
    pub const SIGSTKFLT: i32 = 16;
    pub const SIGCHLD: i32 = 17;
    pub const SIGCONT: i32 = 18;
    pub const SIGSTOP: i32 = 19;
    pub const SIGTSTP: i32 = 20;
    pub const SIGTTIN: i32 = 21;
    pub const SIGTTOU: i32 = 22;
    pub const SIGURG: i32 = 23;
    pub const SIGXCPU: i32 = 24;
    pub const SIGXFSZ: i32 = 25;
    pub const SIGVTALRM: i32 = 26;
    pub const SIGPROF: i32 = 27;
    pub const SIGWINCH: i32 = 28;
    pub const SIGIO: i32 = 29;
    pub const SIGPWR: i32 = 30;
    pub const SIGSYS: i32 = 31;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Default,
    Ignore,
    Terminate,
    CoreDump,
    Stop,
    Continue,
    Handler(usize),
}

pub fn default_signal_action(signal: i32) -> SignalAction {
    use signals::*;
    match signal {
        SIGHUP | SIGINT | SIGKILL | SIGPIPE | SIGALRM | SIGTERM | SIGUSR1 | SIGUSR2 => SignalAction::Terminate,
        SIGQUIT | SIGILL | SIGABRT | SIGFPE | SIGSEGV | SIGBUS | SIGSYS | SIGTRAP | SIGXCPU | SIGXFSZ => {
            SignalAction::CoreDump
        }
        SIGSTOP | SIGTSTP | SIGTTIN | SIGTTOU => SignalAction::Stop,
        SIGCONT => SignalAction::Continue,
        SIGCHLD | SIGURG | SIGWINCH | SIGIO => SignalAction::Ignore,
        _ => SignalAction::Terminate,
    }
}

/// Mark the calling task's task-state `Terminated` and its process a
/// zombie (spec.md §4.5 Exit algorithm). The scheduler's per-tick
/// dispatcher files the outgoing task onto the zombie queue; the parent
/// is signalled with `SIGCHLD` so a blocked `wait4` notices.
pub fn exit_process(exit_code: i32) {
    let Some(process) = crate::process::current_process() else {
        return;
    };

    log::info!("process {} exiting with code {}", process.pid, exit_code);
    process.mark_zombie(exit_code);
    reparent_children_to_init(process.pid);

    if let Some(parent) = table::get(process.ppid) {
        parent.raise_signal(signals::SIGCHLD as u32);
    }

    mark_current_task_terminated();
}

fn mark_current_task_terminated() {
    let cpu = crate::sched::smp::current_cpu();
    let mut sched = crate::sched::smp::per_cpu(cpu).scheduler.lock();
    if let Some(mut current) = sched.current {
        // SAFETY: `current` is the task this CPU is running; it remains
        // valid for the lifetime of this lock.
        unsafe {
            current.as_mut().state = TaskState::Terminated;
        }
    }
}

/// Reassign every child of `pid` to PID 1 (spec.md §4.5: "orphans
/// reparent to init").
fn reparent_children_to_init(pid: ProcessId) {
    if pid == ProcessId(1) {
        return;
    }
    let Some(process) = table::get(pid) else {
        return;
    };
    let Some(init) = table::get(ProcessId(1)) else {
        return;
    };
    for child in process.children() {
        init.add_child(child);
    }
}

/// Send a signal to a process (spec.md §6 `kill`).
pub fn kill_process(pid: ProcessId, signal: i32) -> KernelResult<()> {
    if !(0..=31).contains(&signal) {
        return Err(KernelError::BadArgs);
    }

    let process = table::get(pid).ok_or(KernelError::NoSuch)?;

    if signal == 0 {
        return Ok(());
    }
    if process.is_zombie() {
        return Err(KernelError::BadEntity);
    }

    process.raise_signal(signal as u32);

    if signal == signals::SIGKILL {
        force_terminate(&process);
    }

    Ok(())
}

fn force_terminate(process: &crate::process::Process) {
    process.mark_zombie(128 + signals::SIGKILL);
    reparent_children_to_init(process.pid);
    if let Some(parent) = table::get(process.ppid) {
        parent.raise_signal(signals::SIGCHLD as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_actions_match_posix_table() {
        assert_eq!(default_signal_action(signals::SIGKILL), SignalAction::Terminate);
        assert_eq!(default_signal_action(signals::SIGSEGV), SignalAction::CoreDump);
        assert_eq!(default_signal_action(signals::SIGSTOP), SignalAction::Stop);
        assert_eq!(default_signal_action(signals::SIGCONT), SignalAction::Continue);
        assert_eq!(default_signal_action(signals::SIGCHLD), SignalAction::Ignore);
    }

    #[test]
    fn kill_rejects_out_of_range_signal() {
        table::init();
        assert!(matches!(kill_process(ProcessId(1), 99), Err(KernelError::BadArgs)));
    }

    #[test]
    fn kill_unknown_pid_errors() {
        table::init();
        assert!(matches!(kill_process(ProcessId(42), signals::SIGTERM), Err(KernelError::NoSuch)));
    }
}
