//! `wait4`-style child reaping (spec.md §4.5, §6 `wait4`).

extern crate alloc;

use crate::error::{KernelError, KernelResult};
use crate::process::{table, ProcessId};
use crate::sched::smp::current_cpu;
use crate::sched::task::TaskState;

/// Options controlling `waitpid` behavior, modeled after POSIX flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitOptions {
    flags: u32,
}

impl WaitOptions {
    pub const WNOHANG: u32 = 1;
    pub const WUNTRACED: u32 = 2;
    pub const WCONTINUED: u32 = 8;

    pub fn from_flags(flags: u32) -> Self {
        Self { flags }
    }

    pub fn is_nohang(&self) -> bool {
        self.flags & Self::WNOHANG != 0
    }

    pub fn is_untraced(&self) -> bool {
        self.flags & Self::WUNTRACED != 0
    }

    pub fn is_continued(&self) -> bool {
        self.flags & Self::WCONTINUED != 0
    }
}

/// Status returned by `waitpid` describing how a child changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Exited(i32),
    Signaled(i32),
    Stopped(i32),
    Continued,
}

impl WaitStatus {
    /// Encode the status as a raw `i32` matching POSIX `wstatus` layout.
    pub fn to_raw(self) -> i32 {
        match self {
            Self::Exited(code) => (code & 0xFF) << 8,
            Self::Signaled(sig) => sig & 0x7F,
            Self::Stopped(sig) => 0x7F | (sig << 8),
            Self::Continued => 0xFFFF_u16 as i32,
        }
    }
}

/// Wait for a child of the calling process to change state, reaping it if
/// it has exited. Blocks by yielding the CPU and re-polling unless
/// `WNOHANG` is set.
pub fn wait4(pid: i64, options: WaitOptions) -> KernelResult<(ProcessId, WaitStatus)> {
    let parent = crate::process::current_process().ok_or(KernelError::NotInit)?;
    let target: Option<ProcessId> = if pid > 0 { Some(ProcessId(pid as u64)) } else { None };

    loop {
        let children = parent.children();
        if children.is_empty() {
            return Err(KernelError::NoSuch);
        }

        let mut target_exists = false;
        for child_pid in &children {
            if let Some(t) = target {
                if *child_pid != t {
                    continue;
                }
            }
            target_exists = true;

            if let Some(child) = table::get(*child_pid) {
                if child.is_zombie() {
                    let exit_code = child.get_exit_code();
                    parent.remove_child(*child_pid);
                    table::remove(*child_pid);
                    if let Some(space) = child.inner().address_space.take() {
                        space.destroy();
                    }
                    return Ok((*child_pid, WaitStatus::Exited(exit_code)));
                }
            }
        }

        if target.is_some() && !target_exists {
            return Err(KernelError::NoSuch);
        }

        if options.is_nohang() {
            return Err(KernelError::Busy);
        }

        block_on_children();

        if let Some(signum) = parent.take_pending_signal() {
            if signum != crate::process::exit::signals::SIGCHLD as u32 {
                return Err(KernelError::ErrReturn);
            }
        }
    }
}

fn block_on_children() {
    {
        let cpu = current_cpu();
        let mut sched = crate::sched::smp::per_cpu(cpu).scheduler.lock();
        if let Some(mut current) = sched.current {
            // SAFETY: `current` is the task this CPU is running.
            unsafe {
                current.as_mut().state = TaskState::Blocked;
            }
        }
    }
    crate::sched::scheduler::yield_now();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_options_default() {
        let opts = WaitOptions::default();
        assert!(!opts.is_nohang());
        assert!(!opts.is_untraced());
        assert!(!opts.is_continued());
    }

    #[test]
    fn test_wait_options_nohang() {
        let opts = WaitOptions::from_flags(WaitOptions::WNOHANG);
        assert!(opts.is_nohang());
        assert!(!opts.is_untraced());
        assert!(!opts.is_continued());
    }

    #[test]
    fn test_wait_options_combined() {
        let opts = WaitOptions::from_flags(WaitOptions::WNOHANG | WaitOptions::WUNTRACED);
        assert!(opts.is_nohang());
        assert!(opts.is_untraced());
        assert!(!opts.is_continued());
    }

    #[test]
    fn test_wait_options_all_flags() {
        let opts = WaitOptions::from_flags(WaitOptions::WNOHANG | WaitOptions::WUNTRACED | WaitOptions::WCONTINUED);
        assert!(opts.is_nohang());
        assert!(opts.is_untraced());
        assert!(opts.is_continued());
    }

    #[test]
    fn test_wait_status_exited() {
        let status = WaitStatus::Exited(42);
        assert_eq!(status, WaitStatus::Exited(42));
        assert_eq!(status.to_raw(), 42 << 8);
    }

    #[test]
    fn test_wait_status_signaled() {
        let status = WaitStatus::Signaled(11);
        assert_eq!(status.to_raw(), 11);
    }

    #[test]
    fn test_wait_status_stopped() {
        let status = WaitStatus::Stopped(19);
        assert_eq!(status.to_raw(), 0x7F | (19 << 8));
    }

    #[test]
    fn test_wait_status_continued() {
        let status = WaitStatus::Continued;
        assert_eq!(status.to_raw(), 0xFFFF_u16 as i32);
    }

    #[test]
    fn test_wait_status_equality() {
        assert_eq!(WaitStatus::Exited(0), WaitStatus::Exited(0));
        assert_ne!(WaitStatus::Exited(0), WaitStatus::Exited(1));
        assert_ne!(WaitStatus::Exited(0), WaitStatus::Continued);
    }
}
