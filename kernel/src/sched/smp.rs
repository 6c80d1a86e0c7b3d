//! SMP bring-up and per-CPU scheduler state (spec.md §3 "Scheduler
//! queues", §4.3 "SMP Bring-up + Descriptor Fabric").
//!
//! Adapted from the teacher's `sched/smp.rs`: the teacher's NUMA topology,
//! load-balancing pass and `CpuFeatures` detection are dropped (Non-goals).
//! What survives is the per-CPU info block idiom, rebuilt around the four
//! scheduler queues and the BSP/AP bring-up barrier the spec calls for.
//! The bootloader's SMP info table is an external collaborator
//! (out of scope per spec.md §1) — this module only defines the shape it
//! reads from and writes into.

use core::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

use crate::arch::x86_64::{apic, gdt};
use crate::sched::queue::{ReadyQueue, SleepingQueue, TaskPtr, WaitingQueue, ZombieQueue};
use crate::sync::IrqSpinLock;

/// Upper bound on supported CPUs (array-backed per-CPU state).
pub const MAX_CPUS: usize = 16;

/// AP bring-up timeout, in busy-wait spin iterations. No calibrated
/// timebase exists yet this early, so the bound is an iteration count
/// rather than wall-clock time.
const STARTUP_TIMEOUT_SPINS: u64 = 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    Offline = 0,
    Starting = 1,
    Online = 2,
}

/// One entry of the bootloader-provided SMP info table (spec.md §6
/// "Bootloader handshake": "an SMP info table (CPU count, BSP LAPIC id,
/// per-CPU entries each with LAPIC id and a writable `goto_address`
/// slot)").
pub struct CpuEntry {
    pub lapic_id: u8,
    /// Physical address the AP's real-mode trampoline jumps to; the BSP
    /// writes the AP entry point here before sending the startup IPI.
    pub goto_address: AtomicU64,
}

pub struct SmpInfo<'a> {
    pub bsp_lapic_id: u8,
    pub entries: &'a [CpuEntry],
}

/// Per-CPU scheduler block: the four queues and the `current` slot share
/// one lock (spec.md §3 "Each CPU has a dedicated lock covering its four
/// queues and the current-thread slot").
pub struct PerCpuScheduler {
    pub ready: ReadyQueue,
    pub waiting: WaitingQueue,
    pub sleeping: SleepingQueue,
    pub zombie: ZombieQueue,
    pub current: Option<TaskPtr>,
}

// SAFETY: a `TaskPtr` only ever enters or leaves these queues while
// holding the per-CPU lock that guards this whole block, so sharing a
// `PerCpuScheduler` across the threads that take turns holding that lock
// is sound.
unsafe impl Send for PerCpuScheduler {}

impl PerCpuScheduler {
    const fn new() -> Self {
        Self {
            ready: ReadyQueue::new(),
            waiting: WaitingQueue::new(),
            sleeping: SleepingQueue::new(),
            zombie: ZombieQueue::new(),
            current: None,
        }
    }

    #[cfg(test)]
    pub fn test_instance() -> Self {
        Self::new()
    }
}

pub struct PerCpu {
    state: AtomicU8,
    pub local_ticks: AtomicU64,
    pub context_switches: AtomicU64,
    pub scheduler: IrqSpinLock<PerCpuScheduler>,
}

impl PerCpu {
    const fn new() -> Self {
        Self {
            state: AtomicU8::new(CpuState::Offline as u8),
            local_ticks: AtomicU64::new(0),
            context_switches: AtomicU64::new(0),
            scheduler: IrqSpinLock::new(PerCpuScheduler::new()),
        }
    }

    pub fn state(&self) -> CpuState {
        match self.state.load(Ordering::Acquire) {
            0 => CpuState::Offline,
            1 => CpuState::Starting,
            _ => CpuState::Online,
        }
    }

    fn set_state(&self, s: CpuState) {
        self.state.store(s as u8, Ordering::Release);
    }
}

/// LAPIC id -> CPU index, populated during bring-up. `0xFF` means unset.
static LAPIC_TO_CPU: [AtomicU8; MAX_CPUS] = [const { AtomicU8::new(0xFF) }; MAX_CPUS];

static PER_CPU: [PerCpu; MAX_CPUS] = [const { PerCpu::new() }; MAX_CPUS];
/// BSP counts as started; APs each bump this as they come online
/// (spec.md §4.3 step 2: "increments `started_count` with
/// sequential-consistency ordering").
static STARTED_COUNT: AtomicUsize = AtomicUsize::new(1);
static CPU_COUNT: AtomicUsize = AtomicUsize::new(1);

pub fn per_cpu(cpu: usize) -> &'static PerCpu {
    &PER_CPU[cpu]
}

pub fn cpu_count() -> usize {
    CPU_COUNT.load(Ordering::Acquire)
}

/// Resolve the running CPU's index from its LAPIC id (populated during
/// `bring_up_aps`/`ap_entry`). Used by the timer interrupt handler to find
/// its own per-CPU scheduler block.
pub fn current_cpu() -> usize {
    let lapic_id = apic::read_id().unwrap_or(0);
    LAPIC_TO_CPU
        .iter()
        .position(|slot| slot.load(Ordering::Acquire) == lapic_id)
        .unwrap_or(0)
}

/// BSP-side bring-up (spec.md §4.3 "AP bring-up protocol", steps 1-3).
///
/// `ap_entry_phys` is the physical address of the AP real-mode trampoline
/// stub; building and placing that stub is outside this kernel's scope
/// (owned by the boot glue that reserves low memory for it).
pub fn bring_up_aps(info: &SmpInfo, ap_entry_phys: u64) {
    PER_CPU[0].set_state(CpuState::Online);
    LAPIC_TO_CPU[0].store(info.bsp_lapic_id, Ordering::Release);

    let mut expected = 1usize;
    for entry in info.entries {
        if entry.lapic_id == info.bsp_lapic_id {
            continue;
        }
        let cpu = expected;
        if cpu >= MAX_CPUS {
            log::warn!("[SMP] dropping CPU lapic={} past MAX_CPUS", entry.lapic_id);
            continue;
        }
        PER_CPU[cpu].set_state(CpuState::Starting);
        LAPIC_TO_CPU[cpu].store(entry.lapic_id, Ordering::Release);
        entry.goto_address.store(ap_entry_phys, Ordering::SeqCst);

        let _ = apic::send_init_ipi(entry.lapic_id);
        let _ = apic::send_startup_ipi(entry.lapic_id, (ap_entry_phys >> 12) as u8);

        expected += 1;
    }
    CPU_COUNT.store(expected, Ordering::Release);

    let mut spins = 0u64;
    while STARTED_COUNT.load(Ordering::SeqCst) < expected && spins < STARTUP_TIMEOUT_SPINS {
        core::hint::spin_loop();
        spins += 1;
    }
    let started = STARTED_COUNT.load(Ordering::SeqCst);
    if started < expected {
        log::warn!(
            "[SMP] bring-up timed out: {started}/{expected} CPUs started"
        );
    } else {
        log::info!("[SMP] {started} CPUs online");
    }
}

/// AP-side entry (spec.md §4.3 "Each AP", steps 1-7). The assembly
/// trampoline reads its own LAPIC id and picks `cpu`/`kernel_stack_top`
/// before jumping here; `timer_*` are the BSP-calibrated values
/// (spec.md §4.4).
pub fn ap_entry(
    lapic_id: u8,
    cpu: usize,
    kernel_stack_top: u64,
    timer_vector: u8,
    timer_divide: u8,
    timer_initial_count: u32,
) -> ! {
    PER_CPU[cpu].set_state(CpuState::Online);
    STARTED_COUNT.fetch_add(1, Ordering::SeqCst);

    gdt::init_for_cpu(cpu);
    gdt::set_kernel_stack(cpu, kernel_stack_top);
    crate::arch::x86_64::idt::load();

    let _ = apic::setup_timer(timer_vector, timer_divide, timer_initial_count);

    log::info!("[SMP] CPU {cpu} (lapic {lapic_id}) online");

    crate::arch::enable_interrupts();
    loop {
        crate::arch::idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_cpu_state_round_trips() {
        let cpu = PerCpu::new();
        assert_eq!(cpu.state(), CpuState::Offline);
        cpu.set_state(CpuState::Online);
        assert_eq!(cpu.state(), CpuState::Online);
    }

    #[test]
    fn bring_up_counts_non_bsp_entries() {
        let entries = [
            CpuEntry { lapic_id: 0, goto_address: AtomicU64::new(0) },
            CpuEntry { lapic_id: 1, goto_address: AtomicU64::new(0) },
        ];
        // Only asserts the entry shape compiles and is inspectable; the
        // actual bring-up barrier requires real APIC hardware to observe.
        assert_eq!(entries[1].lapic_id, 1);
    }
}
