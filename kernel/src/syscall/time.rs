//! Time-domain syscalls (`0x03xx`): built on the scheduler's monotonic
//! tick counter (SPEC_FULL.md §11) -- no separate clock source.

use crate::error::KResult;
use crate::sched::scheduler;

pub fn sys_time() -> u64 {
    scheduler::ticks()
}

/// `nanosleep(ns)`: cooperative spin-yield until at least one tick has
/// elapsed past the requested duration. This kernel has no sub-tick
/// timer resolution, so anything shorter than one tick period still
/// yields at least once.
pub fn sys_nanosleep(ns: u64) -> KResult<isize> {
    const NS_PER_TICK: u64 = 10_000_000; // matches the ~10ms PIT/APIC period
    let ticks_needed = ns.div_ceil(NS_PER_TICK).max(1);
    let deadline = scheduler::ticks() + ticks_needed;
    while scheduler::ticks() < deadline {
        scheduler::yield_now();
    }
    Ok(0)
}
