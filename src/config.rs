//! Compile-time kernel tunables.
//!
//! This is firmware: there is no filesystem to parse a config file from
//! before the VFS collaborator comes up, so "configuration" means the
//! constants below, the way the teacher's `kernel/src/lib` constants and
//! `Cargo.toml` feature flags play the same role.

/// Timeout for the per-process mutex (spec.md §3, "Process").
pub const PROC_MTX_TIMEOUT_US: u64 = 50_000;

/// Maximum number of memory-map regions tracked per process (spec.md §3/§4.7).
pub const MAX_MEMMAP_REGIONS: usize = 16;

/// Maximum number of drivers the registry can hold (spec.md §4.6).
pub const MAX_DRIVERS: usize = 32;

/// Stack alignment invariant: a power-of-two alignment >= 16 bytes (spec.md §3).
pub const STACK_ALIGNMENT: usize = 16;

/// Stack size for the statically-allocated idle thread (spec.md §4.3).
pub const IDLE_STACK_SIZE: usize = 1024;

/// Timer-tick period driving preemption (spec.md §4.3, §8 scenario 1).
pub const TIMER_TICK_US: u64 = 10_000;

/// Number of signal-handler slots per process; slot 0 is the return
/// trampoline (spec.md §4.7 / §9).
pub const SIG_COUNT: usize = 32;

/// Stack sentinel poisoned into SP/GP/TP/RA of a freshly created user
/// thread so that touching them before the thread sets up its own
/// environment faults immediately (spec.md §4.2).
pub const USER_THREAD_POISON: u32 = 0xDEAD_C0DE;

/// Largest `Write` command payload an I²C transaction inlines into the
/// command record itself before falling back to a caller-owned buffer
/// (spec.md §3, "I²C transaction").
pub const I2C_INLINE_THRESHOLD: usize = 8;

const fn is_pow2(n: usize) -> bool {
    n != 0 && (n & (n - 1)) == 0
}

const _: () = assert!(is_pow2(STACK_ALIGNMENT) && STACK_ALIGNMENT >= 16);
