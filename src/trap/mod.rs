//! Trap/interrupt entry-exit path (spec.md §4.3).
//!
//! Grounded on BadgeOS's `cpu/rv32imac/src/isr.c`: the trap name table and
//! `MEM_ADDR_TRAPS` bitmask are taken verbatim, and the double-trap latch
//! is the same one-shot `bool` the C code uses — a trap taken while
//! already inside the trap handler is unrecoverable and halts immediately
//! rather than risking a recursive fault. Unlike the C placeholder (whose
//! own comment says "will be removed eventually" and unconditionally
//! halts on every non-syscall trap), this handler actually dispatches:
//! external interrupts reach [`crate::irq::dispatch`], the timer tick
//! reaches [`crate::sched`], and only a genuine exception is fatal.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::riscv::context::{ctxswitch_get, ctxswitch_set, kernel_ctx_get, kernel_ctx_set};

/// Bitmask of exception causes that carry a faulting address in `mtval`
/// (BadgeOS `isr.c`: `0x00050f0`).
pub const MEM_ADDR_TRAPS: u32 = 0x0005_0f0;

/// `mcause` exception codes with a human-readable name, 1:1 with
/// BadgeOS's `trapnames[]`. Index by exception code; `None` entries are
/// reserved encodings.
pub const TRAPNAMES: &[Option<&str>] = &[
    Some("Instruction address misaligned"),
    Some("Instruction access fault"),
    Some("Illegal instruction"),
    Some("Breakpoint"),
    Some("Load address misaligned"),
    Some("Load access fault"),
    Some("Store address misaligned"),
    Some("Store access fault"),
    Some("ECALL from U-mode"),
    Some("ECALL from S-mode"),
    None, // reserved
    Some("ECALL from M-mode"),
    Some("Instruction page fault"),
    Some("Load page fault"),
    None, // reserved
    Some("Store page fault"),
];

/// `mcause` exception code for an environment call from U-mode: the fast
/// syscall path (spec.md §4.3).
pub const CAUSE_ECALL_FROM_U: u32 = 0x08;
/// `mcause` interrupt code for the machine-mode timer, driving preemption.
pub const CAUSE_TIMER: u32 = 0x07;
/// `mcause` interrupt code for machine-mode external interrupts.
pub const CAUSE_EXTERNAL: u32 = 0x0b;
/// Set when `mcause`'s top bit is set: this cause is an interrupt, not an
/// exception.
pub const INTERRUPT_BIT: u32 = 1 << 31;

pub fn trap_name(cause: u32) -> Option<&'static str> {
    TRAPNAMES.get(cause as usize).copied().flatten()
}

/// Set for the duration of trap handling; a trap taken while this is
/// already set means the kernel faulted while handling a fault, which it
/// cannot recover from (spec.md §7).
static DOUBLE_TRAP: AtomicBool = AtomicBool::new(false);

/// Entered once for every trap taken in machine mode, after the assembly
/// entry stub has saved registers. Never returns if the trap is fatal;
/// otherwise falls through to the common trap-exit path, which applies
/// any pending context switch.
#[cfg(target_arch = "riscv32")]
pub extern "C" fn trap_handler() {
    if DOUBLE_TRAP.swap(true, Ordering::SeqCst) {
        crate::panic::fatal(format_args!("double trap"));
    }

    let mcause: u32;
    let mepc: u32;
    let mtval: u32;
    unsafe {
        core::arch::asm!("csrr {0}, mcause", out(reg) mcause);
        core::arch::asm!("csrr {0}, mepc", out(reg) mepc);
        core::arch::asm!("csrr {0}, mtval", out(reg) mtval);
    }

    // Persist the trapped PC into the interrupted thread's own saved
    // register file before doing anything else. If this trap ends up
    // switching away from it, `trap_exit` needs a correct `pc` to resume
    // from later; if it doesn't, this is a harmless no-op restore.
    unsafe {
        let ctx = kernel_ctx_get();
        if !ctx.is_null() {
            let regs = (*ctx).regs;
            if !regs.is_null() {
                (*regs).pc = mepc;
            }
        }
    }

    if mcause & INTERRUPT_BIT != 0 {
        let code = mcause & !INTERRUPT_BIT;
        match code {
            CAUSE_TIMER => crate::sched::on_tick(),
            CAUSE_EXTERNAL => {
                let _ = crate::irq::dispatch();
            }
            _ => log::warn!("unhandled interrupt cause {code}"),
        }
    } else {
        handle_exception(mcause, mepc, mtval);
    }

    DOUBLE_TRAP.store(false, Ordering::SeqCst);
    trap_exit();
}

fn handle_exception(mcause: u32, mepc: u32, mtval: u32) {
    let name = trap_name(mcause).unwrap_or("Unknown");
    if mtval != 0 && (1u32.checked_shl(mcause).unwrap_or(0) & MEM_ADDR_TRAPS) != 0 {
        crate::panic::fatal(format_args!(
            "trap {mcause:#x} ({name}) at pc {mepc:#x} while accessing {mtval:#x}"
        ));
    }
    crate::panic::fatal(format_args!("trap {mcause:#x} ({name}) at pc {mepc:#x}"));
}

/// Fast path for `ECALL from U-mode`: the assembly entry stub only saves
/// `t0..t3`, `sp`, `gp`, `tp` and `ra` before reaching here (spec.md
/// §4.3), so this must not assume the rest of the register file is
/// current.
#[cfg(target_arch = "riscv32")]
pub extern "C" fn syscall_handler(a0: u32, a1: u32, a2: u32, a3: u32, sysno: u32) -> u32 {
    crate::syscall::dispatch(sysno, a0, a1, a2, a3)
}

/// Common trap-exit logic: if the running thread requested a context
/// switch, perform it now rather than mid-trap (spec.md §4.3's "observed
/// at trap exit, not mid-trap" invariant), and reap any thread that was
/// marked detached while not running.
#[cfg(target_arch = "riscv32")]
fn trap_exit() {
    let target = ctxswitch_get();
    if !target.is_null() {
        // Clear the request on the outgoing context before switching away
        // from it, or its next trap would see this same stale target and
        // switch again unasked.
        ctxswitch_set(core::ptr::null_mut());
        crate::sched::reap_detached();
        kernel_ctx_set(target);
        unsafe {
            let regs = (*target).regs;
            if !regs.is_null() {
                let pc = (*regs).pc;
                core::arch::asm!("csrw mepc, {0}", in(reg) pc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_name_resolves_known_codes() {
        assert_eq!(trap_name(0x02), Some("Illegal instruction"));
        assert_eq!(trap_name(CAUSE_ECALL_FROM_U), Some("ECALL from U-mode"));
    }

    #[test]
    fn trap_name_is_none_for_reserved_codes() {
        assert_eq!(trap_name(0x0a), None);
        assert_eq!(trap_name(0x0e), None);
    }

    #[test]
    fn mem_addr_traps_covers_load_and_store_faults() {
        assert_ne!(MEM_ADDR_TRAPS & (1 << 0x05), 0); // load access fault
        assert_ne!(MEM_ADDR_TRAPS & (1 << 0x07), 0); // store access fault
        assert_eq!(MEM_ADDR_TRAPS & (1 << 0x02), 0); // illegal instruction has no address
    }
}
