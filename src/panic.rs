//! Panic handling and the `assert_always!` fatal-condition macro.
//!
//! Grounded on the teacher's `src/lib/panic.rs` (log-then-halt panic
//! handler) and BadgeOS's `include/assertions.h`, which prints the failing
//! condition, file, line and function before powering off.

use core::sync::atomic::{AtomicBool, Ordering};

/// Set once a halt has been requested, so a panic-during-panic doesn't
/// recurse into the logging path.
static HALTING: AtomicBool = AtomicBool::new(false);

/// Halts the CPU forever. On real hardware this loops on `wfi`; under host
/// tests it just spins, since tests never reach it outside of a `should_panic`.
pub fn halt() -> ! {
    #[cfg(target_arch = "riscv32")]
    loop {
        unsafe { core::arch::asm!("wfi") }
    }
    #[cfg(not(target_arch = "riscv32"))]
    loop {
        core::hint::spin_loop();
    }
}

/// Prints a fatal diagnostic and halts. Used both by the `#[panic_handler]`
/// and by `assert_always!` for conditions the kernel refuses to continue
/// past (spec.md §7: double trap, unhandled IRQ, assertion failure in
/// release, DTB magic mismatch, early alloc failure).
pub fn fatal(args: core::fmt::Arguments) -> ! {
    if !HALTING.swap(true, Ordering::SeqCst) {
        crate::log::log(crate::log::Level::Fatal, args);
    }
    halt()
}

#[cfg(not(test))]
#[panic_handler]
fn panic_handler(info: &core::panic::PanicInfo) -> ! {
    fatal(format_args!("panic: {}", info));
}

/// A condition the kernel refuses to continue past. Prints condition, file,
/// line and function, then halts — mirrors BadgeOS's `assert_always`.
#[macro_export]
macro_rules! assert_always {
    ($cond:expr) => {
        if !($cond) {
            $crate::panic::fatal(format_args!(
                "assertion failed: `{}` at {}:{}:{} in {}",
                stringify!($cond),
                file!(),
                line!(),
                column!(),
                {
                    fn f() {}
                    fn type_name_of<T>(_: T) -> &'static str {
                        core::any::type_name::<T>()
                    }
                    let name = type_name_of(f);
                    &name[..name.len() - 3]
                }
            ));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !($cond) {
            $crate::panic::fatal(format_args!(
                "assertion failed: `{}` at {}:{}: {}",
                stringify!($cond),
                file!(),
                line!(),
                format_args!($($arg)+)
            ));
        }
    };
}
