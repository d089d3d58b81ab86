//! Kernel entry point for rv32imac boards (ESP32-C6/P4 class).
//!
//! The loader hands off a pointer to the flattened device tree blob and
//! jumps here in machine mode with interrupts masked. Boot order mirrors
//! spec.md §4.6 ("drivers bind only after the tree is indexed and the
//! trap vector is live"): install the trap vector, bring up the heap,
//! install the log bridge, open the DTB, bind drivers against it, start
//! the idle thread, then unmask interrupts and fall into the scheduler's
//! wait-for-interrupt idle loop.

#![cfg_attr(not(test), no_std)]
#![no_main]

use kernel::arch::riscv;
use kernel::config::IDLE_STACK_SIZE;
use kernel::{driver, dtb, log, panic, sched};

/// Pointer to the flattened device tree blob, written by the loader before
/// jumping to `_start`. Named the way the teacher's own boot handoff
/// statics are: a single `#[no_mangle]` slot the assembly stub fills in.
#[no_mangle]
pub static mut DTB_PTR: *const u8 = core::ptr::null();

/// Length of the blob at `DTB_PTR`, also loader-supplied.
#[no_mangle]
pub static mut DTB_LEN: usize = 0;

const HEAP_SIZE: usize = 64 * 1024;

#[repr(align(16))]
struct Heap([u8; HEAP_SIZE]);
static mut HEAP: Heap = Heap([0; HEAP_SIZE]);

#[global_allocator]
static ALLOCATOR: linked_list_allocator::LockedHeap = linked_list_allocator::LockedHeap::empty();

fn init_heap() {
    unsafe {
        let start = core::ptr::addr_of_mut!(HEAP.0) as *mut u8;
        ALLOCATOR.lock().init(start, HEAP_SIZE);
    }
}

extern "C" fn idle_entry(_arg: usize) -> ! {
    loop {
        #[cfg(target_arch = "riscv32")]
        unsafe {
            core::arch::asm!("wfi");
        }
        #[cfg(not(target_arch = "riscv32"))]
        core::hint::spin_loop();
    }
}

/// Entered once, from the assembly reset stub, with a single hart live and
/// everything else (stacks, `.bss`) already zeroed.
#[cfg(target_arch = "riscv32")]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    init_heap();
    log::init();
    log::log(log::Level::Info, format_args!("boot: rv32imac kernel starting"));

    riscv::install_trap_vector();

    let dtb_ptr = unsafe { DTB_PTR };
    let dtb_len = unsafe { DTB_LEN };
    if dtb_ptr.is_null() {
        panic::fatal(format_args!("boot: no device tree blob handed off by loader"));
    }
    let dtb_bytes = unsafe { core::slice::from_raw_parts(dtb_ptr, dtb_len) };
    let handle = dtb::Handle::open(dtb_bytes);
    if handle.has_errors {
        panic::fatal(format_args!("boot: device tree blob failed validation"));
    }

    let root = handle.root_node();
    let soc = handle.find_node("/soc");
    let bus = if soc.valid { soc } else { root };
    match driver::bind(&handle, bus) {
        Ok(count) => log::log(log::Level::Info, format_args!("boot: bound {count} driver(s)")),
        Err(_) => log::log(log::Level::Warn, format_args!("boot: driver binding reported a failure")),
    }

    static mut IDLE_STACK: [u8; IDLE_STACK_SIZE] = [0; IDLE_STACK_SIZE];
    let stack_top = unsafe { core::ptr::addr_of_mut!(IDLE_STACK) as usize + IDLE_STACK_SIZE };
    match sched::create_kernel_thread(idle_entry, 0, stack_top, IDLE_STACK_SIZE, sched::Priority::Low) {
        Ok(idle) => unsafe { sched::resume(idle) },
        Err(_) => panic::fatal(format_args!("boot: failed to create the idle thread")),
    }

    riscv::enable_interrupts();
    idle_entry(0)
}

#[cfg(not(target_arch = "riscv32"))]
fn main() {}
