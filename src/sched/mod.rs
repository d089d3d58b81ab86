//! Cooperative-preemptive thread scheduler (spec.md §3 "Thread", §4.2,
//! §4.3, §8).
//!
//! Grounded on BadgeOS's `include/scheduler.h`: thread lifecycle
//! (`create_kernel_thread`/`create_userland_thread`, `suspend`/`resume`,
//! `detach`, `destroy`, `yield`, `exit`), and its three priority values
//! (`SCHED_PRIO_LOW`/`NORMAL`/`HIGH` = 0/10/20). Per spec.md §9 these are
//! kept as opaque labels rather than quantum weights: every runnable
//! thread gets an equal round-robin turn regardless of priority, and
//! priority exists only to be read back by a thread (e.g. for logging or
//! future policy), not to bias the runqueue today — see DESIGN.md for the
//! full rationale.
//!
//! The runqueue is the intrusive [`crate::collections::dlist`] the
//! teacher's own list-based structures use elsewhere; threads are
//! heap-allocated (`alloc::boxed::Box`) and live at a stable address for
//! as long as they're linked in, same requirement the dlist API already
//! documents.

use alloc::boxed::Box;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, AtomicU32, Ordering};

use spin::Mutex;

use crate::arch::riscv::context::{init_kernel_regs, init_user_regs, KernelCtx};
use crate::arch::riscv::regs::RegisterFile;
use crate::collections::dlist::{DList, DListNode};
use crate::config::STACK_ALIGNMENT;
use crate::err::{ErrorKind, ErrorLocation, KernelError};

/// A kernel thread's entry function: `arg` in, no meaningful return value.
/// Per spec.md §4.2 a thread that returns from this is handled identically
/// to one that calls [`exit`] explicitly — both fall through the same
/// trampoline (see [`crate::arch::riscv::context`]).
pub type ThreadEntry = extern "C" fn(usize);

/// Opaque scheduling class (spec.md §9: labels only, not quantum weights).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    /// The numeric value BadgeOS assigns each class. Kept for parity with
    /// diagnostics and wire formats that expect it; the scheduler itself
    /// never reads it.
    pub const fn as_u8(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 10,
            Priority::High => 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    New,
    Runnable,
    Running,
    Suspended,
    Completed,
}

/// A schedulable unit of execution.
#[repr(C)]
pub struct Thread {
    link: DListNode,
    pub priority: Priority,
    state: Mutex<ThreadState>,
    detached: AtomicBool,
    pub ctx: KernelCtx,
    regs: RegisterFile,
    /// Lowest valid address of this thread's stack (exclusive): spec.md §3
    /// / §8 invariant 1, `stack_bottom < saved_sp <= stack_top`.
    stack_bottom: usize,
    /// Highest valid address of this thread's stack (inclusive bound, the
    /// value `sp` is initialized to).
    stack_top: usize,
    exit_code: AtomicI32,
}

impl Thread {
    fn new(
        priority: Priority,
        regs: RegisterFile,
        stack_bottom: usize,
        stack_top: usize,
    ) -> Box<Thread> {
        let mut thread = Box::new(Thread {
            link: DListNode::new(),
            priority,
            state: Mutex::new(ThreadState::New),
            detached: AtomicBool::new(false),
            ctx: KernelCtx::new(core::ptr::null_mut()),
            regs,
            stack_bottom,
            stack_top,
            exit_code: AtomicI32::new(0),
        });
        thread.ctx.regs = &mut thread.regs as *mut RegisterFile;
        thread
    }

    pub fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }

    pub fn stack_bounds(&self) -> (usize, usize) {
        (self.stack_bottom, self.stack_top)
    }

    /// `true` iff the thread's saved stack pointer still satisfies
    /// spec.md §8 invariant 1: `stack_bottom < saved_sp <= stack_top`.
    fn sp_in_bounds(&self) -> bool {
        let sp = self.regs.x2_sp as usize;
        sp > self.stack_bottom && sp <= self.stack_top
    }
}

fn node_ptr(thread: &Thread) -> NonNull<DListNode> {
    unsafe { NonNull::new_unchecked(core::ptr::addr_of!(thread.link) as *mut DListNode) }
}

unsafe fn thread_of(node: NonNull<DListNode>) -> *mut Thread {
    let offset = core::mem::offset_of!(Thread, link);
    (node.as_ptr() as *mut u8).sub(offset) as *mut Thread
}

struct Scheduler {
    runqueue: DList,
    /// Threads whose successor has already started running but that are
    /// still linked until the trap-exit path reaps them (spec.md §4.3:
    /// "detach happens before reap, and reap happens only once the
    /// successor context is live").
    reap_pending: DList,
    ticks: AtomicU32,
}

impl Scheduler {
    const fn new() -> Self {
        Self {
            runqueue: DList::new(),
            reap_pending: DList::new(),
            ticks: AtomicU32::new(0),
        }
    }
}

static SCHED: Mutex<Scheduler> = Mutex::new(Scheduler::new());

/// The thread whose context is (or is about to become) live. Tracked
/// independently of `mscratch` so the bookkeeping in [`yield_now`]/[`exit`]
/// stays host-testable without a real CSR to read (spec.md §3: "current
/// context" is a hardware concept on-target, but the scheduler's notion of
/// "who is running" is the same either way).
static CURRENT: AtomicPtr<Thread> = AtomicPtr::new(core::ptr::null_mut());

pub fn current() -> *mut Thread {
    CURRENT.load(Ordering::Acquire)
}

/// # Safety
/// `thread` must be a live pointer returned by `create_kernel_thread` or
/// `create_user_thread`, or null.
unsafe fn set_current(thread: *mut Thread) {
    CURRENT.store(thread, Ordering::Release);
}

/// Creates a suspended kernel-mode thread. The caller must [`resume`] it
/// to make it schedulable.
pub fn create_kernel_thread(
    entry: ThreadEntry,
    arg: usize,
    stack_top: usize,
    stack_size: usize,
    priority: Priority,
) -> Result<*mut Thread, KernelError> {
    if stack_top % STACK_ALIGNMENT != 0 {
        return Err(KernelError::new(ErrorKind::Param, ErrorLocation::Threads));
    }
    if stack_size == 0 || stack_size > stack_top {
        return Err(KernelError::new(ErrorKind::Param, ErrorLocation::Threads));
    }
    let stack_bottom = stack_top - stack_size;
    let regs = init_kernel_regs(entry as usize, arg, stack_top);
    let thread = Thread::new(priority, regs, stack_bottom, stack_top);
    Ok(Box::into_raw(thread))
}

/// Creates a suspended user-mode thread. Per spec.md §4.2 the thread has
/// no initial stack pointer of its own choosing set up beyond the
/// poisoned sentinel; userland's own entry point is responsible for
/// establishing its real stack before touching `sp`.
pub fn create_user_thread(
    entry: usize,
    stack_top: usize,
    stack_size: usize,
    priority: Priority,
) -> Result<*mut Thread, KernelError> {
    if stack_size == 0 || stack_size > stack_top {
        return Err(KernelError::new(ErrorKind::Param, ErrorLocation::Threads));
    }
    let stack_bottom = stack_top - stack_size;
    let regs = init_user_regs(entry, stack_top);
    let thread = Thread::new(priority, regs, stack_bottom, stack_top);
    Ok(Box::into_raw(thread))
}

/// Makes a `New` or `Suspended` thread runnable. The very first thread
/// ever resumed becomes [`current`] by convention, mirroring a real boot
/// sequence where the boot stack's context becomes "the running thread"
/// the moment something is there to switch away from it.
///
/// # Safety
/// `thread` must be a live pointer returned by `create_kernel_thread` or
/// `create_user_thread` that has not already been destroyed.
pub unsafe fn resume(thread: *mut Thread) {
    let thread_ref = &*thread;
    {
        let mut state = thread_ref.state.lock();
        if *state == ThreadState::Completed {
            return;
        }
        *state = ThreadState::Runnable;
    }
    if current().is_null() {
        *thread_ref.state.lock() = ThreadState::Running;
        set_current(thread);
        return;
    }
    let mut sched = SCHED.lock();
    sched.runqueue.append(node_ptr(thread_ref));
}

/// Suspends a runnable thread; it will not be scheduled again until
/// [`resume`] is called.
///
/// # Safety
/// Same requirement as [`resume`].
pub unsafe fn suspend(thread: *mut Thread) {
    let thread_ref = &*thread;
    let mut state = thread_ref.state.lock();
    if *state != ThreadState::Suspended {
        *state = ThreadState::Suspended;
        drop(state);
        let mut sched = SCHED.lock();
        if sched.runqueue.contains(node_ptr(thread_ref)) {
            sched.runqueue.remove(node_ptr(thread_ref));
        }
    }
}

/// Marks a thread to be destroyed automatically once it completes,
/// instead of requiring an explicit `destroy` call.
///
/// # Safety
/// Same requirement as [`resume`].
pub unsafe fn detach(thread: *mut Thread) {
    (*thread).detached.store(true, Ordering::Release);
}

/// Releases a thread's scheduler resources. Only valid once the thread is
/// `Completed` or was never resumed.
///
/// # Safety
/// `thread` must not be referenced again after this call, and must not be
/// the currently running thread.
pub unsafe fn destroy(thread: *mut Thread) {
    drop(Box::from_raw(thread));
}

/// Reaps any threads queued for destruction by the trap-exit path once
/// their successor context is confirmed live (spec.md §4.3). Threads that
/// exited without being detached stay `Completed` and linger until an
/// explicit `destroy`.
pub fn reap_detached() {
    let mut sched = SCHED.lock();
    while let Some(node) = unsafe { sched.reap_pending.pop_front() } {
        let thread = unsafe { thread_of(node) };
        unsafe { destroy(thread) };
    }
}

/// Called from the trap handler once per timer interrupt (spec.md §4.3).
/// Advances the tick count driving both the cooperative quantum and
/// [`crate::sync`]'s timeout clock, then requests preemption.
pub fn on_tick() {
    SCHED.lock().ticks.fetch_add(1, Ordering::Relaxed);
    crate::sync::tick();
    preempt();
}

/// Picks the next runnable thread, round-robin, with no priority
/// weighting (spec.md §9). The runqueue only ever holds `Runnable`
/// threads waiting for their turn — the currently `Running` one is
/// tracked solely via [`current`], not left sitting in the queue — so
/// popping the front here always yields a genuinely different thread to
/// switch to. Returns `None` when the runqueue is empty, meaning nothing
/// is waiting and whatever is current keeps running; there is no
/// sentinel "idle thread" object, idleness is the absence of a candidate
/// (spec.md §4.2).
pub fn pick_next() -> Option<NonNull<DListNode>> {
    let mut sched = SCHED.lock();
    unsafe { sched.runqueue.pop_front() }
}

/// Requests a context switch to the next runnable thread, if any (spec.md
/// §4.3 Preemption: "request a context switch to the next thread on the
/// runqueue"). A no-op when the runqueue is empty — whatever is currently
/// running keeps going. Otherwise the outgoing thread (if still meant to
/// run again) is requeued at the tail before the incoming one becomes
/// current, which is what makes this round-robin rather than a one-way
/// handoff. The switch is only a request: it takes effect at the next
/// trap exit ([`crate::arch::riscv::context::ctxswitch_set`]), never
/// mid-call.
fn preempt() {
    let Some(node) = pick_next() else { return };
    let next = unsafe { thread_of(node) };
    let previous = current();
    if !previous.is_null() && previous != next {
        let still_running = {
            let mut state = unsafe { (*previous).state.lock() };
            if *state == ThreadState::Running {
                *state = ThreadState::Runnable;
                true
            } else {
                false
            }
        };
        if still_running {
            let mut sched = SCHED.lock();
            unsafe { sched.runqueue.append(node_ptr(&*previous)) };
        }
    }
    *unsafe { (*next).state.lock() } = ThreadState::Running;
    unsafe { set_current(next) };
    #[cfg(target_arch = "riscv32")]
    unsafe {
        crate::arch::riscv::context::ctxswitch_set(core::ptr::addr_of_mut!((*next).ctx));
    }
}

/// Voluntarily gives up the remainder of the current thread's quantum
/// (spec.md §4.3 `yield`). Asserts a thread is actually current and
/// validates its saved stack pointer against under/overflow both before
/// requesting the switch and again once this thread is current once more
/// (spec.md §4.3: "Stack is validated against under/overflow before and
/// after"; spec.md §8 invariant 1: `stack_bottom < saved_sp <=
/// stack_top`).
pub fn yield_now() {
    let thread = current();
    assert!(!thread.is_null(), "yield_now called with no current thread");
    let thread_ref = unsafe { &*thread };
    assert!(
        thread_ref.sp_in_bounds(),
        "thread's saved stack pointer is out of bounds before yield"
    );
    preempt();
    assert!(
        thread_ref.sp_in_bounds(),
        "thread's saved stack pointer is out of bounds after yield"
    );
}

/// Terminates the current thread with `code` (spec.md §4.3 `exit`, §8
/// scenario 1: "exit(c); join observes c"). Marks it `Completed`, removes
/// it from the runqueue so it is never picked again, and — if it was
/// [`detach`]ed — moves it onto the reap queue for the trap-exit path to
/// free once the successor context is live (spec.md §4.3). Never returns.
pub fn exit(code: i32) -> ! {
    let thread = current();
    assert!(!thread.is_null(), "exit called with no current thread");
    let thread_ref = unsafe { &*thread };
    *thread_ref.state.lock() = ThreadState::Completed;
    thread_ref.exit_code.store(code, Ordering::Release);

    let mut sched = SCHED.lock();
    if sched.runqueue.contains(node_ptr(thread_ref)) {
        unsafe { sched.runqueue.remove(node_ptr(thread_ref)) };
    }
    if thread_ref.is_detached() {
        unsafe { sched.reap_pending.append(node_ptr(thread_ref)) };
    }
    drop(sched);

    yield_now();
    loop {
        #[cfg(target_arch = "riscv32")]
        unsafe {
            core::arch::asm!("wfi");
        }
        #[cfg(not(target_arch = "riscv32"))]
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn dummy_entry(_arg: usize) {}

    #[test]
    fn rejects_misaligned_kernel_stack() {
        let result = create_kernel_thread(dummy_entry, 0, 0x1001, 0x1000, Priority::Normal);
        assert_eq!(result.unwrap_err().kind, ErrorKind::Param);
    }

    #[test]
    fn rejects_stack_size_larger_than_stack_top() {
        let result = create_kernel_thread(dummy_entry, 0, 0x1000, 0x2000, Priority::Normal);
        assert_eq!(result.unwrap_err().kind, ErrorKind::Param);
    }

    #[test]
    fn resume_makes_thread_runnable_and_pickable() {
        let thread = create_kernel_thread(dummy_entry, 0, 0x2000, 0x1000, Priority::Normal).unwrap();
        unsafe {
            // Pretend something else is already current, so `resume` queues
            // `thread` as Runnable instead of bootstrapping it as current —
            // exercising the same path a second/third thread takes.
            set_current(thread);
            resume(thread);
        }
        let picked = pick_next();
        assert!(picked.is_some());
        unsafe {
            suspend(thread);
            destroy(thread);
            set_current(core::ptr::null_mut());
        }
    }

    #[test]
    fn priority_values_match_badgeos_constants() {
        assert_eq!(Priority::Low.as_u8(), 0);
        assert_eq!(Priority::Normal.as_u8(), 10);
        assert_eq!(Priority::High.as_u8(), 20);
    }

    #[test]
    fn fresh_thread_stack_pointer_starts_in_bounds() {
        let thread = create_kernel_thread(dummy_entry, 0, 0x3000, 0x1000, Priority::Low).unwrap();
        let (bottom, top) = unsafe { (*thread).stack_bounds() };
        assert_eq!(bottom, 0x2000);
        assert_eq!(top, 0x3000);
        assert!(unsafe { (*thread).sp_in_bounds() });
        unsafe { destroy(thread) };
    }

    #[test]
    fn yield_then_exit_round_trip_observes_exit_code() {
        let a = create_kernel_thread(dummy_entry, 0, 0x4000, 0x1000, Priority::Normal).unwrap();
        let b = create_kernel_thread(dummy_entry, 0, 0x5000, 0x1000, Priority::Normal).unwrap();
        unsafe {
            set_current(core::ptr::null_mut());
            resume(a);
            resume(b);
        }
        assert_eq!(unsafe { (*a).state() }, ThreadState::Running);

        yield_now();
        assert_eq!(current(), b, "round-robin yield should hand off to the next thread");

        unsafe {
            set_current(a);
        }
        assert_eq!(unsafe { (*a).exit_code() }, 0);
        unsafe {
            (*a).state.lock().clone_from(&ThreadState::Running);
            detach(a);
            if SCHED.lock().runqueue.contains(node_ptr(&*a)) {
                SCHED.lock().runqueue.remove(node_ptr(&*a));
            }
            SCHED.lock().runqueue.append(node_ptr(&*a));
        }

        // exit() never returns; drive its body directly here so the test
        // itself can keep running afterwards instead of diverging.
        *unsafe { (*a).state.lock() } = ThreadState::Completed;
        unsafe { (*a).exit_code.store(42, Ordering::Release) };
        let mut sched = SCHED.lock();
        if sched.runqueue.contains(node_ptr(unsafe { &*a })) {
            unsafe { sched.runqueue.remove(node_ptr(&*a)) };
        }
        if unsafe { (*a).is_detached() } {
            unsafe { sched.reap_pending.append(node_ptr(&*a)) };
        }
        drop(sched);

        assert_eq!(unsafe { (*a).exit_code() }, 42);
        assert_eq!(unsafe { (*a).state() }, ThreadState::Completed);
        reap_detached();

        unsafe {
            set_current(core::ptr::null_mut());
            suspend(b);
            destroy(b);
        }
    }
}
