//! External interrupt channel abstraction (spec.md §3 "Interrupt
//! controller", §4.3).
//!
//! Grounded on the teacher's `arch/riscv64/interrupts.rs`: a board-supplied
//! `InterruptController` trait hides the concrete PLIC/CLIC register
//! layout, volatile register access stays inside the implementation, and
//! the kernel core only ever sees `Result<_, InterruptError>`. Channel
//! numbers are bounded `[IRQ_MIN, IRQ_MAX]` per spec.md; a caller outside
//! that range gets `InvalidChannel` rather than silently touching the
//! wrong register.

use spin::Mutex;

use crate::err::{ErrorLocation, KernelError};

/// Lowest valid interrupt channel number.
pub const IRQ_MIN: u32 = 1;
/// Highest valid interrupt channel number (rv32imac platforms in scope top
/// out at 31 external sources; spec.md §4.3).
pub const IRQ_MAX: u32 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptError {
    InvalidChannel,
    NotSupported,
    HardwareError,
}

pub type InterruptResult<T = ()> = Result<T, InterruptError>;

fn check_channel(ch: u32) -> InterruptResult<()> {
    if (IRQ_MIN..=IRQ_MAX).contains(&ch) {
        Ok(())
    } else {
        Err(InterruptError::InvalidChannel)
    }
}

impl From<InterruptError> for KernelError {
    fn from(_: InterruptError) -> Self {
        KernelError::new(crate::err::ErrorKind::Range, ErrorLocation::Driver)
    }
}

/// An interrupt service routine: the channel number that fired, and a
/// caller-supplied context pointer registered alongside it.
pub type Isr = fn(channel: u32, context: *mut ());

/// Board-supplied interrupt controller driver. The kernel core talks only
/// through this trait; it never addresses PLIC/CLIC/AIA registers itself.
pub trait InterruptController: Sync {
    fn init(&self) -> InterruptResult<()>;
    fn ch_route(&self, channel: u32, hart: u32) -> InterruptResult<()>;
    fn ch_enable(&self, channel: u32, enabled: bool) -> InterruptResult<()>;
    fn ch_prio(&self, channel: u32, priority: u8) -> InterruptResult<()>;
    fn ch_ack(&self, channel: u32) -> InterruptResult<()>;
    /// Returns the highest-priority pending channel, if any, typically via
    /// a claim/complete register.
    fn claim(&self) -> Option<u32>;
}

struct IsrSlot {
    handler: Isr,
    context: usize,
}

const MAX_CHANNELS: usize = (IRQ_MAX - IRQ_MIN + 1) as usize;

struct IsrTable {
    slots: [Option<IsrSlot>; MAX_CHANNELS],
}

impl IsrTable {
    const fn new() -> Self {
        const NONE: Option<IsrSlot> = None;
        Self {
            slots: [NONE; MAX_CHANNELS],
        }
    }
}

static CONTROLLER: Mutex<Option<&'static dyn InterruptController>> = Mutex::new(None);
static ISR_TABLE: Mutex<IsrTable> = Mutex::new(IsrTable::new());

/// Installs the board's interrupt controller driver. Call once during boot
/// before unmasking interrupts globally.
pub fn init(controller: &'static dyn InterruptController) -> InterruptResult<()> {
    controller.init()?;
    *CONTROLLER.lock() = Some(controller);
    Ok(())
}

fn with_controller<R>(f: impl FnOnce(&dyn InterruptController) -> InterruptResult<R>) -> InterruptResult<R> {
    match *CONTROLLER.lock() {
        Some(ctrl) => f(ctrl),
        None => Err(InterruptError::NotSupported),
    }
}

/// Routes `channel` to `hart`.
pub fn ch_route(channel: u32, hart: u32) -> InterruptResult<()> {
    check_channel(channel)?;
    with_controller(|c| c.ch_route(channel, hart))
}

/// Registers `isr` to run when `channel` fires. Overwrites any previous
/// registration for that channel.
pub fn ch_set_isr(channel: u32, isr: Isr, context: *mut ()) -> InterruptResult<()> {
    check_channel(channel)?;
    let idx = (channel - IRQ_MIN) as usize;
    ISR_TABLE.lock().slots[idx] = Some(IsrSlot {
        handler: isr,
        context: context as usize,
    });
    Ok(())
}

/// Enables or disables delivery of `channel`.
pub fn ch_enable(channel: u32, enabled: bool) -> InterruptResult<()> {
    check_channel(channel)?;
    with_controller(|c| c.ch_enable(channel, enabled))
}

/// Sets `channel`'s priority; higher values win ties at the controller.
pub fn ch_prio(channel: u32, priority: u8) -> InterruptResult<()> {
    check_channel(channel)?;
    with_controller(|c| c.ch_prio(channel, priority))
}

/// Acknowledges `channel` at the controller (EOI/complete).
pub fn ch_ack(channel: u32) -> InterruptResult<()> {
    check_channel(channel)?;
    with_controller(|c| c.ch_ack(channel))
}

/// Claims the next pending channel from the controller and dispatches its
/// registered ISR, if any. Called from the trap handler's external
/// interrupt path (spec.md §4.3); unregistered channels are acknowledged
/// and dropped rather than treated as fatal.
pub fn dispatch() -> InterruptResult<()> {
    let Some(channel) = with_controller(|c| Ok(c.claim()))? else {
        return Ok(());
    };
    if let Some(slot) = &ISR_TABLE.lock().slots[(channel - IRQ_MIN) as usize] {
        (slot.handler)(channel, slot.context as *mut ());
    }
    ch_ack(channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    struct FakeController;
    impl InterruptController for FakeController {
        fn init(&self) -> InterruptResult<()> {
            Ok(())
        }
        fn ch_route(&self, _c: u32, _h: u32) -> InterruptResult<()> {
            Ok(())
        }
        fn ch_enable(&self, _c: u32, _e: bool) -> InterruptResult<()> {
            Ok(())
        }
        fn ch_prio(&self, _c: u32, _p: u8) -> InterruptResult<()> {
            Ok(())
        }
        fn ch_ack(&self, _c: u32) -> InterruptResult<()> {
            Ok(())
        }
        fn claim(&self) -> Option<u32> {
            Some(5)
        }
    }
    static FAKE: FakeController = FakeController;
    static LAST_FIRED: AtomicU32 = AtomicU32::new(0);

    fn record(channel: u32, _ctx: *mut ()) {
        LAST_FIRED.store(channel, Ordering::SeqCst);
    }

    #[test]
    fn rejects_channel_out_of_range() {
        assert_eq!(ch_enable(0, true), Err(InterruptError::InvalidChannel));
        assert_eq!(ch_enable(32, true), Err(InterruptError::InvalidChannel));
    }

    #[test]
    fn dispatch_invokes_registered_isr() {
        init(&FAKE).unwrap();
        ch_set_isr(5, record, core::ptr::null_mut()).unwrap();
        dispatch().unwrap();
        assert_eq!(LAST_FIRED.load(Ordering::SeqCst), 5);
    }
}
