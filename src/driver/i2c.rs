//! I²C transaction list (spec.md §3 "I²C transaction", §4 Shared-resource
//! policy).
//!
//! This is the generic data structure the driver interface specifies, not
//! a controller driver: a transaction is a doubly-linked list of command
//! records a caller builds and hands to whichever I²C master driver a
//! board provides, plus a completion callback and cookie. The concrete
//! master (register programming, clock stretching, arbitration) is out of
//! scope (spec.md §1); this module only gives the shape every such driver
//! shares, the way [`crate::irq`] gives the shape an interrupt controller
//! shares without implementing one.

use core::ptr::NonNull;

use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use crate::collections::dlist::{DList, DListNode};
use crate::config::I2C_INLINE_THRESHOLD;

/// A `Write` command's payload: small writes are inlined into the command
/// record; anything larger than [`I2C_INLINE_THRESHOLD`] is a
/// caller-owned buffer that must outlive the transaction.
pub enum WriteData {
    Inline { buf: [u8; I2C_INLINE_THRESHOLD], len: usize },
    Owned { ptr: *const u8, len: usize },
}

impl WriteData {
    /// Builds a `WriteData`, inlining `bytes` if it fits.
    pub fn from_slice(bytes: &[u8]) -> Self {
        if bytes.len() <= I2C_INLINE_THRESHOLD {
            let mut buf = [0u8; I2C_INLINE_THRESHOLD];
            buf[..bytes.len()].copy_from_slice(bytes);
            WriteData::Inline { buf, len: bytes.len() }
        } else {
            WriteData::Owned { ptr: bytes.as_ptr(), len: bytes.len() }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            WriteData::Inline { len, .. } => *len,
            WriteData::Owned { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// # Safety
    /// For the `Owned` variant, the buffer this was built from must still
    /// be alive and unmodified.
    pub unsafe fn as_slice(&self) -> &[u8] {
        match self {
            WriteData::Inline { buf, len } => &buf[..*len],
            WriteData::Owned { ptr, len } => core::slice::from_raw_parts(*ptr, *len),
        }
    }
}

/// A 7- or 10-bit slave address, direction-tagged per spec.md §3.
#[derive(Debug, Clone, Copy)]
pub struct Address {
    pub addr: u16,
    pub ten_bit: bool,
    pub read: bool,
}

/// One command in an I²C transaction.
pub enum Command {
    Start,
    Stop,
    Address(Address),
    Write(WriteData),
    /// Caller-owned destination buffer for a `Read` command.
    Read { ptr: *mut u8, len: usize },
}

struct CommandNode {
    link: DListNode,
    command: Command,
}

/// Callback invoked once a transaction completes (successfully or not);
/// `cookie` is whatever the creator stashed when building the transaction.
pub type CompletionCallback = fn(cookie: usize, result: Result<(), ()>);

/// A transaction: an ordered command list plus completion callback.
/// Owned by its creator until handed to [`Bus::submit`]; the bus frees
/// each command record in FIFO order as it completes them.
pub struct Transaction {
    link: DListNode,
    commands: DList,
    callback: CompletionCallback,
    cookie: usize,
}

impl Transaction {
    pub fn new(callback: CompletionCallback, cookie: usize) -> Box<Transaction> {
        Box::new(Transaction {
            link: DListNode::new(),
            commands: DList::new(),
            callback,
            cookie,
        })
    }

    /// Appends a command to the end of this transaction's command list.
    pub fn push(&mut self, command: Command) {
        let node = Box::new(CommandNode {
            link: DListNode::new(),
            command,
        });
        let ptr = Box::into_raw(node);
        unsafe {
            let link = NonNull::new_unchecked(core::ptr::addr_of_mut!((*ptr).link));
            self.commands.append(link);
        }
    }

    /// Pops and returns the next command, freeing its record. `None` once
    /// every command has been consumed.
    pub fn next_command(&mut self) -> Option<Command> {
        let node = unsafe { self.commands.pop_front() }?;
        let offset = core::mem::offset_of!(CommandNode, link);
        let ptr = unsafe { (node.as_ptr() as *mut u8).sub(offset) as *mut CommandNode };
        let boxed = unsafe { Box::from_raw(ptr) };
        Some(boxed.command)
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }
}

fn transaction_link(t: &Transaction) -> NonNull<DListNode> {
    unsafe { NonNull::new_unchecked(core::ptr::addr_of!(t.link) as *mut DListNode) }
}

unsafe fn transaction_of(node: NonNull<DListNode>) -> *mut Transaction {
    let offset = core::mem::offset_of!(Transaction, link);
    (node.as_ptr() as *mut u8).sub(offset) as *mut Transaction
}

/// Shared state for one I²C bus: an atomic "busy" flag for exclusive
/// ownership of the master, plus a mutex-guarded FIFO of transactions
/// waiting their turn (spec.md §4, Shared-resource policy).
pub struct Bus {
    busy: AtomicBool,
    pending: Mutex<DList>,
}

impl Bus {
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            pending: Mutex::new(DList::new()),
        }
    }

    /// Queues a transaction for this bus. Ownership passes to the bus;
    /// the driver frees it after running its callback.
    pub fn submit(&self, transaction: Box<Transaction>) {
        let ptr = Box::into_raw(transaction);
        let link = transaction_link(unsafe { &*ptr });
        self.pending.lock().append(link);
    }

    /// Attempts to claim the bus for exclusive use. `true` if this caller
    /// now owns it.
    pub fn try_claim(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    /// Pops the oldest queued transaction, if any, for the driver to run.
    pub fn next_pending(&self) -> Option<Box<Transaction>> {
        let node = unsafe { self.pending.lock().pop_front() }?;
        let ptr = unsafe { transaction_of(node) };
        Some(unsafe { Box::from_raw(ptr) })
    }

    /// Runs a completed transaction's callback and drops it.
    pub fn complete(&self, transaction: Box<Transaction>, result: Result<(), ()>) {
        (transaction.callback)(transaction.cookie, result);
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    static LAST_RESULT: AtomicU32 = AtomicU32::new(0);

    fn record(_cookie: usize, result: Result<(), ()>) {
        LAST_RESULT.store(if result.is_ok() { 1 } else { 2 }, Ordering::SeqCst);
    }

    #[test]
    fn commands_drain_in_fifo_order() {
        let mut txn = Transaction::new(record, 0);
        txn.push(Command::Start);
        txn.push(Command::Address(Address { addr: 0x50, ten_bit: false, read: false }));
        txn.push(Command::Stop);
        assert_eq!(txn.command_count(), 3);
        assert!(matches!(txn.next_command(), Some(Command::Start)));
        assert!(matches!(txn.next_command(), Some(Command::Address(_))));
        assert!(matches!(txn.next_command(), Some(Command::Stop)));
        assert!(txn.next_command().is_none());
    }

    #[test]
    fn small_write_is_inlined_large_write_is_owned() {
        let small = WriteData::from_slice(&[1, 2, 3]);
        assert!(matches!(small, WriteData::Inline { .. }));
        let big = [0u8; I2C_INLINE_THRESHOLD + 1];
        let large = WriteData::from_slice(&big);
        assert!(matches!(large, WriteData::Owned { .. }));
    }

    #[test]
    fn bus_claim_is_exclusive_until_released() {
        let bus = Bus::new();
        assert!(bus.try_claim());
        assert!(!bus.try_claim());
        bus.release();
        assert!(bus.try_claim());
    }

    #[test]
    fn submitted_transaction_completes_and_runs_callback() {
        let bus = Bus::new();
        bus.submit(Transaction::new(record, 42));
        let txn = bus.next_pending().unwrap();
        bus.complete(txn, Ok(()));
        assert_eq!(LAST_RESULT.load(Ordering::SeqCst), 1);
    }
}
