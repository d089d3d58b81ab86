//! Kernel log facade.
//!
//! Out of scope per spec.md §1 is the raw character-sink transport itself
//! ("rawprint... internals are uninteresting") — this module only defines
//! the `log(level, msg)` contract a board wires a sink into, plus a ring
//! buffer matching the teacher's `src/lib/printk.rs`, and installs a
//! `log::Log` implementation so the rest of the kernel can use the `log`
//! crate's facade macros (`log::info!`, `log::error!`, ...) the way the
//! pack's no_std crates do.

use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

/// Log levels per spec.md §6: `{Fatal, Error, Warn, Info, Debug}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Fatal = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Fatal => "FATAL",
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
        }
    }
}

/// A raw character sink. Boards provide one (UART, semihosting, ...); the
/// kernel core never talks to hardware registers directly.
pub trait RawSink: Sync {
    fn write_bytes(&self, bytes: &[u8]);
}

static SINK: Mutex<Option<&'static dyn RawSink>> = Mutex::new(None);

/// Installs the board's raw sink. Call once during early boot.
pub fn set_sink(sink: &'static dyn RawSink) {
    *SINK.lock() = Some(sink);
}

const RING_CAPACITY: usize = 128;
const MSG_CAPACITY: usize = 120;

#[derive(Clone, Copy)]
struct LogEntry {
    level: Level,
    len: usize,
    message: [u8; MSG_CAPACITY],
}

impl LogEntry {
    const fn empty() -> Self {
        Self {
            level: Level::Debug,
            len: 0,
            message: [0; MSG_CAPACITY],
        }
    }
}

/// Fixed-capacity ring buffer: the oldest entry is silently overwritten
/// once the buffer is full, so a logging storm cannot grow memory, and
/// ISR contexts can push into it without blocking on an allocator.
struct RingBuffer {
    entries: [LogEntry; RING_CAPACITY],
    next: usize,
    len: usize,
}

impl RingBuffer {
    const fn new() -> Self {
        Self {
            entries: [LogEntry::empty(); RING_CAPACITY],
            next: 0,
            len: 0,
        }
    }

    fn push(&mut self, entry: LogEntry) {
        self.entries[self.next] = entry;
        self.next = (self.next + 1) % RING_CAPACITY;
        if self.len < RING_CAPACITY {
            self.len += 1;
        }
    }
}

static RING: Mutex<RingBuffer> = Mutex::new(RingBuffer::new());

/// True once a ring-buffer write is in flight on this core, so a log call
/// from inside the sink's own write path (e.g. a nested fault) doesn't
/// deadlock the spin mutex.
static IN_LOG: AtomicBool = AtomicBool::new(false);

struct MessageWriter {
    buf: [u8; MSG_CAPACITY],
    len: usize,
}

impl Write for MessageWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = MSG_CAPACITY - self.len;
        let n = remaining.min(bytes.len());
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        Ok(())
    }
}

/// The raw logging entry point every higher layer funnels through.
/// Non-blocking and reentrancy-safe so it may be called from ISR context
/// (spec.md §6).
pub fn log(level: Level, args: core::fmt::Arguments<'_>) {
    if IN_LOG.swap(true, Ordering::Acquire) {
        return;
    }

    let mut w = MessageWriter {
        buf: [0; MSG_CAPACITY],
        len: 0,
    };
    let _ = core::fmt::write(&mut w, args);

    let mut entry = LogEntry::empty();
    entry.level = level;
    entry.len = w.len;
    entry.message[..w.len].copy_from_slice(&w.buf[..w.len]);
    RING.lock().push(entry);

    if let Some(sink) = *SINK.lock() {
        sink.write_bytes(level.as_str().as_bytes());
        sink.write_bytes(b": ");
        sink.write_bytes(&w.buf[..w.len]);
        sink.write_bytes(b"\r\n");
    }

    IN_LOG.store(false, Ordering::Release);
}

/// Drains every entry currently in the ring buffer, oldest first.
pub fn drain() -> heapless::Vec<([u8; MSG_CAPACITY], usize, Level), RING_CAPACITY> {
    let ring = RING.lock();
    let mut out = heapless::Vec::new();
    let start = if ring.len < RING_CAPACITY {
        0
    } else {
        ring.next
    };
    for i in 0..ring.len {
        let entry = ring.entries[(start + i) % RING_CAPACITY];
        let _ = out.push((entry.message, entry.len, entry.level));
    }
    out
}

struct LogBridge;

impl log::Log for LogBridge {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let level = match record.level() {
            log::Level::Error => Level::Error,
            log::Level::Warn => Level::Warn,
            log::Level::Info => Level::Info,
            log::Level::Debug | log::Level::Trace => Level::Debug,
        };
        log(level, *record.args());
    }

    fn flush(&self) {}
}

static BRIDGE: LogBridge = LogBridge;

/// Installs the `log` crate facade so the rest of the kernel can use
/// `log::info!`/`log::error!`/... uniformly. Call once during boot.
pub fn init() {
    let _ = log::set_logger(&BRIDGE);
    log::set_max_level(log::LevelFilter::Debug);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_entries_in_order() {
        log(Level::Info, format_args!("one"));
        log(Level::Warn, format_args!("two"));
        let entries = drain();
        assert!(entries.len() >= 2);
        let (msg, len, _) = &entries[entries.len() - 2];
        assert_eq!(&msg[..*len], b"one");
        let (msg, len, _) = &entries[entries.len() - 1];
        assert_eq!(&msg[..*len], b"two");
    }

    #[test]
    fn ring_buffer_wraps_without_growing() {
        for i in 0..(RING_CAPACITY * 2) {
            log(Level::Debug, format_args!("msg {i}"));
        }
        let entries = drain();
        assert_eq!(entries.len(), RING_CAPACITY);
    }
}
