//! Process: the container for a program's threads, memory map, file
//! descriptors and pending signals (spec.md §3 "Process", §4.7).
//!
//! Field-for-field grounded on BadgeOS's `kernel/include/process/types.h`
//! (`process_t`/`proc_memmap_t`/`proc_memmap_ent_t`/`proc_fd_t`/
//! `sigpending_t`), narrowed to fixed-capacity `heapless` collections
//! since this crate targets a microcontroller with no virtual memory to
//! back an unbounded `Vec` safely. `PROC_MTX_TIMEOUT` becomes
//! [`crate::config::PROC_MTX_TIMEOUT_US`] guarding [`crate::sync::TimedMutex`].

use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use bitflags::bitflags;
use heapless::Vec;

use crate::collections::dlist::{DList, DListNode};
use crate::config::{MAX_MEMMAP_REGIONS, PROC_MTX_TIMEOUT_US, SIG_COUNT};
use crate::err::{ErrorKind, ErrorLocation, KernelError};
use crate::sync::TimedMutex;

const MAX_FDS: usize = 16;
const MAX_THREADS: usize = 8;

bitflags! {
    /// Mapping permissions for `mem_alloc` (spec.md §4.7: "`flags` enum:
    /// {RW, RX, RWX, ...}"), represented as a bitset since `RWX` is just
    /// `RW | RX` rather than a fourth independent case.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemFlags: u32 {
        const WRITE = 1 << 0;
        const EXEC  = 1 << 1;
    }
}

/// A mapped region of a process's address space.
#[derive(Debug, Clone, Copy)]
pub struct MemMapEntry {
    pub base: usize,
    pub size: usize,
    pub flags: MemFlags,
}

/// A process-virtual file descriptor bound to an opaque VFS handle
/// (spec.md §1: the filesystem itself is an external collaborator; this
/// crate only keeps the `virt -> real` mapping BadgeOS's `proc_fd_t`
/// does).
#[derive(Debug, Clone, Copy)]
pub struct Fd {
    pub virt: i32,
    pub real: u32,
}

struct SigPending {
    node: DListNode,
    signum: i32,
}

/// A program and all the kernel-tracked resources it owns.
pub struct Process {
    pub pid: i32,
    argv: Vec<&'static str, 8>,
    fds: Vec<Fd, MAX_FDS>,
    threads: Vec<*mut crate::sched::Thread, MAX_THREADS>,
    memmap: Vec<MemMapEntry, MAX_MEMMAP_REGIONS>,
    mtx: TimedMutex<()>,
    flags: AtomicU32,
    sigpending: DList,
    /// Signal handler addresses; slot 0 is the return trampoline, not a
    /// handler for signal 0 (spec.md §4.7 / BadgeOS's header comment
    /// "First index is for signal handler returns").
    sighandlers: [usize; SIG_COUNT],
    exit_code: AtomicI32,
}

pub const FLAG_EXITING: u32 = 1 << 0;

impl Process {
    pub fn new(pid: i32, argv: &'static [&'static str]) -> Self {
        let mut argv_vec = Vec::new();
        for a in argv.iter().take(8) {
            let _ = argv_vec.push(*a);
        }
        Self {
            pid,
            argv: argv_vec,
            fds: Vec::new(),
            threads: Vec::new(),
            memmap: Vec::new(),
            mtx: TimedMutex::new(()),
            flags: AtomicU32::new(0),
            sigpending: DList::new(),
            sighandlers: [0; SIG_COUNT],
            exit_code: AtomicI32::new(0),
        }
    }

    pub fn argv(&self) -> &[&'static str] {
        &self.argv
    }

    /// Adds a mapped region and regenerates the MPU configuration via
    /// `program`. Rejects a region that overlaps an existing one, and
    /// otherwise keeps `memmap` sorted by `base` so the MPU programming
    /// closure always sees regions in address order. On failure the
    /// region is rolled back so the tracked map and the hardware state
    /// never disagree (spec.md §4.7).
    pub fn map(
        &mut self,
        entry: MemMapEntry,
        program: impl FnOnce(&[MemMapEntry]) -> Result<(), KernelError>,
    ) -> Result<(), KernelError> {
        let _guard = self.mtx.lock_timeout(PROC_MTX_TIMEOUT_US)?;
        let entry_end = entry.base.checked_add(entry.size)
            .ok_or(KernelError::new(ErrorKind::Range, ErrorLocation::Process))?;
        let pos = self
            .memmap
            .iter()
            .position(|r| r.base >= entry.base)
            .unwrap_or(self.memmap.len());
        if pos > 0 {
            let prev = &self.memmap[pos - 1];
            if prev.base + prev.size > entry.base {
                return Err(KernelError::new(ErrorKind::InUse, ErrorLocation::Process));
            }
        }
        if pos < self.memmap.len() && entry_end > self.memmap[pos].base {
            return Err(KernelError::new(ErrorKind::InUse, ErrorLocation::Process));
        }
        self.memmap
            .insert(pos, entry)
            .map_err(|_| KernelError::new(ErrorKind::NoSpace, ErrorLocation::Process))?;
        if let Err(e) = program(&self.memmap) {
            self.memmap.remove(pos);
            return Err(e);
        }
        Ok(())
    }

    /// Removes the mapping whose base address is `base`, preserving the
    /// address-sorted order of the rest, and regenerates the MPU
    /// configuration. Rolls back on failure, same as [`map`](Self::map).
    pub fn unmap(
        &mut self,
        base: usize,
        program: impl FnOnce(&[MemMapEntry]) -> Result<(), KernelError>,
    ) -> Result<(), KernelError> {
        let _guard = self.mtx.lock_timeout(PROC_MTX_TIMEOUT_US)?;
        let Some(idx) = self.memmap.iter().position(|r| r.base == base) else {
            return Err(KernelError::new(ErrorKind::NotFound, ErrorLocation::Process));
        };
        let removed = self.memmap.remove(idx);
        if let Err(e) = program(&self.memmap) {
            let _ = self.memmap.insert(idx, removed);
            return Err(e);
        }
        Ok(())
    }

    pub fn set_sighandler(&mut self, signum: u32, addr: usize) -> Result<(), KernelError> {
        let slot = self
            .sighandlers
            .get_mut(signum as usize)
            .ok_or(KernelError::new(ErrorKind::Range, ErrorLocation::Process))?;
        *slot = addr;
        Ok(())
    }

    pub fn sighandler(&self, signum: u32) -> Option<usize> {
        self.sighandlers.get(signum as usize).copied()
    }

    /// Queues `signum` for delivery. Does not itself wake a thread; the
    /// scheduler observes pending signals at its own decision points
    /// (spec.md §9).
    pub fn raise_signal(&mut self, signum: i32) {
        let pending = alloc::boxed::Box::new(SigPending {
            node: DListNode::new(),
            signum,
        });
        let ptr = alloc::boxed::Box::into_raw(pending);
        unsafe {
            let node = core::ptr::NonNull::new_unchecked(core::ptr::addr_of_mut!((*ptr).node));
            self.sigpending.append(node);
        }
    }

    /// Pops the oldest pending signal, if any.
    pub fn next_pending_signal(&mut self) -> Option<i32> {
        let node = unsafe { self.sigpending.pop_front() }?;
        let offset = core::mem::offset_of!(SigPending, node);
        let ptr = unsafe { (node.as_ptr() as *mut u8).sub(offset) as *mut SigPending };
        let signum = unsafe { (*ptr).signum };
        unsafe {
            drop(alloc::boxed::Box::from_raw(ptr));
        }
        Some(signum)
    }

    pub fn add_fd(&mut self, fd: Fd) -> Result<(), KernelError> {
        self.fds
            .push(fd)
            .map_err(|_| KernelError::new(ErrorKind::NoSpace, ErrorLocation::Process))
    }

    pub fn flags(&self) -> u32 {
        self.flags.load(Ordering::Acquire)
    }

    pub fn set_flag(&self, flag: u32) {
        self.flags.fetch_or(flag, Ordering::AcqRel);
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }
}

// --- Syscall-facing entry points (spec.md §4.7) ---
//
// These bridge raw syscall arguments to process/thread operations; they
// deliberately hold no process-table lookup of their own since that
// belongs to whatever owns `Process` instances (out of this crate's
// scope per spec.md §1 — userland process/loader lifecycle).

pub fn sys_exit(code: i32) -> Result<(), KernelError> {
    let _ = code;
    Err(KernelError::new(ErrorKind::Unsupported, ErrorLocation::Process))
}

pub fn sys_mem_alloc(_size: usize, _flags: MemFlags) -> Result<u32, KernelError> {
    Err(KernelError::new(ErrorKind::Unsupported, ErrorLocation::Process))
}

pub fn sys_mem_size(_addr: u32) -> Result<u32, KernelError> {
    Err(KernelError::new(ErrorKind::Unsupported, ErrorLocation::Process))
}

pub fn sys_mem_dealloc(_addr: u32) -> Result<(), KernelError> {
    Err(KernelError::new(ErrorKind::Unsupported, ErrorLocation::Process))
}

pub fn sys_sighandler(_signum: u32, _addr: u32) -> Result<(), KernelError> {
    Err(KernelError::new(ErrorKind::Unsupported, ErrorLocation::Process))
}

pub fn sys_sigret() -> Result<(), KernelError> {
    Err(KernelError::new(ErrorKind::Unsupported, ErrorLocation::Process))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_then_unmap_round_trips_region_table() {
        let mut proc = Process::new(1, &[]);
        proc.map(
            MemMapEntry { base: 0x1000, size: 0x1000, flags: MemFlags::WRITE },
            |_regions| Ok(()),
        )
        .unwrap();
        assert_eq!(proc.memmap.len(), 1);
        proc.unmap(0x1000, |_regions| Ok(())).unwrap();
        assert_eq!(proc.memmap.len(), 0);
    }

    #[test]
    fn map_rolls_back_when_mpu_programming_fails() {
        let mut proc = Process::new(1, &[]);
        let result = proc.map(
            MemMapEntry { base: 0x2000, size: 0x1000, flags: MemFlags::WRITE | MemFlags::EXEC },
            |_regions| Err(KernelError::new(ErrorKind::Illegal, ErrorLocation::Process)),
        );
        assert!(result.is_err());
        assert_eq!(proc.memmap.len(), 0);
    }

    #[test]
    fn map_keeps_regions_sorted_by_base_regardless_of_insertion_order() {
        let mut proc = Process::new(1, &[]);
        proc.map(MemMapEntry { base: 0x3000, size: 0x1000, flags: MemFlags::WRITE }, |_| Ok(())).unwrap();
        proc.map(MemMapEntry { base: 0x1000, size: 0x1000, flags: MemFlags::WRITE }, |_| Ok(())).unwrap();
        proc.map(MemMapEntry { base: 0x2000, size: 0x1000, flags: MemFlags::WRITE }, |_| Ok(())).unwrap();
        let bases: alloc::vec::Vec<usize> = proc.memmap.iter().map(|r| r.base).collect();
        assert_eq!(bases, [0x1000, 0x2000, 0x3000]);
    }

    #[test]
    fn map_rejects_a_region_overlapping_an_existing_one() {
        let mut proc = Process::new(1, &[]);
        proc.map(MemMapEntry { base: 0x1000, size: 0x2000, flags: MemFlags::WRITE }, |_| Ok(())).unwrap();
        let result = proc.map(
            MemMapEntry { base: 0x1800, size: 0x1000, flags: MemFlags::WRITE },
            |_| Ok(()),
        );
        assert_eq!(result.unwrap_err().kind, ErrorKind::InUse);
        assert_eq!(proc.memmap.len(), 1);
    }

    #[test]
    fn unmap_preserves_order_of_remaining_regions() {
        let mut proc = Process::new(1, &[]);
        proc.map(MemMapEntry { base: 0x1000, size: 0x1000, flags: MemFlags::WRITE }, |_| Ok(())).unwrap();
        proc.map(MemMapEntry { base: 0x2000, size: 0x1000, flags: MemFlags::WRITE }, |_| Ok(())).unwrap();
        proc.map(MemMapEntry { base: 0x3000, size: 0x1000, flags: MemFlags::WRITE }, |_| Ok(())).unwrap();
        proc.unmap(0x2000, |_| Ok(())).unwrap();
        let bases: alloc::vec::Vec<usize> = proc.memmap.iter().map(|r| r.base).collect();
        assert_eq!(bases, [0x1000, 0x3000]);
    }

    #[test]
    fn slot_zero_is_the_return_trampoline_not_a_signal_handler() {
        let mut proc = Process::new(1, &[]);
        proc.set_sighandler(0, 0xdead).unwrap();
        assert_eq!(proc.sighandler(0), Some(0xdead));
        proc.set_sighandler(3, 0xbeef).unwrap();
        assert_eq!(proc.sighandler(3), Some(0xbeef));
    }

    #[test]
    fn pending_signals_drain_in_fifo_order() {
        let mut proc = Process::new(1, &[]);
        proc.raise_signal(2);
        proc.raise_signal(9);
        assert_eq!(proc.next_pending_signal(), Some(2));
        assert_eq!(proc.next_pending_signal(), Some(9));
        assert_eq!(proc.next_pending_signal(), None);
    }
}
