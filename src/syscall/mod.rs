//! Numbered syscall table (spec.md §3 "Syscall", §4.7).
//!
//! Grounded on the teacher's `arch/riscv64/syscall.rs` for the
//! `SyscallNumber`/dispatch shape (`From<u32>` mapping raw `a7` values to
//! an enum, a flat `dispatch` matching on it); the concrete number
//! assignments are this kernel's own since userland syscall ABI is a
//! fresh, narrow surface here rather than the teacher's Linux-compatible
//! one. `fs_open`/`fs_read`/`fs_write`/`fs_close` are the VFS boundary
//! (spec.md §1 non-goals: no filesystem implementation lives in this
//! crate) — dispatch recognizes their numbers but returns `Unsupported`
//! until a board wires a real VFS behind [`crate::err`].

use core::sync::atomic::{AtomicBool, Ordering};

use crate::err::{ErrorKind, ErrorLocation, KernelError};

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallNumber {
    ProcExit = 0,
    MemAlloc = 1,
    MemSize = 2,
    MemDealloc = 3,
    ProcSighandler = 4,
    ProcSigret = 5,
    SysShutdown = 6,
    FsOpen = 7,
    FsRead = 8,
    FsWrite = 9,
    FsClose = 10,
    TempWrite = 11,
}

impl SyscallNumber {
    pub fn from_u32(n: u32) -> Option<Self> {
        match n {
            0 => Some(Self::ProcExit),
            1 => Some(Self::MemAlloc),
            2 => Some(Self::MemSize),
            3 => Some(Self::MemDealloc),
            4 => Some(Self::ProcSighandler),
            5 => Some(Self::ProcSigret),
            6 => Some(Self::SysShutdown),
            7 => Some(Self::FsOpen),
            8 => Some(Self::FsRead),
            9 => Some(Self::FsWrite),
            10 => Some(Self::FsClose),
            11 => Some(Self::TempWrite),
            _ => None,
        }
    }
}

/// Set by `SysShutdown` instead of halting inline from inside the syscall
/// fast path; the init thread's own loop is the one place spec.md §4.7
/// expects a shutdown to actually take effect. `true` means a reboot was
/// requested (`a0 != 0`); `false` means a plain shutdown.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static REBOOT_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Whether `SysShutdown` has been invoked since boot.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Acquire)
}

/// Whether the pending shutdown (if any) is a reboot rather than a halt.
/// Meaningless unless [`shutdown_requested`] is `true`.
pub fn reboot_requested() -> bool {
    REBOOT_REQUESTED.load(Ordering::Acquire)
}

/// Encodes a [`KernelError`] the way the syscall ABI returns it to
/// userland: `0` on success, a negative `ErrorKind` discriminant
/// otherwise. Userland never sees [`crate::err::ErrorLocation`] — that's
/// an in-kernel diagnostic, not part of the ABI.
fn encode(result: Result<u32, KernelError>) -> u32 {
    match result {
        Ok(v) => v,
        Err(e) => (-(1 + e.kind as i32)) as u32,
    }
}

/// Entered from the trap handler's syscall fast path with the raw `a0..a3`
/// argument registers and the syscall number from `a7`/`sysno` (spec.md
/// §4.3: the fast path only has `t0..t3`, `sp`, `gp`, `tp`, `ra` saved —
/// handlers here must not assume anything else in the register file is
/// current).
pub fn dispatch(sysno: u32, a0: u32, a1: u32, a2: u32, a3: u32) -> u32 {
    let Some(number) = SyscallNumber::from_u32(sysno) else {
        return encode(Err(KernelError::new(ErrorKind::Unsupported, ErrorLocation::Threads)));
    };
    encode(handle(number, a0, a1, a2, a3))
}

fn handle(number: SyscallNumber, a0: u32, a1: u32, a2: u32, a3: u32) -> Result<u32, KernelError> {
    match number {
        SyscallNumber::ProcExit => crate::process::sys_exit(a0 as i32).map(|_| 0),
        SyscallNumber::MemAlloc => {
            crate::process::sys_mem_alloc(a0 as usize, crate::process::MemFlags::from_bits_truncate(a1))
        }
        SyscallNumber::MemSize => crate::process::sys_mem_size(a0).map(|n| n as u32),
        SyscallNumber::MemDealloc => crate::process::sys_mem_dealloc(a0).map(|_| 0),
        SyscallNumber::ProcSighandler => crate::process::sys_sighandler(a0, a1).map(|_| 0),
        SyscallNumber::ProcSigret => crate::process::sys_sigret().map(|_| 0),
        SyscallNumber::SysShutdown => {
            let is_reboot = a0 != 0;
            REBOOT_REQUESTED.store(is_reboot, Ordering::Release);
            SHUTDOWN_REQUESTED.store(true, Ordering::Release);
            Ok(0)
        }
        SyscallNumber::FsOpen | SyscallNumber::FsRead | SyscallNumber::FsWrite | SyscallNumber::FsClose => {
            let _ = (a2, a3);
            Err(KernelError::new(ErrorKind::Unsupported, ErrorLocation::Filesystem))
        }
        SyscallNumber::TempWrite => {
            let _ = (a0, a1);
            Err(KernelError::new(ErrorKind::Unsupported, ErrorLocation::Filesystem))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_syscall_number_is_unsupported() {
        let encoded = dispatch(9999, 0, 0, 0, 0);
        assert_eq!(encoded, encode(Err(KernelError::new(ErrorKind::Unsupported, ErrorLocation::Threads))));
    }

    #[test]
    fn vfs_delegated_calls_report_unsupported_without_a_backing_vfs() {
        let encoded = dispatch(SyscallNumber::FsOpen as u32, 0, 0, 0, 0);
        assert_eq!(encoded, encode(Err(KernelError::new(ErrorKind::Unsupported, ErrorLocation::Filesystem))));
    }

    #[test]
    fn from_u32_round_trips_every_defined_number() {
        for n in 0..=11u32 {
            assert!(SyscallNumber::from_u32(n).is_some());
        }
        assert!(SyscallNumber::from_u32(12).is_none());
    }

    #[test]
    fn temp_write_is_delegated_like_the_other_vfs_calls() {
        let encoded = dispatch(SyscallNumber::TempWrite as u32, 0, 0, 0, 0);
        assert_eq!(encoded, encode(Err(KernelError::new(ErrorKind::Unsupported, ErrorLocation::Filesystem))));
    }

    #[test]
    fn shutdown_sets_the_flag_instead_of_halting() {
        let encoded = dispatch(SyscallNumber::SysShutdown as u32, 0, 0, 0, 0);
        assert_eq!(encoded, 0);
        assert!(shutdown_requested());
        assert!(!reboot_requested());
    }

    #[test]
    fn shutdown_with_nonzero_a0_requests_a_reboot() {
        let encoded = dispatch(SyscallNumber::SysShutdown as u32, 1, 0, 0, 0);
        assert_eq!(encoded, 0);
        assert!(shutdown_requested());
        assert!(reboot_requested());
    }
}
