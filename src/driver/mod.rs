//! Driver registry and device-tree binder (spec.md §3 "Driver descriptor",
//! §4.6).
//!
//! Grounded on BadgeOS's `driver.h`/`driver.c` (a driver is a `compatible`
//! list plus a `dtbinit` callback, matched against the tree) and on the
//! teacher's `src/driver.rs` for the registry shape (`DriverError`, a
//! fixed-capacity `heapless::Vec` behind a lock, `DriverResult`). Concrete
//! per-peripheral drivers are outside this crate (spec.md §1 non-goals);
//! this module only binds whatever descriptors the board registers. The
//! [`i2c`] submodule gives the one concrete data shape spec.md §3 names
//! for a bus driver (the transaction list) without implementing a master.

use heapless::Vec;
use lazy_static::lazy_static;
use spin::Mutex;

use crate::config::MAX_DRIVERS;
use crate::dtb::{Entity, Handle};

pub mod i2c;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// No registered descriptor's `compatible` list matched the node.
    NoDriver,
    /// A descriptor matched but its `init` callback failed.
    InitFailed,
    /// The registry already holds [`crate::config::MAX_DRIVERS`] entries.
    RegistryFull,
}

pub type DriverResult<T = ()> = Result<T, DriverError>;

/// Callback invoked once for each device-tree node a descriptor claims.
pub type DtbInit = fn(&Handle<'_>, Entity, addr_cells: u32, size_cells: u32) -> DriverResult<()>;

/// A driver as known to the binder: which `compatible` strings it claims,
/// and what to call when a node matches one of them.
pub struct Descriptor {
    pub name: &'static str,
    pub compatible: &'static [&'static str],
    pub dtbinit: DtbInit,
}

lazy_static! {
    static ref REGISTRY: Mutex<Vec<&'static Descriptor, MAX_DRIVERS>> = Mutex::new(Vec::new());
}

/// Registers a descriptor. Boards call this during early boot, before
/// [`bind`], for every driver they're built with.
pub fn register(descriptor: &'static Descriptor) -> DriverResult<()> {
    REGISTRY
        .lock()
        .push(descriptor)
        .map_err(|_| DriverError::RegistryFull)
}

fn find_match(compatible: &str) -> Option<&'static Descriptor> {
    REGISTRY
        .lock()
        .iter()
        .find(|d| d.compatible.contains(&compatible))
        .copied()
}

/// Walks the direct children of `bus` (typically `/soc`), matching each
/// child's `compatible` property against the registry and invoking the
/// first descriptor that claims it (spec.md §4.6: first-match-wins,
/// unmatched nodes are silently skipped rather than treated as errors).
pub fn bind(handle: &Handle<'_>, bus: Entity) -> DriverResult<usize> {
    let addr_cells = read_cells_prop(handle, bus, "#address-cells").unwrap_or(2);
    let size_cells = read_cells_prop(handle, bus, "#size-cells").unwrap_or(1);

    let mut bound = 0usize;
    let mut child = handle.first_node(bus);
    while child.valid {
        let compat_prop = handle.get_prop(child, "compatible");
        if compat_prop.valid {
            let mut matched = None;
            for compat in handle.prop_strings(compat_prop) {
                if let Some(descriptor) = find_match(compat) {
                    matched = Some(descriptor);
                    break;
                }
            }
            if let Some(descriptor) = matched {
                (descriptor.dtbinit)(handle, child, addr_cells, size_cells)?;
                bound += 1;
            }
        }
        child = handle.next_node(child);
    }
    Ok(bound)
}

fn read_cells_prop(handle: &Handle<'_>, node: Entity, name: &str) -> Option<u32> {
    let prop = handle.get_prop(node, name);
    if !prop.valid {
        return None;
    }
    handle.prop_read_uint(prop).map(|v| v as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    static PING_CALLS: core::sync::atomic::AtomicUsize = core::sync::atomic::AtomicUsize::new(0);

    fn ping_init(_h: &Handle<'_>, _n: Entity, _ac: u32, _sc: u32) -> DriverResult<()> {
        PING_CALLS.fetch_add(1, core::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    static PING: Descriptor = Descriptor {
        name: "ping",
        compatible: &["vendor,ping-device"],
        dtbinit: ping_init,
    };

    #[test]
    fn registers_and_matches_by_compatible() {
        // Guard against other tests in this binary mutating the shared
        // registry: register is idempotent-ish for this test's purposes
        // since duplicate registration is harmless (first match wins).
        let _ = register(&PING);
        assert!(find_match("vendor,ping-device").is_some());
        assert!(find_match("vendor,nonexistent").is_none());
    }
}
