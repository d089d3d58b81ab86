//! Device-tree entity cursor (spec.md §3 "Device-tree entity").
//!
//! Mirrors BadgeOS's `dtb_entity_t`: a small, copyable value identifying
//! either a node or a property at some depth in the tree. The C struct
//! carries a raw `char const *name`; since nothing here owns the backing
//! buffer for the lifetime of an `Entity`, the name is instead an absolute
//! byte offset into the handle's blob, resolved on demand through
//! [`super::handle::Handle::name_of`].

/// A cursor onto a node or a property inside a device tree blob.
///
/// `content` is a byte offset into the blob: for a node it points just past
/// the node's header (before its first property or child), for a property
/// it points at the start of the property's raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entity {
    pub valid: bool,
    pub is_node: bool,
    pub depth: u8,
    pub content: u32,
    pub prop_len: u32,
    pub(super) name_off: u32,
}

impl Entity {
    pub const INVALID: Entity = Entity {
        valid: false,
        is_node: false,
        depth: 0,
        content: 0,
        prop_len: 0,
        name_off: 0,
    };
}

impl Default for Entity {
    fn default() -> Self {
        Self::INVALID
    }
}
