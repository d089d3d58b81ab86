//! Device-tree reading handle (spec.md §3 "Device-tree handle", §4.5, §8).
//!
//! Grounded on BadgeOS's `port/dtb.h`/`src/dtb.c`: same token grammar
//! (`BEGIN_NODE`/`END_NODE`/`PROP`/`NOP`/`END`), same entity shape, same
//! function surface (`first_node`/`next_node`/`first_prop`/`next_prop`/
//! `walk_next`/`get_node`/`get_prop`/`find_parent`/`phandle_node`/
//! `prop_read_*`). Two corrections over the original:
//!
//! - `dtb_first_prop` in the upstream C always starts its scan at word 0 of
//!   the structure block instead of at `parent_node.content`; that is a bug
//!   (it would return the DTB's very first property regardless of which
//!   node was asked for). This reader starts at `parent.content`, per the
//!   function's own stated contract.
//! - `dtb_next_node` in the upstream C never handles `END_NODE` and loops
//!   forever on any node that has children; it only works for childless
//!   nodes. This reader skips a node's entire subtree with an explicit
//!   depth-aware walk ([`skip_subtree`]) before looking for the next
//!   sibling, so it terminates and gives the right answer for nested trees.
//!
//! Phandle and parent indexes are built once in [`Handle::open`] by a
//! recursive pre-order walk, matching the `dtb_phandle_t`/`dtb_parent_t`
//! tables described in the header (phandle -> node, and node content range
//! -> depth/name for ancestor lookups by [`Handle::find_parent`]).

use alloc::vec::Vec;

use super::entity::Entity;
use super::fdt::{self, Header, Token, FDT_MAGIC, FDT_VERSION};

#[derive(Debug, Clone, Copy)]
struct ParentEntry {
    content: u32,
    length: u32,
    depth: u8,
    name_off: u32,
}

#[derive(Debug, Clone, Copy)]
struct PhandleEntry {
    phandle: u32,
    content: u32,
    depth: u8,
    name_off: u32,
}

/// A parsed, read-only view over a flattened device tree blob.
pub struct Handle<'a> {
    data: &'a [u8],
    struct_off: u32,
    string_off: u32,
    /// Set if the header failed validation or the structure block could
    /// not be fully indexed; callers must not trust reads off a handle
    /// with this set (spec.md §8: "a DTB that fails magic/version
    /// validation must not be read further").
    pub has_errors: bool,
    parents: Vec<ParentEntry>,
    phandles: Vec<PhandleEntry>,
}

impl<'a> Handle<'a> {
    /// Validates the FDT header and indexes the tree. Never panics on a
    /// malformed blob; sets `has_errors` instead (spec.md §7: a bad DTB is
    /// reported, not a fatal condition by itself).
    pub fn open(data: &'a [u8]) -> Self {
        let mut handle = Handle {
            data,
            struct_off: 0,
            string_off: 0,
            has_errors: true,
            parents: Vec::new(),
            phandles: Vec::new(),
        };

        let Some(hdr) = Header::parse(data) else {
            return handle;
        };
        if hdr.magic != FDT_MAGIC || hdr.version != FDT_VERSION {
            return handle;
        }
        if (hdr.off_dt_struct as usize) >= data.len() || (hdr.off_dt_strings as usize) >= data.len()
        {
            return handle;
        }

        handle.struct_off = hdr.off_dt_struct;
        handle.string_off = hdr.off_dt_strings;
        handle.has_errors = false;

        let root = handle.root_node();
        if !root.valid {
            handle.has_errors = true;
            return handle;
        }
        if handle.index_node(root).is_none() {
            handle.has_errors = true;
        }
        handle.phandles.sort_by_key(|entry| entry.phandle);
        handle
    }

    fn token_at(&self, offset: u32) -> Option<Token> {
        Token::from_u32(fdt::read_u32(self.data, offset as usize)?)
    }

    fn skip_nops(&self, mut offset: u32) -> Option<u32> {
        while self.token_at(offset)? == Token::Nop {
            offset += 4;
        }
        Some(offset)
    }

    fn cstr_len_at(&self, offset: u32) -> Option<usize> {
        let rest = self.data.get(offset as usize..)?;
        rest.iter().position(|&b| b == 0)
    }

    /// Resolves an entity's name. Never fails for a name produced by this
    /// reader's own cursor functions; returns `""` for a corrupt offset
    /// rather than panicking.
    pub fn name_of(&self, entity: &Entity) -> &'a str {
        fdt::read_cstr(self.data, entity.name_off as usize).unwrap_or("")
    }

    /// Raw byte offset in the blob just past a node header: `word` must
    /// point at the header's `BEGIN_NODE` token.
    fn node_header_end(&self, word: u32) -> Option<(u32, u32)> {
        let name_start = word + 4;
        let name_len = self.cstr_len_at(name_start)?;
        let name_off = name_start;
        let content = fdt::align4(name_start as usize + name_len + 1) as u32;
        Some((name_off, content))
    }

    /// Skips past an entire node subtree given the offset just after its
    /// header (i.e. a node's `content`). Returns the offset just past the
    /// matching `END_NODE`, or `None` on a malformed tree.
    fn skip_subtree(&self, content: u32) -> Option<u32> {
        let mut i = content;
        loop {
            i = self.skip_nops(i)?;
            match self.token_at(i)? {
                Token::Prop => {
                    let len = fdt::read_u32(self.data, (i + 4) as usize)?;
                    i = fdt::align4((i + 12) as usize + len as usize) as u32;
                }
                Token::BeginNode => {
                    let (_, child_content) = self.node_header_end(i)?;
                    i = self.skip_subtree(child_content)?;
                }
                Token::EndNode => return Some(i + 4),
                _ => return None,
            }
        }
    }

    /// The tree's root node, or an invalid entity on a malformed blob.
    pub fn root_node(&self) -> Entity {
        let Some(i) = self.skip_nops(self.struct_off) else {
            return Entity::INVALID;
        };
        if self.token_at(i) != Some(Token::BeginNode) {
            return Entity::INVALID;
        }
        let Some((name_off, content)) = self.node_header_end(i) else {
            return Entity::INVALID;
        };
        Entity {
            valid: true,
            is_node: true,
            depth: 0,
            content,
            prop_len: 0,
            name_off,
        }
    }

    /// The first child node of `parent`, skipping any properties first.
    pub fn first_node(&self, parent: Entity) -> Entity {
        if !parent.valid || !parent.is_node {
            return Entity::INVALID;
        }
        let Some(mut i) = self.skip_nops(parent.content) else {
            return Entity::INVALID;
        };
        loop {
            match self.token_at(i) {
                Some(Token::Prop) => {
                    let Some(len) = fdt::read_u32(self.data, (i + 4) as usize) else {
                        return Entity::INVALID;
                    };
                    i = fdt::align4((i + 12) as usize + len as usize) as u32;
                    let Some(next) = self.skip_nops(i) else {
                        return Entity::INVALID;
                    };
                    i = next;
                }
                _ => break,
            }
        }
        if self.token_at(i) != Some(Token::BeginNode) {
            return Entity::INVALID;
        }
        let Some((name_off, content)) = self.node_header_end(i) else {
            return Entity::INVALID;
        };
        Entity {
            valid: true,
            is_node: true,
            depth: parent.depth + 1,
            content,
            prop_len: 0,
            name_off,
        }
    }

    /// The first property directly on `parent`.
    pub fn first_prop(&self, parent: Entity) -> Entity {
        if !parent.valid || !parent.is_node {
            return Entity::INVALID;
        }
        let Some(i) = self.skip_nops(parent.content) else {
            return Entity::INVALID;
        };
        self.parse_prop_at(i, parent.depth + 1)
    }

    fn parse_prop_at(&self, i: u32, depth: u8) -> Entity {
        if self.token_at(i) != Some(Token::Prop) {
            return Entity::INVALID;
        }
        let Some(len) = fdt::read_u32(self.data, (i + 4) as usize) else {
            return Entity::INVALID;
        };
        let Some(name_idx) = fdt::read_u32(self.data, (i + 8) as usize) else {
            return Entity::INVALID;
        };
        Entity {
            valid: true,
            is_node: false,
            depth,
            content: i + 12,
            prop_len: len,
            name_off: self.string_off + name_idx,
        }
    }

    /// The next sibling node after `from`, skipping `from`'s whole subtree.
    pub fn next_node(&self, from: Entity) -> Entity {
        if !from.valid || !from.is_node {
            return Entity::INVALID;
        }
        let Some(end) = self.skip_subtree(from.content) else {
            return Entity::INVALID;
        };
        let Some(i) = self.skip_nops(end) else {
            return Entity::INVALID;
        };
        if self.token_at(i) != Some(Token::BeginNode) {
            return Entity::INVALID;
        }
        let Some((name_off, content)) = self.node_header_end(i) else {
            return Entity::INVALID;
        };
        Entity {
            valid: true,
            is_node: true,
            depth: from.depth,
            content,
            prop_len: 0,
            name_off,
        }
    }

    /// The next property after `from`, in the same node.
    pub fn next_prop(&self, from: Entity) -> Entity {
        if !from.valid || from.is_node {
            return Entity::INVALID;
        }
        let i = fdt::align4((from.content + from.prop_len) as usize) as u32;
        let Some(i) = self.skip_nops(i) else {
            return Entity::INVALID;
        };
        self.parse_prop_at(i, from.depth)
    }

    /// Walks to the next node or property in document order, descending
    /// into `from`'s contents if `from` is a node.
    pub fn walk_next(&self, from: Entity) -> Entity {
        if !from.valid {
            return Entity::INVALID;
        }
        let (mut i, mut depth) = if from.is_node {
            (from.content, from.depth + 1)
        } else {
            (
                fdt::align4((from.content + from.prop_len) as usize) as u32,
                from.depth,
            )
        };
        loop {
            let Some(next) = self.skip_nops(i) else {
                return Entity::INVALID;
            };
            i = next;
            match self.token_at(i) {
                Some(Token::Prop) => return self.parse_prop_at(i, depth),
                Some(Token::BeginNode) => {
                    let Some((name_off, content)) = self.node_header_end(i) else {
                        return Entity::INVALID;
                    };
                    return Entity {
                        valid: true,
                        is_node: true,
                        depth,
                        content,
                        prop_len: 0,
                        name_off,
                    };
                }
                Some(Token::EndNode) => {
                    if depth == 0 {
                        return Entity::INVALID;
                    }
                    depth -= 1;
                    i += 4;
                }
                _ => return Entity::INVALID,
            }
        }
    }

    /// A named direct child of `parent`.
    pub fn get_node(&self, parent: Entity, name: &str) -> Entity {
        let mut node = self.first_node(parent);
        while node.valid && self.name_of(&node) != name {
            node = self.next_node(node);
        }
        node
    }

    /// A named direct property of `parent`.
    pub fn get_prop(&self, parent: Entity, name: &str) -> Entity {
        let mut prop = self.first_prop(parent);
        while prop.valid && self.name_of(&prop) != name {
            prop = self.next_prop(prop);
        }
        prop
    }

    /// Resolves a `/`-separated absolute path to a node.
    pub fn find_node(&self, path: &str) -> Entity {
        let mut node = self.root_node();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !node.valid {
                return Entity::INVALID;
            }
            node = self.get_node(node, component);
        }
        node
    }

    /// The closest enclosing node of `entity`, found via the indexed
    /// content-range table (BadgeOS keeps no parent back-pointer either;
    /// it resolves the same way from `dtb_parent_t` ranges).
    pub fn find_parent(&self, entity: Entity) -> Entity {
        if !entity.valid {
            return Entity::INVALID;
        }
        let mut best: Option<&ParentEntry> = None;
        for candidate in &self.parents {
            let in_range = entity.content >= candidate.content
                && entity.content < candidate.content + candidate.length;
            if !in_range {
                continue;
            }
            if candidate.content == entity.content && candidate.depth == entity.depth && entity.is_node
            {
                // an entity is not its own parent
                continue;
            }
            let better = match best {
                Some(b) => candidate.depth > b.depth,
                None => true,
            };
            if better {
                best = Some(candidate);
            }
        }
        match best {
            Some(p) => Entity {
                valid: true,
                is_node: true,
                depth: p.depth,
                content: p.content,
                prop_len: 0,
                name_off: p.name_off,
            },
            None => Entity::INVALID,
        }
    }

    /// Looks up a node by its `phandle`/`linux,phandle` value. `phandles`
    /// is sorted by number once in [`Handle::open`], so this is a binary
    /// search rather than a linear scan over every `phandle` property in
    /// the tree.
    pub fn phandle_node(&self, phandle: u32) -> Entity {
        let Ok(idx) = self.phandles.binary_search_by_key(&phandle, |entry| entry.phandle) else {
            return Entity::INVALID;
        };
        let entry = &self.phandles[idx];
        Entity {
            valid: true,
            is_node: true,
            depth: entry.depth,
            content: entry.content,
            prop_len: 0,
            name_off: entry.name_off,
        }
    }

    /// Raw bytes backing a property's value.
    pub fn prop_content(&self, prop: Entity) -> Option<&'a [u8]> {
        if !prop.valid || prop.is_node {
            return None;
        }
        self.data
            .get(prop.content as usize..(prop.content + prop.prop_len) as usize)
    }

    /// Splits a `stringlist`-typed property (e.g. `compatible`) into its
    /// NUL-separated entries.
    pub fn prop_strings(&self, prop: Entity) -> impl Iterator<Item = &'a str> {
        self.prop_content(prop)
            .unwrap_or(&[])
            .split(|&b| b == 0)
            .filter(|chunk| !chunk.is_empty())
            .filter_map(|chunk| core::str::from_utf8(chunk).ok())
    }

    /// A big-endian 32-bit cell at `cell_idx` within a property's value.
    pub fn prop_read_cell(&self, prop: Entity, cell_idx: u32) -> Option<u32> {
        let offset = prop.content + cell_idx * 4;
        if offset + 4 > prop.content + prop.prop_len {
            return None;
        }
        fdt::read_u32(self.data, offset as usize)
    }

    /// A `cell_count`-wide big-endian unsigned integer starting at
    /// `cell_idx`, matching the `#address-cells`/`#size-cells` convention
    /// (spec.md §6).
    pub fn prop_read_cells(&self, prop: Entity, cell_idx: u32, cell_count: u32) -> Option<u64> {
        if cell_count == 0 || cell_count > 2 {
            return None;
        }
        let mut value: u64 = 0;
        for i in 0..cell_count {
            let cell = self.prop_read_cell(prop, cell_idx + i)?;
            value = (value << 32) | cell as u64;
        }
        Some(value)
    }

    /// Reads a property whose value is exactly one cell.
    pub fn prop_read_uint(&self, prop: Entity) -> Option<u64> {
        if prop.prop_len == 4 {
            self.prop_read_cell(prop, 0).map(|v| v as u64)
        } else if prop.prop_len == 8 {
            self.prop_read_cells(prop, 0, 2)
        } else {
            None
        }
    }

    fn index_node(&mut self, node: Entity) -> Option<()> {
        let end = self.skip_subtree(node.content)?;
        self.parents.push(ParentEntry {
            content: node.content,
            length: end - node.content,
            depth: node.depth,
            name_off: node.name_off,
        });

        let mut prop = self.first_prop(node);
        while prop.valid {
            let name = self.name_of(&prop);
            if name == "phandle" || name == "linux,phandle" {
                if let Some(value) = self.prop_read_uint(prop) {
                    self.phandles.push(PhandleEntry {
                        phandle: value as u32,
                        content: node.content,
                        depth: node.depth,
                        name_off: node.name_off,
                    });
                }
            }
            prop = self.next_prop(prop);
        }

        let mut child = self.first_node(node);
        while child.valid {
            self.index_node(child)?;
            child = self.next_node(child);
        }
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal, well-formed FDT blob with:
    /// `/ { #address-cells=<1>; soc { phandle=<1>; child { reg=<0x1000>; }; }; }`
    fn sample_dtb() -> Vec<u8> {
        let mut strings: Vec<u8> = Vec::new();
        let mut structure: Vec<u8> = Vec::new();
        let push_u32 = |buf: &mut Vec<u8>, v: u32| buf.extend_from_slice(&v.to_be_bytes());
        let push_name = |buf: &mut Vec<u8>, s: &str| {
            buf.extend_from_slice(s.as_bytes());
            buf.push(0);
            while buf.len() % 4 != 0 {
                buf.push(0);
            }
        };
        let push_prop = |buf: &mut Vec<u8>, strings: &mut Vec<u8>, name: &str, value: &[u8]| {
            push_u32(buf, 0x3); // FDT_PROP
            push_u32(buf, value.len() as u32);
            let off = {
                let off = strings.len() as u32;
                strings.extend_from_slice(name.as_bytes());
                strings.push(0);
                off
            };
            push_u32(buf, off);
            buf.extend_from_slice(value);
            while buf.len() % 4 != 0 {
                buf.push(0);
            }
        };

        // root
        push_u32(&mut structure, 0x1); // BEGIN_NODE
        push_name(&mut structure, "");
        push_prop(&mut structure, &mut strings, "#address-cells", &1u32.to_be_bytes());

        // soc
        push_u32(&mut structure, 0x1);
        push_name(&mut structure, "soc");
        push_prop(&mut structure, &mut strings, "phandle", &1u32.to_be_bytes());

        // child
        push_u32(&mut structure, 0x1);
        push_name(&mut structure, "child");
        push_prop(&mut structure, &mut strings, "reg", &0x1000u32.to_be_bytes());
        push_u32(&mut structure, 0x2); // END_NODE child

        push_u32(&mut structure, 0x2); // END_NODE soc
        push_u32(&mut structure, 0x2); // END_NODE root
        push_u32(&mut structure, 0x9); // END

        let hdr_len = 40u32;
        let off_dt_struct = hdr_len;
        let off_dt_strings = off_dt_struct + structure.len() as u32;
        let totalsize = off_dt_strings + strings.len() as u32;

        let mut blob = Vec::new();
        blob.extend_from_slice(&FDT_MAGIC.to_be_bytes());
        blob.extend_from_slice(&totalsize.to_be_bytes());
        blob.extend_from_slice(&off_dt_struct.to_be_bytes());
        blob.extend_from_slice(&off_dt_strings.to_be_bytes());
        blob.extend_from_slice(&0u32.to_be_bytes()); // off_mem_rsvmap (unused)
        blob.extend_from_slice(&FDT_VERSION.to_be_bytes());
        blob.extend_from_slice(&FDT_VERSION.to_be_bytes()); // last_comp_version
        blob.extend_from_slice(&0u32.to_be_bytes()); // boot_cpuid_phys
        blob.extend_from_slice(&(strings.len() as u32).to_be_bytes());
        blob.extend_from_slice(&(structure.len() as u32).to_be_bytes());
        blob.extend_from_slice(&structure);
        blob.extend_from_slice(&strings);
        blob
    }

    #[test]
    fn rejects_bad_magic() {
        let mut blob = sample_dtb();
        blob[0] = 0;
        let handle = Handle::open(&blob);
        assert!(handle.has_errors);
    }

    #[test]
    fn opens_and_finds_root() {
        let blob = sample_dtb();
        let handle = Handle::open(&blob);
        assert!(!handle.has_errors);
        let root = handle.root_node();
        assert!(root.valid);
        assert_eq!(handle.name_of(&root), "");
    }

    #[test]
    fn walks_siblings_and_children() {
        let blob = sample_dtb();
        let handle = Handle::open(&blob);
        let root = handle.root_node();
        let soc = handle.get_node(root, "soc");
        assert!(soc.valid);
        let child = handle.get_node(soc, "child");
        assert!(child.valid);
        assert!(!handle.next_node(soc).valid, "soc has no further sibling");
    }

    #[test]
    fn reads_props_as_cells() {
        let blob = sample_dtb();
        let handle = Handle::open(&blob);
        let root = handle.root_node();
        let addr_cells = handle.get_prop(root, "#address-cells");
        assert!(addr_cells.valid);
        assert_eq!(handle.prop_read_uint(addr_cells), Some(1));

        let soc = handle.get_node(root, "soc");
        let child = handle.get_node(soc, "child");
        let reg = handle.get_prop(child, "reg");
        assert_eq!(handle.prop_read_uint(reg), Some(0x1000));
    }

    #[test]
    fn resolves_phandle_and_parent() {
        let blob = sample_dtb();
        let handle = Handle::open(&blob);
        let root = handle.root_node();
        let soc = handle.get_node(root, "soc");
        let child = handle.get_node(soc, "child");

        let via_phandle = handle.phandle_node(1);
        assert!(via_phandle.valid);
        assert_eq!(handle.name_of(&via_phandle), "soc");

        let parent = handle.find_parent(child);
        assert!(parent.valid);
        assert_eq!(handle.name_of(&parent), "soc");
    }

    #[test]
    fn phandle_lookup_works_when_numbers_appear_out_of_order() {
        // soc (phandle 1) is indexed before child; give child the lower
        // phandle number so the sorted table must actually reorder them.
        let mut strings: Vec<u8> = Vec::new();
        let mut structure: Vec<u8> = Vec::new();
        let push_u32 = |buf: &mut Vec<u8>, v: u32| buf.extend_from_slice(&v.to_be_bytes());
        let push_name = |buf: &mut Vec<u8>, s: &str| {
            buf.extend_from_slice(s.as_bytes());
            buf.push(0);
            while buf.len() % 4 != 0 {
                buf.push(0);
            }
        };
        let push_prop = |buf: &mut Vec<u8>, strings: &mut Vec<u8>, name: &str, value: &[u8]| {
            push_u32(buf, 0x3);
            push_u32(buf, value.len() as u32);
            let off = strings.len() as u32;
            strings.extend_from_slice(name.as_bytes());
            strings.push(0);
            push_u32(buf, off);
            buf.extend_from_slice(value);
            while buf.len() % 4 != 0 {
                buf.push(0);
            }
        };

        push_u32(&mut structure, 0x1);
        push_name(&mut structure, "");

        push_u32(&mut structure, 0x1);
        push_name(&mut structure, "soc");
        push_prop(&mut structure, &mut strings, "phandle", &5u32.to_be_bytes());

        push_u32(&mut structure, 0x1);
        push_name(&mut structure, "child");
        push_prop(&mut structure, &mut strings, "phandle", &2u32.to_be_bytes());
        push_u32(&mut structure, 0x2); // END_NODE child

        push_u32(&mut structure, 0x2); // END_NODE soc
        push_u32(&mut structure, 0x2); // END_NODE root
        push_u32(&mut structure, 0x9); // END

        let hdr_len = 40u32;
        let off_dt_struct = hdr_len;
        let off_dt_strings = off_dt_struct + structure.len() as u32;
        let totalsize = off_dt_strings + strings.len() as u32;

        let mut blob = Vec::new();
        blob.extend_from_slice(&FDT_MAGIC.to_be_bytes());
        blob.extend_from_slice(&totalsize.to_be_bytes());
        blob.extend_from_slice(&off_dt_struct.to_be_bytes());
        blob.extend_from_slice(&off_dt_strings.to_be_bytes());
        blob.extend_from_slice(&0u32.to_be_bytes());
        blob.extend_from_slice(&FDT_VERSION.to_be_bytes());
        blob.extend_from_slice(&FDT_VERSION.to_be_bytes());
        blob.extend_from_slice(&0u32.to_be_bytes());
        blob.extend_from_slice(&(strings.len() as u32).to_be_bytes());
        blob.extend_from_slice(&(structure.len() as u32).to_be_bytes());
        blob.extend_from_slice(&structure);
        blob.extend_from_slice(&strings);

        let handle = Handle::open(&blob);
        assert!(!handle.has_errors);
        assert_eq!(handle.name_of(&handle.phandle_node(5)), "soc");
        assert_eq!(handle.name_of(&handle.phandle_node(2)), "child");
        assert!(!handle.phandle_node(99).valid);
    }

    #[test]
    fn find_node_resolves_absolute_path() {
        let blob = sample_dtb();
        let handle = Handle::open(&blob);
        let child = handle.find_node("/soc/child");
        assert!(child.valid);
        assert_eq!(handle.name_of(&child), "child");
    }
}
