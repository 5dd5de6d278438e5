// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Structure block walking and the decoded tree model.

use {
    crate::{
        error::{Error, StructureError},
        format::{
            FdtHeader, FdtReserveEntry, StringsBlock, FDT_BEGIN_NODE, FDT_END, FDT_END_NODE,
            FDT_NOP, FDT_PROP, TAG_SIZE,
        },
        value,
    },
    scroll::Pread,
    std::path::Path,
};

/// Display column holding node and property names.
pub const COLUMN_NAME: usize = 0;

/// Display column holding formatted property values.
pub const COLUMN_VALUE: usize = 1;

/// Handle addressing a [Node] inside one [DecodedTree].
///
/// Ids are only minted by the tree that owns the node; they are plain
/// indices into its arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A named node with ordered children and properties.
#[derive(Clone, Debug)]
pub struct Node {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    properties: Vec<Property>,
}

impl Node {
    /// Node name. The root of a tree is named "/".
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Properties in blob encounter order.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Display text for a column: the name, or nothing for the value
    /// column (a node has no value of its own).
    pub fn display_text(&self, column: usize) -> &str {
        if column == COLUMN_NAME {
            &self.name
        } else {
            ""
        }
    }
}

/// A property: resolved name plus an owned copy of the raw payload.
#[derive(Clone, Debug)]
pub struct Property {
    name: String,
    value: Vec<u8>,
}

impl Property {
    /// Property name as resolved through the strings block.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw payload bytes as stored in the blob.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Formatted payload segments (see [crate::value::format_segments]).
    ///
    /// Recomputed from the raw bytes on every call; nothing is cached.
    pub fn display_segments(&self) -> Vec<String> {
        value::format_segments(&self.value)
    }

    /// Formatted payload, segments joined with ", ".
    pub fn display_value(&self) -> String {
        value::format_value(&self.value)
    }

    /// Display text for a column: the name, or the formatted payload.
    pub fn display_text(&self, column: usize) -> String {
        if column == COLUMN_NAME {
            self.name.clone()
        } else {
            self.display_value()
        }
    }
}

/// A fully decoded FDT blob.
///
/// Nodes live in an arena and are addressed by [NodeId]: each node stores
/// its parent id (a non-owning relation used only for traversal) and an
/// ordered list of child ids. The tree owns every byte it exposes, so the
/// buffer handed to [DecodedTree::parse] can be dropped as soon as it
/// returns. Decoding either produces a complete tree or fails with the
/// first error encountered; a partial tree is never returned.
#[derive(Clone, Debug)]
pub struct DecodedTree {
    source_name: String,
    header: FdtHeader,
    nodes: Vec<Node>,
    reserve_map: Vec<FdtReserveEntry>,
}

impl DecodedTree {
    /// Decode a blob held in memory.
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let header = FdtHeader::parse(data)?;
        log::debug!(
            "magic 0x{:08x} version {} struct 0x{:x}+0x{:x} strings 0x{:x}+0x{:x} rsvmap 0x{:x}",
            header.magic,
            header.version,
            header.off_dt_struct,
            header.size_dt_struct,
            header.off_dt_strings,
            header.size_dt_strings,
            header.off_mem_rsvmap
        );

        let mut reserve_map = Vec::new();
        for entry in header.reserve_entries(data)? {
            let entry = entry?;
            log::debug!("reserved memory 0x{:x} size 0x{:x}", entry.address, entry.size);
            reserve_map.push(entry);
        }

        let strings = header.strings_block(data)?;
        let nodes = Walker::new(&header, data, strings)?.walk()?;

        Ok(Self {
            source_name: String::new(),
            header,
            nodes,
            reserve_map,
        })
    }

    /// Decode the blob in a file, using the path as the display title.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let mut tree = Self::parse(&data)?;
        tree.source_name = title_for_path(path);

        Ok(tree)
    }

    /// The validated blob header.
    pub fn header(&self) -> &FdtHeader {
        &self.header
    }

    /// Memory reservations in blob order, terminator excluded.
    pub fn reserve_map(&self) -> &[FdtReserveEntry] {
        &self.reserve_map
    }

    /// The root node. Present in every successfully decoded tree.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Look up a node by id.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Number of child nodes.
    pub fn child_count(&self, id: NodeId) -> usize {
        self.nodes[id.0].children.len()
    }

    /// Child node by position, `None` past the end.
    pub fn child(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.nodes[id.0].children.get(index).copied()
    }

    /// Parent node, `None` for the root.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Number of properties attached to a node.
    pub fn property_count(&self, id: NodeId) -> usize {
        self.nodes[id.0].properties.len()
    }

    /// Properties of a node in blob encounter order.
    pub fn properties(&self, id: NodeId) -> &[Property] {
        &self.nodes[id.0].properties
    }

    /// The two header-row display strings: source title and format label.
    pub fn header_columns(&self) -> [&str; 2] {
        [&self.source_name, "Flattened Device Tree"]
    }

    /// Title describing where this tree was decoded from.
    pub fn source_name(&self) -> &str {
        &self.source_name
    }
}

/// Linear cursor over the structure block, with an explicit stack of open
/// nodes instead of recursion.
struct Walker<'a> {
    block: &'a [u8],
    base: usize,
    cursor: usize,
    strings: StringsBlock<'a>,
    nodes: Vec<Node>,
    stack: Vec<NodeId>,
}

impl<'a> Walker<'a> {
    fn new(header: &FdtHeader, data: &'a [u8], strings: StringsBlock<'a>) -> Result<Self, Error> {
        if header.off_dt_struct as usize % TAG_SIZE != 0 {
            return Err(StructureError::Misaligned(header.off_dt_struct).into());
        }

        Ok(Self {
            block: header.structure_block(data)?,
            base: header.off_dt_struct as usize,
            cursor: 0,
            strings,
            nodes: Vec::new(),
            stack: Vec::new(),
        })
    }

    /// Walk the tag stream to completion.
    ///
    /// The cursor strictly advances on every tag, so the walk is finite
    /// even for degenerate input.
    fn walk(mut self) -> Result<Vec<Node>, Error> {
        loop {
            let tag_at = self.base + self.cursor;
            let tag = self.read_u32()?;

            match tag {
                FDT_BEGIN_NODE => self.begin_node(tag_at)?,
                FDT_END_NODE => {
                    if self.stack.pop().is_none() {
                        return Err(StructureError::UnbalancedEndNode(tag_at).into());
                    }
                    log::trace!("{:indent$}end node", "", indent = self.stack.len());
                }
                FDT_PROP => self.property(tag_at)?,
                FDT_NOP => {}
                FDT_END => {
                    if !self.stack.is_empty() {
                        return Err(StructureError::UnbalancedTree {
                            offset: tag_at,
                            open: self.stack.len(),
                        }
                        .into());
                    }
                    if self.nodes.is_empty() {
                        return Err(StructureError::MissingRootNode(tag_at).into());
                    }

                    return Ok(self.nodes);
                }
                tag => return Err(StructureError::UnknownTag { tag, offset: tag_at }.into()),
            }
        }
    }

    fn begin_node(&mut self, tag_at: usize) -> Result<(), Error> {
        let name = self.read_node_name()?;
        self.pad_to_tag();

        // Only the very first node maps an empty name to "/".
        let name = if self.nodes.is_empty() && name.is_empty() {
            "/".to_string()
        } else {
            name
        };

        let parent = self.stack.last().copied();
        let id = NodeId(self.nodes.len());
        match parent {
            Some(parent) => self.nodes[parent.0].children.push(id),
            None if self.nodes.is_empty() => {}
            None => return Err(StructureError::MultipleRootNodes(tag_at).into()),
        }

        log::trace!("{:indent$}begin node \"{}\"", "", name, indent = self.stack.len());
        self.nodes.push(Node {
            name,
            parent,
            children: Vec::new(),
            properties: Vec::new(),
        });
        self.stack.push(id);

        Ok(())
    }

    fn property(&mut self, tag_at: usize) -> Result<(), Error> {
        let len = self.read_u32()? as usize;
        let nameoff = self.read_u32()?;

        let value_at = self.cursor;
        let end = value_at
            .checked_add(len)
            .filter(|&end| end <= self.block.len())
            .ok_or(StructureError::Truncated(self.base + value_at))?;
        let value = self.block[value_at..end].to_vec();
        self.cursor = end;
        self.pad_to_tag();

        let name = self.strings.resolve(nameoff)?;
        let Some(&owner) = self.stack.last() else {
            return Err(StructureError::PropertyOutsideNode(tag_at).into());
        };

        log::trace!(
            "{:indent$}property \"{}\" ({} bytes)",
            "",
            name,
            value.len(),
            indent = self.stack.len()
        );
        self.nodes[owner.0].properties.push(Property {
            name: name.to_string(),
            value,
        });

        Ok(())
    }

    fn read_u32(&mut self) -> Result<u32, StructureError> {
        let at = self.cursor;
        self.block
            .gread_with::<u32>(&mut self.cursor, scroll::BE)
            .map_err(|_| StructureError::Truncated(self.base + at))
    }

    /// Read the NUL-terminated name following a BEGIN_NODE tag.
    fn read_node_name(&mut self) -> Result<String, StructureError> {
        let start = self.cursor;
        let tail = self
            .block
            .get(start..)
            .ok_or(StructureError::Truncated(self.base + start))?;
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(StructureError::Truncated(self.base + self.block.len()))?;
        let name = std::str::from_utf8(&tail[..len])
            .map_err(|_| StructureError::InvalidNodeName(self.base + start))?
            .to_string();
        self.cursor = start + len + 1;

        Ok(name)
    }

    /// Round the cursor up to the next tag boundary.
    fn pad_to_tag(&mut self) {
        self.cursor = (self.cursor + TAG_SIZE - 1) & !(TAG_SIZE - 1);
    }
}

fn title_with_home(full: &str, home: &str) -> Option<String> {
    if home.is_empty() || full.len() <= home.len() {
        return None;
    }

    full.strip_prefix(home)
        .map(|rest| format!("${{HOME}}{rest}"))
}

/// Path rendered for the header row, with the home directory collapsed to
/// `${HOME}`.
fn title_for_path(path: &Path) -> String {
    let full = path.display().to_string();
    match std::env::var_os("HOME") {
        Some(home) => title_with_home(&full, &home.to_string_lossy()).unwrap_or(full),
        None => full,
    }
}
