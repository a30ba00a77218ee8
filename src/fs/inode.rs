use std::ffi::{OsStr, OsString};
use std::fmt;

use super::BlockIndex;

/// process-unique inode number, assigned by an [InodeTree](super::InodeTree) and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InodeId(pub u32);

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InodeKind {
    File {
        readonly: bool,
        size: u32,
        /// exactly `ceil(size / block_size)` blocks, owned by this file
        blocks: Vec<BlockIndex>,
    },
    Directory {
        /// append-only, in insertion order
        children: Vec<InodeId>,
    },
}

/// a node of the namespace, either a file or a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub(crate) id: InodeId,
    pub(crate) name: OsString,
    pub(crate) parent: Option<InodeId>,
    pub(crate) kind: InodeKind,
}

impl Inode {
    pub(crate) fn new_dir(id: InodeId, name: OsString, parent: Option<InodeId>) -> Self {
        Inode {
            id,
            name,
            parent,
            kind: InodeKind::Directory {
                children: Vec::new(),
            },
        }
    }

    pub(crate) fn new_file(
        id: InodeId,
        name: OsString,
        parent: InodeId,
        readonly: bool,
        size: u32,
        blocks: Vec<BlockIndex>,
    ) -> Self {
        Inode {
            id,
            name,
            parent: Some(parent),
            kind: InodeKind::File {
                readonly,
                size,
                blocks,
            },
        }
    }

    pub fn id(&self) -> InodeId {
        self.id
    }

    pub fn name(&self) -> &OsStr {
        &self.name
    }

    /// `None` for a root
    pub fn parent(&self) -> Option<InodeId> {
        self.parent
    }

    pub fn kind(&self) -> &InodeKind {
        &self.kind
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, InodeKind::Directory { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, InodeKind::File { .. })
    }

    /// always `false` for directories
    pub fn readonly(&self) -> bool {
        match self.kind {
            InodeKind::File { readonly, .. } => readonly,
            InodeKind::Directory { .. } => false,
        }
    }

    /// file size in bytes, 0 for directories
    pub fn size(&self) -> u32 {
        match self.kind {
            InodeKind::File { size, .. } => size,
            InodeKind::Directory { .. } => 0,
        }
    }

    /// blocks owned by a file, empty for directories
    pub fn blocks(&self) -> &[BlockIndex] {
        match &self.kind {
            InodeKind::File { blocks, .. } => blocks,
            InodeKind::Directory { .. } => &[],
        }
    }

    /// children of a directory, empty for files
    pub fn children(&self) -> &[InodeId] {
        match &self.kind {
            InodeKind::Directory { children } => children,
            InodeKind::File { .. } => &[],
        }
    }

    /// number of persisted entries: children for a directory, blocks for a file
    pub fn entry_count(&self) -> usize {
        match &self.kind {
            InodeKind::File { blocks, .. } => blocks.len(),
            InodeKind::Directory { children } => children.len(),
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<InodeId>> {
        match &mut self.kind {
            InodeKind::Directory { children } => Some(children),
            InodeKind::File { .. } => None,
        }
    }
}

/// names must be non-empty and free of NUL, the superblock stores them as C strings
pub(crate) fn is_valid_name(name: &OsStr) -> bool {
    !name.is_empty() && !name.as_encoded_bytes().contains(&0)
}
