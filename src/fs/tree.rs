//! the inode tree: every node lives in an id-keyed table owned by the tree,
//! directories refer to their children by [InodeId]
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io::Read;

use log::{debug, info, warn};

use crate::utils::fs_size_calculator::blocks_for_size;

use super::{
    inode::is_valid_name, superblock, BlockAllocator, BlockIndex, FsError, Inode, InodeId,
    Result, BLOCK_SIZE, MAX_FILE_SIZE, MAX_INODE_ID,
};

/// an inode namespace over a simulated block device
///
/// The tree owns its nodes, its id counter and the allocator it draws blocks from,
/// so independent trees never share numbering.
#[derive(Debug)]
pub struct InodeTree<A> {
    inodes: BTreeMap<InodeId, Inode>,
    root: Option<InodeId>,
    next_id: u32,
    block_size: u32,
    allocator: A,
}

/// constructors and read accessors
impl<A> InodeTree<A> {
    /// an empty tree using [BLOCK_SIZE]
    pub fn new(allocator: A) -> Self {
        Self::with_block_size(allocator, BLOCK_SIZE)
    }

    /// an empty tree whose files are split in blocks of `block_size` bytes
    /// # Panics
    /// if `block_size` is zero
    pub fn with_block_size(allocator: A, block_size: u32) -> Self {
        assert_ne!(block_size, 0, "block size must not be zero");
        InodeTree {
            inodes: BTreeMap::new(),
            root: None,
            next_id: 0,
            block_size,
            allocator,
        }
    }

    /// the first standalone directory created or loaded in this tree
    pub fn root(&self) -> Option<InodeId> {
        self.root
    }

    pub fn get(&self, id: InodeId) -> Option<&Inode> {
        self.inodes.get(&id)
    }

    pub fn contains(&self, id: InodeId) -> bool {
        self.inodes.contains_key(&id)
    }

    /// number of live nodes
    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// id the next created node will get
    pub fn next_id(&self) -> InodeId {
        InodeId(self.next_id)
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut A {
        &mut self.allocator
    }

    /// direct children of `id` in insertion order, nothing for files and unknown ids
    pub fn children(&self, id: InodeId) -> impl Iterator<Item = &Inode> + '_ {
        self.get(id)
            .into_iter()
            .flat_map(move |inode| inode.children().iter().filter_map(move |c| self.get(*c)))
    }

    /// pre-order, depth-first traversal of the subtree under `root`, with each node's depth
    pub fn walk(&self, root: InodeId) -> Walk<'_> {
        let stack = if self.contains(root) {
            vec![(0, root)]
        } else {
            Vec::new()
        };
        Walk {
            inodes: &self.inodes,
            stack,
        }
    }

    /// look up a direct child of `parent` by name
    ///
    /// Children are scanned in insertion order and the first match of either kind wins.
    /// Files and unknown parents have no children, so they always report [FsError::NotFound].
    pub fn find_child_by_name(&self, parent: InodeId, name: impl AsRef<OsStr>) -> Result<&Inode> {
        let name = name.as_ref();
        self.children(parent)
            .find(|child| child.name() == name)
            .ok_or(FsError::NotFound)
    }

    /// persist the subtree under `root` as a superblock
    pub fn encode_to_vec(&self, root: InodeId) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        superblock::encode(self, root, &mut buf)?;
        Ok(buf)
    }

    /// rebuild a tree from a superblock, with [BLOCK_SIZE] blocks
    pub fn load<R: Read>(reader: &mut R, allocator: A) -> Result<Self> {
        let mut tree = Self::new(allocator);
        superblock::decode(reader, &mut tree)?;
        Ok(tree)
    }

    /// the id the next node will take, as long as the superblock can store it
    fn free_id(&self) -> Result<InodeId> {
        if self.next_id > MAX_INODE_ID {
            return Err(FsError::IdsExhausted);
        }
        Ok(InodeId(self.next_id))
    }

    fn insert(&mut self, inode: Inode) {
        self.next_id = inode.id().0 + 1;
        self.inodes.insert(inode.id(), inode);
    }

    fn has_child_of_kind(&self, parent: &Inode, name: &OsStr, dir: bool) -> bool {
        parent
            .children()
            .iter()
            .filter_map(|c| self.get(*c))
            .any(|child| child.is_dir() == dir && child.name() == name)
    }

    /// a valid directory parent, or [FsError::InvalidParent]
    fn dir_parent(&self, parent: InodeId) -> Result<&Inode> {
        self.get(parent)
            .filter(|inode| inode.is_dir())
            .ok_or(FsError::InvalidParent)
    }

    fn attach(&mut self, parent: InodeId, child: InodeId) {
        if let Some(children) = self.inodes.get_mut(&parent).and_then(Inode::children_mut) {
            children.push(child);
        }
    }

    /// take in nodes reconstructed from a superblock, all or nothing
    pub(crate) fn commit_decoded(
        &mut self,
        nodes: BTreeMap<InodeId, Inode>,
        root: InodeId,
    ) -> Result<()> {
        if let Some(id) = nodes.keys().find(|id| self.contains(**id)) {
            return Err(FsError::format(format!(
                "inode id {id} is already used in this tree"
            )));
        }
        if let Some(max) = nodes.keys().next_back() {
            self.next_id = self.next_id.max(max.0.saturating_add(1));
        }
        debug!("loaded {} inodes under root {root}", nodes.len());
        self.inodes.extend(nodes);
        self.root.get_or_insert(root);
        Ok(())
    }
}

/// mutating operations
impl<A: BlockAllocator> InodeTree<A> {
    /// create a directory under `parent`, or a standalone root when `parent` is `None`
    ///
    /// Only one root per tree is expected; the first becomes [root](InodeTree::root).
    pub fn create_dir(&mut self, parent: Option<InodeId>, name: impl AsRef<OsStr>) -> Result<InodeId> {
        let name = name.as_ref();
        info!("create_dir() called with parent: {parent:?} and name: {name:?}");
        if let Some(parent) = parent {
            let parent = self.dir_parent(parent)?;
            if self.has_child_of_kind(parent, name, true) {
                return Err(FsError::DuplicateName { name: name.into() });
            }
        }
        if !is_valid_name(name) {
            return Err(FsError::InvalidName(name.into()));
        }

        let id = self.free_id()?;
        self.insert(Inode::new_dir(id, name.into(), parent));
        match parent {
            Some(parent) => self.attach(parent, id),
            None => {
                self.root.get_or_insert(id);
            }
        }
        Ok(id)
    }

    /// create a file of `size_in_bytes` under the directory `parent`
    ///
    /// Reserves `ceil(size_in_bytes / block_size)` blocks first; `parent` is only
    /// modified once every block is in hand. When the allocator runs dry the blocks
    /// already reserved stay allocated and are reported in [FsError::DiskFull].
    pub fn create_file(
        &mut self,
        parent: Option<InodeId>,
        name: impl AsRef<OsStr>,
        readonly: bool,
        size_in_bytes: u32,
    ) -> Result<InodeId> {
        let name = name.as_ref();
        info!(
            "create_file() called with parent: {parent:?}, name: {name:?} and size: {size_in_bytes}"
        );
        let parent = parent.ok_or(FsError::InvalidParent)?;
        let parent_inode = self.dir_parent(parent)?;
        if self.has_child_of_kind(parent_inode, name, false) {
            return Err(FsError::DuplicateName { name: name.into() });
        }
        if !is_valid_name(name) {
            return Err(FsError::InvalidName(name.into()));
        }
        if size_in_bytes > MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge(size_in_bytes.into()));
        }
        let id = self.free_id()?;

        let needed = blocks_for_size(size_in_bytes, self.block_size);
        let mut blocks: Vec<BlockIndex> = Vec::with_capacity(needed.min(1024));
        for _ in 0..needed {
            match self.allocator.allocate_block() {
                Some(block) => blocks.push(block),
                None => {
                    warn!(
                        "disk is full after {} of {needed} blocks for {name:?}, abandoning {blocks:?}",
                        blocks.len()
                    );
                    return Err(FsError::DiskFull { reserved: blocks });
                }
            }
        }
        debug!("reserved blocks {blocks:?} for {name:?}");

        self.insert(Inode::new_file(
            id,
            name.into(),
            parent,
            readonly,
            size_in_bytes,
            blocks,
        ));
        self.attach(parent, id);
        Ok(id)
    }

    /// release every node reachable from `root`, children first
    ///
    /// Blocks owned by files are left allocated, see
    /// [teardown_and_reclaim](InodeTree::teardown_and_reclaim). A node that still has a
    /// parent is detached from it. Unknown ids are ignored.
    /// # Return
    /// the number of released nodes
    pub fn teardown(&mut self, root: InodeId) -> usize {
        let Some(parent) = self.get(root).map(Inode::parent) else {
            return 0;
        };
        if let Some(children) = parent
            .and_then(|p| self.inodes.get_mut(&p))
            .and_then(Inode::children_mut)
        {
            children.retain(|c| *c != root);
        }

        let order: Vec<InodeId> = self.walk(root).map(|(_, inode)| inode.id()).collect();
        // reversed pre-order visits every child before its parent
        for id in order.iter().rev() {
            self.inodes.remove(id);
        }
        if self.root == Some(root) {
            self.root = None;
        }
        debug!("tore down {} inodes under {root}", order.len());
        order.len()
    }

    /// return every block owned by a file under `root` to the allocator, then tear it down
    /// # Return
    /// the number of blocks given back
    pub fn teardown_and_reclaim(&mut self, root: InodeId) -> usize {
        let blocks: Vec<BlockIndex> = self
            .walk(root)
            .flat_map(|(_, inode)| inode.blocks().iter().copied())
            .collect();
        for block in &blocks {
            self.allocator.release_block(*block);
        }
        self.teardown(root);
        blocks.len()
    }
}

/// pre-order iterator returned by [InodeTree::walk]
#[derive(Debug)]
pub struct Walk<'a> {
    inodes: &'a BTreeMap<InodeId, Inode>,
    stack: Vec<(usize, InodeId)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, &'a Inode);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (depth, id) = self.stack.pop()?;
            let Some(inode) = self.inodes.get(&id) else {
                continue;
            };
            self.stack
                .extend(inode.children().iter().rev().map(|c| (depth + 1, *c)));
            return Some((depth, inode));
        }
    }
}
