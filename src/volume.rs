//! open a persisted superblock, edit the tree it describes and write it back
use anyhow::anyhow;
use byte_unit::Byte;
use log::{info, warn};
use memmap2::Mmap;
use std::{
    ffi::OsStr,
    fs::{self, File},
    path::{Component, Path, PathBuf},
};

use crate::{
    fs::{superblock, BitmapAllocator, BlockIndex, FsError, InodeId, InodeTree, TreeDump},
    utils::fs_size_calculator::device_size,
};

/// an inode tree loaded from a superblock file, over a simulated device of fixed size
#[derive(Debug)]
pub struct Volume {
    superblock_path: PathBuf,
    tree: InodeTree<BitmapAllocator>,
    root: InodeId,
}

impl Volume {
    /// load the superblock at `superblock_path`
    ///
    /// The allocator bitmap is rebuilt from the blocks owned by the loaded files.
    /// # Params
    /// - `block_size`: the block size the superblock was written with
    /// - `block_count`: how many blocks the simulated device has
    pub fn open<P>(superblock_path: P, block_size: u32, block_count: usize) -> anyhow::Result<Self>
    where
        P: AsRef<Path>,
    {
        let superblock_path = superblock_path.as_ref();
        if block_size == 0 {
            return Err(anyhow!("block size must not be zero"));
        }
        let file = File::open(superblock_path)?;
        // Safety
        // the superblock file is only read here and not modified while mapped
        let mmap = unsafe { Mmap::map(&file)? };
        let mut bytes: &[u8] = &mmap;

        let mut tree =
            InodeTree::with_block_size(BitmapAllocator::new(block_count), block_size);
        let root = superblock::decode(&mut bytes, &mut tree)?;
        if !bytes.is_empty() {
            warn!(
                "{} trailing bytes after the superblock in {}",
                bytes.len(),
                superblock_path.display()
            );
        }

        let owned: Vec<BlockIndex> = tree
            .walk(root)
            .flat_map(|(_, inode)| inode.blocks().iter().copied())
            .collect();
        for block in owned {
            if !tree.allocator_mut().mark_allocated(block) {
                return Err(anyhow!(
                    "block {block} is outside a device of {block_count} blocks or owned twice"
                ));
            }
        }
        info!(
            "opened {} with {} inodes on a {} device, {} of {block_count} blocks free",
            superblock_path.display(),
            tree.len(),
            Byte::from_bytes(device_size(block_count, block_size) as _).get_appropriate_unit(true),
            tree.allocator().free_blocks()
        );

        Ok(Volume {
            superblock_path: superblock_path.to_path_buf(),
            tree,
            root,
        })
    }

    pub fn tree(&self) -> &InodeTree<BitmapAllocator> {
        &self.tree
    }

    pub fn root(&self) -> InodeId {
        self.root
    }

    /// resolve an absolute or root-relative path one component at a time
    pub fn resolve<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<InodeId> {
        let mut current = self.root;
        for name in components(path.as_ref())? {
            current = self
                .tree
                .find_child_by_name(current, name)
                .map_err(|_| anyhow!("{:?} not found in {}", name, path.as_ref().display()))?
                .id();
        }
        Ok(current)
    }

    pub fn mkdir<P: AsRef<Path>>(&mut self, path: P) -> anyhow::Result<InodeId> {
        let (parent, name) = self.split(path.as_ref())?;
        Ok(self.tree.create_dir(Some(parent), name)?)
    }

    pub fn create_file<P: AsRef<Path>>(
        &mut self,
        path: P,
        readonly: bool,
        size_in_bytes: u32,
    ) -> anyhow::Result<InodeId> {
        let (parent, name) = self.split(path.as_ref())?;
        let free = self.tree.allocator().free_blocks();
        match self.tree.create_file(Some(parent), name, readonly, size_in_bytes) {
            Err(FsError::DiskFull { reserved }) => Err(anyhow!(
                "not enough space for {}: only {} free, {} blocks abandoned",
                Byte::from_bytes(size_in_bytes as _).get_appropriate_unit(true),
                Byte::from_bytes(free as u128 * self.tree.block_size() as u128)
                    .get_appropriate_unit(true),
                reserved.len()
            )),
            result => Ok(result?),
        }
    }

    /// write the tree back to the superblock file it was loaded from
    ///
    /// The whole tree is encoded before the file is touched, so a tree that cannot be
    /// encoded leaves the previous superblock in place.
    pub fn save(&self) -> anyhow::Result<()> {
        let bytes = self.tree.encode_to_vec(self.root)?;
        fs::write(&self.superblock_path, bytes)?;
        info!("saved {} inodes to {}", self.tree.len(), self.superblock_path.display());
        Ok(())
    }

    pub fn dump(&self) -> TreeDump<'_, BitmapAllocator> {
        TreeDump::new(&self.tree, self.root)
    }

    // (parent directory, final name)
    fn split<'p>(&self, path: &'p Path) -> anyhow::Result<(InodeId, &'p OsStr)> {
        let mut names = components(path)?;
        let name = names
            .pop()
            .ok_or_else(|| anyhow!("{} names no entry", path.display()))?;
        let mut parent = self.root;
        for dir in names {
            let inode = self.tree.find_child_by_name(parent, dir)?;
            if !inode.is_dir() {
                return Err(anyhow!("{dir:?} in {} is not a directory", path.display()));
            }
            parent = inode.id();
        }
        Ok((parent, name))
    }
}

fn components(path: &Path) -> anyhow::Result<Vec<&OsStr>> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(Ok(name)),
            Component::RootDir | Component::CurDir => None,
            _ => Some(Err(anyhow!("unsupported path {}", path.display()))),
        })
        .collect()
}
