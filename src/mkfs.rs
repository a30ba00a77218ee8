//! create a new superblock
use crate::fs::{superblock, BitmapAllocator, InodeTree, ROOT_NAME};
use log::info;
use std::{
    fs::OpenOptions,
    io::{BufWriter, Write},
    path::Path,
};

/// write a superblock holding nothing but the root directory
/// # Params
/// - `superblock_path`: where to create the superblock, must not exist yet
///
/// # Return
/// an [anyhow::Result] type to indicate whether the operation is successful
pub fn mkfs<P>(superblock_path: P) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    // the root directory owns no blocks, an empty device is enough
    let mut tree = InodeTree::new(BitmapAllocator::default());
    let root = tree.create_dir(None, ROOT_NAME)?;

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(superblock_path.as_ref())?;
    let mut writer = BufWriter::new(file);
    superblock::encode(&tree, root, &mut writer)?;
    writer.flush()?;
    info!("created {}", superblock_path.as_ref().display());
    Ok(())
}
