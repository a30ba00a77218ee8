//! the superblock: a pre-order, depth-first encoding of an inode tree
//!
//! Every node is laid out as
//! - `id: i32`, `name_len: i32`, `name: [u8; name_len]` (NUL-terminated)
//! - `is_directory: u8`, `is_readonly: u8`, `size_in_bytes: i32`, `entry_count: i32`
//! - then `entry_count` block indices (`i64`) for a file,
//!   or `entry_count` encoded children for a directory
//!
//! All integers are little-endian and fixed-width. There is no framing beyond the
//! nested counts, so every count is validated while decoding.
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::{Read, Write};
use std::os::unix::ffi::{OsStrExt, OsStringExt};

use bincode::{config, Decode, Encode};
use log::debug;

use crate::utils::fs_size_calculator::blocks_for_size;

use super::{
    inode::is_valid_name, BlockIndex, FsError, Inode, InodeId, InodeKind, InodeTree, Result,
    MAX_DEPTH, MAX_NAME_LEN,
};

/// fields preceding the name bytes
#[derive(Encode, Decode, Debug, PartialEq)]
struct NameHeader {
    id: i32,
    name_len: i32,
}

/// fields following the name bytes
#[derive(Encode, Decode, Debug, PartialEq)]
struct EntryHeader {
    is_directory: u8,
    is_readonly: u8,
    size_in_bytes: i32,
    entry_count: i32,
}

/// write the subtree under `root` into `w`
pub fn encode<A, W: Write>(tree: &InodeTree<A>, root: InodeId, w: &mut W) -> Result<()> {
    let root = tree.get(root).ok_or(FsError::NotFound)?;
    encode_node(tree, root, w)
}

fn encode_node<A, W: Write>(tree: &InodeTree<A>, inode: &Inode, w: &mut W) -> Result<()> {
    let mut name = inode.name().as_bytes().to_vec();
    name.push(0);

    write(
        w,
        NameHeader {
            id: to_i32(inode.id().0, "inode id")?,
            name_len: to_i32(name.len(), "name length")?,
        },
    )?;
    w.write_all(&name)?;
    write(
        w,
        EntryHeader {
            is_directory: inode.is_dir().into(),
            is_readonly: inode.readonly().into(),
            size_in_bytes: to_i32(inode.size(), "file size")?,
            entry_count: to_i32(inode.entry_count(), "entry count")?,
        },
    )?;

    match inode.kind() {
        InodeKind::File { blocks, .. } => {
            for block in blocks {
                write(w, to_i64(*block)?)?;
            }
        }
        InodeKind::Directory { children } => {
            for child in children {
                let child = tree.get(*child).ok_or_else(|| {
                    FsError::format(format!("{} lists a missing child {child}", inode.id()))
                })?;
                encode_node(tree, child, w)?;
            }
        }
    }
    Ok(())
}

/// read one superblock from `r` into `tree`
///
/// Decoded nodes keep their persisted ids and block indices; the allocator is never
/// consulted. Nodes are staged and only added to `tree` once the whole stream decoded,
/// so a malformed stream leaves `tree` untouched.
/// # Return
/// the id of the decoded root
pub fn decode<R: Read, A>(r: &mut R, tree: &mut InodeTree<A>) -> Result<InodeId> {
    let mut decoder = Decoder {
        reader: r,
        block_size: tree.block_size(),
        nodes: BTreeMap::new(),
    };
    let root = decoder.decode_node(None, 0)?;
    tree.commit_decoded(decoder.nodes, root)?;
    Ok(root)
}

struct Decoder<'r, R> {
    reader: &'r mut R,
    block_size: u32,
    nodes: BTreeMap<InodeId, Inode>,
}

impl<R: Read> Decoder<'_, R> {
    fn decode_node(&mut self, parent: Option<InodeId>, depth: usize) -> Result<InodeId> {
        if depth > MAX_DEPTH {
            return Err(FsError::format(format!(
                "directories nested deeper than {MAX_DEPTH}"
            )));
        }

        let header: NameHeader = self.read("node header")?;
        let id = InodeId(non_negative(header.id, "inode id")?);
        let name_len = non_negative(header.name_len, "name length")? as usize;
        if name_len == 0 || name_len > MAX_NAME_LEN {
            return Err(FsError::format(format!(
                "name length {name_len} of inode {id} is out of range"
            )));
        }
        let mut name = vec![0u8; name_len];
        self.reader
            .read_exact(&mut name)
            .map_err(|e| truncated("name", e))?;
        if name.last() == Some(&0) {
            name.pop();
        }
        let name = OsString::from_vec(name);
        if !is_valid_name(&name) {
            return Err(FsError::format(format!("inode {id} has an invalid name {name:?}")));
        }

        let entries: EntryHeader = self.read("entry header")?;
        let size = non_negative(entries.size_in_bytes, "file size")?;
        let entry_count = non_negative(entries.entry_count, "entry count")? as usize;

        let inode = match (entries.is_directory, parent) {
            (0, None) => {
                return Err(FsError::format("the top-level inode must be a directory"));
            }
            (0, Some(parent)) => {
                let expected = blocks_for_size(size, self.block_size);
                if entry_count != expected {
                    return Err(FsError::format(format!(
                        "file {name:?} of {size} bytes lists {entry_count} blocks, expected {expected}"
                    )));
                }
                // the count is only trusted once the indices are actually read
                let mut blocks = Vec::with_capacity(entry_count.min(1024));
                for _ in 0..entry_count {
                    let block: i64 = self.read("block index")?;
                    blocks.push(to_block_index(block)?);
                }
                Inode::new_file(id, name, parent, entries.is_readonly != 0, size, blocks)
            }
            (1, _) => {
                let mut inode = Inode::new_dir(id, name, parent);
                let mut children = Vec::with_capacity(entry_count.min(64));
                for _ in 0..entry_count {
                    children.push(self.decode_node(Some(id), depth + 1)?);
                }
                if let Some(slot) = inode.children_mut() {
                    *slot = children;
                }
                inode
            }
            (other, _) => {
                return Err(FsError::format(format!(
                    "inode {id} has an unknown kind {other}"
                )));
            }
        };

        if self.nodes.insert(id, inode).is_some() {
            return Err(FsError::format(format!("inode id {id} appears twice")));
        }
        debug!("decoded inode {id} at depth {depth}");
        Ok(id)
    }

    fn read<D: Decode>(&mut self, what: &str) -> Result<D> {
        bincode::decode_from_std_read(self.reader, config::legacy())
            .map_err(|e| FsError::format(format!("unable to read {what}: {e}")))
    }
}

fn write<W: Write, E: Encode>(w: &mut W, value: E) -> Result<()> {
    let mut buf = [0u8; 16];
    let len = bincode::encode_into_slice(value, &mut buf, config::legacy())
        .map_err(|e| FsError::format(e.to_string()))?;
    Ok(w.write_all(&buf[..len])?)
}

fn truncated(what: &str, e: std::io::Error) -> FsError {
    FsError::format(format!("unable to read {what}: {e}"))
}

fn non_negative(value: i32, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| FsError::format(format!("negative {what} {value}")))
}

fn to_i32<T>(value: T, what: &str) -> Result<i32>
where
    T: TryInto<i32> + Copy + std::fmt::Display,
{
    value
        .try_into()
        .map_err(|_| FsError::format(format!("{what} {value} does not fit in the superblock")))
}

fn to_i64(block: BlockIndex) -> Result<i64> {
    i64::try_from(block)
        .map_err(|_| FsError::format(format!("block index {block} does not fit in the superblock")))
}

fn to_block_index(block: i64) -> Result<BlockIndex> {
    BlockIndex::try_from(block).map_err(|_| FsError::format(format!("negative block index {block}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{BitmapAllocator, BlockAllocator};
    use std::ffi::OsStr;
    use std::io::Cursor;

    /// an allocator that must never be called
    struct Untouchable;

    impl BlockAllocator for Untouchable {
        fn allocate_block(&mut self) -> Option<BlockIndex> {
            panic!("decoding must not allocate blocks")
        }

        fn release_block(&mut self, _index: BlockIndex) {
            panic!("decoding must not release blocks")
        }
    }

    fn sample_tree() -> anyhow::Result<(InodeTree<BitmapAllocator>, InodeId)> {
        let mut tree = InodeTree::new(BitmapAllocator::new(32));
        let root = tree.create_dir(None, "/")?;
        let docs = tree.create_dir(Some(root), "docs")?;
        tree.create_file(Some(docs), "readme.txt", false, 10000)?;
        tree.create_file(Some(docs), "empty", true, 0)?;
        let nested = tree.create_dir(Some(docs), "nested")?;
        tree.create_file(Some(nested), "deep.bin", true, 4096)?;
        tree.create_dir(Some(root), "readme.txt")?;
        tree.create_file(Some(root), "readme.txt", false, 1)?;
        Ok((tree, root))
    }

    fn assert_same_shape<A, B>(a: &InodeTree<A>, a_root: InodeId, b: &InodeTree<B>, b_root: InodeId) {
        let left: Vec<_> = a.walk(a_root).collect();
        let right: Vec<_> = b.walk(b_root).collect();
        assert_eq!(left.len(), right.len());
        for ((da, ia), (db, ib)) in left.into_iter().zip(right) {
            assert_eq!(da, db);
            assert_eq!(ia, ib);
        }
    }

    /// the exact bytes for a root holding one file
    #[test]
    fn test_byte_layout() -> anyhow::Result<()> {
        let mut tree = InodeTree::new(BitmapAllocator::new(4));
        let root = tree.create_dir(None, "/")?;
        tree.create_file(Some(root), "ab", true, 5000)?;
        let bytes = tree.encode_to_vec(root)?;

        let mut expected = Vec::new();
        // root: id 0, name "/\0", directory, not readonly, size 0, one child
        expected.extend_from_slice(&0i32.to_le_bytes());
        expected.extend_from_slice(&2i32.to_le_bytes());
        expected.extend_from_slice(b"/\0");
        expected.extend_from_slice(&[1, 0]);
        expected.extend_from_slice(&0i32.to_le_bytes());
        expected.extend_from_slice(&1i32.to_le_bytes());
        // file: id 1, name "ab\0", file, readonly, 5000 bytes, blocks 0 and 1
        expected.extend_from_slice(&1i32.to_le_bytes());
        expected.extend_from_slice(&3i32.to_le_bytes());
        expected.extend_from_slice(b"ab\0");
        expected.extend_from_slice(&[0, 1]);
        expected.extend_from_slice(&5000i32.to_le_bytes());
        expected.extend_from_slice(&2i32.to_le_bytes());
        expected.extend_from_slice(&0i64.to_le_bytes());
        expected.extend_from_slice(&1i64.to_le_bytes());

        assert_eq!(bytes, expected);
        Ok(())
    }

    #[test]
    fn test_encode_decode_keeps_shape() -> anyhow::Result<()> {
        let (tree, root) = sample_tree()?;
        let bytes = tree.encode_to_vec(root)?;

        let mut loaded = InodeTree::new(Untouchable);
        let loaded_root = decode(&mut Cursor::new(&bytes), &mut loaded)?;
        assert_eq!(loaded.root(), Some(loaded_root));
        assert_eq!(loaded.len(), tree.len());
        assert_same_shape(&tree, root, &loaded, loaded_root);

        // encoding the loaded tree reproduces the same bytes
        assert_eq!(loaded.encode_to_vec(loaded_root)?, bytes);
        Ok(())
    }

    #[test]
    fn test_end_to_end_scenario() -> anyhow::Result<()> {
        let mut tree = InodeTree::new(BitmapAllocator::new(16));
        let root = tree.create_dir(None, "/")?;
        let docs = tree.create_dir(Some(root), "docs")?;
        let readme = tree.create_file(Some(docs), "readme.txt", false, 10000)?;
        let blocks = tree.get(readme).map(|f| f.blocks().to_vec()).unwrap_or_default();
        assert_eq!(blocks.len(), 3);

        let bytes = tree.encode_to_vec(root)?;
        let loaded = InodeTree::load(&mut bytes.as_slice(), BitmapAllocator::new(16))?;
        let loaded_root = loaded.root().ok_or(FsError::NotFound)?;

        let children: Vec<_> = loaded.children(loaded_root).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name(), "docs");
        assert!(children[0].is_dir());

        let files: Vec<_> = loaded.children(children[0].id()).collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name(), "readme.txt");
        assert!(files[0].is_file());
        assert_eq!(files[0].size(), 10000);
        assert_eq!(files[0].blocks(), blocks.as_slice());
        Ok(())
    }

    #[test]
    fn test_loaded_tree_does_not_reuse_ids() -> anyhow::Result<()> {
        let (tree, root) = sample_tree()?;
        let bytes = tree.encode_to_vec(root)?;
        let mut loaded = InodeTree::load(&mut bytes.as_slice(), BitmapAllocator::new(32))?;
        let loaded_root = loaded.root().ok_or(FsError::NotFound)?;
        let new = loaded.create_dir(Some(loaded_root), "new")?;
        assert_eq!(new, tree.next_id());
        Ok(())
    }

    #[test]
    fn test_decode_accepts_names_without_terminator() -> anyhow::Result<()> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&5i32.to_le_bytes());
        bytes.extend_from_slice(&4i32.to_le_bytes());
        bytes.extend_from_slice(b"root");
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());

        let mut tree = InodeTree::new(Untouchable);
        let root = decode(&mut bytes.as_slice(), &mut tree)?;
        assert_eq!(root, InodeId(5));
        assert_eq!(tree.get(root).map(Inode::name), Some(OsStr::new("root")));
        assert_eq!(tree.next_id(), InodeId(6));
        Ok(())
    }

    #[test]
    fn test_truncated_stream_is_a_format_error() -> anyhow::Result<()> {
        let (tree, root) = sample_tree()?;
        let bytes = tree.encode_to_vec(root)?;
        for cut in [0, 3, 9, 20, bytes.len() / 2, bytes.len() - 1] {
            let mut loaded = InodeTree::new(Untouchable);
            let result = decode(&mut &bytes[..cut], &mut loaded);
            assert!(matches!(result, Err(FsError::Format(_))), "cut at {cut}");
            assert!(loaded.is_empty());
        }
        Ok(())
    }

    #[test]
    fn test_corrupted_counts_are_rejected() -> anyhow::Result<()> {
        let mut tree = InodeTree::new(BitmapAllocator::new(4));
        let root = tree.create_dir(None, "/")?;
        tree.create_file(Some(root), "f", false, 4096)?;
        let bytes = tree.encode_to_vec(root)?;

        // root entry_count sits right after id, name_len, "/\0", kind, readonly and size
        let root_count = 4 + 4 + 2 + 1 + 1 + 4;
        let mut corrupted = bytes.clone();
        corrupted[root_count..root_count + 4].copy_from_slice(&(-1i32).to_le_bytes());
        let result = decode(&mut corrupted.as_slice(), &mut InodeTree::new(Untouchable));
        assert!(matches!(result, Err(FsError::Format(_))));

        let mut corrupted = bytes.clone();
        corrupted[root_count..root_count + 4].copy_from_slice(&2i32.to_le_bytes());
        let result = decode(&mut corrupted.as_slice(), &mut InodeTree::new(Untouchable));
        assert!(matches!(result, Err(FsError::Format(_))));

        // a file whose block count disagrees with its size
        let file_count = root_count + 4 + 4 + 4 + 2 + 1 + 1 + 4;
        let mut corrupted = bytes;
        corrupted[file_count..file_count + 4].copy_from_slice(&0i32.to_le_bytes());
        let result = decode(&mut corrupted.as_slice(), &mut InodeTree::new(Untouchable));
        assert!(matches!(result, Err(FsError::Format(_))));
        Ok(())
    }

    #[test]
    fn test_absurd_name_length_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&i32::MAX.to_le_bytes());
        let result = decode(&mut bytes.as_slice(), &mut InodeTree::new(Untouchable));
        assert!(matches!(result, Err(FsError::Format(_))));

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&(-4i32).to_le_bytes());
        let result = decode(&mut bytes.as_slice(), &mut InodeTree::new(Untouchable));
        assert!(matches!(result, Err(FsError::Format(_))));
    }

    #[test]
    fn test_top_level_file_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(b"f\0");
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        let result = decode(&mut bytes.as_slice(), &mut InodeTree::new(Untouchable));
        assert!(matches!(result, Err(FsError::Format(_))));
    }

    #[test]
    fn test_duplicate_ids_are_rejected() -> anyhow::Result<()> {
        let mut tree = InodeTree::new(BitmapAllocator::new(4));
        let root = tree.create_dir(None, "/")?;
        tree.create_dir(Some(root), "a")?;
        let mut bytes = tree.encode_to_vec(root)?;
        // give the child the root's id
        let child_id = 4 + 4 + 2 + 1 + 1 + 4 + 4;
        bytes[child_id..child_id + 4].copy_from_slice(&0i32.to_le_bytes());
        let result = decode(&mut bytes.as_slice(), &mut InodeTree::new(Untouchable));
        assert!(matches!(result, Err(FsError::Format(_))));
        Ok(())
    }

    #[test]
    fn test_decode_into_tree_with_colliding_ids() -> anyhow::Result<()> {
        let (tree, root) = sample_tree()?;
        let bytes = tree.encode_to_vec(root)?;
        let (mut other, _) = sample_tree()?;
        let before = other.len();
        let result = decode(&mut bytes.as_slice(), &mut other);
        assert!(matches!(result, Err(FsError::Format(_))));
        assert_eq!(other.len(), before);
        Ok(())
    }

    /// append one node header: id, name, kind, readonly, size and entry count
    fn push_node(bytes: &mut Vec<u8>, id: i32, name: &[u8], kind: u8, size: i32, count: i32) {
        bytes.extend_from_slice(&id.to_le_bytes());
        bytes.extend_from_slice(&(name.len() as i32).to_le_bytes());
        bytes.extend_from_slice(name);
        bytes.extend_from_slice(&[kind, 0]);
        bytes.extend_from_slice(&size.to_le_bytes());
        bytes.extend_from_slice(&count.to_le_bytes());
    }

    fn rejects(bytes: &[u8]) -> bool {
        let mut tree = InodeTree::new(Untouchable);
        let rejected = matches!(decode(&mut &bytes[..], &mut tree), Err(FsError::Format(_)));
        rejected && tree.is_empty()
    }

    #[test]
    fn test_huge_block_count_is_read_lazily() {
        let mut bytes = Vec::new();
        push_node(&mut bytes, 0, b"/\0", 1, 0, 1);
        push_node(&mut bytes, 1, b"big\0", 0, i32::MAX, i32::MAX);
        bytes.extend_from_slice(&0i64.to_le_bytes());
        assert_eq!(bytes.len(), 44);

        // one-byte blocks make the declared count consistent with the size
        let mut tree = InodeTree::with_block_size(Untouchable, 1);
        let result = decode(&mut bytes.as_slice(), &mut tree);
        assert!(matches!(result, Err(FsError::Format(_))));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let mut bytes = Vec::new();
        push_node(&mut bytes, 0, b"/\0", 2, 0, 0);
        assert!(rejects(&bytes));
    }

    #[test]
    fn test_negative_block_index_is_rejected() {
        let mut bytes = Vec::new();
        push_node(&mut bytes, 0, b"/\0", 1, 0, 1);
        push_node(&mut bytes, 1, b"f\0", 0, 1, 1);
        bytes.extend_from_slice(&(-1i64).to_le_bytes());
        assert!(rejects(&bytes));
    }

    #[test]
    fn test_negative_id_is_rejected() {
        let mut bytes = Vec::new();
        push_node(&mut bytes, -1, b"/\0", 1, 0, 0);
        assert!(rejects(&bytes));
    }

    #[test]
    fn test_negative_size_is_rejected() {
        let mut bytes = Vec::new();
        push_node(&mut bytes, 0, b"/\0", 1, 0, 1);
        push_node(&mut bytes, 1, b"f\0", 0, -5, 0);
        assert!(rejects(&bytes));
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let mut bytes = Vec::new();
        push_node(&mut bytes, 0, b"", 1, 0, 0);
        assert!(rejects(&bytes));

        // nothing but the terminator
        let mut bytes = Vec::new();
        push_node(&mut bytes, 0, b"\0", 1, 0, 0);
        assert!(rejects(&bytes));
    }

    fn directory_chain(len: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        for i in 0..len {
            let count = i32::from(i + 1 < len);
            push_node(&mut bytes, i as i32, b"d\0", 1, 0, count);
        }
        bytes
    }

    #[test]
    fn test_nesting_depth_is_bounded() -> anyhow::Result<()> {
        // decoding recurses once per level, unoptimized frames need room
        let (accepted, rejected) = std::thread::Builder::new()
            .stack_size(64 << 20)
            .spawn(|| {
                // the deepest node sits at depth MAX_DEPTH
                let bytes = directory_chain(MAX_DEPTH + 1);
                let mut tree = InodeTree::new(Untouchable);
                let accepted = decode(&mut bytes.as_slice(), &mut tree).is_ok()
                    && tree.len() == MAX_DEPTH + 1;
                (accepted, rejects(&directory_chain(MAX_DEPTH + 2)))
            })?
            .join()
            .map_err(|_| anyhow::anyhow!("decoding thread panicked"))?;
        assert!(accepted);
        assert!(rejected);
        Ok(())
    }

    #[test]
    fn test_encode_unknown_root() {
        let tree = InodeTree::new(BitmapAllocator::new(1));
        assert!(matches!(
            tree.encode_to_vec(InodeId(3)),
            Err(FsError::NotFound)
        ));
    }
}
