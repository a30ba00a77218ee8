//! human-readable listing of an inode tree, for debugging
use std::fmt;

use super::{InodeId, InodeKind, InodeTree};

/// prints the subtree under `root`, one node per line, two spaces of indent per level
///
/// directories show as `name (id N)`, files as `name (id N size Sb blocks b0 b1 ... )`
pub struct TreeDump<'a, A> {
    tree: &'a InodeTree<A>,
    root: InodeId,
}

impl<'a, A> TreeDump<'a, A> {
    pub fn new(tree: &'a InodeTree<A>, root: InodeId) -> Self {
        TreeDump { tree, root }
    }
}

impl<A> fmt::Display for TreeDump<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (depth, inode) in self.tree.walk(self.root) {
            write!(f, "{:indent$}", "", indent = depth * 2)?;
            let name = inode.name().to_string_lossy();
            match inode.kind() {
                InodeKind::Directory { .. } => writeln!(f, "{name} (id {})", inode.id())?,
                InodeKind::File { size, blocks, .. } => {
                    write!(f, "{name} (id {} size {size}b blocks ", inode.id())?;
                    for block in blocks {
                        write!(f, "{block} ")?;
                    }
                    writeln!(f, ")")?;
                }
            }
        }
        Ok(())
    }
}
