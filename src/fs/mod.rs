//! the inode namespace: tree, allocator contract and superblock codec
pub mod allocator;
pub mod dump;
pub mod error;
pub mod inode;
pub mod superblock;
mod tree;
pub use allocator::*;
pub use dump::TreeDump;
pub use error::*;
pub use inode::*;
pub use tree::*;

/// size of one block on the simulated device
pub const BLOCK_SIZE: u32 = 4096;
/// number of blocks on the simulated device when nothing else is configured
pub const DEFAULT_BLOCK_COUNT: usize = 1024;
/// name given to the root directory by `mkfs`
pub const ROOT_NAME: &str = "/";
/// longest name (terminator included) accepted while decoding a superblock
pub const MAX_NAME_LEN: usize = 4096;
/// deepest directory nesting accepted while decoding a superblock
pub const MAX_DEPTH: usize = 1024;
/// largest inode id representable in the superblock's int32 id field
pub const MAX_INODE_ID: u32 = i32::MAX as u32;
/// largest file size representable in the superblock's int32 size field
pub const MAX_FILE_SIZE: u32 = i32::MAX as u32;
