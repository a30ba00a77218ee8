use std::ffi::OsString;

use thiserror::Error;

use super::BlockIndex;

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Error, Debug)]
pub enum FsError {
    /// the operation needs a directory parent and got none, an unknown one or a file
    #[error("parent is missing or is not a directory")]
    InvalidParent,
    /// a sibling of the same kind already holds this name
    #[error("an entry of the same kind named {name:?} already exists")]
    DuplicateName { name: OsString },
    /// the allocator ran out of blocks; `reserved` were handed out before that and are not returned
    #[error("disk is full ({} blocks reserved before exhaustion were abandoned)", .reserved.len())]
    DiskFull { reserved: Vec<BlockIndex> },
    #[error("no such entry")]
    NotFound,
    #[error("invalid name {0:?}: names must be non-empty and must not contain NUL")]
    InvalidName(OsString),
    /// the next inode id would not fit in the superblock
    #[error("no inode id left")]
    IdsExhausted,
    #[error("file size {0} does not fit in the superblock")]
    FileTooLarge(u64),
    /// the superblock stream is truncated or inconsistent
    #[error("malformed superblock: {0}")]
    Format(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        FsError::Format(msg.into())
    }
}
