use byte_unit::Byte;
use clap::Parser;

use crate::fs::{BLOCK_SIZE, DEFAULT_BLOCK_COUNT};

#[derive(Parser, Debug, PartialEq)]
#[command(author, version, about, long_about)]
pub enum InodeFsCli {
    /// write a new superblock holding only the root directory
    Mkfs(MkfsArgs),
    /// create a directory
    Mkdir(MkdirArgs),
    /// create a file and reserve blocks for its contents
    Touch(TouchArgs),
    /// print the tree stored in a superblock
    Dump(DumpArgs),
}

///make a new superblock subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "make a new superblock")]
pub struct MkfsArgs {
    /// the path of the superblock file
    #[clap(short = 'p', long)]
    pub superblock_path: String,
}

/// the superblock and the simulated device it describes
#[derive(clap::Args, Debug, PartialEq)]
pub struct DeviceArgs {
    /// the path of the superblock file
    #[clap(short = 'p', long)]
    pub superblock_path: String,
    /// the block size of the device
    #[clap(short, long, default_value_t = BLOCK_SIZE, value_parser = clap::value_parser!(u32).range(1..))]
    pub block_size: u32,
    /// the number of blocks on the device
    #[clap(short = 'c', long, default_value_t = DEFAULT_BLOCK_COUNT)]
    pub block_count: usize,
}

/// create a directory subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "create a directory")]
pub struct MkdirArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// the path of the new directory, like /docs
    pub path: String,
}

/// create a file subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "create a file")]
pub struct TouchArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// the path of the new file, like /docs/readme.txt
    pub path: String,
    /// the size of the file, like 10000, 10KB or 4KiB
    #[clap(short, long, value_parser = parse_size, default_value = "0")]
    pub size: u32,
    /// mark the file readonly
    #[clap(short, long)]
    pub readonly: bool,
}

/// print a superblock subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "print the tree stored in a superblock")]
pub struct DumpArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
}

fn parse_size(size: &str) -> Result<u32, String> {
    let bytes = Byte::from_str(size)
        .map_err(|e| e.to_string())?
        .get_bytes();
    u32::try_from(bytes).map_err(|_| format!("{size} is too large for a file"))
}
