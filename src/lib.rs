pub mod cli_interface;
mod fs;
pub mod mkfs;
pub mod utils;
pub mod volume;
pub use fs::*;
