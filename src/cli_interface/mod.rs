//! command line interface of the `inodefs` binary
mod cli_struct;
pub use cli_struct::*;
