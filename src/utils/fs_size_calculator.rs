//! This module contains functions to calculate the size of file contents on the device

/// calculate how many blocks a file of `size_in_bytes` occupies
/// # Arguments
/// - `size_in_bytes`: the size of the file
/// - `block_size`: the size of a block, must not be zero
/// # Return
/// `ceil(size_in_bytes / block_size)`
/// # Example
/// ```
/// use inodefs::utils::fs_size_calculator::blocks_for_size;
/// assert_eq!(blocks_for_size(0, 4096), 0);
/// assert_eq!(blocks_for_size(4096, 4096), 1);
/// assert_eq!(blocks_for_size(10000, 4096), 3);
/// ```
pub const fn blocks_for_size(size_in_bytes: u32, block_size: u32) -> usize {
    size_in_bytes.div_ceil(block_size) as usize
}

/// calculate how many bytes a device of `block_count` blocks holds
/// # Example
/// ```
/// use inodefs::utils::fs_size_calculator::device_size;
/// assert_eq!(device_size(1024, 4096), 4 << 20);
/// ```
pub const fn device_size(block_count: usize, block_size: u32) -> u64 {
    block_count as u64 * block_size as u64
}
