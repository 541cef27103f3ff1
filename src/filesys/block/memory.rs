//! In-memory block device implementation

use crate::filesys::{BlockDevice, FsError};
use alloc::vec;
use alloc::vec::Vec;
use core::result::Result;

/// Block device that stores data in memory
pub struct MemoryBlockDevice {
    /// Blocks of data, each block_size bytes
    blocks: Vec<Vec<u8>>,

    /// Size of each block in bytes
    block_size: usize,
}

impl MemoryBlockDevice {
    /// Creates a new zero-filled memory block device with given size
    pub fn new(total_blocks: u64, block_size: usize) -> Self {
        let blocks = (0..total_blocks).map(|_| vec![0; block_size]).collect();
        Self { blocks, block_size }
    }

    /// Raw view of one block, for inspecting on-disk state
    pub fn block(&self, block_num: u64) -> Option<&[u8]> {
        self.blocks.get(block_num as usize).map(Vec::as_slice)
    }

    /// Mutable raw view of one block, for planting on-disk state
    pub fn block_mut(&mut self, block_num: u64) -> Option<&mut [u8]> {
        self.blocks.get_mut(block_num as usize).map(Vec::as_mut_slice)
    }

    /// Validates block number is within bounds
    fn validate_block(&self, block_num: u64) -> Result<(), FsError> {
        if block_num >= self.blocks.len() as u64 {
            return Err(FsError::IOError);
        }
        Ok(())
    }

    /// Validates buffer is correct block size
    fn validate_buffer(&self, buf: &[u8]) -> Result<(), FsError> {
        if buf.len() != self.block_size {
            return Err(FsError::IOError);
        }
        Ok(())
    }
}

impl BlockDevice for MemoryBlockDevice {
    /// Reads block into buffer
    fn read_block(&self, block_num: u64, buf: &mut [u8]) -> Result<(), FsError> {
        self.validate_block(block_num)?;
        self.validate_buffer(buf)?;
        buf.copy_from_slice(&self.blocks[block_num as usize]);
        Ok(())
    }

    /// Writes buffer to block
    fn write_block(&mut self, block_num: u64, buf: &[u8]) -> Result<(), FsError> {
        self.validate_block(block_num)?;
        self.validate_buffer(buf)?;
        self.blocks[block_num as usize].copy_from_slice(buf);
        Ok(())
    }

    /// Returns size of each block
    fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns total number of blocks
    fn total_blocks(&self) -> u64 {
        self.blocks.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_back_written_block() {
        let mut device = MemoryBlockDevice::new(4, 512);
        let data = [0xA5u8; 512];
        device.write_block(3, &data).unwrap();

        let mut buf = [0u8; 512];
        device.read_block(3, &mut buf).unwrap();
        assert_eq!(buf, data);
        assert_eq!(device.total_blocks(), 4);
    }

    #[test]
    fn test_out_of_range_block_is_io_error() {
        let mut device = MemoryBlockDevice::new(2, 512);
        let mut buf = [0u8; 512];
        assert_eq!(device.read_block(2, &mut buf), Err(FsError::IOError));
        assert_eq!(device.write_block(7, &buf), Err(FsError::IOError));
    }

    #[test]
    fn test_wrong_buffer_size_is_io_error() {
        let device = MemoryBlockDevice::new(2, 512);
        let mut buf = [0u8; 32];
        assert_eq!(device.read_block(0, &mut buf), Err(FsError::IOError));
    }
}
