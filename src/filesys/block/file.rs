//! Block device backed by a disk image file on the host

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::filesys::{BlockDevice, FsError};

/// Disk image file addressed in fixed-size blocks
pub struct FileBlockDevice {
    file: File,
    block_size: usize,
    total_blocks: u64,
}

impl FileBlockDevice {
    /// Opens (or creates) the image at `path`, growing it with zeros to
    /// `total_blocks` blocks if it is shorter
    pub fn open<P: AsRef<Path>>(
        path: P,
        total_blocks: u64,
        block_size: usize,
    ) -> Result<Self, FsError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|_| FsError::IOError)?;

        let wanted = total_blocks * block_size as u64;
        let current = file.metadata().map_err(|_| FsError::IOError)?.len();
        if current < wanted {
            file.set_len(wanted).map_err(|_| FsError::IOError)?;
        }

        Ok(Self {
            file,
            block_size,
            total_blocks,
        })
    }

    fn seek_to(&self, block_num: u64, len: usize) -> Result<(), FsError> {
        if block_num >= self.total_blocks || len != self.block_size {
            return Err(FsError::IOError);
        }
        (&self.file)
            .seek(SeekFrom::Start(block_num * self.block_size as u64))
            .map_err(|_| FsError::IOError)?;
        Ok(())
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_block(&self, block_num: u64, buf: &mut [u8]) -> Result<(), FsError> {
        self.seek_to(block_num, buf.len())?;
        (&self.file).read_exact(buf).map_err(|_| FsError::IOError)
    }

    fn write_block(&mut self, block_num: u64, buf: &[u8]) -> Result<(), FsError> {
        self.seek_to(block_num, buf.len())?;
        self.file.write_all(buf).map_err(|_| FsError::IOError)
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn total_blocks(&self) -> u64 {
        self.total_blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_survives_reopen() {
        let path = std::env::temp_dir().join(format!("fat16_lfn_{}.img", std::process::id()));
        let data = [0x5Au8; 512];
        {
            let mut device = FileBlockDevice::open(&path, 8, 512).unwrap();
            assert_eq!(std::fs::metadata(&path).unwrap().len(), 8 * 512);
            device.write_block(5, &data).unwrap();
            assert_eq!(device.write_block(8, &data), Err(FsError::IOError));
        }

        let device = FileBlockDevice::open(&path, 8, 512).unwrap();
        let mut buf = [0u8; 512];
        device.read_block(5, &mut buf).unwrap();
        assert_eq!(buf, data);
        device.read_block(4, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 512]);

        std::fs::remove_file(&path).unwrap();
    }
}
