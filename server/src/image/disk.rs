// Random-access sector image for disk drives
//
// 16-bit packing stores a sector as 256 little-endian 16-bit words. 18-bit
// packing stores it as 128 simh quadwords: one 36-bit datum right-aligned in
// 8 little-endian bytes. Either way a sector crosses the bus as 256 entries
// in a 32-bit buffer (16-bit words with the high half zero, or 18-bit
// half-word pairs, left half first).
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use log::debug;

use crate::drive_type::Packing;
use crate::drives::fiddler::WORD36_MASK;
use crate::image::{ImageError, Result};

pub const SECTOR_WORDS: usize = 256;

pub struct DiskImage {
    file: File,
    path: PathBuf,
    read_only: bool,
}

impl DiskImage {
    /// Open an existing image file.
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            read_only,
        })
    }

    /// Create a fresh image preallocated to `bytes`.
    pub fn create(path: &Path, bytes: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(bytes)?;
        debug!("created disk image {} ({} bytes)", path.display(), bytes);
        Ok(Self {
            file,
            path: path.to_path_buf(),
            read_only: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Read one sector into 256 bus words. Reads past the end of a short
    /// image return zeros for the missing tail.
    pub fn read_sector(&self, lba: u32, packing: Packing, out: &mut [u32; SECTOR_WORDS]) -> Result<()> {
        let bytes = packing.sector_bytes();
        let mut raw = [0u8; 1024];
        let raw = &mut raw[..bytes];
        self.read_at_sparse(lba as u64 * bytes as u64, raw)?;

        match packing {
            Packing::Bits16 => {
                for (i, pair) in raw.chunks_exact(2).enumerate() {
                    out[i] = u16::from_le_bytes([pair[0], pair[1]]) as u32;
                }
            }
            Packing::Bits18 => {
                for (i, quad) in raw.chunks_exact(8).enumerate() {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(quad);
                    let w = u64::from_le_bytes(bytes) & WORD36_MASK;
                    out[2 * i] = (w >> 18) as u32;
                    out[2 * i + 1] = (w & 0x3FFFF) as u32;
                }
            }
        }
        Ok(())
    }

    /// Write one sector from 256 bus words, extending the image if needed.
    pub fn write_sector(&self, lba: u32, packing: Packing, data: &[u32; SECTOR_WORDS]) -> Result<()> {
        if self.read_only {
            return Err(ImageError::ReadOnly);
        }
        let bytes = packing.sector_bytes();
        let mut raw = [0u8; 1024];
        let raw = &mut raw[..bytes];

        match packing {
            Packing::Bits16 => {
                for (i, pair) in raw.chunks_exact_mut(2).enumerate() {
                    pair.copy_from_slice(&(data[i] as u16).to_le_bytes());
                }
            }
            Packing::Bits18 => {
                for (i, quad) in raw.chunks_exact_mut(8).enumerate() {
                    let w = (((data[2 * i] as u64) & 0x3FFFF) << 18)
                        | ((data[2 * i + 1] as u64) & 0x3FFFF);
                    quad.copy_from_slice(&w.to_le_bytes());
                }
            }
        }
        self.file.write_all_at(raw, lba as u64 * bytes as u64)?;
        Ok(())
    }

    // read_exact_at, but end-of-file zero-fills instead of failing.
    fn read_at_sparse(&self, mut offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read_at(&mut buf[filled..], offset)? {
                0 => {
                    buf[filled..].fill(0);
                    break;
                }
                n => {
                    filled += n;
                    offset += n as u64;
                }
            }
        }
        Ok(())
    }
}
