// simh ".tap" tape container
//
// A tape is a sequence of frames. A data record is framed by identical
// leading and trailing 32-bit little-endian byte counts, with the payload
// padded to an even length. A zero count is a tape mark. The end of the file
// is the end (or, at offset 0, the beginning) of the tape. Reverse traversal
// walks the trailing counts; record payloads are always returned in forward
// byte order; reverse-read semantics belong to the bit fiddler, not here.
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use log::debug;

use crate::image::{ImageError, Result};

// simh end-of-medium marker; treated like running off the end of the file.
const EOM_MARKER: u32 = 0xFFFF_FFFF;

/// Outcome of reading or spacing one frame. `End` is end-of-tape when moving
/// forward and beginning-of-tape when moving in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapeRead {
    Data(usize),
    TapeMark,
    End,
}

pub struct TapeImage {
    file: File,
    path: PathBuf,
    pos: u64,
    read_only: bool,
}

impl TapeImage {
    /// Open a tape image, creating an empty one if a writable attach names a
    /// file that does not exist yet.
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .open(path)?;
        debug!("attached tape image {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
            pos: 0,
            read_only,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    pub fn at_bot(&self) -> bool {
        self.pos == 0
    }

    pub fn at_eot(&self) -> bool {
        match self.file.metadata() {
            Ok(m) => self.pos >= m.len(),
            Err(_) => true,
        }
    }

    /// Read the record under the head, advancing past it. The payload lands
    /// in `buf` up to its capacity; the returned length is what was copied.
    pub fn read_record_forward(&mut self, buf: &mut [u8]) -> Result<TapeRead> {
        self.frame_forward(Some(buf))
    }

    /// Read the record behind the head without moving the data backwards:
    /// the head ends up in front of the record and the payload is returned
    /// in forward byte order.
    pub fn read_record_reverse(&mut self, buf: &mut [u8]) -> Result<TapeRead> {
        self.frame_reverse(Some(buf))
    }

    pub fn space_forward(&mut self) -> Result<TapeRead> {
        self.frame_forward(None)
    }

    pub fn space_reverse(&mut self) -> Result<TapeRead> {
        self.frame_reverse(None)
    }

    /// Append a data record at the head. Anything that used to follow this
    /// point is no longer part of the tape.
    pub fn write_record(&mut self, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(ImageError::ReadOnly);
        }
        let count = data.len() as u32;
        let padded = (data.len() + 1) & !1;
        let mut frame = Vec::with_capacity(8 + padded);
        frame.extend_from_slice(&count.to_le_bytes());
        frame.extend_from_slice(data);
        if padded != data.len() {
            frame.push(0);
        }
        frame.extend_from_slice(&count.to_le_bytes());
        self.file.write_all_at(&frame, self.pos)?;
        self.pos += frame.len() as u64;
        self.file.set_len(self.pos)?;
        Ok(())
    }

    /// Write a tape mark at the head.
    pub fn write_mark(&mut self) -> Result<()> {
        if self.read_only {
            return Err(ImageError::ReadOnly);
        }
        self.file.write_all_at(&0u32.to_le_bytes(), self.pos)?;
        self.pos += 4;
        self.file.set_len(self.pos)?;
        Ok(())
    }

    /// Erase everything from the head to the end of the tape.
    pub fn truncate(&mut self) -> Result<()> {
        if self.read_only {
            return Err(ImageError::ReadOnly);
        }
        self.file.set_len(self.pos)?;
        Ok(())
    }

    fn frame_forward(&mut self, copy: Option<&mut [u8]>) -> Result<TapeRead> {
        let len = self.file.metadata()?.len();
        if self.pos + 4 > len {
            return Ok(TapeRead::End);
        }
        let lead = self.read_u32(self.pos)?;
        if lead == 0 {
            self.pos += 4;
            return Ok(TapeRead::TapeMark);
        }
        if lead == EOM_MARKER {
            return Ok(TapeRead::End);
        }
        if lead & 0xFF00_0000 != 0 {
            return Err(ImageError::Corrupt(self.pos));
        }
        let count = lead as usize;
        let padded = (count + 1) & !1;
        let frame = 8 + padded as u64;
        if self.pos + frame > len {
            return Err(ImageError::Corrupt(self.pos));
        }
        let trail = self.read_u32(self.pos + 4 + padded as u64)?;
        if trail != lead {
            return Err(ImageError::Corrupt(self.pos));
        }
        let copied = self.copy_payload(self.pos + 4, count, copy)?;
        self.pos += frame;
        Ok(TapeRead::Data(copied))
    }

    fn frame_reverse(&mut self, copy: Option<&mut [u8]>) -> Result<TapeRead> {
        if self.pos == 0 {
            return Ok(TapeRead::End);
        }
        if self.pos < 4 {
            return Err(ImageError::Corrupt(self.pos));
        }
        let trail = self.read_u32(self.pos - 4)?;
        if trail == 0 {
            self.pos -= 4;
            return Ok(TapeRead::TapeMark);
        }
        if trail & 0xFF00_0000 != 0 {
            return Err(ImageError::Corrupt(self.pos));
        }
        let count = trail as usize;
        let padded = (count + 1) & !1;
        let frame = 8 + padded as u64;
        if self.pos < frame {
            return Err(ImageError::Corrupt(self.pos));
        }
        let lead = self.read_u32(self.pos - frame)?;
        if lead != trail {
            return Err(ImageError::Corrupt(self.pos));
        }
        let copied = self.copy_payload(self.pos - frame + 4, count, copy)?;
        self.pos -= frame;
        Ok(TapeRead::Data(copied))
    }

    fn copy_payload(&self, offset: u64, count: usize, copy: Option<&mut [u8]>) -> Result<usize> {
        match copy {
            Some(buf) => {
                let n = count.min(buf.len());
                self.file.read_exact_at(&mut buf[..n], offset)?;
                Ok(n)
            }
            None => Ok(count),
        }
    }

    fn read_u32(&self, offset: u64) -> Result<u32> {
        let mut word = [0u8; 4];
        self.file.read_exact_at(&mut word, offset)?;
        Ok(u32::from_le_bytes(word))
    }
}
