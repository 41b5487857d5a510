// Container-file collaborators: disk sector images and simh tape images
pub mod disk;
pub mod tape;

pub use disk::DiskImage;
pub use tape::{TapeImage, TapeRead};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("image is attached read-only")]
    ReadOnly,
    #[error("corrupt container frame at offset {0}")]
    Corrupt(u64),
}

pub type Result<T> = std::result::Result<T, ImageError>;
