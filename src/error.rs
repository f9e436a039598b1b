use thiserror::Error;

use crate::image::consts::{NVM_TOTAL_SIZE, PAGE_MAGIC, PAGE_VERSION};
use crate::image::{FragmentStatus, Region};

#[derive(Error, Debug)]
pub enum Error {
    #[error("image size {0:#x} does not match the fixed layout size {NVM_TOTAL_SIZE:#x}")]
    InvalidImageSize(usize),

    #[error("buffer ends after {actual} bytes but {needed} more are required at offset {offset:#x}")]
    ShortBuffer {
        offset: usize,
        needed: usize,
        actual: usize,
    },

    #[error("bad page magic {found:#06x} at offset {offset:#x} (expected {PAGE_MAGIC:#06x})")]
    BadMagic { offset: usize, found: u16 },

    #[error("unsupported page version {found} at offset {offset:#x} (expected {PAGE_VERSION})")]
    UnsupportedVersion { offset: usize, found: u16 },

    #[error("erase counter Berger code mismatch in page at offset {offset:#x}: stored {stored}, computed {computed}")]
    BergerMismatch {
        offset: usize,
        stored: u32,
        computed: u32,
    },

    #[error("erase counter {value:#09x} in page at offset {offset:#x} is not the complement of {inverse:#09x}")]
    EraseCountComplementMismatch {
        offset: usize,
        value: u32,
        inverse: u32,
    },

    #[error("unknown page status {found:#010x} at offset {offset:#x}")]
    UnknownPageStatus { offset: usize, found: u32 },

    #[error("object CRC mismatch for key {key:#07x} at offset {offset:#x}: stored {stored:#06x}, computed {computed:#06x}")]
    ObjectCrcMismatch {
        offset: usize,
        key: u32,
        stored: u16,
        computed: u16,
    },

    #[error("unknown object type {found} at offset {offset:#x}")]
    UnknownObjectType { offset: usize, found: u8 },

    #[error("truncated object for key {key:#07x}: fragment chain is missing its last fragment")]
    TruncatedObject { key: u32 },

    #[error("orphaned {status} fragment for key {key:#07x} with no open fragment chain")]
    OrphanedFragment { key: u32, status: FragmentStatus },

    #[error("{region} region is full: no page left for key {key:#07x}")]
    InsufficientSpace { region: Region, key: u32 },

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("invalid object for key {key:#07x}: {reason}")]
    InvalidObject { key: u32, reason: String },
}
