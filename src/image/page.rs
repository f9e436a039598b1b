use std::cmp;

use log::debug;

use crate::error::Error;
use crate::image::check::berger_code;
use crate::image::consts::*;
use crate::image::{object, NvmPage, PageStatus, PageWriteSize, ParseOptions};

/// Header attributes of a page about to be written. Berger codes and the
/// erase counter complement are computed at serialization time.
pub(crate) struct PageHeader {
    pub erase_count: u32,
    pub status: PageStatus,
    pub encrypted: bool,
    pub device_family: u16,
    pub write_size: PageWriteSize,
    pub memory_mapped: bool,
    pub page_size: usize,
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap())
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

/// Decode the page starting at `offset`: validate the header, slice the
/// body and parse its object stream. Returns the page and the number of
/// bytes it occupies (the clamped page size).
pub(crate) fn read_page(
    buffer: &[u8],
    offset: usize,
    options: &ParseOptions,
) -> Result<(NvmPage, usize), Error> {
    if offset + PAGE_HEADER_SIZE > buffer.len() {
        return Err(Error::ShortBuffer {
            offset,
            needed: offset + PAGE_HEADER_SIZE - buffer.len(),
            actual: buffer.len(),
        });
    }
    let header = &buffer[offset..offset + PAGE_HEADER_SIZE];

    let magic = read_u16(header, 2);
    if magic != PAGE_MAGIC {
        return Err(Error::BadMagic {
            offset,
            found: magic,
        });
    }
    let version = read_u16(header, 0);
    if version != PAGE_VERSION {
        return Err(Error::UnsupportedVersion {
            offset,
            found: version,
        });
    }

    let erase_count = decode_erase_word(read_u32(header, 4), offset)?;
    let inverse = decode_erase_word(read_u32(header, 8), offset)?;
    if erase_count != !inverse & ERASE_COUNT_MASK {
        return Err(Error::EraseCountComplementMismatch {
            offset,
            value: erase_count,
            inverse,
        });
    }

    let status_word = read_u32(header, 12);
    let status = PageStatus::from_repr(status_word).ok_or(Error::UnknownPageStatus {
        offset,
        found: status_word,
    })?;

    let device_info = read_u16(header, 16);
    let device_family = device_info & DEVICE_FAMILY_MASK;
    let write_size = if device_info & WRITE_SIZE_BIT != 0 {
        PageWriteSize::Write32
    } else {
        PageWriteSize::Write16
    };
    let memory_mapped = device_info & MEMORY_MAPPED_BIT != 0;
    let size_code = (device_info >> PAGE_SIZE_SHIFT) & PAGE_SIZE_MASK;
    let declared_page_size = MIN_PAGE_SIZE << size_code;

    let format_info = read_u16(header, 18);
    let encrypted = format_info & 0x1 == 0;

    let actual_page_size = cmp::min(declared_page_size, FLASH_MAX_PAGE_SIZE);
    if declared_page_size > FLASH_MAX_PAGE_SIZE {
        debug!(
            "page at {offset:#x} declares {declared_page_size} bytes, \
             clamping to {FLASH_MAX_PAGE_SIZE} for layout"
        );
    }
    if offset + actual_page_size > buffer.len() {
        return Err(Error::ShortBuffer {
            offset,
            needed: offset + actual_page_size - buffer.len(),
            actual: buffer.len(),
        });
    }

    let body_offset = offset + PAGE_HEADER_SIZE;
    let body = &buffer[body_offset..offset + actual_page_size];
    let objects = object::read_objects(body, body_offset, options.object_error_policy)?;

    let page = NvmPage {
        offset,
        erase_count,
        status,
        encrypted,
        declared_page_size,
        device_family,
        write_size,
        memory_mapped,
        objects,
    };
    Ok((page, actual_page_size))
}

/// Serialize a 20-byte page header with freshly computed Berger codes.
pub(crate) fn write_page_header(header: &PageHeader) -> [u8; PAGE_HEADER_SIZE] {
    let mut out = [ERASED_BYTE; PAGE_HEADER_SIZE];
    out[0..2].copy_from_slice(&PAGE_VERSION.to_le_bytes());
    out[2..4].copy_from_slice(&PAGE_MAGIC.to_le_bytes());

    let value = header.erase_count & ERASE_COUNT_MASK;
    let inverse = !value & ERASE_COUNT_MASK;
    out[4..8].copy_from_slice(&encode_erase_word(value).to_le_bytes());
    out[8..12].copy_from_slice(&encode_erase_word(inverse).to_le_bytes());

    out[12..16].copy_from_slice(&(header.status as u32).to_le_bytes());

    let mut device_info = header.device_family & DEVICE_FAMILY_MASK;
    if header.write_size == PageWriteSize::Write32 {
        device_info |= WRITE_SIZE_BIT;
    }
    if header.memory_mapped {
        device_info |= MEMORY_MAPPED_BIT;
    }
    device_info |= page_size_code(header.page_size) << PAGE_SIZE_SHIFT;
    out[16..18].copy_from_slice(&device_info.to_le_bytes());

    let format_info: u16 = if header.encrypted { 0xFFFE } else { 0xFFFF };
    out[18..20].copy_from_slice(&format_info.to_le_bytes());

    out
}

/// Validate one erase-counter word and return the 27-bit value.
fn decode_erase_word(word: u32, page_offset: usize) -> Result<u32, Error> {
    let value = word & ERASE_COUNT_MASK;
    let stored = word >> ERASE_COUNT_BITS;
    let computed = berger_code(value, ERASE_COUNT_BITS);
    if stored != computed {
        return Err(Error::BergerMismatch {
            offset: page_offset,
            stored,
            computed,
        });
    }
    Ok(value)
}

fn encode_erase_word(value: u32) -> u32 {
    value | (berger_code(value, ERASE_COUNT_BITS) << ERASE_COUNT_BITS)
}

/// Map a power-of-two page size onto the 3-bit header field.
fn page_size_code(page_size: usize) -> u16 {
    (page_size.trailing_zeros() - PAGE_SIZE_BASE_LOG2) as u16
}
