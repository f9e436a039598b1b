use log::warn;

use crate::error::Error;
use crate::image::check::crc16_ccitt;
use crate::image::consts::*;
use crate::image::{FragmentStatus, NvmObject, ObjectErrorPolicy, ObjectType};

/// Round an object advance up to the next word boundary.
pub(crate) fn align_word(n: usize) -> usize {
    (n + WORD_SIZE - 1) & !(WORD_SIZE - 1)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

/// Borrow `len` bytes of `body` at `offset`, or fail with the absolute
/// offset of the missing range.
fn read_exact<'a>(
    body: &'a [u8],
    base: usize,
    offset: usize,
    len: usize,
) -> Result<&'a [u8], Error> {
    if offset + len > body.len() {
        return Err(Error::ShortBuffer {
            offset: base + offset,
            needed: offset + len - body.len(),
            actual: body.len(),
        });
    }
    Ok(&body[offset..offset + len])
}

/// Decode one object starting at `offset` within a page body.
///
/// `base` is the absolute image offset of the body, used for error
/// reporting only. Returns the object and the number of bytes consumed,
/// including the alignment padding after the payload.
pub(crate) fn read_object(
    body: &[u8],
    base: usize,
    offset: usize,
) -> Result<(NvmObject, usize), Error> {
    let header = read_exact(body, base, offset, OBJ_HEADER_SIZE_SMALL)?;
    let word = read_u32(header, 0);

    let raw_type = (word & OBJ_TYPE_MASK) as u8;
    let object_type = ObjectType::from_repr(raw_type).ok_or(Error::UnknownObjectType {
        offset: base + offset,
        found: raw_type,
    })?;
    let key = (word >> OBJ_KEY_SHIFT) & OBJ_KEY_MASK;
    let small_len = ((word >> OBJ_LEN_SHIFT) & OBJ_LEN_MASK) as usize;

    let (fragment, payload, raw_size) = match object_type {
        ObjectType::Deleted => (FragmentStatus::None, None, OBJ_HEADER_SIZE_SMALL),
        ObjectType::DataSmall => {
            let payload = read_exact(body, base, offset + OBJ_HEADER_SIZE_SMALL, small_len)?;
            (
                FragmentStatus::None,
                Some(payload.to_vec()),
                OBJ_HEADER_SIZE_SMALL + small_len,
            )
        }
        ObjectType::CounterSmall => {
            let payload = read_exact(body, base, offset + OBJ_HEADER_SIZE_SMALL, COUNTER_SIZE)?;
            (
                FragmentStatus::None,
                Some(payload.to_vec()),
                OBJ_HEADER_SIZE_SMALL + COUNTER_SIZE,
            )
        }
        ObjectType::DataLarge | ObjectType::CounterLarge | ObjectType::Link => {
            let fragment =
                FragmentStatus::from_repr(((word >> OBJ_FRAG_SHIFT) & OBJ_FRAG_MASK) as u8)
                    .unwrap_or(FragmentStatus::None);
            let ext = read_exact(body, base, offset + OBJ_HEADER_SIZE_SMALL, WORD_SIZE)?;
            let ext_word = read_u32(ext, 0);
            let frag_len = (ext_word & 0xFFFF) as usize;
            let stored = (ext_word >> 16) as u16;

            let payload = read_exact(body, base, offset + OBJ_HEADER_SIZE_LARGE, frag_len)?;
            let computed = header_crc(word, payload);
            if stored != computed {
                return Err(Error::ObjectCrcMismatch {
                    offset: base + offset,
                    key,
                    stored,
                    computed,
                });
            }
            (
                fragment,
                Some(payload.to_vec()),
                OBJ_HEADER_SIZE_LARGE + frag_len,
            )
        }
    };

    let object = NvmObject {
        key,
        object_type,
        fragment,
        payload,
    };
    Ok((object, align_word(raw_size)))
}

/// Decode the object stream of one page body, stopping cleanly at erased
/// space (an all-0xFF word) or the end of the body.
pub(crate) fn read_objects(
    body: &[u8],
    base: usize,
    policy: ObjectErrorPolicy,
) -> Result<Vec<NvmObject>, Error> {
    let mut objects = Vec::new();
    let mut offset = 0;

    while offset + WORD_SIZE <= body.len() {
        if read_u32(body, offset) == ERASED_WORD {
            break;
        }
        match read_object(body, base, offset) {
            Ok((object, consumed)) => {
                objects.push(object);
                offset += consumed;
            }
            Err(e) => match policy {
                ObjectErrorPolicy::Fail => return Err(e),
                ObjectErrorPolicy::SkipRest => {
                    warn!("{e}; skipping the rest of the page body at offset {base:#x}");
                    break;
                }
            },
        }
    }

    Ok(objects)
}

/// Serialize one object: header word, extended length word for large types,
/// payload, and erased padding up to the next word boundary.
pub(crate) fn write_object(object: &NvmObject) -> Result<Vec<u8>, Error> {
    validate_object(object)?;
    let payload = object.payload.as_deref().unwrap_or(&[]);

    let mut word = (object.object_type as u32) & OBJ_TYPE_MASK;
    word |= ((object.fragment as u32) & OBJ_FRAG_MASK) << OBJ_FRAG_SHIFT;
    word |= (object.key & OBJ_KEY_MASK) << OBJ_KEY_SHIFT;
    if object.object_type == ObjectType::DataSmall {
        word |= ((payload.len() as u32) & OBJ_LEN_MASK) << OBJ_LEN_SHIFT;
    }

    let header_size = if object.object_type.has_extended_header() {
        OBJ_HEADER_SIZE_LARGE
    } else {
        OBJ_HEADER_SIZE_SMALL
    };
    let mut bytes = Vec::with_capacity(align_word(header_size + payload.len()));
    bytes.extend_from_slice(&word.to_le_bytes());
    if object.object_type.has_extended_header() {
        let crc = header_crc(word, payload);
        let ext_word = (payload.len() as u32) | ((crc as u32) << 16);
        bytes.extend_from_slice(&ext_word.to_le_bytes());
    }
    bytes.extend_from_slice(payload);
    bytes.resize(align_word(bytes.len()), ERASED_BYTE);

    Ok(bytes)
}

/// CRC-16 over the header word and the fragment payload.
fn header_crc(word: u32, payload: &[u8]) -> u16 {
    let mut protected = Vec::with_capacity(OBJ_HEADER_SIZE_SMALL + payload.len());
    protected.extend_from_slice(&word.to_le_bytes());
    protected.extend_from_slice(payload);
    crc16_ccitt(&protected)
}

fn validate_object(object: &NvmObject) -> Result<(), Error> {
    let invalid = |reason: String| Error::InvalidObject {
        key: object.key,
        reason,
    };

    if object.key > MAX_OBJECT_KEY {
        return Err(invalid(format!(
            "key exceeds the 20-bit field ({:#x} > {MAX_OBJECT_KEY:#x})",
            object.key
        )));
    }
    if !object.object_type.has_extended_header() && object.fragment != FragmentStatus::None {
        return Err(invalid(format!(
            "{} objects never fragment",
            object.object_type
        )));
    }

    match object.object_type {
        ObjectType::Deleted => {
            if object.payload.is_some() {
                return Err(invalid("tombstones carry no payload".to_string()));
            }
        }
        ObjectType::DataSmall => {
            if object.payload.is_none() {
                return Err(invalid("data objects require a payload".to_string()));
            }
            if object.payload_len() > MAX_SMALL_OBJECT_SIZE {
                return Err(invalid(format!(
                    "payload of {} bytes exceeds the small object maximum of {MAX_SMALL_OBJECT_SIZE}",
                    object.payload_len()
                )));
            }
        }
        ObjectType::CounterSmall => {
            if object.payload_len() != COUNTER_SIZE {
                return Err(invalid(format!(
                    "counters hold exactly {COUNTER_SIZE} bytes, got {}",
                    object.payload_len()
                )));
            }
        }
        ObjectType::CounterLarge => {
            if object.fragment == FragmentStatus::None && object.payload_len() != COUNTER_SIZE {
                return Err(invalid(format!(
                    "counters hold exactly {COUNTER_SIZE} bytes, got {}",
                    object.payload_len()
                )));
            }
            if object.payload.is_none() {
                return Err(invalid("counter objects require a payload".to_string()));
            }
        }
        ObjectType::DataLarge | ObjectType::Link => {
            if object.payload.is_none() {
                return Err(invalid("data objects require a payload".to_string()));
            }
            if object.payload_len() > u16::MAX as usize {
                return Err(invalid(format!(
                    "payload of {} bytes exceeds the extended length field; fragment it first",
                    object.payload_len()
                )));
            }
        }
    }

    Ok(())
}

/// Split a large object into fragments: the first fits `first_fit` bytes
/// including its header, every following fragment fits `subsequent_fit`
/// bytes (a full page body). Returns the object unsplit when it fits
/// `first_fit` whole.
///
/// The first fragment keeps the object's type; continuations are written as
/// [`ObjectType::Link`] objects. Callers must ensure `first_fit` can hold
/// at least [`MIN_FRAGMENT_SIZE`] before asking for a split.
pub(crate) fn fragment_large_object(
    object: &NvmObject,
    first_fit: usize,
    subsequent_fit: usize,
) -> Vec<NvmObject> {
    let payload = object.payload.as_deref().unwrap_or(&[]);
    if OBJ_HEADER_SIZE_LARGE + payload.len() <= first_fit {
        return vec![object.clone()];
    }
    debug_assert!(first_fit >= MIN_FRAGMENT_SIZE);
    debug_assert!(subsequent_fit >= MIN_FRAGMENT_SIZE);

    let first_take = first_fit - OBJ_HEADER_SIZE_LARGE;
    let mut fragments = vec![NvmObject {
        key: object.key,
        object_type: object.object_type,
        fragment: FragmentStatus::First,
        payload: Some(payload[..first_take].to_vec()),
    }];

    let chunk = subsequent_fit - OBJ_HEADER_SIZE_LARGE;
    let mut rest = &payload[first_take..];
    while rest.len() > chunk {
        fragments.push(NvmObject {
            key: object.key,
            object_type: ObjectType::Link,
            fragment: FragmentStatus::Next,
            payload: Some(rest[..chunk].to_vec()),
        });
        rest = &rest[chunk..];
    }
    fragments.push(NvmObject {
        key: object.key,
        object_type: ObjectType::Link,
        fragment: FragmentStatus::Last,
        payload: Some(rest.to_vec()),
    });

    fragments
}
