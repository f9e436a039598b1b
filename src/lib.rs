//! Silicon Labs NVM3 compatible Z-Wave controller NVM image parser and
//! generator.
//!
//! The on-media image is a fixed 0xF000-byte buffer split into an
//! application region (0x3000 bytes) and a protocol region (0xC000 bytes).
//! Each region is a wear-leveled ring of pages; each page carries a header
//! with a Berger-coded erase counter followed by a stream of self-describing
//! objects (data blobs, counters and tombstones) addressed by 20-bit keys.
//! Later writes of a key supersede earlier ones, and large objects may be
//! fragmented across pages.
//!
//! [`parse_nvm`] decodes a buffer into pages in ring order and the compacted
//! live object map of each region. [`encode_nvm`] does the inverse: it lays
//! the live maps out onto fresh pages and returns the image bytes.
//!
//! ```
//! use nvm3_image_tool::{encode_nvm, parse_nvm, EncodeOptions, NvmObject, ObjectMap};
//!
//! let application: ObjectMap = [
//!     NvmObject::data(0x00123, vec![0xDE, 0xAD, 0xBE, 0xEF]),
//!     NvmObject::counter(0x00200, 42),
//! ]
//! .into_iter()
//! .collect();
//!
//! let buffer = encode_nvm(&application, &ObjectMap::new(), &EncodeOptions::default())?;
//! let image = parse_nvm(&buffer)?;
//! assert_eq!(image.application_objects, application);
//! # Ok::<(), nvm3_image_tool::Error>(())
//! ```

pub mod error;
pub mod image;

pub use error::Error;
pub use image::{
    EncodeOptions, FragmentStatus, NvmImage, NvmObject, NvmPage, ObjectErrorPolicy, ObjectMap,
    ObjectType, PageStatus, PageWriteSize, ParseOptions, Region,
};

/// Parse a full NVM image buffer with default (fail-fast) options.
///
/// The buffer length must equal the fixed layout size of 0xF000 bytes.
/// Returned page lists are in ring order; object maps are in compacted
/// live order.
pub fn parse_nvm(buffer: &[u8]) -> Result<NvmImage, Error> {
    image::parser::parse_image(buffer, &ParseOptions::default())
}

/// Parse a full NVM image buffer, controlling how object-level corruption
/// inside a page is handled.
pub fn parse_nvm_with(buffer: &[u8], options: &ParseOptions) -> Result<NvmImage, Error> {
    image::parser::parse_image(buffer, options)
}

/// Encode live object maps into a fresh image buffer: application region
/// bytes followed by protocol region bytes, 0xF000 bytes in total.
///
/// All pages are written with erase count 0 and status OK. Objects are
/// placed in map iteration order; tombstones are skipped.
pub fn encode_nvm(
    application: &ObjectMap,
    protocol: &ObjectMap,
    options: &EncodeOptions,
) -> Result<Vec<u8>, Error> {
    image::generator::encode_image(application, protocol, options)
}
