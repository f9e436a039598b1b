use log::{debug, trace};

use crate::error::Error;
use crate::image::consts::*;
use crate::image::object::{fragment_large_object, write_object};
use crate::image::page::{write_page_header, PageHeader};
use crate::image::{
    EncodeOptions, FragmentStatus, NvmObject, ObjectMap, ObjectType, PageStatus, Region,
};

/// Encode both regions into a fresh image buffer:
/// application pages first, protocol pages after.
pub(crate) fn encode_image(
    application: &ObjectMap,
    protocol: &ObjectMap,
    options: &EncodeOptions,
) -> Result<Vec<u8>, Error> {
    options.validate()?;

    let mut buffer = Vec::with_capacity(NVM_TOTAL_SIZE);
    buffer.extend(encode_region(application, Region::Application, options)?);
    buffer.extend(encode_region(protocol, Region::Protocol, options)?);
    Ok(buffer)
}

fn encode_region(
    objects: &ObjectMap,
    region: Region,
    options: &EncodeOptions,
) -> Result<Vec<u8>, Error> {
    let mut writer = RegionWriter::new(region, options);
    for object in objects.iter() {
        writer.write(object)?;
    }
    debug!(
        "{region} region: {} map entries placed on {} of {} pages",
        objects.len(),
        writer.current_page + 1,
        writer.num_pages
    );
    Ok(writer.data)
}

/// Tracks the placement cursor while objects are serialized into a
/// region's pages.
struct RegionWriter {
    data: Vec<u8>,
    region: Region,
    page_size: usize,
    num_pages: usize,
    current_page: usize,
    offset_in_page: usize,
}

impl RegionWriter {
    fn new(region: Region, options: &EncodeOptions) -> Self {
        let page_size = options.page_size;
        let num_pages = region.size() / page_size;
        let mut data = vec![ERASED_BYTE; region.size()];

        // Fresh images start every page with erase count 0 and status Ok
        let header = write_page_header(&PageHeader {
            erase_count: 0,
            status: PageStatus::Ok,
            encrypted: false,
            device_family: options.device_family,
            write_size: options.write_size,
            memory_mapped: options.memory_mapped,
            page_size,
        });
        for page in 0..num_pages {
            let offset = page * page_size;
            data[offset..offset + PAGE_HEADER_SIZE].copy_from_slice(&header);
        }

        Self {
            data,
            region,
            page_size,
            num_pages,
            current_page: 0,
            offset_in_page: PAGE_HEADER_SIZE,
        }
    }

    fn remaining(&self) -> usize {
        self.page_size - self.offset_in_page
    }

    fn advance_page(&mut self, key: u32) -> Result<(), Error> {
        self.current_page += 1;
        if self.current_page >= self.num_pages {
            return Err(Error::InsufficientSpace {
                region: self.region,
                key,
            });
        }
        self.offset_in_page = PAGE_HEADER_SIZE;
        Ok(())
    }

    fn write(&mut self, object: &NvmObject) -> Result<(), Error> {
        if object.fragment != FragmentStatus::None {
            return Err(Error::InvalidObject {
                key: object.key,
                reason: "live maps hold whole objects, not fragments".to_string(),
            });
        }

        match object.object_type {
            // Tombstones never survive compaction; nothing to place
            ObjectType::Deleted => Ok(()),
            ObjectType::Link => Err(Error::InvalidObject {
                key: object.key,
                reason: "link fragments are only produced while splitting large objects"
                    .to_string(),
            }),
            ObjectType::CounterSmall => {
                if self.remaining() < COUNTER_FIT_SIZE {
                    self.advance_page(object.key)?;
                }
                self.place(object)
            }
            ObjectType::DataSmall => {
                let needed = OBJ_HEADER_SIZE_SMALL + object.payload_len();
                if self.remaining() < needed {
                    self.advance_page(object.key)?;
                }
                self.place(object)
            }
            ObjectType::DataLarge | ObjectType::CounterLarge => self.write_large(object),
        }
    }

    fn write_large(&mut self, object: &NvmObject) -> Result<(), Error> {
        let whole = OBJ_HEADER_SIZE_LARGE + object.payload_len();
        if self.remaining() < whole && self.remaining() < MIN_FRAGMENT_SIZE {
            self.advance_page(object.key)?;
        }

        let body = self.page_size - PAGE_HEADER_SIZE;
        let fragments = fragment_large_object(object, self.remaining(), body);
        let fragmented = fragments.len() > 1;
        for (i, fragment) in fragments.iter().enumerate() {
            if i > 0 {
                self.advance_page(object.key)?;
            }
            self.place(fragment)?;
        }
        if fragmented {
            // Fragments own their pages; the next object starts on a fresh one
            self.offset_in_page = self.page_size;
        }
        Ok(())
    }

    fn place(&mut self, object: &NvmObject) -> Result<(), Error> {
        let bytes = write_object(object)?;
        debug_assert!(bytes.len() <= self.remaining());
        let start = self.current_page * self.page_size + self.offset_in_page;
        trace!(
            "placing key {:#07x} ({}) at {:#x}: {}",
            object.key,
            object.object_type,
            start,
            hex::encode(&bytes)
        );
        self.data[start..start + bytes.len()].copy_from_slice(&bytes);
        self.offset_in_page += bytes.len();
        Ok(())
    }
}
