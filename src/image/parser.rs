use log::debug;

use crate::error::Error;
use crate::image::compact::compact_objects;
use crate::image::consts::*;
use crate::image::{page, NvmImage, NvmPage, ObjectMap, ParseOptions, Region};

/// Parse a full NVM image buffer into pages (in ring order) and the
/// compacted live object map of each region.
pub(crate) fn parse_image(buffer: &[u8], options: &ParseOptions) -> Result<NvmImage, Error> {
    if buffer.len() != NVM_TOTAL_SIZE {
        return Err(Error::InvalidImageSize(buffer.len()));
    }

    // Walk the buffer page by page; each page declares its own size
    let mut pages = Vec::new();
    let mut offset = 0;
    while offset < buffer.len() {
        let (page, consumed) = page::read_page(buffer, offset, options)?;
        pages.push(page);
        offset += consumed;
    }
    debug!("parsed {} pages from {} bytes", pages.len(), buffer.len());

    let (application_pages, protocol_pages): (Vec<NvmPage>, Vec<NvmPage>) = pages
        .into_iter()
        .partition(|page| page.offset < APPLICATION_REGION_SIZE);

    let application_pages = sort_ring_order(application_pages);
    let protocol_pages = sort_ring_order(protocol_pages);

    let application_objects = compact_region(&application_pages, Region::Application)?;
    let protocol_objects = compact_region(&protocol_pages, Region::Protocol)?;

    Ok(NvmImage {
        application_pages,
        protocol_pages,
        application_objects,
        protocol_objects,
    })
}

/// Order a region's pages as the wear-leveling layer wrote them: erase
/// count ascending, ties broken by byte offset. The lowest erase count is
/// the logically oldest page of the ring.
fn sort_ring_order(mut pages: Vec<NvmPage>) -> Vec<NvmPage> {
    pages.sort_by_key(|page| (page.erase_count, page.offset));
    pages
}

fn compact_region(pages: &[NvmPage], region: Region) -> Result<ObjectMap, Error> {
    let log = pages.iter().flat_map(|page| page.objects.iter().cloned());
    let map = compact_objects(log)?;
    debug!(
        "{region} region: {} raw writes compacted to {} live objects",
        pages.iter().map(|page| page.objects.len()).sum::<usize>(),
        map.len()
    );
    Ok(map)
}
