use nvm3_image_tool::image::check::berger_code;
use nvm3_image_tool::image::consts::*;
use nvm3_image_tool::{
    encode_nvm, parse_nvm, EncodeOptions, Error, NvmObject, ObjectMap, PageStatus, PageWriteSize,
    Region,
};
use pretty_assertions::assert_eq;

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap())
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

#[test]
fn test_empty_image() {
    let _ = env_logger::builder().is_test(true).try_init();

    let buffer = encode_nvm(&ObjectMap::new(), &ObjectMap::new(), &EncodeOptions::default())
        .unwrap();
    assert_eq!(buffer.len(), NVM_TOTAL_SIZE);

    let erase_word = berger_code(0, ERASE_COUNT_BITS) << ERASE_COUNT_BITS;
    for page_offset in (0..NVM_TOTAL_SIZE).step_by(DEFAULT_PAGE_SIZE) {
        assert_eq!(read_u16(&buffer, page_offset), PAGE_VERSION);
        assert_eq!(read_u16(&buffer, page_offset + 2), PAGE_MAGIC);
        assert_eq!(read_u32(&buffer, page_offset + 4), erase_word);
        assert_eq!(read_u32(&buffer, page_offset + 12), PageStatus::Ok as u32);
        // Nothing but erased bytes after the header
        assert!(buffer[page_offset + PAGE_HEADER_SIZE..page_offset + DEFAULT_PAGE_SIZE]
            .iter()
            .all(|&b| b == ERASED_BYTE));
    }

    let image = parse_nvm(&buffer).unwrap();
    assert!(image.application_objects.is_empty());
    assert!(image.protocol_objects.is_empty());
    assert_eq!(
        image.application_pages.len(),
        APPLICATION_REGION_SIZE / DEFAULT_PAGE_SIZE
    );
    assert_eq!(
        image.protocol_pages.len(),
        PROTOCOL_REGION_SIZE / DEFAULT_PAGE_SIZE
    );
}

#[test]
fn test_single_small_data_write() {
    let application: ObjectMap = [NvmObject::data(0x00123, vec![0xDE, 0xAD, 0xBE, 0xEF])]
        .into_iter()
        .collect();

    let buffer = encode_nvm(&application, &ObjectMap::new(), &EncodeOptions::default()).unwrap();
    let image = parse_nvm(&buffer).unwrap();

    assert_eq!(image.application_objects.len(), 1);
    assert_eq!(
        image.application_objects.get(0x00123).unwrap().payload,
        Some(vec![0xDE, 0xAD, 0xBE, 0xEF])
    );
    assert!(image.protocol_objects.is_empty());

    // The write landed at the start of the first application page body
    assert_eq!(image.application_pages[0].objects.len(), 1);
}

#[test]
fn test_counter_write() {
    let application: ObjectMap = [NvmObject::counter(0x00200, 0x0102_0304)]
        .into_iter()
        .collect();

    let buffer = encode_nvm(&application, &ObjectMap::new(), &EncodeOptions::default()).unwrap();
    let image = parse_nvm(&buffer).unwrap();

    let counter = image.application_objects.get(0x00200).unwrap();
    assert_eq!(counter.counter_value(), Some(0x0102_0304));
}

#[test]
fn test_tombstones_are_not_encoded() {
    let application: ObjectMap = [
        NvmObject::data(1, vec![0x01]),
        NvmObject::deleted(2),
    ]
    .into_iter()
    .collect();

    let buffer = encode_nvm(&application, &ObjectMap::new(), &EncodeOptions::default()).unwrap();
    let image = parse_nvm(&buffer).unwrap();

    assert_eq!(image.application_objects.len(), 1);
    assert!(!image.application_objects.contains_key(2));
}

#[test]
fn test_page_options_are_written_to_every_header() {
    let options = EncodeOptions {
        page_size: 1024,
        device_family: 0x123,
        write_size: PageWriteSize::Write32,
        memory_mapped: false,
    };
    let buffer = encode_nvm(&ObjectMap::new(), &ObjectMap::new(), &options).unwrap();
    let image = parse_nvm(&buffer).unwrap();

    assert_eq!(image.application_pages.len(), APPLICATION_REGION_SIZE / 1024);
    assert_eq!(image.protocol_pages.len(), PROTOCOL_REGION_SIZE / 1024);
    for page in image
        .application_pages
        .iter()
        .chain(image.protocol_pages.iter())
    {
        assert_eq!(page.erase_count, 0);
        assert_eq!(page.status, PageStatus::Ok);
        assert_eq!(page.declared_page_size, 1024);
        assert_eq!(page.device_family, 0x123);
        assert_eq!(page.write_size, PageWriteSize::Write32);
        assert!(!page.memory_mapped);
        assert!(!page.encrypted);
    }
}

#[test]
fn test_invalid_page_size_options() {
    for page_size in [256usize, 768, 4096] {
        let options = EncodeOptions {
            page_size,
            ..EncodeOptions::default()
        };
        let result = encode_nvm(&ObjectMap::new(), &ObjectMap::new(), &options);
        assert!(matches!(result, Err(Error::InvalidOption(_))));
    }
}

#[test]
fn test_region_overflow() {
    let page_body = DEFAULT_PAGE_SIZE - PAGE_HEADER_SIZE;
    let num_pages = APPLICATION_REGION_SIZE / DEFAULT_PAGE_SIZE;
    // One more word than the region can hold
    let payload = vec![0x55; num_pages * (page_body - OBJ_HEADER_SIZE_LARGE) + WORD_SIZE];
    let application: ObjectMap = [NvmObject::data_large(0x00BEE, payload)].into_iter().collect();

    let err = encode_nvm(&application, &ObjectMap::new(), &EncodeOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::InsufficientSpace { key: 0x00BEE, .. }
    ));
}

#[test]
fn test_regions_are_independent() {
    let application: ObjectMap = [NvmObject::data(7, vec![0xA1])].into_iter().collect();
    let protocol: ObjectMap = [NvmObject::data(7, vec![0xB2])].into_iter().collect();

    let buffer = encode_nvm(&application, &protocol, &EncodeOptions::default()).unwrap();
    let image = parse_nvm(&buffer).unwrap();

    assert_eq!(
        image.objects(Region::Application).get(7).unwrap().payload,
        Some(vec![0xA1])
    );
    assert_eq!(
        image.objects(Region::Protocol).get(7).unwrap().payload,
        Some(vec![0xB2])
    );
    assert_eq!(
        image.pages(Region::Protocol).len(),
        PROTOCOL_REGION_SIZE / DEFAULT_PAGE_SIZE
    );
}
