use std::collections::HashMap;

use log::{debug, warn};

use crate::error::Error;
use crate::image::{FragmentStatus, NvmObject, ObjectMap, ObjectType};

/// Partially reassembled large object, keyed by object key until its last
/// fragment arrives.
struct FragmentChain {
    object_type: ObjectType,
    payload: Vec<u8>,
}

/// Replay an ordered object log into the live key→object map.
///
/// Later writes supersede earlier ones, tombstones remove their key, and
/// fragmented large objects are buffered until their `Last` fragment
/// completes the chain. Orphaned continuation fragments are reported and
/// skipped; a chain still open at the end of the log is an error.
pub(crate) fn compact_objects<I>(log: I) -> Result<ObjectMap, Error>
where
    I: IntoIterator<Item = NvmObject>,
{
    let mut map = ObjectMap::new();
    let mut chains: HashMap<u32, FragmentChain> = HashMap::new();

    for object in log {
        match object.fragment {
            FragmentStatus::None => match object.object_type {
                ObjectType::Deleted => {
                    map.remove(object.key);
                }
                ObjectType::Link => {
                    let err = Error::OrphanedFragment {
                        key: object.key,
                        status: FragmentStatus::None,
                    };
                    warn!("{err}; ignoring it");
                }
                _ => {
                    map.insert(object);
                }
            },
            FragmentStatus::First => {
                let chain = FragmentChain {
                    object_type: object.object_type,
                    payload: object.payload.unwrap_or_default(),
                };
                if chains.insert(object.key, chain).is_some() {
                    // The later write wins; the unfinished chain is dropped
                    debug!(
                        "discarding incomplete fragment chain for key {:#07x}",
                        object.key
                    );
                }
            }
            FragmentStatus::Next | FragmentStatus::Last => {
                let Some(mut chain) = chains.remove(&object.key) else {
                    let err = Error::OrphanedFragment {
                        key: object.key,
                        status: object.fragment,
                    };
                    warn!("{err}; ignoring it");
                    continue;
                };
                chain
                    .payload
                    .extend_from_slice(object.payload.as_deref().unwrap_or(&[]));
                if object.fragment == FragmentStatus::Last {
                    map.insert(NvmObject {
                        key: object.key,
                        object_type: chain.object_type,
                        fragment: FragmentStatus::None,
                        payload: Some(chain.payload),
                    });
                } else {
                    chains.insert(object.key, chain);
                }
            }
        }
    }

    if !chains.is_empty() {
        let key = chains.keys().min().copied().unwrap_or_default();
        return Err(Error::TruncatedObject { key });
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fragment(key: u32, object_type: ObjectType, status: FragmentStatus, payload: &[u8]) -> NvmObject {
        NvmObject {
            key,
            object_type,
            fragment: status,
            payload: Some(payload.to_vec()),
        }
    }

    #[test]
    fn test_later_write_supersedes() {
        let map = compact_objects([
            NvmObject::data(1, vec![0x01]),
            NvmObject::data(2, vec![0xAA]),
            NvmObject::data(1, vec![0x02]),
        ])
        .unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(1).unwrap().payload, Some(vec![0x02]));
        // Overwriting key 1 kept its original position
        assert_eq!(map.keys().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_delete_removes_key() {
        let map = compact_objects([
            NvmObject::data(1, vec![0x01]),
            NvmObject::data(1, vec![0x02]),
            NvmObject::deleted(1),
        ])
        .unwrap();

        assert!(map.is_empty());
    }

    #[test]
    fn test_write_after_delete_is_a_fresh_occurrence() {
        let map = compact_objects([
            NvmObject::data(1, vec![0x01]),
            NvmObject::data(2, vec![0x02]),
            NvmObject::deleted(1),
            NvmObject::data(1, vec![0x03]),
        ])
        .unwrap();

        assert_eq!(map.keys().collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(map.get(1).unwrap().payload, Some(vec![0x03]));
    }

    #[test]
    fn test_fragment_reassembly() {
        let map = compact_objects([
            fragment(5, ObjectType::DataLarge, FragmentStatus::First, &[1, 2]),
            fragment(5, ObjectType::Link, FragmentStatus::Next, &[3, 4]),
            fragment(5, ObjectType::Link, FragmentStatus::Last, &[5]),
        ])
        .unwrap();

        let object = map.get(5).unwrap();
        assert_eq!(object.object_type, ObjectType::DataLarge);
        assert_eq!(object.fragment, FragmentStatus::None);
        assert_eq!(object.payload, Some(vec![1, 2, 3, 4, 5]));
    }

    #[test]
    fn test_interleaved_chains_reassemble_independently() {
        let map = compact_objects([
            fragment(1, ObjectType::DataLarge, FragmentStatus::First, &[0x11]),
            fragment(2, ObjectType::CounterLarge, FragmentStatus::First, &[1, 2]),
            fragment(1, ObjectType::Link, FragmentStatus::Last, &[0x12]),
            fragment(2, ObjectType::Link, FragmentStatus::Last, &[3, 4]),
        ])
        .unwrap();

        assert_eq!(map.get(1).unwrap().payload, Some(vec![0x11, 0x12]));
        let counter = map.get(2).unwrap();
        assert_eq!(counter.object_type, ObjectType::CounterLarge);
        assert_eq!(counter.counter_value(), Some(u32::from_le_bytes([1, 2, 3, 4])));
    }

    #[test]
    fn test_restarted_chain_discards_partial() {
        let map = compact_objects([
            fragment(9, ObjectType::DataLarge, FragmentStatus::First, &[0xAA, 0xAA]),
            fragment(9, ObjectType::DataLarge, FragmentStatus::First, &[0xBB]),
            fragment(9, ObjectType::Link, FragmentStatus::Last, &[0xCC]),
        ])
        .unwrap();

        assert_eq!(map.get(9).unwrap().payload, Some(vec![0xBB, 0xCC]));
    }

    #[test]
    fn test_orphaned_fragment_is_ignored() {
        let map = compact_objects([
            fragment(3, ObjectType::Link, FragmentStatus::Last, &[0xEE]),
            NvmObject::data(4, vec![0x44]),
        ])
        .unwrap();

        assert!(!map.contains_key(3));
        assert_eq!(map.get(4).unwrap().payload, Some(vec![0x44]));
    }

    #[test]
    fn test_unterminated_chain_is_truncated() {
        let err = compact_objects([fragment(
            6,
            ObjectType::DataLarge,
            FragmentStatus::First,
            &[1],
        )])
        .unwrap_err();

        assert!(matches!(err, Error::TruncatedObject { key: 6 }));
    }

    #[test]
    fn test_complete_write_supersedes_reassembled_object() {
        let map = compact_objects([
            fragment(8, ObjectType::DataLarge, FragmentStatus::First, &[1, 2, 3]),
            fragment(8, ObjectType::Link, FragmentStatus::Last, &[4]),
            NvmObject::data(8, vec![9]),
        ])
        .unwrap();

        assert_eq!(map.get(8).unwrap().payload, Some(vec![9]));
        assert_eq!(map.len(), 1);
    }
}
