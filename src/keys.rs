//! Key layout in the ordered keyspace.
//!
//! ```text
//! index entry:     'I' | zoom u8 | tile_x u32 BE | tile_y u32 BE | object_id u64 BE
//! feature record:  'F' | object_id u64 BE
//! ```
//!
//! Big-endian integers keep every entry of one tile contiguous and ordered
//! by object id, so a tile scan is a single prefix scan. A tile column
//! (fixed zoom and x, a run of y) is contiguous as well, and so is a run of
//! whole columns.

use crate::db::ObjectId;
use crate::error::{Result, TesseraError};
use crate::storage::KeyRange;
use crate::tile::{TileId, TileRange};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub(crate) const INDEX_TAG: u8 = b'I';
pub(crate) const FEATURE_TAG: u8 = b'F';

pub(crate) const TILE_PREFIX_LEN: usize = 1 + 1 + 4 + 4;
pub(crate) const INDEX_KEY_LEN: usize = TILE_PREFIX_LEN + 8;
pub(crate) const FEATURE_KEY_LEN: usize = 1 + 8;

/// Prefix shared by every index entry of `tile`.
pub(crate) fn tile_prefix(tile: &TileId) -> Bytes {
    let mut buf = BytesMut::with_capacity(TILE_PREFIX_LEN);
    put_tile(&mut buf, tile);
    buf.freeze()
}

pub(crate) fn index_key(tile: &TileId, id: ObjectId) -> Bytes {
    let mut buf = BytesMut::with_capacity(INDEX_KEY_LEN);
    put_tile(&mut buf, tile);
    buf.put_u64(id.get());
    buf.freeze()
}

fn put_tile(buf: &mut BytesMut, tile: &TileId) {
    buf.put_u8(INDEX_TAG);
    buf.put_u8(tile.zoom);
    buf.put_u32(tile.x);
    buf.put_u32(tile.y);
}

/// Number of key ranges [`index_ranges`] returns for `range`.
///
/// `rows` is the cell count per axis at the range's zoom level.
pub(crate) fn index_range_count(range: &TileRange, rows: u64) -> u64 {
    if spans_all_rows(range, rows) {
        1
    } else {
        u64::from(range.max_x - range.min_x) + 1
    }
}

/// Key ranges holding exactly the index entries of the tiles in `range`.
///
/// One range per tile column, collapsed into a single range when the
/// columns span every row.
pub(crate) fn index_ranges(range: &TileRange, rows: u64) -> Vec<KeyRange> {
    let zoom = range.zoom;
    if spans_all_rows(range, rows) {
        return vec![KeyRange::new(
            tile_prefix(&TileId::new(zoom, range.min_x, 0)),
            tile_prefix(&TileId::new(zoom, range.max_x + 1, 0)),
        )];
    }

    (range.min_x..=range.max_x)
        .map(|x| {
            KeyRange::new(
                tile_prefix(&TileId::new(zoom, x, range.min_y)),
                tile_prefix(&TileId::new(zoom, x, range.max_y + 1)),
            )
        })
        .collect()
}

fn spans_all_rows(range: &TileRange, rows: u64) -> bool {
    range.min_y == 0 && u64::from(range.max_y) + 1 >= rows
}

pub(crate) fn feature_key(id: ObjectId) -> Bytes {
    let mut buf = BytesMut::with_capacity(FEATURE_KEY_LEN);
    buf.put_u8(FEATURE_TAG);
    buf.put_u64(id.get());
    buf.freeze()
}

/// Prefix of every feature record.
pub(crate) fn feature_prefix() -> Bytes {
    Bytes::from_static(&[FEATURE_TAG])
}

pub(crate) fn decode_index_key(key: &[u8]) -> Result<(TileId, ObjectId)> {
    if key.len() != INDEX_KEY_LEN || key[0] != INDEX_TAG {
        return Err(TesseraError::Corruption(format!(
            "malformed index key of {} bytes",
            key.len()
        )));
    }

    let mut buf = &key[1..];
    let zoom = buf.get_u8();
    let x = buf.get_u32();
    let y = buf.get_u32();
    let id = buf.get_u64();

    Ok((TileId::new(zoom, x, y), ObjectId::new(id)))
}

pub(crate) fn decode_feature_key(key: &[u8]) -> Result<ObjectId> {
    if key.len() != FEATURE_KEY_LEN || key[0] != FEATURE_TAG {
        return Err(TesseraError::Corruption(format!(
            "malformed feature key of {} bytes",
            key.len()
        )));
    }

    let mut buf = &key[1..];
    Ok(ObjectId::new(buf.get_u64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_key_layout() {
        let tile = TileId::new(5, 16, 17);
        let key = index_key(&tile, ObjectId::new(42));

        assert_eq!(key.len(), INDEX_KEY_LEN);
        assert!(key.starts_with(&tile_prefix(&tile)));
        assert_eq!(decode_index_key(&key).unwrap(), (tile, ObjectId::new(42)));
    }

    #[test]
    fn test_tile_entries_sort_by_object_id() {
        let tile = TileId::new(3, 1, 2);
        let low = index_key(&tile, ObjectId::new(9));
        let high = index_key(&tile, ObjectId::new(256));
        assert!(low < high);

        // Neighbouring tile never interleaves with this one.
        let next = index_key(&TileId::new(3, 1, 3), ObjectId::new(1));
        assert!(high < next);
    }

    #[test]
    fn test_index_ranges_cover_exactly_the_tiles() {
        let range = TileRange {
            zoom: 4,
            min_x: 2,
            min_y: 5,
            max_x: 4,
            max_y: 7,
        };
        let ranges = index_ranges(&range, 16);
        assert_eq!(ranges.len(), 3);
        assert_eq!(index_range_count(&range, 16), 3);

        let covered = |tile: TileId| {
            let key = index_key(&tile, ObjectId::new(u64::MAX));
            ranges.iter().any(|r| r.contains(&key))
        };
        for x in 0..16 {
            for y in 0..16 {
                let tile = TileId::new(4, x, y);
                assert_eq!(covered(tile), range.contains(&tile), "tile {:?}", tile);
            }
        }
        assert!(!covered(TileId::new(5, 3, 6)));
    }

    #[test]
    fn test_full_height_columns_collapse() {
        let range = TileRange {
            zoom: 23,
            min_x: 0,
            min_y: 0,
            max_x: (1 << 23) - 1,
            max_y: (1 << 23) - 1,
        };
        assert_eq!(index_range_count(&range, 1 << 23), 1);

        let ranges = index_ranges(&range, 1 << 23);
        assert_eq!(ranges.len(), 1);
        let corner = index_key(&TileId::new(23, (1 << 23) - 1, (1 << 23) - 1), ObjectId::new(1));
        assert!(ranges[0].contains(&corner));
        assert!(!ranges[0].contains(&index_key(&TileId::new(24, 0, 0), ObjectId::new(1))));
    }

    #[test]
    fn test_feature_key() {
        let key = feature_key(ObjectId::new(7));
        assert!(key.starts_with(&feature_prefix()));
        assert_eq!(decode_feature_key(&key).unwrap(), ObjectId::new(7));
    }

    #[test]
    fn test_malformed_keys() {
        assert!(decode_index_key(b"I123").unwrap_err().is_corruption());
        assert!(decode_feature_key(b"X12345678").unwrap_err().is_corruption());
    }
}
