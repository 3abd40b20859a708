//! Record identifiers.

use crate::codec::FixedCodec;
use kiln_common::page::PageId;

/// Identifies a record (row) in a data file: the page holding it and the
/// slot number within that page. The canonical value type stored in
/// table-key indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    /// Page containing this record.
    pub page_id: PageId,
    /// Slot number within the page.
    pub slot: u16,
}

impl RecordId {
    /// Creates a new record ID.
    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }

    /// Invalid record ID.
    pub const INVALID: RecordId = RecordId {
        page_id: PageId {
            file_id: u32::MAX,
            page_num: u32::MAX,
        },
        slot: u16::MAX,
    };

    /// Returns true if this is a valid record ID.
    pub fn is_valid(&self) -> bool {
        self.page_id.file_id != u32::MAX
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_id, self.slot)
    }
}

impl FixedCodec for RecordId {
    const WIDTH: usize = 10;

    #[inline]
    fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_id.file_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.page_id.page_num.to_le_bytes());
        buf[8..10].copy_from_slice(&self.slot.to_le_bytes());
    }

    #[inline]
    fn decode(buf: &[u8]) -> Self {
        let file_id = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let page_num = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let slot = u16::from_le_bytes(buf[8..10].try_into().unwrap());
        Self {
            page_id: PageId::new(file_id, page_num),
            slot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_new() {
        let rid = RecordId::new(PageId::new(0, 42), 7);
        assert_eq!(rid.page_id, PageId::new(0, 42));
        assert_eq!(rid.slot, 7);
        assert!(rid.is_valid());
    }

    #[test]
    fn test_record_id_invalid() {
        assert!(!RecordId::INVALID.is_valid());
    }

    #[test]
    fn test_record_id_display() {
        let rid = RecordId::new(PageId::new(1, 20), 3);
        assert_eq!(rid.to_string(), "1:20:3");
    }

    #[test]
    fn test_record_id_codec_roundtrip() {
        let rid = RecordId::new(PageId::new(9, 123456), 999);
        let mut buf = [0u8; RecordId::WIDTH];
        rid.encode(&mut buf);
        assert_eq!(RecordId::decode(&buf), rid);
    }

    #[test]
    fn test_record_id_codec_layout() {
        let rid = RecordId::new(PageId::new(1, 2), 3);
        let mut buf = [0u8; RecordId::WIDTH];
        rid.encode(&mut buf);
        assert_eq!(buf, [1, 0, 0, 0, 2, 0, 0, 0, 3, 0]);
    }
}
