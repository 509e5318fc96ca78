//! Flash image of the parameter record
//!
//! The record bytes sit between a magic number and a CRC-32, padded so the
//! whole image is a multiple of the flash write size.

use embassy_stm32::crc::Crc;
use esc_core::config::record::RECORD_LEN;
use esc_core::config::ParamRecord;

/// Magic number ("ESC1" in ASCII)
pub const RECORD_MAGIC: u32 = 0x3143_5345;

/// Bytes reserved for the record
pub const RECORD_SLOT: usize = 32;

/// Persisted image
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct StoredRecord {
    pub magic: u32,
    pub record: [u8; RECORD_SLOT],
    /// CRC-32 over everything before it
    pub crc32: u32,
}

/// Size of the image in bytes
pub const IMAGE_LEN: usize = core::mem::size_of::<StoredRecord>();

impl StoredRecord {
    pub fn new(record: &ParamRecord, crc: &mut Crc<'_>) -> Self {
        let mut bytes = [0xFFu8; RECORD_SLOT];
        bytes[..RECORD_LEN].copy_from_slice(&record.to_bytes());
        let mut image = Self {
            magic: RECORD_MAGIC,
            record: bytes,
            crc32: 0,
        };
        image.crc32 = image.calculate_crc(crc);
        image
    }

    pub fn to_bytes(&self) -> [u8; IMAGE_LEN] {
        let mut bytes = [0u8; IMAGE_LEN];
        bytes[..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..4 + RECORD_SLOT].copy_from_slice(&self.record);
        bytes[4 + RECORD_SLOT..].copy_from_slice(&self.crc32.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; IMAGE_LEN]) -> Self {
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let mut record = [0u8; RECORD_SLOT];
        record.copy_from_slice(&bytes[4..4 + RECORD_SLOT]);
        Self {
            magic: word(0),
            record,
            crc32: word(4 + RECORD_SLOT),
        }
    }

    pub fn validate_header(&self) -> bool {
        self.magic == RECORD_MAGIC
    }

    /// CRC-32 of the magic number and the record slot
    pub fn calculate_crc(&self, crc: &mut Crc<'_>) -> u32 {
        let mut words = [0u32; 1 + RECORD_SLOT / 4];
        words[0] = self.magic;
        for (word, chunk) in words[1..].iter_mut().zip(self.record.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        crc.reset();
        crc.feed_words(&words)
    }

    pub fn verify_crc(&self, crc: &mut Crc<'_>) -> bool {
        self.calculate_crc(crc) == self.crc32
    }

    pub fn record(&self) -> Option<ParamRecord> {
        ParamRecord::from_bytes(&self.record)
    }
}

// Whole double words, within one page
const _: () = {
    assert!(RECORD_LEN <= RECORD_SLOT);
    assert!(IMAGE_LEN % 8 == 0);
    assert!(IMAGE_LEN <= 2048);
};
