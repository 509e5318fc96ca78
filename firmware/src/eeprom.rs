//! Flash-backed parameter store
//!
//! Keeps the parameter record in the last flash page of the STM32G431VB
//! (page 63).

use embassy_stm32::crc::Crc;
use embassy_stm32::flash::{Blocking, Flash};
use esc_core::config::ParamRecord;
use esc_core::hal::{ParamStore, StoreError};

use crate::config::storage::{StoredRecord, IMAGE_LEN};
use crate::fmt::*;

/// Flash page size of the STM32G431VB (2 KB)
pub const FLASH_PAGE_SIZE: u32 = 2048;

/// Last page number (page 63, 0-based)
pub const LAST_PAGE_NUMBER: u8 = 63;

/// Offset of the last page from the start of flash (128 KB - 2 KB, 0x0801F800)
pub const LAST_PAGE_OFFSET: u32 = 0x1F800;

/// Erased flash reads back as all ones.
const ERASED: u32 = 0xFFFF_FFFF;

pub struct FlashParamStore {
    flash: Flash<'static, Blocking>,
    crc: Crc<'static>,
}

impl FlashParamStore {
    pub fn new(flash: Flash<'static, Blocking>, crc: Crc<'static>) -> Self {
        Self { flash, crc }
    }

    fn read_image(&mut self) -> Result<StoredRecord, StoreError> {
        let mut bytes = [0u8; IMAGE_LEN];
        self.flash
            .blocking_read(LAST_PAGE_OFFSET, &mut bytes)
            .map_err(|e| {
                error!("Flash read failed: {:?}", e);
                StoreError::Read
            })?;
        Ok(StoredRecord::from_bytes(&bytes))
    }
}

impl ParamStore for FlashParamStore {
    fn load(&mut self) -> Result<ParamRecord, StoreError> {
        debug!("Reading parameters from flash page {}", LAST_PAGE_NUMBER);
        let image = self.read_image()?;

        if image.magic == ERASED {
            return Err(StoreError::Empty);
        }
        if !image.validate_header() {
            error!("Parameter header invalid: magic=0x{:08X}", image.magic);
            return Err(StoreError::Corrupt);
        }
        if !image.verify_crc(&mut self.crc) {
            error!("Parameter CRC mismatch: stored=0x{:08X}", image.crc32);
            return Err(StoreError::Corrupt);
        }

        image.record().ok_or(StoreError::Corrupt)
    }

    fn save(&mut self, record: &ParamRecord) -> Result<(), StoreError> {
        let image = StoredRecord::new(record, &mut self.crc);
        info!("Writing parameters, CRC32 0x{:08X}", image.crc32);

        self.flash
            .blocking_erase(LAST_PAGE_OFFSET, LAST_PAGE_OFFSET + FLASH_PAGE_SIZE)
            .map_err(|e| {
                error!("Flash erase failed: {:?}", e);
                StoreError::Write
            })?;

        self.flash
            .blocking_write(LAST_PAGE_OFFSET, &image.to_bytes())
            .map_err(|e| {
                error!("Flash write failed: {:?}", e);
                StoreError::Write
            })?;

        info!("Parameters saved");
        Ok(())
    }
}
