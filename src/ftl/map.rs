//! Building and querying the logical-to-physical block map (LUT)
//!
//! The map is derived entirely from on-flash spare metadata: every good
//! block whose recorded logical block number is in range claims one LUT
//! slot. The map is rebuilt wholesale after every
//! operation that moves data (format, relocation); it is never patched
//! incrementally.

use log::debug;

use super::{Ftl, FtlError, MIN_DATA_BLOCKS, UNMAPPED};
use crate::nand::{Nand, SPARE_LBN};

impl<N: Nand> Ftl<N> {
    /// Scan every physical block's first-page spare metadata and rebuild the
    /// map.
    ///
    /// Fails with [`FtlError::CorruptMap`] when two physical blocks claim
    /// the same logical number (never silently last-write-wins) or when a
    /// mapped entry exists beyond the contiguous prefix, and with
    /// [`FtlError::NotFormatted`] when the prefix is shorter than
    /// [`MIN_DATA_BLOCKS`]. On any failure the map is left empty, so stale
    /// translations cannot leak out.
    pub fn build_lut(&mut self) -> Result<(), FtlError> {
        self.lut.fill(UNMAPPED);
        self.valid_data_blocks = 0;

        let mut meta = [0u8; 2];
        for block in 0..self.layout.blocks {
            // Same two-page bad check as the rest of the block machinery, so
            // a block whose bad mark landed on page 1 cannot claim a slot
            // with the stale logical number on its page 0
            if self.is_bad(block)? {
                continue;
            }

            self.nand
                .read_spare(self.layout.first_page(block), SPARE_LBN, &mut meta)?;

            let lbn = u16::from_le_bytes(meta);
            if u32::from(lbn) >= self.layout.blocks {
                // Blank (0xFFFF) or out-of-range: block carries no mapping
                continue;
            }

            let slot = &mut self.lut[usize::from(lbn)];
            if *slot != UNMAPPED {
                self.lut.fill(UNMAPPED);
                return Err(FtlError::CorruptMap { lbn });
            }
            *slot = block as u16;
        }

        // The logical address space is the maximal contiguous mapped prefix
        let valid = self
            .lut
            .iter()
            .position(|&e| e == UNMAPPED)
            .unwrap_or(self.lut.len());

        if valid < usize::from(MIN_DATA_BLOCKS) {
            self.lut.fill(UNMAPPED);
            return Err(FtlError::NotFormatted);
        }

        if let Some(hole) = self.lut[valid..].iter().position(|&e| e != UNMAPPED) {
            let lbn = (valid + hole) as u16;
            self.lut.fill(UNMAPPED);
            return Err(FtlError::CorruptMap { lbn });
        }

        self.valid_data_blocks = valid as u16;
        debug!("map rebuilt: {valid} logical blocks");
        Ok(())
    }

    /// Resolve a logical block number; `None` for anything at or beyond the
    /// current valid capacity
    pub fn translate(&self, lbn: u32) -> Option<u16> {
        if lbn >= u32::from(self.valid_data_blocks) {
            return None;
        }

        match self.lut[lbn as usize] {
            UNMAPPED => None,
            pbn => Some(pbn),
        }
    }
}
