//! Formatting and capacity accounting
//!
//! Formatting erases the device wholesale and assigns sequential logical
//! numbers to the good blocks. Two percent of the good blocks are left
//! without a logical number; they form the free pool the relocation engine
//! draws candidates from.

use log::{info, warn};

use super::{Ftl, FtlError, DATA_BLOCK_PERCENT, MIN_DATA_BLOCKS};
use crate::nand::{Nand, SPARE_LBN};

impl<N: Nand> Ftl<N> {
    /// Erase every good block, assign logical numbers, rebuild the map.
    ///
    /// All existing data is destroyed. Blocks already marked bad are left
    /// alone; a block whose erase fails joins them. Fails with
    /// [`FtlError::DeviceUnusable`] when fewer than [`MIN_DATA_BLOCKS`]
    /// good blocks remain.
    pub fn format(&mut self) -> Result<(), FtlError> {
        let mut good = 0u32;
        for block in 0..self.layout.blocks {
            if self.is_bad(block)? {
                continue;
            }

            if self.nand.erase_block(block).is_err() {
                warn!("format: erase of block {block} failed");
                self.mark_bad(block);
                continue;
            }
            good += 1;
        }

        if good < u32::from(MIN_DATA_BLOCKS) {
            return Err(FtlError::DeviceUnusable { good });
        }

        let usable = good * DATA_BLOCK_PERCENT / 100;
        info!("format: {good} good blocks, exposing {usable} as logical data blocks");

        // Number the first `usable` good blocks 0..usable; the remainder
        // (and every block above them) stays blank as the free pool
        let mut assigned: u32 = 0;
        for block in 0..self.layout.blocks {
            if assigned == usable {
                break;
            }
            if self.is_bad(block)? {
                continue;
            }

            let lbn = (assigned as u16).to_le_bytes();
            self.nand
                .program_spare(self.layout.first_page(block), SPARE_LBN, &lbn)?;
            assigned += 1;
        }

        self.build_lut()
    }

    /// Capacity in bytes exposed to the storage client.
    ///
    /// The 2% free-pool reserve is already baked into the valid block count
    /// at format time, so this is a straight multiplication.
    pub fn format_capacity(&self) -> u64 {
        u64::from(self.valid_data_blocks) * u64::from(self.layout.bytes_per_block())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nand::{NandLayout, SimNand};

    const TEST_LAYOUT: NandLayout = NandLayout {
        blocks: 128,
        pages_per_block: 4,
        bytes_per_page: 128,
        spare_bytes_per_page: 16,
    };

    /// Factory-mark `count` blocks bad, from the given index upward
    fn pre_mark_bad(nand: &mut SimNand, start: u32, count: u32) {
        use crate::nand::SPARE_BAD_MARK;
        for block in start..start + count {
            nand.program_spare(block * TEST_LAYOUT.pages_per_block, SPARE_BAD_MARK, &[0])
                .unwrap();
        }
    }

    #[test]
    fn test_format_assigns_contiguous_prefix() {
        let mut ftl = Ftl::new(SimNand::new(TEST_LAYOUT)).unwrap();
        ftl.format().unwrap();

        // 128 good blocks, 98% => 125 data blocks
        assert_eq!(ftl.valid_data_blocks(), 125);
        assert_eq!(
            ftl.format_capacity(),
            125 * u64::from(TEST_LAYOUT.bytes_per_block())
        );

        // The free pool sits above the mapped prefix
        for lbn in 0..125 {
            assert_eq!(ftl.translate(lbn), Some(lbn as u16));
        }
        assert_eq!(ftl.translate(125), None);
    }

    #[test]
    fn test_format_skips_bad_blocks() {
        let mut nand = SimNand::new(TEST_LAYOUT);
        pre_mark_bad(&mut nand, 10, 3);

        let mut ftl = Ftl::new(nand).unwrap();
        ftl.format().unwrap();

        // 125 good blocks, 98% => 122; numbering skips the bad ones
        assert_eq!(ftl.valid_data_blocks(), 122);
        assert_eq!(ftl.translate(9), Some(9));
        assert_eq!(ftl.translate(10), Some(13));
    }

    #[test]
    fn test_format_capacity_floor() {
        // Only 50 good blocks: the device is scrap
        let mut nand = SimNand::new(TEST_LAYOUT);
        pre_mark_bad(&mut nand, 50, 78);

        let mut ftl = Ftl::new(nand).unwrap();
        assert_eq!(ftl.format(), Err(FtlError::DeviceUnusable { good: 50 }));

        // Exactly 100 good blocks: usable, with 98 data blocks
        let mut nand = SimNand::new(TEST_LAYOUT);
        pre_mark_bad(&mut nand, 100, 28);

        let mut ftl = Ftl::new(nand).unwrap();
        ftl.format().unwrap();
        assert_eq!(ftl.valid_data_blocks(), 98);
        assert_eq!(
            ftl.format_capacity(),
            98 * u64::from(TEST_LAYOUT.bytes_per_block())
        );
    }

    #[test]
    fn test_format_quarantines_blocks_that_fail_erase() {
        let mut ftl = Ftl::new(SimNand::new(TEST_LAYOUT)).unwrap();
        ftl.device_mut().faults.erase_blocks.insert(0);

        ftl.format().unwrap();

        assert!(ftl.is_bad(0).unwrap());
        // 127 good blocks, 98% => 124, starting at block 1
        assert_eq!(ftl.valid_data_blocks(), 124);
        assert_eq!(ftl.translate(0), Some(1));
    }

    /// The reference-hardware scenario: 1024 blocks of 64 pages of 2048
    /// bytes, three factory-bad blocks.
    #[test]
    fn test_reference_device_scenario() {
        const LAYOUT: NandLayout = NandLayout {
            blocks: 1024,
            pages_per_block: 64,
            bytes_per_page: 2048,
            spare_bytes_per_page: 64,
        };

        let mut nand = SimNand::new(LAYOUT);
        for &block in &[7, 300, 1005] {
            nand.program_spare(block * LAYOUT.pages_per_block, crate::nand::SPARE_BAD_MARK, &[0])
                .unwrap();
        }

        let mut ftl = Ftl::new(nand).unwrap();
        ftl.format().unwrap();

        assert_eq!(ftl.valid_data_blocks(), 1000); // floor(1021 * 0.98)
        assert_eq!(ftl.format_capacity(), 1000 * 64 * 2048);
    }
}
