//! Destructive block qualification
//!
//! A stress scan for suspect blocks: repeated erase / program / verify
//! cycles across the whole block, data and spare areas both. Used when
//! qualifying media before deployment, never during normal operation (it
//! destroys the block's contents and burns program/erase cycles).

use log::{info, warn};

use super::{Ftl, FtlError};
use crate::nand::{Nand, BLANK};

/// Cycle count used by the qualification tooling when none is given
pub const DEFAULT_SCAN_CYCLES: u32 = 50;

/// Outcome of a block qualification scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanVerdict {
    /// The block survived every cycle and is left erased
    Healthy,
    /// The block failed a device operation or a verify step (or was
    /// already marked bad)
    Failed,
}

impl<N: Nand> Ftl<N> {
    /// Stress-test one physical block with `cycles` erase/program/verify
    /// rounds.
    ///
    /// Destroys the block's contents. Each round erases the block, verifies
    /// every data and spare byte reads back blank, programs every byte to
    /// zero, and verifies that too; a healthy block is left erased. Any
    /// mismatch or failed device operation yields [`ScanVerdict::Failed`];
    /// only errors unrelated to the block itself (a failed spare read while
    /// checking the bad mark) surface as `Err`.
    pub fn scan_block(&mut self, block: u32, cycles: u32) -> Result<ScanVerdict, FtlError> {
        if block >= self.layout.blocks {
            return Err(FtlError::Nand(crate::nand::NandError::BlockOutOfRange {
                block,
            }));
        }

        if self.is_bad(block)? {
            info!("scan: block {block} is already marked bad");
            return Ok(ScanVerdict::Failed);
        }

        for cycle in 0..cycles {
            if self.nand.erase_block(block).is_err() {
                warn!("scan: block {block} failed erase in cycle {cycle}");
                return Ok(ScanVerdict::Failed);
            }
            if !self.verify_block(block, BLANK) {
                warn!("scan: block {block} not blank after erase in cycle {cycle}");
                return Ok(ScanVerdict::Failed);
            }

            if self.program_block(block, 0x00).is_err() {
                warn!("scan: block {block} failed program in cycle {cycle}");
                return Ok(ScanVerdict::Failed);
            }
            if !self.verify_block(block, 0x00) {
                warn!("scan: block {block} failed pattern verify in cycle {cycle}");
                return Ok(ScanVerdict::Failed);
            }
        }

        // Leave the survivor erased and ready for use
        if self.nand.erase_block(block).is_err() || !self.verify_block(block, BLANK) {
            warn!("scan: block {block} failed the final erase");
            return Ok(ScanVerdict::Failed);
        }

        info!("scan: block {block} healthy after {cycles} cycles");
        Ok(ScanVerdict::Healthy)
    }

    /// Fill every data and spare byte of a block with `pattern`
    fn program_block(&mut self, block: u32, pattern: u8) -> Result<(), crate::nand::NandError> {
        let page_size = self.layout.bytes_per_page;
        let spare_size = self.layout.spare_bytes_per_page;
        self.scratch.fill(pattern);

        let first = self.layout.first_page(block);
        for page in first..first + self.layout.pages_per_block {
            self.nand.program_page(page, 0, &self.scratch[..page_size])?;
            self.nand
                .program_spare(page, 0, &self.scratch[page_size..page_size + spare_size])?;
        }
        Ok(())
    }

    /// True when every data and spare byte of the block reads as `pattern`
    fn verify_block(&mut self, block: u32, pattern: u8) -> bool {
        let page_size = self.layout.bytes_per_page;
        let spare_size = self.layout.spare_bytes_per_page;

        let first = self.layout.first_page(block);
        for page in first..first + self.layout.pages_per_block {
            let (data, spare) = self.scratch.split_at_mut(page_size);
            if self
                .nand
                .read_page(page, 0, data)
                .and_then(|()| self.nand.read_spare(page, 0, &mut spare[..spare_size]))
                .is_err()
            {
                return false;
            }
            if !self.scratch[..page_size + spare_size]
                .iter()
                .all(|&b| b == pattern)
            {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nand::{NandLayout, PageUtil, SimNand};

    const TEST_LAYOUT: NandLayout = NandLayout {
        blocks: 128,
        pages_per_block: 4,
        bytes_per_page: 128,
        spare_bytes_per_page: 16,
    };

    #[test]
    fn test_healthy_block_passes_and_is_left_erased() {
        let mut ftl = Ftl::new(SimNand::new(TEST_LAYOUT)).unwrap();

        // Pre-soil the block so the scan has something to destroy
        ftl.device_mut().program_page(20 * 4, 0, &[0x12; 128]).unwrap();

        assert_eq!(ftl.scan_block(20, 3).unwrap(), ScanVerdict::Healthy);

        let mut page = [0u8; 128];
        ftl.device_mut().read_page(20 * 4, 0, &mut page).unwrap();
        assert!(page.is_erased());
        assert!(ftl.is_free(20).unwrap());
    }

    #[test]
    fn test_already_bad_block_fails_without_cycling() {
        let mut ftl = Ftl::new(SimNand::new(TEST_LAYOUT)).unwrap();
        ftl.mark_bad(5);

        let erases_before = ftl.device_mut().stats.erases;
        assert_eq!(ftl.scan_block(5, 3).unwrap(), ScanVerdict::Failed);
        assert_eq!(ftl.device_mut().stats.erases, erases_before);
    }

    #[test]
    fn test_erase_failure_fails_the_scan() {
        let mut ftl = Ftl::new(SimNand::new(TEST_LAYOUT)).unwrap();
        ftl.device_mut().faults.erase_blocks.insert(30);

        assert_eq!(ftl.scan_block(30, 3).unwrap(), ScanVerdict::Failed);
    }

    #[test]
    fn test_program_failure_fails_the_scan() {
        let mut ftl = Ftl::new(SimNand::new(TEST_LAYOUT)).unwrap();
        ftl.device_mut().faults.program_blocks.insert(31);

        assert_eq!(ftl.scan_block(31, 3).unwrap(), ScanVerdict::Failed);
    }

    #[test]
    fn test_block_out_of_range() {
        let mut ftl = Ftl::new(SimNand::new(TEST_LAYOUT)).unwrap();
        assert!(ftl.scan_block(TEST_LAYOUT.blocks, 1).is_err());
    }
}
