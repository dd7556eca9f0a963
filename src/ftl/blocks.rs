//! Per-block spare-area flags: bad-block quarantine, the used flag, and the
//! free-block finder.
//!
//! A block carries no in-memory state; its status is derived on demand from
//! two metadata bytes in the spare area of its first page (with the second
//! page as a redundant location for the bad mark, in case the first page's
//! spare can no longer be programmed).

use log::warn;

use super::Ftl;
use crate::nand::{Nand, NandError, BLANK, SPARE_BAD_MARK, SPARE_USED_MARK};

/// Value programmed into the bad-block indicator byte
const BAD_MARK: u8 = 0xBD;

/// Value programmed into the used-flag byte
const USED_MARK: u8 = 0x55;

impl<N: Nand> Ftl<N> {
    /// Is this physical block marked bad?
    ///
    /// The indicator byte of both the first and the second page is checked;
    /// a torn write on page 0 must not hide a bad mark on page 1.
    pub fn is_bad(&mut self, block: u32) -> Result<bool, NandError> {
        let first = self.layout.first_page(block);
        let mut flag = [0u8; 1];

        self.nand.read_spare(first, SPARE_BAD_MARK, &mut flag)?;
        if flag[0] != BLANK {
            return Ok(true);
        }

        self.nand.read_spare(first + 1, SPARE_BAD_MARK, &mut flag)?;
        Ok(flag[0] != BLANK)
    }

    /// Quarantine a physical block by programming its bad-block indicator.
    ///
    /// Best effort: a block too damaged to accept the mark on page 0 may
    /// still take it on page 1; a block that accepts neither is left to be
    /// caught by its next program/erase failure.
    pub fn mark_bad(&mut self, block: u32) {
        warn!("marking block {block} bad");

        let first = self.layout.first_page(block);
        if self
            .nand
            .program_spare(first, SPARE_BAD_MARK, &[BAD_MARK])
            .is_err()
        {
            let _ = self.nand.program_spare(first + 1, SPARE_BAD_MARK, &[BAD_MARK]);
        }
    }

    /// Flag a block as holding live data since its last erase.
    ///
    /// A failure here is an early warning of an unreliable block; callers
    /// escalate it exactly like a failed program (relocate + quarantine).
    pub(crate) fn mark_used(&mut self, block: u32) -> Result<(), NandError> {
        let first = self.layout.first_page(block);
        self.nand.program_spare(first, SPARE_USED_MARK, &[USED_MARK])
    }

    /// A block is free when it is not bad and has not been claimed as live
    /// data since its last erase
    pub fn is_free(&mut self, block: u32) -> Result<bool, NandError> {
        if self.is_bad(block)? {
            return Ok(false);
        }

        let mut flag = [0u8; 1];
        self.nand
            .read_spare(self.layout.first_page(block), SPARE_USED_MARK, &mut flag)?;
        Ok(flag[0] == BLANK)
    }

    /// Locate an unused, non-bad physical block, scanning from the highest
    /// index downward.
    ///
    /// Relocation grows usage from the low end of the device upward over its
    /// life, so the top of the range statistically holds the most recently
    /// erased blocks. A placement heuristic, not a wear-leveling guarantee.
    pub(crate) fn find_free(&mut self) -> Result<Option<u32>, NandError> {
        for block in (0..self.layout.blocks).rev() {
            if self.is_free(block)? {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }
}
