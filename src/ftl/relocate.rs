//! The relocation engine: writing around a block that cannot take an
//! in-place program.
//!
//! The whole source block is moved to a free block through the device's
//! copy-back commands (the data never crosses into host memory), with the
//! caller's new bytes merged into the target page on the way. Candidate
//! blocks that misbehave mid-copy are quarantined and the attempt restarts
//! with a fresh candidate; the source block stays untouched until the copy
//! is complete, so no step of the algorithm can lose the only good copy of
//! the data.

use log::{debug, warn};
use retry::{delay::NoDelay, retry_with_index, OperationResult};

use super::{Ftl, FtlError, RELOCATE_ATTEMPTS};
use crate::nand::Nand;

impl<N: Nand> Ftl<N> {
    /// Move the block containing `page` to a free block, substituting
    /// `data` at `offset` within that page, then retire the source block.
    ///
    /// Up to [`RELOCATE_ATTEMPTS`] candidate destinations are tried; the
    /// map is rebuilt after every mutation so lookups always reflect the
    /// on-flash state.
    pub(crate) fn relocate_write(
        &mut self,
        page: u32,
        data: &[u8],
        offset: usize,
    ) -> Result<(), FtlError> {
        let src_block = page / self.layout.pages_per_block;
        let target_page = page % self.layout.pages_per_block;

        retry_with_index(NoDelay.take(RELOCATE_ATTEMPTS - 1), |attempt| {
            self.relocate_once(attempt, src_block, target_page, data, offset)
        })
        .map_err(|err| err.error)
    }

    /// One relocation attempt against one candidate destination
    fn relocate_once(
        &mut self,
        attempt: u64,
        src_block: u32,
        target_page: u32,
        data: &[u8],
        offset: usize,
    ) -> OperationResult<(), FtlError> {
        let dest = match self.find_free() {
            Ok(Some(block)) => block,
            Ok(None) => {
                warn!("relocation of block {src_block}: no free block available");
                return OperationResult::Err(FtlError::RelocationExhausted);
            }
            Err(err) => return OperationResult::Err(err.into()),
        };

        debug!("relocation attempt {attempt}: block {src_block} -> {dest}");

        let ppb = self.layout.pages_per_block;
        for i in 0..ppb {
            let src = src_block * ppb + i;
            let dst = dest * ppb + i;

            let moved = if i == target_page {
                self.nand.copy_back_merge(src, dst, data, offset)
            } else {
                self.nand.copy_back(src, dst)
            };

            if moved.is_err() {
                warn!("copy-back {src} -> {dst} failed, quarantining destination {dest}");
                self.quarantine(dest);
                return OperationResult::Retry(FtlError::RelocationExhausted);
            }
        }

        // The destination now holds the merged block; claim it
        if self.mark_used(dest).is_err() {
            warn!("used-flag mark on destination {dest} failed, quarantining it");
            self.quarantine(dest);
            return OperationResult::Retry(FtlError::RelocationExhausted);
        }

        // Retire the source. If the erase fails the data is already durable
        // in the destination; only the source block's reuse is forfeited, so
        // this path still counts as success.
        if self.nand.erase_block(src_block).is_err() {
            warn!(
                "erase of source block {src_block} failed after relocation to {dest}; \
                 data is safe, source quarantined"
            );
            self.mark_bad(src_block);
        }

        match self.build_lut() {
            Ok(()) => OperationResult::Ok(()),
            Err(err) => OperationResult::Err(err),
        }
    }

    /// Mark a misbehaving block bad and bring the map back in line with the
    /// on-flash state. A rebuild failure here is not actionable mid-retry;
    /// the next successful attempt rebuilds again.
    fn quarantine(&mut self, block: u32) {
        self.mark_bad(block);
        if let Err(err) = self.build_lut() {
            debug!("map rebuild after quarantining block {block}: {err}");
        }
    }
}
