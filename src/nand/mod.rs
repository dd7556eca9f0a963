//! Abstractions and code to access raw NAND flash
//!
//! The FTL core never touches hardware directly; it consumes the [`Nand`]
//! trait, which models the primitive command set of a large-page NAND chip
//! (page program/read, spare-area access, block erase, and the internal
//! copy-back operations). A software implementation, [`SimNand`], backs the
//! test suite and the `nandctl` binary.

use std::str::FromStr;

use thiserror::Error;

pub mod sim;

pub use sim::SimNand;

/// Byte value of an erased cell; programming can only flip bits 1 -> 0.
pub const BLANK: u8 = 0xFF;

/// Spare-area offset of the bad-block indicator byte.
pub const SPARE_BAD_MARK: usize = 0;

/// Spare-area offset of the used-flag byte.
pub const SPARE_USED_MARK: usize = 1;

/// Spare-area offset of the 2-byte little-endian logical block number.
pub const SPARE_LBN: usize = 2;

/// Number of leading spare bytes carrying FTL metadata.
pub const SPARE_META_LEN: usize = 4;

/// Convenience methods for operating on `[u8]`s that represent page contents
pub trait PageUtil {
    /// Does this page contain the all-1s bit pattern?
    fn is_erased(&self) -> bool;
}

impl PageUtil for [u8] {
    fn is_erased(&self) -> bool {
        self.iter().all(|&x| x == BLANK)
    }
}

/// A pub-fields struct describing the data layout of a NAND flash device
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NandLayout {
    pub blocks: u32,
    pub pages_per_block: u32,
    pub bytes_per_page: usize,
    pub spare_bytes_per_page: usize,
}

impl NandLayout {
    /// Number of main-area bytes in one block
    pub fn bytes_per_block(&self) -> u32 {
        self.pages_per_block * self.bytes_per_page as u32
    }

    /// Global page number of the first page of `block`
    pub fn first_page(&self, block: u32) -> u32 {
        block * self.pages_per_block
    }
}

/// Parse strings like "BLOCKSxPAGESxBYTES" or "BLOCKSxPAGESxBYTESxSPARE"
impl FromStr for NandLayout {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let fields: Vec<&str> = s.split('x').collect();
        let (blocks, pages_per_block, bytes_per_page, spare) = match fields.as_slice() {
            [b, p, s] => (b.parse()?, p.parse()?, s.parse()?, 64),
            [b, p, s, o] => (b.parse()?, p.parse()?, s.parse()?, o.parse()?),
            _ => anyhow::bail!("expected #x#x# or #x#x#x#"),
        };

        Ok(NandLayout {
            blocks,
            pages_per_block,
            bytes_per_page,
            spare_bytes_per_page: spare,
        })
    }
}

/// Result of polling the device's status register
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NandStatus {
    Busy,
    Ready,
    Error,
    TimeoutError,
}

/// Failures reported by the primitive operation set
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NandError {
    /// The device reported a program/erase/copy-back failure
    #[error("NAND operation failed")]
    Fail,

    /// The ready/busy poll budget elapsed before the device settled
    #[error("NAND ready/busy poll timed out")]
    Timeout,

    #[error("page {page} out of range")]
    PageOutOfRange { page: u32 },

    #[error("block {block} out of range")]
    BlockOutOfRange { block: u32 },
}

/// Represents a NAND flash device through its primitive command set
///
/// All pages are globally numbered: `page = block * pages_per_block +
/// offset_in_block`. Operations are blocking; implementations poll the
/// ready/busy line internally with a calibrated budget and report
/// [`NandError::Timeout`] when it elapses.
pub trait Nand {
    /// Get the layout of the NAND
    fn layout(&self) -> NandLayout;

    /// Issue a device reset, returning it to the read state
    fn reset(&mut self) -> Result<(), NandError>;

    /// Read the 32-bit chip identifier
    fn read_id(&mut self) -> Result<u32, NandError>;

    /// Poll the status register once
    fn status(&mut self) -> NandStatus;

    /// Read `buf.len()` main-area bytes from `page` starting at `offset`
    fn read_page(&mut self, page: u32, offset: usize, buf: &mut [u8]) -> Result<(), NandError>;

    /// Program `data` into the main area of `page` starting at `offset`
    ///
    /// Programming can only clear bits; the caller is responsible for
    /// targeting erased cells (or accepting the AND of old and new data).
    fn program_page(&mut self, page: u32, offset: usize, data: &[u8]) -> Result<(), NandError>;

    /// Read `buf.len()` spare-area bytes from `page` starting at `offset`
    fn read_spare(&mut self, page: u32, offset: usize, buf: &mut [u8]) -> Result<(), NandError>;

    /// Program `data` into the spare area of `page` starting at `offset`
    fn program_spare(&mut self, page: u32, offset: usize, data: &[u8]) -> Result<(), NandError>;

    /// Erase a block, returning every byte (main and spare) to 0xFF
    fn erase_block(&mut self, block: u32) -> Result<(), NandError>;

    /// Device-internal page move: main and spare bytes of `src_page` are
    /// copied to `dst_page` without passing through host memory
    fn copy_back(&mut self, src_page: u32, dst_page: u32) -> Result<(), NandError>;

    /// Copy-back with random data input: like [`Nand::copy_back`], but
    /// `data` replaces the bytes at `offset` in the destination's main area
    fn copy_back_merge(
        &mut self,
        src_page: u32,
        dst_page: u32,
        data: &[u8],
        offset: usize,
    ) -> Result<(), NandError>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_layout_from_str() {
        let layout: NandLayout = "1024x64x2048".parse().unwrap();
        assert_eq!(
            layout,
            NandLayout {
                blocks: 1024,
                pages_per_block: 64,
                bytes_per_page: 2048,
                spare_bytes_per_page: 64,
            }
        );

        let layout: NandLayout = "16x8x256x16".parse().unwrap();
        assert_eq!(layout.spare_bytes_per_page, 16);

        assert!("16x8".parse::<NandLayout>().is_err());
        assert!("axbxc".parse::<NandLayout>().is_err());
    }

    #[test]
    fn test_is_erased() {
        assert!([0xFFu8; 8].is_erased());
        assert!(![0xFF, 0xFE, 0xFF].is_erased());
        assert!([0xFFu8; 0].is_erased());
    }
}
