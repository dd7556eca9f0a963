//! The flash-translation layer core
//!
//! [`Ftl`] owns a NAND device and exposes a linear logical address space on
//! top of it: a logical-to-physical block map built from spare-area
//! metadata, bad-block quarantine, and copy-back relocation whenever an
//! in-place program is impossible. One instance per device; the LUT, the
//! valid-block count, and the scratch page buffer all live in this struct,
//! so independent instances can coexist (e.g. against simulated devices in
//! tests).
//!
//! Layering, leaves first: block flags ([`blocks`]) and the free-block
//! finder sit directly on the NAND primitives; the map builder ([`map`])
//! uses the block flags; the relocation engine ([`relocate`]) uses all
//! three; the sector front-end in this module and [`format`] sit on top.

use log::debug;
use thiserror::Error;

use crate::nand::{Nand, NandError, PageUtil, SPARE_META_LEN};

mod blocks;
mod format;
mod map;
mod relocate;
mod scan;

pub use scan::{ScanVerdict, DEFAULT_SCAN_CYCLES};

/// LUT entry meaning "no physical block carries this logical number"; also
/// the on-flash value of a blank (never-programmed) logical block number.
pub const UNMAPPED: u16 = 0xFFFF;

/// Fewer contiguous mapped logical blocks than this means the device is
/// unformatted (or too worn to be worth using).
pub const MIN_DATA_BLOCKS: u16 = 100;

/// Share of good blocks handed out as logical data blocks at format time;
/// the remainder is the free pool relocation draws from.
pub const DATA_BLOCK_PERCENT: u32 = 98;

/// Relocation gives up after this many attempts with fresh candidates.
pub const RELOCATE_ATTEMPTS: usize = 10;

/// Errors surfaced by the FTL to the storage client
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FtlError {
    /// I/O length is not a multiple of 4 bytes, or the transfer would run
    /// past the end of a page
    #[error("transfer of {len} bytes violates alignment constraints")]
    Alignment { len: usize },

    /// The map build found fewer than [`MIN_DATA_BLOCKS`] contiguous
    /// logical blocks
    #[error("device is not formatted ({} contiguous logical blocks required)", MIN_DATA_BLOCKS)]
    NotFormatted,

    /// Duplicate logical block number, or a mapped entry beyond the
    /// contiguous prefix
    #[error("corrupt block map at logical block {lbn}")]
    CorruptMap { lbn: u16 },

    /// Logical address beyond the formatted capacity
    #[error("logical address beyond formatted capacity")]
    Unmapped,

    /// Format found too few good blocks to build a usable device
    #[error("device unusable: only {good} good blocks")]
    DeviceUnusable { good: u32 },

    /// Every relocation attempt failed, or no free block was available
    #[error("relocation failed after {} attempts", RELOCATE_ATTEMPTS)]
    RelocationExhausted,

    #[error(transparent)]
    Nand(#[from] NandError),
}

/// A flash-translation layer bound to one NAND device
#[derive(Debug)]
pub struct Ftl<N: Nand> {
    nand: N,
    layout: crate::nand::NandLayout,

    /// Logical-to-physical block map, indexed by LBN; [`UNMAPPED`] entries
    /// carry no data. Rebuilt wholesale, never patched in place.
    lut: Box<[u16]>,

    /// Length of the maximal contiguous mapped prefix of `lut`; defines the
    /// logical address space exposed to clients.
    valid_data_blocks: u16,

    /// One page-plus-spare sized buffer reused across read/verify steps.
    /// `&mut self` on every operation keeps its use serialized.
    scratch: Vec<u8>,
}

impl<N: Nand> Ftl<N> {
    /// Bind an FTL instance to a device, resetting it to the read state.
    ///
    /// The map starts empty; call [`Ftl::build_lut`] to mount existing
    /// contents or [`Ftl::format`] to start fresh.
    pub fn new(mut nand: N) -> Result<Self, FtlError> {
        let layout = nand.layout();
        assert!(
            layout.blocks > 0 && layout.blocks < u32::from(UNMAPPED),
            "block count {} not representable in spare metadata",
            layout.blocks
        );
        assert!(
            layout.spare_bytes_per_page >= SPARE_META_LEN,
            "spare area too small for FTL metadata"
        );

        nand.reset()?;

        Ok(Self {
            lut: vec![UNMAPPED; layout.blocks as usize].into_boxed_slice(),
            valid_data_blocks: 0,
            scratch: vec![0; layout.bytes_per_page + layout.spare_bytes_per_page],
            layout,
            nand,
        })
    }

    /// Layout of the underlying device
    pub fn layout(&self) -> crate::nand::NandLayout {
        self.layout
    }

    /// Number of logical blocks currently exposed to clients
    pub fn valid_data_blocks(&self) -> u16 {
        self.valid_data_blocks
    }

    /// Chip identifier of the underlying device
    pub fn chip_id(&mut self) -> Result<u32, NandError> {
        self.nand.read_id()
    }

    /// Direct access to the device, for diagnostics (raw page dumps)
    pub fn device_mut(&mut self) -> &mut N {
        &mut self.nand
    }

    /// Give the device back (e.g. to save a simulated image)
    pub fn into_device(self) -> N {
        self.nand
    }

    /// Write `data` at logical byte address `addr`.
    ///
    /// `data.len()` must be a multiple of 4 and the transfer must not cross
    /// a page boundary. If the target region is still blank the data is
    /// programmed in place; otherwise (or when the in-place program or the
    /// used-flag mark fails) the whole block is relocated with the new data
    /// merged in.
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), FtlError> {
        let (page, offset) = self.resolve(addr, data.len())?;
        self.write_at_page(page, offset, data)
    }

    /// Read `buf.len()` bytes from logical byte address `addr`
    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FtlError> {
        let (page, offset) = self.resolve(addr, buf.len())?;
        self.nand.read_page(page, offset, buf)?;
        Ok(())
    }

    /// Write whole sectors starting at `sector_no`; `data` holds the
    /// concatenated sector payloads.
    ///
    /// `sector_size` may be any divisor of the page size (sub-page sectors
    /// supported). The batch aborts on the first failing sector.
    pub fn write_sectors(
        &mut self,
        sector_no: u32,
        sector_size: usize,
        data: &[u8],
    ) -> Result<(), FtlError> {
        self.check_sector_geometry(sector_size, data.len())?;

        for (i, sector) in data.chunks_exact(sector_size).enumerate() {
            let (page, offset) = self.resolve_sector(sector_no + i as u32, sector_size)?;
            self.write_at_page(page, offset, sector)?;
        }
        Ok(())
    }

    /// Read whole sectors starting at `sector_no` into `buf`
    pub fn read_sectors(
        &mut self,
        sector_no: u32,
        sector_size: usize,
        buf: &mut [u8],
    ) -> Result<(), FtlError> {
        self.check_sector_geometry(sector_size, buf.len())?;

        for (i, sector) in buf.chunks_exact_mut(sector_size).enumerate() {
            let (page, offset) = self.resolve_sector(sector_no + i as u32, sector_size)?;
            self.nand.read_page(page, offset, sector)?;
        }
        Ok(())
    }

    /// Blank-check the target region and program in place when possible;
    /// fall back to relocation in every other case.
    fn write_at_page(&mut self, page: u32, offset: usize, data: &[u8]) -> Result<(), FtlError> {
        self.nand
            .read_page(page, offset, &mut self.scratch[..data.len()])?;

        if self.scratch[..data.len()].is_erased() {
            if self.nand.program_page(page, offset, data).is_ok() {
                let block = page / self.layout.pages_per_block;
                if self.mark_used(block).is_ok() {
                    return Ok(());
                }
                debug!("used-flag mark failed on block {block}, relocating");
            } else {
                debug!("in-place program failed on page {page}, relocating");
            }
        }

        self.relocate_write(page, data, offset)
    }

    /// Resolve a logical byte address to (physical page, in-page offset),
    /// enforcing the alignment rules
    fn resolve(&self, addr: u32, len: usize) -> Result<(u32, usize), FtlError> {
        let page_size = self.layout.bytes_per_page;
        let in_block = (addr % self.layout.bytes_per_block()) as usize;
        let offset = in_block % page_size;

        if len % 4 != 0 || offset + len > page_size {
            return Err(FtlError::Alignment { len });
        }

        let lbn = addr / self.layout.bytes_per_block();
        let pbn = u32::from(self.translate(lbn).ok_or(FtlError::Unmapped)?);

        let page = pbn * self.layout.pages_per_block + (in_block / page_size) as u32;
        Ok((page, offset))
    }

    /// Resolve a sector number to (physical page, in-page offset)
    fn resolve_sector(&self, sector: u32, sector_size: usize) -> Result<(u32, usize), FtlError> {
        let page_size = self.layout.bytes_per_page;
        let sectors_per_block =
            self.layout.pages_per_block * (page_size / sector_size) as u32;

        let lbn = sector / sectors_per_block;
        let pbn = u32::from(self.translate(lbn).ok_or(FtlError::Unmapped)?);

        let in_block = (sector % sectors_per_block) as usize * sector_size;
        let page = pbn * self.layout.pages_per_block + (in_block / page_size) as u32;
        Ok((page, in_block % page_size))
    }

    fn check_sector_geometry(&self, sector_size: usize, len: usize) -> Result<(), FtlError> {
        let page_size = self.layout.bytes_per_page;
        if sector_size == 0
            || page_size % sector_size != 0
            || sector_size % 4 != 0
            || len % sector_size != 0
        {
            return Err(FtlError::Alignment { len: sector_size });
        }
        Ok(())
    }
}
