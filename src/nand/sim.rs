//! A simulated in-memory NAND flash, for testing purposes
//!
//! The simulation models the electrical reality the FTL has to cope with:
//! programming can only clear bits (new bytes are ANDed into the cells),
//! only a block erase restores 0xFF, and the spare area travels with its
//! page through copy-back. Fault injection knobs let tests force program,
//! erase, copy-back, and spare-program failures on demand.

use std::collections::HashSet;
use std::io::{Read, Write};

use super::{Nand, NandError, NandLayout, NandStatus};

/// Chip identifier reported by [`SimNand::read_id`] ("SIM")
pub const SIM_CHIP_ID: u32 = 0x0053_494D;

/// Injected failures; all default to "healthy"
#[derive(Debug, Default, Clone)]
pub struct Faults {
    /// Blocks whose main-area programs report [`NandError::Fail`]
    pub program_blocks: HashSet<u32>,

    /// Blocks whose erases report [`NandError::Fail`]
    pub erase_blocks: HashSet<u32>,

    /// Fail every copy-back and copy-back-merge operation
    pub copy_back: bool,

    /// Fail every spare-area program operation
    pub spare_programs: bool,

    /// Fail spare-area programs targeting these global page numbers
    pub spare_program_pages: HashSet<u32>,
}

/// Operation counters, for asserting retry bounds and skipped work
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub page_reads: u64,
    pub page_programs: u64,
    pub spare_programs: u64,
    pub erases: u64,
    pub copy_backs: u64,
}

/// A simulated NAND flash device
#[derive(Debug, Clone)]
pub struct SimNand {
    blocks: Box<[SimBlock]>,
    layout: NandLayout,
    pub faults: Faults,
    pub stats: Stats,
}

/// A block of SimNand: main-area and spare-area cells, fully materialized
#[derive(Debug, Clone)]
struct SimBlock {
    data: Vec<u8>,
    spare: Vec<u8>,
}

impl SimBlock {
    fn erased(layout: NandLayout) -> Self {
        let data_len = layout.bytes_per_page * layout.pages_per_block as usize;
        let spare_len = layout.spare_bytes_per_page * layout.pages_per_block as usize;
        Self {
            data: vec![0xFF; data_len],
            spare: vec![0xFF; spare_len],
        }
    }

    fn erase(&mut self) {
        self.data.fill(0xFF);
        self.spare.fill(0xFF);
    }
}

/// NAND programming clears bits, never sets them
fn program_cells(cells: &mut [u8], data: &[u8]) {
    for (cell, &byte) in cells.iter_mut().zip(data) {
        *cell &= byte;
    }
}

impl SimNand {
    /// Create a fully-erased SimNand with the specified layout
    pub fn new(layout: NandLayout) -> Self {
        let blocks = vec![SimBlock::erased(layout); layout.blocks as usize];

        Self {
            blocks: blocks.into_boxed_slice(),
            layout,
            faults: Faults::default(),
            stats: Stats::default(),
        }
    }

    /// Initialize the main areas with content read from a type implementing
    /// `Read`; spare areas come up blank
    pub fn load<R: Read>(&mut self, read: &mut R) -> anyhow::Result<()> {
        for block in self.blocks.iter_mut() {
            read.read_exact(&mut block.data)?;
            block.spare.fill(0xFF);
        }

        Ok(())
    }

    /// Write the main areas out to a writable stream (such as a File)
    pub fn save<W: Write>(&self, write: &mut W) -> anyhow::Result<()> {
        for block in self.blocks.iter() {
            write.write_all(&block.data)?;
        }

        Ok(())
    }

    /// Split a global page number into (block index, byte offset of the page
    /// within the block's main area, byte offset within the spare area)
    fn locate(&self, page: u32) -> Result<(usize, usize, usize), NandError> {
        if page >= self.layout.blocks * self.layout.pages_per_block {
            return Err(NandError::PageOutOfRange { page });
        }

        let block = (page / self.layout.pages_per_block) as usize;
        let offset = (page % self.layout.pages_per_block) as usize;
        Ok((
            block,
            offset * self.layout.bytes_per_page,
            offset * self.layout.spare_bytes_per_page,
        ))
    }

    fn check_span(page: u32, offset: usize, len: usize, area: usize) -> Result<(), NandError> {
        if offset + len > area {
            return Err(NandError::PageOutOfRange { page });
        }
        Ok(())
    }
}

impl Nand for SimNand {
    fn layout(&self) -> NandLayout {
        self.layout
    }

    fn reset(&mut self) -> Result<(), NandError> {
        Ok(())
    }

    fn read_id(&mut self) -> Result<u32, NandError> {
        Ok(SIM_CHIP_ID)
    }

    fn status(&mut self) -> NandStatus {
        NandStatus::Ready
    }

    fn read_page(&mut self, page: u32, offset: usize, buf: &mut [u8]) -> Result<(), NandError> {
        let (block, base, _) = self.locate(page)?;
        Self::check_span(page, offset, buf.len(), self.layout.bytes_per_page)?;

        self.stats.page_reads += 1;
        let start = base + offset;
        buf.copy_from_slice(&self.blocks[block].data[start..start + buf.len()]);
        Ok(())
    }

    fn program_page(&mut self, page: u32, offset: usize, data: &[u8]) -> Result<(), NandError> {
        let (block, base, _) = self.locate(page)?;
        Self::check_span(page, offset, data.len(), self.layout.bytes_per_page)?;

        self.stats.page_programs += 1;
        if self.faults.program_blocks.contains(&(block as u32)) {
            return Err(NandError::Fail);
        }

        let start = base + offset;
        program_cells(&mut self.blocks[block].data[start..start + data.len()], data);
        Ok(())
    }

    fn read_spare(&mut self, page: u32, offset: usize, buf: &mut [u8]) -> Result<(), NandError> {
        let (block, _, base) = self.locate(page)?;
        Self::check_span(page, offset, buf.len(), self.layout.spare_bytes_per_page)?;

        let start = base + offset;
        buf.copy_from_slice(&self.blocks[block].spare[start..start + buf.len()]);
        Ok(())
    }

    fn program_spare(&mut self, page: u32, offset: usize, data: &[u8]) -> Result<(), NandError> {
        let (block, _, base) = self.locate(page)?;
        Self::check_span(page, offset, data.len(), self.layout.spare_bytes_per_page)?;

        self.stats.spare_programs += 1;
        if self.faults.spare_programs || self.faults.spare_program_pages.contains(&page) {
            return Err(NandError::Fail);
        }

        let start = base + offset;
        program_cells(
            &mut self.blocks[block].spare[start..start + data.len()],
            data,
        );
        Ok(())
    }

    fn erase_block(&mut self, block: u32) -> Result<(), NandError> {
        if block >= self.layout.blocks {
            return Err(NandError::BlockOutOfRange { block });
        }

        self.stats.erases += 1;
        if self.faults.erase_blocks.contains(&block) {
            return Err(NandError::Fail);
        }

        self.blocks[block as usize].erase();
        Ok(())
    }

    fn copy_back(&mut self, src_page: u32, dst_page: u32) -> Result<(), NandError> {
        let (src_block, src_base, src_spare) = self.locate(src_page)?;
        let (dst_block, dst_base, dst_spare) = self.locate(dst_page)?;

        self.stats.copy_backs += 1;
        if self.faults.copy_back {
            return Err(NandError::Fail);
        }

        let page_len = self.layout.bytes_per_page;
        let spare_len = self.layout.spare_bytes_per_page;

        let data: Vec<u8> = self.blocks[src_block].data[src_base..src_base + page_len].to_vec();
        let spare: Vec<u8> = self.blocks[src_block].spare[src_spare..src_spare + spare_len].to_vec();

        let dst = &mut self.blocks[dst_block];
        program_cells(&mut dst.data[dst_base..dst_base + page_len], &data);
        program_cells(&mut dst.spare[dst_spare..dst_spare + spare_len], &spare);
        Ok(())
    }

    fn copy_back_merge(
        &mut self,
        src_page: u32,
        dst_page: u32,
        data: &[u8],
        offset: usize,
    ) -> Result<(), NandError> {
        Self::check_span(src_page, offset, data.len(), self.layout.bytes_per_page)?;
        let (src_block, src_base, src_spare) = self.locate(src_page)?;
        let (dst_block, dst_base, dst_spare) = self.locate(dst_page)?;

        self.stats.copy_backs += 1;
        if self.faults.copy_back {
            return Err(NandError::Fail);
        }

        let page_len = self.layout.bytes_per_page;
        let spare_len = self.layout.spare_bytes_per_page;

        // The merged bytes replace the source's in the device-internal page
        // buffer before it is programmed, they are not ANDed over them.
        let mut page: Vec<u8> = self.blocks[src_block].data[src_base..src_base + page_len].to_vec();
        page[offset..offset + data.len()].copy_from_slice(data);
        let spare: Vec<u8> = self.blocks[src_block].spare[src_spare..src_spare + spare_len].to_vec();

        let dst = &mut self.blocks[dst_block];
        program_cells(&mut dst.data[dst_base..dst_base + page_len], &page);
        program_cells(&mut dst.spare[dst_spare..dst_spare + spare_len], &spare);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nand::PageUtil;

    const TEST_LAYOUT: NandLayout = NandLayout {
        blocks: 8,
        pages_per_block: 16,
        bytes_per_page: 256,
        spare_bytes_per_page: 16,
    };

    #[test]
    fn test_program_clears_bits_only() {
        let mut nand = SimNand::new(TEST_LAYOUT);

        nand.program_page(3, 0, &[0xF0, 0x0F]).unwrap();
        nand.program_page(3, 0, &[0x0F, 0xFF]).unwrap();

        let mut buf = [0u8; 2];
        nand.read_page(3, 0, &mut buf).unwrap();
        assert_eq!(buf, [0x00, 0x0F]);

        nand.erase_block(0).unwrap();
        nand.read_page(3, 0, &mut buf).unwrap();
        assert!(buf.is_erased());
    }

    #[test]
    fn test_copy_back_carries_spare() {
        let mut nand = SimNand::new(TEST_LAYOUT);

        nand.program_page(5, 4, &[0xAA; 8]).unwrap();
        nand.program_spare(5, 0, &[0x12, 0x34]).unwrap();

        // Copy page 5 of block 0 into the same slot of block 2
        let dst = 2 * TEST_LAYOUT.pages_per_block + 5;
        nand.copy_back(5, dst).unwrap();

        let mut buf = [0u8; 8];
        nand.read_page(dst, 4, &mut buf).unwrap();
        assert_eq!(buf, [0xAA; 8]);

        let mut spare = [0u8; 2];
        nand.read_spare(dst, 0, &mut spare).unwrap();
        assert_eq!(spare, [0x12, 0x34]);
    }

    #[test]
    fn test_copy_back_merge_substitutes() {
        let mut nand = SimNand::new(TEST_LAYOUT);

        nand.program_page(0, 0, &[0x11; 16]).unwrap();

        let dst = TEST_LAYOUT.pages_per_block; // block 1, page 0
        nand.copy_back_merge(0, dst, &[0x22; 4], 8).unwrap();

        // The merged bytes replace the source's, even where the source was
        // not blank; everything else is copied through.
        let mut buf = [0u8; 16];
        nand.read_page(dst, 0, &mut buf).unwrap();
        let mut expected = [0x11u8; 16];
        expected[8..12].fill(0x22);
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_fault_injection() {
        let mut nand = SimNand::new(TEST_LAYOUT);

        nand.faults.program_blocks.insert(1);
        let page = TEST_LAYOUT.pages_per_block;
        assert_eq!(nand.program_page(page, 0, &[0u8; 4]), Err(NandError::Fail));
        assert!(nand.program_page(0, 0, &[0u8; 4]).is_ok());

        nand.faults.erase_blocks.insert(0);
        assert_eq!(nand.erase_block(0), Err(NandError::Fail));
        assert!(nand.erase_block(1).is_ok());

        nand.faults.copy_back = true;
        assert_eq!(nand.copy_back(0, page), Err(NandError::Fail));

        nand.faults.spare_programs = true;
        assert_eq!(nand.program_spare(0, 0, &[0u8; 1]), Err(NandError::Fail));
    }

    #[test]
    fn test_bounds() {
        let mut nand = SimNand::new(TEST_LAYOUT);
        let pages = TEST_LAYOUT.blocks * TEST_LAYOUT.pages_per_block;

        let mut buf = [0u8; 4];
        assert!(matches!(
            nand.read_page(pages, 0, &mut buf),
            Err(NandError::PageOutOfRange { .. })
        ));
        assert!(matches!(
            nand.read_page(0, TEST_LAYOUT.bytes_per_page - 2, &mut buf),
            Err(NandError::PageOutOfRange { .. })
        ));
        assert!(matches!(
            nand.erase_block(TEST_LAYOUT.blocks),
            Err(NandError::BlockOutOfRange { .. })
        ));
    }

    #[test]
    fn test_load_save_round_trip() {
        let mut nand = SimNand::new(TEST_LAYOUT);
        nand.load(&mut std::io::repeat(0x55)).unwrap();

        let mut buf = [0u8; 16];
        nand.read_page(0, 0, &mut buf).unwrap();
        assert_eq!(buf, [0x55; 16]);

        let mut image = Vec::new();
        nand.save(&mut image).unwrap();
        let block_bytes = TEST_LAYOUT.bytes_per_page * TEST_LAYOUT.pages_per_block as usize;
        assert_eq!(image.len(), block_bytes * TEST_LAYOUT.blocks as usize);
        assert!(image.iter().all(|&x| x == 0x55));
    }
}
