//! A small flash-translation layer for raw NAND devices.
//!
//! [`nand`] defines the device abstraction (and an in-memory simulator);
//! [`ftl`] maps a linear logical address space onto it, handling bad
//! blocks, spare-area block metadata, and copy-back relocation of blocks
//! that can no longer take an in-place program.

pub mod ftl;
pub mod nand;

pub use ftl::{Ftl, FtlError, ScanVerdict, DEFAULT_SCAN_CYCLES};
pub use nand::{Nand, NandError, NandLayout, NandStatus, SimNand};
