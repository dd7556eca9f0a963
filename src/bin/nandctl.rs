//! Maintenance tool for NAND images managed by the flash-translation layer.
//!
//! Operates on a file-backed simulated device, so formatting, block
//! qualification, and map inspection can be exercised without hardware:
//!
//! ```text
//! nandctl --image nand.bin --layout 1024x64x2048 format
//! nandctl --image nand.bin --layout 1024x64x2048 --write-back scan 17
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use std::fs::File;
use std::path::PathBuf;

use nand_ftl::{Ftl, Nand, NandLayout, ScanVerdict, SimNand, DEFAULT_SCAN_CYCLES};

#[derive(Parser, Debug)]
#[command(about = "Inspect and maintain FTL-managed NAND images")]
struct Cli {
    #[clap(flatten)]
    nand: NandOptions,

    /// Log chattiness; repeat for more
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct NandOptions {
    /// Path to the NAND image; created blank if it does not exist
    #[clap(long)]
    image: PathBuf,

    /// Layout of the device, as BLOCKSxPAGESxBYTES[xSPARE]
    #[clap(long)]
    layout: NandLayout,

    /// Write the image back when done (spare-area state is not persisted)
    #[clap(long)]
    write_back: bool,
}

impl NandOptions {
    fn open(&self) -> Result<SimNand> {
        let mut sim = SimNand::new(self.layout);
        if self.image.exists() {
            sim.load(&mut File::open(&self.image)?)
                .with_context(|| format!("loading image {}", self.image.display()))?;
        }

        Ok(sim)
    }

    fn close(&self, sim: SimNand) -> Result<()> {
        if self.write_back {
            sim.save(&mut File::create(&self.image)?)
                .with_context(|| format!("saving image {}", self.image.display()))?;
        }

        Ok(())
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Erase everything and assign logical block numbers from scratch
    Format,

    /// Show chip ID, layout, and formatted capacity
    Info,

    /// Draw a map of every block's good/bad status
    BadBlocks,

    /// Hex-dump one physical page, main and spare areas
    Dump {
        /// Global page number
        page: u32,
    },

    /// Stress-test a block with repeated erase/program/verify cycles
    /// (destroys its contents)
    Scan {
        /// Physical block number
        block: u32,

        /// Erase/program/verify rounds to run
        #[clap(long, default_value_t = DEFAULT_SCAN_CYCLES)]
        cycles: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let mut ftl = Ftl::new(cli.nand.open()?)?;

    match cli.command {
        Command::Format => {
            ftl.format()?;
            println!(
                "formatted: {} logical blocks, {} bytes",
                ftl.valid_data_blocks(),
                ftl.format_capacity()
            );
        }

        Command::Info => {
            let layout = ftl.layout();
            println!("chip ID:  {:#010x}", ftl.chip_id()?);
            println!(
                "layout:   {} blocks x {} pages x {} bytes (+{} spare)",
                layout.blocks,
                layout.pages_per_block,
                layout.bytes_per_page,
                layout.spare_bytes_per_page
            );
            match ftl.build_lut() {
                Ok(()) => println!("capacity: {} bytes", ftl.format_capacity()),
                Err(err) => println!("capacity: n/a ({err})"),
            }
        }

        Command::BadBlocks => {
            let blocks = ftl.layout().blocks;
            let mut bad = 0;
            for block in 0..blocks {
                if block % 64 == 0 {
                    print!("\n{block:6}: ");
                }
                if ftl.is_bad(block)? {
                    bad += 1;
                    print!("X");
                } else {
                    print!(".");
                }
            }
            println!("\n\n{bad} bad of {blocks} blocks");
        }

        Command::Dump { page } => {
            let layout = ftl.layout();
            let mut data = vec![0u8; layout.bytes_per_page];
            let mut spare = vec![0u8; layout.spare_bytes_per_page];

            let nand = ftl.device_mut();
            nand.read_page(page, 0, &mut data)?;
            nand.read_spare(page, 0, &mut spare)?;

            println!(
                "page {page} (block {}, page {}):",
                page / layout.pages_per_block,
                page % layout.pages_per_block
            );
            hex_dump(&data);
            println!("spare:");
            hex_dump(&spare);
        }

        Command::Scan { block, cycles } => match ftl.scan_block(block, cycles)? {
            ScanVerdict::Healthy => println!("block {block}: healthy ({cycles} cycles)"),
            ScanVerdict::Failed => {
                ftl.mark_bad(block);
                println!("block {block}: FAILED, marked bad");
            }
        },
    }

    cli.nand.close(ftl.into_device())
}

/// Classic 16-bytes-per-row hex dump
fn hex_dump(bytes: &[u8]) {
    for (row, chunk) in bytes.chunks(16).enumerate() {
        print!("{:06x}: ", row * 16);
        for byte in chunk {
            print!("{byte:02x} ");
        }
        println!();
    }
}
