//! Interactive driver converting one LDM dynamic disk in place.

use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use ldm2basic::disk::{BlockIo, LogicalBlockSize};
use ldm2basic::ldm::resolve::PartitionRange;
use ldm2basic::mbr::{DiskScheme, Mbr};
use ldm2basic::{partition_types, rewrite, scan_gpt, scan_mbr};

/// Convert a Windows LDM dynamic disk into plain basic partitions.
#[derive(Debug, Parser)]
#[command(name = "ldm2basic", version, about)]
struct Args {
    /// Block device or disk image to convert, opened read-write.
    device: PathBuf,

    /// Logical sector size of the device (512 or 4096).
    #[arg(long, default_value_t = 512)]
    sector_size: u64,
}

fn confirm(prompt: &str) -> io::Result<bool> {
    println!("{prompt} (yes or no)");
    io::stdout().flush()?;

    let mut reply = String::new();
    io::stdin().lock().read_line(&mut reply)?;
    Ok(reply.trim() == "yes")
}

fn print_ranges(ranges: &[PartitionRange]) {
    for (i, range) in ranges.iter().enumerate() {
        println!(
            "partition {}: start={} size={} part type={:#04x}",
            i, range.start, range.size, range.part_type
        );
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let sector_size = LogicalBlockSize::try_from(args.sector_size)?;

    println!("Warning: save a copy of the current partition table with another tool first!");
    if !confirm("continue?")? {
        println!("exit.");
        return Ok(());
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&args.device)?;
    let mut io = BlockIo::new(file, sector_size);

    let mut boot = Mbr::read_from(&mut io)?;
    match boot.scheme()? {
        DiskScheme::Gpt => {
            println!("Info: {} uses GPT", args.device.display());

            let mut scan = scan_gpt(&mut io)?;
            if scan.ranges.is_empty() {
                println!("no LDM metadata found, nothing to convert.");
                return Ok(());
            }
            for entry in scan.entries.iter().filter(|e| e.is_ldm()) {
                if let Some(kind) = partition_types::lookup(&entry.type_guid) {
                    println!(
                        "Info: {} at LBA {}..{}",
                        kind.desc, entry.first_lba, entry.last_lba
                    );
                }
            }

            print_ranges(&scan.ranges);
            if !confirm("are you sure to save the new partition table shown above?")? {
                println!("exit.");
                return Ok(());
            }
            rewrite::rewrite_gpt(&mut io, &mut scan.entries, &scan.ranges)?;
        }
        DiskScheme::LdmMbr => {
            println!("Info: {} uses MBR", args.device.display());

            let ranges = scan_mbr(&mut io)?;
            if ranges.is_empty() {
                println!("no LDM partitions found, nothing to convert.");
                return Ok(());
            }

            print_ranges(&ranges);
            if !confirm("are you sure to save the new partition table shown above?")? {
                println!("exit.");
                return Ok(());
            }
            rewrite::rewrite_mbr(&mut io, &mut boot, &ranges)?;
        }
    }

    println!("done.");
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
