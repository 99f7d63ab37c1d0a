use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use fatvfs::{BlockSize, FatClass, FileSystem, Geometry};
use vfsh::Shell;

mod logger;

#[derive(Parser)]
#[command(name = "vfsh", about = "Shell over a single-file virtual file system")]
struct Args {
    /// Block size in bytes for a new image (256, 512 or 1024)
    #[arg(short, long, default_value = "512", value_parser = parse_block_size)]
    block_size: BlockSize,

    /// FAT class for a new image (8, 10 or 12)
    #[arg(short, long, default_value = "10", value_parser = parse_fat_class)]
    fat: FatClass,

    /// Log to stderr; repeat for more detail
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Image file, created if it does not exist
    filesystem: PathBuf,
}

fn parse_block_size(value: &str) -> Result<BlockSize, String> {
    value
        .parse()
        .ok()
        .and_then(BlockSize::from_bytes)
        .ok_or_else(|| format!("invalid block size ({}), expected 256, 512 or 1024", value))
}

fn parse_fat_class(value: &str) -> Result<FatClass, String> {
    value
        .parse()
        .ok()
        .and_then(FatClass::from_class)
        .ok_or_else(|| format!("invalid fat type ({}), expected 8, 10 or 12", value))
}

fn main() -> ExitCode {
    let args = Args::parse();
    logger::init(match args.verbose {
        0 => log::LevelFilter::Off,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    });

    let geometry = Geometry::new(args.block_size, args.fat);
    if !args.filesystem.exists() {
        println!(
            "vfsh: formatting virtual file-system ({} bytes) ... please wait",
            geometry.image_len()
        );
    }

    let fs = match FileSystem::open(&args.filesystem, geometry) {
        Ok(fs) => fs,
        Err(err) => {
            eprintln!("vfsh: {}: {}", args.filesystem.display(), err);
            return ExitCode::FAILURE;
        }
    };

    let mut shell = Shell::new(fs);
    if let Err(err) = shell.run(&mut io::stdin().lock(), &mut io::stdout().lock()) {
        eprintln!("vfsh: {}", err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
