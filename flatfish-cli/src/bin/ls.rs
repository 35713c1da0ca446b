use std::process::ExitCode;

use clap::Parser;
use flatfish::{Archive, SquashfsError};
use flatfish_cli::{config_from_args, mode_string};
use tracing_subscriber::EnvFilter;

/// tool to list directories of squashfs filesystems
#[derive(Parser)]
#[command(author, version, name = "ls-flatfish", max_term_width = 98)]
struct Args {
    /// Squashfs image: a file path or an http(s) url
    image: String,

    /// Directory to list
    #[arg(default_value = "/")]
    path: String,

    /// Show mode, uid/gid, and size
    #[arg(short, long)]
    long: bool,

    /// Read granularity for file/url sources, in bytes
    #[arg(long, name = "BYTES")]
    mapper_block_size: Option<usize>,

    /// Entries kept in the decoded-block cache
    #[arg(long, name = "ENTRIES")]
    lru_size: Option<usize>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ls-flatfish: {e}");
            ExitCode::from(e.report_code())
        }
    }
}

fn run(args: &Args) -> Result<(), SquashfsError> {
    let config = config_from_args(args.mapper_block_size, args.lru_size);
    let archive = Archive::open_with_config(&args.image, config)?;

    let inode = archive.inode_by_path(&args.path)?;
    let mut dir = inode.directory()?;
    while dir.advance()? {
        let name = String::from_utf8_lossy(dir.name()).into_owned();
        if args.long {
            let entry = dir.load_inode()?;
            println!(
                "{} {:>8} {:>8} {:>10} {name}",
                mode_string(entry.id(), entry.permissions()),
                entry.uid()?,
                entry.gid()?,
                entry.file_size(),
            );
        } else {
            println!("{name}");
        }
    }
    Ok(())
}
