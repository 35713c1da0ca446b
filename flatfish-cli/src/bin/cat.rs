use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use flatfish::{Archive, SquashfsError};
use flatfish_cli::config_from_args;
use tracing_subscriber::EnvFilter;

/// tool to print files of squashfs filesystems to stdout
#[derive(Parser)]
#[command(author, version, name = "cat-flatfish", max_term_width = 98)]
struct Args {
    /// Squashfs image: a file path or an http(s) url
    image: String,

    /// Files to print, in order
    #[arg(required = true)]
    paths: Vec<String>,

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
            eprintln!("cat-flatfish: {e}");
            ExitCode::from(e.report_code())
        }
    }
}

fn run(args: &Args) -> Result<(), SquashfsError> {
    let config = config_from_args(args.mapper_block_size, args.lru_size);
    let archive = Archive::open_with_config(&args.image, config)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for path in &args.paths {
        let content = archive.read_file(path)?;
        out.write_all(&content)?;
    }
    out.flush()?;
    Ok(())
}
