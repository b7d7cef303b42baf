use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;

use agglib::{Options, Strategy};

#[derive(Parser, Debug)]
struct Args {
    measurements: PathBuf,

    // run the whole pipeline ten times in-process for profile collection
    #[arg(long)]
    pgo: bool,

    #[arg(long)]
    nothreads: bool,

    #[arg(long, conflicts_with = "nommap")]
    mmap: bool,

    #[arg(long)]
    nommap: bool,

    #[arg(short, long)]
    verbose: bool,

    #[arg(short = 't', long)]
    time: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut opts = Options::new(&args.measurements);
    opts.nothreads = args.nothreads;
    opts.verbose = args.verbose;
    if args.mmap {
        opts.strategy = Strategy::Mmap;
    } else if args.nommap {
        opts.strategy = Strategy::Pread;
    }

    let started = Instant::now();
    let runs = if args.pgo { 10 } else { 1 };
    let mut out = String::new();
    for _ in 0..runs {
        out = agglib::solve(&opts)
            .map_err(|e| anyhow::anyhow!("{}: {e}", args.measurements.display()))?;
    }
    print!("{out}");

    if args.time {
        println!("Elapsed in {} ms", started.elapsed().as_millis());
    }
    Ok(())
}
