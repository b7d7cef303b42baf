pub mod chunk;
pub mod key;
pub mod merge;
pub mod read;
pub mod scan;
pub mod table;

use std::error::Error;
use std::fs::File;
use std::io;
use std::ops::Range;
use std::path::PathBuf;
use std::thread;

use memmap2::MmapOptions;

use crate::scan::Kernel;
use crate::table::TableSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Pread,
    Mmap,
}

#[derive(Clone, Debug)]
pub struct Options {
    pub path: PathBuf,
    pub strategy: Strategy,
    pub nothreads: bool,
    pub workers: Option<usize>, // None applies the size/core policy
    pub verbose: bool,
}

impl Options {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            strategy: Strategy::Pread,
            nothreads: false,
            workers: None,
            verbose: false,
        }
    }
}

pub fn solve(opts: &Options) -> Result<String, Box<dyn Error>> {
    let file = File::open(&opts.path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok("{}\n".to_string());
    }

    let workers = opts.workers.unwrap_or_else(|| chunk::default_workers(len)).max(1);
    let ranges = chunk::split_ranges(&file, len, workers)?;
    let kernel = scan::detect_kernel();

    let sets = match opts.strategy {
        Strategy::Pread => run_pread(opts, &ranges, kernel)?,
        Strategy::Mmap => run_mmap(opts, &file, &ranges, kernel)?,
    };

    if opts.verbose {
        for (i, set) in sets.iter().enumerate() {
            eprintln!(
                "worker {i}: {} stations ({} short / {} mid / {} long), {} rows, longest chain {}",
                set.station_count(),
                set.short.len(),
                set.mid.len(),
                set.long.len(),
                set.row_count(),
                set.longest_chain()
            );
        }
    }

    let global = merge::merge(&sets);
    Ok(merge::render(&global))
}

fn run_pread(opts: &Options, ranges: &[Range<u64>], kernel: Kernel) -> io::Result<Vec<TableSet>> {
    if opts.nothreads {
        let mut sets = Vec::with_capacity(ranges.len());
        for r in ranges {
            sets.push(read::process_range_pread(&opts.path, r.clone(), kernel)?);
        }
        return Ok(sets);
    }

    let (tail, heads) = ranges.split_last().unwrap();
    let mut sets = Vec::with_capacity(ranges.len());
    thread::scope(|scope| -> io::Result<()> {
        let mut handles = Vec::with_capacity(heads.len());
        for r in heads {
            let path = &opts.path;
            handles.push(scope.spawn(move || {
                read::process_range_pread(path, r.clone(), kernel)
                    .unwrap_or_else(|e| panic!("worker failed reading {r:?}: {e}"))
            }));
        }
        // the caller is a worker too; it always takes the final range
        let tail_set = read::process_range_pread(&opts.path, tail.clone(), kernel)?;
        for h in handles {
            sets.push(h.join().unwrap());
        }
        sets.push(tail_set);
        Ok(())
    })?;
    Ok(sets)
}

fn run_mmap(
    opts: &Options,
    file: &File,
    ranges: &[Range<u64>],
    kernel: Kernel,
) -> io::Result<Vec<TableSet>> {
    let mmap = unsafe { MmapOptions::new().map(file)? };
    let data: &[u8] = &mmap;

    // The final range still goes through positional reads on the caller
    // thread, which keeps every mapped slice bounded away from EOF.
    let (tail, heads) = ranges.split_last().unwrap();
    let mut sets = Vec::with_capacity(ranges.len());

    if opts.nothreads {
        for r in heads {
            sets.push(read::process_range_mmap(
                data,
                r.start as usize..r.end as usize,
                kernel,
            ));
        }
        sets.push(read::process_range_pread(&opts.path, tail.clone(), kernel)?);
        return Ok(sets);
    }

    thread::scope(|scope| -> io::Result<()> {
        let mut handles = Vec::with_capacity(heads.len());
        for r in heads {
            handles.push(
                scope.spawn(move || {
                    read::process_range_mmap(data, r.start as usize..r.end as usize, kernel)
                }),
            );
        }
        let tail_set = read::process_range_pread(&opts.path, tail.clone(), kernel)?;
        for h in handles {
            sets.push(h.join().unwrap());
        }
        sets.push(tail_set);
        Ok(())
    })?;
    Ok(sets)
}
