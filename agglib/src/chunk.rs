use std::fs::File;
use std::io;
use std::ops::Range;
use std::os::unix::fs::FileExt;

use memchr::memchr;

// No worker range nominally exceeds 2 GiB.
pub const RANGE_SPAN: u64 = 1 << 31;

// Probe window for boundary snapping; longer than any legal record.
const PROBE: usize = 256;

// max(ceil(len / 2^31), cores - (cores < 16 ? 2 : 1)); the caller thread
// counts as one of the workers.
pub fn default_workers(len: u64) -> usize {
    let cores = rayon::current_num_threads().max(1);
    let reserve = if cores < 16 { 2 } else { 1 };
    let by_cores = cores.saturating_sub(reserve).max(1);
    let by_size = len.div_ceil(RANGE_SPAN).max(1) as usize;
    by_size.max(by_cores)
}

// Up to `workers` contiguous ranges, each ending just past a newline. Tiny
// files collapse to fewer ranges.
pub fn split_ranges(file: &File, len: u64, workers: usize) -> io::Result<Vec<Range<u64>>> {
    let workers = workers.max(1);
    let target = len / workers as u64;
    let mut ranges = Vec::with_capacity(workers);
    let mut probe = [0u8; PROBE];
    let mut start = 0u64;

    for i in 1..workers as u64 {
        let nominal = target * i;
        if nominal <= start {
            continue;
        }
        let n = file.read_at(&mut probe, nominal)?;
        let Some(j) = memchr(b'\n', &probe[..n]) else {
            continue;
        };
        let end = nominal + j as u64 + 1;
        ranges.push(start..end);
        start = end;
    }
    if start < len {
        ranges.push(start..len);
    }
    if ranges.is_empty() {
        ranges.push(0..len);
    }
    Ok(ranges)
}
