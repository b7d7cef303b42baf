use std::fs::File;
use std::io;
use std::ops::Range;
use std::os::unix::fs::FileExt;
use std::path::Path;

use memchr::memrchr;

use crate::scan::{scan, Kernel, Scratch};
use crate::table::TableSet;

pub const READ_CHUNK: usize = 256 * 1024;
// Longer than any legal record (100-byte name + ";-99.9\n").
pub const CARRY: usize = 256;
pub const TAIL_SLACK: usize = 32;

pub fn process_range_pread(path: &Path, range: Range<u64>, kernel: Kernel) -> io::Result<TableSet> {
    // Independent handle per worker; a shared handle serializes reads at the
    // OS level on some platforms.
    let file = File::open(path)?;
    let mut tables = TableSet::new();
    let mut scratch = Scratch::new();
    let mut buf = vec![0u8; CARRY + READ_CHUNK + TAIL_SLACK];
    let mut offset = range.start;
    let mut carry = 0usize;

    while offset < range.end {
        let want = READ_CHUNK.min((range.end - offset) as usize);
        let mut filled = 0usize;
        while filled < want {
            let n = file.read_at(&mut buf[CARRY + filled..CARRY + want], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        offset += filled as u64;

        let head = CARRY - carry;
        let valid_end = CARRY + filled;
        if offset < range.end {
            let cut = match memrchr(b'\n', &buf[head..valid_end]) {
                Some(p) => head + p + 1,
                None => valid_end,
            };
            scan(kernel, &buf[head..cut], &mut tables, &mut scratch);
            // carry the partial record in front of the next read
            let rem = valid_end - cut;
            buf.copy_within(cut..valid_end, CARRY - rem);
            carry = rem;
        } else {
            scan(kernel, &buf[head..valid_end], &mut tables, &mut scratch);
            carry = 0;
        }
    }
    Ok(tables)
}

pub fn process_range_mmap(data: &[u8], range: Range<usize>, kernel: Kernel) -> TableSet {
    let mut tables = TableSet::new();
    let mut scratch = Scratch::new();
    scan(kernel, &data[range], &mut tables, &mut scratch);
    tables
}
