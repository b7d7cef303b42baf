use std::fmt::Write as FmtWrite;

use ahash::AHashMap;

use crate::table::{Accumulator, TableSet};

pub fn merge(sets: &[TableSet]) -> AHashMap<Vec<u8>, Accumulator> {
    let stations = sets.iter().map(|s| s.station_count()).max().unwrap_or(0);
    let mut global = AHashMap::with_capacity(stations);
    for set in sets {
        set.merge_into(&mut global);
    }
    global
}

// Integer tenths rounded half away from zero.
#[inline]
fn mean_tenths(sum_scaled: i64, count: u64) -> i64 {
    let denom = count as i64;
    if sum_scaled >= 0 {
        (sum_scaled + denom / 2) / denom
    } else {
        -((-sum_scaled + denom / 2) / denom)
    }
}

// {name=min/mean/max, ...}\n, stations in ascending byte order.
pub fn render(global: &AHashMap<Vec<u8>, Accumulator>) -> String {
    let mut names: Vec<&Vec<u8>> = global.keys().collect();
    names.sort_unstable();

    let mut out = String::with_capacity(names.len().saturating_mul(32) + 3);
    out.push('{');
    for (idx, name) in names.iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        let acc = &global[*name];
        let mean_t = mean_tenths(acc.sum, acc.count);
        let _ = write!(
            out,
            "{}={:.1}/{:.1}/{:.1}",
            String::from_utf8_lossy(name),
            acc.min as f32 / 10.0,
            mean_t as f32 / 10.0,
            acc.max as f32 / 10.0
        );
    }
    out.push_str("}\n");
    out
}
