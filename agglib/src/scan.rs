use memchr::memchr;

use crate::table::TableSet;

pub const SCRATCH_LEN: usize = 128;

// Per-worker staging area for names longer than one SIMD block.
#[repr(align(32))]
pub struct Scratch(pub [u8; SCRATCH_LEN]);

impl Scratch {
    pub fn new() -> Self {
        Scratch([0u8; SCRATCH_LEN])
    }
}

impl Default for Scratch {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kernel {
    Wide32, // 32-byte AVX2 blocks
    Wide16, // 16-byte SSE2 blocks
    Scalar, // memchr per record
}

#[allow(unreachable_code)]
pub fn detect_kernel() -> Kernel {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            return Kernel::Wide32;
        }
        return Kernel::Wide16;
    }
    Kernel::Scalar
}

// Every kernel runnable on this machine, widest last.
pub fn available_kernels() -> Vec<Kernel> {
    let mut kernels = vec![Kernel::Scalar];
    #[cfg(target_arch = "x86_64")]
    {
        kernels.push(Kernel::Wide16);
        if is_x86_feature_detected!("avx2") {
            kernels.push(Kernel::Wide32);
        }
    }
    kernels
}

pub fn scan(kernel: Kernel, buf: &[u8], tables: &mut TableSet, scratch: &mut Scratch) {
    match kernel {
        #[cfg(target_arch = "x86_64")]
        Kernel::Wide32 => unsafe { x86::scan_avx2(buf, tables, scratch) },
        #[cfg(target_arch = "x86_64")]
        Kernel::Wide16 => unsafe { x86::scan_sse2(buf, tables, scratch) },
        _ => {
            let _ = scratch;
            scan_scalar(buf, 0, tables);
        }
    }
}

// Also finishes the tail records for the SIMD kernels, which hand over as
// soon as a block load would cross the end of the slice. A record with no
// semicolon ends the walk; a trailing bare newline yields zero records.
fn scan_scalar(buf: &[u8], mut cursor: usize, tables: &mut TableSet) {
    while cursor < buf.len() {
        let Some(rel) = memchr(b';', &buf[cursor..]) else {
            break;
        };
        let name = &buf[cursor..cursor + rel];
        let (temp, next) = parse_temp(buf, cursor + rel + 1);
        tables.update(name, temp);
        cursor = next;
    }
}

// Returns tenths and the cursor just past the newline. Assumes exactly one
// fractional digit.
#[inline]
fn parse_temp(buf: &[u8], mut cursor: usize) -> (i32, usize) {
    let mut sign = 1i32;
    let mut t = 0i32;
    while cursor < buf.len() {
        let b = buf[cursor];
        cursor += 1;
        match b {
            b'\n' => break,
            b'-' => sign = -1,
            b'.' => {}
            d => t = t * 10 + (d - b'0') as i32,
        }
    }
    (sign * t, cursor)
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    use std::arch::x86_64::*;

    use super::{parse_temp, scan_scalar, Scratch, SCRATCH_LEN};
    use crate::key::{Key128, Key16, Key32};
    use crate::table::TableSet;

    const BLOCK32: usize = 32;
    const BLOCK16: usize = 16;

    #[target_feature(enable = "avx2")]
    pub unsafe fn scan_avx2(buf: &[u8], tables: &mut TableSet, scratch: &mut Scratch) {
        let len = buf.len();
        let base = buf.as_ptr();
        let semis = _mm256_set1_epi8(b';' as i8);
        let iota = _mm256_setr_epi8(
            0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22,
            23, 24, 25, 26, 27, 28, 29, 30, 31,
        );

        let mut cursor = 0usize;
        while cursor < len {
            let name_start = cursor;
            let mut pos = cursor;
            let mut k = 0usize;
            let (o, masked) = loop {
                if pos + BLOCK32 > len {
                    scan_scalar(buf, name_start, tables);
                    return;
                }
                let block = _mm256_loadu_si256(base.add(pos) as *const __m256i);
                let m = _mm256_movemask_epi8(_mm256_cmpeq_epi8(block, semis)) as u32;
                if m != 0 {
                    let o = m.trailing_zeros() as usize;
                    // keep lanes below the semicolon, zero the rest
                    let keep = _mm256_cmpgt_epi8(_mm256_set1_epi8(o as i8), iota);
                    break (o, _mm256_and_si256(block, keep));
                }
                if k < SCRATCH_LEN / BLOCK32 {
                    _mm256_storeu_si256(
                        scratch.0.as_mut_ptr().add(k * BLOCK32) as *mut __m256i,
                        block,
                    );
                }
                k += 1;
                pos += BLOCK32;
            };
            let name_len = pos + o - name_start;
            let (temp, next) = parse_temp(buf, pos + o + 1);
            cursor = next;

            if k == 0 {
                if name_len <= 16 {
                    let mut key = Key16([0u8; 16]);
                    _mm_storeu_si128(
                        key.0.as_mut_ptr() as *mut __m128i,
                        _mm256_castsi256_si128(masked),
                    );
                    tables.short.lookup_or_insert(key).add(temp);
                } else {
                    let mut key = Key32([0u8; 32]);
                    _mm256_storeu_si256(key.0.as_mut_ptr() as *mut __m256i, masked);
                    tables.mid.lookup_or_insert(key).add(temp);
                }
            } else {
                if k < SCRATCH_LEN / BLOCK32 {
                    _mm256_storeu_si256(
                        scratch.0.as_mut_ptr().add(k * BLOCK32) as *mut __m256i,
                        masked,
                    );
                }
                if name_len <= 32 {
                    // the semicolon led its block; the first block is the key
                    let key = Key32(scratch.0[..32].try_into().unwrap());
                    tables.mid.lookup_or_insert(key).add(temp);
                } else {
                    let tail = ((k + 1) * BLOCK32).min(SCRATCH_LEN);
                    scratch.0[tail..].fill(0);
                    tables.long.lookup_or_insert(Key128(scratch.0)).add(temp);
                }
            }
        }
    }

    // SSE2 is baseline on x86_64, so no runtime gate is needed here.
    pub unsafe fn scan_sse2(buf: &[u8], tables: &mut TableSet, scratch: &mut Scratch) {
        let len = buf.len();
        let base = buf.as_ptr();
        let semis = _mm_set1_epi8(b';' as i8);
        let iota = _mm_setr_epi8(0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15);

        let mut cursor = 0usize;
        while cursor < len {
            let name_start = cursor;
            let mut pos = cursor;
            let mut k = 0usize;
            let (o, masked) = loop {
                if pos + BLOCK16 > len {
                    scan_scalar(buf, name_start, tables);
                    return;
                }
                let block = _mm_loadu_si128(base.add(pos) as *const __m128i);
                let m = _mm_movemask_epi8(_mm_cmpeq_epi8(block, semis)) as u32;
                if m != 0 {
                    let o = m.trailing_zeros() as usize;
                    let keep = _mm_cmpgt_epi8(_mm_set1_epi8(o as i8), iota);
                    break (o, _mm_and_si128(block, keep));
                }
                if k < SCRATCH_LEN / BLOCK16 {
                    _mm_storeu_si128(
                        scratch.0.as_mut_ptr().add(k * BLOCK16) as *mut __m128i,
                        block,
                    );
                }
                k += 1;
                pos += BLOCK16;
            };
            let name_len = pos + o - name_start;
            let (temp, next) = parse_temp(buf, pos + o + 1);
            cursor = next;

            if k == 0 {
                // o < 16, so a first-block hit is always a short name
                let mut key = Key16([0u8; 16]);
                _mm_storeu_si128(key.0.as_mut_ptr() as *mut __m128i, masked);
                tables.short.lookup_or_insert(key).add(temp);
            } else {
                if k < SCRATCH_LEN / BLOCK16 {
                    _mm_storeu_si128(
                        scratch.0.as_mut_ptr().add(k * BLOCK16) as *mut __m128i,
                        masked,
                    );
                }
                if name_len <= 16 {
                    let key = Key16(scratch.0[..16].try_into().unwrap());
                    tables.short.lookup_or_insert(key).add(temp);
                } else if name_len <= 32 {
                    let key = Key32(scratch.0[..32].try_into().unwrap());
                    tables.mid.lookup_or_insert(key).add(temp);
                } else {
                    let tail = ((k + 1) * BLOCK16).min(SCRATCH_LEN);
                    scratch.0[tail..].fill(0);
                    tables.long.lookup_or_insert(Key128(scratch.0)).add(temp);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Accumulator;

    fn run_kernel(kernel: Kernel, input: &[u8]) -> Vec<(Vec<u8>, Accumulator)> {
        let mut tables = TableSet::new();
        let mut scratch = Scratch::new();
        scan(kernel, input, &mut tables, &mut scratch);
        let mut out = Vec::new();
        tables.for_each_station(|name, acc| out.push((name.to_vec(), *acc)));
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    const REFERENCE: &[u8] = b"Hamburg;12.0\nBulawayo;8.9\nPalembang;38.8\nSt. John's;15.2\nCracow;12.6\nBridgetown;26.9\nIstanbul;6.2\nRoseau;34.4\nConakry;31.2\nIstanbul;23.0\n";

    #[test]
    fn scalar_parses_reference_rows() {
        let got = run_kernel(Kernel::Scalar, REFERENCE);
        assert_eq!(got.len(), 9);
        let istanbul = got.iter().find(|(n, _)| n == b"Istanbul").unwrap();
        assert_eq!(istanbul.1.count, 2);
        assert_eq!(istanbul.1.sum, 292);
        assert_eq!(istanbul.1.min, 62);
        assert_eq!(istanbul.1.max, 230);
    }

    #[test]
    fn kernels_agree_on_mixed_widths() {
        let mut input = Vec::new();
        let long_ascii = "L".repeat(100);
        let long_multibyte = "Ä".repeat(50); // 100 bytes of UTF-8
        let names: Vec<&str> = vec![
            "A",
            "Hamburg",
            "SixteenByteName0",
            "SeventeenByteName",
            "ThirtyTwoByteStationNameHereOk!!",
            "ThirtyThreeByteStationNameHereOk!",
            "AaaaaaaaaaaaaaaaX",
            "AaaaaaaaaaaaaaaaY",
            &long_ascii,
            &long_multibyte,
        ];
        for (i, name) in names.iter().enumerate() {
            for temp in ["-99.9", "99.9", "0.0", "-3.7", "25.4"] {
                input.extend_from_slice(name.as_bytes());
                input.push(b';');
                input.extend_from_slice(temp.as_bytes());
                input.push(b'\n');
            }
            // stagger records so block offsets differ between names
            input.extend_from_slice(format!("pad{i};1.{}\n", i % 10).as_bytes());
        }

        let reference = run_kernel(Kernel::Scalar, &input);
        for kernel in available_kernels() {
            assert_eq!(
                run_kernel(kernel, &input),
                reference,
                "{kernel:?} diverged from scalar"
            );
        }
    }

    #[test]
    fn width_boundaries_route_to_shards() {
        let names = [
            ("F".repeat(16), (1usize, 0usize, 0usize)),
            ("G".repeat(17), (0, 1, 0)),
            ("H".repeat(32), (0, 1, 0)),
            ("I".repeat(33), (0, 0, 1)),
            ("J".repeat(100), (0, 0, 1)),
        ];
        for kernel in available_kernels() {
            for (name, (s, m, l)) in &names {
                let row = format!("{name};5.0\n");
                let mut tables = TableSet::new();
                let mut scratch = Scratch::new();
                scan(kernel, row.as_bytes(), &mut tables, &mut scratch);
                assert_eq!(
                    (tables.short.len(), tables.mid.len(), tables.long.len()),
                    (*s, *m, *l),
                    "{kernel:?} misrouted a {}-byte name",
                    name.len()
                );
            }
        }
    }

    #[test]
    fn temperature_extremes_and_sign() {
        for kernel in available_kernels() {
            let got = run_kernel(kernel, b"X;-99.9\nX;99.9\nY;-0.1\nY;0.1\n");
            let x = got.iter().find(|(n, _)| n == b"X").unwrap();
            assert_eq!((x.1.min, x.1.max, x.1.sum), (-999, 999, 0));
            let y = got.iter().find(|(n, _)| n == b"Y").unwrap();
            assert_eq!((y.1.min, y.1.max, y.1.sum), (-1, 1, 0));
        }
    }

    #[test]
    fn row_count_matches_newline_count() {
        let mut input = Vec::new();
        for i in 0..1000 {
            input.extend_from_slice(format!("station{};{}.{}\n", i % 37, i % 100, i % 10).as_bytes());
        }
        let newlines = input.iter().filter(|&&b| b == b'\n').count() as u64;
        for kernel in available_kernels() {
            let mut tables = TableSet::new();
            let mut scratch = Scratch::new();
            scan(kernel, &input, &mut tables, &mut scratch);
            assert_eq!(tables.row_count(), newlines, "{kernel:?} dropped rows");
        }
    }

    #[test]
    fn aggregate_invariants_hold() {
        let mut input = Vec::new();
        let mut expected_total: i64 = 0;
        for i in 0..5000usize {
            let t = ((i * 7919) % 1999) as i64 - 999;
            let sign = if t < 0 { "-" } else { "" };
            input.extend_from_slice(
                format!("st{};{sign}{}.{}\n", i % 97, t.abs() / 10, t.abs() % 10).as_bytes(),
            );
            expected_total += t;
        }
        for kernel in available_kernels() {
            let mut tables = TableSet::new();
            let mut scratch = Scratch::new();
            scan(kernel, &input, &mut tables, &mut scratch);
            let mut total = 0i64;
            tables.for_each_station(|name, acc| {
                let count = acc.count as i64;
                assert!(count > 0);
                assert!(
                    acc.min as i64 * count <= acc.sum && acc.sum <= acc.max as i64 * count,
                    "mean outside [min, max] for {}",
                    String::from_utf8_lossy(name)
                );
                total += acc.sum;
            });
            assert_eq!(total, expected_total, "{kernel:?} sum drifted");
        }
    }

    #[test]
    fn bare_newline_yields_no_records() {
        for kernel in available_kernels() {
            assert!(run_kernel(kernel, b"\n").is_empty());
            assert!(run_kernel(kernel, b"").is_empty());
        }
    }

    #[test]
    fn parse_temp_handles_all_shapes() {
        assert_eq!(parse_temp(b"0.0\n", 0), (0, 4));
        assert_eq!(parse_temp(b"9.9\n", 0), (99, 4));
        assert_eq!(parse_temp(b"-9.9\n", 0), (-99, 5));
        assert_eq!(parse_temp(b"12.3\n", 0), (123, 5));
        assert_eq!(parse_temp(b"-99.9\nrest", 0), (-999, 6));
    }
}
