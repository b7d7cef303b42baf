use ahash::AHashMap;

use crate::key::{Key128, Key16, Key32, KeyBlock, MAX_NAME_LEN};

pub const CAP_NARROW: usize = 6007;
pub const CAP_WIDE: usize = 2003;

const EMPTY: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Accumulator {
    pub count: u64,
    pub sum: i64,
    pub min: i32,
    pub max: i32,
}

impl Accumulator {
    #[inline]
    pub fn new() -> Self {
        Self {
            count: 0,
            sum: 0,
            min: i32::MAX,
            max: i32::MIN,
        }
    }

    #[inline]
    pub fn add(&mut self, temp: i32) {
        self.count += 1;
        self.sum += temp as i64;
        self.min = self.min.min(temp);
        self.max = self.max.max(temp);
    }

    #[inline]
    pub fn merge(&mut self, other: &Accumulator) {
        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

// One cache line for the narrow widths: key + accumulator + chain link.
#[repr(C, align(64))]
struct Entry<K: KeyBlock> {
    key: K,
    acc: Accumulator,
    next: u32,
}

pub struct Table<K: KeyBlock> {
    buckets: Box<[u32]>,
    entries: Vec<Entry<K>>,
}

impl<K: KeyBlock> Table<K> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buckets: vec![EMPTY; capacity].into_boxed_slice(),
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    // Inserts the zero state on a miss. The returned reference does not
    // survive the next call: a full table grows and rehashes first.
    #[inline]
    pub fn lookup_or_insert(&mut self, key: K) -> &mut Accumulator {
        let h = key.hash();
        if let Some(i) = self.find(h, &key) {
            return &mut self.entries[i].acc;
        }
        if self.entries.len() == self.buckets.len() {
            self.grow();
        }
        let slot = (h % self.buckets.len() as u64) as usize;
        let idx = self.entries.len() as u32;
        self.entries.push(Entry {
            key,
            acc: Accumulator::new(),
            next: EMPTY,
        });
        self.link_tail(slot, idx);
        &mut self.entries[idx as usize].acc
    }

    #[inline]
    fn find(&self, h: u64, key: &K) -> Option<usize> {
        let slot = (h % self.buckets.len() as u64) as usize;
        let mut cur = self.buckets[slot];
        while cur != EMPTY {
            let e = &self.entries[cur as usize];
            if e.key == *key {
                return Some(cur as usize);
            }
            cur = e.next;
        }
        None
    }

    // New entries go to the chain tail so iteration order stays insertion
    // order even within a chain.
    fn link_tail(&mut self, slot: usize, idx: u32) {
        let mut cur = self.buckets[slot];
        if cur == EMPTY {
            self.buckets[slot] = idx;
            return;
        }
        loop {
            let next = self.entries[cur as usize].next;
            if next == EMPTY {
                break;
            }
            cur = next;
        }
        self.entries[cur as usize].next = idx;
    }

    fn grow(&mut self) {
        let new_cap = next_prime(2 * self.buckets.len());
        let old = std::mem::replace(&mut self.entries, Vec::with_capacity(new_cap));
        self.buckets = vec![EMPTY; new_cap].into_boxed_slice();
        for mut e in old {
            e.next = EMPTY;
            self.entries.push(e);
        }
        for i in 0..self.entries.len() {
            let slot = (self.entries[i].key.hash() % new_cap as u64) as usize;
            self.link_tail(slot, i as u32);
        }
    }

    pub fn for_each(&self, f: &mut impl FnMut(&[u8], &Accumulator)) {
        for e in &self.entries {
            f(e.key.name(), &e.acc);
        }
    }

    pub fn longest_chain(&self) -> usize {
        let mut longest = 0;
        for &head in self.buckets.iter() {
            let mut len = 0;
            let mut cur = head;
            while cur != EMPTY {
                len += 1;
                cur = self.entries[cur as usize].next;
            }
            longest = longest.max(len);
        }
        longest
    }
}

// One triplet per worker: short, mid and long station names.
pub struct TableSet {
    pub short: Table<Key16>,
    pub mid: Table<Key32>,
    pub long: Table<Key128>,
}

impl TableSet {
    pub fn new() -> Self {
        Self {
            short: Table::with_capacity(CAP_NARROW),
            mid: Table::with_capacity(CAP_NARROW),
            long: Table::with_capacity(CAP_WIDE),
        }
    }

    #[inline]
    pub fn update(&mut self, name: &[u8], temp: i32) {
        debug_assert!(name.len() <= MAX_NAME_LEN, "station name exceeds 100 bytes");
        if name.len() <= Key16::WIDTH {
            self.short.lookup_or_insert(Key16::pad(name)).add(temp);
        } else if name.len() <= Key32::WIDTH {
            self.mid.lookup_or_insert(Key32::pad(name)).add(temp);
        } else {
            self.long.lookup_or_insert(Key128::pad(name)).add(temp);
        }
    }

    pub fn for_each_station(&self, mut f: impl FnMut(&[u8], &Accumulator)) {
        self.short.for_each(&mut f);
        self.mid.for_each(&mut f);
        self.long.for_each(&mut f);
    }

    pub fn merge_into(&self, global: &mut AHashMap<Vec<u8>, Accumulator>) {
        self.for_each_station(|name, acc| {
            global
                .entry(name.to_vec())
                .or_insert_with(Accumulator::new)
                .merge(acc);
        });
    }

    pub fn station_count(&self) -> usize {
        self.short.len() + self.mid.len() + self.long.len()
    }

    pub fn row_count(&self) -> u64 {
        let mut rows = 0;
        self.for_each_station(|_, acc| rows += acc.count);
        rows
    }

    pub fn longest_chain(&self) -> usize {
        self.short
            .longest_chain()
            .max(self.mid.longest_chain())
            .max(self.long.longest_chain())
    }
}

impl Default for TableSet {
    fn default() -> Self {
        Self::new()
    }
}

fn next_prime(mut n: usize) -> usize {
    if n <= 2 {
        return 2;
    }
    if n % 2 == 0 {
        n += 1;
    }
    while !is_prime(n) {
        n += 2;
    }
    n
}

fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}
