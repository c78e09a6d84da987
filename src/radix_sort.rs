//! Parallel most-significant-digit radix sort of `(key, index)` pairs.
//!
//! Large buckets ("big ranges") are processed together, one digit per pass: every
//! execution group counts the digits of its chunk, the counts are prefix-summed into
//! scatter offsets and the elements are moved into the other buffer. Buckets that fall
//! below a size threshold become "small ranges" and are finished independently, each by
//! a single task, with heap sort or local counting passes.

use log::trace;
use rayon::prelude::*;

use crate::key::SpatialKey;
use crate::particles::PingPong;

pub type KeyPair<K> = (K, u32);

#[derive(Clone, Copy, Debug)]
struct BigRange {
    begin: usize,
    end: usize,
}

#[derive(Clone, Copy, Debug)]
struct SmallRange {
    begin: usize,
    end: usize,
    /// Low key bits still unsorted.
    bits: u32,
}

#[derive(Clone, Copy, Debug)]
struct Chunk {
    range: usize,
    begin: usize,
    end: usize,
}

#[derive(Clone, Debug)]
pub struct RadixSort {
    digit_bits: u32,
    groups: usize,
}

impl Default for RadixSort {
    fn default() -> Self {
        Self::new(128, std::mem::size_of::<KeyPair<u64>>())
    }
}

impl RadixSort {
    /// Picks the digit width so that one counter per digit value fits into the register budget.
    pub fn new(register_budget: usize, pair_bytes: usize) -> Self {
        let words = (pair_bytes / 4).max(1);
        let mut bits = 1u32;
        while (((1usize << (bits + 1)) * words) as f64) < register_budget as f64 * 0.7 {
            bits += 1;
        }
        Self {
            digit_bits: (bits + 1).clamp(3, 8),
            groups: rayon::current_num_threads() * 4,
        }
    }

    pub fn with_digit_bits(mut self, bits: u32) -> Self {
        self.digit_bits = bits.clamp(1, 16);
        self
    }

    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups.max(1);
        self
    }

    pub fn digit_bits(&self) -> u32 {
        self.digit_bits
    }

    fn max_big_size(&self, n: usize) -> usize {
        (n / (2 * self.groups)).max(256)
    }

    /// Sorts the front buffer by key. Only the lowest `max_bits` key bits may be non-zero.
    pub fn sort<K: SpatialKey>(&self, buffers: &mut PingPong<Vec<KeyPair<K>>>, max_bits: u32) {
        let n = buffers.front().len();
        {
            let (front, back) = buffers.split_mut();
            back.clear();
            back.extend_from_slice(front);
        }
        if n < 2 {
            return;
        }

        let bits = self.digit_bits;
        let max_big = self.max_big_size(n);
        let mut big = Vec::new();
        let mut small = Vec::new();
        if n > max_big {
            big.push(BigRange { begin: 0, end: n });
        } else {
            small.push(SmallRange {
                begin: 0,
                end: n,
                bits: max_bits,
            });
        }

        let mut shift = max_bits as i64 - bits as i64;
        let mut passes = 0;
        while !big.is_empty() && shift > -(bits as i64) {
            let digit_shift = shift.max(0) as u32;
            big = buffers.flip_with(|src, dst| {
                self.big_pass(src, dst, &big, digit_shift, max_big, &mut small)
            });
            // Freshly settled buckets were only written to the new front.
            let (front, back) = buffers.split_mut();
            for range in small.iter().filter(|r| r.bits == digit_shift) {
                back[range.begin..range.end].copy_from_slice(&front[range.begin..range.end]);
            }
            passes += 1;
            shift -= bits as i64;
        }
        trace!(
            "radix sort: {n} pairs, {passes} global passes, {} small ranges",
            small.len()
        );

        small.sort_unstable_by_key(|r| r.begin);
        let slices = split_ranges_mut(
            buffers.front_mut(),
            small.iter().map(|r| (r.begin, r.end)),
        );
        slices
            .into_par_iter()
            .zip(small.par_iter())
            .for_each(|(slice, range)| sort_small(slice, range.bits, bits));

        debug_assert!(
            buffers.front().windows(2).all(|w| w[0].0 <= w[1].0),
            "radix sort output is not ordered"
        );
    }

    /// One digit pass over all big ranges. Returns the big ranges of the next pass.
    fn big_pass<K: SpatialKey>(
        &self,
        src: &[KeyPair<K>],
        dst: &mut [KeyPair<K>],
        big: &[BigRange],
        shift: u32,
        max_big: usize,
        small: &mut Vec<SmallRange>,
    ) -> Vec<BigRange> {
        let bits = self.digit_bits;
        let radix = 1usize << bits;

        let mut chunks = Vec::new();
        let mut first_chunk = Vec::with_capacity(big.len() + 1);
        for (r, range) in big.iter().enumerate() {
            first_chunk.push(chunks.len());
            let len = range.end - range.begin;
            let groups = self.groups.min(len.div_ceil(256)).max(1);
            for g in 0..groups {
                chunks.push(Chunk {
                    range: r,
                    begin: range.begin + len * g / groups,
                    end: range.begin + len * (g + 1) / groups,
                });
            }
        }
        first_chunk.push(chunks.len());

        // Counting.
        let mut offsets: Vec<Vec<usize>> = chunks
            .par_iter()
            .map(|chunk| {
                let mut count = vec![0usize; radix];
                for pair in &src[chunk.begin..chunk.end] {
                    count[pair.0.digit(shift, bits)] += 1;
                }
                count
            })
            .collect();

        // Prefix sums, digit-major across the chunks of a range.
        let mut next_big = Vec::new();
        for (r, range) in big.iter().enumerate() {
            let mut pos = range.begin;
            for digit in 0..radix {
                let start = pos;
                for offset in &mut offsets[first_chunk[r]..first_chunk[r + 1]] {
                    let count = offset[digit];
                    offset[digit] = pos;
                    pos += count;
                }
                let size = pos - start;
                if size > max_big {
                    next_big.push(BigRange {
                        begin: start,
                        end: pos,
                    });
                } else if size > 0 {
                    small.push(SmallRange {
                        begin: start,
                        end: pos,
                        bits: shift,
                    });
                }
            }
            debug_assert_eq!(pos, range.end);
        }

        // Scatter. Big ranges own disjoint parts of the output.
        let targets = split_ranges_mut(dst, big.iter().map(|r| (r.begin, r.end)));
        let mut per_range: Vec<Vec<(Chunk, Vec<usize>)>> = big.iter().map(|_| Vec::new()).collect();
        for (chunk, offset) in chunks.into_iter().zip(offsets) {
            per_range[chunk.range].push((chunk, offset));
        }
        targets
            .into_par_iter()
            .zip(per_range.into_par_iter())
            .zip(big.par_iter())
            .for_each(|((target, chunks), range)| {
                for (chunk, mut offset) in chunks {
                    for pair in &src[chunk.begin..chunk.end] {
                        let slot = &mut offset[pair.0.digit(shift, bits)];
                        target[*slot - range.begin] = *pair;
                        *slot += 1;
                    }
                }
            });

        next_big
    }
}

/// Splits `data` into the given ascending, disjoint ranges.
fn split_ranges_mut<T>(
    mut data: &mut [T],
    ranges: impl IntoIterator<Item = (usize, usize)>,
) -> Vec<&mut [T]> {
    let mut out = Vec::new();
    let mut consumed = 0;
    for (begin, end) in ranges {
        let rest = std::mem::take(&mut data);
        let (_, rest) = rest.split_at_mut(begin - consumed);
        let (slice, rest) = rest.split_at_mut(end - begin);
        out.push(slice);
        data = rest;
        consumed = end;
    }
    out
}

/// Finishes one small range: `bits` low key bits are still unsorted.
fn sort_small<K: SpatialKey>(data: &mut [KeyPair<K>], bits: u32, digit_bits: u32) {
    let tiny = 1usize << digit_bits;
    let mut scratch = Vec::new();
    let mut stack = vec![(0, data.len(), bits)];
    while let Some((begin, end, bits)) = stack.pop() {
        let len = end - begin;
        if len < 2 || bits == 0 {
            continue;
        }
        if len <= tiny {
            heap_sort(&mut data[begin..end]);
            continue;
        }

        let shift = bits.saturating_sub(digit_bits);
        let width = bits - shift;
        let mut start = vec![0usize; (1 << width) + 1];
        for pair in &data[begin..end] {
            start[pair.0.digit(shift, width) + 1] += 1;
        }
        for d in 0..(1 << width) {
            start[d + 1] += start[d];
        }
        for d in 0..(1 << width) {
            if start[d + 1] - start[d] > 1 {
                stack.push((begin + start[d], begin + start[d + 1], shift));
            }
        }

        scratch.clear();
        scratch.resize(len, data[begin]);
        for pair in &data[begin..end] {
            let slot = &mut start[pair.0.digit(shift, width)];
            scratch[*slot] = *pair;
            *slot += 1;
        }
        data[begin..end].copy_from_slice(&scratch);
    }
}

fn sift_down<K: SpatialKey>(data: &mut [KeyPair<K>], mut root: usize, end: usize) {
    loop {
        let mut child = 2 * root + 1;
        if child >= end {
            break;
        }
        if child + 1 < end && data[child].0 < data[child + 1].0 {
            child += 1;
        }
        if data[root].0 >= data[child].0 {
            break;
        }
        data.swap(root, child);
        root = child;
    }
}

pub fn heap_sort<K: SpatialKey>(data: &mut [KeyPair<K>]) {
    let n = data.len();
    for root in (0..n / 2).rev() {
        sift_down(data, root, n);
    }
    for end in (1..n).rev() {
        data.swap(0, end);
        sift_down(data, 0, end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn check<K: SpatialKey>(input: &[KeyPair<K>], output: &[KeyPair<K>]) {
        assert_eq!(input.len(), output.len());
        for (p, w) in output.windows(2).enumerate() {
            assert!(w[0].0 <= w[1].0, "unordered at {p}: {:?} > {:?}", w[0].0, w[1].0);
        }
        let mut a = input.to_vec();
        let mut b = output.to_vec();
        a.sort_unstable();
        b.sort_unstable();
        assert!(a == b, "output is not a permutation of the input");
    }

    fn run<K: SpatialKey>(sorter: &RadixSort, input: Vec<KeyPair<K>>, max_bits: u32) {
        let mut buffers = PingPong::new(input.clone(), Vec::new());
        sorter.sort(&mut buffers, max_bits);
        check(&input, buffers.front());
    }

    #[test]
    fn digit_width_follows_register_budget() {
        assert_eq!(RadixSort::new(128, 16).digit_bits(), 5);
        assert_eq!(RadixSort::new(128, 8).digit_bits(), 6);
        assert_eq!(RadixSort::new(16, 16).digit_bits(), 3);
    }

    #[test]
    fn sorts_random_u64_keys() {
        let mut rng = StdRng::seed_from_u64(1);
        let input: Vec<_> = (0..100_000u32).map(|i| (rng.random::<u64>(), i)).collect();
        run(&RadixSort::default(), input, 64);
    }

    #[test]
    fn sorts_u32_keys_with_many_duplicates() {
        let mut rng = StdRng::seed_from_u64(2);
        let input: Vec<_> = (0..50_000u32)
            .map(|i| (rng.random_range(0..16u32) << 28, i))
            .collect();
        run(&RadixSort::default().with_groups(3), input, 32);
    }

    #[test]
    fn sorts_short_keys() {
        let mut rng = StdRng::seed_from_u64(3);
        let input: Vec<_> = (0..20_000u32)
            .map(|i| (rng.random_range(0..1u64 << 20), i))
            .collect();
        run(&RadixSort::default().with_digit_bits(3), input, 20);
    }

    #[test]
    fn small_inputs() {
        let sorter = RadixSort::default();
        run::<u64>(&sorter, Vec::new(), 64);
        run(&sorter, vec![(5u64, 0)], 64);
        run(&sorter, vec![(5u64, 0), (3, 1), (5, 2), (1, 3), (0, 4)], 64);
        let mut rng = StdRng::seed_from_u64(4);
        run(
            &sorter,
            (0..300u32).map(|i| (rng.random::<u32>(), i)).collect(),
            32,
        );
    }

    #[test]
    fn small_range_path_with_few_groups() {
        let mut rng = StdRng::seed_from_u64(5);
        // One group leaves everything below n / 2 to the small range sort.
        let input: Vec<_> = (0..5_000u32).map(|i| (rng.random::<u64>() >> 7, i)).collect();
        run(&RadixSort::default().with_groups(1), input, 57);
    }

    #[test]
    fn heap_sort_orders_keys() {
        let mut data: Vec<KeyPair<u32>> = [9u32, 1, 8, 1, 7, 3, 3, 0]
            .iter()
            .enumerate()
            .map(|(i, &k)| (k, i as u32))
            .collect();
        let input = data.clone();
        heap_sort(&mut data);
        check(&input, &data);
    }
}
