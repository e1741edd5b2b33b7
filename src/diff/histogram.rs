//! Histogram line alignment
//!
//! Recursively anchors on the longest common run built around the rarest
//! line of the region, then aligns what lies on either side. Lines that occur
//! more than [`MAX_CHAIN_LEN`] times are never used as anchors, which keeps
//! long runs of identical lines from degrading into quadratic work.

use std::collections::HashMap;
use std::ops::Range;

use similar::{Algorithm, DiffOp, capture_diff_slices};

/// Lines occurring more often than this in a region are not anchor candidates
const MAX_CHAIN_LEN: usize = 64;

/// Regions with no usable anchor fall back to Myers when at most this long (old + new)
const MYERS_FALLBACK_LIMIT: usize = 4096;

/// Per-line flags: `removed[i]` for old line `i`, `added[j]` for new line `j`.
/// Unflagged lines match in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Alignment {
    pub removed: Vec<bool>,
    pub added: Vec<bool>,
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    old_start: usize,
    new_start: usize,
    len: usize,
    min_count: usize,
}

enum Search {
    Found(Anchor),
    /// Common lines exist but all are too frequent
    TooCommon,
    NothingInCommon,
}

pub(crate) fn align(old: &[u32], new: &[u32]) -> Alignment {
    let mut out = Alignment {
        removed: vec![false; old.len()],
        added: vec![false; new.len()],
    };
    // Explicit stack: degenerate inputs would otherwise recurse once per line
    let mut work = vec![(0..old.len(), 0..new.len())];
    while let Some((o, n)) = work.pop() {
        split_region(old, new, o, n, &mut out, &mut work);
    }
    out
}

fn split_region(
    old: &[u32],
    new: &[u32],
    mut o: Range<usize>,
    mut n: Range<usize>,
    out: &mut Alignment,
    work: &mut Vec<(Range<usize>, Range<usize>)>,
) {
    while o.start < o.end && n.start < n.end && old[o.start] == new[n.start] {
        o.start += 1;
        n.start += 1;
    }
    while o.start < o.end && n.start < n.end && old[o.end - 1] == new[n.end - 1] {
        o.end -= 1;
        n.end -= 1;
    }

    if o.is_empty() || n.is_empty() {
        mark(out, o, n);
        return;
    }

    match find_anchor(old, new, o.clone(), n.clone()) {
        Search::Found(anchor) => {
            work.push((o.start..anchor.old_start, n.start..anchor.new_start));
            work.push((
                anchor.old_start + anchor.len..o.end,
                anchor.new_start + anchor.len..n.end,
            ));
        }
        Search::NothingInCommon => mark(out, o, n),
        Search::TooCommon => fallback(old, new, o, n, out),
    }
}

fn find_anchor(old: &[u32], new: &[u32], o: Range<usize>, n: Range<usize>) -> Search {
    let mut occurrences: HashMap<u32, Vec<usize>> = HashMap::new();
    for i in o.clone() {
        occurrences.entry(old[i]).or_default().push(i);
    }
    let count_of = |token: u32| occurrences.get(&token).map_or(usize::MAX, Vec::len);

    let mut best: Option<Anchor> = None;
    let mut saw_common = false;
    let mut j = n.start;
    while j < n.end {
        let mut next_j = j + 1;
        if let Some(positions) = occurrences.get(&new[j]) {
            saw_common = true;
            let count = positions.len();
            let eligible =
                count <= MAX_CHAIN_LEN && best.is_none_or(|b| count <= b.min_count);
            if eligible {
                for &i in positions {
                    let (mut os, mut ns) = (i, j);
                    while os > o.start && ns > n.start && old[os - 1] == new[ns - 1] {
                        os -= 1;
                        ns -= 1;
                    }
                    let (mut oe, mut ne) = (i + 1, j + 1);
                    while oe < o.end && ne < n.end && old[oe] == new[ne] {
                        oe += 1;
                        ne += 1;
                    }
                    let len = oe - os;
                    let min_count = (os..oe).map(|k| count_of(old[k])).min().unwrap_or(count);
                    let better = best.is_none_or(|b| len > b.len || min_count < b.min_count);
                    if better {
                        best = Some(Anchor {
                            old_start: os,
                            new_start: ns,
                            len,
                            min_count,
                        });
                    }
                    next_j = next_j.max(ne);
                }
            }
        }
        j = next_j;
    }

    match best {
        Some(anchor) => Search::Found(anchor),
        None if saw_common => Search::TooCommon,
        None => Search::NothingInCommon,
    }
}

fn fallback(old: &[u32], new: &[u32], o: Range<usize>, n: Range<usize>, out: &mut Alignment) {
    if o.len() + n.len() > MYERS_FALLBACK_LIMIT {
        mark(out, o, n);
        return;
    }
    for op in capture_diff_slices(Algorithm::Myers, &old[o.clone()], &new[n.clone()]) {
        match op {
            DiffOp::Equal { .. } => {}
            DiffOp::Delete {
                old_index, old_len, ..
            } => mark_removed(out, o.start + old_index, old_len),
            DiffOp::Insert {
                new_index, new_len, ..
            } => mark_added(out, n.start + new_index, new_len),
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                mark_removed(out, o.start + old_index, old_len);
                mark_added(out, n.start + new_index, new_len);
            }
        }
    }
}

fn mark(out: &mut Alignment, o: Range<usize>, n: Range<usize>) {
    mark_removed(out, o.start, o.len());
    mark_added(out, n.start, n.len());
}

fn mark_removed(out: &mut Alignment, start: usize, len: usize) {
    out.removed[start..start + len].fill(true);
}

fn mark_added(out: &mut Alignment, start: usize, len: usize) {
    out.added[start..start + len].fill(true);
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn kept(flags: &[bool]) -> usize {
        flags.iter().filter(|f| !**f).count()
    }

    #[test]
    fn test_identical() {
        let a = [1, 2, 3];
        let al = align(&a, &a);
        assert!(al.removed.iter().all(|f| !f));
        assert!(al.added.iter().all(|f| !f));
    }

    #[test]
    fn test_disjoint() {
        let al = align(&[1, 2], &[3, 4, 5]);
        assert_eq!(al.removed, vec![true, true]);
        assert_eq!(al.added, vec![true, true, true]);
    }

    #[test]
    fn test_prefers_unique_anchor() {
        // `9` is unique and should anchor even though `1` repeats
        let old = [1, 1, 9, 1, 1];
        let new = [1, 9, 1];
        let al = align(&old, &new);
        assert!(!al.removed[2]);
        assert_eq!(kept(&al.removed), kept(&al.added));
        assert_eq!(kept(&al.added), 3);
    }

    #[test]
    fn test_moved_block() {
        let old = [1, 2, 3, 4, 5, 6];
        let new = [4, 5, 6, 1, 2, 3];
        let al = align(&old, &new);
        assert_eq!(kept(&al.removed), kept(&al.added));
        assert_eq!(kept(&al.removed), 3);
    }

    #[test]
    fn test_many_identical_lines_stay_fast() {
        let mut old = vec![7u32; 20_000];
        let mut new = old.clone();
        new[10_000] = 8;
        old.push(1);
        new.push(1);

        let started = Instant::now();
        let al = align(&old, &new);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(al.removed.iter().filter(|f| **f).count(), 1);
        assert_eq!(al.added.iter().filter(|f| **f).count(), 1);
    }

    #[test]
    fn test_too_common_region_falls_back() {
        // Every line appears far more than the chain limit
        let old: Vec<u32> = (0..400).map(|i| i % 2).collect();
        let mut new = old.clone();
        new.insert(200, 5);
        new.remove(0);
        new.push(0);
        let started = Instant::now();
        let al = align(&old, &new);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(kept(&al.removed), kept(&al.added));
    }
}
