//! Token frequency counters used during the corpus pass.
//!
//! [`FrequencyCounter`] is the seam between the streaming pass and vocabulary
//! selection.  [`ExactCounter`] holds every distinct token in memory and is the
//! default; [`SketchCounter`] bounds memory with a count-min sketch plus a
//! fixed-size heavy-hitter table for corpora whose vocabulary does not fit.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Serialize};

/// A token paired with its (possibly estimated) occurrence count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCount {
    /// Case-folded token text.
    pub token: String,
    /// Number of occurrences.
    pub count: u64,
}

impl TokenCount {
    /// Creates a new token/count pair.
    pub fn new(token: impl Into<String>, count: u64) -> Self {
        Self {
            token: token.into(),
            count,
        }
    }
}

/// Accumulates token frequencies and projects the most frequent ones.
pub trait FrequencyCounter {
    /// Records one occurrence of `token`.
    fn observe(&mut self, token: &str);

    /// Total number of observed occurrences.
    fn total(&self) -> u64;

    /// Number of distinct tokens observed.
    fn distinct(&self) -> usize;

    /// Returns up to `k` tokens ordered by non-increasing count.
    ///
    /// Ties follow the counter's native enumeration order.
    fn top_k(&self, k: usize) -> Vec<TokenCount>;

    /// Short label identifying the counting strategy.
    fn kind(&self) -> &'static str;
}

/// Exact in-memory counter.
///
/// Entries are kept in first-seen order, which is also the tie-break order of
/// [`FrequencyCounter::top_k`].
#[derive(Debug, Default, Clone)]
pub struct ExactCounter {
    index: FxHashMap<String, usize>,
    entries: Vec<(String, u64)>,
    total: u64,
}

impl ExactCounter {
    /// Creates an empty counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the count recorded for `token`, or zero when unseen.
    #[must_use]
    pub fn count(&self, token: &str) -> u64 {
        self.index
            .get(token)
            .map_or(0, |&slot| self.entries[slot].1)
    }

    /// Iterates over all tokens in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries
            .iter()
            .map(|(token, count)| (token.as_str(), *count))
    }
}

impl FrequencyCounter for ExactCounter {
    fn observe(&mut self, token: &str) {
        self.total += 1;
        if let Some(&slot) = self.index.get(token) {
            self.entries[slot].1 += 1;
            return;
        }
        self.index.insert(token.to_owned(), self.entries.len());
        self.entries.push((token.to_owned(), 1));
    }

    fn total(&self) -> u64 {
        self.total
    }

    fn distinct(&self) -> usize {
        self.entries.len()
    }

    fn top_k(&self, k: usize) -> Vec<TokenCount> {
        let ranked = select_ranked(
            self.entries
                .iter()
                .enumerate()
                .map(|(order, (_, count))| Ranked::new(*count, order)),
            k,
        );
        ranked
            .into_iter()
            .map(|rank| {
                let (token, count) = &self.entries[rank.order];
                TokenCount::new(token.clone(), *count)
            })
            .collect()
    }

    fn kind(&self) -> &'static str {
        "exact"
    }
}

/// Count-min sketch with a bounded table of heavy-hitter candidates.
///
/// Reported counts are sketch estimates and never undercount.  `distinct()` is a
/// lower bound: a token is counted as new only when every sketch row was still
/// zero for it.
///
/// Candidates are indexed by `(estimate, Reverse(admission order))`, so the eviction
/// victim (lowest estimate, latest admitted among ties) is the first entry of the index.
#[derive(Debug, Clone)]
pub struct SketchCounter {
    width: usize,
    depth: usize,
    capacity: usize,
    cells: Vec<u64>,
    candidates: FxHashMap<String, CandidateKey>,
    ranking: BTreeMap<CandidateKey, String>,
    next_order: usize,
    total: u64,
    distinct: usize,
}

type CandidateKey = (u64, Reverse<usize>);

impl SketchCounter {
    /// Creates a sketch with `depth` rows of `width` cells, tracking at most `capacity` candidates.
    ///
    /// Zero dimensions are raised to one.
    #[must_use]
    pub fn new(width: usize, depth: usize, capacity: usize) -> Self {
        let width = width.max(1);
        let depth = depth.max(1);
        Self {
            width,
            depth,
            capacity: capacity.max(1),
            cells: vec![0; width * depth],
            candidates: FxHashMap::default(),
            ranking: BTreeMap::new(),
            next_order: 0,
            total: 0,
            distinct: 0,
        }
    }

    /// Returns the sketch estimate for `token`.
    #[must_use]
    pub fn estimate(&self, token: &str) -> u64 {
        (0..self.depth)
            .map(|row| self.cells[self.cell(row, token)])
            .min()
            .unwrap_or(0)
    }

    /// Number of candidates currently tracked.
    #[must_use]
    pub fn candidates(&self) -> usize {
        self.candidates.len()
    }

    fn cell(&self, row: usize, token: &str) -> usize {
        let mut hasher = FxHasher::default();
        (row as u64).hash(&mut hasher);
        token.hash(&mut hasher);
        row * self.width + (hasher.finish() as usize) % self.width
    }

    fn admit(&mut self, token: String, key: CandidateKey) {
        self.candidates.insert(token.clone(), key);
        self.ranking.insert(key, token);
    }
}

impl FrequencyCounter for SketchCounter {
    fn observe(&mut self, token: &str) {
        self.total += 1;
        let mut estimate = u64::MAX;
        let mut unseen = true;
        for row in 0..self.depth {
            let cell = self.cell(row, token);
            if self.cells[cell] != 0 {
                unseen = false;
            }
            self.cells[cell] += 1;
            estimate = estimate.min(self.cells[cell]);
        }
        if unseen {
            self.distinct += 1;
        }

        if let Some(key) = self.candidates.get_mut(token) {
            let old = *key;
            key.0 = estimate;
            let updated = *key;
            if let Some(owned) = self.ranking.remove(&old) {
                self.ranking.insert(updated, owned);
            }
            return;
        }
        if self.candidates.len() >= self.capacity {
            let Some((&(smallest, _), _)) = self.ranking.first_key_value() else {
                return;
            };
            if estimate <= smallest {
                return;
            }
            if let Some((_, victim)) = self.ranking.pop_first() {
                self.candidates.remove(&victim);
            }
        }
        let order = self.next_order;
        self.next_order += 1;
        self.admit(token.to_owned(), (estimate, Reverse(order)));
    }

    fn total(&self) -> u64 {
        self.total
    }

    fn distinct(&self) -> usize {
        self.distinct
    }

    fn top_k(&self, k: usize) -> Vec<TokenCount> {
        // Descending key order is highest estimate first, earliest admission among ties.
        self.ranking
            .iter()
            .rev()
            .take(k)
            .map(|(&(count, _), token)| TokenCount::new(token.clone(), count))
            .collect()
    }

    fn kind(&self) -> &'static str {
        "sketch"
    }
}

/// Heap entry ranking higher counts first and, among equal counts, earlier entries first.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Ranked {
    count: u64,
    order: usize,
}

impl Ranked {
    fn new(count: u64, order: usize) -> Self {
        Self { count, order }
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.count
            .cmp(&other.count)
            .then_with(|| other.order.cmp(&self.order))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Keeps the `k` best entries in a bounded min-heap and returns them best first.
fn select_ranked<I>(entries: I, k: usize) -> Vec<Ranked>
where
    I: IntoIterator<Item = Ranked>,
{
    if k == 0 {
        return Vec::new();
    }
    let mut heap: BinaryHeap<Reverse<Ranked>> = BinaryHeap::with_capacity(k.min(1 << 20) + 1);
    for entry in entries {
        if heap.len() < k {
            heap.push(Reverse(entry));
        } else if heap.peek().is_some_and(|Reverse(worst)| entry > *worst) {
            heap.pop();
            heap.push(Reverse(entry));
        }
    }
    // `Reverse` inverts the order, so ascending sort yields best first.
    heap.into_sorted_vec()
        .into_iter()
        .map(|Reverse(entry)| entry)
        .collect()
}
