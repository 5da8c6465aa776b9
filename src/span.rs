//! Span model: deduplicated per-document spans with containment queries.
//!
//! Spans are half-open byte intervals into a document's UTF-8 text. At
//! document finalization the table is sorted into canonical order —
//! `(start ASC, start − end ASC)`, i.e. ties on `start` put the longer
//! (outer) span first — and span ids become positions in that order.

use std::cmp::Ordering;
use std::collections::HashMap;

/// Span identifier: position in the canonical per-document order.
pub type SpanId = u32;

/// A half-open byte interval `[start, end)` into a document's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    /// Byte offset of the first covered byte.
    pub start: u64,
    /// Byte offset one past the last covered byte.
    pub end: u64,
}

impl Span {
    /// Create a span. `start` must not exceed `end`.
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Length of the covered interval in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the span covers zero bytes.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether `other` lies inside this span: `self.start <= other.start`
    /// and `other.end <= self.end`.
    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Canonical span order: `start` ascending, ties broken longer-first.
fn canonical_cmp(a: &Span, b: &Span) -> Ordering {
    a.start.cmp(&b.start).then(b.end.cmp(&a.end))
}

/// Per-document span table.
///
/// During writing, `insert` deduplicates spans in arrival order. A single
/// `sort_and_renumber` call moves the table into canonical order and hands
/// back the id permutation. Readers construct the table directly from the
/// already-sorted on-disk columns via `from_sorted`.
#[derive(Debug, Default)]
pub struct SpanTable {
    spans: Vec<Span>,
    lookup: HashMap<Span, SpanId>,
    sorted: bool,
}

impl SpanTable {
    /// Create an empty table in insertion mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table over spans already in canonical order.
    pub fn from_sorted(spans: Vec<Span>) -> Self {
        let lookup = spans
            .iter()
            .enumerate()
            .map(|(i, s)| (*s, i as SpanId))
            .collect();
        Self {
            spans,
            lookup,
            sorted: true,
        }
    }

    /// Number of distinct spans.
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Whether the table holds no spans.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Span for a given id.
    pub fn get(&self, id: SpanId) -> Option<Span> {
        self.spans.get(id as usize).copied()
    }

    /// Insert a span, returning the existing id if an identical span is
    /// already present.
    pub fn insert(&mut self, start: u64, end: u64) -> SpanId {
        debug_assert!(!self.sorted, "table is finalized");
        let span = Span::new(start, end);
        if let Some(&id) = self.lookup.get(&span) {
            return id;
        }
        let id = self.spans.len() as SpanId;
        self.spans.push(span);
        self.lookup.insert(span, id);
        id
    }

    /// Sort spans into canonical order and renumber ids.
    ///
    /// Returns the permutation from old ids to new ids; the caller applies
    /// it to every tag that references a span.
    pub fn sort_and_renumber(&mut self) -> Vec<SpanId> {
        debug_assert!(!self.sorted, "table is finalized");
        let mut order: Vec<usize> = (0..self.spans.len()).collect();
        order.sort_by(|&a, &b| canonical_cmp(&self.spans[a], &self.spans[b]));

        let mut perm = vec![0 as SpanId; self.spans.len()];
        let mut sorted = Vec::with_capacity(self.spans.len());
        for (new_id, &old_id) in order.iter().enumerate() {
            perm[old_id] = new_id as SpanId;
            sorted.push(self.spans[old_id]);
        }

        self.spans = sorted;
        self.lookup = self
            .spans
            .iter()
            .enumerate()
            .map(|(i, s)| (*s, i as SpanId))
            .collect();
        self.sorted = true;
        perm
    }

    /// O(log n) lookup of a span with exactly the given endpoints.
    pub fn find_aligned(&self, start: u64, end: u64) -> Option<SpanId> {
        debug_assert!(self.sorted, "table must be finalized");
        let probe = Span::new(start, end);
        self.spans
            .binary_search_by(|s| canonical_cmp(s, &probe))
            .ok()
            .map(|i| i as SpanId)
    }

    /// First position whose span starts at or after `start`.
    pub fn first_at_or_after(&self, start: u64) -> usize {
        debug_assert!(self.sorted, "table must be finalized");
        self.spans.partition_point(|s| s.start < start)
    }

    /// Span ids contained in the given span, in document order.
    ///
    /// Because ties on `start` sort outer-first, a forward scan from the
    /// first span starting at or after the container's start yields all
    /// candidates; the scan stops at the first span starting at or past the
    /// container's end.
    pub fn children_of(&self, id: SpanId) -> impl Iterator<Item = SpanId> + '_ {
        debug_assert!(self.sorted, "table must be finalized");
        let outer = self.spans[id as usize];
        let from = self.first_at_or_after(outer.start);
        self.spans[from..]
            .iter()
            .enumerate()
            .take_while(move |(_, s)| s.start < outer.end)
            .filter(move |(i, s)| (from + i) as SpanId != id && s.end <= outer.end)
            .map(move |(i, _)| (from + i) as SpanId)
    }

    /// Iterate all spans in table order.
    pub fn iter(&self) -> impl Iterator<Item = Span> + '_ {
        self.spans.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_dedup() {
        let mut table = SpanTable::new();
        let a = table.insert(0, 3);
        let b = table.insert(4, 13);
        let c = table.insert(0, 3);
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_zero_length_span_is_legal() {
        let mut table = SpanTable::new();
        let id = table.insert(5, 5);
        assert_eq!(table.get(id).unwrap().len(), 0);
    }

    #[test]
    fn test_sort_order_outer_before_inner() {
        let mut table = SpanTable::new();
        let tok = table.insert(0, 3);
        let sent = table.insert(0, 13);
        let tail = table.insert(4, 13);
        let perm = table.sort_and_renumber();

        // sentence [0,13) sorts before token [0,3) on equal start
        assert_eq!(perm[sent as usize], 0);
        assert_eq!(perm[tok as usize], 1);
        assert_eq!(perm[tail as usize], 2);

        let spans: Vec<Span> = table.iter().collect();
        for w in spans.windows(2) {
            assert!(w[0].start <= w[1].start);
            if w[0].start == w[1].start {
                assert!(w[0].end >= w[1].end);
            }
        }
    }

    #[test]
    fn test_renumber_permutation_round_trips() {
        let mut table = SpanTable::new();
        let ids: Vec<SpanId> = [(4, 13), (0, 13), (0, 3)]
            .iter()
            .map(|&(s, e)| table.insert(s, e))
            .collect();
        let before: Vec<Span> = ids.iter().map(|&i| table.get(i).unwrap()).collect();
        let perm = table.sort_and_renumber();
        for (old, span) in ids.iter().zip(before) {
            assert_eq!(table.get(perm[*old as usize]).unwrap(), span);
        }
    }

    #[test]
    fn test_find_aligned() {
        let mut table = SpanTable::new();
        table.insert(0, 13);
        table.insert(0, 3);
        table.insert(4, 13);
        table.sort_and_renumber();

        assert_eq!(table.find_aligned(0, 3), Some(1));
        assert_eq!(table.find_aligned(0, 13), Some(0));
        assert_eq!(table.find_aligned(1, 3), None);
        assert_eq!(table.find_aligned(0, 4), None);
    }

    #[test]
    fn test_children_of() {
        let mut table = SpanTable::new();
        let sent = table.insert(0, 13);
        table.insert(0, 3);
        table.insert(4, 13);
        table.insert(14, 20);
        let perm = table.sort_and_renumber();

        let children: Vec<SpanId> = table.children_of(perm[sent as usize]).collect();
        let covered: Vec<Span> = children.iter().map(|&i| table.get(i).unwrap()).collect();
        assert_eq!(covered, vec![Span::new(0, 3), Span::new(4, 13)]);
    }

    #[test]
    fn test_children_exclude_overlapping() {
        let mut table = SpanTable::new();
        let outer = table.insert(0, 10);
        table.insert(2, 5);
        table.insert(8, 12); // overlaps but extends past the container
        let perm = table.sort_and_renumber();

        let children: Vec<Span> = table
            .children_of(perm[outer as usize])
            .map(|i| table.get(i).unwrap())
            .collect();
        assert_eq!(children, vec![Span::new(2, 5)]);
    }

    #[test]
    fn test_children_of_exact_match_set() {
        // children_of(s) = { t != s : s.start <= t.start && t.end <= s.end }
        let intervals = [(0, 10), (0, 4), (2, 6), (3, 3), (5, 10), (6, 12)];
        let mut table = SpanTable::new();
        for &(s, e) in &intervals {
            table.insert(s, e);
        }
        table.sort_and_renumber();

        for id in 0..table.len() as SpanId {
            let outer = table.get(id).unwrap();
            let got: Vec<SpanId> = table.children_of(id).collect();
            let want: Vec<SpanId> = (0..table.len() as SpanId)
                .filter(|&t| t != id && outer.contains(&table.get(t).unwrap()))
                .collect();
            assert_eq!(got, want, "container {:?}", outer);
        }
    }

    #[test]
    fn test_children_of_zero_length_container() {
        let mut table = SpanTable::new();
        let z = table.insert(3, 3);
        table.insert(0, 10);
        let perm = table.sort_and_renumber();
        assert_eq!(table.children_of(perm[z as usize]).count(), 0);
    }
}
