//! Document records: per-document column bundles and their encoder.
//!
//! A document record bundles the UTF-8 text, a metadata JSON blob, the
//! sorted span table (as `starts`/`lens` columns) and one column bundle per
//! code. Tags of a code are stored in parallel columns ordered by span id
//! ascending, which puts them in span-start order.

use crate::code::CodeId;
use crate::column::{FloatColumn, IntColumn, UintColumn};
use crate::error::{BuildError, Result};
use crate::span::{SpanId, SpanTable};
use rkyv::{Archive, Deserialize, Serialize};
use std::collections::HashSet;

/// Flattened label columns for one code in one document.
///
/// `values` and `scores` are the concatenation of every tag's label slice.
/// `groups[i]` is the exclusive end offset of tag i's slice; the column is
/// omitted when every tag carries exactly one label (slice i is then
/// `[i, i+1)`). `scores` is omitted when no tag in the code has a score.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub struct LabelData {
    pub values: UintColumn,
    pub scores: FloatColumn,
    pub groups: UintColumn,
}

/// Column bundle for one code in one document.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub struct CodeData {
    /// Index into the archive's code table.
    pub code: CodeId,
    /// Span id per tag, −1 for document-level tags without a span.
    pub spans: IntColumn,
    /// Label columns.
    pub labels: LabelData,
    /// Tag-local parent index per tag, −1 for roots; omitted when no tag
    /// has a parent.
    pub parents: IntColumn,
    /// Embedding vectors, one row of `vector_dim` floats per tag; omitted
    /// when the code has no vectors.
    pub vectors: FloatColumn,
    /// Row width of `vectors`.
    pub vector_dim: u32,
}

impl CodeData {
    /// Number of tags in this bundle.
    pub fn tag_count(&self) -> usize {
        self.spans.len()
    }

    /// Per-tag `(value id, score)` label slices.
    ///
    /// When `groups` is elided every tag has exactly one label; a stored
    /// NaN score reads back as `None`.
    pub fn decode_labels(&self) -> Vec<Vec<(u64, Option<f64>)>> {
        let n = self.tag_count();
        let values = self.labels.values.to_vec();
        if values.is_empty() {
            return vec![Vec::new(); n];
        }
        let scores = self.labels.scores.to_vec();
        let groups = self.labels.groups.to_vec();
        let score_at = |k: usize| scores.get(k).copied().filter(|s| !s.is_nan());
        (0..n)
            .map(|i| {
                let (lo, hi) = if groups.is_empty() {
                    (i, i + 1)
                } else {
                    let lo = if i == 0 { 0 } else { groups[i - 1] as usize };
                    (lo, groups[i] as usize)
                };
                (lo..hi).map(|k| (values[k], score_at(k))).collect()
            })
            .collect()
    }
}

/// One document as stored in the archive.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub struct DocRecord {
    /// UTF-8 text bytes.
    pub text: Vec<u8>,
    /// Metadata JSON (`null` when absent).
    pub meta: String,
    /// Statistics JSON (`null` when absent).
    pub stat: String,
    /// Per-code column bundles, sorted by `code` for binary search.
    pub tags: Vec<CodeData>,
    /// Span start offsets in canonical span order.
    pub starts: UintColumn,
    /// Span lengths in canonical span order.
    pub lens: UintColumn,
}

struct PendingTag {
    span: Option<SpanId>,
    labels: Vec<(u32, Option<f64>)>,
    parent: i64,
}

struct PendingCode {
    code: CodeId,
    tags: Vec<PendingTag>,
    vectors: Option<Vec<Vec<f64>>>,
}

/// Opaque handle to a code opened on an encoder.
#[derive(Debug, Clone, Copy)]
pub struct CodeSlot(usize);

/// Write-side encoder for a single document.
///
/// Tags arrive in tagger emission order; `finish` sorts spans into
/// canonical order, renumbers every reference and packs the columns.
pub struct DocEncoder {
    text_len: u64,
    text: Vec<u8>,
    meta: String,
    stat: String,
    spans: SpanTable,
    pending: Vec<PendingCode>,
    seen: HashSet<CodeId>,
}

impl DocEncoder {
    /// Start encoding a document with the given text and metadata JSON.
    pub fn new(text: &str, meta: String, stat: String) -> Self {
        Self {
            text_len: text.len() as u64,
            text: text.as_bytes().to_vec(),
            meta,
            stat,
            spans: SpanTable::new(),
            pending: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Open a code for tag insertion.
    ///
    /// Fails with `DuplicateCode` if the code was already opened for this
    /// document.
    pub fn start_code(&mut self, code: CodeId, name: &str) -> Result<CodeSlot> {
        if !self.seen.insert(code) {
            return Err(BuildError::DuplicateCode {
                name: name.to_string(),
            }
            .into());
        }
        self.pending.push(PendingCode {
            code,
            tags: Vec::new(),
            vectors: None,
        });
        Ok(CodeSlot(self.pending.len() - 1))
    }

    /// Append a tag to an open code.
    ///
    /// `span` is the byte interval, or `None` for a document-level tag.
    /// `labels` are `(value id, score)` pairs in emission order; `parent`
    /// is the tag-local parent position, if any.
    pub fn add_tag(
        &mut self,
        slot: CodeSlot,
        span: Option<(u64, u64)>,
        labels: Vec<(u32, Option<f64>)>,
        parent: Option<i64>,
    ) -> Result<()> {
        let span = match span {
            Some((start, end)) => {
                if start > end || end > self.text_len {
                    return Err(BuildError::OutOfRange {
                        start,
                        end,
                        len: self.text_len,
                    }
                    .into());
                }
                Some(self.spans.insert(start, end))
            }
            None => None,
        };
        self.pending[slot.0].tags.push(PendingTag {
            span,
            labels,
            parent: parent.unwrap_or(-1),
        });
        Ok(())
    }

    /// Attach embedding vectors to an open code, one row per tag in the
    /// order the tags were added.
    pub fn set_vectors(&mut self, slot: CodeSlot, vectors: Vec<Vec<f64>>) {
        self.pending[slot.0].vectors = Some(vectors);
    }

    /// Finalize: sort and renumber spans, reorder tags, pack columns.
    pub fn finish(mut self) -> Result<DocRecord> {
        let perm = self.spans.sort_and_renumber();

        let mut bundles = Vec::with_capacity(self.pending.len());
        for pending in &self.pending {
            bundles.push(pack_code(pending, &perm)?);
        }
        bundles.sort_by_key(|b| b.code);

        let starts: Vec<u64> = self.spans.iter().map(|s| s.start).collect();
        let lens: Vec<u64> = self.spans.iter().map(|s| s.len()).collect();

        Ok(DocRecord {
            text: self.text,
            meta: self.meta,
            stat: self.stat,
            tags: bundles,
            starts: UintColumn::pack(&starts, true)?,
            lens: UintColumn::pack(&lens, true)?,
        })
    }
}

/// Pack one code's tags into columns, applying the span permutation.
fn pack_code(pending: &PendingCode, perm: &[SpanId]) -> Result<CodeData> {
    let n = pending.tags.len();

    // renumbered span reference per tag, −1 for spanless tags
    let span_refs: Vec<i64> = pending
        .tags
        .iter()
        .map(|t| t.span.map_or(-1, |id| perm[id as usize] as i64))
        .collect();

    // reorder tags by ascending span id (spanless tags first)
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| span_refs[i]);

    // tag-local positions move with the sort, so parents are remapped too
    let mut tag_perm = vec![0usize; n];
    for (new, &old) in order.iter().enumerate() {
        tag_perm[old] = new;
    }

    let mut spans = Vec::with_capacity(n);
    let mut parents = Vec::with_capacity(n);
    let mut flat_values = Vec::new();
    let mut flat_scores = Vec::new();
    let mut groups = Vec::with_capacity(n);
    let mut uniform_single = true;

    for &old in &order {
        let tag = &pending.tags[old];
        spans.push(span_refs[old]);

        let parent = tag.parent;
        if parent >= 0 {
            if parent as usize >= n {
                return Err(BuildError::InvalidParent(parent).into());
            }
            parents.push(tag_perm[parent as usize] as i64);
        } else {
            parents.push(-1);
        }

        if tag.labels.len() != 1 {
            uniform_single = false;
        }
        for &(value, score) in &tag.labels {
            flat_values.push(value as u64);
            flat_scores.push(score);
        }
        groups.push(flat_values.len() as u64);
    }

    let labels = LabelData {
        values: UintColumn::pack(&flat_values, false)?,
        scores: FloatColumn::pack_scores(&flat_scores),
        groups: if uniform_single {
            UintColumn::None
        } else {
            UintColumn::pack(&groups, false)?
        },
    };

    let parents = if parents.iter().all(|&p| p < 0) {
        IntColumn::None
    } else {
        IntColumn::pack(&parents)?
    };

    let (vectors, vector_dim) = match &pending.vectors {
        Some(rows) => {
            if rows.len() != n {
                return Err(BuildError::VectorCount {
                    expected: n,
                    got: rows.len(),
                }
                .into());
            }
            let dim = rows.first().map_or(0, |r| r.len()) as u32;
            let mut flat = Vec::with_capacity(n * dim as usize);
            for &old in &order {
                let row = &rows[old];
                if row.len() as u32 != dim {
                    return Err(BuildError::DimensionMismatch {
                        expected: dim,
                        got: row.len() as u32,
                    }
                    .into());
                }
                flat.extend_from_slice(row);
            }
            (FloatColumn::pack(&flat), dim)
        }
        None => (FloatColumn::None, 0),
    };

    Ok(CodeData {
        code: pending.code,
        spans: IntColumn::pack(&spans)?,
        labels,
        parents,
        vectors,
        vector_dim,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::CodeTable;
    use serde_json::json;

    fn encode_simple() -> DocRecord {
        let mut table = CodeTable::new();
        let tagger = table.register_tagger(&json!({"library": {"name": "spacy"}}));
        let pos = table.register_code(tagger, "pos");
        let propn = table.intern_value(pos, "PROPN");

        let mut enc = DocEncoder::new("San Francisco", "null".into(), "null".into());
        let slot = enc.start_code(pos, "pos").unwrap();
        // emitted out of span order on purpose
        enc.add_tag(slot, Some((4, 13)), vec![(propn, None)], None)
            .unwrap();
        enc.add_tag(slot, Some((0, 3)), vec![(propn, Some(0.9))], None)
            .unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_spans_sorted_on_finish() {
        let record = encode_simple();
        assert_eq!(record.starts.to_vec(), vec![0, 4]);
        assert_eq!(record.lens.to_vec(), vec![3, 9]);
        assert_eq!(record.tags[0].spans.to_vec(), vec![0, 1]);
    }

    #[test]
    fn test_single_label_elides_groups() {
        let record = encode_simple();
        assert!(record.tags[0].labels.groups.is_none());
        assert_eq!(record.tags[0].labels.values.to_vec(), vec![0, 0]);
    }

    #[test]
    fn test_partial_scores_keep_column() {
        let record = encode_simple();
        let scores = record.tags[0].labels.scores.to_vec();
        assert_eq!(scores[0], 0.9);
        assert!(scores[1].is_nan());
    }

    #[test]
    fn test_multi_label_groups() {
        let mut table = CodeTable::new();
        let tagger = table.register_tagger(&json!({"library": {"name": "x"}}));
        let code = table.register_code(tagger, "pos");
        let a = table.intern_value(code, "A");
        let b = table.intern_value(code, "B");

        let mut enc = DocEncoder::new("ab", "null".into(), "null".into());
        let slot = enc.start_code(code, "pos").unwrap();
        enc.add_tag(slot, Some((0, 1)), vec![(a, Some(0.9)), (b, Some(0.1))], None)
            .unwrap();
        enc.add_tag(slot, Some((1, 2)), vec![], None).unwrap();
        let record = enc.finish().unwrap();

        let data = &record.tags[0];
        assert_eq!(data.labels.groups.to_vec(), vec![2, 2]);
        assert_eq!(data.labels.values.to_vec(), vec![a as u64, b as u64]);
    }

    #[test]
    fn test_parent_remapped_through_sort() {
        let mut table = CodeTable::new();
        let tagger = table.register_tagger(&json!({"library": {"name": "x"}}));
        let code = table.register_code(tagger, "dep");
        let root = table.intern_value(code, "root");

        let mut enc = DocEncoder::new("a b", "null".into(), "null".into());
        let slot = enc.start_code(code, "dep").unwrap();
        // tag 0 covers the later span, tag 1 the earlier; tag 0's parent is tag 1
        enc.add_tag(slot, Some((2, 3)), vec![(root, None)], Some(1))
            .unwrap();
        enc.add_tag(slot, Some((0, 1)), vec![(root, None)], None)
            .unwrap();
        let record = enc.finish().unwrap();

        let data = &record.tags[0];
        // after the sort, the earlier span is tag 0 and the later tag 1
        assert_eq!(data.spans.to_vec(), vec![0, 1]);
        assert_eq!(data.parents.to_vec(), vec![-1, 0]);
    }

    #[test]
    fn test_duplicate_code_rejected() {
        let mut table = CodeTable::new();
        let tagger = table.register_tagger(&json!({"library": {"name": "x"}}));
        let code = table.register_code(tagger, "pos");

        let mut enc = DocEncoder::new("x", "null".into(), "null".into());
        enc.start_code(code, "pos").unwrap();
        let err = enc.start_code(code, "pos").unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Build(BuildError::DuplicateCode { .. })
        ));
    }

    #[test]
    fn test_span_out_of_range() {
        let mut table = CodeTable::new();
        let tagger = table.register_tagger(&json!({"library": {"name": "x"}}));
        let code = table.register_code(tagger, "pos");

        let mut enc = DocEncoder::new("abc", "null".into(), "null".into());
        let slot = enc.start_code(code, "pos").unwrap();
        let err = enc.add_tag(slot, Some((0, 4)), vec![], None).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Build(BuildError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_spanless_tag_uses_sentinel() {
        let mut table = CodeTable::new();
        let tagger = table.register_tagger(&json!({"library": {"name": "x"}}));
        let code = table.register_code(tagger, "lang");
        let de = table.intern_value(code, "de");

        let mut enc = DocEncoder::new("text", "null".into(), "null".into());
        let slot = enc.start_code(code, "lang").unwrap();
        enc.add_tag(slot, None, vec![(de, None)], None).unwrap();
        let record = enc.finish().unwrap();

        assert_eq!(record.tags[0].spans.to_vec(), vec![-1]);
        assert!(record.starts.is_none());
    }

    #[test]
    fn test_vectors_follow_tag_order() {
        let mut table = CodeTable::new();
        let tagger = table.register_tagger(&json!({"library": {"name": "x"}}));
        let code = table.register_code(tagger, "token");

        let mut enc = DocEncoder::new("a b", "null".into(), "null".into());
        let slot = enc.start_code(code, "token").unwrap();
        enc.add_tag(slot, Some((2, 3)), vec![], None).unwrap();
        enc.add_tag(slot, Some((0, 1)), vec![], None).unwrap();
        enc.set_vectors(slot, vec![vec![2.0, 2.0], vec![1.0, 1.0]]);
        let record = enc.finish().unwrap();

        let data = &record.tags[0];
        assert_eq!(data.vector_dim, 2);
        // rows were reordered with the tags
        assert_eq!(data.vectors.to_vec(), vec![1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn test_vector_count_mismatch() {
        let mut table = CodeTable::new();
        let tagger = table.register_tagger(&json!({"library": {"name": "x"}}));
        let code = table.register_code(tagger, "token");

        let mut enc = DocEncoder::new("a", "null".into(), "null".into());
        let slot = enc.start_code(code, "token").unwrap();
        enc.add_tag(slot, Some((0, 1)), vec![], None).unwrap();
        enc.set_vectors(slot, vec![]);
        let err = enc.finish().unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Build(BuildError::VectorCount { .. })
        ));
    }
}
