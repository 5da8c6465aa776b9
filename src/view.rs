//! Read facade: documents and tags exposed through a resolved view.
//!
//! There is no distinction between structural tags (sentence, token) and
//! label tags (pos, ent) — everything is a span with labels. The facade's
//! two primitives are the containment query (`Tag::tags`, "tokens inside
//! this sentence") and the alignment query (`Tag::label`, "the pos label on
//! exactly this token's span").

use crate::archive::ArchiveHeader;
use crate::column::FloatColumn;
use crate::document::{CodeData, DocRecord};
use crate::error::{ReadError, Result, SelectError};
use crate::selector::{LabelType, ResolvedView, ViewEntry};
use crate::span::{Span, SpanId, SpanTable};
use std::sync::{Arc, OnceLock};

/// A label read back from the archive.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    /// The label value.
    pub value: String,
    /// Confidence score, if the tagger emitted one.
    pub score: Option<f64>,
}

/// A tag's labels under one of the three projections.
///
/// The `Str` projection joins values with `|` and applies no escaping; a
/// value that itself contains `|` is ambiguous there. Use `Strs` when that
/// matters.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelValue {
    Str(String),
    Strs(Vec<String>),
    Labels(Vec<Label>),
}

impl LabelValue {
    /// The projection of "no labels".
    pub fn empty(label_type: LabelType) -> Self {
        match label_type {
            LabelType::Str => LabelValue::Str(String::new()),
            LabelType::Strs => LabelValue::Strs(Vec::new()),
            LabelType::Labels => LabelValue::Labels(Vec::new()),
        }
    }

    /// The joined string form, if this is a `Str` projection.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            LabelValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

fn project(label_type: LabelType, labels: Vec<(u64, Option<f64>)>, dict: &[String]) -> LabelValue {
    let value_of = |id: u64| dict.get(id as usize).cloned().unwrap_or_default();
    match label_type {
        LabelType::Str => LabelValue::Str(
            labels
                .iter()
                .map(|&(v, _)| value_of(v))
                .collect::<Vec<_>>()
                .join("|"),
        ),
        LabelType::Strs => LabelValue::Strs(labels.iter().map(|&(v, _)| value_of(v)).collect()),
        LabelType::Labels => LabelValue::Labels(
            labels
                .into_iter()
                .map(|(v, score)| Label {
                    value: value_of(v),
                    score,
                })
                .collect(),
        ),
    }
}

/// Decoded columns of one code, cached on the cursor after first access.
#[derive(Debug)]
struct CodeCols {
    spans: Vec<i64>,
    labels: Vec<Vec<(u64, Option<f64>)>>,
    parents: Vec<i64>,
    vectors: Vec<f64>,
    dim: usize,
}

impl CodeCols {
    fn decode(data: &CodeData) -> Self {
        Self {
            spans: data.spans.to_vec(),
            labels: data.decode_labels(),
            parents: data.parents.to_vec(),
            vectors: match &data.vectors {
                FloatColumn::None => Vec::new(),
                col => col.to_vec(),
            },
            dim: data.vector_dim as usize,
        }
    }

    fn tag_count(&self) -> usize {
        self.spans.len()
    }

    /// `(value id, score)` pairs of tag `i`'s label slice.
    fn labels_of(&self, i: usize) -> Vec<(u64, Option<f64>)> {
        self.labels.get(i).cloned().unwrap_or_default()
    }
}

/// Shared per-document state behind `Doc` and `Tag` handles.
#[derive(Debug)]
pub(crate) struct DocData {
    index: usize,
    text: String,
    record: DocRecord,
    header: Arc<ArchiveHeader>,
    view: Arc<ResolvedView>,
    spans: OnceLock<SpanTable>,
    cols: Vec<OnceLock<CodeCols>>,
}

impl DocData {
    fn spans(&self) -> &SpanTable {
        self.spans.get_or_init(|| {
            let starts = self.record.starts.to_vec();
            let lens = self.record.lens.to_vec();
            SpanTable::from_sorted(
                starts
                    .iter()
                    .zip(&lens)
                    .map(|(&s, &l)| Span::new(s, s + l))
                    .collect(),
            )
        })
    }

    /// Position of a code's bundle in the record, if the document has tags
    /// for it.
    fn bundle_index(&self, code: u32) -> Option<usize> {
        self.record.tags.binary_search_by_key(&code, |b| b.code).ok()
    }

    fn cols(&self, bundle: usize) -> &CodeCols {
        self.cols[bundle].get_or_init(|| CodeCols::decode(&self.record.tags[bundle]))
    }

    fn entry(&self, name: &str) -> Result<(usize, &ViewEntry)> {
        self.view
            .entries()
            .iter()
            .enumerate()
            .find(|(_, e)| e.name == name)
            .ok_or_else(|| SelectError::UnknownTag(name.to_string()).into())
    }

    fn values_dict(&self, entry: &ViewEntry) -> &[String] {
        &self.header.codes[entry.code as usize].values
    }
}

/// Tags of `slot`'s code contained in `container`, in document order.
fn contained(data: &Arc<DocData>, container: Span, slot: usize) -> Vec<Tag> {
    let entry = &data.view.entries()[slot];
    let Some(bundle) = data.bundle_index(entry.code) else {
        return Vec::new();
    };
    let cols = data.cols(bundle);
    let spans = data.spans();

    // span ids ascend with start offsets, so all candidates sit in one run
    let left = spans.first_at_or_after(container.start) as i64;
    let i0 = cols.spans.partition_point(|&id| id < left);

    let mut out = Vec::new();
    for i in i0..cols.spans.len() {
        let Some(span) = spans.get(cols.spans[i] as SpanId) else {
            break;
        };
        if span.start >= container.end {
            break;
        }
        if span.end <= container.end {
            out.push(Tag {
                data: Arc::clone(data),
                slot,
                bundle,
                index: i,
            });
        }
    }
    out
}

/// Label of the tag of `slot`'s code exactly aligned to `span_id`.
fn aligned_label(data: &Arc<DocData>, span_id: i64, slot: usize) -> LabelValue {
    let entry = &data.view.entries()[slot];
    if span_id < 0 {
        return LabelValue::empty(entry.label_type);
    }
    let Some(bundle) = data.bundle_index(entry.code) else {
        return LabelValue::empty(entry.label_type);
    };
    let cols = data.cols(bundle);
    let i = cols.spans.partition_point(|&id| id < span_id);
    if i < cols.spans.len() && cols.spans[i] == span_id {
        project(entry.label_type, cols.labels_of(i), data.values_dict(entry))
    } else {
        LabelValue::empty(entry.label_type)
    }
}

/// A document materialized through a view.
pub struct Doc {
    data: Arc<DocData>,
}

impl Doc {
    pub(crate) fn new(
        index: usize,
        mut record: DocRecord,
        header: Arc<ArchiveHeader>,
        view: Arc<ResolvedView>,
    ) -> Result<Self> {
        let text = String::from_utf8(std::mem::take(&mut record.text))
            .map_err(|_| ReadError::CorruptArchive(format!("document {index}: invalid UTF-8")))?;
        let cols = (0..record.tags.len()).map(|_| OnceLock::new()).collect();
        Ok(Self {
            data: Arc::new(DocData {
                index,
                text,
                record,
                header,
                view,
                spans: OnceLock::new(),
                cols,
            }),
        })
    }

    /// Position of this document in the archive.
    pub fn index(&self) -> usize {
        self.data.index
    }

    /// The document's text.
    pub fn text(&self) -> &str {
        &self.data.text
    }

    /// The document's metadata, or `Null` when none was stored.
    pub fn meta(&self) -> Result<serde_json::Value> {
        serde_json::from_str(&self.data.record.meta).map_err(|e| {
            ReadError::CorruptArchive(format!("document {}: bad meta: {e}", self.data.index))
                .into()
        })
    }

    /// The document's statistics block, or `Null`.
    pub fn stat(&self) -> Result<serde_json::Value> {
        serde_json::from_str(&self.data.record.stat).map_err(|e| {
            ReadError::CorruptArchive(format!("document {}: bad stat: {e}", self.data.index))
                .into()
        })
    }

    /// Exported tag names, in view order.
    pub fn names(&self) -> Vec<&str> {
        self.data.view.names().collect()
    }

    /// All tags of the given name, in span order.
    pub fn tags(&self, name: &str) -> Result<Vec<Tag>> {
        let (slot, entry) = self.data.entry(name)?;
        let Some(bundle) = self.data.bundle_index(entry.code) else {
            return Ok(Vec::new());
        };
        let n = self.data.cols(bundle).tag_count();
        Ok((0..n)
            .map(|index| Tag {
                data: Arc::clone(&self.data),
                slot,
                bundle,
                index,
            })
            .collect())
    }

    /// Tags of every name in the view, grouped by code in view order.
    pub fn all_tags(&self) -> Vec<Tag> {
        let mut out = Vec::new();
        for (slot, entry) in self.data.view.entries().iter().enumerate() {
            if let Some(bundle) = self.data.bundle_index(entry.code) {
                let n = self.data.cols(bundle).tag_count();
                out.extend((0..n).map(|index| Tag {
                    data: Arc::clone(&self.data),
                    slot,
                    bundle,
                    index,
                }));
            }
        }
        out
    }
}

/// One tag of one document, addressed through the active view.
#[derive(Debug)]
pub struct Tag {
    data: Arc<DocData>,
    slot: usize,
    bundle: usize,
    index: usize,
}

impl Tag {
    fn cols(&self) -> &CodeCols {
        self.data.cols(self.bundle)
    }

    fn entry(&self) -> &ViewEntry {
        &self.data.view.entries()[self.slot]
    }

    fn span_id(&self) -> i64 {
        self.cols().spans[self.index]
    }

    /// The exported name this tag is addressed under.
    pub fn name(&self) -> &str {
        &self.entry().name
    }

    /// The tag's span, or `None` for document-level tags.
    pub fn span(&self) -> Option<Span> {
        let id = self.span_id();
        if id < 0 {
            None
        } else {
            self.data.spans().get(id as SpanId)
        }
    }

    /// Start byte offset.
    pub fn start(&self) -> Option<u64> {
        self.span().map(|s| s.start)
    }

    /// End byte offset.
    pub fn end(&self) -> Option<u64> {
        self.span().map(|s| s.end)
    }

    /// The covered text slice; `None` for document-level tags or spans
    /// whose endpoints fall inside a multi-byte character.
    pub fn text(&self) -> Option<&str> {
        self.span()
            .and_then(|s| self.data.text.get(s.start as usize..s.end as usize))
    }

    /// The tag's labels as raw records.
    pub fn labels(&self) -> Vec<Label> {
        let dict = self.data.values_dict(self.entry());
        self.cols()
            .labels_of(self.index)
            .into_iter()
            .map(|(v, score)| Label {
                value: dict.get(v as usize).cloned().unwrap_or_default(),
                score,
            })
            .collect()
    }

    /// The tag's labels under its view entry's projection.
    pub fn value(&self) -> LabelValue {
        let entry = self.entry();
        project(
            entry.label_type,
            self.cols().labels_of(self.index),
            self.data.values_dict(entry),
        )
    }

    /// The parent tag, for tree-structured codes.
    pub fn parent(&self) -> Option<Tag> {
        let parents = &self.cols().parents;
        let p = *parents.get(self.index)?;
        if p < 0 {
            return None;
        }
        Some(Tag {
            data: Arc::clone(&self.data),
            slot: self.slot,
            bundle: self.bundle,
            index: p as usize,
        })
    }

    /// The tag's embedding vector, if its code carries vectors.
    pub fn vector(&self) -> Option<Vec<f64>> {
        let cols = self.cols();
        if cols.dim == 0 {
            return None;
        }
        let lo = self.index * cols.dim;
        cols.vectors.get(lo..lo + cols.dim).map(|v| v.to_vec())
    }

    /// Tags of `name` whose spans lie inside this tag's span, in document
    /// order. Document-level tags contain nothing.
    pub fn tags(&self, name: &str) -> Result<Vec<Tag>> {
        let (slot, _) = self.data.entry(name)?;
        Ok(match self.span() {
            Some(span) => contained(&self.data, span, slot),
            None => Vec::new(),
        })
    }

    /// Label of the tag of `name` aligned exactly to this tag's span; the
    /// empty projection when no aligned tag exists.
    pub fn label(&self, name: &str) -> Result<LabelValue> {
        let (slot, _) = self.data.entry(name)?;
        Ok(aligned_label(&self.data, self.span_id(), slot))
    }

    /// Tags of every view name inside this tag's span, grouped by code in
    /// view order.
    pub fn contained_tags(&self) -> Vec<Tag> {
        let Some(span) = self.span() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for slot in 0..self.data.view.entries().len() {
            out.extend(contained(&self.data, span, slot));
        }
        out
    }
}
