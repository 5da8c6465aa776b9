//! bahia interchange: the per-document JSON form of tagging results.
//!
//! This is the format the archive ingests from and exports to. A document
//! is its text plus one block per tagger, each block holding the tagger's
//! signature and a map of tag name to tag list. Export reproduces the
//! ingested JSON up to span reordering into canonical order and the
//! renumbering that goes with it.

use crate::archive::Archive;
use crate::code::{CodeTable, TaggerId};
use crate::document::{DocEncoder, DocRecord};
use crate::error::{ReadError, Result};
use crate::span::Span;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One label of a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelEntry {
    /// The label value.
    pub value: String,
    /// Confidence score, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// One tag: an optional span, labels, and an optional parent reference.
///
/// Tags without `start`/`end` are document-level.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TagEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<LabelEntry>,
    /// Position of the parent tag in this tag list, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<i64>,
}

/// One tagger's output on a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggerBlock {
    /// The tagger's signature.
    pub tagger: Value,
    /// Tag name to tag list.
    pub tags: BTreeMap<String, Vec<TagEntry>>,
    /// Embedding vectors per tag name, one row per tag.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vectors: BTreeMap<String, Vec<Vec<f64>>>,
}

/// A document with its tagging results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// The document's UTF-8 text.
    pub text: String,
    /// Caller-assigned lookup key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_key: Option<String>,
    /// Free-form metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    /// Free-form statistics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stat: Option<Value>,
    /// One block per tagger.
    pub taggers: Vec<TaggerBlock>,
}

/// Encode a bahia document into an archive record, interning taggers,
/// codes and label values into `table`.
pub fn encode(doc: &Document, table: &mut CodeTable) -> Result<DocRecord> {
    let meta = doc.meta.clone().unwrap_or(Value::Null).to_string();
    let stat = doc.stat.clone().unwrap_or(Value::Null).to_string();
    let mut enc = DocEncoder::new(&doc.text, meta, stat);

    for block in &doc.taggers {
        let tagger = table.register_tagger(&block.tagger);
        for (name, tags) in &block.tags {
            let code = table.register_code(tagger, name);
            let slot = enc.start_code(code, name)?;
            for tag in tags {
                let span = match (tag.start, tag.end) {
                    (Some(start), Some(end)) => Some((start, end)),
                    _ => None,
                };
                let labels = tag
                    .labels
                    .iter()
                    .map(|l| (table.intern_value(code, &l.value), l.score))
                    .collect();
                enc.add_tag(slot, span, labels, tag.parent)?;
            }
            if let Some(rows) = block.vectors.get(name) {
                enc.set_vectors(slot, rows.clone());
            }
        }
    }
    enc.finish()
}

/// Decode an archive record back into its bahia form.
pub(crate) fn decode(
    index: usize,
    record: &DocRecord,
    codes: &[crate::code::CodeRecord],
    taggers: &[crate::code::TaggerRecord],
    external_key: Option<String>,
) -> Result<Document> {
    let corrupt = |msg: String| ReadError::CorruptArchive(format!("document {index}: {msg}"));

    let text = String::from_utf8(record.text.clone())
        .map_err(|_| corrupt("invalid UTF-8".into()))?;
    let meta: Value =
        serde_json::from_str(&record.meta).map_err(|e| corrupt(format!("bad meta: {e}")))?;
    let stat: Value =
        serde_json::from_str(&record.stat).map_err(|e| corrupt(format!("bad stat: {e}")))?;

    let starts = record.starts.to_vec();
    let lens = record.lens.to_vec();
    let spans: Vec<Span> = starts
        .iter()
        .zip(&lens)
        .map(|(&s, &l)| Span::new(s, s + l))
        .collect();

    let mut blocks: BTreeMap<TaggerId, TaggerBlock> = BTreeMap::new();
    for bundle in &record.tags {
        let code = codes
            .get(bundle.code as usize)
            .ok_or_else(|| corrupt(format!("unknown code {}", bundle.code)))?;
        let tagger = taggers
            .get(code.tagger as usize)
            .ok_or_else(|| corrupt(format!("unknown tagger {}", code.tagger)))?;

        let block = blocks.entry(code.tagger).or_insert_with(|| {
            let mut signature: Value =
                serde_json::from_str(&tagger.signature).unwrap_or(Value::Null);
            if let Value::Object(map) = &mut signature {
                map.insert("guid".into(), Value::String(tagger.guid.clone()));
            }
            TaggerBlock {
                tagger: signature,
                tags: BTreeMap::new(),
                vectors: BTreeMap::new(),
            }
        });

        let span_refs = bundle.spans.to_vec();
        let parents = bundle.parents.to_vec();
        let labels = bundle.decode_labels();

        let entries: Vec<TagEntry> = (0..bundle.tag_count())
            .map(|i| {
                let (start, end) = match span_refs[i] {
                    s if s >= 0 => {
                        let span = spans[s as usize];
                        (Some(span.start), Some(span.end))
                    }
                    _ => (None, None),
                };
                TagEntry {
                    start,
                    end,
                    labels: labels[i]
                        .iter()
                        .map(|&(v, score)| LabelEntry {
                            value: code.values[v as usize].clone(),
                            score,
                        })
                        .collect(),
                    parent: parents.get(i).copied().filter(|&p| p >= 0),
                }
            })
            .collect();
        block.tags.insert(code.name.clone(), entries);

        if !bundle.vectors.is_none() && bundle.vector_dim > 0 {
            let dim = bundle.vector_dim as usize;
            let flat = bundle.vectors.to_vec();
            let rows = flat.chunks(dim).map(|c| c.to_vec()).collect();
            block.vectors.insert(code.name.clone(), rows);
        }
    }

    Ok(Document {
        text,
        external_key,
        meta: if meta.is_null() { None } else { Some(meta) },
        stat: if stat.is_null() { None } else { Some(stat) },
        taggers: blocks.into_values().collect(),
    })
}

impl Archive {
    /// Export one document in its bahia JSON form.
    pub fn export(&self, index: usize) -> Result<Document> {
        let record = self.record(index)?;
        let header = self.header();
        let external_key = header
            .keys
            .iter()
            .find(|e| e.doc as usize == index)
            .map(|e| e.key.clone());
        decode(index, &record, &header.codes, &header.taggers, external_key)
    }
}
