//! arriba - a columnar binary archive for NLP tagging results.
//!
//! An archive stores `(document, tagger, tags)` triples: labeled character
//! spans over a document's UTF-8 text, optionally with dense embedding
//! vectors, produced by one or more taggers. The format is built for
//! incremental writes during batch tagging and efficient random-access
//! reads during analysis:
//!
//! - **Columnar records**: every integer column is written at the
//!   narrowest width that fits its observed maximum, per document.
//! - **Global interning**: `(tagger, tag name, label values)` live in one
//!   append-only dictionary shared by all documents.
//! - **Sorted spans**: per-document spans are deduplicated and sorted
//!   outer-before-inner, so containment queries are a forward scan.
//! - **Views**: signature selectors and tag renames reconcile overlapping
//!   tag namespaces across taggers at read time.
//!
//! Documents enter and leave the archive in the bahia JSON form
//! ([`bahia::Document`]); readers work with the [`Doc`] facade, which
//! exposes every tag name in the active view uniformly — a sentence's
//! tokens are "token tags contained in the sentence span", a token's pos
//! is "the pos label aligned with the token span".

pub mod archive;
pub mod bahia;
pub mod code;
pub mod column;
pub mod document;
pub mod error;
pub mod selector;
pub mod span;
pub mod view;

// Re-export commonly used types
pub use archive::{Archive, ArchiveWriter, DocumentIter, DocumentRef, KeyEntry, VERSION};
pub use code::{CodeId, CodeRecord, TaggerId, TaggerRecord};
pub use column::{FloatColumn, IntColumn, UintColumn};
pub use error::{BuildError, Error, ReadError, Result, SelectError};
pub use selector::{LabelType, Selector, TagSpec, TaggerRef, View};
pub use span::{Span, SpanId};
pub use view::{Doc, Label, LabelValue, Tag};
