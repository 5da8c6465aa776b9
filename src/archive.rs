//! Archive container: file envelope, writer and memory-mapped reader.
//!
//! On disk an archive is a 4-byte magic, the format version, the header
//! length, the header message (tagger table, code table, document index,
//! external-key index) and the concatenated document records. The writer
//! spools records to a sibling temp file and assembles the final file at
//! `finish`; a crash before that leaves no readable archive behind.

use crate::bahia;
use crate::code::{CodeRecord, CodeTable, TaggerRecord};
use crate::document::DocRecord;
use crate::error::{Error, ReadError, Result};
use crate::selector::{ResolvedView, Selector, TaggerRef, View};
use crate::span::Span;
use crate::view::Doc;
use memmap2::Mmap;
use rkyv::rancor::Error as RkyvError;
use rkyv::{Archive as RkyvArchive, Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File magic.
const MAGIC: [u8; 4] = *b"ARRB";

/// Current format version. Readers reject anything else.
pub const VERSION: u64 = 1;

/// Bytes before the header message: magic, version, header length.
const HEAD_LEN: usize = 20;

/// Byte range of one document record, relative to the data section.
#[derive(Debug, Clone, Copy, RkyvArchive, Serialize, Deserialize)]
pub struct DocumentRef {
    pub start: u64,
    pub end: u64,
}

/// External-key index entry.
#[derive(Debug, Clone, RkyvArchive, Serialize, Deserialize)]
pub struct KeyEntry {
    pub key: String,
    pub doc: u32,
}

/// The archive header, serialized as one message after the file head.
#[derive(Debug, RkyvArchive, Serialize, Deserialize)]
pub struct ArchiveHeader {
    /// Archive GUID, assigned at creation.
    pub guid: String,
    /// Tagger table in registration order.
    pub taggers: Vec<TaggerRecord>,
    /// Code table in registration order.
    pub codes: Vec<CodeRecord>,
    /// Document index in insertion order.
    pub documents: Vec<DocumentRef>,
    /// External keys, sorted by key.
    pub keys: Vec<KeyEntry>,
}

fn ser_error(e: impl std::fmt::Display) -> Error {
    Error::Io(std::io::Error::other(format!("serialization error: {e}")))
}

/// Single-threaded archive writer.
///
/// Documents are appended in insertion order; the header is written only at
/// `finish`. Taggers and codes are interned across documents as they
/// appear.
pub struct ArchiveWriter {
    path: PathBuf,
    spool_path: PathBuf,
    spool: BufWriter<File>,
    table: CodeTable,
    documents: Vec<DocumentRef>,
    keys: Vec<KeyEntry>,
    offset: u64,
    guid: String,
}

impl ArchiveWriter {
    /// Create a new archive at `path`. Fails if the file already exists.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }
        let spool_path = path.with_extension("spool");
        let spool = BufWriter::new(File::create(&spool_path)?);
        Ok(Self {
            path,
            spool_path,
            spool,
            table: CodeTable::new(),
            documents: Vec::new(),
            keys: Vec::new(),
            offset: 0,
            guid: uuid::Uuid::new_v4().to_string().to_uppercase(),
        })
    }

    /// Append one document, returning its index. The document's
    /// `external_key`, if any, goes into the key index.
    pub fn add(&mut self, doc: &bahia::Document) -> Result<u32> {
        let record = bahia::encode(doc, &mut self.table)?;
        let bytes = rkyv::to_bytes::<RkyvError>(&record).map_err(ser_error)?;

        let index = self.documents.len() as u32;
        self.spool.write_all(&bytes)?;
        self.documents.push(DocumentRef {
            start: self.offset,
            end: self.offset + bytes.len() as u64,
        });
        self.offset += bytes.len() as u64;

        if let Some(key) = &doc.external_key {
            self.keys.push(KeyEntry {
                key: key.clone(),
                doc: index,
            });
        }
        Ok(index)
    }

    /// Number of documents appended so far.
    pub fn doc_count(&self) -> usize {
        self.documents.len()
    }

    /// Write the header and assemble the final archive file.
    pub fn finish(self) -> Result<()> {
        let mut spool = self.spool;
        spool.flush()?;
        drop(spool);

        let (taggers, codes) = self.table.into_records();
        let mut keys = self.keys;
        keys.sort_by(|a, b| a.key.cmp(&b.key).then(a.doc.cmp(&b.doc)));

        let header = ArchiveHeader {
            guid: self.guid,
            taggers,
            codes,
            documents: self.documents,
            keys,
        };
        let header_bytes = rkyv::to_bytes::<RkyvError>(&header).map_err(ser_error)?;

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        let mut out = BufWriter::new(file);
        out.write_all(&MAGIC)?;
        out.write_all(&VERSION.to_le_bytes())?;
        out.write_all(&(header_bytes.len() as u64).to_le_bytes())?;
        out.write_all(&header_bytes)?;

        let mut spool_file = File::open(&self.spool_path)?;
        std::io::copy(&mut spool_file, &mut out)?;
        out.flush()?;
        out.into_inner()
            .map_err(|e| Error::Io(e.into_error()))?
            .sync_all()?;

        fs::remove_file(&self.spool_path)?;
        Ok(())
    }
}

#[derive(Debug)]
struct Inner {
    mmap: Mmap,
    header: Arc<ArchiveHeader>,
    data_offset: usize,
}

/// An opened archive: an immutable handle over a memory-mapped file.
///
/// The handle is cheap to clone and safe to share across threads; every
/// iterator and document drawn from it stays valid until the last clone is
/// dropped.
#[derive(Clone, Debug)]
pub struct Archive {
    inner: Arc<Inner>,
}

impl Archive {
    /// Open an archive for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEAD_LEN {
            return Err(ReadError::CorruptArchive("file too short".into()).into());
        }
        if mmap[0..4] != MAGIC {
            return Err(ReadError::CorruptArchive("bad magic".into()).into());
        }

        let mut buf = [0u8; 8];
        buf.copy_from_slice(&mmap[4..12]);
        let version = u64::from_le_bytes(buf);
        if version != VERSION {
            return Err(ReadError::UnsupportedVersion(version).into());
        }

        buf.copy_from_slice(&mmap[12..20]);
        let header_len = u64::from_le_bytes(buf) as usize;
        let data_offset = HEAD_LEN
            .checked_add(header_len)
            .filter(|&end| end <= mmap.len())
            .ok_or_else(|| ReadError::CorruptArchive("truncated header".into()))?;

        let header: ArchiveHeader =
            rkyv::from_bytes::<ArchiveHeader, RkyvError>(&mmap[HEAD_LEN..data_offset])
                .map_err(|e| ReadError::CorruptArchive(format!("unreadable header: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                mmap,
                header: Arc::new(header),
                data_offset,
            }),
        })
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.inner.header.documents.len()
    }

    /// Whether the archive holds no documents.
    pub fn is_empty(&self) -> bool {
        self.inner.header.documents.is_empty()
    }

    /// The archive's GUID.
    pub fn guid(&self) -> &str {
        &self.inner.header.guid
    }

    /// The tagger table.
    pub fn taggers(&self) -> &[TaggerRecord] {
        &self.inner.header.taggers
    }

    /// The code table.
    pub fn codes(&self) -> &[CodeRecord] {
        &self.inner.header.codes
    }

    pub(crate) fn header(&self) -> &Arc<ArchiveHeader> {
        &self.inner.header
    }

    /// Resolve a signature selector to a single tagger.
    pub fn tagger(&self, selector: &Selector) -> Result<TaggerRef> {
        Ok(selector.resolve(&self.inner.header.taggers)?)
    }

    /// Iterate documents with the default view over every code.
    ///
    /// Fails with `AmbiguousTags` when taggers have overlapping tag names.
    pub fn iter(&self) -> Result<DocumentIter> {
        let view = ResolvedView::for_all(&self.inner.header.taggers, &self.inner.header.codes)?;
        Ok(self.iter_resolved(view))
    }

    /// Iterate documents exposing a single tagger's tags.
    pub fn iter_tagger(&self, tagger: &TaggerRef) -> Result<DocumentIter> {
        let view = ResolvedView::for_tagger(tagger, &self.inner.header.codes)?;
        Ok(self.iter_resolved(view))
    }

    /// Iterate documents through an explicit view.
    pub fn iter_view(&self, view: &View) -> Result<DocumentIter> {
        let resolved = view.resolve(&self.inner.header.codes)?;
        Ok(self.iter_resolved(resolved))
    }

    fn iter_resolved(&self, view: ResolvedView) -> DocumentIter {
        DocumentIter {
            inner: Arc::clone(&self.inner),
            view: Arc::new(view),
            next: 0,
            skip_corrupt: false,
        }
    }

    /// Load one document with the default view.
    pub fn get(&self, index: usize) -> Result<Doc> {
        let view = ResolvedView::for_all(&self.inner.header.taggers, &self.inner.header.codes)?;
        load_doc(&self.inner, index, &Arc::new(view))
    }

    /// Resolve an external key to a document index.
    pub fn find_by_key(&self, key: &str) -> Option<usize> {
        let keys = &self.inner.header.keys;
        let i = keys.partition_point(|e| e.key.as_str() < key);
        keys.get(i)
            .filter(|e| e.key == key)
            .map(|e| e.doc as usize)
    }

    /// Load one document's raw record, validated but unprojected.
    pub fn record(&self, index: usize) -> Result<DocRecord> {
        load_record(&self.inner, index)
    }
}

fn load_record(inner: &Inner, index: usize) -> Result<DocRecord> {
    let r = inner
        .header
        .documents
        .get(index)
        .ok_or_else(|| ReadError::CorruptArchive(format!("document {index} out of range")))?;

    let start = inner.data_offset as u64 + r.start;
    let end = inner.data_offset as u64 + r.end;
    if r.start > r.end || end > inner.mmap.len() as u64 {
        return Err(
            ReadError::CorruptArchive(format!("document {index}: bad byte range")).into(),
        );
    }

    let record =
        rkyv::from_bytes::<DocRecord, RkyvError>(&inner.mmap[start as usize..end as usize])
            .map_err(|e| {
                ReadError::CorruptArchive(format!("document {index}: unreadable record: {e}"))
            })?;
    validate_record(index, &record, &inner.header)?;
    Ok(record)
}

fn load_doc(inner: &Inner, index: usize, view: &Arc<ResolvedView>) -> Result<Doc> {
    let record = load_record(inner, index)?;
    Doc::new(
        index,
        record,
        Arc::clone(&inner.header),
        Arc::clone(view),
    )
}

/// Structural checks applied to a record on first access.
fn validate_record(index: usize, record: &DocRecord, header: &ArchiveHeader) -> Result<()> {
    let corrupt = |msg: String| ReadError::CorruptArchive(format!("document {index}: {msg}"));

    if std::str::from_utf8(&record.text).is_err() {
        return Err(corrupt("invalid UTF-8".into()).into());
    }
    let text_len = record.text.len() as u64;

    let starts = record.starts.to_vec();
    let lens = record.lens.to_vec();
    if starts.len() != lens.len() {
        return Err(corrupt("span column length mismatch".into()).into());
    }
    let mut spans = Vec::with_capacity(starts.len());
    for (i, (&s, &l)) in starts.iter().zip(&lens).enumerate() {
        let end = s
            .checked_add(l)
            .filter(|&e| e <= text_len)
            .ok_or_else(|| corrupt(format!("span {i} exceeds text")))?;
        spans.push(Span::new(s, end));
    }
    for (i, span) in spans.iter().enumerate().skip(1) {
        let prev = &spans[i - 1];
        let ordered =
            prev.start < span.start || (prev.start == span.start && prev.end >= span.end);
        if !ordered {
            return Err(corrupt(format!("span {i} violates canonical order")).into());
        }
    }

    let mut last_code = None;
    for bundle in &record.tags {
        if last_code.is_some_and(|c| c >= bundle.code) {
            return Err(corrupt("codes not sorted".into()).into());
        }
        last_code = Some(bundle.code);

        let dict = header
            .codes
            .get(bundle.code as usize)
            .ok_or_else(|| corrupt(format!("unknown code {}", bundle.code)))?;

        let n = bundle.tag_count();
        let span_refs = bundle.spans.to_vec();
        for window in span_refs.windows(2) {
            if window[0] > window[1] {
                return Err(corrupt("span references not sorted".into()).into());
            }
        }
        for &s in &span_refs {
            if s < -1 || s >= spans.len() as i64 {
                return Err(corrupt(format!("span reference {s} out of range")).into());
            }
        }

        let values = bundle.labels.values.to_vec();
        let groups = bundle.labels.groups.to_vec();
        let scores = bundle.labels.scores.to_vec();
        if !groups.is_empty() {
            if groups.len() != n
                || groups.windows(2).any(|w| w[0] > w[1])
                || groups.last().copied() != Some(values.len() as u64)
            {
                return Err(corrupt("inconsistent label groups".into()).into());
            }
        } else if !values.is_empty() && values.len() != n {
            return Err(corrupt("label values do not align with tags".into()).into());
        }
        if !scores.is_empty() && scores.len() != values.len() {
            return Err(corrupt("label scores do not align with values".into()).into());
        }
        for &v in &values {
            if v >= dict.values.len() as u64 {
                return Err(corrupt(format!("value id {v} out of range")).into());
            }
        }

        let parents = bundle.parents.to_vec();
        if !parents.is_empty() {
            if parents.len() != n {
                return Err(corrupt("parent column does not align with tags".into()).into());
            }
            for &p in &parents {
                if p < -1 || p >= n as i64 {
                    return Err(corrupt(format!("parent index {p} out of range")).into());
                }
            }
        }

        if !bundle.vectors.is_none()
            && bundle.vectors.len() != n * bundle.vector_dim as usize
        {
            return Err(corrupt("vector column does not align with tags".into()).into());
        }
    }
    Ok(())
}

/// Pull-based cursor over an archive's documents, in insertion order.
pub struct DocumentIter {
    inner: Arc<Inner>,
    view: Arc<ResolvedView>,
    next: usize,
    skip_corrupt: bool,
}

impl DocumentIter {
    /// Skip unreadable documents instead of failing, logging each one.
    pub fn skip_corrupt(mut self) -> Self {
        self.skip_corrupt = true;
        self
    }
}

impl Iterator for DocumentIter {
    type Item = Result<Doc>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.inner.header.documents.len() {
            let index = self.next;
            self.next += 1;
            match load_doc(&self.inner, index, &self.view) {
                Err(Error::Read(e @ ReadError::CorruptArchive(_))) if self.skip_corrupt => {
                    tracing::warn!(document = index, error = %e, "skipping corrupt document");
                }
                result => return Some(result),
            }
        }
        None
    }
}
