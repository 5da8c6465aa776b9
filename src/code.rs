//! Code dictionary: global interning of taggers, tag names and label values.
//!
//! A code is the interned `(tagger, tag name)` pair together with the
//! dictionary of every distinct label value that appears for it. Codes and
//! taggers live for the archive's lifetime and are append-only: ids are
//! assigned in first-seen order and never change once a document referencing
//! them has been written.

use rkyv::{Archive, Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tagger identifier: position in the archive's tagger table.
pub type TaggerId = u32;

/// Code identifier: position in the archive's code table.
pub type CodeId = u32;

/// Archived tagger entry: stable GUID, canonical signature, produced codes.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub struct TaggerRecord {
    /// Stable GUID; not part of the tagger's identity.
    pub guid: String,
    /// Canonical JSON signature (sorted keys, `guid` stripped).
    pub signature: String,
    /// Indices of the codes this tagger produced.
    pub codes: Vec<CodeId>,
}

/// Archived code entry: owning tagger, tag name, value dictionary.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub struct CodeRecord {
    /// Index of the owning tagger.
    pub tagger: TaggerId,
    /// Tag name as emitted by the tagger.
    pub name: String,
    /// Distinct label values in id order.
    pub values: Vec<String>,
}

/// Canonicalize a tagger signature: drop the `guid` field and serialize
/// with lexicographically sorted keys. Two taggers are the same tagger iff
/// their canonical signatures are byte-identical.
pub fn canonical_signature(signature: &serde_json::Value) -> String {
    let stripped = match signature {
        serde_json::Value::Object(map) => {
            let filtered: serde_json::Map<String, serde_json::Value> = map
                .iter()
                .filter(|(k, _)| k.as_str() != "guid")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            serde_json::Value::Object(filtered)
        }
        other => other.clone(),
    };
    // serde_json object maps are ordered, so this is already canonical
    stripped.to_string()
}

/// Value dictionary for one code: first-seen ids with an ordered side map
/// for O(log n) lookups during writing.
#[derive(Debug, Default)]
pub struct Lexicon {
    values: Vec<String>,
    lookup: BTreeMap<String, u32>,
}

impl Lexicon {
    /// Intern a value, returning its stable id.
    pub fn intern(&mut self, value: &str) -> u32 {
        if let Some(&id) = self.lookup.get(value) {
            return id;
        }
        let id = self.values.len() as u32;
        self.values.push(value.to_string());
        self.lookup.insert(value.to_string(), id);
        id
    }

    /// Values in id order.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Number of distinct values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the dictionary is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

struct BuildTagger {
    guid: String,
    signature: String,
}

struct BuildCode {
    tagger: TaggerId,
    name: String,
    values: Lexicon,
}

/// Write-side tagger and code tables.
///
/// Registration is idempotent: registering an already-known signature or
/// `(tagger, name)` pair returns the existing id. Per-document duplicate
/// detection happens in the document encoder, not here.
#[derive(Default)]
pub struct CodeTable {
    taggers: Vec<BuildTagger>,
    tagger_lookup: BTreeMap<String, TaggerId>,
    codes: Vec<BuildCode>,
    code_lookup: BTreeMap<(TaggerId, String), CodeId>,
}

impl CodeTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tagger by signature, returning the existing id when the
    /// canonical signature is already known. The GUID is taken from the
    /// signature's `guid` field, or freshly generated.
    pub fn register_tagger(&mut self, signature: &serde_json::Value) -> TaggerId {
        let canonical = canonical_signature(signature);
        if let Some(&id) = self.tagger_lookup.get(&canonical) {
            return id;
        }
        let guid = signature
            .get("guid")
            .and_then(|g| g.as_str())
            .map(|g| g.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string().to_uppercase());
        let id = self.taggers.len() as TaggerId;
        self.taggers.push(BuildTagger {
            guid,
            signature: canonical.clone(),
        });
        self.tagger_lookup.insert(canonical, id);
        id
    }

    /// Register a `(tagger, name)` code, returning the existing id when the
    /// pair is already known.
    pub fn register_code(&mut self, tagger: TaggerId, name: &str) -> CodeId {
        let key = (tagger, name.to_string());
        if let Some(&id) = self.code_lookup.get(&key) {
            return id;
        }
        let id = self.codes.len() as CodeId;
        self.codes.push(BuildCode {
            tagger,
            name: name.to_string(),
            values: Lexicon::default(),
        });
        self.code_lookup.insert(key, id);
        id
    }

    /// Intern a label value into a code's dictionary.
    pub fn intern_value(&mut self, code: CodeId, value: &str) -> u32 {
        self.codes[code as usize].values.intern(value)
    }

    /// Number of registered taggers.
    pub fn tagger_count(&self) -> usize {
        self.taggers.len()
    }

    /// Number of registered codes.
    pub fn code_count(&self) -> usize {
        self.codes.len()
    }

    /// Freeze the tables into their archived form.
    pub fn into_records(self) -> (Vec<TaggerRecord>, Vec<CodeRecord>) {
        let mut taggers: Vec<TaggerRecord> = self
            .taggers
            .into_iter()
            .map(|t| TaggerRecord {
                guid: t.guid,
                signature: t.signature,
                codes: Vec::new(),
            })
            .collect();

        let codes: Vec<CodeRecord> = self
            .codes
            .into_iter()
            .enumerate()
            .map(|(id, c)| {
                taggers[c.tagger as usize].codes.push(id as CodeId);
                CodeRecord {
                    tagger: c.tagger,
                    name: c.name,
                    values: c.values.values().to_vec(),
                }
            })
            .collect();

        (taggers, codes)
    }
}
