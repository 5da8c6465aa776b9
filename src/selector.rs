//! Selector engine: signature queries, tag specs and view resolution.
//!
//! A tagger selector is a nested mapping of string keys matched as a
//! structural subset against a tagger's signature; dotted keys are sugar
//! for nesting. A view is an ordered list of tag specs — one tag name from
//! one tagger, optionally renamed and typed — that determines which tags a
//! document facade exposes under which names.

use crate::code::{CodeId, CodeRecord, TaggerId, TaggerRecord};
use crate::error::SelectError;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// How a tag's labels are projected when read through the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelType {
    /// Values joined with `|` into one string; empty string if no labels.
    Str,
    /// List of value strings.
    Strs,
    /// List of `(value, score)` records.
    Labels,
}

/// Default projection for a tag name: morphological tags hold feature
/// bundles and default to `Strs`, everything else to `Str`.
pub fn default_label_type(name: &str) -> LabelType {
    match name {
        "morph" | "feats" => LabelType::Strs,
        _ => LabelType::Str,
    }
}

/// Tag names are exported with `-` normalized to `_`.
pub fn normalize_name(name: &str) -> String {
    name.replace('-', "_")
}

/// Expand dotted keys into nested maps, recursively.
fn expand_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, v) in map {
                insert_path(&mut out, key, expand_keys(v));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn insert_path(target: &mut Map<String, Value>, key: &str, value: Value) {
    match key.split_once('.') {
        Some((head, rest)) => {
            let entry = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(inner) = entry {
                insert_path(inner, rest, value);
            }
        }
        None => {
            target.insert(key.to_string(), value);
        }
    }
}

/// Structural subset match: every leaf in `pattern` must equal the
/// corresponding leaf in `data`.
fn match_pattern(pattern: &Value, data: &Value) -> bool {
    match pattern {
        Value::Object(map) => match data {
            Value::Object(data_map) => map.iter().all(|(k, v)| {
                data_map
                    .get(k)
                    .map(|data_v| match_pattern(v, data_v))
                    .unwrap_or(false)
            }),
            _ => false,
        },
        leaf => leaf == data,
    }
}

/// A signature query over the archive's taggers.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pattern: Value,
}

impl Selector {
    /// Build a selector from a nested mapping; dotted keys are expanded.
    pub fn new(pattern: Value) -> Self {
        Self {
            pattern: expand_keys(&pattern),
        }
    }

    /// Whether the selector matches a tagger signature.
    pub fn matches(&self, signature: &Value) -> bool {
        match_pattern(&self.pattern, signature)
    }

    /// Resolve the selector against a tagger table.
    ///
    /// Fails with `NoMatch` when no tagger matches and `Ambiguous` when
    /// more than one does. Resolution is deterministic: taggers are tested
    /// in table order.
    pub fn resolve(&self, taggers: &[TaggerRecord]) -> Result<TaggerRef, SelectError> {
        let mut matched = Vec::new();
        for (index, tagger) in taggers.iter().enumerate() {
            let signature: Value =
                serde_json::from_str(&tagger.signature).unwrap_or(Value::Null);
            if self.matches(&signature) {
                matched.push(TaggerRef {
                    index: index as TaggerId,
                    guid: tagger.guid.clone(),
                });
            }
        }
        match matched.len() {
            0 => Err(SelectError::NoMatch(self.to_string())),
            1 => Ok(matched.remove(0)),
            n => Err(SelectError::Ambiguous(self.to_string(), n)),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

/// A tagger resolved from a selector.
#[derive(Debug, Clone)]
pub struct TaggerRef {
    /// Index into the archive's tagger table.
    pub index: TaggerId,
    /// The tagger's GUID.
    pub guid: String,
}

impl TaggerRef {
    /// Pick one tag name from this tagger.
    pub fn tag(&self, name: &str) -> TagSpec {
        TagSpec {
            tagger: self.index,
            name: name.to_string(),
            rename: None,
            label_type: None,
        }
    }
}

/// One entry of a view: a tag name from a tagger, with optional rename and
/// label type.
#[derive(Debug, Clone)]
pub struct TagSpec {
    tagger: TaggerId,
    name: String,
    rename: Option<String>,
    label_type: Option<LabelType>,
}

impl TagSpec {
    /// Export the tag under a different name.
    pub fn to_name(mut self, name: &str) -> Self {
        self.rename = Some(name.to_string());
        self
    }

    /// Override the label projection.
    pub fn with_label_type(mut self, label_type: LabelType) -> Self {
        self.label_type = Some(label_type);
        self
    }
}

/// An ordered list of tag specs across potentially several taggers.
#[derive(Debug, Clone, Default)]
pub struct View {
    specs: Vec<TagSpec>,
}

impl View {
    /// Create an empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tag spec.
    pub fn tag(mut self, spec: TagSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Resolve the view against the archive's code table.
    ///
    /// Every exported name must be unique. A spec whose tag name does not
    /// occur in the archive resolves to nothing and is dropped.
    pub fn resolve(&self, codes: &[CodeRecord]) -> Result<ResolvedView, SelectError> {
        let mut entries = Vec::new();
        for spec in &self.specs {
            let found = codes
                .iter()
                .position(|c| c.tagger == spec.tagger && c.name == spec.name);
            if let Some(code) = found {
                let name = spec
                    .rename
                    .clone()
                    .unwrap_or_else(|| normalize_name(&spec.name));
                let label_type = spec
                    .label_type
                    .unwrap_or_else(|| default_label_type(&spec.name));
                entries.push(ViewEntry {
                    code: code as CodeId,
                    name,
                    label_type,
                });
            }
        }
        ResolvedView::from_entries(entries)
    }
}

/// A resolved view entry: exported name, backing code and projection.
#[derive(Debug, Clone)]
pub struct ViewEntry {
    /// Index into the archive's code table.
    pub code: CodeId,
    /// Exported name on the document facade.
    pub name: String,
    /// Label projection for this name.
    pub label_type: LabelType,
}

/// A view resolved against an archive: exported names mapped to codes, in
/// view order.
#[derive(Debug, Clone, Default)]
pub struct ResolvedView {
    entries: Vec<ViewEntry>,
    by_name: HashMap<String, usize>,
}

impl ResolvedView {
    fn from_entries(entries: Vec<ViewEntry>) -> Result<Self, SelectError> {
        let mut by_name = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            if by_name.insert(entry.name.clone(), i).is_some() {
                return Err(SelectError::NameClash(entry.name.clone()));
            }
        }
        Ok(Self { entries, by_name })
    }

    /// Synthesize the default view over every code in the archive.
    ///
    /// Fails with `AmbiguousTags` when taggers have overlapping tag names.
    pub fn for_all(
        taggers: &[TaggerRecord],
        codes: &[CodeRecord],
    ) -> Result<Self, SelectError> {
        let mut names = HashSet::new();
        for code in codes {
            if !names.insert(code.name.as_str()) {
                return Err(SelectError::AmbiguousTags(taggers.len()));
            }
        }
        let entries = codes
            .iter()
            .enumerate()
            .map(|(i, code)| ViewEntry {
                code: i as CodeId,
                name: normalize_name(&code.name),
                label_type: default_label_type(&code.name),
            })
            .collect();
        Self::from_entries(entries)
    }

    /// Synthesize the default view over a single tagger's codes. Tag names
    /// are unique within one tagger, so this cannot clash.
    pub fn for_tagger(tagger: &TaggerRef, codes: &[CodeRecord]) -> Result<Self, SelectError> {
        let entries = codes
            .iter()
            .enumerate()
            .filter(|(_, code)| code.tagger == tagger.index)
            .map(|(i, code)| ViewEntry {
                code: i as CodeId,
                name: normalize_name(&code.name),
                label_type: default_label_type(&code.name),
            })
            .collect();
        Self::from_entries(entries)
    }

    /// Entries in view order.
    pub fn entries(&self) -> &[ViewEntry] {
        &self.entries
    }

    /// Look up an exported name.
    pub fn get(&self, name: &str) -> Option<&ViewEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Exported names in view order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn taggers() -> Vec<TaggerRecord> {
        vec![
            TaggerRecord {
                guid: "A".into(),
                signature: json!({"library": {"name": "spacy", "version": "3.2.1"}})
                    .to_string(),
                codes: vec![0, 1],
            },
            TaggerRecord {
                guid: "B".into(),
                signature: json!({"library": {"name": "stanza"}}).to_string(),
                codes: vec![2],
            },
        ]
    }

    fn codes() -> Vec<CodeRecord> {
        vec![
            CodeRecord {
                tagger: 0,
                name: "pos".into(),
                values: vec![],
            },
            CodeRecord {
                tagger: 0,
                name: "ent".into(),
                values: vec![],
            },
            CodeRecord {
                tagger: 1,
                name: "pos".into(),
                values: vec![],
            },
        ]
    }

    #[test]
    fn test_dotted_key_expansion() {
        let a = Selector::new(json!({"library.name": "spacy"}));
        let b = Selector::new(json!({"library": {"name": "spacy"}}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_selector_subset_match() {
        let sel = Selector::new(json!({"library.name": "spacy"}));
        assert!(sel.matches(&json!({"library": {"name": "spacy", "version": "3.2.1"}})));
        assert!(!sel.matches(&json!({"library": {"name": "stanza"}})));
        assert!(!sel.matches(&json!({"model": {"name": "core"}})));
    }

    #[test]
    fn test_selector_resolution() {
        let taggers = taggers();
        let spacy = Selector::new(json!({"library.name": "spacy"}))
            .resolve(&taggers)
            .unwrap();
        assert_eq!(spacy.index, 0);

        // empty nested pattern matches any tagger that has the key
        let err = Selector::new(json!({"library": {}}))
            .resolve(&taggers)
            .unwrap_err();
        assert!(matches!(err, SelectError::Ambiguous(_, 2)));

        let err = Selector::new(json!({"library.name": "nltk"}))
            .resolve(&taggers)
            .unwrap_err();
        assert!(matches!(err, SelectError::NoMatch(_)));
    }

    #[test]
    fn test_selector_deterministic() {
        let taggers = taggers();
        let sel = Selector::new(json!({"library.name": "stanza"}));
        let a = sel.resolve(&taggers).unwrap();
        let b = sel.resolve(&taggers).unwrap();
        assert_eq!(a.index, b.index);
    }

    #[test]
    fn test_default_view_rejects_overlap() {
        let err = ResolvedView::for_all(&taggers(), &codes()).unwrap_err();
        assert!(matches!(err, SelectError::AmbiguousTags(2)));
    }

    #[test]
    fn test_view_rename_avoids_clash() {
        let spacy = TaggerRef {
            index: 0,
            guid: "A".into(),
        };
        let stanza = TaggerRef {
            index: 1,
            guid: "B".into(),
        };
        let view = View::new()
            .tag(spacy.tag("pos"))
            .tag(stanza.tag("pos").to_name("st_pos"));
        let resolved = view.resolve(&codes()).unwrap();
        assert_eq!(resolved.get("pos").unwrap().code, 0);
        assert_eq!(resolved.get("st_pos").unwrap().code, 2);

        let clash = View::new()
            .tag(spacy.tag("pos"))
            .tag(stanza.tag("pos"))
            .resolve(&codes())
            .unwrap_err();
        assert!(matches!(clash, SelectError::NameClash(_)));
    }

    #[test]
    fn test_single_tagger_view() {
        let stanza = TaggerRef {
            index: 1,
            guid: "B".into(),
        };
        let resolved = ResolvedView::for_tagger(&stanza, &codes()).unwrap();
        assert_eq!(resolved.entries().len(), 1);
        assert_eq!(resolved.get("pos").unwrap().code, 2);
    }

    #[test]
    fn test_default_label_types() {
        assert_eq!(default_label_type("pos"), LabelType::Str);
        assert_eq!(default_label_type("morph"), LabelType::Strs);
        assert_eq!(default_label_type("feats"), LabelType::Strs);
    }
}
