use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::path::Path;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::document::{DocumentFormat, LOCATION_KEY, parse_document, parse_document_file};
use crate::error::{OcraResult, SourceLocation};
use crate::grammars::compiled::CompiledGrammar;

/// Accepts a string, or ignores any other type of value
fn deserialize_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_str().map(|s| s.to_string()))
}

/// `applyEndPatternLast` is either a boolean or 0/1
fn deserialize_bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    })
}

/// Repositories are maps of rules but some grammars use a bare array of patterns as value.
fn deserialize_repository<'de, D>(deserializer: D) -> Result<BTreeMap<String, RawRule>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Entry {
        Patterns(Vec<RawRule>),
        Rule(Box<RawRule>),
    }

    let entries: BTreeMap<String, serde_json::Value> = BTreeMap::deserialize(deserializer)?;
    let mut out = BTreeMap::new();
    for (name, value) in entries {
        if name == LOCATION_KEY {
            continue;
        }
        let rule = match Entry::deserialize(value).map_err(de::Error::custom)? {
            Entry::Patterns(patterns) => RawRule {
                patterns,
                ..Default::default()
            },
            Entry::Rule(rule) => *rule,
        };
        out.insert(name, rule);
    }
    Ok(out)
}

/// Capture rules keyed by capture index.
///
/// Grammars write them as an object keyed by index strings, or more rarely as an array.
/// Keys that are not numbers are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Captures(pub BTreeMap<usize, RawRule>);

impl Deref for Captures {
    type Target = BTreeMap<usize, RawRule>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Captures {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CapturesVisitor;

        impl<'de> Visitor<'de> for CapturesVisitor {
            type Value = Captures;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map or an array of captures")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut out = BTreeMap::new();
                while let Some(key) = map.next_key::<String>()? {
                    let value: serde_json::Value = map.next_value()?;
                    let Ok(idx) = key.trim().parse::<usize>() else {
                        continue;
                    };
                    let rule = RawRule::deserialize(value).map_err(de::Error::custom)?;
                    out.insert(idx, rule);
                }
                Ok(Captures(out))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut out = BTreeMap::new();
                let mut idx = 0;
                while let Some(rule) = seq.next_element::<RawRule>()? {
                    out.insert(idx, rule);
                    idx += 1;
                }
                Ok(Captures(out))
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Captures::default())
            }
        }

        deserializer.deserialize_any(CapturesVisitor)
    }
}

/// A rule as written in a grammar: which kind of rule it is depends on which fields are set.
///
/// ```json
/// {
///   "name": "string.quoted.double.js",
///   "begin": "\"",
///   "end": "\"",
///   "beginCaptures": {
///     "0": { "name": "punctuation.definition.string.begin.js" }
///   },
///   "patterns": [{ "include": "#escapes" }]
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RawRule {
    /// `$self`, `$base`, `#name`, `scope` or `scope#name`
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub include: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub content_name: Option<String>,
    #[serde(rename = "match", deserialize_with = "deserialize_optional_string")]
    pub match_: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub begin: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub end: Option<String>,
    #[serde(rename = "while", deserialize_with = "deserialize_optional_string")]
    pub while_: Option<String>,
    /// Fallback for the begin/end/while captures if they are not set
    pub captures: Captures,
    pub begin_captures: Captures,
    pub end_captures: Captures,
    pub while_captures: Captures,
    pub patterns: Vec<RawRule>,
    #[serde(deserialize_with = "deserialize_repository")]
    pub repository: BTreeMap<String, RawRule>,
    #[serde(deserialize_with = "deserialize_bool_or_int")]
    pub apply_end_pattern_last: bool,
    /// Only set if the document was parsed with locations
    #[serde(rename = "$textmateLocation")]
    pub location: Option<SourceLocation>,
}

/// Top-level structure representing a complete TextMate grammar
///
/// ```json
/// {
///   "name": "JavaScript",
///   "scopeName": "source.js",
///   "patterns": [
///     { "include": "#statements" }
///   ],
///   "repository": {
///     "statements": {
///       "patterns": [{ "include": "#keywords" }]
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawGrammar {
    /// Human-readable name of the language
    #[serde(default)]
    pub name: String,
    /// Unique identifier for this grammar's scope
    /// Example: "source.js", "text.html.markdown", "source.rust"
    pub scope_name: String,
    /// File extensions this grammar applies to
    #[serde(default)]
    pub file_types: Vec<String>,
    /// Named rules that can be referenced by includes
    #[serde(default, deserialize_with = "deserialize_repository")]
    pub repository: BTreeMap<String, RawRule>,
    /// Root patterns
    #[serde(default)]
    pub patterns: Vec<RawRule>,
    /// Selector -> rule injected in the scopes of this grammar matching that selector
    #[serde(default, deserialize_with = "deserialize_repository")]
    pub injections: BTreeMap<String, RawRule>,
    /// When set, this grammar is an injector: its root patterns are injected in the scopes
    /// matching that selector
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub injection_selector: Option<String>,
    /// Scope names of the grammars this injector grammar should be injected into
    #[serde(default)]
    pub inject_to: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub first_line_match: Option<String>,
    #[serde(rename = "$textmateLocation", default)]
    pub location: Option<SourceLocation>,
}

impl RawGrammar {
    /// Parses a grammar from a JSON or PLIST string
    pub fn load_from_str(content: &str, format: DocumentFormat) -> OcraResult<Self> {
        let value = parse_document(content, format, None)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Parses a grammar file, the format being picked from the file extension.
    ///
    /// Rules get their location in the file so errors can point to them.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> OcraResult<Self> {
        let value = parse_document_file(path, None, true)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Compile this raw grammar into a compiled grammar
    pub fn compile(self) -> OcraResult<CompiledGrammar> {
        CompiledGrammar::from_raw_grammar(self)
    }
}
