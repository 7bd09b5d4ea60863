use std::collections::HashMap;

use crate::attributes::StandardTokenType;
use crate::scope::is_scope_prefix;

/// The language id and token type a scope name maps to, before applying a theme.
///
/// A language id of `0` and a token type of `None` mean "inherit from the parent scope".
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BasicScopeAttributes {
    pub language_id: u8,
    pub token_type: Option<StandardTokenType>,
}

impl BasicScopeAttributes {
    pub const fn new(language_id: u8, token_type: Option<StandardTokenType>) -> Self {
        Self {
            language_id,
            token_type,
        }
    }
}

const NULL_SCOPE_ATTRIBUTES: BasicScopeAttributes =
    BasicScopeAttributes::new(0, Some(StandardTokenType::Other));

/// Whether `word` appears in `scope` surrounded by non-word characters.
fn contains_word(scope: &str, word: &str) -> bool {
    let is_word_byte = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let bytes = scope.as_bytes();
    let mut start = 0;

    while let Some(found) = scope[start..].find(word) {
        let begin = start + found;
        let end = begin + word.len();
        let boundary_before = begin == 0 || !is_word_byte(bytes[begin - 1]);
        let boundary_after = end == bytes.len() || !is_word_byte(bytes[end]);
        if boundary_before && boundary_after {
            return true;
        }
        start = begin + 1;
    }
    false
}

/// Coarse token type of a scope name.
///
/// `comment` wins over `string`, which wins over `regex`, so `string.regexp` is a string.
pub(crate) fn standard_token_type(scope: &str) -> Option<StandardTokenType> {
    if contains_word(scope, "comment") {
        Some(StandardTokenType::Comment)
    } else if contains_word(scope, "string") {
        Some(StandardTokenType::String)
    } else if contains_word(scope, "regex") {
        Some(StandardTokenType::RegEx)
    } else if contains_word(scope, "meta.embedded") {
        Some(StandardTokenType::Other)
    } else {
        None
    }
}

/// Maps scope names to their [`BasicScopeAttributes`].
///
/// Each instance memoizes its own results: nothing is shared between providers so two
/// languages with different embedded language maps never see each other's results.
#[derive(Debug)]
pub struct BasicScopeAttributesProvider {
    default_attributes: BasicScopeAttributes,
    /// Scope prefix -> language id
    embedded_languages: Vec<(String, u8)>,
    cache: papaya::HashMap<String, BasicScopeAttributes>,
}

impl BasicScopeAttributesProvider {
    pub fn new(initial_language_id: u8, embedded_languages: &HashMap<String, u8>) -> Self {
        let mut embedded_languages: Vec<(String, u8)> = embedded_languages
            .iter()
            .map(|(scope, id)| (scope.clone(), *id))
            .collect();
        // Longest scope first so the most specific prefix is found first
        embedded_languages.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        Self {
            default_attributes: BasicScopeAttributes::new(initial_language_id, None),
            embedded_languages,
            cache: papaya::HashMap::new(),
        }
    }

    /// The attributes of the root of any scope stack
    pub fn default_attributes(&self) -> BasicScopeAttributes {
        self.default_attributes
    }

    /// Attributes for `scope`, `None` being the zero attributes
    pub fn basic_scope_attributes(&self, scope: Option<&str>) -> BasicScopeAttributes {
        let Some(scope) = scope else {
            return NULL_SCOPE_ATTRIBUTES;
        };

        let cache = self.cache.pin();
        if let Some(attrs) = cache.get(scope) {
            return *attrs;
        }

        let attrs = BasicScopeAttributes::new(
            self.scope_to_language(scope),
            standard_token_type(scope),
        );
        cache.insert(scope.to_string(), attrs);
        attrs
    }

    fn scope_to_language(&self, scope: &str) -> u8 {
        self.embedded_languages
            .iter()
            .find(|(prefix, _)| is_scope_prefix(prefix, scope))
            .map(|(_, id)| *id)
            .unwrap_or(0)
    }
}
