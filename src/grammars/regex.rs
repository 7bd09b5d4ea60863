use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, LazyLock, OnceLock};

use onig::{RegexOptions, Syntax};
use serde::{Deserialize, Serialize};

/// A regex wrapper that serializes as a string but compiles lazily at runtime
pub struct Regex {
    pattern: String,
    compiled: OnceLock<Option<Arc<onig::Regex>>>,
}

impl Clone for Regex {
    fn clone(&self) -> Self {
        // Create a new regex with the same pattern but fresh lazy compilation
        Regex::new(self.pattern.clone())
    }
}

impl PartialEq for Regex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

impl Regex {
    pub fn new(pattern: String) -> Self {
        Self {
            pattern,
            compiled: OnceLock::new(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// `None` if the pattern is not a valid Oniguruma regex
    pub fn compiled(&self) -> Option<&Arc<onig::Regex>> {
        self.compiled
            .get_or_init(|| compile(&self.pattern).ok().map(Arc::new))
            .as_ref()
    }

    /// Validate that this regex pattern compiles successfully
    pub fn validate(&self) -> Result<(), onig::Error> {
        compile(&self.pattern).map(|_| ())
    }

    pub fn has_backreferences(&self) -> bool {
        has_backreferences(&self.pattern)
    }
}

impl Serialize for Regex {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.pattern)
    }
}

impl<'de> Deserialize<'de> for Regex {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let pattern = String::deserialize(deserializer)?;
        Ok(Regex::new(pattern))
    }
}

/// Numbered groups keep capturing even when the pattern also has named groups
pub(crate) fn compile(pattern: &str) -> Result<onig::Regex, onig::Error> {
    onig::Regex::with_options(
        pattern,
        RegexOptions::REGEX_OPTION_CAPTURE_GROUP,
        Syntax::default(),
    )
}

static BACKREFERENCE_REGEX: LazyLock<onig::Regex> =
    LazyLock::new(|| onig::Regex::new(r"\\(\d+)").expect("invalid backreference regex"));

static NAME_CAPTURE_REGEX: LazyLock<onig::Regex> = LazyLock::new(|| {
    onig::Regex::new(r"\$(\d+)|\$\{(\d+)(?::/(downcase|upcase))?\}")
        .expect("invalid name capture regex")
});

/// Whether an end/while pattern refers to captures of its begin pattern, eg `\1`
pub fn has_backreferences(pattern: &str) -> bool {
    BACKREFERENCE_REGEX.find(pattern).is_some()
}

/// Whether a `name`/`contentName` uses captures of the match, eg `entity.name.$1`
pub fn has_name_captures(name: &str) -> bool {
    name.contains('$') && NAME_CAPTURE_REGEX.find(name).is_some()
}

fn escape_regex(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_whitespace() || "-\\{}*+?|^$.,[]()#".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn capture_text<'a>(
    line: &'a str,
    captures: &[Option<(usize, usize)>],
    index: usize,
) -> Option<&'a str> {
    let (start, end) = captures.get(index).copied().flatten()?;
    line.get(start..end)
}

/// Replaces `\n` in an end/while pattern with the escaped text captured by the begin pattern.
/// Captures that did not participate are replaced with nothing.
pub fn resolve_backreferences(
    pattern: &str,
    line: &str,
    captures: &[Option<(usize, usize)>],
) -> String {
    BACKREFERENCE_REGEX.replace_all(pattern, |caps: &onig::Captures| {
        let text = caps
            .at(1)
            .and_then(|idx| idx.parse::<usize>().ok())
            .and_then(|idx| capture_text(line, captures, idx))
            .unwrap_or_default();
        escape_regex(text)
    })
}

/// Fills a name template with the captured text.
///
/// Leading dots of the captured text are removed. A template referring to a capture
/// that did not participate in the match is kept as is.
pub fn replace_name_captures<'a>(
    template: &'a str,
    line: &str,
    captures: &[Option<(usize, usize)>],
) -> Cow<'a, str> {
    if !has_name_captures(template) {
        return Cow::Borrowed(template);
    }

    Cow::Owned(
        NAME_CAPTURE_REGEX.replace_all(template, |caps: &onig::Captures| {
            let index = caps
                .at(1)
                .or_else(|| caps.at(2))
                .and_then(|idx| idx.parse::<usize>().ok());
            let Some(text) = index.and_then(|idx| capture_text(line, captures, idx)) else {
                return caps.at(0).unwrap_or_default().to_string();
            };
            let text = text.trim_start_matches('.');
            match caps.at(3) {
                Some("downcase") => text.to_lowercase(),
                Some("upcase") => text.to_uppercase(),
                _ => text.to_string(),
            }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_detect_backreferences() {
        assert!(has_backreferences(r"\1"));
        assert!(has_backreferences(r"^\s*\12\b"));
        assert!(!has_backreferences(r"\s*\w+"));
        assert!(!has_backreferences("$1"));
    }

    #[test]
    fn can_resolve_backreferences() {
        let line = "<<EOF.txt";
        let captures = [Some((0, 9)), Some((2, 9)), None];
        assert_eq!(
            resolve_backreferences(r"^\1$", line, &captures),
            r"^EOF\.txt$"
        );
        // missing captures are replaced by nothing
        assert_eq!(resolve_backreferences(r"a\2b\5", line, &captures), "ab");
        assert_eq!(
            resolve_backreferences(r"\1", "x (a|b) y", &[None, Some((2, 7))]),
            r"\(a\|b\)"
        );
    }

    #[test]
    fn can_replace_name_captures() {
        let line = "fn .Hello world";
        let captures = [Some((0, 15)), Some((3, 9)), Some((10, 15)), None];
        assert_eq!(
            replace_name_captures("entity.name.$1", line, &captures),
            "entity.name.Hello"
        );
        assert_eq!(
            replace_name_captures("a.${1:/downcase}.${2:/upcase}.${2}", line, &captures),
            "a.hello.WORLD.world"
        );
        // capture 3 did not participate, 7 does not exist
        assert_eq!(
            replace_name_captures("a.$3.${7:/upcase}", line, &captures),
            "a.$3.${7:/upcase}"
        );
        assert!(matches!(
            replace_name_captures("no.captures", line, &captures),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn compiles_lazily() {
        let re = Regex::new(r"(?<name>a)(b)".to_string());
        assert!(re.compiled().is_some());
        assert!(re.validate().is_ok());
        let invalid = Regex::new("(a".to_string());
        assert!(invalid.compiled().is_none());
        assert!(invalid.validate().is_err());
    }
}
