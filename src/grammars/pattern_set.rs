use std::fmt::{Debug, Formatter};

use onig::{RegSet, RegexOptions, SearchOptions};

use crate::error::{Error, OcraResult};
use crate::grammars::GlobalRuleRef;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PatternSetMatch {
    pub rule_ref: GlobalRuleRef,
    pub start: usize,
    pub end: usize,
    pub capture_pos: Vec<Option<(usize, usize)>>,
}

/// An eagerly compiled pattern set for efficient batch regex matching using onig RegSet.
///
/// The leftmost match wins, ties going to the pattern that comes first.
pub struct PatternSet {
    rule_refs: Vec<GlobalRuleRef>,
    regset: Option<RegSet>,
}

impl PatternSet {
    pub fn new(items: Vec<(GlobalRuleRef, String)>) -> OcraResult<Self> {
        if items.is_empty() {
            return Ok(Self {
                rule_refs: Vec::new(),
                regset: None,
            });
        }

        let (rule_refs, patterns): (Vec<_>, Vec<_>) = items.into_iter().unzip();
        let pattern_strs: Vec<&str> = patterns.iter().map(|s| s.as_str()).collect();

        let regset = RegSet::with_options(&pattern_strs, RegexOptions::REGEX_OPTION_CAPTURE_GROUP)
            .map_err(|e| {
                Error::TokenizeRegex(format!(
                    "failed to compile pattern set with {} patterns: {e}",
                    pattern_strs.len(),
                ))
            })?;

        Ok(Self {
            rule_refs,
            regset: Some(regset),
        })
    }

    pub fn len(&self) -> usize {
        self.rule_refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rule_refs.is_empty()
    }

    /// Searches from `pos` to the end of `text`
    pub fn find_at(&self, text: &str, pos: usize) -> Option<PatternSetMatch> {
        let regset = self.regset.as_ref()?;

        // We need to specify pos/text.len() because some regex might do lookbehind
        let (pattern_index, captures) = regset.captures_with_options(
            text,
            pos,
            text.len(),
            onig::RegSetLead::Position,
            SearchOptions::SEARCH_OPTION_NONE,
        )?;
        let (start, end) = captures.pos(0)?;
        let capture_pos: Vec<Option<(usize, usize)>> =
            (0..captures.len()).map(|i| captures.pos(i)).collect();

        Some(PatternSetMatch {
            rule_ref: self.rule_refs[pattern_index],
            start,
            end,
            capture_pos,
        })
    }
}

impl Debug for PatternSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PatternSet({} rules)", self.rule_refs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars::{GrammarId, RuleId};

    fn rule(id: u32) -> GlobalRuleRef {
        GlobalRuleRef {
            grammar: GrammarId(0),
            rule: RuleId(id),
        }
    }

    #[test]
    fn leftmost_then_first_pattern_wins() {
        let set = PatternSet::new(vec![
            (rule(1), r"b+".to_string()),
            (rule(2), r"a(b)".to_string()),
            (rule(3), r"ab".to_string()),
        ])
        .unwrap();

        let m = set.find_at("xabb", 0).unwrap();
        assert_eq!(m.rule_ref, rule(2));
        assert_eq!((m.start, m.end), (1, 3));
        assert_eq!(m.capture_pos, vec![Some((1, 3)), Some((2, 3))]);

        let m = set.find_at("xabb", 2).unwrap();
        assert_eq!(m.rule_ref, rule(1));
        assert_eq!((m.start, m.end), (2, 4));
        assert!(set.find_at("xyz", 0).is_none());
    }

    #[test]
    fn lookbehind_sees_text_before_pos() {
        let set = PatternSet::new(vec![(rule(1), r"(?<=a)b".to_string())]).unwrap();
        assert_eq!(set.find_at("ab", 1).map(|m| m.start), Some(1));
    }

    #[test]
    fn invalid_patterns_are_errors() {
        let err = PatternSet::new(vec![(rule(1), "(a".to_string())]).unwrap_err();
        assert!(matches!(err, Error::TokenizeRegex(_)));
        assert!(PatternSet::new(vec![]).unwrap().find_at("a", 0).is_none());
    }
}
