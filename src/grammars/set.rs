use std::collections::{HashMap, HashSet};
use std::ops::Index;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, OcraResult};
use crate::grammars::compiled::{
    CompiledGrammar, PatternRef, ROOT_REPOSITORY_ID, ROOT_RULE_ID, Reference, Rule, RuleId,
};
use crate::matcher::CompiledMatcher;

/// Index of a grammar in a [`GrammarSet`]. The base grammar is always 0.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrammarId(pub u16);

impl GrammarId {
    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// A rule of one of the grammars of a set
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobalRuleRef {
    pub grammar: GrammarId,
    pub rule: RuleId,
}

pub const BASE_GRAMMAR_ID: GrammarId = GrammarId(0);

/// An injection of the base grammar, ready to be matched against scope stacks
#[derive(Debug, Clone)]
pub struct ActiveInjection {
    pub matcher: CompiledMatcher,
    pub rule: GlobalRuleRef,
}

impl ActiveInjection {
    pub fn priority(&self) -> i8 {
        self.matcher.priority()
    }
}

/// The base grammar of a language with every grammar it can reach through includes
/// and injections.
///
/// Grammars are shared: the same compiled grammar can be part of many sets.
#[derive(Debug, Clone)]
pub struct GrammarSet {
    grammars: Vec<Arc<CompiledGrammar>>,
    by_scope: HashMap<String, GrammarId>,
    injections: Vec<ActiveInjection>,
}

impl Index<GrammarId> for GrammarSet {
    type Output = CompiledGrammar;

    fn index(&self, index: GrammarId) -> &Self::Output {
        &self.grammars[index.as_index()]
    }
}

impl GrammarSet {
    /// `others` are the grammars the base grammar can include, `injectors` the grammars
    /// with an injection selector that should be injected into the base grammar.
    ///
    /// Duplicates are ignored, the first grammar for a scope name wins.
    pub fn new(
        base: Arc<CompiledGrammar>,
        others: Vec<Arc<CompiledGrammar>>,
        injectors: Vec<Arc<CompiledGrammar>>,
    ) -> Self {
        let mut set = Self {
            grammars: Vec::new(),
            by_scope: HashMap::new(),
            injections: Vec::new(),
        };
        set.add(base);
        for grammar in others {
            set.add(grammar);
        }

        for (matchers, rule) in set[BASE_GRAMMAR_ID]
            .injections
            .iter()
            .map(|i| (i.matchers.clone(), i.rule))
            .collect::<Vec<_>>()
        {
            for matcher in matchers {
                set.injections.push(ActiveInjection {
                    matcher,
                    rule: GlobalRuleRef {
                        grammar: BASE_GRAMMAR_ID,
                        rule,
                    },
                });
            }
        }

        for injector in injectors {
            let matchers = injector.injection_selector.clone();
            let grammar = set.add(injector);
            for matcher in matchers {
                set.injections.push(ActiveInjection {
                    matcher,
                    rule: GlobalRuleRef {
                        grammar,
                        rule: ROOT_RULE_ID,
                    },
                });
            }
        }

        // `L:` first, `R:` last, stable otherwise
        set.injections.sort_by_key(|i| i.priority());
        set
    }

    fn add(&mut self, grammar: Arc<CompiledGrammar>) -> GrammarId {
        if let Some(id) = self.by_scope.get(&grammar.scope_name) {
            return *id;
        }
        let id = GrammarId(self.grammars.len() as u16);
        self.by_scope.insert(grammar.scope_name.clone(), id);
        self.grammars.push(grammar);
        id
    }

    pub fn base(&self) -> &CompiledGrammar {
        &self[BASE_GRAMMAR_ID]
    }

    pub fn grammars(&self) -> &[Arc<CompiledGrammar>] {
        &self.grammars
    }

    pub fn grammar_id(&self, scope_name: &str) -> Option<GrammarId> {
        self.by_scope.get(scope_name).copied()
    }

    pub fn rule(&self, rule_ref: GlobalRuleRef) -> Option<&Rule> {
        self.grammars.get(rule_ref.grammar.as_index())?.rule(rule_ref.rule)
    }

    /// Every injection, including the ones whose selector does not match anything
    pub fn injections(&self) -> &[ActiveInjection] {
        &self.injections
    }

    /// Injections whose selector matches `scopes`, in priority order
    pub fn matching_injections<'a>(
        &'a self,
        scopes: &'a [&'a str],
    ) -> impl Iterator<Item = &'a ActiveInjection> + 'a {
        self.injections.iter().filter(|i| i.matcher.matches(scopes))
    }

    /// Scope name and fingerprint of every grammar, in order
    pub fn fingerprints(&self) -> Vec<(String, u64)> {
        self.grammars
            .iter()
            .map(|g| (g.scope_name.clone(), g.fingerprint))
            .collect()
    }

    /// Resolves an include of a rule of `grammar`.
    ///
    /// `Ok(None)` means the include points to a grammar that is not in this set: like
    /// vscode-textmate, those are skipped.
    fn resolve_include(
        &self,
        grammar: GrammarId,
        include: &crate::grammars::compiled::Include,
    ) -> OcraResult<Option<GlobalRuleRef>> {
        let unresolved = || Error::UnresolvedInclude {
            grammar: self[grammar].scope_name.clone(),
            include: include.raw.clone(),
            location: include.location.clone(),
        };

        let resolved = match &include.reference {
            Reference::Self_ => GlobalRuleRef {
                grammar,
                rule: ROOT_RULE_ID,
            },
            Reference::Base => GlobalRuleRef {
                grammar: BASE_GRAMMAR_ID,
                rule: ROOT_RULE_ID,
            },
            Reference::Local(name) => GlobalRuleRef {
                grammar,
                rule: self[grammar]
                    .lookup(include.repository, name)
                    .ok_or_else(unresolved)?,
            },
            Reference::Scope(scope) => {
                let Some(other) = self.grammar_id(scope) else {
                    #[cfg(feature = "debug")]
                    log::debug!("[resolve_include] grammar {scope} is not loaded, skipping");
                    return Ok(None);
                };
                GlobalRuleRef {
                    grammar: other,
                    rule: ROOT_RULE_ID,
                }
            }
            Reference::ScopeRule(scope, name) => {
                let Some(other) = self.grammar_id(scope) else {
                    #[cfg(feature = "debug")]
                    log::debug!("[resolve_include] grammar {scope} is not loaded, skipping");
                    return Ok(None);
                };
                GlobalRuleRef {
                    grammar: other,
                    rule: self[other]
                        .lookup(ROOT_REPOSITORY_ID, name)
                        .ok_or_else(unresolved)?,
                }
            }
        };
        Ok(Some(resolved))
    }

    fn collect_rule_patterns<'a>(
        &'a self,
        rule_ref: GlobalRuleRef,
        visited: &mut HashSet<GlobalRuleRef>,
        out: &mut Vec<(GlobalRuleRef, &'a str)>,
    ) -> OcraResult<()> {
        if !visited.insert(rule_ref) {
            return Ok(());
        }
        let grammar = &self[rule_ref.grammar];
        match &grammar[rule_ref.rule] {
            Rule::Match(m) => {
                if let Some(regex) = m.regex {
                    out.push((rule_ref, grammar[regex].pattern()));
                }
            }
            Rule::IncludeOnly(i) => {
                self.collect_pattern_refs(rule_ref.grammar, &i.patterns, visited, out)?;
            }
            Rule::BeginEnd(b) => out.push((rule_ref, grammar[b.begin].pattern())),
            Rule::BeginWhile(b) => out.push((rule_ref, grammar[b.begin].pattern())),
        }
        Ok(())
    }

    fn collect_pattern_refs<'a>(
        &'a self,
        grammar: GrammarId,
        patterns: &[PatternRef],
        visited: &mut HashSet<GlobalRuleRef>,
        out: &mut Vec<(GlobalRuleRef, &'a str)>,
    ) -> OcraResult<()> {
        for pattern in patterns {
            let rule_ref = match pattern {
                PatternRef::Rule(rule) => GlobalRuleRef {
                    grammar,
                    rule: *rule,
                },
                PatternRef::Include(include) => match self.resolve_include(grammar, include)? {
                    Some(r) => r,
                    None => continue,
                },
            };
            self.collect_rule_patterns(rule_ref, visited, out)?;
        }
        Ok(())
    }

    /// The regexes to scan for when `rule_ref` is the current rule: the begin patterns of its
    /// children, includes being followed.
    ///
    /// The end pattern of a BeginEnd rule is not part of it.
    pub fn collect_patterns(
        &self,
        rule_ref: GlobalRuleRef,
    ) -> OcraResult<Vec<(GlobalRuleRef, &str)>> {
        let mut out = Vec::new();
        let mut visited = HashSet::from([rule_ref]);
        let grammar = &self[rule_ref.grammar];
        self.collect_pattern_refs(
            rule_ref.grammar,
            grammar[rule_ref.rule].patterns(),
            &mut visited,
            &mut out,
        )?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentFormat;
    use crate::grammars::RawGrammar;

    fn compile(json: &str) -> Arc<CompiledGrammar> {
        Arc::new(
            RawGrammar::load_from_str(json, DocumentFormat::Json)
                .unwrap()
                .compile()
                .unwrap(),
        )
    }

    fn patterns(set: &GrammarSet, rule_ref: GlobalRuleRef) -> Vec<String> {
        set.collect_patterns(rule_ref)
            .unwrap()
            .into_iter()
            .map(|(_, p)| p.to_string())
            .collect()
    }

    fn base() -> Arc<CompiledGrammar> {
        compile(
            r##"{
            "scopeName": "source.base",
            "patterns": [
                {"include": "#group"},
                {"include": "source.embedded"},
                {"include": "source.missing"},
                {"begin": "\\(", "end": "\\)", "patterns": [{"include": "$self"}]}
            ],
            "repository": {
                "group": {"patterns": [{"match": "a"}, {"include": "#group"}, {"match": "b"}]}
            },
            "injections": {"R:source.base": {"patterns": [{"match": "right"}]}}
        }"##,
        )
    }

    fn embedded() -> Arc<CompiledGrammar> {
        compile(
            r##"{
            "scopeName": "source.embedded",
            "patterns": [{"match": "e"}, {"include": "$base"}, {"include": "#nope"}]
        }"##,
        )
    }

    #[test]
    fn follows_includes_in_order() {
        let set = GrammarSet::new(
            base(),
            vec![compile(r#"{"scopeName": "source.embedded", "patterns": [{"match": "e"}]}"#)],
            vec![],
        );
        let root = GlobalRuleRef {
            grammar: BASE_GRAMMAR_ID,
            rule: ROOT_RULE_ID,
        };
        // recursive include is only followed once, missing grammar is skipped
        assert_eq!(patterns(&set, root), vec!["a", "b", "e", "\\("]);
    }

    #[test]
    fn unresolved_local_include_is_an_error() {
        let set = GrammarSet::new(base(), vec![embedded()], vec![]);
        let root = GlobalRuleRef {
            grammar: BASE_GRAMMAR_ID,
            rule: ROOT_RULE_ID,
        };
        let err = set.collect_patterns(root).unwrap_err();
        match err {
            Error::UnresolvedInclude {
                grammar, include, ..
            } => {
                assert_eq!(grammar, "source.embedded");
                assert_eq!(include, "#nope");
            }
            _ => panic!("unexpected error {err:?}"),
        }
    }

    #[test]
    fn sorts_injections_by_priority() {
        let injector = compile(
            r#"{
            "scopeName": "text.todo",
            "injectionSelector": "L:source.base",
            "patterns": [{"match": "TODO"}]
        }"#,
        );
        let set = GrammarSet::new(base(), vec![], vec![injector]);
        let priorities: Vec<_> = set.injections().iter().map(|i| i.priority()).collect();
        assert_eq!(priorities, vec![-1, 1]);
        assert_eq!(set.injections()[0].rule.grammar, GrammarId(1));
        assert_eq!(set.matching_injections(&["source.base"]).count(), 2);
        assert_eq!(set.matching_injections(&["source.other"]).count(), 0);
    }
}
