use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Deref, Index};

use serde::{Deserialize, Serialize};

use crate::error::{OcraResult, SourceLocation};
use crate::grammars::raw::{Captures, RawGrammar, RawRule};
use crate::grammars::regex::{Regex, replace_name_captures};
use crate::matcher::{CompiledMatcher, parse_selector_matchers};

/// Index of a rule in its grammar. Only meaningful for the grammar that created it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u32);

impl RuleId {
    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl Deref for RuleId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The root rule of every grammar: its top-level patterns
pub const ROOT_RULE_ID: RuleId = RuleId(0);
/// Not an actual rule: marks a match of the end pattern of the current BeginEnd rule
pub const END_RULE_ID: RuleId = RuleId(u32::MAX);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegexId(u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryId(u32);

/// The top-level repository of a grammar
pub const ROOT_REPOSITORY_ID: RepositoryId = RepositoryId(0);

/// A named set of rules. Nested repositories shadow their parents.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Repository {
    pub parent: Option<RepositoryId>,
    pub rules: BTreeMap<String, RuleId>,
}

/// per vscode-textmate:
///  Allowed values:
///  * Scope Name, e.g. `source.ts`
///  * Top level scope reference, e.g. `source.ts#entity.name.class`
///  * Relative scope reference, e.g. `#entity.name.class`
///  * self, e.g. `$self`
///  * base, e.g. `$base`
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum Reference {
    Self_,
    Base,
    Local(String),
    Scope(String),
    ScopeRule(String, String),
}

impl From<&str> for Reference {
    fn from(value: &str) -> Self {
        match value {
            "$self" => Self::Self_,
            "$base" => Self::Base,
            s if s.starts_with('#') => Self::Local(s[1..].to_string()),
            s => match s.split_once('#') {
                Some((scope, rule)) => Self::ScopeRule(scope.to_string(), rule.to_string()),
                None => Self::Scope(s.to_string()),
            },
        }
    }
}

/// An include, kept as written until it's resolved during a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Include {
    pub reference: Reference,
    /// The include string as written in the grammar
    pub raw: String,
    /// Where local references are looked up
    pub repository: RepositoryId,
    pub location: Option<SourceLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatternRef {
    Rule(RuleId),
    Include(Include),
}

/// Capture index -> rule assigning scopes to it
pub type CaptureRules = Vec<Option<RuleId>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub name: Option<String>,
    /// `None` for rules only used to give a name to a capture
    pub regex: Option<RegexId>,
    pub captures: CaptureRules,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludeOnly {
    pub name: Option<String>,
    pub content_name: Option<String>,
    pub patterns: Vec<PatternRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeginEnd {
    pub name: Option<String>,
    pub content_name: Option<String>,
    pub begin: RegexId,
    pub begin_captures: CaptureRules,
    pub end: RegexId,
    pub end_has_backrefs: bool,
    pub end_captures: CaptureRules,
    pub apply_end_pattern_last: bool,
    pub patterns: Vec<PatternRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeginWhile {
    pub name: Option<String>,
    pub content_name: Option<String>,
    pub begin: RegexId,
    pub begin_captures: CaptureRules,
    pub while_: RegexId,
    pub while_has_backrefs: bool,
    pub while_captures: CaptureRules,
    pub patterns: Vec<PatternRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rule {
    Match(Match),
    IncludeOnly(IncludeOnly),
    BeginEnd(BeginEnd),
    BeginWhile(BeginWhile),
}

impl Rule {
    pub fn original_name(&self) -> Option<&str> {
        match self {
            Rule::Match(r) => r.name.as_deref(),
            Rule::IncludeOnly(r) => r.name.as_deref(),
            Rule::BeginEnd(r) => r.name.as_deref(),
            Rule::BeginWhile(r) => r.name.as_deref(),
        }
    }

    fn original_content_name(&self) -> Option<&str> {
        match self {
            Rule::Match(_) => None,
            Rule::IncludeOnly(r) => r.content_name.as_deref(),
            Rule::BeginEnd(r) => r.content_name.as_deref(),
            Rule::BeginWhile(r) => r.content_name.as_deref(),
        }
    }

    /// The name with the captures of `line` substituted
    pub fn name<'a>(
        &'a self,
        line: &str,
        captures: &[Option<(usize, usize)>],
    ) -> Option<Cow<'a, str>> {
        self.original_name()
            .map(|n| replace_name_captures(n, line, captures))
    }

    pub fn content_name<'a>(
        &'a self,
        line: &str,
        captures: &[Option<(usize, usize)>],
    ) -> Option<Cow<'a, str>> {
        self.original_content_name()
            .map(|n| replace_name_captures(n, line, captures))
    }

    /// Child patterns of rules that have some
    pub fn patterns(&self) -> &[PatternRef] {
        match self {
            Rule::Match(_) => &[],
            Rule::IncludeOnly(r) => &r.patterns,
            Rule::BeginEnd(r) => &r.patterns,
            Rule::BeginWhile(r) => &r.patterns,
        }
    }

    pub fn has_patterns(&self) -> bool {
        !self.patterns().is_empty()
    }
}

/// Patterns of another grammar's scope injected in the scopes matching a selector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Injection {
    pub selector: String,
    pub matchers: Vec<CompiledMatcher>,
    pub rule: RuleId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledGrammar {
    pub name: String,
    pub scope_name: String,
    pub file_types: Vec<String>,
    pub regexes: Vec<Regex>,
    pub rules: Vec<Rule>,
    pub repositories: Vec<Repository>,
    /// Injections declared with the `injections` key of the grammar
    pub injections: Vec<Injection>,
    /// If set, this grammar is an injector and its root patterns get injected wherever
    /// those matchers match
    pub injection_selector: Vec<CompiledMatcher>,
    pub inject_to: Vec<String>,
    /// Hash of the rules, used to check a grammar state was created with this grammar
    pub fingerprint: u64,
}

impl Index<RuleId> for CompiledGrammar {
    type Output = Rule;

    fn index(&self, index: RuleId) -> &Self::Output {
        &self.rules[index.as_index()]
    }
}

impl Index<RegexId> for CompiledGrammar {
    type Output = Regex;

    fn index(&self, index: RegexId) -> &Self::Output {
        &self.regexes[index.0 as usize]
    }
}

impl CompiledGrammar {
    pub fn from_raw_grammar(raw: RawGrammar) -> OcraResult<Self> {
        let mut grammar = Self {
            name: raw.name,
            scope_name: raw.scope_name,
            file_types: raw.file_types,
            regexes: Vec::new(),
            rules: Vec::new(),
            repositories: Vec::new(),
            injections: Vec::new(),
            injection_selector: raw
                .injection_selector
                .as_deref()
                .map(parse_selector_matchers)
                .unwrap_or_default(),
            inject_to: raw.inject_to,
            fingerprint: 0,
        };

        // The root rule is named after the grammar scope and is always the first rule
        let root_rule = RawRule {
            name: Some(grammar.scope_name.clone()),
            patterns: raw.patterns,
            repository: raw.repository,
            location: raw.location,
            ..Default::default()
        };
        let root_rule_id = grammar.compile_rule(root_rule, None)?;
        debug_assert_eq!(root_rule_id, ROOT_RULE_ID);

        for (selector, rule) in raw.injections {
            let rule = grammar.compile_rule(rule, Some(ROOT_REPOSITORY_ID))?;
            grammar.injections.push(Injection {
                matchers: parse_selector_matchers(&selector),
                selector,
                rule,
            });
        }

        grammar.fingerprint = grammar.compute_fingerprint()?;
        Ok(grammar)
    }

    pub fn rule(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id.as_index())
    }

    /// Finds a rule by name, starting from `repository` and going up to the root repository
    pub fn lookup(&self, repository: RepositoryId, name: &str) -> Option<RuleId> {
        let mut current = Some(repository);
        while let Some(id) = current {
            let repo = &self.repositories[id.0 as usize];
            if let Some(rule) = repo.rules.get(name) {
                return Some(*rule);
            }
            current = repo.parent;
        }
        None
    }

    /// Scope names of the other grammars this grammar includes
    pub fn external_scopes(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        for rule in &self.rules {
            for pattern in rule.patterns() {
                if let PatternRef::Include(include) = pattern {
                    match &include.reference {
                        Reference::Scope(scope) | Reference::ScopeRule(scope, _) => {
                            if scope != &self.scope_name {
                                out.insert(scope.as_str());
                            }
                        }
                        _ => (),
                    }
                }
            }
        }
        out
    }

    fn compile_rule(
        &mut self,
        raw_rule: RawRule,
        repository: Option<RepositoryId>,
    ) -> OcraResult<RuleId> {
        let id = RuleId(self.rules.len() as u32);

        // push a placeholder to reserve its spot
        self.rules.push(Rule::IncludeOnly(IncludeOnly {
            name: None,
            content_name: None,
            patterns: Vec::new(),
        }));

        // Every kind of rule can have its own repository, merged on top of the current one
        let repository = match repository {
            Some(repo) if raw_rule.repository.is_empty() => repo,
            parent => self.compile_repository(raw_rule.repository, parent)?,
        };

        // https://github.com/microsoft/vscode-textmate/blob/f03a6a8790af81372d0e81facae75554ec5e97ef/src/rule.ts#L389-L447
        let rule = if let Some(pat) = raw_rule.match_ {
            Rule::Match(Match {
                name: raw_rule.name,
                regex: Some(self.compile_regex(pat)),
                captures: self.compile_captures(raw_rule.captures, repository)?,
            })
        } else if let Some(begin_pat) = raw_rule.begin {
            let begin = self.compile_regex(begin_pat);
            let begin_captures = if raw_rule.begin_captures.is_empty() {
                &raw_rule.captures
            } else {
                &raw_rule.begin_captures
            };
            let begin_captures = self.compile_captures(begin_captures.clone(), repository)?;

            if let Some(while_pat) = raw_rule.while_ {
                let while_ = self.compile_regex(while_pat);
                let while_captures = if raw_rule.while_captures.is_empty() {
                    raw_rule.captures
                } else {
                    raw_rule.while_captures
                };
                Rule::BeginWhile(BeginWhile {
                    name: raw_rule.name,
                    content_name: raw_rule.content_name,
                    begin,
                    begin_captures,
                    while_,
                    while_has_backrefs: self[while_].has_backreferences(),
                    while_captures: self.compile_captures(while_captures, repository)?,
                    patterns: self.compile_patterns(raw_rule.patterns, repository)?,
                })
            } else if let Some(end_pat) = raw_rule.end {
                let end = self.compile_regex(end_pat);
                let end_captures = if raw_rule.end_captures.is_empty() {
                    raw_rule.captures
                } else {
                    raw_rule.end_captures
                };
                Rule::BeginEnd(BeginEnd {
                    name: raw_rule.name,
                    content_name: raw_rule.content_name,
                    begin,
                    begin_captures,
                    end,
                    end_has_backrefs: self[end].has_backreferences(),
                    end_captures: self.compile_captures(end_captures, repository)?,
                    apply_end_pattern_last: raw_rule.apply_end_pattern_last,
                    patterns: self.compile_patterns(raw_rule.patterns, repository)?,
                })
            } else {
                // Nothing to close: the rule ends with its begin match
                Rule::Match(Match {
                    name: raw_rule.name,
                    regex: Some(begin),
                    captures: begin_captures,
                })
            }
        } else {
            // vscode-textmate does something funny here:
            // - if patterns are NOT present and includes are, it moves includes to patterns;
            // - however, if patterns ARE present, includes are ignored
            // https://github.com/microsoft/vscode-textmate/blob/f03a6a8790af81372d0e81facae75554ec5e97ef/src/rule.ts#L404
            let patterns = match raw_rule.include {
                Some(include) if raw_rule.patterns.is_empty() => vec![RawRule {
                    include: Some(include),
                    location: raw_rule.location,
                    ..Default::default()
                }],
                _ => raw_rule.patterns,
            };

            if patterns.is_empty() && raw_rule.content_name.is_none() {
                // Only gives a name, typically a capture
                Rule::Match(Match {
                    name: raw_rule.name,
                    regex: None,
                    captures: Vec::new(),
                })
            } else {
                Rule::IncludeOnly(IncludeOnly {
                    name: raw_rule.name,
                    content_name: raw_rule.content_name,
                    patterns: self.compile_patterns(patterns, repository)?,
                })
            }
        };

        self.rules[id.as_index()] = rule;
        Ok(id)
    }

    fn compile_regex(&mut self, pattern: String) -> RegexId {
        let regex_id = RegexId(self.regexes.len() as u32);
        self.regexes.push(Regex::new(pattern));
        regex_id
    }

    fn compile_repository(
        &mut self,
        raw_repository: BTreeMap<String, RawRule>,
        parent: Option<RepositoryId>,
    ) -> OcraResult<RepositoryId> {
        let repo_id = RepositoryId(self.repositories.len() as u32);
        self.repositories.push(Repository {
            parent,
            rules: BTreeMap::new(),
        });

        let mut rules = BTreeMap::new();
        for (name, raw_rule) in raw_repository {
            rules.insert(name, self.compile_rule(raw_rule, Some(repo_id))?);
        }
        self.repositories[repo_id.0 as usize].rules = rules;

        Ok(repo_id)
    }

    fn compile_captures(
        &mut self,
        captures: Captures,
        repository: RepositoryId,
    ) -> OcraResult<CaptureRules> {
        if captures.is_empty() {
            return Ok(Vec::new());
        }

        // some grammars have very high capture numbers, eg mdc.json has a 912 backref
        let max_capture = captures.keys().max().copied().unwrap_or_default();
        let mut out: CaptureRules = vec![None; max_capture + 1];

        for (key, rule) in captures.0 {
            out[key] = Some(self.compile_rule(rule, Some(repository))?);
        }

        Ok(out)
    }

    fn compile_patterns(
        &mut self,
        rules: Vec<RawRule>,
        repository: RepositoryId,
    ) -> OcraResult<Vec<PatternRef>> {
        let mut out = Vec::with_capacity(rules.len());

        for r in rules {
            if let Some(include) = r.include {
                // vscode ignores other rule contents if there's an include
                // https://github.com/microsoft/vscode-textmate/blob/f03a6a8790af81372d0e81facae75554ec5e97ef/src/rule.ts#L495
                out.push(PatternRef::Include(Include {
                    reference: include.as_str().into(),
                    raw: include,
                    repository,
                    location: r.location,
                }));
            } else {
                out.push(PatternRef::Rule(self.compile_rule(r, Some(repository))?));
            }
        }

        Ok(out)
    }

    /// FNV-1a over the JSON form of everything the tokenizer depends on.
    /// Source locations are left out: the same grammar read from two paths is the same grammar.
    fn compute_fingerprint(&self) -> OcraResult<u64> {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        let mut feed = |bytes: &[u8]| {
            for b in bytes {
                hash ^= u64::from(*b);
                hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
            }
        };

        let mut rules = serde_json::to_value(&self.rules)?;
        strip_locations(&mut rules);
        feed(self.scope_name.as_bytes());
        feed(&serde_json::to_vec(&rules)?);
        feed(&serde_json::to_vec(&self.regexes)?);
        feed(&serde_json::to_vec(&self.repositories)?);
        Ok(hash)
    }
}

fn strip_locations(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.remove("location");
            map.values_mut().for_each(strip_locations);
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(strip_locations),
        _ => (),
    }
}
