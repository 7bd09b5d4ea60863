//! This file follows the scanning logic of <https://github.com/microsoft/vscode-textmate>

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use onig::{Region, SearchOptions};
use serde::{Deserialize, Serialize};

use crate::attributes::TokenAttributes;
use crate::basic_attributes::BasicScopeAttributesProvider;
use crate::error::{Error, OcraResult};
use crate::grammars::{
    BASE_GRAMMAR_ID, CaptureRules, END_RULE_ID, GlobalRuleRef, GrammarId, GrammarSet, PatternSet,
    PatternSetMatch, ROOT_RULE_ID, RegexId, Rule, compile_regex, resolve_backreferences,
};
use crate::themes::CompiledTheme;
use crate::tokenizer::anchors::AnchorActive;
use crate::tokenizer::attributed::{AttributeResolver, AttributedScopeStack};
use crate::tokenizer::line_tokens::{LineTokens, TokenDecorations};
use crate::tokenizer::stack::{StackFrame, StateStack};

mod anchors;
mod attributed;
mod line_tokens;
mod stack;
mod state;

pub use line_tokens::{BalancedBracketSelectors, Token, TokenTypeOverride};
pub use state::{FrameState, GrammarState};

/// Options for a tokenization run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizeOptions {
    pub(crate) initial_state: Option<GrammarState>,
    pub(crate) max_line_length: Option<usize>,
    pub(crate) max_tokens_per_line: Option<usize>,
    pub(crate) time_limit: Option<Duration>,
    pub(crate) scoped_tokens: bool,
}

impl TokenizeOptions {
    /// Resumes from the state returned by [`TokenizeLines::grammar_state`]
    pub fn initial_state(mut self, state: GrammarState) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Lines longer than that (in bytes) are not tokenized: they become a single token
    /// with the default attributes and the state is left as is.
    pub fn max_line_length(mut self, value: usize) -> Self {
        self.max_line_length = Some(value);
        self
    }

    /// Stops tokenizing once a line has that many tokens.
    pub fn max_tokens_per_line(mut self, value: usize) -> Self {
        self.max_tokens_per_line = Some(value);
        self
    }

    /// Stops tokenizing once a single line takes longer than that.
    pub fn time_limit(mut self, value: Duration) -> Self {
        self.time_limit = Some(value);
        self
    }

    /// Also outputs the scopes of every token, see [`TokenizedLine::scoped_tokens`]
    pub fn scoped_tokens(mut self, value: bool) -> Self {
        self.scoped_tokens = value;
        self
    }
}

/// The tokens of a single line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenizedLine<'a> {
    /// The line, without its line terminator
    pub text: &'a str,
    /// `[start, attributes, start, attributes, ...]`: each token ends where the next one
    /// starts, the last one at the end of the line
    pub tokens: Vec<u32>,
    /// Only filled if [`TokenizeOptions::scoped_tokens`] is set
    pub scoped_tokens: Vec<Token>,
    /// A budget ran out on this line or on a previous one
    pub stopped_early: bool,
}

impl TokenizedLine<'_> {
    /// Iterates on the tokens as byte ranges of `text` with their attributes
    pub fn spans(&self) -> impl Iterator<Item = (Range<usize>, TokenAttributes)> + '_ {
        let text_len = self.text.len();
        self.tokens
            .chunks_exact(2)
            .enumerate()
            .map(move |(i, pair)| {
                let end = self
                    .tokens
                    .get(i * 2 + 2)
                    .map_or(text_len, |start| *start as usize);
                (pair[0] as usize..end, TokenAttributes(pair[1]))
            })
    }

    pub fn len(&self) -> usize {
        self.tokens.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Tokenizes text with a set of grammars, computing the token attributes with a theme.
///
/// Cheap to clone and can be shared between threads: all the scratch data of a run lives in
/// the [`TokenizeLines`] iterator.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    grammars: Arc<GrammarSet>,
    resolver: AttributeResolver,
    decorations: Arc<TokenDecorations>,
}

impl Tokenizer {
    pub fn new(
        grammars: Arc<GrammarSet>,
        theme: Arc<CompiledTheme>,
        basic_attributes: Arc<BasicScopeAttributesProvider>,
    ) -> Self {
        Self {
            grammars,
            resolver: AttributeResolver::new(theme, basic_attributes),
            decorations: Arc::new(TokenDecorations::default()),
        }
    }

    /// Forces the token type of the tokens matching those selectors
    pub fn with_token_types(mut self, token_types: Vec<TokenTypeOverride>) -> Self {
        Arc::make_mut(&mut self.decorations).token_types = token_types;
        self
    }

    /// Sets the balanced bracket bit of the tokens matching those selectors
    pub fn with_balanced_brackets(mut self, selectors: BalancedBracketSelectors) -> Self {
        Arc::make_mut(&mut self.decorations).balanced_brackets = Some(selectors);
        self
    }

    pub fn grammars(&self) -> &GrammarSet {
        &self.grammars
    }

    pub fn theme(&self) -> &CompiledTheme {
        self.resolver.theme()
    }

    /// Attributes of the text that was not tokenized
    pub fn default_attributes(&self) -> TokenAttributes {
        self.resolver.default_attributes()
    }

    /// Returns an iterator tokenizing `text` one line at a time.
    ///
    /// Lines are separated by `\n`, a `\r` before it is not part of the line.
    /// Fails right away if the initial state was created with other grammars.
    pub fn tokenize<'a>(
        &self,
        text: &'a str,
        options: &TokenizeOptions,
    ) -> OcraResult<TokenizeLines<'a>> {
        let (stack, is_first_line) = match &options.initial_state {
            Some(state) => (state.restore(&self.grammars, &self.resolver)?, false),
            None => (self.initial_stack(), true),
        };

        Ok(TokenizeLines {
            tokenizer: self.clone(),
            caches: ScanCaches::default(),
            lines: text.split('\n'),
            stack,
            is_first_line,
            max_line_length: options.max_line_length,
            max_tokens_per_line: options.max_tokens_per_line,
            time_limit: options.time_limit,
            scoped_tokens: options.scoped_tokens,
            stopped_early: false,
            failed: false,
        })
    }

    fn initial_stack(&self) -> StateStack {
        let root = AttributedScopeStack::root(&self.grammars.base().scope_name, &self.resolver);
        StateStack::new(StackFrame::root(
            GlobalRuleRef {
                grammar: BASE_GRAMMAR_ID,
                rule: ROOT_RULE_ID,
            },
            root,
        ))
    }
}

/// Compiled regexes of a run
#[derive(Default)]
struct ScanCaches {
    /// (rule, anchors) -> end pattern or "" -> pattern set
    /// The end pattern is only part of the key for BeginEnd rules with backreferences
    pattern_sets: HashMap<(GlobalRuleRef, AnchorActive), HashMap<String, PatternSet>>,
    /// while patterns, with their backreferences resolved and inactive anchors replaced
    regexes: HashMap<String, onig::Regex>,
}

struct LineBudget {
    deadline: Option<Instant>,
    max_tokens: Option<usize>,
}

impl LineBudget {
    fn exceeded(&self, tokens: &LineTokens) -> bool {
        self.max_tokens.is_some_and(|max| tokens.len() >= max)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

struct Scanner<'t> {
    tokenizer: &'t Tokenizer,
    caches: &'t mut ScanCaches,
    budget: LineBudget,
}

impl Scanner<'_> {
    fn pattern_set(
        &mut self,
        rule_ref: GlobalRuleRef,
        end_pattern: Option<&str>,
        anchors: AnchorActive,
    ) -> OcraResult<&PatternSet> {
        let grammars = &*self.tokenizer.grammars;
        let rule = grammars.rule(rule_ref).ok_or_else(|| Error::StateMismatch {
            scope_name: grammars.base().scope_name.clone(),
            reason: format!(
                "rule #{} of grammar #{} does not exist",
                rule_ref.rule.0, rule_ref.grammar.0
            ),
        })?;
        let end_pattern = match rule {
            Rule::BeginEnd(_) => end_pattern,
            _ => None,
        };
        let key = end_pattern.unwrap_or_default();

        let sets = self
            .caches
            .pattern_sets
            .entry((rule_ref, anchors))
            .or_default();

        if !sets.contains_key(key) {
            let grammar = &grammars[rule_ref.grammar];
            let mut items: Vec<(GlobalRuleRef, String)> = match rule {
                // Injections can be a single match rule
                Rule::Match(m) => m
                    .regex
                    .map(|re| {
                        let pattern = anchors.replace_anchors(grammar[re].pattern());
                        vec![(rule_ref, pattern.into_owned())]
                    })
                    .unwrap_or_default(),
                _ => grammars
                    .collect_patterns(rule_ref)?
                    .into_iter()
                    .map(|(r, pat)| (r, anchors.replace_anchors(pat).into_owned()))
                    .collect(),
            };

            if let Rule::BeginEnd(b) = rule {
                let end = (
                    GlobalRuleRef {
                        grammar: rule_ref.grammar,
                        rule: END_RULE_ID,
                    },
                    anchors
                        .replace_anchors(end_pattern.unwrap_or_else(|| grammar[b.end].pattern()))
                        .into_owned(),
                );
                if b.apply_end_pattern_last {
                    items.push(end);
                } else {
                    items.insert(0, end);
                }
            }

            #[cfg(feature = "debug")]
            log::debug!(
                "[pattern_set] compiling {} patterns for {:?} ({anchors:?}): {:?}",
                items.len(),
                rule.original_name(),
                items.iter().map(|(_, p)| p.as_str()).collect::<Vec<_>>()
            );

            sets.insert(key.to_string(), PatternSet::new(items)?);
        }

        sets.get(key).ok_or_else(|| {
            Error::TokenizeRegex(format!("missing pattern set for rule #{}", rule_ref.rule.0))
        })
    }

    fn match_rule(
        &mut self,
        stack: &StateStack,
        line: &str,
        pos: usize,
        anchors: AnchorActive,
    ) -> OcraResult<Option<PatternSetMatch>> {
        let top = stack.top();
        let set = self.pattern_set(top.rule_ref, top.end_pattern.as_deref(), anchors)?;
        Ok(set.find_at(line, pos))
    }

    /// The earliest match of the injections matching the current scopes, with its priority
    fn match_injections(
        &mut self,
        stack: &StateStack,
        line: &str,
        pos: usize,
        anchors: AnchorActive,
    ) -> OcraResult<Option<(i8, PatternSetMatch)>> {
        let tokenizer = self.tokenizer;
        if tokenizer.grammars.injections().is_empty() {
            return Ok(None);
        }

        let scopes = stack.top().content.scope_names();
        let mut best: Option<(i8, PatternSetMatch)> = None;

        for injection in tokenizer.grammars.matching_injections(&scopes) {
            let set = self.pattern_set(injection.rule, None, anchors)?;
            let Some(found) = set.find_at(line, pos) else {
                continue;
            };
            if best.as_ref().is_some_and(|(_, b)| found.start >= b.start) {
                continue;
            }
            let is_done = found.start == pos;
            best = Some((injection.priority(), found));
            if is_done {
                break;
            }
        }

        Ok(best)
    }

    fn match_rule_or_injections(
        &mut self,
        stack: &StateStack,
        line: &str,
        pos: usize,
        is_first_line: bool,
        anchor_position: Option<usize>,
    ) -> OcraResult<Option<PatternSetMatch>> {
        let anchors = AnchorActive::new(is_first_line, anchor_position, pos);
        let regular = self.match_rule(stack, line, pos, anchors)?;
        let injection = self.match_injections(stack, line, pos, anchors)?;

        Ok(match (regular, injection) {
            (regular, None) => regular,
            (None, Some((_, injection))) => Some(injection),
            (Some(regular), Some((priority, injection))) => {
                if injection.start < regular.start
                    || (injection.start == regular.start && priority < 0)
                {
                    Some(injection)
                } else {
                    Some(regular)
                }
            }
        })
    }

    /// Searches a single pattern from `pos`, returning the capture positions
    fn search(
        &mut self,
        pattern: &str,
        anchors: AnchorActive,
        line: &str,
        pos: usize,
    ) -> OcraResult<Option<Vec<Option<(usize, usize)>>>> {
        let pattern = anchors.replace_anchors(pattern);
        if !self.caches.regexes.contains_key(pattern.as_ref()) {
            let regex = compile_regex(&pattern).map_err(|e| {
                Error::TokenizeRegex(format!("failed to compile pattern `{pattern}`: {e}"))
            })?;
            self.caches.regexes.insert(pattern.to_string(), regex);
        }
        let Some(regex) = self.caches.regexes.get(pattern.as_ref()) else {
            return Ok(None);
        };

        let mut region = Region::new();
        if regex
            .search_with_options(
                line,
                pos,
                line.len(),
                SearchOptions::SEARCH_OPTION_NONE,
                Some(&mut region),
            )
            .is_none()
        {
            return Ok(None);
        }
        Ok(Some((0..region.len()).map(|i| region.pos(i)).collect()))
    }

    /// Checks the while conditions of the stack, outermost first.
    ///
    /// The first failing condition pops its rule and everything above it.
    fn check_while_conditions(
        &mut self,
        mut stack: StateStack,
        line: &str,
        pos: &mut usize,
        is_first_line: &mut bool,
        tokens: &mut LineTokens,
    ) -> OcraResult<(StateStack, Option<usize>)> {
        let tokenizer = self.tokenizer;
        let grammars = &*tokenizer.grammars;
        let mut anchor_position = stack.top().captured_eol.then_some(0);

        let while_frames: Vec<usize> = stack
            .frames
            .iter()
            .enumerate()
            .filter(|(_, f)| matches!(grammars.rule(f.rule_ref), Some(Rule::BeginWhile(_))))
            .map(|(i, _)| i)
            .collect();

        for idx in while_frames {
            let frame = &stack.frames[idx];
            let rule_ref = frame.rule_ref;
            let content = frame.content.clone();
            let Some(Rule::BeginWhile(rule)) = grammars.rule(rule_ref) else {
                continue;
            };
            let pattern = match &frame.end_pattern {
                Some(p) => p.clone(),
                None => grammars[rule_ref.grammar][rule.while_]
                    .pattern()
                    .to_string(),
            };

            let anchors = AnchorActive::new(*is_first_line, anchor_position, *pos);
            let found = self
                .search(&pattern, anchors, line, *pos)?
                .and_then(|caps| Some((caps.first().copied().flatten()?, caps)));

            let Some(((start, end), captures)) = found else {
                #[cfg(feature = "debug")]
                log::debug!(
                    "[check_while_conditions] `{pattern}` failed, popping {:?}",
                    rule.name
                );
                stack.truncate(idx);
                break;
            };

            tokens.produce(&content, start);
            if !rule.while_captures.is_empty() {
                let while_stack = StateStack {
                    frames: stack.frames[..=idx].to_vec(),
                };
                self.handle_captures(
                    &while_stack,
                    line,
                    *is_first_line,
                    rule_ref.grammar,
                    &rule.while_captures,
                    &captures,
                    tokens,
                )?;
            }
            tokens.produce(&content, end);

            anchor_position = Some(end);
            if end > *pos {
                *pos = end;
                *is_first_line = false;
            }
        }

        Ok((stack, anchor_position))
    }

    /// Assigns the scopes of the capture rules, retokenizing the captures of rules
    /// with patterns.
    #[allow(clippy::too_many_arguments)]
    fn handle_captures(
        &mut self,
        stack: &StateStack,
        line: &str,
        is_first_line: bool,
        grammar: GrammarId,
        rules: &CaptureRules,
        captures: &[Option<(usize, usize)>],
        tokens: &mut LineTokens,
    ) -> OcraResult<()> {
        if rules.is_empty() {
            return Ok(());
        }

        let tokenizer = self.tokenizer;
        let resolver = &tokenizer.resolver;
        let base = &stack.top().content;
        let max_end = captures.first().copied().flatten().map_or(0, |(_, end)| end);
        // (scopes, end)
        let mut local: Vec<(AttributedScopeStack, usize)> = Vec::with_capacity(2);

        for (idx, rule_id) in rules.iter().enumerate().take(captures.len()) {
            let Some(rule_id) = rule_id else {
                continue;
            };
            let Some((start, end)) = captures[idx] else {
                continue;
            };
            // Nothing captured
            if start == end {
                continue;
            }
            // Lookahead captures past the match are ignored
            if start > max_end {
                break;
            }

            while let Some((scopes, end_pos)) = local.last()
                && *end_pos <= start
            {
                tokens.produce(scopes, *end_pos);
                local.pop();
            }
            tokens.produce(local.last().map_or(base, |(s, _)| s), start);

            let rule_ref = GlobalRuleRef {
                grammar,
                rule: *rule_id,
            };
            let Some(rule) = tokenizer.grammars.rule(rule_ref) else {
                continue;
            };

            if rule.has_patterns() {
                let name = base.push_attributed(rule.name(line, captures).as_deref(), resolver);
                let content =
                    name.push_attributed(rule.content_name(line, captures).as_deref(), resolver);
                let mut nested = stack.clone();
                nested.push(StackFrame {
                    rule_ref,
                    name,
                    content,
                    end_pattern: None,
                    captured_eol: false,
                    anchor_position: None,
                    enter_position: Some(start),
                });

                #[cfg(feature = "debug")]
                log::debug!("[handle_captures] retokenizing {:?}", &line[start..end]);
                self.scan_line(
                    nested,
                    &line[..end],
                    start,
                    is_first_line && start == 0,
                    tokens,
                    false,
                )?;
                continue;
            }

            if let Some(name) = rule.name(line, captures) {
                let parent = local.last().map_or(base, |(s, _)| s);
                local.push((parent.push_attributed(Some(&name), resolver), end));
            }
        }

        while let Some((scopes, end_pos)) = local.pop() {
            tokens.produce(&scopes, end_pos);
        }

        Ok(())
    }

    /// Finishes pushing a begin/end or begin/while rule once its begin pattern matched
    #[allow(clippy::too_many_arguments)]
    fn enter_begin_rule(
        &mut self,
        stack: &mut StateStack,
        line: &str,
        is_first_line: bool,
        m: &PatternSetMatch,
        rule: &Rule,
        begin_captures: &CaptureRules,
        backreferenced: Option<RegexId>,
        tokens: &mut LineTokens,
    ) -> OcraResult<()> {
        self.handle_captures(
            stack,
            line,
            is_first_line,
            m.rule_ref.grammar,
            begin_captures,
            &m.capture_pos,
            tokens,
        )?;
        tokens.produce(&stack.top().content, m.end);

        let tokenizer = self.tokenizer;
        let content_name = rule.content_name(line, &m.capture_pos);
        let top = stack.top_mut();
        top.content = top
            .name
            .push_attributed(content_name.as_deref(), &tokenizer.resolver);
        if let Some(regex) = backreferenced {
            let pattern = tokenizer.grammars[m.rule_ref.grammar][regex].pattern();
            top.end_pattern = Some(resolve_backreferences(pattern, line, &m.capture_pos));
        }
        Ok(())
    }

    /// Scans `line` from `line_pos`, producing tokens up to the end of the line.
    ///
    /// Returns the stack at the end of the line and whether a budget ran out, in which
    /// case the tokens stop where the scan stopped.
    fn scan_line(
        &mut self,
        mut stack: StateStack,
        line: &str,
        line_pos: usize,
        mut is_first_line: bool,
        tokens: &mut LineTokens,
        top_level: bool,
    ) -> OcraResult<(StateStack, bool)> {
        let tokenizer = self.tokenizer;
        let grammars = &*tokenizer.grammars;
        let resolver = &tokenizer.resolver;
        let mut pos = line_pos;
        let mut anchor_position = None;

        if top_level {
            let (checked, anchor) =
                self.check_while_conditions(stack, line, &mut pos, &mut is_first_line, tokens)?;
            stack = checked;
            anchor_position = anchor;
        }

        loop {
            if top_level && self.budget.exceeded(tokens) {
                #[cfg(feature = "debug")]
                log::warn!(
                    "[scan_line] budget exceeded at {pos} with {} tokens",
                    tokens.len()
                );
                return Ok((stack, true));
            }

            #[cfg(feature = "debug")]
            log::trace!("[scan_line] scanning {pos}: {:?}", &line[pos..]);

            let Some(m) =
                self.match_rule_or_injections(&stack, line, pos, is_first_line, anchor_position)?
            else {
                tokens.produce(&stack.top().content, line.len());
                break;
            };

            #[cfg(feature = "debug")]
            log::debug!(
                "[scan_line] matched rule #{} of grammar #{} at {}..{}",
                m.rule_ref.rule.0,
                m.rule_ref.grammar.0,
                m.start,
                m.end
            );

            let has_advanced = m.end > pos;

            if m.rule_ref.rule == END_RULE_ID {
                let top_ref = stack.top().rule_ref;
                let Some(Rule::BeginEnd(rule)) = grammars.rule(top_ref) else {
                    tokens.produce(&stack.top().content, line.len());
                    break;
                };

                tokens.produce(&stack.top().content, m.start);
                let top = stack.top_mut();
                top.content = top.name.clone();
                self.handle_captures(
                    &stack,
                    line,
                    is_first_line,
                    top_ref.grammar,
                    &rule.end_captures,
                    &m.capture_pos,
                    tokens,
                )?;
                tokens.produce(&stack.top().content, m.end);

                let Some(popped) = stack.pop() else {
                    break;
                };
                anchor_position = popped.anchor_position;

                // Pushed and popped without advancing: keep the rule and give up on the line
                // https://github.com/Microsoft/vscode-textmate/issues/12
                if !has_advanced && popped.enter_position == Some(pos) {
                    #[cfg(feature = "debug")]
                    log::warn!("[scan_line] end pattern did not advance, stopping");
                    stack.push(popped);
                    tokens.produce(&stack.top().content, line.len());
                    break;
                }
            } else {
                let Some(rule) = grammars.rule(m.rule_ref) else {
                    tokens.produce(&stack.top().content, line.len());
                    break;
                };

                tokens.produce(&stack.top().content, m.start);
                let name = stack
                    .top()
                    .content
                    .push_attributed(rule.name(line, &m.capture_pos).as_deref(), resolver);
                stack.push(StackFrame {
                    rule_ref: m.rule_ref,
                    content: name.clone(),
                    name,
                    end_pattern: None,
                    captured_eol: m.end == line.len(),
                    anchor_position,
                    enter_position: Some(pos),
                });

                match rule {
                    Rule::BeginEnd(r) => {
                        self.enter_begin_rule(
                            &mut stack,
                            line,
                            is_first_line,
                            &m,
                            rule,
                            &r.begin_captures,
                            r.end_has_backrefs.then_some(r.end),
                            tokens,
                        )?;
                        anchor_position = Some(m.end);
                    }
                    Rule::BeginWhile(r) => {
                        self.enter_begin_rule(
                            &mut stack,
                            line,
                            is_first_line,
                            &m,
                            rule,
                            &r.begin_captures,
                            r.while_has_backrefs.then_some(r.while_),
                            tokens,
                        )?;
                        anchor_position = Some(m.end);
                    }
                    Rule::Match(r) => {
                        self.handle_captures(
                            &stack,
                            line,
                            is_first_line,
                            m.rule_ref.grammar,
                            &r.captures,
                            &m.capture_pos,
                            tokens,
                        )?;
                        tokens.produce(&stack.top().content, m.end);
                        stack.pop();

                        // Neither advancing nor pushing anything
                        if !has_advanced {
                            #[cfg(feature = "debug")]
                            log::warn!("[scan_line] match did not advance, stopping");
                            stack.safe_pop();
                            tokens.produce(&stack.top().content, line.len());
                            break;
                        }
                    }
                    Rule::IncludeOnly(_) => {
                        stack.pop();
                        tokens.produce(&stack.top().content, line.len());
                        break;
                    }
                }

                // The same rule was pushed at the same position without advancing
                if matches!(rule, Rule::BeginEnd(_) | Rule::BeginWhile(_))
                    && !has_advanced
                    && stack.top_repeats_rule()
                {
                    #[cfg(feature = "debug")]
                    log::warn!("[scan_line] rule pushed twice at {pos}, stopping");
                    stack.pop();
                    tokens.produce(&stack.top().content, line.len());
                    break;
                }
            }

            if has_advanced {
                pos = m.end;
                is_first_line = false;
            }
        }

        Ok((stack, false))
    }
}

/// Iterator over the tokenized lines of a text, see [`Tokenizer::tokenize`].
///
/// Once a line fails, the iterator is done.
pub struct TokenizeLines<'a> {
    tokenizer: Tokenizer,
    caches: ScanCaches,
    lines: std::str::Split<'a, char>,
    /// The stack after the last line that was fully tokenized
    stack: StateStack,
    is_first_line: bool,
    max_line_length: Option<usize>,
    max_tokens_per_line: Option<usize>,
    time_limit: Option<Duration>,
    scoped_tokens: bool,
    stopped_early: bool,
    failed: bool,
}

impl<'a> TokenizeLines<'a> {
    /// The state after the last line that was fully tokenized, which can be given to
    /// [`TokenizeOptions::initial_state`] to tokenize the following lines later.
    pub fn grammar_state(&self) -> GrammarState {
        GrammarState::capture(&self.stack, &self.tokenizer.grammars)
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    fn pass_through(&self, text: &'a str, stopped_early: bool) -> TokenizedLine<'a> {
        TokenizedLine {
            text,
            tokens: vec![0, self.tokenizer.default_attributes().bits()],
            scoped_tokens: if self.scoped_tokens {
                vec![Token {
                    span: 0..text.len(),
                    scopes: Vec::new(),
                }]
            } else {
                Vec::new()
            },
            stopped_early,
        }
    }

    fn tokenize_line(&mut self, text: &'a str) -> OcraResult<TokenizedLine<'a>> {
        // Some patterns expect the line terminator
        let line = format!("{text}\n");
        let tokenizer = &self.tokenizer;
        let mut tokens = LineTokens::new(&tokenizer.decorations, self.scoped_tokens);
        let mut scanner = Scanner {
            tokenizer,
            caches: &mut self.caches,
            budget: LineBudget {
                deadline: self.time_limit.map(|limit| Instant::now() + limit),
                max_tokens: self.max_tokens_per_line,
            },
        };

        let (mut stack, stopped) = scanner.scan_line(
            self.stack.clone(),
            &line,
            0,
            self.is_first_line,
            &mut tokens,
            true,
        )?;
        self.is_first_line = false;

        if stopped {
            tokens.produce_attributes(tokenizer.default_attributes(), line.len());
        }
        let (binary, scoped) = tokens.finish(&stack.top().content, line.len());

        if stopped {
            self.stopped_early = true;
        } else {
            stack.reset();
            self.stack = stack;
        }

        Ok(TokenizedLine {
            text,
            tokens: binary,
            scoped_tokens: scoped,
            stopped_early: stopped,
        })
    }
}

impl<'a> Iterator for TokenizeLines<'a> {
    type Item = OcraResult<TokenizedLine<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let raw = self.lines.next()?;
        let text = raw.strip_suffix('\r').unwrap_or(raw);

        if self.stopped_early {
            return Some(Ok(self.pass_through(text, true)));
        }
        if self.max_line_length.is_some_and(|max| text.len() > max) {
            #[cfg(feature = "debug")]
            log::debug!("[tokenize] skipping line of {} bytes", text.len());
            self.is_first_line = false;
            return Some(Ok(self.pass_through(text, false)));
        }

        match self.tokenize_line(text) {
            Ok(line) => Some(Ok(line)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Write;

    use super::*;
    use crate::document::DocumentFormat;
    use crate::grammars::{CompiledGrammar, RawGrammar};
    use crate::themes::{FontStyle, RawTheme};

    const MINI_JS: &str = include_str!("../fixtures/grammars/mini-js.json");
    const TODO: &str = include_str!("../fixtures/grammars/todo.json");
    const MINI_DARK: &str = include_str!("../fixtures/themes/mini-dark.json");

    fn grammar(json: &str) -> Arc<CompiledGrammar> {
        Arc::new(
            RawGrammar::load_from_str(json, DocumentFormat::Json)
                .unwrap()
                .compile()
                .unwrap(),
        )
    }

    fn tokenizer_with(set: GrammarSet) -> Tokenizer {
        let theme = RawTheme::load_from_str(MINI_DARK, DocumentFormat::Json)
            .unwrap()
            .compile()
            .unwrap();
        Tokenizer::new(
            Arc::new(set),
            Arc::new(theme),
            Arc::new(BasicScopeAttributesProvider::new(1, &HashMap::new())),
        )
    }

    fn tokenizer(json: &str) -> Tokenizer {
        tokenizer_with(GrammarSet::new(grammar(json), Vec::new(), Vec::new()))
    }

    fn lines<'a>(
        tokenizer: &Tokenizer,
        text: &'a str,
        options: &TokenizeOptions,
    ) -> Vec<TokenizedLine<'a>> {
        tokenizer
            .tokenize(text, options)
            .unwrap()
            .collect::<OcraResult<Vec<_>>>()
            .unwrap()
    }

    fn explain(tokenizer: &Tokenizer, text: &str) -> String {
        let options = TokenizeOptions::default().scoped_tokens(true);
        let mut out = String::new();
        for (i, line) in lines(tokenizer, text, &options).into_iter().enumerate() {
            for token in &line.scoped_tokens {
                if !out.is_empty() {
                    out.push('\n');
                }
                write!(
                    out,
                    "{i}: {:?} {}",
                    &line.text[token.span.clone()],
                    token.scopes.join(" ")
                )
                .unwrap();
            }
        }
        out
    }

    #[test]
    fn can_tokenize_import_line() {
        let tokenizer = tokenizer(MINI_JS);
        let res = lines(
            &tokenizer,
            "import { x } from 'm'",
            &TokenizeOptions::default(),
        );
        assert_eq!(res.len(), 1);
        let tokens = &res[0].tokens;

        let starts: Vec<u32> = tokens.iter().step_by(2).copied().collect();
        assert_eq!(starts, vec![0, 6, 13, 17, 18]);
        assert_eq!(tokens[1], tokens[5]);
        assert_eq!(tokens[3], tokens[7]);
        assert_eq!(tokens[3], tokenizer.default_attributes().bits());

        let keyword = TokenAttributes(tokens[1]);
        let theme = tokenizer.theme();
        assert_eq!(theme.color_map().color(keyword.foreground()), Some("#A492EA"));
        assert!(keyword.font_style().contains(FontStyle::ITALIC));

        let string = TokenAttributes(tokens[9]);
        assert_eq!(theme.color_map().color(string.foreground()), Some("#CE9178"));
        assert_eq!(
            string.token_type(),
            crate::attributes::StandardTokenType::String
        );

        let spans: Vec<_> = res[0].spans().map(|(span, _)| span).collect();
        assert_eq!(spans.last(), Some(&(18..21)));
    }

    #[test]
    fn can_retokenize_captures() {
        let tokenizer = tokenizer(MINI_JS);
        insta::assert_snapshot!(explain(&tokenizer, r#"f("a")"#), @r#"
        0: "f" source.mini-js meta.call.mini-js entity.name.function.mini-js
        0: "(" source.mini-js meta.call.mini-js
        0: "\"" source.mini-js meta.call.mini-js string.quoted.mini-js punctuation.definition.string.begin.mini-js
        0: "a" source.mini-js meta.call.mini-js string.quoted.mini-js
        0: "\"" source.mini-js meta.call.mini-js string.quoted.mini-js punctuation.definition.string.end.mini-js
        0: ")" source.mini-js meta.call.mini-js
        "#);
    }

    const MULTILINE: &str = "let s = <<EOF\nimport x\nEOF\n> quoted\n> more\n// done";

    #[test]
    fn can_tokenize_multiline_rules() {
        let tokenizer = tokenizer(MINI_JS);
        insta::assert_snapshot!(explain(&tokenizer, MULTILINE), @r#"
        0: "let" source.mini-js storage.type.mini-js
        0: " s = " source.mini-js
        0: "<<" source.mini-js string.unquoted.heredoc.mini-js
        0: "EOF" source.mini-js string.unquoted.heredoc.mini-js entity.name.tag.eof.mini-js
        1: "import x" source.mini-js string.unquoted.heredoc.mini-js
        2: "EOF" source.mini-js string.unquoted.heredoc.mini-js
        3: ">" source.mini-js markup.quote.mini-js
        3: " quoted" source.mini-js markup.quote.mini-js
        4: ">" source.mini-js markup.quote.mini-js
        4: " more" source.mini-js markup.quote.mini-js
        5: "//" source.mini-js comment.line.double-slash.mini-js punctuation.definition.comment.mini-js
        5: " done" source.mini-js comment.line.double-slash.mini-js
        "#);
    }

    #[test]
    fn resuming_gives_the_same_tokens() {
        let tokenizer = tokenizer(MINI_JS);
        let options = TokenizeOptions::default().scoped_tokens(true);
        let full = lines(&tokenizer, MULTILINE, &options);
        let all_lines: Vec<&str> = MULTILINE.split('\n').collect();

        for split in 1..all_lines.len() {
            let head = all_lines[..split].join("\n");
            let mut iter = tokenizer.tokenize(&head, &options).unwrap();
            for line in iter.by_ref() {
                line.unwrap();
            }
            let state = iter.grammar_state();
            let json = serde_json::to_string(&state).unwrap();
            let state: GrammarState = serde_json::from_str(&json).unwrap();

            let tail = all_lines[split..].join("\n");
            let resumed = lines(&tokenizer, &tail, &options.clone().initial_state(state));
            assert_eq!(resumed, full[split..], "split at line {split}");
        }
    }

    #[test]
    fn rejects_states_of_other_grammars() {
        let js = tokenizer(MINI_JS);
        let mut iter = js
            .tokenize("let s = <<EOF", &TokenizeOptions::default())
            .unwrap();
        iter.next().unwrap().unwrap();
        let state = iter.grammar_state();
        assert_eq!(state.depth(), 2);

        let other = tokenizer(
            r#"{"scopeName": "source.mini-js", "patterns": [{"match": "x", "name": "x"}]}"#,
        );
        let res = other.tokenize("EOF", &TokenizeOptions::default().initial_state(state.clone()));
        assert!(matches!(res, Err(Error::StateMismatch { .. })));

        let plain = tokenizer(r#"{"scopeName": "text.plain", "patterns": []}"#);
        let res = plain.tokenize("EOF", &TokenizeOptions::default().initial_state(state.clone()));
        assert!(matches!(res, Err(Error::StateMismatch { .. })));

        // The same grammar compiled again is fine
        let again = tokenizer(MINI_JS);
        let res = lines(
            &again,
            "EOF",
            &TokenizeOptions::default().initial_state(state),
        );
        assert_eq!(res.len(), 1);
    }

    #[test]
    fn begin_without_end_closes_immediately() {
        let tokenizer = tokenizer(
            r#"{"scopeName": "source.t", "patterns": [{"begin": "a", "name": "meta.a"}]}"#,
        );
        insta::assert_snapshot!(explain(&tokenizer, "ab"), @r#"
        0: "a" source.t meta.a
        0: "b" source.t
        "#);
    }

    #[test]
    fn zero_width_matches_terminate() {
        let empty_match = tokenizer(
            r#"{"scopeName": "source.t", "patterns": [{"match": "\\b", "name": "empty"}]}"#,
        );
        insta::assert_snapshot!(explain(&empty_match, "abc"), @r#"0: "abc" source.t"#);

        let empty_region = tokenizer(
            r#"{
                "scopeName": "source.t",
                "patterns": [{"begin": "(?=a)", "end": "(?=a)", "name": "meta.z"}]
            }"#,
        );
        insta::assert_snapshot!(explain(&empty_region, "aa\nb"), @r#"
        0: "aa" source.t meta.z
        1: "b" source.t meta.z
        "#);
    }

    #[test]
    fn injections_apply_in_matching_scopes() {
        let tokenizer = tokenizer_with(GrammarSet::new(
            grammar(MINI_JS),
            Vec::new(),
            vec![grammar(TODO)],
        ));
        insta::assert_snapshot!(explain(&tokenizer, "/* TODO */ TODO"), @r#"
        0: "/*" source.mini-js comment.block.mini-js
        0: " " source.mini-js comment.block.mini-js
        0: "TODO" source.mini-js comment.block.mini-js keyword.todo
        0: " " source.mini-js comment.block.mini-js
        0: "*/" source.mini-js comment.block.mini-js
        0: " TODO" source.mini-js
        "#);

        let res = lines(&tokenizer, "/* TODO */", &TokenizeOptions::default());
        let todo = res[0]
            .spans()
            .find(|(span, _)| *span == (3..7))
            .map(|(_, attrs)| attrs)
            .unwrap();
        assert_eq!(
            tokenizer.theme().color_map().color(todo.foreground()),
            Some("#FF0000")
        );
        assert!(todo.font_style().contains(FontStyle::BOLD));
    }

    #[test]
    fn stops_early_when_out_of_tokens() {
        let tokenizer = tokenizer(MINI_JS);
        let options = TokenizeOptions::default().max_tokens_per_line(2);
        let text = "import import import\nnext";
        let mut iter = tokenizer.tokenize(text, &options).unwrap();
        let initial = iter.grammar_state();

        let first = iter.next().unwrap().unwrap();
        assert!(first.stopped_early);
        assert_eq!(first.len(), 4);
        let (span, attrs) = first.spans().last().unwrap();
        assert_eq!(span, 13..20);
        assert_eq!(attrs, tokenizer.default_attributes());

        let second = iter.next().unwrap().unwrap();
        assert!(second.stopped_early);
        assert_eq!(second.tokens, vec![0, tokenizer.default_attributes().bits()]);
        assert!(iter.next().is_none());
        assert_eq!(iter.grammar_state(), initial);
    }

    #[test]
    fn stops_early_when_out_of_time() {
        let tokenizer = tokenizer(MINI_JS);
        let options = TokenizeOptions::default().time_limit(Duration::ZERO);
        let res = lines(&tokenizer, "import x", &options);
        assert!(res[0].stopped_early);
        assert_eq!(res[0].tokens, vec![0, tokenizer.default_attributes().bits()]);
    }

    #[test]
    fn skips_long_lines() {
        let tokenizer = tokenizer(MINI_JS);
        let options = TokenizeOptions::default().max_line_length(5);
        let res = lines(&tokenizer, "import\r\nlet", &options);
        assert_eq!(res[0].text, "import");
        assert!(!res[0].stopped_early);
        assert_eq!(res[0].tokens, vec![0, tokenizer.default_attributes().bits()]);
        assert_eq!(res[1].len(), 1);
        assert_ne!(res[1].tokens[1], tokenizer.default_attributes().bits());
    }

    #[test]
    fn empty_lines_have_one_token() {
        let tokenizer = tokenizer(MINI_JS);
        let res = lines(&tokenizer, "\n'a", &TokenizeOptions::default());
        assert_eq!(res.len(), 2);
        assert_eq!(res[0].tokens, vec![0, tokenizer.default_attributes().bits()]);
        assert_eq!(res[0].spans().next(), Some((0..0, tokenizer.default_attributes())));
    }
}
