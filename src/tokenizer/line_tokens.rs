use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::attributes::{StandardTokenType, TokenAttributes};
use crate::matcher::{CompiledMatcher, parse_selector_matchers};
use crate::tokenizer::attributed::AttributedScopeStack;

/// A token with the scopes it was produced with, for debugging and tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Byte span within the line (start inclusive, end exclusive, 0-based)
    pub span: Range<usize>,
    /// Scope names, ordered from outermost to innermost
    /// (e.g., source.js -> string.quoted.double -> punctuation.definition.string).
    pub scopes: Vec<String>,
}

/// Forces the token type of the tokens whose scopes match a selector
#[derive(Debug, Clone, PartialEq)]
pub struct TokenTypeOverride {
    matchers: Vec<CompiledMatcher>,
    token_type: StandardTokenType,
}

impl TokenTypeOverride {
    pub fn new(selector: &str, token_type: StandardTokenType) -> Self {
        Self {
            matchers: parse_selector_matchers(selector),
            token_type,
        }
    }

    fn matches(&self, scopes: &[&str]) -> bool {
        self.matchers.iter().any(|m| m.matches(scopes))
    }
}

/// Which tokens can contain brackets that should be matched.
///
/// A `*` balanced selector allows every token not excluded by an unbalanced selector.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BalancedBracketSelectors {
    balanced: Vec<CompiledMatcher>,
    unbalanced: Vec<CompiledMatcher>,
    allow_any: bool,
}

impl BalancedBracketSelectors {
    pub fn new<S: AsRef<str>>(balanced: &[S], unbalanced: &[S]) -> Self {
        let mut allow_any = false;
        let mut balanced_matchers = Vec::new();
        for selector in balanced {
            if selector.as_ref() == "*" {
                allow_any = true;
                continue;
            }
            balanced_matchers.extend(parse_selector_matchers(selector.as_ref()));
        }

        Self {
            balanced: balanced_matchers,
            unbalanced: unbalanced
                .iter()
                .flat_map(|s| parse_selector_matchers(s.as_ref()))
                .collect(),
            allow_any,
        }
    }

    pub fn matches_always(&self) -> bool {
        self.allow_any && self.unbalanced.is_empty()
    }

    pub fn matches_never(&self) -> bool {
        self.balanced.is_empty() && !self.allow_any
    }

    pub fn matches(&self, scopes: &[&str]) -> bool {
        if self.unbalanced.iter().any(|m| m.matches(scopes)) {
            return false;
        }
        if self.balanced.iter().any(|m| m.matches(scopes)) {
            return true;
        }
        self.allow_any
    }
}

/// How tokens are decorated on top of the attributes of their scopes
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct TokenDecorations {
    pub token_types: Vec<TokenTypeOverride>,
    pub balanced_brackets: Option<BalancedBracketSelectors>,
}

impl TokenDecorations {
    fn decorate(&self, stack: &AttributedScopeStack) -> TokenAttributes {
        let mut attributes = stack.attributes;
        let mut balanced = self
            .balanced_brackets
            .as_ref()
            .is_some_and(|b| b.matches_always());

        let check_brackets = self
            .balanced_brackets
            .as_ref()
            .is_some_and(|b| !b.matches_always() && !b.matches_never());

        if !self.token_types.is_empty() || check_brackets {
            let scopes = stack.scope_names();
            for token_type in &self.token_types {
                if token_type.matches(&scopes) {
                    attributes =
                        attributes.set(0, Some(token_type.token_type), None, None, 0, 0);
                }
            }
            if let Some(b) = &self.balanced_brackets {
                balanced = b.matches(&scopes);
            }
        }

        if balanced {
            attributes = attributes.set(0, None, Some(true), None, 0, 0);
        }
        attributes
    }
}

/// Collects the tokens of a single line.
///
/// Tokens are produced in order, each one ending where the next one starts.
#[derive(Debug)]
pub(crate) struct LineTokens<'d> {
    decorations: &'d TokenDecorations,
    /// `[start, attributes, start, attributes, ...]`
    binary: Vec<u32>,
    scoped: Option<Vec<Token>>,
    /// Position up to which tokens have been generated
    /// (start of next token to be produced)
    last_end_pos: usize,
}

impl<'d> LineTokens<'d> {
    pub fn new(decorations: &'d TokenDecorations, scoped: bool) -> Self {
        Self {
            decorations,
            binary: Vec::new(),
            scoped: scoped.then(Vec::new),
            last_end_pos: 0,
        }
    }

    /// Number of tokens in the binary output
    pub fn len(&self) -> usize {
        self.binary.len() / 2
    }

    pub fn produce(&mut self, stack: &AttributedScopeStack, end_pos: usize) {
        // Skip empty tokens (can happen with zero-width matches)
        if self.last_end_pos >= end_pos {
            return;
        }

        #[cfg(feature = "debug")]
        log::trace!(
            "[produce]: [{}..{end_pos}] {}",
            self.last_end_pos,
            stack.scopes
        );

        if let Some(scoped) = self.scoped.as_mut() {
            scoped.push(Token {
                span: self.last_end_pos..end_pos,
                scopes: stack.scope_names().into_iter().map(String::from).collect(),
            });
        }
        let attributes = self.decorations.decorate(stack);
        self.push_binary(attributes, end_pos);
    }

    /// Produces a token with those exact attributes, without any scope
    pub fn produce_attributes(&mut self, attributes: TokenAttributes, end_pos: usize) {
        if self.last_end_pos >= end_pos {
            return;
        }
        if let Some(scoped) = self.scoped.as_mut() {
            scoped.push(Token {
                span: self.last_end_pos..end_pos,
                scopes: Vec::new(),
            });
        }
        self.push_binary(attributes, end_pos);
    }

    fn push_binary(&mut self, attributes: TokenAttributes, end_pos: usize) {
        // Same attributes as the previous token: extend it
        if self.binary.last() != Some(&attributes.bits()) {
            self.binary.push(self.last_end_pos as u32);
            self.binary.push(attributes.bits());
        }
        self.last_end_pos = end_pos;
    }

    /// Similar to LineTokens.getBinaryResult in vscode-textmate.
    ///
    /// `line_len` includes the `\n` appended to the line: a token starting on it is dropped
    /// and spans stop before it. A line always has at least one token.
    pub fn finish(
        mut self,
        stack: &AttributedScopeStack,
        line_len: usize,
    ) -> (Vec<u32>, Vec<Token>) {
        let text_len = line_len.saturating_sub(1);

        if self.binary.len() >= 2 && self.binary[self.binary.len() - 2] as usize == text_len {
            self.binary.truncate(self.binary.len() - 2);
        }
        if let Some(scoped) = self.scoped.as_mut()
            && scoped.last().is_some_and(|t| t.span.start == text_len)
        {
            scoped.pop();
        }

        if self.binary.is_empty() {
            self.last_end_pos = 0;
            if let Some(scoped) = self.scoped.as_mut() {
                scoped.clear();
            }
            self.produce(stack, line_len);
        }

        let mut scoped = self.scoped.unwrap_or_default();
        for token in &mut scoped {
            token.span.end = token.span.end.min(text_len);
        }
        (self.binary, scoped)
    }
}
