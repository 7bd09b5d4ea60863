//! Scope selector parsing and matching for injections and language configuration selectors.
//!
//! This follows the selector syntax of vscode-textmate: `L:`/`R:` priorities, `,` and `|`
//! alternatives, space separated paths, `-` exclusions and parenthesized groups.

use std::sync::LazyLock;

use onig::Regex;
use serde::{Deserialize, Serialize};

use crate::scope::is_scope_prefix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InjectionPrecedence {
    Left,  // L: prefix
    Right, // R: prefix
}

impl InjectionPrecedence {
    /// -1 for `L:`, 1 for `R:` and 0 without prefix
    pub fn priority(precedence: Option<InjectionPrecedence>) -> i8 {
        match precedence {
            Some(InjectionPrecedence::Left) => -1,
            Some(InjectionPrecedence::Right) => 1,
            None => 0,
        }
    }
}

/// A compiled selector matcher with priority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledMatcher {
    pub matcher: SelectorMatcher,
    pub precedence: Option<InjectionPrecedence>,
}

impl CompiledMatcher {
    pub fn matches(&self, scopes: &[&str]) -> bool {
        self.matcher.matches(scopes)
    }

    pub fn priority(&self) -> i8 {
        InjectionPrecedence::priority(self.precedence)
    }
}

/// Selector matcher that can evaluate against scope stacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorMatcher {
    /// Every scope must be found in the stack, in that order, but not necessarily
    /// consecutively
    Path(Vec<String>),
    /// All matchers must succeed (space-separated)
    And(Vec<SelectorMatcher>),
    /// Any matcher can succeed (OR operation `|` or `,` separated)
    Or(Vec<SelectorMatcher>),
    /// Matcher must NOT succeed (NOT operation `-` prefix)
    Not(Box<SelectorMatcher>),
}

impl SelectorMatcher {
    /// `scopes` goes from the root to the leaf
    pub fn matches(&self, scopes: &[&str]) -> bool {
        match self {
            SelectorMatcher::Path(path) => path_matches(path, scopes),
            SelectorMatcher::And(matchers) => matchers.iter().all(|m| m.matches(scopes)),
            SelectorMatcher::Or(matchers) => matchers.iter().any(|m| m.matches(scopes)),
            SelectorMatcher::Not(matcher) => !matcher.matches(scopes),
        }
    }
}

fn path_matches(path: &[String], scopes: &[&str]) -> bool {
    if scopes.len() < path.len() {
        return false;
    }
    let mut last_index = 0;
    path.iter().all(|identifier| {
        for (i, scope) in scopes.iter().enumerate().skip(last_index) {
            if is_scope_prefix(identifier, scope) {
                last_index = i + 1;
                return true;
            }
        }
        false
    })
}

/// Regex for tokenizing selectors (matches vscode-textmate exactly except for \* added)
static TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([LR]:|[\w.:][\w*.:\-]*|[,|\-()])").expect("Invalid selector regex")
});

fn is_identifier(s: &str) -> bool {
    if s.is_empty() || s == "-" {
        return false;
    }

    s.chars().any(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == ':')
}

/// `meta.tag.*.*.html` is matched as `meta.tag`
fn strip_wildcard(token: &str) -> String {
    if let Some(pos) = token.find(".*") {
        token[..pos].to_string()
    } else {
        token.to_string()
    }
}

struct Parser<'a> {
    tokens: Vec<&'a str>,
    position: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.position).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn parse_inner_expression(&mut self) -> SelectorMatcher {
        let mut out = Vec::new();
        while let Some(m) = self.parse_conjunction() {
            out.push(m);
            if matches!(self.peek(), Some("|" | ",")) {
                while matches!(self.peek(), Some("|" | ",")) {
                    self.advance();
                }
            } else {
                break;
            }
        }

        if out.len() == 1 {
            out.remove(0)
        } else {
            SelectorMatcher::Or(out)
        }
    }

    fn parse_operand(&mut self) -> Option<SelectorMatcher> {
        let token = self.peek()?;

        match token {
            "-" => {
                self.advance();
                // A dangling `-` excludes nothing and matches nothing
                let negated = self
                    .parse_operand()
                    .map(|m| SelectorMatcher::Not(Box::new(m)))
                    .unwrap_or(SelectorMatcher::Or(Vec::new()));
                Some(negated)
            }
            "(" => {
                self.advance();
                let inner = self.parse_inner_expression();
                if self.peek() == Some(")") {
                    self.advance();
                }
                Some(inner)
            }
            _ if is_identifier(token) => {
                let mut scopes = Vec::new();
                while let Some(t) = self.peek()
                    && is_identifier(t)
                {
                    scopes.push(strip_wildcard(t));
                    self.advance();
                }
                Some(SelectorMatcher::Path(scopes))
            }
            _ => None,
        }
    }

    fn parse_conjunction(&mut self) -> Option<SelectorMatcher> {
        let mut matchers = Vec::new();

        while let Some(m) = self.parse_operand() {
            matchers.push(m);
        }

        match matchers.len() {
            0 => None,
            1 => matchers.pop(),
            _ => Some(SelectorMatcher::And(matchers)),
        }
    }
}

/// Parse a selector string into compiled matchers, one per top-level alternative
pub fn parse_selector_matchers(selector: &str) -> Vec<CompiledMatcher> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Vec::new();
    }

    let tokens: Vec<_> = TOKEN_REGEX
        .find_iter(selector)
        .map(|(start, end)| &selector[start..end])
        .collect();
    let mut parser = Parser {
        tokens,
        position: 0,
    };
    let mut res = Vec::new();

    while let Some(token) = parser.peek() {
        let precedence = match token {
            "L:" => Some(InjectionPrecedence::Left),
            "R:" => Some(InjectionPrecedence::Right),
            _ => None,
        };
        if precedence.is_some() {
            parser.advance();
        }

        let Some(matcher) = parser.parse_conjunction() else {
            break;
        };
        res.push(CompiledMatcher {
            matcher,
            precedence,
        });
        if matches!(parser.peek(), Some("," | "|")) {
            parser.advance();
        } else {
            break;
        }
    }

    res
}
