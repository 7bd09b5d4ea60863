use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::matcher::{SelectorMatcher, parse_selector_matchers};
use crate::scope::is_scope_prefix;

/// Represents a parent scope requirement in a theme selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parent {
    /// Parent scope that can appear anywhere up the scope stack
    /// `Anywhere(source.js)` from "source.js meta.function" - can have scopes between
    Anywhere(String),
    /// Parent scope that must be the immediate parent (child combinator `>`)
    /// `Direct(meta.function)` from "meta.function > string" - must be immediate parent
    Direct(String),
}

impl Parent {
    fn scope(&self) -> &str {
        match self {
            Parent::Anywhere(s) | Parent::Direct(s) => s,
        }
    }
}

/// A parsed theme selector that is used to match against scope stacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeSelector {
    /// The target scope to match (rightmost in the selector string)
    pub target_scope: String,
    /// Required parent scopes from right to left of the selector
    pub parent_scopes: Vec<Parent>,
    /// The rule does not apply if any of those match the scope stack
    pub exclusions: Vec<SelectorMatcher>,
    /// -1 for `L:`, 1 for `R:`
    pub priority: i8,
}

impl ThemeSelector {
    pub fn new(target_scope: impl Into<String>, parent_scopes: Vec<Parent>) -> Self {
        Self {
            target_scope: target_scope.into(),
            parent_scopes,
            exclusions: Vec::new(),
            priority: 0,
        }
    }

    /// Number of dotted segments of the target: `string.quoted` is 2
    pub fn target_depth(&self) -> usize {
        self.target_scope.split('.').count()
    }

    /// Checks if this selector matches the given scope stack, ordered from root to leaf.
    ///
    /// 1. The target scope must match the last scope in the stack
    /// 2. All parent scope requirements must be satisfied walking up the stack
    /// 3. `Parent::Anywhere` can skip intermediate scopes
    /// 4. `Parent::Direct` requires immediate parent relationship
    /// 5. None of the exclusions can match the stack
    pub fn matches(&self, scope_stack: &[&str]) -> bool {
        let Some((last, mut rest)) = scope_stack.split_last() else {
            return false;
        };
        if !is_scope_prefix(&self.target_scope, last) {
            return false;
        }

        for required_parent in &self.parent_scopes {
            match required_parent {
                Parent::Direct(parent_scope) => {
                    // Direct parent must match the last remaining parent
                    match rest.split_last() {
                        Some((last, r)) if is_scope_prefix(parent_scope, last) => {
                            rest = r;
                        }
                        _ => return false,
                    }
                }
                Parent::Anywhere(parent_scope) => {
                    match rest
                        .iter()
                        .rposition(|scope| is_scope_prefix(parent_scope, scope))
                    {
                        Some(pos) => {
                            // Consume all parents up to and including this match
                            rest = &rest[..pos];
                        }
                        None => return false,
                    }
                }
            }
        }

        !self.exclusions.iter().any(|m| m.matches(scope_stack))
    }

    /// Orders selectors from most to least specific.
    ///
    /// Deeper targets win, then parents are compared pairwise from the nearest one
    /// outward by length, then the selector with more parent constraints wins, then the
    /// higher priority.
    pub fn cmp_specificity(&self, other: &ThemeSelector) -> Ordering {
        other
            .target_depth()
            .cmp(&self.target_depth())
            .then_with(|| {
                for (a, b) in self.parent_scopes.iter().zip(other.parent_scopes.iter()) {
                    let ord = b.scope().len().cmp(&a.scope().len());
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                other.parent_weight().cmp(&self.parent_weight())
            })
            .then_with(|| other.priority.cmp(&self.priority))
    }

    fn parent_weight(&self) -> usize {
        self.parent_scopes
            .iter()
            .map(|p| match p {
                Parent::Anywhere(_) => 1,
                Parent::Direct(_) => 2,
            })
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tok<'a> {
    Ident(&'a str),
    Child,
    Open,
    Close,
    Comma,
    Minus,
}

fn lex(input: &str) -> Vec<Tok<'_>> {
    let mut out = Vec::new();
    let mut start = None;

    for (i, c) in input.char_indices() {
        let single = match c {
            '>' => Some(Tok::Child),
            '(' => Some(Tok::Open),
            ')' => Some(Tok::Close),
            ',' | '|' => Some(Tok::Comma),
            _ => None,
        };
        if c.is_whitespace() || single.is_some() {
            if let Some(s) = start.take() {
                out.push(Tok::Ident(&input[s..i]));
            }
            if let Some(t) = single {
                out.push(t);
            }
            continue;
        }
        if c == '-' && start.is_none() {
            out.push(Tok::Minus);
            continue;
        }
        if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        out.push(Tok::Ident(&input[s..]));
    }
    out
}

/// Splits on `,` and `|` outside of parentheses
fn split_alternatives<'a, 'b>(tokens: &'b [Tok<'a>]) -> Vec<&'b [Tok<'a>]> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, t) in tokens.iter().enumerate() {
        match t {
            Tok::Open => depth += 1,
            Tok::Close => depth = depth.saturating_sub(1),
            Tok::Comma if depth == 0 => {
                out.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => (),
        }
    }
    out.push(&tokens[start..]);
    out
}

fn matching_close(tokens: &[Tok<'_>], open: usize) -> usize {
    let mut depth = 0usize;
    for (i, t) in tokens.iter().enumerate().skip(open) {
        match t {
            Tok::Open => depth += 1,
            Tok::Close => {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => (),
        }
    }
    tokens.len()
}

fn render(tokens: &[Tok<'_>]) -> String {
    let parts: Vec<&str> = tokens
        .iter()
        .filter_map(|t| match t {
            Tok::Ident(s) => Some(*s),
            Tok::Open => Some("("),
            Tok::Close => Some(")"),
            Tok::Comma => Some(","),
            Tok::Minus => Some("-"),
            Tok::Child => None,
        })
        .collect();
    parts.join(" ")
}

#[derive(Debug, Clone, PartialEq)]
enum Step<'a> {
    Scope(&'a str),
    Child,
}

/// Expands a sequence into every path it describes: `(a, b) c` is `a c` and `b c`.
fn expand<'a>(tokens: &[Tok<'a>], exclusions: &mut Vec<SelectorMatcher>) -> Vec<Vec<Step<'a>>> {
    let mut paths: Vec<Vec<Step<'a>>> = vec![Vec::new()];
    let mut i = 0;

    while i < tokens.len() {
        match tokens[i] {
            Tok::Ident(s) => {
                paths.iter_mut().for_each(|p| p.push(Step::Scope(s)));
                i += 1;
            }
            Tok::Child => {
                paths.iter_mut().for_each(|p| p.push(Step::Child));
                i += 1;
            }
            Tok::Open => {
                let close = matching_close(tokens, i);
                let inner = &tokens[i + 1..close.min(tokens.len())];
                let mut group = Vec::new();
                for alternative in split_alternatives(inner) {
                    group.extend(expand(alternative, exclusions));
                }
                paths = paths
                    .iter()
                    .flat_map(|p| {
                        group.iter().map(move |g| {
                            let mut joined = p.clone();
                            joined.extend(g.iter().cloned());
                            joined
                        })
                    })
                    .collect();
                i = close + 1;
            }
            Tok::Minus => {
                let operand_end = match tokens.get(i + 1) {
                    Some(Tok::Open) => matching_close(tokens, i + 1) + 1,
                    Some(Tok::Ident(_)) => i + 2,
                    _ => i + 1,
                };
                let operand = &tokens[i + 1..operand_end.min(tokens.len())];
                if !operand.is_empty() {
                    let matchers = parse_selector_matchers(&render(operand));
                    exclusions.push(SelectorMatcher::Or(
                        matchers.into_iter().map(|m| m.matcher).collect(),
                    ));
                }
                i = operand_end;
            }
            Tok::Close | Tok::Comma => i += 1,
        }
    }

    paths
}

fn path_to_selector(
    path: &[Step<'_>],
    priority: i8,
    exclusions: &[SelectorMatcher],
) -> Option<ThemeSelector> {
    let (last, rest) = path.split_last()?;
    let Step::Scope(target) = last else {
        return None;
    };

    let mut parents = Vec::new();
    let mut is_direct = false;
    for step in rest.iter().rev() {
        match step {
            Step::Child => is_direct = true,
            Step::Scope(s) => {
                parents.push(if is_direct {
                    Parent::Direct(s.to_string())
                } else {
                    Parent::Anywhere(s.to_string())
                });
                is_direct = false;
            }
        }
    }

    Some(ThemeSelector {
        target_scope: target.to_string(),
        parent_scopes: parents,
        exclusions: exclusions.to_vec(),
        priority,
    })
}

/// Parses a theme selector string into the selectors it describes.
///
/// # Selector Format
/// - Alternatives are separated by commas: `"comment, string"`
/// - `L:` or `R:` in front of an alternative sets its priority
/// - Scopes are separated by whitespace: `"source.js meta.function string"`
/// - Child combinator `>` creates direct parent requirement: `"parent > child"`
/// - Parenthesized groups expand to one selector per alternative: `"(a, b) c"`
/// - `- operand` excludes stacks matching the operand: `"string - comment"`
///
/// Returns an empty vec if nothing valid was found
pub fn parse_selector(input: &str) -> Vec<ThemeSelector> {
    let tokens = lex(input);
    let mut out = Vec::new();

    for alternative in split_alternatives(&tokens) {
        let mut alternative = alternative.to_vec();
        let mut priority = 0;
        if let Some(Tok::Ident(first)) = alternative.first().copied() {
            let stripped = if let Some(s) = first.strip_prefix("L:") {
                priority = -1;
                Some(s)
            } else if let Some(s) = first.strip_prefix("R:") {
                priority = 1;
                Some(s)
            } else {
                None
            };
            if let Some(s) = stripped {
                if s.is_empty() {
                    alternative.remove(0);
                } else {
                    alternative[0] = Tok::Ident(s);
                }
            }
        }

        let mut exclusions = Vec::new();
        let paths = expand(&alternative, &mut exclusions);
        for path in paths {
            if let Some(selector) = path_to_selector(&path, priority, &exclusions) {
                out.push(selector);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selector() {
        let test_cases = vec![
            ("comment", vec![ThemeSelector::new("comment", vec![])]),
            (
                "source.js meta.function string",
                vec![ThemeSelector::new(
                    "string",
                    vec![
                        Parent::Anywhere("meta.function".to_string()), // deepest parent
                        Parent::Anywhere("source.js".to_string()),     // shallowest parent
                    ],
                )],
            ),
            (
                "meta.function > string",
                vec![ThemeSelector::new(
                    "string",
                    vec![Parent::Direct("meta.function".to_string())],
                )],
            ),
            (
                "source.js meta.function > string.quoted",
                vec![ThemeSelector::new(
                    "string.quoted",
                    vec![
                        Parent::Direct("meta.function".to_string()),
                        Parent::Anywhere("source.js".to_string()),
                    ],
                )],
            ),
            (
                "source > meta > string",
                vec![ThemeSelector::new(
                    "string",
                    vec![
                        Parent::Direct("meta".to_string()),
                        Parent::Direct("source".to_string()),
                    ],
                )],
            ),
            (
                "  source.js   meta.function>string  ",
                vec![ThemeSelector::new(
                    "string",
                    vec![
                        Parent::Direct("meta.function".to_string()),
                        Parent::Anywhere("source.js".to_string()),
                    ],
                )],
            ),
            (
                "comment, string.quoted",
                vec![
                    ThemeSelector::new("comment", vec![]),
                    ThemeSelector::new("string.quoted", vec![]),
                ],
            ),
            (
                "(source.js, source.ts) string",
                vec![
                    ThemeSelector::new(
                        "string",
                        vec![Parent::Anywhere("source.js".to_string())],
                    ),
                    ThemeSelector::new(
                        "string",
                        vec![Parent::Anywhere("source.ts".to_string())],
                    ),
                ],
            ),
            (
                "R:keyword, L:entity.name-tag",
                vec![
                    ThemeSelector {
                        priority: 1,
                        ..ThemeSelector::new("keyword", vec![])
                    },
                    ThemeSelector {
                        priority: -1,
                        ..ThemeSelector::new("entity.name-tag", vec![])
                    },
                ],
            ),
        ];

        for (input, expected) in test_cases {
            let result = parse_selector(input);
            assert_eq!(result, expected, "Mismatch for input: '{}'", input);
        }
        assert!(parse_selector("").is_empty());
        assert!(parse_selector("a >").is_empty());
    }

    #[test]
    fn can_parse_exclusions() {
        let selectors = parse_selector("string - comment");
        assert_eq!(selectors.len(), 1);
        assert_eq!(selectors[0].target_scope, "string");
        assert!(selectors[0].parent_scopes.is_empty());
        assert_eq!(
            selectors[0].exclusions,
            vec![SelectorMatcher::Or(vec![SelectorMatcher::Path(vec![
                "comment".to_string()
            ])])]
        );

        let selectors = parse_selector("string -(comment, meta.embedded)");
        assert!(selectors[0].matches(&["source", "string"]));
        assert!(!selectors[0].matches(&["source", "comment", "string"]));
        assert!(!selectors[0].matches(&["meta.embedded.block", "string"]));
    }

    #[test]
    fn test_selector_matches() {
        let test_cases = vec![
            // (selector_string, scope_stack, expected_match)

            // Simple selector tests
            ("comment", vec!["source.js", "comment.line"], true),
            ("comment", vec!["source.js", "string.quoted"], false),
            ("comment", vec!["comment"], true),
            (
                "comment.line",
                vec!["source.js", "comment.line.double-slash"],
                true,
            ),
            ("comment.line", vec!["source.js", "comment.lines"], false),
            // Parent selector tests (Anywhere)
            (
                "source.js string",
                vec!["source.js", "meta.function", "string.quoted"],
                true,
            ),
            ("source.js string", vec!["source.js", "string.quoted"], true),
            (
                "source.js string",
                vec!["source.py", "string.quoted"],
                false,
            ),
            (
                "meta.function string",
                vec!["source.js", "meta.function.arrow", "string.quoted"],
                true,
            ),
            // Child combinator tests (Direct)
            (
                "meta.function > string",
                vec!["source.js", "meta.function", "string.quoted"],
                true,
            ),
            (
                "meta.function > string",
                vec!["source.js", "meta.function", "punctuation", "string.quoted"],
                false,
            ),
            ("parent > child", vec!["parent", "child"], true),
            ("parent > child", vec!["grand", "parent", "child"], true),
            ("grand > child", vec!["grand", "parent", "child"], false),
            ("grand > child", vec!["grand", "child"], true),
            // Mixed combinator tests
            (
                "source.js meta.function > string.quoted",
                vec!["source.js", "meta.function", "string.quoted"],
                true,
            ),
            (
                "source.js meta.function > string.quoted",
                vec!["source.py", "meta.function", "string.quoted"],
                false,
            ),
            // Multiple direct parents
            (
                "source > meta > string",
                vec!["source.js", "meta.function", "string.quoted"],
                true,
            ),
            (
                "source > meta > string",
                vec!["source.js", "punctuation", "meta.function", "string.quoted"],
                false,
            ),
            // Edge cases
            ("comment", vec![], false),
            ("source.js comment", vec!["source.js"], false),
            ("meta.function > string", vec!["meta.function"], false),
        ];

        for (selector_str, scope_names, expected) in test_cases {
            let selector = parse_selector(selector_str)
                .pop()
                .unwrap_or_else(|| panic!("Failed to parse selector: '{}'", selector_str));
            let result = selector.matches(&scope_names);

            assert_eq!(
                result, expected,
                "Selector '{}' matching scope stack {:?}: expected {}, got {}",
                selector_str, scope_names, expected, result
            );
        }
    }

    #[test]
    fn can_order_by_specificity() {
        let mut selectors: Vec<ThemeSelector> = [
            "string",
            "L:string.quoted",
            "string.quoted",
            "R:string.quoted",
            "source string.quoted",
            "source.js string.quoted",
            "source.js meta string.quoted",
            "string.quoted.double",
        ]
        .iter()
        .flat_map(|s| parse_selector(s))
        .collect();
        selectors.sort_by(|a, b| a.cmp_specificity(b));

        let order: Vec<String> = selectors
            .iter()
            .map(|s| {
                let mut parts: Vec<&str> =
                    s.parent_scopes.iter().rev().map(|p| p.scope()).collect();
                parts.push(&s.target_scope);
                format!("{}{}", s.priority, parts.join(" "))
            })
            .collect();

        assert_eq!(
            order,
            vec![
                "0string.quoted.double",
                "0source.js string.quoted",
                "0source string.quoted",
                "0source.js meta string.quoted",
                "1string.quoted",
                "0string.quoted",
                "-1string.quoted",
                "0string",
            ]
        );
    }
}
