use serde::{Deserialize, Serialize};

use crate::error::{Error, OcraResult};
use crate::grammars::{
    BASE_GRAMMAR_ID, GlobalRuleRef, GrammarId, GrammarSet, ROOT_RULE_ID, Rule, RuleId,
};
use crate::tokenizer::attributed::{AttributeResolver, AttributedScopeStack};
use crate::tokenizer::stack::{StackFrame, StateStack};

/// One frame of a [`GrammarState`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameState {
    pub grammar: GrammarId,
    pub rule: RuleId,
    /// Scopes pushed by the rule name on top of the parent content scopes
    pub name: Vec<String>,
    /// Scopes pushed by the rule content name on top of the name scopes
    pub content: Vec<String>,
    /// End or while pattern with the begin captures substituted
    pub end_pattern: Option<String>,
    pub captured_eol: bool,
}

/// The state of the tokenizer between two lines.
///
/// It only holds scope names, rule ids and patterns so it can be stored and used later
/// with another theme. Resuming requires the exact same grammars: each grammar is
/// recorded with its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrammarState {
    frames: Vec<FrameState>,
    /// (scope name, fingerprint) of every grammar of the set, in order
    grammars: Vec<(String, u64)>,
}

impl GrammarState {
    pub(crate) fn capture(stack: &StateStack, grammars: &GrammarSet) -> Self {
        let mut frames = Vec::with_capacity(stack.len());
        let mut parent_content: Option<&AttributedScopeStack> = None;

        for frame in &stack.frames {
            let name = frame
                .name
                .scopes
                .extension_if_defined(parent_content.map(|p| &p.scopes))
                .unwrap_or_default();
            let content = frame
                .content
                .scopes
                .extension_if_defined(Some(&frame.name.scopes))
                .unwrap_or_default();

            frames.push(FrameState {
                grammar: frame.rule_ref.grammar,
                rule: frame.rule_ref.rule,
                name: name.into_iter().map(String::from).collect(),
                content: content.into_iter().map(String::from).collect(),
                end_pattern: frame.end_pattern.clone(),
                captured_eol: frame.captured_eol,
            });
            parent_content = Some(&frame.content);
        }

        Self {
            frames,
            grammars: grammars.fingerprints(),
        }
    }

    pub fn frames(&self) -> &[FrameState] {
        &self.frames
    }

    /// Number of nested rules, the root included
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Rebuilds the stack, computing the attributes with the current theme.
    pub(crate) fn restore(
        &self,
        grammars: &GrammarSet,
        resolver: &AttributeResolver,
    ) -> OcraResult<StateStack> {
        self.validate(grammars)?;

        let mut stack: Option<StateStack> = None;
        for frame in &self.frames {
            let rule_ref = GlobalRuleRef {
                grammar: frame.grammar,
                rule: frame.rule,
            };
            let (name, content) = match &stack {
                None => {
                    let name = match frame.name.split_first() {
                        Some((root, rest)) => {
                            AttributedScopeStack::root(root, resolver).push_all(rest, resolver)
                        }
                        None => AttributedScopeStack::root(&grammars.base().scope_name, resolver),
                    };
                    let content = name.push_all(&frame.content, resolver);
                    (name, content)
                }
                Some(s) => {
                    let name = s.top().content.push_all(&frame.name, resolver);
                    let content = name.push_all(&frame.content, resolver);
                    (name, content)
                }
            };

            let restored = StackFrame {
                rule_ref,
                name,
                content,
                end_pattern: frame.end_pattern.clone(),
                captured_eol: frame.captured_eol,
                anchor_position: None,
                enter_position: None,
            };
            match stack.as_mut() {
                None => stack = Some(StateStack::new(restored)),
                Some(s) => s.push(restored),
            }
        }

        stack.ok_or_else(|| self.mismatch(grammars, "the state has no frames".to_string()))
    }

    fn mismatch(&self, grammars: &GrammarSet, reason: String) -> Error {
        Error::StateMismatch {
            scope_name: grammars.base().scope_name.clone(),
            reason,
        }
    }

    fn validate(&self, grammars: &GrammarSet) -> OcraResult<()> {
        let fingerprints = grammars.fingerprints();
        if self.frames.is_empty() {
            return Err(self.mismatch(grammars, "the state has no frames".to_string()));
        }
        if self.grammars.first() != fingerprints.first() {
            return Err(self.mismatch(
                grammars,
                format!(
                    "the state was created for {}",
                    self.grammars
                        .first()
                        .map(|(scope, _)| scope.as_str())
                        .unwrap_or("no grammar")
                ),
            ));
        }

        for (depth, frame) in self.frames.iter().enumerate() {
            let idx = frame.grammar.as_index();
            let (Some(expected), Some(actual)) = (self.grammars.get(idx), fingerprints.get(idx))
            else {
                return Err(self.mismatch(
                    grammars,
                    format!("frame {depth} refers to the unknown grammar #{idx}"),
                ));
            };
            if expected != actual {
                return Err(self.mismatch(
                    grammars,
                    format!(
                        "frame {depth} refers to {} which is not the loaded grammar {}",
                        expected.0, actual.0
                    ),
                ));
            }

            let rule = grammars.rule(GlobalRuleRef {
                grammar: frame.grammar,
                rule: frame.rule,
            });
            let valid = if depth == 0 {
                frame.grammar == BASE_GRAMMAR_ID && frame.rule == ROOT_RULE_ID
            } else {
                matches!(rule, Some(Rule::BeginEnd(_) | Rule::BeginWhile(_)))
            };
            if !valid {
                return Err(self.mismatch(
                    grammars,
                    format!(
                        "frame {depth} refers to rule #{} of {} which cannot be on the stack",
                        frame.rule.0, actual.0
                    ),
                ));
            }
        }

        Ok(())
    }
}
