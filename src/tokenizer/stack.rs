use std::fmt;

use crate::grammars::GlobalRuleRef;
use crate::tokenizer::attributed::AttributedScopeStack;

#[derive(Clone, Debug)]
pub(crate) struct StackFrame {
    /// Global rule ref that created this stack element
    pub rule_ref: GlobalRuleRef,
    /// "name" scopes - applied to begin/end delimiters
    pub name: AttributedScopeStack,
    /// "contentName" scopes - applied to content between delimiters
    pub content: AttributedScopeStack,
    /// Dynamic end/while pattern resolved with backreferences
    /// For BeginEnd rules: the end pattern with \1, \2, etc. resolved
    /// For BeginWhile rules: the while pattern with backreferences resolved
    pub end_pattern: Option<String>,
    /// The begin pattern matched up to the end of the line, including the \n.
    /// This means that the next line should start with an anchor_position of 0.
    pub captured_eol: bool,
    /// Where \G is active for the parent rule once this frame is popped
    pub anchor_position: Option<usize>,
    /// The position where this rule was entered during current line (for infinite loop detection)
    /// None at beginning of a line
    pub enter_position: Option<usize>,
}

impl StackFrame {
    pub fn root(rule_ref: GlobalRuleRef, scopes: AttributedScopeStack) -> Self {
        Self {
            rule_ref,
            name: scopes.clone(),
            content: scopes,
            end_pattern: None,
            captured_eol: false,
            anchor_position: None,
            enter_position: None,
        }
    }
}

/// Keeps track of nested context as well as how to exit that context and the captures
/// strings used in backreferences.
///
/// The root frame is never popped.
#[derive(Clone)]
pub(crate) struct StateStack {
    /// Stack frames from root to current
    pub frames: Vec<StackFrame>,
}

impl StateStack {
    pub fn new(root: StackFrame) -> Self {
        Self { frames: vec![root] }
    }

    /// Called when entering a nested context: when a begin pattern matches or a rule matches
    pub fn push(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }

    /// Exits the current context, getting back to the parent
    pub fn pop(&mut self) -> Option<StackFrame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    /// Pop but never go below root state - used in infinite loop protection
    pub fn safe_pop(&mut self) {
        self.pop();
    }

    /// Removes every frame from `index`, keeping at least the root
    pub fn truncate(&mut self, index: usize) {
        self.frames.truncate(index.max(1));
    }

    /// Whether the top frame was pushed by a rule already pushed at the same position
    /// on this line, without any pop in between
    pub fn top_repeats_rule(&self) -> bool {
        let Some((top, below)) = self.frames.split_last() else {
            return false;
        };
        below
            .iter()
            .rev()
            .take_while(|f| f.enter_position == top.enter_position)
            .any(|f| f.rule_ref == top.rule_ref)
    }

    /// Resets enter_position/anchor_position for all stack elements to None
    pub fn reset(&mut self) {
        for frame in &mut self.frames {
            frame.enter_position = None;
            frame.anchor_position = None;
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Access the top frame of the stack
    pub fn top(&self) -> &StackFrame {
        // `frames` always holds the root frame
        &self.frames[self.frames.len() - 1]
    }

    /// Mutable access to the top frame of the stack
    pub fn top_mut(&mut self) -> &mut StackFrame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }
}

impl fmt::Debug for StateStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "StateStack:")?;

        for (depth, frame) in self.frames.iter().enumerate() {
            let indent = "  ".repeat(depth);
            write!(
                f,
                "{}grammar={}, rule={} name=[{}], content=[{}]",
                indent,
                frame.rule_ref.grammar.0,
                frame.rule_ref.rule.0,
                frame.name.scopes,
                frame.content.scopes,
            )?;

            if let Some(pattern) = &frame.end_pattern {
                write!(f, ", end_pattern=\"{}\"", pattern)?;
            }

            write!(f, ", anchor_pos={:?}", frame.anchor_position)?;

            if let Some(enter_pos) = frame.enter_position
                && frame.anchor_position != Some(enter_pos)
            {
                write!(f, ", enter_pos={}", enter_pos)?;
            }

            writeln!(f, ", captured_eol={}", frame.captured_eol)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::basic_attributes::BasicScopeAttributesProvider;
    use crate::grammars::{GrammarId, RuleId};
    use crate::themes::RawTheme;
    use crate::tokenizer::attributed::AttributeResolver;

    fn frame(rule: u32, enter: Option<usize>) -> StackFrame {
        let resolver = AttributeResolver::new(
            Arc::new(RawTheme::default().compile().unwrap()),
            Arc::new(BasicScopeAttributesProvider::new(1, &HashMap::new())),
        );
        let mut frame = StackFrame::root(
            GlobalRuleRef {
                grammar: GrammarId(0),
                rule: RuleId(rule),
            },
            AttributedScopeStack::root("source.test", &resolver),
        );
        frame.enter_position = enter;
        frame
    }

    #[test]
    fn never_pops_the_root() {
        let mut stack = StateStack::new(frame(0, None));
        stack.push(frame(1, Some(0)));
        assert!(stack.pop().is_some());
        assert!(stack.pop().is_none());
        stack.safe_pop();
        assert_eq!(stack.len(), 1);
        stack.truncate(0);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn detects_rules_pushed_twice_at_the_same_position() {
        let mut stack = StateStack::new(frame(0, None));
        stack.push(frame(1, Some(3)));
        stack.push(frame(2, Some(3)));
        assert!(!stack.top_repeats_rule());
        stack.push(frame(1, Some(3)));
        assert!(stack.top_repeats_rule());

        let mut stack = StateStack::new(frame(0, None));
        stack.push(frame(1, Some(2)));
        stack.push(frame(1, Some(3)));
        assert!(!stack.top_repeats_rule());

        stack.reset();
        assert!(stack.frames.iter().all(|f| f.enter_position.is_none()));
    }
}
