//! Immutable scope stacks.
//!
//! A stack like `source.js meta.function string.quoted` is a linked list from the leaf to the
//! root. Pushing shares the parent so a frame of the tokenizer can keep its own stack around
//! for as long as it needs to.

use std::fmt;
use std::sync::Arc;

/// Whether `prefix` is a dotted prefix of `scope`: `string` is a prefix of `string.quoted`
/// but not of `strings`.
#[inline]
pub fn is_scope_prefix(prefix: &str, scope: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    scope.len() >= prefix.len()
        && scope.starts_with(prefix)
        && (scope.len() == prefix.len() || scope.as_bytes()[prefix.len()] == b'.')
}

struct Node {
    parent: Option<ScopeStack>,
    scope: Arc<str>,
    depth: usize,
}

/// An immutable, cheaply cloned scope stack.
#[derive(Clone)]
pub struct ScopeStack(Arc<Node>);

impl ScopeStack {
    /// A stack with a single scope
    pub fn new(scope: impl Into<Arc<str>>) -> Self {
        Self(Arc::new(Node {
            parent: None,
            scope: scope.into(),
            depth: 1,
        }))
    }

    /// Builds a stack bottom-up: the first item is the root.
    ///
    /// Returns `None` if there are no items.
    pub fn from_segments<I, S>(segments: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        let mut out: Option<ScopeStack> = None;
        for s in segments {
            out = Some(match out {
                Some(stack) => stack.push(s),
                None => ScopeStack::new(s),
            });
        }
        out
    }

    /// Returns a new stack with `scope` as the leaf. `self` is left untouched.
    pub fn push(&self, scope: impl Into<Arc<str>>) -> Self {
        Self(Arc::new(Node {
            parent: Some(self.clone()),
            scope: scope.into(),
            depth: self.0.depth + 1,
        }))
    }

    /// Pushes every space separated scope of `path`, in order.
    pub fn push_path(&self, path: &str) -> Self {
        let mut out = self.clone();
        for scope in path.split(' ').filter(|s| !s.is_empty()) {
            out = out.push(scope);
        }
        out
    }

    /// The leaf scope
    #[inline]
    pub fn scope_name(&self) -> &str {
        &self.0.scope
    }

    #[inline]
    pub fn parent(&self) -> Option<&ScopeStack> {
        self.0.parent.as_ref()
    }

    /// Number of scopes in the stack
    #[inline]
    pub fn len(&self) -> usize {
        self.0.depth
    }

    /// A stack always has at least one scope
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterates from the leaf to the root
    pub fn iter(&self) -> impl Iterator<Item = &ScopeStack> {
        std::iter::successors(Some(self), |s| s.parent())
    }

    /// All the scopes, root first
    pub fn segments(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.iter().map(|s| s.scope_name()).collect();
        out.reverse();
        out
    }

    /// Whether both are the same node in memory
    #[inline]
    pub fn ptr_eq(&self, other: &ScopeStack) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// True if `other` is `self` or one of its ancestors.
    pub fn extends(&self, other: &ScopeStack) -> bool {
        if self.len() < other.len() {
            return false;
        }
        let mut current = self;
        while current.len() > other.len() {
            match current.parent() {
                Some(p) => current = p,
                None => return false,
            }
        }
        current == other
    }

    /// The scopes pushed on top of `base`, root first.
    ///
    /// With `None` as a base, that's every scope. Returns `None` if `base` is not an ancestor
    /// of `self`.
    pub fn extension_if_defined(&self, base: Option<&ScopeStack>) -> Option<Vec<&str>> {
        let mut out = Vec::new();
        let mut current = Some(self);
        while let Some(s) = current {
            if let Some(b) = base
                && (s.ptr_eq(b) || (s.len() == b.len() && s == b))
            {
                out.reverse();
                return Some(out);
            }
            out.push(s.scope_name());
            current = s.parent();
        }

        if base.is_none() {
            out.reverse();
            Some(out)
        } else {
            None
        }
    }
}

impl PartialEq for ScopeStack {
    fn eq(&self, other: &Self) -> bool {
        let mut a = Some(self);
        let mut b = Some(other);
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if x.ptr_eq(y) {
                        return true;
                    }
                    if x.len() != y.len() || x.scope_name() != y.scope_name() {
                        return false;
                    }
                    a = x.parent();
                    b = y.parent();
                }
                _ => return false,
            }
        }
    }
}

impl Eq for ScopeStack {}

impl fmt::Display for ScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments().join(" "))
    }
}

impl fmt::Debug for ScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeStack({self})")
    }
}
