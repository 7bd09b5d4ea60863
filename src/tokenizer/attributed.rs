use std::fmt;
use std::sync::Arc;

use crate::attributes::{StandardTokenType, TokenAttributes};
use crate::basic_attributes::{BasicScopeAttributes, BasicScopeAttributesProvider};
use crate::scope::ScopeStack;
use crate::themes::{CompiledTheme, StyleAttributes};

/// Computes the attribute word of scopes as they are pushed, from the theme and the
/// basic attributes of the language.
#[derive(Debug, Clone)]
pub(crate) struct AttributeResolver {
    theme: Arc<CompiledTheme>,
    basic_attributes: Arc<BasicScopeAttributesProvider>,
}

impl AttributeResolver {
    pub(crate) fn new(
        theme: Arc<CompiledTheme>,
        basic_attributes: Arc<BasicScopeAttributesProvider>,
    ) -> Self {
        Self {
            theme,
            basic_attributes,
        }
    }

    pub(crate) fn theme(&self) -> &CompiledTheme {
        &self.theme
    }

    /// The theme defaults with the language of the grammar
    pub(crate) fn default_attributes(&self) -> TokenAttributes {
        let defaults = self.theme.defaults();
        TokenAttributes::default().set(
            self.basic_attributes.default_attributes().language_id,
            Some(StandardTokenType::Other),
            None,
            Some(defaults.font_style),
            defaults.foreground,
            defaults.background,
        )
    }

    fn merge(
        existing: TokenAttributes,
        basic: BasicScopeAttributes,
        style: Option<StyleAttributes>,
    ) -> TokenAttributes {
        let (font_style, foreground, background) = match style {
            Some(s) => (
                s.font_style,
                s.foreground.unwrap_or(0),
                s.background.unwrap_or(0),
            ),
            None => (None, 0, 0),
        };
        existing.set(
            basic.language_id,
            basic.token_type,
            None,
            font_style,
            foreground,
            background,
        )
    }

    fn attributes_of(&self, parent: TokenAttributes, scopes: &ScopeStack) -> TokenAttributes {
        let basic = self
            .basic_attributes
            .basic_scope_attributes(Some(scopes.scope_name()));
        Self::merge(parent, basic, self.theme.match_style(scopes))
    }
}

/// A scope stack with the attribute word of its leaf scope
#[derive(Clone, PartialEq)]
pub(crate) struct AttributedScopeStack {
    pub scopes: ScopeStack,
    pub attributes: TokenAttributes,
}

impl AttributedScopeStack {
    /// The stack of the root scope of a grammar, inheriting from the theme defaults
    pub(crate) fn root(scope_name: &str, resolver: &AttributeResolver) -> Self {
        let scopes = ScopeStack::new(scope_name);
        let attributes = resolver.attributes_of(resolver.default_attributes(), &scopes);
        Self { scopes, attributes }
    }

    /// Pushes every space separated scope of `path`, `None` being a no-op
    pub(crate) fn push_attributed(&self, path: Option<&str>, resolver: &AttributeResolver) -> Self {
        let Some(path) = path else {
            return self.clone();
        };

        let mut out = self.clone();
        for scope in path.split(' ').filter(|s| !s.is_empty()) {
            let scopes = out.scopes.push(scope);
            let attributes = resolver.attributes_of(out.attributes, &scopes);
            out = Self { scopes, attributes };
        }
        out
    }

    /// Same as [`AttributedScopeStack::push_attributed`] for already split scopes
    pub(crate) fn push_all<S: AsRef<str>>(
        &self,
        scopes: &[S],
        resolver: &AttributeResolver,
    ) -> Self {
        let mut out = self.clone();
        for scope in scopes {
            out = out.push_attributed(Some(scope.as_ref()), resolver);
        }
        out
    }

    pub(crate) fn scope_names(&self) -> Vec<&str> {
        self.scopes.segments()
    }
}

impl fmt::Debug for AttributedScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.scopes, self.attributes)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::document::DocumentFormat;
    use crate::themes::{FontStyle, RawTheme};

    fn resolver() -> AttributeResolver {
        let theme = RawTheme::load_from_str(
            r##"{
                "name": "test",
                "colors": {"editor.foreground": "#111111", "editor.background": "#222222"},
                "tokenColors": [
                    {"scope": "comment", "settings": {"foreground": "#00FF00", "fontStyle": "italic"}},
                    {"scope": "comment.line", "settings": {"foreground": "#0000FF"}}
                ]
            }"##,
            DocumentFormat::Json,
        )
        .unwrap()
        .compile()
        .unwrap();
        let mut embedded = HashMap::new();
        embedded.insert("source.css".to_string(), 2);
        AttributeResolver::new(
            Arc::new(theme),
            Arc::new(BasicScopeAttributesProvider::new(1, &embedded)),
        )
    }

    #[test]
    fn root_uses_theme_defaults() {
        let resolver = resolver();
        let root = AttributedScopeStack::root("source.js", &resolver);
        let colors = resolver.theme().color_map();
        assert_eq!(root.attributes.language_id(), 1);
        assert_eq!(root.attributes.token_type(), StandardTokenType::Other);
        assert_eq!(colors.color(root.attributes.foreground()), Some("#111111"));
        assert_eq!(colors.color(root.attributes.background()), Some("#222222"));
    }

    #[test]
    fn pushed_scopes_inherit_unset_fields() {
        let resolver = resolver();
        let root = AttributedScopeStack::root("source.js", &resolver);
        let comment = root.push_attributed(Some("comment.line.double-slash"), &resolver);
        let colors = resolver.theme().color_map();
        assert_eq!(comment.attributes.token_type(), StandardTokenType::Comment);
        assert_eq!(colors.color(comment.attributes.foreground()), Some("#0000FF"));
        assert_eq!(comment.attributes.font_style(), FontStyle::ITALIC);
        // background comes from the root
        assert_eq!(comment.attributes.background(), root.attributes.background());

        let css = comment.push_attributed(Some("meta.embedded source.css"), &resolver);
        assert_eq!(
            css.scope_names(),
            vec![
                "source.js",
                "comment.line.double-slash",
                "meta.embedded",
                "source.css"
            ]
        );
        assert_eq!(css.attributes.language_id(), 2);
        assert_eq!(css.attributes.token_type(), StandardTokenType::Other);

        assert_eq!(root.push_attributed(None, &resolver), root);
        assert_eq!(root.push_all(&["comment.line"], &resolver).scope_names().len(), 2);
    }
}
