use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::attributes::{MAX_BACKGROUND_ID, MAX_FOREGROUND_ID};
use crate::error::OcraResult;
use crate::scope::{ScopeStack, is_scope_prefix};
use crate::themes::Color;
use crate::themes::color::is_valid_color;
use crate::themes::color_map::ColorMap;
use crate::themes::font_style::FontStyle;
use crate::themes::raw::{RawTheme, TokenColorSettings};
use crate::themes::selector::{ThemeSelector, parse_selector};

/// The resolved style of a rule: every field is optional so less specific rules can fill the
/// holes left by more specific ones.
///
/// Colors are ids in the theme color map.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct StyleAttributes {
    pub font_style: Option<FontStyle>,
    pub foreground: Option<u32>,
    pub background: Option<u32>,
    pub font_family: Option<String>,
    pub font_size: Option<f64>,
    pub line_height: Option<f64>,
}

impl StyleAttributes {
    fn from_settings(settings: &TokenColorSettings, color_map: &mut ColorMap) -> OcraResult<Self> {
        let mut color = |value: Option<&str>, max: u32| -> OcraResult<Option<u32>> {
            match value {
                Some(c) if is_valid_color(c) => Ok(Some(color_map.id_at_most(c, max)?)),
                _ => Ok(None),
            }
        };

        Ok(Self {
            foreground: color(settings.foreground(), MAX_FOREGROUND_ID)?,
            background: color(settings.background(), MAX_BACKGROUND_ID)?,
            font_style: settings.font_style.as_deref().map(FontStyle::from_str),
            font_family: settings.font_family.clone().filter(|f| !f.is_empty()),
            font_size: settings.font_size,
            line_height: settings.line_height,
        })
    }

    /// Sets the fields that are unset in `self` from `other`
    fn fill_from(&mut self, other: &StyleAttributes) {
        if self.font_style.is_none() {
            self.font_style = other.font_style;
        }
        if self.foreground.is_none() {
            self.foreground = other.foreground;
        }
        if self.background.is_none() {
            self.background = other.background;
        }
        if self.font_family.is_none() {
            self.font_family.clone_from(&other.font_family);
        }
        if self.font_size.is_none() {
            self.font_size = other.font_size;
        }
        if self.line_height.is_none() {
            self.line_height = other.line_height;
        }
    }

    fn is_complete(&self) -> bool {
        self.font_style.is_some()
            && self.foreground.is_some()
            && self.background.is_some()
            && self.font_family.is_some()
            && self.font_size.is_some()
            && self.line_height.is_some()
    }
}

/// Theme type for determining fallback colors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ThemeType {
    Light,
    #[default]
    Dark,
}

impl ThemeType {
    // (fg, bg)
    pub fn default_colors(&self) -> (&'static str, &'static str) {
        match self {
            ThemeType::Light => (Color::LIGHT_FG_FALLBACK, Color::LIGHT_BG_FALLBACK),
            ThemeType::Dark => (Color::DARK_FG_FALLBACK, Color::DARK_BG_FALLBACK),
        }
    }

    pub fn from_str(s: &str) -> ThemeType {
        if s.eq_ignore_ascii_case("light") {
            ThemeType::Light
        } else {
            ThemeType::Dark
        }
    }
}

/// The theme defaults, every color is always set
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct DefaultStyle {
    pub font_style: FontStyle,
    pub foreground: u32,
    pub background: u32,
    pub font_family: Option<String>,
    pub font_size: Option<f64>,
    pub line_height: Option<f64>,
}

/// One selector of a theme rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeRule {
    pub selector: ThemeSelector,
    /// Registration order, the first registered rule wins ties
    pub index: usize,
    pub style: StyleAttributes,
}

/// Compiled theme optimized for fast lookups
pub struct CompiledTheme {
    pub name: String,
    /// Theme type ("light" or "dark")
    pub theme_type: ThemeType,
    defaults: DefaultStyle,
    color_map: ColorMap,
    /// Theme rules sorted by specificity (most specific first)
    rules: Vec<ThemeRule>,
    /// Leaf scope -> rules whose target matches it, most specific first
    candidates: papaya::HashMap<String, Arc<Vec<usize>>>,
}

impl fmt::Debug for CompiledTheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTheme")
            .field("name", &self.name)
            .field("theme_type", &self.theme_type)
            .field("defaults", &self.defaults)
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl CompiledTheme {
    /// Compiles the theme, registering its colors in `color_map`.
    ///
    /// Fails if the color map is frozen and a color of the theme is not in it.
    pub fn from_raw_theme(raw_theme: RawTheme, mut color_map: ColorMap) -> OcraResult<Self> {
        let theme_type = raw_theme
            .type_
            .as_deref()
            .map(ThemeType::from_str)
            .unwrap_or_default();

        // Rules without scopes set the defaults, later ones override earlier ones field by field
        let mut scopeless = StyleAttributes::default();
        let mut scopeless_fg = None;
        let mut scopeless_bg = None;
        for rule in raw_theme.rules() {
            let Some(settings) = &rule.settings else {
                continue;
            };
            if !is_scopeless(&rule.scope) {
                continue;
            }
            if let Some(fg) = settings.foreground().filter(|c| is_valid_color(c)) {
                scopeless_fg = Some(fg);
            }
            if let Some(bg) = settings.background().filter(|c| is_valid_color(c)) {
                scopeless_bg = Some(bg);
            }
            let incoming = StyleAttributes {
                font_style: settings.font_style.as_deref().map(FontStyle::from_str),
                font_family: settings.font_family.clone().filter(|f| !f.is_empty()),
                font_size: settings.font_size,
                line_height: settings.line_height,
                ..Default::default()
            };
            let mut merged = incoming;
            merged.fill_from(&scopeless);
            scopeless = merged;
        }

        let (fallback_fg, fallback_bg) = theme_type.default_colors();
        let default_fg = pick(
            scopeless_fg,
            raw_theme.colors.foreground.as_deref(),
            fallback_fg,
        );
        let default_bg = pick(
            scopeless_bg,
            raw_theme.colors.background.as_deref(),
            fallback_bg,
        );

        let defaults = DefaultStyle {
            foreground: color_map.id_at_most(&default_fg, MAX_FOREGROUND_ID)?,
            background: color_map.id_at_most(&default_bg, MAX_BACKGROUND_ID)?,
            font_style: scopeless.font_style.unwrap_or_default(),
            font_family: scopeless.font_family,
            font_size: scopeless.font_size,
            line_height: scopeless.line_height,
        };

        let mut rules = Vec::new();
        for rule in raw_theme.rules() {
            let Some(settings) = &rule.settings else {
                continue;
            };
            if is_scopeless(&rule.scope) {
                continue;
            }
            let style = StyleAttributes::from_settings(settings, &mut color_map)?;

            for scope in &rule.scope {
                for selector in parse_selector(scope) {
                    rules.push(ThemeRule {
                        selector,
                        index: rules.len(),
                        style: style.clone(),
                    });
                }
            }
        }

        rules.sort_by(|a, b| {
            a.selector
                .cmp_specificity(&b.selector)
                .then(a.index.cmp(&b.index))
        });

        #[cfg(feature = "debug")]
        log::debug!(
            "Compiled theme {} with {} rules and {} colors",
            raw_theme.name,
            rules.len(),
            color_map.len()
        );

        Ok(CompiledTheme {
            name: raw_theme.name,
            theme_type,
            defaults,
            color_map,
            rules,
            candidates: papaya::HashMap::new(),
        })
    }

    /// The global defaults of the theme
    pub fn defaults(&self) -> &DefaultStyle {
        &self.defaults
    }

    pub fn color_map(&self) -> &ColorMap {
        &self.color_map
    }

    /// All colors indexed by their id, index 0 is an empty string
    pub fn colors(&self) -> &[String] {
        self.color_map.colors()
    }

    /// The default foreground color
    pub fn foreground(&self) -> &str {
        self.color_map
            .color(self.defaults.foreground)
            .unwrap_or_default()
    }

    /// The default background color
    pub fn background(&self) -> &str {
        self.color_map
            .color(self.defaults.background)
            .unwrap_or_default()
    }

    pub fn rules(&self) -> &[ThemeRule] {
        &self.rules
    }

    fn candidates_for(&self, leaf: &str) -> Arc<Vec<usize>> {
        let pinned = self.candidates.pin();
        if let Some(c) = pinned.get(leaf) {
            return c.clone();
        }

        let candidates: Arc<Vec<usize>> = Arc::new(
            self.rules
                .iter()
                .enumerate()
                .filter(|(_, r)| is_scope_prefix(&r.selector.target_scope, leaf))
                .map(|(i, _)| i)
                .collect(),
        );
        pinned.insert(leaf.to_string(), candidates.clone());
        candidates
    }

    /// Finds the style of the most specific rules matching that scope stack.
    ///
    /// Fields left unset by the winning rule are taken from the next matching rules.
    /// Returns `None` if no rule matches.
    pub fn match_style(&self, scope_stack: &ScopeStack) -> Option<StyleAttributes> {
        let segments = scope_stack.segments();
        self.match_segments(&segments)
    }

    /// Same as [`CompiledTheme::match_style`] with segments ordered from root to leaf
    pub fn match_segments(&self, segments: &[&str]) -> Option<StyleAttributes> {
        let leaf = segments.last()?;
        let candidates = self.candidates_for(leaf);

        let mut out: Option<StyleAttributes> = None;
        for idx in candidates.iter() {
            let rule = &self.rules[*idx];
            if !rule.selector.matches(segments) {
                continue;
            }
            match out.as_mut() {
                None => out = Some(rule.style.clone()),
                Some(style) => style.fill_from(&rule.style),
            }
            if out.as_ref().is_some_and(|s| s.is_complete()) {
                break;
            }
        }

        out
    }
}

fn pick<'a>(
    from_rules: Option<&'a str>,
    from_colors: Option<&'a str>,
    fallback: &'a str,
) -> String {
    from_rules
        .or(from_colors.filter(|c| is_valid_color(c)))
        .unwrap_or(fallback)
        .to_string()
}

fn is_scopeless(scopes: &[String]) -> bool {
    scopes.iter().all(|s| s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentFormat;
    use crate::error::Error;

    fn load(content: &str) -> CompiledTheme {
        RawTheme::load_from_str(content, DocumentFormat::Json)
            .unwrap()
            .compile()
            .unwrap()
    }

    fn stack(scopes: &str) -> ScopeStack {
        ScopeStack::from_segments(scopes.split(' ')).unwrap()
    }

    #[test]
    fn can_resolve_import_keyword() {
        let theme = load(
            r##"{
                "name": "t",
                "colors": {"editor.foreground": "#FFFFFF", "editor.background": "#000000"},
                "tokenColors": [
                    {"scope": "keyword", "settings": {"foreground": "#FF0000"}},
                    {"scope": "keyword.control.import", "settings": {"foreground": "#A492EA", "fontStyle": "italic"}}
                ]
            }"##,
        );
        let style = theme
            .match_style(&stack("source.js keyword.control.import.js"))
            .unwrap();
        assert_eq!(
            theme.color_map().color(style.foreground.unwrap()),
            Some("#A492EA")
        );
        assert_eq!(style.font_style, Some(FontStyle::ITALIC));

        let style = theme.match_style(&stack("source.js keyword.other")).unwrap();
        assert_eq!(
            theme.color_map().color(style.foreground.unwrap()),
            Some("#FF0000")
        );
        assert_eq!(style.font_style, None);
        assert!(theme.match_style(&stack("source.js string")).is_none());
    }

    #[test]
    fn resolves_defaults() {
        // scopeless rule wins over colors
        let theme = load(
            r##"{
                "colors": {"editor.foreground": "#FFFFFF", "editor.background": "#000000"},
                "tokenColors": [{"settings": {"foreground": "#111111", "fontStyle": "bold"}}]
            }"##,
        );
        assert_eq!(theme.foreground(), "#111111");
        assert_eq!(theme.background(), "#000000");
        assert_eq!(theme.defaults().font_style, FontStyle::BOLD);
        assert_eq!(theme.colors(), &["", "#111111", "#000000"]);

        let theme = load(r#"{"type": "light"}"#);
        assert_eq!(theme.theme_type, ThemeType::Light);
        assert_eq!(theme.foreground(), "#333333");
        assert_eq!(theme.background(), "#FFFFFE");

        let theme = load(r#"{"colors": {"editor.foreground": "not a color"}}"#);
        assert_eq!(theme.foreground(), "#BBBBBB");
        assert_eq!(theme.background(), "#1E1E1E");
    }

    #[test]
    fn fills_unset_fields_from_less_specific_rules() {
        let theme = load(
            r##"{
                "tokenColors": [
                    {"scope": "string", "settings": {"foreground": "#00FF00", "fontStyle": "underline", "background": "#010101"}},
                    {"scope": "string.quoted", "settings": {"foreground": "#0000FF"}},
                    {"scope": "source string.quoted", "settings": {"fontStyle": ""}}
                ]
            }"##,
        );
        let style = theme
            .match_style(&stack("source.js string.quoted.double"))
            .unwrap();
        assert_eq!(
            theme.color_map().color(style.foreground.unwrap()),
            Some("#0000FF")
        );
        assert_eq!(
            theme.color_map().color(style.background.unwrap()),
            Some("#010101")
        );
        // explicitly empty font style is not overridden
        assert_eq!(style.font_style, Some(FontStyle::empty()));
    }

    #[test]
    fn direct_child_only_matches_immediate_parent() {
        let theme = load(
            r##"{
                "tokenColors": [
                    {"scope": "grand > child", "settings": {"foreground": "#123456"}}
                ]
            }"##,
        );
        assert!(theme.match_style(&stack("grand child")).is_some());
        assert!(theme.match_style(&stack("grand parent child")).is_none());
    }

    #[test]
    fn first_registered_rule_wins_ties() {
        let theme = load(
            r##"{
                "tokenColors": [
                    {"scope": "comment", "settings": {"foreground": "#AAAAAA"}},
                    {"scope": "comment", "settings": {"foreground": "#BBBBBB", "fontStyle": "bold"}}
                ]
            }"##,
        );
        let style = theme.match_style(&stack("source comment")).unwrap();
        assert_eq!(
            theme.color_map().color(style.foreground.unwrap()),
            Some("#AAAAAA")
        );
        assert_eq!(style.font_style, Some(FontStyle::BOLD));
    }

    #[test]
    fn ignores_invalid_colors() {
        let theme = load(
            r##"{
                "tokenColors": [
                    {"scope": "comment", "settings": {"foreground": "red", "background": "var(--ocra-bg, #000)"}}
                ]
            }"##,
        );
        let style = theme.match_style(&stack("comment")).unwrap();
        assert_eq!(style.foreground, None);
        assert_eq!(
            theme.color_map().color(style.background.unwrap()),
            Some("var(--ocra-bg, #000)")
        );
    }

    #[test]
    fn frozen_color_map_rejects_unknown_colors() {
        let raw = RawTheme::load_from_str(
            r##"{
                "colors": {"editor.foreground": "#FFFFFF", "editor.background": "#000000"},
                "tokenColors": [{"scope": "comment", "settings": {"foreground": "#ABCDEF"}}]
            }"##,
            DocumentFormat::Json,
        )
        .unwrap();

        let err = CompiledTheme::from_raw_theme(
            raw.clone(),
            ColorMap::frozen(&["#FFFFFF", "#000000"]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingColor(c) if c == "#ABCDEF"));

        let theme = CompiledTheme::from_raw_theme(
            raw,
            ColorMap::frozen(&["#abcdef", "#FFFFFF", "#000000"]),
        )
        .unwrap();
        let style = theme.match_style(&stack("comment.line")).unwrap();
        assert_eq!(style.foreground, Some(1));
        assert_eq!(theme.defaults().foreground, 2);
    }

    fn theme_with_backgrounds(count: usize) -> RawTheme {
        let rules: Vec<String> = (0..count)
            .map(|i| {
                format!(r##"{{"scope": "s{i}", "settings": {{"background": "#10{i:04X}"}}}}"##)
            })
            .collect();
        let json = format!(
            r##"{{
                "colors": {{"editor.foreground": "#FFFFFF", "editor.background": "#000000"}},
                "tokenColors": [{}]
            }}"##,
            rules.join(",")
        );
        RawTheme::load_from_str(&json, DocumentFormat::Json).unwrap()
    }

    #[test]
    fn color_ids_must_fit_in_token_attributes() {
        // ids 1 and 2 are the defaults
        let theme =
            CompiledTheme::from_raw_theme(theme_with_backgrounds(253), ColorMap::new()).unwrap();
        let style = theme.match_style(&stack("s252")).unwrap();
        assert_eq!(style.background, Some(MAX_BACKGROUND_ID));
        assert_eq!(theme.color_map().color(MAX_BACKGROUND_ID), Some("#1000FC"));

        let err = CompiledTheme::from_raw_theme(theme_with_backgrounds(300), ColorMap::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ColorIdOverflow { color, id: 256, max: MAX_BACKGROUND_ID } if color == "#1000FD"
        ));
    }
}
