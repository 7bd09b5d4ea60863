use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::attributes::TokenAttributes;
use crate::error::OcraResult;
use crate::themes::{DefaultStyle, FontStyle};
use crate::tokenizer::{GrammarState, TokenizeLines, TokenizeOptions, TokenizedLine, Tokenizer};

/// Options for token merging behavior
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergingOptions {
    /// Whitespace tokens without decorations are merged with the next token
    pub merge_whitespaces: bool,
    /// Adjacent tokens with the same styles in every theme are merged
    pub merge_same_style_tokens: bool,
}

impl MergingOptions {
    pub fn merge_whitespaces(mut self, value: bool) -> Self {
        self.merge_whitespaces = value;
        self
    }

    pub fn merge_same_style_tokens(mut self, value: bool) -> Self {
        self.merge_same_style_tokens = value;
        self
    }
}

/// The style of a token in one theme.
///
/// Colors are ids in the color map of that theme and are only set when they differ from
/// the theme defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThemedStyle {
    pub foreground: Option<u32>,
    pub background: Option<u32>,
    pub font_style: FontStyle,
}

impl ThemedStyle {
    fn new(attributes: TokenAttributes, defaults: &DefaultStyle) -> Self {
        let delta = |id: u32, default: u32| (id != 0 && id != default).then_some(id);
        Self {
            foreground: delta(attributes.foreground(), defaults.foreground),
            background: delta(attributes.background(), defaults.background),
            font_style: attributes.font_style(),
        }
    }

    /// Whether whitespace with that style is visible
    pub fn has_decorations(&self) -> bool {
        self.background.is_some()
            || self.font_style.contains(FontStyle::UNDERLINE)
            || self.font_style.contains(FontStyle::STRIKETHROUGH)
    }
}

/// A piece of a line with its style in every theme, in the order the themes were given
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemedToken {
    pub span: Range<usize>,
    pub styles: Vec<ThemedStyle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MultiThemeLine<'a> {
    pub text: &'a str,
    pub tokens: Vec<ThemedToken>,
    /// A budget ran out for at least one theme
    pub stopped_early: bool,
}

/// Tokenizes the same text with one tokenizer per theme and merges the results line by line.
///
/// Every line is cut wherever a token of any theme starts.
pub struct MultiThemeLines<'a> {
    streams: Vec<TokenizeLines<'a>>,
    defaults: Vec<DefaultStyle>,
    options: MergingOptions,
    failed: bool,
}

impl<'a> MultiThemeLines<'a> {
    /// The tokenizers only differ by their theme: a single grammar state works for all of them.
    pub fn new(
        text: &'a str,
        tokenizers: &[Tokenizer],
        options: &TokenizeOptions,
        merging: MergingOptions,
    ) -> OcraResult<Self> {
        let mut streams = Vec::with_capacity(tokenizers.len());
        let mut defaults = Vec::with_capacity(tokenizers.len());
        for tokenizer in tokenizers {
            streams.push(tokenizer.tokenize(text, options)?);
            defaults.push(tokenizer.theme().defaults().clone());
        }

        Ok(Self {
            streams,
            defaults,
            options: merging,
            failed: false,
        })
    }

    /// Number of themes
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// The grammar state after the last line every theme tokenized fully
    pub fn grammar_state(&self) -> Option<GrammarState> {
        self.streams.first().map(|s| s.grammar_state())
    }

    fn merge(&self, lines: Vec<TokenizedLine<'a>>) -> MultiThemeLine<'a> {
        let text = lines.first().map_or("", |l| l.text);
        debug_assert!(lines.iter().all(|l| l.text == text));
        let stopped_early = lines.iter().any(|l| l.stopped_early);

        let mut cuts: Vec<usize> = lines
            .iter()
            .flat_map(|l| l.tokens.iter().step_by(2).map(|start| *start as usize))
            .collect();
        cuts.sort_unstable();
        cuts.dedup();

        // index of the current token in each theme
        let mut cursors = vec![0usize; lines.len()];
        let mut tokens = Vec::with_capacity(cuts.len());

        for (i, start) in cuts.iter().enumerate() {
            let end = cuts.get(i + 1).copied().unwrap_or(text.len());
            let mut styles = Vec::with_capacity(lines.len());
            for (theme, line) in lines.iter().enumerate() {
                let words = &line.tokens;
                while let Some(next) = words.get(cursors[theme] * 2 + 2)
                    && *next as usize <= *start
                {
                    cursors[theme] += 1;
                }
                let word = words.get(cursors[theme] * 2 + 1).copied().unwrap_or(0);
                let attributes = TokenAttributes(word);
                styles.push(ThemedStyle::new(attributes, &self.defaults[theme]));
            }
            tokens.push(ThemedToken {
                span: *start..end,
                styles,
            });
        }

        if self.options.merge_whitespaces {
            tokens = merge_whitespaces(text, tokens);
        }
        if self.options.merge_same_style_tokens {
            tokens = merge_same_style_tokens(tokens);
        }

        MultiThemeLine {
            text,
            tokens,
            stopped_early,
        }
    }
}

impl<'a> Iterator for MultiThemeLines<'a> {
    type Item = OcraResult<MultiThemeLine<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.streams.is_empty() {
            return None;
        }

        let mut lines = Vec::with_capacity(self.streams.len());
        for stream in &mut self.streams {
            match stream.next()? {
                Ok(line) => lines.push(line),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }

        Some(Ok(self.merge(lines)))
    }
}

/// Prepends the whitespace tokens to the next token when no theme would show it
fn merge_whitespaces(text: &str, tokens: Vec<ThemedToken>) -> Vec<ThemedToken> {
    let num_tokens = tokens.len();
    let mut merged: Vec<ThemedToken> = Vec::with_capacity(num_tokens);
    let mut carry_on_range: Option<Range<usize>> = None;

    for (idx, token) in tokens.into_iter().enumerate() {
        let could_merge = !token.styles.iter().any(|s| s.has_decorations());
        let is_whitespace_with_next = could_merge
            && text[token.span.clone()].chars().all(|c| c.is_whitespace())
            && idx + 1 < num_tokens;

        if is_whitespace_with_next {
            carry_on_range = Some(match carry_on_range {
                Some(range) => range.start..token.span.end,
                None => token.span.clone(),
            });
            continue;
        }

        match carry_on_range.take() {
            Some(carried) if could_merge => merged.push(ThemedToken {
                span: carried.start..token.span.end,
                styles: token.styles,
            }),
            Some(carried) => {
                merged.push(ThemedToken {
                    span: carried,
                    styles: vec![ThemedStyle::default(); token.styles.len()],
                });
                merged.push(token);
            }
            None => merged.push(token),
        }
    }

    merged
}

/// Joins adjacent tokens whose styles are equal in every theme
pub fn merge_same_style_tokens(tokens: Vec<ThemedToken>) -> Vec<ThemedToken> {
    let mut merged: Vec<ThemedToken> = Vec::with_capacity(tokens.len());

    for token in tokens {
        if let Some(prev) = merged.last_mut()
            && prev.styles == token.styles
        {
            prev.span.end = token.span.end;
        } else {
            merged.push(token);
        }
    }

    merged
}
