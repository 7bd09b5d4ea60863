mod attributes;
mod basic_attributes;
mod error;
mod matcher;
mod scope;

pub mod document;
pub mod grammars;
pub mod themes;

mod merge;
mod registry;
mod tokenizer;

pub use attributes::{MAX_BACKGROUND_ID, MAX_FOREGROUND_ID, StandardTokenType, TokenAttributes};
pub use basic_attributes::{BasicScopeAttributes, BasicScopeAttributesProvider};
pub use error::{Error, SourceLocation};
pub use matcher::{CompiledMatcher, InjectionPrecedence, SelectorMatcher, parse_selector_matchers};
pub use merge::{
    MergingOptions, MultiThemeLine, MultiThemeLines, ThemedStyle, ThemedToken,
    merge_same_style_tokens,
};
pub use registry::{
    GrammarProvider, LanguageConfiguration, MemoryProvider, PLAIN_LANGUAGE, PLAIN_SCOPE_NAME,
    Registry, ThemeColors, ThemeProvider,
};
pub use scope::{ScopeStack, is_scope_prefix};
pub use tokenizer::{
    BalancedBracketSelectors, FrameState, GrammarState, Token, TokenTypeOverride, TokenizeLines,
    TokenizeOptions, TokenizedLine, Tokenizer,
};
