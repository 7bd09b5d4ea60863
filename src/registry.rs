use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::future::{Future, ready};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::attributes::StandardTokenType;
use crate::basic_attributes::BasicScopeAttributesProvider;
use crate::error::{Error, OcraResult};
use crate::grammars::{CompiledGrammar, GrammarSet, RawGrammar};
use crate::merge::{MergingOptions, MultiThemeLines};
use crate::themes::{ColorMap, CompiledTheme, RawTheme};
use crate::tokenizer::{
    BalancedBracketSelectors, TokenTypeOverride, TokenizeLines, TokenizeOptions, Tokenizer,
};

/// The language used when falling back to plain text, where nothing is highlighted
pub const PLAIN_LANGUAGE: &str = "plain";
/// The scope name of the plain text grammar
pub const PLAIN_SCOPE_NAME: &str = "text.plain";

/// Where the registry gets raw grammars from.
///
/// Loading is the only place where the registry awaits.
pub trait GrammarProvider: Send + Sync {
    /// Returns the raw grammar for that scope name, or [`Error::GrammarNotFound`]
    fn load_grammar(&self, scope_name: &str) -> impl Future<Output = OcraResult<RawGrammar>> + Send;

    /// Scope names of the injector grammars to inject into that grammar
    fn injections(&self, _scope_name: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Where the registry gets raw themes from
pub trait ThemeProvider: Send + Sync {
    /// Returns the raw theme with that name, or [`Error::ThemeNotFound`]
    fn load_theme(&self, name: &str) -> impl Future<Output = OcraResult<RawTheme>> + Send;
}

/// A provider serving grammars and themes that were added to it up front.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    grammars: HashMap<String, RawGrammar>,
    themes: HashMap<String, RawTheme>,
    /// target scope -> injector scopes
    injections: HashMap<String, Vec<String>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a grammar under its scope name, replacing any grammar with the same scope name
    pub fn add_grammar(&mut self, grammar: RawGrammar) {
        self.grammars.insert(grammar.scope_name.clone(), grammar);
    }

    /// Reads the file and adds it as a grammar.
    pub fn add_grammar_from_path(&mut self, path: impl AsRef<Path>) -> OcraResult<()> {
        self.add_grammar(RawGrammar::load_from_file(path)?);
        Ok(())
    }

    /// Adds a theme under its name
    pub fn add_theme(&mut self, theme: RawTheme) {
        self.themes.insert(theme.name.clone(), theme);
    }

    /// Reads the file and adds it as a theme.
    pub fn add_theme_from_path(&mut self, path: impl AsRef<Path>) -> OcraResult<()> {
        self.add_theme(RawTheme::load_from_file(path)?);
        Ok(())
    }

    /// Injects the grammar `injector` into `target`
    pub fn add_injection(&mut self, target: &str, injector: &str) {
        let injectors = self.injections.entry(target.to_string()).or_default();
        if !injectors.iter().any(|i| i == injector) {
            injectors.push(injector.to_string());
        }
    }
}

impl GrammarProvider for MemoryProvider {
    fn load_grammar(
        &self,
        scope_name: &str,
    ) -> impl Future<Output = OcraResult<RawGrammar>> + Send {
        ready(
            self.grammars
                .get(scope_name)
                .cloned()
                .ok_or_else(|| Error::GrammarNotFound(scope_name.to_string())),
        )
    }

    /// The injectors added with [`MemoryProvider::add_injection`] followed by the grammars
    /// declaring `injectTo` with that scope, sorted by scope name.
    fn injections(&self, scope_name: &str) -> Vec<String> {
        let mut out = self.injections.get(scope_name).cloned().unwrap_or_default();
        let mut declared: Vec<&String> = self
            .grammars
            .values()
            .filter(|g| g.inject_to.iter().any(|t| t == scope_name))
            .map(|g| &g.scope_name)
            .collect();
        declared.sort();
        for scope in declared {
            if !out.contains(scope) {
                out.push(scope.clone());
            }
        }
        out
    }
}

impl ThemeProvider for MemoryProvider {
    fn load_theme(&self, name: &str) -> impl Future<Output = OcraResult<RawTheme>> + Send {
        ready(
            self.themes
                .get(name)
                .cloned()
                .ok_or_else(|| Error::ThemeNotFound(name.to_string())),
        )
    }
}

/// How a language is tokenized: its grammar and the attributes of its tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfiguration {
    pub(crate) name: String,
    pub(crate) scope_name: String,
    pub(crate) language_id: u8,
    pub(crate) aliases: Vec<String>,
    /// Scope prefix -> language id of the languages embedded in this one
    pub(crate) embedded_languages: HashMap<String, u8>,
    /// Selector -> token type forced on the tokens it matches
    pub(crate) token_types: BTreeMap<String, StandardTokenType>,
    pub(crate) balanced_bracket_selectors: Vec<String>,
    pub(crate) unbalanced_bracket_selectors: Vec<String>,
}

impl LanguageConfiguration {
    pub fn new(name: impl Into<String>, scope_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope_name: scope_name.into(),
            ..Default::default()
        }
    }

    pub fn language_id(mut self, value: u8) -> Self {
        self.language_id = value;
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn embedded_language(mut self, scope_prefix: impl Into<String>, language_id: u8) -> Self {
        self.embedded_languages.insert(scope_prefix.into(), language_id);
        self
    }

    pub fn token_type(
        mut self,
        selector: impl Into<String>,
        token_type: StandardTokenType,
    ) -> Self {
        self.token_types.insert(selector.into(), token_type);
        self
    }

    /// `*` marks every token as able to hold balanced brackets
    pub fn balanced_bracket_selector(mut self, selector: impl Into<String>) -> Self {
        self.balanced_bracket_selectors.push(selector.into());
        self
    }

    pub fn unbalanced_bracket_selector(mut self, selector: impl Into<String>) -> Self {
        self.unbalanced_bracket_selectors.push(selector.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    fn token_type_overrides(&self) -> Vec<TokenTypeOverride> {
        self.token_types
            .iter()
            .map(|(selector, token_type)| TokenTypeOverride::new(selector, *token_type))
            .collect()
    }

    fn bracket_selectors(&self) -> Option<BalancedBracketSelectors> {
        if self.balanced_bracket_selectors.is_empty()
            && self.unbalanced_bracket_selectors.is_empty()
        {
            return None;
        }
        Some(BalancedBracketSelectors::new(
            &self.balanced_bracket_selectors,
            &self.unbalanced_bracket_selectors,
        ))
    }
}

/// The colors of a theme, indexed by the ids found in token attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThemeColors {
    /// Index 0 is an empty placeholder
    pub colors: Vec<String>,
    pub foreground: String,
    pub background: String,
}

/// Loads, compiles and caches grammars and themes, and hands out tokenizers for them.
///
/// Every method takes `&self`: a registry can be shared between tasks and the compiled
/// grammars and themes are shared by every tokenizer using them.
pub struct Registry<G, T> {
    grammar_provider: G,
    theme_provider: T,
    /// When set, every theme uses a color map frozen to that palette
    color_palette: Option<Vec<String>>,
    fallback_to_plain: bool,
    // scope name -> grammar
    grammars: papaya::HashMap<String, Arc<CompiledGrammar>>,
    // base scope name -> the base grammar with everything it can include or get injected
    grammar_sets: papaya::HashMap<String, Arc<GrammarSet>>,
    // theme name -> theme
    themes: papaya::HashMap<String, Arc<CompiledTheme>>,
    // language name or alias -> configuration
    languages: papaya::HashMap<String, Arc<LanguageConfiguration>>,
    // language name -> scope attributes of that language
    basic_attributes: papaya::HashMap<String, Arc<BasicScopeAttributesProvider>>,
}

impl<G, T> std::fmt::Debug for Registry<G, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("grammars", &self.grammars.len())
            .field("themes", &self.themes.len())
            .field("languages", &self.languages.len())
            .field("fallback_to_plain", &self.fallback_to_plain)
            .finish_non_exhaustive()
    }
}

impl<G: GrammarProvider, T: ThemeProvider> Registry<G, T> {
    pub fn new(grammar_provider: G, theme_provider: T) -> Self {
        Self {
            grammar_provider,
            theme_provider,
            color_palette: None,
            fallback_to_plain: false,
            grammars: papaya::HashMap::new(),
            grammar_sets: papaya::HashMap::new(),
            themes: papaya::HashMap::new(),
            languages: papaya::HashMap::new(),
            basic_attributes: papaya::HashMap::new(),
        }
    }

    /// Every theme will use that palette: `palette[i]` gets the color id `i + 1` in all of
    /// them and themes using another color fail to load.
    pub fn with_color_palette<S: AsRef<str>>(mut self, palette: &[S]) -> Self {
        self.color_palette = Some(palette.iter().map(|c| c.as_ref().to_string()).collect());
        self
    }

    /// Whether to tokenize unknown languages as plain text instead of failing
    pub fn fallback_to_plain(mut self, value: bool) -> Self {
        self.fallback_to_plain = value;
        self
    }

    /// Registers a language under its name and aliases, replacing previous registrations
    pub fn register_language(&self, config: LanguageConfiguration) {
        let config = Arc::new(config);
        let languages = self.languages.pin();
        for name in std::iter::once(&config.name).chain(config.aliases.iter()) {
            languages.insert(name.clone(), config.clone());
        }
        self.basic_attributes.pin().remove(&config.name);
    }

    /// Checks whether the given name or alias is a registered language
    pub fn contains_language(&self, name: &str) -> bool {
        self.languages.pin().contains_key(name)
    }

    fn language(&self, name: &str) -> OcraResult<Arc<LanguageConfiguration>> {
        if let Some(config) = self.languages.pin().get(name) {
            return Ok(config.clone());
        }
        if self.fallback_to_plain || name == PLAIN_LANGUAGE {
            return Ok(Arc::new(LanguageConfiguration::new(
                PLAIN_LANGUAGE,
                PLAIN_SCOPE_NAME,
            )));
        }
        Err(Error::LanguageNotFound(name.to_string()))
    }

    /// Loads and compiles the grammar for that scope, once.
    pub async fn grammar(&self, scope_name: &str) -> OcraResult<Arc<CompiledGrammar>> {
        let cached = self.grammars.pin().get(scope_name).cloned();
        if let Some(grammar) = cached {
            return Ok(grammar);
        }

        let raw = if scope_name == PLAIN_SCOPE_NAME {
            RawGrammar {
                name: PLAIN_LANGUAGE.to_string(),
                scope_name: PLAIN_SCOPE_NAME.to_string(),
                ..Default::default()
            }
        } else {
            self.grammar_provider.load_grammar(scope_name).await?
        };

        #[cfg(feature = "debug")]
        log::debug!("Compiling grammar {scope_name}");
        let compiled = Arc::new(raw.compile()?);

        // Another task might have compiled it in the meantime, keep the first one
        let grammars = self.grammars.pin();
        Ok(grammars
            .get_or_insert(scope_name.to_string(), compiled)
            .clone())
    }

    async fn load_optional_grammar(
        &self,
        scope_name: &str,
    ) -> OcraResult<Option<Arc<CompiledGrammar>>> {
        match self.grammar(scope_name).await {
            Ok(grammar) => Ok(Some(grammar)),
            Err(Error::GrammarNotFound(_)) => {
                #[cfg(feature = "debug")]
                log::warn!("Grammar {scope_name} is referenced but could not be found");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// The grammar of that scope linked with the grammars it includes and the injectors
    /// targeting it.
    ///
    /// Included grammars the provider does not know are skipped: rules including them fail
    /// when they are first used.
    pub async fn grammar_set(&self, scope_name: &str) -> OcraResult<Arc<GrammarSet>> {
        let cached = self.grammar_sets.pin().get(scope_name).cloned();
        if let Some(set) = cached {
            return Ok(set);
        }

        let base = self.grammar(scope_name).await?;
        let mut seen: HashSet<String> = HashSet::from([scope_name.to_string()]);
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut others = Vec::new();
        let mut injectors = Vec::new();

        for injector_scope in self.grammar_provider.injections(scope_name) {
            if !seen.insert(injector_scope.clone()) {
                continue;
            }
            if let Some(injector) = self.load_optional_grammar(&injector_scope).await? {
                queue.extend(injector.external_scopes().into_iter().map(String::from));
                injectors.push(injector);
            }
        }
        queue.extend(base.external_scopes().into_iter().map(String::from));

        while let Some(scope) = queue.pop_front() {
            if !seen.insert(scope.clone()) {
                continue;
            }
            let Some(grammar) = self.load_optional_grammar(&scope).await? else {
                continue;
            };
            queue.extend(grammar.external_scopes().into_iter().map(String::from));
            others.push(grammar);
        }

        // Included grammars declaring `injectTo` with the base scope are injectors too
        for grammar in &others {
            if !grammar.injection_selector.is_empty()
                && grammar.inject_to.iter().any(|t| t == scope_name)
                && !injectors.iter().any(|i| Arc::ptr_eq(i, grammar))
            {
                injectors.push(grammar.clone());
            }
        }

        #[cfg(feature = "debug")]
        log::debug!(
            "Linked {scope_name} with {} grammars and {} injectors",
            others.len(),
            injectors.len()
        );

        let set = Arc::new(GrammarSet::new(base, others, injectors));
        let sets = self.grammar_sets.pin();
        Ok(sets.get_or_insert(scope_name.to_string(), set).clone())
    }

    /// Loads and compiles the theme with that name, once.
    pub async fn theme(&self, name: &str) -> OcraResult<Arc<CompiledTheme>> {
        let cached = self.themes.pin().get(name).cloned();
        if let Some(theme) = cached {
            return Ok(theme);
        }

        let raw = self.theme_provider.load_theme(name).await?;
        let color_map = match &self.color_palette {
            Some(palette) => ColorMap::frozen(palette),
            None => ColorMap::new(),
        };
        let compiled = Arc::new(CompiledTheme::from_raw_theme(raw, color_map)?);

        let themes = self.themes.pin();
        Ok(themes.get_or_insert(name.to_string(), compiled).clone())
    }

    /// The colors of a theme: token attributes refer to them by index.
    pub async fn theme_colors(&self, name: &str) -> OcraResult<ThemeColors> {
        let theme = self.theme(name).await?;
        Ok(ThemeColors {
            colors: theme.colors().to_vec(),
            foreground: theme.foreground().to_string(),
            background: theme.background().to_string(),
        })
    }

    fn basic_attributes(
        &self,
        config: &LanguageConfiguration,
    ) -> Arc<BasicScopeAttributesProvider> {
        let providers = self.basic_attributes.pin();
        if let Some(provider) = providers.get(&config.name) {
            return provider.clone();
        }
        let provider = Arc::new(BasicScopeAttributesProvider::new(
            config.language_id,
            &config.embedded_languages,
        ));
        providers.get_or_insert(config.name.clone(), provider).clone()
    }

    /// A tokenizer for that language and theme, sharing the cached grammars and theme.
    pub async fn tokenizer(&self, lang: &str, theme: &str) -> OcraResult<Tokenizer> {
        let config = self.language(lang)?;
        let grammars = self.grammar_set(&config.scope_name).await?;
        let theme = self.theme(theme).await?;

        let mut tokenizer = Tokenizer::new(grammars, theme, self.basic_attributes(&config))
            .with_token_types(config.token_type_overrides());
        if let Some(selectors) = config.bracket_selectors() {
            tokenizer = tokenizer.with_balanced_brackets(selectors);
        }
        Ok(tokenizer)
    }

    /// The main entry point: tokenizes `text` line by line.
    ///
    /// Loading happens before this returns, the lines are then produced lazily as the iterator
    /// is consumed.
    pub async fn tokenize<'a>(
        &self,
        text: &'a str,
        lang: &str,
        theme: &str,
        options: &TokenizeOptions,
    ) -> OcraResult<TokenizeLines<'a>> {
        let tokenizer = self.tokenizer(lang, theme).await?;
        tokenizer.tokenize(text, options)
    }

    /// Tokenizes `text` once per theme, cutting every line wherever a token of any theme
    /// starts.
    pub async fn tokenize_with_themes<'a>(
        &self,
        text: &'a str,
        lang: &str,
        themes: &[&str],
        options: &TokenizeOptions,
        merging: MergingOptions,
    ) -> OcraResult<MultiThemeLines<'a>> {
        let mut tokenizers = Vec::with_capacity(themes.len());
        for theme in themes {
            tokenizers.push(self.tokenizer(lang, theme).await?);
        }
        MultiThemeLines::new(text, &tokenizers, options, merging)
    }

    #[cfg(feature = "dump")]
    /// Dumps every compiled grammar loaded so far, compressed.
    pub fn dump_grammars(&self) -> OcraResult<Vec<u8>> {
        let mut grammars: Vec<CompiledGrammar> = self
            .grammars
            .pin()
            .values()
            .map(|g| g.as_ref().clone())
            .collect();
        grammars.sort_by(|a, b| a.scope_name.cmp(&b.scope_name));

        let encoded = bitcode::serialize(&grammars)?;
        Ok(zstd::encode_all(encoded.as_slice(), 3)?)
    }

    #[cfg(feature = "dump")]
    /// Loads grammars from a dump made by [`Registry::dump_grammars`].
    ///
    /// Grammars already loaded are kept: states created with them stay valid.
    pub fn load_grammar_dump(&self, bytes: &[u8]) -> OcraResult<()> {
        let encoded = zstd::decode_all(bytes)?;
        let grammars: Vec<CompiledGrammar> = bitcode::deserialize(&encoded)?;

        let cache = self.grammars.pin();
        for grammar in grammars {
            cache.get_or_insert(grammar.scope_name.clone(), Arc::new(grammar));
        }
        Ok(())
    }

    #[cfg(feature = "dump")]
    /// Writes [`Registry::dump_grammars`] to a file
    pub fn dump_to_file(&self, path: impl AsRef<Path>) -> OcraResult<()> {
        std::fs::write(path, self.dump_grammars()?)?;
        Ok(())
    }

    #[cfg(feature = "dump")]
    /// Reads a file written by [`Registry::dump_to_file`]
    pub fn load_from_file(&self, path: impl AsRef<Path>) -> OcraResult<()> {
        let bytes = std::fs::read(path)?;
        self.load_grammar_dump(&bytes)
    }
}
