use std::fmt;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, de};

use crate::document::{DocumentFormat, parse_document, parse_document_file};
use crate::error::OcraResult;
use crate::themes::compiled::CompiledTheme;
use crate::themes::color_map::ColorMap;

/// Accepts a string, or ignores any other type of value
fn deserialize_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_str().map(|s| s.to_string()))
}

/// Accepts a number, or ignores any other type of value
fn deserialize_optional_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_f64())
}

/// Token color settings from a VSCode theme JSON or a tmTheme
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenColorSettings {
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    foreground: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    background: Option<String>,
    /// `None` means not set while an empty string explicitly removes any font style
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub font_style: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub font_family: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_number")]
    pub font_size: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_optional_number")]
    pub line_height: Option<f64>,
}

impl TokenColorSettings {
    pub fn foreground(&self) -> Option<&str> {
        match self.foreground.as_deref() {
            Some("inherit") | None => None,
            Some(s) => Some(s),
        }
    }

    pub fn background(&self) -> Option<&str> {
        match self.background.as_deref() {
            Some("inherit") | None => None,
            Some(s) => Some(s),
        }
    }
}

/// Custom deserializer for scope field that can be string or array.
///
/// A string can contain multiple comma separated selectors: they are kept as a single item
/// and split when compiling selectors since commas can also appear inside parentheses.
fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ScopeVisitor;

    impl<'de> Visitor<'de> for ScopeVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("string or array of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            let value = value.trim_matches(|c: char| c == ',' || c.is_whitespace());
            if value.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![value.to_owned()])
            }
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut vec = Vec::new();
            while let Some(item) = seq.next_element::<String>()? {
                vec.push(item);
            }
            Ok(vec)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Vec::new())
        }
    }

    deserializer.deserialize_any(ScopeVisitor)
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Colors {
    pub foreground: Option<String>,
    pub background: Option<String>,
}

// Some themes have it as editor.foreground/background some don't have the editor. prefix
impl<'de> Deserialize<'de> for Colors {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ColorsVisitor;

        impl<'de> Visitor<'de> for ColorsVisitor {
            type Value = Colors;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("struct Colors")
            }

            fn visit_map<V>(self, mut map: V) -> Result<Colors, V::Error>
            where
                V: MapAccess<'de>,
            {
                let mut colors = Colors::default();

                while let Some(key) = map.next_key::<String>()? {
                    let value: serde_json::Value = map.next_value()?;
                    let Some(value) = value.as_str() else {
                        continue;
                    };
                    match key.as_str() {
                        // editor.* wins over the short form
                        "editor.foreground" => colors.foreground = Some(value.to_owned()),
                        "foreground" if colors.foreground.is_none() => {
                            colors.foreground = Some(value.to_owned())
                        }
                        "editor.background" => colors.background = Some(value.to_owned()),
                        "background" if colors.background.is_none() => {
                            colors.background = Some(value.to_owned())
                        }
                        _ => (),
                    }
                }

                Ok(colors)
            }
        }

        deserializer.deserialize_map(ColorsVisitor)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TokenColorRule {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_vec", default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub settings: Option<TokenColorSettings>,
}

/// Raw theme loaded from a VSCode JSON theme or a tmTheme
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct RawTheme {
    #[serde(default)]
    pub name: String,
    /// `light` or `dark`
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
    #[serde(default)]
    pub colors: Colors,
    /// Token color rules for syntax highlighting, VSCode theme format
    #[serde(rename = "tokenColors", default)]
    pub token_colors: Vec<TokenColorRule>,
    /// Token color rules for syntax highlighting, tmTheme format
    #[serde(default)]
    pub settings: Vec<TokenColorRule>,
}

impl RawTheme {
    /// Parses a theme from a JSON or PLIST string
    pub fn load_from_str(content: &str, format: DocumentFormat) -> OcraResult<Self> {
        let value = parse_document(content, format, None)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Parses a theme file, the format being picked from the file extension
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> OcraResult<Self> {
        let value = parse_document_file(path, None, false)?;
        Ok(serde_json::from_value(value)?)
    }

    /// All rules in order, whichever format they came from
    pub fn rules(&self) -> impl Iterator<Item = &TokenColorRule> {
        self.settings.iter().chain(self.token_colors.iter())
    }

    /// Compile this raw theme, allocating colors in a new color map
    pub fn compile(self) -> OcraResult<CompiledTheme> {
        CompiledTheme::from_raw_theme(self, ColorMap::new())
    }
}
